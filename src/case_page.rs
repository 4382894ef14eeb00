// HTML view of a stored alert. Shows the case reference, score and factors;
// the patient token is left out of the template data entirely.

use handlebars::{Handlebars, RenderError, TemplateError};
use serde::Serialize;

use crate::core::alerts::model::AlertRecord;

pub const CASE_TEMPLATE: &str = "case";

pub fn register_templates(registry: &mut Handlebars<'_>) -> Result<(), TemplateError> {
    registry.register_template_string(
        CASE_TEMPLATE,
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>Case {{alert_id}}</title>
</head>
<body>
<h1>Case {{alert_id}}</h1>
<p>Status: <strong>Alerted</strong></p>
<p>Risk: <strong>{{risk_percent}}%</strong></p>
<p>Recorded: {{timestamp}}</p>
<h2>Top factors</h2>
<table>
<thead><tr><th>Feature</th><th>Impact</th></tr></thead>
<tbody>
{{#each top_factors}}
<tr><td>{{feature}}</td><td>{{impact}}</td></tr>
{{/each}}
</tbody>
</table>
</body>
</html>
"#,
    )
}

#[derive(Serialize)]
struct FactorView<'a> {
    feature: &'a str,
    impact: String,
}

#[derive(Serialize)]
struct CaseView<'a> {
    alert_id: &'a str,
    risk_percent: String,
    timestamp: String,
    top_factors: Vec<FactorView<'a>>,
}

impl<'a> From<&'a AlertRecord> for CaseView<'a> {
    fn from(alert: &'a AlertRecord) -> Self {
        Self {
            alert_id: &alert.alert_id,
            risk_percent: format!("{:.1}", alert.risk * 100.0),
            timestamp: alert.timestamp.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
            top_factors: alert
                .top_factors
                .iter()
                .map(|f| FactorView {
                    feature: &f.feature,
                    impact: format!("{:.3}", f.impact),
                })
                .collect(),
        }
    }
}

/// Template registry for case pages. Output is HTML-escaped.
pub struct CasePages {
    registry: Handlebars<'static>,
}

impl CasePages {
    pub fn new() -> Result<Self, TemplateError> {
        let mut registry = Handlebars::new();
        registry.set_strict_mode(true);
        register_templates(&mut registry)?;
        Ok(Self { registry })
    }

    pub fn render(&self, alert: &AlertRecord) -> Result<String, RenderError> {
        self.registry
            .render(CASE_TEMPLATE, &CaseView::from(alert))
    }
}
