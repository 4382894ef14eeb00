// Announcement text. Must never carry patient identity or the patient token:
// only the alert's short id and a fixed instruction.

use crate::core::alerts::model::AlertRecord;

pub fn announcement(alert: &AlertRecord) -> String {
    format!(
        "High-risk cardiac score for case {}. Check your secure portal.",
        alert.short_id()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_announcement_references_short_id_only() {
        let alert = AlertRecord {
            alert_id: "alrt_9c41e2ab".to_string(),
            patient_token: "pt_jane_doe_0042".to_string(),
            risk: 0.93,
            top_factors: vec![],
            timestamp: Utc::now(),
        };
        let text = announcement(&alert);

        assert_eq!(
            text,
            "High-risk cardiac score for case 41e2ab. Check your secure portal."
        );
        assert!(!text.contains(&alert.patient_token));
        assert!(!text.contains(&alert.alert_id));
    }
}
