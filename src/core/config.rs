use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;

use log::{info, warn};
use serde::{Deserialize, Serialize};

/// Environment variable naming an optional JSON settings file.
pub const CONFIG_PATH_ENV: &str = "VOIP_ALERT_CONFIG";

pub const DEFAULT_COOLDOWN_MINUTES: i64 = 30;

/// A credential that never shows up in `Debug` output.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// Asterisk Manager Interface endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AmiSettings {
    pub host: Option<String>,
    pub port: u16,
    pub username: Option<String>,
    pub secret: Option<Secret>,
    /// Number dialed by Originate
    pub destination: Option<String>,
    /// Channel technology, e.g. "SIP" or "PJSIP"
    pub channel_tech: String,
}

impl Default for AmiSettings {
    fn default() -> Self {
        Self {
            host: None,
            port: 5038,
            username: None,
            secret: None,
            destination: None,
            channel_tech: "SIP".to_string(),
        }
    }
}

impl AmiSettings {
    /// True only when every field needed to place a real call is present.
    pub fn is_complete(&self) -> bool {
        fn present(value: &Option<String>) -> bool {
            value.as_deref().is_some_and(|v| !v.is_empty())
        }
        present(&self.host)
            && present(&self.username)
            && self.secret.as_ref().is_some_and(|s| !s.expose().is_empty())
            && present(&self.destination)
    }
}

/// Service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub risk_threshold: f64,
    pub cooldown_minutes: i64,
    pub redis_url: Option<String>,
    pub ami: AmiSettings,
    /// Speech utility used by simulated calls (e.g. "say", "espeak")
    pub tts_command: Option<String>,
    pub model_path: PathBuf,
    pub bind_addr: String,
    pub top_k_factors: usize,
    /// Serialize decide/persist per patient token within this process
    pub strict_cooldown: bool,
    /// Dispatch in a background task instead of inside the request
    pub detach_dispatch: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            risk_threshold: 0.80,
            cooldown_minutes: DEFAULT_COOLDOWN_MINUTES,
            redis_url: None,
            ami: AmiSettings::default(),
            tts_command: default_tts_command(),
            model_path: PathBuf::from("./models/heart_linear.json"),
            bind_addr: "0.0.0.0:8000".to_string(),
            top_k_factors: 3,
            strict_cooldown: false,
            detach_dispatch: false,
        }
    }
}

fn default_tts_command() -> Option<String> {
    if cfg!(target_os = "macos") {
        Some("say -v Alex -r 150".to_string())
    } else {
        None
    }
}

impl Settings {
    /// Suppression window. Negative or out-of-range minutes fall back to the default.
    pub fn cooldown_window(&self) -> chrono::Duration {
        match chrono::Duration::try_minutes(self.cooldown_minutes) {
            Some(window) if self.cooldown_minutes >= 0 => window,
            _ => {
                warn!(
                    "Ignoring out-of-range cooldown of {} minutes, using {}",
                    self.cooldown_minutes, DEFAULT_COOLDOWN_MINUTES
                );
                chrono::Duration::minutes(DEFAULT_COOLDOWN_MINUTES)
            }
        }
    }

    /// Build settings from defaults, the optional settings file and the process environment.
    pub fn load() -> Self {
        let base = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) if !path.is_empty() => ConfigManager::new(PathBuf::from(path)).load(),
            _ => Settings::default(),
        };
        base.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply `KEY=value` overrides. Values that fail to parse keep the current setting.
    pub fn with_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        override_parsed(&get, "RISK_THRESHOLD", &mut self.risk_threshold);
        override_parsed(&get, "COOLDOWN_MINUTES", &mut self.cooldown_minutes);
        override_parsed(&get, "ASTERISK_PORT", &mut self.ami.port);
        override_parsed(&get, "TOP_K_FACTORS", &mut self.top_k_factors);
        override_flag(&get, "STRICT_COOLDOWN", &mut self.strict_cooldown);
        override_flag(&get, "DETACH_DISPATCH", &mut self.detach_dispatch);

        if let Some(url) = get("REDIS_URL") {
            self.redis_url = Some(url);
        }
        if let Some(host) = get("ASTERISK_HOST") {
            self.ami.host = Some(host);
        }
        if let Some(user) = get("ASTERISK_USER") {
            self.ami.username = Some(user);
        }
        if let Some(pass) = get("ASTERISK_PASS") {
            self.ami.secret = Some(Secret::new(pass));
        }
        if let Some(number) = get("ALERT_CALL_NUMBER") {
            self.ami.destination = Some(number);
        }
        if let Some(tech) = get("ASTERISK_CHANNEL_TECH") {
            self.ami.channel_tech = tech;
        }
        if let Some(cmd) = get("TTS_COMMAND") {
            self.tts_command = Some(cmd);
        }
        if let Some(path) = get("MODEL_PATH") {
            self.model_path = PathBuf::from(path);
        }
        if let Some(addr) = get("BIND_ADDR") {
            self.bind_addr = addr;
        }

        self
    }
}

fn override_parsed<T, G>(get: &G, key: &str, slot: &mut T)
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    if let Some(raw) = get(key) {
        match raw.trim().parse::<T>() {
            Ok(value) => *slot = value,
            Err(_) => warn!("Ignoring unparsable {}={:?}, keeping default", key, raw),
        }
    }
}

/// Boolean switches accept `1/0`, `true/false`, `yes/no` and `on/off`.
fn override_flag<G>(get: &G, key: &str, slot: &mut bool)
where
    G: Fn(&str) -> Option<String>,
{
    if let Some(raw) = get(key) {
        match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => *slot = true,
            "0" | "false" | "no" | "off" => *slot = false,
            _ => warn!("Ignoring unparsable {}={:?}, keeping default", key, raw),
        }
    }
}

/// Loads settings from a JSON file.
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    pub fn new(config_path: PathBuf) -> Self {
        Self { config_path }
    }

    pub fn load(&self) -> Settings {
        if !self.config_path.exists() {
            warn!("Settings file {:?} not found, using defaults", self.config_path);
            return Settings::default();
        }
        match fs::read_to_string(&self.config_path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(settings) => {
                    info!("Loaded settings from {:?}", self.config_path);
                    settings
                }
                Err(e) => {
                    warn!("Invalid settings file {:?}: {}", self.config_path, e);
                    Settings::default()
                }
            },
            Err(e) => {
                warn!("Cannot read settings file {:?}: {}", self.config_path, e);
                Settings::default()
            }
        }
    }
}
