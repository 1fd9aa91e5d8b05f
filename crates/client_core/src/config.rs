use std::{collections::HashMap, fs, path::Path};

use anyhow::Context;
use serde::Deserialize;

pub const DEFAULT_CONFIG_FILE: &str = "realtime.toml";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ClientSettings {
    pub session_url: String,
    pub realtime_url: String,
    pub default_model: String,
    pub transcription_model: String,
    pub greeting_instructions: String,
    pub data_channel_label: String,
    pub user_id: String,
    pub room: Option<String>,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            session_url: "http://localhost:8000/session".into(),
            realtime_url: "https://api.openai.com/v1/realtime".into(),
            default_model: "gpt-realtime".into(),
            transcription_model: "whisper-1".into(),
            greeting_instructions:
                "Greet the user and ask how you can help. Only ever speak in english.".into(),
            data_channel_label: "oai-events".into(),
            user_id: "guest".into(),
            room: None,
        }
    }
}

impl ClientSettings {
    pub fn apply_file_overrides(&mut self, file_cfg: &HashMap<String, String>) {
        for (key, value) in file_cfg {
            self.set(key, value.clone());
        }
    }

    /// Later names in each list win, so `APP__` prefixed variables override
    /// the plain ones.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        const ENV_KEYS: &[(&str, &[&str])] = &[
            ("session_url", &["REALTIME_SESSION_URL", "APP__SESSION_URL"]),
            ("realtime_url", &["REALTIME_URL", "APP__REALTIME_URL"]),
            ("default_model", &["REALTIME_MODEL", "APP__REALTIME_MODEL"]),
            ("transcription_model", &["APP__TRANSCRIPTION_MODEL"]),
            ("greeting_instructions", &["APP__GREETING_INSTRUCTIONS"]),
            ("data_channel_label", &["APP__DATA_CHANNEL_LABEL"]),
            ("user_id", &["REALTIME_USER_ID", "APP__USER_ID"]),
            ("room", &["APP__ROOM"]),
        ];

        for (key, names) in ENV_KEYS {
            for name in *names {
                if let Some(value) = lookup(name) {
                    self.set(key, value);
                }
            }
        }
    }

    fn set(&mut self, key: &str, value: String) {
        match key {
            "session_url" => self.session_url = value,
            "realtime_url" => self.realtime_url = value,
            "default_model" | "model" => self.default_model = value,
            "transcription_model" => self.transcription_model = value,
            "greeting_instructions" => self.greeting_instructions = value,
            "data_channel_label" => self.data_channel_label = value,
            "user_id" => self.user_id = value,
            "room" => {
                let room = value.trim();
                self.room = (!room.is_empty()).then(|| room.to_string());
            }
            _ => {}
        }
    }
}

/// Defaults, then `path` (or `realtime.toml` when present), then environment.
///
/// An explicitly requested file must exist and parse; the default file is
/// optional.
pub fn load_settings(path: Option<&Path>) -> anyhow::Result<ClientSettings> {
    let mut settings = ClientSettings::default();

    match path {
        Some(path) => {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("failed to read config file '{}'", path.display()))?;
            let file_cfg = parse_file(&raw)
                .with_context(|| format!("failed to parse config file '{}'", path.display()))?;
            settings.apply_file_overrides(&file_cfg);
        }
        None => {
            if let Ok(raw) = fs::read_to_string(DEFAULT_CONFIG_FILE) {
                if let Ok(file_cfg) = parse_file(&raw) {
                    settings.apply_file_overrides(&file_cfg);
                }
            }
        }
    }

    settings.apply_env_overrides(|name| std::env::var(name).ok());
    Ok(settings)
}

fn parse_file(raw: &str) -> anyhow::Result<HashMap<String, String>> {
    Ok(toml::from_str::<HashMap<String, String>>(raw)?)
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
