use std::{collections::HashMap, fs, path::Path, time::Duration};

use serde::Deserialize;
use tracing::warn;

use crate::{latency::LatencyRange, simulated::SimulatedLatency, FailurePolicy};

pub const DEFAULT_SETTINGS_FILE: &str = "client.toml";

#[derive(Debug, Clone, Deserialize)]
pub struct ClientSettings {
    pub api_base_url: String,
    pub database_url: String,
    pub request_timeout_ms: u64,
    pub health_timeout_ms: u64,
    pub failure_policy: FailurePolicy,
    pub force_simulated: bool,
    pub caption_delay_ms: (u64, u64),
    pub report_delay_ms: (u64, u64),
    pub save_case_delay_ms: (u64, u64),
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:5000/api".into(),
            database_url: "sqlite://./data/client.db".into(),
            request_timeout_ms: 30_000,
            health_timeout_ms: 3_000,
            failure_policy: FailurePolicy::DowngradeOnAnyFailure,
            force_simulated: false,
            caption_delay_ms: (2_000, 4_000),
            report_delay_ms: (1_000, 2_000),
            save_case_delay_ms: (300, 800),
        }
    }
}

impl ClientSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn health_timeout(&self) -> Duration {
        Duration::from_millis(self.health_timeout_ms)
    }

    pub fn simulated_latency(&self) -> SimulatedLatency {
        SimulatedLatency {
            caption: LatencyRange::from_millis(self.caption_delay_ms.0, self.caption_delay_ms.1),
            report: LatencyRange::from_millis(self.report_delay_ms.0, self.report_delay_ms.1),
            save_case: LatencyRange::from_millis(
                self.save_case_delay_ms.0,
                self.save_case_delay_ms.1,
            ),
        }
    }
}

/// Reads `client.toml` from the working directory, then `APP__*` environment overrides.
pub fn load_settings() -> ClientSettings {
    load_settings_with(Path::new(DEFAULT_SETTINGS_FILE), |key| std::env::var(key).ok())
}

pub fn load_settings_with(
    path: &Path,
    env: impl Fn(&str) -> Option<String>,
) -> ClientSettings {
    let mut settings = ClientSettings::default();

    if let Ok(raw) = fs::read_to_string(path) {
        match toml::from_str::<HashMap<String, toml::Value>>(&raw) {
            Ok(file_cfg) => {
                for (key, value) in file_cfg {
                    let value = match value {
                        toml::Value::String(s) => s,
                        other => other.to_string(),
                    };
                    apply(&mut settings, &key, &value);
                }
            }
            Err(error) => warn!(
                %error,
                path = %path.display(),
                "config: ignoring unreadable settings file"
            ),
        }
    }

    for key in [
        "api_base_url",
        "database_url",
        "request_timeout_ms",
        "health_timeout_ms",
        "failure_policy",
        "force_simulated",
        "caption_delay_ms",
        "report_delay_ms",
        "save_case_delay_ms",
    ] {
        if let Some(v) = env(&format!("APP__{}", key.to_ascii_uppercase())) {
            apply(&mut settings, key, &v);
        }
    }

    settings
}

fn apply(settings: &mut ClientSettings, key: &str, value: &str) {
    let value = value.trim();
    match key {
        "api_base_url" => settings.api_base_url = value.to_string(),
        "database_url" => settings.database_url = value.to_string(),
        "request_timeout_ms" => set_parsed(&mut settings.request_timeout_ms, key, value),
        "health_timeout_ms" => set_parsed(&mut settings.health_timeout_ms, key, value),
        "force_simulated" => set_parsed(&mut settings.force_simulated, key, value),
        "failure_policy" => match FailurePolicy::parse(value) {
            Some(policy) => settings.failure_policy = policy,
            None => warn!(key, value, "config: unknown failure policy"),
        },
        "caption_delay_ms" => set_range(&mut settings.caption_delay_ms, key, value),
        "report_delay_ms" => set_range(&mut settings.report_delay_ms, key, value),
        "save_case_delay_ms" => set_range(&mut settings.save_case_delay_ms, key, value),
        _ => warn!(key, "config: ignoring unknown setting"),
    }
}

fn set_parsed<T: std::str::FromStr>(slot: &mut T, key: &str, value: &str) {
    match value.parse::<T>() {
        Ok(parsed) => *slot = parsed,
        Err(_) => warn!(key, value, "config: ignoring unparsable value"),
    }
}

/// Accepts `"min..max"`, `"min-max"` or a two-element TOML array, in milliseconds.
fn set_range(slot: &mut (u64, u64), key: &str, value: &str) {
    let inner = value.trim_start_matches('[').trim_end_matches(']');
    let parsed = inner
        .split_once("..")
        .or_else(|| inner.split_once(','))
        .or_else(|| inner.split_once('-'))
        .and_then(|(lo, hi)| Some((lo.trim().parse().ok()?, hi.trim().parse().ok()?)));
    match parsed {
        Some(range) => *slot = range,
        None => warn!(key, value, "config: expected a range like 2000..4000"),
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
