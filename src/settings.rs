use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Server {
    pub listen: String,
    pub public_url: String,
}

impl Default for Server {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8080".to_string(),
            public_url: "http://localhost:8080".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    File,
    Postgres,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Storage {
    pub backend: StorageBackend,
    pub path: Option<String>,
    pub quota_bytes: Option<u64>,
    pub postgres_url: Option<String>,
}

impl Default for Storage {
    fn default() -> Self {
        Self {
            backend: StorageBackend::File,
            path: None,
            quota_bytes: Some(5 * 1024 * 1024),
            postgres_url: None,
        }
    }
}

impl Storage {
    /// Directory used by the file backend. Falls back to the platform data
    /// directory, then to `./data`.
    pub fn data_dir(&self) -> std::path::PathBuf {
        if let Some(path) = &self.path {
            return std::path::PathBuf::from(path);
        }

        directories::ProjectDirs::from("app", "survey-rewards", "survey-rewards")
            .map(|dirs| dirs.data_dir().to_path_buf())
            .unwrap_or_else(|| std::path::PathBuf::from("data"))
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AiProviderKind {
    Offline,
    Gemini,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Ai {
    pub provider: AiProviderKind,
    pub api_key: Option<String>,
    pub model: String,
    pub url: String,
    pub otp_timeout_ms: u64,
    pub message_timeout_ms: u64,
    pub questions_timeout_ms: u64,
    pub question_count: usize,
}

impl Default for Ai {
    fn default() -> Self {
        Self {
            provider: AiProviderKind::Offline,
            api_key: None,
            model: "gemini-2.0-flash".to_string(),
            url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            otp_timeout_ms: 5000,
            message_timeout_ms: 4000,
            questions_timeout_ms: 15000,
            question_count: 7,
        }
    }
}

impl Ai {
    pub fn question_count(&self) -> usize {
        self.question_count.clamp(5, 10)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Earnings {
    pub global_daily_cap: u64,
    pub referral_bonus: u64,
}

impl Default for Earnings {
    fn default() -> Self {
        Self {
            global_daily_cap: 100_000,
            referral_bonus: 50,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Survey {
    pub question_seconds: u32,
    pub tick_ms: u64,
    pub submit_delay_ms: u64,
}

impl Default for Survey {
    fn default() -> Self {
        Self {
            question_seconds: 45,
            tick_ms: 1000,
            submit_delay_ms: 1500,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Payments {
    pub verification_delay_ms: u64,
}

impl Default for Payments {
    fn default() -> Self {
        Self {
            verification_delay_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: Server,
    pub storage: Storage,
    pub ai: Ai,
    pub earnings: Earnings,
    pub survey: Survey,
    pub payments: Payments,
}

impl Settings {
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(Environment::with_prefix("SURVEY_REWARDS").separator("__"))
            .build()?;

        config.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let settings = Settings::load("definitely-not-here.toml").unwrap();

        assert_eq!(settings.earnings.global_daily_cap, 100_000);
        assert_eq!(settings.earnings.referral_bonus, 50);
        assert_eq!(settings.survey.question_seconds, 45);
        assert_eq!(settings.ai.provider, AiProviderKind::Offline);
        assert_eq!(settings.storage.backend, StorageBackend::File);
    }

    #[test]
    fn question_count_is_clamped() {
        let mut ai = Ai::default();
        ai.question_count = 2;
        assert_eq!(ai.question_count(), 5);
        ai.question_count = 40;
        assert_eq!(ai.question_count(), 10);
        ai.question_count = 8;
        assert_eq!(ai.question_count(), 8);
    }
}
