use std::time::Duration;

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_CHAT_MODEL: &str = "gemini-1.5-pro";

/// Server settings, read from the environment (after `.env` is loaded).
#[derive(Debug, Clone)]
pub struct Config {
    pub api_key: Option<String>,
    pub api_base: String,
    pub chat_model: String,
    pub port: u16,
    pub environment: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: DEFAULT_API_BASE.into(),
            chat_model: DEFAULT_CHAT_MODEL.into(),
            port: 8080,
            environment: "development".into(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let non_empty = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        Self {
            api_key: non_empty("GEMINI_API_KEY"),
            api_base: non_empty("GEMINI_API_BASE").unwrap_or(defaults.api_base),
            chat_model: non_empty("GEMINI_CHAT_MODEL").unwrap_or(defaults.chat_model),
            port: non_empty("PORT").and_then(|v| v.parse().ok()).unwrap_or(defaults.port),
            environment: non_empty("APP_ENV").unwrap_or(defaults.environment),
        }
    }

    pub fn has_api_key(&self) -> bool { self.api_key.is_some() }
}

/// Timings of the generation poll loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorConfig {
    pub poll_interval: Duration,
    /// Typical generation time, the basis of the progress estimate.
    pub estimated_total: Duration,
    /// Hard ceiling after which an attempt is abandoned.
    pub max_polling: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(5_000),
            estimated_total: Duration::from_millis(180_000),
            max_polling: Duration::from_millis(360_000),
        }
    }
}
