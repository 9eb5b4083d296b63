use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use thiserror::Error;

use crate::capabilities::{HttpError, ValidatedUrl, MAX_TIMEOUT_MS};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_CHAT_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_IMAGE_MODEL: &str = "gemini-2.5-flash-image";
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 120_000;

pub const API_KEY_VARS: &[&str] = &["GEMINI_API_KEY", "API_KEY"];
pub const BASE_URL_VAR: &str = "GEMINI_BASE_URL";
pub const CHAT_MODEL_VAR: &str = "GEMINI_CHAT_MODEL";
pub const IMAGE_MODEL_VAR: &str = "GEMINI_IMAGE_MODEL";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("no API key configured (set GEMINI_API_KEY or API_KEY)")]
    MissingApiKey,

    #[error("API key contains whitespace or control characters")]
    MalformedApiKey,

    #[error("invalid base URL: {0}")]
    InvalidBaseUrl(#[from] HttpError),

    #[error("invalid model name '{0}'")]
    InvalidModel(String),

    #[error("request timeout must be between 1 and {max}ms, got {got}")]
    InvalidTimeout { got: u64, max: u64 },
}

/// Process-wide settings for the model service. Read-only after startup.
///
/// The key is held as a [`SecretString`], so `Debug` output redacts it, and
/// the type deliberately has no `Serialize` impl.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    api_key: SecretString,
    #[serde(default = "default_base_url")]
    base_url: String,
    #[serde(default = "default_chat_model")]
    chat_model: String,
    #[serde(default = "default_image_model")]
    image_model: String,
    #[serde(default = "default_timeout_ms")]
    timeout_ms: u64,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_chat_model() -> String {
    DEFAULT_CHAT_MODEL.to_string()
}

fn default_image_model() -> String {
    DEFAULT_IMAGE_MODEL.to_string()
}

fn default_timeout_ms() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_MS
}

impl ServiceConfig {
    pub fn new(api_key: impl Into<String>) -> Result<Self, ConfigError> {
        let config = Self {
            api_key: SecretString::new(api_key.into()),
            base_url: default_base_url(),
            chat_model: default_chat_model(),
            image_model: default_image_model(),
            timeout_ms: default_timeout_ms(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Loads the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_blank = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let api_key = API_KEY_VARS
            .iter()
            .find_map(|key| non_blank(*key))
            .map(|key| key.trim().to_string())
            .ok_or(ConfigError::MissingApiKey)?;

        let mut config = Self::new(api_key)?;
        if let Some(base_url) = non_blank(BASE_URL_VAR) {
            config = config.with_base_url(base_url)?;
        }
        if let Some(model) = non_blank(CHAT_MODEL_VAR) {
            config = config.with_chat_model(model)?;
        }
        if let Some(model) = non_blank(IMAGE_MODEL_VAR) {
            config = config.with_image_model(model)?;
        }
        Ok(config)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Result<Self, ConfigError> {
        let base_url = base_url.into();
        ValidatedUrl::new(base_url.as_str())?;
        self.base_url = base_url.trim_end_matches('/').to_string();
        Ok(self)
    }

    pub fn with_chat_model(mut self, model: impl Into<String>) -> Result<Self, ConfigError> {
        self.chat_model = Self::checked_model(model.into())?;
        Ok(self)
    }

    pub fn with_image_model(mut self, model: impl Into<String>) -> Result<Self, ConfigError> {
        self.image_model = Self::checked_model(model.into())?;
        Ok(self)
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Result<Self, ConfigError> {
        self.timeout_ms = timeout_ms;
        self.validate()?;
        Ok(self)
    }

    /// Checks a configuration that arrived from the shell rather than
    /// through the constructors.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let key = self.api_key.expose_secret();
        if key.trim().is_empty() {
            return Err(ConfigError::MissingApiKey);
        }
        // The key travels as a header value.
        if key.chars().any(|c| c.is_control() || c.is_whitespace()) {
            return Err(ConfigError::MalformedApiKey);
        }
        ValidatedUrl::new(self.base_url.as_str())?;
        Self::checked_model(self.chat_model.clone())?;
        Self::checked_model(self.image_model.clone())?;
        if self.timeout_ms == 0 || self.timeout_ms > MAX_TIMEOUT_MS {
            return Err(ConfigError::InvalidTimeout {
                got: self.timeout_ms,
                max: MAX_TIMEOUT_MS,
            });
        }
        Ok(())
    }

    pub fn api_key(&self) -> &SecretString {
        &self.api_key
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn chat_model(&self) -> &str {
        &self.chat_model
    }

    pub fn image_model(&self) -> &str {
        &self.image_model
    }

    pub fn timeout_ms(&self) -> u64 {
        self.timeout_ms
    }

    /// `{base}/v1beta/models/{model}:generateContent`
    pub fn generate_content_url(&self, model: &str) -> String {
        format!("{}/v1beta/models/{model}:generateContent", self.base_url)
    }

    fn checked_model(model: String) -> Result<String, ConfigError> {
        let valid = !model.is_empty()
            && model
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_'));
        if valid {
            Ok(model)
        } else {
            Err(ConfigError::InvalidModel(model))
        }
    }
}
