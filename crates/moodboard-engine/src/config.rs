use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use moodboard_contracts::{MoodboardError, Result};

use crate::providers::{
    DryrunProvider, GeminiProvider, ImageProvider, RetryPolicy, DEFAULT_API_BASE,
};

pub const DEFAULT_OUTPUT_DIR: &str = "outputs";
pub const DEFAULT_TEMPLATE_DIR: &str = "prompt_templates";
pub const DRYRUN_MODEL: &str = "dryrun-image-1";

const MISSING_KEY_MESSAGE: &str =
    "Set the GEMINI_API_KEY or GOOGLE_API_KEY environment variable with your Gemini API key.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProviderKind {
    #[default]
    Gemini,
    Dryrun,
}

impl ProviderKind {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "gemini" => Some(Self::Gemini),
            "dryrun" => Some(Self::Dryrun),
            _ => None,
        }
    }
}

/// Everything the engine needs from the environment, before CLI overrides.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub provider: ProviderKind,
    pub api_key: Option<String>,
    pub api_base: String,
    pub output_dir: PathBuf,
    pub template_dir: PathBuf,
    pub default_model: Option<String>,
    pub retry: RetryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::default(),
            api_key: None,
            api_base: DEFAULT_API_BASE.to_string(),
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            template_dir: PathBuf::from(DEFAULT_TEMPLATE_DIR),
            default_model: None,
            retry: RetryPolicy::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let defaults = Self::default();
        Self {
            api_key: non_empty("GEMINI_API_KEY").or_else(|| non_empty("GOOGLE_API_KEY")),
            api_base: non_empty("GEMINI_API_BASE")
                .map(|value| value.trim_end_matches('/').to_string())
                .unwrap_or(defaults.api_base),
            output_dir: non_empty("MOODBOARD_OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.output_dir),
            template_dir: non_empty("MOODBOARD_TEMPLATE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.template_dir),
            ..defaults
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.retry.timeout = timeout;
        self
    }

    /// The model used when a request names none.
    pub fn effective_default_model(&self) -> Option<&str> {
        match (self.default_model.as_deref(), self.provider) {
            (Some(model), _) => Some(model),
            (None, ProviderKind::Dryrun) => Some(DRYRUN_MODEL),
            (None, ProviderKind::Gemini) => None,
        }
    }

    pub fn build_provider(&self) -> Result<Arc<dyn ImageProvider>> {
        match self.provider {
            ProviderKind::Dryrun => Ok(Arc::new(DryrunProvider)),
            ProviderKind::Gemini => {
                let Some(api_key) = self.api_key.as_deref() else {
                    return Err(MoodboardError::configuration(MISSING_KEY_MESSAGE));
                };
                Ok(Arc::new(GeminiProvider::new(api_key, &self.api_base, self.retry)))
            }
        }
    }
}
