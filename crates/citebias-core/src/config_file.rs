use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::LlmConfig;
use crate::retry::RetryPolicy;

/// On-disk TOML configuration structure.
/// All fields are optional so partial configs work (merge with defaults).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    pub llm: Option<LlmSection>,
    pub retry: Option<RetrySection>,
    pub merge: Option<MergeSection>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmSection {
    pub endpoint: Option<String>,
    pub model: Option<String>,
    pub api_token: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub system_prompt: Option<String>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetrySection {
    pub max_retries: Option<u32>,
    pub initial_backoff_secs: Option<f64>,
    pub backoff_factor: Option<f64>,
    pub max_backoff_secs: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MergeSection {
    pub collision_suffix: Option<String>,
}

/// Platform config directory path: `<config_dir>/citebias/config.toml`.
pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("citebias").join("config.toml"))
}

/// Load config by cascading CWD `.citebias.toml` over platform config.
/// CWD values override platform values.
pub fn load_config() -> ConfigFile {
    let platform = config_path().and_then(|p| load_from_path(&p));
    let cwd = load_from_path(Path::new(".citebias.toml"));

    match (platform, cwd) {
        (None, None) => ConfigFile::default(),
        (Some(p), None) => p,
        (None, Some(c)) => c,
        (Some(p), Some(c)) => merge(p, c),
    }
}

/// Load a config from a specific path. Returns `None` if the file doesn't
/// exist or can't be parsed.
pub fn load_from_path(path: &Path) -> Option<ConfigFile> {
    let content = std::fs::read_to_string(path).ok()?;
    match toml::from_str(&content) {
        Ok(config) => Some(config),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "ignoring unparseable config file");
            None
        }
    }
}

fn pick<S, T>(overlay: &Option<S>, base: &Option<S>, get: impl Fn(&S) -> Option<T>) -> Option<T> {
    overlay
        .as_ref()
        .and_then(&get)
        .or_else(|| base.as_ref().and_then(&get))
}

/// Merge two configs: `overlay` values take precedence over `base`.
pub fn merge(base: ConfigFile, overlay: ConfigFile) -> ConfigFile {
    ConfigFile {
        llm: Some(LlmSection {
            endpoint: pick(&overlay.llm, &base.llm, |l| l.endpoint.clone()),
            model: pick(&overlay.llm, &base.llm, |l| l.model.clone()),
            api_token: pick(&overlay.llm, &base.llm, |l| l.api_token.clone()),
            max_tokens: pick(&overlay.llm, &base.llm, |l| l.max_tokens),
            temperature: pick(&overlay.llm, &base.llm, |l| l.temperature),
            system_prompt: pick(&overlay.llm, &base.llm, |l| l.system_prompt.clone()),
            timeout_secs: pick(&overlay.llm, &base.llm, |l| l.timeout_secs),
        }),
        retry: Some(RetrySection {
            max_retries: pick(&overlay.retry, &base.retry, |r| r.max_retries),
            initial_backoff_secs: pick(&overlay.retry, &base.retry, |r| r.initial_backoff_secs),
            backoff_factor: pick(&overlay.retry, &base.retry, |r| r.backoff_factor),
            max_backoff_secs: pick(&overlay.retry, &base.retry, |r| r.max_backoff_secs),
        }),
        merge: Some(MergeSection {
            collision_suffix: pick(&overlay.merge, &base.merge, |m| m.collision_suffix.clone()),
        }),
    }
}

fn secs(value: f64) -> Option<Duration> {
    (value.is_finite() && value >= 0.0).then(|| Duration::from_secs_f64(value))
}

impl ConfigFile {
    /// The retry policy with file values over the defaults.
    pub fn retry_policy(&self) -> RetryPolicy {
        let defaults = RetryPolicy::default();
        let Some(r) = &self.retry else {
            return defaults;
        };
        RetryPolicy {
            max_retries: r.max_retries.unwrap_or(defaults.max_retries),
            initial_backoff: r
                .initial_backoff_secs
                .and_then(secs)
                .unwrap_or(defaults.initial_backoff),
            backoff_factor: r
                .backoff_factor
                .filter(|f| f.is_finite() && *f >= 1.0)
                .unwrap_or(defaults.backoff_factor),
            max_backoff: r
                .max_backoff_secs
                .and_then(secs)
                .unwrap_or(defaults.max_backoff),
        }
    }

    /// The LLM settings with file values over the defaults.
    pub fn llm_config(&self) -> LlmConfig {
        let defaults = LlmConfig::default();
        let Some(l) = &self.llm else {
            return defaults;
        };
        LlmConfig {
            endpoint: l.endpoint.clone().unwrap_or(defaults.endpoint),
            model: l.model.clone().unwrap_or(defaults.model),
            api_token: l.api_token.clone().or(defaults.api_token),
            max_tokens: l.max_tokens.or(defaults.max_tokens),
            temperature: l.temperature.or(defaults.temperature),
            system_prompt: l.system_prompt.clone().unwrap_or(defaults.system_prompt),
            timeout: l
                .timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
        }
    }

    pub fn collision_suffix(&self) -> Option<&str> {
        self.merge.as_ref()?.collision_suffix.as_deref()
    }
}
