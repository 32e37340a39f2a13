//! Runtime configuration, read from the environment (and `.env`).

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result};
use tokio::time::Duration;

use crate::retry::RetryPolicy;

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Model identifiers used for each capability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSet {
    pub text: String,
    pub image: String,
    pub speech: String,
    /// Used for text-only and single-image video jobs.
    pub video_fast: String,
    /// Used when several reference images are supplied.
    pub video_reference: String,
}

impl Default for ModelSet {
    fn default() -> Self {
        Self {
            text: "gemini-2.5-flash".to_string(),
            image: "imagen-4.0-generate-001".to_string(),
            speech: "gemini-2.5-flash-preview-tts".to_string(),
            video_fast: "veo-3.1-fast-generate-preview".to_string(),
            video_reference: "veo-3.1-generate-preview".to_string(),
        }
    }
}

/// Poll cadence and budget for long-running video jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub interval: Duration,
    pub max_polls: u32,
    /// Retry budget applied to each individual poll call.
    pub retry: RetryPolicy,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            max_polls: 120,
            retry: RetryPolicy::poll_default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StudioConfig {
    pub api_key: String,
    pub base_url: String,
    pub models: ModelSet,
    pub retry: RetryPolicy,
    pub poll: PollSettings,
    pub output_dir: PathBuf,
}

impl StudioConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            models: ModelSet::default(),
            retry: RetryPolicy::default(),
            poll: PollSettings::default(),
            output_dir: PathBuf::from("output"),
        }
    }

    /// Loads `.env` if present, then reads `GEMINI_API_KEY` and the optional
    /// `STUDIO_*` overrides.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let api_key = env::var("GEMINI_API_KEY")
            .context("GEMINI_API_KEY not found in env; please set it in .env")?;
        let mut cfg = Self::new(api_key);

        if let Ok(url) = env::var("STUDIO_BASE_URL") {
            cfg.base_url = url.trim_end_matches('/').to_string();
        }
        if let Some(n) = parse_var::<u32>("STUDIO_MAX_RETRIES")? {
            cfg.retry.max_retries = n;
        }
        if let Some(ms) = parse_var::<u64>("STUDIO_RETRY_DELAY_MS")? {
            cfg.retry.initial_delay = Duration::from_millis(ms);
        }
        if let Some(secs) = parse_var::<u64>("STUDIO_POLL_INTERVAL_SECS")? {
            cfg.poll.interval = Duration::from_secs(secs);
        }
        if let Some(n) = parse_var::<u32>("STUDIO_MAX_POLLS")? {
            cfg.poll.max_polls = n;
        }
        if let Ok(dir) = env::var("STUDIO_OUTPUT_DIR") {
            cfg.output_dir = PathBuf::from(dir);
        }
        Ok(cfg)
    }
}

fn parse_var<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .with_context(|| format!("{name} has an invalid value: {raw:?}")),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = StudioConfig::new("k");
        assert_eq!(cfg.retry.max_retries, 5);
        assert_eq!(cfg.retry.initial_delay, Duration::from_millis(2000));
        assert_eq!(cfg.poll.interval, Duration::from_secs(10));
        assert_eq!(cfg.poll.max_polls, 120);
        assert_eq!(cfg.poll.retry.max_retries, 3);
        assert_eq!(cfg.base_url, DEFAULT_BASE_URL);
    }
}
