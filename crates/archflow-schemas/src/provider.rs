//! LLM provider configuration and stats (spec.md §3)

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::ArchflowError;
use crate::workflow::duration_millis;

/// A recognised provider identifier. Kept as a string newtype (rather than
/// a closed enum) so new providers can be registered without a breaking
/// change, matching `everruns-core::provider_factory::ProviderType`'s
/// `FromStr`/`Display` texture but open-ended per spec.md's provider list
/// (openai, anthropic, azure, bedrock, vertex, watsonx, ollama, ...).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct ProviderId(pub String);

impl ProviderId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ProviderId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Decoding parameters and credentials for an LLM provider (spec.md §3
/// LLM Provider Config).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmProviderConfig {
    pub provider: ProviderId,
    pub model: String,
    pub api_key: Option<String>,
    /// Provider-specific extras: endpoint, deployment, region, etc.
    #[serde(default)]
    pub extras: std::collections::HashMap<String, String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(with = "duration_millis", default = "default_timeout")]
    pub timeout: Duration,
}

fn default_temperature() -> f32 {
    1.0
}
fn default_top_p() -> f32 {
    1.0
}
fn default_max_tokens() -> u32 {
    1024
}
fn default_timeout() -> Duration {
    Duration::from_secs(60)
}

impl LlmProviderConfig {
    pub fn new(provider: impl Into<ProviderId>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            api_key: None,
            extras: Default::default(),
            temperature: default_temperature(),
            top_p: default_top_p(),
            max_tokens: default_max_tokens(),
            timeout: default_timeout(),
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Validate decoding parameters are within range (spec.md §3 invariant:
    /// temperature in [0,2], topP in [0,1], maxTokens > 0).
    pub fn validate(&self) -> Result<(), ArchflowError> {
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ArchflowError::validation(format!(
                "temperature {} out of range [0,2]",
                self.temperature
            )));
        }
        if !(0.0..=1.0).contains(&self.top_p) {
            return Err(ArchflowError::validation(format!(
                "topP {} out of range [0,1]",
                self.top_p
            )));
        }
        if self.max_tokens == 0 {
            return Err(ArchflowError::validation("maxTokens must be > 0"));
        }
        Ok(())
    }
}

/// Per-provider counters feeding Provider Switcher strategy decisions
/// (spec.md §4.2). Stats are eventually consistent; readers may observe
/// stale but never torn fields.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ProviderStats {
    pub success_count: u64,
    pub failure_count: u64,
    #[serde(with = "duration_millis")]
    pub total_duration: Duration,
    #[serde(with = "opt_duration_millis")]
    pub min_duration: Option<Duration>,
    #[serde(with = "opt_duration_millis")]
    pub max_duration: Option<Duration>,
}

mod opt_duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        d.map(|d| d.as_millis() as u64).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        let millis = Option::<u64>::deserialize(d)?;
        Ok(millis.map(Duration::from_millis))
    }
}

impl ProviderStats {
    pub fn record_success(&mut self, duration: Duration) {
        self.success_count += 1;
        self.total_duration += duration;
        self.min_duration = Some(self.min_duration.map_or(duration, |m| m.min(duration)));
        self.max_duration = Some(self.max_duration.map_or(duration, |m| m.max(duration)));
    }

    pub fn record_failure(&mut self) {
        self.failure_count += 1;
    }

    pub fn total_calls(&self) -> u64 {
        self.success_count + self.failure_count
    }

    pub fn success_rate(&self) -> f64 {
        let total = self.total_calls();
        if total == 0 {
            return 0.0;
        }
        self.success_count as f64 / total as f64
    }

    /// Mean latency across successful calls; `None` ("unknown") if no
    /// successes have been recorded yet.
    pub fn mean_duration(&self) -> Option<Duration> {
        if self.success_count == 0 {
            None
        } else {
            Some(self.total_duration / self.success_count as u32)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_out_of_range_temperature() {
        let mut cfg = LlmProviderConfig::new("openai", "gpt-4o");
        cfg.temperature = 3.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_zero_max_tokens() {
        let mut cfg = LlmProviderConfig::new("openai", "gpt-4o");
        cfg.max_tokens = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn stats_success_rate_and_mean_duration() {
        let mut stats = ProviderStats::default();
        stats.record_success(Duration::from_millis(100));
        stats.record_success(Duration::from_millis(300));
        stats.record_failure();

        assert_eq!(stats.total_calls(), 3);
        assert!((stats.success_rate() - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(stats.mean_duration(), Some(Duration::from_millis(200)));
    }
}
