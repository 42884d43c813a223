//! Runtime configuration: what providers to wire up, janitor cadence, and
//! worker pool sizing (spec.md §5, §6).

use std::time::Duration;

use archflow_providers::Strategy;
use archflow_schemas::Environment;

/// One configured adapter to register at init. The registry key is the
/// adapter's own stable id ("openai", "anthropic") - spec.md §4.1 adapters
/// are "discovered through a registry indexed by provider id", not a
/// caller-chosen alias.
pub enum ProviderSource {
    OpenAi { api_key: String },
    Anthropic { api_key: String },
}

/// Everything [`crate::Runtime::bootstrap`] needs to assemble the core.
pub struct RuntimeConfig {
    pub environment: Environment,
    pub providers: Vec<ProviderSource>,
    pub primary_provider: String,
    pub fallback_providers: Vec<String>,
    pub switcher_strategy: Strategy,
    pub step_pool_concurrency: usize,
    pub conversation_ttl: Duration,
    pub conversation_janitor_interval: Duration,
    pub event_subscriber_buffer: usize,
}

impl RuntimeConfig {
    /// Resolve the environment per spec.md §6, then fill everything else
    /// with the documented defaults (spec.md §4.10 30-minute TTL, §4.8
    /// shared worker pool).
    pub fn new(primary_provider: impl Into<String>) -> Self {
        Self {
            environment: archflow_schemas::resolve_environment(None, None),
            providers: Vec::new(),
            primary_provider: primary_provider.into(),
            fallback_providers: Vec::new(),
            switcher_strategy: Strategy::PrimaryOnly,
            step_pool_concurrency: 32,
            conversation_ttl: Duration::from_secs(30 * 60),
            conversation_janitor_interval: Duration::from_secs(60),
            event_subscriber_buffer: 256,
        }
    }

    pub fn with_provider(mut self, source: ProviderSource) -> Self {
        self.providers.push(source);
        self
    }

    pub fn with_fallback(mut self, provider_id: impl Into<String>) -> Self {
        self.fallback_providers.push(provider_id.into());
        self
    }

    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.switcher_strategy = strategy;
        self
    }

    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }
}
