//! Provider Switcher (C2, spec.md §4.2)

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use archflow_schemas::{ArchflowError, ProviderStats};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, warn};

use crate::adapter::LlmProvider;
use crate::registry::ProviderRegistry;

/// Selection strategy for ordering provider keys before a fallback attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Primary first, then fallbacks in registration order.
    PrimaryOnly,
    /// Descending success rate.
    SuccessRate,
    /// Ascending mean duration; a provider with no recorded successes (mean
    /// duration unknown) sorts after providers with a known mean.
    LowestLatency,
}

/// Event emitted after each attempt, for switcher listeners.
#[derive(Debug, Clone)]
pub struct SwitcherEvent {
    pub switcher_id: String,
    pub provider_key: String,
    pub context: String,
    pub outcome: SwitcherOutcome,
}

#[derive(Debug, Clone)]
pub enum SwitcherOutcome {
    Success { duration: Duration },
    Failure { error: String },
}

/// A primary/fallback router over [`LlmProvider`] adapters (C2).
pub struct ProviderSwitcher {
    id: String,
    registry: ProviderRegistry,
    primary: RwLock<String>,
    fallbacks: RwLock<Vec<String>>,
    strategy: Strategy,
    stats: RwLock<HashMap<String, ProviderStats>>,
    events: broadcast::Sender<SwitcherEvent>,
}

impl ProviderSwitcher {
    pub fn new(
        id: impl Into<String>,
        registry: ProviderRegistry,
        primary: impl Into<String>,
        fallbacks: Vec<String>,
        strategy: Strategy,
    ) -> Self {
        let (tx, _rx) = broadcast::channel(256);
        Self {
            id: id.into(),
            registry,
            primary: RwLock::new(primary.into()),
            fallbacks: RwLock::new(fallbacks),
            strategy,
            stats: RwLock::new(HashMap::new()),
            events: tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SwitcherEvent> {
        self.events.subscribe()
    }

    pub async fn update_primary(&self, key: impl Into<String>) {
        *self.primary.write().await = key.into();
    }

    pub async fn update_fallback(&self, fallbacks: Vec<String>) {
        *self.fallbacks.write().await = fallbacks;
    }

    pub async fn get_stats(&self) -> HashMap<String, ProviderStats> {
        self.stats.read().await.clone()
    }

    /// Ordered list of provider keys to try, per the configured strategy.
    async fn ordered_keys(&self) -> Vec<String> {
        let primary = self.primary.read().await.clone();
        let fallbacks = self.fallbacks.read().await.clone();
        let mut keys: Vec<String> = std::iter::once(primary).chain(fallbacks).collect();

        match self.strategy {
            Strategy::PrimaryOnly => {}
            Strategy::SuccessRate => {
                let stats = self.stats.read().await;
                keys.sort_by(|a, b| {
                    let ra = stats.get(a).map(|s| s.success_rate()).unwrap_or(0.0);
                    let rb = stats.get(b).map(|s| s.success_rate()).unwrap_or(0.0);
                    rb.partial_cmp(&ra).unwrap_or(std::cmp::Ordering::Equal)
                });
            }
            Strategy::LowestLatency => {
                let stats = self.stats.read().await;
                keys.sort_by(|a, b| {
                    let da = stats.get(a).and_then(|s| s.mean_duration());
                    let db = stats.get(b).and_then(|s| s.mean_duration());
                    match (da, db) {
                        (Some(da), Some(db)) => da.cmp(&db),
                        (Some(_), None) => std::cmp::Ordering::Less,
                        (None, Some(_)) => std::cmp::Ordering::Greater,
                        (None, None) => std::cmp::Ordering::Equal,
                    }
                });
            }
        }
        keys
    }

    async fn record_success(&self, key: &str, duration: Duration, context: &str) {
        self.stats
            .write()
            .await
            .entry(key.to_string())
            .or_default()
            .record_success(duration);
        let _ = self.events.send(SwitcherEvent {
            switcher_id: self.id.clone(),
            provider_key: key.to_string(),
            context: context.to_string(),
            outcome: SwitcherOutcome::Success { duration },
        });
    }

    async fn record_failure(&self, key: &str, error: &ArchflowError, context: &str) {
        self.stats
            .write()
            .await
            .entry(key.to_string())
            .or_default()
            .record_failure();
        let _ = self.events.send(SwitcherEvent {
            switcher_id: self.id.clone(),
            provider_key: key.to_string(),
            context: context.to_string(),
            outcome: SwitcherOutcome::Failure {
                error: error.to_string(),
            },
        });
    }

    /// Run `op` against the first working provider in strategy order,
    /// falling back on failure. Emits `ProviderExhausted` carrying the last
    /// error if every provider fails.
    pub async fn execute_with_fallback<T, F, Fut>(
        &self,
        context: &str,
        op: F,
    ) -> Result<T, ArchflowError>
    where
        F: Fn(Arc<dyn LlmProvider>) -> Fut,
        Fut: Future<Output = Result<T, ArchflowError>>,
    {
        let keys = self.ordered_keys().await;
        let mut last_error: Option<ArchflowError> = None;

        for key in keys {
            let provider = match self.registry.get(&key).await {
                Ok(p) => p,
                Err(e) => {
                    last_error = Some(e);
                    continue;
                }
            };

            let started = Instant::now();
            match op(provider).await {
                Ok(value) => {
                    self.record_success(&key, started.elapsed(), context).await;
                    debug!(switcher_id = %self.id, provider_key = %key, "provider call succeeded");
                    return Ok(value);
                }
                Err(error) => {
                    self.record_failure(&key, &error, context).await;
                    warn!(switcher_id = %self.id, provider_key = %key, %error, "provider call failed, trying next");
                    last_error = Some(error);
                }
            }
        }

        Err(ArchflowError::Exhausted {
            message: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no providers configured".to_string()),
        })
    }

    /// Run `op` against a specific provider key, no fallback.
    pub async fn execute_with<T, F, Fut>(
        &self,
        provider_key: &str,
        context: &str,
        op: F,
    ) -> Result<T, ArchflowError>
    where
        F: FnOnce(Arc<dyn LlmProvider>) -> Fut,
        Fut: Future<Output = Result<T, ArchflowError>>,
    {
        let provider = self.registry.get(provider_key).await?;
        let started = Instant::now();
        match op(provider).await {
            Ok(value) => {
                self.record_success(provider_key, started.elapsed(), context).await;
                Ok(value)
            }
            Err(error) => {
                self.record_failure(provider_key, &error, context).await;
                Err(error)
            }
        }
    }

    /// Run `op` against every currently-registered candidate key
    /// (primary + fallbacks) and return each outcome, for A/B comparison.
    pub async fn compare<T, F, Fut>(&self, context: &str, op: F) -> HashMap<String, Result<T, ArchflowError>>
    where
        F: Fn(Arc<dyn LlmProvider>) -> Fut,
        Fut: Future<Output = Result<T, ArchflowError>>,
    {
        let keys = self.ordered_keys().await;
        let mut out = HashMap::new();
        for key in keys {
            let result = self.execute_with(&key, context, &op).await;
            out.insert(key, result);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{LlmMessage, LlmProvider, LlmResponse, LlmResponseStream, Operation, Usage};
    use archflow_schemas::LlmProviderConfig;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FlakyProvider {
        name: &'static str,
        fails: AtomicBool,
    }

    #[async_trait]
    impl LlmProvider for FlakyProvider {
        fn id(&self) -> &str {
            self.name
        }
        fn supports(&self, _operation: Operation) -> bool {
            true
        }
        async fn chat(
            &self,
            _messages: &[LlmMessage],
            _config: &LlmProviderConfig,
        ) -> Result<LlmResponse, ArchflowError> {
            if self.fails.load(Ordering::SeqCst) {
                Err(ArchflowError::TransportError {
                    message: "connection refused".into(),
                })
            } else {
                Ok(LlmResponse {
                    text: "ok".into(),
                    usage: Usage::default(),
                })
            }
        }
        async fn chat_stream(
            &self,
            _messages: &[LlmMessage],
            _config: &LlmProviderConfig,
        ) -> Result<LlmResponseStream, ArchflowError> {
            unimplemented!()
        }
    }

    async fn registry_with(primary_fails: bool) -> ProviderRegistry {
        let registry = ProviderRegistry::new();
        registry
            .register(Arc::new(FlakyProvider {
                name: "primary",
                fails: AtomicBool::new(primary_fails),
            }))
            .await;
        registry
            .register(Arc::new(FlakyProvider {
                name: "fallback",
                fails: AtomicBool::new(false),
            }))
            .await;
        registry
    }

    #[tokio::test]
    async fn primary_failure_falls_back() {
        let registry = registry_with(true).await;
        let switcher = ProviderSwitcher::new(
            "sw1",
            registry,
            "primary",
            vec!["fallback".to_string()],
            Strategy::PrimaryOnly,
        );

        let mut rx = switcher.subscribe();

        let result = switcher
            .execute_with_fallback("test", |p| async move {
                p.chat(&[LlmMessage::user("hi")], &LlmProviderConfig::new("x", "y"))
                    .await
            })
            .await
            .unwrap();

        assert_eq!(result.text, "ok");

        let stats = switcher.get_stats().await;
        assert_eq!(stats["primary"].failure_count, 1);
        assert_eq!(stats["fallback"].success_count, 1);

        // Drain the two recorded events (failure then success).
        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert!(matches!(first.outcome, SwitcherOutcome::Failure { .. }));
        assert!(matches!(second.outcome, SwitcherOutcome::Success { .. }));
    }

    #[tokio::test]
    async fn all_providers_failing_is_exhausted() {
        let registry = registry_with(true).await;
        registry
            .register(Arc::new(FlakyProvider {
                name: "fallback",
                fails: AtomicBool::new(true),
            }))
            .await;

        let switcher = ProviderSwitcher::new(
            "sw2",
            registry,
            "primary",
            vec!["fallback".to_string()],
            Strategy::PrimaryOnly,
        );

        let err = switcher
            .execute_with_fallback("test", |p| async move {
                p.chat(&[LlmMessage::user("hi")], &LlmProviderConfig::new("x", "y"))
                    .await
            })
            .await
            .unwrap_err();

        assert_eq!(err.code(), "exhausted");
    }

    #[tokio::test]
    async fn success_rate_strategy_does_not_regress_the_prior_winner() {
        let registry = registry_with(false).await;
        let switcher = ProviderSwitcher::new(
            "sw3",
            registry,
            "primary",
            vec!["fallback".to_string()],
            Strategy::SuccessRate,
        );

        // Snapshot A: primary has a perfect record, fallback has none.
        {
            let mut stats = switcher.stats.write().await;
            stats.entry("primary".to_string()).or_default().record_success(Duration::from_millis(10));
        }
        let order_a = switcher.ordered_keys().await;
        assert_eq!(order_a[0], "primary");

        // Snapshot B dominates A further in primary's favor - it must not
        // regress primary below fallback.
        {
            let mut stats = switcher.stats.write().await;
            stats.entry("primary".to_string()).or_default().record_success(Duration::from_millis(10));
        }
        let order_b = switcher.ordered_keys().await;
        assert_eq!(order_b[0], "primary");
    }
}
