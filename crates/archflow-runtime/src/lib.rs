//! Process-wiring facade (spec.md §5 init order: Provider registry -> MCP
//! transports -> Tool registry -> Flow Engine -> Event Bus -> Conversation
//! Manager; teardown reverse).
//!
//! No global singletons: [`Runtime::bootstrap`] constructs every component
//! explicitly and hands back `Arc`s, mirroring `everruns-worker::runner`'s
//! construct-and-pass-explicitly wiring rather than a service locator.

pub mod config;
pub mod mcp_host;

use std::sync::Arc;

use archflow_agent::AgentExecutor;
use archflow_conversation::ConversationManager;
use archflow_engine::{FlowEngine, FlowEngineDeps};
use archflow_events::EventBus;
use archflow_observability::Hooks;
use archflow_providers::{ProviderRegistry, ProviderSwitcher};
use archflow_tools::ToolRegistry;
use tokio::task::JoinHandle;

pub use config::{ProviderSource, RuntimeConfig};
pub use mcp_host::WorkflowMcpHost;

/// A running instance of every core subsystem, wired together per spec.md
/// §5's init order and owning the background tasks that order implies (the
/// conversation janitor).
pub struct Runtime {
    pub providers: Arc<ProviderSwitcher>,
    pub tools: Arc<ToolRegistry>,
    pub agent_executor: Arc<AgentExecutor>,
    pub event_bus: Arc<EventBus>,
    pub conversations: Arc<ConversationManager>,
    pub engine: Arc<FlowEngine>,
    pub hooks: Hooks,
    janitor: JoinHandle<()>,
}

impl Runtime {
    /// Assemble every component in spec.md §5's init order and start the
    /// conversation janitor. `hooks` defaults to a `tracing`-backed sink
    /// (override with [`RuntimeConfig`]-independent `Hooks::new` if a
    /// caller wants its own metrics/audit backend wired in instead).
    pub async fn bootstrap(config: RuntimeConfig) -> anyhow::Result<Self> {
        // 1. Provider registry, then the switcher over it.
        let registry = ProviderRegistry::new();
        for source in &config.providers {
            match source {
                ProviderSource::OpenAi { api_key } => {
                    registry.register(Arc::new(archflow_openai::OpenAiProvider::new(api_key.clone()))).await;
                }
                ProviderSource::Anthropic { api_key } => {
                    registry
                        .register(Arc::new(archflow_anthropic::AnthropicProvider::new(api_key.clone())))
                        .await;
                }
            }
        }
        let providers = Arc::new(ProviderSwitcher::new(
            "default",
            registry,
            config.primary_provider.clone(),
            config.fallback_providers.clone(),
            config.switcher_strategy,
        ));

        // 2. MCP transports are constructed lazily by callers that need
        //    them (§4.3/§4.4 are peer-to-peer, not process-lifetime
        //    singletons) - nothing to do here beyond being ready for them.

        // 3. Tool registry.
        let tools = Arc::new(ToolRegistry::new());

        // Deterministic Agent Executor sits on top of the provider switcher.
        let agent_executor = Arc::new(AgentExecutor::new(Arc::clone(&providers)));

        // Hooks (metrics + audit) feed every boundary crossing from here on.
        let hooks = Hooks::tracing();

        // 4. Event bus.
        let event_bus = Arc::new(EventBus::new());

        // 5. Conversation manager, with its janitor running immediately so
        //    a zero TTL expires on first tick (spec.md §8 boundary case).
        let conversations = Arc::new(ConversationManager::new(config.conversation_ttl));
        let janitor = conversations.spawn_janitor(config.conversation_janitor_interval);

        // 6. Flow Engine, wired to everything above.
        let engine = FlowEngine::new(
            FlowEngineDeps {
                providers: Arc::clone(&providers),
                tools: Arc::clone(&tools),
                agent_executor: Arc::clone(&agent_executor),
                event_bus: Arc::clone(&event_bus),
                conversations: Arc::clone(&conversations),
                hooks: hooks.clone(),
            },
            config.step_pool_concurrency,
        );

        Ok(Self { providers, tools, agent_executor, event_bus, conversations, engine, hooks, janitor })
    }

    /// Wrap [`Self::engine`] as an MCP tool host exposing registered
    /// workflows (spec.md §4.4 server side / §4.6 Workflow-as-Tool).
    pub fn mcp_workflow_host(&self) -> WorkflowMcpHost {
        WorkflowMcpHost::new(Arc::clone(&self.engine))
    }

    /// Reverse teardown: stop accepting new work on the janitor first (the
    /// last thing started), then drop everything else in reverse
    /// construction order by letting the `Arc`s fall out of scope.
    pub async fn shutdown(self) {
        self.janitor.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use archflow_schemas::{Edge, ExecutionStatus, LocalStepId, Step, StepKind, Workflow, WorkflowConfiguration, WorkflowMetadata};
    use std::collections::HashMap;

    fn linear_workflow() -> Workflow {
        Workflow {
            id: archflow_schemas::WorkflowId::new(),
            metadata: WorkflowMetadata { name: "echo".into(), ..Default::default() },
            entry: LocalStepId::new("in"),
            steps: vec![
                Step::new("in", StepKind::Input),
                Step::new("out", StepKind::Output { template: "${input.greeting}".into() }),
            ],
            edges: vec![Edge::unconditional(LocalStepId::new("in"), LocalStepId::new("out"))],
            configuration: WorkflowConfiguration::default(),
            variables: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn bootstrap_wires_a_working_engine_with_no_providers_configured() {
        let runtime = Runtime::bootstrap(RuntimeConfig::new("unused")).await.unwrap();
        let workflow = linear_workflow();
        let id = workflow.id;
        runtime.engine.register_workflow(workflow).await.unwrap();

        let execution = runtime.engine.execute(id, serde_json::json!({"greeting": "hi"})).await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Completed);

        runtime.shutdown().await;
    }

    #[tokio::test]
    async fn mcp_workflow_host_exposes_and_calls_a_registered_workflow() {
        let runtime = Runtime::bootstrap(RuntimeConfig::new("unused")).await.unwrap();
        let workflow = linear_workflow();
        let id = workflow.id;
        runtime.engine.register_workflow(workflow).await.unwrap();

        let host = runtime.mcp_workflow_host();
        host.expose("echo-flow", id, "echoes the greeting").await;

        let tools = archflow_mcp::McpToolHost::list_tools(&host).await;
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "echo-flow");

        let result = archflow_mcp::McpToolHost::call_tool(&host, "echo-flow", serde_json::json!({"greeting": "hi"}))
            .await
            .unwrap();
        assert!(!result.is_error);

        runtime.shutdown().await;
    }
}
