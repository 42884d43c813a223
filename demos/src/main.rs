//! Smoke-test binary exercising the six core scenarios end to end: a
//! deterministic agent repair-retry, a provider failover, a suspend/resume
//! conversation, a workflow exposed as an MCP tool, a parallel fan-out with
//! a partial failure, and single-use redemption of a resume token.
//!
//! Run with: cargo run -p archflow-demos

mod stub_provider;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use archflow_agent::{AgentDefinition, AgentExecutor, AgentMode, OutputFormat};
use archflow_conversation::ConversationManager;
use archflow_engine::{FlowEngine, FlowEngineDeps};
use archflow_events::EventBus;
use archflow_mcp::{McpServer, McpToolHost, ServerInfo, Transport};
use archflow_providers::{ProviderRegistry, ProviderSwitcher, Strategy};
use archflow_runtime::WorkflowMcpHost;
use archflow_schemas::{
    Edge, Field, FieldType, FormDescriptor, FormField, LocalStepId, Schema, Step, StepKind,
    Workflow, WorkflowConfiguration, WorkflowId, WorkflowMetadata,
};
use archflow_tools::{FunctionInvoker, Tool, ToolOutcome, ToolRegistry};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use stub_provider::StubProvider;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "archflow_demos=info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("scenario 1: deterministic extraction with a schema-repair retry");
    deterministic_extraction().await?;

    tracing::info!("scenario 2: provider failover");
    provider_failover().await?;

    tracing::info!("scenario 3: suspend for input, then resume");
    suspend_and_resume().await?;

    tracing::info!("scenario 4: workflow exposed as an MCP tool");
    mcp_tool_call().await?;

    tracing::info!("scenario 5: parallel fan-out with a partial failure");
    parallel_fan_out_partial_failure().await?;

    tracing::info!("scenario 6: a resume token redeems exactly once");
    single_use_resume_token().await?;

    tracing::info!("all scenarios passed");
    Ok(())
}

/// A throwaway single-provider switcher, for the scenarios where step
/// dispatch needs *some* provider wired in but doesn't exercise it.
async fn switcher_of(provider: StubProvider) -> ProviderSwitcher {
    let registry = ProviderRegistry::new();
    let id = provider.id().to_string();
    registry.register(Arc::new(provider)).await;
    ProviderSwitcher::new("demo", registry, id, Vec::new(), Strategy::PrimaryOnly)
}

/// Scenario 1: a Func-Agent extracting JSON from a message, with the stub
/// provider returning unparsable text on the first attempt and well-formed
/// JSON on the second, proving the repair-prompt retry loop actually runs.
async fn deterministic_extraction() -> anyhow::Result<()> {
    let registry = ProviderRegistry::new();
    let provider = StubProvider::flaky_then_valid("func-agent-llm", r#"{"city": "Paris", "country": "France"}"#);
    registry.register(Arc::new(provider)).await;
    let switcher =
        Arc::new(ProviderSwitcher::new("demo", registry, "func-agent-llm".into(), Vec::new(), Strategy::PrimaryOnly));
    let executor = AgentExecutor::new(Arc::clone(&switcher));

    let mut schema = Schema::default();
    schema.fields.insert("city".into(), Field::new(FieldType::String).required());
    schema.fields.insert("country".into(), Field::new(FieldType::String).required());

    let agent = AgentDefinition::new(
        "geo-extractor",
        "extracts city/country from free text",
        archflow_agent::AgentModelRef { provider_key: "func-agent-llm".into(), model: "stub".into() },
    )
        .mode(AgentMode::Deterministic)
        .output_format(OutputFormat::Json)
        .output_schema(schema);

    let result = executor
        .execute(&agent, serde_json::json!({"text": "I'm writing from Paris, France."}))
        .await?;

    assert_eq!(result.metrics.attempts, 2, "expected the first attempt to fail schema validation");
    assert_eq!(result.output["city"], "Paris");
    Ok(())
}

/// Scenario 2: `PrimaryOnly` falls back to the secondary provider once the
/// primary reports a transport error.
async fn provider_failover() -> anyhow::Result<()> {
    let registry = ProviderRegistry::new();
    registry.register(Arc::new(StubProvider::always_failing("primary"))).await;
    registry.register(Arc::new(StubProvider::succeeding("fallback"))).await;
    let switcher = ProviderSwitcher::new(
        "demo",
        registry,
        "primary".into(),
        vec!["fallback".into()],
        Strategy::PrimaryOnly,
    );

    let response = switcher
        .execute_with_fallback("demo.chat", |provider| async move {
            provider.chat(&[archflow_providers::LlmMessage::user("hi")], &archflow_providers::LlmProviderConfig::new(provider.id(), "stub")).await
        })
        .await?;

    assert_eq!(response.text, "ok from fallback");
    let stats = switcher.get_stats().await;
    assert_eq!(stats["primary"].failure_count, 1);
    assert_eq!(stats["fallback"].success_count, 1);
    Ok(())
}

fn welcome_workflow(form_id: &str) -> Workflow {
    Workflow {
        id: WorkflowId::new(),
        metadata: WorkflowMetadata { name: "onboarding".into(), ..Default::default() },
        entry: LocalStepId::new("ask"),
        steps: vec![
            Step::new("ask", StepKind::SuspendForInput { form_id: form_id.into() }),
            Step::new("out", StepKind::Output { template: "Welcome ${ask.output.name}".into() }),
        ],
        edges: vec![Edge::unconditional(LocalStepId::new("ask"), LocalStepId::new("out"))],
        configuration: WorkflowConfiguration::default(),
        variables: HashMap::new(),
    }
}

fn registration_form() -> FormDescriptor {
    FormDescriptor {
        form_id: "userRegistration".into(),
        title: "Tell us your name".into(),
        fields: vec![FormField {
            name: "name".into(),
            label: "Your name".into(),
            field: Field::new(FieldType::String).required(),
            options: vec![],
        }],
    }
}

/// Scenario 3: the engine parks an execution at `SuspendForInput`, and
/// redeeming the minted token drives it to completion.
async fn suspend_and_resume() -> anyhow::Result<()> {
    let switcher = Arc::new(switcher_of(StubProvider::succeeding("unused")).await);
    let conversations = Arc::new(ConversationManager::new(std::time::Duration::from_secs(1800)));
    let engine = FlowEngine::new(
        FlowEngineDeps {
            providers: switcher,
            tools: Arc::new(ToolRegistry::new()),
            agent_executor: Arc::new(AgentExecutor::new(Arc::new(switcher_of(StubProvider::succeeding("unused2")).await))),
            event_bus: Arc::new(EventBus::new()),
            conversations: Arc::clone(&conversations),
            hooks: archflow_observability::Hooks::tracing(),
        },
        16,
    );
    engine.register_form(registration_form()).await;

    let mut events = conversations.subscribe();
    let workflow = welcome_workflow("userRegistration");
    let workflow_id = workflow.id;
    engine.register_workflow(workflow).await?;

    let execution = engine.execute(workflow_id, serde_json::json!({})).await?;
    assert_eq!(execution.status, archflow_schemas::ExecutionStatus::Paused);

    let stats = conversations.get_stats().await;
    assert_eq!(stats.waiting, 1);

    let token = loop {
        match events.recv().await? {
            archflow_conversation::ConversationEvent::Suspended { token, .. } => break token,
            _ => continue,
        }
    };

    conversations.resume(&token, serde_json::json!({"name": "Ada"})).await?;

    let resumed = engine.get_execution(execution.id).await?;
    assert_eq!(resumed.status, archflow_schemas::ExecutionStatus::Completed);
    assert_eq!(
        resumed.completed_output(&LocalStepId::new("out")),
        Some(&serde_json::Value::String("Welcome Ada".into()))
    );

    Ok(())
}

/// Scenario 4: register a workflow as an MCP tool and call it over an
/// in-memory duplex transport, the same wiring a real stdio transport uses.
async fn mcp_tool_call() -> anyhow::Result<()> {
    let switcher = Arc::new(switcher_of(StubProvider::succeeding("unused")).await);
    let engine = FlowEngine::new(
        FlowEngineDeps {
            providers: switcher,
            tools: Arc::new(ToolRegistry::new()),
            agent_executor: Arc::new(AgentExecutor::new(Arc::new(switcher_of(StubProvider::succeeding("unused2")).await))),
            event_bus: Arc::new(EventBus::new()),
            conversations: Arc::new(ConversationManager::new(std::time::Duration::from_secs(1800))),
            hooks: archflow_observability::Hooks::tracing(),
        },
        16,
    );

    let workflow = Workflow {
        id: WorkflowId::new(),
        metadata: WorkflowMetadata { name: "echo-flow".into(), ..Default::default() },
        entry: LocalStepId::new("in"),
        steps: vec![
            Step::new("in", StepKind::Input),
            Step::new("out", StepKind::Output { template: "Echo: ${input.greeting}".into() }),
        ],
        edges: vec![Edge::unconditional(LocalStepId::new("in"), LocalStepId::new("out"))],
        configuration: WorkflowConfiguration::default(),
        variables: HashMap::new(),
    };
    let workflow_id = workflow.id;
    engine.register_workflow(workflow).await?;

    let host = Arc::new(WorkflowMcpHost::new(Arc::clone(&engine)));
    host.expose("echo-flow", workflow_id, "echoes the greeting").await;

    let (client_io, server_io) = tokio::io::duplex(8192);
    let (client_reader, client_writer) = tokio::io::split(client_io);
    let (server_reader, server_writer) = tokio::io::split(server_io);

    let (client_transport, _client_inbound) = Transport::spawn(client_reader, client_writer);
    let (server_transport, server_inbound) = Transport::spawn(server_reader, server_writer);

    let server = Arc::new(McpServer::new(
        server_transport,
        host as Arc<dyn McpToolHost>,
        ServerInfo { name: "archflow-demos".into(), version: "0.1.0".into() },
    ));
    tokio::spawn(Arc::clone(&server).run(server_inbound));

    let client = archflow_mcp::McpClient::new(client_transport);
    client
        .initialize(archflow_mcp::ClientInfo { name: "demo-client".into(), version: "0.1.0".into() })
        .await?;

    let tools = client.list_tools().await?;
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].name, "echo-flow");

    let result = client.call_tool("echo-flow", serde_json::json!({"greeting": "Hi"})).await?;
    assert!(!result.is_error);
    Ok(())
}

/// Scenario 5: three sibling steps fan out from the same `ParallelFanOut`
/// step; the middle one fails with no error edge, so the execution finishes
/// `Failed` while its siblings still show `Completed`.
async fn parallel_fan_out_partial_failure() -> anyhow::Result<()> {
    let tools = Arc::new(ToolRegistry::new());
    tools
        .register(Tool::new(
            "fail-tool",
            "fail-tool",
            "always errors",
            Schema::default(),
            Arc::new(FunctionInvoker::new(|_input| async { ToolOutcome::error("synthetic failure") })),
        ))
        .await?;

    let switcher = Arc::new(switcher_of(StubProvider::succeeding("unused")).await);
    let engine = FlowEngine::new(
        FlowEngineDeps {
            providers: switcher,
            tools,
            agent_executor: Arc::new(AgentExecutor::new(Arc::new(switcher_of(StubProvider::succeeding("unused2")).await))),
            event_bus: Arc::new(EventBus::new()),
            conversations: Arc::new(ConversationManager::new(std::time::Duration::from_secs(1800))),
            hooks: archflow_observability::Hooks::tracing(),
        },
        16,
    );

    let mut retry_once = archflow_schemas::RetryPolicy::default();
    retry_once.max_attempts = 1;

    let workflow = Workflow {
        id: WorkflowId::new(),
        metadata: WorkflowMetadata { name: "fan-out-demo".into(), ..Default::default() },
        entry: LocalStepId::new("fan"),
        steps: vec![
            Step::new("fan", StepKind::ParallelFanOut),
            Step::new("a", StepKind::Output { template: "a-done".into() }),
            {
                let mut b = Step::new("b", StepKind::Tool { tool_name: "fail-tool".into(), parameters: HashMap::new() });
                b.retry_override = Some(retry_once);
                b
            },
            Step::new("c", StepKind::Output { template: "c-done".into() }),
        ],
        edges: vec![
            Edge::unconditional(LocalStepId::new("fan"), LocalStepId::new("a")),
            Edge::unconditional(LocalStepId::new("fan"), LocalStepId::new("b")),
            Edge::unconditional(LocalStepId::new("fan"), LocalStepId::new("c")),
        ],
        configuration: WorkflowConfiguration::default(),
        variables: HashMap::new(),
    };
    let workflow_id = workflow.id;
    engine.register_workflow(workflow).await?;

    let execution = engine.execute(workflow_id, serde_json::json!({})).await?;
    assert_eq!(execution.status, archflow_schemas::ExecutionStatus::Failed);
    assert_eq!(
        execution.step_results[&LocalStepId::new("a")].status,
        archflow_schemas::StepStatus::Completed
    );
    assert_eq!(
        execution.step_results[&LocalStepId::new("c")].status,
        archflow_schemas::StepStatus::Completed
    );
    assert_eq!(
        execution.step_results[&LocalStepId::new("b")].status,
        archflow_schemas::StepStatus::Failed
    );
    Ok(())
}

/// Scenario 6: two concurrent redemptions of the same token race, and
/// exactly one of them wins (the Conversation Manager's `Waiting` guard).
async fn single_use_resume_token() -> anyhow::Result<()> {
    let conversations = Arc::new(ConversationManager::new(std::time::Duration::from_secs(1800)));
    let form = registration_form();
    let completed = Arc::new(AtomicUsize::new(0));
    let completed_c = Arc::clone(&completed);

    let suspended = conversations
        .suspend(
            archflow_schemas::ConversationId::new(),
            archflow_schemas::ExecutionId::new(),
            form,
            Box::new(move |_form_data| {
                let completed = Arc::clone(&completed_c);
                Box::pin(async move {
                    completed.fetch_add(1, Ordering::SeqCst);
                })
            }),
        )
        .await;

    let token = suspended.resume_token.clone();
    let token_b = token.clone();
    let conversations_a = Arc::clone(&conversations);
    let conversations_b = Arc::clone(&conversations);

    let (a, b) = tokio::join!(
        tokio::spawn(async move { conversations_a.resume(&token, serde_json::json!({"name": "Ada"})).await }),
        tokio::spawn(async move { conversations_b.resume(&token_b, serde_json::json!({"name": "Ada"})).await }),
    );

    let results = [a.unwrap(), b.unwrap()];
    let ok_count = results.iter().filter(|r| r.is_ok()).count();
    let not_waiting_count = results
        .iter()
        .filter(|r| matches!(r, Err(archflow_conversation::ConversationError::NotWaiting | archflow_conversation::ConversationError::NotFound)))
        .count();

    assert_eq!(ok_count, 1, "exactly one concurrent resume should win the race");
    assert_eq!(not_waiting_count, 1);
    Ok(())
}
