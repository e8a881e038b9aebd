//! Saga integration tests: workflows executed by real worker pools over the
//! in-memory broker, exercising completion signalling, reverse-order
//! compensation, deadline rollback, and cross-saga isolation.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;

use taskstream_core::config::OrchestrationConfig;
use taskstream_core::messaging::{
    InMemoryStatusStore, InMemoryStreamClient, TaskMessage, TaskType,
};
use taskstream_core::orchestration::OrchestrationCore;
use taskstream_core::saga::{CompensationAction, SagaDefinition, SagaState, SagaStep};
use taskstream_core::worker::{HandlerContext, HandlerRegistry, InMemoryHeartbeatStore, TaskHandler};

/// Records every action it executes; fails steps whose payload says so.
struct RecordingHandler {
    log: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl TaskHandler for RecordingHandler {
    async fn handle(
        &self,
        task: &TaskMessage,
        _ctx: &HandlerContext,
    ) -> anyhow::Result<serde_json::Value> {
        if let Some(action) = task.payload["action"].as_str() {
            self.log.lock().push(action.to_string());
        }
        if task.payload["fail"].as_bool().unwrap_or(false) {
            anyhow::bail!("forced step failure");
        }
        Ok(json!({"done": true}))
    }
}

fn saga_config() -> OrchestrationConfig {
    let mut config = OrchestrationConfig::default();
    config.worker.workers_per_pool = 2;
    config.worker.express_workers = 1;
    config.worker.block_timeout_ms = 20;
    config.worker.heartbeat_interval_secs = 1;
    // One attempt: a failing step publishes its failure outcome immediately
    config.worker.max_attempts = 1;
    config.saga.default_timeout_secs = 10;
    config.saga.compensation_timeout_secs = 5;
    config.saga.outcome_block_ms = 10;
    config
}

async fn start_core(log: Arc<Mutex<Vec<String>>>) -> Arc<OrchestrationCore> {
    let handlers = Arc::new(HandlerRegistry::new());
    handlers.register(TaskType::Backtest, Arc::new(RecordingHandler { log }));

    OrchestrationCore::start(
        saga_config(),
        Arc::new(InMemoryStreamClient::new()),
        Arc::new(InMemoryHeartbeatStore::new()),
        Arc::new(InMemoryStatusStore::new()),
        handlers,
    )
    .await
    .expect("core should start")
}

fn step(name: &str, fail: bool) -> SagaStep {
    SagaStep::new(
        name,
        TaskType::Backtest,
        5,
        json!({"action": format!("do:{name}"), "fail": fail}),
        CompensationAction::new(
            TaskType::Backtest,
            5,
            json!({"action": format!("undo:{name}")}),
        ),
    )
}

#[tokio::test]
async fn four_step_saga_completes_in_order() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let core = start_core(Arc::clone(&log)).await;

    let definition = SagaDefinition::new(
        "pipeline",
        vec![
            step("fetch", false),
            step("train", false),
            step("evaluate", false),
            step("publish", false),
        ],
    )
    .unwrap();

    let report = core.saga_orchestrator().run(definition).await.unwrap();

    assert_eq!(report.state, SagaState::Completed);
    assert_eq!(
        report.completed_steps,
        vec!["fetch", "train", "evaluate", "publish"]
    );
    assert_eq!(
        *log.lock(),
        vec!["do:fetch", "do:train", "do:evaluate", "do:publish"]
    );

    core.shutdown().await.unwrap();
}

#[tokio::test]
async fn failure_at_step_three_compensates_two_then_one() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let core = start_core(Arc::clone(&log)).await;

    let definition = SagaDefinition::new(
        "doomed",
        vec![
            step("one", false),
            step("two", false),
            step("three", true),
            step("four", false),
        ],
    )
    .unwrap();

    let report = core.saga_orchestrator().run(definition).await.unwrap();

    assert_eq!(report.state, SagaState::RolledBack);
    assert_eq!(report.completed_steps, vec!["one", "two"]);
    assert_eq!(report.failed_step.as_deref(), Some("three"));

    // Compensations ran in reverse order, and step four never ran
    let actions = log.lock().clone();
    assert_eq!(
        actions,
        vec!["do:one", "do:two", "do:three", "undo:two", "undo:one"]
    );

    core.shutdown().await.unwrap();
}

#[tokio::test]
async fn concurrent_sagas_terminate_independently() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let core = start_core(Arc::clone(&log)).await;
    let orchestrator = core.saga_orchestrator();

    let total = 8usize;
    let completed = Arc::new(AtomicUsize::new(0));
    let rolled_back = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for n in 0..total {
        let orchestrator = Arc::clone(&orchestrator);
        let completed = Arc::clone(&completed);
        let rolled_back = Arc::clone(&rolled_back);

        handles.push(tokio::spawn(async move {
            // Odd sagas fail their second step, even sagas succeed
            let fails = n % 2 == 1;
            let definition = SagaDefinition::new(
                format!("saga-{n}"),
                vec![
                    step(&format!("s{n}-first"), false),
                    step(&format!("s{n}-second"), fails),
                ],
            )
            .unwrap();

            let report = orchestrator.run(definition).await.unwrap();
            match report.state {
                SagaState::Completed => {
                    assert_eq!(
                        report.completed_steps,
                        vec![format!("s{n}-first"), format!("s{n}-second")]
                    );
                    completed.fetch_add(1, Ordering::SeqCst);
                }
                SagaState::RolledBack => {
                    // Only this saga's own first step is in its record
                    assert_eq!(report.completed_steps, vec![format!("s{n}-first")]);
                    rolled_back.fetch_add(1, Ordering::SeqCst);
                }
                other => panic!("saga-{n} ended in non-terminal state {other}"),
            }
            report.state
        }));
    }

    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(completed.load(Ordering::SeqCst), total / 2);
    assert_eq!(rolled_back.load(Ordering::SeqCst), total / 2);

    core.shutdown().await.unwrap();
}

#[tokio::test]
async fn deadline_rolls_back_with_completed_steps_compensated() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let core = start_core(Arc::clone(&log)).await;

    // Second step targets a type with no handler, so it never completes
    let stuck_step = SagaStep::new(
        "stuck",
        TaskType::Ml,
        5,
        json!({"action": "do:stuck"}),
        CompensationAction::new(TaskType::Backtest, 5, json!({"action": "undo:stuck"})),
    );
    let definition = SagaDefinition::new("expiring", vec![step("first", false), stuck_step])
        .unwrap()
        .with_timeout(Duration::from_millis(500));

    let report = core.saga_orchestrator().run(definition).await.unwrap();

    assert_eq!(report.state, SagaState::RolledBack);
    assert_eq!(report.completed_steps, vec!["first"]);
    assert_eq!(report.failed_step.as_deref(), Some("stuck"));
    assert!(report.error.as_deref().unwrap().contains("deadline"));

    // The completed first step was compensated
    let actions = log.lock().clone();
    assert!(actions.contains(&"do:first".to_string()));
    assert!(actions.contains(&"undo:first".to_string()));

    core.shutdown().await.unwrap();
}
