//! # Saga Orchestrator
//!
//! Executes workflow definitions over the task queue. Every step is
//! enqueued as a saga-tagged task; workers publish the step's terminal
//! outcome on the outcomes stream, and a background completion router
//! dispatches each outcome to the waiting saga.
//!
//! The orchestrator holds no business logic: only step ordering and the
//! compensation mapping. Saga instances are isolated by construction: all
//! shared state is keyed by `(saga_id, step_name)`, so no two sagas can
//! touch the same entry.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::SagaConfig;
use crate::messaging::{StepOutcome, TaskMessage, TaskQueueClient};

use super::states::{SagaState, SagaStateMachine};
use super::step::SagaDefinition;
use super::SagaError;

/// Terminal record of one saga execution.
#[derive(Debug, Clone)]
pub struct SagaReport {
    pub saga_id: Uuid,
    pub saga_name: String,
    /// `Completed` or `RolledBack`
    pub state: SagaState,
    pub completed_steps: Vec<String>,
    pub failed_step: Option<String>,
    pub error: Option<String>,
}

type WaiterKey = (Uuid, String);

/// Coordinates multi-step workflows with compensating rollback.
pub struct SagaOrchestrator {
    queue: Arc<TaskQueueClient>,
    config: SagaConfig,
    waiters: Arc<DashMap<WaiterKey, oneshot::Sender<StepOutcome>>>,
    router_stop: watch::Sender<bool>,
    router_handle: Mutex<Option<JoinHandle<()>>>,
}

impl SagaOrchestrator {
    /// Create the orchestrator and start its completion router. The outcome
    /// consumer group is created before any saga can dispatch a step, so an
    /// outcome published immediately after is never invisible to the group.
    pub async fn start(
        queue: Arc<TaskQueueClient>,
        config: SagaConfig,
    ) -> crate::messaging::MessagingResult<Arc<Self>> {
        queue
            .stream_client()
            .ensure_group(&queue.outcomes_stream(), &config.outcome_group)
            .await?;

        let waiters: Arc<DashMap<WaiterKey, oneshot::Sender<StepOutcome>>> =
            Arc::new(DashMap::new());
        let (router_stop, stop_rx) = watch::channel(false);

        let handle = tokio::spawn(Self::completion_router(
            Arc::clone(&queue),
            config.clone(),
            Arc::clone(&waiters),
            stop_rx,
        ));

        info!(outcome_group = %config.outcome_group, "🧭 Saga orchestrator started");

        Ok(Arc::new(Self {
            queue,
            config,
            waiters,
            router_stop,
            router_handle: Mutex::new(Some(handle)),
        }))
    }

    /// Stop the completion router. In-flight `run` calls will fail their
    /// pending step waits and roll back.
    pub async fn shutdown(&self) {
        let _ = self.router_stop.send(true);
        let handle = self.router_handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        info!("Saga orchestrator stopped");
    }

    /// Execute a workflow to a terminal state: `Completed`, or `RolledBack`
    /// after reverse-order compensation of every completed step.
    pub async fn run(&self, definition: SagaDefinition) -> Result<SagaReport, SagaError> {
        let saga_id = Uuid::new_v4();
        let deadline = definition.timeout.unwrap_or(self.config.default_timeout());
        let mut machine = SagaStateMachine::new(definition.step_count());
        let mut completed: Vec<usize> = Vec::new();

        info!(
            saga_id = %saga_id,
            saga = %definition.name,
            steps = definition.step_count(),
            timeout_secs = deadline.as_secs(),
            "Saga started"
        );

        let execution =
            self.execute_steps(saga_id, &definition, &mut machine, &mut completed);
        let timed = tokio::time::timeout(deadline, execution).await;
        let failure: Option<(Option<usize>, String)> =
            match timed {
                Ok(Ok(())) => None,
                Ok(Err(failure)) => Some(failure),
                Err(_) => {
                    // Deadline fired with a step still in flight. Cancel its
                    // waiter; if the step completes concurrently the router
                    // finds no waiter and the completion is a no-op.
                    let failed_index = self.cancel_inflight(saga_id, &definition, &machine);
                    machine.transition(SagaState::Failed)?;
                    Some((
                        failed_index,
                        format!("saga deadline of {deadline:?} exceeded"),
                    ))
                }
            };

        match failure {
            None => {
                info!(saga_id = %saga_id, saga = %definition.name, "✅ Saga completed");
                Ok(SagaReport {
                    saga_id,
                    saga_name: definition.name.clone(),
                    state: machine.state(),
                    completed_steps: completed
                        .iter()
                        .map(|&i| definition.steps[i].name.clone())
                        .collect(),
                    failed_step: None,
                    error: None,
                })
            }
            Some((failed_index, reason)) => {
                warn!(
                    saga_id = %saga_id,
                    saga = %definition.name,
                    reason = %reason,
                    "Saga failed, compensating in reverse order"
                );
                self.compensate(saga_id, &definition, &mut machine, &completed)
                    .await?;

                Ok(SagaReport {
                    saga_id,
                    saga_name: definition.name.clone(),
                    state: machine.state(),
                    completed_steps: completed
                        .iter()
                        .map(|&i| definition.steps[i].name.clone())
                        .collect(),
                    failed_step: failed_index.map(|i| definition.steps[i].name.clone()),
                    error: Some(reason),
                })
            }
        }
    }

    /// Run steps in order. On failure, transitions the machine to `Failed`
    /// and returns the failing step index and reason.
    async fn execute_steps(
        &self,
        saga_id: Uuid,
        definition: &SagaDefinition,
        machine: &mut SagaStateMachine,
        completed: &mut Vec<usize>,
    ) -> Result<(), (Option<usize>, String)> {
        for (index, step) in definition.steps.iter().enumerate() {
            machine
                .transition(SagaState::ExecutingStep(index))
                .map_err(|e| (Some(index), e.to_string()))?;

            let outcome = self
                .dispatch_and_wait(
                    saga_id,
                    step.name.clone(),
                    TaskMessage::new(step.task_type, step.priority, step.payload.clone())
                        .with_saga(saga_id, &step.name),
                    None,
                )
                .await;

            match outcome {
                Ok(outcome) if outcome.success => {
                    debug!(saga_id = %saga_id, step = %step.name, "Step completed");
                    completed.push(index);
                }
                Ok(outcome) => {
                    let reason = outcome
                        .error
                        .unwrap_or_else(|| "step failed without detail".to_string());
                    machine
                        .transition(SagaState::Failed)
                        .map_err(|e| (Some(index), e.to_string()))?;
                    return Err((Some(index), reason));
                }
                Err(reason) => {
                    machine
                        .transition(SagaState::Failed)
                        .map_err(|e| (Some(index), e.to_string()))?;
                    return Err((Some(index), reason));
                }
            }
        }

        machine
            .transition(SagaState::Completed)
            .map_err(|e| (None, e.to_string()))?;
        Ok(())
    }

    /// Enqueue a saga-tagged task and await its outcome. With a `wait`
    /// budget the wait is bounded (compensations); otherwise the caller's
    /// deadline bounds it.
    async fn dispatch_and_wait(
        &self,
        saga_id: Uuid,
        signal_name: String,
        task: TaskMessage,
        wait: Option<Duration>,
    ) -> Result<StepOutcome, String> {
        let key = (saga_id, signal_name.clone());
        let (tx, rx) = oneshot::channel();
        self.waiters.insert(key.clone(), tx);

        if let Err(e) = self.queue.enqueue(&task).await {
            self.waiters.remove(&key);
            return Err(format!("step enqueue failed: {e}"));
        }

        let received = match wait {
            Some(budget) => match tokio::time::timeout(budget, rx).await {
                Ok(received) => received,
                Err(_) => {
                    self.waiters.remove(&key);
                    return Err(format!("no completion signal within {budget:?}"));
                }
            },
            None => rx.await,
        };

        received.map_err(|_| "completion channel closed".to_string())
    }

    /// Undo completed steps in reverse order, then land in `RolledBack`.
    /// Compensation failures are logged loudly and the chain continues:
    /// skipping the remaining compensations would strand more state, not
    /// less.
    async fn compensate(
        &self,
        saga_id: Uuid,
        definition: &SagaDefinition,
        machine: &mut SagaStateMachine,
        completed: &[usize],
    ) -> Result<(), SagaError> {
        for &index in completed.iter().rev() {
            machine.transition(SagaState::Compensating(index))?;
            let step = &definition.steps[index];

            info!(
                saga_id = %saga_id,
                step = %step.name,
                "Executing compensation"
            );

            let compensation_task = TaskMessage::new(
                step.compensation.task_type,
                step.compensation.priority,
                step.compensation.payload.clone(),
            )
            .with_saga(saga_id, step.compensation_name());

            let result = self
                .dispatch_and_wait(
                    saga_id,
                    step.compensation_name(),
                    compensation_task,
                    Some(self.config.compensation_timeout()),
                )
                .await;

            match result {
                Ok(outcome) if outcome.success => {
                    debug!(saga_id = %saga_id, step = %step.name, "Compensation completed");
                }
                Ok(outcome) => {
                    error!(
                        saga_id = %saga_id,
                        step = %step.name,
                        error = ?outcome.error,
                        "Compensation failed; manual reconciliation required"
                    );
                }
                Err(reason) => {
                    error!(
                        saga_id = %saga_id,
                        step = %step.name,
                        reason = %reason,
                        "Compensation did not confirm; manual reconciliation required"
                    );
                }
            }
        }

        machine.transition(SagaState::RolledBack)?;
        info!(saga_id = %saga_id, "Saga rolled back");
        Ok(())
    }

    /// Drop the waiter of the step in flight at deadline time, returning its
    /// index. Idempotent against a concurrently arriving completion: the
    /// router simply finds no waiter.
    fn cancel_inflight(
        &self,
        saga_id: Uuid,
        definition: &SagaDefinition,
        machine: &SagaStateMachine,
    ) -> Option<usize> {
        if let SagaState::ExecutingStep(index) = machine.state() {
            let step = &definition.steps[index];
            if self
                .waiters
                .remove(&(saga_id, step.name.clone()))
                .is_some()
            {
                warn!(
                    saga_id = %saga_id,
                    step = %step.name,
                    "Cancelled in-flight step at saga deadline"
                );
            }
            Some(index)
        } else {
            None
        }
    }

    /// Background loop: consume step outcomes and hand each to the saga
    /// waiting on it. Outcomes nobody waits for (cancelled or duplicate
    /// deliveries) are acknowledged and dropped.
    async fn completion_router(
        queue: Arc<TaskQueueClient>,
        config: SagaConfig,
        waiters: Arc<DashMap<WaiterKey, oneshot::Sender<StepOutcome>>>,
        stop_rx: watch::Receiver<bool>,
    ) {
        let consumer = format!("saga-router-{}", Uuid::new_v4());
        debug!(consumer = %consumer, "Completion router started");

        loop {
            if *stop_rx.borrow() {
                break;
            }

            match queue
                .consume_outcomes(&config.outcome_group, &consumer, 16, config.outcome_block())
                .await
            {
                Ok(outcomes) => {
                    for (message_id, outcome) in outcomes {
                        let key = (outcome.saga_id, outcome.step_name.clone());
                        if let Some((_, tx)) = waiters.remove(&key) {
                            // Receiver may have been dropped by a timed-out
                            // saga; losing this send is the intended no-op
                            let _ = tx.send(outcome);
                        }
                        if let Err(e) = queue
                            .ack_outcome(&config.outcome_group, &message_id)
                            .await
                        {
                            warn!(message_id = %message_id, error = %e, "Outcome ack failed");
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Outcome consumption failed");
                    tokio::time::sleep(config.outcome_block()).await;
                }
            }
        }

        debug!("Completion router stopped (expected shutdown)");
    }
}
