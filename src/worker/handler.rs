//! # Task Handlers
//!
//! The boundary between the orchestration core and the business logic it
//! schedules. The core stays payload-agnostic: handlers receive the opaque
//! JSON payload and decode it themselves. Handlers that call external
//! dependencies (AI providers, data backends) guard those calls with the
//! circuit breaker manager carried in the [`HandlerContext`].

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::messaging::{Lane, TaskMessage, TaskType};
use crate::resilience::CircuitBreakerManager;

/// Ambient services available to a handler invocation.
#[derive(Clone)]
pub struct HandlerContext {
    /// Breaker registry for guarding downstream dependency calls
    pub breakers: Arc<CircuitBreakerManager>,

    /// Lane the task was delivered on (express handlers may shed work)
    pub lane: Lane,
}

/// Business logic for one task type.
///
/// Returning `Err` counts one attempt; the pool retries up to the attempt
/// budget and then dead-letters. Handlers must be safe to re-run: delivery
/// is at-least-once.
#[async_trait]
pub trait TaskHandler: Send + Sync + 'static {
    async fn handle(
        &self,
        task: &TaskMessage,
        ctx: &HandlerContext,
    ) -> anyhow::Result<serde_json::Value>;
}

/// Registry mapping task types to their handlers. Injected into worker
/// pools at construction.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: DashMap<TaskType, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, task_type: TaskType, handler: Arc<dyn TaskHandler>) {
        self.handlers.insert(task_type, handler);
    }

    pub fn get(&self, task_type: TaskType) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(&task_type).map(|h| Arc::clone(h.value()))
    }

    /// Task types with a registered handler; pools are built for these.
    pub fn registered_types(&self) -> Vec<TaskType> {
        let mut types: Vec<TaskType> = self.handlers.iter().map(|e| *e.key()).collect();
        types.sort_by_key(|t| t.as_str());
        types
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CircuitBreakerSettings;

    struct EchoHandler;

    #[async_trait]
    impl TaskHandler for EchoHandler {
        async fn handle(
            &self,
            task: &TaskMessage,
            _ctx: &HandlerContext,
        ) -> anyhow::Result<serde_json::Value> {
            Ok(task.payload.clone())
        }
    }

    #[tokio::test]
    async fn test_registry_lookup_and_types() {
        let registry = HandlerRegistry::new();
        assert!(registry.is_empty());

        registry.register(TaskType::Codegen, Arc::new(EchoHandler));
        registry.register(TaskType::Ml, Arc::new(EchoHandler));

        assert!(registry.get(TaskType::Codegen).is_some());
        assert!(registry.get(TaskType::Backtest).is_none());
        assert_eq!(
            registry.registered_types(),
            vec![TaskType::Codegen, TaskType::Ml]
        );
    }

    #[tokio::test]
    async fn test_handler_receives_payload() {
        let registry = HandlerRegistry::new();
        registry.register(TaskType::Reasoning, Arc::new(EchoHandler));

        let ctx = HandlerContext {
            breakers: Arc::new(CircuitBreakerManager::new(CircuitBreakerSettings::default())),
            lane: Lane::Normal,
        };
        let task = TaskMessage::new(
            TaskType::Reasoning,
            5,
            serde_json::json!({"question": "why"}),
        );

        let handler = registry.get(TaskType::Reasoning).unwrap();
        let output = handler.handle(&task, &ctx).await.unwrap();
        assert_eq!(output["question"], "why");
    }
}
