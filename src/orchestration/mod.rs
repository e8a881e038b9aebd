//! # Orchestration Module
//!
//! The coordination layer above messaging and workers: priority routing at
//! the submission boundary, the orphan recovery loop that heals abandoned
//! deliveries, the autoscaling decision loop, and the bootstrap core that
//! wires every component together.

pub mod autoscaler;
pub mod core;
pub mod orphan_recovery;
pub mod router;

use std::sync::Arc;

use dashmap::DashMap;

use crate::worker::WorkerPool;

/// Registry of running worker pools, keyed by pool name.
pub type PoolMap = DashMap<String, Arc<WorkerPool>>;

pub use autoscaler::{Autoscaler, ScaleDecision};
pub use core::OrchestrationCore;
pub use orphan_recovery::{OrphanRecovery, RecoveryStats};
pub use router::TaskRouter;
