//! # Resilience Module
//!
//! Fault isolation for every external dependency the core calls: the stream
//! broker itself and the downstream providers task handlers depend on. Each
//! dependency gets its own circuit breaker; repeated failures trip the
//! breaker so callers fail fast instead of piling onto a struggling service.
//!
//! ## Architecture
//!
//! - **Circuit Breakers**: per-dependency CLOSED/OPEN/HALF_OPEN state machines
//! - **Manager**: an injected registry keyed by dependency name; no globals
//! - **Metrics**: per-breaker and system-wide snapshots for monitoring
//!
//! Breakers are purely in-process: a restart starts every breaker CLOSED.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use taskstream_core::config::BreakerComponentConfig;
//! use taskstream_core::resilience::CircuitBreaker;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = BreakerComponentConfig {
//!     failure_threshold: 5,
//!     cooldown_secs: 30,
//! };
//! let breaker = CircuitBreaker::new("anthropic".to_string(), config);
//!
//! let result = breaker
//!     .call(|| async { Ok::<_, std::io::Error>("response") })
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod circuit_breaker;
pub mod manager;
pub mod metrics;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerError, CircuitState};
pub use manager::CircuitBreakerManager;
pub use metrics::{CircuitBreakerMetrics, SystemCircuitBreakerMetrics};
