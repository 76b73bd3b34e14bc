pub mod circuit_breaker;
pub mod error;
pub mod postgres_bus;
pub mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitOpen, CircuitState};
pub use error::{QueueError, Result};
pub use postgres_bus::{ClaimedMessage, NackOutcome, PostgresQueueBus, QueueBus};
pub use retry::RetryPolicy;
