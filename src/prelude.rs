//! Convenient re-exports for common lifeline types.
pub use crate::{
    backoff::BackoffPolicy,
    circuit_breaker::{BreakerState, CircuitBreakerConfig},
    config::ManagerConfig,
    error::{ConfigError, ManagerError},
    event_hub::{HandlerError, Subscription},
    events::{DisconnectReason, Event, EventType},
    jitter::Jitter,
    manager::{ConnectionManager, ManagerBuilder, ManagerSnapshot},
    queue::DropStrategy,
    rate_limit::{Decision, RateLimiter},
    state::ConnectionState,
    transport::{Connection, Connector, Payload, TransportError, TransportEvent},
};
