//! Effect execution: handlers, retry policy, and execution context.
//!
//! Effects are side effects produced by workflow decisions (stage
//! invocations, downstream publishes). They are enqueued transactionally to
//! the outbox and executed by effect workers with at-least-once delivery.

mod context;
mod handler;
mod retry;

pub use context::EffectContext;
pub use handler::EffectHandler;
pub use retry::RetryPolicy;
