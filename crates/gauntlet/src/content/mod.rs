//! The content-validation domain.
//!
//! - [`workflow`]: inputs, events, stage effects, and the decide/evolve core
//! - [`state`]: replayed instance state and status types
//! - [`stages`]: validator trait seams and their request/response types
//! - [`handler`]: the effect handler dispatching stage effects to validators
//! - [`notify`], [`view`], [`push`]: the three projections
//! - [`service`]: the [`ContentPipeline`](service::ContentPipeline) facade

pub mod handler;
pub mod notify;
pub mod push;
pub mod service;
pub mod stages;
pub mod state;
pub mod view;
pub mod workflow;
