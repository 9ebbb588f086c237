//! Campaign dispatch: wave planning, per-account throttling, and the
//! engine that drives sends through registered transports.
//!
//! The flow is deliberately simple. Recipients are dealt round-robin into
//! one queue per available account ([`wave::plan`]), then the engine walks
//! the queues wave by wave ([`DispatchEngine::dispatch`]). Within a wave
//! every account runs one job concurrently; the wave boundary is the only
//! join point. Throttling is computed from durable account state
//! ([`rate_limit::check`]), so restarts and concurrent processes see the
//! same clock.

pub mod engine;
pub mod rate_limit;
pub mod registry;
pub mod report;
pub mod wave;

pub use engine::DispatchEngine;
pub use rate_limit::ThrottleVerdict;
pub use registry::AccountRegistry;
pub use report::{DispatchReport, JobOutcome, JobStatus};
pub use wave::WavePlan;
