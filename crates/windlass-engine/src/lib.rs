//! # Windlass agent runtime
//!
//! The supervisor that owns workflow lifecycles, the trigger state
//! machines, the action execution pipeline with retry, and the in-memory
//! projections (registry, metrics) the HTTP surface reads.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                         Agent                            │
//! │   (directory scan, per-workflow tasks, hot-reload)       │
//! └──────────────────────────────────────────────────────────┘
//!                │ one task per workflow
//!                ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │              Trigger (cron / filewatch)                  │
//! │   every wait observes the workflow's cancellation token  │
//! └──────────────────────────────────────────────────────────┘
//!                │ one firing = one execution
//!                ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │                  ExecutionPipeline                       │
//! │   actions in order, retry per action, history + metrics  │
//! └──────────────────────────────────────────────────────────┘
//! ```

pub mod agent;
pub mod execlog;
pub mod executor;
pub mod metrics;
pub mod pipeline;
pub mod registry;
pub mod retry;
pub mod trigger;

pub use agent::{Agent, AgentConfig, AgentError, StartReport};
pub use execlog::ExecutionLog;
pub use executor::{ActionError, BashExecutor, HttpExecutor};
pub use metrics::Metrics;
pub use pipeline::ExecutionPipeline;
pub use registry::{ActionSummary, RuntimeStatus, RuntimeWorkflowInfo, WorkflowRegistry};
pub use retry::{
    is_retryable_status, run_with_retry, FixedJitter, JitterSource, RetryOutcome, RetryPolicy,
    ThreadRngJitter, DEFAULT_RETRYABLE_STATUS,
};
pub use trigger::{run_cron_trigger, run_filewatch_trigger, TriggerError};
