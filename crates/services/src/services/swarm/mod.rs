//! Swarm Dispatch and Orchestration
//!
//! Routes incoming requests between a direct response and a multi-agent
//! swarm, executes planned swarms phase by phase, and streams their progress.

mod complexity;
mod dispatch;
mod executor;
mod model;
mod queue;
mod selector;
mod stream;

pub use complexity::{assess, ComplexityResult};
pub use dispatch::{DispatchError, DispatchOutcome, DispatchRequest, DispatchService};
pub use executor::{ExecutorConfig, ExecutorError, SwarmExecutor, SwarmJob};
pub use model::{
    extract_signal, strip_signal_markers, HttpModelInvoker, ModelError, ModelInvoker,
    ModelResponse,
};
pub use queue::{LocalSwarmQueue, QueueConfig, SwarmQueue};
pub use selector::{
    select, DispatchBee, DispatchMode, DispatchPlan, MAX_SELECTED_BEES, PHASE_DURATION_MS,
    SWARM_THRESHOLD,
};
pub use stream::{
    ConnectionRegistry, StreamCursor, StreamPublisher, SwarmStreamEvent,
};
