//! Agent runtime integration and index-set propagation.

pub mod runtime;
pub mod synchronizer;

pub use runtime::{AgentRuntime, AgentRuntimeError, HttpAgentRuntime};
pub use synchronizer::{AgentFailure, AgentSyncError, AgentSyncReport, AgentSynchronizer};
