//! Node runtime (component C7): composes peer transport, consensus,
//! cluster state, the partition planner, the distributed scheduler, and the
//! auto-scaler into a single process lifecycle.

pub mod config;
pub mod errors;
pub mod node;
pub mod runtime;
pub mod types;

pub use config::{AppConfig, ClusterSettings, ConfigError, NodeSettings};
pub use errors::StartupError;
pub use node::{Node, NodeCapabilities, NodeId, NodeMetadata, NodeStatus};
pub use runtime::{NodeRuntime, NoopEffector, NoopRunner};
pub use types::{ExitReason, RuntimeMode};
