//! Orchestration core for protecting cloud resources.
//!
//! A protection run expands a set of start resources into a dependency
//! forest ([`graph`]), then drives a four-stage operation lifecycle
//! ([`operation`]) over every node, dependencies first ([`driver`]).
//! Operations come from resource-type plugins ([`plugin`]) and persist
//! their progress in per-resource sections of a pluggable [`bank`], grouped
//! by [`checkpoint`], so that a retried run can resume from what earlier
//! attempts recorded.

pub mod bank;
pub mod checkpoint;
pub mod config;
pub mod context;
pub mod driver;
pub mod flow;
pub mod graph;
pub mod operation;
pub mod plugin;
pub mod resource;
pub mod test_support;

pub use bank::{Bank, BankError, BankPlugin, BankSection, ListOptions, ListPage, SortDirection};
pub use checkpoint::{Checkpoint, CheckpointMetadata, CheckpointStatus};
pub use config::{ConfigError, ProtectionConfig};
pub use context::{Parameters, RequestContext};
pub use driver::{
    ErrorPolicy, ExecutionReport, GraphExecutor, NodeFailure, OperationProvider,
    RegistryOperations,
};
pub use flow::{FlowError, FlowReport, ProtectionFlow};
pub use graph::{GraphError, GraphNode, build_graph, try_build_graph, walk_unique};
pub use operation::{
    Cancellation, LifecycleError, Operation, OperationArgs, OperationError, OperationKind,
    PollError, Stage, StatusPoller, StatusSets, run_lifecycle,
};
pub use plugin::{PluginRegistry, ProtectionPlugin, RegistryError, ResourceStatus};
pub use resource::{Resource, ResourceKey};
