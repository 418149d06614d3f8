//! Execution runtime for BUSY playbooks.
//!
//! Matches step requirements to contended resource instances, runs each step's work through a
//! chain of execution strategies with retry and fallback, and orchestrates playbooks as fail-fast
//! sequences of steps.

pub mod capabilities;
pub mod characteristics;
pub mod config;
pub mod definitions;
pub mod error;
pub mod execution;
pub mod executors;
pub mod loader;
pub mod resources;
pub mod runtime;

pub use busy_abstraction::{
    ExecutionRequest, ExecutionType, Executor, ExecutorError, ExecutorOutput,
};
pub use capabilities::{CapabilityResolver, CatalogEntry, MarketplaceInfo};
pub use characteristics::{CharacteristicValue, Characteristics, characteristics};
pub use config::{ExecutionPolicy, ExecutionPolicyUpdate, MarketplaceConfig, RuntimeConfig};
pub use definitions::{
    CapabilityDefinition, IoSpec, MonitoringType, PlaybookDefinition, PriorityItem, PriorityKind,
    Requirement, ResourceDefinition, ResponsibilityDefinition, RuntimeDefinitions, StepDefinition,
};
pub use error::{Result, RuntimeError};
pub use execution::{AttemptOutcome, ExecutionLogEntry, ExecutionManager, ExecutionResult};
pub use executors::{EchoExecutor, FnExecutor, ScriptedExecutor};
pub use loader::{DefinitionLoader, InMemoryDefinitionLoader, ManifestLoader};
pub use resources::{
    Allocation, AllocationResult, ResourceInstance, ResourceManager, ResourceStatus,
    ResourceUtilization,
};
pub use runtime::{
    BusyRuntime, InitializeReport, PlaybookExecution, PlaybookStatus, RuntimeStats,
    StepExecution, StepStatus,
};
