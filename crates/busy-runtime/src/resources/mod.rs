//! Resource definitions, live instances, and allocation.

pub mod instance;
pub mod manager;

pub use instance::{ResourceInstance, ResourceStatus};
pub use manager::{Allocation, AllocationResult, ResourceManager, ResourceUtilization};
