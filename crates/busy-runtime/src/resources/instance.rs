//! Live resource instances and their allocation state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Allocation state of a resource instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    /// Free to allocate.
    Available,
    /// Held by a step.
    Allocated,
    /// Taken out of rotation by its owner.
    Unavailable,
}

/// A concrete, registered resource bound to a definition by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceInstance {
    /// Unique instance id.
    pub id: String,
    /// Name of the backing resource definition.
    pub definition: String,
    /// Current allocation state.
    pub status: ResourceStatus,
    /// Opaque attributes supplied at registration.
    pub attributes: Map<String, Value>,
    /// Step currently holding the instance.
    pub allocated_to: Option<String>,
    /// When the instance was registered.
    pub registered_at: DateTime<Utc>,
}

impl ResourceInstance {
    /// Creates an available instance.
    #[must_use]
    pub fn new(id: String, definition: String, attributes: Map<String, Value>) -> Self {
        Self {
            id,
            definition,
            status: ResourceStatus::Available,
            attributes,
            allocated_to: None,
            registered_at: Utc::now(),
        }
    }

    /// Returns `true` if the instance can be allocated.
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.status == ResourceStatus::Available
    }

    /// Compare-and-set `Available -> Allocated`. Returns `false` if the instance was not available.
    pub(crate) fn try_allocate(&mut self, step_id: &str) -> bool {
        if !self.is_available() {
            return false;
        }
        self.status = ResourceStatus::Allocated;
        self.allocated_to = Some(step_id.to_string());
        true
    }

    /// `Allocated -> Available`. Returns `false` if the instance was not allocated.
    pub(crate) fn release(&mut self) -> bool {
        if self.status != ResourceStatus::Allocated {
            return false;
        }
        self.status = ResourceStatus::Available;
        self.allocated_to = None;
        true
    }
}
