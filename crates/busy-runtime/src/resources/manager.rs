//! Resource registry and allocator.
//!
//! Owns resource definitions and live instances, and resolves step requirements to instances by
//! walking each requirement's priority chain. Every status transition happens under one
//! allocator-wide write lock, so two concurrent allocations can never both take the same
//! instance: the loser sees `Allocated` and falls through to its next priority item.

use super::instance::{ResourceInstance, ResourceStatus};
use crate::capabilities::CapabilityResolver;
use crate::characteristics::{self, CAPABILITIES_KEY, CharacteristicValue, Characteristics};
use crate::definitions::{PriorityItem, PriorityKind, Requirement, ResourceDefinition};
use crate::error::{Result, RuntimeError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// One requirement resolved to one instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    /// Requirement name within the step.
    pub requirement: String,
    /// Allocated instance id.
    pub instance_id: String,
    /// Definition backing the instance.
    pub definition: String,
    /// Priority item kind that succeeded.
    pub matched_by: PriorityKind,
}

/// Outcome of a successful `allocate_resources` call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationResult {
    /// Step the resources are bound to.
    pub step_id: String,
    /// One entry per requirement, in requirement order.
    pub allocations: Vec<Allocation>,
    /// Warnings raised by emergency items.
    pub warnings: Vec<String>,
}

impl AllocationResult {
    /// Instance ids in requirement order.
    #[must_use]
    pub fn instance_ids(&self) -> Vec<String> {
        self.allocations.iter().map(|a| a.instance_id.clone()).collect()
    }
}

/// Utilization snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceUtilization {
    /// Registered instances.
    pub total_resources: usize,
    /// Instances currently allocated.
    pub allocated_resources: usize,
    /// Instances currently available.
    pub available_resources: usize,
    /// Instances marked unavailable.
    pub unavailable_resources: usize,
    /// `allocated / total`, 0.0 when nothing is registered.
    pub utilization_rate: f64,
}

#[derive(Default)]
struct ResourceState {
    definitions: HashMap<String, ResourceDefinition>,
    /// Registration order is the tie-break for characteristics matching.
    instances: Vec<ResourceInstance>,
}

impl ResourceState {
    fn position(&self, id: &str) -> Option<usize> {
        self.instances.iter().position(|i| i.id == id)
    }

    /// Own characteristics merged over every ancestor's, root first.
    fn effective_characteristics(&self, name: &str) -> Characteristics {
        let mut lineage = Vec::new();
        let mut seen = HashSet::new();
        let mut current = Some(name);
        while let Some(def_name) = current {
            if !seen.insert(def_name) {
                warn!(definition = %name, cycle_at = %def_name, "Cycle in resource definition inheritance");
                break;
            }
            let Some(def) = self.definitions.get(def_name) else {
                break;
            };
            lineage.push(def);
            current = def.extends.as_deref();
        }

        let mut merged = Characteristics::new();
        for def in lineage.into_iter().rev() {
            merged.extend(def.characteristics.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        merged
    }

    /// Every definition with the capabilities it advertises, inheritance applied, sorted by name.
    fn advertised(&self) -> Vec<(String, Vec<String>)> {
        let mut providers: Vec<(String, Vec<String>)> = self
            .definitions
            .keys()
            .map(|name| {
                let effective = self.effective_characteristics(name);
                (name.clone(), characteristics::advertised_capabilities(&effective))
            })
            .collect();
        providers.sort_by(|a, b| a.0.cmp(&b.0));
        providers
    }

    fn find_specific(&self, name: &str) -> Option<usize> {
        if let Some(idx) = self.position(name) {
            return self.instances[idx].is_available().then_some(idx);
        }
        self.instances.iter().position(|i| i.definition == name && i.is_available())
    }

    fn find_matching(
        &self,
        matcher: &Characteristics,
        memo: &mut HashMap<String, Characteristics>,
    ) -> Option<usize> {
        self.instances.iter().position(|instance| {
            if !instance.is_available() {
                return false;
            }
            let effective = memo
                .entry(instance.definition.clone())
                .or_insert_with(|| self.effective_characteristics(&instance.definition));
            characteristics::matches(matcher, effective)
        })
    }

    fn release_ids(&mut self, ids: &[String]) {
        for id in ids {
            if let Some(idx) = self.position(id) {
                self.instances[idx].release();
            }
        }
    }
}

/// Registry of resource definitions and instances, and the allocator over them.
pub struct ResourceManager {
    state: Arc<RwLock<ResourceState>>,
    /// Consulted for capability names referenced by matchers.
    marketplace: Option<Arc<CapabilityResolver>>,
}

impl fmt::Debug for ResourceManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceManager")
            .field("instance_count", &self.state.try_read().map(|s| s.instances.len()).unwrap_or(0))
            .field("marketplace", &self.marketplace.is_some())
            .finish_non_exhaustive()
    }
}

impl ResourceManager {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self { state: Arc::new(RwLock::new(ResourceState::default())), marketplace: None }
    }

    /// Creates an empty registry that checks capability names against a marketplace.
    #[must_use]
    pub fn with_marketplace(marketplace: Arc<CapabilityResolver>) -> Self {
        Self { marketplace: Some(marketplace), ..Self::new() }
    }

    /// Returns `true` if definition changes are published to `marketplace`'s provider index.
    #[must_use]
    pub fn indexes_into(&self, marketplace: &Arc<CapabilityResolver>) -> bool {
        self.marketplace.as_ref().is_some_and(|attached| Arc::ptr_eq(attached, marketplace))
    }

    /// Registers (or replaces) a resource definition.
    ///
    /// With a marketplace attached, its provider index is rebuilt from every registered
    /// definition, so definitions extending this one pick up the change too.
    ///
    /// # Returns
    /// Returns `true` if the definition was new.
    pub async fn register_definition(&self, definition: ResourceDefinition) -> bool {
        debug!(definition = %definition.name, extends = ?definition.extends, "Registering resource definition");
        let mut state = self.state.write().await;
        let added = state.definitions.insert(definition.name.clone(), definition).is_none();
        // published under the state lock so concurrent registrations land in order
        if let Some(marketplace) = &self.marketplace {
            marketplace.replace_providers(state.advertised()).await;
        }
        added
    }

    /// Returns a copy of a definition.
    pub async fn get_definition(&self, name: &str) -> Option<ResourceDefinition> {
        self.state.read().await.definitions.get(name).cloned()
    }

    /// Returns a definition's characteristics with inheritance applied.
    pub async fn effective_characteristics(&self, name: &str) -> Option<Characteristics> {
        let state = self.state.read().await;
        state.definitions.contains_key(name).then(|| state.effective_characteristics(name))
    }

    /// Lists `(definition, advertised capabilities)` for every definition that advertises any,
    /// with inheritance applied.
    pub async fn advertised_capabilities(&self) -> Vec<(String, Vec<String>)> {
        let mut providers = self.state.read().await.advertised();
        providers.retain(|(_, caps)| !caps.is_empty());
        providers
    }

    /// Registers a live instance of `definition`.
    ///
    /// The id is taken from `attributes["id"]` when it is a string, otherwise generated.
    ///
    /// # Errors
    /// Returns `DuplicateResource` if an instance with the same id exists.
    pub async fn register_instance(
        &self,
        definition: &str,
        attributes: Map<String, Value>,
    ) -> Result<String> {
        let id = match attributes.get("id") {
            Some(Value::String(id)) if !id.is_empty() => id.clone(),
            _ => format!("{}-{}", definition, uuid::Uuid::new_v4()),
        };

        let mut state = self.state.write().await;
        if state.position(&id).is_some() {
            warn!(instance_id = %id, "Duplicate resource instance registration");
            return Err(RuntimeError::DuplicateResource(id));
        }
        if !state.definitions.contains_key(definition) {
            warn!(instance_id = %id, definition = %definition, "Instance registered for unknown definition");
        }

        state.instances.push(ResourceInstance::new(id.clone(), definition.to_string(), attributes));
        info!(instance_id = %id, definition = %definition, "Registered resource instance");
        Ok(id)
    }

    /// Removes an instance.
    ///
    /// # Returns
    /// Returns `true` if the instance existed.
    pub async fn deregister_instance(&self, id: &str) -> bool {
        let mut state = self.state.write().await;
        let Some(idx) = state.position(id) else {
            warn!(instance_id = %id, "Attempted to deregister non-existent instance");
            return false;
        };
        let removed = state.instances.remove(idx);
        if let Some(step) = removed.allocated_to {
            warn!(instance_id = %id, step = %step, "Deregistered an allocated instance");
        }
        debug!(instance_id = %id, "Deregistered resource instance");
        true
    }

    /// Returns a copy of an instance.
    pub async fn get_instance(&self, id: &str) -> Option<ResourceInstance> {
        let state = self.state.read().await;
        state.position(id).map(|idx| state.instances[idx].clone())
    }

    /// Lists all instances in registration order.
    pub async fn list_instances(&self) -> Vec<ResourceInstance> {
        self.state.read().await.instances.clone()
    }

    /// Takes an available instance out of rotation.
    ///
    /// # Returns
    /// Returns `false` if the instance is unknown or currently allocated.
    pub async fn set_unavailable(&self, id: &str) -> bool {
        let mut state = self.state.write().await;
        match state.position(id) {
            Some(idx) if state.instances[idx].status != ResourceStatus::Allocated => {
                state.instances[idx].status = ResourceStatus::Unavailable;
                true
            }
            _ => false,
        }
    }

    /// Puts an unavailable instance back into rotation.
    ///
    /// # Returns
    /// Returns `false` if the instance is unknown or not unavailable.
    pub async fn set_available(&self, id: &str) -> bool {
        let mut state = self.state.write().await;
        match state.position(id) {
            Some(idx) if state.instances[idx].status == ResourceStatus::Unavailable => {
                state.instances[idx].status = ResourceStatus::Available;
                true
            }
            _ => false,
        }
    }

    /// Resolves every requirement of a step to one instance, all or nothing.
    ///
    /// Each requirement walks its priority chain in order; the first item that yields an
    /// available instance wins. If any requirement cannot be satisfied, the instances already
    /// taken by this call are released before the error is returned.
    ///
    /// # Errors
    /// Returns `ResourceAllocation` naming the first unsatisfied requirement.
    pub async fn allocate_resources(
        &self,
        step_id: &str,
        requirements: &[Requirement],
    ) -> Result<AllocationResult> {
        self.check_capability_references(requirements).await;

        let mut state = self.state.write().await;
        let mut memo = HashMap::new();
        let mut result = AllocationResult { step_id: step_id.to_string(), ..AllocationResult::default() };

        for requirement in requirements {
            let mut satisfied = None;
            for item in requirement.effective_priority() {
                let candidate = match &item {
                    PriorityItem::Specific { specific } => state.find_specific(specific),
                    PriorityItem::Characteristics { characteristics }
                    | PriorityItem::Emergency { characteristics, .. } => {
                        state.find_matching(characteristics, &mut memo)
                    }
                };
                match candidate {
                    Some(idx) if state.instances[idx].try_allocate(step_id) => {
                        satisfied = Some((idx, item));
                        break;
                    }
                    _ => {
                        debug!(step = %step_id, requirement = %requirement.name, kind = ?item.kind(), "Priority item not satisfiable, falling through");
                    }
                }
            }

            let Some((idx, item)) = satisfied else {
                let taken = result.instance_ids();
                state.release_ids(&taken);
                warn!(step = %step_id, requirement = %requirement.name, released = taken.len(), "Requirement could not be satisfied");
                return Err(RuntimeError::ResourceAllocation {
                    step: step_id.to_string(),
                    requirement: requirement.name.clone(),
                });
            };

            let instance = &state.instances[idx];
            if let PriorityItem::Emergency { warning, .. } = &item {
                warn!(step = %step_id, requirement = %requirement.name, instance_id = %instance.id, warning = %warning, "Emergency allocation");
                result.warnings.push(warning.clone());
            }
            debug!(step = %step_id, requirement = %requirement.name, instance_id = %instance.id, kind = ?item.kind(), "Allocated resource");
            result.allocations.push(Allocation {
                requirement: requirement.name.clone(),
                instance_id: instance.id.clone(),
                definition: instance.definition.clone(),
                matched_by: item.kind(),
            });
        }

        Ok(result)
    }

    /// Releases every instance held by `step_id`. Idempotent.
    ///
    /// # Returns
    /// Returns the ids of instances that were released.
    pub async fn release(&self, step_id: &str) -> Vec<String> {
        let mut state = self.state.write().await;
        let mut released = Vec::new();
        for instance in &mut state.instances {
            if instance.allocated_to.as_deref() == Some(step_id) && instance.release() {
                released.push(instance.id.clone());
            }
        }
        if !released.is_empty() {
            debug!(step = %step_id, released = ?released, "Released resources");
        }
        released
    }

    /// Instance ids currently held by `step_id`.
    pub async fn allocations_for(&self, step_id: &str) -> Vec<String> {
        let state = self.state.read().await;
        state
            .instances
            .iter()
            .filter(|i| i.allocated_to.as_deref() == Some(step_id))
            .map(|i| i.id.clone())
            .collect()
    }

    /// Returns a utilization snapshot.
    pub async fn get_utilization(&self) -> ResourceUtilization {
        let state = self.state.read().await;
        let count = |status: ResourceStatus| state.instances.iter().filter(|i| i.status == status).count();
        let total = state.instances.len();
        let allocated = count(ResourceStatus::Allocated);
        ResourceUtilization {
            total_resources: total,
            allocated_resources: allocated,
            available_resources: count(ResourceStatus::Available),
            unavailable_resources: count(ResourceStatus::Unavailable),
            utilization_rate: if total == 0 { 0.0 } else { allocated as f64 / total as f64 },
        }
    }

    /// Removes every instance. Definitions are kept.
    pub async fn clear_instances(&self) {
        self.state.write().await.instances.clear();
    }

    async fn check_capability_references(&self, requirements: &[Requirement]) {
        let Some(marketplace) = &self.marketplace else {
            return;
        };
        if marketplace.is_empty().await {
            return;
        }
        for requirement in requirements {
            for item in requirement.effective_priority() {
                let (PriorityItem::Characteristics { characteristics }
                | PriorityItem::Emergency { characteristics, .. }) = &item
                else {
                    continue;
                };
                let Some(CharacteristicValue::List(names)) = characteristics.get(CAPABILITIES_KEY)
                else {
                    continue;
                };
                for name in names {
                    if !marketplace.is_known(name).await {
                        warn!(requirement = %requirement.name, capability = %name, "Requirement references a capability missing from the marketplace");
                    }
                }
            }
        }
    }
}

impl Default for ResourceManager {
    fn default() -> Self {
        Self::new()
    }
}
