//! Runtime orchestrator.
//!
//! `BusyRuntime` owns the registries and runs playbooks: for every step, in order, it allocates
//! the step's resources, assembles its inputs, hands the work to the execution engine, and
//! releases the resources again. A failing step fails the whole playbook.

use crate::capabilities::{CapabilityResolver, MarketplaceInfo};
use crate::config::{ExecutionPolicy, ExecutionPolicyUpdate, RuntimeConfig};
use crate::definitions::{PlaybookDefinition, Requirement, RuntimeDefinitions, StepDefinition};
use crate::error::{Result, RuntimeError};
use crate::execution::{ExecutionManager, ExecutionResult};
use crate::loader::DefinitionLoader;
use crate::resources::{Allocation, ResourceManager, ResourceUtilization};
use busy_abstraction::{ExecutionType, Executor};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Step execution state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Created, not started.
    Pending,
    /// Allocating or executing.
    Running,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
}

impl StepStatus {
    /// Checks if the step can transition to the given state.
    #[must_use]
    pub fn can_transition_to(self, to: Self) -> bool {
        matches!(
            (self, to),
            (Self::Pending, Self::Running | Self::Failed) | (Self::Running, Self::Completed | Self::Failed)
        )
    }

    /// Returns `true` for `Completed` and `Failed`.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Playbook execution state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybookStatus {
    /// Steps are being executed.
    Running,
    /// Every step completed.
    Completed,
    /// A step failed or the runtime shut down.
    Failed,
}

/// Record of one step within a playbook execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepExecution {
    /// Unique step execution id; also the allocation holder id.
    pub id: String,
    /// Step name from the definition.
    pub name: String,
    /// Current state.
    pub status: StepStatus,
    /// Effective inputs handed to the executor.
    pub inputs: Map<String, Value>,
    /// Outputs of the successful executor.
    pub outputs: Map<String, Value>,
    /// Requirements copied from the definition.
    pub requirements: Vec<Requirement>,
    /// Resources the step held.
    pub allocated_resources: Vec<Allocation>,
    /// Engine result, when the step executed successfully.
    pub execution_result: Option<ExecutionResult>,
    /// Warnings raised while running the step.
    pub warnings: Vec<String>,
    /// Errors raised while running the step.
    pub errors: Vec<String>,
    /// When the step began.
    pub started_at: DateTime<Utc>,
    /// When the step resolved.
    pub completed_at: Option<DateTime<Utc>>,
}

impl StepExecution {
    fn new(step: &StepDefinition) -> Self {
        Self {
            id: format!("step-{}", uuid::Uuid::new_v4()),
            name: step.name.clone(),
            status: StepStatus::Pending,
            inputs: Map::new(),
            outputs: Map::new(),
            requirements: step.requirements.clone(),
            allocated_resources: Vec::new(),
            execution_result: None,
            warnings: Vec::new(),
            errors: Vec::new(),
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    fn transition(&mut self, to: StepStatus) {
        if !self.status.can_transition_to(to) {
            warn!(step = %self.name, from = ?self.status, to = ?to, "Unexpected step transition");
        }
        self.status = to;
        if to.is_terminal() {
            self.completed_at = Some(Utc::now());
        }
    }

    /// Instance ids the step held.
    #[must_use]
    pub fn resource_ids(&self) -> Vec<String> {
        self.allocated_resources.iter().map(|a| a.instance_id.clone()).collect()
    }

    /// Strategy that executed the step, if it executed.
    #[must_use]
    pub fn execution_type(&self) -> Option<&ExecutionType> {
        self.execution_result.as_ref().map(|r| &r.execution_type)
    }
}

/// Record of one playbook run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybookExecution {
    /// Unique execution id.
    pub id: String,
    /// Name of the playbook definition.
    pub playbook: String,
    /// Current state.
    pub status: PlaybookStatus,
    /// Input the playbook was started with.
    pub initial_input: Map<String, Value>,
    /// Steps that have begun, in order.
    pub steps: Vec<StepExecution>,
    /// Failure reason, for failed executions.
    pub error: Option<String>,
    /// When the execution started.
    pub started_at: DateTime<Utc>,
    /// When the execution finished.
    pub completed_at: Option<DateTime<Utc>>,
}

impl PlaybookExecution {
    fn new(playbook: &PlaybookDefinition, initial_input: Map<String, Value>) -> Self {
        Self {
            id: format!("exec-{}", uuid::Uuid::new_v4()),
            playbook: playbook.name.clone(),
            status: PlaybookStatus::Running,
            initial_input,
            steps: Vec::with_capacity(playbook.steps.len()),
            error: None,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Looks a step up by name.
    #[must_use]
    pub fn step(&self, name: &str) -> Option<&StepExecution> {
        self.steps.iter().find(|s| s.name == name)
    }

    /// Outputs of the last completed step.
    #[must_use]
    pub fn final_outputs(&self) -> Option<&Map<String, Value>> {
        self.steps.iter().rev().find(|s| s.status == StepStatus::Completed).map(|s| &s.outputs)
    }

    /// Every warning raised by any step, in step order.
    #[must_use]
    pub fn warnings(&self) -> Vec<String> {
        self.steps.iter().flat_map(|s| s.warnings.iter().cloned()).collect()
    }

    /// Builds the effective inputs of `step`: the initial input, overridden by the latest prior
    /// output for every declared input name. `step.output` names select a specific step.
    fn assemble_inputs(&self, step: &StepDefinition) -> Map<String, Value> {
        let mut inputs = self.initial_input.clone();
        for declared in &step.inputs {
            let (source_step, key) = match declared.name.split_once('.') {
                Some((source, key)) => (Some(source), key),
                None => (None, declared.name.as_str()),
            };
            let found = self
                .steps
                .iter()
                .rev()
                .filter(|s| s.status == StepStatus::Completed)
                .filter(|s| source_step.is_none_or(|name| s.name == name))
                .find_map(|s| s.outputs.get(key));
            if let Some(value) = found {
                inputs.insert(key.to_string(), value.clone());
            }
        }
        inputs
    }
}

/// Counts returned by [`BusyRuntime::initialize`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitializeReport {
    /// Capabilities registered.
    pub capabilities: usize,
    /// Responsibilities registered.
    pub responsibilities: usize,
    /// Resource definitions registered.
    pub resources: usize,
    /// Entries that were skipped, with the reason.
    pub skipped: Vec<String>,
}

/// Live runtime snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeStats {
    /// Executions still running.
    pub active_executions: usize,
    /// Executions that completed since start (or the last shutdown).
    pub completed_executions: usize,
    /// Executions that failed since start (or the last shutdown).
    pub failed_executions: usize,
    /// Allocator report.
    pub resource_utilization: ResourceUtilization,
    /// Marketplace report.
    pub capability_marketplace: MarketplaceInfo,
    /// Live execution policy.
    pub execution_policies: ExecutionPolicy,
}

struct ActiveExecution {
    record: PlaybookExecution,
    cancel: CancellationToken,
}

#[derive(Default)]
struct ExecutionRegistry {
    active: HashMap<String, ActiveExecution>,
    history: Vec<PlaybookExecution>,
}

/// Top-level runtime.
pub struct BusyRuntime {
    resources: Arc<ResourceManager>,
    capabilities: Arc<CapabilityResolver>,
    execution: Arc<ExecutionManager>,
    loader: Arc<dyn DefinitionLoader>,
    executions: Arc<RwLock<ExecutionRegistry>>,
    shutdown: CancellationToken,
}

impl fmt::Debug for BusyRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BusyRuntime")
            .field("resources", &self.resources)
            .field("capabilities", &self.capabilities)
            .field("execution", &self.execution)
            .field(
                "active_executions",
                &self.executions.try_read().map(|e| e.active.len()).unwrap_or(0),
            )
            .field("shut_down", &self.shutdown.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl BusyRuntime {
    /// Creates a runtime with fresh registries built from `config`.
    #[must_use]
    pub fn new(config: RuntimeConfig, loader: Arc<dyn DefinitionLoader>) -> Self {
        let capabilities = Arc::new(CapabilityResolver::with_cache(config.marketplace.cache_resolutions));
        let resources = Arc::new(ResourceManager::with_marketplace(Arc::clone(&capabilities)));
        let execution = Arc::new(ExecutionManager::new(config.execution));
        Self::with_components(resources, capabilities, execution, loader)
    }

    /// Creates a runtime over existing registries.
    #[must_use]
    pub fn with_components(
        resources: Arc<ResourceManager>,
        capabilities: Arc<CapabilityResolver>,
        execution: Arc<ExecutionManager>,
        loader: Arc<dyn DefinitionLoader>,
    ) -> Self {
        Self {
            resources,
            capabilities,
            execution,
            loader,
            executions: Arc::new(RwLock::new(ExecutionRegistry::default())),
            shutdown: CancellationToken::new(),
        }
    }

    /// Resource registry and allocator.
    #[must_use]
    pub fn resources(&self) -> &ResourceManager {
        &self.resources
    }

    /// Capability marketplace.
    #[must_use]
    pub fn capabilities(&self) -> &CapabilityResolver {
        &self.capabilities
    }

    /// Execution strategy engine.
    #[must_use]
    pub fn execution(&self) -> &ExecutionManager {
        &self.execution
    }

    /// Registers the executor for an execution type.
    pub async fn register_executor(&self, execution_type: ExecutionType, executor: Arc<dyn Executor>) {
        self.execution.register_executor(execution_type, executor).await;
    }

    /// Registers a live resource instance.
    ///
    /// # Errors
    /// Returns `DuplicateResource` if the id is taken.
    pub async fn register_instance(
        &self,
        definition: &str,
        attributes: Map<String, Value>,
    ) -> Result<String> {
        self.resources.register_instance(definition, attributes).await
    }

    /// Bulk-registers capabilities, responsibilities, and resource definitions.
    ///
    /// Never fails: malformed entries are logged and either accepted as-is (capabilities) or
    /// skipped (nameless resource definitions).
    pub async fn initialize(&self, definitions: RuntimeDefinitions) -> InitializeReport {
        let mut report = InitializeReport::default();

        for capability in definitions.capabilities {
            if capability.name.is_empty() {
                warn!("Registering capability with empty name");
            }
            self.capabilities.register(capability).await;
            report.capabilities += 1;
        }

        for responsibility in definitions.responsibilities {
            if responsibility.capability.name.is_empty() {
                warn!("Registering responsibility with empty name");
            }
            self.capabilities.register(responsibility).await;
            report.responsibilities += 1;
        }

        for resource in definitions.resources {
            if resource.name.is_empty() {
                warn!("Skipping resource definition with empty name");
                report.skipped.push("resource definition with empty name".to_string());
                continue;
            }
            self.resources.register_definition(resource).await;
            report.resources += 1;
        }
        report.skipped.extend(definitions.rejected);

        // a manager attached to this marketplace already keeps the index current
        if !self.resources.indexes_into(&self.capabilities) {
            self.capabilities.replace_providers(self.resources.advertised_capabilities().await).await;
        }

        info!(
            capabilities = report.capabilities,
            responsibilities = report.responsibilities,
            resources = report.resources,
            skipped = report.skipped.len(),
            "Runtime initialized"
        );
        report
    }

    /// Runs a playbook to completion.
    ///
    /// # Arguments
    /// * `name` - Playbook name, resolved through the definition loader
    /// * `initial_input` - Input visible to every step
    ///
    /// # Returns
    /// The completed execution record.
    ///
    /// # Errors
    /// Returns the loader error, `ResourceAllocation` or `Execution` from the failing step, or
    /// `ShutDown` if the runtime was shut down before or during the run. Failed executions stay
    /// inspectable through [`get_execution`](Self::get_execution) and [`history`](Self::history).
    pub async fn execute_playbook(
        &self,
        name: &str,
        initial_input: Map<String, Value>,
    ) -> Result<PlaybookExecution> {
        if self.shutdown.is_cancelled() {
            return Err(RuntimeError::ShutDown);
        }

        let playbook = self.loader.load_playbook(name).await?;
        let mut execution = PlaybookExecution::new(&playbook, initial_input);
        let cancel = self.shutdown.child_token();
        self.executions.write().await.active.insert(
            execution.id.clone(),
            ActiveExecution { record: execution.clone(), cancel: cancel.clone() },
        );
        info!(execution_id = %execution.id, playbook = %playbook.name, steps = playbook.steps.len(), "Playbook execution started");

        for step in &playbook.steps {
            if cancel.is_cancelled() {
                return Err(self.abandon(&mut execution).await);
            }
            if let Err(err) = self.run_step(&mut execution, step).await {
                if cancel.is_cancelled() {
                    return Err(self.abandon(&mut execution).await);
                }
                error!(execution_id = %execution.id, step = %step.name, error = %err, "Playbook execution failed");
                execution.status = PlaybookStatus::Failed;
                execution.error = Some(err.to_string());
                execution.completed_at = Some(Utc::now());
                self.finish(&execution).await;
                return Err(err);
            }
        }

        if cancel.is_cancelled() {
            return Err(self.abandon(&mut execution).await);
        }
        execution.status = PlaybookStatus::Completed;
        execution.completed_at = Some(Utc::now());
        self.finish(&execution).await;
        info!(execution_id = %execution.id, playbook = %execution.playbook, "Playbook execution completed");
        Ok(execution)
    }

    async fn run_step(&self, execution: &mut PlaybookExecution, step: &StepDefinition) -> Result<()> {
        let mut record = StepExecution::new(step);
        record.transition(StepStatus::Running);
        let step_id = record.id.clone();
        debug!(execution_id = %execution.id, step = %step.name, step_id = %step_id, "Step started");
        execution.steps.push(record);
        self.publish(execution).await;

        let outcome = self.allocate_and_execute(execution, step, &step_id).await;
        self.resources.release(&step_id).await;

        let Some(record) = execution.steps.last_mut() else {
            return outcome;
        };
        match &outcome {
            Ok(()) => {
                record.transition(StepStatus::Completed);
                debug!(execution_id = %execution.id, step = %step.name, "Step completed");
            }
            Err(err) => {
                record.errors.push(err.to_string());
                record.transition(StepStatus::Failed);
            }
        }
        self.publish(execution).await;
        outcome
    }

    async fn allocate_and_execute(
        &self,
        execution: &mut PlaybookExecution,
        step: &StepDefinition,
        step_id: &str,
    ) -> Result<()> {
        let allocation = self.resources.allocate_resources(step_id, &step.requirements).await?;
        let inputs = execution.assemble_inputs(step);
        if let Some(record) = execution.steps.last_mut() {
            record.allocated_resources = allocation.allocations;
            record.warnings.extend(allocation.warnings);
            record.inputs = inputs.clone();
        }
        self.publish(execution).await;

        let result = self.execution.execute_step(&step.name, &step.method, inputs).await?;
        if let Some(record) = execution.steps.last_mut() {
            record.outputs = result.outputs.clone();
            record.execution_result = Some(result);
        }
        Ok(())
    }

    /// Mirrors the local record into the active registry, unless shutdown already removed it.
    async fn publish(&self, execution: &PlaybookExecution) {
        if let Some(active) = self.executions.write().await.active.get_mut(&execution.id) {
            active.record = execution.clone();
        }
    }

    async fn finish(&self, execution: &PlaybookExecution) {
        let mut registry = self.executions.write().await;
        if registry.active.remove(&execution.id).is_some() {
            registry.history.push(execution.clone());
        }
    }

    /// Stops an execution interrupted by shutdown.
    async fn abandon(&self, execution: &mut PlaybookExecution) -> RuntimeError {
        warn!(execution_id = %execution.id, steps_started = execution.steps.len(), "Playbook execution abandoned by shutdown");
        for step in &execution.steps {
            self.resources.release(&step.id).await;
        }
        execution.status = PlaybookStatus::Failed;
        execution.error = Some(RuntimeError::ShutDown.to_string());
        execution.completed_at = Some(Utc::now());
        self.executions.write().await.active.remove(&execution.id);
        RuntimeError::ShutDown
    }

    /// Returns a live snapshot of the runtime.
    pub async fn get_runtime_stats(&self) -> RuntimeStats {
        let (active, completed, failed) = {
            let registry = self.executions.read().await;
            let count = |status: PlaybookStatus| {
                registry.history.iter().filter(|e| e.status == status).count()
            };
            (registry.active.len(), count(PlaybookStatus::Completed), count(PlaybookStatus::Failed))
        };
        RuntimeStats {
            active_executions: active,
            completed_executions: completed,
            failed_executions: failed,
            resource_utilization: self.resources.get_utilization().await,
            capability_marketplace: self.capabilities.get_marketplace_info().await,
            execution_policies: self.execution.policy().await,
        }
    }

    /// Merges a partial policy into the live one; applies to steps started afterwards.
    ///
    /// # Errors
    /// Returns `Config` for a zero retry budget or timeout. The live policy is unchanged then.
    pub async fn update_config(&self, update: ExecutionPolicyUpdate) -> Result<ExecutionPolicy> {
        self.execution.update_policy(update).await
    }

    /// Executions still running, oldest first.
    pub async fn list_active_executions(&self) -> Vec<PlaybookExecution> {
        let mut active: Vec<PlaybookExecution> =
            self.executions.read().await.active.values().map(|a| a.record.clone()).collect();
        active.sort_by_key(|e| e.started_at);
        active
    }

    /// Looks an execution up by id, active or finished.
    pub async fn get_execution(&self, id: &str) -> Option<PlaybookExecution> {
        let registry = self.executions.read().await;
        registry
            .active
            .get(id)
            .map(|a| a.record.clone())
            .or_else(|| registry.history.iter().find(|e| e.id == id).cloned())
    }

    /// Finished executions, in completion order.
    pub async fn history(&self) -> Vec<PlaybookExecution> {
        self.executions.read().await.history.clone()
    }

    /// Returns `true` once [`shutdown`](Self::shutdown) has been called.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Shuts the runtime down.
    ///
    /// Releases the resources of every running step, forgets all executions (active and
    /// finished), and destroys registered instances. In-flight executor calls are not
    /// interrupted; their executions stop before the next step. Idempotent.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();

        let drained: Vec<ActiveExecution> = {
            let mut registry = self.executions.write().await;
            registry.history.clear();
            registry.active.drain().map(|(_, active)| active).collect()
        };

        for active in &drained {
            active.cancel.cancel();
            for step in active.record.steps.iter().filter(|s| s.status == StepStatus::Running) {
                let released = self.resources.release(&step.id).await;
                debug!(execution_id = %active.record.id, step = %step.name, released = released.len(), "Released resources on shutdown");
            }
        }
        self.resources.clear_instances().await;

        info!(interrupted = drained.len(), "Runtime shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::characteristics::characteristics;
    use crate::definitions::{IoSpec, ResourceDefinition, StepDefinition};
    use crate::executors::EchoExecutor;
    use crate::loader::InMemoryDefinitionLoader;
    use serde_json::json;

    fn input(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs.iter().map(|(k, v)| ((*k).to_string(), v.clone())).collect()
    }

    fn completed_step(name: &str, outputs: Map<String, Value>) -> StepExecution {
        let mut step = StepExecution::new(&StepDefinition::new(name, ""));
        step.status = StepStatus::Completed;
        step.outputs = outputs;
        step
    }

    #[test]
    fn test_step_transitions() {
        assert!(StepStatus::Pending.can_transition_to(StepStatus::Running));
        assert!(StepStatus::Running.can_transition_to(StepStatus::Failed));
        assert!(!StepStatus::Completed.can_transition_to(StepStatus::Running));
        assert!(StepStatus::Failed.is_terminal());
    }

    #[test]
    fn test_assemble_inputs() {
        let playbook = PlaybookDefinition::new("p", Vec::new());
        let mut execution =
            PlaybookExecution::new(&playbook, input(&[("order", json!("margherita")), ("size", json!("s"))]));
        execution.steps.push(completed_step("take-order", input(&[("size", json!("l"))])));
        execution.steps.push(completed_step("price", input(&[("total", json!(12))])));

        let step = StepDefinition::new("bake", "")
            .with_input(IoSpec::new("size"))
            .with_input(IoSpec::new("price.total"))
            .with_input(IoSpec::new("missing"));
        let inputs = execution.assemble_inputs(&step);

        assert_eq!(inputs["order"], json!("margherita"));
        assert_eq!(inputs["size"], json!("l"));
        assert_eq!(inputs["total"], json!(12));
        assert!(!inputs.contains_key("missing"));
    }

    #[test]
    fn test_assemble_inputs_uses_latest_output() {
        let playbook = PlaybookDefinition::new("p", Vec::new());
        let mut execution = PlaybookExecution::new(&playbook, Map::new());
        execution.steps.push(completed_step("a", input(&[("v", json!(1))])));
        execution.steps.push(completed_step("b", input(&[("v", json!(2))])));

        let step = StepDefinition::new("c", "").with_input(IoSpec::new("v"));
        assert_eq!(execution.assemble_inputs(&step)["v"], json!(2));
        let pinned = StepDefinition::new("c", "").with_input(IoSpec::new("a.v"));
        assert_eq!(execution.assemble_inputs(&pinned)["v"], json!(1));
    }

    #[tokio::test]
    async fn test_execute_and_inspect() {
        let loader = Arc::new(InMemoryDefinitionLoader::with_playbooks([PlaybookDefinition::new(
            "greet",
            vec![StepDefinition::new("say-hello", "Say hello")],
        )]));
        let runtime = BusyRuntime::new(RuntimeConfig::default(), loader);
        runtime.register_executor(ExecutionType::Algorithmic, Arc::new(EchoExecutor::new())).await;

        let execution = runtime
            .execute_playbook("greet", input(&[("name", json!("Ada"))]))
            .await
            .unwrap();
        assert_eq!(execution.status, PlaybookStatus::Completed);
        assert_eq!(execution.final_outputs().unwrap()["name"], json!("Ada"));
        assert_eq!(execution.steps[0].execution_type(), Some(&ExecutionType::Algorithmic));
        assert!(execution.steps[0].completed_at.is_some());

        let stored = runtime.get_execution(&execution.id).await.unwrap();
        assert_eq!(stored, execution);
        let stats = runtime.get_runtime_stats().await;
        assert_eq!((stats.active_executions, stats.completed_executions), (0, 1));
    }

    #[tokio::test]
    async fn test_unknown_playbook() {
        let runtime =
            BusyRuntime::new(RuntimeConfig::default(), Arc::new(InMemoryDefinitionLoader::new()));
        let err = runtime.execute_playbook("nope", Map::new()).await.unwrap_err();
        assert!(matches!(err, RuntimeError::PlaybookNotFound(_)));
        assert_eq!(runtime.get_runtime_stats().await.failed_executions, 0);
    }

    #[tokio::test]
    async fn test_rejects_after_shutdown() {
        let runtime =
            BusyRuntime::new(RuntimeConfig::default(), Arc::new(InMemoryDefinitionLoader::new()));
        runtime.shutdown().await;
        runtime.shutdown().await;
        assert!(runtime.is_shut_down());
        assert!(matches!(
            runtime.execute_playbook("any", Map::new()).await.unwrap_err(),
            RuntimeError::ShutDown
        ));
    }

    #[tokio::test]
    async fn test_initialize_skips_nameless_resources() {
        let runtime =
            BusyRuntime::new(RuntimeConfig::default(), Arc::new(InMemoryDefinitionLoader::new()));
        let definitions = RuntimeDefinitions::from_json_str(
            r#"{
                "capabilities": [{"name": "", "description": "", "method": "", "inputs": [], "outputs": []}],
                "resources": [
                    {"name": ""},
                    {"name": "chef", "characteristics": {"capabilities": ["prepare-pizza"]}},
                    {"name": "oven", "characteristics": {"notes": null}},
                    {"name": "mixer", "extends": ["chef"]}
                ]
            }"#,
        )
        .unwrap();

        let report = runtime.initialize(definitions).await;
        assert_eq!(report.capabilities, 1);
        assert_eq!(report.resources, 2);
        assert_eq!(report.skipped.len(), 2);
        assert!(report.skipped[1].starts_with("resources[3]:"));
        assert_eq!(
            runtime.capabilities().get_providers_for("prepare-pizza").await,
            vec!["chef".to_string()]
        );
    }

    #[tokio::test]
    async fn test_provider_index_tracks_later_registrations() {
        let runtime =
            BusyRuntime::new(RuntimeConfig::default(), Arc::new(InMemoryDefinitionLoader::new()));
        runtime.initialize(RuntimeDefinitions::default()).await;

        runtime
            .resources()
            .register_definition(ResourceDefinition::new(
                "sommelier",
                characteristics([("capabilities", vec!["pair-wine"])]),
            ))
            .await;
        assert_eq!(
            runtime.capabilities().get_providers_for("pair-wine").await,
            vec!["sommelier".to_string()]
        );

        runtime
            .resources()
            .register_definition(ResourceDefinition::new(
                "sommelier",
                characteristics([("role", "waiter")]),
            ))
            .await;
        assert!(runtime.capabilities().get_providers_for("pair-wine").await.is_empty());
        assert_eq!(runtime.get_runtime_stats().await.capability_marketplace.total_providers, 0);
    }
}
