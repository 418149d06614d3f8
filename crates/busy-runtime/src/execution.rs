//! Execution strategy engine.
//!
//! Runs a step's work through the policy's ordered chain of execution types. Each type gets up to
//! `max_retries` attempts, each bounded by the policy timeout; a timeout counts as a failed
//! attempt. The first success wins and reports which type produced it, together with the trail of
//! every attempt made on the way.

use crate::config::{ExecutionPolicy, ExecutionPolicyUpdate};
use crate::error::{Result, RuntimeError};
use busy_abstraction::{ExecutionRequest, ExecutionType, Executor, ExecutorOutput};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// What happened to one attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// The executor succeeded.
    Succeeded,
    /// The executor reported a failure or returned an error.
    Failed {
        /// Failure reason as reported by the executor.
        reason: String,
    },
    /// The attempt exceeded the policy timeout.
    TimedOut {
        /// Timeout that elapsed.
        after_ms: u64,
    },
    /// The type was not attempted.
    Skipped {
        /// Why the type was skipped.
        reason: String,
    },
}

/// One entry of the fallback trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionLogEntry {
    /// Strategy involved.
    pub execution_type: ExecutionType,
    /// 1-based attempt number within the type; 0 for skipped types.
    pub attempt: u32,
    /// Outcome of the attempt.
    #[serde(flatten)]
    pub outcome: AttemptOutcome,
    /// When the attempt finished.
    pub at: DateTime<Utc>,
}

impl ExecutionLogEntry {
    fn new(execution_type: &ExecutionType, attempt: u32, outcome: AttemptOutcome) -> Self {
        Self { execution_type: execution_type.clone(), attempt, outcome, at: Utc::now() }
    }

    /// Returns `true` for failed or timed-out attempts.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self.outcome, AttemptOutcome::Failed { .. } | AttemptOutcome::TimedOut { .. })
    }
}

impl fmt::Display for ExecutionLogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            AttemptOutcome::Succeeded => {
                write!(f, "{} attempt {} succeeded", self.execution_type, self.attempt)
            }
            AttemptOutcome::Failed { reason } => {
                write!(f, "{} attempt {} failed: {}", self.execution_type, self.attempt, reason)
            }
            AttemptOutcome::TimedOut { after_ms } => write!(
                f,
                "{} attempt {} timed out after {}ms",
                self.execution_type, self.attempt, after_ms
            ),
            AttemptOutcome::Skipped { reason } => {
                write!(f, "{} skipped: {}", self.execution_type, reason)
            }
        }
    }
}

/// Terminal result of a successful step execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Strategy that actually succeeded.
    pub execution_type: ExecutionType,
    /// Outputs produced by the successful executor.
    pub outputs: Map<String, Value>,
    /// Fallback trail, successful attempt last.
    pub logs: Vec<ExecutionLogEntry>,
    /// Log lines reported by the successful executor.
    pub executor_logs: Vec<String>,
    /// Attempts made across all types.
    pub attempts: u32,
    /// Wall time spent in the engine.
    pub duration_ms: u64,
}

impl ExecutionResult {
    /// Returns `true` if a type other than the first attempted one produced the result.
    #[must_use]
    pub fn fell_back(&self) -> bool {
        self.logs.iter().any(ExecutionLogEntry::is_failure)
    }
}

/// Policy snapshot plus the strategy chain derived from it.
struct ChainPlan {
    policy: ExecutionPolicy,
    human_permitted: bool,
}

impl ChainPlan {
    fn new(policy: ExecutionPolicy) -> Self {
        let mut permitted = policy.default_chain.iter().filter(|t| policy.permits(t));
        let human_only = matches!(
            (permitted.next(), permitted.all(|t| *t == ExecutionType::Human)),
            (Some(ExecutionType::Human), true)
        );
        let human_permitted = policy.allow_human_override || human_only;
        Self { policy, human_permitted }
    }

    fn skip_reason(&self, execution_type: &ExecutionType) -> Option<&'static str> {
        if !self.policy.permits(execution_type) {
            return Some("not in available types");
        }
        if *execution_type == ExecutionType::Human && !self.human_permitted {
            return Some("human override not allowed");
        }
        None
    }
}

/// Runs steps through the configured strategy chain.
pub struct ExecutionManager {
    policy: Arc<RwLock<ExecutionPolicy>>,
    executors: Arc<RwLock<HashMap<ExecutionType, Arc<dyn Executor>>>>,
}

impl fmt::Debug for ExecutionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionManager")
            .field("executor_count", &self.executors.try_read().map(|e| e.len()).unwrap_or(0))
            .finish_non_exhaustive()
    }
}

impl ExecutionManager {
    /// Creates an engine with the given policy and no executors.
    #[must_use]
    pub fn new(policy: ExecutionPolicy) -> Self {
        Self {
            policy: Arc::new(RwLock::new(policy)),
            executors: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Registers the executor for a type, replacing any earlier one.
    pub async fn register_executor(&self, execution_type: ExecutionType, executor: Arc<dyn Executor>) {
        debug!(execution_type = %execution_type, executor = %executor.name(), "Registering executor");
        self.executors.write().await.insert(execution_type, executor);
    }

    /// Returns `true` if an executor is registered for the type.
    pub async fn has_executor(&self, execution_type: &ExecutionType) -> bool {
        self.executors.read().await.contains_key(execution_type)
    }

    /// Returns a copy of the live policy.
    pub async fn policy(&self) -> ExecutionPolicy {
        self.policy.read().await.clone()
    }

    /// Merges a partial update into the live policy. Steps already running keep their snapshot.
    ///
    /// # Errors
    /// Returns `Config` if the merged policy fails validation; the live policy is left as it was.
    pub async fn update_policy(&self, update: ExecutionPolicyUpdate) -> Result<ExecutionPolicy> {
        let mut policy = self.policy.write().await;
        let mut merged = policy.clone();
        merged.apply(update);
        if let Err(err) = merged.validate() {
            warn!(error = %err, "Rejected execution policy update");
            return Err(err);
        }
        *policy = merged;
        info!(
            chain = ?policy.default_chain,
            max_retries = policy.max_retries,
            timeout_ms = policy.execution_timeout.as_millis(),
            allow_human_override = policy.allow_human_override,
            "Execution policy updated"
        );
        Ok(policy.clone())
    }

    /// Executes a step's `method` through the strategy chain.
    ///
    /// # Arguments
    /// * `step` - Step name, passed through to executors and logs
    /// * `method` - Instructions for the executors
    /// * `inputs` - Effective step inputs
    ///
    /// # Returns
    /// The result of the first strategy that succeeded.
    ///
    /// # Errors
    /// Returns `RuntimeError::Execution` carrying the last failure reason and the full trail when
    /// every strategy failed or was skipped.
    pub async fn execute_step(
        &self,
        step: &str,
        method: &str,
        inputs: Map<String, Value>,
    ) -> Result<ExecutionResult> {
        let plan = ChainPlan::new(self.policy().await);
        let started = Instant::now();
        let timeout = plan.policy.execution_timeout;
        let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        let request = ExecutionRequest::new(step, method, inputs, timeout);

        let mut logs = Vec::new();
        let mut last_failure: Option<String> = None;
        let mut attempts = 0u32;

        for execution_type in &plan.policy.default_chain {
            if let Some(reason) = plan.skip_reason(execution_type) {
                debug!(step = %step, execution_type = %execution_type, reason = %reason, "Skipping execution type");
                logs.push(ExecutionLogEntry::new(
                    execution_type,
                    0,
                    AttemptOutcome::Skipped { reason: reason.to_string() },
                ));
                continue;
            }

            let executor = self.executors.read().await.get(execution_type).cloned();
            let Some(executor) = executor else {
                debug!(step = %step, execution_type = %execution_type, "No executor registered, skipping");
                logs.push(ExecutionLogEntry::new(
                    execution_type,
                    0,
                    AttemptOutcome::Skipped { reason: "no executor registered".to_string() },
                ));
                continue;
            };
            if plan.policy.attempts_per_type() == 0 {
                logs.push(ExecutionLogEntry::new(
                    execution_type,
                    0,
                    AttemptOutcome::Skipped { reason: "retry budget is zero".to_string() },
                ));
                continue;
            }

            for attempt in 1..=plan.policy.attempts_per_type() {
                attempts += 1;
                debug!(step = %step, execution_type = %execution_type, attempt, executor = %executor.name(), "Invoking executor");

                let outcome = match tokio::time::timeout(timeout, executor.execute(&request)).await {
                    Ok(Ok(output)) if output.success => {
                        logs.push(ExecutionLogEntry::new(execution_type, attempt, AttemptOutcome::Succeeded));
                        let duration_ms =
                            u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
                        info!(step = %step, execution_type = %execution_type, attempts, duration_ms, "Step executed");
                        let ExecutorOutput { outputs, logs: executor_logs, .. } = output;
                        return Ok(ExecutionResult {
                            execution_type: execution_type.clone(),
                            outputs,
                            logs,
                            executor_logs,
                            attempts,
                            duration_ms,
                        });
                    }
                    Ok(Ok(output)) => AttemptOutcome::Failed {
                        reason: output.error.unwrap_or_else(|| "Executor reported failure".to_string()),
                    },
                    Ok(Err(err)) => AttemptOutcome::Failed { reason: err.to_string() },
                    Err(_) => AttemptOutcome::TimedOut { after_ms: timeout_ms },
                };

                let reason = match &outcome {
                    AttemptOutcome::Failed { reason } => reason.clone(),
                    _ => format!("Execution timed out after {timeout_ms}ms"),
                };
                warn!(step = %step, execution_type = %execution_type, attempt, reason = %reason, "Execution attempt failed");
                logs.push(ExecutionLogEntry::new(execution_type, attempt, outcome));
                last_failure = Some(reason);
            }

            debug!(step = %step, execution_type = %execution_type, "Execution type exhausted, falling back");
        }

        let message = last_failure.unwrap_or_else(|| {
            format!("No execution strategy available for step '{step}'")
        });
        Err(RuntimeError::Execution { step: step.to_string(), message, logs })
    }
}

impl Default for ExecutionManager {
    fn default() -> Self {
        Self::new(ExecutionPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executors::{FnExecutor, ScriptedExecutor};
    use serde_json::json;
    use std::time::Duration;

    fn policy(chain: Vec<ExecutionType>, retries: u32) -> ExecutionPolicy {
        ExecutionPolicy {
            default_chain: chain,
            max_retries: retries,
            execution_timeout: Duration::from_millis(200),
            ..ExecutionPolicy::default()
        }
    }

    fn output(key: &str, value: Value) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert(key.to_string(), value);
        map
    }

    #[tokio::test]
    async fn test_fallback_to_ai() {
        let engine = ExecutionManager::new(policy(
            vec![ExecutionType::Algorithmic, ExecutionType::Ai, ExecutionType::Human],
            1,
        ));
        engine
            .register_executor(
                ExecutionType::Algorithmic,
                Arc::new(ScriptedExecutor::new("rules").fail("no rule matched")),
            )
            .await;
        engine
            .register_executor(
                ExecutionType::Ai,
                Arc::new(ScriptedExecutor::new("llm").succeed(output("score", json!(87)))),
            )
            .await;

        let result = engine.execute_step("qualify", "Score the lead", Map::new()).await.unwrap();
        assert_eq!(result.execution_type, ExecutionType::Ai);
        assert_eq!(result.outputs["score"], json!(87));
        assert!(result.fell_back());
        assert_eq!(result.logs.len(), 2);
        assert_eq!(result.logs[0].execution_type, ExecutionType::Algorithmic);
        assert_eq!(
            result.logs[0].outcome,
            AttemptOutcome::Failed { reason: "no rule matched".to_string() }
        );
    }

    #[tokio::test]
    async fn test_retries_before_fallback() {
        let engine = ExecutionManager::new(policy(vec![ExecutionType::Algorithmic], 3));
        let scripted = Arc::new(
            ScriptedExecutor::new("flaky").fail("first").fail("second").succeed(Map::new()),
        );
        engine.register_executor(ExecutionType::Algorithmic, scripted.clone()).await;

        let result = engine.execute_step("s", "m", Map::new()).await.unwrap();
        assert_eq!(result.attempts, 3);
        assert_eq!(scripted.call_count(), 3);
    }

    #[tokio::test]
    async fn test_zero_retry_budget_attempts_nothing() {
        // built directly, bypassing validation
        let engine = ExecutionManager::new(policy(vec![ExecutionType::Algorithmic], 0));
        let executor = Arc::new(ScriptedExecutor::new("ok").succeed(Map::new()));
        engine.register_executor(ExecutionType::Algorithmic, executor.clone()).await;

        let err = engine.execute_step("s", "m", Map::new()).await.unwrap_err();
        assert_eq!(executor.call_count(), 0);
        match err {
            RuntimeError::Execution { message, logs, .. } => {
                assert_eq!(message, "No execution strategy available for step 's'");
                assert!(matches!(&logs[0].outcome, AttemptOutcome::Skipped { reason } if reason == "retry budget is zero"));
            }
            other => panic!("Expected execution error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_timeout_counts_as_failure() {
        let engine = ExecutionManager::new(policy(vec![ExecutionType::Ai, ExecutionType::Human], 1));
        engine
            .register_executor(
                ExecutionType::Ai,
                Arc::new(
                    ScriptedExecutor::new("slow").delayed(Duration::from_secs(5)).succeed(Map::new()),
                ),
            )
            .await;
        engine
            .register_executor(
                ExecutionType::Human,
                Arc::new(ScriptedExecutor::new("person").succeed(Map::new())),
            )
            .await;

        let result = engine.execute_step("s", "m", Map::new()).await.unwrap();
        assert_eq!(result.execution_type, ExecutionType::Human);
        assert_eq!(result.logs[0].outcome, AttemptOutcome::TimedOut { after_ms: 200 });
    }

    #[tokio::test]
    async fn test_exhausted_chain_reports_last_failure_verbatim() {
        let engine = ExecutionManager::new(policy(vec![ExecutionType::Algorithmic, ExecutionType::Ai], 1));
        engine
            .register_executor(ExecutionType::Algorithmic, Arc::new(ScriptedExecutor::new("a").fail("rules failed")))
            .await;
        engine
            .register_executor(ExecutionType::Ai, Arc::new(ScriptedExecutor::new("b").fail("model refused")))
            .await;

        let err = engine.execute_step("s", "m", Map::new()).await.unwrap_err();
        assert_eq!(err.to_string(), "model refused");
        match err {
            RuntimeError::Execution { logs, step, .. } => {
                assert_eq!(step, "s");
                assert_eq!(logs.len(), 2);
                assert!(logs.iter().all(ExecutionLogEntry::is_failure));
            }
            other => panic!("Expected execution error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_executor_error_message_propagates() {
        let engine = ExecutionManager::new(policy(vec![ExecutionType::Algorithmic], 1));
        engine
            .register_executor(
                ExecutionType::Algorithmic,
                Arc::new(FnExecutor::new("crm", |_| Err(anyhow::anyhow!("CRM returned 503")))),
            )
            .await;
        let err = engine.execute_step("s", "m", Map::new()).await.unwrap_err();
        assert_eq!(err.to_string(), "CRM returned 503");
    }

    #[tokio::test]
    async fn test_human_skipped_without_override() {
        let mut p = policy(vec![ExecutionType::Ai, ExecutionType::Human], 1);
        p.allow_human_override = false;
        let engine = ExecutionManager::new(p);
        engine
            .register_executor(ExecutionType::Ai, Arc::new(ScriptedExecutor::new("llm").fail("unsure")))
            .await;
        let human = Arc::new(ScriptedExecutor::new("person").succeed(Map::new()));
        engine.register_executor(ExecutionType::Human, human.clone()).await;

        let err = engine.execute_step("s", "m", Map::new()).await.unwrap_err();
        assert_eq!(err.to_string(), "unsure");
        assert_eq!(human.call_count(), 0);
    }

    #[tokio::test]
    async fn test_human_only_permitted_type_runs_without_override() {
        let mut p = policy(vec![ExecutionType::Ai, ExecutionType::Human], 1);
        p.allow_human_override = false;
        p.available_types = vec![ExecutionType::Human];
        let engine = ExecutionManager::new(p);
        engine
            .register_executor(ExecutionType::Human, Arc::new(ScriptedExecutor::new("person").succeed(Map::new())))
            .await;

        let result = engine.execute_step("s", "m", Map::new()).await.unwrap();
        assert_eq!(result.execution_type, ExecutionType::Human);
        assert!(matches!(result.logs[0].outcome, AttemptOutcome::Skipped { .. }));
    }

    #[tokio::test]
    async fn test_nothing_attempted() {
        let engine = ExecutionManager::new(policy(vec![ExecutionType::Algorithmic], 1));
        let err = engine.execute_step("bake", "m", Map::new()).await.unwrap_err();
        assert_eq!(err.to_string(), "No execution strategy available for step 'bake'");
    }

    #[tokio::test]
    async fn test_update_policy_applies_to_next_step() {
        let engine = ExecutionManager::new(policy(vec![ExecutionType::Algorithmic], 1));
        engine
            .register_executor(ExecutionType::Ai, Arc::new(ScriptedExecutor::new("llm").succeed(Map::new())))
            .await;
        assert!(engine.execute_step("s", "m", Map::new()).await.is_err());

        engine
            .update_policy(ExecutionPolicyUpdate::default().default_chain(vec![ExecutionType::Ai]))
            .await
            .unwrap();
        assert!(engine.execute_step("s", "m", Map::new()).await.is_ok());
        assert!(engine.has_executor(&ExecutionType::Ai).await);
        assert!(!engine.has_executor(&ExecutionType::Human).await);
    }

    #[tokio::test]
    async fn test_invalid_update_leaves_policy_unchanged() {
        let engine = ExecutionManager::new(policy(vec![ExecutionType::Algorithmic], 2));
        let before = engine.policy().await;

        let err = engine
            .update_policy(
                ExecutionPolicyUpdate::default()
                    .default_chain(vec![ExecutionType::Ai])
                    .execution_timeout(Duration::ZERO),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::Config(_)));

        let err = engine.update_policy(ExecutionPolicyUpdate::default().max_retries(0)).await.unwrap_err();
        assert!(matches!(err, RuntimeError::Config(_)));
        assert_eq!(engine.policy().await, before);
    }

    #[tokio::test]
    async fn test_custom_type_dispatch() {
        let robot = ExecutionType::from("robot");
        let mut p = policy(vec![robot.clone()], 1);
        p.available_types.push(robot.clone());
        let engine = ExecutionManager::new(p);
        engine
            .register_executor(robot.clone(), Arc::new(ScriptedExecutor::new("arm").succeed(Map::new())))
            .await;
        let result = engine.execute_step("s", "m", Map::new()).await.unwrap();
        assert_eq!(result.execution_type, robot);
    }
}
