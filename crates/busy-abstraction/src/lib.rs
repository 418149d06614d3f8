//! Executor abstraction layer for the BUSY runtime.
//!
//! This module defines the core traits and types the runtime uses to hand a step's work to an
//! execution strategy (deterministic code, AI inference, a human task, ...).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Represents an error that can occur when an executor runs a step.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutorError {
    /// The executor ran the work and it failed.
    #[error("{0}")]
    Failed(String),

    /// The executor gave up waiting (e.g. a human task nobody picked up).
    #[error("Executor timed out after {0}ms")]
    Timeout(u64),

    /// The executor cannot serve requests right now (missing credentials, offline backend).
    #[error("Executor unavailable: {0}")]
    Unavailable(String),

    /// Other unexpected errors.
    #[error("Executor error: {0}")]
    Other(String),
}

impl From<anyhow::Error> for ExecutorError {
    fn from(err: anyhow::Error) -> Self {
        Self::Failed(format!("{err:#}"))
    }
}

/// An execution strategy kind.
///
/// The three well-known strategies have dedicated variants; any other name configured in the
/// policy's available types is carried as `Custom`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ExecutionType {
    /// Deterministic code.
    Algorithmic,
    /// AI inference.
    Ai,
    /// A task routed to a person.
    Human,
    /// Any other registered strategy.
    Custom(String),
}

impl ExecutionType {
    /// Returns the canonical lowercase name of this type.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Algorithmic => "algorithmic",
            Self::Ai => "ai",
            Self::Human => "human",
            Self::Custom(name) => name,
        }
    }
}

impl fmt::Display for ExecutionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for ExecutionType {
    fn from(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "algorithmic" => Self::Algorithmic,
            "ai" => Self::Ai,
            "human" => Self::Human,
            _ => Self::Custom(value.trim().to_string()),
        }
    }
}

impl From<String> for ExecutionType {
    fn from(value: String) -> Self {
        Self::from(value.as_str())
    }
}

impl From<ExecutionType> for String {
    fn from(value: ExecutionType) -> Self {
        value.as_str().to_string()
    }
}

/// A single request handed to an executor.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    /// Name of the step being executed.
    pub step: String,
    /// Free-text instructions for the step.
    pub method: String,
    /// Effective inputs of the step.
    pub inputs: Map<String, Value>,
    /// Time budget for this attempt.
    pub timeout: Duration,
}

impl ExecutionRequest {
    /// Creates a new execution request.
    #[must_use]
    pub fn new(
        step: impl Into<String>,
        method: impl Into<String>,
        inputs: Map<String, Value>,
        timeout: Duration,
    ) -> Self {
        Self { step: step.into(), method: method.into(), inputs, timeout }
    }
}

/// What an executor reports back for one attempt.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutorOutput {
    /// Whether the work succeeded.
    pub success: bool,
    /// Named outputs produced by the work.
    #[serde(default)]
    pub outputs: Map<String, Value>,
    /// Free-form log lines from the executor.
    #[serde(default)]
    pub logs: Vec<String>,
    /// Failure reason when `success` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutorOutput {
    /// Creates a successful output.
    #[must_use]
    pub fn success(outputs: Map<String, Value>) -> Self {
        Self { success: true, outputs, logs: Vec::new(), error: None }
    }

    /// Creates a failed output with the given reason.
    #[must_use]
    pub fn failure(reason: impl Into<String>) -> Self {
        Self { success: false, outputs: Map::new(), logs: Vec::new(), error: Some(reason.into()) }
    }

    /// Appends a log line.
    #[must_use]
    pub fn with_log(mut self, line: impl Into<String>) -> Self {
        self.logs.push(line.into());
        self
    }
}

/// A trait for running a step's work with one execution strategy.
///
/// All executors must be `Send + Sync` so one instance can serve concurrent playbooks.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Runs the step described by `request`.
    ///
    /// # Errors
    /// Returns an `ExecutorError` if the executor could not run the work at all. A run that
    /// completed but did not succeed is reported as `Ok` with `success == false`.
    async fn execute(&self, request: &ExecutionRequest) -> Result<ExecutorOutput, ExecutorError>;

    /// Returns a short name identifying the executor in logs.
    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_type_round_trip_names() {
        assert_eq!(ExecutionType::from("algorithmic"), ExecutionType::Algorithmic);
        assert_eq!(ExecutionType::from("AI"), ExecutionType::Ai);
        assert_eq!(ExecutionType::from(" human "), ExecutionType::Human);
        assert_eq!(ExecutionType::from("robotic"), ExecutionType::Custom("robotic".to_string()));
        assert_eq!(ExecutionType::Custom("robotic".to_string()).to_string(), "robotic");
    }

    #[test]
    fn test_execution_type_serde_as_string() {
        let json = serde_json::to_string(&vec![ExecutionType::Algorithmic, ExecutionType::Ai])
            .unwrap();
        assert_eq!(json, r#"["algorithmic","ai"]"#);

        let parsed: Vec<ExecutionType> = serde_json::from_str(r#"["human","batch"]"#).unwrap();
        assert_eq!(parsed, vec![ExecutionType::Human, ExecutionType::Custom("batch".to_string())]);
    }

    #[test]
    fn test_executor_output_constructors() {
        let ok = ExecutorOutput::success(Map::new()).with_log("done");
        assert!(ok.success);
        assert_eq!(ok.logs, vec!["done".to_string()]);
        assert!(ok.error.is_none());

        let failed = ExecutorOutput::failure("no rule matched");
        assert!(!failed.success);
        assert_eq!(failed.error.as_deref(), Some("no rule matched"));
    }

    #[test]
    fn test_executor_error_from_anyhow() {
        let err: ExecutorError = anyhow::anyhow!("ledger locked").context("posting invoice").into();
        assert_eq!(err, ExecutorError::Failed("posting invoice: ledger locked".to_string()));
        assert_eq!(ExecutorError::Timeout(250).to_string(), "Executor timed out after 250ms");
    }

    struct Upper;

    #[async_trait]
    impl Executor for Upper {
        async fn execute(
            &self,
            request: &ExecutionRequest,
        ) -> Result<ExecutorOutput, ExecutorError> {
            let mut outputs = Map::new();
            outputs.insert("method".to_string(), Value::String(request.method.to_uppercase()));
            Ok(ExecutorOutput::success(outputs))
        }

        fn name(&self) -> &str {
            "upper"
        }
    }

    #[tokio::test]
    async fn test_executor_trait_object() {
        let executor: Box<dyn Executor> = Box::new(Upper);
        let request =
            ExecutionRequest::new("greet", "say hello", Map::new(), Duration::from_secs(1));
        let output = executor.execute(&request).await.unwrap();
        assert_eq!(output.outputs["method"], Value::String("SAY HELLO".to_string()));
        assert_eq!(executor.name(), "upper");
    }
}
