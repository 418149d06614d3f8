//! Built-in executors.
//!
//! Real AI and human-task executors live outside the runtime. These cover deterministic code,
//! pass-through, and scripted behavior for tests and dry runs.

use async_trait::async_trait;
use busy_abstraction::{ExecutionRequest, Executor, ExecutorError, ExecutorOutput};
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tracing::debug;

/// Returns the step inputs unchanged as outputs.
#[derive(Debug, Clone, Default)]
pub struct EchoExecutor;

impl EchoExecutor {
    /// Creates an echo executor.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Executor for EchoExecutor {
    async fn execute(&self, request: &ExecutionRequest) -> Result<ExecutorOutput, ExecutorError> {
        Ok(ExecutorOutput::success(request.inputs.clone())
            .with_log(format!("echoed {} input(s) for step {}", request.inputs.len(), request.step)))
    }

    fn name(&self) -> &str {
        "echo"
    }
}

type StepFn = dyn Fn(&ExecutionRequest) -> anyhow::Result<Map<String, Value>> + Send + Sync;

/// Runs a deterministic function; the natural `algorithmic` strategy.
pub struct FnExecutor {
    name: String,
    func: Box<StepFn>,
}

impl fmt::Debug for FnExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnExecutor").field("name", &self.name).finish_non_exhaustive()
    }
}

impl FnExecutor {
    /// Wraps a function. An `Err` from the function becomes a failed attempt.
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&ExecutionRequest) -> anyhow::Result<Map<String, Value>> + Send + Sync + 'static,
    {
        Self { name: name.into(), func: Box::new(func) }
    }
}

#[async_trait]
impl Executor for FnExecutor {
    async fn execute(&self, request: &ExecutionRequest) -> Result<ExecutorOutput, ExecutorError> {
        let outputs = (self.func)(request)?;
        Ok(ExecutorOutput::success(outputs))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// A scripted response.
#[derive(Debug, Clone)]
enum Scripted {
    Succeed(Map<String, Value>),
    Fail(String),
    Error(ExecutorError),
}

/// Replays a queue of scripted responses.
///
/// Each call pops the next response; once the queue is down to one entry that entry repeats.
/// An empty script fails every call.
#[derive(Debug)]
pub struct ScriptedExecutor {
    name: String,
    script: Mutex<VecDeque<Scripted>>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    received: Mutex<Vec<Map<String, Value>>>,
}

impl ScriptedExecutor {
    /// Creates an executor with an empty script.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            script: Mutex::new(VecDeque::new()),
            delay: None,
            calls: AtomicUsize::new(0),
            received: Mutex::new(Vec::new()),
        }
    }

    /// Queues a success with the given outputs.
    #[must_use]
    pub fn succeed(self, outputs: Map<String, Value>) -> Self {
        self.push(Scripted::Succeed(outputs))
    }

    /// Queues a reported failure (`success == false`).
    #[must_use]
    pub fn fail(self, reason: impl Into<String>) -> Self {
        self.push(Scripted::Fail(reason.into()))
    }

    /// Queues an executor error.
    #[must_use]
    pub fn error(self, error: ExecutorError) -> Self {
        self.push(Scripted::Error(error))
    }

    /// Sleeps before every response.
    #[must_use]
    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of calls so far.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Inputs of every call, in call order.
    #[must_use]
    pub fn received_inputs(&self) -> Vec<Map<String, Value>> {
        self.received.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn push(self, entry: Scripted) -> Self {
        self.script.lock().unwrap_or_else(PoisonError::into_inner).push_back(entry);
        self
    }

    fn next_response(&self) -> Option<Scripted> {
        let mut script = self.script.lock().unwrap_or_else(PoisonError::into_inner);
        if script.len() > 1 { script.pop_front() } else { script.front().cloned() }
    }
}

#[async_trait]
impl Executor for ScriptedExecutor {
    async fn execute(&self, request: &ExecutionRequest) -> Result<ExecutorOutput, ExecutorError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.received
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.inputs.clone());
        debug!(executor = %self.name, step = %request.step, call, "Scripted executor called");

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match self.next_response() {
            Some(Scripted::Succeed(outputs)) => Ok(ExecutorOutput::success(outputs)),
            Some(Scripted::Fail(reason)) => Ok(ExecutorOutput::failure(reason)),
            Some(Scripted::Error(error)) => Err(error),
            None => Err(ExecutorError::Unavailable(format!("{} has no scripted response", self.name))),
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}
