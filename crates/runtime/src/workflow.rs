//! Named, registered workflow bodies.
//!
//! Task bodies travel through the queue as a [`WorkflowCall`]: the name of a
//! workflow registered on every worker plus its encoded input.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use nimbus_core::Payload;

use crate::context::ExecutionContext;
use crate::error::RuntimeError;

/// A workflow body. Returning `Err(RuntimeError::Cancelled(_))` ends the
/// task as cancelled; any other error is recorded as a fault.
#[async_trait]
pub trait Workflow: Send + Sync {
    async fn run(&self, ctx: ExecutionContext, input: Payload) -> Result<Payload, RuntimeError>;
}

/// Adapts an async closure into a [`Workflow`].
pub struct FnWorkflow<F> {
    f: F,
}

impl<F> FnWorkflow<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> Workflow for FnWorkflow<F>
where
    F: Fn(ExecutionContext, Payload) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Payload, RuntimeError>> + Send + 'static,
{
    async fn run(&self, ctx: ExecutionContext, input: Payload) -> Result<Payload, RuntimeError> {
        (self.f)(ctx, input).await
    }
}

/// Serializable reference to a workflow invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowCall {
    pub workflow: String,
    pub input: Payload,
}

impl WorkflowCall {
    /// Encode `input` and pair it with the workflow name.
    pub fn new<T: Serialize + ?Sized>(workflow: impl Into<String>, input: &T) -> Result<Self, RuntimeError> {
        Ok(Self {
            workflow: workflow.into(),
            input: Payload::encode(input)?,
        })
    }

    pub fn raw(workflow: impl Into<String>, input: Payload) -> Self {
        Self {
            workflow: workflow.into(),
            input,
        }
    }
}

/// Workflows known to this process, by name.
#[derive(Default, Clone)]
pub struct WorkflowRegistry {
    workflows: HashMap<String, Arc<dyn Workflow>>,
}

impl WorkflowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, workflow: Arc<dyn Workflow>) -> &mut Self {
        self.workflows.insert(name.into(), workflow);
        self
    }

    /// Register an async closure working on raw payloads.
    pub fn register_fn<F, Fut>(&mut self, name: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn(ExecutionContext, Payload) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Payload, RuntimeError>> + Send + 'static,
    {
        self.register(name, Arc::new(FnWorkflow::new(f)))
    }

    /// Register an async closure with typed input and output; encoding is
    /// handled here.
    pub fn register_typed<I, O, F, Fut>(&mut self, name: impl Into<String>, f: F) -> &mut Self
    where
        I: DeserializeOwned + Send + 'static,
        O: Serialize + Send + 'static,
        F: Fn(ExecutionContext, I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O, RuntimeError>> + Send + 'static,
    {
        let f = Arc::new(f);
        self.register_fn(name, move |ctx, input| {
            let f = f.clone();
            async move {
                let input: I = input.decode()?;
                let output = f(ctx, input).await?;
                Ok(Payload::encode(&output)?)
            }
        })
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Workflow>> {
        self.workflows.get(name).cloned()
    }

    pub fn resolve(&self, call: &WorkflowCall) -> Result<Arc<dyn Workflow>, RuntimeError> {
        self.get(&call.workflow)
            .ok_or_else(|| RuntimeError::UnknownWorkflow(call.workflow.clone()))
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.workflows.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.workflows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workflows.is_empty()
    }
}
