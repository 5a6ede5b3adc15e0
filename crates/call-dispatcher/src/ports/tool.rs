//! Tool handler port.

use async_trait::async_trait;
use serde_json::Value;
use std::future::Future;
use std::marker::PhantomData;
use thiserror::Error;

/// Error raised by a tool.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ToolError {
    /// Arguments did not match what the tool expects.
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    /// The tool ran and failed.
    #[error("{0}")]
    Failed(String),
}

/// Something the dispatcher can execute by name.
///
/// Handlers receive the request's `args` and either return a JSON result or
/// raise a [`ToolError`]. They never touch dispatcher state.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, args: Value) -> Result<Value, ToolError>;

    /// One-line description shown in tool listings.
    fn description(&self) -> &str {
        ""
    }
}

/// Adapts an async closure into a [`ToolHandler`].
pub struct FnTool<F, Fut> {
    f: F,
    description: String,
    _future: PhantomData<fn() -> Fut>,
}

impl<F, Fut> FnTool<F, Fut>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, ToolError>> + Send + 'static,
{
    pub fn new(f: F) -> Self {
        Self {
            f,
            description: String::new(),
            _future: PhantomData,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

#[async_trait]
impl<F, Fut> ToolHandler for FnTool<F, Fut>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, ToolError>> + Send + 'static,
{
    async fn call(&self, args: Value) -> Result<Value, ToolError> {
        (self.f)(args).await
    }

    fn description(&self) -> &str {
        &self.description
    }
}
