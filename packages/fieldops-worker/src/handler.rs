//! Handler dispatch table. A handler is the implementation of a tool's
//! business logic, resolved by `domain.method` (§4.3.d). The worker never
//! reaches through to arbitrary datastore capabilities on a handler's
//! behalf — everything a handler can observe or touch comes through
//! `HandlerContext`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fieldops_core::{Contract, Outcome};
use uuid::Uuid;

use crate::db::DomainDb;

/// Narrow context passed into every handler invocation. Carries identity
/// (which call, which worker, which contract), the deadline the handler is
/// expected to respect, and the one datastore port handlers are allowed to
/// reach — deliberately does not expose the queue or receipt store.
#[derive(Clone)]
pub struct HandlerContext {
    pub call_id: Uuid,
    pub worker_id: String,
    pub contract: Arc<Contract>,
    pub timeout: Duration,
    pub db: DomainDb,
}

#[async_trait]
pub trait Handler: Send + Sync {
    async fn invoke(&self, input: serde_json::Value, ctx: HandlerContext) -> Outcome;
}

#[async_trait]
impl<F, Fut> Handler for F
where
    F: Fn(serde_json::Value, HandlerContext) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Outcome> + Send,
{
    async fn invoke(&self, input: serde_json::Value, ctx: HandlerContext) -> Outcome {
        (self)(input, ctx).await
    }
}

/// Maps `(domain, method)` to a handler implementation. Built once at
/// daemon/CLI startup and shared read-only across worker tasks, mirroring
/// how `Registry` is immutable after load.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<(String, String), Arc<dyn Handler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        domain: impl Into<String>,
        method: impl Into<String>,
        handler: Arc<dyn Handler>,
    ) {
        self.handlers.insert((domain.into(), method.into()), handler);
    }

    /// Derive the `(domain, method)` dispatch key from a tool name the same
    /// way the contract does: `domain = parts[0]`, `method =
    /// join(parts[1:], '_')` so `os.create_task` dispatches to
    /// `("os", "create_task")` and a hypothetical `a.b.c` dispatches to
    /// `("a", "b_c")`.
    pub fn dispatch_key(tool_name: &str) -> Option<(String, String)> {
        let mut parts = tool_name.split('.');
        let domain = parts.next()?;
        let rest: Vec<&str> = parts.collect();
        if rest.is_empty() {
            return None;
        }
        Some((domain.to_string(), rest.join("_")))
    }

    pub fn get(&self, tool_name: &str) -> Option<Arc<dyn Handler>> {
        let key = Self::dispatch_key(tool_name)?;
        self.handlers.get(&key).cloned()
    }
}
