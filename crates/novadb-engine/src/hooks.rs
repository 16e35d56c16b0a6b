//! The augmentation hook collaborator (spec.md §6): `before`/`around`/
//! `after`/`replace` middleware around an operation, wired up as a single
//! onion of `(opName, params, next)` handlers ordered by priority. A hook
//! that never calls `next` realizes `replace`; one that calls it immediately
//! realizes `before`; one that calls it first and post-processes the result
//! realizes `after`; anything in between is `around` in the general sense.

use novadb_core::{NovaError, Result, Value};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
pub type NextFn = Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

#[async_trait::async_trait]
pub trait AugmentationHook: Send + Sync {
    fn name(&self) -> &str;

    /// Lower runs first (wraps closer to the terminal operation).
    fn priority(&self) -> i32 {
        0
    }

    async fn handle(&self, op: &str, params: Value, next: NextFn) -> Result<Value>;
}

/// Init-time hook for replacing the storage backend wholesale
/// (`provideStorage` in spec.md §6); the engine calls this once during
/// `init` before any entity/index machinery is constructed.
pub trait ProvideStorageHook: Send + Sync {
    fn provide(&self) -> Result<()>;
}

#[derive(Default)]
pub struct HookChain {
    hooks: Vec<Arc<dyn AugmentationHook>>,
}

impl HookChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, hook: Arc<dyn AugmentationHook>) {
        self.hooks.push(hook);
        self.hooks.sort_by_key(|h| h.priority());
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Runs `op` through every registered hook (lowest priority innermost),
    /// terminating in `terminal`. If no hooks are registered this collapses
    /// to a direct call, so the common unhooked path costs nothing extra.
    pub async fn run(
        &self,
        op: &str,
        params: Value,
        terminal: impl Fn(Value) -> BoxFuture<'static, Result<Value>> + Send + Sync + 'static,
    ) -> Result<Value> {
        if self.hooks.is_empty() {
            return terminal(params).await;
        }

        let op = op.to_string();
        let mut chain: NextFn = Arc::new(terminal);
        for hook in self.hooks.iter().rev() {
            let hook = hook.clone();
            let inner = chain.clone();
            let op_for_hook = op.clone();
            chain = Arc::new(move |p: Value| {
                let hook = hook.clone();
                let inner = inner.clone();
                let op_for_hook = op_for_hook.clone();
                Box::pin(async move { hook.handle(&op_for_hook, p, inner).await })
            });
        }
        chain(params).await
    }
}

/// Converts a serializable request/response into the `Value` envelope the
/// hook chain passes around.
pub fn to_envelope<T: serde::Serialize>(value: &T) -> Value {
    Value::from_json(serde_json::to_value(value).expect("envelope payload serializes"))
}

pub fn from_envelope<T: serde::de::DeserializeOwned>(value: Value) -> Result<T> {
    let bytes = serde_json::to_vec(&value).map_err(|e| NovaError::invalid_input(e.to_string()))?;
    serde_json::from_slice(&bytes).map_err(|e| NovaError::invalid_input(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingBeforeHook {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl AugmentationHook for CountingBeforeHook {
        fn name(&self) -> &str {
            "counting-before"
        }
        async fn handle(&self, _op: &str, params: Value, next: NextFn) -> Result<Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            next(params).await
        }
    }

    struct ReplaceHook;

    #[async_trait::async_trait]
    impl AugmentationHook for ReplaceHook {
        fn name(&self) -> &str {
            "replace"
        }
        fn priority(&self) -> i32 {
            -100
        }
        async fn handle(&self, _op: &str, _params: Value, _next: NextFn) -> Result<Value> {
            Ok(Value::Str("replaced".to_string()))
        }
    }

    #[tokio::test]
    async fn unhooked_chain_calls_terminal_directly() {
        let chain = HookChain::new();
        let result = chain
            .run("add", Value::Null, |_| Box::pin(async { Ok(Value::Bool(true)) }))
            .await
            .unwrap();
        assert_eq!(result, Value::Bool(true));
    }

    #[tokio::test]
    async fn before_hook_runs_then_calls_next() {
        let mut chain = HookChain::new();
        let calls = Arc::new(AtomicUsize::new(0));
        chain.register(Arc::new(CountingBeforeHook { calls: calls.clone() }));
        let result = chain
            .run("add", Value::Null, |_| Box::pin(async { Ok(Value::Bool(true)) }))
            .await
            .unwrap();
        assert_eq!(result, Value::Bool(true));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn replace_hook_skips_terminal_entirely() {
        let mut chain = HookChain::new();
        chain.register(Arc::new(ReplaceHook));
        let result = chain
            .run("add", Value::Null, |_| Box::pin(async { panic!("terminal must not run") }))
            .await
            .unwrap();
        assert_eq!(result, Value::Str("replaced".to_string()));
    }

    #[test]
    fn envelope_round_trips_through_value() {
        #[derive(serde::Serialize, serde::Deserialize, PartialEq, Debug)]
        struct Payload {
            name: String,
        }
        let payload = Payload { name: "alice".to_string() };
        let envelope = to_envelope(&payload);
        assert!(matches!(envelope, Value::Obj(ref m) if m.contains_key("name")));
        let back: Payload = from_envelope(envelope).unwrap();
        assert_eq!(back, payload);
    }
}
