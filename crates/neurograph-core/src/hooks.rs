//! Mutation interceptors and read rewriters.
//!
//! Two hook points wrap the store: a pre-mutation interceptor that may rewrite
//! or reject the parameters, and a post-read rewriter that may reshape
//! results. Hooks run in priority order (highest first). A hook that fails is
//! logged and skipped; a user operation never fails because an optional hook
//! did.

use crate::MetadataValue;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationOp {
    Add,
    Update,
    Delete,
    Relate,
    Unrelate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReadOp {
    Get,
    Find,
    Similar,
    GetRelations,
}

/// Outcome of a pre-mutation interceptor.
pub enum HookDecision {
    /// Proceed with (possibly rewritten) parameters.
    Continue(MetadataValue),
    /// Reject the mutation with a reason, surfaced as `InvalidArgument`.
    Reject(String),
}

#[async_trait]
pub trait MutationInterceptor: Send + Sync {
    fn name(&self) -> &str;

    fn priority(&self) -> i32 {
        0
    }

    async fn before_mutation(
        &self,
        op: MutationOp,
        params: MetadataValue,
    ) -> crate::Result<HookDecision>;
}

#[async_trait]
pub trait ReadRewriter: Send + Sync {
    fn name(&self) -> &str;

    fn priority(&self) -> i32 {
        0
    }

    async fn after_read(&self, op: ReadOp, results: MetadataValue) -> crate::Result<MetadataValue>;
}

#[derive(Default)]
pub struct HookRegistry {
    interceptors: RwLock<Vec<Arc<dyn MutationInterceptor>>>,
    rewriters: RwLock<Vec<Arc<dyn ReadRewriter>>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_interceptor(&self, hook: Arc<dyn MutationInterceptor>) {
        let mut hooks = self.interceptors.write();
        hooks.push(hook);
        hooks.sort_by_key(|h| std::cmp::Reverse(h.priority()));
    }

    pub fn register_rewriter(&self, hook: Arc<dyn ReadRewriter>) {
        let mut hooks = self.rewriters.write();
        hooks.push(hook);
        hooks.sort_by_key(|h| std::cmp::Reverse(h.priority()));
    }

    /// Runs every interceptor over `params`. Returns the rewritten parameters,
    /// or the rejection reason of the first interceptor that vetoes.
    pub async fn run_interceptors(
        &self,
        op: MutationOp,
        mut params: MetadataValue,
    ) -> std::result::Result<MetadataValue, String> {
        let hooks: Vec<_> = self.interceptors.read().clone();
        for hook in hooks {
            match hook.before_mutation(op, params.clone()).await {
                Ok(HookDecision::Continue(next)) => params = next,
                Ok(HookDecision::Reject(reason)) => return Err(reason),
                Err(e) => {
                    warn!(hook = hook.name(), error = %e, "mutation interceptor failed, skipping");
                }
            }
        }
        Ok(params)
    }

    /// Runs every rewriter over `results`. Failures skip the hook.
    pub async fn run_rewriters(&self, op: ReadOp, mut results: MetadataValue) -> MetadataValue {
        let hooks: Vec<_> = self.rewriters.read().clone();
        for hook in hooks {
            match hook.after_read(op, results.clone()).await {
                Ok(next) => results = next,
                Err(e) => {
                    warn!(hook = hook.name(), error = %e, "read rewriter failed, skipping");
                }
            }
        }
        results
    }

    pub fn is_empty(&self) -> bool {
        self.interceptors.read().is_empty() && self.rewriters.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Stamp(i32);

    #[async_trait]
    impl MutationInterceptor for Stamp {
        fn name(&self) -> &str {
            "stamp"
        }

        fn priority(&self) -> i32 {
            self.0
        }

        async fn before_mutation(
            &self,
            _op: MutationOp,
            mut params: MetadataValue,
        ) -> crate::Result<HookDecision> {
            if let Some(obj) = params.as_object_mut() {
                obj.insert("order".into(), json!(self.0));
            }
            Ok(HookDecision::Continue(params))
        }
    }

    struct Failing;

    #[async_trait]
    impl MutationInterceptor for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        async fn before_mutation(
            &self,
            _op: MutationOp,
            _params: MetadataValue,
        ) -> crate::Result<HookDecision> {
            Err(crate::NeuroGraphError::Internal("boom".into()))
        }
    }

    #[tokio::test]
    async fn interceptors_run_in_priority_order() {
        let registry = HookRegistry::new();
        registry.register_interceptor(Arc::new(Stamp(1)));
        registry.register_interceptor(Arc::new(Stamp(9)));
        let out = registry
            .run_interceptors(MutationOp::Add, json!({}))
            .await
            .unwrap();
        // Highest priority runs first; the last writer wins.
        assert_eq!(out["order"], json!(1));
    }

    #[tokio::test]
    async fn failing_hook_is_skipped() {
        let registry = HookRegistry::new();
        registry.register_interceptor(Arc::new(Failing));
        registry.register_interceptor(Arc::new(Stamp(0)));
        let out = registry
            .run_interceptors(MutationOp::Update, json!({}))
            .await
            .unwrap();
        assert_eq!(out["order"], json!(0));
    }
}
