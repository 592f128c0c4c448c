//! Node abstraction: the prepare / execute / finalize lifecycle.

use async_trait::async_trait;
use tracing::debug;

use crate::{
    action::Action,
    context::Context,
    error::{FlowError, Result},
    retry::{RetryPolicy, VisitPhase, execute_with_retry},
};

/// Trait for workflow nodes.
///
/// A visit runs `prepare` once, `execute` up to `retry_policy().max_retries()`
/// times, `execute_fallback` once if every attempt failed, and `finalize`
/// once. Only `finalize` receives the context mutably, so a retried
/// `execute` can never have written half a result into shared state.
#[async_trait]
pub trait Node: Send + Sync {
    /// Value computed from the context for `execute`.
    type Prepared: Send + Sync;
    /// Result of `execute`, handed to `finalize`.
    type Output: Send;

    /// Read what `execute` needs from the context.
    ///
    /// Errors here are treated as configuration errors and are not retried.
    async fn prepare(&self, context: &Context) -> Result<Self::Prepared>;

    /// Perform the node's main work. Errors are retried.
    async fn execute(&self, prepared: &Self::Prepared) -> Result<Self::Output>;

    /// Called with the last error once every attempt failed.
    ///
    /// The default re-raises, which aborts the flow. Override it to return a
    /// degraded result and let the flow continue.
    async fn execute_fallback(
        &self,
        prepared: &Self::Prepared,
        error: FlowError,
    ) -> Result<Self::Output> {
        let _ = prepared;
        Err(error)
    }

    /// Write the output into the context and pick the outcome label.
    ///
    /// `None` selects the default transition.
    async fn finalize(
        &self,
        context: &mut Context,
        prepared: Self::Prepared,
        output: Self::Output,
    ) -> Result<Option<Action>>;

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default()
    }

    /// Get the name of this node for debugging/logging.
    fn name(&self) -> String {
        short_type_name::<Self>()
    }
}

/// A type-erased, schedulable unit of a flow.
///
/// Nodes, batch nodes and whole flows all become steps, so the flow only
/// ever drives one interface.
#[async_trait]
pub trait Step: Send + Sync {
    /// Run one full visit against the context and report the outcome.
    async fn visit(&self, context: &mut Context) -> Result<Action>;

    fn name(&self) -> String;
}

/// Single-item execution strategy for a [`Node`].
pub struct Single<N: Node> {
    node: N,
    policy: RetryPolicy,
}

impl<N: Node> Single<N> {
    /// Wrap a node using its own retry policy.
    pub fn new(node: N) -> Self {
        let policy = node.retry_policy();
        Self { node, policy }
    }

    /// Override the node's retry policy.
    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn inner(&self) -> &N {
        &self.node
    }
}

#[async_trait]
impl<N: Node> Step for Single<N> {
    async fn visit(&self, context: &mut Context) -> Result<Action> {
        let name = self.node.name();

        let prepared = self
            .node
            .prepare(context)
            .await
            .map_err(|e| FlowError::prepare(&name, e))?;
        debug!(node = %name, phase = %VisitPhase::Prepared);

        let node = &self.node;
        let prepared_ref = &prepared;
        let output = execute_with_retry(
            &name,
            &self.policy,
            move |_| node.execute(prepared_ref),
            move |error| node.execute_fallback(prepared_ref, error),
        )
        .await?;

        let action = self
            .node
            .finalize(context, prepared, output)
            .await
            .map_err(|e| FlowError::finalize(&name, e))?
            .unwrap_or_default();
        debug!(node = %name, phase = %VisitPhase::Finalized, %action);

        Ok(action)
    }

    fn name(&self) -> String {
        self.node.name()
    }
}

type PrepareFn<P> = Box<dyn Fn(&Context) -> Result<P> + Send + Sync>;
type ExecuteFn<P, O> = Box<dyn Fn(&P) -> Result<O> + Send + Sync>;
type FallbackFn<P, O> = Box<dyn Fn(&P, FlowError) -> Result<O> + Send + Sync>;
type FinalizeFn<P, O> = Box<dyn Fn(&mut Context, P, O) -> Result<Option<Action>> + Send + Sync>;

/// A node assembled from synchronous closures.
pub struct FnNode<P, O> {
    name: String,
    prepare: PrepareFn<P>,
    execute: ExecuteFn<P, O>,
    fallback: Option<FallbackFn<P, O>>,
    finalize: FinalizeFn<P, O>,
    policy: RetryPolicy,
}

impl<P, O> FnNode<P, O>
where
    P: Send + Sync + 'static,
    O: Send + 'static,
{
    pub fn new<Prep, Exec, Fin>(
        name: impl Into<String>,
        prepare: Prep,
        execute: Exec,
        finalize: Fin,
    ) -> Self
    where
        Prep: Fn(&Context) -> Result<P> + Send + Sync + 'static,
        Exec: Fn(&P) -> Result<O> + Send + Sync + 'static,
        Fin: Fn(&mut Context, P, O) -> Result<Option<Action>> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            prepare: Box::new(prepare),
            execute: Box::new(execute),
            fallback: None,
            finalize: Box::new(finalize),
            policy: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_fallback<F>(mut self, fallback: F) -> Self
    where
        F: Fn(&P, FlowError) -> Result<O> + Send + Sync + 'static,
    {
        self.fallback = Some(Box::new(fallback));
        self
    }
}

#[async_trait]
impl<P, O> Node for FnNode<P, O>
where
    P: Send + Sync + 'static,
    O: Send + 'static,
{
    type Prepared = P;
    type Output = O;

    async fn prepare(&self, context: &Context) -> Result<P> {
        (self.prepare)(context)
    }

    async fn execute(&self, prepared: &P) -> Result<O> {
        (self.execute)(prepared)
    }

    async fn execute_fallback(&self, prepared: &P, error: FlowError) -> Result<O> {
        match &self.fallback {
            Some(fallback) => fallback(prepared, error),
            None => Err(error),
        }
    }

    async fn finalize(
        &self,
        context: &mut Context,
        prepared: P,
        output: O,
    ) -> Result<Option<Action>> {
        (self.finalize)(context, prepared, output)
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.policy
    }

    fn name(&self) -> String {
        self.name.clone()
    }
}

/// Helper functions for creating common node types.
pub mod helpers {
    use super::*;

    /// A node that only writes `value` under `key` and moves on.
    pub fn set_value(
        name: impl Into<String>,
        key: impl Into<String>,
        value: serde_json::Value,
    ) -> FnNode<(), ()> {
        let key = key.into();
        FnNode::new(
            name,
            |_| Ok(()),
            |_| Ok(()),
            move |ctx, _, _| {
                ctx.set(key.clone(), &value)?;
                Ok(None)
            },
        )
    }

    /// A node that reports `label` when `condition` holds and `otherwise` if not.
    pub fn branch<F>(
        name: impl Into<String>,
        condition: F,
        label: impl Into<Action>,
        otherwise: impl Into<Action>,
    ) -> FnNode<bool, ()>
    where
        F: Fn(&Context) -> bool + Send + Sync + 'static,
    {
        let label = label.into();
        let otherwise = otherwise.into();
        FnNode::new(
            name,
            move |ctx| Ok(condition(ctx)),
            |_| Ok(()),
            move |_, taken, _| {
                Ok(Some(if taken {
                    label.clone()
                } else {
                    otherwise.clone()
                }))
            },
        )
    }
}

pub(crate) fn short_type_name<T: ?Sized>() -> String {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base).to_string()
}
