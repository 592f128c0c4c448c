//! Batch nodes: one execute per prepared item, aggregated in finalize.

use async_trait::async_trait;
use futures::{StreamExt, future::BoxFuture, stream};
use tracing::{debug, warn};

use crate::{
    action::Action,
    context::Context,
    error::{FlowError, Result},
    node::{Step, short_type_name},
    retry::{RetryPolicy, VisitPhase, execute_with_retry},
};

/// A node whose prepare phase yields a list of independent items.
///
/// Every item gets its own retry loop and fallback. `finalize` receives the
/// outputs in the same order as the items, regardless of how many items ran
/// at the same time.
#[async_trait]
pub trait BatchNode: Send + Sync {
    type Item: Send + Sync;
    type Output: Send;

    async fn prepare(&self, context: &Context) -> Result<Vec<Self::Item>>;

    async fn execute(&self, item: &Self::Item) -> Result<Self::Output>;

    /// Supplies the output of an item whose attempts all failed.
    /// The default re-raises.
    async fn execute_fallback(&self, item: &Self::Item, error: FlowError) -> Result<Self::Output> {
        let _ = item;
        Err(error)
    }

    async fn finalize(
        &self,
        context: &mut Context,
        items: Vec<Self::Item>,
        outputs: Vec<Self::Output>,
    ) -> Result<Option<Action>>;

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default()
    }

    fn name(&self) -> String {
        short_type_name::<Self>()
    }
}

/// Fan-out execution strategy for a [`BatchNode`].
pub struct Batched<B: BatchNode> {
    node: B,
    policy: RetryPolicy,
    concurrency: usize,
}

impl<B: BatchNode> Batched<B> {
    /// Wrap a batch node; items run one after another.
    pub fn new(node: B) -> Self {
        let policy = node.retry_policy();
        Self {
            node,
            policy,
            concurrency: 1,
        }
    }

    /// Override the per-item retry policy.
    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Run up to `limit` items at once. Output order is unaffected.
    pub fn with_concurrency(mut self, limit: usize) -> Self {
        self.concurrency = limit.max(1);
        self
    }

    pub fn inner(&self) -> &B {
        &self.node
    }
}

#[async_trait]
impl<B: BatchNode> Step for Batched<B> {
    async fn visit(&self, context: &mut Context) -> Result<Action> {
        let name = self.node.name();

        let items = self
            .node
            .prepare(context)
            .await
            .map_err(|e| FlowError::prepare(&name, e))?;
        debug!(
            node = %name,
            items = items.len(),
            concurrency = self.concurrency,
            phase = %VisitPhase::Prepared
        );

        let node = &self.node;
        let policy = &self.policy;

        let mut pending: Vec<BoxFuture<'_, Result<B::Output>>> = Vec::with_capacity(items.len());
        for (index, item) in items.iter().enumerate() {
            let label = format!("{name}[{index}]");
            pending.push(Box::pin(async move {
                let result = execute_with_retry(
                    &label,
                    policy,
                    move |_| node.execute(item),
                    move |error| node.execute_fallback(item, error),
                )
                .await;
                if let Err(error) = &result {
                    warn!(node = %label, %error, "batch item failed");
                }
                result
            }));
        }

        // Every item is attempted before any error is reported.
        let results: Vec<Result<B::Output>> = stream::iter(pending)
            .buffered(self.concurrency)
            .collect()
            .await;

        let outputs = results.into_iter().collect::<Result<Vec<_>>>()?;

        let action = self
            .node
            .finalize(context, items, outputs)
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

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            Arc, Mutex,
            atomic::{AtomicUsize, Ordering},
        },
        time::Duration,
    };

    use pretty_assertions::assert_eq;

    use super::*;

    /// Uppercases every item listed under `items`.
    #[derive(Default)]
    struct Upper {
        calls: Arc<AtomicUsize>,
        seen: Arc<Mutex<Vec<String>>>,
        fail_on: Option<String>,
        recover: bool,
    }

    #[async_trait]
    impl BatchNode for Upper {
        type Item = String;
        type Output = String;

        async fn prepare(&self, context: &Context) -> Result<Vec<String>> {
            Ok(context.get("items")?.unwrap_or_default())
        }

        async fn execute(&self, item: &String) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            // Earlier items sleep longer so concurrent runs finish out of order.
            let delay = match item.as_str() {
                "x" => 30,
                "y" => 15,
                _ => 1,
            };
            tokio::time::sleep(Duration::from_millis(delay)).await;
            self.seen.lock().unwrap().push(item.clone());

            if self.fail_on.as_deref() == Some(item.as_str()) {
                return Err(FlowError::execution(format!("cannot process {item}")));
            }
            Ok(item.to_uppercase())
        }

        async fn execute_fallback(&self, item: &String, error: FlowError) -> Result<String> {
            if self.recover {
                Ok(format!("<{item} unavailable>"))
            } else {
                Err(error)
            }
        }

        async fn finalize(
            &self,
            context: &mut Context,
            _items: Vec<String>,
            outputs: Vec<String>,
        ) -> Result<Option<Action>> {
            context.set("results", outputs)?;
            Ok(None)
        }
    }

    fn items_context() -> Context {
        let mut context = Context::new();
        context.set("items", vec!["x", "y", "z"]).unwrap();
        context
    }

    #[tokio::test]
    async fn results_follow_item_order() {
        let mut context = items_context();

        Batched::new(Upper::default())
            .visit(&mut context)
            .await
            .unwrap();

        assert_eq!(
            context.get::<Vec<String>>("results").unwrap(),
            Some(vec!["X".to_string(), "Y".to_string(), "Z".to_string()])
        );
    }

    #[tokio::test]
    async fn concurrent_items_keep_order() {
        let node = Upper::default();
        let seen = node.seen.clone();
        let mut context = items_context();

        Batched::new(node)
            .with_concurrency(3)
            .visit(&mut context)
            .await
            .unwrap();

        // Completion order differs from item order...
        assert_eq!(seen.lock().unwrap().first().map(String::as_str), Some("z"));
        // ...but finalize still sees item order.
        assert_eq!(
            context.get::<Vec<String>>("results").unwrap(),
            Some(vec!["X".to_string(), "Y".to_string(), "Z".to_string()])
        );
    }

    #[tokio::test]
    async fn batch_visit_runs_on_a_spawned_task() {
        let results = tokio::spawn(async {
            let mut context = items_context();
            Batched::new(Upper::default())
                .with_concurrency(2)
                .visit(&mut context)
                .await
                .unwrap();
            context.get::<Vec<String>>("results").unwrap()
        })
        .await
        .unwrap();

        assert_eq!(
            results,
            Some(vec!["X".to_string(), "Y".to_string(), "Z".to_string()])
        );
    }

    #[tokio::test]
    async fn failed_item_does_not_stop_siblings() {
        let node = Upper {
            fail_on: Some("x".to_string()),
            ..Upper::default()
        };
        let calls = node.calls.clone();
        let mut context = items_context();

        let err = Batched::new(node)
            .with_retry(RetryPolicy::new(2, Duration::ZERO))
            .visit(&mut context)
            .await
            .unwrap_err();

        // x twice, y and z once each.
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        match err {
            FlowError::Exhausted { node, attempts, .. } => {
                assert_eq!(node, "Upper[0]");
                assert_eq!(attempts, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!context.contains("results"));
    }

    #[tokio::test]
    async fn item_fallback_fills_its_slot() {
        let node = Upper {
            fail_on: Some("y".to_string()),
            recover: true,
            ..Upper::default()
        };
        let calls = node.calls.clone();
        let mut context = items_context();

        Batched::new(node).visit(&mut context).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            context.get::<Vec<String>>("results").unwrap(),
            Some(vec![
                "X".to_string(),
                "<y unavailable>".to_string(),
                "Z".to_string()
            ])
        );
    }

    #[tokio::test]
    async fn empty_batch_still_finalizes() {
        let mut context = Context::new();

        Batched::new(Upper::default())
            .visit(&mut context)
            .await
            .unwrap();

        assert_eq!(
            context.get::<Vec<String>>("results").unwrap(),
            Some(Vec::new())
        );
    }
}
