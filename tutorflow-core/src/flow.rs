//! Flow orchestration: a graph of steps joined by action-labelled transitions.

use std::{
    collections::{HashMap, hash_map::Entry},
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    action::Action,
    batch::{BatchNode, Batched},
    context::Context,
    error::{FlowError, Result},
    node::{Node, Single, Step},
};

/// Handle of a step inside a [`FlowBuilder`] / [`Flow`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// A registered step together with its labelled outgoing transitions.
struct Slot {
    step: Arc<dyn Step>,
    successors: HashMap<Action, NodeId>,
}

/// How a label without an exact successor is resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Routing {
    /// Only an exact label match continues the run.
    #[default]
    Exact,
    /// Use the `"default"` successor when the label has none of its own.
    DefaultFallback,
}

/// One visit recorded by [`Flow::run_traced`].
#[derive(Debug, Clone)]
pub struct ExecutionStep {
    pub step_number: usize,
    pub node_name: String,
    pub action: Action,
    pub duration: Duration,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Summary of a traced run.
#[derive(Debug, Clone)]
pub struct FlowReport {
    pub run_id: Uuid,
    /// Outcome of the last visited node, `None` if nothing ran.
    pub last_action: Option<Action>,
    pub steps: usize,
    pub duration: Duration,
    pub trace: Vec<ExecutionStep>,
}

/// Workflow execution engine.
///
/// Starting at the start node, each visit yields an [`Action`]; the flow
/// follows the successor registered for that exact label and stops when
/// there is none. Under [`Routing::DefaultFallback`] an unmatched label
/// follows the `"default"` successor instead. Cycles are allowed
/// and not detected unless [`FlowBuilder::max_steps`] is set.
pub struct Flow {
    name: String,
    slots: Vec<Slot>,
    start: Option<NodeId>,
    max_steps: Option<usize>,
    routing: Routing,
}

impl Flow {
    /// Create a new flow builder.
    pub fn builder() -> FlowBuilder {
        FlowBuilder::new()
    }

    /// Run the flow to completion against `context`.
    ///
    /// Returns the last outcome label, or `None` when the flow has no start
    /// node. A fatal node error is returned as-is; whatever earlier nodes
    /// finalized stays in the context.
    pub async fn run(&self, context: &mut Context) -> Result<Option<Action>> {
        let (last_action, _) = self.drive(context, None).await?;
        Ok(last_action)
    }

    /// Like [`Flow::run`], additionally recording every visit.
    pub async fn run_traced(&self, context: &mut Context) -> Result<FlowReport> {
        let run_id = Uuid::new_v4();
        let started = Instant::now();
        let mut trace = Vec::new();

        info!(flow = %self.name, %run_id, "starting traced run");
        let (last_action, steps) = self.drive(context, Some(&mut trace)).await?;

        Ok(FlowReport {
            run_id,
            last_action,
            steps,
            duration: started.elapsed(),
            trace,
        })
    }

    async fn drive(
        &self,
        context: &mut Context,
        mut trace: Option<&mut Vec<ExecutionStep>>,
    ) -> Result<(Option<Action>, usize)> {
        let mut current = self.start;
        let mut last_action = None;
        let mut steps = 0;

        while let Some(id) = current {
            steps += 1;
            if let Some(max) = self.max_steps {
                if steps > max {
                    return Err(FlowError::MaxStepsExceeded(max));
                }
            }

            let slot = &self.slots[id.0];
            let node_name = slot.step.name();
            info!(flow = %self.name, node = %node_name, step = steps, "visiting node");
            #[cfg(feature = "metrics")]
            metrics::counter!("tutorflow_node_visits_total", "node" => node_name.clone())
                .increment(1);

            let step_started = Instant::now();
            let action = slot.step.visit(context).await?;

            if let Some(trace) = trace.as_deref_mut() {
                trace.push(ExecutionStep {
                    step_number: steps,
                    node_name: node_name.clone(),
                    action: action.clone(),
                    duration: step_started.elapsed(),
                    timestamp: chrono::Utc::now(),
                });
            }

            current = self.successor(id, &action);
            if current.is_none() && !slot.successors.is_empty() {
                warn!(
                    flow = %self.name,
                    node = %node_name,
                    %action,
                    expected = ?slot.successors.keys().map(Action::as_str).collect::<Vec<_>>(),
                    "no successor for action, flow ends"
                );
            }
            debug!(
                flow = %self.name,
                node = %node_name,
                %action,
                next = ?current.map(|next| self.slots[next.0].step.name()),
                "transition"
            );
            last_action = Some(action);
        }

        Ok((last_action, steps))
    }

    fn successor(&self, id: NodeId, action: &Action) -> Option<NodeId> {
        let successors = &self.slots[id.0].successors;
        match (successors.get(action.as_str()), self.routing) {
            (Some(next), _) => Some(*next),
            (None, Routing::DefaultFallback) => successors.get(Action::DEFAULT).copied(),
            (None, Routing::Exact) => None,
        }
    }

    /// Get the flow name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn start(&self) -> Option<NodeId> {
        self.start
    }

    /// Number of steps in the graph.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// A flow nested inside another flow behaves like a single node whose
/// outcome is the inner flow's last action.
#[async_trait]
impl Step for Flow {
    async fn visit(&self, context: &mut Context) -> Result<Action> {
        Ok(self.run(context).await?.unwrap_or_default())
    }

    fn name(&self) -> String {
        self.name.clone()
    }
}

/// Builder for [`Flow`].
///
/// Steps are added first and then wired by [`NodeId`], so one step may be the
/// target of several predecessors and cycles can be expressed.
pub struct FlowBuilder {
    slots: Vec<Slot>,
    start: Option<NodeId>,
    name: String,
    max_steps: Option<usize>,
    allow_overwrite: bool,
    routing: Routing,
}

impl FlowBuilder {
    /// Create a new flow builder.
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            start: None,
            name: "flow".to_string(),
            max_steps: None,
            allow_overwrite: false,
            routing: Routing::default(),
        }
    }

    /// Set the flow name.
    pub fn name(&mut self, name: impl Into<String>) -> &mut Self {
        self.name = name.into();
        self
    }

    /// Fail the run once more than `max_steps` visits happened.
    pub fn max_steps(&mut self, max_steps: usize) -> &mut Self {
        self.max_steps = Some(max_steps);
        self
    }

    /// Choose how unmatched labels are resolved.
    pub fn routing(&mut self, routing: Routing) -> &mut Self {
        self.routing = routing;
        self
    }

    /// Let a later registration for an already wired label replace the
    /// earlier one instead of failing.
    pub fn allow_overwrite(&mut self) -> &mut Self {
        self.allow_overwrite = true;
        self
    }

    /// Add a node with its own retry policy.
    pub fn node<N: Node + 'static>(&mut self, node: N) -> NodeId {
        self.step(Single::new(node))
    }

    /// Add a batch node that runs its items sequentially.
    pub fn batch<B: BatchNode + 'static>(&mut self, node: B) -> NodeId {
        self.step(Batched::new(node))
    }

    /// Add any step: a configured [`Single`], a [`Batched`] or a nested [`Flow`].
    pub fn step(&mut self, step: impl Step + 'static) -> NodeId {
        self.shared_step(Arc::new(step))
    }

    pub fn shared_step(&mut self, step: Arc<dyn Step>) -> NodeId {
        let id = NodeId(self.slots.len());
        self.slots.push(Slot {
            step,
            successors: HashMap::new(),
        });
        id
    }

    /// Set the start node.
    pub fn start(&mut self, id: NodeId) -> &mut Self {
        self.start = Some(id);
        self
    }

    /// Wire the default transition `from -> to`. Returns `to` for chaining.
    pub fn then(&mut self, from: NodeId, to: NodeId) -> Result<NodeId> {
        self.connect(from, Action::default(), to)
    }

    /// Start a labelled transition out of `from`.
    pub fn on(&mut self, from: NodeId, action: impl Into<Action>) -> Transition<'_> {
        Transition {
            builder: self,
            from,
            action: action.into(),
        }
    }

    /// Wire default transitions through `ids` in order.
    pub fn chain(&mut self, ids: &[NodeId]) -> Result<()> {
        for pair in ids.windows(2) {
            self.then(pair[0], pair[1])?;
        }
        Ok(())
    }

    fn connect(&mut self, from: NodeId, action: Action, to: NodeId) -> Result<NodeId> {
        self.check(from)?;
        self.check(to)?;

        let allow_overwrite = self.allow_overwrite;
        let slot = &mut self.slots[from.0];
        match slot.successors.entry(action) {
            Entry::Vacant(entry) => {
                entry.insert(to);
            }
            Entry::Occupied(mut entry) => {
                if !allow_overwrite {
                    return Err(FlowError::DuplicateTransition {
                        node: slot.step.name(),
                        action: entry.key().to_string(),
                    });
                }
                warn!(
                    node = %slot.step.name(),
                    action = %entry.key(),
                    "overwriting existing transition"
                );
                entry.insert(to);
            }
        }
        Ok(to)
    }

    fn check(&self, id: NodeId) -> Result<()> {
        if id.0 < self.slots.len() {
            Ok(())
        } else {
            Err(FlowError::construction(format!(
                "unknown node id {} (builder has {} nodes)",
                id.0,
                self.slots.len()
            )))
        }
    }

    /// Build the flow.
    ///
    /// A flow without nodes is valid and does nothing; a flow with nodes needs
    /// a start node.
    pub fn build(self) -> Result<Flow> {
        if let Some(start) = self.start {
            self.check(start)?;
        } else if !self.slots.is_empty() {
            return Err(FlowError::construction("Start node not set"));
        }

        Ok(Flow {
            name: self.name,
            slots: self.slots,
            start: self.start,
            max_steps: self.max_steps,
            routing: self.routing,
        })
    }
}

impl Default for FlowBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Pending labelled transition created by [`FlowBuilder::on`].
pub struct Transition<'a> {
    builder: &'a mut FlowBuilder,
    from: NodeId,
    action: Action,
}

impl Transition<'_> {
    /// Wire `from --(action)--> to`. Returns `to`.
    pub fn then(self, to: NodeId) -> Result<NodeId> {
        self.builder.connect(self.from, self.action, to)
    }
}
