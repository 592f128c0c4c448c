//! # tutorflow-core
//!
//! A small, embeddable engine that runs named processing steps over one shared
//! context, branches on each step's outcome label, retries unreliable work and
//! fans out batches of independent items.
//!
//! ## Core Concepts
//!
//! - **Context**: key/value state shared by every node of a run
//! - **Node**: `prepare` / `execute` / `finalize` lifecycle with retry and fallback
//! - **BatchNode**: `execute` applied to every prepared item, results kept in order
//! - **Flow**: graph of nodes joined by outcome-labelled transitions
//!
//! ## Quick Start
//!
//! ```rust
//! use tutorflow_core::prelude::*;
//!
//! # tokio_test::block_on(async {
//! let greet = FnNode::new(
//!     "greet",
//!     |ctx: &Context| ctx.require::<String>("name"),
//!     |name: &String| Ok(format!("hello, {name}")),
//!     |ctx, _, greeting: String| {
//!         ctx.set("greeting", greeting)?;
//!         Ok(None)
//!     },
//! );
//!
//! let mut builder = Flow::builder();
//! let start = builder.node(greet);
//! builder.start(start);
//! let flow = builder.build()?;
//!
//! let mut context = ContextBuilder::new().with("name", "flow")?.build();
//! flow.run(&mut context).await?;
//! assert_eq!(context.get::<String>("greeting")?, Some("hello, flow".to_string()));
//! # Ok::<(), FlowError>(())
//! # }).unwrap();
//! ```

pub mod action;
pub mod batch;
pub mod context;
pub mod error;
pub mod flow;
pub mod node;
pub mod retry;

/// Convenient re-exports for common use.
pub mod prelude {
    pub use async_trait::async_trait;
    pub use eyre;
    pub use serde::{Deserialize, Serialize};
    pub use tokio;

    pub use crate::{
        action::Action,
        batch::{BatchNode, Batched},
        context::{Context, ContextBuilder},
        error::{FlowError, Result},
        flow::{ExecutionStep, Flow, FlowBuilder, FlowReport, NodeId, Routing},
        node::{FnNode, Node, Single, Step, helpers},
        retry::{RetryPolicy, VisitPhase},
    };
}
