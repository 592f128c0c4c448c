//! Wiring of the tutorial flow.

use std::sync::Arc;

use tutorflow_core::{batch::Batched, error::Result, flow::Flow};

use crate::{
    collab::{CachedReasoner, ContentFetcher, FileEmitter, PromptBuilder},
    config::TutorialConfig,
    nodes::{
        AnalyzeRelationships, CombineTutorial, FetchRepo, IdentifyAbstractions, OrderChapters,
        WriteChapters,
    },
};

/// The collaborators the pipeline nodes call out to.
#[derive(Clone)]
pub struct Collaborators {
    pub fetcher: Arc<dyn ContentFetcher>,
    pub prompts: Arc<dyn PromptBuilder>,
    pub reasoner: Arc<CachedReasoner>,
    pub emitter: Arc<dyn FileEmitter>,
}

/// Build `FetchRepo -> IdentifyAbstractions -> AnalyzeRelationships ->
/// OrderChapters -> WriteChapters -> CombineTutorial`.
///
/// The reasoning steps use the configured retry policy; chapters are written
/// `config.concurrency` at a time.
pub fn create_tutorial_flow(config: &TutorialConfig, collaborators: Collaborators) -> Result<Flow> {
    let policy = config.retry_policy();
    let Collaborators {
        fetcher,
        prompts,
        reasoner,
        emitter,
    } = collaborators;

    let mut builder = Flow::builder();
    builder.name("tutorial");

    let fetch = builder.node(FetchRepo::new(fetcher));
    let identify = builder.node(
        IdentifyAbstractions::new(prompts.clone(), reasoner.clone()).with_retry(policy),
    );
    let analyze = builder.node(
        AnalyzeRelationships::new(prompts.clone(), reasoner.clone()).with_retry(policy),
    );
    let order = builder
        .node(OrderChapters::new(prompts.clone(), reasoner.clone()).with_retry(policy));
    let write = builder.step(
        Batched::new(WriteChapters::new(prompts, reasoner).with_retry(policy))
            .with_concurrency(config.concurrency),
    );
    let combine = builder.node(CombineTutorial::new(emitter));

    builder.start(fetch);
    builder.chain(&[fetch, identify, analyze, order, write, combine])?;
    builder.build()
}
