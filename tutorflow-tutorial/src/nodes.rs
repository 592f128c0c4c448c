//! Concrete nodes of the tutorial pipeline.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use tutorflow_core::prelude::*;

use crate::{
    collab::{
        Abstraction, CachedReasoner, ContentFetcher, FetchRequest, FileEmitter, OutputFile,
        ProjectAnalysis, PromptBuilder, SourceFile, parse_abstractions, parse_chapter_order,
        parse_relationships,
    },
    config::keys,
    error::TutorialError,
};

/// A written chapter, stored under `chapters` in chapter order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chapter {
    pub number: usize,
    pub name: String,
    pub content: String,
}

impl Chapter {
    pub fn file_name(&self) -> String {
        format!("{:02}_{}.md", self.number, slug(&self.name))
    }
}

fn slug(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_alphanumeric() {
            out.extend(c.to_lowercase());
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }
    let trimmed = out.trim_matches('_');
    if trimmed.is_empty() {
        "chapter".to_string()
    } else {
        trimmed.to_string()
    }
}

fn project_name(context: &Context) -> Result<String> {
    context.require(keys::PROJECT_NAME)
}

fn use_cache(context: &Context) -> Result<bool> {
    Ok(context.get(keys::USE_CACHE)?.unwrap_or(true))
}

fn language(context: &Context) -> Result<String> {
    Ok(context
        .get(keys::LANGUAGE)?
        .unwrap_or_else(|| "english".to_string()))
}

/// Name a project after its directory, resolving `.` and similar.
fn derive_project_name(dir: &Path) -> String {
    dir.file_name()
        .map(ToOwned::to_owned)
        .or_else(|| {
            std::fs::canonicalize(dir)
                .ok()
                .and_then(|p| p.file_name().map(ToOwned::to_owned))
        })
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "project".to_string())
}

/// Collects the source files of the local directory.
pub struct FetchRepo {
    fetcher: Arc<dyn ContentFetcher>,
}

impl FetchRepo {
    pub fn new(fetcher: Arc<dyn ContentFetcher>) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl Node for FetchRepo {
    type Prepared = (FetchRequest, String);
    type Output = Vec<SourceFile>;

    async fn prepare(&self, context: &Context) -> Result<Self::Prepared> {
        let root: PathBuf = context.require(keys::LOCAL_DIR)?;
        let project = match context.get::<String>(keys::PROJECT_NAME)? {
            Some(name) => name,
            None => derive_project_name(&root),
        };
        let request = FetchRequest {
            include: context.get(keys::INCLUDE_PATTERNS)?.unwrap_or_default(),
            exclude: context.get(keys::EXCLUDE_PATTERNS)?.unwrap_or_default(),
            max_file_size: context.get(keys::MAX_FILE_SIZE)?.unwrap_or(100_000),
            root,
        };
        Ok((request, project))
    }

    async fn execute(&self, prepared: &Self::Prepared) -> Result<Vec<SourceFile>> {
        let (request, _) = prepared;
        info!(dir = %request.root.display(), "crawling directory");
        let files = self.fetcher.fetch(request).await?;
        if files.is_empty() {
            return Err(TutorialError::NoFiles(request.root.display().to_string()).into());
        }
        Ok(files)
    }

    async fn finalize(
        &self,
        context: &mut Context,
        prepared: Self::Prepared,
        files: Vec<SourceFile>,
    ) -> Result<Option<Action>> {
        let (_, project) = prepared;
        info!(project = %project, files = files.len(), "fetched files");
        context.set(keys::PROJECT_NAME, project)?;
        context.set(keys::FILES, files)?;
        Ok(None)
    }
}

pub struct AbstractionsRequest {
    prompt: String,
    use_cache: bool,
}

/// Asks the reasoning service for the core abstractions of the codebase.
pub struct IdentifyAbstractions {
    prompts: Arc<dyn PromptBuilder>,
    reasoner: Arc<CachedReasoner>,
    policy: RetryPolicy,
}

impl IdentifyAbstractions {
    pub fn new(prompts: Arc<dyn PromptBuilder>, reasoner: Arc<CachedReasoner>) -> Self {
        Self {
            prompts,
            reasoner,
            policy: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }
}

#[async_trait]
impl Node for IdentifyAbstractions {
    type Prepared = AbstractionsRequest;
    type Output = Vec<Abstraction>;

    async fn prepare(&self, context: &Context) -> Result<AbstractionsRequest> {
        let files: Vec<SourceFile> = context.require(keys::FILES)?;
        let project = project_name(context)?;
        let prompt = self
            .prompts
            .abstractions_prompt(&project, &files, &language(context)?);
        Ok(AbstractionsRequest {
            prompt,
            use_cache: use_cache(context)?,
        })
    }

    async fn execute(&self, request: &AbstractionsRequest) -> Result<Vec<Abstraction>> {
        info!("identifying abstractions");
        let abstractions = self
            .reasoner
            .submit_validated(&request.prompt, request.use_cache, parse_abstractions)
            .await?;
        Ok(abstractions)
    }

    async fn finalize(
        &self,
        context: &mut Context,
        _request: AbstractionsRequest,
        abstractions: Vec<Abstraction>,
    ) -> Result<Option<Action>> {
        info!(count = abstractions.len(), "identified abstractions");
        context.set(keys::ABSTRACTIONS, abstractions)?;
        Ok(None)
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.policy
    }
}

/// A prompt over the identified abstractions, answered by index.
pub struct AnalysisRequest {
    prompt: String,
    use_cache: bool,
    count: usize,
}

/// Asks how the abstractions relate and for a short project summary.
pub struct AnalyzeRelationships {
    prompts: Arc<dyn PromptBuilder>,
    reasoner: Arc<CachedReasoner>,
    policy: RetryPolicy,
}

impl AnalyzeRelationships {
    pub fn new(prompts: Arc<dyn PromptBuilder>, reasoner: Arc<CachedReasoner>) -> Self {
        Self {
            prompts,
            reasoner,
            policy: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }
}

#[async_trait]
impl Node for AnalyzeRelationships {
    type Prepared = AnalysisRequest;
    type Output = ProjectAnalysis;

    async fn prepare(&self, context: &Context) -> Result<AnalysisRequest> {
        let abstractions: Vec<Abstraction> = context.require(keys::ABSTRACTIONS)?;
        let project = project_name(context)?;
        let prompt = self
            .prompts
            .relationships_prompt(&project, &abstractions, &language(context)?);
        Ok(AnalysisRequest {
            prompt,
            use_cache: use_cache(context)?,
            count: abstractions.len(),
        })
    }

    async fn execute(&self, request: &AnalysisRequest) -> Result<ProjectAnalysis> {
        info!("analyzing relationships");
        let count = request.count;
        let analysis = self
            .reasoner
            .submit_validated(&request.prompt, request.use_cache, move |response: &str| {
                parse_relationships(response, count)
            })
            .await?;
        Ok(analysis)
    }

    async fn finalize(
        &self,
        context: &mut Context,
        _request: AnalysisRequest,
        analysis: ProjectAnalysis,
    ) -> Result<Option<Action>> {
        info!(relationships = analysis.relationships.len(), "analyzed relationships");
        context.set(keys::RELATIONSHIPS, analysis)?;
        Ok(None)
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.policy
    }
}

/// Asks for the teaching order of the abstractions.
///
/// Stores `chapter_order` as abstraction indices; an answer that is not a
/// permutation of all indices is rejected and retried.
pub struct OrderChapters {
    prompts: Arc<dyn PromptBuilder>,
    reasoner: Arc<CachedReasoner>,
    policy: RetryPolicy,
}

impl OrderChapters {
    pub fn new(prompts: Arc<dyn PromptBuilder>, reasoner: Arc<CachedReasoner>) -> Self {
        Self {
            prompts,
            reasoner,
            policy: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }
}

#[async_trait]
impl Node for OrderChapters {
    type Prepared = AnalysisRequest;
    type Output = Vec<usize>;

    async fn prepare(&self, context: &Context) -> Result<AnalysisRequest> {
        let abstractions: Vec<Abstraction> = context.require(keys::ABSTRACTIONS)?;
        let analysis: ProjectAnalysis = context.require(keys::RELATIONSHIPS)?;
        let project = project_name(context)?;
        let prompt = self.prompts.order_prompt(&project, &abstractions, &analysis);
        Ok(AnalysisRequest {
            prompt,
            use_cache: use_cache(context)?,
            count: abstractions.len(),
        })
    }

    async fn execute(&self, request: &AnalysisRequest) -> Result<Vec<usize>> {
        info!("ordering chapters");
        let count = request.count;
        let order = self
            .reasoner
            .submit_validated(&request.prompt, request.use_cache, move |response: &str| {
                parse_chapter_order(response, count)
            })
            .await?;
        Ok(order)
    }

    async fn finalize(
        &self,
        context: &mut Context,
        _request: AnalysisRequest,
        order: Vec<usize>,
    ) -> Result<Option<Action>> {
        info!(?order, "ordered chapters");
        context.set(keys::CHAPTER_ORDER, order)?;
        Ok(None)
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.policy
    }
}

pub struct ChapterJob {
    number: usize,
    abstraction: Abstraction,
    prompt: String,
    use_cache: bool,
}

/// Writes one chapter per abstraction, following `chapter_order`.
///
/// A chapter that cannot be generated after every retry is replaced by a
/// placeholder, so the rest of the tutorial is still produced.
pub struct WriteChapters {
    prompts: Arc<dyn PromptBuilder>,
    reasoner: Arc<CachedReasoner>,
    policy: RetryPolicy,
}

impl WriteChapters {
    pub fn new(prompts: Arc<dyn PromptBuilder>, reasoner: Arc<CachedReasoner>) -> Self {
        Self {
            prompts,
            reasoner,
            policy: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }
}

fn non_empty(response: &str) -> crate::error::Result<String> {
    let trimmed = response.trim();
    if trimmed.is_empty() {
        return Err(TutorialError::parse("empty chapter"));
    }
    Ok(trimmed.to_string())
}

#[async_trait]
impl BatchNode for WriteChapters {
    type Item = ChapterJob;
    type Output = String;

    async fn prepare(&self, context: &Context) -> Result<Vec<ChapterJob>> {
        let abstractions: Vec<Abstraction> = context.require(keys::ABSTRACTIONS)?;
        let order: Vec<usize> = context.require(keys::CHAPTER_ORDER)?;
        let project = project_name(context)?;
        let language = language(context)?;
        let use_cache = use_cache(context)?;

        order
            .into_iter()
            .enumerate()
            .map(|(position, index)| -> Result<ChapterJob> {
                let abstraction = abstractions.get(index).cloned().ok_or_else(|| {
                    FlowError::context(format!(
                        "chapter order names abstraction {index}, only {} known",
                        abstractions.len()
                    ))
                })?;
                let number = position + 1;
                let prompt = self
                    .prompts
                    .chapter_prompt(&project, &abstraction, number, &language);
                Ok(ChapterJob {
                    number,
                    abstraction,
                    prompt,
                    use_cache,
                })
            })
            .collect()
    }

    async fn execute(&self, job: &ChapterJob) -> Result<String> {
        info!(chapter = job.number, name = %job.abstraction.name, "writing chapter");
        let content = self
            .reasoner
            .submit_validated(&job.prompt, job.use_cache, non_empty)
            .await?;
        Ok(content)
    }

    async fn execute_fallback(&self, job: &ChapterJob, error: FlowError) -> Result<String> {
        warn!(chapter = job.number, %error, "using placeholder chapter");
        Ok(format!(
            "# Chapter {}: {}\n\n{}\n\n> This chapter could not be generated: {error}\n",
            job.number, job.abstraction.name, job.abstraction.description
        ))
    }

    async fn finalize(
        &self,
        context: &mut Context,
        jobs: Vec<ChapterJob>,
        contents: Vec<String>,
    ) -> Result<Option<Action>> {
        let chapters: Vec<Chapter> = jobs
            .into_iter()
            .zip(contents)
            .map(|(job, content)| Chapter {
                number: job.number,
                name: job.abstraction.name,
                content,
            })
            .collect();
        info!(count = chapters.len(), "wrote chapters");
        context.set(keys::CHAPTERS, chapters)?;
        Ok(None)
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.policy
    }
}

pub struct RenderedTutorial {
    dir: PathBuf,
    files: Vec<OutputFile>,
}

/// Renders `index.md` and the chapter files and emits them to
/// `output_dir/project_name`.
pub struct CombineTutorial {
    emitter: Arc<dyn FileEmitter>,
}

impl CombineTutorial {
    pub fn new(emitter: Arc<dyn FileEmitter>) -> Self {
        Self { emitter }
    }
}

fn mermaid_label(text: &str) -> String {
    text.replace('"', "'")
}

fn render_index(
    project: &str,
    analysis: &ProjectAnalysis,
    abstractions: &[Abstraction],
    chapters: &[Chapter],
) -> String {
    let mut index = format!("# Tutorial: {project}\n\n");
    if !analysis.summary.is_empty() {
        index.push_str(&format!("{}\n\n", analysis.summary));
    }

    if !analysis.relationships.is_empty() {
        index.push_str("```mermaid\nflowchart TD\n");
        for (i, abstraction) in abstractions.iter().enumerate() {
            index.push_str(&format!("    A{i}[\"{}\"]\n", mermaid_label(&abstraction.name)));
        }
        for relationship in &analysis.relationships {
            index.push_str(&format!(
                "    A{} -- \"{}\" --> A{}\n",
                relationship.from,
                mermaid_label(&relationship.label),
                relationship.to
            ));
        }
        index.push_str("```\n\n");
    }

    index.push_str("## Chapters\n\n");
    for chapter in chapters {
        index.push_str(&format!(
            "{}. [{}]({})\n",
            chapter.number,
            chapter.name,
            chapter.file_name()
        ));
    }

    let name = |i: usize| abstractions.get(i).map(|a| a.name.as_str()).unwrap_or("?");
    if !analysis.relationships.is_empty() {
        index.push_str("\n## Relationships\n\n");
        for relationship in &analysis.relationships {
            index.push_str(&format!(
                "- **{}** -> **{}**: {}\n",
                name(relationship.from),
                name(relationship.to),
                relationship.label
            ));
        }
    }
    index
}

#[async_trait]
impl Node for CombineTutorial {
    type Prepared = RenderedTutorial;
    type Output = PathBuf;

    async fn prepare(&self, context: &Context) -> Result<RenderedTutorial> {
        let project = project_name(context)?;
        let output_dir: PathBuf = context
            .get(keys::OUTPUT_DIR)?
            .unwrap_or_else(|| PathBuf::from("output"));
        let abstractions: Vec<Abstraction> =
            context.get(keys::ABSTRACTIONS)?.unwrap_or_default();
        let analysis: ProjectAnalysis = context.get(keys::RELATIONSHIPS)?.unwrap_or_default();
        let chapters: Vec<Chapter> = context.require(keys::CHAPTERS)?;

        let mut files = Vec::with_capacity(chapters.len() + 1);
        files.push(OutputFile {
            path: "index.md".to_string(),
            content: render_index(&project, &analysis, &abstractions, &chapters),
        });
        files.extend(chapters.iter().map(|chapter| OutputFile {
            path: chapter.file_name(),
            content: chapter.content.clone(),
        }));

        Ok(RenderedTutorial {
            dir: output_dir.join(&project),
            files,
        })
    }

    async fn execute(&self, rendered: &RenderedTutorial) -> Result<PathBuf> {
        Ok(self.emitter.emit(&rendered.dir, &rendered.files).await?)
    }

    async fn finalize(
        &self,
        context: &mut Context,
        rendered: RenderedTutorial,
        dir: PathBuf,
    ) -> Result<Option<Action>> {
        info!(dir = %dir.display(), files = rendered.files.len(), "tutorial complete");
        context.set(keys::FINAL_OUTPUT_DIR, dir)?;
        Ok(None)
    }
}
