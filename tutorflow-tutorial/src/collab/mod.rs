//! Swappable collaborators used by the pipeline nodes.
//!
//! Nodes only see these traits, so tests and alternative backends plug in
//! without touching the flow.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub mod emit;
pub mod fetch;
pub mod llm;
pub mod prompt;

pub use emit::FsEmitter;
pub use fetch::LocalDirFetcher;
pub use llm::{CachedReasoner, HttpReasoningClient, LlmSettings};
pub use prompt::{
    Abstraction, DefaultPrompts, ProjectAnalysis, Relationship, parse_abstractions,
    parse_chapter_order, parse_relationships,
};

/// A fetched source file, path relative to the fetched root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFile {
    pub path: String,
    pub content: String,
}

/// What to fetch and which files to keep.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FetchRequest {
    pub root: PathBuf,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub max_file_size: u64,
}

/// One rendered artifact, path relative to the output directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputFile {
    pub path: String,
    pub content: String,
}

#[async_trait]
pub trait ContentFetcher: Send + Sync {
    async fn fetch(&self, request: &FetchRequest) -> Result<Vec<SourceFile>>;
}

pub trait PromptBuilder: Send + Sync {
    fn abstractions_prompt(&self, project: &str, files: &[SourceFile], language: &str) -> String;

    fn relationships_prompt(
        &self,
        project: &str,
        abstractions: &[Abstraction],
        language: &str,
    ) -> String;

    fn order_prompt(
        &self,
        project: &str,
        abstractions: &[Abstraction],
        analysis: &ProjectAnalysis,
    ) -> String;

    fn chapter_prompt(
        &self,
        project: &str,
        abstraction: &Abstraction,
        chapter_number: usize,
        language: &str,
    ) -> String;
}

/// An external reasoning service: one prompt in, one text out.
#[async_trait]
pub trait ReasoningClient: Send + Sync {
    async fn submit(&self, prompt: &str) -> Result<String>;
}

#[async_trait]
pub trait FileEmitter: Send + Sync {
    /// Write `files` below `dir` and return the directory written to.
    async fn emit(&self, dir: &Path, files: &[OutputFile]) -> Result<PathBuf>;
}
