//! Run configuration for the tutorial pipeline.

use std::{collections::BTreeSet, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};
use tutorflow_core::{context::Context, error::Result, retry::RetryPolicy};

/// File patterns fetched when the caller adds none of their own.
pub const DEFAULT_INCLUDE_PATTERNS: &[&str] = &[
    "*.py", "*.js", "*.jsx", "*.ts", "*.tsx", "*.go", "*.java", "*.pyi", "*.pyx", "*.c", "*.cc",
    "*.cpp", "*.h", "*.rs", "*.md", "*.rst", "Dockerfile", "Makefile", "*.yaml", "*.yml",
];

/// Paths skipped unless explicitly included.
pub const DEFAULT_EXCLUDE_PATTERNS: &[&str] = &[
    "venv/*", ".venv/*", "*test*", "tests/*", "docs/*", "examples/*", "v1/*", "dist/*",
    "build/*", "experimental/*", "deprecated/*", "legacy/*", ".git/*", ".github/*", ".next/*",
    ".vscode/*", "obj/*", "bin/*", "node_modules/*", "target/*", "*.log", "archive/*",
    "chat_history/*", "data/*", "vector_db/*",
];

/// Context keys written by [`TutorialConfig::to_context`] and read by the nodes.
pub mod keys {
    pub const LOCAL_DIR: &str = "local_dir";
    pub const PROJECT_NAME: &str = "project_name";
    pub const OUTPUT_DIR: &str = "output_dir";
    pub const INCLUDE_PATTERNS: &str = "include_patterns";
    pub const EXCLUDE_PATTERNS: &str = "exclude_patterns";
    pub const MAX_FILE_SIZE: &str = "max_file_size";
    pub const LANGUAGE: &str = "language";
    pub const USE_CACHE: &str = "use_cache";
    pub const FILES: &str = "files";
    pub const ABSTRACTIONS: &str = "abstractions";
    pub const RELATIONSHIPS: &str = "relationships";
    pub const CHAPTER_ORDER: &str = "chapter_order";
    pub const CHAPTERS: &str = "chapters";
    pub const FINAL_OUTPUT_DIR: &str = "final_output_dir";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TutorialConfig {
    pub local_dir: PathBuf,
    /// Derived from the directory name when absent.
    pub project_name: Option<String>,
    pub output_dir: PathBuf,
    pub include_patterns: BTreeSet<String>,
    pub exclude_patterns: BTreeSet<String>,
    /// Files larger than this many bytes are skipped.
    pub max_file_size: u64,
    pub max_retries: usize,
    pub wait_secs: u64,
    pub language: String,
    pub use_cache: bool,
    /// Chapters written at the same time.
    pub concurrency: usize,
}

impl Default for TutorialConfig {
    fn default() -> Self {
        Self {
            local_dir: PathBuf::from("."),
            project_name: None,
            output_dir: PathBuf::from("output"),
            include_patterns: to_set(DEFAULT_INCLUDE_PATTERNS),
            exclude_patterns: to_set(DEFAULT_EXCLUDE_PATTERNS),
            max_file_size: 100_000,
            max_retries: 3,
            wait_secs: 10,
            language: "english".to_string(),
            use_cache: true,
            concurrency: 1,
        }
    }
}

impl TutorialConfig {
    pub fn new(local_dir: impl Into<PathBuf>) -> Self {
        Self {
            local_dir: local_dir.into(),
            ..Self::default()
        }
    }

    /// Add include patterns on top of the defaults.
    pub fn include<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.include_patterns.extend(patterns.into_iter().map(Into::into));
        self
    }

    /// Add exclude patterns on top of the defaults.
    pub fn exclude<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude_patterns.extend(patterns.into_iter().map(Into::into));
        self
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, Duration::from_secs(self.wait_secs))
    }

    /// Seed a context with the inputs the pipeline nodes read.
    pub fn to_context(&self) -> Result<Context> {
        let mut context = Context::new();
        context.set(keys::LOCAL_DIR, &self.local_dir)?;
        if let Some(name) = &self.project_name {
            context.set(keys::PROJECT_NAME, name)?;
        }
        context.set(keys::OUTPUT_DIR, &self.output_dir)?;
        context.set(keys::INCLUDE_PATTERNS, &self.include_patterns)?;
        context.set(keys::EXCLUDE_PATTERNS, &self.exclude_patterns)?;
        context.set(keys::MAX_FILE_SIZE, self.max_file_size)?;
        context.set(keys::LANGUAGE, &self.language)?;
        context.set(keys::USE_CACHE, self.use_cache)?;
        Ok(context)
    }
}

fn to_set(patterns: &[&str]) -> BTreeSet<String> {
    patterns.iter().map(|p| p.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn extra_patterns_are_merged_with_defaults() {
        let config = TutorialConfig::new("repo")
            .include(["*.toml", "*.py"])
            .exclude(["fixtures/*"]);

        assert!(config.include_patterns.contains("*.toml"));
        assert!(config.include_patterns.contains("*.rs"));
        assert_eq!(
            config.include_patterns.len(),
            DEFAULT_INCLUDE_PATTERNS.len() + 1
        );
        assert!(config.exclude_patterns.contains("fixtures/*"));
        assert!(config.exclude_patterns.contains("tests/*"));
    }

    #[test]
    fn context_carries_node_inputs() {
        let config = TutorialConfig {
            project_name: Some("demo".to_string()),
            use_cache: false,
            ..TutorialConfig::new("/tmp/demo")
        };

        let context = config.to_context().unwrap();

        assert_eq!(
            context.get::<PathBuf>(keys::LOCAL_DIR).unwrap(),
            Some(PathBuf::from("/tmp/demo"))
        );
        assert_eq!(
            context.get::<String>(keys::PROJECT_NAME).unwrap(),
            Some("demo".to_string())
        );
        assert_eq!(context.get::<bool>(keys::USE_CACHE).unwrap(), Some(false));
        assert_eq!(context.get::<u64>(keys::MAX_FILE_SIZE).unwrap(), Some(100_000));
    }

    #[test]
    fn missing_project_name_is_left_unset() {
        let context = TutorialConfig::new("repo").to_context().unwrap();
        assert!(!context.contains(keys::PROJECT_NAME));
    }

    #[test]
    fn retry_policy_uses_configured_wait() {
        let config = TutorialConfig {
            max_retries: 5,
            wait_secs: 2,
            ..TutorialConfig::default()
        };
        let policy = config.retry_policy();
        assert_eq!(policy.max_retries(), 5);
        assert_eq!(policy.wait(), Duration::from_secs(2));
    }
}
