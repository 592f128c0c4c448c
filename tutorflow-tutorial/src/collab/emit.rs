use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::debug;

use super::{FileEmitter, OutputFile};
use crate::error::Result;

/// Writes artifacts to the local filesystem, creating directories as needed.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsEmitter;

#[async_trait]
impl FileEmitter for FsEmitter {
    async fn emit(&self, dir: &Path, files: &[OutputFile]) -> Result<PathBuf> {
        fs::create_dir_all(dir).await?;
        for file in files {
            let target = dir.join(&file.path);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).await?;
            }
            fs::write(&target, &file.content).await?;
            debug!(path = %target.display(), bytes = file.content.len(), "wrote file");
        }
        Ok(dir.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn files_are_written_below_dir() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("out/demo");
        let files = vec![
            OutputFile {
                path: "index.md".to_string(),
                content: "# Demo".to_string(),
            },
            OutputFile {
                path: "01_flow.md".to_string(),
                content: "# Flow".to_string(),
            },
        ];

        let written = FsEmitter.emit(&dir, &files).await.unwrap();

        assert_eq!(written, dir);
        assert_eq!(std::fs::read_to_string(dir.join("index.md")).unwrap(), "# Demo");
        assert_eq!(std::fs::read_to_string(dir.join("01_flow.md")).unwrap(), "# Flow");
    }
}
