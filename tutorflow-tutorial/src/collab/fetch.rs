use std::path::Path;

use async_trait::async_trait;
use glob::Pattern;
use tracing::{debug, info};
use walkdir::WalkDir;

use super::{ContentFetcher, FetchRequest, SourceFile};
use crate::error::{Result, TutorialError};

/// Reads source files from a local directory tree.
///
/// An include pattern matches either the file name or the path relative to the
/// root; exclude patterns match the relative path. A directory matched by an
/// exclude pattern, as `dir` or `dir/`, is not descended into. Files over the
/// size limit or not valid UTF-8 are skipped.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalDirFetcher;

#[async_trait]
impl ContentFetcher for LocalDirFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<Vec<SourceFile>> {
        let request = request.clone();
        let files = tokio::task::spawn_blocking(move || walk(&request))
            .await
            .map_err(|e| TutorialError::Io(std::io::Error::other(e)))??;
        info!(files = files.len(), "fetched local sources");
        Ok(files)
    }
}

fn compile(patterns: &[String]) -> Result<Vec<Pattern>> {
    patterns
        .iter()
        .map(|p| Pattern::new(p).map_err(TutorialError::from))
        .collect()
}

fn walk(request: &FetchRequest) -> Result<Vec<SourceFile>> {
    if !request.root.is_dir() {
        return Err(TutorialError::Config(format!(
            "{} is not a directory",
            request.root.display()
        )));
    }

    let include = compile(&request.include)?;
    let exclude = compile(&request.exclude)?;
    let mut files = Vec::new();

    let walker = WalkDir::new(&request.root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            if entry.depth() == 0 || !entry.file_type().is_dir() {
                return true;
            }
            let Ok(relative) = entry.path().strip_prefix(&request.root) else {
                return true;
            };
            let relative = relative_str(relative);
            let pruned = excluded_dir(&exclude, &relative);
            if pruned {
                debug!(path = %relative, "excluded directory");
            }
            !pruned
        });

    for entry in walker.filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(&request.root) else {
            continue;
        };
        let relative = relative_str(relative);
        let file_name = entry.file_name().to_string_lossy();

        if !include.is_empty()
            && !include
                .iter()
                .any(|p| p.matches(&file_name) || p.matches(&relative))
        {
            continue;
        }
        if exclude.iter().any(|p| p.matches(&relative)) {
            debug!(path = %relative, "excluded");
            continue;
        }

        let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
        if size > request.max_file_size {
            debug!(path = %relative, size, limit = request.max_file_size, "skipping large file");
            continue;
        }

        match std::fs::read_to_string(entry.path()) {
            Ok(content) => files.push(SourceFile {
                path: relative,
                content,
            }),
            Err(error) => debug!(path = %relative, %error, "skipping unreadable file"),
        }
    }

    Ok(files)
}

fn excluded_dir(exclude: &[Pattern], relative: &str) -> bool {
    let with_slash = format!("{relative}/");
    exclude
        .iter()
        .any(|p| p.matches(relative) || p.matches(&with_slash))
}

fn relative_str(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use std::fs;

    use pretty_assertions::assert_eq;

    use super::*;

    fn request(root: &Path, include: &[&str], exclude: &[&str]) -> FetchRequest {
        FetchRequest {
            root: root.to_path_buf(),
            include: include.iter().map(|s| s.to_string()).collect(),
            exclude: exclude.iter().map(|s| s.to_string()).collect(),
            max_file_size: 1_000,
        }
    }

    fn paths(files: &[SourceFile]) -> Vec<&str> {
        files.iter().map(|f| f.path.as_str()).collect()
    }

    #[tokio::test]
    async fn include_and_exclude_filter_the_tree() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::create_dir_all(dir.path().join("tests")).unwrap();
        fs::write(dir.path().join("src/lib.rs"), "pub fn a() {}").unwrap();
        fs::write(dir.path().join("src/notes.txt"), "ignored").unwrap();
        fs::write(dir.path().join("tests/it.rs"), "#[test] fn t() {}").unwrap();
        fs::write(dir.path().join("Makefile"), "all:").unwrap();

        let files = LocalDirFetcher
            .fetch(&request(dir.path(), &["*.rs", "Makefile"], &["tests/*"]))
            .await
            .unwrap();

        assert_eq!(paths(&files), vec!["Makefile", "src/lib.rs"]);
        assert_eq!(files[1].content, "pub fn a() {}");
    }

    #[tokio::test]
    async fn excluded_directories_are_not_descended() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("vendor/dep/src")).unwrap();
        fs::create_dir_all(dir.path().join("node_modules/pkg")).unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::write(dir.path().join("vendor/dep/src/lib.rs"), "pub fn dep() {}").unwrap();
        fs::write(dir.path().join("node_modules/pkg/index.rs"), "fn pkg() {}").unwrap();
        fs::write(dir.path().join("src/vendor.rs"), "mod vendored;").unwrap();

        let files = LocalDirFetcher
            .fetch(&request(dir.path(), &["*.rs"], &["vendor", "node_modules/"]))
            .await
            .unwrap();

        assert_eq!(paths(&files), vec!["src/vendor.rs"]);
        assert!(excluded_dir(&compile(&["vendor".to_string()]).unwrap(), "vendor"));
        assert!(!excluded_dir(&compile(&["vendor".to_string()]).unwrap(), "src"));
    }

    #[tokio::test]
    async fn oversized_and_binary_files_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("big.rs"), "x".repeat(2_000)).unwrap();
        fs::write(dir.path().join("blob.rs"), [0xff, 0xfe, 0x00, 0x80]).unwrap();
        fs::write(dir.path().join("ok.rs"), "fn ok() {}").unwrap();

        let files = LocalDirFetcher
            .fetch(&request(dir.path(), &["*.rs"], &[]))
            .await
            .unwrap();

        assert_eq!(paths(&files), vec!["ok.rs"]);
    }

    #[tokio::test]
    async fn invalid_pattern_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = LocalDirFetcher
            .fetch(&request(dir.path(), &["[unclosed"], &[]))
            .await
            .unwrap_err();
        assert!(matches!(err, TutorialError::Pattern(_)));
    }

    #[tokio::test]
    async fn missing_root_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = LocalDirFetcher
            .fetch(&request(&dir.path().join("nope"), &[], &[]))
            .await
            .unwrap_err();
        assert!(matches!(err, TutorialError::Config(_)));
    }
}
