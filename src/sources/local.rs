//! Local file system document source.

use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

use crate::error::SourceError;
use crate::models::{Document, Source};
use crate::utils::file::{guess_mime_type, is_text_file, read_file_content};

/// Plain-text files under a root path.
#[derive(Debug)]
pub struct LocalSource {
    root: PathBuf,
    exclude: Vec<glob::Pattern>,
    max_file_size: u64,
}

impl LocalSource {
    pub fn new(
        root: impl Into<PathBuf>,
        exclude_patterns: &[String],
        max_file_size: u64,
    ) -> Result<Self, SourceError> {
        let exclude = exclude_patterns
            .iter()
            .map(|pattern| {
                glob::Pattern::new(pattern).map_err(|e| SourceError::InvalidPattern {
                    pattern: pattern.clone(),
                    reason: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            root: root.into(),
            exclude,
            max_file_size,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn is_excluded(&self, path: &Path) -> bool {
        let full = path.to_string_lossy();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy())
            .unwrap_or_default();
        self.exclude
            .iter()
            .any(|p| p.matches(&full) || p.matches(&name))
    }

    /// Indexable files, sorted by path. A file root yields just that file.
    pub fn collect_files(&self) -> Result<Vec<PathBuf>, SourceError> {
        if !self.root.exists() {
            return Err(SourceError::NotFound(self.root.display().to_string()));
        }
        if self.root.is_file() {
            return Ok(vec![self.root.clone()]);
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(&self.root).follow_links(false) {
            let entry = entry.map_err(|e| SourceError::WalkError(e.to_string()))?;
            let path = entry.path();

            if !entry.file_type().is_file() || self.is_excluded(path) {
                continue;
            }
            let too_large = entry
                .metadata()
                .map(|m| m.len() > self.max_file_size)
                .unwrap_or(true);
            if too_large {
                debug!(path = %path.display(), "skipping file over size limit");
                continue;
            }
            if is_text_file(path) {
                files.push(path.to_path_buf());
            }
        }

        files.sort();
        Ok(files)
    }

    pub fn read_document(&self, path: &Path) -> Result<Document, SourceError> {
        let text = read_file_content(path, self.max_file_size).map_err(|e| SourceError::ReadError {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let source = Source::new(path.to_string_lossy(), guess_mime_type(path));
        Ok(Document::new(text, source))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_collect_files_applies_filters() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("notes.md"), "# Notes\nhello").unwrap();
        fs::write(dir.path().join("big.txt"), "x".repeat(200)).unwrap();
        fs::write(dir.path().join("image.png"), [0u8, 1, 2, 3]).unwrap();
        fs::create_dir(dir.path().join("target")).unwrap();
        fs::write(dir.path().join("target").join("out.txt"), "built").unwrap();
        fs::write(dir.path().join("Cargo.lock"), "lock").unwrap();

        let source = LocalSource::new(
            dir.path(),
            &["**/target/**".to_string(), "*.lock".to_string()],
            100,
        )
        .unwrap();
        let files = source.collect_files().unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["notes.md"]);
    }

    #[test]
    fn test_read_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("guide.md");
        fs::write(&path, "# Guide").unwrap();

        let source = LocalSource::new(&path, &[], 1024).unwrap();
        assert_eq!(source.collect_files().unwrap(), vec![path.clone()]);
        let doc = source.read_document(&path).unwrap();
        assert_eq!(doc.text, "# Guide");
        assert_eq!(doc.source.mime_type, "text/markdown");
    }

    #[test]
    fn test_invalid_pattern_and_missing_root() {
        assert!(matches!(
            LocalSource::new("/tmp", &["[".to_string()], 10),
            Err(SourceError::InvalidPattern { .. })
        ));
        let source = LocalSource::new("/definitely/not/here", &[], 10).unwrap();
        assert!(matches!(source.collect_files(), Err(SourceError::NotFound(_))));
    }
}
