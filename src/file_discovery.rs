use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::error::{BatchError, Result};
use crate::progress::{CancellationToken, ProgressEvent, ProgressObserver};

/// Default filename filter: every `.xml` file
pub const DEFAULT_PATTERN: &str = r"^.*\.xml$";

/// A discovered file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Path as found under the root
    pub path: PathBuf,
    /// Base filename, the part the pattern is tested against
    pub file_name: String,
}

impl FileEntry {
    pub fn new(path: PathBuf) -> Self {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self { path, file_name }
    }
}

/// Recursive, pattern-filtered file locator
///
/// Files are selected when the pattern matches anywhere in their base filename
/// (search semantics); anchor the pattern to require a full match. Directory
/// listings are sorted by name at every level so repeated walks over an unchanged
/// tree yield the same order.
#[derive(Debug, Clone)]
pub struct FileLocator {
    pattern: Regex,
    follow_symlinks: bool,
}

enum EntryKind {
    Directory,
    File,
}

type WalkFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

impl FileLocator {
    /// Compile `pattern`; nothing touches the filesystem until [`FileLocator::locate`]
    pub fn new(pattern: &str) -> Result<Self> {
        let pattern = Regex::new(pattern).map_err(|source| BatchError::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        })?;

        Ok(Self {
            pattern,
            follow_symlinks: false,
        })
    }

    /// Set whether to descend into symlinked directories
    pub fn with_follow_symlinks(mut self, follow: bool) -> Self {
        self.follow_symlinks = follow;
        self
    }

    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }

    /// Check whether a base filename is selected
    pub fn matches(&self, file_name: &str) -> bool {
        self.pattern.is_match(file_name)
    }

    /// Walk `root` and return the matching files in traversal order
    pub async fn locate(
        &self,
        root: &Path,
        observer: &dyn ProgressObserver,
        cancel: &CancellationToken,
    ) -> Result<Vec<FileEntry>> {
        match fs::metadata(root).await {
            Ok(metadata) if metadata.is_dir() => {}
            _ => {
                return Err(BatchError::PathNotFound {
                    path: root.to_path_buf(),
                });
            }
        }

        let mut files = Vec::new();
        let entries = sorted_entries(root)
            .await
            .map_err(|source| BatchError::Traversal {
                path: root.to_path_buf(),
                source,
            })?;
        self.visit_entries(entries, observer, cancel, &mut files)
            .await?;

        tracing::debug!(
            root = %root.display(),
            matched = files.len(),
            "File discovery finished"
        );
        Ok(files)
    }

    /// Visit a sorted directory listing, recursing into subdirectories in place
    fn visit_entries<'a>(
        &'a self,
        entries: Vec<PathBuf>,
        observer: &'a dyn ProgressObserver,
        cancel: &'a CancellationToken,
        files: &'a mut Vec<FileEntry>,
    ) -> WalkFuture<'a> {
        Box::pin(async move {
            for path in entries {
                if cancel.is_cancelled() {
                    return Err(BatchError::Cancelled {
                        completed: 0,
                        total: 0,
                        partial_report: None,
                    });
                }

                match self.classify(&path).await {
                    Some(EntryKind::Directory) => match sorted_entries(&path).await {
                        Ok(children) => {
                            self.visit_entries(children, observer, cancel, files)
                                .await?
                        }
                        Err(e) => tracing::warn!("Skipping directory {}: {}", path.display(), e),
                    },
                    Some(EntryKind::File) => {
                        let entry = FileEntry::new(path);
                        observer.on_progress(&ProgressEvent::Examining {
                            file_name: entry.file_name.clone(),
                        });
                        if self.matches(&entry.file_name) {
                            tracing::debug!("Selected {}", entry.path.display());
                            files.push(entry);
                        }
                    }
                    None => {}
                }
            }
            Ok(())
        })
    }

    /// Decide how the walk treats `path`; `None` means skip it
    ///
    /// Anything that is not a directory counts as a file, including dangling links and
    /// special files, so it still reaches validation and shows up in the report.
    async fn classify(&self, path: &Path) -> Option<EntryKind> {
        let link = match fs::symlink_metadata(path).await {
            Ok(link) => link,
            Err(e) => {
                tracing::warn!("Skipping {}: {}", path.display(), e);
                return None;
            }
        };

        if !link.file_type().is_symlink() {
            return Some(if link.is_dir() {
                EntryKind::Directory
            } else {
                EntryKind::File
            });
        }

        match fs::metadata(path).await {
            Ok(target) if target.is_dir() => self.follow_symlinks.then_some(EntryKind::Directory),
            Ok(_) => Some(EntryKind::File),
            Err(e) => {
                tracing::debug!("Dangling link {}: {}", path.display(), e);
                Some(EntryKind::File)
            }
        }
    }
}

/// List a directory sorted by file name
async fn sorted_entries(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut read_dir = fs::read_dir(dir).await?;
    let mut entries = Vec::new();
    while let Some(entry) = read_dir.next_entry().await? {
        entries.push(entry.path());
    }
    entries.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(entries)
}
