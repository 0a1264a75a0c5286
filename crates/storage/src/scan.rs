//! Source scanner: bounded directory walk feeding the event store.
//!
//! Walks a tree of text sources (crash dumps, saved dmesg output), applies a
//! caller-supplied match function to every line, and records matches in a
//! bucket with dedup against the lookback window. Re-scanning unchanged input
//! within the window inserts nothing.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{Bucket, Event, Result};

/// Maximum directory depth below the scan root. Files up to four levels deep
/// (root inclusive) are read; deeper subtrees are skipped so a stray symlink
/// farm or runaway nesting cannot stall a scan.
pub const MAX_SCAN_DEPTH: usize = 3;

/// A line recognized by a match function: the event category plus a derived
/// human-readable message. Returning `None` from the match function means
/// "not interesting, skip".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineMatch {
    pub name: String,
    pub message: String,
}

impl LineMatch {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }
}

/// Scans a directory tree (or a single file) of text sources into a bucket.
pub struct Scanner {
    root: PathBuf,
    bucket: Arc<Bucket>,
}

impl Scanner {
    pub fn new(root: impl Into<PathBuf>, bucket: Arc<Bucket>) -> Self {
        Self {
            root: root.into(),
            bucket,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Walk the source tree and record every line the match function accepts.
    ///
    /// A candidate is skipped when an event with the same raw message was
    /// already recorded within the bucket's lookback window, so repeated scans
    /// over unchanged sources are idempotent. Fails fast on an unreadable root
    /// or file; rows inserted before the failure stay.
    pub fn scan<F>(&self, cancel: &CancellationToken, match_fn: F) -> Result<()>
    where
        F: Fn(&str) -> Option<LineMatch>,
    {
        let mut files = Vec::new();
        if self.root.is_file() {
            files.push(self.root.clone());
        } else {
            collect_files(&self.root, 0, &mut files)?;
        }

        let since = self.bucket.lookback_start();
        let mut inserted = 0usize;

        for path in files {
            if cancel.is_cancelled() {
                return Err(crate::Error::Cancelled);
            }

            let file = File::open(&path)?;
            for line in BufReader::new(file).lines() {
                let line = line?;
                if line.is_empty() {
                    continue;
                }
                let Some(matched) = match_fn(&line) else {
                    continue;
                };

                if self.bucket.count_matching(cancel, &line, since)? > 0 {
                    continue;
                }
                let event = Event::new(self.bucket.now(), matched.name, matched.message, line);
                self.bucket.insert(cancel, &event)?;
                inserted += 1;
            }
        }

        debug!(root = %self.root.display(), inserted, "scan complete");
        Ok(())
    }
}

/// Depth-first file collection, skipping directories nested deeper than
/// [`MAX_SCAN_DEPTH`]. Non-regular files (sockets, fifos) are ignored.
fn collect_files(dir: &Path, depth: usize, files: &mut Vec<PathBuf>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            if depth < MAX_SCAN_DEPTH {
                collect_files(&path, depth + 1, files)?;
            }
        } else if file_type.is_file() {
            files.push(path);
        }
    }
    Ok(())
}
