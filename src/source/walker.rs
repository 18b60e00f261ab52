//! Discovery of trajectory directories in a raw Bridge dataset tree.
//!
//! The dataset is laid out as `<root>/.../raw/<group>/<trajectory>/`. The
//! walker descends depth-first until it meets a directory named exactly
//! `raw`, captures it without descending further, and then expands its
//! groups one level to reach the trajectories.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Directory name that marks a collection point.
pub const RAW_DIR: &str = "raw";

/// Counters gathered while walking the tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WalkSummary {
    /// Number of `raw` directories found.
    pub raw_dirs: usize,
    /// Number of trajectory groups expanded.
    pub groups: usize,
    /// Number of trajectory directories emitted.
    pub trajectories: usize,
    /// Entries skipped because they had the wrong shape or could not be read.
    pub skipped_entries: usize,
}

/// The result of a walk: trajectory directories plus counters.
///
/// Ordering of `trajectories` carries no meaning.
#[derive(Debug, Clone, Default)]
pub struct TrajectoryWalk {
    pub trajectories: Vec<PathBuf>,
    pub summary: WalkSummary,
}

/// Find every trajectory directory below `root`.
///
/// Only failure to read `root` itself is an error. Unreadable entries and
/// files sitting where a group or trajectory directory is expected are
/// logged and skipped.
pub fn find_trajectories(root: &Path) -> Result<TrajectoryWalk> {
    let mut walk = TrajectoryWalk::default();

    let mut raw_dirs = find_raw_dirs(root, &mut walk.summary)?;
    raw_dirs.reverse();
    walk.summary.raw_dirs = raw_dirs.len();

    for raw_dir in &raw_dirs {
        for group in list_dir(raw_dir, &mut walk.summary) {
            if !group.is_dir() {
                warn!(path = %group.display(), "non-directory entry where trajectory group expected");
                walk.summary.skipped_entries += 1;
                continue;
            }
            walk.summary.groups += 1;

            for trajectory in list_dir(&group, &mut walk.summary) {
                if !trajectory.is_dir() {
                    warn!(path = %trajectory.display(), "non-directory entry where trajectory expected");
                    walk.summary.skipped_entries += 1;
                    continue;
                }
                walk.trajectories.push(trajectory);
            }
        }
    }

    walk.summary.trajectories = walk.trajectories.len();
    info!(
        root = %root.display(),
        raw_dirs = walk.summary.raw_dirs,
        groups = walk.summary.groups,
        trajectories = walk.summary.trajectories,
        skipped = walk.summary.skipped_entries,
        "trajectory walk complete"
    );

    Ok(walk)
}

/// Depth-first search for directories named `raw`, in listing order.
fn find_raw_dirs(root: &Path, summary: &mut WalkSummary) -> Result<Vec<PathBuf>> {
    std::fs::read_dir(root)
        .with_context(|| format!("Failed to read dataset root {}", root.display()))?;

    let mut raw_dirs = Vec::new();
    let mut walker = WalkDir::new(root).min_depth(1).follow_links(true).into_iter();

    while let Some(entry) = walker.next() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!(error = %err, "skipping unreadable entry during walk");
                summary.skipped_entries += 1;
                continue;
            }
        };
        if !entry.file_type().is_dir() {
            continue;
        }
        if entry.file_name() == RAW_DIR {
            debug!(path = %entry.path().display(), "found raw directory");
            raw_dirs.push(entry.into_path());
            walker.skip_current_dir();
        }
    }

    Ok(raw_dirs)
}

/// List a directory's children, logging and skipping anything unreadable.
fn list_dir(dir: &Path, summary: &mut WalkSummary) -> Vec<PathBuf> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            warn!(path = %dir.display(), error = %err, "failed to list directory");
            summary.skipped_entries += 1;
            return Vec::new();
        }
    };

    let mut children = Vec::new();
    for entry in entries {
        match entry {
            Ok(entry) => children.push(entry.path()),
            Err(err) => {
                warn!(path = %dir.display(), error = %err, "failed to read directory entry");
                summary.skipped_entries += 1;
            }
        }
    }
    children
}
