//! Classification of the entries found directly inside a trajectory directory.
//!
//! A trajectory directory mixes serialized arrays, image folders and
//! annotation text. Each entry is classified once by [`classify`] and the
//! normalizer dispatches on the resulting [`EntryKind`].

use std::path::Path;

/// Name of the directory holding auto-generated annotations.
pub const ANNOTATIONS_DIR: &str = "annotations";
/// Lupus annotation file inside [`ANNOTATIONS_DIR`].
pub const LUPUS_FILE: &str = "lang_lupus.txt";
/// Human-authored groundtruth instruction file.
pub const GROUNDTRUTH_FILE: &str = "lang.txt";
/// Entries whose name contains this marker hold per-episode agent bookkeeping.
pub const AGENT_DATA_MARKER: &str = "agent_data";

/// What a directory entry inside a trajectory holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKind {
    /// `annotations/`, scanned for `lang_lupus.txt`.
    AnnotationDir,
    /// A folder of camera frames; the key is the folder name (e.g. `images0`).
    ImageSequenceDir { key: String },
    /// Anything mentioning `agent_data`, file or directory.
    AgentData { key: String, is_dir: bool },
    /// `lang.txt`.
    LanguageFile,
    /// A serialized array or object, keyed by the name up to its first dot.
    GenericArrayFile { key: String },
}

/// Classify a single entry by name and type.
///
/// The `agent_data` check comes first so that it applies to files and
/// directories alike.
pub fn classify(name: &str, is_dir: bool) -> EntryKind {
    if name.contains(AGENT_DATA_MARKER) {
        return EntryKind::AgentData {
            key: field_key(name),
            is_dir,
        };
    }
    if is_dir {
        if name == ANNOTATIONS_DIR {
            EntryKind::AnnotationDir
        } else {
            EntryKind::ImageSequenceDir {
                key: name.to_string(),
            }
        }
    } else if name == GROUNDTRUTH_FILE {
        EntryKind::LanguageFile
    } else {
        EntryKind::GenericArrayFile {
            key: field_key(name),
        }
    }
}

/// Strip everything from the first `.` onwards: `obs_dict.pkl` -> `obs_dict`.
pub fn field_key(name: &str) -> String {
    match name.find('.') {
        Some(idx) => name[..idx].to_string(),
        None => name.to_string(),
    }
}

/// Path of the lupus annotation file for a trajectory directory.
pub fn lupus_path(trajectory: &Path) -> std::path::PathBuf {
    trajectory.join(ANNOTATIONS_DIR).join(LUPUS_FILE)
}
