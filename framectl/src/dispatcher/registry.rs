//! Static leaf registry for the control tree.
//!
//! Every path a subsystem manager exposes is registered here once, at
//! dispatcher construction: an enum-coded read accessor plus an optional
//! write accessor per leaf. Path resolution is a table lookup followed by an
//! exhaustive match; no dynamic attribute resolution happens at call time.

use serde_json::{Map, Value};

/// Identifies one manager-relative leaf and its accessors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ManagerLeaf {
    /// Worker endpoint list (read-only)
    Endpoints,
    /// Control timeout in seconds
    Timeout,
    /// Acquisition output directory
    FilePath,
    /// Acquisition identifier / file name stem
    FileName,
    /// Frames to capture
    NumFrames,
    /// Batches to split the capture into
    NumBatches,
    /// Aggregated writing flag (read-only)
    Executing,
    /// Aggregated frames-written counter (read-only)
    FramesWritten,
    /// Raw per-worker status snapshots (read-only)
    FpStatus,
    /// Action leaf: stop the acquisition
    StopExecute,
    /// Action leaf: arm liveview
    StartLiveview,
}

/// A registered leaf: its accessor code and whether it accepts writes.
///
/// Every leaf has a read accessor (action leaves read as null, mirroring the
/// tree convention for write-triggered actions); `writable` marks the ones
/// with a write accessor.
#[derive(Debug, Clone, Copy)]
pub(crate) struct LeafSpec {
    pub leaf: ManagerLeaf,
    pub writable: bool,
}

impl LeafSpec {
    const fn read_only(leaf: ManagerLeaf) -> Self {
        Self {
            leaf,
            writable: false,
        }
    }

    const fn read_write(leaf: ManagerLeaf) -> Self {
        Self {
            leaf,
            writable: true,
        }
    }
}

/// The manager-relative path table, built once at dispatcher construction.
pub(crate) struct LeafRegistry {
    entries: Vec<(&'static str, LeafSpec)>,
}

impl LeafRegistry {
    /// Builds the registry of leaves every subsystem manager exposes.
    pub fn for_manager() -> Self {
        Self {
            entries: vec![
                ("endpoints", LeafSpec::read_only(ManagerLeaf::Endpoints)),
                ("timeout", LeafSpec::read_write(ManagerLeaf::Timeout)),
                ("args/file_path", LeafSpec::read_write(ManagerLeaf::FilePath)),
                ("args/file_name", LeafSpec::read_write(ManagerLeaf::FileName)),
                ("args/num_frames", LeafSpec::read_write(ManagerLeaf::NumFrames)),
                ("args/num_batches", LeafSpec::read_write(ManagerLeaf::NumBatches)),
                ("status/executing", LeafSpec::read_only(ManagerLeaf::Executing)),
                (
                    "status/frames_written",
                    LeafSpec::read_only(ManagerLeaf::FramesWritten),
                ),
                ("frame_procs/status", LeafSpec::read_only(ManagerLeaf::FpStatus)),
                ("stop_execute", LeafSpec::read_write(ManagerLeaf::StopExecute)),
                (
                    "start_liveview",
                    LeafSpec::read_write(ManagerLeaf::StartLiveview),
                ),
            ],
        }
    }

    /// Looks up the leaf registered at an exact manager-relative path.
    pub fn resolve(&self, path: &str) -> Option<LeafSpec> {
        self.entries
            .iter()
            .find(|(registered, _)| *registered == path)
            .map(|(_, spec)| *spec)
    }

    /// True when any leaf is registered beneath the given branch prefix.
    pub fn has_branch(&self, prefix: &str) -> bool {
        let nested = format!("{}/", prefix);
        self.entries
            .iter()
            .any(|(registered, _)| registered.starts_with(&nested))
    }

    /// Leaves beneath a branch prefix, keyed by their path relative to it.
    ///
    /// An empty prefix yields every registered leaf.
    pub fn leaves_under<'a>(
        &'a self,
        prefix: &'a str,
    ) -> impl Iterator<Item = (&'static str, LeafSpec)> + 'a {
        let nested = if prefix.is_empty() {
            String::new()
        } else {
            format!("{}/", prefix)
        };
        self.entries.iter().filter_map(move |(registered, spec)| {
            registered
                .strip_prefix(nested.as_str())
                .map(|relative| (relative, *spec))
        })
    }
}

/// Inserts a value into a nested JSON object at a slash-separated path,
/// creating intermediate objects as needed.
pub(crate) fn insert_at(object: &mut Map<String, Value>, path: &str, value: Value) {
    let mut current = object;
    let mut segments = path.split('/').peekable();
    while let Some(segment) = segments.next() {
        if segments.peek().is_none() {
            current.insert(segment.to_string(), value);
            return;
        }
        let entry = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        match entry.as_object_mut() {
            Some(nested) => current = nested,
            None => return,
        }
    }
}
