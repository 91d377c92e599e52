//! WAL manifest persistence.
//!
//! The manifest is the single source of truth for which segments exist.
//! It is a JSON document holding the full sorted list of segment
//! metadata, serialized in full and rewritten on every change. Rewrites
//! go through a temp file and an atomic rename so a crash never leaves a
//! half-written manifest behind.

use std::fs::File;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::util::filename;
use crate::{Error, Result};

use super::segment::SegmentMeta;

/// The persistent listing of every segment in the WAL.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    /// Segment metadata in `(segment_index, created_at)` order.
    pub sorted_segments_metadata: Vec<SegmentMeta>,
}

impl Manifest {
    /// Build a manifest from a set of segment metadata, sorting it.
    pub fn new(metas: Vec<SegmentMeta>) -> Self {
        let mut manifest = Self {
            sorted_segments_metadata: metas,
        };
        manifest.sort();
        manifest
    }

    /// Sort entries by `(segment_index, created_at)`.
    ///
    /// The timestamp tie-break matters because the compactor transiently
    /// adds segments that reuse small segment indices before the
    /// originals are deleted.
    pub fn sort(&mut self) {
        self.sorted_segments_metadata
            .sort_by_key(|meta| meta.sort_key());
    }

    /// Load the manifest from its fixed path under `data_dir`.
    ///
    /// Returns `None` if no manifest exists yet. A manifest that cannot
    /// be parsed is irreconcilable and fatal.
    pub fn load(data_dir: &Path) -> Result<Option<Self>> {
        let path = filename::manifest_file_path(data_dir);

        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut manifest: Manifest = serde_json::from_slice(&bytes).map_err(|e| {
            Error::invariant(format!("manifest at {} is corrupt: {}", path.display(), e))
        })?;

        manifest.sort();
        Ok(Some(manifest))
    }

    /// Persist the manifest: write a temp file, fsync, rename into place.
    pub fn save(&self, data_dir: &Path) -> Result<()> {
        let meta_dir = filename::meta_dir(data_dir);
        filename::create_dir_if_missing(&meta_dir)?;

        let temp_path = filename::manifest_temp_path(data_dir);
        let final_path = filename::manifest_file_path(data_dir);

        let bytes = serde_json::to_vec(self)
            .map_err(|e| Error::invariant(format!("manifest serialization failed: {}", e)))?;

        std::fs::write(&temp_path, &bytes)?;
        let file = File::open(&temp_path)?;
        file.sync_all()?;
        drop(file);

        std::fs::rename(&temp_path, &final_path)?;
        filename::sync_dir(&meta_dir)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::tempdir;

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempdir().unwrap();

        let mut second = SegmentMeta::new(1, 50);
        second.closed = false;
        let mut first = SegmentMeta::new(0, 0);
        first.last_entry_index = 50;
        first.closed = true;

        let manifest = Manifest::new(vec![second, first]);
        manifest.save(dir.path()).unwrap();

        let loaded = Manifest::load(dir.path()).unwrap().unwrap();
        assert_eq!(loaded, manifest);
        assert_eq!(loaded.sorted_segments_metadata[0].segment_index, 0);
        assert_eq!(loaded.sorted_segments_metadata[1].segment_index, 1);
    }

    #[test]
    fn test_load_absent_manifest() {
        let dir = tempdir().unwrap();
        assert!(Manifest::load(dir.path()).unwrap().is_none());
    }

    #[test]
    fn test_load_corrupt_manifest_is_fatal() {
        let dir = tempdir().unwrap();
        let meta_dir = filename::meta_dir(dir.path());
        std::fs::create_dir_all(&meta_dir).unwrap();
        std::fs::write(filename::manifest_file_path(dir.path()), b"{nope").unwrap();

        let err = Manifest::load(dir.path()).unwrap_err();
        assert!(err.is_invariant());
    }

    #[test]
    fn test_sort_tie_break_on_created_at() {
        let older = SegmentMeta::new(0, 0);
        let mut newer = SegmentMeta::new(0, 100);
        newer.created_at = older.created_at + Duration::seconds(10);

        let manifest = Manifest::new(vec![newer.clone(), older.clone()]);
        assert_eq!(manifest.sorted_segments_metadata[0].id, older.id);
        assert_eq!(manifest.sorted_segments_metadata[1].id, newer.id);
    }

    #[test]
    fn test_rewrite_replaces_contents() {
        let dir = tempdir().unwrap();

        Manifest::new(vec![SegmentMeta::new(0, 0)])
            .save(dir.path())
            .unwrap();

        let replacement = Manifest::new(vec![SegmentMeta::new(0, 0), SegmentMeta::new(1, 50)]);
        replacement.save(dir.path()).unwrap();

        let loaded = Manifest::load(dir.path()).unwrap().unwrap();
        assert_eq!(loaded.sorted_segments_metadata.len(), 2);

        // No temp file left behind
        assert!(!filename::manifest_temp_path(dir.path()).exists());
    }

    #[test]
    fn test_wire_field_names() {
        let manifest = Manifest::new(vec![SegmentMeta::new(2, 7)]);
        let json = serde_json::to_string(&manifest).unwrap();

        assert!(json.contains("\"sortedSegmentsMetadata\""), "json: {}", json);
        assert!(json.contains("\"firstEntryIndex\":7"), "json: {}", json);
        assert!(json.contains("\"segmentIndex\":2"), "json: {}", json);
        assert!(json.contains("\"isCompactedSegment\":false"), "json: {}", json);
    }
}
