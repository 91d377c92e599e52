//! Data-directory naming conventions.

use std::path::{Path, PathBuf};

/// Generate a segment log file path.
pub fn segment_file_path(data_dir: &Path, segment_index: u64, id: &str) -> PathBuf {
    data_dir.join(format!("wal_segment_{}_{}.wal", segment_index, id))
}

/// Generate the metadata subdirectory path.
pub fn meta_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("meta")
}

/// Generate the manifest file path.
pub fn manifest_file_path(data_dir: &Path) -> PathBuf {
    meta_dir(data_dir).join("wal_metadata.dat")
}

/// Generate the temporary manifest path used for atomic rewrites.
pub fn manifest_temp_path(data_dir: &Path) -> PathBuf {
    meta_dir(data_dir).join("wal_metadata.tmp")
}

/// Generate the lock file path.
pub fn lock_file_path(data_dir: &Path) -> PathBuf {
    data_dir.join("LOCK")
}

/// Parse a segment file name into its ordinal and id.
///
/// Returns `None` if the name doesn't match `wal_segment_<index>_<id>.wal`.
pub fn parse_segment_file_name(name: &str) -> Option<(u64, String)> {
    let rest = name.strip_prefix("wal_segment_")?;
    let rest = rest.strip_suffix(".wal")?;

    let (index_str, id) = rest.split_once('_')?;
    let index = index_str.parse::<u64>().ok()?;

    if id.is_empty() {
        return None;
    }

    Some((index, id.to_string()))
}

/// List all segment files in the data directory.
pub fn list_segment_files(data_dir: &Path) -> std::io::Result<Vec<(u64, String)>> {
    let mut segments = Vec::new();

    for entry in std::fs::read_dir(data_dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();

        if let Some(parsed) = parse_segment_file_name(&name) {
            segments.push(parsed);
        }
    }

    segments.sort();
    Ok(segments)
}

/// Delete a file, ignoring "not found" errors.
pub fn delete_file(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Create directory if it doesn't exist.
pub fn create_dir_if_missing(path: &Path) -> std::io::Result<()> {
    match std::fs::create_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
        Err(e) => Err(e),
    }
}

/// Sync a directory to ensure file operations are durable.
pub fn sync_dir(path: &Path) -> std::io::Result<()> {
    let dir = std::fs::File::open(path)?;
    dir.sync_all()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_file_paths() {
        let data_dir = Path::new("/data/kv");

        assert_eq!(
            segment_file_path(data_dir, 3, "abc-123"),
            Path::new("/data/kv/wal_segment_3_abc-123.wal")
        );
        assert_eq!(
            manifest_file_path(data_dir),
            Path::new("/data/kv/meta/wal_metadata.dat")
        );
        assert_eq!(lock_file_path(data_dir), Path::new("/data/kv/LOCK"));
    }

    #[test]
    fn test_parse_segment_file_name() {
        assert_eq!(
            parse_segment_file_name("wal_segment_0_9b2d.wal"),
            Some((0, "9b2d".to_string()))
        );
        assert_eq!(
            parse_segment_file_name("wal_segment_17_a_b_c.wal"),
            Some((17, "a_b_c".to_string()))
        );

        assert_eq!(parse_segment_file_name("wal_segment_x_id.wal"), None);
        assert_eq!(parse_segment_file_name("wal_segment_3_.wal"), None);
        assert_eq!(parse_segment_file_name("random.txt"), None);
        assert_eq!(parse_segment_file_name("wal_metadata.dat"), None);
    }

    #[test]
    fn test_list_segment_files() {
        let dir = tempdir().unwrap();

        std::fs::write(segment_file_path(dir.path(), 1, "aa"), "").unwrap();
        std::fs::write(segment_file_path(dir.path(), 0, "bb"), "").unwrap();
        std::fs::write(dir.path().join("LOCK"), "").unwrap();

        let files = list_segment_files(dir.path()).unwrap();
        assert_eq!(
            files,
            vec![(0, "bb".to_string()), (1, "aa".to_string())]
        );
    }

    #[test]
    fn test_delete_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("gone.wal");

        // Deleting a non-existent file succeeds
        assert!(delete_file(&path).is_ok());

        std::fs::write(&path, "x").unwrap();
        delete_file(&path).unwrap();
        assert!(!path.exists());
    }
}
