//! Record loader
//!
//! Discovers JSON-lines files under a directory tree and decodes them into
//! [`RawRecord`]s. Files are visited in path order; records keep their order
//! within each file.

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::LoadError;
use crate::frame::{Frame, RawRecord};

/// Default file name pattern
pub const DEFAULT_PATTERN: &str = "*.json";

/// Find every file under `root` (recursively) whose name matches `pattern`
///
/// A `root` that is missing or not a directory, and any directory that cannot
/// be read during the walk, fail with [`LoadError::Io`].
pub fn discover_files(root: &Path, pattern: &str) -> Result<Vec<PathBuf>, LoadError> {
    // Validate the name pattern on its own so errors point at the user input
    glob::Pattern::new(pattern)
        .map_err(|e| LoadError::InvalidPattern(format!("{}: {}", pattern, e)))?;

    let metadata = std::fs::metadata(root).map_err(|source| LoadError::Io {
        path: root.to_path_buf(),
        source,
    })?;
    if !metadata.is_dir() {
        return Err(LoadError::Io {
            path: root.to_path_buf(),
            source: io::Error::new(io::ErrorKind::NotADirectory, "input root is not a directory"),
        });
    }

    let full_pattern = format!(
        "{}/**/{}",
        glob::Pattern::escape(&root.display().to_string()),
        pattern
    );
    let entries = glob::glob(&full_pattern)
        .map_err(|e| LoadError::InvalidPattern(format!("{}: {}", pattern, e)))?;

    let mut files = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| LoadError::Io {
            path: e.path().to_path_buf(),
            source: e.into_error(),
        })?;
        if path.is_file() {
            files.push(path);
        }
    }

    files.sort();
    Ok(files)
}

/// Decode one JSON-lines file
///
/// Blank lines are skipped. Line numbers in errors are 1-based.
pub fn read_json_lines(path: &Path) -> Result<Vec<RawRecord>, LoadError> {
    let io_error = |source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    };

    let file = File::open(path).map_err(io_error)?;
    let reader = BufReader::new(file);
    let mut records = Vec::new();

    for (index, line) in reader.lines().enumerate() {
        let line = line.map_err(io_error)?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let parse_error = |error: String| LoadError::Parse {
            path: path.to_path_buf(),
            line: index + 1,
            error,
        };

        match serde_json::from_str::<serde_json::Value>(trimmed) {
            Ok(serde_json::Value::Object(map)) => records.push(map),
            Ok(other) => {
                return Err(parse_error(format!(
                    "expected a JSON object, found {}",
                    json_kind(&other)
                )));
            }
            Err(e) => return Err(parse_error(e.to_string())),
        }
    }

    Ok(records)
}

/// Load every record under `root` whose file name matches `pattern`
pub fn load(root: &Path, pattern: &str) -> Result<Vec<RawRecord>, LoadError> {
    let files = discover_files(root, pattern)?;
    info!(root = %root.display(), files = files.len(), "Discovered input files");

    let mut records = Vec::new();
    for path in &files {
        let file_records = read_json_lines(path)?;
        debug!(path = %path.display(), records = file_records.len(), "Loaded file");
        records.extend(file_records);
    }

    info!(records = records.len(), "Loaded records");
    Ok(records)
}

/// Load records and assemble them into a [`Frame`]
pub fn load_frame(root: &Path, pattern: &str) -> Result<Frame, LoadError> {
    let records = load(root, pattern)?;
    Ok(Frame::from_records(&records))
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(dir: &Path, relative: &str, content: &str) -> PathBuf {
        let path = dir.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_discover_is_recursive_and_sorted() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "b/TRB.json", "{}");
        write(temp.path(), "a/x/TRA.json", "{}");
        write(temp.path(), "top.json", "{}");
        write(temp.path(), "a/notes.txt", "ignored");

        let files = discover_files(temp.path(), "*.json").unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|p| p.strip_prefix(temp.path()).unwrap().display().to_string())
            .collect();
        assert_eq!(names, vec!["a/x/TRA.json", "b/TRB.json", "top.json"]);
    }

    #[test]
    fn test_load_preserves_order_and_skips_blank_lines() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "1.json", "{\"n\": 1}\n\n{\"n\": 2}\n");
        write(temp.path(), "2.json", "{\"n\": 3}");

        let records = load(temp.path(), "*.json").unwrap();
        let ns: Vec<i64> = records.iter().map(|r| r["n"].as_i64().unwrap()).collect();
        assert_eq!(ns, vec![1, 2, 3]);
    }

    #[test]
    fn test_empty_tree() {
        let temp = TempDir::new().unwrap();
        assert!(load(temp.path(), "*.json").unwrap().is_empty());
        assert!(load_frame(temp.path(), "*.json").unwrap().is_empty());
    }

    #[test]
    fn test_missing_root_is_io_error() {
        let temp = TempDir::new().unwrap();
        let missing = temp.path().join("song_dta");

        match load(&missing, "*.json").unwrap_err() {
            LoadError::Io { path, source } => {
                assert_eq!(path, missing);
                assert_eq!(source.kind(), io::ErrorKind::NotFound);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_file_root_is_io_error() {
        let temp = TempDir::new().unwrap();
        let file = write(temp.path(), "single.json", "{}");
        assert!(matches!(
            discover_files(&file, "*.json").unwrap_err(),
            LoadError::Io { path, .. } if path == file
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_directory_is_io_error() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        write(temp.path(), "ok/a.json", "{}");
        write(temp.path(), "locked/b.json", "{}");
        let locked = temp.path().join("locked");
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();

        // Privileged users read through the mode bits
        if fs::read_dir(&locked).is_ok() {
            fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
            return;
        }

        let result = discover_files(temp.path(), "*.json");
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
        assert!(matches!(result.unwrap_err(), LoadError::Io { .. }));
    }

    #[test]
    fn test_parse_error_reports_line() {
        let temp = TempDir::new().unwrap();
        let path = write(temp.path(), "bad.json", "{\"n\": 1}\n{not json}\n");

        match load(temp.path(), "*.json").unwrap_err() {
            LoadError::Parse { path: p, line, .. } => {
                assert_eq!(p, path);
                assert_eq!(line, 2);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_non_object_line_is_rejected() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "arr.json", "[1, 2, 3]\n");
        assert!(matches!(
            load(temp.path(), "*.json").unwrap_err(),
            LoadError::Parse { line: 1, .. }
        ));
    }

    #[test]
    fn test_invalid_pattern() {
        let temp = TempDir::new().unwrap();
        assert!(matches!(
            discover_files(temp.path(), "[*.json").unwrap_err(),
            LoadError::InvalidPattern(_)
        ));
    }

    #[test]
    fn test_load_frame_unions_fields() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "a.json", "{\"a\": 1}\n{\"b\": \"x\"}\n");
        let frame = load_frame(temp.path(), "*.json").unwrap();
        assert_eq!(frame.columns(), &["a".to_string(), "b".to_string()]);
        assert_eq!(frame.len(), 2);
    }
}
