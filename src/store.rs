//! Atomic JSON artifact store: write-temp-then-fsync-then-rename, with a
//! forward-compatible load path that tolerates unknown fields but refuses a
//! schema version newer than this binary understands.

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::ConfigError;
use crate::models::CURRENT_SCHEMA_VERSION;

/// Write `value` to `path` atomically: serialize to a sibling `.tmp` file,
/// fsync it, then rename over the destination. A crash mid-write leaves the
/// previous `path` untouched.
pub fn write_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp_path = path.with_extension("tmp");
    let json = serde_json::to_vec_pretty(value)?;
    {
        let mut file = File::create(&tmp_path)?;
        file.write_all(&json)?;
        file.sync_all()?;
    }
    fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Load and deserialize a JSON document, tolerating unknown/extra fields.
/// Callers that persist a `schema_version` field should check it with
/// [`check_schema_version`] after loading.
pub fn load<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let bytes = fs::read(path)?;
    let value = serde_json::from_slice(&bytes)?;
    Ok(value)
}

/// Refuse to proceed if `found` is newer than what this binary supports.
/// Older versions are accepted; the forward-compat contract only protects
/// against a newer binary's document being fed to an older one.
pub fn check_schema_version(found: u32) -> Result<(), ConfigError> {
    if found > CURRENT_SCHEMA_VERSION {
        return Err(ConfigError::UnsupportedSchemaVersion {
            found,
            supported: CURRENT_SCHEMA_VERSION,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::tempdir;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Doc {
        schema_version: u32,
        name: String,
    }

    #[test]
    fn write_atomic_then_load_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("doc.json");
        let doc = Doc {
            schema_version: 1,
            name: "hello".into(),
        };
        write_atomic(&path, &doc).unwrap();
        let loaded: Doc = load(&path).unwrap();
        assert_eq!(loaded, doc);
    }

    #[test]
    fn write_atomic_leaves_no_tmp_file_behind() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("doc.json");
        write_atomic(
            &path,
            &Doc {
                schema_version: 1,
                name: "x".into(),
            },
        )
        .unwrap();
        assert!(!path.with_extension("tmp").exists());
        assert!(path.exists());
    }

    #[test]
    fn write_atomic_creates_parent_directories() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("deep").join("doc.json");
        write_atomic(
            &path,
            &Doc {
                schema_version: 1,
                name: "x".into(),
            },
        )
        .unwrap();
        assert!(path.exists());
    }

    #[test]
    fn check_schema_version_accepts_current_and_older() {
        assert!(check_schema_version(CURRENT_SCHEMA_VERSION).is_ok());
        if CURRENT_SCHEMA_VERSION > 0 {
            assert!(check_schema_version(CURRENT_SCHEMA_VERSION - 1).is_ok());
        }
    }

    #[test]
    fn check_schema_version_refuses_newer() {
        let err = check_schema_version(CURRENT_SCHEMA_VERSION + 1).unwrap_err();
        match err {
            ConfigError::UnsupportedSchemaVersion { found, supported } => {
                assert_eq!(found, CURRENT_SCHEMA_VERSION + 1);
                assert_eq!(supported, CURRENT_SCHEMA_VERSION);
            }
            _ => panic!("expected UnsupportedSchemaVersion"),
        }
    }
}
</content>
