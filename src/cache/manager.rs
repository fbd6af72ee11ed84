//! File-backed cache rows
//!
//! Provides a [`FileBackend`] that stores each cache row as a JSON file under an
//! XDG-compliant cache directory, one subdirectory per library.

use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use super::backend::{CacheBackend, CacheRow};
use super::CacheError;

/// Stores cache rows as JSON files on disk
///
/// Rows live at `<cache_dir>/<api_user_id>/<request_id>.json` (`~/.cache/citecache/`
/// on Linux). Each write goes to its own temporary file that is then renamed
/// over the row, so concurrent writers settle on last-write-wins.
#[derive(Debug, Clone)]
pub struct FileBackend {
    /// Directory where row files are stored
    cache_dir: PathBuf,
}

impl FileBackend {
    /// Creates a FileBackend using the XDG cache directory
    ///
    /// Returns `None` if the cache directory cannot be determined (e.g., no home directory).
    pub fn new() -> Option<Self> {
        let project_dirs = ProjectDirs::from("", "", "citecache")?;
        let cache_dir = project_dirs.cache_dir().to_path_buf();
        Some(Self { cache_dir })
    }

    /// Creates a FileBackend rooted at a specific directory
    pub fn with_dir(cache_dir: PathBuf) -> Self {
        Self { cache_dir }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    fn account_dir(&self, api_user_id: &str) -> PathBuf {
        self.cache_dir.join(path_component(api_user_id))
    }

    fn row_path(&self, request_id: &str, api_user_id: &str) -> PathBuf {
        self.account_dir(api_user_id)
            .join(format!("{}.json", path_component(request_id)))
    }

    fn read_row(&self, request_id: &str, api_user_id: &str) -> Result<Option<CacheRow>, CacheError> {
        let path = self.row_path(request_id, api_user_id);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let row: CacheRow = serde_json::from_str(&content)
            .map_err(|e| CacheError::Corrupt(format!("{}: {}", path.display(), e)))?;

        // Distinct ids can share a sanitized file name
        if row.request_id != request_id || row.api_user_id != api_user_id {
            tracing::debug!(path = %path.display(), "Row file belongs to another key");
            return Ok(None);
        }
        Ok(Some(row))
    }

    fn write_row(&self, row: &CacheRow) -> Result<(), CacheError> {
        let dir = self.account_dir(&row.api_user_id);
        fs::create_dir_all(&dir)?;

        let json = serde_json::to_string_pretty(row)
            .map_err(|e| CacheError::Corrupt(e.to_string()))?;

        let path = self.row_path(&row.request_id, &row.api_user_id);
        let mut tmp = NamedTempFile::new_in(&dir)?;
        tmp.write_all(json.as_bytes())?;
        tmp.persist(&path).map_err(|e| e.error)?;
        Ok(())
    }
}

impl CacheBackend for FileBackend {
    fn find(&self, request_id: &str, api_user_id: &str) -> Result<Vec<CacheRow>, CacheError> {
        Ok(self.read_row(request_id, api_user_id)?.into_iter().collect())
    }

    fn upsert(&self, row: CacheRow) -> Result<(), CacheError> {
        self.write_row(&row)
    }

    fn touch(
        &self,
        request_id: &str,
        api_user_id: &str,
        retrieved: DateTime<Utc>,
    ) -> Result<(), CacheError> {
        let row = match self.read_row(request_id, api_user_id)? {
            Some(mut row) => {
                row.retrieved = Some(retrieved);
                row
            }
            None => CacheRow::touched(request_id, api_user_id, retrieved),
        };
        self.write_row(&row)
    }

    fn clear_account(&self, api_user_id: &str) -> Result<usize, CacheError> {
        let dir = self.account_dir(api_user_id);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut removed = 0;
        for entry in entries {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                fs::remove_file(&path)?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

/// Maps an id onto a safe single path component
fn path_component(id: &str) -> String {
    if id.is_empty() {
        return "_".to_string();
    }
    id.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
