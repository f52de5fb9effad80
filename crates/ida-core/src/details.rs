//! Answers "what files exist under this path" from the storage-cache index
//! instead of walking the filesystem, and joins in frozen-file records.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::clock::format_timestamp;
use crate::config::AppConfig;
use crate::error::{Error, Result};
use crate::storage::models::{CacheEntry, FrozenFile};
use crate::storage::Database;

/// Root of every user's files within their storage.
const FILES_ROOT: &str = "files";

/// Lookups against the file-sharing server's storage-cache index.
pub trait StorageIndex {
    /// Numeric storage of a user account's home, if the account exists.
    fn storage_id(&self, account: &str) -> Result<Option<i64>>;

    /// The entry at exactly `path`, file or folder.
    fn entry(&self, storage: i64, path: &str) -> Result<Option<CacheEntry>>;

    /// Non-folder entries whose path starts with `prefix`, path ascending, at most `limit`.
    fn files_under(&self, storage: i64, prefix: &str, limit: i64) -> Result<Vec<CacheEntry>>;
}

impl StorageIndex for Database {
    fn storage_id(&self, account: &str) -> Result<Option<i64>> {
        Ok(self.select_storage_numeric_id(&format!("home::{}", account))?)
    }

    fn entry(&self, storage: i64, path: &str) -> Result<Option<CacheEntry>> {
        Ok(self.select_cache_entry(storage, path)?)
    }

    fn files_under(&self, storage: i64, prefix: &str, limit: i64) -> Result<Vec<CacheEntry>> {
        Ok(self.select_cache_files_by_prefix(storage, prefix, limit)?)
    }
}

/// File metadata as presented to API and UI callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileInfo {
    pub node: i64,
    /// Pathname relative to the files root, e.g. `/2017_1234+/dir/file.dat`.
    pub pathname: String,
    pub name: String,
    pub size: i64,
    pub mimetype: String,
    pub modified: String,
    pub etag: Option<String>,
}

/// Turns storage-cache rows into file info.
pub trait FileView {
    fn file_info(&self, entry: &CacheEntry) -> Result<FileInfo>;
}

/// Materializes file info directly from the cached row.
pub struct CacheFileView;

impl FileView for CacheFileView {
    fn file_info(&self, entry: &CacheEntry) -> Result<FileInfo> {
        let pathname = entry
            .path
            .strip_prefix(FILES_ROOT)
            .filter(|rest| rest.starts_with('/'))
            .ok_or_else(|| {
                Error::Inconsistent(format!("{} lies outside the files root", entry.path))
            })?;
        if entry.name.is_empty() {
            return Err(Error::Inconsistent(format!("{} has no name", entry.path)));
        }
        if entry.size < 0 {
            return Err(Error::Inconsistent(format!(
                "{} has negative size {}",
                entry.path, entry.size
            )));
        }
        let modified = DateTime::<Utc>::from_timestamp(entry.mtime, 0).ok_or_else(|| {
            Error::Inconsistent(format!("{} has invalid mtime {}", entry.path, entry.mtime))
        })?;

        Ok(FileInfo {
            node: entry.fileid,
            pathname: pathname.to_string(),
            name: entry.name.clone(),
            size: entry.size,
            mimetype: entry.mimetype.clone(),
            modified: format_timestamp(modified),
            etag: entry.etag.clone(),
        })
    }
}

/// A cache row that could not be materialized.
#[derive(Debug, Clone, Serialize)]
pub struct SkippedEntry {
    pub path: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FileDetails {
    /// Number of files materialized; above the requested limit when truncated.
    pub count: usize,
    pub files: Vec<FileInfo>,
    pub skipped: Vec<SkippedEntry>,
}

pub struct FileDetailsResolver<'a> {
    db: &'a Database,
    index: &'a dyn StorageIndex,
    view: &'a dyn FileView,
    config: &'a AppConfig,
}

impl<'a> FileDetailsResolver<'a> {
    pub fn new(db: &'a Database, config: &'a AppConfig) -> Self {
        Self {
            db,
            index: db,
            view: &CacheFileView,
            config,
        }
    }

    pub fn with_index(mut self, index: &'a dyn StorageIndex) -> Self {
        self.index = index;
        self
    }

    pub fn with_view(mut self, view: &'a dyn FileView) -> Self {
        self.view = view;
        self
    }

    /// Files at or under `full_pathname` (a storage path such as
    /// `files/2017_1234+/dir`). Folders yield at most `limit + 1` files so
    /// callers can tell the listing was truncated.
    pub fn get_file_details(
        &self,
        project: &str,
        full_pathname: &str,
        limit: u32,
    ) -> Result<FileDetails> {
        let account = self.config.project_user(project);
        let storage = match self.index.storage_id(&account)? {
            Some(storage) => storage,
            None => {
                debug!("No storage for account {}; returning no files", account);
                return Ok(FileDetails::default());
            }
        };

        let path = full_pathname.trim_end_matches('/');
        let rows = match self.index.entry(storage, path)? {
            Some(entry) if !entry.is_folder() => vec![entry],
            Some(_) => {
                let prefix = format!("{}/", path);
                self.index.files_under(storage, &prefix, i64::from(limit) + 1)?
            }
            None => Vec::new(),
        };

        let mut details = FileDetails::default();
        for row in rows {
            match self.view.file_info(&row) {
                Ok(info) => details.files.push(info),
                Err(e) => {
                    warn!("Skipping cache entry {} ({}): {}", row.fileid, row.path, e);
                    details.skipped.push(SkippedEntry {
                        path: row.path,
                        reason: e.to_string(),
                    });
                }
            }
        }
        details.count = details.files.len();
        Ok(details)
    }

    /// Active frozen-file records under a scope relative to the frozen folder,
    /// keyed by frozen pathname (`/<project>/...`). The newest record wins.
    pub fn get_ida_frozen_file_details(
        &self,
        project: &str,
        path_scope: &str,
    ) -> Result<BTreeMap<String, FrozenFile>> {
        let rows = self
            .db
            .select_active_frozen_files_by_prefix(project, path_scope)?;
        let frozen_root = self.config.frozen_root(project);

        let mut files = BTreeMap::new();
        for row in rows {
            files
                .entry(format!("{}{}", frozen_root, row.pathname))
                .or_insert(row);
        }
        Ok(files)
    }
}
