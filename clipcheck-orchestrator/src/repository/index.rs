//! Lookup Indices
//!
//! Two flat JSON documents kept beside the jobs directory:
//! - `url_lang_index.json`: `"<normalized-url>|<lang>"` to one job id
//! - `url_index.json`: normalized url to every job id created for it
//!
//! Every mutation rewrites the affected document immediately.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use clipcheck_core::url::normalize_url;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use super::Result;
use super::job::write_json_atomic;

const URL_LANG_INDEX_FILE: &str = "url_lang_index.json";
const URL_INDEX_FILE: &str = "url_index.json";
const KEY_SEPARATOR: char = '|';

/// Builds the url+lang index key
pub fn cache_key(url: &str, language: &str) -> String {
    format!("{}{}{}", normalize_url(url), KEY_SEPARATOR, language)
}

/// In-memory copy of both indices with write-through persistence
#[derive(Debug)]
pub struct JobIndex {
    url_lang_path: PathBuf,
    url_path: PathBuf,
    url_lang: BTreeMap<String, String>,
    by_url: BTreeMap<String, Vec<String>>,
}

impl JobIndex {
    /// Loads both documents from `data_dir`
    ///
    /// Missing or corrupt documents start out empty.
    pub fn load(data_dir: &Path) -> Self {
        let url_lang_path = data_dir.join(URL_LANG_INDEX_FILE);
        let url_path = data_dir.join(URL_INDEX_FILE);
        let url_lang = read_index(&url_lang_path);
        let by_url = read_index(&url_path);

        Self {
            url_lang_path,
            url_path,
            url_lang,
            by_url,
        }
    }

    // =============================================================================
    // Lookups
    // =============================================================================

    pub fn lookup_by_url_and_lang(&self, url: &str, language: &str) -> Option<&str> {
        self.url_lang
            .get(&cache_key(url, language))
            .map(String::as_str)
    }

    /// Every job id known for a url, regardless of language
    ///
    /// Falls back to scanning the url+lang index by prefix when the url-only
    /// index has nothing for this url.
    pub fn lookup_job_ids_for_url(&self, url: &str) -> Vec<String> {
        let normalized = normalize_url(url);
        if let Some(ids) = self.by_url.get(&normalized) {
            if !ids.is_empty() {
                return ids.clone();
            }
        }

        let prefix = format!("{normalized}{KEY_SEPARATOR}");
        let mut ids: Vec<String> = Vec::new();
        for (_, id) in self.url_lang.iter().filter(|(key, _)| key.starts_with(&prefix)) {
            if !ids.contains(id) {
                ids.push(id.clone());
            }
        }
        ids
    }

    // =============================================================================
    // Mutations
    // =============================================================================

    /// Points the (url, language) key at a job, replacing any previous id
    pub fn record(&mut self, url: &str, language: &str, job_id: &str) -> Result<()> {
        self.url_lang
            .insert(cache_key(url, language), job_id.to_string());
        write_json_atomic(&self.url_lang_path, &self.url_lang)
    }

    /// Adds a job id to the url-only index
    pub fn record_url(&mut self, url: &str, job_id: &str) -> Result<()> {
        if self.insert_url(url, job_id) {
            write_json_atomic(&self.url_path, &self.by_url)?;
        }
        Ok(())
    }

    /// Drops every reference to a job id from both indices
    pub fn remove(&mut self, job_id: &str) -> Result<()> {
        let before = self.url_lang.len();
        self.url_lang.retain(|_, id| id != job_id);
        if self.url_lang.len() != before {
            write_json_atomic(&self.url_lang_path, &self.url_lang)?;
        }

        let mut changed = false;
        self.by_url.retain(|_, ids| {
            let len = ids.len();
            ids.retain(|id| id != job_id);
            changed |= ids.len() != len;
            !ids.is_empty()
        });
        if changed {
            write_json_atomic(&self.url_path, &self.by_url)?;
        }
        Ok(())
    }

    /// Empties both indices
    pub fn clear(&mut self) -> Result<()> {
        self.url_lang.clear();
        self.by_url.clear();
        write_json_atomic(&self.url_lang_path, &self.url_lang)?;
        write_json_atomic(&self.url_path, &self.by_url)
    }

    /// Repairs the url-only index from `(url, job id)` pairs
    ///
    /// Writes the document only when something was added. Returns the number
    /// of inserted entries.
    pub fn backfill<'a, I>(&mut self, entries: I) -> Result<usize>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let added = entries
            .into_iter()
            .filter(|(url, job_id)| self.insert_url(url, job_id))
            .count();

        if added > 0 {
            info!("Backfilled {} url index entries", added);
            write_json_atomic(&self.url_path, &self.by_url)?;
        }
        Ok(added)
    }

    fn insert_url(&mut self, url: &str, job_id: &str) -> bool {
        let normalized = normalize_url(url);
        if normalized.is_empty() {
            return false;
        }
        let ids = self.by_url.entry(normalized).or_default();
        if ids.iter().any(|id| id == job_id) {
            return false;
        }
        ids.push(job_id.to_string());
        true
    }
}

fn read_index<T: DeserializeOwned + Default>(path: &Path) -> T {
    let data = match fs::read_to_string(path) {
        Ok(data) => data,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!("No index at {}, starting empty", path.display());
            return T::default();
        }
        Err(e) => {
            warn!("Failed to read index {}: {}", path.display(), e);
            return T::default();
        }
    };

    serde_json::from_str(&data).unwrap_or_else(|e| {
        warn!("Corrupt index {}, starting empty: {}", path.display(), e);
        T::default()
    })
}
