//! Generic keyed table
//!
//! A table is a concurrent map of entities that can be flushed to and loaded
//! from a YAML list.

use crate::error::StorageError;
use dashmap::DashMap;
use serde::{Serialize, de::DeserializeOwned};
use std::fmt::Debug;
use std::hash::Hash;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;

/// A persisted record with a unique key
pub trait Entity: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    type Key: Clone + Eq + Hash + Debug + Send + Sync + 'static;

    /// File name of the table inside the data directory
    const FILE: &'static str;

    /// A row in its default state
    fn with_key(key: Self::Key) -> Self;

    fn key(&self) -> Self::Key;
}

/// Concurrent table of entities
#[derive(Clone)]
pub struct Table<E: Entity> {
    rows: Arc<DashMap<E::Key, E>>,
    dirty: Arc<AtomicBool>,
}

impl<E: Entity> Default for Table<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Entity> Table<E> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            rows: Arc::new(DashMap::new()),
            dirty: Arc::new(AtomicBool::new(false)),
        }
    }

    #[must_use]
    pub fn find(&self, key: &E::Key) -> Option<E> {
        self.rows.get(key).map(|row| row.value().clone())
    }

    /// Fetch a row, creating it with defaults if it does not exist
    pub fn find_or_create(&self, key: E::Key) -> E {
        if let Some(row) = self.rows.get(&key) {
            return row.value().clone();
        }
        let row = self
            .rows
            .entry(key.clone())
            .or_insert_with(|| {
                self.mark_dirty();
                E::with_key(key)
            })
            .value()
            .clone();
        row
    }

    /// Atomic read-modify-write of a single row, creating it if needed
    pub fn find_apply_and_merge<F>(&self, key: E::Key, mutate: F) -> E
    where
        F: FnOnce(&mut E),
    {
        let mut row = self
            .rows
            .entry(key.clone())
            .or_insert_with(|| E::with_key(key));
        mutate(row.value_mut());
        self.mark_dirty();
        row.value().clone()
    }

    #[must_use]
    pub fn load_all(&self) -> Vec<E> {
        self.rows.iter().map(|row| row.value().clone()).collect()
    }

    pub fn delete(&self, key: &E::Key) -> Option<E> {
        let removed = self.rows.remove(key).map(|(_, row)| row);
        if removed.is_some() {
            self.mark_dirty();
        }
        removed
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    /// Replace the contents with the rows stored in `dir`.
    ///
    /// A missing file leaves the table empty.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Corrupt` if the file cannot be parsed and
    /// `StorageError::Io` if it cannot be read. The file is left untouched.
    pub async fn load_from(&self, dir: &Path) -> Result<(), StorageError> {
        let path = dir.join(E::FILE);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No stored table at {}, starting empty", path.display());
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let rows = serde_yaml::from_str::<Vec<E>>(&content)
            .map_err(|source| StorageError::Corrupt { path: path.clone(), source })?;
        self.rows.clear();
        for row in rows {
            self.rows.insert(row.key(), row);
        }
        info!("Loaded {} rows from {}", self.rows.len(), path.display());
        Ok(())
    }

    /// Write the table to `dir` if it changed since the last save
    ///
    /// # Errors
    ///
    /// Returns a `StorageError` if the rows cannot be serialized or written.
    pub async fn save_to(&self, dir: &Path) -> Result<bool, StorageError> {
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return Ok(false);
        }

        let rows = self.load_all();
        let written = async {
            let yaml = serde_yaml::to_string(&rows)?;
            // write aside and swap in, so a crash never leaves half a file
            let path = dir.join(E::FILE);
            let temp = path.with_extension("yaml.tmp");
            tokio::fs::write(&temp, yaml).await?;
            tokio::fs::rename(&temp, &path).await?;
            Ok::<_, StorageError>(())
        }
        .await;

        if let Err(e) = written {
            // keep the changes around for the next attempt
            self.mark_dirty();
            return Err(e);
        }
        Ok(true)
    }
}
