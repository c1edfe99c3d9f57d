//! Shared index cache
//!
//! Keeps one `Arc<Index>` per media file and knows how to fall back from
//! memory to an index file to a fresh scan.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info, warn};

use super::{Index, Indexer};
use crate::engine::Engine;
use crate::error::{ErrorKind, ErrorSubkind, Result};

/// Path-keyed cache of indexes
#[derive(Default)]
pub struct IndexCache {
    entries: DashMap<PathBuf, Arc<Index>>,
    /// Number of full scans performed
    builds: AtomicUsize,
}

impl IndexCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get<P: AsRef<Path>>(&self, media: P) -> Option<Arc<Index>> {
        self.entries.get(media.as_ref()).map(|e| e.value().clone())
    }

    pub fn insert<P: AsRef<Path>>(&self, media: P, index: Arc<Index>) {
        self.entries.insert(media.as_ref().to_path_buf(), index);
    }

    pub fn remove<P: AsRef<Path>>(&self, media: P) -> Option<Arc<Index>> {
        self.entries.remove(media.as_ref()).map(|(_, index)| index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    /// How many times the cache had to scan a file.
    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::Relaxed)
    }

    /// Return the index for `media`, trying memory, then `index_file`, then
    /// a full scan with the configured error policy. A freshly built index
    /// is written to `index_file` when one is given.
    pub fn load_or_index<P: AsRef<Path>>(
        &self,
        engine: &Engine,
        media: P,
        index_file: Option<&Path>,
    ) -> Result<Arc<Index>> {
        let media = media.as_ref();

        if let Some(index) = self.get(media) {
            if index.matches(media) {
                debug!("Index cache hit for {:?}", media);
                return Ok(index);
            }
            info!("Cached index for {:?} is stale, dropping it", media);
            self.remove(media);
        }

        if let Some(path) = index_file.filter(|p| p.exists()) {
            match Index::read_file(path) {
                Ok(index) if index.matches(media) => {
                    let index = Arc::new(index);
                    self.insert(media, index.clone());
                    return Ok(index);
                }
                Ok(_) => info!("Index file {:?} belongs to another file, rebuilding", path),
                Err(e) if e.is(ErrorKind::Serialization, ErrorSubkind::Version) => {
                    info!("Index file {:?} has an old version, rebuilding", path)
                }
                Err(e) => warn!("Can't use index file {:?}: {}", path, e),
            }
        }

        let policy = engine.config().indexing.error_handling;
        let index = Indexer::open(engine, media)?.index(policy)?;
        self.builds.fetch_add(1, Ordering::Relaxed);

        if let Some(path) = index_file {
            if let Err(e) = index.write_file(path) {
                warn!("Failed to save index for {:?}: {}", media, e);
            }
        }

        let index = Arc::new(index);
        self.insert(media, index.clone());
        Ok(index)
    }
}
