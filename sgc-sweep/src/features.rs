//! Feature matrix loading and caching
//!
//! [`FeatureSource`] is the loading seam: production code reads the matrices
//! written by the bag-of-words and topic model producers, tests plug in
//! in-memory sources. [`FeatureLoader`] memoizes per [`ParameterKey`] so every
//! matrix is read at most once per sweep, however many cells share it.

use crate::error::{SweepError, SweepResult};
use crate::types::{FeatureFamily, ParameterKey};
use once_cell::sync::OnceCell;
use sgc_common::FeatureMatrix;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// Produces the feature matrix for a parameter key
pub trait FeatureSource: Send + Sync {
    fn load(&self, key: &ParameterKey) -> SweepResult<FeatureMatrix>;
}

/// Reads matrices from the producers' file layout
#[derive(Debug, Clone)]
pub struct FileFeatureSource {
    mfw_dir: PathBuf,
    topics_dir: PathBuf,
}

impl FileFeatureSource {
    pub fn new(mfw_dir: impl Into<PathBuf>, topics_dir: impl Into<PathBuf>) -> Self {
        Self {
            mfw_dir: mfw_dir.into(),
            topics_dir: topics_dir.into(),
        }
    }

    pub fn path_for(&self, key: &ParameterKey) -> PathBuf {
        match key.family() {
            FeatureFamily::Mfw => key.backing_path(&self.mfw_dir),
            FeatureFamily::Topics => key.backing_path(&self.topics_dir),
        }
    }
}

impl FeatureSource for FileFeatureSource {
    fn load(&self, key: &ParameterKey) -> SweepResult<FeatureMatrix> {
        let path = self.path_for(key);
        match FeatureMatrix::read(&path) {
            Ok(matrix) => {
                info!(
                    key = %key,
                    path = %path.display(),
                    rows = matrix.n_rows(),
                    features = matrix.n_features(),
                    "Loaded feature matrix"
                );
                Ok(matrix)
            }
            Err(sgc_common::Error::NotFound(path)) => Err(SweepError::MissingFeatureSet {
                key: key.to_string(),
                path,
            }),
            Err(e) => Err(SweepError::Configuration(format!(
                "Feature matrix {} is unusable: {}",
                path.display(),
                e
            ))),
        }
    }
}

type CacheSlot = Arc<OnceCell<Arc<FeatureMatrix>>>;

/// Read-through cache over a [`FeatureSource`]
///
/// Each key gets its own once-cell: concurrent requests for one key wait for a
/// single load while other keys proceed. Failed loads are not cached, so a
/// later request retries.
pub struct FeatureLoader {
    source: Arc<dyn FeatureSource>,
    slots: Mutex<HashMap<ParameterKey, CacheSlot>>,
    loads: AtomicUsize,
}

impl FeatureLoader {
    pub fn new(source: Arc<dyn FeatureSource>) -> Self {
        Self {
            source,
            slots: Mutex::new(HashMap::new()),
            loads: AtomicUsize::new(0),
        }
    }

    /// Matrix for `key`, loading it on first use
    pub fn get(&self, key: &ParameterKey) -> SweepResult<Arc<FeatureMatrix>> {
        let slot = {
            // A poisoned map is still structurally valid (inserts are atomic)
            let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(slots.entry(key.clone()).or_default())
        };

        slot.get_or_try_init(|| {
            self.loads.fetch_add(1, Ordering::Relaxed);
            debug!(key = %key, "Feature cache miss");
            self.source.load(key).map(Arc::new)
        })
        .map(Arc::clone)
    }

    /// Number of source loads performed (cache misses, failed loads included)
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::Relaxed)
    }
}
