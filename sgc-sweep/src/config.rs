//! Sweep configuration
//!
//! One explicit [`SweepConfiguration`] value drives the whole sweep. It is
//! deserialized from TOML with serde defaults, validated up front (every problem
//! is reported at once) and copied next to the results as `sweep_resolved.toml`.

use crate::error::{SweepError, SweepResult};
use crate::summary::F1ZeroPolicy;
use crate::types::{
    ClassifierSpec, Normalization, ParameterKey, SubgenreContrast, DEFAULT_TOPIC_ITERATIONS,
    WORD_UNIT,
};
use serde::{Deserialize, Serialize};
use sgc_common::config::{load_toml, LoggingConfig};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Environment variable naming the sweep config file
pub const CONFIG_ENV_VAR: &str = "SGC_SWEEP_CONFIG";

/// Default config file name
pub const CONFIG_FILE_NAME: &str = "sweep.toml";

/// Complete sweep configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepConfiguration {
    /// Sweep-wide seed; per-draw seeds are derived from it
    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Resampling repetitions per contrast
    #[serde(default = "default_repetitions")]
    pub repetitions: u32,

    /// Cross-validation folds per run
    #[serde(default = "default_folds")]
    pub folds: usize,

    /// Shuffle class members before fold assignment (seeded per draw)
    #[serde(default)]
    pub shuffle_folds: bool,

    /// Worker threads for grid cells (defaults to available parallelism)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workers: Option<usize>,

    /// Label value marking examples excluded from every contrast
    #[serde(default = "default_unknown_label")]
    pub unknown_label: String,

    /// Treatment of F1 == 0.0 in summaries
    #[serde(default)]
    pub f1_zero_policy: F1ZeroPolicy,

    /// Features listed per side in `top_features.csv`
    #[serde(default = "default_top_features")]
    pub top_features: usize,

    /// Metadata CSV (first column id, one column per label level)
    pub metadata_file: PathBuf,

    /// Directory holding the MFW matrices (and topic folders unless overridden)
    pub features_dir: PathBuf,

    /// Directory receiving every result table
    pub output_dir: PathBuf,

    pub contrasts: Vec<SubgenreContrast>,

    #[serde(default)]
    pub features: FeatureAxes,

    pub classifiers: Vec<ClassifierSpec>,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Feature axes of the grid (`[features.mfw]`, `[features.topics]`)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeatureAxes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mfw: Option<MfwAxes>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topics: Option<TopicAxes>,
}

/// MFW axes: sizes × token units × normalizations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MfwAxes {
    pub sizes: Vec<u32>,

    #[serde(default = "default_token_units")]
    pub token_units: Vec<String>,

    #[serde(default = "default_normalizations")]
    pub normalizations: Vec<Normalization>,
}

/// Topic axes: counts × optimize intervals × model repetitions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicAxes {
    pub counts: Vec<u32>,

    #[serde(default = "default_topic_iterations")]
    pub iterations: u32,

    /// 0 disables hyperparameter optimization
    #[serde(default = "default_optimize_intervals")]
    pub optimize_intervals: Vec<u32>,

    /// Number of topic model repetitions per setting
    #[serde(default = "default_topic_repetitions")]
    pub repetitions: u32,

    /// Directory holding the topic model folders (defaults to `features_dir`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

fn default_seed() -> u64 {
    42
}

fn default_repetitions() -> u32 {
    10
}

fn default_folds() -> usize {
    10
}

fn default_unknown_label() -> String {
    "unknown".to_string()
}

fn default_top_features() -> usize {
    30
}

fn default_token_units() -> Vec<String> {
    vec![WORD_UNIT.to_string()]
}

fn default_normalizations() -> Vec<Normalization> {
    vec![Normalization::Tfidf]
}

fn default_topic_iterations() -> u32 {
    DEFAULT_TOPIC_ITERATIONS
}

fn default_optimize_intervals() -> Vec<u32> {
    vec![0]
}

fn default_topic_repetitions() -> u32 {
    1
}

impl SweepConfiguration {
    /// Load from a TOML file; relative paths resolve against the file's directory
    pub fn load(path: &Path) -> SweepResult<Self> {
        let mut config: SweepConfiguration = load_toml(path)?;
        let base = path.parent().unwrap_or_else(|| Path::new(""));
        config.resolve_paths(base);
        debug!(path = %path.display(), "Loaded sweep configuration");
        Ok(config)
    }

    fn resolve_paths(&mut self, base: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        resolve(&mut self.metadata_file);
        resolve(&mut self.features_dir);
        resolve(&mut self.output_dir);
        if let Some(dir) = self.features.topics.as_mut().and_then(|t| t.dir.as_mut()) {
            resolve(dir);
        }
        if let Some(file) = self.logging.file.as_mut() {
            resolve(file);
        }
    }

    /// Check every axis; all problems are listed in one error
    pub fn validate(&self) -> SweepResult<()> {
        let mut problems = Vec::new();

        if self.repetitions == 0 {
            problems.push("repetitions must be >= 1".to_string());
        }
        if self.folds < 2 {
            problems.push(format!("folds must be >= 2 (got {})", self.folds));
        }
        if self.workers == Some(0) {
            problems.push("workers must be >= 1".to_string());
        }
        if self.unknown_label.trim().is_empty() {
            problems.push("unknown_label must not be empty".to_string());
        }

        if self.contrasts.is_empty() {
            problems.push("no contrasts configured".to_string());
        }
        let mut seen = HashSet::new();
        for contrast in &self.contrasts {
            if let Err(e) = contrast.validate() {
                problems.push(e.to_string());
            }
            if !seen.insert(contrast.canonical()) {
                problems.push(format!("duplicate contrast {}", contrast.canonical()));
            }
        }

        if self.classifiers.is_empty() {
            problems.push("no classifiers configured".to_string());
        }
        let mut seen = HashSet::new();
        for classifier in &self.classifiers {
            if let Err(e) = classifier.validate() {
                problems.push(e.to_string());
            }
            if !seen.insert(classifier.to_string()) {
                problems.push(format!("duplicate classifier {}", classifier));
            }
        }

        if let Some(mfw) = &self.features.mfw {
            if mfw.sizes.is_empty() || mfw.token_units.is_empty() || mfw.normalizations.is_empty()
            {
                problems.push("[features.mfw] has an empty axis".to_string());
            }
        }
        if let Some(topics) = &self.features.topics {
            if topics.counts.is_empty() || topics.optimize_intervals.is_empty() {
                problems.push("[features.topics] has an empty axis".to_string());
            }
            if topics.repetitions == 0 {
                problems.push("[features.topics] repetitions must be >= 1".to_string());
            }
        }

        let keys = self.parameter_keys();
        if keys.is_empty() {
            problems.push("no feature keys configured".to_string());
        }
        let mut seen = HashSet::new();
        for key in &keys {
            if let Err(e) = key.validate() {
                problems.push(e.to_string());
            }
            if !seen.insert(key.to_string()) {
                problems.push(format!("duplicate feature key {}", key));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(SweepError::Configuration(problems.join("; ")))
        }
    }

    /// Feature keys in grid order: MFW (size → unit → norm), then topics
    /// (count → interval → repetition)
    pub fn parameter_keys(&self) -> Vec<ParameterKey> {
        let mut keys = Vec::new();

        if let Some(mfw) = &self.features.mfw {
            for &size in &mfw.sizes {
                for unit in &mfw.token_units {
                    for &normalization in &mfw.normalizations {
                        keys.push(ParameterKey::Mfw {
                            size,
                            token_unit: unit.clone(),
                            normalization,
                        });
                    }
                }
            }
        }

        if let Some(topics) = &self.features.topics {
            for &topic_count in &topics.counts {
                for &optimize_interval in &topics.optimize_intervals {
                    for repetition in 0..topics.repetitions {
                        keys.push(ParameterKey::Topics {
                            topic_count,
                            iterations: topics.iterations,
                            optimize_interval,
                            repetition,
                        });
                    }
                }
            }
        }

        keys
    }

    /// Directory holding the topic model folders
    pub fn topics_dir(&self) -> &Path {
        self.features
            .topics
            .as_ref()
            .and_then(|t| t.dir.as_deref())
            .unwrap_or(&self.features_dir)
    }

    /// Digest of the settings that change a run's result but not its provenance
    ///
    /// Covers the seed, fold count, fold shuffling, unknown label and the raw
    /// metadata bytes. Journal records are only replayed under an equal
    /// fingerprint.
    pub fn fingerprint(&self, metadata: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.seed.to_le_bytes());
        hasher.update((self.folds as u64).to_le_bytes());
        hasher.update([u8::from(self.shuffle_folds)]);
        hasher.update(self.unknown_label.as_bytes());
        hasher.update([0u8]);
        hasher.update(Sha256::digest(metadata));
        hasher
            .finalize()
            .iter()
            .take(8)
            .map(|b| format!("{:02x}", b))
            .collect()
    }

    /// Worker thread count for the grid pool
    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }
}
