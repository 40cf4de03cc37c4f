//! Core sweep types
//!
//! - [`SubgenreContrast`]: binary labelling over one metadata column
//! - [`ParameterKey`]: feature family parameterization with one canonical form
//! - [`ClassifierSpec`]: classifier kind plus fixed hyperparameters
//! - [`EvaluationRun`]: one grid cell (contrast × key × classifier × repetition)
//! - [`Provenance`]: the column set stamped on every result row

use crate::error::SweepError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Label written for examples relabelled into the complement class
pub const REST_LABEL: &str = "other";

/// File name of the averaged topic scores inside each topic model folder
pub const TOPIC_SCORES_FILE: &str = "avgtopicscores_by-idno.csv";

/// Default number of topic model iterations used by the topic producers
pub const DEFAULT_TOPIC_ITERATIONS: u32 = 5000;

// ============================================================================
// Subgenre contrast
// ============================================================================

/// Second side of a contrast
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ClassSpec {
    /// A concrete label value of the contrast's level
    Label(String),
    /// Every non-unknown example whose label is not class1 (one-vs-rest)
    Rest,
}

impl From<String> for ClassSpec {
    fn from(value: String) -> Self {
        if value == REST_LABEL {
            ClassSpec::Rest
        } else {
            ClassSpec::Label(value)
        }
    }
}

impl From<ClassSpec> for String {
    fn from(spec: ClassSpec) -> Self {
        match spec {
            ClassSpec::Label(label) => label,
            ClassSpec::Rest => REST_LABEL.to_string(),
        }
    }
}

/// Binary labelling over one categorical metadata column
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubgenreContrast {
    /// Metadata column holding the labels (e.g. "subgenre-theme")
    pub level: String,
    /// Positive class
    pub class1: String,
    /// Negative class; absent means a single-group export (not evaluable)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class2: Option<ClassSpec>,
}

impl SubgenreContrast {
    pub fn new(level: impl Into<String>, class1: impl Into<String>, class2: ClassSpec) -> Self {
        Self {
            level: level.into(),
            class1: class1.into(),
            class2: Some(class2),
        }
    }

    /// One-vs-rest contrast
    pub fn one_vs_rest(level: impl Into<String>, class1: impl Into<String>) -> Self {
        Self::new(level, class1, ClassSpec::Rest)
    }

    /// Label carried by class2 examples in a draw ("other" for one-vs-rest)
    pub fn class2_label(&self) -> Option<&str> {
        match &self.class2 {
            Some(ClassSpec::Label(label)) => Some(label.as_str()),
            Some(ClassSpec::Rest) => Some(REST_LABEL),
            None => None,
        }
    }

    /// Canonical form, e.g. `subgenre-theme:novela histórica-vs-other`
    pub fn canonical(&self) -> String {
        format!(
            "{}:{}-vs-{}",
            self.level,
            self.class1,
            self.class2_label().unwrap_or("none")
        )
    }

    /// Filesystem-safe form of [`canonical`](Self::canonical)
    pub fn slug(&self) -> String {
        slugify(&self.canonical())
    }

    /// Check the contrast can be evaluated
    pub fn validate(&self) -> Result<(), SweepError> {
        if self.level.trim().is_empty() {
            return Err(SweepError::Configuration("Contrast level is empty".to_string()));
        }
        if self.class1.trim().is_empty() {
            return Err(SweepError::Configuration(format!(
                "Contrast on '{}' has an empty class1",
                self.level
            )));
        }
        match &self.class2 {
            None => Err(SweepError::Configuration(format!(
                "Contrast {} has no class2 (single-group export cannot be evaluated)",
                self.canonical()
            ))),
            Some(ClassSpec::Label(label)) if *label == self.class1 => {
                Err(SweepError::Configuration(format!(
                    "Contrast {} compares a class with itself",
                    self.canonical()
                )))
            }
            Some(ClassSpec::Rest) if self.class1 == REST_LABEL => {
                Err(SweepError::Configuration(format!(
                    "Contrast {} uses the rest label '{}' as class1",
                    self.canonical(),
                    REST_LABEL
                )))
            }
            _ => Ok(()),
        }
    }
}

impl fmt::Display for SubgenreContrast {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

fn slugify(value: &str) -> String {
    let mut slug = String::with_capacity(value.len());
    let mut last_dash = false;
    for c in value.chars().flat_map(char::to_lowercase) {
        if c.is_alphanumeric() {
            slug.push(c);
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }
    slug.trim_matches('-').to_string()
}

// ============================================================================
// Parameter keys
// ============================================================================

/// Feature family of a parameter key
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeatureFamily {
    Mfw,
    Topics,
}

impl FeatureFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeatureFamily::Mfw => "mfw",
            FeatureFamily::Topics => "topics",
        }
    }
}

impl fmt::Display for FeatureFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalization applied to MFW counts by the bag-of-words producers
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Normalization {
    /// Absolute counts
    Raw,
    /// Counts divided by the document's maximum count
    Tf,
    /// Term frequency × inverse document frequency
    Tfidf,
    /// Relative frequencies standardized per feature
    Zscore,
}

impl Normalization {
    pub fn as_str(&self) -> &'static str {
        match self {
            Normalization::Raw => "raw",
            Normalization::Tf => "tf",
            Normalization::Tfidf => "tfidf",
            Normalization::Zscore => "zscore",
        }
    }
}

impl FromStr for Normalization {
    type Err = SweepError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "raw" => Ok(Normalization::Raw),
            "tf" => Ok(Normalization::Tf),
            "tfidf" => Ok(Normalization::Tfidf),
            "zscore" => Ok(Normalization::Zscore),
            other => Err(SweepError::Configuration(format!(
                "Unknown normalization '{}'",
                other
            ))),
        }
    }
}

/// Token unit meaning whole words (no file name suffix)
pub const WORD_UNIT: &str = "word";

/// Identifies one feature matrix
///
/// The canonical string form (`Display`/`FromStr`) is the only serialization
/// used in provenance and run keys, e.g.
/// `mfw:size=1000;unit=word;norm=tfidf` or
/// `topics:count=50;iter=5000;interval=100;rep=0`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "lowercase")]
pub enum ParameterKey {
    Mfw {
        size: u32,
        token_unit: String,
        normalization: Normalization,
    },
    Topics {
        topic_count: u32,
        iterations: u32,
        /// Hyperparameter optimization interval; 0 disables optimization
        optimize_interval: u32,
        repetition: u32,
    },
}

impl ParameterKey {
    pub fn family(&self) -> FeatureFamily {
        match self {
            ParameterKey::Mfw { .. } => FeatureFamily::Mfw,
            ParameterKey::Topics { .. } => FeatureFamily::Topics,
        }
    }

    /// Filesystem-safe identifier, e.g. `mfw1000-word-tfidf`
    pub fn slug(&self) -> String {
        match self {
            ParameterKey::Mfw {
                size,
                token_unit,
                normalization,
            } => slugify(&format!("mfw{}-{}-{}", size, token_unit, normalization.as_str())),
            ParameterKey::Topics {
                topic_count,
                iterations,
                optimize_interval,
                repetition,
            } => format!(
                "topics{}-{}it-{}in-r{}",
                topic_count, iterations, optimize_interval, repetition
            ),
        }
    }

    /// Backing file written by the feature producers
    ///
    /// - MFW: `bow_mfw<size>[_<unit>][_<norm>].csv` (no unit suffix for whole
    ///   words, no norm suffix for raw counts)
    /// - Topics: `<count>tp-<iter>it-<interval|None>in-<rep>/avgtopicscores_by-idno.csv`
    pub fn backing_path(&self, features_dir: &Path) -> PathBuf {
        match self {
            ParameterKey::Mfw {
                size,
                token_unit,
                normalization,
            } => {
                let mut name = format!("bow_mfw{}", size);
                if token_unit != WORD_UNIT {
                    name.push('_');
                    name.push_str(token_unit);
                }
                if *normalization != Normalization::Raw {
                    name.push('_');
                    name.push_str(normalization.as_str());
                }
                name.push_str(".csv");
                features_dir.join(name)
            }
            ParameterKey::Topics {
                topic_count,
                iterations,
                optimize_interval,
                repetition,
            } => {
                let interval = if *optimize_interval == 0 {
                    "None".to_string()
                } else {
                    optimize_interval.to_string()
                };
                features_dir
                    .join(format!(
                        "{}tp-{}it-{}in-{}",
                        topic_count, iterations, interval, repetition
                    ))
                    .join(TOPIC_SCORES_FILE)
            }
        }
    }

    /// Check the key can be serialized unambiguously
    pub fn validate(&self) -> Result<(), SweepError> {
        match self {
            ParameterKey::Mfw {
                size, token_unit, ..
            } => {
                if *size == 0 {
                    return Err(SweepError::Configuration("MFW size must be > 0".to_string()));
                }
                if token_unit.is_empty()
                    || token_unit.contains(|c: char| matches!(c, ';' | '=' | ':' | '/' | '\\'))
                {
                    return Err(SweepError::Configuration(format!(
                        "Invalid token unit '{}'",
                        token_unit
                    )));
                }
                Ok(())
            }
            ParameterKey::Topics {
                topic_count,
                iterations,
                ..
            } => {
                if *topic_count == 0 || *iterations == 0 {
                    return Err(SweepError::Configuration(
                        "Topic count and iterations must be > 0".to_string(),
                    ));
                }
                Ok(())
            }
        }
    }
}

impl fmt::Display for ParameterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterKey::Mfw {
                size,
                token_unit,
                normalization,
            } => write!(
                f,
                "mfw:size={};unit={};norm={}",
                size,
                token_unit,
                normalization.as_str()
            ),
            ParameterKey::Topics {
                topic_count,
                iterations,
                optimize_interval,
                repetition,
            } => write!(
                f,
                "topics:count={};iter={};interval={};rep={}",
                topic_count, iterations, optimize_interval, repetition
            ),
        }
    }
}

impl FromStr for ParameterKey {
    type Err = SweepError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || SweepError::Configuration(format!("Invalid parameter key '{}'", s));
        let (family, rest) = s.split_once(':').ok_or_else(invalid)?;

        let mut fields = std::collections::HashMap::new();
        for pair in rest.split(';') {
            let (name, value) = pair.split_once('=').ok_or_else(invalid)?;
            if fields.insert(name, value).is_some() {
                return Err(invalid());
            }
        }
        let field = |name: &str| fields.get(name).copied().ok_or_else(invalid);
        let number = |name: &str| -> Result<u32, SweepError> {
            field(name)?.parse().map_err(|_| invalid())
        };

        let key = match family {
            "mfw" if fields.len() == 3 => ParameterKey::Mfw {
                size: number("size")?,
                token_unit: field("unit")?.to_string(),
                normalization: field("norm")?.parse()?,
            },
            "topics" if fields.len() == 4 => ParameterKey::Topics {
                topic_count: number("count")?,
                iterations: number("iter")?,
                optimize_interval: number("interval")?,
                repetition: number("rep")?,
            },
            _ => return Err(invalid()),
        };
        key.validate()?;
        Ok(key)
    }
}

// ============================================================================
// Classifier specs
// ============================================================================

/// Linear SVM hyperparameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SvmParams {
    /// Inverse regularization strength
    pub c: f64,
    /// Stopping tolerance on the projected gradient spread
    pub tolerance: f64,
    /// Max passes over the training data
    pub max_iter: usize,
    /// Seed for the coordinate visiting order
    pub seed: u64,
}

impl Default for SvmParams {
    fn default() -> Self {
        Self {
            c: 1.0,
            tolerance: 1e-3,
            max_iter: 1000,
            seed: 0,
        }
    }
}

/// Distance used by KNN
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    Euclidean,
    Cosine,
}

/// KNN hyperparameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KnnParams {
    pub n_neighbors: usize,
    pub metric: DistanceMetric,
}

impl Default for KnnParams {
    fn default() -> Self {
        Self {
            n_neighbors: 5,
            metric: DistanceMetric::Euclidean,
        }
    }
}

/// Features considered per split in a random forest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MaxFeatures {
    Sqrt,
    Log2,
    All,
}

impl MaxFeatures {
    pub fn resolve(&self, n_features: usize) -> usize {
        let n = match self {
            MaxFeatures::Sqrt => (n_features as f64).sqrt().floor() as usize,
            MaxFeatures::Log2 => (n_features as f64).log2().floor() as usize,
            MaxFeatures::All => n_features,
        };
        n.clamp(1, n_features.max(1))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MaxFeatures::Sqrt => "sqrt",
            MaxFeatures::Log2 => "log2",
            MaxFeatures::All => "all",
        }
    }
}

/// Random forest hyperparameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForestParams {
    pub n_estimators: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub max_features: MaxFeatures,
    pub seed: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            max_depth: None,
            min_samples_split: 2,
            max_features: MaxFeatures::Sqrt,
            seed: 0,
        }
    }
}

/// Classifier kind with fixed hyperparameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ClassifierSpec {
    Svm(SvmParams),
    Knn(KnnParams),
    Rf(ForestParams),
}

impl ClassifierSpec {
    /// Short classifier name used in result tables
    pub fn name(&self) -> &'static str {
        match self {
            ClassifierSpec::Svm(_) => "SVM",
            ClassifierSpec::Knn(_) => "KNN",
            ClassifierSpec::Rf(_) => "RF",
        }
    }

    /// Canonical hyperparameter string, e.g. `c=1;tol=0.001;max_iter=1000;seed=0`
    pub fn params_string(&self) -> String {
        match self {
            ClassifierSpec::Svm(p) => format!(
                "c={};tol={};max_iter={};seed={}",
                p.c, p.tolerance, p.max_iter, p.seed
            ),
            ClassifierSpec::Knn(p) => format!(
                "k={};metric={}",
                p.n_neighbors,
                match p.metric {
                    DistanceMetric::Euclidean => "euclidean",
                    DistanceMetric::Cosine => "cosine",
                }
            ),
            ClassifierSpec::Rf(p) => format!(
                "trees={};max_depth={};min_split={};max_features={};seed={}",
                p.n_estimators,
                p.max_depth.map_or_else(|| "none".to_string(), |d| d.to_string()),
                p.min_samples_split,
                p.max_features.as_str(),
                p.seed
            ),
        }
    }

    pub fn validate(&self) -> Result<(), SweepError> {
        let problem = match self {
            ClassifierSpec::Svm(p) if !(p.c > 0.0 && p.c.is_finite()) => Some("SVM c must be > 0"),
            ClassifierSpec::Svm(p) if !(p.tolerance > 0.0) => Some("SVM tolerance must be > 0"),
            ClassifierSpec::Svm(p) if p.max_iter == 0 => Some("SVM max_iter must be > 0"),
            ClassifierSpec::Knn(p) if p.n_neighbors == 0 => Some("KNN n_neighbors must be > 0"),
            ClassifierSpec::Rf(p) if p.n_estimators == 0 => Some("RF n_estimators must be > 0"),
            ClassifierSpec::Rf(p) if p.min_samples_split < 2 => {
                Some("RF min_samples_split must be >= 2")
            }
            _ => None,
        };
        match problem {
            Some(msg) => Err(SweepError::Configuration(msg.to_string())),
            None => Ok(()),
        }
    }
}

impl fmt::Display for ClassifierSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name(), self.params_string())
    }
}

// ============================================================================
// Evaluation runs and provenance
// ============================================================================

/// One grid cell
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationRun {
    /// Position in the grid enumeration
    pub index: usize,
    /// Position of the contrast in the sweep configuration
    pub contrast_index: usize,
    pub contrast: SubgenreContrast,
    pub key: ParameterKey,
    pub classifier: ClassifierSpec,
    pub repetition: u32,
}

impl EvaluationRun {
    pub fn provenance(&self) -> Provenance {
        Provenance::new(&self.contrast, &self.key, &self.classifier, self.repetition)
    }

    /// Canonical run key (identical to `self.provenance().key()`)
    pub fn key(&self) -> String {
        self.provenance().key()
    }
}

/// Provenance columns shared by every result table
///
/// Family-specific fields are `None` when they do not apply so rows from
/// different feature families can be concatenated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Provenance {
    pub level: String,
    pub class1: String,
    pub class2: String,
    pub feature_family: FeatureFamily,
    pub feature_key: String,
    pub mfw_size: Option<u32>,
    pub token_unit: Option<String>,
    pub normalization: Option<Normalization>,
    pub topic_count: Option<u32>,
    pub topic_iterations: Option<u32>,
    pub optimize_interval: Option<u32>,
    pub topic_repetition: Option<u32>,
    pub classifier: String,
    pub classifier_params: String,
    pub repetition: u32,
}

impl Provenance {
    /// Column names in table order
    pub const COLUMNS: [&'static str; 15] = [
        "level",
        "class1",
        "class2",
        "feature_family",
        "feature_key",
        "mfw_size",
        "token_unit",
        "normalization",
        "topic_count",
        "topic_iterations",
        "optimize_interval",
        "topic_repetition",
        "classifier",
        "classifier_params",
        "repetition",
    ];

    pub fn new(
        contrast: &SubgenreContrast,
        key: &ParameterKey,
        classifier: &ClassifierSpec,
        repetition: u32,
    ) -> Self {
        let mut provenance = Self {
            level: contrast.level.clone(),
            class1: contrast.class1.clone(),
            class2: contrast.class2_label().unwrap_or_default().to_string(),
            feature_family: key.family(),
            feature_key: key.to_string(),
            mfw_size: None,
            token_unit: None,
            normalization: None,
            topic_count: None,
            topic_iterations: None,
            optimize_interval: None,
            topic_repetition: None,
            classifier: classifier.name().to_string(),
            classifier_params: classifier.params_string(),
            repetition,
        };

        match key {
            ParameterKey::Mfw {
                size,
                token_unit,
                normalization,
            } => {
                provenance.mfw_size = Some(*size);
                provenance.token_unit = Some(token_unit.clone());
                provenance.normalization = Some(*normalization);
            }
            ParameterKey::Topics {
                topic_count,
                iterations,
                optimize_interval,
                repetition,
            } => {
                provenance.topic_count = Some(*topic_count);
                provenance.topic_iterations = Some(*iterations);
                provenance.optimize_interval = Some(*optimize_interval);
                provenance.topic_repetition = Some(*repetition);
            }
        }
        provenance
    }

    /// Canonical contrast form, e.g. `subgenre-theme:a-vs-other`
    pub fn contrast(&self) -> String {
        format!("{}:{}-vs-{}", self.level, self.class1, self.class2)
    }

    /// Canonical run key; two result rows with the same key come from the same run
    pub fn key(&self) -> String {
        format!(
            "{}|{}|{}({})|rep={}",
            self.contrast(),
            self.feature_key,
            self.classifier,
            self.classifier_params,
            self.repetition
        )
    }

    /// Cell values aligned with [`COLUMNS`](Self::COLUMNS); `None` becomes empty
    pub fn values(&self) -> Vec<String> {
        fn opt<T: ToString>(value: &Option<T>) -> String {
            value.as_ref().map(ToString::to_string).unwrap_or_default()
        }

        vec![
            self.level.clone(),
            self.class1.clone(),
            self.class2.clone(),
            self.feature_family.to_string(),
            self.feature_key.clone(),
            opt(&self.mfw_size),
            opt(&self.token_unit),
            self.normalization
                .map(|n| n.as_str().to_string())
                .unwrap_or_default(),
            opt(&self.topic_count),
            opt(&self.topic_iterations),
            opt(&self.optimize_interval),
            opt(&self.topic_repetition),
            self.classifier.clone(),
            self.classifier_params.clone(),
            self.repetition.to_string(),
        ]
    }
}
