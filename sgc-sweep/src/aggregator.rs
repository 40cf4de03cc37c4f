//! Result aggregation
//!
//! A single [`ResultAggregator`] owns the canonical tables; workers only send
//! [`RunOutcome`]s. Every row carries the full provenance schema so tables from
//! different feature families concatenate cleanly:
//! - **scores**: one row per (run, fold)
//! - **labels**: one row per (run, example), one `y_<fold>` column per fold
//! - **importances**: one row per (run, fold), one table per feature key since
//!   feature columns differ between keys
//! - **failures**: one row per failed run

use crate::error::{RunErrorKind, SweepError, SweepResult};
use crate::evaluator::{FoldOutcome, RunEvaluation};
use crate::metrics::BinaryMetrics;
use crate::types::Provenance;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const SCORES_FILE: &str = "scores.csv";
pub const LABELS_FILE: &str = "labels.csv";
pub const FAILURES_FILE: &str = "failures.csv";

/// Run that produced no result rows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedRun {
    pub provenance: Provenance,
    pub kind: RunErrorKind,
    pub error: String,
}

impl FailedRun {
    pub fn new(provenance: Provenance, error: &SweepError) -> Self {
        Self {
            provenance,
            kind: error.kind(),
            error: error.to_string(),
        }
    }
}

/// Message from a worker to the aggregator (also the journal record)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    Completed(RunEvaluation),
    Failed(FailedRun),
}

impl RunOutcome {
    pub fn provenance(&self) -> &Provenance {
        match self {
            RunOutcome::Completed(run) => &run.provenance,
            RunOutcome::Failed(failed) => &failed.provenance,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, RunOutcome::Completed(_))
    }
}

// ============================================================================
// Rows
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FoldStatus {
    Ok,
    Failed,
}

impl FoldStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FoldStatus::Ok => "ok",
            FoldStatus::Failed => "failed",
        }
    }
}

/// One (run, fold) score record
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreRow {
    pub provenance: Provenance,
    pub fold: usize,
    pub status: FoldStatus,
    /// `None` for failed folds
    pub metrics: Option<BinaryMetrics>,
    pub error: Option<String>,
}

/// One (run, example) prediction record
#[derive(Debug, Clone, PartialEq)]
pub struct LabelRow {
    pub provenance: Provenance,
    pub idno: String,
    pub true_label: String,
    /// Indexed by fold; `None` for failed folds
    pub predictions: Vec<Option<String>>,
}

/// One (run, fold) importance record
#[derive(Debug, Clone, PartialEq)]
pub struct ImportanceRow {
    pub provenance: Provenance,
    pub fold: usize,
    pub values: Vec<f64>,
}

/// Importance rows sharing one feature key (and therefore one column set)
#[derive(Debug, Clone, PartialEq)]
pub struct ImportanceTable {
    pub feature_key: String,
    pub slug: String,
    pub feature_names: Vec<String>,
    pub rows: Vec<ImportanceRow>,
}

impl ImportanceTable {
    pub fn file_name(&self) -> String {
        format!("importances_{}.csv", self.slug)
    }
}

// ============================================================================
// Aggregator
// ============================================================================

/// Append-only result tables, idempotent per provenance key
#[derive(Debug, Default)]
pub struct ResultAggregator {
    seen: HashSet<String>,
    scores: Vec<ScoreRow>,
    labels: Vec<LabelRow>,
    importances: BTreeMap<String, ImportanceTable>,
    failures: Vec<FailedRun>,
    completed: usize,
}

impl ResultAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a run with this provenance key has been aggregated
    pub fn contains(&self, key: &str) -> bool {
        self.seen.contains(key)
    }

    /// Fold an outcome into the tables
    ///
    /// # Returns
    /// `false` (and no change) if the run's provenance key is already present
    pub fn add(&mut self, outcome: &RunOutcome) -> bool {
        let key = outcome.provenance().key();
        if !self.seen.insert(key.clone()) {
            debug!(run = %key, "Run already aggregated, skipping");
            return false;
        }

        match outcome {
            RunOutcome::Completed(run) => {
                self.add_completed(run, &key);
                self.completed += 1;
            }
            RunOutcome::Failed(failed) => self.failures.push(failed.clone()),
        }
        true
    }

    fn add_completed(&mut self, run: &RunEvaluation, key: &str) {
        let provenance = &run.provenance;

        for fold in &run.folds {
            let row = match &fold.outcome {
                FoldOutcome::Fitted { metrics, .. } => ScoreRow {
                    provenance: provenance.clone(),
                    fold: fold.fold,
                    status: FoldStatus::Ok,
                    metrics: Some(*metrics),
                    error: None,
                },
                FoldOutcome::Failed { error } => ScoreRow {
                    provenance: provenance.clone(),
                    fold: fold.fold,
                    status: FoldStatus::Failed,
                    metrics: None,
                    error: Some(error.to_string()),
                },
            };
            self.scores.push(row);
        }

        for (i, (idno, true_label)) in run.ids.iter().zip(&run.true_labels).enumerate() {
            let predictions = run
                .folds
                .iter()
                .map(|fold| match &fold.outcome {
                    FoldOutcome::Fitted { predictions, .. } => predictions.get(i).cloned(),
                    FoldOutcome::Failed { .. } => None,
                })
                .collect();
            self.labels.push(LabelRow {
                provenance: provenance.clone(),
                idno: idno.clone(),
                true_label: true_label.clone(),
                predictions,
            });
        }

        for fold in &run.folds {
            let FoldOutcome::Fitted {
                importances: Some(values),
                ..
            } = &fold.outcome
            else {
                continue;
            };

            let table = self
                .importances
                .entry(provenance.feature_key.clone())
                .or_insert_with(|| ImportanceTable {
                    feature_key: provenance.feature_key.clone(),
                    slug: feature_key_slug(&provenance.feature_key),
                    feature_names: run.feature_names.clone(),
                    rows: Vec::new(),
                });
            if table.feature_names != run.feature_names || values.len() != run.feature_names.len()
            {
                warn!(
                    run = %key,
                    fold = fold.fold,
                    "Importance columns do not match the feature key's table, dropping row"
                );
                continue;
            }
            table.rows.push(ImportanceRow {
                provenance: provenance.clone(),
                fold: fold.fold,
                values: values.clone(),
            });
        }
    }

    pub fn scores(&self) -> &[ScoreRow] {
        &self.scores
    }

    pub fn labels(&self) -> &[LabelRow] {
        &self.labels
    }

    pub fn importance_tables(&self) -> impl Iterator<Item = &ImportanceTable> {
        self.importances.values()
    }

    pub fn failures(&self) -> &[FailedRun] {
        &self.failures
    }

    /// Number of runs aggregated with result rows
    pub fn completed_runs(&self) -> usize {
        self.completed
    }

    /// Failed folds across completed runs
    pub fn failed_folds(&self) -> usize {
        self.scores
            .iter()
            .filter(|r| r.status == FoldStatus::Failed)
            .count()
    }

    /// Write every table under `dir`; rows are ordered by provenance key
    ///
    /// # Returns
    /// Paths of the files written
    pub fn write(&self, dir: &Path) -> SweepResult<Vec<PathBuf>> {
        std::fs::create_dir_all(dir)?;
        let mut written = Vec::new();

        let path = dir.join(SCORES_FILE);
        self.write_scores(&path)?;
        written.push(path);

        let path = dir.join(LABELS_FILE);
        self.write_labels(&path)?;
        written.push(path);

        for table in self.importances.values() {
            let path = dir.join(table.file_name());
            write_importances(table, &path)?;
            written.push(path);
        }

        let path = dir.join(FAILURES_FILE);
        self.write_failures(&path)?;
        written.push(path);

        info!(
            dir = %dir.display(),
            scores = self.scores.len(),
            labels = self.labels.len(),
            failures = self.failures.len(),
            "Result tables written"
        );
        Ok(written)
    }

    fn write_scores(&self, path: &Path) -> SweepResult<()> {
        let mut writer = csv::Writer::from_path(path)?;
        let mut header = provenance_header();
        header.extend(
            [
                "fold",
                "status",
                "accuracy",
                "precision",
                "recall",
                "f1",
                "support_pos",
                "support_neg",
                "error",
            ]
            .map(String::from),
        );
        writer.write_record(&header)?;

        let mut rows: Vec<(String, &ScoreRow)> =
            self.scores.iter().map(|r| (r.provenance.key(), r)).collect();
        rows.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.fold.cmp(&b.1.fold)));

        for (_, row) in rows {
            let mut record = row.provenance.values();
            record.push(row.fold.to_string());
            record.push(row.status.as_str().to_string());
            match &row.metrics {
                Some(m) => record.extend([
                    m.accuracy.to_string(),
                    m.precision.to_string(),
                    m.recall.to_string(),
                    m.f1.to_string(),
                    m.support_pos.to_string(),
                    m.support_neg.to_string(),
                ]),
                None => record.extend(std::iter::repeat(String::new()).take(6)),
            }
            record.push(row.error.clone().unwrap_or_default());
            writer.write_record(&record)?;
        }
        writer.flush()?;
        Ok(())
    }

    fn write_labels(&self, path: &Path) -> SweepResult<()> {
        let n_folds = self
            .labels
            .iter()
            .map(|r| r.predictions.len())
            .max()
            .unwrap_or(0);

        let mut writer = csv::Writer::from_path(path)?;
        let mut header = provenance_header();
        header.push("idno".to_string());
        header.push("true_label".to_string());
        header.extend((0..n_folds).map(|f| format!("y_{}", f)));
        writer.write_record(&header)?;

        let mut rows: Vec<(String, &LabelRow)> =
            self.labels.iter().map(|r| (r.provenance.key(), r)).collect();
        rows.sort_by(|a, b| a.0.cmp(&b.0));

        for (_, row) in rows {
            let mut record = row.provenance.values();
            record.push(row.idno.clone());
            record.push(row.true_label.clone());
            for fold in 0..n_folds {
                record.push(
                    row.predictions
                        .get(fold)
                        .cloned()
                        .flatten()
                        .unwrap_or_default(),
                );
            }
            writer.write_record(&record)?;
        }
        writer.flush()?;
        Ok(())
    }

    fn write_failures(&self, path: &Path) -> SweepResult<()> {
        let mut writer = csv::Writer::from_path(path)?;
        let mut header = provenance_header();
        header.push("kind".to_string());
        header.push("error".to_string());
        writer.write_record(&header)?;

        let mut rows: Vec<(String, &FailedRun)> = self
            .failures
            .iter()
            .map(|r| (r.provenance.key(), r))
            .collect();
        rows.sort_by(|a, b| a.0.cmp(&b.0));

        for (_, failed) in rows {
            let mut record = failed.provenance.values();
            record.push(failed.kind.as_str().to_string());
            record.push(failed.error.clone());
            writer.write_record(&record)?;
        }
        writer.flush()?;
        Ok(())
    }
}

fn write_importances(table: &ImportanceTable, path: &Path) -> SweepResult<()> {
    let mut writer = csv::Writer::from_path(path)?;
    let mut header = provenance_header();
    header.push("fold".to_string());
    header.extend(table.feature_names.iter().cloned());
    writer.write_record(&header)?;

    let mut rows: Vec<(String, &ImportanceRow)> = table
        .rows
        .iter()
        .map(|r| (r.provenance.key(), r))
        .collect();
    rows.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.fold.cmp(&b.1.fold)));

    for (_, row) in rows {
        let mut record = row.provenance.values();
        record.push(row.fold.to_string());
        record.extend(row.values.iter().map(|v| v.to_string()));
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

fn provenance_header() -> Vec<String> {
    Provenance::COLUMNS.iter().map(|c| c.to_string()).collect()
}

/// Slug of a canonical feature key string
fn feature_key_slug(feature_key: &str) -> String {
    match feature_key.parse::<crate::types::ParameterKey>() {
        Ok(key) => key.slug(),
        Err(_) => feature_key
            .chars()
            .map(|c| if c.is_alphanumeric() { c } else { '-' })
            .collect(),
    }
}
