//! Comparative summaries over the aggregated tables
//!
//! **Score summaries** (accuracy and F1 over fold-level `ok` rows):
//! - pooled per (classifier, feature family) across contrasts
//! - per (contrast, classifier, feature family)
//! - per (classifier, feature key), flagging the best key per classifier
//!
//! **Diagnostics:**
//! - per-example majority vote over the labels table. These predictions include
//!   each fold's training rows, so the rates are training-leaky and only
//!   point at examples worth inspecting.
//! - top features by mean importance per (feature key, classifier, contrast)

use crate::aggregator::{FoldStatus, ImportanceTable, LabelRow, ResultAggregator, ScoreRow};
use crate::error::SweepResult;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::info;

pub const POOLED_FILE: &str = "summary_pooled.csv";
pub const BY_CONTRAST_FILE: &str = "summary_by_contrast.csv";
pub const BY_KEY_FILE: &str = "summary_by_key.csv";
pub const DIAGNOSTICS_FILE: &str = "example_diagnostics.csv";
pub const TOP_FEATURES_FILE: &str = "top_features.csv";

/// Treatment of folds scoring F1 == 0.0
///
/// `Exclude` drops those values from the F1 statistics only (accuracy keeps
/// every fold). A zero F1 usually means the fold never predicted class1.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum F1ZeroPolicy {
    #[default]
    Exclude,
    Include,
}

/// Count / top / mean / population standard deviation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Stat {
    pub count: usize,
    pub top: f64,
    pub mean: f64,
    pub std: f64,
}

impl Stat {
    /// `None` for an empty slice
    pub fn from_values(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let count = values.len();
        let mean = values.iter().sum::<f64>() / count as f64;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / count as f64;
        let top = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        Some(Self {
            count,
            top,
            mean,
            std: variance.sqrt(),
        })
    }
}

/// One summary line
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryRow {
    /// `None` when pooled across contrasts
    pub contrast: Option<String>,
    pub classifier: String,
    pub feature_family: String,
    /// Only set in per-key summaries
    pub feature_key: Option<String>,
    /// Distinct runs with at least one `ok` fold
    pub runs: usize,
    pub accuracy: Option<Stat>,
    pub f1: Option<Stat>,
    /// Best key for its classifier (per-key summaries only)
    pub best: bool,
}

/// Majority-vote outcome for one example of one contrast
#[derive(Debug, Clone, PartialEq)]
pub struct ExampleDiagnostic {
    pub contrast: String,
    pub idno: String,
    pub true_label: String,
    /// Runs with at least one prediction for this example
    pub runs: usize,
    /// Runs whose majority prediction differs from the true label
    pub misclassified: usize,
    pub rate: f64,
}

/// Ranked feature for one (feature key, classifier, contrast)
#[derive(Debug, Clone, PartialEq)]
pub struct TopFeature {
    pub feature_key: String,
    pub classifier: String,
    pub contrast: String,
    /// Label the feature is evidence for; "any" for unsigned importances
    pub side: String,
    pub rank: usize,
    pub feature: String,
    pub mean_importance: f64,
}

/// Every reduced table
#[derive(Debug, Clone, Default)]
pub struct Summaries {
    pub pooled: Vec<SummaryRow>,
    pub by_contrast: Vec<SummaryRow>,
    pub by_key: Vec<SummaryRow>,
    pub diagnostics: Vec<ExampleDiagnostic>,
    pub top_features: Vec<TopFeature>,
}

/// Reduces aggregated tables into [`Summaries`]
#[derive(Debug, Clone)]
pub struct SummaryReducer {
    policy: F1ZeroPolicy,
    top_n: usize,
}

type GroupKey = (Option<String>, String, String, Option<String>);

impl SummaryReducer {
    pub fn new(policy: F1ZeroPolicy, top_n: usize) -> Self {
        Self { policy, top_n }
    }

    pub fn reduce(&self, results: &ResultAggregator) -> Summaries {
        let mut by_key = self.summarize(results.scores(), |row| {
            (
                None,
                row.provenance.classifier.clone(),
                row.provenance.feature_family.to_string(),
                Some(row.provenance.feature_key.clone()),
            )
        });
        mark_best_keys(&mut by_key);

        Summaries {
            pooled: self.pooled(results.scores()),
            by_contrast: self.summarize(results.scores(), |row| {
                (
                    Some(row.provenance.contrast()),
                    row.provenance.classifier.clone(),
                    row.provenance.feature_family.to_string(),
                    None,
                )
            }),
            by_key,
            diagnostics: example_diagnostics(results.labels()),
            top_features: results
                .importance_tables()
                .flat_map(|table| self.top_features(table))
                .collect(),
        }
    }

    /// Per (classifier, feature family), pooled across contrasts
    pub fn pooled(&self, scores: &[ScoreRow]) -> Vec<SummaryRow> {
        self.summarize(scores, |row| {
            (
                None,
                row.provenance.classifier.clone(),
                row.provenance.feature_family.to_string(),
                None,
            )
        })
    }

    fn summarize<F>(&self, scores: &[ScoreRow], group_of: F) -> Vec<SummaryRow>
    where
        F: Fn(&ScoreRow) -> GroupKey,
    {
        #[derive(Default)]
        struct Acc {
            runs: HashSet<String>,
            accuracy: Vec<f64>,
            f1: Vec<f64>,
        }

        let mut groups: BTreeMap<GroupKey, Acc> = BTreeMap::new();
        for row in scores {
            let (FoldStatus::Ok, Some(metrics)) = (row.status, &row.metrics) else {
                continue;
            };
            let acc = groups.entry(group_of(row)).or_default();
            acc.runs.insert(row.provenance.key());
            acc.accuracy.push(metrics.accuracy);
            if !(self.policy == F1ZeroPolicy::Exclude && metrics.f1 == 0.0) {
                acc.f1.push(metrics.f1);
            }
        }

        groups
            .into_iter()
            .map(
                |((contrast, classifier, feature_family, feature_key), acc)| SummaryRow {
                    contrast,
                    classifier,
                    feature_family,
                    feature_key,
                    runs: acc.runs.len(),
                    accuracy: Stat::from_values(&acc.accuracy),
                    f1: Stat::from_values(&acc.f1),
                    best: false,
                },
            )
            .collect()
    }

    /// Highest and lowest mean importances of one table, per (classifier, contrast)
    pub fn top_features(&self, table: &ImportanceTable) -> Vec<TopFeature> {
        let n_features = table.feature_names.len();
        let mut sums: BTreeMap<(String, String, String, String), (Vec<f64>, usize)> =
            BTreeMap::new();
        for row in &table.rows {
            let p = &row.provenance;
            let entry = sums
                .entry((p.classifier.clone(), p.contrast(), p.class1.clone(), p.class2.clone()))
                .or_insert_with(|| (vec![0.0; n_features], 0));
            for (acc, value) in entry.0.iter_mut().zip(&row.values) {
                *acc += value;
            }
            entry.1 += 1;
        }

        let mut ranked = Vec::new();
        for ((classifier, contrast, class1, class2), (sum, count)) in sums {
            let mut means: Vec<(usize, f64)> = sum
                .into_iter()
                .map(|s| s / count as f64)
                .enumerate()
                .collect();
            means.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));

            let signed = classifier == "SVM";
            let n = self.top_n.min(means.len());
            let mut push = |side: &str, rank: usize, (index, mean): (usize, f64)| {
                ranked.push(TopFeature {
                    feature_key: table.feature_key.clone(),
                    classifier: classifier.clone(),
                    contrast: contrast.clone(),
                    side: side.to_string(),
                    rank,
                    feature: table.feature_names[index].clone(),
                    mean_importance: mean,
                });
            };

            let high_side = if signed { class1.as_str() } else { "any" };
            for (rank, entry) in means.iter().take(n).enumerate() {
                push(high_side, rank + 1, *entry);
            }
            if signed {
                for (rank, entry) in means.iter().rev().take(n).enumerate() {
                    push(class2.as_str(), rank + 1, *entry);
                }
            }
        }
        ranked
    }
}

/// Flag the per-key row with the highest mean F1 for each classifier
fn mark_best_keys(rows: &mut [SummaryRow]) {
    let mut best: BTreeMap<&str, (usize, f64)> = BTreeMap::new();
    for (i, row) in rows.iter().enumerate() {
        let Some(f1) = row.f1 else { continue };
        let entry = best.entry(row.classifier.as_str()).or_insert((i, f1.mean));
        if f1.mean > entry.1 {
            *entry = (i, f1.mean);
        }
    }
    let winners: Vec<usize> = best.values().map(|(i, _)| *i).collect();
    for i in winners {
        rows[i].best = true;
    }
}

/// Majority vote per (run, example), counted per (contrast, example)
///
/// Ties go to the lexicographically first label.
pub fn example_diagnostics(labels: &[LabelRow]) -> Vec<ExampleDiagnostic> {
    let mut acc: BTreeMap<(String, String), (String, usize, usize)> = BTreeMap::new();
    for row in labels {
        let mut votes: BTreeMap<&str, usize> = BTreeMap::new();
        for prediction in row.predictions.iter().flatten() {
            *votes.entry(prediction.as_str()).or_insert(0) += 1;
        }
        let Some(max) = votes.values().copied().max() else {
            continue;
        };
        let majority = votes
            .iter()
            .find(|&(_, &n)| n == max)
            .map(|(label, _)| *label)
            .unwrap_or_default();

        let entry = acc
            .entry((row.provenance.contrast(), row.idno.clone()))
            .or_insert_with(|| (row.true_label.clone(), 0, 0));
        entry.1 += 1;
        if majority != row.true_label {
            entry.2 += 1;
        }
    }

    acc.into_iter()
        .map(
            |((contrast, idno), (true_label, runs, misclassified))| ExampleDiagnostic {
                contrast,
                idno,
                true_label,
                runs,
                misclassified,
                rate: misclassified as f64 / runs as f64,
            },
        )
        .collect()
}

// ============================================================================
// Writers
// ============================================================================

impl Summaries {
    /// Write every summary table under `dir`
    pub fn write(&self, dir: &Path) -> SweepResult<Vec<PathBuf>> {
        std::fs::create_dir_all(dir)?;
        let mut written = Vec::new();

        for (file, rows) in [
            (POOLED_FILE, &self.pooled),
            (BY_CONTRAST_FILE, &self.by_contrast),
            (BY_KEY_FILE, &self.by_key),
        ] {
            let path = dir.join(file);
            write_summary_rows(rows, &path)?;
            written.push(path);
        }

        let path = dir.join(DIAGNOSTICS_FILE);
        let mut writer = csv::Writer::from_path(&path)?;
        writer.write_record([
            "contrast",
            "idno",
            "true_label",
            "runs",
            "misclassified",
            "misclassification_rate",
        ])?;
        for d in &self.diagnostics {
            writer.write_record([
                d.contrast.clone(),
                d.idno.clone(),
                d.true_label.clone(),
                d.runs.to_string(),
                d.misclassified.to_string(),
                d.rate.to_string(),
            ])?;
        }
        writer.flush()?;
        written.push(path);

        let path = dir.join(TOP_FEATURES_FILE);
        let mut writer = csv::Writer::from_path(&path)?;
        writer.write_record([
            "feature_key",
            "classifier",
            "contrast",
            "side",
            "rank",
            "feature",
            "mean_importance",
        ])?;
        for f in &self.top_features {
            writer.write_record([
                f.feature_key.clone(),
                f.classifier.clone(),
                f.contrast.clone(),
                f.side.clone(),
                f.rank.to_string(),
                f.feature.clone(),
                f.mean_importance.to_string(),
            ])?;
        }
        writer.flush()?;
        written.push(path);

        info!(dir = %dir.display(), files = written.len(), "Summaries written");
        Ok(written)
    }
}

fn write_summary_rows(rows: &[SummaryRow], path: &Path) -> SweepResult<()> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record([
        "contrast",
        "classifier",
        "feature_family",
        "feature_key",
        "runs",
        "accuracy_count",
        "accuracy_top",
        "accuracy_mean",
        "accuracy_std",
        "f1_count",
        "f1_top",
        "f1_mean",
        "f1_std",
        "best",
    ])?;

    fn stat_cells(stat: &Option<Stat>) -> [String; 4] {
        match stat {
            Some(s) => [
                s.count.to_string(),
                s.top.to_string(),
                s.mean.to_string(),
                s.std.to_string(),
            ],
            None => ["0".to_string(), String::new(), String::new(), String::new()],
        }
    }

    for row in rows {
        let mut record = vec![
            row.contrast.clone().unwrap_or_else(|| "pooled".to_string()),
            row.classifier.clone(),
            row.feature_family.clone(),
            row.feature_key.clone().unwrap_or_default(),
            row.runs.to_string(),
        ];
        record.extend(stat_cells(&row.accuracy));
        record.extend(stat_cells(&row.f1));
        record.push(if row.best { "true" } else { "" }.to_string());
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::ImportanceRow;
    use crate::metrics::BinaryMetrics;
    use crate::types::{
        ClassifierSpec, ForestParams, Normalization, ParameterKey, Provenance, SubgenreContrast,
        SvmParams,
    };
    use approx::assert_relative_eq;

    fn provenance(class1: &str, classifier: &ClassifierSpec, size: u32, rep: u32) -> Provenance {
        let key = ParameterKey::Mfw {
            size,
            token_unit: "word".to_string(),
            normalization: Normalization::Tfidf,
        };
        Provenance::new(
            &SubgenreContrast::one_vs_rest("theme", class1),
            &key,
            classifier,
            rep,
        )
    }

    fn score(provenance: Provenance, fold: usize, accuracy: f64, f1: f64) -> ScoreRow {
        ScoreRow {
            provenance,
            fold,
            status: FoldStatus::Ok,
            metrics: Some(BinaryMetrics {
                accuracy,
                precision: f1,
                recall: f1,
                f1,
                support_pos: 1,
                support_neg: 1,
            }),
            error: None,
        }
    }

    #[test]
    fn test_stat_population_std() {
        let stat = Stat::from_values(&[1.0, 3.0]).unwrap();
        assert_eq!(stat.count, 2);
        assert_relative_eq!(stat.mean, 2.0);
        assert_relative_eq!(stat.std, 1.0);
        assert_relative_eq!(stat.top, 3.0);
        assert!(Stat::from_values(&[]).is_none());
    }

    #[test]
    fn test_f1_zero_excluded_by_default() {
        let svm = ClassifierSpec::Svm(SvmParams::default());
        let p = provenance("a", &svm, 100, 0);
        let scores = vec![score(p.clone(), 0, 0.5, 0.0), score(p, 1, 1.0, 0.8)];

        let excluded = SummaryReducer::new(F1ZeroPolicy::Exclude, 5).pooled(&scores);
        let f1 = excluded[0].f1.unwrap();
        assert_eq!(f1.count, 1);
        assert_relative_eq!(f1.mean, 0.8);
        assert_eq!(excluded[0].accuracy.unwrap().count, 2);

        let included = SummaryReducer::new(F1ZeroPolicy::Include, 5).pooled(&scores);
        let f1 = included[0].f1.unwrap();
        assert_eq!(f1.count, 2);
        assert_relative_eq!(f1.mean, 0.4);
    }

    #[test]
    fn test_pooled_groups_by_classifier_and_family() {
        let svm = ClassifierSpec::Svm(SvmParams::default());
        let rf = ClassifierSpec::Rf(ForestParams::default());
        let scores = vec![
            score(provenance("a", &svm, 100, 0), 0, 0.6, 0.6),
            score(provenance("b", &svm, 100, 0), 0, 0.8, 0.8),
            score(provenance("a", &rf, 100, 0), 0, 0.7, 0.7),
            ScoreRow {
                status: FoldStatus::Failed,
                metrics: None,
                error: Some("single class".to_string()),
                ..score(provenance("a", &rf, 100, 1), 0, 0.0, 0.0)
            },
        ];

        let pooled = SummaryReducer::new(F1ZeroPolicy::Exclude, 5).pooled(&scores);
        assert_eq!(pooled.len(), 2);
        let svm_row = pooled.iter().find(|r| r.classifier == "SVM").unwrap();
        assert_eq!(svm_row.runs, 2);
        assert_relative_eq!(svm_row.accuracy.unwrap().mean, 0.7, epsilon = 1e-12);
        let rf_row = pooled.iter().find(|r| r.classifier == "RF").unwrap();
        assert_eq!(rf_row.runs, 1);
    }

    #[test]
    fn test_best_key_flagged_per_classifier() {
        let svm = ClassifierSpec::Svm(SvmParams::default());
        let scores = vec![
            score(provenance("a", &svm, 100, 0), 0, 0.6, 0.6),
            score(provenance("a", &svm, 200, 0), 0, 0.9, 0.9),
        ];
        let reducer = SummaryReducer::new(F1ZeroPolicy::Exclude, 5);
        let mut rows = reducer.summarize(&scores, |row| {
            (
                None,
                row.provenance.classifier.clone(),
                row.provenance.feature_family.to_string(),
                Some(row.provenance.feature_key.clone()),
            )
        });
        mark_best_keys(&mut rows);
        let best: Vec<&SummaryRow> = rows.iter().filter(|r| r.best).collect();
        assert_eq!(best.len(), 1);
        assert_eq!(
            best[0].feature_key.as_deref(),
            Some("mfw:size=200;unit=word;norm=tfidf")
        );

        let summaries = reducer.reduce(&ResultAggregator::new());
        assert!(summaries.pooled.is_empty());
        assert!(summaries.top_features.is_empty());
    }

    #[test]
    fn test_majority_vote_diagnostics() {
        let svm = ClassifierSpec::Svm(SvmParams::default());
        let row = |rep: u32, predictions: &[Option<&str>]| LabelRow {
            provenance: provenance("a", &svm, 100, rep),
            idno: "n1".to_string(),
            true_label: "a".to_string(),
            predictions: predictions.iter().map(|p| p.map(str::to_string)).collect(),
        };
        let labels = vec![
            row(0, &[Some("a"), Some("other"), Some("a")]),
            row(1, &[Some("other"), Some("other"), None]),
            row(2, &[None, None, None]),
        ];

        let diagnostics = example_diagnostics(&labels);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].runs, 2);
        assert_eq!(diagnostics[0].misclassified, 1);
        assert_relative_eq!(diagnostics[0].rate, 0.5);
    }

    #[test]
    fn test_top_features_split_by_side_for_svm() {
        let svm = ClassifierSpec::Svm(SvmParams::default());
        let rf = ClassifierSpec::Rf(ForestParams::default());
        let names: Vec<String> = ["de", "la", "que", "el"].iter().map(|s| s.to_string()).collect();
        let table = ImportanceTable {
            feature_key: "mfw:size=100;unit=word;norm=tfidf".to_string(),
            slug: "mfw100-word-tfidf".to_string(),
            feature_names: names,
            rows: vec![
                ImportanceRow {
                    provenance: provenance("a", &svm, 100, 0),
                    fold: 0,
                    values: vec![0.9, -0.8, 0.1, 0.0],
                },
                ImportanceRow {
                    provenance: provenance("a", &svm, 100, 0),
                    fold: 1,
                    values: vec![0.7, -0.6, 0.1, 0.0],
                },
                ImportanceRow {
                    provenance: provenance("a", &rf, 100, 0),
                    fold: 0,
                    values: vec![0.1, 0.6, 0.2, 0.1],
                },
            ],
        };

        let top = SummaryReducer::new(F1ZeroPolicy::Exclude, 1).top_features(&table);
        let svm_top: Vec<&TopFeature> = top.iter().filter(|f| f.classifier == "SVM").collect();
        assert_eq!(svm_top.len(), 2);
        assert_eq!((svm_top[0].side.as_str(), svm_top[0].feature.as_str()), ("a", "de"));
        assert_relative_eq!(svm_top[0].mean_importance, 0.8, epsilon = 1e-12);
        assert_eq!(
            (svm_top[1].side.as_str(), svm_top[1].feature.as_str()),
            ("other", "la")
        );

        let rf_top: Vec<&TopFeature> = top.iter().filter(|f| f.classifier == "RF").collect();
        assert_eq!(rf_top.len(), 1);
        assert_eq!((rf_top[0].side.as_str(), rf_top[0].feature.as_str()), ("any", "la"));
    }

    #[test]
    fn test_write_summaries() {
        let dir = tempfile::tempdir().unwrap();
        let reducer = SummaryReducer::new(F1ZeroPolicy::Exclude, 3);
        let summaries = reducer.reduce(&ResultAggregator::new());
        let written = summaries.write(dir.path()).unwrap();
        assert_eq!(written.len(), 5);
        let pooled = std::fs::read_to_string(dir.path().join(POOLED_FILE)).unwrap();
        assert!(pooled.starts_with("contrast,classifier,feature_family"));
    }
}
