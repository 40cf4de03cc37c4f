//! Sweep driver
//!
//! **Phases:**
//! 1. Validate the configuration, write the resolved copy, load metadata
//!    (errors here abort before any cell runs)
//! 2. Build every (contrast, repetition) draw; degenerate draws are kept as
//!    shared errors for the cells that depend on them
//! 3. Evaluate pending grid cells on a rayon pool inside `spawn_blocking`
//! 4. A single aggregator task receives outcomes over a bounded channel,
//!    appends them to the journal and folds them into the tables
//! 5. Flush tables, summaries and `sweep_report.json`
//!
//! Run-level errors never abort the sweep. A journal write failure cancels the
//! remaining cells; everything aggregated so far is still flushed.

use crate::aggregator::{FailedRun, ResultAggregator, RunOutcome};
use crate::config::SweepConfiguration;
use crate::error::{RunErrorKind, SweepError, SweepResult};
use crate::evaluator::Evaluator;
use crate::features::{FeatureLoader, FeatureSource, FileFeatureSource};
use crate::grid::ExperimentGrid;
use crate::journal::{read_journal, RunJournal, JOURNAL_FILE};
use crate::selection::{DataSelector, DrawStore, ResamplingDraw};
use crate::summary::SummaryReducer;
use crate::types::EvaluationRun;
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sgc_common::config::write_toml_config;
use sgc_common::IdTable;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Outcomes buffered between workers and the aggregator
const CHANNEL_CAPACITY: usize = 64;

pub const RESOLVED_CONFIG_FILE: &str = "sweep_resolved.toml";
pub const REPORT_FILE: &str = "sweep_report.json";

/// Draw for one (contrast, repetition), or the error every dependent cell reports
type DrawSlot = Result<ResamplingDraw, Arc<SweepError>>;

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Replay the journal and skip cells that already completed
    pub resume: bool,
}

/// Final accounting of one sweep invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepReport {
    pub sweep_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Cells in the grid
    pub total_cells: usize,
    /// Cells skipped because the journal already held a completed run
    pub resumed: usize,
    /// Journal records ignored on resume because other settings produced them
    #[serde(default)]
    pub stale_records: usize,
    /// Cells evaluated in this invocation
    pub attempted: usize,
    /// Completed runs in the tables (resumed ones included)
    pub succeeded: usize,
    /// Failed runs by error kind
    pub failed: BTreeMap<RunErrorKind, usize>,
    /// Failed folds inside completed runs
    pub failed_folds: usize,
    pub draws_total: usize,
    pub draws_skipped: usize,
    /// Feature matrices read from disk
    pub feature_loads: usize,
    pub cancelled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub journal_error: Option<String>,
}

impl SweepReport {
    pub fn failed_total(&self) -> usize {
        self.failed.values().sum()
    }
}

/// Grid dimensions, as printed by `plan`
#[derive(Debug, Clone, Serialize)]
pub struct SweepPlan {
    pub contrasts: Vec<String>,
    pub feature_keys: Vec<String>,
    pub classifiers: Vec<String>,
    pub repetitions: u32,
    pub folds: usize,
    pub total_cells: usize,
}

/// Experiment sweep over one configuration
pub struct Sweep {
    config: SweepConfiguration,
    source: Arc<dyn FeatureSource>,
    cancel: CancellationToken,
}

impl Sweep {
    /// Sweep reading feature matrices from the configured directories
    pub fn new(config: SweepConfiguration) -> SweepResult<Self> {
        let source = Arc::new(FileFeatureSource::new(
            config.features_dir.clone(),
            config.topics_dir().to_path_buf(),
        ));
        Self::with_source(config, source)
    }

    /// Sweep with a custom feature source
    pub fn with_source(
        config: SweepConfiguration,
        source: Arc<dyn FeatureSource>,
    ) -> SweepResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            source,
            cancel: CancellationToken::new(),
        })
    }

    pub fn config(&self) -> &SweepConfiguration {
        &self.config
    }

    /// Token that stops the sweep after the cells in flight
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn grid(&self) -> ExperimentGrid {
        ExperimentGrid::from_config(&self.config)
    }

    pub fn plan(&self) -> SweepPlan {
        let grid = self.grid();
        SweepPlan {
            contrasts: grid.contrasts().iter().map(|c| c.canonical()).collect(),
            feature_keys: grid.keys().iter().map(|k| k.to_string()).collect(),
            classifiers: grid.classifiers().iter().map(|c| c.to_string()).collect(),
            repetitions: grid.repetitions(),
            folds: self.config.folds,
            total_cells: grid.len(),
        }
    }

    /// Run the sweep and flush every output table
    pub async fn run(&self, options: RunOptions) -> SweepResult<SweepReport> {
        let sweep_id = Uuid::new_v4();
        let started_at = sgc_common::time::now();
        let config = &self.config;
        let output_dir = config.output_dir.clone();
        let grid = Arc::new(self.grid());

        info!(
            %sweep_id,
            cells = grid.len(),
            workers = config.worker_count(),
            resume = options.resume,
            "Starting sweep"
        );

        std::fs::create_dir_all(&output_dir)?;
        write_toml_config(config, &output_dir.join(RESOLVED_CONFIG_FILE))?;
        let metadata = IdTable::read(&config.metadata_file)?;
        let fingerprint = self.fingerprint()?;
        info!(
            path = %config.metadata_file.display(),
            rows = metadata.len(),
            %fingerprint,
            "Loaded metadata"
        );

        // Journal replay: only completed runs under the current settings are
        // kept, failed ones are retried
        let journal_path = output_dir.join(JOURNAL_FILE);
        let mut aggregator = ResultAggregator::new();
        let mut stale_records = 0;
        if options.resume {
            let contents = read_journal(&journal_path, &fingerprint)?;
            stale_records = contents.stale;
            let replayed = replay(&contents.outcomes, &mut aggregator, false);
            info!(replayed, stale = stale_records, "Replayed completed runs from journal");
        }
        let journal = RunJournal::open(&journal_path, !options.resume, fingerprint)?;

        let draws = {
            let grid = Arc::clone(&grid);
            let selector = DataSelector::new(config.seed, config.unknown_label.clone());
            let store = DrawStore::new(&output_dir);
            tokio::task::spawn_blocking(move || build_draws(&grid, &metadata, &selector, &store))
                .await
                .map_err(|e| SweepError::Worker(format!("Draw task failed: {}", e)))?
        };
        let draws_total: usize = draws.iter().map(Vec::len).sum();
        let draws_skipped = draws.iter().flatten().filter(|slot| slot.is_err()).count();
        let draws = Arc::new(draws);

        let pending: Vec<EvaluationRun> = grid
            .iter()
            .filter(|run| !aggregator.contains(&run.key()))
            .collect();
        let resumed = grid.len() - pending.len();
        let attempted_target = pending.len();
        info!(pending = attempted_target, resumed, "Evaluating grid cells");

        let (tx, rx) = mpsc::channel::<RunOutcome>(CHANNEL_CAPACITY);
        let collector = tokio::spawn(collect(
            rx,
            aggregator,
            journal,
            self.cancel.clone(),
            attempted_target,
        ));

        let loader = Arc::new(FeatureLoader::new(Arc::clone(&self.source)));
        let worker_result = {
            let loader = Arc::clone(&loader);
            let draws = Arc::clone(&draws);
            let cancel = self.cancel.clone();
            let workers = config.worker_count();
            let (folds, shuffle) = (config.folds, config.shuffle_folds);

            tokio::task::spawn_blocking(move || -> SweepResult<()> {
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(workers)
                    .thread_name(|i| format!("sgc-worker-{}", i))
                    .build()
                    .map_err(|e| SweepError::Worker(format!("Build worker pool failed: {}", e)))?;
                let evaluator = Evaluator::new(&loader, folds, shuffle);

                pool.install(|| {
                    pending.par_iter().for_each(|run| {
                        if cancel.is_cancelled() {
                            return;
                        }
                        let outcome = evaluate_cell(&evaluator, run, &draws);
                        if tx.blocking_send(outcome).is_err() {
                            cancel.cancel();
                        }
                    });
                });
                debug!("Worker pool drained");
                Ok(())
            })
            .await
        };

        let collected = collector
            .await
            .map_err(|e| SweepError::Worker(format!("Aggregator task failed: {}", e)))?;
        match worker_result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "Worker pool failed, flushing partial results"),
            Err(e) => error!(error = %e, "Worker task died, flushing partial results"),
        }

        let aggregator = collected.aggregator;
        aggregator.write(&output_dir)?;
        SummaryReducer::new(config.f1_zero_policy, config.top_features)
            .reduce(&aggregator)
            .write(&output_dir)?;

        let mut failed = BTreeMap::new();
        for failure in aggregator.failures() {
            *failed.entry(failure.kind).or_insert(0) += 1;
        }

        let report = SweepReport {
            sweep_id,
            started_at,
            finished_at: sgc_common::time::now(),
            total_cells: grid.len(),
            resumed,
            stale_records,
            attempted: collected.received,
            succeeded: aggregator.completed_runs(),
            failed,
            failed_folds: aggregator.failed_folds(),
            draws_total,
            draws_skipped,
            feature_loads: loader.load_count(),
            cancelled: self.cancel.is_cancelled(),
            journal_error: collected.journal_error,
        };
        write_report(&report, &output_dir.join(REPORT_FILE))?;

        info!(
            %sweep_id,
            succeeded = report.succeeded,
            failed = report.failed_total(),
            failed_folds = report.failed_folds,
            draws_skipped = report.draws_skipped,
            cancelled = report.cancelled,
            "Sweep finished"
        );
        Ok(report)
    }

    /// Fingerprint of the configured settings and the metadata file contents
    pub fn fingerprint(&self) -> SweepResult<String> {
        let path = &self.config.metadata_file;
        let bytes = std::fs::read(path).map_err(|e| {
            SweepError::Configuration(format!("Read {} failed: {}", path.display(), e))
        })?;
        Ok(self.config.fingerprint(&bytes))
    }

    /// Rebuild tables and summaries from the journal without evaluating anything
    ///
    /// # Returns
    /// Paths of the files written
    pub fn summarize_journal(&self) -> SweepResult<Vec<PathBuf>> {
        let output_dir = &self.config.output_dir;
        let contents = read_journal(&output_dir.join(JOURNAL_FILE), &self.fingerprint()?)?;
        let outcomes = contents.outcomes;
        if outcomes.is_empty() {
            return Err(SweepError::Journal(format!(
                "No journal records for these settings under {} ({} from other settings)",
                output_dir.display(),
                contents.stale
            )));
        }

        let mut aggregator = ResultAggregator::new();
        let runs = replay(&outcomes, &mut aggregator, true);
        info!(runs, records = outcomes.len(), "Rebuilt tables from journal");

        let mut written = aggregator.write(output_dir)?;
        written.extend(
            SummaryReducer::new(self.config.f1_zero_policy, self.config.top_features)
                .reduce(&aggregator)
                .write(output_dir)?,
        );
        Ok(written)
    }
}

/// Fold journal records into `aggregator`, completed runs first so a run that
/// failed once and later completed keeps its results
fn replay(
    outcomes: &[RunOutcome],
    aggregator: &mut ResultAggregator,
    include_failed: bool,
) -> usize {
    let mut added = 0;
    for outcome in outcomes.iter().filter(|o| o.is_completed()) {
        added += usize::from(aggregator.add(outcome));
    }
    if include_failed {
        for outcome in outcomes.iter().filter(|o| !o.is_completed()) {
            added += usize::from(aggregator.add(outcome));
        }
    }
    added
}

/// Draws indexed by [contrast index][repetition]
fn build_draws(
    grid: &ExperimentGrid,
    metadata: &IdTable,
    selector: &DataSelector,
    store: &DrawStore,
) -> Vec<Vec<DrawSlot>> {
    grid.contrasts()
        .iter()
        .map(|contrast| {
            (0..grid.repetitions())
                .map(|repetition| {
                    selector
                        .draw(metadata, contrast, repetition, Some(store))
                        .map_err(|e| {
                            warn!(
                                contrast = %contrast,
                                repetition,
                                error = %e,
                                "Draw skipped, dependent cells will fail"
                            );
                            Arc::new(e)
                        })
                })
                .collect()
        })
        .collect()
}

/// Evaluate one cell; every error becomes a failed outcome
fn evaluate_cell(
    evaluator: &Evaluator<'_>,
    run: &EvaluationRun,
    draws: &[Vec<DrawSlot>],
) -> RunOutcome {
    let slot = draws
        .get(run.contrast_index)
        .and_then(|reps| reps.get(run.repetition as usize));

    let result = match slot {
        Some(Ok(draw)) => evaluator.evaluate(run, draw),
        Some(Err(shared)) => Err(SweepError::Draw(Arc::clone(shared))),
        None => Err(SweepError::Configuration(format!(
            "No draw for cell {}",
            run.index
        ))),
    };

    match result {
        Ok(evaluation) => RunOutcome::Completed(evaluation),
        Err(e) => {
            if !matches!(e, SweepError::Draw(_)) {
                warn!(run = %run.key(), kind = e.kind().as_str(), error = %e, "Run failed");
            }
            RunOutcome::Failed(FailedRun::new(run.provenance(), &e))
        }
    }
}

struct Collected {
    aggregator: ResultAggregator,
    received: usize,
    journal_error: Option<String>,
}

/// Single writer: journal first, then tables
async fn collect(
    mut rx: mpsc::Receiver<RunOutcome>,
    mut aggregator: ResultAggregator,
    mut journal: RunJournal,
    cancel: CancellationToken,
    expected: usize,
) -> Collected {
    let mut received = 0;
    let mut journal_error = None;
    let progress_step = (expected / 20).max(1);

    while let Some(outcome) = rx.recv().await {
        received += 1;

        if journal_error.is_none() {
            if let Err(e) = journal.append(&outcome) {
                error!(
                    path = %journal.path().display(),
                    error = %e,
                    "Journal write failed, cancelling remaining cells"
                );
                journal_error = Some(e.to_string());
                cancel.cancel();
            }
        }
        aggregator.add(&outcome);

        if received % progress_step == 0 || received == expected {
            info!(done = received, total = expected, "Sweep progress");
        }
    }

    Collected {
        aggregator,
        received,
        journal_error,
    }
}

fn write_report(report: &SweepReport, path: &std::path::Path) -> SweepResult<()> {
    let json = serde_json::to_string_pretty(report)
        .map_err(|e| SweepError::Journal(format!("Serialize report failed: {}", e)))?;
    std::fs::write(path, json)?;
    Ok(())
}
