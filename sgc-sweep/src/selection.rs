//! Balanced resampling of labelled examples
//!
//! **Per (contrast, repetition):**
//! 1. Partition metadata rows into class1 / class2 candidates (one-vs-rest
//!    relabels every other known label to `"other"`)
//! 2. Drop unknown rows (configured unknown label or empty cell)
//! 3. Undersample the larger side without replacement to the smaller size
//! 4. Union and sort by id
//!
//! Draw seeds are derived from (sweep seed, contrast, repetition) so a draw is
//! reproducible on its own, independent of metadata row order and of which
//! other draws are taken.

use crate::error::{SweepError, SweepResult};
use crate::types::SubgenreContrast;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use sgc_common::IdTable;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Id column name of persisted draws
const DRAW_ID_COLUMN: &str = "idno";

/// Balanced, id-sorted sample for one (contrast, repetition)
#[derive(Debug, Clone, PartialEq)]
pub struct ResamplingDraw {
    pub contrast: SubgenreContrast,
    pub repetition: u32,
    pub seed: u64,
    /// Sorted ascending
    pub ids: Vec<String>,
    /// Aligned with `ids`; class1 or the class2 label ("other" for one-vs-rest)
    pub labels: Vec<String>,
}

impl ResamplingDraw {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Size of each side (class1 count, class2 count)
    pub fn side_counts(&self) -> (usize, usize) {
        let class1 = self
            .labels
            .iter()
            .filter(|l| **l == self.contrast.class1)
            .count();
        (class1, self.labels.len() - class1)
    }
}

/// Builds resampling draws from the metadata table
#[derive(Debug, Clone)]
pub struct DataSelector {
    seed: u64,
    unknown_label: String,
}

impl DataSelector {
    pub fn new(seed: u64, unknown_label: impl Into<String>) -> Self {
        Self {
            seed,
            unknown_label: unknown_label.into(),
        }
    }

    /// Per-draw seed: first 8 bytes (little endian) of
    /// SHA-256(sweep seed, contrast canonical form, repetition)
    pub fn draw_seed(&self, contrast: &SubgenreContrast, repetition: u32) -> u64 {
        let mut hasher = Sha256::new();
        hasher.update(self.seed.to_le_bytes());
        hasher.update(contrast.canonical().as_bytes());
        hasher.update([0u8]);
        hasher.update(repetition.to_le_bytes());
        let digest = hasher.finalize();

        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        u64::from_le_bytes(bytes)
    }

    fn is_unknown(&self, label: &str) -> bool {
        label.is_empty() || label == self.unknown_label
    }

    /// Candidate ids per side before balancing, each sorted ascending
    ///
    /// # Returns
    /// `(class1 ids, class2 ids)`
    pub fn candidates(
        &self,
        metadata: &IdTable,
        contrast: &SubgenreContrast,
    ) -> SweepResult<(Vec<String>, Vec<String>)> {
        contrast.validate()?;
        let class2_label = contrast.class2_label().unwrap_or_default();
        let one_vs_rest = matches!(contrast.class2, Some(crate::types::ClassSpec::Rest));

        let column = metadata.column_values(&contrast.level).ok_or_else(|| {
            SweepError::Configuration(format!(
                "Metadata has no label column '{}'",
                contrast.level
            ))
        })?;

        let mut class1 = Vec::new();
        let mut class2 = Vec::new();
        for (id, label) in column {
            let label = label.trim();
            if self.is_unknown(label) {
                continue;
            }
            if label == contrast.class1 {
                class1.push(id.to_string());
            } else if one_vs_rest || label == class2_label {
                class2.push(id.to_string());
            }
        }

        class1.sort();
        class2.sort();
        Ok((class1, class2))
    }

    /// Balanced sample for `repetition` from the candidate pools
    fn sample(
        &self,
        contrast: &SubgenreContrast,
        repetition: u32,
        class1: Vec<String>,
        class2: Vec<String>,
    ) -> SweepResult<ResamplingDraw> {
        let class2_label = contrast.class2_label().unwrap_or_default().to_string();

        for (side, label) in [(&class1, &contrast.class1), (&class2, &class2_label)] {
            if side.is_empty() {
                return Err(SweepError::DegenerateDraw {
                    contrast: contrast.canonical(),
                    repetition,
                    reason: format!("class '{}' has no known examples", label),
                });
            }
        }

        let seed = self.draw_seed(contrast, repetition);
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let target = class1.len().min(class2.len());
        let class1 = undersample(class1, target, &mut rng);
        let class2 = undersample(class2, target, &mut rng);

        let mut rows: Vec<(String, String)> = class1
            .into_iter()
            .map(|id| (id, contrast.class1.clone()))
            .chain(class2.into_iter().map(|id| (id, class2_label.clone())))
            .collect();
        rows.sort();

        let (ids, labels): (Vec<String>, Vec<String>) = rows.into_iter().unzip();
        debug!(
            contrast = %contrast,
            repetition,
            per_class = target,
            "Drew balanced sample"
        );

        Ok(ResamplingDraw {
            contrast: contrast.clone(),
            repetition,
            seed,
            ids,
            labels,
        })
    }

    /// Draw a balanced sample for `repetition`
    ///
    /// With a store, a persisted draw is reused when its seed and candidate
    /// pools match; otherwise the new draw is persisted.
    ///
    /// # Errors
    /// - `DegenerateDraw` if either side has no candidates
    /// - `Configuration` for an invalid contrast or missing label column
    pub fn draw(
        &self,
        metadata: &IdTable,
        contrast: &SubgenreContrast,
        repetition: u32,
        store: Option<&DrawStore>,
    ) -> SweepResult<ResamplingDraw> {
        let (class1, class2) = self.candidates(metadata, contrast)?;
        let Some(store) = store else {
            return self.sample(contrast, repetition, class1, class2);
        };

        let seed = self.draw_seed(contrast, repetition);
        let pools = pool_digest(&class1, &class2);
        if let Some(draw) = store.load(contrast, repetition, seed, &pools)? {
            debug!(contrast = %contrast, repetition, "Reusing persisted draw");
            return Ok(draw);
        }

        let draw = self.sample(contrast, repetition, class1, class2)?;
        store.save(&draw, &pools)?;
        Ok(draw)
    }
}

/// Hex digest of both candidate pools; a metadata edit that moves, adds or
/// removes a candidate changes it
pub fn pool_digest(class1: &[String], class2: &[String]) -> String {
    let mut hasher = Sha256::new();
    for side in [class1, class2] {
        for id in side {
            hasher.update(id.as_bytes());
            hasher.update([0u8]);
        }
        hasher.update([0xffu8]);
    }
    hasher
        .finalize()
        .iter()
        .take(8)
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// Keep `target` of `ids` (sorted) without replacement; order is preserved
fn undersample(ids: Vec<String>, target: usize, rng: &mut ChaCha8Rng) -> Vec<String> {
    if ids.len() <= target {
        return ids;
    }
    let mut picked = rand::seq::index::sample(rng, ids.len(), target).into_vec();
    picked.sort_unstable();
    picked.into_iter().map(|i| ids[i].clone()).collect()
}

// ============================================================================
// Draw persistence
// ============================================================================

/// Persisted draws under `<output>/draws/<contrast-slug>/draw_<r>.csv`
#[derive(Debug, Clone)]
pub struct DrawStore {
    root: PathBuf,
}

impl DrawStore {
    pub fn new(output_dir: &Path) -> Self {
        Self {
            root: output_dir.join("draws"),
        }
    }

    pub fn path(&self, contrast: &SubgenreContrast, repetition: u32) -> PathBuf {
        self.root
            .join(contrast.slug())
            .join(format!("draw_{}.csv", repetition))
    }

    /// Persist `draw` together with the digest of the pools it was drawn from
    pub fn save(&self, draw: &ResamplingDraw, pools: &str) -> SweepResult<()> {
        let mut table = IdTable::new(
            DRAW_ID_COLUMN,
            vec!["label".to_string(), "seed".to_string(), "pools".to_string()],
        );
        let seed = draw.seed.to_string();
        for (id, label) in draw.ids.iter().zip(&draw.labels) {
            table.push_row(
                id.clone(),
                vec![label.clone(), seed.clone(), pools.to_string()],
            )?;
        }
        table.write(&self.path(&draw.contrast, draw.repetition))?;
        Ok(())
    }

    /// Load a persisted draw; `None` if absent or not produced with `seed`
    /// from candidate pools with digest `pools`
    pub fn load(
        &self,
        contrast: &SubgenreContrast,
        repetition: u32,
        seed: u64,
        pools: &str,
    ) -> SweepResult<Option<ResamplingDraw>> {
        let path = self.path(contrast, repetition);
        if !path.exists() {
            return Ok(None);
        }
        let table = IdTable::read(&path)?;

        let class2_label = contrast.class2_label().unwrap_or_default();
        let seed_text = seed.to_string();
        let mut rows = Vec::with_capacity(table.len());
        for id in table.ids() {
            let label = table.get(id, "label").unwrap_or_default();
            let row_seed = table.get(id, "seed").unwrap_or_default();
            let row_pools = table.get(id, "pools").unwrap_or_default();
            if row_seed != seed_text
                || row_pools != pools
                || (label != contrast.class1 && label != class2_label)
            {
                warn!(
                    path = %path.display(),
                    "Persisted draw does not match this sweep, resampling"
                );
                return Ok(None);
            }
            rows.push((id.clone(), label.to_string()));
        }
        rows.sort();

        let (ids, labels): (Vec<String>, Vec<String>) = rows.into_iter().unzip();
        let draw = ResamplingDraw {
            contrast: contrast.clone(),
            repetition,
            seed,
            ids,
            labels,
        };

        let (n1, n2) = draw.side_counts();
        if n1 == 0 || n1 != n2 {
            warn!(
                path = %path.display(),
                class1 = n1,
                class2 = n2,
                "Persisted draw is not balanced, resampling"
            );
            return Ok(None);
        }
        info!(path = %path.display(), size = draw.len(), "Loaded persisted draw");
        Ok(Some(draw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ClassSpec;

    fn metadata(rows: &[(&str, &str)]) -> IdTable {
        let mut table = IdTable::new("idno", vec!["subgenre".to_string()]);
        for (id, label) in rows {
            table.push_row(*id, vec![label.to_string()]).unwrap();
        }
        table
    }

    fn skewed() -> IdTable {
        let mut rows = Vec::new();
        let ids: Vec<String> = (0..40).map(|i| format!("ne{:04}", i)).collect();
        for (i, id) in ids.iter().enumerate() {
            let label = if i < 10 { "a" } else { "b" };
            rows.push((id.as_str(), label));
        }
        metadata(&rows)
    }

    #[test]
    fn test_undersampling_balances_classes() {
        let selector = DataSelector::new(42, "unknown");
        let contrast = SubgenreContrast::new("subgenre", "a", ClassSpec::Label("b".to_string()));

        let draw = selector.draw(&skewed(), &contrast, 0, None).unwrap();
        assert_eq!(draw.len(), 20);
        assert_eq!(draw.side_counts(), (10, 10));

        let mut sorted = draw.ids.clone();
        sorted.sort();
        assert_eq!(draw.ids, sorted);
    }

    #[test]
    fn test_one_vs_rest_relabels_and_excludes_unknown() {
        let table = metadata(&[
            ("n1", "a"),
            ("n2", "a"),
            ("n3", "b"),
            ("n4", "c"),
            ("n5", "unknown"),
            ("n6", ""),
            ("n7", "d"),
        ]);
        let selector = DataSelector::new(1, "unknown");
        let contrast = SubgenreContrast::one_vs_rest("subgenre", "a");

        let (class1, rest) = selector.candidates(&table, &contrast).unwrap();
        assert_eq!(class1, vec!["n1", "n2"]);
        assert_eq!(rest, vec!["n3", "n4", "n7"]);

        let draw = selector.draw(&table, &contrast, 0, None).unwrap();
        assert_eq!(draw.side_counts(), (2, 2));
        assert!(!draw.ids.iter().any(|id| id == "n5" || id == "n6"));
        assert!(draw.labels.iter().all(|l| l == "a" || l == "other"));
    }

    #[test]
    fn test_draws_are_deterministic_and_order_independent() {
        let selector = DataSelector::new(7, "unknown");
        let contrast = SubgenreContrast::new("subgenre", "a", ClassSpec::Label("b".to_string()));

        let forward = skewed();
        let mut reversed_rows: Vec<(String, String)> = forward
            .ids()
            .iter()
            .map(|id| (id.clone(), forward.get(id, "subgenre").unwrap().to_string()))
            .collect();
        reversed_rows.reverse();
        let reversed_refs: Vec<(&str, &str)> = reversed_rows
            .iter()
            .map(|(i, l)| (i.as_str(), l.as_str()))
            .collect();
        let reversed = metadata(&reversed_refs);

        let first = selector.draw(&forward, &contrast, 3, None).unwrap();
        let second = selector.draw(&reversed, &contrast, 3, None).unwrap();
        assert_eq!(first, second);

        let other_rep = selector.draw(&forward, &contrast, 4, None).unwrap();
        assert_ne!(first.seed, other_rep.seed);
    }

    #[test]
    fn test_empty_class_is_degenerate() {
        let table = metadata(&[("n1", "a"), ("n2", "unknown")]);
        let selector = DataSelector::new(0, "unknown");
        let contrast = SubgenreContrast::one_vs_rest("subgenre", "a");

        let err = selector.draw(&table, &contrast, 0, None).unwrap_err();
        assert_eq!(err.kind(), crate::error::RunErrorKind::DegenerateDraw);
    }

    #[test]
    fn test_missing_level_is_configuration_error() {
        let selector = DataSelector::new(0, "unknown");
        let contrast = SubgenreContrast::one_vs_rest("subgenre-theme", "a");
        let err = selector.draw(&skewed(), &contrast, 0, None).unwrap_err();
        assert_eq!(err.kind(), crate::error::RunErrorKind::Configuration);
    }

    #[test]
    fn test_persisted_draw_reused_when_seed_and_pools_match() {
        let dir = tempfile::tempdir().unwrap();
        let store = DrawStore::new(dir.path());
        let selector = DataSelector::new(42, "unknown");
        let contrast = SubgenreContrast::new("subgenre", "a", ClassSpec::Label("b".to_string()));

        let first = selector.draw(&skewed(), &contrast, 0, Some(&store)).unwrap();
        assert!(store.path(&contrast, 0).exists());

        let (class1, class2) = selector.candidates(&skewed(), &contrast).unwrap();
        let pools = pool_digest(&class1, &class2);
        let seed = selector.draw_seed(&contrast, 0);
        assert_eq!(store.load(&contrast, 0, seed, &pools).unwrap(), Some(first.clone()));
        assert_eq!(selector.draw(&skewed(), &contrast, 0, Some(&store)).unwrap(), first);

        let other_seed = DataSelector::new(43, "unknown");
        assert!(store
            .load(&contrast, 0, other_seed.draw_seed(&contrast, 0), &pools)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_persisted_draw_redrawn_after_metadata_change() {
        let dir = tempfile::tempdir().unwrap();
        let store = DrawStore::new(dir.path());
        let selector = DataSelector::new(42, "unknown");
        let contrast = SubgenreContrast::new("subgenre", "a", ClassSpec::Label("b".to_string()));
        let first = selector.draw(&skewed(), &contrast, 0, Some(&store)).unwrap();
        assert_eq!(first.side_counts(), (10, 10));

        // ne0000 loses its class1 label; the draw seed is unchanged
        let base = skewed();
        let rows: Vec<(String, String)> = base
            .ids()
            .iter()
            .map(|id| {
                let label = if id == "ne0000" {
                    "unknown"
                } else {
                    base.get(id, "subgenre").unwrap()
                };
                (id.clone(), label.to_string())
            })
            .collect();
        let refs: Vec<(&str, &str)> = rows.iter().map(|(i, l)| (i.as_str(), l.as_str())).collect();
        let edited = metadata(&refs);

        let redrawn = selector.draw(&edited, &contrast, 0, Some(&store)).unwrap();
        assert_eq!(redrawn.seed, first.seed);
        assert_eq!(redrawn.side_counts(), (9, 9));
        assert!(!redrawn.ids.iter().any(|id| id == "ne0000"));

        let (class1, class2) = selector.candidates(&edited, &contrast).unwrap();
        let reloaded = store
            .load(&contrast, 0, first.seed, &pool_digest(&class1, &class2))
            .unwrap();
        assert_eq!(reloaded, Some(redrawn));
    }

    #[test]
    fn test_pool_digest_separates_sides() {
        let a = vec!["n1".to_string()];
        let b = vec!["n2".to_string()];
        assert_ne!(pool_digest(&a, &b), pool_digest(&b, &a));
        assert_ne!(pool_digest(&a, &[]), pool_digest(&[], &a));
        assert_eq!(pool_digest(&a, &b).len(), 16);
    }
}
