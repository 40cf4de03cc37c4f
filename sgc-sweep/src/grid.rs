//! Experiment grid enumeration
//!
//! Cells are enumerated contrast → feature key → classifier → repetition
//! (repetition innermost). The enumeration is a pure function of the
//! configuration, so a cell index is stable across processes and resumed runs
//! can restart from any position.

use crate::config::SweepConfiguration;
use crate::types::{ClassifierSpec, EvaluationRun, ParameterKey, SubgenreContrast};

/// Cartesian product of the sweep axes
#[derive(Debug, Clone)]
pub struct ExperimentGrid {
    contrasts: Vec<SubgenreContrast>,
    keys: Vec<ParameterKey>,
    classifiers: Vec<ClassifierSpec>,
    repetitions: u32,
}

impl ExperimentGrid {
    pub fn new(
        contrasts: Vec<SubgenreContrast>,
        keys: Vec<ParameterKey>,
        classifiers: Vec<ClassifierSpec>,
        repetitions: u32,
    ) -> Self {
        Self {
            contrasts,
            keys,
            classifiers,
            repetitions,
        }
    }

    pub fn from_config(config: &SweepConfiguration) -> Self {
        Self::new(
            config.contrasts.clone(),
            config.parameter_keys(),
            config.classifiers.clone(),
            config.repetitions,
        )
    }

    pub fn len(&self) -> usize {
        self.contrasts.len() * self.keys.len() * self.classifiers.len() * self.repetitions as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contrasts(&self) -> &[SubgenreContrast] {
        &self.contrasts
    }

    pub fn keys(&self) -> &[ParameterKey] {
        &self.keys
    }

    pub fn classifiers(&self) -> &[ClassifierSpec] {
        &self.classifiers
    }

    pub fn repetitions(&self) -> u32 {
        self.repetitions
    }

    /// Cell at `index`, or `None` past the end
    pub fn cell(&self, index: usize) -> Option<EvaluationRun> {
        if index >= self.len() {
            return None;
        }
        let reps = self.repetitions as usize;
        let n_classifiers = self.classifiers.len();
        let n_keys = self.keys.len();

        let repetition = index % reps;
        let rest = index / reps;
        let classifier = rest % n_classifiers;
        let rest = rest / n_classifiers;
        let key = rest % n_keys;
        let contrast = rest / n_keys;

        Some(EvaluationRun {
            index,
            contrast_index: contrast,
            contrast: self.contrasts[contrast].clone(),
            key: self.keys[key].clone(),
            classifier: self.classifiers[classifier].clone(),
            repetition: repetition as u32,
        })
    }

    pub fn iter(&self) -> GridIter<'_> {
        self.iter_from(0)
    }

    /// Iterate from `start` (clamped to the grid length)
    pub fn iter_from(&self, start: usize) -> GridIter<'_> {
        GridIter {
            grid: self,
            next: start.min(self.len()),
        }
    }
}

/// Iterator over grid cells
pub struct GridIter<'a> {
    grid: &'a ExperimentGrid,
    next: usize,
}

impl Iterator for GridIter<'_> {
    type Item = EvaluationRun;

    fn next(&mut self) -> Option<Self::Item> {
        let cell = self.grid.cell(self.next)?;
        self.next += 1;
        Some(cell)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.grid.len() - self.next;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for GridIter<'_> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{KnnParams, Normalization, SvmParams};

    fn grid() -> ExperimentGrid {
        let contrasts = vec![
            SubgenreContrast::one_vs_rest("theme", "a"),
            SubgenreContrast::one_vs_rest("theme", "b"),
        ];
        let keys = [100, 200, 300]
            .into_iter()
            .map(|size| ParameterKey::Mfw {
                size,
                token_unit: "word".to_string(),
                normalization: Normalization::Tfidf,
            })
            .collect();
        let classifiers = vec![
            ClassifierSpec::Svm(SvmParams::default()),
            ClassifierSpec::Knn(KnnParams::default()),
        ];
        ExperimentGrid::new(contrasts, keys, classifiers, 4)
    }

    #[test]
    fn test_len_is_product_of_axes() {
        let grid = grid();
        assert_eq!(grid.len(), 2 * 3 * 2 * 4);
        assert_eq!(grid.iter().len(), grid.len());
    }

    #[test]
    fn test_enumeration_order_repetition_innermost() {
        let cells: Vec<EvaluationRun> = grid().iter().take(9).collect();
        assert_eq!(cells[0].repetition, 0);
        assert_eq!(cells[3].repetition, 3);
        assert_eq!(cells[4].repetition, 0);
        assert_eq!(cells[4].classifier.name(), "KNN");
        assert_eq!(cells[8].key.to_string(), "mfw:size=200;unit=word;norm=tfidf");
        assert!(cells.iter().all(|c| c.contrast_index == 0));
        assert!(cells.iter().enumerate().all(|(i, c)| c.index == i));
    }

    #[test]
    fn test_iter_from_matches_cell() {
        let grid = grid();
        let tail: Vec<EvaluationRun> = grid.iter_from(30).collect();
        assert_eq!(tail.len(), grid.len() - 30);
        assert_eq!(tail[0], grid.cell(30).unwrap());
        assert_eq!(tail[0].contrast.class1, "b");
        assert!(grid.cell(grid.len()).is_none());
        assert_eq!(grid.iter_from(1000).count(), 0);
    }

    #[test]
    fn test_every_cell_is_distinct() {
        let grid = grid();
        let keys: std::collections::HashSet<String> = grid.iter().map(|c| c.key()).collect();
        assert_eq!(keys.len(), grid.len());
    }

    #[test]
    fn test_empty_axis_gives_empty_grid() {
        let grid = ExperimentGrid::new(vec![], vec![], vec![], 3);
        assert!(grid.is_empty());
        assert_eq!(grid.iter().count(), 0);
    }
}
