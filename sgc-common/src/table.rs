//! Id-indexed delimited tables
//!
//! Both table kinds exchanged with the corpus tooling are comma-separated with a
//! header row and the document id (`idno`) in the first column:
//! - [`IdTable`]: string cells, used for metadata and persisted draws
//! - [`FeatureMatrix`]: numeric cells, used for feature sets (MFW, topics)

use crate::{Error, Result};
use ndarray::Array2;
use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

/// Max number of offending ids quoted in an error message
const MAX_IDS_IN_ERROR: usize = 5;

// ============================================================================
// IdTable
// ============================================================================

/// Table of string cells keyed by document id
#[derive(Debug, Clone, Default)]
pub struct IdTable {
    id_column: String,
    columns: Vec<String>,
    ids: Vec<String>,
    rows: Vec<Vec<String>>,
    index: HashMap<String, usize>,
}

impl IdTable {
    /// Create an empty table with the given id column name and value columns
    pub fn new(id_column: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            id_column: id_column.into(),
            columns,
            ..Default::default()
        }
    }

    /// Read a table from a CSV file
    pub fn read(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::NotFound(path.to_path_buf()));
        }
        let file = std::fs::File::open(path)?;
        Self::from_reader(file)
    }

    /// Read a table from any CSV source
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(false)
            .from_reader(reader);

        let headers = csv_reader.headers()?.clone();
        let mut header_iter = headers.iter();
        let id_column = header_iter
            .next()
            .ok_or_else(|| Error::InvalidInput("Table has no header row".to_string()))?
            .to_string();
        let columns: Vec<String> = header_iter.map(str::to_string).collect();

        let mut table = Self::new(id_column, columns);
        for record in csv_reader.records() {
            let record = record?;
            let mut cells = record.iter();
            let id = cells.next().unwrap_or_default().to_string();
            let values: Vec<String> = cells.map(str::to_string).collect();
            table.push_row(id, values)?;
        }
        Ok(table)
    }

    /// Append a row; ids must be unique and the value count must match the header
    pub fn push_row(&mut self, id: impl Into<String>, values: Vec<String>) -> Result<()> {
        let id = id.into();
        if id.is_empty() {
            return Err(Error::InvalidInput("Empty id in table row".to_string()));
        }
        if values.len() != self.columns.len() {
            return Err(Error::InvalidInput(format!(
                "Row '{}' has {} values, expected {}",
                id,
                values.len(),
                self.columns.len()
            )));
        }
        if self.index.contains_key(&id) {
            return Err(Error::InvalidInput(format!("Duplicate id '{}'", id)));
        }
        self.index.insert(id.clone(), self.ids.len());
        self.ids.push(id);
        self.rows.push(values);
        Ok(())
    }

    /// Write the table as CSV (parent directories are created)
    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut writer = csv::Writer::from_path(path)?;
        let mut header = Vec::with_capacity(self.columns.len() + 1);
        header.push(self.id_column.as_str());
        header.extend(self.columns.iter().map(String::as_str));
        writer.write_record(&header)?;

        for (id, row) in self.ids.iter().zip(&self.rows) {
            let mut record = Vec::with_capacity(row.len() + 1);
            record.push(id.as_str());
            record.extend(row.iter().map(String::as_str));
            writer.write_record(&record)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Name of the id column
    pub fn id_column(&self) -> &str {
        &self.id_column
    }

    /// Value column names (id column excluded)
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Row ids in file order
    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.column_index(column).is_some()
    }

    fn column_index(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }

    /// Cell value for (id, column)
    pub fn get(&self, id: &str, column: &str) -> Option<&str> {
        let row = *self.index.get(id)?;
        let col = self.column_index(column)?;
        Some(self.rows[row][col].as_str())
    }

    /// All (id, value) pairs of one column in file order
    pub fn column_values(&self, column: &str) -> Option<Vec<(&str, &str)>> {
        let col = self.column_index(column)?;
        Some(
            self.ids
                .iter()
                .zip(&self.rows)
                .map(|(id, row)| (id.as_str(), row[col].as_str()))
                .collect(),
        )
    }
}

// ============================================================================
// FeatureMatrix
// ============================================================================

/// Numeric feature matrix with one row per document
#[derive(Debug, Clone)]
pub struct FeatureMatrix {
    ids: Vec<String>,
    feature_names: Vec<String>,
    values: Array2<f64>,
    index: HashMap<String, usize>,
}

impl FeatureMatrix {
    /// Build a matrix from parts, validating shape, id uniqueness and finiteness
    pub fn from_parts(
        ids: Vec<String>,
        feature_names: Vec<String>,
        values: Array2<f64>,
    ) -> Result<Self> {
        if values.nrows() != ids.len() || values.ncols() != feature_names.len() {
            return Err(Error::InvalidInput(format!(
                "Matrix shape {:?} does not match {} ids x {} features",
                values.dim(),
                ids.len(),
                feature_names.len()
            )));
        }
        if let Some(((row, col), value)) = values.indexed_iter().find(|(_, v)| !v.is_finite()) {
            return Err(Error::InvalidInput(format!(
                "Non-finite value {} for id '{}', feature '{}'",
                value, ids[row], feature_names[col]
            )));
        }

        let mut index = HashMap::with_capacity(ids.len());
        for (i, id) in ids.iter().enumerate() {
            if index.insert(id.clone(), i).is_some() {
                return Err(Error::InvalidInput(format!("Duplicate id '{}'", id)));
            }
        }

        Ok(Self {
            ids,
            feature_names,
            values,
            index,
        })
    }

    /// Read a feature matrix from a CSV file
    pub fn read(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::NotFound(path.to_path_buf()));
        }
        let file = std::fs::File::open(path)?;
        Self::from_reader(file)
            .map_err(|e| match e {
                Error::InvalidInput(msg) => {
                    Error::InvalidInput(format!("{}: {}", path.display(), msg))
                }
                other => other,
            })
    }

    /// Read a feature matrix from any CSV source
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let table = IdTable::from_reader(reader)?;
        let feature_names = table.columns().to_vec();
        let n_features = feature_names.len();

        let mut flat = Vec::with_capacity(table.len() * n_features);
        for (id, row) in table.ids.iter().zip(&table.rows) {
            for (name, cell) in feature_names.iter().zip(row) {
                let value: f64 = cell.trim().parse().map_err(|_| {
                    Error::InvalidInput(format!(
                        "Non-numeric value '{}' for id '{}', feature '{}'",
                        cell, id, name
                    ))
                })?;
                flat.push(value);
            }
        }

        let values = Array2::from_shape_vec((table.len(), n_features), flat)
            .map_err(|e| Error::InvalidInput(format!("Matrix shape error: {}", e)))?;
        Self::from_parts(table.ids, feature_names, values)
    }

    /// Rows for `ids`, in exactly that order
    ///
    /// Any id absent from the matrix is an error; the result always has
    /// `ids.len()` rows so it lines up positionally with a label vector.
    pub fn reindex(&self, ids: &[String]) -> Result<Array2<f64>> {
        let mut positions = Vec::with_capacity(ids.len());
        let mut missing = Vec::new();
        for id in ids {
            match self.index.get(id) {
                Some(&pos) => positions.push(pos),
                None => missing.push(id.as_str()),
            }
        }

        if !missing.is_empty() {
            let shown: Vec<&str> = missing.iter().take(MAX_IDS_IN_ERROR).copied().collect();
            return Err(Error::InvalidInput(format!(
                "{} ids missing from feature matrix (e.g. {})",
                missing.len(),
                shown.join(", ")
            )));
        }

        Ok(self.values.select(ndarray::Axis(0), &positions))
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }

    pub fn n_rows(&self) -> usize {
        self.ids.len()
    }

    pub fn n_features(&self) -> usize {
        self.feature_names.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const METADATA: &str = "idno,subgenre-theme,author-gender\n\
                            nh0002,novela histórica,male\n\
                            nh0001,novela sentimental,female\n";

    #[test]
    fn test_id_table_reads_header_and_rows() {
        let table = IdTable::from_reader(METADATA.as_bytes()).unwrap();
        assert_eq!(table.id_column(), "idno");
        assert_eq!(table.columns(), &["subgenre-theme", "author-gender"]);
        assert_eq!(table.ids(), &["nh0002", "nh0001"]);
        assert_eq!(table.get("nh0001", "subgenre-theme"), Some("novela sentimental"));
        assert_eq!(table.get("nh0001", "missing"), None);
    }

    #[test]
    fn test_id_table_rejects_duplicate_ids() {
        let data = "idno,label\na,x\na,y\n";
        let result = IdTable::from_reader(data.as_bytes());
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_id_table_column_values_in_file_order() {
        let table = IdTable::from_reader(METADATA.as_bytes()).unwrap();
        let values = table.column_values("author-gender").unwrap();
        assert_eq!(values, vec![("nh0002", "male"), ("nh0001", "female")]);
    }

    #[test]
    fn test_id_table_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("draw.csv");

        let mut table = IdTable::new("idno", vec!["label".to_string()]);
        table.push_row("nh0001", vec!["other".to_string()]).unwrap();
        table.write(&path).unwrap();

        let reread = IdTable::read(&path).unwrap();
        assert_eq!(reread.get("nh0001", "label"), Some("other"));
    }

    #[test]
    fn test_feature_matrix_reindex_preserves_requested_order() {
        let data = ",de,la\nb,1.0,2.0\na,3.0,4.0\nc,5.0,6.0\n";
        let matrix = FeatureMatrix::from_reader(data.as_bytes()).unwrap();
        assert_eq!(matrix.n_rows(), 3);
        assert_eq!(matrix.feature_names(), &["de", "la"]);

        let ids = vec!["a".to_string(), "c".to_string()];
        let rows = matrix.reindex(&ids).unwrap();
        assert_eq!(rows.nrows(), 2);
        assert_eq!(rows[[0, 0]], 3.0);
        assert_eq!(rows[[1, 1]], 6.0);
    }

    #[test]
    fn test_feature_matrix_reindex_missing_id() {
        let data = "idno,f\na,1\n";
        let matrix = FeatureMatrix::from_reader(data.as_bytes()).unwrap();
        let result = matrix.reindex(&["zzz".to_string()]);
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_feature_matrix_rejects_non_numeric() {
        let data = "idno,f\na,abc\n";
        assert!(FeatureMatrix::from_reader(data.as_bytes()).is_err());
    }

    #[test]
    fn test_feature_matrix_rejects_nan() {
        let data = "idno,f\na,NaN\n";
        assert!(FeatureMatrix::from_reader(data.as_bytes()).is_err());
    }

    #[test]
    fn test_feature_matrix_missing_file() {
        let result = FeatureMatrix::read(Path::new("/nonexistent/bow_mfw100.csv"));
        assert!(matches!(result, Err(Error::NotFound(_))));
    }
}
