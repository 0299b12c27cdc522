//! Rectangular data container shared by every model family.
//!
//! A [`Dataset`] is a numeric table (rows = observations) optionally paired
//! with a leading outcome column, a parallel row-weight vector, text-valued
//! side columns, names, and named supplementary pages (a predicted-vs-actual
//! table, a covariance table, ...). The principal table's row count is the
//! unit of "N"; weights, when present, have exactly that length.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Row, column, and outcome names attached to a dataset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Names {
    /// Title of the table (used by diagnostics output).
    pub title: Option<String>,
    /// Name of the outcome column, if one is set.
    pub outcome: Option<String>,
    /// One name per matrix column (may be empty).
    pub columns: Vec<String>,
    /// One name per row (may be empty).
    pub rows: Vec<String>,
}

/// NaN-equals-NaN comparison used for row equality.
#[inline]
pub fn nan_equal(a: f64, b: f64) -> bool {
    a == b || (a.is_nan() && b.is_nan())
}

/// A rectangular numeric table with optional outcome, weights, text columns,
/// names, and named supplementary pages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    /// The principal numeric table (rows = observations).
    pub matrix: DMatrix<f64>,
    /// Optional outcome column, parallel to the matrix rows.
    pub outcome: Option<DVector<f64>>,
    /// Optional per-observation weights; length equals [`Dataset::nrows`].
    pub weights: Option<DVector<f64>>,
    /// Text-valued side columns, row-major (one `Vec<String>` per row).
    pub text: Vec<Vec<String>>,
    /// Attached names.
    pub names: Names,
    pages: Vec<(String, Dataset)>,
}

impl Dataset {
    /// Wrap a matrix as a dataset with no outcome, weights, or text.
    pub fn new(matrix: DMatrix<f64>) -> Self {
        Self {
            matrix,
            outcome: None,
            weights: None,
            text: Vec::new(),
            names: Names::default(),
            pages: Vec::new(),
        }
    }

    /// Build from row-wise data; every row must have the same length.
    pub fn from_rows(rows: Vec<Vec<f64>>) -> Result<Self> {
        let n = rows.len();
        let p = rows.first().map(|r| r.len()).unwrap_or(0);
        let mut data = Vec::with_capacity(n * p);
        for (i, row) in rows.into_iter().enumerate() {
            if row.len() != p {
                return Err(Error::Validation(format!(
                    "data must be rectangular: row {} has len {}, expected {}",
                    i,
                    row.len(),
                    p
                )));
            }
            data.extend(row);
        }
        Ok(Self::new(DMatrix::from_row_slice(n, p, &data)))
    }

    /// A single-column dataset.
    pub fn from_column(values: Vec<f64>) -> Self {
        let n = values.len();
        Self::new(DMatrix::from_vec(n, 1, values))
    }

    /// An empty one-column table for named scalar rows (diagnostics).
    pub fn scalars() -> Self {
        Self::new(DMatrix::zeros(0, 1))
    }

    /// Number of observations: the longest of matrix rows, outcome, and
    /// text rows.
    pub fn nrows(&self) -> usize {
        self.matrix
            .nrows()
            .max(self.outcome.as_ref().map_or(0, |v| v.len()))
            .max(self.text.len())
    }

    /// Number of numeric columns in the principal table.
    pub fn ncols(&self) -> usize {
        self.matrix.ncols()
    }

    /// Width of one observation's numeric values: outcome (if set) plus
    /// the matrix columns.
    pub fn row_width(&self) -> usize {
        usize::from(self.outcome.is_some()) + self.matrix.ncols()
    }

    /// Attach per-observation weights; the length must equal the row count.
    pub fn set_weights(&mut self, weights: Vec<f64>) -> Result<()> {
        if weights.len() != self.nrows() {
            return Err(Error::Validation(format!(
                "weights length {} does not match row count {}",
                weights.len(),
                self.nrows()
            )));
        }
        self.weights = Some(DVector::from_vec(weights));
        Ok(())
    }

    /// The numeric content of row `i`: outcome value first (when set),
    /// then the matrix row.
    pub fn row_values(&self, i: usize) -> Vec<f64> {
        let mut out = Vec::with_capacity(self.row_width());
        if let Some(y) = &self.outcome {
            out.push(y[i]);
        }
        for j in 0..self.matrix.ncols() {
            out.push(self.matrix[(i, j)]);
        }
        out
    }

    /// Append a named scalar row to a one-column table (see
    /// [`Dataset::scalars`]).
    pub fn add_named_scalar(&mut self, name: &str, value: f64) {
        let n = self.matrix.nrows();
        self.matrix = self.matrix.clone().insert_row(n, value);
        while self.names.rows.len() < n {
            self.names.rows.push(String::new());
        }
        self.names.rows.push(name.to_string());
    }

    /// Look up a named scalar row.
    pub fn named_scalar(&self, name: &str) -> Option<f64> {
        let i = self.names.rows.iter().position(|r| r == name)?;
        if i < self.matrix.nrows() && self.matrix.ncols() > 0 {
            Some(self.matrix[(i, 0)])
        } else {
            None
        }
    }

    /// Attach a supplementary page, replacing any page of the same name.
    pub fn add_page(&mut self, name: &str, page: Dataset) {
        self.rm_page(name);
        self.pages.push((name.to_string(), page));
    }

    /// Detach and return a page by name.
    pub fn rm_page(&mut self, name: &str) -> Option<Dataset> {
        let i = self.pages.iter().position(|(n, _)| n == name)?;
        Some(self.pages.remove(i).1)
    }

    /// Look up a page by name.
    pub fn page(&self, name: &str) -> Option<&Dataset> {
        self.pages.iter().find(|(n, _)| n == name).map(|(_, d)| d)
    }

    /// Mutable page lookup.
    pub fn page_mut(&mut self, name: &str) -> Option<&mut Dataset> {
        self.pages.iter_mut().find(|(n, _)| n == name).map(|(_, d)| d)
    }

    /// Names of all attached pages, in order.
    pub fn page_names(&self) -> Vec<&str> {
        self.pages.iter().map(|(n, _)| n.as_str()).collect()
    }

    /// Compare row `i` of `self` with row `j` of `other`.
    ///
    /// Numeric fields use NaN-equals-NaN semantics; text fields compare
    /// exactly. Presence of each element (outcome, matrix, text) must match
    /// on both sides. Weights and names are not compared.
    pub fn rows_equal(&self, i: usize, other: &Dataset, j: usize) -> bool {
        match (&self.outcome, &other.outcome) {
            (Some(a), Some(b)) => {
                if !nan_equal(a[i], b[j]) {
                    return false;
                }
            }
            (None, None) => {}
            _ => return false,
        }
        if self.matrix.ncols() != other.matrix.ncols() {
            return false;
        }
        for c in 0..self.matrix.ncols() {
            if !nan_equal(self.matrix[(i, c)], other.matrix[(j, c)]) {
                return false;
            }
        }
        let lt = self.text.get(i).map_or(0, |r| r.len());
        let rt = other.text.get(j).map_or(0, |r| r.len());
        if lt != rt {
            return false;
        }
        if lt > 0 && self.text[i] != other.text[j] {
            return false;
        }
        true
    }

    /// Remove every row whose mask entry is true, from the matrix, outcome,
    /// weights, text, and row names alike.
    pub fn remove_rows(&mut self, mask: &[bool]) -> Result<()> {
        let n = self.nrows();
        if mask.len() != n {
            return Err(Error::Validation(format!(
                "row mask length {} does not match row count {}",
                mask.len(),
                n
            )));
        }
        let keep: Vec<usize> = (0..n).filter(|&i| !mask[i]).collect();
        if self.matrix.nrows() == n {
            let ncols = self.matrix.ncols();
            self.matrix =
                DMatrix::from_fn(keep.len(), ncols, |r, c| self.matrix[(keep[r], c)]);
        }
        if let Some(y) = &self.outcome {
            self.outcome = Some(DVector::from_fn(keep.len(), |r, _| y[keep[r]]));
        }
        if let Some(w) = &self.weights {
            self.weights = Some(DVector::from_fn(keep.len(), |r, _| w[keep[r]]));
        }
        if !self.text.is_empty() {
            self.text = keep.iter().map(|&i| self.text[i].clone()).collect();
        }
        if !self.names.rows.is_empty() {
            self.names.rows = keep
                .iter()
                .filter_map(|&i| self.names.rows.get(i).cloned())
                .collect();
        }
        Ok(())
    }
}
