//! Row-ordered design matrix.

use serde::{Deserialize, Serialize};

use crate::error::{DesignError, DesignResult};

/// R × C parameter table stored row-major.
///
/// Row `i` is one complete parameter assignment; its position is the only
/// key linking it to the `i`-th evaluation result. Serialized as a list of
/// rows so the persisted `param_values` stays a plain nested array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Vec<f64>>", into = "Vec<Vec<f64>>")]
pub struct DesignMatrix {
    rows: usize,
    cols: usize,
    values: Vec<f64>,
}

impl DesignMatrix {
    pub fn new(rows: usize, cols: usize, values: Vec<f64>) -> DesignResult<Self> {
        if values.len() != rows * cols {
            return Err(DesignError::LengthMismatch {
                what: "design matrix values".to_string(),
                expected: rows * cols,
                found: values.len(),
            });
        }
        Ok(Self { rows, cols, values })
    }

    pub fn from_rows(rows: Vec<Vec<f64>>) -> DesignResult<Self> {
        let cols = rows.first().map(Vec::len).unwrap_or(0);
        let mut values = Vec::with_capacity(rows.len() * cols);
        for (i, row) in rows.iter().enumerate() {
            if row.len() != cols {
                return Err(DesignError::RaggedRow {
                    row: i,
                    expected: cols,
                    found: row.len(),
                });
            }
            values.extend_from_slice(row);
        }
        Ok(Self {
            rows: rows.len(),
            cols,
            values,
        })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    pub fn row(&self, index: usize) -> &[f64] {
        let start = index * self.cols;
        &self.values[start..start + self.cols]
    }

    pub fn iter_rows(&self) -> impl Iterator<Item = &[f64]> + '_ {
        (0..self.rows).map(move |i| self.row(i))
    }

    pub fn to_rows(&self) -> Vec<Vec<f64>> {
        self.iter_rows().map(<[f64]>::to_vec).collect()
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }
}

impl TryFrom<Vec<Vec<f64>>> for DesignMatrix {
    type Error = DesignError;

    fn try_from(rows: Vec<Vec<f64>>) -> Result<Self, Self::Error> {
        Self::from_rows(rows)
    }
}

impl From<DesignMatrix> for Vec<Vec<f64>> {
    fn from(matrix: DesignMatrix) -> Self {
        matrix.to_rows()
    }
}
