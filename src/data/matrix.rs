//! Dense feature matrix with missing-value handling.
//!
//! Values are stored row-major as `f32`. Cells equal to the caller's missing
//! sentinel are normalised to NaN at construction, so the rest of the crate
//! only has to test `is_nan()`.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::common::error::{BoostError, BoostResult};

static NEXT_MATRIX_ID: AtomicU64 = AtomicU64::new(1);

/// Named per-row float fields that can be attached to a matrix.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FloatInfo {
    Label,
    Weight,
}

impl FloatInfo {
    pub fn parse(field: &str) -> BoostResult<Self> {
        match field {
            "label" => Ok(FloatInfo::Label),
            "weight" => Ok(FloatInfo::Weight),
            other => Err(BoostError::invalid(format!("unknown float info field `{other}`"))),
        }
    }
}

/// In-memory tabular representation of feature rows.
#[derive(Clone, Debug)]
pub struct DMatrix {
    id: u64,
    rows: usize,
    cols: usize,
    values: Vec<f32>,
    labels: Option<Vec<f32>>,
    weights: Option<Vec<f32>>,
}

impl DMatrix {
    /// Build a matrix from row-major data.
    ///
    /// Every cell equal to `missing` is treated as absent. NaN is always absent.
    pub fn from_dense(data: &[f32], rows: usize, cols: usize, missing: f32) -> BoostResult<Self> {
        if cols == 0 {
            return Err(BoostError::invalid("matrix must have at least one column"));
        }
        let expected = rows
            .checked_mul(cols)
            .ok_or_else(|| BoostError::invalid("matrix dimensions overflow"))?;
        if data.len() != expected {
            return Err(BoostError::invalid(format!(
                "expected {rows}x{cols}={expected} values, got {}",
                data.len()
            )));
        }

        let values = data
            .iter()
            .map(|&v| if is_missing(v, missing) { f32::NAN } else { v })
            .collect();

        Ok(Self {
            id: NEXT_MATRIX_ID.fetch_add(1, Ordering::Relaxed),
            rows,
            cols,
            values,
            labels: None,
            weights: None,
        })
    }

    /// Build a matrix from individual rows, all of which must share a length.
    pub fn from_rows<R: AsRef<[f32]>>(rows: &[R], missing: f32) -> BoostResult<Self> {
        let cols = rows.first().map(|r| r.as_ref().len()).unwrap_or(0);
        if rows.is_empty() {
            return Err(BoostError::invalid("at least one row is required"));
        }

        let mut data = Vec::with_capacity(rows.len() * cols);
        for (idx, row) in rows.iter().enumerate() {
            let row = row.as_ref();
            if row.len() != cols {
                return Err(BoostError::invalid(format!(
                    "row {idx} has {} columns, expected {cols}",
                    row.len()
                )));
            }
            data.extend_from_slice(row);
        }

        Self::from_dense(&data, rows.len(), cols, missing)
    }

    /// Identity used by boosters to cache intermediate predictions.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn num_row(&self) -> usize {
        self.rows
    }

    pub fn num_col(&self) -> usize {
        self.cols
    }

    /// Borrow a single row. Missing cells are NaN.
    pub fn row(&self, idx: usize) -> &[f32] {
        let start = idx * self.cols;
        &self.values[start..start + self.cols]
    }

    /// Single cell lookup. Missing cells are NaN.
    pub fn get(&self, row: usize, col: usize) -> f32 {
        self.values[row * self.cols + col]
    }

    /// Attach a per-row float field such as `label` or `weight`.
    pub fn set_float_info(&mut self, field: &str, values: &[f32]) -> BoostResult<()> {
        let info = FloatInfo::parse(field)?;
        if values.len() != self.rows {
            return Err(BoostError::invalid(format!(
                "{field} has {} entries but the matrix has {} rows",
                values.len(),
                self.rows
            )));
        }
        if values.iter().any(|v| !v.is_finite()) {
            return Err(BoostError::invalid(format!("{field} contains non-finite values")));
        }

        match info {
            FloatInfo::Label => self.labels = Some(values.to_vec()),
            FloatInfo::Weight => self.weights = Some(values.to_vec()),
        }
        Ok(())
    }

    /// Read back a float field; empty when it was never set.
    pub fn get_float_info(&self, field: &str) -> BoostResult<&[f32]> {
        let slot = match FloatInfo::parse(field)? {
            FloatInfo::Label => &self.labels,
            FloatInfo::Weight => &self.weights,
        };
        Ok(slot.as_deref().unwrap_or(&[]))
    }

    pub(crate) fn labels(&self) -> Option<&[f32]> {
        self.labels.as_deref()
    }

    pub(crate) fn weights(&self) -> Option<&[f32]> {
        self.weights.as_deref()
    }
}

fn is_missing(value: f32, missing: f32) -> bool {
    value.is_nan() || (!missing.is_nan() && value == missing)
}
