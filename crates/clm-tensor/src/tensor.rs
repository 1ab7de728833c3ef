// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use crate::error::{TensorError, TensorResult};
use rand::distributions::{Distribution, Uniform};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

/// A dense row-major `f64` matrix. Column vectors are `d x 1` tensors.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Tensor {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

impl Default for Tensor {
    fn default() -> Self {
        Self {
            rows: 0,
            cols: 0,
            data: Vec::new(),
        }
    }
}

impl Tensor {
    /// Creates a tensor filled with zeros.
    pub fn zeros(rows: usize, cols: usize) -> TensorResult<Self> {
        if rows == 0 || cols == 0 {
            return Err(TensorError::InvalidDimensions { rows, cols });
        }
        Ok(Self {
            rows,
            cols,
            data: vec![0.0; rows * cols],
        })
    }

    /// Creates a tensor from row-major data.
    pub fn from_vec(rows: usize, cols: usize, data: Vec<f64>) -> TensorResult<Self> {
        if rows == 0 || cols == 0 {
            return Err(TensorError::InvalidDimensions { rows, cols });
        }
        if data.len() != rows * cols {
            return Err(TensorError::DataLength {
                expected: rows * cols,
                got: data.len(),
            });
        }
        Ok(Self { rows, cols, data })
    }

    /// Creates a tensor by evaluating `f` at every `(row, col)` position.
    pub fn from_fn<F>(rows: usize, cols: usize, mut f: F) -> TensorResult<Self>
    where
        F: FnMut(usize, usize) -> f64,
    {
        let mut out = Self::zeros(rows, cols)?;
        for r in 0..rows {
            for c in 0..cols {
                out.data[r * cols + c] = f(r, c);
            }
        }
        Ok(out)
    }

    /// Creates a column vector from the provided entries.
    pub fn column_vector(data: Vec<f64>) -> TensorResult<Self> {
        let rows = data.len();
        Self::from_vec(rows, 1, data)
    }

    /// Identity matrix of the given order.
    pub fn eye(order: usize) -> TensorResult<Self> {
        Self::from_fn(order, order, |r, c| if r == c { 1.0 } else { 0.0 })
    }

    /// Uniformly random tensor in `[low, high)` from an explicit seed.
    pub fn random_uniform(
        rows: usize,
        cols: usize,
        low: f64,
        high: f64,
        seed: u64,
    ) -> TensorResult<Self> {
        if rows == 0 || cols == 0 {
            return Err(TensorError::InvalidDimensions { rows, cols });
        }
        let mut rng = StdRng::seed_from_u64(seed);
        let dist = Uniform::new(low, high);
        let data = (0..rows * cols).map(|_| dist.sample(&mut rng)).collect();
        Ok(Self { rows, cols, data })
    }

    /// Normally distributed random tensor (`mean + std * N(0, 1)`) from
    /// an explicit seed.
    pub fn random_normal(
        rows: usize,
        cols: usize,
        mean: f64,
        std: f64,
        seed: u64,
    ) -> TensorResult<Self> {
        if rows == 0 || cols == 0 {
            return Err(TensorError::InvalidDimensions { rows, cols });
        }
        let mut rng = StdRng::seed_from_u64(seed);
        let data = (0..rows * cols)
            .map(|_| {
                let sample: f64 = StandardNormal.sample(&mut rng);
                mean + std * sample
            })
            .collect();
        Ok(Self { rows, cols, data })
    }

    /// Returns `(rows, cols)`.
    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Total number of elements.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Immutable view of the row-major storage.
    pub fn data(&self) -> &[f64] {
        &self.data
    }

    /// Mutable view of the row-major storage.
    pub fn data_mut(&mut self) -> &mut [f64] {
        &mut self.data
    }

    pub fn get(&self, row: usize, col: usize) -> f64 {
        debug_assert!(row < self.rows && col < self.cols);
        self.data[row * self.cols + col]
    }

    pub fn set(&mut self, row: usize, col: usize, value: f64) {
        debug_assert!(row < self.rows && col < self.cols);
        self.data[row * self.cols + col] = value;
    }

    /// Checks that the tensor is a `d x 1` column vector.
    pub fn expect_column(&self, dim: usize) -> TensorResult<()> {
        if self.rows != dim || self.cols != 1 {
            return Err(TensorError::NotAColumnVector {
                expected: dim,
                got: self.shape(),
            });
        }
        Ok(())
    }

    fn assert_same_shape(&self, other: &Tensor) -> TensorResult<()> {
        if self.shape() != other.shape() {
            return Err(TensorError::ShapeMismatch {
                left: self.shape(),
                right: other.shape(),
            });
        }
        Ok(())
    }

    /// Elementwise sum.
    pub fn add(&self, other: &Tensor) -> TensorResult<Tensor> {
        self.assert_same_shape(other)?;
        let data = self
            .data
            .iter()
            .zip(other.data.iter())
            .map(|(a, b)| a + b)
            .collect();
        Ok(Self {
            rows: self.rows,
            cols: self.cols,
            data,
        })
    }

    /// Elementwise difference.
    pub fn sub(&self, other: &Tensor) -> TensorResult<Tensor> {
        self.assert_same_shape(other)?;
        let data = self
            .data
            .iter()
            .zip(other.data.iter())
            .map(|(a, b)| a - b)
            .collect();
        Ok(Self {
            rows: self.rows,
            cols: self.cols,
            data,
        })
    }

    /// Returns `self * value`.
    pub fn scale(&self, value: f64) -> TensorResult<Tensor> {
        let data = self.data.iter().map(|a| a * value).collect();
        Ok(Self {
            rows: self.rows,
            cols: self.cols,
            data,
        })
    }

    /// Scales every element in place.
    pub fn scale_inplace(&mut self, value: f64) {
        for entry in &mut self.data {
            *entry *= value;
        }
    }

    /// Elementwise product.
    pub fn hadamard(&self, other: &Tensor) -> TensorResult<Tensor> {
        self.assert_same_shape(other)?;
        let data = self
            .data
            .iter()
            .zip(other.data.iter())
            .map(|(a, b)| a * b)
            .collect();
        Ok(Self {
            rows: self.rows,
            cols: self.cols,
            data,
        })
    }

    /// In-place `self += other * scale`.
    pub fn add_scaled(&mut self, other: &Tensor, scale: f64) -> TensorResult<()> {
        self.assert_same_shape(other)?;
        for (dst, src) in self.data.iter_mut().zip(other.data.iter()) {
            *dst += src * scale;
        }
        Ok(())
    }

    /// Matrix product `self @ other`.
    pub fn matmul(&self, other: &Tensor) -> TensorResult<Tensor> {
        if self.cols != other.rows {
            return Err(TensorError::ShapeMismatch {
                left: self.shape(),
                right: other.shape(),
            });
        }
        let mut out = Tensor::zeros(self.rows, other.cols)?;
        for r in 0..self.rows {
            for k in 0..self.cols {
                let lhs = self.data[r * self.cols + k];
                if lhs == 0.0 {
                    continue;
                }
                let row = &other.data[k * other.cols..(k + 1) * other.cols];
                let dst = &mut out.data[r * other.cols..(r + 1) * other.cols];
                for (d, s) in dst.iter_mut().zip(row.iter()) {
                    *d += lhs * s;
                }
            }
        }
        Ok(out)
    }

    /// Transposed copy.
    pub fn transpose(&self) -> Tensor {
        let mut data = vec![0.0; self.data.len()];
        for r in 0..self.rows {
            for c in 0..self.cols {
                data[c * self.rows + r] = self.data[r * self.cols + c];
            }
        }
        Self {
            rows: self.cols,
            cols: self.rows,
            data,
        }
    }

    /// Stacks tensors vertically; every input must share a column count.
    pub fn cat_rows(tensors: &[&Tensor]) -> TensorResult<Tensor> {
        let cols = match tensors.first() {
            Some(t) => t.cols,
            None => return Err(TensorError::InvalidDimensions { rows: 0, cols: 0 }),
        };
        let mut rows = 0;
        for t in tensors {
            if t.cols != cols {
                return Err(TensorError::ShapeMismatch {
                    left: (rows, cols),
                    right: t.shape(),
                });
            }
            rows += t.rows;
        }
        let mut data = Vec::with_capacity(rows * cols);
        for t in tensors {
            data.extend_from_slice(&t.data);
        }
        Ok(Self { rows, cols, data })
    }

    /// Inner product of two column vectors.
    pub fn dot(&self, other: &Tensor) -> TensorResult<f64> {
        self.assert_same_shape(other)?;
        Ok(self
            .data
            .iter()
            .zip(other.data.iter())
            .map(|(a, b)| a * b)
            .sum())
    }

    /// Extracts one column as a `rows x 1` tensor.
    pub fn column(&self, index: usize) -> TensorResult<Tensor> {
        if index >= self.cols {
            return Err(TensorError::ColumnOutOfRange {
                index,
                cols: self.cols,
            });
        }
        let data = (0..self.rows)
            .map(|r| self.data[r * self.cols + index])
            .collect();
        Ok(Self {
            rows: self.rows,
            cols: 1,
            data,
        })
    }

    /// Writes a column vector into column `index`.
    pub fn set_column(&mut self, index: usize, column: &Tensor) -> TensorResult<()> {
        if index >= self.cols {
            return Err(TensorError::ColumnOutOfRange {
                index,
                cols: self.cols,
            });
        }
        column.expect_column(self.rows)?;
        for r in 0..self.rows {
            self.data[r * self.cols + index] = column.data[r];
        }
        Ok(())
    }

    /// Scales row `r` of the matrix by `factors[r]`; `factors` is a
    /// column vector with one entry per row.
    pub fn scale_rows(&self, factors: &Tensor) -> TensorResult<Tensor> {
        factors.expect_column(self.rows)?;
        let mut out = self.clone();
        for r in 0..self.rows {
            let f = factors.data[r];
            for c in 0..self.cols {
                out.data[r * self.cols + c] *= f;
            }
        }
        Ok(out)
    }

    /// Sum of squared entries.
    pub fn squared_l2_norm(&self) -> f64 {
        self.data.iter().map(|v| v * v).sum()
    }

    /// Largest absolute entry, 0.0 for an empty tensor.
    pub fn max_abs(&self) -> f64 {
        self.data.iter().fold(0.0_f64, |acc, v| acc.max(v.abs()))
    }

    /// True when any entry is NaN or infinite.
    pub fn has_non_finite(&self) -> bool {
        self.data.iter().any(|v| !v.is_finite())
    }

    /// Overwrites every entry with `value`.
    pub fn fill(&mut self, value: f64) {
        for entry in &mut self.data {
            *entry = value;
        }
    }

    /// Clamps every entry to `[-bound, bound]`.
    pub fn clamp_abs(&mut self, bound: f64) {
        for entry in &mut self.data {
            *entry = entry.clamp(-bound, bound);
        }
    }
}
