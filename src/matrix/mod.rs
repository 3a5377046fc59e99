//! Dense row-major `f32` matrices.
//!
//! Every vector the network touches (inputs, activations, errors) is an
//! `(n, 1)` column matrix, so forward and backward passes are plain matrix
//! arithmetic. Binary elementwise operations and the dot product validate
//! shapes and return [`MatrixError`]; scalar forms cannot fail and are exposed
//! as operators.

pub mod kernel;

use std::fmt;
use std::ops::{Add, Mul, Sub};

use thiserror::Error;

pub use kernel::{CpuKernel, DotKernel, KernelSet, DEFAULT_OFFLOAD_THRESHOLD};

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum MatrixError {
    #[error("{op}: incompatible shapes {left:?} and {right:?}")]
    DimensionMismatch {
        op: &'static str,
        left: (usize, usize),
        right: (usize, usize),
    },
    #[error("index ({row}, {col}) out of range for {rows}x{cols} matrix")]
    OutOfRange {
        row: usize,
        col: usize,
        rows: usize,
        cols: usize,
    },
    #[error("expected a column matrix, got {rows}x{cols}")]
    ShapeMismatch { rows: usize, cols: usize },
}

#[derive(Clone, Debug, PartialEq)]
pub struct Matrix {
    rows: usize,
    cols: usize,
    data: Vec<f32>,
}

impl Matrix {
    /// Zero-filled `rows x cols` matrix.
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![0.0; rows * cols],
        }
    }

    /// Column matrix `(values.len(), 1)`.
    pub fn from_column(values: &[f32]) -> Self {
        Self {
            rows: values.len(),
            cols: 1,
            data: values.to_vec(),
        }
    }

    /// Build from row-major cells. Fails if `data.len() != rows * cols`.
    pub fn from_row_major(rows: usize, cols: usize, data: Vec<f32>) -> Result<Self, MatrixError> {
        if data.len() != rows * cols {
            return Err(MatrixError::DimensionMismatch {
                op: "from_row_major",
                left: (rows, cols),
                right: (data.len(), 1),
            });
        }
        Ok(Self { rows, cols, data })
    }

    /// Build from nested rows; every row must have the same length.
    pub fn from_rows(rows: &[&[f32]]) -> Result<Self, MatrixError> {
        let cols = rows.first().map_or(0, |r| r.len());
        let mut data = Vec::with_capacity(rows.len() * cols);
        for row in rows {
            if row.len() != cols {
                return Err(MatrixError::DimensionMismatch {
                    op: "from_rows",
                    left: (rows.len(), cols),
                    right: (1, row.len()),
                });
            }
            data.extend_from_slice(row);
        }
        Ok(Self {
            rows: rows.len(),
            cols,
            data,
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

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Row-major view of every cell.
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub(crate) fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.data
    }

    fn offset(&self, row: usize, col: usize) -> Result<usize, MatrixError> {
        if row >= self.rows || col >= self.cols {
            return Err(MatrixError::OutOfRange {
                row,
                col,
                rows: self.rows,
                cols: self.cols,
            });
        }
        Ok(row * self.cols + col)
    }

    pub fn get(&self, row: usize, col: usize) -> Result<f32, MatrixError> {
        self.offset(row, col).map(|i| self.data[i])
    }

    pub fn set(&mut self, row: usize, col: usize, value: f32) -> Result<(), MatrixError> {
        let i = self.offset(row, col)?;
        self.data[i] = value;
        Ok(())
    }

    fn check_same_shape(&self, other: &Matrix, op: &'static str) -> Result<(), MatrixError> {
        if self.shape() != other.shape() {
            return Err(MatrixError::DimensionMismatch {
                op,
                left: self.shape(),
                right: other.shape(),
            });
        }
        Ok(())
    }

    /// New matrix with `f` applied to every cell.
    pub fn map(&self, f: impl Fn(f32) -> f32) -> Matrix {
        Matrix {
            rows: self.rows,
            cols: self.cols,
            data: self.data.iter().map(|&v| f(v)).collect(),
        }
    }

    /// Elementwise product.
    pub fn hadamard(&self, other: &Matrix) -> Result<Matrix, MatrixError> {
        self.check_same_shape(other, "hadamard")?;
        Ok(Matrix {
            rows: self.rows,
            cols: self.cols,
            data: self
                .data
                .iter()
                .zip(&other.data)
                .map(|(a, b)| a * b)
                .collect(),
        })
    }

    /// Elementwise sum.
    pub fn add_elementwise(&self, other: &Matrix) -> Result<Matrix, MatrixError> {
        self.check_same_shape(other, "add")?;
        Ok(Matrix {
            rows: self.rows,
            cols: self.cols,
            data: self
                .data
                .iter()
                .zip(&other.data)
                .map(|(a, b)| a + b)
                .collect(),
        })
    }

    /// In-place elementwise sum, `self += other`.
    pub fn add_assign_elementwise(&mut self, other: &Matrix) -> Result<(), MatrixError> {
        self.check_same_shape(other, "add_assign")?;
        for (a, b) in self.data.iter_mut().zip(&other.data) {
            *a += b;
        }
        Ok(())
    }

    pub fn transpose(&self) -> Matrix {
        let mut out = Matrix::new(self.cols, self.rows);
        for r in 0..self.rows {
            for c in 0..self.cols {
                out.data[c * self.rows + r] = self.data[r * self.cols + c];
            }
        }
        out
    }

    /// Matrix product using the CPU reference kernel.
    pub fn dot(&self, other: &Matrix) -> Result<Matrix, MatrixError> {
        CpuKernel.dot(self, other)
    }

    /// Flatten a column matrix into its values.
    pub fn to_vec(&self) -> Result<Vec<f32>, MatrixError> {
        if self.cols != 1 {
            return Err(MatrixError::ShapeMismatch {
                rows: self.rows,
                cols: self.cols,
            });
        }
        Ok(self.data.clone())
    }

    /// In place: every cell becomes `value - cell`.
    pub fn subtract_all_values_from(&mut self, value: f32) {
        for cell in &mut self.data {
            *cell = value - *cell;
        }
    }
}

impl fmt::Display for Matrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for row in self.data.chunks(self.cols.max(1)).take(self.rows) {
            let cells: Vec<String> = row.iter().map(|v| v.to_string()).collect();
            writeln!(f, "{}", cells.join("   "))?;
        }
        Ok(())
    }
}

impl Mul<f32> for &Matrix {
    type Output = Matrix;

    fn mul(self, value: f32) -> Matrix {
        self.map(|v| v * value)
    }
}

impl Mul<f32> for Matrix {
    type Output = Matrix;

    fn mul(mut self, value: f32) -> Matrix {
        for cell in &mut self.data {
            *cell *= value;
        }
        self
    }
}

impl Mul<&Matrix> for f32 {
    type Output = Matrix;

    fn mul(self, matrix: &Matrix) -> Matrix {
        matrix * self
    }
}

impl Add<f32> for &Matrix {
    type Output = Matrix;

    fn add(self, value: f32) -> Matrix {
        self.map(|v| v + value)
    }
}

/// `value - matrix`, cell by cell.
impl Sub<&Matrix> for f32 {
    type Output = Matrix;

    fn sub(self, matrix: &Matrix) -> Matrix {
        matrix.map(|v| self - v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn m(rows: &[&[f32]]) -> Matrix {
        Matrix::from_rows(rows).unwrap()
    }

    #[test]
    fn new_is_zero_filled() {
        let a = Matrix::new(2, 3);
        assert_eq!(a.shape(), (2, 3));
        assert!(a.as_slice().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn column_from_vector() {
        let a = Matrix::from_column(&[1.0, 2.0, 3.0]);
        assert_eq!(a.shape(), (3, 1));
        assert_eq!(a.get(2, 0).unwrap(), 3.0);
        assert_eq!(a.to_vec().unwrap(), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn get_set_bounds_checked() {
        let mut a = Matrix::new(2, 2);
        a.set(1, 1, 5.0).unwrap();
        assert_eq!(a.get(1, 1).unwrap(), 5.0);
        assert_eq!(
            a.get(2, 0),
            Err(MatrixError::OutOfRange {
                row: 2,
                col: 0,
                rows: 2,
                cols: 2
            })
        );
        assert!(a.set(0, 2, 1.0).is_err());
    }

    #[test]
    fn from_row_major_checks_length() {
        assert!(Matrix::from_row_major(2, 2, vec![1.0; 3]).is_err());
        let a = Matrix::from_row_major(1, 3, vec![1.0, 2.0, 3.0]).unwrap();
        assert_eq!(a.get(0, 2).unwrap(), 3.0);
    }

    #[test]
    fn dot_two_by_two() {
        let a = m(&[&[1.0, 2.0], &[3.0, 4.0]]);
        let b = m(&[&[5.0, 6.0], &[7.0, 8.0]]);
        let c = a.dot(&b).unwrap();
        assert_eq!(c, m(&[&[19.0, 22.0], &[43.0, 50.0]]));
    }

    #[test]
    fn dot_matrix_vector() {
        let a = m(&[&[0.9, 0.3, 0.4], &[0.2, 0.8, 0.2], &[0.1, 0.5, 0.6]]);
        let x = Matrix::from_column(&[0.9, 0.1, 0.8]);
        let y = a.dot(&x).unwrap().to_vec().unwrap();
        let rounded: Vec<f32> = y.iter().map(|v| (v * 100.0).round() / 100.0).collect();
        assert_eq!(rounded, vec![1.16, 0.42, 0.62]);
    }

    #[test]
    fn dot_rejects_inner_mismatch() {
        for (a, b) in [((2, 3), (2, 3)), ((1, 4), (3, 1)), ((5, 2), (1, 5))] {
            let err = Matrix::new(a.0, a.1).dot(&Matrix::new(b.0, b.1)).unwrap_err();
            assert!(matches!(err, MatrixError::DimensionMismatch { op: "dot", .. }));
        }
    }

    #[test]
    fn transpose_twice_is_identity() {
        let a = m(&[&[1.0, 2.0, 3.0], &[4.0, 5.0, 6.0]]);
        let t = a.transpose();
        assert_eq!(t.shape(), (3, 2));
        assert_eq!(t.get(2, 1).unwrap(), 6.0);
        assert_eq!(t.transpose(), a);
    }

    #[test]
    fn elementwise_ops_check_shape() {
        let a = m(&[&[1.0, 2.0], &[3.0, 4.0]]);
        let b = m(&[&[2.0, 2.0], &[0.5, 1.0]]);
        assert_eq!(a.hadamard(&b).unwrap(), m(&[&[2.0, 4.0], &[1.5, 4.0]]));
        assert_eq!(a.add_elementwise(&b).unwrap(), m(&[&[3.0, 4.0], &[3.5, 5.0]]));
        assert!(a.hadamard(&Matrix::new(2, 1)).is_err());
        assert!(a.add_elementwise(&Matrix::new(1, 2)).is_err());
    }

    #[test]
    fn scalar_ops() {
        let a = m(&[&[1.0, 2.0]]);
        assert_eq!(&a * 2.0, m(&[&[2.0, 4.0]]));
        assert_eq!(3.0 * &a, m(&[&[3.0, 6.0]]));
        assert_eq!(&a + 1.0, m(&[&[2.0, 3.0]]));
        assert_eq!(1.0 - &a, m(&[&[0.0, -1.0]]));
    }

    #[test]
    fn subtract_all_values_from_in_place() {
        let mut a = m(&[&[0.25, 1.0]]);
        a.subtract_all_values_from(1.0);
        assert_eq!(a, m(&[&[0.75, 0.0]]));
    }

    #[test]
    fn to_vec_requires_single_column() {
        assert_eq!(
            Matrix::new(2, 2).to_vec(),
            Err(MatrixError::ShapeMismatch { rows: 2, cols: 2 })
        );
    }

    #[test]
    fn display_one_row_per_line() {
        let a = m(&[&[1.0, 2.0], &[3.0, 4.0]]);
        assert_eq!(a.to_string(), "1   2\n3   4\n");
    }
}
