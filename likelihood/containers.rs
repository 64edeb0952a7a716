//! Owned numeric containers shared by every layer of the evaluator.
//!
//! Both types wrap `ndarray` storage and keep plain value semantics: cloning
//! copies the data. Matrices are stored row-major (ndarray standard layout).
//! The only borrowed type handed out is the view returned by
//! [`Matrix::submatrix`].

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, s};
use serde::{Deserialize, Serialize};
use std::ops::Range;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ContainerError {
    #[error("Index {index:?} is out of bounds for a container of shape {shape:?}.")]
    IndexOutOfBounds {
        index: (usize, usize),
        shape: (usize, usize),
    },

    #[error("Cannot {op} containers of shape {left:?} and {right:?}.")]
    ShapeMismatch {
        op: &'static str,
        left: (usize, usize),
        right: (usize, usize),
    },

    #[error("Row {row} has {found} entries, but the first row has {expected}.")]
    RaggedRows {
        row: usize,
        expected: usize,
        found: usize,
    },
}

/// A fixed-length sequence of `f64`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vector {
    data: Array1<f64>,
}

impl Vector {
    pub fn zeros(len: usize) -> Self {
        Self {
            data: Array1::zeros(len),
        }
    }

    pub fn from_slice(values: &[f64]) -> Self {
        Self {
            data: Array1::from(values.to_vec()),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn get(&self, index: usize) -> Result<f64, ContainerError> {
        self.data
            .get(index)
            .copied()
            .ok_or(ContainerError::IndexOutOfBounds {
                index: (index, 0),
                shape: (self.len(), 1),
            })
    }

    pub fn set(&mut self, index: usize, value: f64) -> Result<(), ContainerError> {
        let shape = (self.len(), 1);
        match self.data.get_mut(index) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(ContainerError::IndexOutOfBounds {
                index: (index, 0),
                shape,
            }),
        }
    }

    pub fn add(&self, other: &Vector) -> Result<Vector, ContainerError> {
        self.check_same_len("add", other)?;
        Ok(Vector::from(&self.data + &other.data))
    }

    pub fn sub(&self, other: &Vector) -> Result<Vector, ContainerError> {
        self.check_same_len("subtract", other)?;
        Ok(Vector::from(&self.data - &other.data))
    }

    /// Elementwise (Hadamard) product.
    pub fn mul_elementwise(&self, other: &Vector) -> Result<Vector, ContainerError> {
        self.check_same_len("multiply", other)?;
        Ok(Vector::from(&self.data * &other.data))
    }

    pub fn scale(&self, factor: f64) -> Vector {
        Vector::from(&self.data * factor)
    }

    pub fn dot(&self, other: &Vector) -> Result<f64, ContainerError> {
        self.check_same_len("take the dot product of", other)?;
        Ok(self.data.dot(&other.data))
    }

    /// Euclidean norm.
    pub fn norm(&self) -> f64 {
        self.data.dot(&self.data).sqrt()
    }

    pub fn view(&self) -> ArrayView1<'_, f64> {
        self.data.view()
    }

    pub fn to_vec(&self) -> Vec<f64> {
        self.data.to_vec()
    }

    pub fn into_array(self) -> Array1<f64> {
        self.data
    }

    fn check_same_len(&self, op: &'static str, other: &Vector) -> Result<(), ContainerError> {
        if self.len() != other.len() {
            return Err(ContainerError::ShapeMismatch {
                op,
                left: (self.len(), 1),
                right: (other.len(), 1),
            });
        }
        Ok(())
    }
}

impl From<Vec<f64>> for Vector {
    fn from(values: Vec<f64>) -> Self {
        Self {
            data: Array1::from(values),
        }
    }
}

impl From<Array1<f64>> for Vector {
    fn from(data: Array1<f64>) -> Self {
        // Reversed or strided storage is copied into a contiguous buffer.
        if data.as_slice().is_some() {
            Self { data }
        } else {
            Self {
                data: data.iter().copied().collect(),
            }
        }
    }
}

impl From<ArrayView1<'_, f64>> for Vector {
    fn from(view: ArrayView1<'_, f64>) -> Self {
        Self {
            data: view.iter().copied().collect(),
        }
    }
}

/// A dense row-major `rows x cols` matrix of `f64`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Matrix {
    data: Array2<f64>,
}

impl Matrix {
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            data: Array2::zeros((rows, cols)),
        }
    }

    pub fn identity(n: usize) -> Self {
        Self {
            data: Array2::eye(n),
        }
    }

    /// Builds a matrix from nested rows. An empty slice yields a `0 x 0` matrix.
    pub fn from_rows<R: AsRef<[f64]>>(rows: &[R]) -> Result<Self, ContainerError> {
        let nrows = rows.len();
        let ncols = rows.first().map_or(0, |row| row.as_ref().len());
        let mut flat = Vec::with_capacity(nrows * ncols);
        for (row_idx, row) in rows.iter().enumerate() {
            let row = row.as_ref();
            if row.len() != ncols {
                return Err(ContainerError::RaggedRows {
                    row: row_idx,
                    expected: ncols,
                    found: row.len(),
                });
            }
            flat.extend_from_slice(row);
        }
        Self::from_row_major(nrows, ncols, flat)
    }

    pub fn from_row_major(
        rows: usize,
        cols: usize,
        values: Vec<f64>,
    ) -> Result<Self, ContainerError> {
        let found = values.len();
        Array2::from_shape_vec((rows, cols), values)
            .map(|data| Self { data })
            .map_err(|_| ContainerError::ShapeMismatch {
                op: "reshape",
                left: (rows, cols),
                right: (found, 1),
            })
    }

    /// A single-row matrix, the shape of one observed channel.
    pub fn row_vector(values: &[f64]) -> Self {
        Self {
            data: Array2::from_shape_fn((1, values.len()), |(_, j)| values[j]),
        }
    }

    pub fn nrows(&self) -> usize {
        self.data.nrows()
    }

    pub fn ncols(&self) -> usize {
        self.data.ncols()
    }

    pub fn shape(&self) -> (usize, usize) {
        self.data.dim()
    }

    pub fn is_square(&self) -> bool {
        self.nrows() == self.ncols()
    }

    pub fn get(&self, row: usize, col: usize) -> Result<f64, ContainerError> {
        self.data
            .get((row, col))
            .copied()
            .ok_or(ContainerError::IndexOutOfBounds {
                index: (row, col),
                shape: self.shape(),
            })
    }

    pub fn set(&mut self, row: usize, col: usize, value: f64) -> Result<(), ContainerError> {
        let shape = self.shape();
        match self.data.get_mut((row, col)) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(ContainerError::IndexOutOfBounds {
                index: (row, col),
                shape,
            }),
        }
    }

    pub fn row(&self, row: usize) -> Result<Vector, ContainerError> {
        if row >= self.nrows() {
            return Err(ContainerError::IndexOutOfBounds {
                index: (row, 0),
                shape: self.shape(),
            });
        }
        Ok(Vector::from(self.data.row(row)))
    }

    pub fn add(&self, other: &Matrix) -> Result<Matrix, ContainerError> {
        self.check_same_shape("add", other)?;
        Ok(Matrix::from(&self.data + &other.data))
    }

    pub fn sub(&self, other: &Matrix) -> Result<Matrix, ContainerError> {
        self.check_same_shape("subtract", other)?;
        Ok(Matrix::from(&self.data - &other.data))
    }

    pub fn mul_elementwise(&self, other: &Matrix) -> Result<Matrix, ContainerError> {
        self.check_same_shape("multiply", other)?;
        Ok(Matrix::from(&self.data * &other.data))
    }

    pub fn scale(&self, factor: f64) -> Matrix {
        Matrix::from(&self.data * factor)
    }

    pub fn matvec(&self, vector: &Vector) -> Result<Vector, ContainerError> {
        if self.ncols() != vector.len() {
            return Err(ContainerError::ShapeMismatch {
                op: "multiply",
                left: self.shape(),
                right: (vector.len(), 1),
            });
        }
        Ok(Vector::from(self.data.dot(&vector.view())))
    }

    pub fn matmul(&self, other: &Matrix) -> Result<Matrix, ContainerError> {
        if self.ncols() != other.nrows() {
            return Err(ContainerError::ShapeMismatch {
                op: "multiply",
                left: self.shape(),
                right: other.shape(),
            });
        }
        Ok(Matrix::from(self.data.dot(&other.data)))
    }

    pub fn transpose(&self) -> Matrix {
        Matrix::from(self.data.t().to_owned())
    }

    /// Borrowed view of `rows x cols`; the view aliases this matrix.
    pub fn submatrix(
        &self,
        rows: Range<usize>,
        cols: Range<usize>,
    ) -> Result<ArrayView2<'_, f64>, ContainerError> {
        let (nrows, ncols) = self.shape();
        if rows.start > rows.end || rows.end > nrows || cols.start > cols.end || cols.end > ncols
        {
            return Err(ContainerError::IndexOutOfBounds {
                index: (rows.end, cols.end),
                shape: self.shape(),
            });
        }
        Ok(self.data.slice(s![rows, cols]))
    }

    pub fn trace(&self) -> f64 {
        self.data.diag().sum()
    }

    pub fn view(&self) -> ArrayView2<'_, f64> {
        self.data.view()
    }

    pub fn as_array(&self) -> &Array2<f64> {
        &self.data
    }

    pub fn into_array(self) -> Array2<f64> {
        self.data
    }

    fn check_same_shape(&self, op: &'static str, other: &Matrix) -> Result<(), ContainerError> {
        if self.shape() != other.shape() {
            return Err(ContainerError::ShapeMismatch {
                op,
                left: self.shape(),
                right: other.shape(),
            });
        }
        Ok(())
    }
}

impl From<Array2<f64>> for Matrix {
    fn from(data: Array2<f64>) -> Self {
        if data.is_standard_layout() {
            Self { data }
        } else {
            Self {
                data: data.as_standard_layout().into_owned(),
            }
        }
    }
}

impl From<ArrayView2<'_, f64>> for Matrix {
    fn from(view: ArrayView2<'_, f64>) -> Self {
        Self {
            data: view.as_standard_layout().into_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn vector_reads_back_every_entry() {
        let n = 1000;
        let vector = Vector::from((0..n).map(|i| i as f64).collect::<Vec<_>>());
        for i in 0..n {
            assert_eq!(vector.get(i).unwrap(), i as f64);
        }
    }

    #[test]
    fn out_of_range_access_is_an_error() {
        let mut vector = Vector::zeros(3);
        assert_eq!(
            vector.get(3),
            Err(ContainerError::IndexOutOfBounds {
                index: (3, 0),
                shape: (3, 1)
            })
        );
        assert!(vector.set(7, 1.0).is_err());

        let mut matrix = Matrix::zeros(2, 3);
        assert!(matrix.get(1, 2).is_ok());
        assert!(matches!(
            matrix.get(2, 0),
            Err(ContainerError::IndexOutOfBounds { .. })
        ));
        assert!(matrix.set(0, 3, 1.0).is_err());
    }

    #[test]
    fn clones_do_not_alias() {
        let original = Matrix::from_rows(&[vec![1.0, 2.0], vec![3.0, 4.0]]).unwrap();
        let mut copy = original.clone();
        copy.set(0, 0, 99.0).unwrap();
        assert_eq!(original.get(0, 0).unwrap(), 1.0);
        assert_eq!(copy.get(0, 0).unwrap(), 99.0);
    }

    #[test]
    fn nested_rows_are_row_major() {
        let m = Matrix::from_rows(&[[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]).unwrap();
        assert_eq!(m.shape(), (2, 3));
        assert_eq!(m.get(0, 2).unwrap(), 3.0);
        assert_eq!(m.get(1, 0).unwrap(), 4.0);
        assert_eq!(m.transpose().get(2, 1).unwrap(), 6.0);
    }

    #[test]
    fn ragged_rows_are_rejected() {
        let err = Matrix::from_rows(&[vec![1.0, 2.0], vec![3.0]]).unwrap_err();
        assert_eq!(
            err,
            ContainerError::RaggedRows {
                row: 1,
                expected: 2,
                found: 1
            }
        );
    }

    #[test]
    fn linear_algebra_operations() {
        let a = Matrix::from_rows(&[[2.0, 0.0], [1.0, 3.0]]).unwrap();
        let b = Matrix::identity(2).scale(2.0);
        let v = Vector::from(vec![1.0, -1.0]);

        assert_eq!(a.matvec(&v).unwrap().to_vec(), vec![2.0, -2.0]);
        assert_eq!(a.matmul(&b).unwrap(), a.scale(2.0));
        assert_eq!(a.add(&b).unwrap().get(1, 1).unwrap(), 5.0);
        assert_eq!(a.sub(&b).unwrap().get(0, 0).unwrap(), 0.0);
        assert_abs_diff_eq!(a.trace(), 5.0);
        assert_abs_diff_eq!(v.norm(), 2.0_f64.sqrt());
        assert_abs_diff_eq!(v.dot(&v.scale(3.0)).unwrap(), 6.0);
        assert_eq!(
            v.mul_elementwise(&Vector::from(vec![4.0, 5.0]))
                .unwrap()
                .to_vec(),
            vec![4.0, -5.0]
        );

        assert!(matches!(
            a.matvec(&Vector::zeros(3)),
            Err(ContainerError::ShapeMismatch { .. })
        ));
        assert!(v.add(&Vector::zeros(5)).is_err());
    }

    #[test]
    fn submatrix_is_a_checked_view() {
        let m = Matrix::from_rows(&[[1.0, 2.0, 3.0], [4.0, 5.0, 6.0], [7.0, 8.0, 9.0]]).unwrap();
        let view = m.submatrix(1..3, 0..2).unwrap();
        assert_eq!(view.dim(), (2, 2));
        assert_eq!(view[[1, 1]], 8.0);
        assert!(m.submatrix(0..4, 0..1).is_err());
    }

    #[test]
    fn transposed_arrays_are_stored_row_major() {
        let array = Array2::from_shape_fn((2, 3), |(i, j)| (i * 3 + j) as f64);
        let m = Matrix::from(array.reversed_axes());
        assert!(m.as_array().is_standard_layout());
        assert_eq!(m.get(2, 1).unwrap(), 5.0);
    }
}
