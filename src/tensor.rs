use std::ops::{Deref, DerefMut, Index, IndexMut};

use crate::{Float, GenieError, Result};

/// Dense row-major tensor. Most of the crate works on 2D `(rows, cols)`
/// tensors where a row is one batch item.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    data: Vec<Float>,
    // from outer to inner: ..., row, col
    layout: Vec<usize>,
}

impl Deref for Tensor {
    type Target = [Float];

    fn deref(&self) -> &Self::Target {
        &self.data
    }
}

impl DerefMut for Tensor {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.data
    }
}

impl Index<usize> for Tensor {
    type Output = [Float];

    fn index(&self, index: usize) -> &Self::Output {
        let cols = self.cols();
        debug_assert!(index < self.rows());
        &self.data[index * cols..(index + 1) * cols]
    }
}

impl IndexMut<usize> for Tensor {
    fn index_mut(&mut self, index: usize) -> &mut Self::Output {
        let cols = self.cols();
        debug_assert!(index < self.rows());
        &mut self.data[index * cols..(index + 1) * cols]
    }
}

impl Tensor {
    pub fn zeros(layout: &[usize]) -> Self {
        Self {
            data: vec![0 as Float; layout.iter().product()],
            layout: layout.to_vec(),
        }
    }

    pub fn from_vec(data: Vec<Float>, layout: &[usize]) -> Result<Self> {
        let expected: usize = layout.iter().product();
        if expected != data.len() {
            return Err(GenieError::ShapeMismatch {
                expected: layout.to_vec(),
                got: vec![data.len()],
            });
        }
        Ok(Self {
            data,
            layout: layout.to_vec(),
        })
    }

    /// Builds a `(rows.len(), cols)` tensor from equally sized rows.
    pub fn from_rows<'a, I>(rows: I, cols: usize) -> Self
    where
        I: IntoIterator<Item = &'a [Float]>,
    {
        let mut data = Vec::new();
        let mut n = 0;
        for row in rows {
            debug_assert_eq!(row.len(), cols);
            data.extend_from_slice(row);
            n += 1;
        }
        Self {
            data,
            layout: vec![n, cols],
        }
    }

    pub fn layout(&self) -> &[usize] {
        &self.layout
    }

    pub fn rows(&self) -> usize {
        match self.layout.len() {
            0 => 1,
            1 => 1,
            n => self.layout[..n - 1].iter().product(),
        }
    }

    pub fn cols(&self) -> usize {
        self.layout.last().copied().unwrap_or(1)
    }

    /// X(b, n) * W(n, d) -> out(b, d)
    pub fn matmul(&self, w: &Tensor) -> Result<Tensor> {
        let (b, n) = (self.rows(), self.cols());
        if w.layout.len() != 2 || w.layout[0] != n {
            return Err(GenieError::ShapeMismatch {
                expected: vec![n, w.cols()],
                got: w.layout.clone(),
            });
        }
        let d = w.cols();

        let mut out = Tensor::zeros(&[b, d]);
        for (x, o) in self.data.chunks_exact(n).zip(out.data.chunks_exact_mut(d)) {
            for (&xv, w_row) in x.iter().zip(w.data.chunks_exact(d)) {
                if xv == 0 as Float {
                    continue;
                }
                o.iter_mut()
                    .zip(w_row.iter())
                    .for_each(|(o, &w)| *o += xv * w);
            }
        }
        Ok(out)
    }

    /// Adds `bias` (cols,) to every row.
    pub fn add_bias(&mut self, bias: &[Float]) -> Result<()> {
        let cols = self.cols();
        if bias.len() != cols {
            return Err(GenieError::ShapeMismatch {
                expected: vec![cols],
                got: vec![bias.len()],
            });
        }
        for row in self.data.chunks_exact_mut(cols) {
            row.iter_mut().zip(bias.iter()).for_each(|(v, b)| *v += b);
        }
        Ok(())
    }

    /// Concatenates 2D tensors with the same row count along columns.
    pub fn concat_cols(parts: &[&Tensor]) -> Result<Tensor> {
        let rows = parts.first().map(|t| t.rows()).unwrap_or(0);
        if let Some(bad) = parts.iter().find(|t| t.rows() != rows) {
            return Err(GenieError::ShapeMismatch {
                expected: vec![rows],
                got: vec![bad.rows()],
            });
        }
        let cols: usize = parts.iter().map(|t| t.cols()).sum();
        let mut data = Vec::with_capacity(rows * cols);
        for r in 0..rows {
            for part in parts {
                data.extend_from_slice(&part[r]);
            }
        }
        Ok(Tensor {
            data,
            layout: vec![rows, cols],
        })
    }

    /// (rows, cols) tensor whose every row is a copy of `self[item]`.
    pub fn broadcast_row(&self, item: usize, rows: usize) -> Result<Tensor> {
        if item >= self.rows() {
            return Err(GenieError::IndexOutOfRange {
                index: item,
                len: self.rows(),
            });
        }
        let row = &self[item];
        Ok(Tensor::from_rows(std::iter::repeat(row).take(rows), self.cols()))
    }

    /// Transposed copy of a 2D tensor.
    pub fn transpose(&self) -> Tensor {
        let (rows, cols) = (self.rows(), self.cols());
        let mut out = Tensor::zeros(&[cols, rows]);
        for r in 0..rows {
            for c in 0..cols {
                out.data[c * rows + r] = self.data[r * cols + c];
            }
        }
        out
    }
}
