//! Parameter-shape convention and the packed parameter container.
//!
//! Every model declares how its parameters map onto a vector plus up to two
//! matrices ([`ParamShape`]); [`Params`] holds the concrete values and
//! supports an invertible, order-preserving `pack`/`unpack` into a flat
//! vector (vector first, then each matrix row-major). Composition and
//! offset arithmetic rely on this mapping without inspecting model
//! internals.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Declared dimensionality of a model's parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ParamShape {
    /// Length of the parameter vector.
    pub vector: usize,
    /// Dimensions (rows, cols) of the first parameter matrix, if any.
    pub matrix: Option<(usize, usize)>,
    /// Dimensions of the second parameter matrix, if any.
    pub matrix2: Option<(usize, usize)>,
}

impl ParamShape {
    /// A vector-only shape.
    pub fn vector(n: usize) -> Self {
        Self { vector: n, matrix: None, matrix2: None }
    }

    /// Total number of scalars in the packed representation.
    pub fn packed_len(&self) -> usize {
        self.vector
            + self.matrix.map_or(0, |(r, c)| r * c)
            + self.matrix2.map_or(0, |(r, c)| r * c)
    }
}

/// Concrete parameter values for one model.
///
/// A freshly allocated instance is NaN-filled ("unset"); estimation fills
/// it in. [`Params::is_set`] distinguishes a template from a fitted model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Params {
    /// The parameter vector.
    pub vector: DVector<f64>,
    /// First parameter matrix, if the shape declares one.
    pub matrix: Option<DMatrix<f64>>,
    /// Second parameter matrix, if the shape declares one.
    pub matrix2: Option<DMatrix<f64>>,
}

impl Params {
    /// Allocate an unset (NaN-filled) parameter block for `shape`.
    pub fn nan(shape: &ParamShape) -> Self {
        Self {
            vector: DVector::from_element(shape.vector, f64::NAN),
            matrix: shape.matrix.map(|(r, c)| DMatrix::from_element(r, c, f64::NAN)),
            matrix2: shape.matrix2.map(|(r, c)| DMatrix::from_element(r, c, f64::NAN)),
        }
    }

    /// A vector-only parameter block.
    pub fn from_vector(values: Vec<f64>) -> Self {
        Self { vector: DVector::from_vec(values), matrix: None, matrix2: None }
    }

    /// The shape this block occupies.
    pub fn shape(&self) -> ParamShape {
        ParamShape {
            vector: self.vector.len(),
            matrix: self.matrix.as_ref().map(|m| (m.nrows(), m.ncols())),
            matrix2: self.matrix2.as_ref().map(|m| (m.nrows(), m.ncols())),
        }
    }

    /// Total number of scalars in the packed representation.
    pub fn packed_len(&self) -> usize {
        self.shape().packed_len()
    }

    /// True once every entry has been filled in (no NaN remains).
    pub fn is_set(&self) -> bool {
        self.vector.iter().all(|v| !v.is_nan())
            && self.matrix.as_ref().map_or(true, |m| m.iter().all(|v| !v.is_nan()))
            && self.matrix2.as_ref().map_or(true, |m| m.iter().all(|v| !v.is_nan()))
    }

    /// Pack into a flat vector: vector entries first, then each matrix in
    /// row-major order.
    pub fn pack(&self) -> DVector<f64> {
        let mut out = Vec::with_capacity(self.packed_len());
        out.extend(self.vector.iter().copied());
        for m in [&self.matrix, &self.matrix2].into_iter().flatten() {
            for i in 0..m.nrows() {
                for j in 0..m.ncols() {
                    out.push(m[(i, j)]);
                }
            }
        }
        DVector::from_vec(out)
    }

    /// Unpack a flat vector produced by [`Params::pack`] back into this
    /// block. Fails if the packed length does not match the shape.
    pub fn unpack(&mut self, packed: &DVector<f64>) -> Result<()> {
        if packed.len() != self.packed_len() {
            return Err(Error::Structural(format!(
                "packed parameter length mismatch: expected {}, got {}",
                self.packed_len(),
                packed.len()
            )));
        }
        let mut k = 0;
        for i in 0..self.vector.len() {
            self.vector[i] = packed[k];
            k += 1;
        }
        for m in [&mut self.matrix, &mut self.matrix2].into_iter().flatten() {
            for i in 0..m.nrows() {
                for j in 0..m.ncols() {
                    m[(i, j)] = packed[k];
                    k += 1;
                }
            }
        }
        Ok(())
    }
}
