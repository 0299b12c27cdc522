//! Scalar density and mass-function kernels.
//!
//! These are the bare numeric formulas behind the model families in
//! `mk-models`: no parameter containers, no datasets, just `f64` in and
//! `f64` out. Keeping them separate makes them easy to test against
//! analytic identities and reuse outside the model framework.

#![warn(missing_docs)]

pub mod normal;
pub mod student_t;
pub mod waring;
