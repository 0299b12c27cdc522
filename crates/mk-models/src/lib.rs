//! Model families and estimation drivers for modelkit.
//!
//! Families live in their own modules and plug into the dispatch layer
//! from `mk-core`:
//!
//! - [`normal`], [`student_t`], [`waring`]: univariate distributions.
//! - [`linear`]: ordinary least squares and instrumental variables.
//! - [`pmf`]: empirical distributions where the data is the model.
//! - [`compose`]: a generator model chained into a likelihood model.
//!
//! Estimation machinery sits alongside: the generic maximum-likelihood
//! driver in [`mle`], the L-BFGS wrapper in [`optimizer`], and the
//! feasible-region projection helpers in [`constraint`].

#![warn(missing_docs)]

pub mod compose;
pub mod constraint;
pub mod linear;
pub mod mle;
pub mod normal;
pub mod optimizer;
pub mod pmf;
pub mod student_t;
pub mod waring;

pub use mle::{estimate_mle, MleSettings};
pub use optimizer::{LbfgsOptimizer, ObjectiveFunction, OptimizerConfig};
