//! Core building blocks for the modelkit statistical-modeling toolkit.
//!
//! This crate defines the shared vocabulary the model crates build on:
//!
//! - [`Dataset`]: a rectangular numeric table with optional outcome,
//!   weights, text columns, names, and named supplementary pages.
//! - [`Params`] and [`ParamShape`]: parameter storage with an invertible
//!   packed representation.
//! - [`SettingsMap`]: typed per-model configuration groups.
//! - [`ModelFamily`] and [`Model`]: the family trait and the polymorphic
//!   model descriptor that dispatches through it.
//!
//! Concrete families (normal, linear regression, empirical distributions,
//! composition) live in `mk-models`; bare density kernels in `mk-prob`.

#![warn(missing_docs)]

pub mod dataset;
pub mod error;
pub mod model;
pub mod params;
pub mod settings;

pub use dataset::{Dataset, Names};
pub use error::{Error, Result};
pub use model::{Capabilities, Model, ModelFamily};
pub use params::{ParamShape, Params};
pub use settings::{Settings, SettingsMap};
