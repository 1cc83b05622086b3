//! # graff-core
//!
//! Core types for the graff bonded force field.
//!
//! This crate provides the data model and configuration surface shared by the
//! model and training crates:
//!
//! - [`MoleculeGraph`]: atoms, bonds and derived connectivity
//! - [`TupleIndices`]: exhaustive enumeration of bonded interaction tuples
//!   (bonds, angles, proper and improper torsions) with the explicit
//!   symmetry permutation table of each term type
//! - [`Conformation`] and [`InternalCoords`]: one 3-D geometry with its QM
//!   reference data, plus cached internal coordinates and their analytic
//!   Cartesian gradients for the classical evaluator
//! - [`GraffConfig`]: the typed data/model/training configuration with
//!   validation and TOML round-tripping
//!
//! ## Backend
//!
//! The [`backend`] module fixes the tensor backends used throughout the
//! workspace: an ndarray CPU backend for inference/tests, its autodiff
//! wrapper for training, and (behind the `gpu` feature) a WGPU backend.

pub mod backend;
pub mod config;
pub mod conformation;
pub mod error;
pub mod geometry;
pub mod molecule;
pub mod tuples;

pub use config::{ConfStrategy, DataConfig, GraffConfig, ModelConfig, TrainConfig};
pub use conformation::{Conformation, InternalCoords};
pub use error::{GraffError, Result};
pub use molecule::{Atom, ChargeModel, MoleculeGraph};
pub use tuples::{TermType, TupleIndices};
