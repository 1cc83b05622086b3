//! # graff-models
//!
//! The parameter predictor of the graff force field and its classical
//! evaluator:
//!
//! - [`features`]: atom attribute encoding with learned embeddings and an
//!   optional graph positional encoding
//! - [`gnn`]: the graph encoder, graph convolutions followed by set
//!   self-attention
//! - [`symmetriser`]: exactly permutation-invariant tuple embeddings
//! - [`heads`]: transformer heads projecting tuple embeddings to constrained
//!   physical parameters
//! - [`model`]: [`GraffModel`], the whole pipeline from molecule to
//!   parameters
//! - [`energy`]: the differentiable classical energy and force evaluator
//!
//! Prediction is a per-molecule operation; conformations only enter through
//! the evaluator, which treats the precomputed geometry as constant and
//! differentiates with respect to the parameters alone.

pub mod energy;
pub mod features;
pub mod gnn;
pub mod heads;
pub mod model;
pub mod symmetriser;

pub use energy::{energy_and_forces, EnergyBreakdown, MolGeometry, TupleEnergies};
pub use heads::{AngleParams, BondParams};
pub use model::{GraffModel, Mode, PredictedParams};
pub use symmetriser::{TupleSymmetriser, TupleSymmetriserConfig};
