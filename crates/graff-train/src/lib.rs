//! # graff-train
//!
//! Training infrastructure for the graff force field:
//!
//! - [`dataset`]: in-memory datasets of molecules, conformations and cached
//!   derived geometry
//! - [`scheduler`]: deterministic splits, conformation strategies and batch
//!   plans with an optional prefetching stream
//! - [`loss`]: the staged multi-objective loss (classical parameters, QM
//!   energies and forces, regularization) with per-dataset weighting
//! - [`observer`]: callbacks for experiment tracking
//! - [`trainer`]: Adam with warmup, plateau decay, early stopping, time
//!   limit and best-checkpoint persistence
//! - [`checkpoint`]: model + configuration artifacts
//!
//! Logging goes through `tracing`; nothing here installs a subscriber, so
//! library consumers control their own.

pub mod checkpoint;
pub mod dataset;
pub mod loss;
pub mod observer;
pub mod scheduler;
pub mod trainer;

pub use dataset::{ClassicalParams, Dataset, MolRecord};
pub use loss::{LossBreakdown, LossOrchestrator, LossPhase};
pub use observer::{EpochReport, NoopObserver, TracingObserver, TrainObserver};
pub use scheduler::{Batch, BatchItem, DatasetScheduler, SplitKind};
pub use trainer::{TrainOutcome, Trainer};
