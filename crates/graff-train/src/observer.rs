//! Training observers.
//!
//! Observers are the injection point for experiment tracking: the trainer
//! calls them with batch losses and epoch summaries and otherwise knows
//! nothing about where the numbers go. The default [`TracingObserver`]
//! forwards everything to `tracing`, so a subscriber-free library consumer
//! pays nothing.

use std::time::Duration;

use crate::loss::{LossBreakdown, LossPhase};

/// Summary of one epoch.
#[derive(Debug, Clone)]
pub struct EpochReport {
    pub epoch: usize,
    pub phase: LossPhase,
    /// Mean batch loss over the epoch.
    pub train_loss: f32,
    /// Validation RMSE of centered energies.
    pub val_energy_rmse: f64,
    /// Validation RMSE of force components.
    pub val_force_rmse: f64,
    pub learning_rate: f64,
    pub duration: Duration,
}

/// Callbacks fired by the trainer.
pub trait TrainObserver {
    fn on_batch(&mut self, _epoch: usize, _batch: usize, _loss: &LossBreakdown) {}

    fn on_epoch(&mut self, _report: &EpochReport) {}

    /// Called when the early-stopping metric improves (after the checkpoint
    /// is written).
    fn on_improvement(&mut self, _epoch: usize, _metric: f64) {}
}

/// Observer that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl TrainObserver for NoopObserver {}

/// Observer that forwards to `tracing`: batch detail at debug, epoch
/// summaries at info.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl TrainObserver for TracingObserver {
    fn on_batch(&mut self, epoch: usize, batch: usize, loss: &LossBreakdown) {
        tracing::debug!(
            epoch,
            batch,
            total = loss.total,
            energy = loss.energy,
            force = loss.force,
            param = loss.param,
            "batch loss"
        );
    }

    fn on_epoch(&mut self, report: &EpochReport) {
        tracing::info!(
            epoch = report.epoch,
            phase = ?report.phase,
            train_loss = report.train_loss,
            val_energy_rmse = report.val_energy_rmse,
            val_force_rmse = report.val_force_rmse,
            lr = report.learning_rate,
            secs = report.duration.as_secs_f64(),
            "epoch complete"
        );
    }

    fn on_improvement(&mut self, epoch: usize, metric: f64) {
        tracing::info!(epoch, metric, "validation improved, checkpoint written");
    }
}
