//! The training loop.
//!
//! Adam with gradient-norm clipping, linear learning-rate warmup, plateau
//! decay, early stopping on a blended validation energy/force RMSE, a hard
//! wall-clock limit checked at epoch boundaries, and best-checkpoint
//! persistence. Validation runs on the inner (non-autodiff) backend via
//! [`AutodiffModule::valid`], so no graph is built for it.
//!
//! # Example
//!
//! ```rust,ignore
//! let trainer = Trainer::new(config, datasets)?;
//! let model = GraffModel::<AutodiffCpuBackend>::new(trainer.config(), &device)?;
//! let (model, outcome) = trainer.train(model, &device, &mut TracingObserver)?;
//! ```

use std::path::PathBuf;
use std::time::{Duration, Instant};

use burn::grad_clipping::GradientClippingConfig;
use burn::module::AutodiffModule;
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;

use graff_core::error::Result;
use graff_core::GraffConfig;
use graff_models::energy::energy_and_forces;
use graff_models::{GraffModel, Mode};

use crate::checkpoint;
use crate::dataset::Dataset;
use crate::loss::{LossOrchestrator, LossPhase};
use crate::observer::{EpochReport, TrainObserver};
use crate::scheduler::{stream_batches, DatasetScheduler, SplitKind};

/// How a training run ended.
#[derive(Debug, Clone)]
pub struct TrainOutcome {
    pub epochs_run: usize,
    /// Best value of the early-stopping metric seen.
    pub best_metric: f64,
    pub stopped_early: bool,
    pub hit_time_limit: bool,
    /// Directory of the best checkpoint, if any epoch completed.
    pub checkpoint: Option<PathBuf>,
}

/// Orchestrates epochs over a fixed scheduler and loss configuration.
#[derive(Debug)]
pub struct Trainer {
    config: GraffConfig,
    scheduler: DatasetScheduler,
    loss: LossOrchestrator,
}

impl Trainer {
    pub fn new(config: GraffConfig, datasets: Vec<Dataset>) -> Result<Self> {
        config.validate()?;
        let loss = LossOrchestrator::new(&config.train, &config.data, &datasets);
        let scheduler = DatasetScheduler::new(datasets, config.data.clone())?;
        Ok(Self {
            config,
            scheduler,
            loss,
        })
    }

    pub fn config(&self) -> &GraffConfig {
        &self.config
    }

    pub fn scheduler(&self) -> &DatasetScheduler {
        &self.scheduler
    }

    /// Run the configured number of epochs (or until early stopping or the
    /// time limit) and return the trained model with the run's outcome.
    pub fn train<B: AutodiffBackend>(
        &self,
        mut model: GraffModel<B>,
        device: &B::Device,
        observer: &mut dyn TrainObserver,
    ) -> Result<(GraffModel<B>, TrainOutcome)> {
        let t = &self.config.train;
        let mut optim = AdamConfig::new()
            .with_grad_clipping(Some(GradientClippingConfig::Norm(t.gradient_clip)))
            .init();

        let run_start = Instant::now();
        let mut best_metric = f64::INFINITY;
        let mut epochs_since_improvement = 0usize;
        let mut epochs_since_decay = 0usize;
        let mut lr_factor = 1.0f64;
        let mut global_step = 0usize;
        let mut outcome = TrainOutcome {
            epochs_run: 0,
            best_metric,
            stopped_early: false,
            hit_time_limit: false,
            checkpoint: None,
        };

        for epoch in 0..t.epochs {
            let epoch_start = Instant::now();
            let phase = LossPhase::for_epoch(epoch, t);
            let plan = self.scheduler.epoch_batches(SplitKind::Train, epoch);
            let workers = self.scheduler.workers(SplitKind::Train);

            let mut loss_sum = 0.0f32;
            let mut loss_count = 0usize;
            let mut lr = t.learning_rate;
            for (batch_idx, batch) in stream_batches(plan, workers).enumerate() {
                global_step += 1;
                let warmup = if t.warmup_steps > 0 {
                    (global_step as f64 / t.warmup_steps as f64).min(1.0)
                } else {
                    1.0
                };
                lr = t.learning_rate * warmup * lr_factor;

                let (loss, breakdown) = self.loss.batch_loss(
                    &model,
                    self.scheduler.datasets(),
                    &batch,
                    phase,
                    device,
                )?;
                let grads = GradientsParams::from_grads(loss.backward(), &model);
                model = optim.step(lr, model, grads);

                loss_sum += breakdown.total;
                loss_count += 1;
                observer.on_batch(epoch, batch_idx, &breakdown);
            }
            let train_loss = loss_sum / loss_count.max(1) as f32;

            let valid_model = model.valid();
            let (val_energy_rmse, val_force_rmse) =
                self.evaluate(&valid_model, SplitKind::Val, device)?;
            let blend = t.early_stopping_force_blend;
            let metric = if self.scheduler.split().val.is_empty() {
                // No validation data: fall back to the training loss so the
                // stopping machinery still has a signal.
                train_loss as f64
            } else {
                blend * val_force_rmse + (1.0 - blend) * val_energy_rmse
            };

            outcome.epochs_run = epoch + 1;
            if metric < best_metric {
                best_metric = metric;
                epochs_since_improvement = 0;
                epochs_since_decay = 0;
                outcome.checkpoint =
                    Some(checkpoint::save(&valid_model, &self.config, &t.checkpoint_dir)?);
                observer.on_improvement(epoch, metric);
            } else {
                epochs_since_improvement += 1;
                epochs_since_decay += 1;
                if epochs_since_decay >= t.plateau_patience {
                    lr_factor *= t.lr_decay;
                    epochs_since_decay = 0;
                    tracing::info!(epoch, lr_factor, "validation plateau, decaying learning rate");
                }
            }

            observer.on_epoch(&EpochReport {
                epoch,
                phase,
                train_loss,
                val_energy_rmse,
                val_force_rmse,
                learning_rate: lr,
                duration: epoch_start.elapsed(),
            });

            if epochs_since_improvement >= t.early_stopping_patience {
                tracing::info!(epoch, best_metric, "early stopping");
                outcome.stopped_early = true;
                break;
            }
            if let Some(limit) = t.time_limit_secs {
                if run_start.elapsed() >= Duration::from_secs(limit) {
                    tracing::info!(epoch, "time limit reached");
                    outcome.hit_time_limit = true;
                    break;
                }
            }
        }

        if outcome.checkpoint.is_none() && outcome.epochs_run > 0 {
            outcome.checkpoint =
                Some(checkpoint::save(&model.valid(), &self.config, &t.checkpoint_dir)?);
        }
        outcome.best_metric = best_metric;
        Ok((model, outcome))
    }

    /// Energy and force RMSE of `model` over one split, with per-molecule
    /// energy centering. Returns zeros for an empty split.
    pub fn evaluate<B: Backend>(
        &self,
        model: &GraffModel<B>,
        kind: SplitKind,
        device: &B::Device,
    ) -> Result<(f64, f64)> {
        let mut energy_sq = 0.0f64;
        let mut energy_n = 0usize;
        let mut force_sq = 0.0f64;
        let mut force_n = 0usize;

        let workers = self.scheduler.workers(kind);
        for batch in stream_batches(self.scheduler.epoch_batches(kind, 0), workers) {
            for item in &batch.items {
                let record = self.scheduler.datasets()[item.dataset].record(item.record);
                let params =
                    model.forward(record.mol(), record.tuples(), Mode::Inference, device);
                let geom = record.geometry::<B>(&item.conformations, device);
                let out = energy_and_forces(&params, &geom, device);
                let (ref_e, ref_f) = record.qm_references::<B>(&item.conformations, device);

                let pred_centered = out.energies.clone() - out.energies.clone().mean();
                let ref_centered = ref_e.clone() - ref_e.mean();
                let e_err = (pred_centered - ref_centered)
                    .into_data()
                    .to_vec::<f32>()
                    .expect("energy residuals");
                energy_n += e_err.len();
                energy_sq += e_err.iter().map(|&e| (e as f64).powi(2)).sum::<f64>();

                let f_err = (out.forces - ref_f)
                    .into_data()
                    .to_vec::<f32>()
                    .expect("force residuals");
                force_n += f_err.len();
                force_sq += f_err.iter().map(|&e| (e as f64).powi(2)).sum::<f64>();
            }
        }
        let rmse = |sq: f64, n: usize| if n == 0 { 0.0 } else { (sq / n as f64).sqrt() };
        Ok((rmse(energy_sq, energy_n), rmse(force_sq, force_n)))
    }
}
