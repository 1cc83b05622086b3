//! Staged multi-objective loss.
//!
//! Training moves through three phases driven by the epoch index: parameter
//! supervision alone warms the heads up, QM energy/force matching joins
//! after `start_qm_epochs`, and the parameter term is dropped once
//! `param_loss_epochs` is reached. Energies are compared after per-molecule
//! centering because the QM reference carries an arbitrary offset.
//!
//! Dataset weighting follows `weights[name] * (mean_size / size)^balance`:
//! with `balance = 0` every conformation counts the same, with `balance = 1`
//! every dataset contributes equally per epoch regardless of size.

use burn::prelude::*;

use graff_core::config::{DataConfig, TrainConfig};
use graff_core::error::{GraffError, Result};
use graff_core::tuples::{permute, TermType, TupleIndices};
use graff_models::energy::{energy_and_forces, tuplewise_variance};
use graff_models::{GraffModel, Mode, PredictedParams};

use crate::dataset::Dataset;
use crate::scheduler::Batch;

/// The active loss components for an epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LossPhase {
    /// Classical parameter supervision only.
    ParamOnly,
    /// Parameters plus QM energy/force matching.
    ParamAndQm,
    /// QM matching only.
    QmOnly,
}

impl LossPhase {
    /// Phase for a given epoch under the configured schedule.
    pub fn for_epoch(epoch: usize, config: &TrainConfig) -> Self {
        if epoch < config.start_qm_epochs {
            LossPhase::ParamOnly
        } else if epoch < config.param_loss_epochs {
            LossPhase::ParamAndQm
        } else {
            LossPhase::QmOnly
        }
    }

    pub const fn uses_qm(self) -> bool {
        matches!(self, LossPhase::ParamAndQm | LossPhase::QmOnly)
    }

    pub const fn uses_param(self) -> bool {
        matches!(self, LossPhase::ParamOnly | LossPhase::ParamAndQm)
    }
}

/// Weighted components of one batch loss, already multiplied by their
/// configured weights.
#[derive(Debug, Clone, Copy, Default)]
pub struct LossBreakdown {
    pub total: f32,
    pub energy: f32,
    pub force: f32,
    pub param: f32,
    pub tuplewise: f32,
    pub regularisation: f32,
}

/// Computes batch losses under the staged schedule and dataset weighting.
#[derive(Debug, Clone)]
pub struct LossOrchestrator {
    config: TrainConfig,
    dataset_weights: Vec<f32>,
}

impl LossOrchestrator {
    pub fn new(train: &TrainConfig, data: &DataConfig, datasets: &[Dataset]) -> Self {
        let sizes: Vec<f64> = datasets.iter().map(|d| d.n_conformations() as f64).collect();
        let mean_size = sizes.iter().sum::<f64>() / sizes.len().max(1) as f64;
        let dataset_weights = datasets
            .iter()
            .zip(&sizes)
            .map(|(dataset, &size)| {
                let base = data.weights.get(dataset.name()).copied().unwrap_or(1.0);
                (base * (mean_size / size).powf(data.balance_factor)) as f32
            })
            .collect();
        Self {
            config: train.clone(),
            dataset_weights,
        }
    }

    pub fn dataset_weight(&self, dataset: usize) -> f32 {
        self.dataset_weights[dataset]
    }

    /// The weighted loss of one batch, as a differentiable scalar plus its
    /// extracted breakdown. A non-finite total is an error naming the
    /// batch's molecules.
    pub fn batch_loss<B: Backend>(
        &self,
        model: &GraffModel<B>,
        datasets: &[Dataset],
        batch: &Batch,
        phase: LossPhase,
        device: &B::Device,
    ) -> Result<(Tensor<B, 1>, LossBreakdown)> {
        let mut energy = Tensor::<B, 1>::zeros([1], device);
        let mut force = Tensor::<B, 1>::zeros([1], device);
        let mut param = Tensor::<B, 1>::zeros([1], device);
        let mut tuplewise = Tensor::<B, 1>::zeros([1], device);
        let mut regularisation = Tensor::<B, 1>::zeros([1], device);

        for item in &batch.items {
            let record = datasets[item.dataset].record(item.record);
            let weight = self.dataset_weights[item.dataset];
            let params = model.forward(record.mol(), record.tuples(), Mode::Training, device);

            if phase.uses_qm() {
                let geom = record.geometry::<B>(&item.conformations, device);
                let out = energy_and_forces(&params, &geom, device);
                let (ref_e, ref_f) = record.qm_references::<B>(&item.conformations, device);

                let pred_centered = out.energies.clone() - out.energies.clone().mean();
                let ref_centered = ref_e.clone() - ref_e.mean();
                energy = energy + mse(pred_centered, ref_centered) * weight;
                force = force + mse(out.forces, ref_f) * weight;

                for (term, energies) in [
                    ("bond", &out.tuple_energies.bonds),
                    ("angle", &out.tuple_energies.angles),
                    ("proper", &out.tuple_energies.propers),
                    ("improper", &out.tuple_energies.impropers),
                ] {
                    if let Some(e) = energies {
                        tracing::debug!(
                            molecule = record.mol().id(),
                            term,
                            energy_variance = scalar(&tuplewise_variance(e)),
                            "per-tuple energy spread"
                        );
                    }
                }
            }

            if phase.uses_param() {
                if let Some(classical) = record.classical() {
                    let mut item_param = mse(
                        params.bonds.k.clone(),
                        Tensor::<B, 1>::from_floats(classical.bond_k.as_slice(), device),
                    );
                    item_param = item_param
                        + mse(
                            params.bonds.r0.clone(),
                            Tensor::<B, 1>::from_floats(classical.bond_r0.as_slice(), device),
                        );
                    if let Some(angles) = &params.angles {
                        item_param = item_param
                            + mse(
                                angles.k.clone(),
                                Tensor::<B, 1>::from_floats(classical.angle_k.as_slice(), device),
                            )
                            + mse(
                                angles.theta0.clone(),
                                Tensor::<B, 1>::from_floats(
                                    classical.angle_theta0.as_slice(),
                                    device,
                                ),
                            );
                    }
                    if let (Some(amps), true) = (&params.propers, !classical.proper_amps.is_empty())
                    {
                        let t = record.tuples().propers.len();
                        let reference =
                            Tensor::<B, 1>::from_floats(classical.proper_amps.as_slice(), device)
                                .reshape([t, classical.proper_periodicity]);
                        // Compare over the common leading periodicities; the
                        // reference force field may carry fewer terms than
                        // the model predicts.
                        let n = classical.proper_periodicity.min(amps.dims()[1]);
                        item_param = item_param
                            + mse(amps.clone().narrow(1, 0, n), reference.narrow(1, 0, n));
                    }
                    param = param + item_param * weight;
                }
            }

            if self.config.tuplewise_weight > 0.0 {
                let deviation =
                    symmetry_deviation(model, record.mol(), record.tuples(), &params, device);
                let value = scalar(&deviation);
                if value > 1e-4 {
                    tracing::warn!(
                        molecule = record.mol().id(),
                        deviation = value,
                        "symmetry consistency diagnostic above tolerance"
                    );
                }
                tuplewise = tuplewise + deviation * weight;
            }

            if let Some(amps) = &params.propers {
                regularisation = regularisation
                    + amps.clone().powf_scalar(2.0).mean()
                        * self.config.proper_regularisation as f32
                        * weight;
            }
            if let Some(amps) = &params.impropers {
                regularisation = regularisation
                    + amps.clone().powf_scalar(2.0).mean()
                        * self.config.improper_regularisation as f32
                        * weight;
            }
        }

        let n = batch.items.len().max(1) as f32;
        let energy = energy / n;
        let force = force * self.config.gradient_weight as f32 / n;
        let param = param * self.config.param_weight as f32 / n;
        let tuplewise = tuplewise * self.config.tuplewise_weight as f32 / n;
        let regularisation = regularisation / n;

        let total =
            energy.clone() + force.clone() + param.clone() + tuplewise.clone() + regularisation.clone();
        let breakdown = LossBreakdown {
            total: scalar(&total),
            energy: scalar(&energy),
            force: scalar(&force),
            param: scalar(&param),
            tuplewise: scalar(&tuplewise),
            regularisation: scalar(&regularisation),
        };
        if !breakdown.total.is_finite() {
            let molecules: Vec<&str> = batch
                .items
                .iter()
                .map(|item| datasets[item.dataset].record(item.record).mol().id())
                .collect();
            return Err(GraffError::NonFinite {
                batch: molecules.join(", "),
                quantity: "loss".into(),
            });
        }
        Ok((total, breakdown))
    }
}

/// Mean squared deviation between the parameters of the canonical tuple
/// ordering and a symmetry-equivalent reordering. Zero up to float noise by
/// construction of the symmetriser.
fn symmetry_deviation<B: Backend>(
    model: &GraffModel<B>,
    mol: &graff_core::molecule::MoleculeGraph,
    tuples: &TupleIndices,
    canonical: &PredictedParams<B>,
    device: &B::Device,
) -> Tensor<B, 1> {
    let mut reordered = tuples.clone();
    for bond in &mut reordered.bonds {
        *bond = permute(bond, TermType::Bond.permutations()[1]);
    }
    for angle in &mut reordered.angles {
        *angle = permute(angle, TermType::Angle.permutations()[1]);
    }
    for proper in &mut reordered.propers {
        *proper = permute(proper, TermType::Proper.permutations()[1]);
    }
    for improper in &mut reordered.impropers {
        *improper = permute(improper, TermType::Improper.permutations()[1]);
    }
    let other = model.forward(mol, &reordered, Mode::Training, device);

    let mut deviation = mse(canonical.bonds.k.clone(), other.bonds.k.clone())
        + mse(canonical.bonds.r0.clone(), other.bonds.r0.clone());
    let mut terms = 2.0f32;
    if let (Some(a), Some(b)) = (&canonical.angles, &other.angles) {
        deviation = deviation + mse(a.k.clone(), b.k.clone()) + mse(a.theta0.clone(), b.theta0.clone());
        terms += 2.0;
    }
    if let (Some(a), Some(b)) = (&canonical.propers, &other.propers) {
        deviation = deviation + mse(a.clone(), b.clone());
        terms += 1.0;
    }
    if let (Some(a), Some(b)) = (&canonical.impropers, &other.impropers) {
        deviation = deviation + mse(a.clone(), b.clone());
        terms += 1.0;
    }
    deviation / terms
}

fn mse<B: Backend, const D: usize>(a: Tensor<B, D>, b: Tensor<B, D>) -> Tensor<B, 1> {
    (a - b).powf_scalar(2.0).mean()
}

fn scalar<B: Backend>(t: &Tensor<B, 1>) -> f32 {
    t.clone().into_data().to_vec::<f32>().expect("scalar loss value")[0]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_schedule() {
        let config = TrainConfig {
            start_qm_epochs: 2,
            param_loss_epochs: 5,
            ..TrainConfig::default()
        };
        assert_eq!(LossPhase::for_epoch(0, &config), LossPhase::ParamOnly);
        assert_eq!(LossPhase::for_epoch(1, &config), LossPhase::ParamOnly);
        assert_eq!(LossPhase::for_epoch(2, &config), LossPhase::ParamAndQm);
        assert_eq!(LossPhase::for_epoch(4, &config), LossPhase::ParamAndQm);
        assert_eq!(LossPhase::for_epoch(5, &config), LossPhase::QmOnly);
        assert!(LossPhase::QmOnly.uses_qm());
        assert!(!LossPhase::QmOnly.uses_param());
        assert!(!LossPhase::ParamOnly.uses_qm());
    }

    #[test]
    fn balance_factor_equalises_datasets() {
        use crate::dataset::{Dataset, MolRecord};
        use graff_core::conformation::Conformation;
        use graff_core::molecule::{Atom, MoleculeGraph};

        let record = |id: &str, n_conf: usize| {
            let mol = MoleculeGraph::new(
                id,
                vec![Atom::new(6, 0.0), Atom::new(6, 0.0)],
                vec![(0, 1)],
            )
            .unwrap();
            let confs = (0..n_conf)
                .map(|_| Conformation {
                    positions: vec![[0.0; 3], [1.0, 0.0, 0.0]],
                    qm_energy: 0.0,
                    qm_forces: vec![[0.0; 3]; 2],
                })
                .collect();
            MolRecord::new(mol, confs, None).unwrap()
        };
        let big = Dataset::new("big", vec![record("a", 9)]).unwrap();
        let small = Dataset::new("small", vec![record("b", 1)]).unwrap();

        let mut data = DataConfig::default();
        data.datasets = vec!["big".into(), "small".into()];
        data.balance_factor = 1.0;
        let orchestrator =
            LossOrchestrator::new(&TrainConfig::default(), &data, &[big.clone(), small.clone()]);
        // mean size 5: big gets 5/9, small gets 5/1
        assert!((orchestrator.dataset_weight(0) - 5.0 / 9.0).abs() < 1e-6);
        assert!((orchestrator.dataset_weight(1) - 5.0).abs() < 1e-6);

        data.balance_factor = 0.0;
        data.weights.insert("small".into(), 3.0);
        let orchestrator = LossOrchestrator::new(&TrainConfig::default(), &data, &[big, small]);
        assert!((orchestrator.dataset_weight(0) - 1.0).abs() < 1e-6);
        assert!((orchestrator.dataset_weight(1) - 3.0).abs() < 1e-6);
    }
}
