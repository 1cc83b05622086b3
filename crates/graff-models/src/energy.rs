//! Differentiable classical energy evaluator.
//!
//! Internal coordinates and their Cartesian gradients are precomputed on the
//! host once per conformation; this module packs them into tensors and
//! evaluates the classical energy and forces as a function of the predicted
//! parameters only. The chain rule does the rest: forces are assembled from
//! the parameter-dependent `dE/dq` and the constant `dq/dx`, so the whole
//! expression is differentiable with respect to the parameters while the
//! geometry stays out of the autodiff graph.
//!
//! Functional forms:
//!
//! - bond: `E = k/2 (r - r0)^2`
//! - angle: `E = k/2 (θ - θ0)^2`
//! - torsion: `E = Σ_n k_n cos(n φ)` with zero phase shift; the constant
//!   offset this leaves in the energy is immaterial because losses compare
//!   centered energies

use burn::prelude::*;

use graff_core::conformation::{InternalCoords, InternalTerm};
use graff_core::tuples::TupleIndices;

use crate::model::PredictedParams;

/// Tensor-packed geometry of one term type across the conformations of one
/// molecule.
#[derive(Debug, Clone)]
pub struct TermGeometry<B: Backend> {
    /// Internal coordinate values, `[n_conf, n_tuples]`.
    values: Tensor<B, 2>,
    /// Cartesian gradients of the values, `[n_conf, n_tuples, arity, 3]`.
    grads: Tensor<B, 4>,
    /// Atom index of each tuple position, `arity` tensors of `[n_tuples]`.
    atom_indices: Vec<Tensor<B, 1, Int>>,
}

fn pack_term<B: Backend, const K: usize>(
    tuples: &[[usize; K]],
    terms: &[&InternalTerm],
    device: &B::Device,
) -> Option<TermGeometry<B>> {
    let t = tuples.len();
    if t == 0 {
        return None;
    }
    let c = terms.len();

    let mut values = Vec::with_capacity(c * t);
    let mut grads = Vec::with_capacity(c * t * K * 3);
    for term in terms {
        values.extend(term.values.iter().map(|&v| v as f32));
        for row in &term.grads {
            grads.extend(row.iter().map(|&g| g as f32));
        }
    }

    let atom_indices = (0..K)
        .map(|p| {
            let idx: Vec<i32> = tuples.iter().map(|tuple| tuple[p] as i32).collect();
            Tensor::<B, 1, Int>::from_ints(idx.as_slice(), device)
        })
        .collect();

    Some(TermGeometry {
        values: Tensor::<B, 1>::from_floats(values.as_slice(), device).reshape([c, t]),
        grads: Tensor::<B, 1>::from_floats(grads.as_slice(), device).reshape([c, t, K, 3]),
        atom_indices,
    })
}

/// Tensor-packed geometry of a whole molecule: every term type, every
/// conformation.
#[derive(Debug, Clone)]
pub struct MolGeometry<B: Backend> {
    n_atoms: usize,
    n_conf: usize,
    bonds: Option<TermGeometry<B>>,
    angles: Option<TermGeometry<B>>,
    propers: Option<TermGeometry<B>>,
    impropers: Option<TermGeometry<B>>,
}

impl<B: Backend> MolGeometry<B> {
    /// Pack the internal coordinates of `coords` (one entry per
    /// conformation, all for the same tuple enumeration) into tensors.
    pub fn pack(
        tuples: &TupleIndices,
        coords: &[InternalCoords],
        n_atoms: usize,
        device: &B::Device,
    ) -> Self {
        let bonds: Vec<&InternalTerm> = coords.iter().map(|c| &c.bonds).collect();
        let angles: Vec<&InternalTerm> = coords.iter().map(|c| &c.angles).collect();
        let propers: Vec<&InternalTerm> = coords.iter().map(|c| &c.propers).collect();
        let impropers: Vec<&InternalTerm> = coords.iter().map(|c| &c.impropers).collect();
        Self {
            n_atoms,
            n_conf: coords.len(),
            bonds: pack_term(&tuples.bonds, &bonds, device),
            angles: pack_term(&tuples.angles, &angles, device),
            propers: pack_term(&tuples.propers, &propers, device),
            impropers: pack_term(&tuples.impropers, &impropers, device),
        }
    }

    pub const fn n_conf(&self) -> usize {
        self.n_conf
    }

    pub const fn n_atoms(&self) -> usize {
        self.n_atoms
    }
}

/// Per-tuple energies of one molecule, for the variance diagnostic.
#[derive(Debug, Clone)]
pub struct TupleEnergies<B: Backend> {
    pub bonds: Option<Tensor<B, 2>>,
    pub angles: Option<Tensor<B, 2>>,
    pub propers: Option<Tensor<B, 2>>,
    pub impropers: Option<Tensor<B, 2>>,
}

/// Classical energies and forces for every conformation of one molecule.
#[derive(Debug, Clone)]
pub struct EnergyBreakdown<B: Backend> {
    /// Total energy per conformation, `[n_conf]`.
    pub energies: Tensor<B, 1>,
    /// Forces, `[n_conf, n_atoms, 3]`.
    pub forces: Tensor<B, 3>,
    /// Per-tuple energies, `[n_conf, n_tuples]` per present term type.
    pub tuple_energies: TupleEnergies<B>,
}

/// Evaluate the classical energy and forces of `params` on `geom`.
pub fn energy_and_forces<B: Backend>(
    params: &PredictedParams<B>,
    geom: &MolGeometry<B>,
    device: &B::Device,
) -> EnergyBreakdown<B> {
    let c = geom.n_conf;
    let mut energies = Tensor::<B, 1>::zeros([c], device);
    let mut forces = Tensor::<B, 3>::zeros([c, geom.n_atoms, 3], device);

    let mut accumulate = |term: &TermGeometry<B>, e: Tensor<B, 2>, de_dq: Tensor<B, 2>| {
        energies = energies.clone() + e.clone().sum_dim(1).squeeze::<1>(1);
        let neg_de = de_dq.neg().unsqueeze_dim::<3>(2);
        for (p, idx) in term.atom_indices.iter().enumerate() {
            let grad_p = term
                .grads
                .clone()
                .narrow(2, p, 1)
                .reshape([c, idx.dims()[0], 3]);
            let contribution = grad_p * neg_de.clone();
            forces = forces.clone().select_assign(1, idx.clone(), contribution);
        }
        e
    };

    let bond_e = geom.bonds.as_ref().map(|term| {
        let (e, de) = harmonic(&term.values, &params.bonds.k, &params.bonds.r0);
        accumulate(term, e, de)
    });
    let angle_e = match (&geom.angles, &params.angles) {
        (Some(term), Some(p)) => {
            let (e, de) = harmonic(&term.values, &p.k, &p.theta0);
            Some(accumulate(term, e, de))
        }
        _ => None,
    };
    let proper_e = match (&geom.propers, &params.propers) {
        (Some(term), Some(amps)) => {
            let (e, de) = cosine_series(&term.values, amps);
            Some(accumulate(term, e, de))
        }
        _ => None,
    };
    let improper_e = match (&geom.impropers, &params.impropers) {
        (Some(term), Some(amps)) => {
            let (e, de) = cosine_series(&term.values, amps);
            Some(accumulate(term, e, de))
        }
        _ => None,
    };

    EnergyBreakdown {
        energies,
        forces,
        tuple_energies: TupleEnergies {
            bonds: bond_e,
            angles: angle_e,
            propers: proper_e,
            impropers: improper_e,
        },
    }
}

/// Harmonic term: per-tuple energies `[c, t]` and `dE/dq` `[c, t]`.
fn harmonic<B: Backend>(
    values: &Tensor<B, 2>,
    k: &Tensor<B, 1>,
    eq: &Tensor<B, 1>,
) -> (Tensor<B, 2>, Tensor<B, 2>) {
    let k = k.clone().unsqueeze::<2>();
    let eq = eq.clone().unsqueeze::<2>();
    let displacement = values.clone() - eq;
    let de_dq = k.clone() * displacement.clone();
    let e = de_dq.clone() * displacement * 0.5;
    (e, de_dq)
}

/// Cosine series: per-tuple energies `[c, t]` and `dE/dφ` `[c, t]` for
/// amplitudes `[t, n_periodicity]`.
fn cosine_series<B: Backend>(
    values: &Tensor<B, 2>,
    amps: &Tensor<B, 2>,
) -> (Tensor<B, 2>, Tensor<B, 2>) {
    let [c, t] = values.dims();
    let n_per = amps.dims()[1];
    let mut e = Tensor::<B, 2>::zeros([c, t], &values.device());
    let mut de = Tensor::<B, 2>::zeros([c, t], &values.device());
    for n in 1..=n_per {
        let amp_n = amps.clone().narrow(1, n - 1, 1).reshape([1, t]);
        let n_phi = values.clone() * n as f32;
        e = e + amp_n.clone() * n_phi.clone().cos();
        de = de - amp_n * n_phi.sin() * n as f32;
    }
    (e, de)
}

/// Mean over tuples of the variance of per-tuple energy across
/// conformations. Large values flag tuples whose energy swings dominate the
/// total; returned as a rank-1 single-element tensor.
pub fn tuplewise_variance<B: Backend>(tuple_energies: &Tensor<B, 2>) -> Tensor<B, 1> {
    let mean = tuple_energies.clone().mean_dim(0);
    let centered = tuple_energies.clone() - mean;
    centered.powf_scalar(2.0).mean()
}

#[cfg(test)]
mod tests {
    use super::*;
    use graff_core::backend::{cpu_device, CpuBackend};
    use graff_core::conformation::Conformation;
    use graff_core::molecule::{Atom, MoleculeGraph};
    use crate::heads::BondParams;

    type B = CpuBackend;

    fn diatomic_geometry(r: f64) -> MolGeometry<B> {
        let mol = MoleculeGraph::new(
            "h2",
            vec![Atom::new(1, 0.0), Atom::new(1, 0.0)],
            vec![(0, 1)],
        )
        .unwrap();
        let tuples = TupleIndices::enumerate(&mol);
        let conf = Conformation {
            positions: vec![[0.0, 0.0, 0.0], [r, 0.0, 0.0]],
            qm_energy: 0.0,
            qm_forces: vec![[0.0; 3]; 2],
        };
        let coords = InternalCoords::compute(&tuples, &conf);
        MolGeometry::pack(&tuples, &[coords], 2, &cpu_device())
    }

    fn diatomic_params(k: f32, r0: f32) -> PredictedParams<B> {
        let device = cpu_device();
        PredictedParams {
            bonds: BondParams {
                k: Tensor::from_floats([k], &device),
                r0: Tensor::from_floats([r0], &device),
            },
            angles: None,
            propers: None,
            impropers: None,
        }
    }

    #[test]
    fn harmonic_bond_energy_matches_closed_form() {
        let device = cpu_device();
        let geom = diatomic_geometry(1.2);
        let params = diatomic_params(100.0, 1.0);
        let out = energy_and_forces(&params, &geom, &device);
        let e = out.energies.into_data().to_vec::<f32>().expect("energies")[0];
        // E = k/2 (r - r0)^2 = 50 * 0.04
        assert!((e - 2.0).abs() < 1e-4);
    }

    #[test]
    fn forces_point_back_toward_equilibrium() {
        let device = cpu_device();
        let geom = diatomic_geometry(1.2);
        let params = diatomic_params(100.0, 1.0);
        let out = energy_and_forces(&params, &geom, &device);
        let f = out.forces.into_data().to_vec::<f32>().expect("forces");
        // stretched bond pulls the atoms together along x
        assert!(f[0] > 0.0);
        assert!(f[3] < 0.0);
        assert!((f[0] + f[3]).abs() < 1e-4);
        // dE/dr = k (r - r0) = 20, so |F_x| = 20 on each atom
        assert!((f[0] - 20.0).abs() < 1e-3);
    }

    #[test]
    fn forces_vanish_at_equilibrium() {
        let device = cpu_device();
        let geom = diatomic_geometry(1.0);
        let params = diatomic_params(250.0, 1.0);
        let out = energy_and_forces(&params, &geom, &device);
        for f in out.forces.into_data().to_vec::<f32>().expect("forces") {
            assert!(f.abs() < 1e-4);
        }
    }

    #[test]
    fn every_present_term_type_carries_tuple_energies() {
        use crate::heads::AngleParams;

        let device = cpu_device();
        // branched 5-atom molecule: all four term types are present
        let mol = MoleculeGraph::new(
            "branched",
            vec![
                Atom::new(6, 0.0),
                Atom::new(6, 0.0),
                Atom::new(6, 0.0),
                Atom::new(6, 0.0),
                Atom::new(1, 0.0),
            ],
            vec![(0, 1), (1, 2), (2, 3), (1, 4)],
        )
        .unwrap();
        let tuples = TupleIndices::enumerate(&mol);
        assert!(!tuples.impropers.is_empty());

        let positions = [
            vec![
                [0.0, 0.0, 0.2],
                [1.5, 0.0, 0.0],
                [2.2, 1.3, 0.0],
                [3.7, 1.4, 0.5],
                [1.9, -0.9, 0.8],
            ],
            vec![
                [0.1, 0.1, 0.0],
                [1.5, 0.0, 0.1],
                [2.3, 1.2, 0.0],
                [3.6, 1.5, 0.7],
                [1.8, -1.0, 0.7],
            ],
        ];
        let coords: Vec<InternalCoords> = positions
            .iter()
            .map(|p| {
                InternalCoords::compute(
                    &tuples,
                    &Conformation {
                        positions: p.clone(),
                        qm_energy: 0.0,
                        qm_forces: vec![[0.0; 3]; 5],
                    },
                )
            })
            .collect();
        let geom = MolGeometry::<B>::pack(&tuples, &coords, 5, &device);

        let flat = |n: usize, v: f32| Tensor::<B, 1>::from_floats(vec![v; n].as_slice(), &device);
        let amps = |t: usize, n_per: usize| {
            Tensor::<B, 1>::from_floats(vec![0.1; t * n_per].as_slice(), &device)
                .reshape([t, n_per])
        };
        let params = PredictedParams {
            bonds: BondParams {
                k: flat(tuples.bonds.len(), 300.0),
                r0: flat(tuples.bonds.len(), 1.4),
            },
            angles: Some(AngleParams {
                k: flat(tuples.angles.len(), 50.0),
                theta0: flat(tuples.angles.len(), 1.9),
            }),
            propers: Some(amps(tuples.propers.len(), 3)),
            impropers: Some(amps(tuples.impropers.len(), 2)),
        };

        let out = energy_and_forces(&params, &geom, &device);
        let checks = [
            (&out.tuple_energies.bonds, tuples.bonds.len()),
            (&out.tuple_energies.angles, tuples.angles.len()),
            (&out.tuple_energies.propers, tuples.propers.len()),
            (&out.tuple_energies.impropers, tuples.impropers.len()),
        ];
        for (energies, t) in checks {
            let e = energies.as_ref().expect("term type present");
            assert_eq!(e.dims(), [2, t]);
            let v = tuplewise_variance(e)
                .into_data()
                .to_vec::<f32>()
                .expect("variance")[0];
            assert!(v.is_finite());
        }
    }

    #[test]
    fn tuplewise_variance_of_constant_energies_is_zero() {
        let device = cpu_device();
        let e = Tensor::<B, 2>::from_floats([[3.0, -1.0], [3.0, -1.0]], &device);
        let v = tuplewise_variance(&e).into_data().to_vec::<f32>().expect("var")[0];
        assert!(v.abs() < 1e-7);
    }
}
