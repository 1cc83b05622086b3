//! Consistency between the analytic forces and numerical derivatives of the
//! classical energy, with all four term types active.

use graff_core::backend::{cpu_device, CpuBackend};
use graff_core::conformation::{Conformation, InternalCoords};
use graff_core::molecule::{Atom, MoleculeGraph};
use graff_core::tuples::TupleIndices;
use graff_core::GraffConfig;
use graff_models::energy::energy_and_forces;
use graff_models::{GraffModel, Mode, MolGeometry, PredictedParams};

type B = CpuBackend;

fn small_config() -> GraffConfig {
    let mut config = GraffConfig::default();
    config.model.feature_width = 16;
    config.model.attention_heads = 2;
    config.model.conv_layers = 2;
    config.model.attention_layers = 1;
    config.model.symmetriser_width = 16;
    config.model.symmetriser_depth = 2;
    config.model.symmetrised_width = 16;
    config.model.head_layers = 1;
    config.model.head_attention_heads = 2;
    config.model.positional_max_dist = 3;
    config
}

/// Branched molecule with bonds, angles, a proper torsion and an improper
/// center, in a twisted non-degenerate geometry.
fn branched() -> (MoleculeGraph, Vec<[f64; 3]>) {
    let mol = MoleculeGraph::new(
        "branched",
        vec![
            Atom::new(6, 0.0),
            Atom::new(6, 0.1),
            Atom::new(7, -0.3),
            Atom::new(8, -0.2),
            Atom::new(1, 0.4),
        ],
        vec![(0, 1), (1, 2), (2, 3), (1, 4)],
    )
    .unwrap();
    let positions = vec![
        [0.12, 1.41, 0.23],
        [0.0, 0.05, -0.1],
        [1.23, -0.71, 0.15],
        [1.18, -2.02, 0.61],
        [-0.95, -0.42, 0.88],
    ];
    (mol, positions)
}

fn energy_at(
    params: &PredictedParams<B>,
    tuples: &TupleIndices,
    positions: &[[f64; 3]],
    n_atoms: usize,
) -> f64 {
    let device = cpu_device();
    let conf = Conformation {
        positions: positions.to_vec(),
        qm_energy: 0.0,
        qm_forces: vec![[0.0; 3]; n_atoms],
    };
    let coords = InternalCoords::compute(tuples, &conf);
    let geom = MolGeometry::<B>::pack(tuples, &[coords], n_atoms, &device);
    let out = energy_and_forces(params, &geom, &device);
    out.energies.into_data().to_vec::<f32>().expect("energy")[0] as f64
}

#[test]
fn forces_match_numerical_energy_gradient() {
    let device = cpu_device();
    let (mol, positions) = branched();
    let tuples = TupleIndices::enumerate(&mol);
    assert!(!tuples.propers.is_empty());
    assert!(!tuples.impropers.is_empty());

    let model = GraffModel::<B>::new(&small_config(), &device).unwrap();
    let params = model.forward(&mol, &tuples, Mode::Training, &device);

    let conf = Conformation {
        positions: positions.clone(),
        qm_energy: 0.0,
        qm_forces: vec![[0.0; 3]; mol.n_atoms()],
    };
    let coords = InternalCoords::compute(&tuples, &conf);
    let geom = MolGeometry::<B>::pack(&tuples, &[coords], mol.n_atoms(), &device);
    let out = energy_and_forces(&params, &geom, &device);
    let forces = out.forces.into_data().to_vec::<f32>().expect("forces");

    let h = 1e-3;
    for atom in 0..mol.n_atoms() {
        for dim in 0..3 {
            let mut plus = positions.clone();
            let mut minus = positions.clone();
            plus[atom][dim] += h;
            minus[atom][dim] -= h;
            let de = (energy_at(&params, &tuples, &plus, mol.n_atoms())
                - energy_at(&params, &tuples, &minus, mol.n_atoms()))
                / (2.0 * h);
            let force = forces[atom * 3 + dim] as f64;
            assert!(
                (force + de).abs() < 1e-2,
                "atom {atom} dim {dim}: force {force} vs -dE/dx {}",
                -de
            );
        }
    }
}

#[test]
fn total_force_is_zero() {
    // Bonded terms depend on relative geometry only, so the net force on
    // the molecule must vanish.
    let device = cpu_device();
    let (mol, positions) = branched();
    let tuples = TupleIndices::enumerate(&mol);
    let model = GraffModel::<B>::new(&small_config(), &device).unwrap();
    let params = model.forward(&mol, &tuples, Mode::Training, &device);

    let conf = Conformation {
        positions,
        qm_energy: 0.0,
        qm_forces: vec![[0.0; 3]; mol.n_atoms()],
    };
    let coords = InternalCoords::compute(&tuples, &conf);
    let geom = MolGeometry::<B>::pack(&tuples, &[coords], mol.n_atoms(), &device);
    let out = energy_and_forces(&params, &geom, &device);
    let forces = out.forces.into_data().to_vec::<f32>().expect("forces");
    for dim in 0..3 {
        let net: f32 = (0..mol.n_atoms()).map(|a| forces[a * 3 + dim]).sum();
        assert!(net.abs() < 1e-3, "net force along {dim}: {net}");
    }
}
