//! Conformations and cached internal coordinates.
//!
//! A [`Conformation`] is one 3-D geometry of a molecule together with its QM
//! reference energy and forces. [`InternalCoords`] holds the internal
//! coordinates of every bonded tuple of that geometry, each paired with its
//! analytic Cartesian gradient. These are computed once per conformation and
//! reused across epochs; the classical evaluator treats them as constants and
//! only differentiates with respect to the force-field parameters.

use serde::{Deserialize, Serialize};

use crate::error::{GraffError, Result};
use crate::geometry::{angle_with_grad, bond_length_with_grad, dihedral_with_grad};
use crate::molecule::MoleculeGraph;
use crate::tuples::TupleIndices;

/// One geometry of a molecule with its QM reference data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conformation {
    /// Cartesian positions in Angstrom, one per atom.
    pub positions: Vec<[f64; 3]>,
    /// QM reference energy in kcal/mol. The absolute offset is arbitrary;
    /// the loss only compares energies after per-molecule centering.
    pub qm_energy: f64,
    /// QM reference forces in kcal/mol/Angstrom, one per atom.
    pub qm_forces: Vec<[f64; 3]>,
}

impl Conformation {
    /// Validate shapes and finiteness against the owning molecule.
    pub fn validate(&self, mol: &MoleculeGraph) -> Result<()> {
        let integrity = |reason: String| GraffError::DataIntegrity {
            molecule: mol.id().to_string(),
            reason,
        };
        if self.positions.len() != mol.n_atoms() {
            return Err(integrity(format!(
                "conformation has {} positions for {} atoms",
                self.positions.len(),
                mol.n_atoms()
            )));
        }
        if self.qm_forces.len() != mol.n_atoms() {
            return Err(integrity(format!(
                "conformation has {} force rows for {} atoms",
                self.qm_forces.len(),
                mol.n_atoms()
            )));
        }
        if !self.qm_energy.is_finite() {
            return Err(integrity("non-finite QM energy".into()));
        }
        let finite3 = |rows: &[[f64; 3]]| rows.iter().all(|r| r.iter().all(|v| v.is_finite()));
        if !finite3(&self.positions) {
            return Err(integrity("non-finite position".into()));
        }
        if !finite3(&self.qm_forces) {
            return Err(integrity("non-finite QM force".into()));
        }
        Ok(())
    }
}

/// Internal coordinates of one conformation, with Cartesian gradients.
///
/// For a term type with `t` tuples of `k` atoms, `grads` stores `t * k`
/// rows of `[f64; 3]` in tuple-major order: the gradient of tuple `i`'s
/// coordinate with respect to its `p`-th atom sits at `i * k + p`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InternalTerm {
    pub values: Vec<f64>,
    pub grads: Vec<[f64; 3]>,
}

/// All internal coordinates of one conformation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InternalCoords {
    /// Bond lengths in Angstrom.
    pub bonds: InternalTerm,
    /// Angles in radians.
    pub angles: InternalTerm,
    /// Proper torsion dihedrals in radians.
    pub propers: InternalTerm,
    /// Improper torsion dihedrals in radians, over the stored atom order.
    pub impropers: InternalTerm,
}

impl InternalCoords {
    /// Compute every internal coordinate of `conf` for the tuples in `tuples`.
    pub fn compute(tuples: &TupleIndices, conf: &Conformation) -> Self {
        let x = &conf.positions;

        let mut bonds = InternalTerm::default();
        for &[i, j] in &tuples.bonds {
            let (r, g) = bond_length_with_grad(x[i], x[j]);
            bonds.values.push(r);
            bonds.grads.extend_from_slice(&g);
        }

        let mut angles = InternalTerm::default();
        for &[i, j, k] in &tuples.angles {
            let (theta, g) = angle_with_grad(x[i], x[j], x[k]);
            angles.values.push(theta);
            angles.grads.extend_from_slice(&g);
        }

        let mut propers = InternalTerm::default();
        for &[i, j, k, l] in &tuples.propers {
            let (phi, g) = dihedral_with_grad(x[i], x[j], x[k], x[l]);
            propers.values.push(phi);
            propers.grads.extend_from_slice(&g);
        }

        let mut impropers = InternalTerm::default();
        for &[i, j, c, l] in &tuples.impropers {
            // Impropers are evaluated as the dihedral of the stored order,
            // central atom third.
            let (phi, g) = dihedral_with_grad(x[i], x[j], x[c], x[l]);
            impropers.values.push(phi);
            impropers.grads.extend_from_slice(&g);
        }

        Self {
            bonds,
            angles,
            propers,
            impropers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::molecule::Atom;

    fn water() -> (MoleculeGraph, Conformation) {
        let mol = MoleculeGraph::new(
            "water",
            vec![Atom::new(1, 0.4), Atom::new(8, -0.8), Atom::new(1, 0.4)],
            vec![(0, 1), (1, 2)],
        )
        .unwrap();
        let conf = Conformation {
            positions: vec![[0.96, 0.0, 0.0], [0.0, 0.0, 0.0], [-0.24, 0.93, 0.0]],
            qm_energy: -76.4,
            qm_forces: vec![[0.0; 3]; 3],
        };
        (mol, conf)
    }

    #[test]
    fn validates_shapes() {
        let (mol, mut conf) = water();
        conf.validate(&mol).unwrap();
        conf.positions.pop();
        assert!(conf.validate(&mol).is_err());
    }

    #[test]
    fn rejects_non_finite() {
        let (mol, mut conf) = water();
        conf.qm_forces[1][0] = f64::NAN;
        assert!(conf.validate(&mol).is_err());
    }

    #[test]
    fn computes_internal_coords() {
        let (mol, conf) = water();
        let tuples = TupleIndices::enumerate(&mol);
        let ic = InternalCoords::compute(&tuples, &conf);
        assert_eq!(ic.bonds.values.len(), 2);
        assert!((ic.bonds.values[0] - 0.96).abs() < 1e-12);
        assert_eq!(ic.angles.values.len(), 1);
        assert_eq!(ic.bonds.grads.len(), 4);
        assert_eq!(ic.angles.grads.len(), 3);
        assert!(ic.propers.values.is_empty());
    }
}
