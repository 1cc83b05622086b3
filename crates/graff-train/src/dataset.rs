//! In-memory dataset store.
//!
//! A [`Dataset`] is a named, immutable collection of [`MolRecord`]s. Each
//! record caches everything derivable from its molecule and geometries at
//! construction time: the tuple enumeration and, per conformation, the
//! internal coordinates with their Cartesian gradients. Epoch iteration
//! then only packs cached host data into tensors.

use burn::prelude::*;

use graff_core::conformation::{Conformation, InternalCoords};
use graff_core::error::{GraffError, Result};
use graff_core::molecule::MoleculeGraph;
use graff_core::tuples::TupleIndices;
use graff_models::MolGeometry;

/// Classical reference parameters for one molecule, in tuple-enumeration
/// order. Improper torsions carry no references; the original force fields
/// these come from treat them too inconsistently to supervise against.
#[derive(Debug, Clone, Default)]
pub struct ClassicalParams {
    pub bond_k: Vec<f32>,
    pub bond_r0: Vec<f32>,
    pub angle_k: Vec<f32>,
    pub angle_theta0: Vec<f32>,
    /// Proper torsion amplitudes, flattened `[n_propers * periodicity]`.
    pub proper_amps: Vec<f32>,
    pub proper_periodicity: usize,
}

impl ClassicalParams {
    fn validate(&self, id: &str, tuples: &TupleIndices) -> Result<()> {
        let integrity = |reason: String| GraffError::DataIntegrity {
            molecule: id.to_string(),
            reason,
        };
        if self.bond_k.len() != tuples.bonds.len() || self.bond_r0.len() != tuples.bonds.len() {
            return Err(integrity(format!(
                "classical bond parameters cover {} bonds, molecule has {}",
                self.bond_k.len(),
                tuples.bonds.len()
            )));
        }
        if self.angle_k.len() != tuples.angles.len()
            || self.angle_theta0.len() != tuples.angles.len()
        {
            return Err(integrity(format!(
                "classical angle parameters cover {} angles, molecule has {}",
                self.angle_k.len(),
                tuples.angles.len()
            )));
        }
        let expected = tuples.propers.len() * self.proper_periodicity;
        if self.proper_amps.len() != expected {
            return Err(integrity(format!(
                "classical proper amplitudes have {} entries, expected {expected}",
                self.proper_amps.len()
            )));
        }
        Ok(())
    }
}

/// One molecule with its conformations and cached derived data.
#[derive(Debug, Clone)]
pub struct MolRecord {
    mol: MoleculeGraph,
    tuples: TupleIndices,
    conformations: Vec<Conformation>,
    coords: Vec<InternalCoords>,
    classical: Option<ClassicalParams>,
}

impl MolRecord {
    pub fn new(
        mol: MoleculeGraph,
        conformations: Vec<Conformation>,
        classical: Option<ClassicalParams>,
    ) -> Result<Self> {
        if conformations.is_empty() {
            return Err(GraffError::DataIntegrity {
                molecule: mol.id().to_string(),
                reason: "record has no conformations".into(),
            });
        }
        let tuples = TupleIndices::enumerate(&mol);
        let mut coords = Vec::with_capacity(conformations.len());
        for conf in &conformations {
            conf.validate(&mol)?;
            coords.push(InternalCoords::compute(&tuples, conf));
        }
        if let Some(classical) = &classical {
            classical.validate(mol.id(), &tuples)?;
        }
        Ok(Self {
            mol,
            tuples,
            conformations,
            coords,
            classical,
        })
    }

    pub fn mol(&self) -> &MoleculeGraph {
        &self.mol
    }

    pub fn tuples(&self) -> &TupleIndices {
        &self.tuples
    }

    pub fn n_conformations(&self) -> usize {
        self.conformations.len()
    }

    pub fn classical(&self) -> Option<&ClassicalParams> {
        self.classical.as_ref()
    }

    /// Pack the geometry of the selected conformations into tensors.
    pub fn geometry<B: Backend>(&self, conf_idx: &[usize], device: &B::Device) -> MolGeometry<B> {
        let coords: Vec<InternalCoords> =
            conf_idx.iter().map(|&i| self.coords[i].clone()).collect();
        MolGeometry::pack(&self.tuples, &coords, self.mol.n_atoms(), device)
    }

    /// QM reference energies `[c]` and forces `[c, n_atoms, 3]` for the
    /// selected conformations.
    pub fn qm_references<B: Backend>(
        &self,
        conf_idx: &[usize],
        device: &B::Device,
    ) -> (Tensor<B, 1>, Tensor<B, 3>) {
        let c = conf_idx.len();
        let n = self.mol.n_atoms();
        let mut energies = Vec::with_capacity(c);
        let mut forces = Vec::with_capacity(c * n * 3);
        for &i in conf_idx {
            let conf = &self.conformations[i];
            energies.push(conf.qm_energy as f32);
            for row in &conf.qm_forces {
                forces.extend(row.iter().map(|&f| f as f32));
            }
        }
        (
            Tensor::<B, 1>::from_floats(energies.as_slice(), device),
            Tensor::<B, 1>::from_floats(forces.as_slice(), device).reshape([c, n, 3]),
        )
    }
}

/// A named, immutable collection of molecule records.
#[derive(Debug, Clone)]
pub struct Dataset {
    name: String,
    records: Vec<MolRecord>,
}

impl Dataset {
    pub fn new(name: impl Into<String>, records: Vec<MolRecord>) -> Result<Self> {
        let name = name.into();
        if records.is_empty() {
            return Err(GraffError::Config(format!("dataset '{name}' is empty")));
        }
        Ok(Self { name, records })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn n_molecules(&self) -> usize {
        self.records.len()
    }

    pub fn record(&self, i: usize) -> &MolRecord {
        &self.records[i]
    }

    /// Total conformation count, the dataset's size for loss balancing.
    pub fn n_conformations(&self) -> usize {
        self.records.iter().map(|r| r.n_conformations()).sum()
    }

    /// Mean conformations per molecule, rounded, at least one.
    pub fn mean_conf_count(&self) -> usize {
        let mean = self.n_conformations() as f64 / self.n_molecules() as f64;
        (mean.round() as usize).max(1)
    }
}
