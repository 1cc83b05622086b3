//! Molecular graphs: atoms, covalent bonds and derived connectivity.
//!
//! A [`MoleculeGraph`] is the immutable input of the parameter predictor.
//! Construction validates the invariants the rest of the pipeline relies on:
//! at least two atoms, at least one bond, indices in range, no self-loops or
//! duplicate bonds, and a single connected fragment. Violations surface as
//! [`GraffError::DataIntegrity`] naming the molecule.

use serde::{Deserialize, Serialize};

use crate::error::{GraffError, Result};

/// Highest atomic number the element embedding table covers.
pub const MAX_ELEMENT: usize = 54;

/// Highest atom degree the degree embedding table covers.
pub const MAX_DEGREE: usize = 6;

/// Smallest ring size tracked by the ring-membership encoding.
pub const MIN_RING_SIZE: usize = 3;

/// Number of ring sizes tracked (sizes 3..=8).
pub const N_RING_SIZES: usize = 6;

/// Provenance of the partial charges attached to a molecule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargeModel {
    Am1Bcc,
    Amber99,
    Charmm,
    Other,
}

impl ChargeModel {
    /// Index into the charge-model embedding table.
    pub const fn index(self) -> usize {
        match self {
            ChargeModel::Am1Bcc => 0,
            ChargeModel::Amber99 => 1,
            ChargeModel::Charmm => 2,
            ChargeModel::Other => 3,
        }
    }

    /// Size of the charge-model vocabulary.
    pub const fn vocab_size() -> usize {
        4
    }
}

/// One atom of a molecular graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Atom {
    /// Atomic number (1 = H, 6 = C, ...).
    pub atomic_number: u8,
    /// Partial charge in elementary charge units.
    pub partial_charge: f32,
    /// Ring-membership flags for ring sizes 3..=8.
    pub ring_membership: [bool; N_RING_SIZES],
    /// Charge model that produced `partial_charge`.
    pub charge_model: ChargeModel,
}

impl Atom {
    /// Atom with no ring membership, for simple test molecules.
    pub fn new(atomic_number: u8, partial_charge: f32) -> Self {
        Self {
            atomic_number,
            partial_charge,
            ring_membership: [false; N_RING_SIZES],
            charge_model: ChargeModel::Am1Bcc,
        }
    }
}

/// A molecular graph: atoms plus undirected covalent bonds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoleculeGraph {
    id: String,
    atoms: Vec<Atom>,
    /// Bonds stored with the smaller index first.
    bonds: Vec<(usize, usize)>,
    /// Sorted neighbor lists, derived from `bonds`.
    adjacency: Vec<Vec<usize>>,
}

impl MoleculeGraph {
    /// Build a molecule graph, validating all structural invariants.
    pub fn new(
        id: impl Into<String>,
        atoms: Vec<Atom>,
        bonds: Vec<(usize, usize)>,
    ) -> Result<Self> {
        let id = id.into();
        let integrity = |reason: String| GraffError::DataIntegrity {
            molecule: id.clone(),
            reason,
        };

        if atoms.len() < 2 {
            return Err(integrity(format!(
                "molecule must have at least 2 atoms, found {}",
                atoms.len()
            )));
        }
        if bonds.is_empty() {
            return Err(integrity("molecule has no bonds".into()));
        }
        for atom in &atoms {
            let z = atom.atomic_number as usize;
            if z == 0 || z > MAX_ELEMENT {
                return Err(integrity(format!("atomic number {z} outside 1..={MAX_ELEMENT}")));
            }
        }

        let n = atoms.len();
        let mut seen = std::collections::HashSet::new();
        let mut canonical = Vec::with_capacity(bonds.len());
        for &(a, b) in &bonds {
            if a >= n || b >= n {
                return Err(integrity(format!("bond ({a}, {b}) out of range for {n} atoms")));
            }
            if a == b {
                return Err(integrity(format!("self-bond on atom {a}")));
            }
            let bond = (a.min(b), a.max(b));
            if !seen.insert(bond) {
                return Err(integrity(format!("duplicate bond ({}, {})", bond.0, bond.1)));
            }
            canonical.push(bond);
        }
        canonical.sort_unstable();

        let mut adjacency = vec![Vec::new(); n];
        for &(a, b) in &canonical {
            adjacency[a].push(b);
            adjacency[b].push(a);
        }
        for neighbors in &mut adjacency {
            neighbors.sort_unstable();
        }

        for (i, neighbors) in adjacency.iter().enumerate() {
            if neighbors.len() > MAX_DEGREE {
                return Err(integrity(format!(
                    "atom {i} has degree {} > {MAX_DEGREE}",
                    neighbors.len()
                )));
            }
        }

        let graph = Self {
            id,
            atoms,
            bonds: canonical,
            adjacency,
        };
        if !graph.is_connected() {
            return Err(GraffError::DataIntegrity {
                molecule: graph.id.clone(),
                reason: "molecule graph is disconnected".into(),
            });
        }
        Ok(graph)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn n_atoms(&self) -> usize {
        self.atoms.len()
    }

    pub fn atoms(&self) -> &[Atom] {
        &self.atoms
    }

    pub fn bonds(&self) -> &[(usize, usize)] {
        &self.bonds
    }

    /// Sorted neighbor indices of atom `i`.
    pub fn neighbors(&self, i: usize) -> &[usize] {
        &self.adjacency[i]
    }

    /// Degree of atom `i`.
    pub fn degree(&self, i: usize) -> usize {
        self.adjacency[i].len()
    }

    /// Number of atoms reachable from atom 0 within exactly `dist` bonds,
    /// for dist in 1..=max_dist, per atom. Used by the positional encoding.
    pub fn shell_counts(&self, max_dist: usize) -> Vec<Vec<usize>> {
        let n = self.n_atoms();
        let mut all = Vec::with_capacity(n);
        for start in 0..n {
            let mut dist = vec![usize::MAX; n];
            dist[start] = 0;
            let mut queue = std::collections::VecDeque::from([start]);
            while let Some(u) = queue.pop_front() {
                if dist[u] >= max_dist {
                    continue;
                }
                for &v in self.neighbors(u) {
                    if dist[v] == usize::MAX {
                        dist[v] = dist[u] + 1;
                        queue.push_back(v);
                    }
                }
            }
            let mut counts = vec![0usize; max_dist];
            for &d in &dist {
                if d >= 1 && d <= max_dist {
                    counts[d - 1] += 1;
                }
            }
            all.push(counts);
        }
        all
    }

    fn is_connected(&self) -> bool {
        let n = self.n_atoms();
        let mut visited = vec![false; n];
        let mut queue = std::collections::VecDeque::from([0usize]);
        visited[0] = true;
        let mut count = 1;
        while let Some(u) = queue.pop_front() {
            for &v in self.neighbors(u) {
                if !visited[v] {
                    visited[v] = true;
                    count += 1;
                    queue.push_back(v);
                }
            }
        }
        count == n
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn carbon() -> Atom {
        Atom::new(6, 0.0)
    }

    #[test]
    fn builds_connected_chain() {
        let mol = MoleculeGraph::new(
            "chain",
            vec![carbon(), carbon(), carbon()],
            vec![(1, 0), (1, 2)],
        )
        .unwrap();
        assert_eq!(mol.n_atoms(), 3);
        assert_eq!(mol.bonds(), &[(0, 1), (1, 2)]);
        assert_eq!(mol.neighbors(1), &[0, 2]);
        assert_eq!(mol.degree(1), 2);
    }

    #[test]
    fn rejects_disconnected() {
        let err = MoleculeGraph::new(
            "frag",
            vec![carbon(), carbon(), carbon(), carbon()],
            vec![(0, 1), (2, 3)],
        )
        .unwrap_err();
        assert!(matches!(err, GraffError::DataIntegrity { .. }));
        assert!(err.to_string().contains("frag"));
    }

    #[test]
    fn rejects_self_bond_and_duplicates() {
        assert!(MoleculeGraph::new("s", vec![carbon(), carbon()], vec![(0, 0)]).is_err());
        assert!(
            MoleculeGraph::new("d", vec![carbon(), carbon()], vec![(0, 1), (1, 0)]).is_err()
        );
    }

    #[test]
    fn rejects_too_few_atoms_or_no_bonds() {
        assert!(MoleculeGraph::new("one", vec![carbon()], vec![]).is_err());
        assert!(MoleculeGraph::new("nb", vec![carbon(), carbon()], vec![]).is_err());
    }

    #[test]
    fn shell_counts_chain() {
        let mol = MoleculeGraph::new(
            "chain4",
            vec![carbon(), carbon(), carbon(), carbon()],
            vec![(0, 1), (1, 2), (2, 3)],
        )
        .unwrap();
        let shells = mol.shell_counts(3);
        // terminal atom: 1 at distance 1, 1 at 2, 1 at 3
        assert_eq!(shells[0], vec![1, 1, 1]);
        // inner atom: 2 at distance 1, 1 at 2, 0 at 3
        assert_eq!(shells[1], vec![2, 1, 0]);
    }
}
