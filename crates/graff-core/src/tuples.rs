//! Bonded interaction tuples and their symmetry groups.
//!
//! Tuple enumeration is pure and deterministic given the bond graph, so the
//! result is derived once per molecule and cached alongside it.
//!
//! The symmetry group of each term type is written out as an explicit
//! permutation table rather than derived from a generic group routine: the
//! symmetriser's exactness depends entirely on these tables being complete,
//! so they are constants with closure unit tests. Adding a new term type
//! means adding (and separately verifying) a new table.
//!
//! Conventions:
//! - bonds `(i, j)` with `i < j`, invariant under reversal;
//! - angles `(i, j, k)` with the central atom at index 1 and `i < k`,
//!   invariant under reversal;
//! - proper torsions `(i, j, k, l)` chained around the bond `(j, k)`,
//!   invariant under reversal of the chain, canonicalized to the
//!   lexicographically smaller of the two directions;
//! - improper torsions `(o1, o2, c, o3)` with the central atom fixed at
//!   index 2 and the outer atoms sorted ascending, invariant under all six
//!   permutations of the outer atoms.

use serde::{Deserialize, Serialize};

use crate::molecule::MoleculeGraph;

/// The four bonded term types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TermType {
    Bond,
    Angle,
    Proper,
    Improper,
}

impl TermType {
    /// Number of atoms in a tuple of this term type.
    pub const fn arity(self) -> usize {
        match self {
            TermType::Bond => 2,
            TermType::Angle => 3,
            TermType::Proper | TermType::Improper => 4,
        }
    }

    /// The symmetry group of this term as index permutations. Applying any
    /// of these to a tuple must leave the predicted parameters unchanged.
    pub fn permutations(self) -> &'static [&'static [usize]] {
        match self {
            TermType::Bond => BOND_PERMUTATIONS,
            TermType::Angle => ANGLE_PERMUTATIONS,
            TermType::Proper => PROPER_PERMUTATIONS,
            TermType::Improper => IMPROPER_PERMUTATIONS,
        }
    }
}

/// Bond symmetry: identity and reversal.
pub const BOND_PERMUTATIONS: &[&[usize]] = &[&[0, 1], &[1, 0]];

/// Angle symmetry: identity and reversal around the central atom.
pub const ANGLE_PERMUTATIONS: &[&[usize]] = &[&[0, 1, 2], &[2, 1, 0]];

/// Proper torsion symmetry: identity and reversal of the 4-chain.
pub const PROPER_PERMUTATIONS: &[&[usize]] = &[&[0, 1, 2, 3], &[3, 2, 1, 0]];

/// Improper torsion symmetry: all six permutations of the outer atoms
/// (positions 0, 1, 3) with the central atom fixed at position 2.
pub const IMPROPER_PERMUTATIONS: &[&[usize]] = &[
    &[0, 1, 2, 3],
    &[0, 3, 2, 1],
    &[1, 0, 2, 3],
    &[1, 3, 2, 0],
    &[3, 0, 2, 1],
    &[3, 1, 2, 0],
];

/// Exhaustive enumeration of the bonded tuples of one molecule.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TupleIndices {
    pub bonds: Vec<[usize; 2]>,
    pub angles: Vec<[usize; 3]>,
    pub propers: Vec<[usize; 4]>,
    pub impropers: Vec<[usize; 4]>,
}

impl TupleIndices {
    /// Enumerate all bonded tuples of `mol`.
    pub fn enumerate(mol: &MoleculeGraph) -> Self {
        Self {
            bonds: enumerate_bonds(mol),
            angles: enumerate_angles(mol),
            propers: enumerate_propers(mol),
            impropers: enumerate_impropers(mol),
        }
    }

    /// Number of tuples of the given term type.
    pub fn count(&self, term: TermType) -> usize {
        match term {
            TermType::Bond => self.bonds.len(),
            TermType::Angle => self.angles.len(),
            TermType::Proper => self.propers.len(),
            TermType::Improper => self.impropers.len(),
        }
    }
}

fn enumerate_bonds(mol: &MoleculeGraph) -> Vec<[usize; 2]> {
    mol.bonds().iter().map(|&(a, b)| [a, b]).collect()
}

fn enumerate_angles(mol: &MoleculeGraph) -> Vec<[usize; 3]> {
    let mut angles = Vec::new();
    for j in 0..mol.n_atoms() {
        let neighbors = mol.neighbors(j);
        for (a, &i) in neighbors.iter().enumerate() {
            for &k in &neighbors[a + 1..] {
                angles.push([i, j, k]);
            }
        }
    }
    angles
}

fn enumerate_propers(mol: &MoleculeGraph) -> Vec<[usize; 4]> {
    let mut propers = Vec::new();
    for &(j, k) in mol.bonds() {
        for &i in mol.neighbors(j) {
            if i == k {
                continue;
            }
            for &l in mol.neighbors(k) {
                if l == j || l == i {
                    continue;
                }
                let forward = [i, j, k, l];
                let reverse = [l, k, j, i];
                // Keep the lexicographically smaller direction; since each
                // central bond is visited once, this also deduplicates.
                propers.push(if forward <= reverse { forward } else { reverse });
            }
        }
    }
    propers.sort_unstable();
    propers.dedup();
    propers
}

fn enumerate_impropers(mol: &MoleculeGraph) -> Vec<[usize; 4]> {
    let mut impropers = Vec::new();
    for c in 0..mol.n_atoms() {
        let neighbors = mol.neighbors(c);
        if neighbors.len() < 3 {
            continue;
        }
        for a in 0..neighbors.len() {
            for b in a + 1..neighbors.len() {
                for d in b + 1..neighbors.len() {
                    // Outer atoms ascending (neighbor lists are sorted),
                    // center at index 2.
                    impropers.push([neighbors[a], neighbors[b], c, neighbors[d]]);
                }
            }
        }
    }
    impropers
}

/// Apply an index permutation to a tuple.
pub fn permute<const K: usize>(tuple: &[usize; K], perm: &[usize]) -> [usize; K] {
    let mut out = [0usize; K];
    for (slot, &p) in out.iter_mut().zip(perm.iter()) {
        *slot = tuple[p];
    }
    out
}
