//! Atom feature encoding.
//!
//! Each atom of a molecule is mapped to a feature vector built from a
//! configurable set of attributes:
//!
//! - `atomic_number`: learned element embedding
//! - `partial_charge`: the raw charge as a single float
//! - `ring_membership`: six 0/1 flags for ring sizes 3..=8
//! - `degree`: learned embedding of the bond count
//! - `charge_model`: learned embedding of the charge provenance
//!
//! plus, optionally, a graph positional encoding: for each atom, the number
//! of atoms at bond distance 1..=`max_dist`. The concatenation is projected
//! to the encoder width by a single linear layer.

use burn::nn::{Embedding, EmbeddingConfig, Linear, LinearConfig};
use burn::prelude::*;

use graff_core::error::{GraffError, Result};
use graff_core::molecule::{ChargeModel, MoleculeGraph, MAX_DEGREE, MAX_ELEMENT, N_RING_SIZES};

/// Width of the element embedding.
pub const ELEMENT_EMBED_DIM: usize = 16;
/// Width of the degree embedding.
pub const DEGREE_EMBED_DIM: usize = 8;
/// Width of the charge-model embedding.
pub const CHARGE_MODEL_EMBED_DIM: usize = 4;

/// An atom attribute selectable in the model configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtomAttribute {
    AtomicNumber,
    PartialCharge,
    RingMembership,
    Degree,
    ChargeModel,
}

impl AtomAttribute {
    /// Parse a configuration name. Unknown names are a configuration error.
    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "atomic_number" => Ok(Self::AtomicNumber),
            "partial_charge" => Ok(Self::PartialCharge),
            "ring_membership" => Ok(Self::RingMembership),
            "degree" => Ok(Self::Degree),
            "charge_model" => Ok(Self::ChargeModel),
            other => Err(GraffError::Config(format!(
                "unknown atom attribute '{other}' (expected one of atomic_number, \
                 partial_charge, ring_membership, degree, charge_model)"
            ))),
        }
    }

    /// Width this attribute contributes to the concatenated feature vector.
    const fn width(self) -> usize {
        match self {
            Self::AtomicNumber => ELEMENT_EMBED_DIM,
            Self::PartialCharge => 1,
            Self::RingMembership => N_RING_SIZES,
            Self::Degree => DEGREE_EMBED_DIM,
            Self::ChargeModel => CHARGE_MODEL_EMBED_DIM,
        }
    }
}

/// Configuration of the [`FeatureEncoder`].
#[derive(Debug, Clone)]
pub struct FeatureEncoderConfig {
    pub attrs: Vec<AtomAttribute>,
    pub positional_encoding: bool,
    pub positional_max_dist: usize,
    pub feature_width: usize,
}

impl FeatureEncoderConfig {
    /// Parse attribute names from a model configuration.
    pub fn from_names(
        names: &[String],
        positional_encoding: bool,
        positional_max_dist: usize,
        feature_width: usize,
    ) -> Result<Self> {
        if names.is_empty() {
            return Err(GraffError::Config("atom_attrs must not be empty".into()));
        }
        let mut attrs = Vec::with_capacity(names.len());
        for name in names {
            let attr = AtomAttribute::parse(name)?;
            if attrs.contains(&attr) {
                return Err(GraffError::Config(format!("duplicate atom attribute '{name}'")));
            }
            attrs.push(attr);
        }
        Ok(Self {
            attrs,
            positional_encoding,
            positional_max_dist,
            feature_width,
        })
    }

    fn input_width(&self) -> usize {
        let attr_width: usize = self.attrs.iter().map(|a| a.width()).sum();
        let positional = if self.positional_encoding {
            self.positional_max_dist
        } else {
            0
        };
        attr_width + positional
    }

    /// Initialise the encoder on `device`.
    pub fn init<B: Backend>(&self, device: &B::Device) -> FeatureEncoder<B> {
        let embed = |present: bool, vocab: usize, dim: usize| {
            present.then(|| EmbeddingConfig::new(vocab, dim).init(device))
        };
        FeatureEncoder {
            element: embed(
                self.attrs.contains(&AtomAttribute::AtomicNumber),
                MAX_ELEMENT + 1,
                ELEMENT_EMBED_DIM,
            ),
            degree: embed(
                self.attrs.contains(&AtomAttribute::Degree),
                MAX_DEGREE + 1,
                DEGREE_EMBED_DIM,
            ),
            charge_model: embed(
                self.attrs.contains(&AtomAttribute::ChargeModel),
                ChargeModel::vocab_size(),
                CHARGE_MODEL_EMBED_DIM,
            ),
            use_charge: self.attrs.contains(&AtomAttribute::PartialCharge),
            use_ring: self.attrs.contains(&AtomAttribute::RingMembership),
            positional_max_dist: self.positional_encoding.then_some(self.positional_max_dist),
            project: LinearConfig::new(self.input_width(), self.feature_width).init(device),
        }
    }
}

/// Maps a molecule to per-atom feature vectors of the encoder width.
#[derive(Module, Debug)]
pub struct FeatureEncoder<B: Backend> {
    element: Option<Embedding<B>>,
    degree: Option<Embedding<B>>,
    charge_model: Option<Embedding<B>>,
    use_charge: bool,
    use_ring: bool,
    positional_max_dist: Option<usize>,
    project: Linear<B>,
}

impl<B: Backend> FeatureEncoder<B> {
    /// Encode every atom of `mol`. Output shape `[n_atoms, feature_width]`.
    pub fn forward(&self, mol: &MoleculeGraph, device: &B::Device) -> Tensor<B, 2> {
        let n = mol.n_atoms();
        let mut parts: Vec<Tensor<B, 2>> = Vec::new();

        if let Some(element) = &self.element {
            let ids: Vec<i32> = mol.atoms().iter().map(|a| a.atomic_number as i32).collect();
            parts.push(embed_lookup(element, &ids, device));
        }
        if self.use_charge {
            let charges: Vec<f32> = mol.atoms().iter().map(|a| a.partial_charge).collect();
            parts.push(Tensor::<B, 1>::from_floats(charges.as_slice(), device).reshape([n, 1]));
        }
        if self.use_ring {
            let mut flags = Vec::with_capacity(n * N_RING_SIZES);
            for atom in mol.atoms() {
                flags.extend(atom.ring_membership.iter().map(|&f| f as u8 as f32));
            }
            parts.push(
                Tensor::<B, 1>::from_floats(flags.as_slice(), device).reshape([n, N_RING_SIZES]),
            );
        }
        if let Some(degree) = &self.degree {
            let ids: Vec<i32> = (0..n).map(|i| mol.degree(i) as i32).collect();
            parts.push(embed_lookup(degree, &ids, device));
        }
        if let Some(charge_model) = &self.charge_model {
            let ids: Vec<i32> = mol
                .atoms()
                .iter()
                .map(|a| a.charge_model.index() as i32)
                .collect();
            parts.push(embed_lookup(charge_model, &ids, device));
        }
        if let Some(max_dist) = self.positional_max_dist {
            let shells = mol.shell_counts(max_dist);
            let mut flat = Vec::with_capacity(n * max_dist);
            for counts in &shells {
                flat.extend(counts.iter().map(|&c| c as f32));
            }
            parts.push(Tensor::<B, 1>::from_floats(flat.as_slice(), device).reshape([n, max_dist]));
        }

        self.project.forward(Tensor::cat(parts, 1))
    }
}

fn embed_lookup<B: Backend>(
    embedding: &Embedding<B>,
    ids: &[i32],
    device: &B::Device,
) -> Tensor<B, 2> {
    let n = ids.len();
    let idx = Tensor::<B, 1, Int>::from_ints(ids, device).reshape([1, n]);
    embedding.forward(idx).squeeze::<2>(0)
}
