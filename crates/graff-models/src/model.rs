//! The full parameter predictor.
//!
//! [`GraffModel`] wires the graph encoder, one symmetriser per term type and
//! the parameter heads into a single module: molecule in, force-field
//! parameters out. Prediction is per molecule; conformations play no role
//! here, so the parameters can be computed once and reused against every
//! geometry of the molecule.
//!
//! # Example
//!
//! ```rust,ignore
//! let model = GraffModel::<CpuBackend>::new(&config, &device)?;
//! let tuples = TupleIndices::enumerate(&mol);
//! let params = model.forward(&mol, &tuples, Mode::Inference, &device);
//! ```

use burn::prelude::*;

use graff_core::error::Result;
use graff_core::molecule::MoleculeGraph;
use graff_core::tuples::{TermType, TupleIndices};
use graff_core::GraffConfig;

use crate::gnn::GraphEncoder;
use crate::heads::{AngleHead, AngleParams, BondHead, BondParams, TorsionHead};
use crate::symmetriser::{TupleSymmetriser, TupleSymmetriserConfig};

/// Whether torsion amplitudes get the hard sparsity cutoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// No cutoff, so the loss stays differentiable everywhere.
    Training,
    /// Cutoff applied, so negligible torsion terms vanish exactly.
    Inference,
}

/// Predicted force-field parameters for one molecule.
///
/// Term types with no tuples in the molecule are `None`; bonds are always
/// present because a valid molecule has at least one bond.
#[derive(Debug, Clone)]
pub struct PredictedParams<B: Backend> {
    pub bonds: BondParams<B>,
    pub angles: Option<AngleParams<B>>,
    /// Proper torsion amplitudes, `[n_propers, proper_periodicity]`.
    pub propers: Option<Tensor<B, 2>>,
    /// Improper torsion amplitudes, `[n_impropers, improper_periodicity]`.
    pub impropers: Option<Tensor<B, 2>>,
}

/// Molecule graph to force-field parameters.
#[derive(Module, Debug)]
pub struct GraffModel<B: Backend> {
    encoder: GraphEncoder<B>,
    bond_symmetriser: TupleSymmetriser<B>,
    angle_symmetriser: TupleSymmetriser<B>,
    proper_symmetriser: TupleSymmetriser<B>,
    improper_symmetriser: TupleSymmetriser<B>,
    bond_head: BondHead<B>,
    angle_head: AngleHead<B>,
    proper_head: TorsionHead<B>,
    improper_head: TorsionHead<B>,
}

impl<B: Backend> GraffModel<B> {
    /// Build the model described by `config`. Fails on invalid attribute
    /// names; numeric ranges are assumed already validated.
    pub fn new(config: &GraffConfig, device: &B::Device) -> Result<Self> {
        let m = &config.model;
        tracing::debug!(
            feature_width = m.feature_width,
            conv_layers = m.conv_layers,
            attention_layers = m.attention_layers,
            head_layers = m.head_layers,
            "building parameter predictor"
        );
        let symmetriser = |term| {
            TupleSymmetriserConfig::new(term, m.feature_width)
                .with_hidden_width(m.symmetriser_width)
                .with_depth(m.symmetriser_depth)
                .with_out_width(m.symmetrised_width)
                .init(device)
        };
        Ok(Self {
            encoder: GraphEncoder::new(config, device)?,
            bond_symmetriser: symmetriser(TermType::Bond),
            angle_symmetriser: symmetriser(TermType::Angle),
            proper_symmetriser: symmetriser(TermType::Proper),
            improper_symmetriser: symmetriser(TermType::Improper),
            bond_head: BondHead::new(
                m.symmetrised_width,
                m.head_layers,
                m.head_attention_heads,
                device,
            ),
            angle_head: AngleHead::new(
                m.symmetrised_width,
                m.head_layers,
                m.head_attention_heads,
                device,
            ),
            proper_head: TorsionHead::new(
                m.symmetrised_width,
                m.head_layers,
                m.head_attention_heads,
                m.proper_periodicity,
                m.torsion_gated,
                m.torsion_cutoff,
                device,
            ),
            improper_head: TorsionHead::new(
                m.symmetrised_width,
                m.head_layers,
                m.head_attention_heads,
                m.improper_periodicity,
                m.torsion_gated,
                m.torsion_cutoff,
                device,
            ),
        })
    }

    /// Predict the parameters of every tuple in `tuples`.
    pub fn forward(
        &self,
        mol: &MoleculeGraph,
        tuples: &TupleIndices,
        mode: Mode,
        device: &B::Device,
    ) -> PredictedParams<B> {
        let nodes = self.encoder.forward(mol, device);
        let cutoff = mode == Mode::Inference;

        let bonds = {
            let flat = flatten(&tuples.bonds);
            let embedded = self.bond_symmetriser.forward(nodes.clone(), &flat, device);
            self.bond_head.forward(embedded)
        };
        let angles = (!tuples.angles.is_empty()).then(|| {
            let flat = flatten(&tuples.angles);
            let embedded = self.angle_symmetriser.forward(nodes.clone(), &flat, device);
            self.angle_head.forward(embedded)
        });
        let propers = (!tuples.propers.is_empty()).then(|| {
            let flat = flatten(&tuples.propers);
            let embedded = self.proper_symmetriser.forward(nodes.clone(), &flat, device);
            self.proper_head.forward(embedded, cutoff)
        });
        let impropers = (!tuples.impropers.is_empty()).then(|| {
            let flat = flatten(&tuples.impropers);
            let embedded = self
                .improper_symmetriser
                .forward(nodes.clone(), &flat, device);
            self.improper_head.forward(embedded, cutoff)
        });

        PredictedParams {
            bonds,
            angles,
            propers,
            impropers,
        }
    }
}

fn flatten<const K: usize>(tuples: &[[usize; K]]) -> Vec<usize> {
    tuples.iter().flat_map(|t| t.iter().copied()).collect()
}
