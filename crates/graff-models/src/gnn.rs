//! Graph encoder: message passing followed by self-attention.
//!
//! The encoder runs a stack of graph-convolution layers over the
//! row-normalized adjacency matrix, then a stack of multi-head
//! self-attention layers treating the atoms as an unordered set. Attention
//! deliberately ignores the bond structure: by that point the convolutions
//! have baked the local topology into the node embeddings, and unrestricted
//! attention lets distant atoms exchange information in one hop.
//!
//! All layers preserve the feature width, so layer counts can be changed
//! freely in the configuration.

use burn::nn::attention::{MhaInput, MultiHeadAttention, MultiHeadAttentionConfig};
use burn::nn::{Dropout, DropoutConfig, LayerNorm, LayerNormConfig, Linear, LinearConfig};
use burn::prelude::*;
use burn::tensor::activation::relu;

use graff_core::error::Result;
use graff_core::molecule::MoleculeGraph;
use graff_core::GraffConfig;

use crate::features::{FeatureEncoder, FeatureEncoderConfig};

/// One message-passing layer: a learned mix of each node's own features and
/// the mean of its neighbours' features.
#[derive(Module, Debug)]
pub struct ConvLayer<B: Backend> {
    self_lin: Linear<B>,
    neigh_lin: Linear<B>,
    norm: Option<LayerNorm<B>>,
    dropout: Dropout,
}

impl<B: Backend> ConvLayer<B> {
    fn new(width: usize, layer_norm: bool, dropout: f32, device: &B::Device) -> Self {
        Self {
            self_lin: LinearConfig::new(width, width).init(device),
            neigh_lin: LinearConfig::new(width, width).init(device),
            norm: layer_norm.then(|| LayerNormConfig::new(width).init(device)),
            dropout: DropoutConfig::new(dropout as f64).init(),
        }
    }

    fn forward(&self, h: Tensor<B, 2>, adjacency: Tensor<B, 2>) -> Tensor<B, 2> {
        let neighbours = adjacency.matmul(h.clone());
        let mut out = relu(self.self_lin.forward(h) + self.neigh_lin.forward(neighbours));
        if let Some(norm) = &self.norm {
            out = norm.forward(out);
        }
        self.dropout.forward(out)
    }
}

/// One self-attention layer with a residual connection.
#[derive(Module, Debug)]
pub struct AttentionLayer<B: Backend> {
    mha: MultiHeadAttention<B>,
    norm: LayerNorm<B>,
    dropout: Dropout,
}

impl<B: Backend> AttentionLayer<B> {
    fn new(width: usize, heads: usize, dropout: f32, device: &B::Device) -> Self {
        Self {
            mha: MultiHeadAttentionConfig::new(width, heads)
                .with_dropout(dropout as f64)
                .init(device),
            norm: LayerNormConfig::new(width).init(device),
            dropout: DropoutConfig::new(dropout as f64).init(),
        }
    }

    fn forward(&self, h: Tensor<B, 2>) -> Tensor<B, 2> {
        let x = h.clone().unsqueeze::<3>();
        let attended = self.mha.forward(MhaInput::self_attn(x)).context.squeeze::<2>(0);
        self.dropout.forward(self.norm.forward(h + attended))
    }
}

/// The full graph encoder, from molecule to node embeddings.
#[derive(Module, Debug)]
pub struct GraphEncoder<B: Backend> {
    features: FeatureEncoder<B>,
    initial_dropout: Dropout,
    convs: Vec<ConvLayer<B>>,
    attentions: Vec<AttentionLayer<B>>,
    out: Linear<B>,
    final_dropout: Dropout,
    self_interaction: bool,
}

impl<B: Backend> GraphEncoder<B> {
    /// Build the encoder described by the model section of `config`.
    pub fn new(config: &GraffConfig, device: &B::Device) -> Result<Self> {
        let m = &config.model;
        let features = FeatureEncoderConfig::from_names(
            &m.atom_attrs,
            m.positional_encoding,
            m.positional_max_dist,
            m.feature_width,
        )?
        .init(device);
        let convs = (0..m.conv_layers)
            .map(|_| ConvLayer::new(m.feature_width, m.layer_norm, m.conv_dropout, device))
            .collect();
        let attentions = (0..m.attention_layers)
            .map(|_| {
                AttentionLayer::new(m.feature_width, m.attention_heads, m.attention_dropout, device)
            })
            .collect();
        Ok(Self {
            features,
            initial_dropout: DropoutConfig::new(m.initial_dropout as f64).init(),
            convs,
            attentions,
            out: LinearConfig::new(m.feature_width, m.feature_width).init(device),
            final_dropout: DropoutConfig::new(m.final_dropout as f64).init(),
            self_interaction: m.self_interaction,
        })
    }

    /// Encode `mol` into node embeddings of shape `[n_atoms, feature_width]`.
    pub fn forward(&self, mol: &MoleculeGraph, device: &B::Device) -> Tensor<B, 2> {
        let adjacency = normalized_adjacency::<B>(mol, self.self_interaction, device);
        let mut h = self.initial_dropout.forward(self.features.forward(mol, device));
        for conv in &self.convs {
            h = conv.forward(h, adjacency.clone());
        }
        for attention in &self.attentions {
            h = attention.forward(h);
        }
        self.final_dropout.forward(self.out.forward(h))
    }
}

/// Dense row-normalized adjacency matrix, optionally with self-loops.
fn normalized_adjacency<B: Backend>(
    mol: &MoleculeGraph,
    self_loops: bool,
    device: &B::Device,
) -> Tensor<B, 2> {
    let n = mol.n_atoms();
    let mut rows = vec![0.0f32; n * n];
    for i in 0..n {
        let mut degree = mol.degree(i);
        if self_loops {
            degree += 1;
        }
        let weight = 1.0 / degree as f32;
        for &j in mol.neighbors(i) {
            rows[i * n + j] = weight;
        }
        if self_loops {
            rows[i * n + i] = weight;
        }
    }
    Tensor::<B, 1>::from_floats(rows.as_slice(), device).reshape([n, n])
}

#[cfg(test)]
mod tests {
    use super::*;
    use graff_core::backend::{cpu_device, CpuBackend};
    use graff_core::molecule::Atom;

    fn chain() -> MoleculeGraph {
        MoleculeGraph::new(
            "chain",
            vec![Atom::new(6, 0.0), Atom::new(6, 0.1), Atom::new(7, -0.2)],
            vec![(0, 1), (1, 2)],
        )
        .unwrap()
    }

    #[test]
    fn adjacency_rows_sum_to_one() {
        let device = cpu_device();
        let adj = normalized_adjacency::<CpuBackend>(&chain(), true, &device);
        let sums = adj.sum_dim(1).into_data().to_vec::<f32>().expect("row sums");
        for s in sums {
            assert!((s - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn encoder_output_shape() {
        let device = cpu_device();
        let mut config = GraffConfig::default();
        config.model.feature_width = 32;
        config.model.attention_heads = 4;
        config.model.conv_layers = 2;
        config.model.attention_layers = 1;
        let encoder = GraphEncoder::<CpuBackend>::new(&config, &device).unwrap();
        let h = encoder.forward(&chain(), &device);
        assert_eq!(h.dims(), [3, 32]);
    }

    #[test]
    fn encoder_is_deterministic_on_cpu() {
        let device = cpu_device();
        let mut config = GraffConfig::default();
        config.model.feature_width = 16;
        config.model.attention_heads = 2;
        config.model.conv_dropout = 0.2;
        let encoder = GraphEncoder::<CpuBackend>::new(&config, &device).unwrap();
        let mol = chain();
        let a = encoder.forward(&mol, &device).into_data().to_vec::<f32>().expect("first pass");
        let b = encoder.forward(&mol, &device).into_data().to_vec::<f32>().expect("second pass");
        assert_eq!(a, b);
    }
}
