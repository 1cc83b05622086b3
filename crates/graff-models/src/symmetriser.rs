//! Permutation-invariant tuple embeddings.
//!
//! Given node embeddings and a list of interaction tuples, the symmetriser
//! produces one embedding per tuple that is exactly invariant under the
//! symmetry group of the term type: the tuple's node embeddings are
//! concatenated in each symmetry-equivalent order, passed through a shared
//! MLP, and averaged over the orbit. Invariance is structural, not learned,
//! so it holds for any parameter values.

use burn::module::Ignored;
use burn::nn::{Linear, LinearConfig};
use burn::prelude::*;
use burn::tensor::activation::relu;

use graff_core::tuples::TermType;

/// Configuration of a [`TupleSymmetriser`].
#[derive(Debug, Clone)]
pub struct TupleSymmetriserConfig {
    pub term: TermType,
    pub node_width: usize,
    pub hidden_width: usize,
    pub depth: usize,
    pub out_width: usize,
}

impl TupleSymmetriserConfig {
    pub const fn new(term: TermType, node_width: usize) -> Self {
        Self {
            term,
            node_width,
            hidden_width: 256,
            depth: 3,
            out_width: 256,
        }
    }

    pub const fn with_hidden_width(mut self, hidden_width: usize) -> Self {
        self.hidden_width = hidden_width;
        self
    }

    pub const fn with_depth(mut self, depth: usize) -> Self {
        self.depth = depth;
        self
    }

    pub const fn with_out_width(mut self, out_width: usize) -> Self {
        self.out_width = out_width;
        self
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> TupleSymmetriser<B> {
        let arity = self.term.arity();
        let mut layers = vec![LinearConfig::new(arity * self.node_width, self.hidden_width).init(device)];
        for _ in 1..self.depth {
            layers.push(LinearConfig::new(self.hidden_width, self.hidden_width).init(device));
        }
        layers.push(LinearConfig::new(self.hidden_width, self.out_width).init(device));
        TupleSymmetriser {
            layers,
            term: Ignored(self.term),
        }
    }
}

/// Symmetry-pooled MLP over tuple node embeddings.
#[derive(Module, Debug)]
pub struct TupleSymmetriser<B: Backend> {
    layers: Vec<Linear<B>>,
    term: Ignored<TermType>,
}

impl<B: Backend> TupleSymmetriser<B> {
    /// Embed each tuple. `tuples_flat` is the concatenation of the tuple
    /// atom indices, `arity` entries per tuple, and must be non-empty.
    /// Output shape `[n_tuples, out_width]`.
    pub fn forward(
        &self,
        nodes: Tensor<B, 2>,
        tuples_flat: &[usize],
        device: &B::Device,
    ) -> Tensor<B, 2> {
        let arity = self.term.0.arity();
        debug_assert!(!tuples_flat.is_empty() && tuples_flat.len() % arity == 0);
        let t = tuples_flat.len() / arity;
        let d = nodes.dims()[1];

        let idx: Vec<i32> = tuples_flat.iter().map(|&i| i as i32).collect();
        let idx = Tensor::<B, 1, Int>::from_ints(idx.as_slice(), device);
        // [t, arity, d]
        let gathered = nodes.select(0, idx).reshape([t, arity, d]);

        let perms = self.term.0.permutations();
        let mut pooled: Option<Tensor<B, 2>> = None;
        for perm in perms {
            let perm_idx: Vec<i32> = perm.iter().map(|&p| p as i32).collect();
            let perm_idx = Tensor::<B, 1, Int>::from_ints(perm_idx.as_slice(), device);
            let ordered = gathered.clone().select(1, perm_idx).reshape([t, arity * d]);
            let embedded = self.mlp(ordered);
            pooled = Some(match pooled {
                Some(acc) => acc + embedded,
                None => embedded,
            });
        }
        pooled.unwrap_or_else(|| unreachable!("symmetry tables are non-empty"))
            / perms.len() as f32
    }

    fn mlp(&self, mut x: Tensor<B, 2>) -> Tensor<B, 2> {
        let last = self.layers.len() - 1;
        for (i, layer) in self.layers.iter().enumerate() {
            x = layer.forward(x);
            if i < last {
                x = relu(x);
            }
        }
        x
    }
}
