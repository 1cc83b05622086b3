//! Parameter heads.
//!
//! Each term type has its own head: a small transformer over the set of
//! symmetrised tuple embeddings of one molecule, followed by a linear
//! projection to the physical parameters. Attention here lets tuples of the
//! same molecule coordinate their parameters; the projection then applies
//! the positivity and range constraints of each parameter:
//!
//! - bond: `k = softplus`, `r0 = softplus`
//! - angle: `k = softplus`, `θ0 = π · sigmoid`
//! - torsion: unconstrained cosine amplitudes, optionally gated by a learned
//!   sigmoid, with small amplitudes hard-zeroed at inference

use burn::nn::attention::{MhaInput, MultiHeadAttention, MultiHeadAttentionConfig};
use burn::nn::{LayerNorm, LayerNormConfig, Linear, LinearConfig};
use burn::prelude::*;
use burn::tensor::activation::{relu, sigmoid, softplus};

/// One pre-projection transformer block.
#[derive(Module, Debug)]
struct HeadBlock<B: Backend> {
    mha: MultiHeadAttention<B>,
    norm_attn: LayerNorm<B>,
    ff_in: Linear<B>,
    ff_out: Linear<B>,
    norm_ff: LayerNorm<B>,
}

impl<B: Backend> HeadBlock<B> {
    fn new(width: usize, heads: usize, device: &B::Device) -> Self {
        Self {
            mha: MultiHeadAttentionConfig::new(width, heads).init(device),
            norm_attn: LayerNormConfig::new(width).init(device),
            ff_in: LinearConfig::new(width, 2 * width).init(device),
            ff_out: LinearConfig::new(2 * width, width).init(device),
            norm_ff: LayerNormConfig::new(width).init(device),
        }
    }

    fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        let attended = self
            .mha
            .forward(MhaInput::self_attn(x.clone().unsqueeze::<3>()))
            .context
            .squeeze::<2>(0);
        let x = self.norm_attn.forward(x + attended);
        let ff = self.ff_out.forward(relu(self.ff_in.forward(x.clone())));
        self.norm_ff.forward(x + ff)
    }
}

fn blocks<B: Backend>(layers: usize, width: usize, heads: usize, device: &B::Device) -> Vec<HeadBlock<B>> {
    (0..layers).map(|_| HeadBlock::new(width, heads, device)).collect()
}

fn run_blocks<B: Backend>(blocks: &[HeadBlock<B>], mut x: Tensor<B, 2>) -> Tensor<B, 2> {
    for block in blocks {
        x = block.forward(x);
    }
    x
}

/// Harmonic bond parameters for one molecule.
#[derive(Debug, Clone)]
pub struct BondParams<B: Backend> {
    /// Force constants, `[n_bonds]`.
    pub k: Tensor<B, 1>,
    /// Equilibrium lengths, `[n_bonds]`.
    pub r0: Tensor<B, 1>,
}

/// Harmonic angle parameters for one molecule.
#[derive(Debug, Clone)]
pub struct AngleParams<B: Backend> {
    /// Force constants, `[n_angles]`.
    pub k: Tensor<B, 1>,
    /// Equilibrium angles in radians, `[n_angles]`.
    pub theta0: Tensor<B, 1>,
}

/// Head predicting harmonic bond parameters.
#[derive(Module, Debug)]
pub struct BondHead<B: Backend> {
    blocks: Vec<HeadBlock<B>>,
    out: Linear<B>,
}

impl<B: Backend> BondHead<B> {
    pub fn new(width: usize, layers: usize, heads: usize, device: &B::Device) -> Self {
        Self {
            blocks: blocks(layers, width, heads, device),
            out: LinearConfig::new(width, 2).init(device),
        }
    }

    /// `embeddings` is `[n_bonds, width]`.
    pub fn forward(&self, embeddings: Tensor<B, 2>) -> BondParams<B> {
        let raw = self.out.forward(run_blocks(&self.blocks, embeddings));
        let constrained = softplus(raw, 1.0);
        BondParams {
            k: constrained.clone().narrow(1, 0, 1).squeeze::<1>(1),
            r0: constrained.narrow(1, 1, 1).squeeze::<1>(1),
        }
    }
}

/// Head predicting harmonic angle parameters.
#[derive(Module, Debug)]
pub struct AngleHead<B: Backend> {
    blocks: Vec<HeadBlock<B>>,
    out: Linear<B>,
}

impl<B: Backend> AngleHead<B> {
    pub fn new(width: usize, layers: usize, heads: usize, device: &B::Device) -> Self {
        Self {
            blocks: blocks(layers, width, heads, device),
            out: LinearConfig::new(width, 2).init(device),
        }
    }

    /// `embeddings` is `[n_angles, width]`.
    pub fn forward(&self, embeddings: Tensor<B, 2>) -> AngleParams<B> {
        let raw = self.out.forward(run_blocks(&self.blocks, embeddings));
        let k = softplus(raw.clone().narrow(1, 0, 1), 1.0).squeeze::<1>(1);
        let theta0 =
            sigmoid(raw.narrow(1, 1, 1)).squeeze::<1>(1) * std::f32::consts::PI;
        AngleParams { k, theta0 }
    }
}

/// Head predicting cosine-series torsion amplitudes, shared by proper and
/// improper torsions.
#[derive(Module, Debug)]
pub struct TorsionHead<B: Backend> {
    blocks: Vec<HeadBlock<B>>,
    out: Linear<B>,
    periodicity: usize,
    gated: bool,
    cutoff: f32,
}

impl<B: Backend> TorsionHead<B> {
    pub fn new(
        width: usize,
        layers: usize,
        heads: usize,
        periodicity: usize,
        gated: bool,
        cutoff: f32,
        device: &B::Device,
    ) -> Self {
        let out_width = if gated { 2 * periodicity } else { periodicity };
        Self {
            blocks: blocks(layers, width, heads, device),
            out: LinearConfig::new(width, out_width).init(device),
            periodicity,
            gated,
            cutoff,
        }
    }

    pub const fn periodicity(&self) -> usize {
        self.periodicity
    }

    /// Predict amplitudes `[n_tuples, periodicity]`. When `apply_cutoff` is
    /// set, amplitudes below the cutoff magnitude are zeroed exactly; the
    /// cutoff is left off during training to keep the loss differentiable
    /// everywhere.
    pub fn forward(&self, embeddings: Tensor<B, 2>, apply_cutoff: bool) -> Tensor<B, 2> {
        let raw = self.out.forward(run_blocks(&self.blocks, embeddings));
        let amps = if self.gated {
            let k = raw.clone().narrow(1, 0, self.periodicity);
            let gate = sigmoid(raw.narrow(1, self.periodicity, self.periodicity));
            k * gate
        } else {
            raw
        };
        if apply_cutoff && self.cutoff > 0.0 {
            let small = amps.clone().abs().lower_elem(self.cutoff);
            amps.mask_fill(small, 0.0)
        } else {
            amps
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use graff_core::backend::{cpu_device, CpuBackend};

    fn embeddings(t: usize, w: usize) -> Tensor<CpuBackend, 2> {
        Tensor::random(
            [t, w],
            burn::tensor::Distribution::Default,
            &cpu_device(),
        )
    }

    #[test]
    fn bond_params_are_positive() {
        let device = cpu_device();
        let head = BondHead::<CpuBackend>::new(16, 1, 2, &device);
        let params = head.forward(embeddings(5, 16));
        assert_eq!(params.k.dims(), [5]);
        for v in params.k.into_data().to_vec::<f32>().expect("k") {
            assert!(v > 0.0);
        }
        for v in params.r0.into_data().to_vec::<f32>().expect("r0") {
            assert!(v > 0.0);
        }
    }

    #[test]
    fn angle_eq_lies_in_zero_pi() {
        let device = cpu_device();
        let head = AngleHead::<CpuBackend>::new(16, 1, 2, &device);
        let params = head.forward(embeddings(7, 16));
        for v in params.theta0.into_data().to_vec::<f32>().expect("theta0") {
            assert!(v > 0.0 && v < std::f32::consts::PI);
        }
    }

    #[test]
    fn torsion_cutoff_zeroes_small_amplitudes() {
        let device = cpu_device();
        let head = TorsionHead::<CpuBackend>::new(16, 0, 2, 3, true, 0.5, &device);
        let e = embeddings(10, 16);
        let cut = head.forward(e, true).into_data().to_vec::<f32>().expect("amps");
        for v in cut {
            assert!(v == 0.0 || v.abs() >= 0.5);
        }
    }

    #[test]
    fn torsion_training_path_skips_cutoff() {
        let device = cpu_device();
        let head = TorsionHead::<CpuBackend>::new(16, 0, 2, 4, false, 1e3, &device);
        let e = embeddings(3, 16);
        let amps = head.forward(e, false);
        assert_eq!(amps.dims(), [3, 4]);
        // absurd cutoff would zero everything if applied
        let any_nonzero = amps
            .abs()
            .max()
            .into_data()
            .to_vec::<f32>()
            .expect("max")[0]
            > 0.0;
        assert!(any_nonzero);
    }
}
