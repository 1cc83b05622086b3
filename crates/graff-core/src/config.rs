//! Typed configuration for data, model and training.
//!
//! The whole run is described by one [`GraffConfig`] read from a TOML file.
//! Every section rejects unknown keys, so a typo in a field name fails at
//! load time instead of silently training with a default. [`GraffConfig::
//! validate`] then checks cross-field constraints.
//!
//! # Example
//!
//! ```rust,ignore
//! let config = GraffConfig::load("runs/base.toml")?;
//! config.validate()?;
//! ```

use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{GraffError, Result};

/// How many conformations of each molecule enter a training batch.
///
/// Serialized as either an integer (`conf_strategy = 32`) or one of the
/// strings `"mean"` and `"all"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfStrategy {
    /// Sample exactly this many conformations, with replacement if fewer
    /// are available.
    Fixed(usize),
    /// Sample the mean conformation count of the dataset from each molecule.
    Mean,
    /// Use every conformation of every molecule.
    All,
}

impl Serialize for ConfStrategy {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            ConfStrategy::Fixed(n) => serializer.serialize_u64(*n as u64),
            ConfStrategy::Mean => serializer.serialize_str("mean"),
            ConfStrategy::All => serializer.serialize_str("all"),
        }
    }
}

impl<'de> Deserialize<'de> for ConfStrategy {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Count(usize),
            Name(String),
        }
        match Raw::deserialize(deserializer)? {
            Raw::Count(n) => Ok(ConfStrategy::Fixed(n)),
            Raw::Name(s) => match s.as_str() {
                "mean" => Ok(ConfStrategy::Mean),
                "all" => Ok(ConfStrategy::All),
                other => Err(D::Error::unknown_variant(other, &["mean", "all"])),
            },
        }
    }
}

/// Dataset selection, splitting and batching.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct DataConfig {
    /// Datasets entering the three-way split.
    pub datasets: Vec<String>,
    /// Datasets used exclusively for training.
    pub pure_train_datasets: Vec<String>,
    /// Datasets used exclusively for validation.
    pub pure_val_datasets: Vec<String>,
    /// Datasets used exclusively for testing.
    pub pure_test_datasets: Vec<String>,
    /// Train/validation/test fractions; must sum to one.
    pub partition: [f64; 3],
    /// Per-dataset loss weights; datasets absent here weigh 1.0.
    pub weights: IndexMap<String, f64>,
    /// Exponent balancing small datasets against large ones. Zero keeps the
    /// raw weights, one makes every dataset contribute equally per epoch.
    pub balance_factor: f64,
    /// Molecules per training batch.
    pub batch_size: usize,
    /// Molecules per validation batch.
    pub val_batch_size: usize,
    /// Molecules per test batch.
    pub test_batch_size: usize,
    /// Conformation sampling for training batches.
    pub conf_strategy: ConfStrategy,
    /// Conformation sampling for validation and test batches.
    pub val_conf_strategy: ConfStrategy,
    /// Background workers preparing batches; zero prepares inline.
    pub train_loader_workers: usize,
    pub val_loader_workers: usize,
    pub test_loader_workers: usize,
    /// Seed for splitting and shuffling.
    pub seed: u64,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            datasets: Vec::new(),
            pure_train_datasets: Vec::new(),
            pure_val_datasets: Vec::new(),
            pure_test_datasets: Vec::new(),
            partition: [0.8, 0.1, 0.1],
            weights: IndexMap::new(),
            balance_factor: 0.0,
            batch_size: 32,
            val_batch_size: 32,
            test_batch_size: 32,
            conf_strategy: ConfStrategy::Fixed(32),
            val_conf_strategy: ConfStrategy::All,
            train_loader_workers: 1,
            val_loader_workers: 0,
            test_loader_workers: 0,
            seed: 0,
        }
    }
}

/// Architecture of the parameter predictor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ModelConfig {
    /// Atom attributes fed to the feature encoder, by name. Valid names:
    /// `atomic_number`, `partial_charge`, `ring_membership`, `degree`,
    /// `charge_model`.
    pub atom_attrs: Vec<String>,
    /// Whether to append the graph positional encoding to the atom features.
    pub positional_encoding: bool,
    /// Maximum bond distance of the positional encoding shells.
    pub positional_max_dist: usize,
    /// Width of node embeddings throughout the graph encoder.
    pub feature_width: usize,
    /// Message-passing layers before attention.
    pub conv_layers: usize,
    /// Self-attention layers after message passing.
    pub attention_layers: usize,
    /// Attention heads per attention layer.
    pub attention_heads: usize,
    /// Add self-loops so each node attends to its own features during
    /// message passing.
    pub self_interaction: bool,
    /// Apply layer norm inside convolution layers.
    pub layer_norm: bool,
    /// Dropout on the encoded input features.
    pub initial_dropout: f32,
    /// Dropout inside convolution layers.
    pub conv_dropout: f32,
    /// Dropout inside attention layers.
    pub attention_dropout: f32,
    /// Dropout on the final node embeddings.
    pub final_dropout: f32,
    /// Hidden width of the symmetriser MLP.
    pub symmetriser_width: usize,
    /// Depth of the symmetriser MLP.
    pub symmetriser_depth: usize,
    /// Output width of the symmetriser, fed to the parameter heads.
    pub symmetrised_width: usize,
    /// Transformer blocks in each parameter head.
    pub head_layers: usize,
    /// Attention heads in each parameter head.
    pub head_attention_heads: usize,
    /// Number of cosine periodicities predicted for proper torsions.
    pub proper_periodicity: usize,
    /// Number of cosine periodicities predicted for improper torsions.
    pub improper_periodicity: usize,
    /// Learn a sigmoid gate on torsion amplitudes.
    pub torsion_gated: bool,
    /// Zero out torsion amplitudes below this magnitude at inference.
    pub torsion_cutoff: f32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            atom_attrs: vec![
                "atomic_number".into(),
                "partial_charge".into(),
                "ring_membership".into(),
            ],
            positional_encoding: true,
            positional_max_dist: 4,
            feature_width: 256,
            conv_layers: 3,
            attention_layers: 2,
            attention_heads: 8,
            self_interaction: true,
            layer_norm: true,
            initial_dropout: 0.0,
            conv_dropout: 0.1,
            attention_dropout: 0.1,
            final_dropout: 0.0,
            symmetriser_width: 256,
            symmetriser_depth: 3,
            symmetrised_width: 256,
            head_layers: 2,
            head_attention_heads: 8,
            proper_periodicity: 6,
            improper_periodicity: 3,
            torsion_gated: true,
            torsion_cutoff: 1e-4,
        }
    }
}

/// Optimisation schedule and loss weighting.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct TrainConfig {
    /// Total epochs.
    pub epochs: usize,
    /// Epoch at which QM energy/force terms join the loss.
    pub start_qm_epochs: usize,
    /// Epoch at which the classical-parameter term leaves the loss.
    pub param_loss_epochs: usize,
    /// Weight of the force mean-squared error.
    pub gradient_weight: f64,
    /// Weight of the classical-parameter mean-squared error.
    pub param_weight: f64,
    /// Weight of the per-tuple energy variance diagnostic.
    pub tuplewise_weight: f64,
    /// L2 penalty on proper torsion amplitudes.
    pub proper_regularisation: f64,
    /// L2 penalty on improper torsion amplitudes.
    pub improper_regularisation: f64,
    /// Peak learning rate after warmup.
    pub learning_rate: f64,
    /// Steps of linear learning-rate warmup.
    pub warmup_steps: usize,
    /// Multiplicative learning-rate decay on validation plateau.
    pub lr_decay: f64,
    /// Epochs without validation improvement before decaying the rate.
    pub plateau_patience: usize,
    /// Epochs without validation improvement before stopping.
    pub early_stopping_patience: usize,
    /// Blend between energy and force RMSE in the early-stopping criterion;
    /// zero watches energies only, one watches forces only.
    pub early_stopping_force_blend: f64,
    /// Gradient-norm clipping threshold.
    pub gradient_clip: f32,
    /// Hard wall-clock limit in seconds, checked at epoch boundaries.
    pub time_limit_secs: Option<u64>,
    /// Directory for checkpoints.
    pub checkpoint_dir: PathBuf,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            epochs: 500,
            start_qm_epochs: 2,
            param_loss_epochs: 100,
            gradient_weight: 0.8,
            param_weight: 0.1,
            tuplewise_weight: 0.0,
            proper_regularisation: 1e-5,
            improper_regularisation: 1e-5,
            learning_rate: 1e-4,
            warmup_steps: 500,
            lr_decay: 0.8,
            plateau_patience: 10,
            early_stopping_patience: 30,
            early_stopping_force_blend: 0.5,
            gradient_clip: 10.0,
            time_limit_secs: None,
            checkpoint_dir: PathBuf::from("checkpoints"),
        }
    }
}

/// Complete run configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct GraffConfig {
    pub data: DataConfig,
    pub model: ModelConfig,
    pub train: TrainConfig,
}

impl GraffConfig {
    /// Parse a configuration from TOML text. Unknown keys are an error.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| GraffError::Config(e.to_string()))
    }

    /// Load a configuration file and validate it.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config = Self::from_toml_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize back to TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| GraffError::Config(e.to_string()))
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        let config_err = |msg: String| Err(GraffError::Config(msg));

        let p = &self.data.partition;
        if p.iter().any(|&f| f < 0.0) || (p.iter().sum::<f64>() - 1.0).abs() > 1e-6 {
            return config_err(format!("partition {p:?} must be non-negative and sum to 1"));
        }
        for (name, size) in [
            ("batch_size", self.data.batch_size),
            ("val_batch_size", self.data.val_batch_size),
            ("test_batch_size", self.data.test_batch_size),
        ] {
            if size == 0 {
                return config_err(format!("{name} must be positive"));
            }
        }
        if let ConfStrategy::Fixed(0) = self.data.conf_strategy {
            return config_err("conf_strategy must sample at least one conformation".into());
        }
        for (name, &w) in &self.data.weights {
            if w < 0.0 || !w.is_finite() {
                return config_err(format!("weight {w} for dataset '{name}' must be finite and non-negative"));
            }
            let known = self.data.datasets.contains(name)
                || self.data.pure_train_datasets.contains(name)
                || self.data.pure_val_datasets.contains(name)
                || self.data.pure_test_datasets.contains(name);
            if !known {
                return config_err(format!("weight names unknown dataset '{name}'"));
            }
        }
        for (a, b, what) in [
            (
                &self.data.pure_train_datasets,
                &self.data.pure_val_datasets,
                "pure_train/pure_val",
            ),
            (
                &self.data.pure_train_datasets,
                &self.data.pure_test_datasets,
                "pure_train/pure_test",
            ),
            (
                &self.data.pure_val_datasets,
                &self.data.pure_test_datasets,
                "pure_val/pure_test",
            ),
        ] {
            if let Some(name) = a.iter().find(|n| b.contains(n)) {
                return config_err(format!("dataset '{name}' appears in both {what} lists"));
            }
        }

        let m = &self.model;
        if m.feature_width == 0 || m.symmetriser_width == 0 || m.symmetrised_width == 0 {
            return config_err("model widths must be positive".into());
        }
        if m.attention_layers > 0 && m.feature_width % m.attention_heads != 0 {
            return config_err(format!(
                "feature_width {} must be divisible by attention_heads {}",
                m.feature_width, m.attention_heads
            ));
        }
        if m.head_layers > 0 && m.symmetrised_width % m.head_attention_heads != 0 {
            return config_err(format!(
                "symmetrised_width {} must be divisible by head_attention_heads {}",
                m.symmetrised_width, m.head_attention_heads
            ));
        }
        if m.proper_periodicity == 0 || m.improper_periodicity == 0 {
            return config_err("torsion periodicities must be positive".into());
        }
        for (name, d) in [
            ("initial_dropout", m.initial_dropout),
            ("conv_dropout", m.conv_dropout),
            ("attention_dropout", m.attention_dropout),
            ("final_dropout", m.final_dropout),
        ] {
            if !(0.0..1.0).contains(&d) {
                return config_err(format!("{name} {d} must lie in [0, 1)"));
            }
        }
        if m.torsion_cutoff < 0.0 {
            return config_err("torsion_cutoff must be non-negative".into());
        }

        let t = &self.train;
        if t.start_qm_epochs > t.param_loss_epochs {
            return config_err(format!(
                "start_qm_epochs {} must not exceed param_loss_epochs {}",
                t.start_qm_epochs, t.param_loss_epochs
            ));
        }
        if t.learning_rate <= 0.0 {
            return config_err("learning_rate must be positive".into());
        }
        if !(0.0..=1.0).contains(&t.lr_decay) || t.lr_decay == 0.0 {
            return config_err(format!("lr_decay {} must lie in (0, 1]", t.lr_decay));
        }
        if !(0.0..=1.0).contains(&t.early_stopping_force_blend) {
            return config_err("early_stopping_force_blend must lie in [0, 1]".into());
        }
        if t.gradient_clip <= 0.0 {
            return config_err("gradient_clip must be positive".into());
        }
        Ok(())
    }
}
