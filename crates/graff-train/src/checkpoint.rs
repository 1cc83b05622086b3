//! Checkpoint persistence.
//!
//! A checkpoint directory holds the model record (named-mpk, full
//! precision) next to the full TOML configuration, so a model can be
//! reconstructed from the artifact alone: read the config, build the
//! architecture, load the record.

use std::path::{Path, PathBuf};

use burn::module::Module;
use burn::prelude::*;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder};

use graff_core::error::{GraffError, Result};
use graff_core::GraffConfig;
use graff_models::GraffModel;

/// Model record file name (the recorder appends its extension).
pub const MODEL_FILE: &str = "model";
/// Configuration file name.
pub const CONFIG_FILE: &str = "config.toml";

/// Write `model` and `config` under `dir`, creating it if needed.
pub fn save<B: Backend>(
    model: &GraffModel<B>,
    config: &GraffConfig,
    dir: &Path,
) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
    model
        .clone()
        .save_file(dir.join(MODEL_FILE), &recorder)
        .map_err(|e| GraffError::Checkpoint(e.to_string()))?;
    std::fs::write(dir.join(CONFIG_FILE), config.to_toml_string()?)?;
    Ok(dir.to_path_buf())
}

/// Rebuild the model and configuration from a checkpoint directory.
pub fn load<B: Backend>(
    dir: &Path,
    device: &B::Device,
) -> Result<(GraffModel<B>, GraffConfig)> {
    let text = std::fs::read_to_string(dir.join(CONFIG_FILE))?;
    let config = GraffConfig::from_toml_str(&text)?;
    config.validate()?;
    let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
    let model = GraffModel::<B>::new(&config, device)?
        .load_file(dir.join(MODEL_FILE), &recorder, device)
        .map_err(|e| GraffError::Checkpoint(e.to_string()))?;
    Ok((model, config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use graff_core::backend::{cpu_device, CpuBackend};
    use graff_core::molecule::{Atom, MoleculeGraph};
    use graff_core::tuples::TupleIndices;
    use graff_models::Mode;

    #[test]
    fn round_trip_preserves_predictions() {
        let device = cpu_device();
        let mut config = GraffConfig::default();
        config.model.feature_width = 16;
        config.model.attention_heads = 2;
        config.model.conv_layers = 1;
        config.model.attention_layers = 1;
        config.model.symmetriser_width = 16;
        config.model.symmetriser_depth = 2;
        config.model.symmetrised_width = 16;
        config.model.head_layers = 1;
        config.model.head_attention_heads = 2;

        let model = GraffModel::<CpuBackend>::new(&config, &device).unwrap();
        let mol = MoleculeGraph::new(
            "m",
            vec![Atom::new(6, 0.0), Atom::new(6, 0.1), Atom::new(8, -0.1)],
            vec![(0, 1), (1, 2)],
        )
        .unwrap();
        let tuples = TupleIndices::enumerate(&mol);
        let before = model.forward(&mol, &tuples, Mode::Inference, &device);

        let dir = std::env::temp_dir().join(format!("graff-checkpoint-{}", std::process::id()));
        save(&model, &config, &dir).unwrap();
        let (loaded, loaded_config) = load::<CpuBackend>(&dir, &device).unwrap();
        std::fs::remove_dir_all(&dir).ok();

        assert_eq!(loaded_config.model.feature_width, 16);
        let after = loaded.forward(&mol, &tuples, Mode::Inference, &device);
        let a = before.bonds.k.into_data().to_vec::<f32>().unwrap();
        let b = after.bonds.k.into_data().to_vec::<f32>().unwrap();
        assert_eq!(a, b);
    }
}
