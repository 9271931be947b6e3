//! On-disk model layout: `model.json` (architecture and compile options)
//! next to `weights.mpk` (burn named MessagePack record).

use std::path::{Path, PathBuf};

use burn::module::Module;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder};
use burn::tensor::backend::Backend;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::layer::Layer;
use super::network::Network;
use crate::error::{Error, Result};
use crate::training::CompileOptions;

pub const ARCHITECTURE_FILE: &str = "model.json";
/// Stem of the weights file; the recorder appends `.mpk`.
pub const WEIGHTS_STEM: &str = "weights";
pub const FORMAT_VERSION: u32 = 1;

/// Serialized description of a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Architecture {
    pub format_version: u32,
    pub input_shape: Vec<usize>,
    pub layers: Vec<Layer>,
    #[serde(default)]
    pub compile: Option<CompileOptions>,
}

/// Locations written by a save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedModel {
    pub directory: PathBuf,
    pub architecture: PathBuf,
    pub weights: PathBuf,
}

fn join_error(err: tokio::task::JoinError) -> Error {
    Error::Io(std::io::Error::other(err))
}

pub(crate) async fn write<B: Backend>(
    dir: &Path,
    architecture: &Architecture,
    network: Network<B>,
) -> Result<SavedModel> {
    tokio::fs::create_dir_all(dir).await?;

    let architecture_path = dir.join(ARCHITECTURE_FILE);
    let json = serde_json::to_string_pretty(architecture)?;
    tokio::fs::write(&architecture_path, json).await?;

    let stem = dir.join(WEIGHTS_STEM);
    let record_path = stem.clone();
    tokio::task::spawn_blocking(move || {
        let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
        network.save_file(record_path, &recorder)
    })
    .await
    .map_err(join_error)??;

    let saved = SavedModel {
        directory: dir.to_path_buf(),
        architecture: architecture_path,
        weights: stem.with_extension("mpk"),
    };
    info!("Model saved to {}", saved.directory.display());
    Ok(saved)
}

pub(crate) async fn read_architecture(dir: &Path) -> Result<Architecture> {
    let json = tokio::fs::read_to_string(dir.join(ARCHITECTURE_FILE)).await?;
    let architecture: Architecture = serde_json::from_str(&json)?;
    if architecture.format_version != FORMAT_VERSION {
        return Err(Error::config(format!(
            "unsupported model format version {}",
            architecture.format_version
        )));
    }
    Ok(architecture)
}

pub(crate) async fn read_weights<B: Backend>(
    dir: &Path,
    network: Network<B>,
    device: &B::Device,
) -> Result<Network<B>> {
    let stem = dir.join(WEIGHTS_STEM);
    let device = device.clone();
    let network = tokio::task::spawn_blocking(move || {
        let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
        network.load_file(stem, &recorder, &device)
    })
    .await
    .map_err(join_error)??;
    Ok(network)
}
