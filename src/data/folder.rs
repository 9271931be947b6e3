//! Async loader for an image folder with one sub-directory per class.

use std::path::{Path, PathBuf};

use burn::tensor::backend::Backend;
use tracing::{debug, info};

use super::collector::LabeledImages;
use crate::arena::TensorArena;
use crate::error::{Error, Result};
use crate::preprocess::ImagePipeline;

/// Supported image extensions (case-insensitive).
const EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "gif", "tiff", "tif", "webp"];

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

async fn sorted_entries(dir: &Path, want_dirs: bool) -> Result<Vec<PathBuf>> {
    let mut entries = Vec::new();
    let mut reader = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = reader.next_entry().await? {
        let is_dir = entry.file_type().await?.is_dir();
        let path = entry.path();
        if want_dirs && is_dir {
            entries.push(path);
        } else if !want_dirs && !is_dir && is_image(&path) {
            entries.push(path);
        }
    }
    entries.sort();
    Ok(entries)
}

/// Load a `root/<class>/<image>` tree. Class directories are visited in
/// sorted order so label indices are reproducible.
///
/// Every image goes through `pipeline`; set a size there, since examples of
/// different shapes cannot be stacked.
pub async fn load_image_folder<B: Backend>(
    root: impl AsRef<Path>,
    pipeline: &ImagePipeline,
    device: &B::Device,
) -> Result<LabeledImages<B>> {
    let root = root.as_ref();
    pipeline.validate()?;

    let classes = sorted_entries(root, true).await?;
    if classes.is_empty() {
        return Err(Error::config(format!(
            "no class directories found under {}",
            root.display()
        )));
    }

    let labels: Vec<String> = classes
        .iter()
        .filter_map(|dir| dir.file_name().map(|n| n.to_string_lossy().into_owned()))
        .collect();
    let mut images = LabeledImages::with_labels(device, labels.clone());

    for (class_dir, label) in classes.iter().zip(&labels) {
        let files = sorted_entries(class_dir, false).await?;
        debug!(label = %label, files = files.len(), "scanning class directory");

        for path in files {
            let bytes = tokio::fs::read(&path).await?;
            // one short-lived arena per image keeps the future Send
            let mut arena = TensorArena::new();
            let id = pipeline.process_in(&mut arena, &bytes, device)?;
            images.push_from_arena(&mut arena, id, label)?;
        }
    }

    info!(
        root = %root.display(),
        classes = labels.len(),
        images = images.len(),
        "image folder loaded"
    );
    Ok(images)
}
