//! Architecture list files: a JSON array of descriptors.

use std::path::Path;
use tracing::info;

use super::descriptor::ArchitectureDescriptor;
use crate::error::{MlError, Result};
use aesearch_core::persistence::{atomic_write_json, load_json};

pub fn save_architectures(path: &Path, archs: &[ArchitectureDescriptor]) -> Result<()> {
    atomic_write_json(path, &archs)?;
    info!(path = %path.display(), count = archs.len(), "Saved architecture list");
    Ok(())
}

/// Load and re-validate every descriptor in an architecture list file.
///
/// A missing file is an upstream-artifact failure; a descriptor that no longer
/// validates is reported with its list position.
pub fn load_architectures(path: &Path) -> Result<Vec<ArchitectureDescriptor>> {
    let archs: Vec<ArchitectureDescriptor> = load_json(path)?
        .ok_or_else(|| MlError::missing_upstream(path, "architecture list file not found"))?;
    for (i, arch) in archs.iter().enumerate() {
        arch.validate().map_err(|e| {
            MlError::invalid_architecture(format!("{} entry {i}: {e}", path.display()))
        })?;
    }
    info!(path = %path.display(), count = archs.len(), "Loaded architecture list");
    Ok(archs)
}
