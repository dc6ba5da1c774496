use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tracing::{debug, instrument};
use vlmbench_core::{Result, VlmBenchError};

/// Overrides the directory bundled assets are looked up in.
pub const ASSETS_DIR_ENV: &str = "VLMBENCH_ASSETS_DIR";

const BUNDLED_ASSETS_DIR: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/assets");

/// Maps asset names to files on disk.
#[derive(Debug, Clone)]
pub struct AssetResolver {
    root: PathBuf,
}

impl AssetResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn bundled() -> Self {
        let root = std::env::var_os(ASSETS_DIR_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(BUNDLED_ASSETS_DIR));
        Self::new(root)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Existing files are returned as given; other names are looked up in the
    /// assets directory.
    #[instrument(skip(self), fields(root = %self.root.display()))]
    pub fn resolve(&self, name: &str) -> Result<PathBuf> {
        let direct = Path::new(name);
        if direct.is_file() {
            return Ok(direct.to_path_buf());
        }

        let bundled = self.root.join(name);
        if bundled.is_file() {
            debug!(path = %bundled.display(), "Resolved bundled asset");
            return Ok(bundled);
        }

        Err(VlmBenchError::Asset(format!(
            "'{}' not found (also searched {})",
            name,
            self.root.display()
        )))
    }
}

impl Default for AssetResolver {
    fn default() -> Self {
        Self::bundled()
    }
}

/// Standard base64 encoding of the file at `path`.
#[instrument]
pub fn encode_image(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path).map_err(|e| {
        VlmBenchError::Asset(format!("Failed to read {}: {}", path.display(), e))
    })?;
    debug!(bytes = bytes.len(), "Encoding image");
    Ok(STANDARD.encode(bytes))
}
