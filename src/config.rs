//! Runtime configuration for harness binaries.
//!
//! Configuration is YAML, loaded into `#[serde(default)]` structs so every
//! field may be omitted:
//!
//! ```yaml
//! harness:
//!   backend: gpu        # host | gpu
//!   platform: 0
//!   device: 0
//!   kernel_path: kernels/ising.wgsl
//! logging:
//!   directives: "stagesim=debug"
//! sweep:
//!   t_min: 2.0
//! ```
//!
//! Binaries take the configuration path as their first positional argument
//! and fall back to defaults without one.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::engine::error::{ConfigurationError, SimResult};


/// Which compute backend a binary drives.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// CPU reference backend.
    #[default]
    Host,
    /// `wgpu` backend (requires the `gpu` feature).
    Gpu,
}

/// Device selection shared by all binaries.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Backend to run on.
    pub backend: BackendKind,
    /// Platform index passed to `Simulation::create`.
    pub platform: usize,
    /// Device index passed to `Simulation::create`.
    pub device: usize,
    /// WGSL source for the `gpu` backend; binaries use their bundled
    /// kernel when absent.
    pub kernel_path: Option<PathBuf>,
}

/// Reads `path` as YAML into `T`, or returns `T::default()` when no path is
/// given.
pub fn load_yaml<T: DeserializeOwned + Default>(path: Option<&Path>) -> SimResult<T> {
    let Some(path) = path else {
        return Ok(T::default());
    };

    let contents = fs::read_to_string(path).map_err(|e| ConfigurationError::ConfigFile {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    let config = serde_yaml::from_str(&contents).map_err(|e| ConfigurationError::ConfigFile {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    Ok(config)
}

/// First positional command-line argument, taken as a configuration path.
pub fn config_path_from_args() -> Option<PathBuf> {
    env::args_os().nth(1).map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default, PartialEq, Deserialize)]
    #[serde(default)]
    struct Doc {
        harness: HarnessConfig,
        steps: u32,
    }

    #[test]
    fn missing_path_yields_defaults() {
        let doc: Doc = load_yaml(None).unwrap();
        assert_eq!(doc, Doc::default());
        assert_eq!(doc.harness.backend, BackendKind::Host);
    }

    #[test]
    fn partial_documents_fill_defaults() {
        let dir = std::env::temp_dir().join(format!("stagesim-config-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("partial.yaml");
        fs::write(&path, "harness:\n  backend: gpu\n  device: 1\n").unwrap();

        let doc: Doc = load_yaml(Some(&path)).unwrap();
        assert_eq!(doc.harness.backend, BackendKind::Gpu);
        assert_eq!(doc.harness.device, 1);
        assert_eq!(doc.harness.platform, 0);
        assert_eq!(doc.steps, 0);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn unreadable_file_is_a_configuration_error() {
        let err = load_yaml::<Doc>(Some(Path::new("/nonexistent/stagesim.yaml"))).unwrap_err();
        assert!(err.is_fatal());
    }
}
