//! Per-cycle configuration.
//!
//! The host writes one JSON document per patch cycle. It is parsed and validated once into a
//! [`PatchConfig`] which every pipeline stage receives by reference.
//!
//! ```json
//! {
//!   "patchNo": 3,
//!   "workDir": "/tmp/hotpatch",
//!   "searchPaths": ["/game/Managed"],
//!   "modules": [
//!     { "name": "Game", "files": ["src/Player.cs"], "references": ["/game/Managed/Engine.dpmod"] }
//!   ],
//!   "defines": ["DEBUG"],
//!   "compiler": { "path": "/usr/bin/dpc", "args": ["--optimize"], "timeoutSecs": 60 }
//! }
//! ```

use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::{metadata::cache::MODULE_EXTENSION, Error, Result};

const DEFAULT_COMPILER_TIMEOUT_SECS: u64 = 120;

fn default_true() -> bool {
    true
}

fn default_timeout() -> u64 {
    DEFAULT_COMPILER_TIMEOUT_SECS
}

/// External compiler invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompilerConfig {
    /// Compiler executable
    pub path: PathBuf,
    /// Arguments passed before the generated ones
    #[serde(default)]
    pub args: Vec<String>,
    /// Seconds before the compiler is killed
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl CompilerConfig {
    /// The compile timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// One module to patch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleConfig {
    /// Simple module name, the file stem of its image
    pub name: String,
    /// Changed source files to recompile
    #[serde(default)]
    pub files: Vec<PathBuf>,
    /// Every source file of the module, searched for other parts of partial types
    #[serde(default)]
    pub sources: Vec<PathBuf>,
    /// Modules the compiler must reference
    #[serde(default)]
    pub references: Vec<PathBuf>,
    /// Loaded image, looked up in the search paths when absent
    #[serde(default)]
    pub baseline: Option<PathBuf>,
    /// Already compiled candidate; the compiler is skipped when present
    #[serde(default)]
    pub candidate: Option<PathBuf>,
}

impl ModuleConfig {
    /// File name of the module image, `<name>.dpmod`.
    #[must_use]
    pub fn file_name(&self) -> String {
        format!("{}.{}", self.name, MODULE_EXTENSION)
    }
}

/// Everything one patch cycle needs to know.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchConfig {
    /// Monotonic patch sequence number
    pub patch_no: u32,
    /// Scratch directory, holds the last processed candidates
    pub work_dir: PathBuf,
    /// Where rewritten modules go, `<workDir>/patches` when absent
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
    /// Directories searched for baseline images
    #[serde(default)]
    pub search_paths: Vec<PathBuf>,
    /// Modules to patch
    pub modules: Vec<ModuleConfig>,
    /// Active preprocessor defines
    #[serde(default)]
    pub defines: Vec<String>,
    /// External compiler; required unless every module names its candidate
    #[serde(default)]
    pub compiler: Option<CompilerConfig>,
    /// Write companion symbol files next to rewritten modules
    #[serde(default = "default_true")]
    pub debug_symbols: bool,
}

impl PatchConfig {
    /// Parse and validate a JSON configuration.
    ///
    /// # Errors
    /// Returns [`Error::Json`] for syntax errors and [`Error::Configuration`] if validation
    /// fails.
    pub fn from_json(json: &str) -> Result<PatchConfig> {
        let config: PatchConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON configuration file.
    ///
    /// # Errors
    /// Returns [`Error::FileError`] if the file cannot be read, otherwise see
    /// [`PatchConfig::from_json`].
    pub fn from_file(path: impl AsRef<Path>) -> Result<PatchConfig> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Check the configuration for consistency.
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.work_dir.as_os_str().is_empty() {
            return Err(Error::Configuration("workDir is empty".to_string()));
        }
        if self.modules.is_empty() {
            return Err(Error::Configuration("no modules to patch".to_string()));
        }

        let mut names = BTreeSet::new();
        for module in &self.modules {
            if module.name.is_empty() {
                return Err(Error::Configuration("module without a name".to_string()));
            }
            if !names.insert(module.name.as_str()) {
                return Err(Error::Configuration(format!(
                    "module '{}' is listed twice",
                    module.name
                )));
            }
            if module.candidate.is_none() && self.compiler.is_none() {
                return Err(Error::Configuration(format!(
                    "module '{}' has no candidate and no compiler is configured",
                    module.name
                )));
            }
            if module.baseline.is_none() && self.search_paths.is_empty() {
                return Err(Error::Configuration(format!(
                    "module '{}' has no baseline and there are no search paths",
                    module.name
                )));
            }
        }

        if let Some(compiler) = &self.compiler {
            if compiler.timeout_secs == 0 {
                return Err(Error::Configuration(
                    "compiler timeout must be positive".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Directory receiving rewritten modules.
    #[must_use]
    pub fn output_dir(&self) -> PathBuf {
        self.output_dir
            .clone()
            .unwrap_or_else(|| self.work_dir.join("patches"))
    }

    /// Directory holding the last processed candidate of every module.
    #[must_use]
    pub fn last_dir(&self) -> PathBuf {
        self.work_dir.join("last")
    }

    /// Directory the compiler writes candidates to.
    #[must_use]
    pub fn build_dir(&self) -> PathBuf {
        self.work_dir.join("build")
    }

    /// Name of the patched assembly for `assembly`, `<assembly>_patch_<patchNo>`.
    #[must_use]
    pub fn patch_assembly_name(&self, assembly: &str) -> String {
        format!("{assembly}_patch_{}", self.patch_no)
    }

    /// Locate the baseline image of `module`.
    ///
    /// # Errors
    /// Returns [`Error::ModuleLoad`] if no search path contains the image.
    pub fn baseline_path(&self, module: &ModuleConfig) -> Result<PathBuf> {
        if let Some(path) = &module.baseline {
            return Ok(path.clone());
        }

        let file_name = module.file_name();
        self.search_paths
            .iter()
            .map(|dir| dir.join(&file_name))
            .find(|path| path.is_file())
            .ok_or_else(|| Error::ModuleLoad {
                path: PathBuf::from(&file_name),
                source: Box::new(Error::Error(format!(
                    "not found in {} search path(s)",
                    self.search_paths.len()
                ))),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"{
        "patchNo": 2,
        "workDir": "/tmp/hp",
        "searchPaths": ["/game"],
        "modules": [{ "name": "Game", "candidate": "/tmp/Game.dpmod" }]
    }"#;

    #[test]
    fn test_defaults() {
        let config = PatchConfig::from_json(MINIMAL).unwrap();
        assert_eq!(config.patch_no, 2);
        assert_eq!(config.output_dir(), PathBuf::from("/tmp/hp/patches"));
        assert_eq!(config.last_dir(), PathBuf::from("/tmp/hp/last"));
        assert!(config.debug_symbols);
        assert!(config.compiler.is_none());
        assert_eq!(config.patch_assembly_name("Game"), "Game_patch_2");
        assert_eq!(config.modules[0].file_name(), "Game.dpmod");
    }

    #[test]
    fn test_compiler_section() {
        let config = PatchConfig::from_json(
            r#"{
                "patchNo": 1,
                "workDir": "w",
                "outputDir": "out",
                "searchPaths": ["s"],
                "modules": [{ "name": "Game", "files": ["a.cs"] }],
                "compiler": { "path": "dpc" },
                "debugSymbols": false
            }"#,
        )
        .unwrap();
        let compiler = config.compiler.unwrap();
        assert_eq!(compiler.timeout(), Duration::from_secs(120));
        assert_eq!(config.output_dir, Some(PathBuf::from("out")));
        assert!(!config.debug_symbols);
    }

    #[test]
    fn test_validation_errors() {
        let no_compiler = r#"{
            "patchNo": 1, "workDir": "w", "searchPaths": ["s"],
            "modules": [{ "name": "Game", "files": ["a.cs"] }]
        }"#;
        assert!(matches!(
            PatchConfig::from_json(no_compiler),
            Err(Error::Configuration(_))
        ));

        let twice = r#"{
            "patchNo": 1, "workDir": "w", "searchPaths": ["s"],
            "modules": [{ "name": "Game", "candidate": "a" }, { "name": "Game", "candidate": "b" }]
        }"#;
        let err = PatchConfig::from_json(twice).unwrap_err();
        assert!(err.to_string().contains("listed twice"));

        assert!(matches!(
            PatchConfig::from_json("{ \"patchNo\": 1 }"),
            Err(Error::Json(_))
        ));
    }

    #[test]
    fn test_baseline_lookup() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Game.dpmod"), b"").unwrap();

        let mut config = PatchConfig::from_json(MINIMAL).unwrap();
        config.search_paths = vec![dir.path().join("missing"), dir.path().to_path_buf()];
        assert_eq!(
            config.baseline_path(&config.modules[0]).unwrap(),
            dir.path().join("Game.dpmod")
        );

        config.search_paths.truncate(1);
        assert!(matches!(
            config.baseline_path(&config.modules[0]),
            Err(Error::ModuleLoad { .. })
        ));
    }
}
