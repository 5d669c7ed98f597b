//! The patch cycle.
//!
//! [`PatchEngine::run`] drives one cycle over every configured module:
//!
//! 1. obtain the candidate, either named in the configuration or compiled from the changed
//!    sources (expanded by the partial type pre-scan)
//! 2. skip the module if the candidate is byte-identical to the last processed one
//! 3. load the baseline through the cache and the candidate uncached
//! 4. validate the layout, diff, rewrite and synthesize generic wrappers
//! 5. write `<outputDir>/<assembly>_patch_<N>.dpmod` and its symbols
//!
//! The last-candidate copies under `<workDir>/last` are only updated once every module went
//! through, so a failed cycle is retried in full. Installing the resulting hooks is a
//! separate step, [`install_hooks`], because only the host can resolve entry points.

use std::path::{Path, PathBuf};

use crate::{
    file::File,
    hook::{HookInstaller, InstallSummary},
    metadata::{
        cache::{LoadedModule, ModuleCache, ModuleIdentity, MODULE_EXTENSION, SYMBOLS_EXTENSION},
        image::ModuleBuilder,
    },
    patch::{
        compiler::{CompileOptions, CompilerService},
        config::{ModuleConfig, PatchConfig},
        diff::diff,
        generics::{scan, synthesize_wrappers},
        layout::validate,
        prescan::{expand_partial_sources, MAX_SCAN_THREADS},
        report::{GenericWrapperInfo, MethodHookInfo, PatchReport},
        rewrite::{rewrite, RewriteOptions},
    },
    Error, Result,
};

/// Files written for one module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchArtifact {
    /// Baseline assembly name
    pub assembly: String,
    /// The rewritten module
    pub module: PathBuf,
    /// Its symbol file, if written
    pub symbols: Option<PathBuf>,
}

/// Everything one cycle produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleOutcome {
    /// The host facing report
    pub report: PatchReport,
    /// Rewritten modules, one per changed module with a non-empty plan
    pub artifacts: Vec<PatchArtifact>,
}

/// Runs patch cycles, keeping loaded baselines across cycles.
#[derive(Debug, Default)]
pub struct PatchEngine {
    cache: ModuleCache,
}

/// A candidate that changed since the last cycle.
struct Candidate {
    path: PathBuf,
    last: PathBuf,
}

impl PatchEngine {
    /// An engine with an empty module cache.
    #[must_use]
    pub fn new() -> Self {
        PatchEngine::default()
    }

    /// The baseline cache.
    #[must_use]
    pub fn cache(&self) -> &ModuleCache {
        &self.cache
    }

    /// Run one patch cycle.
    ///
    /// `compiler` is required for modules that do not name a precompiled candidate.
    ///
    /// # Errors
    /// Fatal errors abort the whole cycle: [`Error::ModuleLoad`],
    /// [`Error::StructuralMismatch`], [`Error::CompileFailure`] and I/O failures. Unresolvable
    /// function bodies only end up in [`PatchReport::warnings`].
    pub fn run(
        &self,
        config: &PatchConfig,
        mut compiler: Option<&mut dyn CompilerService>,
    ) -> Result<CycleOutcome> {
        config.validate()?;
        let mut report = PatchReport::new(config.patch_no);
        let mut artifacts = Vec::new();
        let mut processed = Vec::new();

        log::info!(
            "Patch cycle {} over {} module(s)",
            config.patch_no,
            config.modules.len()
        );

        for module in &config.modules {
            let Some(candidate) = self.candidate(config, module, compiler.as_deref_mut())? else {
                continue;
            };

            let artifact = self
                .patch_module(config, module, &candidate.path, &mut report)
                .inspect_err(|e| log::error!("Patching {} failed: {}", module.name, e))?;
            artifacts.extend(artifact);
            report.assembly_changed_from_last.push(module.name.clone());
            processed.push(candidate);
        }

        if !processed.is_empty() {
            let last_dir = config.last_dir();
            std::fs::create_dir_all(&last_dir)?;
            for candidate in &processed {
                std::fs::copy(&candidate.path, &candidate.last)?;
                let symbols = candidate.path.with_extension(SYMBOLS_EXTENSION);
                if symbols.is_file() {
                    std::fs::copy(&symbols, candidate.last.with_extension(SYMBOLS_EXTENSION))?;
                }
            }
        }

        log::info!(
            "Patch cycle {} done: {} function(s) to hook, {} warning(s)",
            config.patch_no,
            report.methods_need_hook.len(),
            report.warnings.len()
        );
        Ok(CycleOutcome { report, artifacts })
    }

    /// Locate or compile the candidate of `module`; `None` if it did not change.
    fn candidate(
        &self,
        config: &PatchConfig,
        module: &ModuleConfig,
        compiler: Option<&mut (dyn CompilerService + '_)>,
    ) -> Result<Option<Candidate>> {
        let path = match (&module.candidate, compiler) {
            (Some(path), _) => path.clone(),
            (None, Some(compiler)) => {
                let files = expand_partial_sources(&module.files, &module.sources, MAX_SCAN_THREADS)?;
                compiler.set_output_directory(&config.build_dir());
                compiler
                    .compile(&CompileOptions {
                        module: module.name.clone(),
                        files,
                        references: module.references.clone(),
                        defines: config.defines.clone(),
                        debug_symbols: config.debug_symbols,
                    })?
                    .module
            }
            (None, None) => {
                return Err(Error::Configuration(format!(
                    "module '{}' needs a compiler",
                    module.name
                )))
            }
        };

        let last = config.last_dir().join(module.file_name());
        if unchanged(&path, &last)? {
            log::info!("{} is unchanged since the last cycle", module.name);
            return Ok(None);
        }
        Ok(Some(Candidate { path, last }))
    }

    fn patch_module(
        &self,
        config: &PatchConfig,
        module: &ModuleConfig,
        candidate_path: &Path,
        report: &mut PatchReport,
    ) -> Result<Option<PatchArtifact>> {
        let baseline = self
            .cache
            .get(&ModuleIdentity::from_path(config.baseline_path(module)?))?;
        let candidate = self
            .cache
            .load_uncached(&ModuleIdentity::from_path(candidate_path))?;

        validate(&baseline.index, &candidate.index)?;
        let outcome = diff(&baseline, &candidate)?;
        for warning in &outcome.warnings {
            report.warn(warning);
        }
        if outcome.plan.is_empty() {
            log::info!("{}: no function changed", module.name);
            return Ok(None);
        }

        let assembly = baseline.image.assembly.name.clone();
        let rewritten = rewrite(
            &baseline,
            &candidate,
            &outcome.plan,
            &RewriteOptions::from_config(config),
        )?;
        let records = scan(&baseline, &candidate, &outcome.plan)?;
        let mut builder = ModuleBuilder::from_image(rewritten.image, rewritten.symbols);
        let wrappers = synthesize_wrappers(&mut builder, &baseline.image, &records)?;
        let (image, symbols) = builder.finish();

        let output_dir = config.output_dir();
        std::fs::create_dir_all(&output_dir)?;
        let module_path = output_dir.join(format!("{}.{MODULE_EXTENSION}", rewritten.assembly_name));
        std::fs::write(&module_path, image.to_bytes()?)?;
        let symbols_path = if config.debug_symbols {
            let path = module_path.with_extension(SYMBOLS_EXTENSION);
            std::fs::write(&path, symbols.write()?)?;
            Some(path)
        } else {
            None
        };
        log::info!(
            "Wrote {} ({} function(s), {} generic wrapper(s))",
            module_path.display(),
            outcome.plan.len(),
            wrappers.len()
        );

        for (_, entry) in &outcome.plan {
            let owner_is_generic = owner_is_generic(&candidate, &entry.candidate.owner);
            report
                .methods_need_hook
                .push(MethodHookInfo::from_entry(entry, &assembly, owner_is_generic));
        }
        report.generic_wrappers.extend(
            wrappers
                .iter()
                .map(|wrapper| GenericWrapperInfo::new(&rewritten.assembly_name, wrapper)),
        );

        Ok(Some(PatchArtifact {
            assembly,
            module: module_path,
            symbols: symbols_path,
        }))
    }
}

fn owner_is_generic(module: &LoadedModule, owner: &str) -> bool {
    module
        .index
        .get_type(owner)
        .and_then(|record| module.image.type_def(record.token).ok())
        .is_some_and(|row| !row.generic_params.is_empty())
}

/// Returns `true` if `candidate` has the same bytes as the copy at `last`.
fn unchanged(candidate: &Path, last: &Path) -> Result<bool> {
    if !last.is_file() {
        return Ok(false);
    }
    let current = File::from_file(candidate).map_err(|source| Error::ModuleLoad {
        path: candidate.to_path_buf(),
        source: Box::new(source),
    })?;
    let previous = File::from_file(last)?;
    Ok(current.fingerprint() == previous.fingerprint())
}

/// Install the hooks of `report`, one generation per baseline assembly.
///
/// Each assembly's previous generation is removed first. The plan of every cycle is
/// relative to the loaded baseline, so the new generation covers everything the old one
/// did.
///
/// # Errors
/// Fails only if the registry lock is poisoned; pairs that cannot be resolved are reported
/// in the summaries.
pub fn install_hooks(
    report: &PatchReport,
    installer: &HookInstaller<'_>,
) -> Result<Vec<(String, InstallSummary)>> {
    let pairs = report.hook_pairs();
    let mut summaries = Vec::new();

    for assembly in report.assemblies() {
        let removed = installer.uninstall(assembly)?;
        if removed > 0 {
            log::debug!("Removed {} hook(s) of the previous {} generation", removed, assembly);
        }
        let generation: Vec<_> = pairs
            .iter()
            .filter(|pair| pair.original.assembly == assembly)
            .cloned()
            .collect();
        summaries.push((assembly.to_string(), installer.install(&generation, assembly)));
    }

    Ok(summaries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::signatures::TypeSignature;

    fn module(return_value: i32) -> ModuleBuilder {
        let mut builder = ModuleBuilder::new("Game.dpmod", "Game");
        let t = builder.type_def("Game", "T").public().build();
        builder
            .method(t, "M")
            .public()
            .returns(TypeSignature::I4)
            .document("T.cs", 3)
            .code(|asm| {
                asm.ldc_i4(return_value)?.ret()?;
                Ok(())
            })
            .build()
            .unwrap();
        builder
    }

    fn save(builder: ModuleBuilder, path: &Path) {
        let (image, symbols) = builder.finish();
        std::fs::write(path, image.to_bytes().unwrap()).unwrap();
        std::fs::write(
            path.with_extension(SYMBOLS_EXTENSION),
            symbols.write().unwrap(),
        )
        .unwrap();
    }

    fn config(dir: &Path, baseline: PathBuf, candidate: PathBuf) -> PatchConfig {
        PatchConfig {
            patch_no: 1,
            work_dir: dir.join("work"),
            output_dir: None,
            search_paths: Vec::new(),
            modules: vec![ModuleConfig {
                name: "Game".to_string(),
                files: Vec::new(),
                sources: Vec::new(),
                references: Vec::new(),
                baseline: Some(baseline),
                candidate: Some(candidate),
            }],
            defines: Vec::new(),
            compiler: None,
            debug_symbols: true,
        }
    }

    #[test]
    fn test_cycle_and_unchanged_rerun() {
        let dir = tempfile::tempdir().unwrap();
        let baseline = dir.path().join("Game.dpmod");
        let candidate = dir.path().join("candidate").join("Game.dpmod");
        std::fs::create_dir_all(candidate.parent().unwrap()).unwrap();
        save(module(1), &baseline);
        save(module(2), &candidate);

        let config = config(dir.path(), baseline, candidate);
        let engine = PatchEngine::new();
        let outcome = engine.run(&config, None).unwrap();

        let report = &outcome.report;
        assert_eq!(report.assembly_changed_from_last, ["Game"]);
        assert_eq!(report.methods_need_hook.len(), 1);
        assert_eq!(report.methods_need_hook[0].signature, "System.Int32 M()");
        assert_eq!(outcome.artifacts.len(), 1);
        let artifact = &outcome.artifacts[0];
        assert!(artifact.module.ends_with("patches/Game_patch_1.dpmod"));
        assert!(artifact.symbols.as_ref().unwrap().is_file());
        assert!(config.last_dir().join("Game.dpmod").is_file());

        let rerun = engine.run(&config, None).unwrap();
        assert!(rerun.report.assembly_changed_from_last.is_empty());
        assert!(rerun.report.methods_need_hook.is_empty());
        assert!(rerun.artifacts.is_empty());
    }

    #[test]
    fn test_identical_candidate_has_empty_plan() {
        let dir = tempfile::tempdir().unwrap();
        let baseline = dir.path().join("Game.dpmod");
        let candidate = dir.path().join("Candidate.dpmod");
        save(module(1), &baseline);
        save(module(1), &candidate);

        let outcome = PatchEngine::new()
            .run(&config(dir.path(), baseline, candidate), None)
            .unwrap();
        assert_eq!(outcome.report.assembly_changed_from_last, ["Game"]);
        assert!(outcome.report.methods_need_hook.is_empty());
        assert!(outcome.artifacts.is_empty());
    }

    #[test]
    fn test_missing_baseline_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let candidate = dir.path().join("Candidate.dpmod");
        save(module(2), &candidate);

        let config = config(dir.path(), dir.path().join("missing.dpmod"), candidate);
        let err = PatchEngine::new().run(&config, None).unwrap_err();
        assert!(matches!(err, Error::ModuleLoad { .. }));
        assert!(!config.last_dir().join("Game.dpmod").exists());
    }
}
