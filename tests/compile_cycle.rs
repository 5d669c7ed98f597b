//! Patch cycles that compile their candidate, and cycles over patched generic functions.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use dotpatch::{
    metadata::cache::{LoadedModule, ModuleIdentity, MODULE_EXTENSION, SYMBOLS_EXTENSION},
    patch::generics::{METHOD_INDEX_ATTRIBUTE, METHOD_WRAPPER_ATTRIBUTE, WRAPPER_TYPE},
    prelude::*,
};

fn save(builder: ModuleBuilder, path: &Path) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    let (image, symbols) = builder.finish();
    std::fs::write(path, image.to_bytes().unwrap()).unwrap();
    std::fs::write(
        path.with_extension(SYMBOLS_EXTENSION),
        symbols.write().unwrap(),
    )
    .unwrap();
}

/// `Game.Player.Hit()` returning `value`.
fn player(value: i32) -> ModuleBuilder {
    let mut builder = ModuleBuilder::new("Game.dpmod", "Game");
    let player = builder.type_def("Game", "Player").public().build();
    builder.field(player, "hp", TypeSignature::I4).public().build();
    builder
        .method(player, "Hit")
        .public()
        .returns(TypeSignature::I4)
        .document("Player.cs", 4)
        .code(|asm| {
            asm.ldc_i4(value)?.ret()?;
            Ok(())
        })
        .build()
        .unwrap();
    builder
}

/// Stands in for the external compiler: copies a prebuilt image and records the request.
struct PrebuiltCompiler {
    image: PathBuf,
    output_dir: PathBuf,
    requests: Vec<CompileOptions>,
}

impl CompilerService for PrebuiltCompiler {
    fn set_output_directory(&mut self, dir: &Path) {
        self.output_dir = dir.to_path_buf();
    }

    fn compile(&mut self, options: &CompileOptions) -> Result<CompileOutput> {
        self.requests.push(options.clone());
        std::fs::create_dir_all(&self.output_dir)?;
        let module = self
            .output_dir
            .join(format!("{}.{MODULE_EXTENSION}", options.module));
        std::fs::copy(&self.image, &module)?;
        Ok(CompileOutput {
            module,
            symbols: None,
            diagnostics: Vec::new(),
        })
    }
}

#[test]
fn test_compiled_candidate_includes_partial_siblings() -> Result<()> {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    let baseline = root.join("game").join("Game.dpmod");
    save(player(1), &baseline);
    let prebuilt = root.join("prebuilt").join("Game.dpmod");
    save(player(2), &prebuilt);

    let sources = root.join("src");
    std::fs::create_dir_all(&sources).unwrap();
    for (name, text) in [
        ("Player.cs", "namespace Game { public partial class Player { } }"),
        ("Player.Combat.cs", "namespace Game { partial class Player { } }"),
        ("Enemy.cs", "namespace Game { class Enemy { } }"),
    ] {
        std::fs::write(sources.join(name), text).unwrap();
    }

    let json = serde_json::json!({
        "patchNo": 4,
        "workDir": root.join("work"),
        "modules": [{
            "name": "Game",
            "baseline": baseline,
            "files": [sources.join("Player.cs")],
            "sources": [
                sources.join("Enemy.cs"),
                sources.join("Player.Combat.cs"),
                sources.join("Player.cs"),
            ],
        }],
        "defines": ["HOTPATCH"],
        "compiler": { "path": "unused" },
    });
    let config = PatchConfig::from_json(&json.to_string())?;

    let mut compiler = PrebuiltCompiler {
        image: prebuilt,
        output_dir: PathBuf::new(),
        requests: Vec::new(),
    };
    let outcome = PatchEngine::new().run(&config, Some(&mut compiler))?;

    assert_eq!(compiler.output_dir, config.build_dir());
    let request = &compiler.requests[0];
    assert_eq!(request.module, "Game");
    assert_eq!(request.defines, ["HOTPATCH"]);
    assert_eq!(
        request.files,
        [sources.join("Player.cs"), sources.join("Player.Combat.cs")]
    );

    assert_eq!(outcome.report.patch_no, 4);
    assert_eq!(outcome.report.methods_need_hook.len(), 1);
    assert_eq!(
        outcome.report.hook_pairs()[0].replacement.to_string(),
        "[Game_patch_4]Game.Player::System.Int32 Hit()"
    );
    assert!(config.last_dir().join("Game.dpmod").is_file());
    Ok(())
}

/// `Game.Util.Echo<U>(U)` and a caller instantiating it over three reference types and
/// one value type.
fn generic_game(value: i32) -> ModuleBuilder {
    let mut builder = ModuleBuilder::new("Game.dpmod", "Game");
    let player = builder.type_def("Game", "Player").public().build();
    let util = builder.type_def("Game", "Util").public().build();
    let echo = builder
        .method(util, "Echo")
        .public()
        .static_method()
        .generic_params(&["U"])
        .returns(TypeSignature::GenericParamMethod(0))
        .param(TypeSignature::GenericParamMethod(0))
        .document("Util.cs", 8)
        .code(|asm| {
            asm.ldc_i4(value)?.pop()?.ldarg(0)?.ret()?;
            Ok(())
        })
        .build()
        .unwrap();

    let specs = [
        builder.method_spec(echo, vec![TypeSignature::String]),
        builder.method_spec(echo, vec![TypeSignature::Class(player)]),
        builder.method_spec(echo, vec![TypeSignature::Object]),
        builder.method_spec(echo, vec![TypeSignature::I4]),
    ];
    builder
        .method(util, "Callers")
        .static_method()
        .code(|asm| {
            for spec in specs {
                asm.ldnull()?.call(spec)?.pop()?;
            }
            asm.ret()?;
            Ok(())
        })
        .build()
        .unwrap();
    builder
}

#[test]
fn test_generic_function_gets_shared_and_value_wrappers() -> Result<()> {
    let dir = tempfile::tempdir().unwrap();
    let baseline = dir.path().join("game").join("Game.dpmod");
    let candidate = dir.path().join("build").join("Game.dpmod");
    save(generic_game(1), &baseline);
    save(generic_game(2), &candidate);

    let json = serde_json::json!({
        "patchNo": 1,
        "workDir": dir.path().join("work"),
        "modules": [{ "name": "Game", "baseline": baseline, "candidate": candidate }],
        "debugSymbols": false,
    });
    let config = PatchConfig::from_json(&json.to_string())?;
    let outcome = PatchEngine::new().run(&config, None)?;

    let report = &outcome.report;
    assert_eq!(report.methods_need_hook.len(), 1);
    assert!(report.methods_need_hook[0].is_generic);

    let args: Vec<_> = report
        .generic_wrappers
        .iter()
        .map(|w| w.type_args.clone())
        .collect();
    assert_eq!(
        args,
        [vec!["System.Int32".to_string()], vec!["System.Object".to_string()]]
    );
    assert!(report
        .generic_wrappers
        .iter()
        .all(|w| w.assembly == "Game_patch_1" && w.index == 0));

    let artifact = &outcome.artifacts[0];
    assert_eq!(artifact.symbols, None);
    let patch = LoadedModule::load(&ModuleIdentity::from_path(&artifact.module))?;
    assert!(patch.image.find_type_def(WRAPPER_TYPE).is_some());
    let count = |kind: &str| {
        patch
            .image
            .custom_attributes
            .iter()
            .filter(|a| a.attribute_type == kind)
            .count()
    };
    assert_eq!(count(METHOD_INDEX_ATTRIBUTE), 1);
    assert_eq!(count(METHOD_WRAPPER_ATTRIBUTE), 2);

    // Each instantiation is redirected to its wrapper, never to the generic definition
    let pairs = report.hook_pairs();
    assert_eq!(pairs.len(), 2);
    for (pair, arg) in pairs.iter().zip(["System.Int32", "System.Object"]) {
        assert_eq!(pair.original.assembly, "Game");
        assert_eq!(pair.original.type_name, "Game.Util");
        assert_eq!(pair.original.type_args, [arg]);
        assert_eq!(pair.replacement.assembly, "Game_patch_1");
        assert_eq!(pair.replacement.type_name, WRAPPER_TYPE);
        assert!(pair.replacement.type_args.is_empty());
    }

    let runtime = Addresses::default();
    let patcher = Arc::new(SlotPatcher::new());
    let registry = HookRegistry::new(patcher.clone());
    let installer = HookInstaller::new(&registry, &runtime);
    let summaries = install_hooks(report, &installer)?;
    assert_eq!(summaries.len(), 1);
    assert!(summaries[0].1.is_complete());
    assert_eq!(registry.hooks_with_tag("Game").len(), 2);

    for pair in &pairs {
        let original = runtime.resolve(&pair.original)?;
        let replacement = runtime.resolve(&pair.replacement)?;
        assert_eq!(patcher.dispatch(original), replacement);
    }
    let definition = runtime.resolve(&MethodDescriptor::new(
        "Game",
        "Game.Util",
        &pairs[0].original.signature,
    ))?;
    assert_eq!(patcher.dispatch(definition), definition);
    Ok(())
}

/// Hands out a stable address per descriptor on first use.
#[derive(Default)]
struct Addresses(Mutex<HashMap<MethodDescriptor, EntryPoint>>);

impl MethodResolver for Addresses {
    fn resolve(&self, method: &MethodDescriptor) -> Result<EntryPoint> {
        let mut addresses = self.0.lock().unwrap();
        let next = EntryPoint(0x100 * (addresses.len() + 1));
        Ok(*addresses.entry(method.clone()).or_insert(next))
    }
}
