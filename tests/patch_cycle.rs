//! End-to-end patch cycles over modules written to disk.
//!
//! Every test builds a baseline and one or more candidates of a small `Game` module,
//! runs [`PatchEngine`] over them and inspects the report, the written patch module and,
//! where relevant, the hooks installed from the report.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use dotpatch::{
    assembly::decode_stream,
    metadata::{
        cache::{LoadedModule, ModuleIdentity, SYMBOLS_EXTENSION},
        token::TableId,
    },
    patch::{generics::WRAPPER_TYPE, rewrite::ACCESS_BYPASS_ATTRIBUTE},
    prelude::*,
};

/// Shape of the `Game` module under test.
#[derive(Clone, Copy, Default)]
struct Shape {
    /// `T.M` returns `count + value`
    value: i32,
    /// Adds `T.c` after the existing fields
    extra_field: bool,
    /// Adds a virtual `T.V()`
    extra_virtual: bool,
}

impl Shape {
    fn value(value: i32) -> Self {
        Shape {
            value,
            ..Shape::default()
        }
    }
}

/// ```text
/// Game.T { int a; bool b; static int count = 5;
///          int M() => count + value;   // T.cs
///          int N() => 0; }              // T.cs
/// Game.U { int P() => 7; }              // U.cs
/// ```
fn game(shape: Shape) -> ModuleBuilder {
    let mut builder = ModuleBuilder::new("Game.dpmod", "Game");
    let t = builder.type_def("Game", "T").public().build();
    builder.field(t, "a", TypeSignature::I4).build();
    builder.field(t, "b", TypeSignature::Boolean).build();
    let count = builder
        .field(t, "count", TypeSignature::I4)
        .static_field()
        .build();
    if shape.extra_field {
        builder.field(t, "c", TypeSignature::I8).build();
    }

    builder
        .method(t, ".cctor")
        .private()
        .static_method()
        .code(|asm| {
            asm.ldc_i4(5)?.stsfld(count)?.ret()?;
            Ok(())
        })
        .build()
        .unwrap();
    builder
        .method(t, "M")
        .public()
        .returns(TypeSignature::I4)
        .document("T.cs", 10)
        .code(|asm| {
            asm.ldsfld(count)?.ldc_i4(shape.value)?.add()?.ret()?;
            Ok(())
        })
        .build()
        .unwrap();
    builder
        .method(t, "N")
        .public()
        .returns(TypeSignature::I4)
        .document("T.cs", 20)
        .code(|asm| {
            asm.ldc_i4(0)?.ret()?;
            Ok(())
        })
        .build()
        .unwrap();
    if shape.extra_virtual {
        builder
            .method(t, "V")
            .public()
            .virtual_method()
            .code(|asm| {
                asm.ret()?;
                Ok(())
            })
            .build()
            .unwrap();
    }

    let u = builder.type_def("Game", "U").public().build();
    builder
        .method(u, "P")
        .public()
        .returns(TypeSignature::I4)
        .document("U.cs", 3)
        .code(|asm| {
            asm.ldc_i4(7)?.ret()?;
            Ok(())
        })
        .build()
        .unwrap();

    builder
}

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

/// A work directory holding `Game.dpmod` as the loaded baseline.
struct Workspace {
    dir: tempfile::TempDir,
}

impl Workspace {
    fn new() -> Self {
        let workspace = Workspace {
            dir: tempfile::tempdir().unwrap(),
        };
        save(game(Shape::value(1)), &workspace.baseline());
        workspace
    }

    fn baseline(&self) -> PathBuf {
        self.dir.path().join("game").join("Game.dpmod")
    }

    /// Write a candidate compiled for cycle `patch_no`.
    fn candidate(&self, patch_no: u32, builder: ModuleBuilder) -> PathBuf {
        let path = self
            .dir
            .path()
            .join(format!("build{patch_no}"))
            .join("Game.dpmod");
        save(builder, &path);
        path
    }

    fn config(&self, patch_no: u32, candidate: PathBuf) -> PatchConfig {
        let json = serde_json::json!({
            "patchNo": patch_no,
            "workDir": self.dir.path().join("work"),
            "searchPaths": [self.baseline().parent().unwrap()],
            "modules": [{ "name": "Game", "candidate": candidate }],
        });
        PatchConfig::from_json(&json.to_string()).unwrap()
    }
}

/// Resolves descriptors to stable fake addresses, handed out on first use.
#[derive(Default)]
struct FakeRuntime {
    addresses: Mutex<HashMap<MethodDescriptor, EntryPoint>>,
}

impl FakeRuntime {
    fn address(&self, assembly: &str, type_name: &str, signature: &str) -> EntryPoint {
        self.resolve(&MethodDescriptor::new(assembly, type_name, signature))
            .unwrap()
    }
}

impl MethodResolver for FakeRuntime {
    fn resolve(&self, method: &MethodDescriptor) -> Result<EntryPoint> {
        if method.type_name.contains("Missing") {
            return Err(Error::Error(format!("{method} is not loaded")));
        }
        let mut addresses = self.addresses.lock().unwrap();
        let next = EntryPoint(0x1000 * (addresses.len() + 1));
        Ok(*addresses.entry(method.clone()).or_insert(next))
    }
}

#[test]
fn test_changed_function_is_patched_and_hooked() -> Result<()> {
    let workspace = Workspace::new();
    let candidate = workspace.candidate(1, game(Shape::value(2)));
    let config = workspace.config(1, candidate);
    let engine = PatchEngine::new();

    let outcome = engine.run(&config, None)?;
    let report = &outcome.report;
    assert_eq!(report.patch_no, 1);
    assert_eq!(report.assembly_changed_from_last, ["Game"]);
    assert!(report.warnings.is_empty());

    // M changed; N shares its document; U.P lives elsewhere
    let hooked: Vec<_> = report
        .methods_need_hook
        .iter()
        .map(|m| (m.type_name.as_str(), m.signature.as_str(), m.il_changed))
        .collect();
    assert_eq!(
        hooked,
        [
            ("Game.T", "System.Int32 M()", true),
            ("Game.T", "System.Int32 N()", false)
        ]
    );
    let m = &report.methods_need_hook[0];
    assert_eq!(m.assembly, "Game");
    assert_eq!(m.document.as_deref(), Some("T.cs"));
    assert!(m.is_public && !m.is_static && !m.is_constructor && !m.is_generic);

    // The written patch module binds M to the baseline's static and keeps its own
    // initializer from resetting it
    let artifact = &outcome.artifacts[0];
    assert!(artifact.module.ends_with("work/patches/Game_patch_1.dpmod"));
    let patch = LoadedModule::load(&ModuleIdentity::from_path(&artifact.module))?;
    assert_eq!(patch.image.assembly.name, "Game_patch_1");
    assert!(patch
        .image
        .custom_attributes
        .iter()
        .any(|a| a.attribute_type == ACCESS_BYPASS_ATTRIBUTE));
    assert!(patch.image.find_type_def(WRAPPER_TYPE).is_none());

    let record = patch.index.find_method("Game.T", "System.Int32 M()").unwrap();
    let row = patch.image.method(record.token)?;
    let instructions = decode_stream(&row.body.as_ref().unwrap().code)?;
    let field = instructions[0].token().unwrap();
    assert!(field.is_table(TableId::MemberRef));

    let t = patch.index.get_type("Game.T").unwrap();
    let cctor = patch.image.method(t.static_initializer.unwrap())?;
    assert_eq!(cctor.body.as_ref().unwrap().code, [dotpatch::assembly::opcodes::RET]);

    // Install the report's hooks against a fake runtime
    let runtime = FakeRuntime::default();
    let patcher = Arc::new(SlotPatcher::new());
    let registry = HookRegistry::new(patcher.clone());
    let installer = HookInstaller::new(&registry, &runtime);

    let summaries = install_hooks(report, &installer)?;
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].0, "Game");
    assert!(summaries[0].1.is_complete());
    assert_eq!(registry.hooks_with_tag("Game").len(), 2);

    let original = runtime.address("Game", "Game.T", "System.Int32 M()");
    let replacement = runtime.address("Game_patch_1", "Game.T", "System.Int32 M()");
    assert_eq!(patcher.dispatch(original), replacement);

    // Second edit: the new generation replaces the first one wholesale
    let candidate = workspace.candidate(2, game(Shape::value(3)));
    let config = workspace.config(2, candidate);
    let outcome = engine.run(&config, None)?;
    assert_eq!(outcome.report.methods_need_hook.len(), 2);

    install_hooks(&outcome.report, &installer)?;
    assert_eq!(registry.hooks_with_tag("Game").len(), 2);
    assert_eq!(registry.len(), 2);
    let second = runtime.address("Game_patch_2", "Game.T", "System.Int32 M()");
    assert_eq!(patcher.dispatch(original), second);

    // Installing the same report again changes nothing
    install_hooks(&outcome.report, &installer)?;
    assert_eq!(registry.len(), 2);
    assert_eq!(patcher.dispatch(original), second);
    Ok(())
}

#[test]
fn test_unchanged_candidate_is_skipped() -> Result<()> {
    let workspace = Workspace::new();
    let candidate = workspace.candidate(1, game(Shape::value(2)));
    let engine = PatchEngine::new();

    engine.run(&workspace.config(1, candidate.clone()), None)?;
    let again = engine.run(&workspace.config(2, candidate), None)?;
    assert!(again.report.assembly_changed_from_last.is_empty());
    assert!(again.report.methods_need_hook.is_empty());
    assert!(again.artifacts.is_empty());
    Ok(())
}

#[test]
fn test_added_field_rejects_the_cycle() {
    let workspace = Workspace::new();
    let candidate = workspace.candidate(
        1,
        game(Shape {
            value: 2,
            extra_field: true,
            ..Shape::default()
        }),
    );
    let config = workspace.config(1, candidate);

    let err = PatchEngine::new().run(&config, None).unwrap_err();
    match &err {
        Error::StructuralMismatch { type_name, .. } => assert_eq!(type_name, "Game.T"),
        other => panic!("unexpected error {other:?}"),
    }
    assert!(err.is_fatal());
    assert!(!config.output_dir().join("Game_patch_1.dpmod").exists());
    assert!(!config.last_dir().join("Game.dpmod").exists());
}

#[test]
fn test_new_virtual_rejects_the_cycle() {
    let workspace = Workspace::new();
    let candidate = workspace.candidate(
        1,
        game(Shape {
            value: 1,
            extra_virtual: true,
            ..Shape::default()
        }),
    );

    let err = PatchEngine::new()
        .run(&workspace.config(1, candidate), None)
        .unwrap_err();
    assert!(matches!(err, Error::StructuralMismatch { .. }));
}

#[test]
fn test_unresolvable_hook_is_reported_and_skipped() -> Result<()> {
    let mut report = PatchReport::new(1);
    for type_name in ["Game.T", "Game.Missing"] {
        report.methods_need_hook.push(MethodHookInfo {
            name: "M".to_string(),
            type_name: type_name.to_string(),
            assembly: "Game".to_string(),
            signature: "System.Int32 M()".to_string(),
            is_constructor: false,
            is_generic: false,
            is_public: true,
            is_static: false,
            is_lambda: false,
            il_changed: true,
            document: None,
            return_type: "System.Int32".to_string(),
            param_types: Vec::new(),
        });
    }

    let runtime = FakeRuntime::default();
    let registry = HookRegistry::new(Arc::new(SlotPatcher::new()));
    let installer = HookInstaller::new(&registry, &runtime);
    let summaries = install_hooks(&report, &installer)?;

    let summary = &summaries[0].1;
    assert_eq!(summary.installed.len(), 1);
    assert_eq!(summary.failures.len(), 1);
    assert_eq!(summary.failures[0].original.type_name, "Game.Missing");
    assert!(!summary.failures[0].error.is_fatal());
    Ok(())
}
