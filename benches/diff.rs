//! Benchmarks for the patch pipeline hot paths:
//! - indexing a module
//! - diffing two compiles of the same module
//! - rewriting the changed functions against the baseline

extern crate dotpatch;

use criterion::{criterion_group, criterion_main, Criterion};
use dotpatch::{
    metadata::{
        cache::LoadedModule, image::ModuleBuilder, index::ModuleIndex, signatures::TypeSignature,
    },
    patch::{
        diff::diff,
        rewrite::{rewrite, RewriteOptions},
    },
};
use std::hint::black_box;

const TYPES: usize = 200;
const METHODS_PER_TYPE: usize = 20;

/// `TYPES` types with two fields and `METHODS_PER_TYPE` functions each. Every tenth type
/// gets a different constant in its first function when `edited` is set.
fn module(edited: bool) -> LoadedModule {
    let mut builder = ModuleBuilder::new("Bench.dpmod", "Bench");
    for t in 0..TYPES {
        let owner = builder.type_def("Bench", &format!("T{t}")).public().build();
        let field = builder.field(owner, "value", TypeSignature::I4).build();
        builder
            .field(owner, "shared", TypeSignature::I4)
            .static_field()
            .build();

        for m in 0..METHODS_PER_TYPE {
            let constant = if edited && m == 0 && t % 10 == 0 { 2 } else { 1 };
            builder
                .method(owner, &format!("M{m}"))
                .public()
                .returns(TypeSignature::I4)
                .param(TypeSignature::I4)
                .document(&format!("T{t}.cs"), m as u32 * 4)
                .code(|asm| {
                    asm.ldarg(0)?
                        .ldfld(field)?
                        .ldarg(1)?
                        .add()?
                        .ldc_i4(constant)?
                        .add()?
                        .ret()?;
                    Ok(())
                })
                .build()
                .unwrap();
        }
    }

    let (image, symbols) = builder.finish();
    LoadedModule::from_parts(image, symbols).unwrap()
}

fn bench_index(c: &mut Criterion) {
    let module = module(false);

    c.bench_function("index_build", |b| {
        b.iter(|| {
            let index = ModuleIndex::build(black_box(&module.image), &module.symbols).unwrap();
            black_box(index)
        });
    });
}

fn bench_diff(c: &mut Criterion) {
    let baseline = module(false);
    let candidate = module(true);

    c.bench_function("diff_module", |b| {
        b.iter(|| {
            let outcome = diff(black_box(&baseline), black_box(&candidate)).unwrap();
            black_box(outcome)
        });
    });
}

fn bench_rewrite(c: &mut Criterion) {
    let baseline = module(false);
    let candidate = module(true);
    let plan = diff(&baseline, &candidate).unwrap().plan;
    let options = RewriteOptions { patch_no: 1 };

    c.bench_function("rewrite_changed", |b| {
        b.iter(|| {
            let rewritten = rewrite(&baseline, black_box(&candidate), &plan, &options).unwrap();
            black_box(rewritten)
        });
    });
}

criterion_group!(benches, bench_index, bench_diff, bench_rewrite);
criterion_main!(benches);
