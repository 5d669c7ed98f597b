//! Method diffing.
//!
//! [`diff`] compares every hookable function of the baseline with its same-signature
//! counterpart in the candidate. Bodies are decoded and rendered symbolically, so two
//! compiles that only number their metadata rows differently compare equal. A pair is
//! changed if the instruction count differs, any rendered instruction differs, or the
//! exception clauses differ.
//!
//! A second pass adds every other function compiled from the same source document as a
//! changed one, marked `il_changed = false`, so sequence points of the whole edited file
//! stay coherent after the patch.

use std::sync::Arc;

use crate::{
    assembly::{decode_stream, label, render_body},
    metadata::{
        cache::LoadedModule,
        flags::ExceptionHandlerFlags,
        image::{ExceptionHandler, ModuleImage},
        index::MethodRecord,
        signatures::TypeNames,
    },
    patch::plan::{HookEntry, HookPlan},
    Error, Result,
};

/// Result of diffing two modules.
#[derive(Debug, Default)]
pub struct DiffOutcome {
    /// Functions to redirect
    pub plan: HookPlan,
    /// Functions skipped because a reference in their body could not be resolved
    pub warnings: Vec<Error>,
}

fn render_handler(handler: &ExceptionHandler, image: &ModuleImage) -> Result<String> {
    let kind = if handler.flags.contains(ExceptionHandlerFlags::FILTER) {
        format!("filter {}", label(handler.filter_offset))
    } else if handler.flags.contains(ExceptionHandlerFlags::FINALLY) {
        "finally".to_string()
    } else if handler.flags.contains(ExceptionHandlerFlags::FAULT) {
        "fault".to_string()
    } else {
        format!("catch {}", image.type_name(handler.class_token)?)
    };

    Ok(format!(
        ".try {} to {} {} handler {} to {}",
        label(handler.try_offset),
        label(handler.try_offset + handler.try_length),
        kind,
        label(handler.handler_offset),
        label(handler.handler_offset + handler.handler_length)
    ))
}

/// Rendered instructions and exception clauses of a function.
struct RenderedBody {
    instructions: Vec<String>,
    handlers: Vec<String>,
}

fn render_method(module: &LoadedModule, method: &MethodRecord) -> Result<RenderedBody> {
    let row = module.image.method(method.token)?;
    let Some(body) = &row.body else {
        return Ok(RenderedBody {
            instructions: Vec::new(),
            handlers: Vec::new(),
        });
    };

    let instructions = decode_stream(&body.code)?;
    Ok(RenderedBody {
        instructions: render_body(&instructions, &module.image)?,
        handlers: body
            .exception_handlers
            .iter()
            .map(|handler| render_handler(handler, &module.image))
            .collect::<Result<Vec<_>>>()?,
    })
}

/// Returns `true` if the two functions' bodies differ.
///
/// # Errors
/// Returns [`Error::ResolutionFailure`] if an operand of either body does not resolve, and
/// parsing errors for undecodable bodies.
pub fn body_changed(
    baseline: &LoadedModule,
    old: &MethodRecord,
    candidate: &LoadedModule,
    new: &MethodRecord,
) -> Result<bool> {
    let old = render_method(baseline, old)?;
    let new = render_method(candidate, new)?;

    if old.instructions.len() != new.instructions.len() {
        return Ok(true);
    }
    if old
        .instructions
        .iter()
        .zip(&new.instructions)
        .any(|(a, b)| a != b)
    {
        return Ok(true);
    }
    Ok(old.handlers != new.handlers)
}

/// Find every function of `baseline` whose replacement in `candidate` must be hooked.
///
/// # Errors
/// Returns [`Error::StructuralMismatch`] if a baseline type or function has no counterpart
/// in the candidate. Functions with unresolvable references are skipped and reported in
/// [`DiffOutcome::warnings`]; any other error aborts the diff.
pub fn diff(baseline: &LoadedModule, candidate: &LoadedModule) -> Result<DiffOutcome> {
    let mut outcome = DiffOutcome::default();

    for record in baseline.index.types.values() {
        if record.is_bookkeeping() || baseline.index.is_in_closure_container(&record.signature) {
            continue;
        }
        let Some(counterpart) = candidate.index.get_type(&record.signature) else {
            return Err(Error::mismatch(
                &record.signature,
                None,
                "type missing from the candidate",
            ));
        };

        for old in record.methods.values().filter(|method| !method.is_closure) {
            let Some(new) = counterpart.methods.get(&old.signature) else {
                return Err(Error::mismatch(
                    &record.signature,
                    Some(old.signature.clone()),
                    "function missing from the candidate",
                ));
            };

            match body_changed(baseline, old, candidate, new) {
                Ok(true) => outcome.plan.insert(HookEntry {
                    baseline: old.clone(),
                    candidate: new.clone(),
                    il_changed: true,
                }),
                Ok(false) => {}
                Err(error) if !error.is_fatal() => {
                    log::warn!("Skipping {}: {}", old.full_name(), error);
                    outcome.warnings.push(error);
                }
                Err(error) => return Err(error),
            }
        }
    }

    let documents: Vec<String> = outcome
        .plan
        .changed_documents()
        .into_iter()
        .map(str::to_string)
        .collect();
    if documents.is_empty() {
        return Ok(outcome);
    }

    let siblings: Vec<(Arc<MethodRecord>, Arc<MethodRecord>)> = candidate
        .index
        .methods()
        .filter(|method| !method.is_closure)
        .filter(|method| {
            method
                .document
                .as_ref()
                .is_some_and(|document| documents.contains(document))
        })
        .filter(|method| !outcome.plan.contains(&method.full_name()))
        .filter(|method| {
            candidate
                .index
                .get_type(&method.owner)
                .is_some_and(|owner| !owner.is_bookkeeping())
                && !candidate.index.is_in_closure_container(&method.owner)
        })
        .filter_map(|method| {
            baseline
                .index
                .find_method(&method.owner, &method.signature)
                .map(|old| (old.clone(), method.clone()))
        })
        .collect();

    for (old, new) in siblings {
        log::debug!(
            "{} shares a document with a changed function",
            new.full_name()
        );
        outcome.plan.insert(HookEntry {
            baseline: old,
            candidate: new,
            il_changed: false,
        });
    }

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{
        image::{ModuleBuilder, ModuleImage},
        signatures::TypeSignature,
        symbols::DebugSymbols,
        token::Token,
    };

    fn loaded(image: ModuleImage, symbols: DebugSymbols) -> LoadedModule {
        LoadedModule::from_parts(image, symbols).unwrap()
    }

    /// `Game.T` with `M() -> value`, plus `N()` in the same document and `Other()` elsewhere.
    fn game(value: i32, reorder_rows: bool) -> LoadedModule {
        let mut builder = ModuleBuilder::new("Game.dll", "Game");
        if reorder_rows {
            // Shifts every reference row by one
            builder.corlib_type("System", "Console");
        }
        let t = builder.type_def("Game", "T").public().build();
        let hp = builder.field(t, "hp", TypeSignature::I4).build();
        builder
            .method(t, "M")
            .public()
            .returns(TypeSignature::I4)
            .document("T.cs", 3)
            .code(|asm| {
                asm.ldc_i4(value)?.ret()?;
                Ok(())
            })
            .build()
            .unwrap();
        builder
            .method(t, "N")
            .public()
            .document("T.cs", 8)
            .code(|asm| {
                asm.ldarg(0)?.ldc_i4(0)?.stfld(hp)?.ret()?;
                Ok(())
            })
            .build()
            .unwrap();
        builder
            .method(t, "Other")
            .document("Other.cs", 1)
            .code(|asm| {
                asm.ret()?;
                Ok(())
            })
            .build()
            .unwrap();
        let (image, symbols) = builder.finish();
        loaded(image, symbols)
    }

    #[test]
    fn test_identical_modules_give_empty_plan() {
        let outcome = diff(&game(1, false), &game(1, false)).unwrap();
        assert!(outcome.plan.is_empty());
        assert!(outcome.warnings.is_empty());
    }

    #[test]
    fn test_row_renumbering_is_not_a_change() {
        let outcome = diff(&game(1, false), &game(1, true)).unwrap();
        assert!(outcome.plan.is_empty());
    }

    #[test]
    fn test_changed_function_pulls_in_document_siblings() {
        let outcome = diff(&game(1, false), &game(2, false)).unwrap();
        let keys: Vec<_> = outcome.plan.keys().collect();
        assert_eq!(
            keys,
            ["Game.T::System.Int32 M()", "Game.T::System.Void N()"]
        );
        assert!(outcome.plan.get("Game.T::System.Int32 M()").unwrap().il_changed);
        assert!(!outcome.plan.get("Game.T::System.Void N()").unwrap().il_changed);
    }

    #[test]
    fn test_missing_counterpart_is_fatal() {
        let mut builder = ModuleBuilder::new("Game.dll", "Game");
        builder.type_def("Game", "T").public().build();
        let (image, symbols) = builder.finish();

        let err = diff(&game(1, false), &loaded(image, symbols)).unwrap_err();
        assert!(matches!(err, Error::StructuralMismatch { .. }));
        assert!(err.to_string().contains("System.Int32 M()"));
    }

    #[test]
    fn test_unresolvable_body_is_a_warning() {
        let baseline = game(1, false);
        let candidate = game(1, false);
        let n = candidate
            .index
            .find_method("Game.T", "System.Void N()")
            .unwrap()
            .token;
        let mut image = candidate.image.clone();
        if let Some(body) = image.method_mut(n).unwrap().body.as_mut() {
            // ldarg.0; ldc.i4.0; stfld <dangling>
            body.code[3..7].copy_from_slice(&Token::new(0x0400_0009).value().to_le_bytes());
        }
        let candidate = loaded(image, candidate.symbols.clone());

        let outcome = diff(&baseline, &candidate).unwrap();
        assert!(outcome.plan.is_empty());
        assert_eq!(outcome.warnings.len(), 1);
        assert!(!outcome.warnings[0].is_fatal());
    }

    #[test]
    fn test_closures_and_undocumented_functions_do_not_propagate() {
        let build = |value: i32| {
            let mut builder = ModuleBuilder::new("Game.dll", "Game");
            let t = builder.type_def("Game", "T").public().build();
            let lambdas = builder.type_def("", "<>c").nested_in(t).build();
            builder
                .method(t, "M")
                .document("T.cs", 3)
                .returns(TypeSignature::I4)
                .code(|asm| {
                    asm.ldc_i4(value)?.ret()?;
                    Ok(())
                })
                .build()
                .unwrap();
            builder
                .method(lambdas, "<M>b__0_0")
                .document("T.cs", 4)
                .code(|asm| {
                    asm.ret()?;
                    Ok(())
                })
                .build()
                .unwrap();
            builder
                .method(t, "Synthesized")
                .code(|asm| {
                    asm.ret()?;
                    Ok(())
                })
                .build()
                .unwrap();
            let (image, symbols) = builder.finish();
            loaded(image, symbols)
        };

        let outcome = diff(&build(1), &build(5)).unwrap();
        let keys: Vec<_> = outcome.plan.keys().collect();
        assert_eq!(keys, ["Game.T::System.Int32 M()"]);
    }
}
