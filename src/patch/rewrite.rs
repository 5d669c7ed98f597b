//! Reference rewriting.
//!
//! A patched function must observe the same statics and objects as the code it replaces.
//! [`rewrite`] therefore redirects every type, field and function its body names to the
//! baseline's copy whenever one exists, by replacing the candidate's own definition token
//! with an imported reference (`AssemblyRef` + `TypeRef` / `MemberRef`) into the baseline
//! assembly.
//!
//! Entities without a baseline counterpart (new functions, new types, closures) stay local.
//! Their bodies join the patch set and are rewritten the same way, transitively. New types
//! contribute all of their functions.
//!
//! Constructed references (`TypeSpec`, `MemberRef` on generic instances, `MethodSpec`) are
//! rebuilt by [`Importer::import_signature`], which substitutes every embedded token
//! recursively, so `List<Player[]>` becomes `List<[Game]Player[]>`.
//!
//! The result is renamed to `<assembly>_patch_<N>` so the runtime accepts it next to the
//! loaded module, and is tagged with `IgnoresAccessChecksToAttribute` naming the baseline
//! assembly so imported references to private members bind. Finally the static
//! initializers of patched baseline types are neutralized.

use std::{
    collections::{BTreeSet, HashMap, VecDeque},
    path::Path,
};

use crate::{
    assembly::patch_tokens,
    metadata::{
        cache::LoadedModule,
        flags::ExceptionHandlerFlags,
        image::{AttributeArg, CustomAttributeRow, ModuleBuilder, ModuleImage},
        index::ModuleIndex,
        signatures::{
            MemberSignature, SignatureField, SignatureMethod, SignatureParameter, TypeSignature,
        },
        symbols::DebugSymbols,
        token::{TableId, Token},
    },
    patch::{cctor::neutralize, config::PatchConfig, plan::HookPlan},
    Result,
};

/// Attribute granting the patch module access to non-public baseline members.
pub const ACCESS_BYPASS_ATTRIBUTE: &str =
    "System.Runtime.CompilerServices.IgnoresAccessChecksToAttribute";

/// Knobs of one rewrite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewriteOptions {
    /// Patch sequence number, part of the new assembly name
    pub patch_no: u32,
}

impl RewriteOptions {
    /// Options for the cycle described by `config`.
    #[must_use]
    pub fn from_config(config: &PatchConfig) -> Self {
        RewriteOptions {
            patch_no: config.patch_no,
        }
    }
}

/// The candidate after rewriting.
#[derive(Debug)]
pub struct RewrittenModule {
    /// Rewritten tables
    pub image: ModuleImage,
    /// Symbols of the candidate; `MethodDef` tokens are unchanged
    pub symbols: DebugSymbols,
    /// New assembly name
    pub assembly_name: String,
    /// Every `MethodDef` whose body was rewritten
    pub patch_set: BTreeSet<Token>,
    /// Number of candidate definitions redirected to the baseline
    pub imported: usize,
    /// Types whose static initializer was neutralized
    pub neutralized: Vec<Token>,
}

/// Maps candidate tokens to tokens that are valid in the rewritten module.
///
/// Rows are only ever appended, so every candidate token stays valid; a token maps to itself
/// when it is local or already external.
pub struct Importer<'a> {
    baseline: &'a ModuleIndex,
    candidate: &'a ModuleIndex,
    builder: ModuleBuilder,
    scope: Token,
    map: HashMap<Token, Token>,
    local_types: BTreeSet<Token>,
    pending_types: Vec<Token>,
    discovered: Vec<Token>,
    imported: usize,
}

impl<'a> Importer<'a> {
    /// Start importing into a copy of `candidate`.
    pub fn new(baseline: &'a LoadedModule, candidate: &'a LoadedModule) -> Self {
        let mut builder =
            ModuleBuilder::from_image(candidate.image.clone(), candidate.symbols.clone());
        let scope = builder.assembly_ref(
            &baseline.image.assembly.name,
            baseline.image.assembly.version,
        );

        Importer {
            baseline: &baseline.index,
            candidate: &candidate.index,
            builder,
            scope,
            map: HashMap::new(),
            local_types: BTreeSet::new(),
            pending_types: Vec::new(),
            discovered: Vec::new(),
            imported: 0,
        }
    }

    /// The image being rewritten.
    #[must_use]
    pub fn image(&self) -> &ModuleImage {
        self.builder.image()
    }

    /// Number of candidate definitions redirected to the baseline so far.
    #[must_use]
    pub fn imported(&self) -> usize {
        self.imported
    }

    /// Returns `true` if `token` is a candidate type with a shared baseline counterpart.
    #[must_use]
    pub fn has_counterpart(&self, token: Token) -> bool {
        let Some(record) = self.candidate.type_by_token(token) else {
            return false;
        };
        !record.is_bookkeeping()
            && !self.candidate.is_in_closure_container(&record.signature)
            && self.baseline.get_type(&record.signature).is_some()
            && !self.baseline.is_in_closure_container(&record.signature)
    }

    fn mark_local_type(&mut self, token: Token) {
        if self.local_types.insert(token) {
            self.pending_types.push(token);
        }
    }

    fn import_type_def(&mut self, token: Token) -> Result<Token> {
        if let Some(mapped) = self.map.get(&token) {
            return Ok(*mapped);
        }

        let mapped = if self.has_counterpart(token) {
            let row = self.builder.image().type_def(token)?.clone();
            let scope = if row.enclosing.is_null() {
                self.scope
            } else {
                self.import_type_def(row.enclosing)?
            };

            if scope.is_table(TableId::TypeRef) || scope == self.scope {
                let rows = self.builder.image().type_refs.len();
                let mapped = self.builder.type_ref(scope, &row.namespace, &row.name);
                if self.builder.image().type_refs.len() > rows {
                    self.imported += 1;
                }
                mapped
            } else {
                self.mark_local_type(token);
                token
            }
        } else {
            self.mark_local_type(token);
            token
        };

        self.map.insert(token, mapped);
        Ok(mapped)
    }

    fn import_member(&mut self, token: Token) -> Result<Token> {
        if let Some(mapped) = self.map.get(&token) {
            return Ok(*mapped);
        }

        let image = self.builder.image();
        let (owner, name, signature) = if token.is_table(TableId::Field) {
            let row = image.field(token)?;
            (
                row.parent,
                row.name.clone(),
                MemberSignature::Field(row.signature.clone()),
            )
        } else {
            let row = image.method(token)?;
            (
                row.parent,
                row.name.clone(),
                MemberSignature::Method(row.signature.clone()),
            )
        };
        let full_name = image.member_name(token)?;

        // A new member of a shared type stays a local definition; its owner is only
        // imported when the member itself resolves into the baseline.
        let in_baseline = self.baseline.member_token(&full_name).is_some();
        let class = if in_baseline || !self.has_counterpart(owner) {
            Some(self.import_type_def(owner)?)
        } else {
            None
        };

        let mapped = match class {
            Some(class) if in_baseline && class.is_table(TableId::TypeRef) => {
                let signature = self.import_member_signature(&signature)?;
                let rows = self.builder.image().member_refs.len();
                let mapped = self.builder.member_ref(class, &name, signature);
                if self.builder.image().member_refs.len() > rows {
                    self.imported += 1;
                }
                mapped
            }
            _ => {
                if token.is_table(TableId::MethodDef) {
                    self.discovered.push(token);
                }
                token
            }
        };

        self.map.insert(token, mapped);
        Ok(mapped)
    }

    /// Map one token of the candidate.
    ///
    /// Definitions with a baseline counterpart become references into the baseline;
    /// constructed references are rebuilt around their mapped parts; everything else maps to
    /// itself.
    ///
    /// # Errors
    /// Returns [`crate::Error::ResolutionFailure`] for dangling tokens.
    pub fn import_token(&mut self, token: Token) -> Result<Token> {
        match token.table_id() {
            Some(TableId::TypeDef) => self.import_type_def(token),
            Some(TableId::Field | TableId::MethodDef) => self.import_member(token),
            Some(TableId::TypeSpec) => {
                if let Some(mapped) = self.map.get(&token) {
                    return Ok(*mapped);
                }
                let signature = self.builder.image().type_spec(token)?.signature.clone();
                let imported = self.import_signature(&signature)?;
                let mapped = if imported == signature {
                    token
                } else {
                    self.builder.type_spec(imported)
                };
                self.map.insert(token, mapped);
                Ok(mapped)
            }
            Some(TableId::MemberRef) => {
                if let Some(mapped) = self.map.get(&token) {
                    return Ok(*mapped);
                }
                let row = self.builder.image().member_ref(token)?.clone();
                let class = self.import_token(row.class)?;
                let signature = self.import_member_signature(&row.signature)?;
                let mapped = if class == row.class && signature == row.signature {
                    token
                } else {
                    self.builder.member_ref(class, &row.name, signature)
                };
                self.map.insert(token, mapped);
                Ok(mapped)
            }
            Some(TableId::MethodSpec) => {
                if let Some(mapped) = self.map.get(&token) {
                    return Ok(*mapped);
                }
                let row = self.builder.image().method_spec(token)?.clone();
                let method = self.import_token(row.method)?;
                let args = row
                    .instantiation
                    .generic_args
                    .iter()
                    .map(|arg| self.import_signature(arg))
                    .collect::<Result<Vec<_>>>()?;
                let mapped = if method == row.method && args == row.instantiation.generic_args {
                    token
                } else {
                    self.builder.method_spec(method, args)
                };
                self.map.insert(token, mapped);
                Ok(mapped)
            }
            _ => Ok(token),
        }
    }

    /// Rebuild `signature` with every embedded token imported.
    ///
    /// This is how closed generic instantiations are resolved to their baseline equivalent:
    /// the generic definition and each argument are substituted independently and
    /// recursively, so `Dictionary<Player, List<Fresh>>` keeps the local `Fresh` while
    /// `Player` becomes the baseline's.
    ///
    /// # Errors
    /// Returns [`crate::Error::ResolutionFailure`] for dangling tokens.
    pub fn import_signature(&mut self, signature: &TypeSignature) -> Result<TypeSignature> {
        signature.map_tokens(&mut |token| self.import_token(token))
    }

    fn import_parameter(&mut self, parameter: &SignatureParameter) -> Result<SignatureParameter> {
        Ok(SignatureParameter {
            by_ref: parameter.by_ref,
            base: self.import_signature(&parameter.base)?,
        })
    }

    fn import_method_signature(&mut self, signature: &SignatureMethod) -> Result<SignatureMethod> {
        Ok(SignatureMethod {
            has_this: signature.has_this,
            generic_param_count: signature.generic_param_count,
            return_type: self.import_parameter(&signature.return_type)?,
            params: signature
                .params
                .iter()
                .map(|param| self.import_parameter(param))
                .collect::<Result<Vec<_>>>()?,
        })
    }

    fn import_member_signature(&mut self, signature: &MemberSignature) -> Result<MemberSignature> {
        Ok(match signature {
            MemberSignature::Method(method) => {
                MemberSignature::Method(self.import_method_signature(method)?)
            }
            MemberSignature::Field(field) => MemberSignature::Field(SignatureField {
                base: self.import_signature(&field.base)?,
            }),
        })
    }

    /// Rewrite the signature, locals, exception clauses and operands of `method`.
    ///
    /// # Errors
    /// Fails if the body cannot be decoded or names a dangling token.
    pub fn rewrite_method(&mut self, method: Token) -> Result<()> {
        let row = self.builder.image().method(method)?.clone();
        let signature = self.import_method_signature(&row.signature)?;

        let body = match row.body {
            Some(mut body) => {
                patch_tokens(&mut body.code, |token| self.import_token(token))?;
                for handler in &mut body.exception_handlers {
                    let typed = !handler.flags.intersects(
                        ExceptionHandlerFlags::FILTER
                            | ExceptionHandlerFlags::FINALLY
                            | ExceptionHandlerFlags::FAULT,
                    );
                    if typed && !handler.class_token.is_null() {
                        handler.class_token = self.import_token(handler.class_token)?;
                    }
                }
                for local in &mut body.locals.locals {
                    local.base = self.import_signature(&local.base)?;
                }
                Some(body)
            }
            None => None,
        };

        let row = self.builder.image_mut().method_mut(method)?;
        row.signature = signature;
        row.body = body;
        Ok(())
    }

    /// Shape of a local type: base type and field types.
    fn rewrite_type_shape(&mut self, token: Token) -> Result<()> {
        let extends = self.builder.image().type_def(token)?.extends;
        if !extends.is_null() {
            let extends = self.import_token(extends)?;
            if let Some(index) = token.index() {
                if let Some(row) = self.builder.image_mut().type_defs.get_mut(index) {
                    row.extends = extends;
                }
            }
        }

        let fields: Vec<(Token, TypeSignature)> = self
            .builder
            .image()
            .fields_of(token)
            .map(|(field, row)| (field, row.signature.base.clone()))
            .collect();
        for (field, base) in fields {
            let base = self.import_signature(&base)?;
            if let Some(row) = field
                .index()
                .and_then(|index| self.builder.image_mut().fields.get_mut(index))
            {
                row.signature.base = base;
            }
        }
        Ok(())
    }

    /// Functions discovered as local since the last call, including all functions of newly
    /// discovered local types.
    ///
    /// # Errors
    /// Fails if the shape of a local type cannot be imported.
    pub fn take_discovered(&mut self) -> Result<Vec<Token>> {
        while let Some(token) = self.pending_types.pop() {
            self.rewrite_type_shape(token)?;
            let bodies: Vec<Token> = self
                .builder
                .image()
                .methods_of(token)
                .filter(|(_, row)| row.body.is_some())
                .map(|(method, _)| method)
                .collect();
            self.discovered.extend(bodies);
        }
        Ok(std::mem::take(&mut self.discovered))
    }

    /// Finish, returning the builder over the rewritten image.
    #[must_use]
    pub fn into_builder(self) -> ModuleBuilder {
        self.builder
    }
}

fn patch_module_name(candidate: &str, assembly: &str) -> String {
    match Path::new(candidate).extension().and_then(|ext| ext.to_str()) {
        Some(ext) => format!("{assembly}.{ext}"),
        None => assembly.to_string(),
    }
}

/// Rewrite `candidate` so that the functions of `plan`, and everything they reach that is
/// new, bind to the baseline's state.
///
/// # Errors
/// Fails if a body in the patch set cannot be decoded or references a dangling token.
pub fn rewrite(
    baseline: &LoadedModule,
    candidate: &LoadedModule,
    plan: &HookPlan,
    options: &RewriteOptions,
) -> Result<RewrittenModule> {
    let mut importer = Importer::new(baseline, candidate);
    let mut queue: VecDeque<Token> = plan.iter().map(|(_, entry)| entry.candidate.token).collect();
    let mut patch_set = BTreeSet::new();

    while let Some(method) = queue.pop_front() {
        if !patch_set.insert(method) {
            continue;
        }
        importer.rewrite_method(method)?;
        queue.extend(importer.take_discovered()?);
    }

    let touched: BTreeSet<Token> = patch_set
        .iter()
        .filter_map(|method| importer.image().method(*method).ok().map(|row| row.parent))
        .filter(|owner| importer.has_counterpart(*owner))
        .collect();
    let imported = importer.imported();

    let (mut image, symbols) = importer.into_builder().finish();
    let touched: Vec<Token> = touched.into_iter().collect();
    let neutralized = neutralize(&mut image, &touched);

    let assembly_name = format!("{}_patch_{}", baseline.image.assembly.name, options.patch_no);
    image.name = patch_module_name(&candidate.image.name, &assembly_name);
    image.assembly.name.clone_from(&assembly_name);

    let bypass = CustomAttributeRow {
        parent: Token::from_parts(TableId::Assembly, 1),
        attribute_type: ACCESS_BYPASS_ATTRIBUTE.to_string(),
        args: vec![AttributeArg::String(baseline.image.assembly.name.clone())],
    };
    if !image.custom_attributes.contains(&bypass) {
        image.add_custom_attribute(bypass);
    }

    log::info!(
        "Rewrote {} functions of {} ({} references redirected, {} initializers neutralized)",
        patch_set.len(),
        assembly_name,
        imported,
        neutralized.len()
    );

    Ok(RewrittenModule {
        image,
        symbols,
        assembly_name,
        patch_set,
        imported,
        neutralized,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        assembly::{decode_stream, render_body},
        metadata::signatures::render_type,
        patch::diff::diff,
    };

    fn loaded(builder: ModuleBuilder) -> LoadedModule {
        let (image, symbols) = builder.finish();
        LoadedModule::from_parts(image, symbols).unwrap()
    }

    /// `Game.T { int a; bool b; static int count; int M(); }`
    fn base(builder: &mut ModuleBuilder) -> (Token, Token) {
        let t = builder.type_def("Game", "T").public().build();
        builder.field(t, "a", TypeSignature::I4).build();
        builder.field(t, "b", TypeSignature::Boolean).build();
        let count = builder
            .field(t, "count", TypeSignature::I4)
            .static_field()
            .build();
        (t, count)
    }

    fn baseline() -> LoadedModule {
        let mut builder = ModuleBuilder::new("Game.dll", "Game");
        let (t, count) = base(&mut builder);
        builder
            .method(t, "M")
            .public()
            .returns(TypeSignature::I4)
            .document("T.cs", 1)
            .code(|asm| {
                asm.ldc_i4(1)?.ret()?;
                Ok(())
            })
            .build()
            .unwrap();
        builder
            .method(t, "Bump")
            .public()
            .static_method()
            .code(|asm| {
                asm.ldsfld(count)?.ldc_i4(1)?.add()?.stsfld(count)?.ret()?;
                Ok(())
            })
            .build()
            .unwrap();
        builder
            .method(t, ".cctor")
            .code(|asm| {
                asm.ldc_i4(7)?.stsfld(count)?.ret()?;
                Ok(())
            })
            .build()
            .unwrap();
        loaded(builder)
    }

    #[test]
    fn test_unshared_body_is_left_alone() {
        let baseline = baseline();
        let mut builder = ModuleBuilder::new("Game.dll", "Game");
        let (t, count) = base(&mut builder);
        let m = builder
            .method(t, "M")
            .public()
            .returns(TypeSignature::I4)
            .document("T.cs", 1)
            .code(|asm| {
                asm.ldc_i4(2)?.ret()?;
                Ok(())
            })
            .build()
            .unwrap();
        builder
            .method(t, "Bump")
            .public()
            .static_method()
            .code(|asm| {
                asm.ldsfld(count)?.ldc_i4(1)?.add()?.stsfld(count)?.ret()?;
                Ok(())
            })
            .build()
            .unwrap();
        let candidate = loaded(builder);

        let plan = diff(&baseline, &candidate).unwrap().plan;
        let out = rewrite(&baseline, &candidate, &plan, &RewriteOptions { patch_no: 1 }).unwrap();

        assert_eq!(out.imported, 0);
        assert_eq!(out.patch_set, BTreeSet::from([m]));
        assert_eq!(
            out.image.method(m).unwrap().body,
            candidate.image.method(m).unwrap().body
        );
        assert_eq!(out.assembly_name, "Game_patch_1");
        assert_eq!(out.image.name, "Game_patch_1.dll");
        assert_eq!(
            out.image
                .custom_attributes
                .iter()
                .filter(|a| a.attribute_type == ACCESS_BYPASS_ATTRIBUTE)
                .count(),
            1
        );
    }

    #[test]
    fn test_shared_state_binds_to_baseline() {
        let baseline = baseline();
        let mut builder = ModuleBuilder::new("Game.dll", "Game");
        let (t, count) = base(&mut builder);
        builder
            .method(t, "M")
            .public()
            .returns(TypeSignature::I4)
            .code(|asm| {
                asm.ldc_i4(1)?.ret()?;
                Ok(())
            })
            .build()
            .unwrap();
        let bump = builder
            .method(t, "Bump")
            .public()
            .static_method()
            .code(|asm| {
                asm.ldsfld(count)?.ldc_i4(2)?.add()?.stsfld(count)?.ret()?;
                Ok(())
            })
            .build()
            .unwrap();
        builder
            .method(t, ".cctor")
            .code(|asm| {
                asm.ldc_i4(7)?.stsfld(count)?.ret()?;
                Ok(())
            })
            .build()
            .unwrap();
        let candidate = loaded(builder);

        let plan = diff(&baseline, &candidate).unwrap().plan;
        assert_eq!(plan.len(), 1);
        let out = rewrite(&baseline, &candidate, &plan, &RewriteOptions { patch_no: 4 }).unwrap();

        let code = &out.image.method(bump).unwrap().body.as_ref().unwrap().code;
        let instructions = decode_stream(code).unwrap();
        let field = instructions[0].token().unwrap();
        assert!(field.is_table(TableId::MemberRef));
        let member = out.image.member_ref(field).unwrap();
        let scope = out.image.type_ref(member.class).unwrap().scope;
        assert_eq!(out.image.assembly_ref(scope).unwrap().name, "Game");

        // Same symbolic text, different binding
        assert_eq!(
            render_body(&instructions, &out.image).unwrap()[0],
            "ldsfld Game.T::System.Int32 count"
        );

        // The patched type's static initializer must not run again
        assert_eq!(out.neutralized.len(), 1);
        let cctor = out
            .image
            .methods_of(t)
            .find(|(_, row)| row.name == ".cctor")
            .unwrap()
            .1;
        assert_eq!(cctor.body.as_ref().unwrap().code, vec![0x2A]);
    }

    fn with_new_code() -> (LoadedModule, Token, Token, Token) {
        let mut builder = ModuleBuilder::new("Game.dll", "Game");
        let (t, count) = base(&mut builder);
        let lambdas = builder.type_def("", "<>c").nested_in(t).build();
        let closure = builder
            .method(lambdas, "<M>b__0_0")
            .code(|asm| {
                asm.ldsfld(count)?.pop()?.ret()?;
                Ok(())
            })
            .build()
            .unwrap();
        let helper = builder
            .method(t, "Helper")
            .static_method()
            .returns(TypeSignature::I4)
            .code(|asm| {
                asm.ldsfld(count)?.ret()?;
                Ok(())
            })
            .build()
            .unwrap();
        let fresh = builder.type_def("Game", "Fresh").build();
        let fresh_ctor = builder
            .method(fresh, ".ctor")
            .public()
            .code(|asm| {
                asm.ret()?;
                Ok(())
            })
            .build()
            .unwrap();
        let m = builder
            .method(t, "M")
            .public()
            .returns(TypeSignature::I4)
            .code(|asm| {
                asm.ldftn(closure)?
                    .pop()?
                    .newobj(fresh_ctor)?
                    .pop()?
                    .call(helper)?
                    .ret()?;
                Ok(())
            })
            .build()
            .unwrap();
        builder
            .method(t, "Bump")
            .public()
            .static_method()
            .code(|asm| {
                asm.ldsfld(count)?.ldc_i4(1)?.add()?.stsfld(count)?.ret()?;
                Ok(())
            })
            .build()
            .unwrap();
        builder
            .method(t, ".cctor")
            .code(|asm| {
                asm.ldc_i4(7)?.stsfld(count)?.ret()?;
                Ok(())
            })
            .build()
            .unwrap();
        (loaded(builder), m, closure, helper)
    }

    #[test]
    fn test_new_code_joins_patch_set() {
        let baseline = baseline();
        let (candidate, m, closure, helper) = with_new_code();

        let plan = diff(&baseline, &candidate).unwrap().plan;
        let out = rewrite(&baseline, &candidate, &plan, &RewriteOptions { patch_no: 1 }).unwrap();

        assert!(out.patch_set.contains(&m));
        assert!(out.patch_set.contains(&closure));
        assert!(out.patch_set.contains(&helper));
        assert_eq!(out.patch_set.len(), 4);

        // Local targets stay MethodDefs, their own references are imported
        let m_body = decode_stream(&out.image.method(m).unwrap().body.as_ref().unwrap().code)
            .unwrap();
        assert_eq!(m_body[0].token(), Some(closure));
        assert_eq!(m_body[4].token(), Some(helper));
        let helper_body =
            decode_stream(&out.image.method(helper).unwrap().body.as_ref().unwrap().code)
                .unwrap();
        assert!(helper_body[0].token().unwrap().is_table(TableId::MemberRef));
    }

    #[test]
    fn test_new_member_of_shared_type_imports_nothing() {
        let baseline = baseline();
        let (candidate, _, _, helper) = with_new_code();

        let mut importer = Importer::new(&baseline, &candidate);
        let type_refs = importer.image().type_refs.len();
        assert_eq!(importer.import_token(helper).unwrap(), helper);
        assert_eq!(importer.imported(), 0);
        assert_eq!(importer.image().type_refs.len(), type_refs);
        assert_eq!(importer.take_discovered().unwrap(), vec![helper]);
    }

    #[test]
    fn test_rewrite_is_idempotent() {
        let baseline = baseline();
        let (candidate, ..) = with_new_code();
        let plan = diff(&baseline, &candidate).unwrap().plan;
        let options = RewriteOptions { patch_no: 1 };

        let first = rewrite(&baseline, &candidate, &plan, &options).unwrap();
        let reloaded = LoadedModule::from_parts(first.image.clone(), first.symbols.clone()).unwrap();
        let second = rewrite(&baseline, &reloaded, &plan, &options).unwrap();

        assert_eq!(second.imported, 0);
        assert_eq!(second.image.type_refs.len(), first.image.type_refs.len());
        assert_eq!(second.image, first.image);
        assert_eq!(second.image.to_bytes().unwrap(), first.image.to_bytes().unwrap());
    }

    /// Baseline and candidate both define `Game.Player`, `Game.Vec2` (a struct) and
    /// `Game.Box<T>`; only the candidate defines `Game.Fresh`.
    struct GenericWorld {
        module: LoadedModule,
        player: Token,
        vec2: Token,
        boxed: Token,
        echo: Token,
        fresh: Option<Token>,
    }

    fn generic_world(with_fresh: bool) -> GenericWorld {
        let mut builder = ModuleBuilder::new("Game.dll", "Game");
        let player = builder.type_def("Game", "Player").public().build();
        let vec2 = builder.type_def("Game", "Vec2").value_type().build();
        let boxed = builder.type_def("Game", "Box").generic_params(&["T"]).build();
        let echo = builder
            .method(player, "Echo")
            .public()
            .static_method()
            .generic_params(&["U"])
            .returns(TypeSignature::GenericParamMethod(0))
            .param(TypeSignature::GenericParamMethod(0))
            .code(|asm| {
                asm.ldarg(0)?.ret()?;
                Ok(())
            })
            .build()
            .unwrap();
        let fresh = with_fresh.then(|| builder.type_def("Game", "Fresh").build());
        GenericWorld {
            module: loaded(builder),
            player,
            vec2,
            boxed,
            echo,
            fresh,
        }
    }

    #[test]
    fn test_import_signature_substitutes_recursively() {
        let baseline = generic_world(false).module;
        let world = generic_world(true);
        let candidate = world.module;
        let fresh = world.fresh.unwrap();

        let mut builder =
            ModuleBuilder::from_image(candidate.image.clone(), candidate.symbols.clone());
        let list = builder.corlib_type("System.Collections.Generic", "List`1");
        let (image, symbols) = builder.finish();
        let candidate = LoadedModule::from_parts(image, symbols).unwrap();

        let signature = TypeSignature::GenericInst(
            Box::new(TypeSignature::Class(list)),
            vec![
                TypeSignature::SzArray(Box::new(TypeSignature::Class(world.player))),
                TypeSignature::Class(fresh),
            ],
        );

        let mut importer = Importer::new(&baseline, &candidate);
        let imported = importer.import_signature(&signature).unwrap();
        let TypeSignature::GenericInst(base, args) = &imported else {
            panic!("shape changed");
        };
        assert_eq!(**base, TypeSignature::Class(list));
        let TypeSignature::SzArray(inner) = &args[0] else {
            panic!("shape changed");
        };
        let TypeSignature::Class(player_ref) = **inner else {
            panic!("shape changed");
        };
        assert!(player_ref.is_table(TableId::TypeRef));
        assert_eq!(args[1], TypeSignature::Class(fresh));
        assert_eq!(importer.imported(), 1);

        // Names survive the import
        assert_eq!(
            render_type(&imported, importer.image()).unwrap(),
            "System.Collections.Generic.List`1<Game.Player[],Game.Fresh>"
        );
    }

    #[test]
    fn test_import_method_spec_and_generic_instance_member() {
        let baseline = generic_world(false).module;
        let world = generic_world(true);

        let mut builder = ModuleBuilder::from_image(world.module.image.clone(), DebugSymbols::default());
        let spec = builder.method_spec(world.echo, vec![TypeSignature::ValueType(world.vec2)]);
        let instance = builder.type_spec(TypeSignature::GenericInst(
            Box::new(TypeSignature::Class(world.boxed)),
            vec![TypeSignature::ValueType(world.vec2)],
        ));
        let get = builder.member_ref(
            instance,
            "Get",
            MemberSignature::Method(SignatureMethod {
                has_this: true,
                return_type: SignatureParameter::new(TypeSignature::GenericParamType(0)),
                ..SignatureMethod::default()
            }),
        );
        let (image, symbols) = builder.finish();
        let candidate = LoadedModule::from_parts(image, symbols).unwrap();

        let mut importer = Importer::new(&baseline, &candidate);
        let spec_mapped = importer.import_token(spec).unwrap();
        assert_ne!(spec_mapped, spec);
        let row = importer.image().method_spec(spec_mapped).unwrap().clone();
        assert!(row.method.is_table(TableId::MemberRef));
        let TypeSignature::ValueType(arg) = row.instantiation.generic_args[0] else {
            panic!("argument kind changed");
        };
        assert!(arg.is_table(TableId::TypeRef));
        assert_eq!(
            importer.image().member_name(spec_mapped).unwrap(),
            candidate.image.member_name(spec).unwrap()
        );

        let get_mapped = importer.import_token(get).unwrap();
        assert_ne!(get_mapped, get);
        assert_eq!(
            importer.image().member_name(get_mapped).unwrap(),
            "Game.Box`1<Game.Vec2>::!0 Get()"
        );

        // Mapping is stable
        assert_eq!(importer.import_token(spec).unwrap(), spec_mapped);
    }
}
