//! Navigable symbol index over a loaded module.
//!
//! [`ModuleIndex::build`] walks every type of a [`ModuleImage`] and records, keyed by the
//! rendered signatures of [`crate::metadata::signatures`]:
//!
//! - one [`TypeRecord`] per type, nested types included (`NS.Outer/Inner`)
//! - the hookable functions of each type as [`MethodRecord`]s
//! - the ordered fields of each type as [`FieldRecord`]s
//!
//! Compiler generated closure code is recognized by its names. Lambda bodies are called
//! `<Outer>b__N_M`, local functions `<Outer>g__Name|N_M`, and their containers `<>c` or
//! `<>c__DisplayClassN_M`. Containers are linked to their enclosing type through signature
//! keys in both directions; records never point at each other.
//!
//! # Examples
//!
//! ```rust
//! use dotpatch::metadata::{image::ModuleBuilder, index::ModuleIndex};
//!
//! let mut builder = ModuleBuilder::new("Game.dll", "Game");
//! let player = builder.type_def("Game", "Player").public().build();
//! let lambdas = builder.type_def("", "<>c").nested_in(player).build();
//! builder
//!     .method(lambdas, "<Tick>b__0_0")
//!     .code(|asm| { asm.ret()?; Ok(()) })
//!     .build()?;
//! let (image, symbols) = builder.finish();
//!
//! let index = ModuleIndex::build(&image, &symbols)?;
//! let container = index.get_type("Game.Player/<>c").unwrap();
//! assert!(container.is_closure_container);
//! assert_eq!(container.enclosing.as_deref(), Some("Game.Player"));
//! assert!(container.methods["System.Void <Tick>b__0_0()"].is_closure);
//! # Ok::<(), dotpatch::Error>(())
//! ```

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::{Arc, OnceLock},
};

use crate::{
    hook::EntryPoint,
    metadata::{
        flags::FieldAttributes,
        image::ModuleImage,
        signatures::{render_field_key, render_method_key, render_params, render_return, TypeNames},
        symbols::DebugSymbols,
        token::Token,
    },
    Result,
};

/// Returns `true` for compiler generated closure container type names.
#[must_use]
pub fn is_closure_container_name(name: &str) -> bool {
    name == "<>c" || name.starts_with("<>c__DisplayClass")
}

/// Returns `true` for compiler generated lambda and local function names.
#[must_use]
pub fn is_closure_method_name(name: &str) -> bool {
    name.starts_with('<') && (name.contains(">b__") || name.contains(">g__"))
}

/// Returns `true` for compiler bookkeeping types that never take part in a patch.
#[must_use]
pub fn is_bookkeeping_type(signature: &str) -> bool {
    signature == "<Module>" || signature.starts_with("<PrivateImplementationDetails>")
}

/// One field declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldRecord {
    /// Signature key, `{type} {name}`
    pub signature: String,
    /// The `Field` token
    pub token: Token,
    /// Explicit layout offset
    pub offset: Option<u32>,
    /// Static field
    pub is_static: bool,
}

/// One hookable function.
#[derive(Debug)]
pub struct MethodRecord {
    /// Signature key, ``{ret} {name}[`arity]({params})``
    pub signature: String,
    /// Simple name
    pub name: String,
    /// Signature of the declaring type
    pub owner: String,
    /// The `MethodDef` token
    pub token: Token,
    /// Lambda body or local function
    pub is_closure: bool,
    /// Instance constructor
    pub is_constructor: bool,
    /// Static function
    pub is_static: bool,
    /// Public access
    pub is_public: bool,
    /// Virtual function
    pub is_virtual: bool,
    /// Number of generic parameters
    pub generic_arity: u32,
    /// Rendered return type
    pub return_type: String,
    /// Rendered parameter types
    pub param_types: Vec<String>,
    /// Source document, `None` for compiler synthesized bodies
    pub document: Option<String>,
    handle: OnceLock<EntryPoint>,
}

impl MethodRecord {
    /// Full key, `Owner::signature`.
    #[must_use]
    pub fn full_name(&self) -> String {
        format!("{}::{}", self.owner, self.signature)
    }

    /// Returns `true` for generic method definitions.
    #[must_use]
    pub fn is_generic(&self) -> bool {
        self.generic_arity > 0
    }

    /// The runtime handle, if it has been resolved.
    #[must_use]
    pub fn handle(&self) -> Option<EntryPoint> {
        self.handle.get().copied()
    }

    /// Returns the runtime handle, resolving it through `resolve` on first use.
    ///
    /// # Errors
    /// Propagates the error of `resolve`; nothing is cached in that case.
    pub fn resolve_handle<F>(&self, resolve: F) -> Result<EntryPoint>
    where
        F: FnOnce(&MethodRecord) -> Result<EntryPoint>,
    {
        if let Some(handle) = self.handle.get() {
            return Ok(*handle);
        }
        let handle = resolve(self)?;
        Ok(*self.handle.get_or_init(|| handle))
    }
}

/// One type declaration.
#[derive(Debug)]
pub struct TypeRecord {
    /// Full nested name, `NS.Outer/Inner`
    pub signature: String,
    /// The `TypeDef` token
    pub token: Token,
    /// Compiler generated lambda container
    pub is_closure_container: bool,
    /// Signature of the enclosing type
    pub enclosing: Option<String>,
    /// Signatures of nested closure containers
    pub closure_children: Vec<String>,
    /// Hookable functions by signature
    pub methods: BTreeMap<String, Arc<MethodRecord>>,
    /// Fields in declaration order
    pub fields: Vec<FieldRecord>,
    /// Every declared function signature, hookable or not
    pub declared: BTreeSet<String>,
    /// Signatures of the virtual functions
    pub virtuals: BTreeSet<String>,
    /// The `.cctor`, if the type has one
    pub static_initializer: Option<Token>,
    field_lookup: HashMap<String, usize>,
}

impl TypeRecord {
    /// Look up a field by signature.
    #[must_use]
    pub fn field(&self, signature: &str) -> Option<&FieldRecord> {
        self.field_lookup
            .get(signature)
            .and_then(|index| self.fields.get(*index))
    }

    /// Returns `true` for `<Module>` and `<PrivateImplementationDetails>` types.
    #[must_use]
    pub fn is_bookkeeping(&self) -> bool {
        is_bookkeeping_type(&self.signature)
    }
}

/// The symbol index of one module.
#[derive(Debug, Default)]
pub struct ModuleIndex {
    /// Types by signature
    pub types: BTreeMap<String, TypeRecord>,
    type_tokens: HashMap<Token, String>,
    members: HashMap<String, Token>,
    methods: HashMap<Token, Arc<MethodRecord>>,
}

impl ModuleIndex {
    /// Index every type of `image`, taking source documents from `symbols`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if two types share a signature, and
    /// [`crate::Error::ResolutionFailure`] if a signature references a dangling token.
    pub fn build(image: &ModuleImage, symbols: &DebugSymbols) -> Result<ModuleIndex> {
        let documents = symbols.document_map();
        let mut index = ModuleIndex::default();

        for (token, row) in image.type_def_tokens() {
            let signature = image.type_name(token)?;
            let enclosing = if row.enclosing.is_null() {
                None
            } else {
                Some(image.type_name(row.enclosing)?)
            };

            let mut record = TypeRecord {
                signature: signature.clone(),
                token,
                is_closure_container: !row.enclosing.is_null()
                    && is_closure_container_name(&row.name),
                enclosing,
                closure_children: Vec::new(),
                methods: BTreeMap::new(),
                fields: Vec::new(),
                declared: BTreeSet::new(),
                virtuals: BTreeSet::new(),
                static_initializer: None,
                field_lookup: HashMap::new(),
            };

            for (field_token, field) in image.fields_of(token) {
                let key = render_field_key(&field.name, &field.signature, image)?;
                record.field_lookup.insert(key.clone(), record.fields.len());
                index.members.insert(format!("{signature}::{key}"), field_token);
                record.fields.push(FieldRecord {
                    signature: key,
                    token: field_token,
                    offset: field.offset,
                    is_static: field.flags.contains(FieldAttributes::STATIC),
                });
            }

            for (method_token, method) in image.methods_of(token) {
                let key = render_method_key(&method.name, &method.signature, image)?;
                index.members.insert(format!("{signature}::{key}"), method_token);
                record.declared.insert(key.clone());
                if method.flags.is_virtual() {
                    record.virtuals.insert(key.clone());
                }

                if method.name == ".cctor" {
                    record.static_initializer = Some(method_token);
                    continue;
                }
                if method.body.is_none() {
                    continue;
                }

                let method_record = Arc::new(MethodRecord {
                    signature: key.clone(),
                    name: method.name.clone(),
                    owner: signature.clone(),
                    token: method_token,
                    is_closure: is_closure_method_name(&method.name),
                    is_constructor: method.name == ".ctor",
                    is_static: method.flags.is_static(),
                    is_public: method.flags.is_public(),
                    is_virtual: method.flags.is_virtual(),
                    generic_arity: method.signature.generic_param_count,
                    return_type: render_return(&method.signature, image)?,
                    param_types: render_params(&method.signature, image)?,
                    document: documents.get(&method_token).map(ToString::to_string),
                    handle: OnceLock::new(),
                });
                index.methods.insert(method_token, method_record.clone());
                record.methods.insert(key, method_record);
            }

            if index.types.contains_key(&signature) {
                return Err(malformed_error!("Duplicate type signature - {}", signature));
            }
            index.type_tokens.insert(token, signature.clone());
            index.types.insert(signature, record);
        }

        // Forward links, once all types are known
        let links: Vec<(String, String)> = index
            .types
            .values()
            .filter(|record| record.is_closure_container)
            .filter_map(|record| {
                record
                    .enclosing
                    .clone()
                    .map(|parent| (parent, record.signature.clone()))
            })
            .collect();
        for (parent, child) in links {
            if let Some(parent) = index.types.get_mut(&parent) {
                parent.closure_children.push(child);
            }
        }

        Ok(index)
    }

    /// Look up a type by signature.
    #[must_use]
    pub fn get_type(&self, signature: &str) -> Option<&TypeRecord> {
        self.types.get(signature)
    }

    /// Look up a type by its `TypeDef` token.
    #[must_use]
    pub fn type_by_token(&self, token: Token) -> Option<&TypeRecord> {
        self.type_tokens
            .get(&token)
            .and_then(|signature| self.types.get(signature))
    }

    /// Look up a hookable function by its `MethodDef` token.
    #[must_use]
    pub fn method_by_token(&self, token: Token) -> Option<&Arc<MethodRecord>> {
        self.methods.get(&token)
    }

    /// Look up a hookable function by owner and signature.
    #[must_use]
    pub fn find_method(&self, owner: &str, signature: &str) -> Option<&Arc<MethodRecord>> {
        self.types.get(owner)?.methods.get(signature)
    }

    /// Token of a declared field or function, by full name `Owner::key`.
    #[must_use]
    pub fn member_token(&self, full_name: &str) -> Option<Token> {
        self.members.get(full_name).copied()
    }

    /// All hookable functions, ordered by type and signature.
    pub fn methods(&self) -> impl Iterator<Item = &Arc<MethodRecord>> {
        self.types.values().flat_map(|record| record.methods.values())
    }

    /// Returns `true` if `signature` names a closure container, or a type nested in one.
    #[must_use]
    pub fn is_in_closure_container(&self, signature: &str) -> bool {
        let mut current = self.types.get(signature);
        while let Some(record) = current {
            if record.is_closure_container {
                return true;
            }
            current = record
                .enclosing
                .as_ref()
                .and_then(|parent| self.types.get(parent));
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{image::ModuleBuilder, signatures::TypeSignature};

    fn build() -> ModuleIndex {
        let mut builder = ModuleBuilder::new("Game.dll", "Game");
        let player = builder.type_def("Game", "Player").public().build();
        builder.field(player, "hp", TypeSignature::I4).public().build();
        builder.field(player, "alive", TypeSignature::Boolean).build();
        builder
            .method(player, ".ctor")
            .public()
            .code(|asm| {
                asm.ret()?;
                Ok(())
            })
            .build()
            .unwrap();
        builder
            .method(player, ".cctor")
            .code(|asm| {
                asm.ret()?;
                Ok(())
            })
            .build()
            .unwrap();
        builder
            .method(player, "Shape")
            .public()
            .abstract_method()
            .returns(TypeSignature::I4)
            .build()
            .unwrap();
        builder
            .method(player, "Tick")
            .public()
            .virtual_method()
            .param(TypeSignature::R4)
            .document("Player.cs", 12)
            .code(|asm| {
                asm.ret()?;
                Ok(())
            })
            .build()
            .unwrap();
        let display = builder
            .type_def("", "<>c__DisplayClass2_0")
            .nested_in(player)
            .build();
        builder
            .method(display, "<Tick>g__Local|2_0")
            .code(|asm| {
                asm.ret()?;
                Ok(())
            })
            .build()
            .unwrap();
        builder.type_def("", "<Module>").build();

        let (image, symbols) = builder.finish();
        ModuleIndex::build(&image, &symbols).unwrap()
    }

    #[test]
    fn test_hookable_functions() {
        let index = build();
        let player = index.get_type("Game.Player").unwrap();

        let hookable: Vec<_> = player.methods.keys().cloned().collect();
        assert_eq!(
            hookable,
            vec!["System.Void .ctor()", "System.Void Tick(System.Single)"]
        );
        assert!(player.declared.contains("System.Int32 Shape()"));
        assert!(player.declared.contains("System.Void .cctor()"));
        assert!(player.virtuals.contains("System.Int32 Shape()"));
        assert!(player.static_initializer.is_some());

        let tick = &player.methods["System.Void Tick(System.Single)"];
        assert_eq!(tick.document.as_deref(), Some("Player.cs"));
        assert_eq!(tick.param_types, vec!["System.Single"]);
        assert!(tick.is_virtual && tick.is_public && !tick.is_static);
        assert_eq!(tick.full_name(), "Game.Player::System.Void Tick(System.Single)");
        assert!(player.methods["System.Void .ctor()"].is_constructor);
    }

    #[test]
    fn test_fields_in_order() {
        let index = build();
        let player = index.get_type("Game.Player").unwrap();
        let fields: Vec<_> = player.fields.iter().map(|f| f.signature.as_str()).collect();
        assert_eq!(fields, vec!["System.Int32 hp", "System.Boolean alive"]);
        assert!(player.field("System.Boolean alive").is_some());
        assert!(index.member_token("Game.Player::System.Int32 hp").is_some());
    }

    #[test]
    fn test_closure_links() {
        let index = build();
        let player = index.get_type("Game.Player").unwrap();
        assert_eq!(
            player.closure_children,
            vec!["Game.Player/<>c__DisplayClass2_0".to_string()]
        );

        let display = index.get_type("Game.Player/<>c__DisplayClass2_0").unwrap();
        assert!(display.is_closure_container);
        assert!(display.methods["System.Void <Tick>g__Local|2_0()"].is_closure);
        assert!(index.is_in_closure_container("Game.Player/<>c__DisplayClass2_0"));
        assert!(!index.is_in_closure_container("Game.Player"));
        assert!(index.get_type("<Module>").unwrap().is_bookkeeping());
    }

    #[test]
    fn test_handle_is_resolved_once() {
        let index = build();
        let tick = index
            .find_method("Game.Player", "System.Void Tick(System.Single)")
            .unwrap();
        assert_eq!(tick.handle(), None);

        assert!(tick
            .resolve_handle(|_| Err(crate::Error::Error("not loaded".into())))
            .is_err());
        assert_eq!(tick.resolve_handle(|_| Ok(EntryPoint(7))).unwrap(), EntryPoint(7));
        assert_eq!(tick.resolve_handle(|_| Ok(EntryPoint(9))).unwrap(), EntryPoint(7));
        assert_eq!(index.method_by_token(tick.token).unwrap().handle(), Some(EntryPoint(7)));
    }

    #[test]
    fn test_name_patterns() {
        assert!(is_closure_method_name("<Main>b__0_0"));
        assert!(is_closure_method_name("<Run>g__Helper|3_1"));
        assert!(!is_closure_method_name("Main"));
        assert!(!is_closure_method_name("<Main>d__1"));
        assert!(is_closure_container_name("<>c"));
        assert!(!is_closure_container_name("<Main>d__1"));
        assert!(is_bookkeeping_type("<PrivateImplementationDetails>{A1B2}"));
    }
}
