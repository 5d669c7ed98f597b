//! The per-cycle report handed back to the host.
//!
//! ```json
//! {
//!   "patchNo": 1,
//!   "assemblyChangedFromLast": ["Game"],
//!   "methodsNeedHook": [
//!     {
//!       "name": "M", "type": "Game.T", "assembly": "Game", "signature": "System.Int32 M()",
//!       "isConstructor": false, "isGeneric": false, "isPublic": true, "isStatic": false,
//!       "isLambda": false, "ilChanged": true, "document": "T.cs",
//!       "returnType": "System.Int32", "paramTypes": []
//!     }
//!   ]
//! }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{
    hook::{HookPair, MethodDescriptor},
    patch::{generics::WrapperMethod, plan::HookEntry},
    Error, Result,
};

/// One function the host must redirect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MethodHookInfo {
    /// Simple function name
    pub name: String,
    /// Full name of the owning type
    #[serde(rename = "type")]
    pub type_name: String,
    /// Baseline assembly
    pub assembly: String,
    /// Signature key, unique within the type
    pub signature: String,
    /// Instance or static constructor
    pub is_constructor: bool,
    /// Function or owner has generic parameters
    pub is_generic: bool,
    /// Public access
    pub is_public: bool,
    /// Static function
    pub is_static: bool,
    /// Compiler generated closure body
    pub is_lambda: bool,
    /// Body changed; `false` for functions that only share a changed document
    pub il_changed: bool,
    /// Source document
    pub document: Option<String>,
    /// Rendered return type
    pub return_type: String,
    /// Rendered parameter types
    pub param_types: Vec<String>,
}

impl MethodHookInfo {
    /// Describe a planned function of `assembly`.
    #[must_use]
    pub fn from_entry(entry: &HookEntry, assembly: &str, owner_is_generic: bool) -> Self {
        let method = &entry.candidate;
        MethodHookInfo {
            name: method.name.clone(),
            type_name: method.owner.clone(),
            assembly: assembly.to_string(),
            signature: method.signature.clone(),
            is_constructor: method.is_constructor,
            is_generic: method.is_generic() || owner_is_generic,
            is_public: method.is_public,
            is_static: method.is_static,
            is_lambda: method.is_closure,
            il_changed: entry.il_changed,
            document: method.document.clone(),
            return_type: method.return_type.clone(),
            param_types: method.param_types.clone(),
        }
    }
}

/// One synthesized generic forwarding function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenericWrapperInfo {
    /// Patch assembly holding the wrapper
    pub assembly: String,
    /// Full name of the wrapped generic function
    pub method: String,
    /// Full name of the wrapper
    pub wrapper: String,
    /// Record index, matches the marker attributes
    pub index: usize,
    /// Rendered type arguments
    pub type_args: Vec<String>,
}

impl GenericWrapperInfo {
    /// Describe `wrapper`, emitted into `assembly`.
    #[must_use]
    pub fn new(assembly: &str, wrapper: &WrapperMethod) -> Self {
        GenericWrapperInfo {
            assembly: assembly.to_string(),
            method: wrapper.method.clone(),
            wrapper: wrapper.name.clone(),
            index: wrapper.index,
            type_args: wrapper.type_args.clone(),
        }
    }
}

/// Outcome of one patch cycle.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchReport {
    /// Patch sequence number
    pub patch_no: u32,
    /// Modules whose candidate differs from the one processed in the previous cycle
    pub assembly_changed_from_last: Vec<String>,
    /// Functions to redirect
    pub methods_need_hook: Vec<MethodHookInfo>,
    /// Synthesized generic wrappers
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub generic_wrappers: Vec<GenericWrapperInfo>,
    /// Recoverable problems
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl PatchReport {
    /// An empty report for cycle `patch_no`.
    #[must_use]
    pub fn new(patch_no: u32) -> Self {
        PatchReport {
            patch_no,
            ..PatchReport::default()
        }
    }

    /// Original/replacement pairs for every function in the report.
    ///
    /// The replacement lives in `<assembly>_patch_<patchNo>` under the same type and signature.
    /// A generic function with synthesized wrappers is redirected per instantiation instead:
    /// each closed instantiation of the original targets its non-generic wrapper, and the
    /// shared definition itself is left alone.
    #[must_use]
    pub fn hook_pairs(&self) -> Vec<HookPair> {
        let mut pairs = Vec::new();
        for method in &self.methods_need_hook {
            let patch_assembly = format!("{}_patch_{}", method.assembly, self.patch_no);
            let original =
                MethodDescriptor::new(&method.assembly, &method.type_name, &method.signature);
            let full_name = format!("{}::{}", method.type_name, method.signature);

            let mut wrapped = false;
            for wrapper in self
                .generic_wrappers
                .iter()
                .filter(|w| w.assembly == patch_assembly && w.method == full_name)
            {
                let Some((wrapper_type, wrapper_signature)) = wrapper.wrapper.split_once("::")
                else {
                    continue;
                };
                wrapped = true;
                pairs.push(HookPair {
                    original: original.clone().with_type_args(wrapper.type_args.clone()),
                    replacement: MethodDescriptor::new(
                        &patch_assembly,
                        wrapper_type,
                        wrapper_signature,
                    ),
                });
            }

            if !wrapped {
                pairs.push(HookPair {
                    replacement: MethodDescriptor::new(
                        patch_assembly,
                        &method.type_name,
                        &method.signature,
                    ),
                    original,
                });
            }
        }
        pairs
    }

    /// Baseline assemblies with at least one function to redirect, sorted.
    #[must_use]
    pub fn assemblies(&self) -> Vec<&str> {
        let mut assemblies: Vec<&str> = self
            .methods_need_hook
            .iter()
            .map(|method| method.assembly.as_str())
            .collect();
        assemblies.sort_unstable();
        assemblies.dedup();
        assemblies
    }

    /// Record a recoverable problem.
    pub fn warn(&mut self, error: &Error) {
        self.warnings.push(error.to_string());
    }

    /// Pretty-printed JSON.
    ///
    /// # Errors
    /// Returns [`Error::Json`] if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse a report.
    ///
    /// # Errors
    /// Returns [`Error::Json`] for malformed input.
    pub fn from_json(json: &str) -> Result<PatchReport> {
        Ok(serde_json::from_str(json)?)
    }

    /// Write the report to `path`.
    ///
    /// # Errors
    /// Returns [`Error::FileError`] or [`Error::Json`].
    pub fn write(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(assembly: &str, signature: &str) -> MethodHookInfo {
        MethodHookInfo {
            name: "M".into(),
            type_name: "Game.T".into(),
            assembly: assembly.into(),
            signature: signature.into(),
            is_constructor: false,
            is_generic: false,
            is_public: true,
            is_static: false,
            is_lambda: false,
            il_changed: true,
            document: Some("T.cs".into()),
            return_type: "System.Int32".into(),
            param_types: vec![],
        }
    }

    #[test]
    fn test_json_shape() {
        let mut report = PatchReport::new(1);
        report.assembly_changed_from_last = vec!["Game".into()];
        report.methods_need_hook.push(info("Game", "System.Int32 M()"));

        let value: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(value["patchNo"], 1);
        assert_eq!(value["assemblyChangedFromLast"][0], "Game");
        let method = &value["methodsNeedHook"][0];
        assert_eq!(method["type"], "Game.T");
        assert_eq!(method["ilChanged"], true);
        assert_eq!(method["returnType"], "System.Int32");
        assert!(method["paramTypes"].as_array().unwrap().is_empty());
        assert!(value.get("warnings").is_none());
        assert!(value.get("genericWrappers").is_none());

        assert_eq!(PatchReport::from_json(&report.to_json().unwrap()).unwrap(), report);
    }

    #[test]
    fn test_hook_pairs() {
        let mut report = PatchReport::new(3);
        report.methods_need_hook.push(info("Game", "System.Int32 M()"));
        report.methods_need_hook.push(info("Engine", "System.Int32 M()"));
        report.methods_need_hook.push(info("Game", "System.Void N()"));

        let pairs = report.hook_pairs();
        assert_eq!(pairs.len(), 3);
        assert_eq!(pairs[1].original.to_string(), "[Engine]Game.T::System.Int32 M()");
        assert_eq!(
            pairs[1].replacement.to_string(),
            "[Engine_patch_3]Game.T::System.Int32 M()"
        );
        assert_eq!(report.assemblies(), ["Engine", "Game"]);
    }

    #[test]
    fn test_generic_instantiations_target_their_wrappers() {
        let mut report = PatchReport::new(2);
        let mut echo = info("Game", "!!0 Echo`1(!!0)");
        echo.type_name = "Game.Util".into();
        echo.is_generic = true;
        report.methods_need_hook.push(echo);
        let mut unused = info("Game", "!!0 Other`1(!!0)");
        unused.is_generic = true;
        report.methods_need_hook.push(unused);
        for (index, arg) in ["System.Int32", "System.Object"].into_iter().enumerate() {
            report.generic_wrappers.push(GenericWrapperInfo {
                assembly: "Game_patch_2".into(),
                method: "Game.Util::!!0 Echo`1(!!0)".into(),
                wrapper: format!(
                    "<HotPatch>GenericWrappers::{arg} Echo__w0_{index}({arg})"
                ),
                index: 0,
                type_args: vec![arg.into()],
            });
        }

        let pairs: Vec<(String, String)> = report
            .hook_pairs()
            .iter()
            .map(|pair| (pair.original.to_string(), pair.replacement.to_string()))
            .collect();
        assert_eq!(
            pairs,
            [
                (
                    "[Game]Game.Util::!!0 Echo`1(!!0)<System.Int32>".to_string(),
                    "[Game_patch_2]<HotPatch>GenericWrappers::System.Int32 Echo__w0_0(System.Int32)"
                        .to_string()
                ),
                (
                    "[Game]Game.Util::!!0 Echo`1(!!0)<System.Object>".to_string(),
                    "[Game_patch_2]<HotPatch>GenericWrappers::System.Object Echo__w0_1(System.Object)"
                        .to_string()
                ),
                (
                    "[Game]Game.T::!!0 Other`1(!!0)".to_string(),
                    "[Game_patch_2]Game.T::!!0 Other`1(!!0)".to_string()
                ),
            ]
        );
    }
}
