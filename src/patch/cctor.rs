//! Static initializer neutralization.
//!
//! When a patch module is loaded, the runtime runs the static initializer of every type it
//! defines on first use. A patched type already had its statics initialized by the baseline,
//! and running the candidate's copy would reset the state patched code is supposed to share.
//! The initializer is therefore replaced with a bare `ret`.

use crate::{
    assembly::opcodes::RET,
    metadata::{image::ModuleImage, signatures::SignatureLocalVariables, token::Token},
};

/// Replace the static initializer of every type in `types` with an empty body.
///
/// Types without an initializer are skipped. Returns the types whose initializer actually
/// changed; neutralizing twice is a no-op.
pub fn neutralize(image: &mut ModuleImage, types: &[Token]) -> Vec<Token> {
    let mut changed = Vec::new();

    for owner in types {
        let Some(method) = image
            .methods_of(*owner)
            .find(|(_, row)| row.name == ".cctor")
            .map(|(token, _)| token)
        else {
            continue;
        };
        let Ok(row) = image.method_mut(method) else {
            continue;
        };
        let Some(body) = row.body.as_mut() else {
            continue;
        };

        if body.code == [RET] && body.exception_handlers.is_empty() && body.locals.locals.is_empty() {
            continue;
        }

        body.code = vec![RET];
        body.exception_handlers.clear();
        body.locals = SignatureLocalVariables::default();
        body.init_locals = false;
        body.max_stack = body.max_stack.max(1);
        log::debug!("Neutralized static initializer {}", method);
        changed.push(*owner);
    }

    changed
}
