//! Layout validation.
//!
//! Objects created by the baseline stay alive across a patch, so the candidate may not
//! change anything their memory layout or virtual dispatch depends on. [`validate`] checks,
//! in order:
//!
//! 1. every baseline type still exists in the candidate,
//! 2. every shared type declares the same fields, in the same order, at the same offsets,
//! 3. no shared type gains a virtual function, new or formerly non-virtual,
//! 4. every virtual function of a shared type stays virtual.
//!
//! Closure containers and compiler bookkeeping types are exempt: their names are not stable
//! across compiles and nothing outside the module holds their instances across a patch.

use crate::{
    metadata::index::{ModuleIndex, TypeRecord},
    Error, Result,
};

fn is_exempt(index: &ModuleIndex, record: &TypeRecord) -> bool {
    record.is_bookkeeping() || index.is_in_closure_container(&record.signature)
}

fn check_fields(baseline: &TypeRecord, candidate: &TypeRecord) -> Result<()> {
    for (position, (old, new)) in baseline.fields.iter().zip(&candidate.fields).enumerate() {
        if old.signature != new.signature {
            return Err(Error::mismatch(
                &baseline.signature,
                Some(old.signature.clone()),
                format!("field {position} changed to '{}'", new.signature),
            ));
        }
        if old.offset != new.offset || old.is_static != new.is_static {
            return Err(Error::mismatch(
                &baseline.signature,
                Some(old.signature.clone()),
                "field offset or storage changed",
            ));
        }
    }

    match baseline.fields.len().cmp(&candidate.fields.len()) {
        std::cmp::Ordering::Less => Err(Error::mismatch(
            &baseline.signature,
            Some(candidate.fields[baseline.fields.len()].signature.clone()),
            format!(
                "field added ({} -> {} fields)",
                baseline.fields.len(),
                candidate.fields.len()
            ),
        )),
        std::cmp::Ordering::Greater => Err(Error::mismatch(
            &baseline.signature,
            Some(baseline.fields[candidate.fields.len()].signature.clone()),
            format!(
                "field removed ({} -> {} fields)",
                baseline.fields.len(),
                candidate.fields.len()
            ),
        )),
        std::cmp::Ordering::Equal => Ok(()),
    }
}

fn check_virtuals(baseline: &TypeRecord, candidate: &TypeRecord) -> Result<()> {
    if let Some(added) = candidate
        .virtuals
        .iter()
        .find(|signature| !baseline.virtuals.contains(*signature))
    {
        let reason = if baseline.declared.contains(added) {
            "function became virtual"
        } else {
            "virtual function added"
        };
        return Err(Error::mismatch(&baseline.signature, Some(added.clone()), reason));
    }

    if let Some(lost) = baseline
        .virtuals
        .iter()
        .find(|signature| !candidate.virtuals.contains(*signature))
    {
        let reason = if candidate.declared.contains(lost) {
            "function is no longer virtual"
        } else {
            "virtual function removed"
        };
        return Err(Error::mismatch(&baseline.signature, Some(lost.clone()), reason));
    }
    Ok(())
}

/// Check that `candidate` can be applied on top of live `baseline` objects.
///
/// # Errors
/// Returns [`Error::StructuralMismatch`] naming the first offending type and member. The
/// whole module must be rejected in that case.
pub fn validate(baseline: &ModuleIndex, candidate: &ModuleIndex) -> Result<()> {
    let shared = baseline
        .types
        .values()
        .filter(|record| !is_exempt(baseline, record))
        .map(|record| match candidate.get_type(&record.signature) {
            Some(counterpart) => Ok((record, counterpart)),
            None => Err(Error::mismatch(
                &record.signature,
                None,
                "type missing from the candidate",
            )),
        })
        .collect::<Result<Vec<_>>>()?;

    for (old, new) in &shared {
        check_fields(old, new)?;
    }
    for (old, new) in &shared {
        check_virtuals(old, new)?;
    }

    log::debug!("Layout of {} shared types unchanged", shared.len());
    Ok(())
}
