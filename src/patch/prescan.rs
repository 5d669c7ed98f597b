//! Source pre-scan for multi-file types.
//!
//! A type declared `partial` may be spread over several source files. Recompiling only the
//! changed file would produce a candidate in which that type lost every member declared
//! elsewhere, which the layout validator would then reject. Before compiling, the changed
//! files are scanned for partial declarations and every other source file of the module
//! declaring one of the same types is added to the compile set.
//!
//! The scan is lexical: it recognizes `namespace`, `partial` and the type keywords, skips
//! comments and string literals, and never needs to parse anything else.

use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
    sync::Mutex,
};

use rayon::prelude::*;

use crate::{Error, Result};

/// Upper bound for the pre-scan worker pool.
pub const MAX_SCAN_THREADS: usize = 8;

const TYPE_KEYWORDS: &[&str] = &["class", "struct", "interface", "record"];
const MODIFIERS: &[&str] = &[
    "public", "internal", "private", "protected", "static", "sealed", "abstract", "unsafe",
    "readonly", "ref", "new", "file",
];

fn tokenize(source: &str) -> Vec<&str> {
    let bytes = source.as_bytes();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        let c = bytes[pos];
        if c.is_ascii_whitespace() {
            pos += 1;
        } else if source[pos..].starts_with("//") {
            pos = source[pos..].find('\n').map_or(bytes.len(), |end| pos + end);
        } else if source[pos..].starts_with("/*") {
            pos = source[pos + 2..]
                .find("*/")
                .map_or(bytes.len(), |end| pos + 2 + end + 2);
        } else if c == b'"' || c == b'\'' {
            pos += 1;
            while pos < bytes.len() && bytes[pos] != c {
                if bytes[pos] == b'\\' {
                    pos += 1;
                }
                pos += 1;
            }
            pos += 1;
        } else if c.is_ascii_alphanumeric() || c == b'_' || c == b'@' || c == b'.' {
            let start = pos;
            while pos < bytes.len()
                && (bytes[pos].is_ascii_alphanumeric() || matches!(bytes[pos], b'_' | b'@' | b'.'))
            {
                pos += 1;
            }
            tokens.push(&source[start..pos]);
        } else if c.is_ascii() {
            tokens.push(&source[pos..=pos]);
            pos += 1;
        } else {
            // Multi-byte characters only appear in identifiers we do not care about
            pos += source[pos..].chars().next().map_or(1, char::len_utf8);
        }
    }

    tokens
}

/// A `{ ... }` block the scanner is inside of.
enum Scope {
    Namespace(String),
    Type(String),
    Other,
}

fn is_identifier(token: &str) -> bool {
    token
        .bytes()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == b'_' || c == b'@')
        && !TYPE_KEYWORDS.contains(&token)
}

/// Number of generic parameters of a declaration whose parameter list starts at `tokens[0]`.
fn generic_arity(tokens: &[&str]) -> usize {
    if tokens.first() != Some(&"<") {
        return 0;
    }
    let mut arity = 1;
    let mut depth = 0;
    for token in tokens {
        match *token {
            "<" => depth += 1,
            ">" => {
                depth -= 1;
                if depth == 0 {
                    break;
                }
            }
            "," if depth == 1 => arity += 1,
            _ => {}
        }
    }
    arity
}

/// `partial` among the modifiers preceding the type keyword at `tokens[keyword]`.
fn is_partial(tokens: &[&str], keyword: usize) -> bool {
    tokens[..keyword]
        .iter()
        .rev()
        .take_while(|token| **token == "partial" || **token == "record" || MODIFIERS.contains(*token))
        .any(|token| *token == "partial")
}

/// Full names of the partial types declared in `source`, with generic arity suffixes.
///
/// Nested types are named `Outer/Inner`, the way the symbol index names them.
///
/// ```rust
/// use dotpatch::patch::prescan::partial_types;
///
/// let names = partial_types("namespace Game { public partial class Pool<T> { } }");
/// assert!(names.contains("Game.Pool`1"));
/// ```
#[must_use]
pub fn partial_types(source: &str) -> BTreeSet<String> {
    let tokens = tokenize(source);
    let mut file_namespace: Option<&str> = None;
    let mut scopes: Vec<Scope> = Vec::new();
    let mut pending: Option<Scope> = None;
    let mut names = BTreeSet::new();
    let mut i = 0;

    while i < tokens.len() {
        match tokens[i] {
            "namespace" => {
                let Some(name) = tokens.get(i + 1) else {
                    break;
                };
                if tokens.get(i + 2) == Some(&";") {
                    file_namespace = Some(*name);
                } else {
                    pending = Some(Scope::Namespace((*name).to_string()));
                }
                i += 2;
            }
            "{" => {
                scopes.push(pending.take().unwrap_or(Scope::Other));
                i += 1;
            }
            "}" => {
                scopes.pop();
                pending = None;
                i += 1;
            }
            ";" => {
                pending = None;
                i += 1;
            }
            keyword if TYPE_KEYWORDS.contains(&keyword) || keyword == "enum" => {
                let Some(name) = tokens.get(i + 1).filter(|name| is_identifier(name)) else {
                    i += 1;
                    continue;
                };
                let arity = generic_arity(&tokens[i + 2..]);
                let mut name = name.trim_start_matches('@').to_string();
                if arity > 0 {
                    name = format!("{name}`{arity}");
                }

                if is_partial(&tokens, i) {
                    let namespace: Vec<&str> = file_namespace
                        .into_iter()
                        .chain(scopes.iter().filter_map(|scope| match scope {
                            Scope::Namespace(name) => Some(name.as_str()),
                            _ => None,
                        }))
                        .collect();
                    let mut full: Vec<&str> = scopes
                        .iter()
                        .filter_map(|scope| match scope {
                            Scope::Type(name) => Some(name.as_str()),
                            _ => None,
                        })
                        .collect();
                    full.push(&name);

                    let full = full.join("/");
                    names.insert(if namespace.is_empty() {
                        full
                    } else {
                        format!("{}.{full}", namespace.join("."))
                    });
                }
                pending = Some(Scope::Type(name));
                i += 2;
            }
            _ => i += 1,
        }
    }

    names
}

fn read_source(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Extend `changed` with every file of `sources` that declares a partial type also declared
/// in a changed file.
///
/// Changed files must be readable; other source files that cannot be read are skipped with a
/// warning. The result lists `changed` first, then the added files in path order. At most
/// `threads` workers (capped at [`MAX_SCAN_THREADS`]) scan the sources.
///
/// # Errors
/// Returns [`Error::FileError`] if a changed file cannot be read.
pub fn expand_partial_sources(
    changed: &[PathBuf],
    sources: &[PathBuf],
    threads: usize,
) -> Result<Vec<PathBuf>> {
    let mut wanted = BTreeSet::new();
    for file in changed {
        wanted.extend(partial_types(&read_source(file)?));
    }
    if wanted.is_empty() {
        return Ok(changed.to_vec());
    }
    log::debug!("Changed files declare partial types {:?}", wanted);

    let candidates: Vec<&PathBuf> = sources
        .iter()
        .filter(|source| !changed.contains(source))
        .collect();
    let found: Mutex<BTreeSet<PathBuf>> = Mutex::new(BTreeSet::new());

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads.clamp(1, MAX_SCAN_THREADS))
        .build()
        .map_err(|e| Error::Error(format!("Failed to start the pre-scan pool - {e}")))?;

    pool.install(|| {
        candidates.par_iter().try_for_each(|source| -> Result<()> {
            let text = match read_source(source) {
                Ok(text) => text,
                Err(e) => {
                    log::warn!("Skipping unreadable source {} - {}", source.display(), e);
                    return Ok(());
                }
            };
            if partial_types(&text).iter().any(|name| wanted.contains(name)) {
                lock!(found)?.insert((*source).clone());
            }
            Ok(())
        })
    })?;

    let found = found.into_inner().map_err(|_| Error::LockError)?;
    if !found.is_empty() {
        log::info!(
            "Adding {} file(s) declaring other parts of changed partial types",
            found.len()
        );
    }

    let mut files = changed.to_vec();
    files.extend(found);
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_declarations() {
        let source = r#"
            // partial class Commented {}
            using System;
            namespace Game.World
            {
                /* partial struct Hidden */
                public static partial class Spawner { const string S = "partial class Quoted"; }
                internal sealed partial class Map<TKey, TValue> : Base {}
                partial record struct Cell(int X);
                public class Plain {}
            }
        "#;
        let names: Vec<_> = partial_types(source).into_iter().collect();
        assert_eq!(
            names,
            ["Game.World.Cell", "Game.World.Map`2", "Game.World.Spawner"]
        );
    }

    #[test]
    fn test_file_scoped_namespace_and_methods() {
        let source = "namespace Game;\npartial class Player { partial void OnHit(); }";
        let names: Vec<_> = partial_types(source).into_iter().collect();
        assert_eq!(names, ["Game.Player"]);
    }

    #[test]
    fn test_nested_types_and_sibling_namespaces() {
        let source = r#"
            namespace Game.Ui
            {
                partial class Hud
                {
                    int Width => 4;
                    partial class Gauge<T> where T : struct { }
                    class Helper { partial class Deep { } }
                }
            }
            namespace Game.Net
            {
                partial class Session { }
            }
            partial class Global { }
        "#;
        let names: Vec<_> = partial_types(source).into_iter().collect();
        assert_eq!(
            names,
            [
                "Game.Net.Session",
                "Game.Ui.Hud",
                "Game.Ui.Hud/Gauge`1",
                "Game.Ui.Hud/Helper/Deep",
                "Global",
            ]
        );
    }

    #[test]
    fn test_expand_partial_sources() {
        let dir = tempfile::tempdir().unwrap();
        let write = |name: &str, text: &str| {
            let path = dir.path().join(name);
            std::fs::write(&path, text).unwrap();
            path
        };
        let changed = write("Player.cs", "namespace Game { partial class Player { } }");
        let other_part = write("Player.Combat.cs", "namespace Game { partial class Player { } }");
        let unrelated = write("Enemy.cs", "namespace Game { partial class Enemy { } }");
        let elsewhere = write("Other.cs", "namespace Tools { partial class Player { } }");
        let missing = dir.path().join("Missing.cs");

        let sources = vec![
            changed.clone(),
            unrelated,
            other_part.clone(),
            elsewhere,
            missing,
        ];
        let files = expand_partial_sources(&[changed.clone()], &sources, 4).unwrap();
        assert_eq!(files, vec![changed.clone(), other_part]);

        let plain = write("Plain.cs", "namespace Game { class Plain { } }");
        assert_eq!(
            expand_partial_sources(&[plain.clone()], &sources, 4).unwrap(),
            vec![plain]
        );

        assert!(expand_partial_sources(&[dir.path().join("nope.cs")], &sources, 1).is_err());
    }
}
