// Purpose: Turn user-supplied source strings into canonical fetch keys.
// Inputs/Outputs: Resolves paths, URLs, and host/org/repo shorthands against a base directory.
// Invariants: The same source string and base directory always produce the same key.
// Gotchas: Normalization is lexical; keys must be stable even for paths that do not exist yet.

use anyhow::bail;
use regex::Regex;
use std::path::{Component, Path, PathBuf};

pub mod storage;

/// Normalizes a source string relative to `base` into a canonical key.
///
/// Relative and absolute filesystem paths become `file://` keys, explicit
/// schemes pass through, and `host.tld/org/repo` shorthands become
/// `git::https://` URLs.
pub fn detect(source: &str, base: &Path) -> anyhow::Result<String> {
    if source.is_empty() {
        bail!("empty source string");
    }

    if source.starts_with("git::") || source.contains("://") {
        return Ok(source.to_string());
    }

    let path = Path::new(source);
    if path.is_absolute() {
        return Ok(format!("file://{}", clean_path(path).display()));
    }

    if is_module_shorthand(source) {
        return Ok(format!("git::https://{source}.git"));
    }

    let joined = base.join(source);
    let abs = if joined.is_absolute() {
        clean_path(&joined)
    } else {
        clean_path(&std::env::current_dir()?.join(joined))
    };
    Ok(format!("file://{}", abs.display()))
}

/// A shorthand looks like `github.com/org/repo`: a dotted host followed by
/// at least two path segments.
fn is_module_shorthand(source: &str) -> bool {
    let re = Regex::new(r"^[0-9A-Za-z][-0-9A-Za-z]*(\.[-0-9A-Za-z]+)+(/[-._0-9A-Za-z]+){2,}$")
        .unwrap();
    re.is_match(source)
}

/// Lexically removes `.` and `..` components without touching the
/// filesystem.
pub fn clean_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(Component::ParentDir),
            },
            other => out.push(other),
        }
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::{clean_path, detect};
    use std::path::{Path, PathBuf};

    #[test]
    fn absolute_path_becomes_file_key() {
        let key = detect("/srv/app", Path::new("/anywhere")).expect("detect");
        assert_eq!(key, "file:///srv/app");
    }

    #[test]
    fn relative_path_resolves_against_base() {
        let key = detect("../api", Path::new("/srv/apps/web")).expect("detect");
        assert_eq!(key, "file:///srv/apps/api");
    }

    #[test]
    fn dot_resolves_to_base_itself() {
        let key = detect(".", Path::new("/srv/apps/web")).expect("detect");
        assert_eq!(key, "file:///srv/apps/web");
    }

    #[test]
    fn scheme_passes_through() {
        let key = detect("file:///srv/app", Path::new("/base")).expect("detect");
        assert_eq!(key, "file:///srv/app");
        let key = detect("git::https://example.com/x/y.git", Path::new("/base")).expect("detect");
        assert_eq!(key, "git::https://example.com/x/y.git");
    }

    #[test]
    fn module_shorthand_becomes_git_url() {
        let key = detect("github.com/acme/api", Path::new("/base")).expect("detect");
        assert_eq!(key, "git::https://github.com/acme/api.git");
    }

    #[test]
    fn bare_name_is_a_relative_path() {
        let key = detect("api", Path::new("/srv/apps")).expect("detect");
        assert_eq!(key, "file:///srv/apps/api");
    }

    #[test]
    fn empty_source_is_an_error() {
        assert!(detect("", Path::new("/base")).is_err());
    }

    #[test]
    fn identical_inputs_give_identical_keys() {
        let a = detect("../api", Path::new("/srv/apps/web")).expect("detect");
        let b = detect("../api", Path::new("/srv/apps/web")).expect("detect");
        assert_eq!(a, b);
    }

    #[test]
    fn clean_path_strips_dot_segments() {
        assert_eq!(
            clean_path(Path::new("/a/b/../c/./d")),
            PathBuf::from("/a/c/d")
        );
        assert_eq!(clean_path(Path::new("a/./b")), PathBuf::from("a/b"));
        assert_eq!(clean_path(Path::new("../../a")), PathBuf::from("../../a"));
        assert_eq!(clean_path(Path::new("/..")), PathBuf::from("/"));
    }
}
