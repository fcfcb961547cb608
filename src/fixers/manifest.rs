//! `package.json` reading and dependency fixers.

use crate::diagnostic::{Diagnostic, FileSet, Fix};
use crate::parsers::is_bare_specifier;
use regex::Captures;
use serde_json::{Map, Value};
use std::collections::HashSet;
use tracing::warn;

pub const MANIFEST_PATH: &str = "package.json";

const DEPENDENCY_SECTIONS: [&str; 3] = ["dependencies", "devDependencies", "peerDependencies"];

/// Package name for an import specifier, or `None` for relative and aliased paths.
///
/// `lodash/fp` → `lodash`, `@scope/pkg/sub` → `@scope/pkg`, `node:fs` → `fs`.
pub fn package_name(specifier: &str) -> Option<String> {
    let spec = specifier.trim();
    if spec.is_empty() || !is_bare_specifier(spec) {
        return None;
    }
    let spec = spec.strip_prefix("node:").unwrap_or(spec);
    let mut parts = spec.split('/');
    let first = parts.next()?;
    if let Some(scope) = first.strip_prefix('@') {
        let pkg = parts.next()?;
        if scope.is_empty() || pkg.is_empty() {
            return None;
        }
        return Some(format!("{}/{}", first, pkg));
    }
    (!first.is_empty()).then(|| first.to_string())
}

/// Parsed manifest object, if the set has a valid one.
pub fn read_manifest(files: &FileSet) -> Option<Map<String, Value>> {
    let file = files.get(MANIFEST_PATH)?;
    match serde_json::from_str::<Value>(&file.content) {
        Ok(Value::Object(map)) => Some(map),
        Ok(_) => {
            warn!("package.json is not a JSON object");
            None
        }
        Err(err) => {
            warn!(error = %err, "package.json does not parse");
            None
        }
    }
}

pub fn declared_dependencies(files: &FileSet) -> HashSet<String> {
    let Some(manifest) = read_manifest(files) else {
        return HashSet::new();
    };
    DEPENDENCY_SECTIONS
        .iter()
        .filter_map(|section| manifest.get(*section).and_then(Value::as_object))
        .flat_map(|deps| deps.keys().cloned())
        .collect()
}

pub fn script(files: &FileSet, name: &str) -> Option<String> {
    read_manifest(files)?
        .get("scripts")?
        .as_object()?
        .get(name)?
        .as_str()
        .map(str::to_string)
}

fn render(manifest: &Map<String, Value>) -> Option<String> {
    serde_json::to_string_pretty(manifest)
        .ok()
        .map(|s| format!("{}\n", s))
}

/// Add `name: "latest"` to `dependencies`, creating the manifest if needed.
pub fn add_dependency(files: &FileSet, name: &str) -> Option<Fix> {
    let mut manifest = match files.get(MANIFEST_PATH) {
        Some(_) => read_manifest(files)?,
        None => {
            let mut fresh = Map::new();
            fresh.insert("name".to_string(), Value::from("app"));
            fresh.insert("version".to_string(), Value::from("0.1.0"));
            fresh.insert("private".to_string(), Value::from(true));
            fresh
        }
    };

    let declared = DEPENDENCY_SECTIONS.iter().any(|section| {
        manifest
            .get(*section)
            .and_then(Value::as_object)
            .is_some_and(|deps| deps.contains_key(name))
    });
    if declared {
        return None;
    }

    let deps = manifest
        .entry("dependencies")
        .or_insert_with(|| Value::Object(Map::new()));
    if !deps.is_object() {
        *deps = Value::Object(Map::new());
    }
    deps.as_object_mut()?
        .insert(name.to_string(), Value::from("latest"));

    Some(Fix::replace(
        MANIFEST_PATH,
        render(&manifest)?,
        format!("Added missing dependency '{}' to {}", name, MANIFEST_PATH),
    ))
}

/// Module name from the fixer's captures, falling back to the message.
fn captured_module(diag: &Diagnostic, caps: Option<&Captures<'_>>) -> Option<String> {
    if let Some(m) = caps.and_then(|c| c.get(1)) {
        return Some(m.as_str().to_string());
    }
    static_regex!(r"(?:Cannot find module '([^']+)'|Missing dependency: (\S+))")
        .and_then(|re| re.captures(&diag.message))
        .and_then(|c| c.get(1).or_else(|| c.get(2)))
        .map(|m| m.as_str().to_string())
}

pub(super) fn fix_missing_module(
    diag: &Diagnostic,
    caps: Option<&Captures<'_>>,
    files: &FileSet,
) -> Option<Fix> {
    let module = captured_module(diag, caps)?;
    let name = package_name(&module)?;
    add_dependency(files, &name)
}

/// Replace an unsatisfiable version range with `"latest"`.
pub(super) fn fix_no_matching_version(
    _diag: &Diagnostic,
    caps: Option<&Captures<'_>>,
    files: &FileSet,
) -> Option<Fix> {
    let name = caps?.get(1)?.as_str();
    let mut manifest = read_manifest(files)?;
    let mut changed = false;
    for section in DEPENDENCY_SECTIONS {
        let Some(deps) = manifest.get_mut(section).and_then(Value::as_object_mut) else {
            continue;
        };
        if let Some(version) = deps.get_mut(name) {
            if version.as_str() != Some("latest") {
                *version = Value::from("latest");
                changed = true;
            }
        }
    }
    if !changed {
        return None;
    }
    Some(Fix::replace(
        MANIFEST_PATH,
        render(&manifest)?,
        format!("Pinned '{}' to \"latest\" in {}", name, MANIFEST_PATH),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostic::FileArtifact;

    #[test]
    fn test_package_name_forms() {
        assert_eq!(package_name("left-pad").as_deref(), Some("left-pad"));
        assert_eq!(package_name("lodash/fp").as_deref(), Some("lodash"));
        assert_eq!(package_name("@radix-ui/react-dialog/dist").as_deref(), Some("@radix-ui/react-dialog"));
        assert_eq!(package_name("node:fs").as_deref(), Some("fs"));
        assert_eq!(package_name("./local"), None);
        assert_eq!(package_name("@/lib/utils"), None);
        assert_eq!(package_name("~/lib/utils"), None);
        assert_eq!(package_name("@scope"), None);
    }

    #[test]
    fn test_add_dependency_preserves_key_order() {
        let files = FileSet::from_artifacts(vec![FileArtifact::new(
            "package.json",
            r#"{"name":"x","scripts":{"build":"next build"},"dependencies":{"react":"18.2.0"}}"#,
        )]);
        let fix = add_dependency(&files, "left-pad").unwrap();
        let content = fix.new_content.unwrap();
        let value: Value = serde_json::from_str(&content).unwrap();
        assert_eq!(value["dependencies"]["left-pad"], "latest");
        assert_eq!(value["dependencies"]["react"], "18.2.0");
        assert!(content.find("\"name\"").unwrap() < content.find("\"scripts\"").unwrap());
    }

    #[test]
    fn test_add_dependency_skips_declared_dev_dep() {
        let files = FileSet::from_artifacts(vec![FileArtifact::new(
            "package.json",
            r#"{"devDependencies":{"typescript":"^5"}}"#,
        )]);
        assert!(add_dependency(&files, "typescript").is_none());
    }

    #[test]
    fn test_add_dependency_creates_manifest() {
        let files = FileSet::new();
        let fix = add_dependency(&files, "zod").unwrap();
        assert_eq!(fix.target_path, "package.json");
        let value: Value = serde_json::from_str(fix.new_content.as_deref().unwrap()).unwrap();
        assert_eq!(value["dependencies"]["zod"], "latest");
    }

    #[test]
    fn test_invalid_manifest_yields_no_fix() {
        let files = FileSet::from_artifacts(vec![FileArtifact::new("package.json", "{ broken")]);
        assert!(add_dependency(&files, "zod").is_none());
    }

    #[test]
    fn test_declared_dependencies_and_script() {
        let files = FileSet::from_artifacts(vec![FileArtifact::new(
            "package.json",
            r#"{"scripts":{"test":"jest"},"dependencies":{"a":"1"},"devDependencies":{"b":"2"}}"#,
        )]);
        let deps = declared_dependencies(&files);
        assert!(deps.contains("a") && deps.contains("b"));
        assert_eq!(script(&files, "test").as_deref(), Some("jest"));
        assert_eq!(script(&files, "build"), None);
    }
}
