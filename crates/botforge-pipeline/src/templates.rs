//! Template library: maps `(file kind, wiring key)` to template text.
//!
//! The built-in library is compiled into the binary. An overlay directory laid
//! out as `<dir>/<kind>/<wiring>.tmpl` replaces or extends it; since `:` is not
//! portable in file names, the first `.` of a file stem stands for the `:` of
//! the wiring key (`source/rag.chroma.tmpl` is `source` + `rag:chroma`).
//!
//! Placeholders are `{{name}}` where `name` is `[a-z0-9_]+`. Anything else in
//! braces is literal text.

use botforge_core::FileKind;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TemplateKey {
    pub kind: FileKind,
    pub wiring: String,
}

impl TemplateKey {
    pub fn new(kind: FileKind, wiring: impl Into<String>) -> Self {
        Self { kind, wiring: wiring.into() }
    }
}

impl std::fmt::Display for TemplateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.kind, self.wiring)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TemplateOrigin {
    BuiltIn,
    Overlay(PathBuf),
}

#[derive(Clone, Debug)]
struct TemplateEntry {
    body: String,
    origin: TemplateOrigin,
}

#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("cannot read template {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("template {path} is not under a known kind directory")]
    UnknownKind { path: PathBuf },

    #[error("unresolved placeholders: {}", .0.join(", "))]
    Unresolved(Vec<String>),
}

const BUILTIN: &[(FileKind, &str, &str)] = &[
    (FileKind::Source, "app", include_str!("../templates/source/app.tmpl")),
    (FileKind::Source, "team", include_str!("../templates/source/team.tmpl")),
    (FileKind::Source, "api", include_str!("../templates/source/api.tmpl")),
    (FileKind::Source, "integrations", include_str!("../templates/source/integrations.tmpl")),
    (FileKind::Source, "rag:chroma", include_str!("../templates/source/rag.chroma.tmpl")),
    (FileKind::Source, "memory:sqlite", include_str!("../templates/source/memory.sqlite.tmpl")),
    (FileKind::Source, "memory:buffer", include_str!("../templates/source/memory.buffer.tmpl")),
    (
        FileKind::Source,
        "function_calling:tool_registry",
        include_str!("../templates/source/function_calling.tool_registry.tmpl"),
    ),
    (
        FileKind::Source,
        "web_search:duckduckgo",
        include_str!("../templates/source/web_search.duckduckgo.tmpl"),
    ),
    (FileKind::Config, "settings", include_str!("../templates/config/settings.tmpl")),
    (FileKind::Config, "env", include_str!("../templates/config/env.tmpl")),
    (FileKind::Test, "chat", include_str!("../templates/test/chat.tmpl")),
    (FileKind::Doc, "api", include_str!("../templates/doc/api.tmpl")),
    (FileKind::Doc, "readme", include_str!("../templates/doc/readme.tmpl")),
];

/// Read-only after construction; share it behind an `Arc`.
#[derive(Clone, Debug, Default)]
pub struct TemplateLibrary {
    templates: BTreeMap<TemplateKey, TemplateEntry>,
}

impl TemplateLibrary {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn builtin() -> Self {
        let mut lib = Self::empty();
        for (kind, wiring, body) in BUILTIN {
            lib.templates.insert(
                TemplateKey::new(*kind, *wiring),
                TemplateEntry { body: (*body).to_string(), origin: TemplateOrigin::BuiltIn },
            );
        }
        lib
    }

    /// Built-ins overlaid with every `*.tmpl` under `dir`.
    pub fn with_overlay(dir: &Path) -> Result<Self, TemplateError> {
        let mut lib = Self::builtin();
        lib.load_overlay(dir)?;
        Ok(lib)
    }

    pub fn load_overlay(&mut self, dir: &Path) -> Result<usize, TemplateError> {
        let mut loaded = 0;
        for entry in walkdir::WalkDir::new(dir).sort_by_file_name() {
            let entry = entry.map_err(|e| TemplateError::Io {
                path: e.path().map(Path::to_path_buf).unwrap_or_else(|| dir.to_path_buf()),
                source: e
                    .into_io_error()
                    .unwrap_or_else(|| std::io::Error::other("directory walk failed")),
            })?;
            let path = entry.path();
            if !entry.file_type().is_file() || path.extension().and_then(|e| e.to_str()) != Some("tmpl") {
                continue;
            }
            let key = key_for_overlay(dir, path)
                .ok_or_else(|| TemplateError::UnknownKind { path: path.to_path_buf() })?;
            let body = std::fs::read_to_string(path)
                .map_err(|source| TemplateError::Io { path: path.to_path_buf(), source })?;
            debug!(template = %key, path = %path.display(), "overlay template");
            self.templates.insert(
                key,
                TemplateEntry { body, origin: TemplateOrigin::Overlay(path.to_path_buf()) },
            );
            loaded += 1;
        }
        info!("Loaded {} overlay templates from {}", loaded, dir.display());
        Ok(loaded)
    }

    pub fn register(&mut self, key: TemplateKey, body: impl Into<String>) {
        self.templates.insert(key, TemplateEntry { body: body.into(), origin: TemplateOrigin::BuiltIn });
    }

    pub fn lookup(&self, kind: FileKind, wiring: &str) -> Option<&str> {
        self.templates
            .get(&TemplateKey::new(kind, wiring))
            .map(|e| e.body.as_str())
    }

    pub fn origin(&self, key: &TemplateKey) -> Option<&TemplateOrigin> {
        self.templates.get(key).map(|e| &e.origin)
    }

    pub fn keys(&self) -> impl Iterator<Item = &TemplateKey> {
        self.templates.keys()
    }

    /// Wiring keys available for a kind, sorted.
    pub fn wirings(&self, kind: FileKind) -> Vec<&str> {
        self.templates
            .keys()
            .filter(|k| k.kind == kind)
            .map(|k| k.wiring.as_str())
            .collect()
    }

    /// Adapters with a template for `capability`, e.g. `["chroma"]` for `rag`.
    pub fn adapters(&self, capability: &str) -> Vec<&str> {
        let prefix = format!("{}:", capability);
        self.templates
            .keys()
            .filter_map(|k| k.wiring.strip_prefix(prefix.as_str()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

fn key_for_overlay(root: &Path, path: &Path) -> Option<TemplateKey> {
    let rel = path.strip_prefix(root).ok()?;
    let mut parts = rel.iter();
    let kind = FileKind::parse(parts.next()?.to_str()?)?;
    let file = parts.next()?;
    if parts.next().is_some() {
        return None;
    }
    let stem = Path::new(file).file_stem()?.to_str()?;
    let wiring = stem.replacen('.', ":", 1);
    Some(TemplateKey::new(kind, wiring))
}

/// Single pass `{{name}}` substitution. Substituted values are never re-scanned.
pub fn expand(template: &str, vars: &BTreeMap<String, String>) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(template.len());
    let mut unresolved = Vec::new();
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find("}}") {
            Some(end) if is_placeholder_name(&after[..end]) => {
                let name = &after[..end];
                match vars.get(name) {
                    Some(value) => out.push_str(value),
                    None => {
                        if !unresolved.iter().any(|u| u == name) {
                            unresolved.push(name.to_string());
                        }
                    }
                }
                rest = &after[end + 2..];
            }
            _ => {
                out.push_str("{{");
                rest = after;
            }
        }
    }
    out.push_str(rest);

    if unresolved.is_empty() {
        Ok(out)
    } else {
        Err(TemplateError::Unresolved(unresolved))
    }
}

fn is_placeholder_name(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn expand_substitutes_known_names() {
        let out = expand("hi {{name}}, port {{port}}", &vars(&[("name", "Bot"), ("port", "80")])).unwrap();
        assert_eq!(out, "hi Bot, port 80");
    }

    #[test]
    fn expand_reports_unresolved() {
        match expand("{{a}} {{b}} {{a}}", &vars(&[])) {
            Err(TemplateError::Unresolved(names)) => assert_eq!(names, vec!["a", "b"]),
            other => panic!("expected unresolved, got {:?}", other),
        }
    }

    #[test]
    fn expand_leaves_non_placeholders() {
        let src = "d = {{'k': 1}} and {{ x }} and {{";
        assert_eq!(expand(src, &vars(&[])).unwrap(), src);
    }

    #[test]
    fn expand_does_not_rescan_values() {
        let out = expand("{{a}}", &vars(&[("a", "{{b}}")])).unwrap();
        assert_eq!(out, "{{b}}");
    }

    #[test]
    fn builtin_covers_default_adapters() {
        let lib = TemplateLibrary::builtin();
        assert!(lib.lookup(FileKind::Source, "rag:chroma").is_some());
        assert!(lib.lookup(FileKind::Source, "memory:sqlite").is_some());
        assert!(lib.lookup(FileKind::Source, "function_calling:tool_registry").is_some());
        assert!(lib.lookup(FileKind::Source, "web_search:duckduckgo").is_some());
        assert_eq!(lib.adapters("memory"), vec!["buffer", "sqlite"]);
        assert!(lib.lookup(FileKind::Doc, "nope").is_none());
    }

    #[test]
    fn overlay_key_mapping() {
        let root = Path::new("/t");
        assert_eq!(
            key_for_overlay(root, Path::new("/t/source/rag.chroma.tmpl")),
            Some(TemplateKey::new(FileKind::Source, "rag:chroma"))
        );
        assert_eq!(
            key_for_overlay(root, Path::new("/t/doc/readme.tmpl")),
            Some(TemplateKey::new(FileKind::Doc, "readme"))
        );
        assert_eq!(key_for_overlay(root, Path::new("/t/bogus/readme.tmpl")), None);
        assert_eq!(key_for_overlay(root, Path::new("/t/doc/deep/readme.tmpl")), None);
    }
}
