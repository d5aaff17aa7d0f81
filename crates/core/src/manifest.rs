//! Dependency manifest derivation for generated services.
//!
//! Scans program source for module-import expressions and records every
//! external package at an unpinned `latest` version. This is a textual
//! heuristic: specifiers computed at runtime are not detected.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Version marker used for every scanned dependency.
pub const LATEST: &str = "latest";

/// Package name written into every generated manifest.
pub const MANIFEST_PACKAGE_NAME: &str = "generated-server";

/// Version written into every generated manifest.
pub const MANIFEST_PACKAGE_VERSION: &str = "1.0.0";

/// Dependencies every generated service gets regardless of what it imports.
pub const BASELINE_DEPENDENCIES: [(&str, &str); 3] = [
    ("express", "^4.17.1"),
    ("cors", "^2.8.5"),
    ("body-parser", "^1.19.0"),
];

/// Node core modules; importing these never requires installation.
const NODE_BUILTINS: &[&str] = &[
    "assert",
    "async_hooks",
    "buffer",
    "child_process",
    "cluster",
    "console",
    "constants",
    "crypto",
    "dgram",
    "diagnostics_channel",
    "dns",
    "domain",
    "events",
    "fs",
    "http",
    "http2",
    "https",
    "inspector",
    "module",
    "net",
    "os",
    "path",
    "perf_hooks",
    "process",
    "punycode",
    "querystring",
    "readline",
    "repl",
    "stream",
    "string_decoder",
    "timers",
    "tls",
    "trace_events",
    "tty",
    "url",
    "util",
    "v8",
    "vm",
    "wasi",
    "worker_threads",
    "zlib",
];

/// `require('x')` / `import('x')` in group 1, static `import ... from 'x'`
/// and bare `import 'x'` in group 2.
static IMPORT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"\b(?:require|import)\s*\(\s*['"]([^'"]+)['"]\s*\)|\bimport\s+(?:[\w*{}\s,$]+?\s+from\s+)?['"]([^'"]+)['"]"#,
    )
    .expect("valid regex")
});

// ---------------------------------------------------------------------------
// Manifest
// ---------------------------------------------------------------------------

/// The `package.json` written into a workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackageManifest {
    pub name: String,
    pub version: String,
    pub main: String,
    pub dependencies: BTreeMap<String, String>,
}

impl PackageManifest {
    /// Pretty-printed JSON, as written to disk.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Build the manifest for `source`, whose entry file is `main`.
///
/// Scanned packages override the baseline ranges with `latest`.
pub fn derive_manifest(source: &str, main: &str) -> PackageManifest {
    let mut dependencies: BTreeMap<String, String> = BASELINE_DEPENDENCIES
        .iter()
        .map(|(name, range)| (name.to_string(), range.to_string()))
        .collect();

    for package in scan_imports(source) {
        dependencies.insert(package, LATEST.to_string());
    }

    PackageManifest {
        name: MANIFEST_PACKAGE_NAME.to_string(),
        version: MANIFEST_PACKAGE_VERSION.to_string(),
        main: main.to_string(),
        dependencies,
    }
}

/// Collect the external package names imported by `source`.
pub fn scan_imports(source: &str) -> BTreeSet<String> {
    IMPORT_RE
        .captures_iter(source)
        .filter_map(|caps| caps.get(1).or_else(|| caps.get(2)))
        .filter_map(|m| package_name(m.as_str()))
        .map(str::to_string)
        .collect()
}

/// Reduce a module specifier to the package that provides it.
///
/// Returns `None` for relative or absolute paths, `node:` specifiers and
/// core modules.
fn package_name(specifier: &str) -> Option<&str> {
    let specifier = specifier.trim();
    if specifier.is_empty()
        || specifier.starts_with('.')
        || specifier.starts_with('/')
        || specifier.starts_with("node:")
    {
        return None;
    }

    let name = if specifier.starts_with('@') {
        let mut parts = specifier.splitn(3, '/');
        let scope = parts.next()?;
        let package = parts.next().filter(|p| !p.is_empty())?;
        &specifier[..scope.len() + 1 + package.len()]
    } else {
        specifier.split('/').next()?
    };

    if NODE_BUILTINS.contains(&name) {
        None
    } else {
        Some(name)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
