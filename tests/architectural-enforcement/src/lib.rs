//! Architectural Enforcement Integration Tests
//!
//! This package contains integration tests that enforce architectural principles:
//! - No blocking sleeps in production code
//! - No console printing outside the daemon binary
//! - The core crate stays independent of the HTTP stack
//!
//! These tests are designed to catch violations early in the development cycle.

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

/// Workspace root (two levels above this package)
#[must_use]
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .ancestors()
        .nth(2)
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
}

/// Production source files of a crate (everything under its `src/`)
#[must_use]
pub fn production_sources(crate_dir: &str) -> Vec<PathBuf> {
    let src = workspace_root().join(crate_dir).join("src");
    WalkDir::new(src)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "rs"))
        .map(walkdir::DirEntry::into_path)
        .collect()
}

/// The part of a source file before its `#[cfg(test)]` module
#[must_use]
pub fn non_test_code(source: &str) -> &str {
    source
        .find("#[cfg(test)]")
        .map_or(source, |idx| &source[..idx])
}

/// Lines of production code that contain `needle`, as `path:line: text`
#[must_use]
pub fn find_violations(crate_dir: &str, needle: &str) -> Vec<String> {
    let mut violations = Vec::new();
    for path in production_sources(crate_dir) {
        let Ok(source) = std::fs::read_to_string(&path) else {
            continue;
        };
        for (idx, line) in non_test_code(&source).lines().enumerate() {
            let trimmed = line.trim_start();
            if trimmed.starts_with("//") {
                continue;
            }
            if line.contains(needle) {
                violations.push(format!("{}:{}: {}", path.display(), idx + 1, line.trim()));
            }
        }
    }
    violations
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_test_code_cuts_at_test_module() {
        let source = "fn a() {}\n#[cfg(test)]\nmod tests { fn b() {} }\n";
        assert_eq!(non_test_code(source), "fn a() {}\n");
        assert_eq!(non_test_code("fn a() {}"), "fn a() {}");
    }

    #[test]
    fn test_workspace_root_has_manifest() {
        assert!(workspace_root().join("Cargo.toml").exists());
    }
}
