//! Structural tests for the layer boundaries.
//!
//! Source files are scanned for forbidden imports: `domain` stays pure,
//! `application` never reaches into adapters, and adapters never reach into
//! command dispatch.

use std::path::{Path, PathBuf};

fn src() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("src")
}

/// Collect all `.rs` files under a directory recursively.
fn collect_rs_files(dir: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    if let Ok(entries) = std::fs::read_dir(dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                files.extend(collect_rs_files(&path));
            } else if path.extension().and_then(|e| e.to_str()) == Some("rs") {
                files.push(path);
            }
        }
    }
    files
}

/// Non-comment lines outside `#[cfg(test)]` blocks.
fn production_lines(path: &Path) -> Vec<String> {
    let Ok(content) = std::fs::read_to_string(path) else {
        return Vec::new();
    };
    let mut lines = Vec::new();
    let mut depth = 0i32;
    let mut test_depth: Option<i32> = None;
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.contains("#[cfg(test)]") && test_depth.is_none() {
            test_depth = Some(depth);
        }
        let in_test = test_depth.is_some();
        for ch in line.chars() {
            match ch {
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if test_depth.is_some_and(|start| depth <= start) {
                        test_depth = None;
                    }
                }
                _ => {}
            }
        }
        let comment =
            trimmed.starts_with("//") || trimmed.starts_with("/*") || trimmed.starts_with('*');
        if !in_test && !comment {
            lines.push(line.to_string());
        }
    }
    lines
}

/// `file:line` for every production line in `dir` containing a pattern.
fn violations(dir: &Path, patterns: &[&str]) -> Vec<String> {
    let mut found = Vec::new();
    for file in collect_rs_files(dir) {
        if file.ends_with("test_support.rs") {
            continue;
        }
        for line in production_lines(&file) {
            if patterns.iter().any(|p| line.contains(p)) {
                found.push(format!("{}: {}", file.display(), line.trim()));
            }
        }
    }
    found
}

#[test]
fn domain_has_no_io_or_outer_layers() {
    let found = violations(
        &src().join("domain"),
        &[
            "tokio::",
            "std::fs",
            "std::process",
            "reqwest",
            "crate::infra",
            "crate::application",
            "crate::commands",
        ],
    );
    assert!(found.is_empty(), "domain must stay pure:\n{}", found.join("\n"));
}

#[test]
fn application_does_not_import_adapters() {
    let found = violations(
        &src().join("application"),
        &["crate::infra", "crate::commands", "crate::app::", "reqwest"],
    );
    assert!(found.is_empty(), "application imports adapters:\n{}", found.join("\n"));
}

#[test]
fn infra_depends_only_on_ports() {
    let found = violations(
        &src().join("infra"),
        &["crate::commands", "crate::application::services", "crate::app::"],
    );
    assert!(found.is_empty(), "infra reaches past the ports:\n{}", found.join("\n"));
}

#[test]
fn only_main_writes_to_stdout() {
    let mut found = Vec::new();
    for dir in ["domain", "application", "infra", "commands"] {
        found.extend(violations(&src().join(dir), &["println!", "print!("]));
    }
    assert!(
        found.is_empty(),
        "stdout carries the response envelope only:\n{}",
        found.join("\n")
    );
}
