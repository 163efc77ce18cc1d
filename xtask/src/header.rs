// Licensed under the Apache-2.0 license

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

const LICENSE: &str = "Licensed under the Apache-2.0 license";

const SKIP_DIRS: &[&str] = &["target", ".git", "examples"];

fn comment_prefix(path: &Path) -> Option<&'static str> {
    match path.extension()?.to_str()? {
        "rs" => Some("// "),
        "toml" => Some("# "),
        _ => None,
    }
}

fn is_skipped(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| SKIP_DIRS.contains(&name))
}

fn has_header(contents: &str) -> bool {
    contents
        .lines()
        .take(2)
        .any(|line| line.contains(LICENSE))
}

fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Report (or with `fix`, repair) Rust and TOML files missing the license
/// line in their first two lines.
pub fn run(fix: bool) -> Result<()> {
    println!("Checking license headers");

    let root = workspace_root();
    let mut missing = Vec::new();

    for entry in WalkDir::new(&root).into_iter().filter_entry(|e| !is_skipped(e)) {
        let entry = entry.context("Failed to walk workspace")?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let Some(prefix) = comment_prefix(path) else {
            continue;
        };
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        if has_header(&contents) {
            continue;
        }

        if fix {
            let fixed = format!("{}{}\n\n{}", prefix, LICENSE, contents);
            std::fs::write(path, fixed)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("✓ Added header to {}", path.display());
        } else {
            missing.push(path.to_path_buf());
        }
    }

    if !missing.is_empty() {
        for path in &missing {
            println!("✗ {}", path.display());
        }
        anyhow::bail!(
            "{} file(s) missing license header; run `cargo xtask header --fix`",
            missing.len()
        );
    }

    println!("✓ License headers present");
    Ok(())
}
