/// Size reader: Java file count and lines of code in the working tree.
///
/// A line counts as code when, after stripping comments, anything but
/// whitespace is left. Build output and VCS metadata are skipped.
use std::path::Path;

use anyhow::{Context, Result};

const SKIPPED_DIRS: [&str; 3] = [".git", "target", ".ekstazi"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceSize {
    pub files: u64,
    pub loc: u64,
}

/// Count `.java` files under `root` and their lines of code.
pub fn measure(root: &Path) -> Result<SourceSize> {
    let mut size = SourceSize::default();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let entries = std::fs::read_dir(&dir)
            .with_context(|| format!("Failed to list {}", dir.display()))?;
        for entry in entries {
            let path = entry?.path();
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
            if path.is_dir() {
                if !SKIPPED_DIRS.contains(&name) {
                    pending.push(path);
                }
                continue;
            }
            if path.extension().and_then(|e| e.to_str()) == Some("java") {
                let bytes = std::fs::read(&path)
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                size.files += 1;
                size.loc += count_code_lines(&String::from_utf8_lossy(&bytes));
            }
        }
    }

    Ok(size)
}

/// Lines holding code once `//` and `/* */` comments are removed.
pub fn count_code_lines(source: &str) -> u64 {
    let mut in_block = false;
    let mut count = 0;

    for line in source.lines() {
        let mut rest = line;
        let mut has_code = false;
        loop {
            if in_block {
                match rest.find("*/") {
                    Some(end) => {
                        in_block = false;
                        rest = &rest[end + 2..];
                    }
                    None => break,
                }
            } else {
                let line_comment = rest.find("//");
                let block_comment = rest.find("/*");
                let cut = match (line_comment, block_comment) {
                    (Some(l), Some(b)) => l.min(b),
                    (Some(l), None) => l,
                    (None, Some(b)) => b,
                    (None, None) => rest.len(),
                };
                if !rest[..cut].trim().is_empty() {
                    has_code = true;
                }
                if block_comment == Some(cut) {
                    in_block = true;
                    rest = &rest[cut + 2..];
                } else {
                    break;
                }
            }
        }
        if has_code {
            count += 1;
        }
    }

    count
}
