//! Per-repetition report archive: raw report directories are copied into
//! `_log_{rep}/<revision>/` during the sequence, then packed into a gzipped
//! tarball once the sequence is over.

use std::fs::File;
use std::path::Path;

use anyhow::{Context, Result};
use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::info;

/// Recursively copy `src` into `dest`, creating `dest` as needed.
pub fn copy_dir(src: &Path, dest: &Path) -> std::io::Result<u64> {
    std::fs::create_dir_all(dest)?;
    let mut copied = 0;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let target = dest.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copied += copy_dir(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
            copied += 1;
        }
    }
    Ok(copied)
}

/// Pack `dir` into a `.tar.gz` at `dest` and remove `dir`. The tarball
/// holds the directory under its own name.
pub fn pack_and_remove(dir: &Path, dest: &Path) -> Result<()> {
    let name = dir
        .file_name()
        .with_context(|| format!("cannot archive {}", dir.display()))?;

    if !dir.exists() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
    }

    let file =
        File::create(dest).with_context(|| format!("failed to create {}", dest.display()))?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder
        .append_dir_all(name, dir)
        .with_context(|| format!("failed to pack {}", dir.display()))?;
    builder.into_inner()?.finish()?;

    std::fs::remove_dir_all(dir).with_context(|| format!("failed to remove {}", dir.display()))?;
    info!("Archived reports into {}", dest.display());
    Ok(())
}
