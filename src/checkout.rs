/// Working-tree handle and revision checkout.
///
/// All trials of a project share one checked-out tree, so every step takes
/// an explicit [`WorkingTree`] instead of relying on the process's current
/// directory. The [`Vcs`] trait abstracts the version-control commands so the
/// recorder can be driven without a real repository.
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, info};

use crate::error::{HarnessError, Result};

/// A project's checked-out source tree.
#[derive(Debug, Clone)]
pub struct WorkingTree {
    root: PathBuf,
}

impl WorkingTree {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn join(&self, rel: impl AsRef<Path>) -> PathBuf {
        self.root.join(rel)
    }

    pub fn pom(&self) -> PathBuf {
        self.root.join("pom.xml")
    }

    pub fn surefire_dir(&self) -> PathBuf {
        self.root.join("target").join("surefire-reports")
    }

    pub fn selection_dir(&self) -> PathBuf {
        self.root.join(".ekstazi")
    }

    pub fn time_log_dir(&self) -> PathBuf {
        self.selection_dir().join("time-logs")
    }

    pub fn coverage_root(&self) -> PathBuf {
        self.root.join("coverage-reports")
    }
}

/// Version-control operations the checkout driver needs.
pub trait Vcs {
    /// Clone `url` into `dest`.
    fn clone_into(&self, url: &str, dest: &Path) -> Result<()>;

    /// Remove every untracked and ignored file. Run once before a sequence.
    fn clean(&self, tree: &WorkingTree) -> Result<()>;

    /// Discard uncommitted changes to tracked files. Run at every trial start.
    fn reset(&self, tree: &WorkingTree) -> Result<()>;

    /// Check out `revision`.
    fn checkout(&self, tree: &WorkingTree, revision: &str) -> Result<()>;
}

/// [`Vcs`] backed by the `git` executable.
pub struct Git;

impl Git {
    fn run(&self, cwd: &Path, args: &[&str]) -> std::result::Result<String, String> {
        debug!("git {} (in {})", args.join(" "), cwd.display());
        let output = Command::new("git")
            .args(args)
            .current_dir(cwd)
            .output()
            .map_err(|e| format!("failed to run git: {e}"))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(format!("git {} failed: {}", args.join(" "), stderr.trim()));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Vcs for Git {
    fn clone_into(&self, url: &str, dest: &Path) -> Result<()> {
        let parent = dest
            .parent()
            .ok_or_else(|| HarnessError::Config(format!("bad clone target {}", dest.display())))?;
        std::fs::create_dir_all(parent)?;
        let dest_str = dest.to_string_lossy();
        self.run(parent, &["clone", url, &dest_str])
            .map_err(HarnessError::Other)?;
        info!("Cloned {} into {}", url, dest.display());
        Ok(())
    }

    fn clean(&self, tree: &WorkingTree) -> Result<()> {
        self.run(tree.root(), &["clean", "-fdx", "--quiet"])
            .map_err(HarnessError::Other)?;
        Ok(())
    }

    fn reset(&self, tree: &WorkingTree) -> Result<()> {
        self.run(tree.root(), &["reset", "--hard", "--quiet"])
            .map_err(|detail| HarnessError::Checkout {
                revision: "HEAD".to_string(),
                detail,
            })?;
        Ok(())
    }

    fn checkout(&self, tree: &WorkingTree, revision: &str) -> Result<()> {
        self.run(tree.root(), &["checkout", "--quiet", revision])
            .map_err(|detail| HarnessError::Checkout {
                revision: revision.to_string(),
                detail,
            })?;
        info!("Successfully checked out commit {}.", revision);
        Ok(())
    }
}

/// Open the project's tree, cloning it first when the directory is missing.
pub fn ensure_cloned(vcs: &dyn Vcs, url: &str, dest: &Path) -> Result<WorkingTree> {
    if !dest.exists() {
        vcs.clone_into(url, dest)?;
    }
    Ok(WorkingTree::new(dest))
}

/// Reset the tree and check out `revision`.
pub fn switch_to(vcs: &dyn Vcs, tree: &WorkingTree, revision: &str) -> Result<()> {
    vcs.reset(tree)?;
    vcs.checkout(tree, revision)
}
