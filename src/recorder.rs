//! Run Recorder: drives one (project, profile, repetition) sequence over the
//! selected revisions. Each trial moves through
//! `Pending -> Configured -> Built -> Harvested -> Recorded` and ends with
//! exactly one table row or one entry in the error log. Trial errors never
//! escape the revision loop.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::archive;
use crate::build::{BuildTool, Invocation};
use crate::checkout::{self, Vcs, WorkingTree};
use crate::config::{select_revisions, Project, RunOptions, WorkLayout};
use crate::error::HarnessError;
use crate::model::{MetricsRecord, SequenceOutcome, TrialFailure, TrialState};
use crate::mutate;
use crate::profile::Profile;
use crate::reports::{self, failures};
use crate::table::Table;

/// Debug switch file read by the selection tool.
pub const SELECTION_DEBUG_FILE: &str = ".rtsrc";
/// Debug switch file read by the incremental coverage agent.
pub const INSTRUMENTATION_DEBUG_FILE: &str = ".ijacocorc";
const DEBUG_SETTINGS: &str = "debug=true\ndebug.mode=everywhere\n";

/// One trial's fixed coordinates.
struct Trial<'t> {
    project: &'t Project,
    tree: &'t WorkingTree,
    revision: &'t str,
    profile: Profile,
    rep: usize,
}

impl Trial<'_> {
    fn failure(&self, at: TrialState, detail: impl ToString) -> TrialFailure {
        TrialFailure {
            project: self.project.name.clone(),
            revision: self.revision.to_string(),
            profile: self.profile,
            at,
            detail: detail.to_string(),
        }
    }
}

pub struct Recorder<'a> {
    layout: &'a WorkLayout,
    vcs: &'a dyn Vcs,
    build: &'a dyn BuildTool,
    options: &'a RunOptions,
}

impl<'a> Recorder<'a> {
    pub fn new(
        layout: &'a WorkLayout,
        vcs: &'a dyn Vcs,
        build: &'a dyn BuildTool,
        options: &'a RunOptions,
    ) -> Self {
        Self {
            layout,
            vcs,
            build,
            options,
        }
    }

    /// Run every selected revision of `project` under `profile` for
    /// repetition `rep`, then pack the repetition's report archive.
    ///
    /// Only problems outside any single trial (the checkout cannot be
    /// created, the output directory is unwritable) are returned as errors.
    pub fn run_sequence(
        &self,
        project: &Project,
        profile: Profile,
        rep: usize,
    ) -> Result<SequenceOutcome> {
        let name = project.name.as_str();
        let data_dir = self.layout.data_dir(name, profile);
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("failed to create {}", data_dir.display()))?;

        let tree = checkout::ensure_cloned(self.vcs, &project.url, &self.layout.checkout_dir(name))
            .with_context(|| format!("failed to obtain a checkout of {name}"))?;
        let revisions = select_revisions(
            &project.revisions,
            self.options.max_versions,
            self.options.manual_versions.as_deref(),
        );
        info!(
            "{} with {}, repetition {}: {} revisions",
            name,
            profile,
            rep,
            revisions.len()
        );

        let archive_file = self.layout.archive_file(name, profile, rep);
        let archive_dir = self.layout.archive_dir(name, profile, rep);
        remove_stale(&archive_file)?;
        remove_stale(&archive_dir)?;

        let table_file = self.layout.table_file(name, profile, rep);
        let mut table = Table::for_profile(profile);
        table
            .write(&table_file)
            .with_context(|| format!("failed to write {}", table_file.display()))?;

        if let Err(e) = self.vcs.clean(&tree) {
            warn!("Could not clean {}: {}", tree.root().display(), e);
        }

        let mut outcome = SequenceOutcome::default();
        for revision in &revisions {
            let trial = Trial {
                project,
                tree: &tree,
                revision,
                profile,
                rep,
            };
            match self.run_trial(&trial, &mut table) {
                Ok(record) => outcome.recorded.push(record),
                Err(failure) => {
                    error!("{}", failure);
                    self.log_failure(&failure, rep);
                    outcome.failed.push(failure);
                }
            }
        }

        archive::pack_and_remove(&archive_dir, &archive_file)?;
        info!(
            "{} with {}, repetition {}: {} recorded, {} failed",
            name,
            profile,
            rep,
            outcome.recorded.len(),
            outcome.failed.len()
        );
        Ok(outcome)
    }

    fn run_trial(
        &self,
        trial: &Trial<'_>,
        table: &mut Table,
    ) -> std::result::Result<MetricsRecord, TrialFailure> {
        info!("Trial {} @ {} ({})", trial.project.name, trial.revision, trial.profile);

        // Pending -> Configured
        checkout::switch_to(self.vcs, trial.tree, trial.revision)
            .map_err(|e| trial.failure(TrialState::Configured, e))?;
        let applied = mutate::configure(trial.tree, trial.project, trial.revision, trial.profile)
            .map_err(|e| trial.failure(TrialState::Configured, e))?;
        debug!("Applied edits: {:?}", applied);

        // Configured -> Built
        self.prepare_build(trial)
            .map_err(|e| trial.failure(TrialState::Built, format!("{e:#}")))?;
        let invocation = Invocation::for_trial(
            trial.project.overrides.mvn_command.as_deref(),
            trial.profile,
        )
        .map_err(|e| trial.failure(TrialState::Built, e))?;
        let output = match self.build.run(trial.tree, &invocation) {
            Ok(output) => output,
            Err(e) => {
                if let HarnessError::Build { stdout, stderr, .. } = &e {
                    self.keep_failed_build_output(trial, stdout, stderr);
                }
                return Err(trial.failure(TrialState::Built, e));
            }
        };

        // Built -> Harvested
        // Harvest before the build output is saved into the surefire directory.
        let record = reports::harvest(trial.tree, trial.revision, trial.profile, output.elapsed);
        save_build_output(&trial.tree.surefire_dir(), &output.stdout, &output.stderr);
        if let Some(excerpt) = failures::find_failure_excerpt(&output.stdout) {
            warn!("Test failures at {}", trial.revision);
            self.log_test_failures(trial, excerpt);
        }

        // Harvested -> Recorded
        self.archive_reports(trial)
            .map_err(|e| trial.failure(TrialState::Recorded, format!("{e:#}")))?;
        let table_file = self
            .layout
            .table_file(&trial.project.name, trial.profile, trial.rep);
        table
            .push_record(&record)
            .map_err(|e| trial.failure(TrialState::Recorded, e))?;
        if let Err(e) = table.write(&table_file) {
            table.pop_row();
            return Err(trial.failure(TrialState::Recorded, e));
        }

        Ok(record)
    }

    /// Tree preparation that must happen right before the build: stale
    /// timing logs go, and the tools' debug switches are set or cleared.
    fn prepare_build(&self, trial: &Trial<'_>) -> Result<()> {
        let tree = trial.tree;
        if trial.profile.supports_phase_timing() {
            let logs = tree.time_log_dir();
            if logs.exists() {
                std::fs::remove_dir_all(&logs)
                    .with_context(|| format!("failed to remove {}", logs.display()))?;
            }
        }
        set_debug_file(tree, SELECTION_DEBUG_FILE, self.options.debug_selection)?;
        set_debug_file(
            tree,
            INSTRUMENTATION_DEBUG_FILE,
            self.options.debug_instrumentation,
        )?;
        Ok(())
    }

    /// Copy the raw report directories of a finished build into the
    /// repetition archive.
    fn archive_reports(&self, trial: &Trial<'_>) -> Result<()> {
        let dest = self
            .layout
            .archive_dir(&trial.project.name, trial.profile, trial.rep)
            .join(trial.revision);
        let tree = trial.tree;

        let mut sources = vec![tree.surefire_dir()];
        if trial.profile.keeps_selection_state() {
            sources.push(tree.selection_dir());
        }
        if trial.profile.supports_coverage() {
            sources.push(tree.coverage_root());
        }

        for src in sources {
            if !src.is_dir() {
                debug!("Nothing to archive at {}", src.display());
                continue;
            }
            let Some(dir_name) = src.file_name() else {
                continue;
            };
            archive::copy_dir(&src, &dest.join(dir_name))
                .with_context(|| format!("failed to archive {}", src.display()))?;
        }
        Ok(())
    }

    fn keep_failed_build_output(&self, trial: &Trial<'_>, stdout: &str, stderr: &str) {
        let dest = self
            .layout
            .archive_dir(&trial.project.name, trial.profile, trial.rep)
            .join(trial.revision);
        save_build_output(&dest, stdout, stderr);
    }

    fn log_failure(&self, failure: &TrialFailure, rep: usize) {
        let path = self.layout.error_log(&failure.project, failure.profile, rep);
        let entry = format!("[{}] {}\n", Utc::now().to_rfc3339(), failure);
        if let Err(e) = append(&path, &entry) {
            warn!("Could not write {}: {}", path.display(), e);
        }
    }

    fn log_test_failures(&self, trial: &Trial<'_>, excerpt: &str) {
        let path = self
            .layout
            .test_failure_log(&trial.project.name, trial.profile, trial.rep);
        let entry = format!(
            "[{}] Test failures on {} with version {} and coverage choice {}:\n{}\n",
            Utc::now().to_rfc3339(),
            trial.project.name,
            trial.revision,
            trial.profile,
            excerpt
        );
        if let Err(e) = append(&path, &entry) {
            warn!("Could not write {}: {}", path.display(), e);
        }
    }
}

fn remove_stale(path: &Path) -> Result<()> {
    let removed = if path.is_dir() {
        std::fs::remove_dir_all(path)
    } else if path.exists() {
        std::fs::remove_file(path)
    } else {
        return Ok(());
    };
    removed.with_context(|| format!("failed to remove stale {}", path.display()))?;
    debug!("Removed stale {}", path.display());
    Ok(())
}

fn set_debug_file(tree: &WorkingTree, name: &str, enabled: bool) -> Result<()> {
    let path = tree.join(name);
    if enabled {
        std::fs::write(&path, DEBUG_SETTINGS)
            .with_context(|| format!("failed to write {}", path.display()))?;
    } else if path.exists() {
        std::fs::remove_file(&path)
            .with_context(|| format!("failed to remove {}", path.display()))?;
    }
    Ok(())
}

/// Store a build's streams as `stdout.txt` and `stderr.txt` in `dir`.
fn save_build_output(dir: &Path, stdout: &str, stderr: &str) {
    let result = std::fs::create_dir_all(dir)
        .and_then(|_| std::fs::write(dir.join("stdout.txt"), stdout))
        .and_then(|_| std::fs::write(dir.join("stderr.txt"), stderr));
    if let Err(e) = result {
        warn!("Could not save build output in {}: {}", dir.display(), e);
    }
}

fn append(path: &Path, entry: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(entry.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_files_follow_options() {
        let dir = tempfile::tempdir().unwrap();
        let tree = WorkingTree::new(dir.path());

        set_debug_file(&tree, SELECTION_DEBUG_FILE, true).unwrap();
        assert_eq!(
            std::fs::read_to_string(tree.join(SELECTION_DEBUG_FILE)).unwrap(),
            DEBUG_SETTINGS
        );
        set_debug_file(&tree, SELECTION_DEBUG_FILE, false).unwrap();
        assert!(!tree.join(SELECTION_DEBUG_FILE).exists());
        set_debug_file(&tree, SELECTION_DEBUG_FILE, false).unwrap();
    }

    #[test]
    fn test_append_accumulates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/0_error.log");
        append(&path, "one\n").unwrap();
        append(&path, "two\n").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "one\ntwo\n");
    }

    #[test]
    fn test_remove_stale_handles_files_dirs_and_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("_log_0.tar.gz");
        let sub = dir.path().join("_log_0");
        std::fs::write(&file, "old").unwrap();
        std::fs::create_dir_all(sub.join("v1")).unwrap();

        remove_stale(&file).unwrap();
        remove_stale(&sub).unwrap();
        remove_stale(&dir.path().join("absent")).unwrap();
        assert!(!file.exists());
        assert!(!sub.exists());
    }
}
