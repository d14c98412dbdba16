//! Static experiment configuration: the project registry, per-project
//! overrides and revision lists, plus the on-disk layout of the work
//! directory the harness reads from and writes to.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{HarnessError, Result};
use crate::profile::Profile;

/// Default number of repetitions per project and profile.
pub const DEFAULT_REPETITIONS: usize = 5;

/// An entry of `projects/projects.json`.
#[derive(Debug, Clone, Deserialize)]
pub struct ProjectEntry {
    pub name: String,
    pub url: String,
}

/// A `pom_config` edit: a fragment of the given element type.
#[derive(Debug, Clone, Deserialize)]
pub struct PomEdit {
    #[serde(rename = "type")]
    pub kind: String,
    pub content: String,
}

/// An entry of `projects/projects_config.json`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProjectOverride {
    pub name: String,
    /// Revisions the `pom_config` edit applies to. Absent means all.
    #[serde(default)]
    pub versions: Option<Vec<String>>,
    #[serde(default)]
    pub pom_config: Option<PomEdit>,
    /// File-name suffixes of tests to delete before building.
    #[serde(default)]
    pub exclude_tests: Vec<String>,
    /// Replaces `mvn clean test` as the base build command.
    #[serde(default)]
    pub mvn_command: Option<String>,
}

impl ProjectOverride {
    /// The descriptor edit to apply at `revision`, if any.
    pub fn pom_edit_for(&self, revision: &str) -> Option<&PomEdit> {
        let edit = self.pom_config.as_ref()?;
        match &self.versions {
            Some(versions) if !versions.iter().any(|v| v == revision) => None,
            _ => Some(edit),
        }
    }
}

/// A target codebase with its history. Immutable during a batch.
#[derive(Debug, Clone)]
pub struct Project {
    pub name: String,
    pub url: String,
    /// Revision ids, newest first.
    pub revisions: Vec<String>,
    pub overrides: ProjectOverride,
}

/// Paths under the work directory.
#[derive(Debug, Clone)]
pub struct WorkLayout {
    root: PathBuf,
}

impl WorkLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn projects_file(&self) -> PathBuf {
        self.root.join("projects").join("projects.json")
    }

    pub fn overrides_file(&self) -> PathBuf {
        self.root.join("projects").join("projects_config.json")
    }

    pub fn revisions_file(&self, project: &str) -> PathBuf {
        self.root.join("finerts-shas").join(format!("{project}.json"))
    }

    /// Where a project's working tree is checked out.
    pub fn checkout_dir(&self, project: &str) -> PathBuf {
        self.root.join("_downloads").join(project)
    }

    pub fn data_dir(&self, project: &str, profile: Profile) -> PathBuf {
        self.root
            .join("results")
            .join(project)
            .join(format!("{profile}_data"))
    }

    /// Row table for one repetition.
    pub fn table_file(&self, project: &str, profile: Profile, rep: usize) -> PathBuf {
        self.data_dir(project, profile)
            .join(format!("{rep}_{profile}_data.csv"))
    }

    pub fn error_log(&self, project: &str, profile: Profile, rep: usize) -> PathBuf {
        self.data_dir(project, profile).join(format!("{rep}_error.log"))
    }

    pub fn test_failure_log(&self, project: &str, profile: Profile, rep: usize) -> PathBuf {
        self.data_dir(project, profile)
            .join(format!("{rep}_test_failures.log"))
    }

    /// Uncompressed per-revision report copies for one repetition.
    pub fn archive_dir(&self, project: &str, profile: Profile, rep: usize) -> PathBuf {
        self.data_dir(project, profile).join(format!("_log_{rep}"))
    }

    /// The repetition's terminal artifact.
    pub fn archive_file(&self, project: &str, profile: Profile, rep: usize) -> PathBuf {
        self.data_dir(project, profile)
            .join(format!("_log_{rep}.tar.gz"))
    }

    pub fn average_file(&self, project: &str, profile: Profile) -> PathBuf {
        self.data_dir(project, profile).join("average_data.csv")
    }

    /// Output directory for cross-profile summaries.
    pub fn summary_dir(&self) -> PathBuf {
        self.root.join("paper_data")
    }
}

/// Knobs for one harness invocation.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub repetitions: usize,
    /// Only the newest K revisions.
    pub max_versions: Option<usize>,
    /// Explicit revision list, replacing the registry's.
    pub manual_versions: Option<Vec<String>>,
    /// Kill the build after this long.
    pub build_timeout: Option<Duration>,
    /// Write `.rtsrc` to turn on the selection tool's debug output.
    pub debug_selection: bool,
    /// Write `.ijacocorc` to turn on the incremental agent's debug output.
    pub debug_instrumentation: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            repetitions: DEFAULT_REPETITIONS,
            max_versions: None,
            manual_versions: None,
            build_timeout: None,
            debug_selection: false,
            debug_instrumentation: false,
        }
    }
}

/// Pick the revisions to run: a manual list wins, otherwise the newest
/// `max` of the registry's newest-first list.
pub fn select_revisions(
    revisions: &[String],
    max: Option<usize>,
    manual: Option<&[String]>,
) -> Vec<String> {
    if let Some(manual) = manual {
        return manual.to_vec();
    }
    match max {
        Some(k) => revisions.iter().take(k).cloned().collect(),
        None => revisions.to_vec(),
    }
}

fn load_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        HarnessError::Config(format!("cannot read {}: {e}", path.display()))
    })?;
    Ok(serde_json::from_str(&content)?)
}

/// Every project of the registry, in registry order.
pub fn load_registry(layout: &WorkLayout) -> Result<Vec<ProjectEntry>> {
    load_json(&layout.projects_file())
}

fn load_overrides(layout: &WorkLayout) -> Result<Vec<ProjectOverride>> {
    let path = layout.overrides_file();
    if !path.exists() {
        return Ok(Vec::new());
    }
    load_json(&path)
}

/// Load one project with its revisions and overrides.
pub fn load_project(layout: &WorkLayout, name: &str) -> Result<Project> {
    let entry = load_registry(layout)?
        .into_iter()
        .find(|p| p.name == name)
        .ok_or_else(|| HarnessError::ProjectNotFound(name.to_string()))?;
    let revisions: Vec<String> = load_json(&layout.revisions_file(name))?;
    let overrides = load_overrides(layout)?
        .into_iter()
        .find(|o| o.name == name)
        .unwrap_or_else(|| ProjectOverride {
            name: name.to_string(),
            ..Default::default()
        });

    Ok(Project {
        name: entry.name,
        url: entry.url,
        revisions,
        overrides,
    })
}
