//! Repeat Aggregator: run N repetitions of a project under one profile and
//! average them into `average_data.csv` once every repetition has finished.

use anyhow::{Context, Result};
use tracing::{error, info, warn};

use crate::build::BuildTool;
use crate::checkout::Vcs;
use crate::config::{load_project, load_registry, Project, RunOptions, WorkLayout};
use crate::error::HarnessError;
use crate::model::SequenceOutcome;
use crate::profile::Profile;
use crate::recorder::Recorder;
use crate::table::{Cell, Table, CATEGORICAL_COLUMNS, COUNT_COLUMNS, PROFILE, VERSION};

/// Repetitions in `0..repetitions` whose archive is missing. An archive is
/// written only when a repetition ran to the end, so its presence is the
/// completion marker.
pub fn missing_repetitions(
    layout: &WorkLayout,
    project: &str,
    profile: Profile,
    repetitions: usize,
) -> Vec<usize> {
    (0..repetitions)
        .filter(|&rep| !layout.archive_file(project, profile, rep).exists())
        .collect()
}

/// Average row tables by revision.
///
/// Rows are grouped by `Version` in first-seen order across the tables.
/// Every other non-categorical column becomes the mean of its values in the
/// group; count columns are truncated back to integers. The profile column
/// is dropped.
pub fn average_tables(tables: &[Table]) -> crate::error::Result<Table> {
    let first = tables
        .first()
        .ok_or_else(|| HarnessError::Other("no tables to average".into()))?;
    if let Some(other) = tables.iter().find(|t| t.columns() != first.columns()) {
        return Err(HarnessError::Other(format!(
            "cannot average tables with different columns: {:?} vs {:?}",
            first.columns(),
            other.columns()
        )));
    }
    let version_col = first
        .column_index(VERSION)
        .ok_or_else(|| HarnessError::Other(format!("table has no '{VERSION}' column")))?;

    let kept: Vec<(usize, &String)> = first
        .columns()
        .iter()
        .enumerate()
        .filter(|(_, name)| name.as_str() != PROFILE)
        .collect();

    // (revision, rows of that revision across every table)
    let mut groups: Vec<(String, Vec<&[Cell]>)> = Vec::new();
    for row in tables.iter().flat_map(|t| t.rows()) {
        let row: &[Cell] = row;
        let revision = row[version_col].to_string();
        match groups.iter_mut().find(|(r, _)| *r == revision) {
            Some((_, rows)) => rows.push(row),
            None => groups.push((revision, vec![row])),
        }
    }

    let mut averaged = Table::new(kept.iter().map(|(_, name)| (*name).clone()).collect());
    for (revision, rows) in &groups {
        let mut out = Vec::with_capacity(kept.len());
        for &(col, name) in &kept {
            if CATEGORICAL_COLUMNS.contains(&name.as_str()) {
                out.push(Cell::Text(if col == version_col {
                    revision.clone()
                } else {
                    rows[0][col].to_string()
                }));
                continue;
            }
            let values: Vec<f64> = rows.iter().filter_map(|r| r[col].as_f64()).collect();
            if values.is_empty() {
                return Err(HarnessError::Other(format!(
                    "no numeric '{name}' values for revision {revision}"
                )));
            }
            let mean = values.iter().sum::<f64>() / values.len() as f64;
            out.push(if COUNT_COLUMNS.contains(&name.as_str()) {
                Cell::Int(mean.trunc() as u64)
            } else {
                Cell::Float(mean)
            });
        }
        averaged.push_row(out)?;
    }
    Ok(averaged)
}

/// Write `average_data.csv` for a project and profile if all repetitions
/// are complete. Returns `None`, after logging each missing repetition,
/// when some are not.
pub fn average_project(
    layout: &WorkLayout,
    project: &str,
    profile: Profile,
    repetitions: usize,
) -> Result<Option<Table>> {
    let missing = missing_repetitions(layout, project, profile, repetitions);
    if !missing.is_empty() {
        for rep in &missing {
            warn!("Missing: ({}, {})", project, rep);
        }
        return Ok(None);
    }

    let tables = (0..repetitions)
        .map(|rep| {
            let path = layout.table_file(project, profile, rep);
            Table::read(&path).with_context(|| format!("failed to read {}", path.display()))
        })
        .collect::<Result<Vec<_>>>()?;
    let averaged = average_tables(&tables)
        .with_context(|| format!("failed to average {project} with {profile}"))?;

    let path = layout.average_file(project, profile);
    averaged
        .write(&path)
        .with_context(|| format!("failed to write {}", path.display()))?;
    info!("Wrote {} ({} revisions)", path.display(), averaged.len());
    Ok(Some(averaged))
}

/// Run repetitions `0..options.repetitions` back to back.
pub fn run_repetitions(
    recorder: &Recorder<'_>,
    project: &Project,
    profile: Profile,
    options: &RunOptions,
) -> Result<Vec<SequenceOutcome>> {
    (0..options.repetitions)
        .map(|rep| {
            recorder
                .run_sequence(project, profile, rep)
                .with_context(|| format!("repetition {rep} of {} failed", project.name))
        })
        .collect()
}

/// Result of running one project in a batch.
#[derive(Debug)]
pub struct ProjectRun {
    pub project: String,
    pub outcomes: Vec<SequenceOutcome>,
    pub averaged: Option<Table>,
}

/// Run and average one project.
pub fn run_project(
    layout: &WorkLayout,
    vcs: &dyn Vcs,
    build: &dyn BuildTool,
    options: &RunOptions,
    name: &str,
    profile: Profile,
) -> Result<ProjectRun> {
    let project = load_project(layout, name)?;
    let recorder = Recorder::new(layout, vcs, build, options);
    let outcomes = run_repetitions(&recorder, &project, profile, options)?;
    let averaged = average_project(layout, name, profile, options.repetitions)?;
    Ok(ProjectRun {
        project: project.name,
        outcomes,
        averaged,
    })
}

/// Run every project of the registry. A project that cannot be run is
/// logged and skipped; the rest still run.
pub fn run_batch(
    layout: &WorkLayout,
    vcs: &dyn Vcs,
    build: &dyn BuildTool,
    options: &RunOptions,
    profile: Profile,
) -> Result<Vec<ProjectRun>> {
    let registry = load_registry(layout).context("failed to load the project registry")?;
    let mut runs = Vec::with_capacity(registry.len());
    for entry in registry {
        match run_project(layout, vcs, build, options, &entry.name, profile) {
            Ok(run) => runs.push(run),
            Err(e) => error!("Skipping {}: {:#}", entry.name, e),
        }
    }
    Ok(runs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{CLASSES, FILES, LOC, METHODS, TIME};

    fn table(rows: &[(&str, u64, f64)]) -> Table {
        let columns = [VERSION, PROFILE, FILES, LOC, CLASSES, METHODS, TIME]
            .map(String::from)
            .to_vec();
        let mut t = Table::new(columns);
        for &(rev, classes, time) in rows {
            t.push_row(vec![
                Cell::Text(rev.into()),
                Cell::Text("retestall".into()),
                Cell::Int(3),
                Cell::Int(100),
                Cell::Int(classes),
                Cell::Int(classes * 2),
                Cell::Float(time),
            ])
            .unwrap();
        }
        t
    }

    #[test]
    fn test_average_truncates_counts() {
        let tables = [
            table(&[("v2", 10, 1.0), ("v1", 4, 2.0)]),
            table(&[("v2", 12, 2.0), ("v1", 4, 2.0)]),
            table(&[("v2", 11, 3.0), ("v1", 5, 2.0)]),
        ];
        let avg = average_tables(&tables).unwrap();
        assert!(avg.column_index(PROFILE).is_none());
        assert_eq!(avg.texts(VERSION), vec!["v2", "v1"]);
        assert_eq!(avg.get(0, CLASSES), Some(&Cell::Int(11)));
        assert_eq!(avg.get(1, CLASSES), Some(&Cell::Int(4)));
        assert_eq!(avg.get(0, TIME), Some(&Cell::Float(2.0)));
    }

    #[test]
    fn test_average_keeps_revisions_missing_from_some_tables() {
        let tables = [table(&[("v2", 2, 1.0), ("v1", 2, 1.0)]), table(&[("v1", 4, 3.0)])];
        let avg = average_tables(&tables).unwrap();
        assert_eq!(avg.texts(VERSION), vec!["v2", "v1"]);
        assert_eq!(avg.get(0, CLASSES), Some(&Cell::Int(2)));
        assert_eq!(avg.get(1, CLASSES), Some(&Cell::Int(3)));
    }

    #[test]
    fn test_average_rejects_mismatched_columns() {
        let other = Table::new(vec![VERSION.to_string(), TIME.to_string()]);
        assert!(average_tables(&[table(&[]), other]).is_err());
        assert!(average_tables(&[]).is_err());
    }

    #[test]
    fn test_incomplete_repetitions_are_not_averaged() {
        let dir = tempfile::tempdir().unwrap();
        let layout = WorkLayout::new(dir.path());
        for rep in [0, 2] {
            let archive = layout.archive_file("demo", Profile::RetestAll, rep);
            std::fs::create_dir_all(archive.parent().unwrap()).unwrap();
            std::fs::write(&archive, "").unwrap();
            table(&[("v1", 1, 1.0)])
                .write(&layout.table_file("demo", Profile::RetestAll, rep))
                .unwrap();
        }

        assert_eq!(
            missing_repetitions(&layout, "demo", Profile::RetestAll, 3),
            vec![1]
        );
        let averaged = average_project(&layout, "demo", Profile::RetestAll, 3).unwrap();
        assert!(averaged.is_none());
        assert!(!layout.average_file("demo", Profile::RetestAll).exists());
    }
}
