//! Command handler functions for the covtrial CLI.
//!
//! Each `cmd_*` function returns its output as a `String`, making them easy
//! to test without capturing stdout.

use std::fmt::Write;

use anyhow::Result;

use crate::aggregate::{self, ProjectRun};
use crate::build::BuildTool;
use crate::checkout::Vcs;
use crate::compare;
use crate::config::{load_registry, RunOptions, WorkLayout};
use crate::profile::Profile;

fn describe_run(out: &mut String, layout: &WorkLayout, run: &ProjectRun, profile: Profile) {
    writeln!(out, "{} ({}):", run.project, profile).unwrap();
    for (rep, outcome) in run.outcomes.iter().enumerate() {
        writeln!(
            out,
            "  repetition {}: {} recorded, {} failed",
            rep,
            outcome.recorded.len(),
            outcome.failed.len()
        )
        .unwrap();
    }
    match &run.averaged {
        Some(table) => writeln!(
            out,
            "  averaged {} revisions into {}",
            table.len(),
            layout.average_file(&run.project, profile).display()
        )
        .unwrap(),
        None => writeln!(out, "  not averaged: repetitions incomplete").unwrap(),
    }
}

pub fn cmd_run(
    layout: &WorkLayout,
    vcs: &dyn Vcs,
    build: &dyn BuildTool,
    options: &RunOptions,
    project: &str,
    profile: Profile,
) -> Result<String> {
    let run = aggregate::run_project(layout, vcs, build, options, project, profile)?;
    let mut out = String::new();
    describe_run(&mut out, layout, &run, profile);
    Ok(out)
}

pub fn cmd_batch(
    layout: &WorkLayout,
    vcs: &dyn Vcs,
    build: &dyn BuildTool,
    options: &RunOptions,
    profile: Profile,
) -> Result<String> {
    let runs = aggregate::run_batch(layout, vcs, build, options, profile)?;
    if runs.is_empty() {
        return Ok("No projects were run.\n".to_string());
    }
    let mut out = String::new();
    for run in &runs {
        describe_run(&mut out, layout, run, profile);
    }
    Ok(out)
}

/// Average already finished repetitions, for one project or every project
/// in the registry.
pub fn cmd_average(
    layout: &WorkLayout,
    project: Option<&str>,
    profile: Profile,
    repetitions: usize,
) -> Result<String> {
    let names = match project {
        Some(name) => vec![name.to_string()],
        None => load_registry(layout)?.into_iter().map(|p| p.name).collect(),
    };

    let mut out = String::new();
    for name in &names {
        match aggregate::average_project(layout, name, profile, repetitions)? {
            Some(table) => writeln!(
                out,
                "{:<30} {:>5} revisions  {}",
                name,
                table.len(),
                layout.average_file(name, profile).display()
            )
            .unwrap(),
            None => {
                let missing = aggregate::missing_repetitions(layout, name, profile, repetitions);
                writeln!(out, "{:<30} missing repetitions {:?}", name, missing).unwrap()
            }
        }
    }
    Ok(out)
}

pub fn cmd_summarize(layout: &WorkLayout, repetitions: usize) -> Result<String> {
    let written = compare::summarize(layout, repetitions)?;
    let mut out = String::new();
    for path in &written {
        writeln!(out, "Wrote {}", path.display()).unwrap();
    }
    Ok(out)
}
