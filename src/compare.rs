//! Cross-profile reductions over finished results: the project overview,
//! per-project averages, selection rate, speed-up, the phase breakdown of
//! the incremental build and the coverage agreement check between the two
//! coverage profiles.
//! Each summary is written as a CSV under `paper_data/`.

use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::config::{load_registry, ProjectEntry, WorkLayout};
use crate::profile::Profile;
use crate::table::{
    Cell, Table, BRANCH_COVERAGE, CLASSES, FILES, HEAD, INSTRUCTION_COVERAGE, LINE_COVERAGE,
    LOC, METHODS, TIME, TIME_ANALYSIS, TIME_EXECUTION, TIME_REPORT, VERSION,
};

/// Mean absolute coverage difference below which two tools count as
/// reporting the same coverage.
pub const EXACT_SAME_THRESHOLD: f64 = 0.1;

fn mean(values: &[f64]) -> Option<f64> {
    (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64)
}

/// Sample standard deviation (n - 1 denominator).
fn sample_std(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values)?;
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    Some(var.sqrt())
}

fn min_max(values: &[f64]) -> (f64, f64) {
    values
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        })
}

/// Share of the full run's test classes that a selecting profile ran,
/// as a percentage.
#[must_use]
pub fn selection_rate(selected_classes: f64, full_classes: f64) -> f64 {
    if full_classes == 0.0 {
        0.0
    } else {
        100.0 * selected_classes / full_classes
    }
}

/// How many times faster the incremental build is than the baseline.
#[must_use]
pub fn speedup(baseline_time: f64, incremental_time: f64) -> Option<f64> {
    (incremental_time > 0.0).then(|| baseline_time / incremental_time)
}

/// One project's size and full-run cost at its newest evaluated revision.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectOverview {
    pub project: String,
    pub url: String,
    /// `None` when the project has no averaged full-run results.
    pub head: Option<String>,
    pub versions: usize,
    pub files: u64,
    pub loc: u64,
    pub test_classes: u64,
    pub test_methods: u64,
    pub time: f64,
}

impl ProjectOverview {
    /// Read the first row of the averaged full-run table. Without one every
    /// figure is zero.
    pub fn new(entry: &ProjectEntry, averaged: Option<&Table>) -> Self {
        let first = |column: &str| {
            averaged
                .and_then(|t| t.get(0, column))
                .and_then(Cell::as_f64)
                .unwrap_or(0.0)
        };
        Self {
            project: entry.name.clone(),
            url: entry.url.clone(),
            head: averaged
                .and_then(|t| t.get(0, VERSION))
                .and_then(Cell::as_text)
                .map(String::from),
            versions: averaged.map_or(0, Table::len),
            files: first(FILES) as u64,
            loc: first(LOC) as u64,
            test_classes: first(CLASSES) as u64,
            test_methods: first(METHODS) as u64,
            time: first(TIME),
        }
    }
}

/// Line-coverage spread of one project under a coverage profile.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoverageSpread {
    pub instruction: f64,
    pub branch: f64,
    pub line: f64,
    pub min_line: f64,
    pub max_line: f64,
}

/// Means over the revisions of one project's averaged table.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectAverages {
    pub project: String,
    pub files: f64,
    pub loc: f64,
    pub classes: f64,
    pub methods: f64,
    pub time: f64,
    pub min_time: f64,
    pub max_time: f64,
    pub total_time: f64,
    pub coverage: Option<CoverageSpread>,
}

/// Summarize an averaged table; `None` when it has no rows.
pub fn project_averages(project: &str, averaged: &Table) -> Option<ProjectAverages> {
    let times = averaged.numbers(TIME);
    let time = mean(&times)?;
    let (min_time, max_time) = min_max(&times);
    let column_mean = |name: &str| mean(&averaged.numbers(name)).unwrap_or(0.0);

    let lines = averaged.numbers(LINE_COVERAGE);
    let coverage = mean(&lines).map(|line| {
        let (min_line, max_line) = min_max(&lines);
        CoverageSpread {
            instruction: column_mean(INSTRUCTION_COVERAGE),
            branch: column_mean(BRANCH_COVERAGE),
            line,
            min_line,
            max_line,
        }
    });

    Some(ProjectAverages {
        project: project.to_string(),
        files: column_mean(FILES),
        loc: column_mean(LOC),
        classes: column_mean(CLASSES),
        methods: column_mean(METHODS),
        time,
        min_time,
        max_time,
        total_time: times.iter().sum(),
        coverage,
    })
}

/// Mean build time of the incremental profile split into its phases.
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseBreakdown {
    pub project: String,
    pub time: f64,
    pub compile: f64,
    pub analysis: f64,
    pub execution_collection: f64,
    pub report: f64,
}

impl PhaseBreakdown {
    pub fn from_table(project: &str, table: &Table) -> Option<Self> {
        let time = mean(&table.numbers(TIME))?;
        let analysis = mean(&table.numbers(TIME_ANALYSIS))?;
        let execution_collection = mean(&table.numbers(TIME_EXECUTION))?;
        let report = mean(&table.numbers(TIME_REPORT))?;
        Some(Self {
            project: project.to_string(),
            time,
            compile: time - (analysis + execution_collection + report),
            analysis,
            execution_collection,
            report,
        })
    }

    /// Each phase as a percentage of the total, in
    /// compile, analysis, execution+collection, report order.
    pub fn percentages(&self) -> [f64; 4] {
        let share = |secs: f64| {
            if self.time == 0.0 {
                0.0
            } else {
                100.0 * secs / self.time
            }
        };
        [
            share(self.compile),
            share(self.analysis),
            share(self.execution_collection),
            share(self.report),
        ]
    }
}

/// Agreement between the incremental and baseline coverage profiles over
/// all repetitions of one project.
#[derive(Debug, Clone, PartialEq)]
pub struct CoverageCheck {
    pub project: String,
    /// Per-revision sample std of baseline line coverage, averaged.
    pub baseline_std: f64,
    pub incremental_mean: f64,
    pub baseline_mean: f64,
    /// Mean over revisions of |incremental mean - baseline mean|.
    pub mean_abs_diff: f64,
    pub exact_same: bool,
    pub within_std: bool,
    /// `baseline_std - |incremental_mean - baseline_mean|`.
    pub std_minus_abs: f64,
}

/// Line coverage per revision across repetition tables, revisions in
/// first-seen order.
fn line_coverage_by_revision(tables: &[Table]) -> Vec<(String, Vec<f64>)> {
    let mut by_revision: Vec<(String, Vec<f64>)> = Vec::new();
    for table in tables {
        for row in 0..table.len() {
            let (Some(revision), Some(line)) = (
                table.get(row, VERSION).map(ToString::to_string),
                table.get(row, LINE_COVERAGE).and_then(Cell::as_f64),
            ) else {
                continue;
            };
            match by_revision.iter_mut().find(|(r, _)| *r == revision) {
                Some((_, values)) => values.push(line),
                None => by_revision.push((revision, vec![line])),
            }
        }
    }
    by_revision
}

/// Compare repetition tables of the incremental and baseline coverage
/// profiles. Revisions are matched by id; a revision missing from either
/// side is left out of the difference. `None` when no revision is shared.
pub fn coverage_check(
    project: &str,
    incremental: &[Table],
    baseline: &[Table],
) -> Option<CoverageCheck> {
    let incremental = line_coverage_by_revision(incremental);
    let baseline = line_coverage_by_revision(baseline);

    let stds: Vec<f64> = baseline.iter().filter_map(|(_, v)| sample_std(v)).collect();
    let baseline_std = mean(&stds).unwrap_or(0.0);

    let mut inc_means = Vec::new();
    let mut base_means = Vec::new();
    let mut diffs = Vec::new();
    for (revision, base_values) in &baseline {
        let Some((_, inc_values)) = incremental.iter().find(|(r, _)| r == revision) else {
            continue;
        };
        let (Some(inc), Some(base)) = (mean(inc_values), mean(base_values)) else {
            continue;
        };
        inc_means.push(inc);
        base_means.push(base);
        diffs.push((inc - base).abs());
    }

    let mean_abs_diff = mean(&diffs)?;
    let incremental_mean = mean(&inc_means)?;
    let baseline_mean = mean(&base_means)?;
    Some(CoverageCheck {
        project: project.to_string(),
        baseline_std,
        incremental_mean,
        baseline_mean,
        mean_abs_diff,
        exact_same: mean_abs_diff < EXACT_SAME_THRESHOLD,
        within_std: mean_abs_diff < baseline_std,
        std_minus_abs: baseline_std - (incremental_mean - baseline_mean).abs(),
    })
}

fn columns(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

/// `<profile>_avg_data.csv`: one row per project with averaged metrics.
/// Selecting profiles get a selection rate against the full run and the
/// incremental profile a speed-up against the baseline.
pub fn averages_table(
    profile: Profile,
    rows: &[ProjectAverages],
    full_run: &[ProjectAverages],
    baseline: &[ProjectAverages],
) -> crate::error::Result<Table> {
    let mut names = vec![
        "Project Name", TIME, "Min Time", "Max Time", "Total Time", FILES, LOC, CLASSES, METHODS,
    ];
    if profile.supports_coverage() {
        names.extend([
            INSTRUCTION_COVERAGE,
            BRANCH_COVERAGE,
            LINE_COVERAGE,
            "Min Line Coverage",
            "Max Line Coverage",
        ]);
    }
    let with_rate = profile.keeps_selection_state();
    if with_rate {
        names.push("Selected Test Rate");
    }
    let with_speedup = profile == Profile::IJacoco;
    if with_speedup {
        names.push("Speedup");
    }

    let find = |set: &[ProjectAverages], project: &str| {
        set.iter().find(|a| a.project == project).cloned()
    };
    let optional = |v: Option<f64>| v.map_or_else(|| Cell::Text(String::new()), Cell::Float);

    let mut table = Table::new(columns(&names));
    for avg in rows {
        let mut row = vec![
            Cell::Text(avg.project.clone()),
            Cell::Float(avg.time),
            Cell::Float(avg.min_time),
            Cell::Float(avg.max_time),
            Cell::Float(avg.total_time),
            Cell::Float(avg.files),
            Cell::Float(avg.loc),
            Cell::Float(avg.classes),
            Cell::Float(avg.methods),
        ];
        if profile.supports_coverage() {
            let cov = avg.coverage;
            row.extend([
                optional(cov.map(|c| c.instruction)),
                optional(cov.map(|c| c.branch)),
                optional(cov.map(|c| c.line)),
                optional(cov.map(|c| c.min_line)),
                optional(cov.map(|c| c.max_line)),
            ]);
        }
        if with_rate {
            let rate = find(full_run, &avg.project).map(|f| selection_rate(avg.classes, f.classes));
            row.push(optional(rate));
        }
        if with_speedup {
            let ratio = find(baseline, &avg.project).and_then(|b| speedup(b.time, avg.time));
            row.push(optional(ratio));
        }
        table.push_row(row)?;
    }
    Ok(table)
}

pub fn projects_table(rows: &[ProjectOverview]) -> crate::error::Result<Table> {
    let mut table = Table::new(columns(&[
        "Project Name",
        "URL",
        HEAD,
        "#Ver",
        FILES,
        LOC,
        CLASSES,
        METHODS,
        TIME,
    ]));
    for p in rows {
        table.push_row(vec![
            Cell::Text(p.project.clone()),
            Cell::Text(p.url.clone()),
            Cell::Text(p.head.clone().unwrap_or_default()),
            Cell::Int(p.versions as u64),
            Cell::Int(p.files),
            Cell::Int(p.loc),
            Cell::Int(p.test_classes),
            Cell::Int(p.test_methods),
            Cell::Float(p.time),
        ])?;
    }
    Ok(table)
}

pub fn phase_table(rows: &[PhaseBreakdown]) -> crate::error::Result<Table> {
    let mut table = Table::new(columns(&[
        "Project",
        TIME,
        "Time/compile",
        TIME_ANALYSIS,
        TIME_EXECUTION,
        TIME_REPORT,
        "Percentage/compile",
        "Percentage/analysis",
        "Percentage/execution+collection",
        "Percentage/report",
    ]));
    for p in rows {
        let mut row = vec![
            Cell::Text(p.project.clone()),
            Cell::Float(p.time),
            Cell::Float(p.compile),
            Cell::Float(p.analysis),
            Cell::Float(p.execution_collection),
            Cell::Float(p.report),
        ];
        row.extend(p.percentages().map(Cell::Float));
        table.push_row(row)?;
    }
    Ok(table)
}

pub fn coverage_check_table(rows: &[CoverageCheck]) -> crate::error::Result<Table> {
    let mut table = Table::new(columns(&[
        "Project",
        "bJaCoCo STD",
        "iJaCoCo Coverage Mean",
        "bJaCoCo Coverage Mean",
        "|iJaCoCo Mean - bJaCoCo Mean|",
        "Exact Same",
        "Within STD",
        "Diff(STD - ABS)",
    ]));
    for c in rows {
        table.push_row(vec![
            Cell::Text(c.project.clone()),
            Cell::Float(c.baseline_std),
            Cell::Float(c.incremental_mean),
            Cell::Float(c.baseline_mean),
            Cell::Float(c.mean_abs_diff),
            Cell::Text(c.exact_same.to_string()),
            Cell::Text(c.within_std.to_string()),
            Cell::Float(c.std_minus_abs),
        ])?;
    }
    Ok(table)
}

fn read_if_exists(path: &std::path::Path) -> Result<Option<Table>> {
    if !path.exists() {
        return Ok(None);
    }
    Table::read(path)
        .map(Some)
        .with_context(|| format!("failed to read {}", path.display()))
}

/// Read all repetition tables of a project and profile, or `None` if any
/// is missing.
fn read_repetitions(
    layout: &WorkLayout,
    project: &str,
    profile: Profile,
    repetitions: usize,
) -> Result<Option<Vec<Table>>> {
    let mut tables = Vec::with_capacity(repetitions);
    for rep in 0..repetitions {
        match read_if_exists(&layout.table_file(project, profile, rep))? {
            Some(table) => tables.push(table),
            None => return Ok(None),
        }
    }
    Ok(Some(tables))
}

/// Compute every summary for the registry's projects and write them under
/// `paper_data/`. Projects without results for a profile are left out of
/// that profile's summary. Returns the files written.
pub fn summarize(layout: &WorkLayout, repetitions: usize) -> Result<Vec<PathBuf>> {
    let registry = load_registry(layout).context("failed to load the project registry")?;
    let out_dir = layout.summary_dir();
    let mut written = Vec::new();

    let mut overviews = Vec::with_capacity(registry.len());
    for entry in &registry {
        let full_run = read_if_exists(&layout.average_file(&entry.name, Profile::RetestAll))?;
        if full_run.is_none() {
            info!("No averaged full-run results for {}", entry.name);
        }
        overviews.push(ProjectOverview::new(entry, full_run.as_ref()));
    }

    let mut per_profile: Vec<(Profile, Vec<ProjectAverages>)> = Vec::new();
    let mut phases = Vec::new();
    let mut checks = Vec::new();

    for profile in Profile::ALL {
        let mut rows = Vec::new();
        for entry in &registry {
            let Some(averaged) = read_if_exists(&layout.average_file(&entry.name, profile))? else {
                continue;
            };
            match project_averages(&entry.name, &averaged) {
                Some(avg) => rows.push(avg),
                None => warn!("{} has no averaged {} rows", entry.name, profile),
            }
            if profile.supports_phase_timing() {
                phases.extend(PhaseBreakdown::from_table(&entry.name, &averaged));
            }
        }
        per_profile.push((profile, rows));
    }

    for entry in &registry {
        let incremental = read_repetitions(layout, &entry.name, Profile::IJacoco, repetitions)?;
        let baseline = read_repetitions(layout, &entry.name, Profile::BJacoco, repetitions)?;
        match (incremental, baseline) {
            (Some(inc), Some(base)) => checks.extend(coverage_check(&entry.name, &inc, &base)),
            _ => info!("No complete coverage runs for {}, skipping check", entry.name),
        }
    }

    let rows_of = |profile: Profile| {
        per_profile
            .iter()
            .find(|(p, _)| *p == profile)
            .map(|(_, rows)| rows.as_slice())
            .unwrap_or_default()
    };
    let full_run = rows_of(Profile::RetestAll);
    let baseline = rows_of(Profile::BJacoco);

    let path = out_dir.join("projects_data.csv");
    projects_table(&overviews)?.write(&path)?;
    written.push(path);

    for (profile, rows) in &per_profile {
        let path = out_dir.join(format!("{profile}_avg_data.csv"));
        averages_table(*profile, rows, full_run, baseline)?.write(&path)?;
        written.push(path);
    }

    let path = out_dir.join("phase_data.csv");
    phase_table(&phases)?.write(&path)?;
    written.push(path);

    let path = out_dir.join("coverage_check.csv");
    coverage_check_table(&checks)?.write(&path)?;
    written.push(path);

    for path in &written {
        info!("Wrote {}", path.display());
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::PROFILE;

    fn coverage_table(rows: &[(&str, f64)]) -> Table {
        let mut t = Table::new(columns(&[VERSION, PROFILE, LINE_COVERAGE]));
        for &(rev, line) in rows {
            t.push_row(vec![
                Cell::Text(rev.into()),
                Cell::Text("bjacoco".into()),
                Cell::Float(line),
            ])
            .unwrap();
        }
        t
    }

    #[test]
    fn test_project_overview_reads_newest_revision() {
        let entry = ProjectEntry {
            name: "demo".into(),
            url: "https://example.com/demo.git".into(),
        };
        let mut averaged = Table::new(columns(&[VERSION, FILES, LOC, CLASSES, METHODS, TIME]));
        for (rev, classes, time) in [("v2", 7, 30.5), ("v1", 6, 28.0)] {
            averaged
                .push_row(vec![
                    Cell::Text(rev.into()),
                    Cell::Int(40),
                    Cell::Int(3000),
                    Cell::Int(classes),
                    Cell::Int(classes * 5),
                    Cell::Float(time),
                ])
                .unwrap();
        }

        let overview = ProjectOverview::new(&entry, Some(&averaged));
        assert_eq!(overview.head.as_deref(), Some("v2"));
        assert_eq!(overview.versions, 2);
        assert_eq!((overview.test_classes, overview.test_methods), (7, 35));
        assert_eq!(overview.time, 30.5);

        let empty = ProjectOverview::new(&entry, None);
        assert_eq!(empty.head, None);
        assert_eq!((empty.versions, empty.files, empty.time), (0, 0, 0.0));

        let table = projects_table(&[overview, empty]).unwrap();
        let parsed = Table::parse_csv(&table.to_csv()).unwrap();
        assert_eq!(parsed.get(0, HEAD), Some(&Cell::Text("v2".into())));
        assert_eq!(parsed.get(1, HEAD), Some(&Cell::Text(String::new())));
        assert_eq!(parsed.get(0, "#Ver"), Some(&Cell::Int(2)));
        assert_eq!(parsed.get(1, TIME), Some(&Cell::Float(0.0)));
    }

    #[test]
    fn test_selection_rate() {
        assert_eq!(selection_rate(12.0, 50.0), 24.0);
        assert_eq!(selection_rate(3.0, 0.0), 0.0);
    }

    #[test]
    fn test_speedup() {
        assert_eq!(speedup(30.0, 10.0), Some(3.0));
        assert_eq!(speedup(30.0, 0.0), None);
    }

    #[test]
    fn test_sample_std() {
        assert_eq!(sample_std(&[1.0]), None);
        let std = sample_std(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]).unwrap();
        assert!((std - 2.138089935).abs() < 1e-6);
    }

    #[test]
    fn test_coverage_check_aligns_by_revision() {
        let baseline = [
            coverage_table(&[("v2", 80.0), ("v1", 70.0)]),
            coverage_table(&[("v2", 82.0), ("v1", 70.0)]),
        ];
        // Revision order differs and v3 exists only on the incremental side.
        let incremental = [
            coverage_table(&[("v1", 70.0), ("v2", 81.0), ("v3", 10.0)]),
            coverage_table(&[("v1", 70.0), ("v2", 81.0)]),
        ];

        let check = coverage_check("demo", &incremental, &baseline).unwrap();
        assert!(check.mean_abs_diff.abs() < 1e-9);
        assert!(check.exact_same);
        // std of [80, 82] is sqrt(2); std of [70, 70] is 0.
        assert!((check.baseline_std - 2f64.sqrt() / 2.0).abs() < 1e-9);
        assert!(check.within_std);
        assert!((check.incremental_mean - 75.5).abs() < 1e-9);
    }

    #[test]
    fn test_coverage_check_flags_disagreement() {
        let baseline = [coverage_table(&[("v1", 80.0)]), coverage_table(&[("v1", 80.0)])];
        let incremental = [coverage_table(&[("v1", 79.0)]), coverage_table(&[("v1", 79.0)])];
        let check = coverage_check("demo", &incremental, &baseline).unwrap();
        assert!(!check.exact_same);
        assert!(!check.within_std);
        assert!((check.std_minus_abs + 1.0).abs() < 1e-9);

        assert!(coverage_check("demo", &incremental, &[coverage_table(&[("v9", 1.0)])]).is_none());
    }

    #[test]
    fn test_phase_breakdown() {
        let mut table = Table::new(columns(&[
            VERSION,
            TIME,
            TIME_ANALYSIS,
            TIME_EXECUTION,
            TIME_REPORT,
        ]));
        for (rev, time) in [("v2", 10.0), ("v1", 30.0)] {
            table
                .push_row(vec![
                    Cell::Text(rev.into()),
                    Cell::Float(time),
                    Cell::Float(2.0),
                    Cell::Float(10.0),
                    Cell::Float(1.0),
                ])
                .unwrap();
        }
        let phases = PhaseBreakdown::from_table("demo", &table).unwrap();
        assert!((phases.compile - 7.0).abs() < 1e-9);
        let pct = phases.percentages();
        assert!((pct.iter().sum::<f64>() - 100.0).abs() < 1e-9);
        assert!((pct[2] - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_averages_table_adds_rate_and_speedup() {
        let avg = |project: &str, classes: f64, time: f64| ProjectAverages {
            project: project.to_string(),
            files: 1.0,
            loc: 10.0,
            classes,
            methods: 2.0 * classes,
            time,
            min_time: time,
            max_time: time,
            total_time: time,
            coverage: None,
        };
        let full = [avg("demo", 50.0, 40.0)];
        let base = [avg("demo", 50.0, 30.0)];
        let inc = [avg("demo", 12.0, 10.0), avg("orphan", 1.0, 1.0)];

        let table = averages_table(Profile::IJacoco, &inc, &full, &base).unwrap();
        assert_eq!(table.get(0, "Selected Test Rate"), Some(&Cell::Float(24.0)));
        assert_eq!(table.get(0, "Speedup"), Some(&Cell::Float(3.0)));
        assert_eq!(table.get(1, "Speedup"), Some(&Cell::Text(String::new())));

        let plain = averages_table(Profile::RetestAll, &full, &full, &base).unwrap();
        assert!(plain.column_index("Selected Test Rate").is_none());
    }
}
