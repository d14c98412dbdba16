//! Flat row tables persisted as CSV: one per (project, profile, repetition),
//! the averaged table per (project, profile), and the cross-profile
//! summaries. The column names are the contract with the plotting scripts.

use std::fmt;
use std::path::Path;

use crate::error::{HarnessError, Result};
use crate::model::MetricsRecord;
use crate::profile::Profile;

pub const VERSION: &str = "Version";
pub const PROFILE: &str = "Profile Choice";
pub const FILES: &str = "#Files";
pub const LOC: &str = "LOC";
pub const CLASSES: &str = "#Class";
pub const METHODS: &str = "#Method";
pub const TIME: &str = "Time";
pub const INSTRUCTION_COVERAGE: &str = "Instruction Coverage";
pub const BRANCH_COVERAGE: &str = "Branch Coverage";
pub const LINE_COVERAGE: &str = "Line Coverage";
pub const TIME_ANALYSIS: &str = "Time/analysis";
pub const TIME_EXECUTION: &str = "Time/execution+collection";
pub const TIME_REPORT: &str = "Time/report";
pub const TIME_COMPILE: &str = "Time/compile";
/// Revision id of a project's newest revision in the overview summary.
pub const HEAD: &str = "Head";

/// Columns holding counts; averaged values are truncated back to integers.
pub const COUNT_COLUMNS: [&str; 4] = [FILES, LOC, CLASSES, METHODS];

/// Columns never averaged or parsed as numbers.
pub const CATEGORICAL_COLUMNS: [&str; 3] = [VERSION, PROFILE, HEAD];

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Text(String),
    Int(u64),
    Float(f64),
}

impl Cell {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Int(v) => Some(*v as f64),
            Cell::Float(v) => Some(*v),
            Cell::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Cell::Text(s) => Some(s),
            _ => None,
        }
    }

    fn parse(raw: &str) -> Cell {
        if let Ok(v) = raw.parse::<u64>() {
            Cell::Int(v)
        } else if let Ok(v) = raw.parse::<f64>() {
            Cell::Float(v)
        } else {
            Cell::Text(raw.to_string())
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Text(s) => write!(f, "{}", escape_field(s)),
            Cell::Int(v) => write!(f, "{v}"),
            // `{:?}` keeps the fractional part, so `5.0` reads back as a float.
            Cell::Float(v) => write!(f, "{v:?}"),
        }
    }
}

/// Quote a field containing a comma, quote or newline.
fn escape_field(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Split one CSV line, honouring quoted fields.
pub(crate) fn split_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if quoted && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => quoted = !quoted,
            ',' if !quoted => fields.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    fields.push(current);
    fields
}

/// The column set a profile's row table carries.
pub fn profile_columns(profile: Profile) -> Vec<String> {
    let mut columns = vec![VERSION, PROFILE, FILES, LOC, CLASSES, METHODS, TIME];
    if profile.supports_coverage() {
        columns.extend([INSTRUCTION_COVERAGE, BRANCH_COVERAGE, LINE_COVERAGE]);
    }
    if profile.supports_phase_timing() {
        columns.extend([TIME_ANALYSIS, TIME_EXECUTION, TIME_REPORT, TIME_COMPILE]);
    }
    columns.into_iter().map(String::from).collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Cell>>,
}

impl Table {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// An empty row table for `profile`.
    pub fn for_profile(profile: Profile) -> Self {
        Self::new(profile_columns(profile))
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn push_row(&mut self, row: Vec<Cell>) -> Result<()> {
        if row.len() != self.columns.len() {
            return Err(HarnessError::Other(format!(
                "row has {} cells, table has {} columns",
                row.len(),
                self.columns.len()
            )));
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn pop_row(&mut self) -> Option<Vec<Cell>> {
        self.rows.pop()
    }

    /// Append a record as a row. Columns the record has no value for are
    /// rejected rather than zero-filled.
    pub fn push_record(&mut self, record: &MetricsRecord) -> Result<()> {
        let mut row = Vec::with_capacity(self.columns.len());
        for column in &self.columns {
            row.push(record_cell(record, column).ok_or_else(|| {
                HarnessError::Other(format!(
                    "{} record for {} has no value for column '{}'",
                    record.profile, record.revision, column
                ))
            })?);
        }
        self.push_row(row)
    }

    pub fn get(&self, row: usize, column: &str) -> Option<&Cell> {
        let col = self.column_index(column)?;
        self.rows.get(row).and_then(|r| r.get(col))
    }

    /// Numeric values of one column, skipping non-numeric cells.
    pub fn numbers(&self, column: &str) -> Vec<f64> {
        match self.column_index(column) {
            Some(col) => self.rows.iter().filter_map(|r| r[col].as_f64()).collect(),
            None => Vec::new(),
        }
    }

    /// Text of one categorical column, e.g. the revision ids.
    pub fn texts(&self, column: &str) -> Vec<String> {
        match self.column_index(column) {
            Some(col) => self.rows.iter().map(|r| r[col].to_string()).collect(),
            None => Vec::new(),
        }
    }

    pub fn to_csv(&self) -> String {
        let mut out = String::new();
        let header: Vec<String> = self.columns.iter().map(|c| escape_field(c)).collect();
        out.push_str(&header.join(","));
        out.push('\n');
        for row in &self.rows {
            let cells: Vec<String> = row.iter().map(ToString::to_string).collect();
            out.push_str(&cells.join(","));
            out.push('\n');
        }
        out
    }

    pub fn parse_csv(content: &str) -> Result<Self> {
        let mut lines = content.lines().filter(|l| !l.is_empty());
        let header = lines
            .next()
            .ok_or_else(|| HarnessError::Other("table has no header row".into()))?;
        let columns = split_line(header);
        let categorical: Vec<bool> = columns
            .iter()
            .map(|c| CATEGORICAL_COLUMNS.contains(&c.as_str()))
            .collect();

        let mut table = Self::new(columns);
        for (n, line) in lines.enumerate() {
            let fields = split_line(line);
            if fields.len() != table.columns.len() {
                return Err(HarnessError::Other(format!(
                    "table row {} has {} fields, expected {}",
                    n + 2,
                    fields.len(),
                    table.columns.len()
                )));
            }
            let row = fields
                .into_iter()
                .zip(&categorical)
                .map(|(f, &text)| if text { Cell::Text(f) } else { Cell::parse(&f) })
                .collect();
            table.rows.push(row);
        }
        Ok(table)
    }

    pub fn read(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse_csv(&content)
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_csv())?;
        Ok(())
    }
}

fn record_cell(record: &MetricsRecord, column: &str) -> Option<Cell> {
    let coverage = record.coverage;
    let phases = record.phases;
    Some(match column {
        VERSION => Cell::Text(record.revision.clone()),
        PROFILE => Cell::Text(record.profile.to_string()),
        FILES => Cell::Int(record.files),
        LOC => Cell::Int(record.loc),
        CLASSES => Cell::Int(record.test_classes),
        METHODS => Cell::Int(record.test_methods),
        TIME => Cell::Float(record.time_secs),
        INSTRUCTION_COVERAGE => Cell::Float(coverage?.instruction),
        BRANCH_COVERAGE => Cell::Float(coverage?.branch),
        LINE_COVERAGE => Cell::Float(coverage?.line),
        TIME_ANALYSIS => Cell::Float(phases?.analysis),
        TIME_EXECUTION => Cell::Float(phases?.execution_collection),
        TIME_REPORT => Cell::Float(phases?.report),
        TIME_COMPILE => Cell::Float(phases?.compile(record.time_secs)),
        _ => return None,
    })
}
