/// Coverage reader for the JaCoCo-family report a coverage profile emits.
///
/// The primary source is the CSV summary, one row per class:
///   GROUP,PACKAGE,CLASS,INSTRUCTION_MISSED,INSTRUCTION_COVERED,
///   BRANCH_MISSED,BRANCH_COVERED,LINE_MISSED,LINE_COVERED,...
///
/// When the CSV is missing the XML report next to it is used instead, summing
/// the class-level counters:
///   <report name="...">
///     <package name="com/example">
///       <class name="com/example/Foo" sourcefilename="Foo.java">
///         <method name="doStuff" desc="()V" line="10">
///           <counter type="INSTRUCTION" missed="0" covered="5"/>
///         </method>
///         <counter type="INSTRUCTION" missed="2" covered="10"/>
///         <counter type="BRANCH" missed="1" covered="3"/>
///         <counter type="LINE" missed="1" covered="5"/>
///       </class>
///       ...
///
/// Coverage is advisory: an empty or unreadable report gives all-zero
/// percentages and a warning, never a failed trial.
use std::path::Path;

use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use tracing::warn;

use crate::error::{HarnessError, Result};
use crate::model::{percentage, CoverageScores};
use crate::table::split_line;

/// Covered and missed items of one kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counter {
    pub covered: u64,
    pub missed: u64,
}

impl Counter {
    fn add(&mut self, covered: u64, missed: u64) {
        self.covered += covered;
        self.missed += missed;
    }

    #[must_use]
    pub fn percentage(&self) -> f64 {
        percentage(self.covered, self.covered + self.missed)
    }
}

/// Summed counters over every class of a report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoverageTotals {
    pub instruction: Counter,
    pub branch: Counter,
    pub line: Counter,
}

impl CoverageTotals {
    #[must_use]
    pub fn scores(&self) -> CoverageScores {
        CoverageScores {
            instruction: self.instruction.percentage(),
            branch: self.branch.percentage(),
            line: self.line.percentage(),
        }
    }

    fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

const CSV_COLUMNS: [&str; 6] = [
    "INSTRUCTION_MISSED",
    "INSTRUCTION_COVERED",
    "BRANCH_MISSED",
    "BRANCH_COVERED",
    "LINE_MISSED",
    "LINE_COVERED",
];

/// Sum the counter columns of a JaCoCo CSV summary.
pub fn parse_csv(content: &str) -> Result<CoverageTotals> {
    let mut lines = content.lines().filter(|l| !l.trim().is_empty());
    let header = lines
        .next()
        .ok_or_else(|| HarnessError::Other("coverage table is empty".into()))?;
    let names = split_line(header);

    let mut index = [0usize; 6];
    for (slot, column) in index.iter_mut().zip(CSV_COLUMNS) {
        *slot = names
            .iter()
            .position(|n| n.trim() == column)
            .ok_or_else(|| HarnessError::Other(format!("coverage table has no {column} column")))?;
    }

    let mut totals = CoverageTotals::default();
    for (row_number, row) in lines.enumerate() {
        let cells = split_line(row);
        let mut values = [0u64; 6];
        for (value, &col) in values.iter_mut().zip(index.iter()) {
            let cell = cells.get(col).map(|c| c.trim()).unwrap_or("");
            *value = cell.parse().map_err(|_| {
                HarnessError::Other(format!(
                    "coverage table row {}: bad count '{cell}'",
                    row_number + 2
                ))
            })?;
        }
        totals.instruction.add(values[1], values[0]);
        totals.branch.add(values[3], values[2]);
        totals.line.add(values[5], values[4]);
    }

    Ok(totals)
}

fn counter_attr(e: &BytesStart<'_>, name: &[u8]) -> u64 {
    e.attributes()
        .flatten()
        .find(|a| a.key.as_ref() == name)
        .and_then(|a| a.unescape_value().ok().and_then(|v| v.parse().ok()))
        .unwrap_or(0)
}

/// Sum the class-level counters of a JaCoCo XML report.
pub fn parse_xml(input: &[u8]) -> Result<CoverageTotals> {
    let mut reader = Reader::from_reader(input);
    let mut buf = Vec::new();
    let mut totals = CoverageTotals::default();

    // Counters also appear under <method>, <sourcefile>, <package> and
    // <report>; only the ones directly inside <class> are summed.
    let mut in_class = false;
    let mut in_method = false;

    loop {
        let event = reader.read_event_into(&mut buf);
        let is_start_event = matches!(&event, Ok(Event::Start(_)));
        match event {
            Err(e) => {
                return Err(HarnessError::Xml {
                    source: e,
                    position: reader.buffer_position(),
                })
            }
            Ok(Event::Eof) => break,
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e)) => match e.name().as_ref() {
                b"class" if is_start_event => in_class = true,
                b"method" if is_start_event => in_method = true,
                b"counter" if in_class && !in_method => {
                    let covered = counter_attr(e, b"covered");
                    let missed = counter_attr(e, b"missed");
                    let kind = e
                        .attributes()
                        .flatten()
                        .find(|a| a.key.as_ref() == b"type")
                        .map(|a| a.value.into_owned());
                    match kind.as_deref() {
                        Some(b"INSTRUCTION") => totals.instruction.add(covered, missed),
                        Some(b"BRANCH") => totals.branch.add(covered, missed),
                        Some(b"LINE") => totals.line.add(covered, missed),
                        _ => {}
                    }
                }
                _ => {}
            },
            Ok(Event::End(ref e)) => match e.name().as_ref() {
                b"class" => in_class = false,
                b"method" => in_method = false,
                _ => {}
            },
            _ => {}
        }
        buf.clear();
    }

    Ok(totals)
}

/// Read the coverage report under `report_dir` (`<tool>.csv`, falling back
/// to `jacoco.xml`). Never fails: problems give zeros and a warning.
pub fn read_coverage(report_dir: &Path, tool: &str) -> CoverageScores {
    let csv_path = report_dir.join(format!("{tool}.csv"));
    let xml_path = report_dir.join("jacoco.xml");

    let totals = if csv_path.exists() {
        std::fs::read_to_string(&csv_path)
            .map_err(HarnessError::from)
            .and_then(|content| parse_csv(&content))
    } else if xml_path.exists() {
        std::fs::read(&xml_path)
            .map_err(HarnessError::from)
            .and_then(|bytes| parse_xml(&bytes))
    } else {
        Err(HarnessError::Other(format!(
            "no coverage report in {}",
            report_dir.display()
        )))
    };

    match totals {
        Ok(totals) if totals.is_empty() => {
            warn!(
                "The coverage table in {} is empty or contains no counts.",
                report_dir.display()
            );
            CoverageScores::default()
        }
        Ok(totals) => totals.scores(),
        Err(e) => {
            warn!("Could not read coverage scores: {}", e);
            CoverageScores::default()
        }
    }
}
