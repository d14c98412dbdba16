//! Uniform in-memory representation of one trial's outcome, independent of
//! the heterogeneous reports it was harvested from. The recorder turns a
//! `MetricsRecord` into a table row; a `TrialFailure` goes to the error log.

use crate::profile::Profile;

/// Compute a coverage percentage, returning 0.0 when the total is zero.
#[must_use]
pub fn percentage(covered: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        100.0 * covered as f64 / total as f64
    }
}

/// Aggregate coverage percentages, each in `[0, 100]`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CoverageScores {
    pub instruction: f64,
    pub branch: f64,
    pub line: f64,
}

/// Build time attributed to the instrumented build's internal phases, in seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PhaseTimes {
    pub analysis: f64,
    pub execution_collection: f64,
    pub report: f64,
}

impl PhaseTimes {
    /// Time not attributed to any phase, taken as compilation.
    #[must_use]
    pub fn compile(&self, total_secs: f64) -> f64 {
        total_secs - (self.analysis + self.execution_collection + self.report)
    }
}

/// The normalized per-trial result row.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsRecord {
    pub revision: String,
    pub profile: Profile,
    pub files: u64,
    pub loc: u64,
    pub test_classes: u64,
    pub test_methods: u64,
    pub time_secs: f64,
    /// Present only for profiles that support coverage.
    pub coverage: Option<CoverageScores>,
    /// Present only for profiles that support phase timing.
    pub phases: Option<PhaseTimes>,
}

/// Trial lifecycle. A failed trial records the state it could not reach.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrialState {
    Pending,
    Configured,
    Built,
    Harvested,
    Recorded,
}

impl TrialState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrialState::Pending => "PENDING",
            TrialState::Configured => "CONFIGURED",
            TrialState::Built => "BUILT",
            TrialState::Harvested => "HARVESTED",
            TrialState::Recorded => "RECORDED",
        }
    }
}

impl std::fmt::Display for TrialState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A trial that ended in `FAILED(at)`.
#[derive(Debug, Clone)]
pub struct TrialFailure {
    pub project: String,
    pub revision: String,
    pub profile: Profile,
    pub at: TrialState,
    pub detail: String,
}

impl std::fmt::Display for TrialFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Error on {} with version {} and coverage choice {} (FAILED({})): \n{}",
            self.project, self.revision, self.profile, self.at, self.detail
        )
    }
}

/// What a revision sequence produced, one entry per trial.
#[derive(Debug, Default)]
pub struct SequenceOutcome {
    pub recorded: Vec<MetricsRecord>,
    pub failed: Vec<TrialFailure>,
}

impl SequenceOutcome {
    #[must_use]
    pub fn trials(&self) -> usize {
        self.recorded.len() + self.failed.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentage() {
        assert_eq!(percentage(0, 0), 0.0);
        assert_eq!(percentage(3, 4), 75.0);
        assert_eq!(percentage(4, 4), 100.0);
    }

    #[test]
    fn test_compile_is_remainder() {
        let phases = PhaseTimes {
            analysis: 1.5,
            execution_collection: 6.0,
            report: 0.5,
        };
        assert!((phases.compile(10.0) - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_failure_display_has_context() {
        let failure = TrialFailure {
            project: "commons-cli".to_string(),
            revision: "abc123".to_string(),
            profile: Profile::Ekstazi,
            at: TrialState::Built,
            detail: "exit status 1".to_string(),
        };
        let text = failure.to_string();
        assert!(text.contains("commons-cli"));
        assert!(text.contains("abc123"));
        assert!(text.contains("ekstazi"));
        assert!(text.contains("FAILED(BUILT)"));
    }
}
