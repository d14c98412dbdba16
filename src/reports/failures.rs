/// Heuristic detection of failing tests in captured build output.
///
/// The rules are marker strings Maven prints before a failure summary. The
/// first rule whose marker appears wins and its excerpt runs from the marker
/// to the end of the output. Failure summaries formatted differently go
/// unnoticed; this is a visibility aid, not a guaranteed detector.

/// Ordered marker rules.
pub const FAILURE_MARKERS: [&str; 4] = [
    "[ERROR] Failures:",
    "Failed tests:",
    "Crashed tests:",
    "Tests in error:",
];

/// The excerpt following the first matching marker, if any.
pub fn find_failure_excerpt(output: &str) -> Option<&str> {
    FAILURE_MARKERS
        .iter()
        .find_map(|marker| output.find(marker))
        .map(|index| &output[index..])
}
