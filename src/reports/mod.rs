pub mod coverage;
pub mod failures;
pub mod phases;
pub mod size;
pub mod surefire;

use std::time::Duration;

use tracing::warn;

use crate::checkout::WorkingTree;
use crate::model::MetricsRecord;
use crate::profile::Profile;

/// Run every reader that applies to `profile` against the built tree and
/// assemble one record. Readers never fail the trial: a missing or broken
/// report gives zeros for its fields and a warning.
pub fn harvest(
    tree: &WorkingTree,
    revision: &str,
    profile: Profile,
    elapsed: Duration,
) -> MetricsRecord {
    let size = size::measure(tree.root()).unwrap_or_else(|e| {
        warn!("Could not measure sources in {}: {:#}", tree.root().display(), e);
        size::SourceSize::default()
    });
    let tests = surefire::read_test_counts(&tree.surefire_dir());

    let coverage = profile
        .supports_coverage()
        .then(|| coverage::read_coverage(&tree.join(profile.coverage_dir()), profile.as_str()));
    let phases = profile
        .supports_phase_timing()
        .then(|| phases::read_phase_times(&tree.time_log_dir()));

    MetricsRecord {
        revision: revision.to_string(),
        profile,
        files: size.files,
        loc: size.loc,
        test_classes: tests.classes,
        test_methods: tests.methods,
        time_secs: elapsed.as_secs_f64(),
        coverage,
        phases,
    }
}
