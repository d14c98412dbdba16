/// Test-result reader for surefire's per-class XML summaries.
///
/// Surefire writes one `TEST-<class>.xml` per test class:
///   <testsuite name="org.demo.FooTest" tests="3" failures="0" ...>
///     <properties>...</properties>
///     <testcase name="testA" classname="org.demo.FooTest" time="0.01"/>
///     <testcase name="testB" classname="org.demo.FooTest" time="0.02">
///       <failure message="...">...</failure>
///     </testcase>
///   </testsuite>
///
/// A file contributes one test class when it declares at least one
/// `<testcase>`; the cases summed over all files give the test-method count.
use std::path::Path;

use quick_xml::events::Event;
use quick_xml::reader::Reader;
use tracing::warn;

use crate::error::{HarnessError, Result};

/// Test classes and test methods found in a surefire report directory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TestCounts {
    pub classes: u64,
    pub methods: u64,
}

/// Count `<testcase>` elements in one summary file.
pub fn count_test_cases(input: &[u8]) -> Result<u64> {
    let mut reader = Reader::from_reader(input);
    let mut buf = Vec::new();
    let mut count = 0;

    loop {
        match reader.read_event_into(&mut buf) {
            Err(e) => {
                return Err(HarnessError::Xml {
                    source: e,
                    position: reader.buffer_position(),
                })
            }
            Ok(Event::Eof) => break,
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e))
                if e.local_name().as_ref() == b"testcase" =>
            {
                count += 1;
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(count)
}

/// Scan every `*.xml` file in `dir`. A missing directory yields zeros and a
/// warning; a malformed file is counted as zero, also with a warning.
pub fn read_test_counts(dir: &Path) -> TestCounts {
    let mut counts = TestCounts::default();

    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => {
            warn!("Cannot find the surefire-reports folder at {}", dir.display());
            return counts;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("xml") {
            continue;
        }
        let cases = match std::fs::read(&path)
            .map_err(HarnessError::from)
            .and_then(|bytes| count_test_cases(&bytes))
        {
            Ok(n) => n,
            Err(e) => {
                warn!("Skipping unreadable test report {}: {}", path.display(), e);
                0
            }
        };
        counts.methods += cases;
        if cases > 0 {
            counts.classes += 1;
        }
    }

    counts
}

#[cfg(test)]
mod tests {
    use super::*;

    const SUITE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<testsuite name="org.demo.FooTest" tests="3">
  <properties><property name="java.version" value="11"/></properties>
  <testcase name="a" classname="org.demo.FooTest" time="0.01"/>
  <testcase name="b" classname="org.demo.FooTest" time="0.01">
    <failure message="boom">trace</failure>
  </testcase>
  <testcase name="c" classname="org.demo.FooTest" time="0.01"/>
</testsuite>
"#;

    #[test]
    fn test_count_test_cases() {
        assert_eq!(count_test_cases(SUITE.as_bytes()).unwrap(), 3);
        assert_eq!(count_test_cases(b"<testsuite tests=\"0\"/>").unwrap(), 0);
    }

    #[test]
    fn test_malformed_report_is_error() {
        assert!(count_test_cases(b"<testsuite><testcase></testsuite>").is_err());
    }

    #[test]
    fn test_read_counts_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("TEST-org.demo.FooTest.xml"), SUITE).unwrap();
        std::fs::write(
            dir.path().join("TEST-org.demo.EmptyTest.xml"),
            "<testsuite tests=\"0\"></testsuite>",
        )
        .unwrap();
        std::fs::write(dir.path().join("TEST-org.demo.BrokenTest.xml"), "<testsuite><testcase></testsuite>")
            .unwrap();
        std::fs::write(dir.path().join("org.demo.FooTest.txt"), "Tests run: 3").unwrap();

        let counts = read_test_counts(dir.path());
        assert_eq!(counts, TestCounts { classes: 1, methods: 3 });
    }

    #[test]
    fn test_missing_directory_is_zero() {
        let dir = tempfile::tempdir().unwrap();
        let counts = read_test_counts(&dir.path().join("target/surefire-reports"));
        assert_eq!(counts, TestCounts::default());
    }
}
