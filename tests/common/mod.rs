#![allow(dead_code)]

use std::cell::RefCell;
use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use covtrial::build::{BuildOutput, BuildTool, Invocation};
use covtrial::checkout::{Vcs, WorkingTree};
use covtrial::config::WorkLayout;
use covtrial::error::{HarnessError, Result};
use covtrial::profile::Profile;
use tempfile::TempDir;

pub const BASE_POM: &str = "<?xml version=\"1.0\"?>
<project>
  <modelVersion>4.0.0</modelVersion>
</project>
";

/// Seconds every fake build reports.
pub const BUILD_SECS: u64 = 4;

/// Create a work directory with a registry of `projects`, each with the
/// given revision list.
pub fn setup_work(projects: &[(&str, &[&str])]) -> (TempDir, WorkLayout) {
    let dir = tempfile::tempdir().unwrap();
    let layout = WorkLayout::new(dir.path());
    std::fs::create_dir_all(dir.path().join("projects")).unwrap();
    std::fs::create_dir_all(dir.path().join("finerts-shas")).unwrap();

    let registry: Vec<String> = projects
        .iter()
        .map(|(name, _)| format!(r#"{{"name": "{name}", "url": "https://example.com/{name}.git"}}"#))
        .collect();
    std::fs::write(layout.projects_file(), format!("[{}]", registry.join(","))).unwrap();

    for (name, revisions) in projects {
        let list: Vec<String> = revisions.iter().map(|r| format!("\"{r}\"")).collect();
        std::fs::write(layout.revisions_file(name), format!("[{}]", list.join(","))).unwrap();
    }
    (dir, layout)
}

/// A descriptor that stops parsing at the mismatched `</project>`.
pub const MALFORMED_POM: &str = "<project><build></project>";

/// Log sink shared between a test and the subscriber it installs.
#[derive(Clone, Default)]
pub struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl LogCapture {
    /// Run `f` with every event at info level and above written here.
    pub fn during<T>(&self, f: impl FnOnce() -> T) -> T {
        let sink = self.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || sink.clone())
            .with_ansi(false)
            .finish();
        tracing::subscriber::with_default(subscriber, f)
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Version control over a plain directory. Checking out a revision writes
/// a fresh descriptor, one source file and a `REVISION` marker. Revisions in
/// `malformed_revisions` get a descriptor that cannot be parsed.
#[derive(Default)]
pub struct FakeVcs {
    pub unknown_revisions: Vec<String>,
    pub malformed_revisions: Vec<String>,
    pub checkouts: RefCell<Vec<String>>,
    pub cleans: RefCell<usize>,
}

impl FakeVcs {
    pub fn failing(revisions: &[&str]) -> Self {
        Self {
            unknown_revisions: revisions.iter().map(|r| r.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn malformed(revisions: &[&str]) -> Self {
        Self {
            malformed_revisions: revisions.iter().map(|r| r.to_string()).collect(),
            ..Default::default()
        }
    }
}

impl Vcs for FakeVcs {
    fn clone_into(&self, _url: &str, dest: &Path) -> Result<()> {
        std::fs::create_dir_all(dest)?;
        std::fs::write(dest.join("pom.xml"), BASE_POM)?;
        Ok(())
    }

    fn clean(&self, _tree: &WorkingTree) -> Result<()> {
        *self.cleans.borrow_mut() += 1;
        Ok(())
    }

    fn reset(&self, tree: &WorkingTree) -> Result<()> {
        std::fs::write(tree.pom(), BASE_POM)?;
        Ok(())
    }

    fn checkout(&self, tree: &WorkingTree, revision: &str) -> Result<()> {
        if self.unknown_revisions.iter().any(|r| r == revision) {
            return Err(HarnessError::Checkout {
                revision: revision.to_string(),
                detail: "unknown revision".to_string(),
            });
        }
        let pom = if self.malformed_revisions.iter().any(|r| r == revision) {
            MALFORMED_POM
        } else {
            BASE_POM
        };
        std::fs::write(tree.pom(), pom)?;
        std::fs::write(tree.join("REVISION"), revision)?;
        let src = tree.join("src/main/java");
        std::fs::create_dir_all(&src)?;
        std::fs::write(src.join("App.java"), "class App {\n}\n")?;
        self.checkouts.borrow_mut().push(revision.to_string());
        Ok(())
    }
}

/// Build that writes the reports the profile would produce. Revisions in
/// `broken` fail to build; revisions in `flaky` build but print a test
/// failure summary; revisions in `silent` build without writing any
/// surefire reports.
#[derive(Default)]
pub struct FakeBuild {
    pub broken: Vec<String>,
    pub flaky: Vec<String>,
    pub silent: Vec<String>,
    /// Test classes per build; `classes[n]` is used for the n-th build.
    pub classes: Vec<u64>,
    pub invocations: RefCell<Vec<Invocation>>,
}

impl FakeBuild {
    pub fn broken(revisions: &[&str]) -> Self {
        Self {
            broken: revisions.iter().map(|r| r.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn flaky(revisions: &[&str]) -> Self {
        Self {
            flaky: revisions.iter().map(|r| r.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn silent(revisions: &[&str]) -> Self {
        Self {
            silent: revisions.iter().map(|r| r.to_string()).collect(),
            ..Default::default()
        }
    }
}

fn profile_of(invocation: &Invocation) -> Profile {
    let at = invocation.args.iter().position(|a| a == "-P").unwrap();
    let id = &invocation.args[at + 1];
    id.strip_suffix('p').unwrap().parse().unwrap()
}

impl BuildTool for FakeBuild {
    fn run(&self, tree: &WorkingTree, invocation: &Invocation) -> Result<BuildOutput> {
        let build_number = self.invocations.borrow().len();
        self.invocations.borrow_mut().push(invocation.clone());
        let revision = std::fs::read_to_string(tree.join("REVISION"))?;

        if self.broken.contains(&revision) {
            return Err(HarnessError::Build {
                status: "exit status: 1".to_string(),
                detail: "compilation failure".to_string(),
                stdout: "[ERROR] COMPILATION ERROR".to_string(),
                stderr: String::new(),
            });
        }

        let classes = self.classes.get(build_number).copied().unwrap_or(2);
        let surefire = tree.surefire_dir();
        if surefire.exists() {
            std::fs::remove_dir_all(&surefire)?;
        }
        if !self.silent.contains(&revision) {
            std::fs::create_dir_all(&surefire)?;
            for n in 0..classes {
                std::fs::write(
                    surefire.join(format!("TEST-org.demo.T{n}Test.xml")),
                    "<testsuite><testcase name=\"a\"/><testcase name=\"b\"/></testsuite>",
                )?;
            }
        }

        let profile = profile_of(invocation);
        if profile.supports_coverage() {
            let dir = tree.join(profile.coverage_dir());
            std::fs::create_dir_all(&dir)?;
            std::fs::write(
                dir.join(format!("{profile}.csv")),
                "GROUP,PACKAGE,CLASS,INSTRUCTION_MISSED,INSTRUCTION_COVERED,BRANCH_MISSED,BRANCH_COVERED,LINE_MISSED,LINE_COVERED\n\
                 demo,org.demo,App,1,3,1,1,1,4\n",
            )?;
        }
        if profile.supports_phase_timing() {
            let logs = tree.time_log_dir();
            std::fs::create_dir_all(&logs)?;
            std::fs::write(
                logs.join("0.log"),
                "select:beg@0\nselect:end@1000000000\ntest:org.demo.T0Test:beg@1000000000\ntest:org.demo.T0Test:end@3000000000\n",
            )?;
        }
        if profile.keeps_selection_state() {
            std::fs::create_dir_all(tree.selection_dir())?;
            std::fs::write(tree.selection_dir().join("App.clz"), "deps")?;
        }

        let mut stdout = String::from("[INFO] BUILD SUCCESS\n");
        if self.flaky.contains(&revision) {
            stdout = format!("Failed tests:   testA(org.demo.T0Test)\n\n{stdout}");
        }
        Ok(BuildOutput {
            stdout,
            stderr: String::new(),
            elapsed: Duration::from_secs(BUILD_SECS),
        })
    }
}
