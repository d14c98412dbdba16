//! Build invocation: turn a trial into a Maven command line and run it in
//! the working tree, optionally under a wall-clock limit.

use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use process_control::{ChildExt, Control};
use tracing::{debug, info, warn};

use crate::checkout::WorkingTree;
use crate::error::{HarnessError, Result};
use crate::profile::Profile;

/// Base command when the project does not override it.
pub const DEFAULT_COMMAND: &str = "mvn clean test";

/// Plugins switched off for every trial. They slow builds down or fail them
/// for reasons unrelated to the tests.
pub const SKIP_FLAGS: [&str; 14] = [
    "-Dgpg.skip",
    "-Djacoco.skip",
    "-Dcheckstyle.skip",
    "-Drat.skip",
    "-Denforcer.skip",
    "-Danimal.sniffer.skip",
    "-Dmaven.javadoc.skip",
    "-Dfindbugs.skip",
    "-Dwarbucks.skip",
    "-Dmodernizer.skip",
    "-Dimpsort.skip",
    "-Dpmd.skip",
    "-Dxjc.skip",
    "-Dair.check.skip-all",
];

/// A fully assembled build command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
}

impl Invocation {
    /// The command for one trial: the base command, `-fn` so every module
    /// runs its tests, the skip flags, then `-P <profile id>`.
    pub fn for_trial(base: Option<&str>, profile: Profile) -> Result<Self> {
        let base = base.unwrap_or(DEFAULT_COMMAND);
        let mut words = split_words(base)?.into_iter();
        let program = words
            .next()
            .ok_or_else(|| HarnessError::Config("empty build command".into()))?;

        let mut args: Vec<String> = words.collect();
        args.push("-fn".to_string());
        args.extend(SKIP_FLAGS.iter().map(|f| f.to_string()));
        args.push("-P".to_string());
        args.push(profile.profile_id());

        Ok(Self { program, args })
    }

    pub fn command_line(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

/// Split a command line into words the way a POSIX shell would for plain
/// arguments: whitespace separates words, single and double quotes group
/// them, and a backslash outside single quotes escapes the next character.
/// Expansions and redirections are not interpreted.
fn split_words(line: &str) -> Result<Vec<String>> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut quote: Option<char> = None;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match (quote, c) {
            (Some('\''), '\'') | (Some('"'), '"') => quote = None,
            (Some('\''), _) => current.push(c),
            (_, '\\') => {
                if let Some(next) = chars.next() {
                    current.push(next);
                }
                in_word = true;
            }
            (Some(_), _) => current.push(c),
            (None, '\'' | '"') => {
                quote = Some(c);
                in_word = true;
            }
            (None, c) if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            (None, _) => {
                current.push(c);
                in_word = true;
            }
        }
    }
    if quote.is_some() {
        return Err(HarnessError::Config(format!(
            "unterminated quote in build command '{line}'"
        )));
    }
    if in_word {
        words.push(current);
    }
    Ok(words)
}

/// Captured output of a finished build.
#[derive(Debug, Clone, Default)]
pub struct BuildOutput {
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
}

/// Runs a build in a working tree. A non-zero exit or a timeout is an
/// error carrying whatever output was captured.
pub trait BuildTool {
    fn run(&self, tree: &WorkingTree, invocation: &Invocation) -> Result<BuildOutput>;
}

/// [`BuildTool`] that spawns the command as a child process.
#[derive(Debug, Clone, Default)]
pub struct Maven {
    pub timeout: Option<Duration>,
}

impl Maven {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }
}

impl BuildTool for Maven {
    /// Both streams are drained on reader threads, so a build stopped by the
    /// time limit still reports everything it printed before it was killed.
    fn run(&self, tree: &WorkingTree, invocation: &Invocation) -> Result<BuildOutput> {
        info!("Running: {}", invocation.command_line());
        debug!("Build directory: {}", tree.root().display());

        let started = Instant::now();
        let mut child = Command::new(&invocation.program)
            .args(&invocation.args)
            .current_dir(tree.root())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| HarnessError::Build {
                status: "not started".to_string(),
                detail: format!("cannot run '{}': {e}", invocation.program),
                stdout: String::new(),
                stderr: String::new(),
            })?;
        let streams = StreamReaders::new(&mut child);

        let mut control = child.controlled().terminate_for_timeout();
        if let Some(limit) = self.timeout {
            control = control.time_limit(limit);
        }
        let status = control.wait()?;
        let elapsed = started.elapsed();
        let (stdout, stderr) = streams.join();

        let Some(status) = status else {
            return Err(HarnessError::Build {
                status: "timed out".to_string(),
                detail: format!(
                    "no result after {:.0}s",
                    self.timeout.unwrap_or_default().as_secs_f64()
                ),
                stdout,
                stderr,
            });
        };

        if !status.success() {
            return Err(HarnessError::Build {
                status: status.to_string(),
                detail: format!("'{}' exited unsuccessfully", invocation.command_line()),
                stdout,
                stderr,
            });
        }

        info!("Build finished in {:.2}s", elapsed.as_secs_f64());
        Ok(BuildOutput {
            stdout,
            stderr,
            elapsed,
        })
    }
}

/// Threads collecting a child's redirected output until the pipes close.
struct StreamReaders {
    stdout: JoinHandle<String>,
    stderr: JoinHandle<String>,
}

impl StreamReaders {
    fn new(child: &mut Child) -> Self {
        Self {
            stdout: drain(child.stdout.take()),
            stderr: drain(child.stderr.take()),
        }
    }

    fn join(self) -> (String, String) {
        (
            self.stdout.join().unwrap_or_default(),
            self.stderr.join().unwrap_or_default(),
        )
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            if let Err(e) = pipe.read_to_end(&mut buf) {
                warn!("Lost part of the build output: {}", e);
            }
        }
        String::from_utf8_lossy(&buf).into_owned()
    })
}
