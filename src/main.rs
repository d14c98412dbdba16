use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use covtrial::build::Maven;
use covtrial::checkout::Git;
use covtrial::cli::{cmd_average, cmd_batch, cmd_run, cmd_summarize};
use covtrial::config::{RunOptions, WorkLayout, DEFAULT_REPETITIONS};
use covtrial::profile::Profile;

/// covtrial — Run coverage and test-selection tools over project histories
/// and collect comparable metrics.
#[derive(Parser)]
#[command(name = "covtrial", version, about)]
struct Cli {
    /// Work directory holding `projects/`, `finerts-shas/`, checkouts and results.
    #[arg(long, global = true, default_value = "_work")]
    work_dir: PathBuf,

    /// Log debug output (RUST_LOG takes precedence).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct RunArgs {
    /// Profile to build with (retestall, ekstazi, ijacoco, bjacoco).
    #[arg(long, default_value = "ijacoco")]
    profile: String,

    /// Number of repetitions.
    #[arg(long, default_value_t = DEFAULT_REPETITIONS)]
    repetitions: usize,

    /// Only run the newest N revisions.
    #[arg(long)]
    max_versions: Option<usize>,

    /// Run exactly these revisions (comma-separated) instead of the project's list.
    #[arg(long, value_delimiter = ',')]
    versions: Vec<String>,

    /// Kill a build that runs longer than this many seconds.
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Turn on the selection tool's debug output.
    #[arg(long)]
    debug_selection: bool,

    /// Turn on the incremental coverage agent's debug output.
    #[arg(long)]
    debug_instrumentation: bool,
}

impl RunArgs {
    fn options(&self) -> RunOptions {
        RunOptions {
            repetitions: self.repetitions,
            max_versions: self.max_versions,
            manual_versions: (!self.versions.is_empty()).then(|| self.versions.clone()),
            build_timeout: self.timeout_secs.map(Duration::from_secs),
            debug_selection: self.debug_selection,
            debug_instrumentation: self.debug_instrumentation,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run all repetitions of one project, then average them.
    Run {
        /// Project name from projects.json.
        project: String,

        #[command(flatten)]
        args: RunArgs,
    },

    /// Run every project in projects.json.
    Batch {
        #[command(flatten)]
        args: RunArgs,
    },

    /// Average finished repetitions without running anything.
    Average {
        /// Project name. If omitted, averages every project.
        project: Option<String>,

        /// Profile whose results to average.
        #[arg(long, default_value = "ijacoco")]
        profile: String,

        /// Number of repetitions that must be present.
        #[arg(long, default_value_t = DEFAULT_REPETITIONS)]
        repetitions: usize,
    },

    /// Write cross-profile summaries into paper_data/.
    Summarize {
        /// Number of repetitions per project and profile.
        #[arg(long, default_value_t = DEFAULT_REPETITIONS)]
        repetitions: usize,
    },
}

fn init_tracing(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let layout = WorkLayout::new(&cli.work_dir);
    let output = match cli.command {
        Commands::Run { project, args } => {
            let profile: Profile = args.profile.parse()?;
            let options = args.options();
            let maven = Maven::new(options.build_timeout);
            cmd_run(&layout, &Git, &maven, &options, &project, profile)?
        }
        Commands::Batch { args } => {
            let profile: Profile = args.profile.parse()?;
            let options = args.options();
            let maven = Maven::new(options.build_timeout);
            cmd_batch(&layout, &Git, &maven, &options, profile)?
        }
        Commands::Average {
            project,
            profile,
            repetitions,
        } => cmd_average(&layout, project.as_deref(), profile.parse()?, repetitions)?,
        Commands::Summarize { repetitions } => cmd_summarize(&layout, repetitions)?,
    };
    print!("{output}");
    Ok(())
}
