use std::{
    io::stdout,
    path::{Path, PathBuf},
    process::exit,
};

use anyhow::{Result, bail};
use clap::Parser;
use itertools::Itertools;
use kstring::KString;

use collprof_tools::{
    bandwidth::ZeroTimePolicy,
    bins::{DEFAULT_THRESHOLDS, parse_thresholds, write_all_bins},
    driver::{OnError, ReportConfig, ReportDriver},
    get_terminal_width::get_terminal_width,
    info,
    output_table::terminal::TerminalTableOpts,
    summary::{summarize, write_summary_table},
    utillib::logging::{LogLevelOpt, set_log_level},
};

const PROGRAM_NAME: &str = "collprof";
const PROGRAM_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(clap::Parser, Debug)]
#[command(
    next_line_help = true,
    term_width = get_terminal_width(4),
    bin_name = PROGRAM_NAME,
)]
/// Post-processing of collective profiler dumps
struct Opts {
    #[clap(flatten)]
    log_level: LogLevelOpt,

    /// The subcommand to run. Use `--help` after the sub-command to
    /// get a list of the allowed options there.
    #[clap(subcommand)]
    command: Command,
}

#[derive(clap::Args, Debug)]
struct InputOpts {
    /// The directory holding the count and timing files
    #[clap(long)]
    input_dir: PathBuf,

    /// The directory holding the communicator layout file
    /// (`communicators.txt`); by default the input directory
    #[clap(long)]
    layout_dir: Option<PathBuf>,
}

#[derive(clap::Args, Debug)]
struct ReportConfigOpts {
    /// Path to a config file (.json5, .yml or .hcl) with the report
    /// settings; the options below override its values
    #[clap(long)]
    config: Option<PathBuf>,

    /// The name of the collective operation in the timing file names
    /// (default: alltoallv)
    #[clap(long)]
    operation: Option<String>,

    /// Go on with the next communicator when one fails (the exit code
    /// is still 1 in the end)
    #[clap(long)]
    continue_on_error: bool,

    /// How to treat execution times of zero (fail, ieee)
    #[clap(long)]
    zero_time: Option<ZeroTimePolicy>,

    /// Multiply the counts with the datatype sizes from the count
    /// files
    #[clap(long)]
    scale_by_datatype_size: bool,

    /// Compute the calls of a communicator in parallel
    #[clap(long)]
    parallel: bool,
}

impl ReportConfigOpts {
    fn report_config(self) -> Result<ReportConfig> {
        let ReportConfigOpts {
            config,
            operation,
            continue_on_error,
            zero_time,
            scale_by_datatype_size,
            parallel,
        } = self;
        let mut report_config = if let Some(path) = config {
            ReportConfig::load(&path)?
        } else {
            ReportConfig::default()
        };
        if let Some(operation) = operation {
            report_config.operation = KString::from(operation);
        }
        if continue_on_error {
            report_config.on_error = OnError::Continue;
        }
        if let Some(zero_time) = zero_time {
            report_config.zero_time = zero_time;
        }
        if scale_by_datatype_size {
            report_config.scale_by_datatype_size = true;
        }
        if parallel {
            report_config.parallel = true;
        }
        Ok(report_config)
    }
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Print version
    Version,

    /// Write the per-call bandwidths of every communicator as
    /// `bandwidth-percall-comm<leadRank>.md` into the output
    /// directory
    Bandwidth {
        #[clap(flatten)]
        input: InputOpts,

        /// Where to write the reports
        #[clap(long)]
        output_dir: PathBuf,

        #[clap(flatten)]
        report_config: ReportConfigOpts,
    },

    /// Classify the send counts of every communicator into bins and
    /// write them as `bins.job<jobId>.comm<commId>.rank<leadRank>.md`
    Bins {
        #[clap(flatten)]
        input: InputOpts,

        /// Where to write the bin files
        #[clap(long)]
        output_dir: PathBuf,

        /// Comma-separated list of bin thresholds
        #[clap(long, default_value = DEFAULT_THRESHOLDS)]
        bins: String,
    },

    /// Show the mean bandwidths of every call of every communicator
    Summary {
        #[clap(flatten)]
        input: InputOpts,

        #[clap(flatten)]
        report_config: ReportConfigOpts,

        #[clap(flatten)]
        table_opts: TerminalTableOpts,
    },
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Command::Version => "version",
            Command::Bandwidth { .. } => "bandwidth",
            Command::Bins { .. } => "bins",
            Command::Summary { .. } => "summary",
        }
    }
}

fn check_dir(path: &Path, what: &str) -> Result<()> {
    if !path.is_dir() {
        bail!("{what} directory {path:?} does not exist")
    }
    Ok(())
}

impl InputOpts {
    fn checked(self) -> Result<(PathBuf, PathBuf)> {
        let InputOpts {
            input_dir,
            layout_dir,
        } = self;
        check_dir(&input_dir, "input")?;
        let layout_dir = layout_dir.unwrap_or_else(|| input_dir.clone());
        check_dir(&layout_dir, "layout")?;
        Ok((input_dir, layout_dir))
    }
}

fn run(command: Command) -> Result<()> {
    match command {
        Command::Version => println!("{PROGRAM_NAME} version {PROGRAM_VERSION}"),

        Command::Bandwidth {
            input,
            output_dir,
            report_config,
        } => {
            let (input_dir, layout_dir) = input.checked()?;
            check_dir(&output_dir, "output")?;
            let driver = ReportDriver::new(report_config.report_config()?, input_dir, Some(layout_dir));
            let summary = driver.write_reports(&output_dir, |path| {
                println!("Data successfully saved in {}", path.to_string_lossy());
            })?;
            info!("{} communicators processed", summary.succeeded);
            if !summary.failed.is_empty() {
                bail!("{} communicators failed: {}", summary.failed.len(), summary.failed.iter().join("; "))
            }
        }

        Command::Bins {
            input,
            output_dir,
            bins,
        } => {
            let (input_dir, layout_dir) = input.checked()?;
            check_dir(&output_dir, "output")?;
            let thresholds = parse_thresholds(&bins)?;
            let n = write_all_bins(&input_dir, &layout_dir, &output_dir, &thresholds, |path| {
                println!("Data successfully saved in {}", path.to_string_lossy());
            })?;
            info!("{n} communicators processed");
        }

        Command::Summary {
            input,
            report_config,
            table_opts,
        } => {
            let (input_dir, layout_dir) = input.checked()?;
            let driver = ReportDriver::new(report_config.report_config()?, input_dir, Some(layout_dir));
            let summary = driver.for_each_instance(|bandwidth| {
                println!("# {} (job {})", bandwidth.instance, bandwidth.job_id);
                write_summary_table(&summarize(&bandwidth.calls), table_opts.clone(), stdout())?;
                println!();
                Ok(())
            })?;
            if !summary.failed.is_empty() {
                bail!("{} communicators failed: {}", summary.failed.len(), summary.failed.iter().join("; "))
            }
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let Opts { log_level, command } = Opts::parse();
    set_log_level(log_level.try_into()?);

    let name = command.name();
    if let Err(e) = run(command) {
        println!("ERROR: {name}: {e:#}");
        exit(1);
    }
    Ok(())
}
