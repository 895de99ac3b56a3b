use std::io::{self, BufRead, Write};
use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use descgen::app::{App, ProgressSinkKind, RunOptions, SubmitPlan, WatchExit};
use descgen::batch::{AnthropicClient, BatchClient, BatchJob, BatchRequest, BatchResult};
use descgen::config::{self, ConfigLoader, ResolvedConfig};
use descgen::error::DescError;
use descgen::output::{JsonOutput, LineOutput, OutputMode, plan_lines};
use descgen::poll::{CancelFlag, PollSchedule, ThreadSleeper};
use descgen::tui::Tui;

#[derive(Parser)]
#[command(name = "descgen")]
#[command(about = "Fill missing brand descriptions through the message batches API")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    non_interactive: bool,

    /// JSON config file (default: ./descgen.json if present)
    #[arg(long, global = true)]
    config: Option<String>,

    /// Directory holding the collections and pipeline files
    #[arg(long, global = true)]
    data_dir: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Scan collections and write request files")]
    Prepare(PrepareArgs),
    #[command(about = "Submit pending chunks to the batch service")]
    Submit(ConfirmArgs),
    #[command(about = "Refresh and show chunk status")]
    Status(StatusArgs),
    #[command(about = "Download results and write descriptions into collections")]
    Merge,
    #[command(about = "prepare, submit, wait, merge")]
    Run(RunArgs),
}

#[derive(Args)]
struct PrepareArgs {
    /// Regenerate the state even if one exists
    #[arg(long)]
    force: bool,
}

#[derive(Args)]
struct ConfirmArgs {
    /// Skip the cost confirmation
    #[arg(long, short)]
    yes: bool,
}

#[derive(Args)]
struct StatusArgs {
    /// Keep polling until every submitted chunk has ended
    #[arg(long)]
    watch: bool,
}

#[derive(Args)]
struct RunArgs {
    #[arg(long, short)]
    yes: bool,

    #[arg(long)]
    force: bool,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<DescError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &DescError) -> u8 {
    if error.is_configuration() {
        2
    } else if error.is_remote() {
        3
    } else {
        1
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };

    let resolved = ConfigLoader::resolve(cli.config.as_deref())
        .map_err(miette::Report::new)?
        .with_data_dir(cli.data_dir.map(Utf8PathBuf::from).as_deref());

    match cli.command {
        Commands::Prepare(args) => {
            // Prepare is local only and must work without credentials.
            let app = App::new(resolved, OfflineClient);
            run_prepare(args, app, output_mode)
        }
        Commands::Submit(args) => run_submit(args, remote_app(resolved)?, output_mode),
        Commands::Status(args) => run_status(args, remote_app(resolved)?, output_mode),
        Commands::Merge => run_merge(remote_app(resolved)?, output_mode),
        Commands::Run(args) => run_pipeline(args, remote_app(resolved)?, output_mode),
    }
}

fn remote_app(resolved: ResolvedConfig) -> miette::Result<App<AnthropicClient>> {
    let api_key = config::load_api_key().map_err(miette::Report::new)?;
    let client =
        AnthropicClient::new(&api_key, &resolved.api_base_url).map_err(miette::Report::new)?;
    Ok(App::new(resolved, client))
}

#[derive(Clone, Copy)]
struct OfflineClient;

impl BatchClient for OfflineClient {
    fn submit(&self, _requests: &[BatchRequest]) -> Result<BatchJob, DescError> {
        Err(DescError::MissingApiKey)
    }

    fn retrieve(&self, _batch_id: &str) -> Result<BatchJob, DescError> {
        Err(DescError::MissingApiKey)
    }

    fn results(&self, _batch_id: &str) -> Result<Vec<BatchResult>, DescError> {
        Err(DescError::MissingApiKey)
    }
}

fn run_prepare<C: BatchClient + Clone + 'static>(
    args: PrepareArgs,
    app: App<C>,
    output_mode: OutputMode,
) -> miette::Result<()> {
    match output_mode {
        OutputMode::NonInteractive => {
            let result = app
                .prepare(args.force, &LineOutput::stderr())
                .map_err(miette::Report::new)?;
            JsonOutput::print_prepare(&result).into_diagnostic()?;
            Ok(())
        }
        OutputMode::Interactive => {
            let mut tui = dashboard(ProgressSinkKind::Prepare, &app, CancelFlag::new());
            let result = tui.run(move |sink| app.prepare(args.force, sink));
            tui.print_log().into_diagnostic()?;
            result.map(|_| ())
        }
    }
}

fn run_submit<C: BatchClient + Clone + 'static>(
    args: ConfirmArgs,
    app: App<C>,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let plan = app.submit_plan().map_err(miette::Report::new)?;
    if plan.pending.is_empty() {
        // Nothing to submit; show where things stand instead.
        return run_status(StatusArgs { watch: false }, app, output_mode);
    }

    match output_mode {
        OutputMode::NonInteractive => {
            if !args.yes && !confirm_on_stdin(&plan).into_diagnostic()? {
                eprintln!("Aborted.");
                return Ok(());
            }
            let result = app
                .submit(&CancelFlag::new(), &LineOutput::stderr())
                .map_err(miette::Report::new)?;
            JsonOutput::print_submit(&result).into_diagnostic()?;
            Ok(())
        }
        OutputMode::Interactive => {
            let cancel = CancelFlag::new();
            let mut tui = dashboard(ProgressSinkKind::Submit, &app, cancel.clone());
            if !args.yes && !tui.confirm_submit(&plan)? {
                println!("Aborted.");
                return Ok(());
            }
            let result = tui.run(move |sink| app.submit(&cancel, sink));
            tui.print_log().into_diagnostic()?;
            result.map(|_| ())
        }
    }
}

fn run_status<C: BatchClient + Clone + 'static>(
    args: StatusArgs,
    app: App<C>,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let schedule = PollSchedule::every(app.config().poll_interval);
    let cancel = CancelFlag::new();
    match output_mode {
        OutputMode::NonInteractive => {
            let sink = LineOutput::stderr();
            if args.watch {
                let result = app
                    .watch(&schedule, &ThreadSleeper, &cancel, &sink)
                    .map_err(miette::Report::new)?;
                JsonOutput::print_watch(&result).into_diagnostic()?;
            } else {
                let result = app.status(&sink).map_err(miette::Report::new)?;
                JsonOutput::print_status(&result).into_diagnostic()?;
            }
            Ok(())
        }
        OutputMode::Interactive => {
            let mut tui = dashboard(ProgressSinkKind::Status, &app, cancel.clone());
            let result = if args.watch {
                tui.run(move |sink| app.watch(&schedule, &ThreadSleeper, &cancel, sink))
                    .map(|_| ())
            } else {
                tui.run(move |sink| app.status(sink)).map(|_| ())
            };
            tui.print_log().into_diagnostic()?;
            result
        }
    }
}

fn run_merge<C: BatchClient + Clone + 'static>(
    app: App<C>,
    output_mode: OutputMode,
) -> miette::Result<()> {
    match output_mode {
        OutputMode::NonInteractive => {
            let result = app
                .merge(&CancelFlag::new(), &LineOutput::stderr())
                .map_err(miette::Report::new)?;
            JsonOutput::print_merge(&result).into_diagnostic()?;
            Ok(())
        }
        OutputMode::Interactive => {
            let cancel = CancelFlag::new();
            let mut tui = dashboard(ProgressSinkKind::Merge, &app, cancel.clone());
            let result = tui.run(move |sink| app.merge(&cancel, sink));
            tui.print_log().into_diagnostic()?;
            result.map(|_| ())
        }
    }
}

fn run_pipeline<C: BatchClient + Clone + 'static>(
    args: RunArgs,
    app: App<C>,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let schedule = PollSchedule::every(app.config().poll_interval);
    let cancel = CancelFlag::new();
    let options = RunOptions { force: args.force };

    match output_mode {
        OutputMode::NonInteractive => {
            let mut confirm = |plan: &SubmitPlan| args.yes || confirm_on_stdin(plan).unwrap_or(false);
            let result = app
                .run(
                    options,
                    &mut confirm,
                    &schedule,
                    &ThreadSleeper,
                    &cancel,
                    &LineOutput::stderr(),
                )
                .map_err(miette::Report::new)?;
            JsonOutput::print_run(&result).into_diagnostic()?;
            Ok(())
        }
        OutputMode::Interactive => {
            let mut tui = dashboard(ProgressSinkKind::Run, &app, cancel.clone());

            // Prepare under the dashboard, then confirm outside of it.
            let prepare_app = app.clone();
            let prepared = tui.run(move |sink| prepare_app.prepare(options.force, sink));
            if let Err(report) = prepared {
                tui.print_log().into_diagnostic()?;
                return Err(report);
            }
            let plan = app.submit_plan().map_err(miette::Report::new)?;
            if !plan.pending.is_empty() && !args.yes && !tui.confirm_submit(&plan)? {
                tui.print_log().into_diagnostic()?;
                println!("Aborted.");
                return Ok(());
            }

            // The state now exists, so the composite reuses it.
            let result = tui.run(move |sink| {
                app.run(
                    RunOptions { force: false },
                    &mut |_: &SubmitPlan| true,
                    &schedule,
                    &ThreadSleeper,
                    &cancel,
                    sink,
                )
            });
            tui.print_log().into_diagnostic()?;
            let result = result?;
            if let Some(watch) = &result.watch {
                if watch.exit == WatchExit::Cancelled {
                    println!("Stopped before all chunks ended; run `descgen run` again to resume.");
                }
            }
            Ok(())
        }
    }
}

fn dashboard<C: BatchClient>(kind: ProgressSinkKind, app: &App<C>, cancel: CancelFlag) -> Tui {
    Tui::new(kind, app.store().clone(), cancel)
}

fn confirm_on_stdin(plan: &SubmitPlan) -> io::Result<bool> {
    let mut stderr = io::stderr();
    for line in plan_lines(plan) {
        writeln!(stderr, "{line}")?;
    }
    write!(stderr, "Submit? [y/N] ")?;
    stderr.flush()?;

    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}
