use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use ledger_race::execution::{ChildSpec, isolated};
use ledger_race::{
    AccountId, BalanceStrategyKind, DelayPolicy, ExecutionKind, Report, Runner, StopPolicy,
    StoreConfig, Summary, TouchMode, TrialResult, open_store,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ledger-race")]
#[command(about = "Make lost-update races on a ledger balance observable")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Sequential baseline followed by repeated trials
    Run {
        #[arg(long, value_enum, default_value_t = ExecutionKind::SharedMemory)]
        execution: ExecutionKind,
        #[arg(long, value_enum, default_value_t = BalanceStrategyKind::Naive)]
        balance: BalanceStrategyKind,
        #[command(flatten)]
        workload: WorkloadArgs,
        #[arg(long, value_enum, default_value_t = StopPolicy::Auto)]
        stop: StopPolicy,
        #[arg(long)]
        json: bool,
        #[command(flatten)]
        store: StoreArgs,
    },
    /// Baseline, then threads, then processes, each stopping at the first race
    Demo {
        #[arg(long, value_enum, default_value_t = BalanceStrategyKind::Naive)]
        balance: BalanceStrategyKind,
        #[command(flatten)]
        workload: WorkloadArgs,
        #[command(flatten)]
        store: StoreArgs,
    },
    /// Child-process entry point for isolated-memory trials
    #[command(hide = true)]
    Worker {
        #[arg(long)]
        spec: String,
    },
}

#[derive(Args)]
struct WorkloadArgs {
    #[arg(long, default_value_t = 4)]
    workers: usize,
    #[arg(long, default_value_t = 100)]
    amount: i64,
    #[arg(long, default_value_t = 5)]
    trials: usize,
    /// none, fixed:MS, choice:A,B,.., worker:A,B,.., random, big-random
    #[arg(long, default_value = "random")]
    delay: DelayPolicy,
    #[arg(long, default_value_t = 1)]
    account: u64,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum StoreKind {
    /// Memory, or file for isolated-memory execution
    Auto,
    Memory,
    File,
}

#[derive(Args)]
struct StoreArgs {
    #[arg(long, value_enum, default_value_t = StoreKind::Auto)]
    store: StoreKind,
    /// File store directory; a temporary one is used when unset
    #[arg(long, env = "LEDGER_RACE_STORE_DIR")]
    store_dir: Option<PathBuf>,
    #[arg(long, value_enum, default_value_t = TouchMode::Sync)]
    touch_mode: TouchMode,
    #[arg(long, default_value_t = 1000)]
    lock_attempts: u32,
    #[arg(long, default_value_t = 10)]
    lock_backoff_ms: u64,
}

/// Store directory created for this run, removed on drop.
struct ScratchDir(PathBuf);

impl Drop for ScratchDir {
    fn drop(&mut self) {
        if let Err(err) = std::fs::remove_dir_all(&self.0) {
            tracing::debug!(path = %self.0.display(), error = %err, "failed to remove store directory");
        }
    }
}

impl StoreArgs {
    fn config(&self, execution: ExecutionKind) -> (StoreConfig, Option<ScratchDir>) {
        let use_file = match self.store {
            StoreKind::Auto => execution == ExecutionKind::IsolatedMemory,
            StoreKind::Memory => false,
            StoreKind::File => true,
        };

        let (config, scratch) = if use_file {
            match &self.store_dir {
                Some(dir) => (StoreConfig::file(dir), None),
                None => {
                    let dir = std::env::temp_dir().join(format!("ledger-race-{}", uuid::Uuid::new_v4()));
                    (StoreConfig::file(&dir), Some(ScratchDir(dir)))
                }
            }
        } else {
            (StoreConfig::memory(), None)
        };

        let config = config
            .touch_mode(self.touch_mode)
            .lock_attempts(self.lock_attempts)
            .lock_backoff(Duration::from_millis(self.lock_backoff_ms));
        (config, scratch)
    }
}

async fn compare(
    execution: ExecutionKind,
    balance: BalanceStrategyKind,
    workload: &WorkloadArgs,
    stop: StopPolicy,
    store: &StoreArgs,
) -> Result<Vec<TrialResult>> {
    let (config, _scratch) = store.config(execution);
    let url = config.to_url();
    let store = open_store(config)
        .await
        .with_context(|| format!("Failed to open store '{}'", url))?;

    let runner = Runner::new(store)
        .account(AccountId(workload.account))
        .delay(Arc::new(workload.delay.clone()))
        .stop(stop);

    runner
        .compare(execution, balance, workload.workers, workload.amount, workload.trials)
        .await
        .with_context(|| format!("{} / {} comparison aborted", execution, balance))
}

fn print_results(results: &[TrialResult]) {
    for result in results {
        println!("{}\n", result);
    }
}

fn exit_code(summary: &Summary) -> ExitCode {
    if summary.passed() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

async fn run_worker(spec: &str) -> Result<ExitCode> {
    let spec: ChildSpec = serde_json::from_str(spec).context("Invalid worker spec")?;
    let report = isolated::run_child(spec).await;

    println!("{}", serde_json::to_string(&report).context("Failed to encode worker report")?);
    Ok(if report.outcome.is_ok() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .with_ansi(!matches!(cli.command, Command::Worker { .. }))
        .init();

    match cli.command {
        Command::Run {
            execution,
            balance,
            workload,
            stop,
            json,
            store,
        } => {
            let results = compare(execution, balance, &workload, stop, &store).await?;
            let report = Report::new(results);

            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&report).context("Failed to encode report")?
                );
            } else {
                print_results(&report.results);
                println!("{}", report.summary);
            }
            Ok(exit_code(&report.summary))
        }
        Command::Demo {
            balance,
            workload,
            store,
        } => {
            let mut results = compare(
                ExecutionKind::SharedMemory,
                balance,
                &workload,
                StopPolicy::OnRace,
                &store,
            )
            .await?;
            let processes = compare(
                ExecutionKind::IsolatedMemory,
                balance,
                &workload,
                StopPolicy::OnRace,
                &store,
            )
            .await?;
            results.extend(processes.into_iter().filter(|result| !result.is_baseline()));

            print_results(&results);
            let summary = Summary::from_results(&results);
            println!("{}", summary);
            Ok(exit_code(&summary))
        }
        Command::Worker { spec } => run_worker(&spec).await,
    }
}
