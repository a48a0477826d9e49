//! CLI entrypoint for the rtsan scenario harness.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use rtsan_harness::structured_log::{LogEmitter, LogLevel};
use rtsan_harness::{
    HarnessError, ScenarioRun, ScenarioRunner, find_scenario, scenarios, summary_level,
};

/// Scenario tooling for the rtsan runtime.
#[derive(Debug, Parser)]
#[command(name = "rtsan-harness")]
#[command(about = "Scenario harness for the rtsan real-time safety runtime")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List the scenario catalog.
    List,
    /// Run scenarios in child processes and check their outcome.
    Run {
        /// Run only this scenario (default: all).
        #[arg(long)]
        scenario: Option<String>,
        /// JSONL log output path (if omitted, prints to stdout).
        #[arg(long)]
        log: Option<PathBuf>,
        /// Run identifier used as the trace id prefix.
        #[arg(long, default_value = "local")]
        run_id: String,
    },
    /// Execute one scenario in this process (used by `run`).
    #[command(hide = true)]
    Exec {
        #[arg(long)]
        scenario: String,
        /// Run the body without initializing the runtime first.
        #[arg(long)]
        skip_init: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match dispatch(cli.command) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("rtsan-harness: {err}");
            ExitCode::from(2)
        }
    }
}

fn dispatch(command: Command) -> Result<ExitCode, HarnessError> {
    match command {
        Command::List => {
            for s in scenarios() {
                let expect = if s.expected.reports_violation {
                    format!("violation, exit {}", s.expected.exit_code)
                } else {
                    "clean".to_string()
                };
                println!("{:<24} {:<20} [{expect}] {}", s.name, s.symbol, s.description);
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Run {
            scenario,
            log,
            run_id,
        } => {
            let selected = match scenario {
                Some(name) => vec![
                    find_scenario(&name).ok_or(HarnessError::UnknownScenario(name))?,
                ],
                None => scenarios().iter().collect(),
            };
            let runs = ScenarioRunner::current()?.run_all(selected)?;
            match log {
                Some(path) => write_log(LogEmitter::to_file(&path, &run_id)?, &runs)?,
                None => write_log(LogEmitter::to_stdout(&run_id), &runs)?,
            }

            let failed = runs.iter().filter(|r| !r.passed()).count();
            eprintln!(
                "rtsan-harness: {} scenario(s), {} passed, {failed} failed",
                runs.len(),
                runs.len() - failed
            );
            Ok(if failed == 0 {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Command::Exec {
            scenario,
            skip_init,
        } => {
            let s = find_scenario(&scenario).ok_or(HarnessError::UnknownScenario(scenario))?;
            if skip_init {
                s.execute_uninitialized();
            } else {
                s.execute();
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn write_log<W: std::io::Write>(
    mut emitter: LogEmitter<W>,
    runs: &[ScenarioRun],
) -> Result<(), HarnessError> {
    emitter.emit(LogLevel::Info, "run_start")?;
    for run in runs {
        emitter.emit_entry(run.to_log_entry())?;
    }
    emitter.emit(summary_level(runs), "run_end")?;
    emitter.flush()?;
    Ok(())
}
