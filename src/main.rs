// Copyright 2026 Cornell University
// released under MIT License

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ColorChoice, Parser};
use clap_verbosity_flag::{Verbosity, WarnLevel};
use log::{error, info};
use thiserror::Error;

use stimulus::backend::BackendKind;
use stimulus::circuit::{Circuit, CircuitError};
use stimulus::config::{load_config, Config, ConfigError};
use stimulus::diagnostic::{DiagnosticHandler, Level};
use stimulus::errors::SessionError;
use stimulus::parser::{parse_script_file, ScriptError};
use stimulus::report::Verdict;
use stimulus::serialize::serialize_report;
use stimulus::session::{run_sessions, Session};

/// Args for the stimulus CLI
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to a circuit description (.json)
    #[arg(short, long, value_name = "CIRCUIT_FILE")]
    circuit: PathBuf,

    /// Path to a stimulus script
    #[arg(short, long, value_name = "SCRIPT_FILE")]
    script: PathBuf,

    /// Backends to replay the script on, e.g. `--backend digital,symbolic`
    #[arg(short, long, value_enum, value_delimiter = ',', default_value = "digital")]
    backend: Vec<BackendKind>,

    /// Path to a configuration file (.toml)
    #[arg(long, value_name = "CONFIG_FILE")]
    config: Option<PathBuf>,

    /// Seed for the values of don't care pokes
    #[arg(long)]
    seed: Option<u64>,

    /// Keep the scratch directory with the generated files
    #[arg(long)]
    keep_artifacts: bool,

    /// Pass in `--color never` to suppress colored error messages.
    #[arg(long, value_name = "COLOR_CHOICE", default_value = "auto")]
    color: ColorChoice,

    /// Users can specify `-v` or `--verbose` to toggle logging
    #[command(flatten)]
    verbosity: Verbosity<WarnLevel>,
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Circuit(#[from] CircuitError),
    #[error(transparent)]
    Script(#[from] ScriptError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("failed to write the report: {0}")]
    Io(#[from] std::io::Error),
}

/// Example:
/// `cargo run -- --circuit tests/counter/counter.json -s tests/counter/counter.stim -b digital,symbolic -v`
fn main() -> ExitCode {
    let cli = Cli::parse();

    // For concision, we disable timestamps in the log
    env_logger::Builder::new()
        .format_timestamp(None)
        .filter_level(cli.verbosity.log_level_filter())
        .init();

    let handler = &mut DiagnosticHandler::new(cli.color);
    match run(&cli, handler) {
        Ok(verdict) => ExitCode::from(verdict.exit_code()),
        Err(e) => {
            error!("{e}");
            ExitCode::from(Verdict::Error.exit_code())
        }
    }
}

fn run(cli: &Cli, handler: &mut DiagnosticHandler) -> Result<Verdict, CliError> {
    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => Config::default(),
    };
    if let Some(seed) = cli.seed {
        config.session.seed = seed;
    }
    config.session.keep_artifacts |= cli.keep_artifacts;

    let circuit = Circuit::load(&cli.circuit)?;
    let mut log = parse_script_file(&circuit, &cli.script, handler)?;
    log.finalize();
    info!("{} action(s) recorded from {}", log.len(), cli.script.display());

    let mut sessions: Vec<Session> = cli
        .backend
        .iter()
        .map(|kind| Session::with_log(&circuit, log.clone(), *kind, &config))
        .collect();
    let reports = run_sessions(&mut sessions);

    let mut stdout = std::io::stdout();
    let mut verdict = Verdict::Pass;
    let mut infrastructure = None;
    for (session, report) in sessions.iter().zip(reports) {
        match report {
            Ok(report) => {
                serialize_report(&mut stdout, &report)?;
                handler.emit_report(session.log(), &report);
                verdict = verdict.max(report.verdict());
            }
            Err(e) => {
                handler.emit_general_message(
                    &format!("{} backend: {e}", session.backend()),
                    Level::Error,
                );
                infrastructure = Some(e);
            }
        }
    }
    match infrastructure {
        Some(e) => Err(e.into()),
        None => Ok(verdict),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    /// Runs the counter script `script` on a digital "simulator" printing `samples`
    fn run_counter(dir: &Path, script: &str, samples: &str) -> Result<Verdict, CliError> {
        let config = dir.join("stimulus.toml");
        std::fs::write(
            &config,
            format!(
                "[session]\nmax_retries = 0\n\n[digital]\nsimulator = \"custom\"\n\
                 commands = [[\"sh\", \"-c\", \"printf '{samples}'\"]]\n"
            ),
        )
        .unwrap();
        let script_file = dir.join("test.stim");
        std::fs::write(&script_file, script).unwrap();
        let cli = Cli::parse_from([
            "stimulus",
            "--circuit",
            "tests/counter/counter.json",
            "--script",
            script_file.to_str().unwrap(),
            "--config",
            config.to_str().unwrap(),
            "--color",
            "never",
        ]);
        let mut handler = DiagnosticHandler::new(ColorChoice::Never).quiet();
        run(&cli, &mut handler)
    }

    #[test]
    fn test_verdicts() {
        let dir = tempfile::tempdir().unwrap();
        let script = "expect out 0\nexpect out 0\n";
        assert_eq!(run_counter(dir.path(), script, "@e0 0\\n@e1 0\\n").unwrap(), Verdict::Pass);
        assert_eq!(run_counter(dir.path(), script, "@e0 1\\n@e1 0\\n").unwrap(), Verdict::Fail);
        // no sample for the second expectation
        let missing = run_counter(dir.path(), script, "@e0 0\\n").unwrap();
        assert_eq!(missing, Verdict::Error);
        assert_eq!(missing.exit_code(), 2);
        // a failure outweighs an undecided expectation
        assert_eq!(run_counter(dir.path(), script, "@e0 1\\n").unwrap(), Verdict::Fail);
    }
}
