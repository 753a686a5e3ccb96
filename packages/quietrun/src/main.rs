use std::io::Write;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use quiet_exec::{ExecError, PtySupport, RunRequest, RunnerKind};

mod cli;
mod config;
mod report;

use cli::Args;
use config::FileConfig;
use report::{Report, SPAWN_FAILURE_CODE};

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.debug);

    match run(&args).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("quietrun: {e:#}");
            ExitCode::from(2)
        }
    }
}

fn init_logging(debug: bool) {
    let default = if debug {
        "quietrun=debug,quiet_exec=debug"
    } else {
        "quietrun=warn,quiet_exec=warn"
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();
}

async fn run(args: &Args) -> Result<u8> {
    let settings = config::resolve(args)?;
    debug!(?settings, "resolved configuration");

    let command = args.command();
    let display = command.display();
    let title = args.title.as_deref().unwrap_or(&display);

    let mut request = RunRequest::new(command)
        .shell(settings.shell)
        .capture(settings.capture);
    request.stdin = args.stdin.clone();

    let support = PtySupport::detect();
    let runner = choose_runner(&settings, support);

    let (exit_code, output) = match quiet_exec::execute(&request, runner, support).await {
        Ok(result) => result.into_parts(),
        Err(e) if e.is_spawn_failure() => {
            debug!(error_code = e.error_code(), "command did not start");
            eprintln!("quietrun: {e}");
            // A command that never started is a setup error, not a test
            // failure, so --allow-failure does not cover it.
            let report = Report {
                title,
                command: &display,
                number: args.number,
                exit_code: SPAWN_FAILURE_CODE,
                output: "",
                allow_failure: false,
            };
            emit(&report, &settings)?;
            return Ok(SPAWN_FAILURE_CODE as u8);
        }
        Err(e) => return Err(run_error(e)),
    };

    let report = Report {
        title,
        command: &display,
        number: args.number,
        exit_code,
        output: &output,
        allow_failure: settings.allow_failure,
    };
    emit(&report, &settings)?;
    Ok(report.process_exit_code())
}

fn choose_runner(settings: &FileConfig, support: PtySupport) -> RunnerKind {
    if !settings.pty {
        return RunnerKind::Pipe;
    }
    if support.is_available() {
        RunnerKind::Pty
    } else {
        warn!("pseudo-terminals are not available here, falling back to pipes");
        RunnerKind::Pipe
    }
}

fn run_error(e: ExecError) -> anyhow::Error {
    let code = e.error_code();
    anyhow::Error::new(e).context(format!("command failed to run ({code})"))
}

fn emit(report: &Report<'_>, settings: &FileConfig) -> Result<()> {
    let text = report.render(settings.format, settings.output);
    let mut stdout = std::io::stdout().lock();
    stdout
        .write_all(text.as_bytes())
        .and_then(|()| stdout.flush())
        .context("failed to write report")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipe_unless_pty_requested() {
        let settings = FileConfig::default();
        assert_eq!(choose_runner(&settings, PtySupport::Available), RunnerKind::Pipe);
    }

    #[test]
    fn pty_falls_back_when_unavailable() {
        let settings = FileConfig {
            pty: true,
            ..Default::default()
        };
        assert_eq!(choose_runner(&settings, PtySupport::Available), RunnerKind::Pty);
        assert_eq!(choose_runner(&settings, PtySupport::Unavailable), RunnerKind::Pipe);
    }
}
