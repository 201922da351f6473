mod bootstrap;
mod cli;
mod commands;

use std::process::ExitCode;

use clap::Parser;
use cli::{Cli, Command};
use monitor_core::config::MonitorConfig;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("{}error:{} {e:#}", commands::RED, commands::RESET);
            ExitCode::from(1)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<u8> {
    // `config-validate` reports problems itself; everything else needs a
    // loadable config up front.
    if let Command::ConfigValidate = cli.command {
        return commands::config_validate(&cli.config);
    }

    let config = MonitorConfig::load(&cli.config)?;
    let paths = bootstrap::ensure_directories(&cli.root)?;
    bootstrap::setup_logging(&config.security.log_level)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        "ielts-monitor starting"
    );

    match cli.command {
        Command::Start => {
            if let Err(errors) = config.validate() {
                eprintln!("{}configuration invalid:{}", commands::RED, commands::RESET);
                for error in &errors {
                    eprintln!("  {error}");
                }
                return Ok(2);
            }
            commands::start(config, paths).await
        }
        Command::Status { json } => commands::status(&paths, json),
        Command::Logs {
            lines,
            level,
            follow,
        } => commands::logs(&paths, lines, level.as_deref(), follow).await,
        Command::Scan { json } => commands::scan(&config, json).await,
        Command::TelegramTest => commands::telegram_test(&config).await,
        Command::Clear {
            appointments,
            notifications,
            inspection,
            all,
            force,
        } => commands::clear(&paths, appointments, notifications, inspection, all, force),
        Command::ConfigValidate => unreachable!("handled above"),
    }
}
