mod commands;
mod error;
mod lock;
mod logging;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "filerelay",
    version,
    about = "Checkpointed, multi-stage file relay"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Path to the configuration file
    #[arg(short, long, default_value = "filerelay.yaml", global = true)]
    config: PathBuf,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Commands {
    /// Run every configured pipeline once (default)
    Run {
        /// Print the elapsed wall-clock time
        #[arg(long)]
        measure: bool,
    },
    /// List available providers and their properties
    Providers,
    /// Print the checkpoint contents of every stage
    State,
    /// Print a summary of the assembled pipelines
    Describe,
    /// Validate the configuration without running it
    Check,
    /// Print the version
    Version,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    logging::init(&cli.log_level);

    let command = cli.command.unwrap_or(Commands::Run { measure: false });
    let outcome = match command {
        Commands::Run { measure } => commands::run::execute(&cli.config, measure).await,
        Commands::Providers => {
            commands::providers::execute();
            Ok(())
        }
        Commands::State => commands::state::execute(&cli.config),
        Commands::Describe => commands::describe::execute(&cli.config),
        Commands::Check => commands::check::execute(&cli.config),
        Commands::Version => {
            commands::version::execute();
            Ok(())
        }
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => e.report(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn bare_invocation_defaults_to_run() {
        let cli = Cli::try_parse_from(["filerelay"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.config, PathBuf::from("filerelay.yaml"));
        assert_eq!(cli.log_level, "info");
    }

    #[test]
    fn global_flags_follow_the_subcommand() {
        let cli =
            Cli::try_parse_from(["filerelay", "run", "--measure", "-c", "/etc/relay.yaml"]).unwrap();
        assert_eq!(cli.command, Some(Commands::Run { measure: true }));
        assert_eq!(cli.config, PathBuf::from("/etc/relay.yaml"));
    }

    #[test]
    fn log_level_is_global() {
        let cli = Cli::try_parse_from(["filerelay", "state", "--log-level", "debug"]).unwrap();
        assert_eq!(cli.command, Some(Commands::State));
        assert_eq!(cli.log_level, "debug");
    }
}
