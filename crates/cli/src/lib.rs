pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "slackline",
    about = "Slack <-> workflow host bridge",
    long_about = "Bridge a Slack workspace and a line-oriented workflow host: listen \
                  forwards channel messages to stdout, post delivers host payloads to Slack.",
    after_help = "Examples:\n  slackline listen --channel ops\n  slackline post --channel ops --text \"deploy finished\"\n  slackline doctor --json"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(
        about = "Run the inbound agent: a socket mode session feeding `.OUT` lines to stdout"
    )]
    Listen {
        #[arg(long, value_name = "PATH", help = "Configuration file (default: slackline.toml)")]
        config: Option<std::path::PathBuf>,
        #[arg(long, help = "Channel to pin (name or native id); overrides configuration")]
        channel: Option<String>,
        #[arg(long, help = "Forward thread replies as well as top-level messages")]
        include_replies: bool,
    },
    #[command(
        about = "Run the outbound agent: `.IN` lines from stdin delivered via the Web API"
    )]
    Post {
        #[arg(long, value_name = "PATH", help = "Configuration file (default: slackline.toml)")]
        config: Option<std::path::PathBuf>,
        #[arg(long, help = "Default channel for payloads that name none; overrides configuration")]
        channel: Option<String>,
        #[arg(long, help = "Deliver a single message and exit instead of reading stdin")]
        text: Option<String>,
    },
    #[command(about = "Validate configuration and Slack credential readiness")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
}

pub async fn run() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        // The agent commands own stdout for the host protocol, so their
        // outcome report goes to stderr.
        Command::Listen { config, channel, include_replies } => {
            let result = commands::listen::run(config, channel, include_replies).await;
            eprintln!("{}", result.output);
            ExitCode::from(result.exit_code)
        }
        Command::Post { config, channel, text } => {
            let result = commands::post::run(config, channel, text).await;
            eprintln!("{}", result.output);
            ExitCode::from(result.exit_code)
        }
        Command::Doctor { json } => {
            println!("{}", commands::doctor::run(json).await);
            ExitCode::SUCCESS
        }
        Command::Config => {
            println!("{}", commands::config::run());
            ExitCode::SUCCESS
        }
    }
}
