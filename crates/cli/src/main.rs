use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    slackline_cli::run().await
}
