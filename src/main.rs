use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    tierback::cli::main().await
}
