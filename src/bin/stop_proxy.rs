//! Ask the proxy process to shut down.

use clap::Parser;

use poolgate_wire::cli::{self, TargetArgs};
use poolgate_wire::protocol::{Command, ShutdownMode};

#[derive(Debug, Parser)]
#[command(name = "stop-proxy", about = "Ask the proxy process to shut down")]
struct Args {
    /// Enable debug logging
    #[arg(short = 'd', long = "debug")]
    debug: bool,

    #[command(flatten)]
    target: TargetArgs,

    /// Shutdown mode: s(mart), f(ast) or i(mmediate)
    mode: String,
}

#[tokio::main]
async fn main() {
    let args: Args = cli::parse_or_exit();
    cli::init_tracing(args.debug);

    match run(&args).await {
        Ok(message) => println!("{message}"),
        Err(e) => cli::fail::<Args>(&e),
    }
}

async fn run(args: &Args) -> poolgate_wire::Result<String> {
    let target = args.target.to_target()?;
    let mode = ShutdownMode::from_flag(&args.mode)?;
    let command = Command::shutdown(mode);

    let response = cli::run_command(&target, command).await?;
    Ok(response
        .message
        .unwrap_or_else(|| format!("{mode} shutdown requested")))
}
