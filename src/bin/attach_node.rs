//! Return a detached backend node to the routing pool.

use clap::Parser;

use poolgate_wire::cli::{self, TargetArgs};
use poolgate_wire::protocol::constants::limits;
use poolgate_wire::protocol::Command;

#[derive(Debug, Parser)]
#[command(
    name = "attach-node",
    about = "Return a detached backend node to the routing pool"
)]
struct Args {
    /// Enable debug logging
    #[arg(short = 'd', long = "debug")]
    debug: bool,

    #[command(flatten)]
    target: TargetArgs,

    /// Backend node id
    node_id: String,
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
    let node_id = cli::parse_int(&args.node_id, "node id")?;
    let command = Command::attach_node(node_id, limits::MAX_BACKENDS)?;

    let response = cli::run_command(&target, command).await?;
    Ok(response
        .message
        .unwrap_or_else(|| format!("node {node_id} attached")))
}
