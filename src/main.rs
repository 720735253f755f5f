//! meshchat CLI
//!
//! A terminal front end for one chat node: start it, connect it to other
//! nodes and chat.

use clap::Parser;
use mesh_chat::cli;
use mesh_chat::network::Node;

#[derive(Parser)]
#[command(name = "meshchat")]
#[command(version = "0.1.0")]
#[command(about = "Ad-hoc peer-to-peer chat over TCP", long_about = None)]
struct Cli {
    /// Address to listen on (host:port, port 0 picks a free one)
    #[arg(short, long)]
    addr: String,

    /// Name shown to other participants
    #[arg(short, long)]
    user: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let mut node = Node::new(cli.addr, cli.user).on_message(cli::print_message);
    node.start().await?;
    println!("listening on {}", node.addr());

    cli::run(node).await?;
    Ok(())
}
