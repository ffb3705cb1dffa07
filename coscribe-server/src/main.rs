//! CoScribe server — real-time collaborative text editing over WebSocket.
//!
//! Serves `/ws/room?room=<id>` (chat relay) and `/ws/document?doc=<id>`
//! (versioned document editing). Documents persist to RocksDB when a data
//! directory is given, otherwise they live in memory.

use std::path::PathBuf;

use clap::Parser;
use log::info;

use coscribe_collab::server::{CollabServer, ServerConfig};

/// Command line arguments. Every flag can also come from the environment.
#[derive(Parser, Debug)]
#[command(name = "coscribe-server")]
#[command(about = "Real-time collaborative text editing server")]
struct Args {
    /// Address to listen on
    #[arg(short, long, env = "COSCRIBE_BIND", default_value = "127.0.0.1:8080")]
    bind: String,

    /// RocksDB directory; in-memory when omitted
    #[arg(short, long, env = "COSCRIBE_DATA_DIR", value_name = "PATH")]
    data_dir: Option<PathBuf>,

    /// Outbound queue capacity per connection
    #[arg(long, env = "COSCRIBE_QUEUE_CAPACITY", default_value_t = 256)]
    queue_capacity: usize,

    /// Room or document id used when a client names none
    #[arg(long, env = "COSCRIBE_DEFAULT_ROOM", default_value = "default")]
    default_room: String,
}

impl From<Args> for ServerConfig {
    fn from(args: Args) -> Self {
        ServerConfig {
            bind_addr: args.bind,
            client_queue_capacity: args.queue_capacity,
            storage_path: args.data_dir,
            default_room: args.default_room,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    info!("Starting CoScribe server");

    let server = CollabServer::new(args.into())?;
    server.run().await
}
