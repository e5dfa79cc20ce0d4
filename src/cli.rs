use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "authgate", about = "Session-token authentication service", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP server
    Serve {
        /// Port to listen on; overrides AUTHGATE_PORT
        #[arg(short, long)]
        port: Option<u16>,
    },
}
