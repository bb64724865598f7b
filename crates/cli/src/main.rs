//! toolrelay CLI: the main entry point.
//!
//! Commands:
//! - `serve`: Start the HTTP gateway
//! - `chat`: Chat with a running gateway
//! - `ask`: Run one question in-process
//! - `config`: Print the default config, its path, or validate it

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "toolrelay",
    about = "toolrelay: a tool-using assistant with streamed answers",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway server
    Serve {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Chat with a running gateway
    Chat {
        /// Gateway base URL
        #[arg(long, env = "TOOLRELAY_URL", default_value = "http://127.0.0.1:42618")]
        url: String,

        /// Bearer token
        #[arg(long, env = "TOOLRELAY_TOKEN")]
        token: Option<String>,

        /// Continue this chat instead of creating one
        #[arg(long)]
        chat_id: Option<String>,

        /// Send a single message instead of entering interactive mode
        #[arg(short, long)]
        message: Option<String>,
    },

    /// Ask one question without a gateway
    Ask {
        /// The question
        message: String,
    },

    /// Configuration helpers
    Config {
        #[command(subcommand)]
        action: Option<commands::config_cmd::ConfigAction>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Serve { port } => commands::serve::run(port).await?,
        Commands::Chat {
            url,
            token,
            chat_id,
            message,
        } => commands::chat::run(url, token, chat_id, message).await?,
        Commands::Ask { message } => commands::ask::run(message).await?,
        Commands::Config { action } => commands::config_cmd::run(action)?,
    }

    Ok(())
}
