// Threadloop CLI
//
// Design Decision: Use clap derive for ergonomic argument parsing.
// Design Decision: Support text/json/yaml output formats for scripting.
// Design Decision: Model decisions come from a YAML script so runs are reproducible offline.

mod commands;
mod output;
mod script;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use threadloop_core::FileCheckpointStore;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "threadloop")]
#[command(about = "Threadloop CLI - Run and inspect checkpointed agent threads")]
#[command(version)]
pub struct Cli {
    /// Directory holding thread checkpoint files
    #[arg(long, env = "THREADLOOP_DATA_DIR", default_value = ".threadloop")]
    pub data_dir: PathBuf,

    /// Output format
    #[arg(long, short, default_value = "text", value_parser = ["text", "json", "yaml"])]
    pub output: String,

    /// Suppress non-essential output
    #[arg(long, short)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Send a message to a thread and run it to a final answer
    Run {
        /// Message text to send
        message: String,

        /// Thread ID
        #[arg(long, short)]
        thread: String,

        /// YAML script with scripted model responses and tools
        #[arg(long, short)]
        script: PathBuf,

        /// Event granularity
        #[arg(long, default_value = "steps", value_parser = ["steps", "tokens"])]
        stream: String,
    },

    /// Continue a thread from its latest checkpoint
    Resume {
        /// Thread ID
        #[arg(long, short)]
        thread: String,

        /// YAML script with scripted model responses and tools
        #[arg(long, short)]
        script: PathBuf,

        /// Event granularity
        #[arg(long, default_value = "steps", value_parser = ["steps", "tokens"])]
        stream: String,
    },

    /// Show the message history of a thread
    History {
        /// Thread ID
        #[arg(long, short)]
        thread: String,
    },

    /// List the checkpoints of a thread
    Checkpoints {
        /// Thread ID
        #[arg(long, short)]
        thread: String,
    },

    /// List stored threads
    Threads,

    /// Delete a thread and all its checkpoints
    Delete {
        /// Thread ID
        #[arg(long, short)]
        thread: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let dotenv = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "threadloop=info,threadloop_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Ok(path) = dotenv {
        tracing::debug!("Loaded .env from {:?}", path);
    }

    let cli = Cli::parse();
    let output_format = output::OutputFormat::from_str(&cli.output);
    let store = FileCheckpointStore::new(&cli.data_dir);

    match cli.command {
        Commands::Run {
            message,
            thread,
            script,
            stream,
        } => {
            let run = commands::run::RunArgs {
                thread,
                script,
                mode: commands::run::parse_mode(&stream),
            };
            commands::run::submit(store, run, message, output_format, cli.quiet).await
        }
        Commands::Resume {
            thread,
            script,
            stream,
        } => {
            let run = commands::run::RunArgs {
                thread,
                script,
                mode: commands::run::parse_mode(&stream),
            };
            commands::run::resume(store, run, output_format, cli.quiet).await
        }
        Commands::History { thread } => {
            commands::threads::history(&store, &thread, output_format).await
        }
        Commands::Checkpoints { thread } => {
            commands::threads::checkpoints(&store, &thread, output_format).await
        }
        Commands::Threads => commands::threads::list(&store, output_format).await,
        Commands::Delete { thread } => {
            commands::threads::delete(&store, &thread, output_format, cli.quiet).await
        }
    }
}
