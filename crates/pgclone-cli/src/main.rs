//! Entry point: parses the command surface described in spec.md §6, installs
//! logging, dispatches to the matching `commands::` module, and maps its
//! result onto the process exit code.

mod cli;
mod commands;

use clap::Parser;
use pgclone_common::logging::{self, LogFormat};

use cli::{Cli, Command, StreamCommand};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init(if cli.log_json { LogFormat::Json } else { LogFormat::Text });

    let code = match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            tracing::error!(%err, "command failed");
            eprintln!("error: {err:#}");
            1
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> anyhow::Result<i32> {
    let dir = cli.dir;
    match cli.command {
        Command::Clone(args) | Command::Fork(args) => commands::clone::run(dir, args).await,
        Command::Follow(args) => commands::follow::run(dir, args).await,
        Command::Snapshot(args) => commands::snapshot::run(args).await,
        Command::Ping(args) => commands::ping::run(args).await,
        Command::Compare { cmd } => match cmd {
            cli::CompareCommand::Schema(args) => commands::compare::schema(args).await,
            cli::CompareCommand::Data(args) => commands::compare::data(args).await,
        },
        Command::List { cmd } => commands::list::run(&dir, cmd).await,
        Command::Stream { cmd } => run_stream(dir, cmd).await,
    }
}

async fn run_stream(dir: std::path::PathBuf, cmd: StreamCommand) -> anyhow::Result<i32> {
    match cmd {
        StreamCommand::Setup(args) => commands::stream::setup(dir, args).await,
        StreamCommand::Cleanup(args) => commands::stream::cleanup(dir, args).await,
        StreamCommand::Prefetch(args) => commands::stream::prefetch(dir, args).await,
        StreamCommand::Catchup(args) => commands::stream::catchup(dir, args).await,
        StreamCommand::Replay(args) => commands::stream::replay(dir, args).await,
        StreamCommand::Receive(args) => commands::stream::receive(dir, args).await,
        StreamCommand::Transform { json, sql } => commands::stream::transform(json, sql).await,
        StreamCommand::Apply(args) => commands::stream::apply(dir, args).await,
        StreamCommand::Sentinel { cmd } => commands::sentinel::run(&dir, cmd).await,
    }
}
