use anyhow::{anyhow, Result};
use clap::Parser;
use std::time::Duration;
use tokio::io::AsyncReadExt;

use zipline::auth;
use zipline::cli::{Cli, Command, HostArgs, ReceiveArgs, SearchArgs, SendArgs};
use zipline::client::{self, Received, ReceiveOptions};
use zipline::network::discovery;
use zipline::server::{Payload, SessionConfig, SessionKind, TransferServer};
use zipline::ui;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

    let cli = Cli::parse();
    match cli.command {
        Command::Send(args) => send(args).await,
        Command::Host(args) => host(args).await,
        Command::Receive(args) => receive(args).await,
        Command::Search(args) => search(args).await,
    }
}

async fn send(args: SendArgs) -> Result<()> {
    let payload = if let Some(text) = args.text {
        Payload::Text(text)
    } else if args.stdin {
        let mut buf = String::new();
        tokio::io::stdin().read_to_string(&mut buf).await?;
        Payload::Text(buf)
    } else if let Some(path) = &args.path {
        Payload::from_path(path)?
    } else {
        return Err(anyhow!("send requires a path, --text, or --stdin"));
    };

    let token = auth::generate();
    let mut config = SessionConfig::new(token.clone(), SessionKind::Send(payload.clone()));
    config.interface = args.interface;
    config.port = args.port;
    let server = TransferServer::start(config).await?;

    match &payload {
        Payload::Text(text) => println!("> Serving text ({} bytes)", text.len()),
        Payload::File(path) | Payload::Directory(path) => {
            println!("> Serving '{}'", path.display())
        }
    }
    println!("> Token: {}\n", token);
    println!("On another device, run: zipline receive {}", server.url());

    wait_for_interrupt().await?;
    server.shutdown().await;
    Ok(())
}

async fn host(args: HostArgs) -> Result<()> {
    tokio::fs::create_dir_all(&args.dest).await?;

    let token = auth::generate();
    let mut config = SessionConfig::new(
        token.clone(),
        SessionKind::Host {
            upload_dir: args.dest.clone(),
        },
    );
    config.interface = args.interface;
    config.port = args.port;
    let server = TransferServer::start(config).await?;

    println!("> Hosting uploads to '{}'", args.dest.display());
    println!("> Token: {}\n", token);
    println!("Open this on another device to upload:\n{}", server.url());

    wait_for_interrupt().await?;
    server.shutdown().await;
    Ok(())
}

async fn receive(args: ReceiveArgs) -> Result<()> {
    let bar = ui::transfer_bar();
    let options = ReceiveOptions {
        output: args.output,
        force: args.force,
        progress: Some(ui::observer(&bar)),
    };

    let mut stdout = tokio::io::stdout();
    match client::receive(&args.url, &options, &mut stdout).await? {
        Received::Text => println!(),
        Received::File(path) => {
            bar.finish_and_clear();
            println!("Saved to {}", path.display());
        }
    }
    Ok(())
}

async fn search(args: SearchArgs) -> Result<()> {
    let timeout = Duration::from_secs_f64(args.timeout.max(0.0));
    let records = discovery::browse(timeout).await?;

    if records.is_empty() {
        println!("No zipline hosts found");
        return Ok(());
    }
    println!("Discovered hosts:");
    for record in records {
        println!("- {} [{}] {}", record.instance, record.mode, record.url());
    }
    Ok(())
}

/// Resolve once the user interrupts the process.
async fn wait_for_interrupt() -> Result<()> {
    let (tx, rx) = tokio::sync::oneshot::channel();
    let mut tx = Some(tx);
    ctrlc::set_handler(move || {
        if let Some(tx) = tx.take() {
            let _ = tx.send(());
        }
    })?;
    let _ = rx.await;
    println!();
    Ok(())
}
