//! Line-based console for a local interpreter.
//!
//! Run with: cargo run -p hostlink-console -- [settings.toml]
//!
//! Each line read from stdin is sent to the interpreter as the response to a
//! visible interaction. Ctrl-C interrupts the pending request.

use std::{io::Write, path::PathBuf};

use anyhow::Context;
use hostlink_broker::ConnectorBuilder;
use hostlink_core::{HostError, HostSettings, OutputKind, SessionEvent, StartupInfo};
use hostlink_session::{Session, SessionOptions};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let settings = match std::env::args_os().nth(1) {
        Some(path) => HostSettings::load_from_path(&path)
            .with_context(|| format!("loading {}", PathBuf::from(&path).display()))?,
        None => HostSettings::default(),
    };

    let connector = ConnectorBuilder::from_settings(&settings).build()?;
    let session = Session::with_options(1, connector, SessionOptions::from_settings(&settings));
    session.events().register_fn(print_event);

    let working_dir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let startup = StartupInfo::new("console", working_dir);
    session
        .start_host(&startup, settings.start_timeout())
        .await
        .context("starting interpreter")?;

    let interrupter = session.clone();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if interrupter.cancel_all().is_err() {
                break;
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while session.is_host_running() {
        let interaction = match session.begin_interaction(true) {
            Ok(interaction) => interaction,
            Err(HostError::HostNotRunning) => break,
            Err(e) => return Err(e.into()),
        };
        print!("{} ", interaction.prompt());
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        if let Err(e) = interaction.respond(line) {
            tracing::warn!("Input rejected: {e}");
        }
        interaction.complete();
    }

    session.dispose()?;
    Ok(())
}

fn print_event(_session_id: i64, event: &SessionEvent) {
    match event {
        SessionEvent::Output(output) => match output.kind {
            OutputKind::Stdout => print!("{}", output.text),
            OutputKind::Stderr => eprint!("{}", output.text),
        },
        SessionEvent::Disconnected => eprintln!("[host disconnected]"),
        _ => {}
    }
}
