//! Uplink demo - drives the client against the in-process loopback endpoint.
//!
//! Binds, waits for the lifecycle outcome, subscribes to actions and answers
//! them, streams a few payloads and disposes. Useful for watching the
//! lifecycle logs for each endpoint behaviour.

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;
use uplink_core::{
    Action, ActionResponse, LifecycleState, LoopbackEndpoint, LoopbackMode, Payload, Uplink,
    UplinkError, UplinkStateCallback,
};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    Accepting,
    Refusing,
    Absent,
}

impl From<Mode> for LoopbackMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Accepting => LoopbackMode::Accepting,
            Mode::Refusing => LoopbackMode::Refusing,
            Mode::Absent => LoopbackMode::Absent,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "uplink-demo")]
#[command(about = "Exercise the uplink client against a loopback endpoint")]
struct Args {
    /// How the endpoint answers the bind
    #[arg(short, long, value_enum, default_value = "accepting")]
    mode: Mode,

    /// Number of payloads to send
    #[arg(short = 'n', long, default_value = "3")]
    messages: u32,

    /// Kill the endpoint before disposing
    #[arg(long)]
    kill: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

struct LoggingCallback;

impl UplinkStateCallback for LoggingCallback {
    fn on_uplink_ready(&self) {
        info!("Callback: uplink ready");
    }

    fn on_service_not_configured(&self) {
        warn!("Callback: service not configured");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    let endpoint = LoopbackEndpoint::new(args.mode.into());
    let uplink = match Uplink::new(Arc::new(endpoint.clone()), Arc::new(LoggingCallback)) {
        Ok(uplink) => uplink,
        Err(e @ UplinkError::ConfiguratorUnavailable { .. }) => {
            println!("final state: not constructed ({})", e);
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    let mut state = uplink.watch_state();
    let outcome = tokio::time::timeout(
        Duration::from_secs(5),
        state.wait_for(|s| *s != LifecycleState::Uninitialized),
    )
    .await
    .context("timed out waiting for bind result")?
    .map(|s| *s)?;

    if outcome != LifecycleState::Connected {
        uplink.dispose()?;
        println!("final state: {}", uplink.state());
        return Ok(());
    }

    let (action_tx, mut action_rx) = mpsc::unbounded_channel::<Action>();
    uplink.subscribe(move |action: Action| {
        let _ = action_tx.send(action);
    })?;

    endpoint.push_action(&Action {
        action_id: "1".into(),
        name: "update_config".into(),
        payload: r#"{"interval": 30}"#.into(),
    })?;

    let action = tokio::time::timeout(Duration::from_secs(5), action_rx.recv())
        .await
        .context("timed out waiting for action")?;
    let Some(action) = action else {
        bail!("action subscription closed");
    };
    info!(
        "Received action {} ({}) args {}",
        action.action_id,
        action.name,
        action.payload_json()?
    );
    uplink.respond_to_action(&ActionResponse::success(action.action_id, 1))?;

    for sequence in 1..=args.messages {
        let payload = Payload::new("device_shadow", sequence)
            .with_field("mode", "demo")
            .with_field("uptime", u64::from(sequence) * 10);
        match uplink.send_data(&payload) {
            Ok(()) => info!("Sent payload {}", sequence),
            Err(e) => warn!("Payload {} not sent: {}", sequence, e),
        }
    }

    if args.kill {
        endpoint.kill();
        tokio::time::timeout(
            Duration::from_secs(5),
            state.wait_for(|s| *s == LifecycleState::Stopped),
        )
        .await
        .context("timed out waiting for disconnect")??;
        if let Err(e) = uplink.send_data(&Payload::new("device_shadow", 0)) {
            info!("Send after loss rejected: {}", e);
        }
    }

    uplink.dispose()?;
    info!(
        "Endpoint received {} payloads, unbound {} time(s)",
        endpoint.received().len(),
        endpoint.unbind_count()
    );
    println!("final state: {}", uplink.state());
    Ok(())
}
