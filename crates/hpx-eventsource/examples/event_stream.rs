//! Event Stream Example
//!
//! Connects to a Server-Sent Events endpoint, prints every message, and
//! reopens the stream after each completion using the server's retry time.
//!
//! Run with: `cargo run -p hpx-eventsource --example event_stream -- <url>`
//!
//! Set `RUST_LOG=hpx_eventsource=debug` to see connection logs.

use hpx_eventsource::{
    EventSource, EventSourceConfig, EventSourceError, Message, SerialExecutor,
};
use http::StatusCode;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "http://localhost:8080/events".to_string());

    let source = EventSource::new(EventSourceConfig::new(url), SerialExecutor::new())?;

    source.on_open(|| println!("-- connected"));
    source.on_event(|message: &Message| {
        println!(
            "[{}] id={} data={}",
            message.event_type(),
            message.id.as_deref().unwrap_or("-"),
            message.data.as_deref().unwrap_or(""),
        );
    });

    let (done_tx, mut done_rx) = mpsc::unbounded_channel();
    source.on_complete(
        move |status: Option<StatusCode>, error: Option<&EventSourceError>| {
            match error {
                Some(err) => println!("-- completed (status {status:?}): {err}"),
                None => println!("-- completed (status {status:?})"),
            }
            let _ = done_tx.send(());
        },
    );

    source.open();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                source.close();
                break;
            }
            Some(()) = done_rx.recv() => {
                let delay = source.retry_time();
                println!(
                    "-- reconnecting in {delay:?} (last event id {:?})",
                    source.last_event_id()
                );
                tokio::time::sleep(delay).await;
                source.open();
            }
        }
    }

    Ok(())
}
