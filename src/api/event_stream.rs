//! Push channel: WebSocket subscription to ledger stake events.
//!
//! Endpoints are tried in order. When none is reachable the daemon keeps
//! running on the poll channel alone and the listener retries with
//! exponential backoff; a dropped stream is reconnected the same way.

use std::collections::HashSet;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Result;
use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use futures::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::models::{Partition, StakeObservation};
use crate::trading::EngineMessage;

use super::types::EventNotification;
use super::webhook::Notifier;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub const METHOD_SUBSCRIBE_EVENTS: &str = "stake_subscribeEvents";

const STAKE_MODULE: &str = "SubtensorModule";
const EVENT_STAKE_ADDED: &str = "StakeAdded";
const EVENT_STAKE_REMOVED: &str = "StakeRemoved";

/// Decode a stake event notification into a signed change observation.
///
/// Returns `None` for anything that is not a well-formed stake event.
pub fn parse_stake_event(text: &str) -> Option<StakeObservation> {
    let notification: EventNotification = serde_json::from_str(text).ok()?;
    let event = notification.params.result;

    if event.module_id != STAKE_MODULE {
        return None;
    }

    let sign = match event.event_id.as_str() {
        EVENT_STAKE_ADDED => Decimal::ONE,
        EVENT_STAKE_REMOVED => Decimal::NEGATIVE_ONE,
        _ => return None,
    };

    // Attribute order: [partition, account, amount]
    let [partition, account, amount, ..] = event.attributes.as_slice() else {
        return None;
    };

    let partition = partition_from_value(partition)?;
    let account = account.as_str()?;
    let amount = decimal_from_value(amount)?;

    Some(StakeObservation::change(partition, account, amount.abs() * sign))
}

fn partition_from_value(value: &Value) -> Option<Partition> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|n| Partition::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn decimal_from_value(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => Decimal::from_str(&n.to_string())
            .or_else(|_| Decimal::from_scientific(&n.to_string()))
            .ok(),
        Value::String(s) => Decimal::from_str(s.trim()).ok(),
        _ => None,
    }
}

/// Long-running push listener feeding the engine.
pub struct EventSubscriber {
    endpoints: Vec<String>,
    watched: HashSet<String>,
    tx: mpsc::Sender<EngineMessage>,
    notifier: Notifier,
}

impl EventSubscriber {
    pub fn new(
        endpoints: Vec<String>,
        watched: impl IntoIterator<Item = String>,
        tx: mpsc::Sender<EngineMessage>,
        notifier: Notifier,
    ) -> Self {
        Self {
            endpoints,
            watched: watched.into_iter().collect(),
            tx,
            notifier,
        }
    }

    fn reconnect_backoff() -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_secs(1))
            .with_max_interval(Duration::from_secs(60))
            .with_max_elapsed_time(None)
            .build()
    }

    /// Connect, listen and reconnect until the engine goes away.
    pub async fn run(self) {
        let mut backoff = Self::reconnect_backoff();

        loop {
            match self.connect_any().await {
                Some((url, ws)) => {
                    backoff.reset();
                    self.notifier
                        .live_text(&format!("🛰 Connected to `{}` for real-time stake events.", url))
                        .await;

                    match self.listen(ws).await {
                        Ok(()) => warn!(url = %url, "Event stream ended"),
                        Err(e) => warn!(url = %url, error = %e, "Event stream failed"),
                    }
                }
                None => {
                    warn!("Could not connect to any event endpoint, running in poll-only mode");
                }
            }

            if self.tx.is_closed() {
                debug!("Engine stopped, event listener exiting");
                return;
            }

            let wait = backoff.next_backoff().unwrap_or(Duration::from_secs(60));
            info!(retry_in_secs = wait.as_secs(), "Reconnecting to event stream");
            tokio::time::sleep(wait).await;
        }
    }

    /// First endpoint that accepts a connection, in configured order.
    async fn connect_any(&self) -> Option<(String, WsStream)> {
        for url in &self.endpoints {
            match connect_async(url.as_str()).await {
                Ok((ws, _)) => {
                    info!(url = %url, "Connected for real-time stake events");
                    return Some((url.clone(), ws));
                }
                Err(e) => warn!(url = %url, error = %e, "Failed to connect"),
            }
        }
        None
    }

    /// Subscribe and forward watched stake events until the stream ends.
    async fn listen(&self, ws: WsStream) -> Result<()> {
        let (mut sink, mut stream) = ws.split();

        let subscribe = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": METHOD_SUBSCRIBE_EVENTS,
            "params": [],
        });
        sink.send(Message::Text(subscribe.to_string())).await?;

        while let Some(msg) = stream.next().await {
            match msg? {
                Message::Text(text) => {
                    let Some(obs) = parse_stake_event(&text) else {
                        continue;
                    };
                    if !self.watched.contains(&obs.account) {
                        continue;
                    }

                    debug!(partition = obs.partition, account = %obs.account, "Stake event received");
                    if self.tx.send(EngineMessage::Observation(obs)).await.is_err() {
                        return Ok(());
                    }
                }
                Message::Ping(data) => sink.send(Message::Pong(data)).await?,
                Message::Close(_) => return Ok(()),
                _ => {}
            }
        }

        Ok(())
    }
}
