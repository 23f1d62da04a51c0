//! WebSocket live queries
//!
//! `GET /v1/live/{key}` upgrades to a WebSocket that streams every change
//! in `key`. An optional `bounds=minlat,minlon,maxlat,maxlon` or
//! `nearby=lat,lon,meters` query narrows the stream to changes whose
//! previous or new geometry intersects the area. The subscription lives
//! exactly as long as the socket.

use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::{Path, Query, State},
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use spatia_pipeline::{ChangeEvent, ChannelSink, CommandDetail, Region, SubscriptionId};
use std::sync::Arc;
use tracing::{debug, warn};

use super::AppState;
use crate::error::ApiError;

#[derive(Debug, Default, Deserialize)]
pub struct LiveParams {
    pub bounds: Option<String>,
    pub nearby: Option<String>,
}

impl LiveParams {
    pub fn region(&self) -> Result<Option<Region>, ApiError> {
        let region = match (&self.bounds, &self.nearby) {
            (Some(_), Some(_)) => return Err(ApiError::invalid("use either bounds or nearby, not both")),
            (Some(raw), None) => match numbers::<4>("bounds", raw)? {
                [min_lat, min_lon, max_lat, max_lon] => Region::bounds(min_lat, min_lon, max_lat, max_lon),
            },
            (None, Some(raw)) => match numbers::<3>("nearby", raw)? {
                [lat, lon, meters] => Region::circle(lat, lon, meters),
            },
            (None, None) => return Ok(None),
        };
        region.validate()?;
        Ok(Some(region))
    }
}

fn numbers<const N: usize>(name: &str, raw: &str) -> Result<[f64; N], ApiError> {
    let parsed: Vec<f64> = raw
        .split(',')
        .map(|part| part.trim().parse::<f64>())
        .collect::<Result<_, _>>()
        .map_err(|_| ApiError::invalid(format!("{name} must be {N} comma-separated numbers")))?;
    parsed
        .try_into()
        .map_err(|_| ApiError::invalid(format!("{name} must be {N} comma-separated numbers")))
}

/// Server-to-client WebSocket messages
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LiveMessage<'a> {
    Connected { subscription: SubscriptionId, key: &'a str },
    Change { subscription: SubscriptionId, detail: &'a CommandDetail },
}

pub async fn live_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(params): Query<LiveParams>,
) -> Result<impl IntoResponse, ApiError> {
    let region = params.region()?;
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, key, region)))
}

async fn handle_socket(socket: WebSocket, state: AppState, key: String, region: Option<Region>) {
    let (mut sender, mut receiver) = socket.split();

    let (sink, mut events) = ChannelSink::<ChangeEvent>::bounded(state.live_channel_capacity);
    let live = Arc::clone(state.pipeline.live());
    let subscription = live.subscribe(key.clone(), region, Arc::new(sink));
    state.live_sockets.inc();

    let connected = LiveMessage::Connected {
        subscription,
        key: &key,
    };
    if send_json(&mut sender, &connected).await {
        loop {
            tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else { break };
                    let message = LiveMessage::Change {
                        subscription: event.subscription,
                        detail: &event.detail,
                    };
                    if !send_json(&mut sender, &message).await {
                        break;
                    }
                }
                incoming = receiver.next() => {
                    match incoming {
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Err(e)) => {
                            debug!(subscription = %subscription, error = %e, "Live socket error");
                            break;
                        }
                        // pings are answered by axum
                        Some(Ok(_)) => {}
                    }
                }
            }
        }
    }

    live.unsubscribe(&subscription);
    state.live_sockets.dec();
    debug!(subscription = %subscription, key = %key, "Live socket closed");
}

async fn send_json<S, T>(sender: &mut S, message: &T) -> bool
where
    S: SinkExt<Message> + Unpin,
    T: Serialize,
{
    match serde_json::to_string(message) {
        Ok(json) => sender.send(Message::Text(json.into())).await.is_ok(),
        Err(e) => {
            warn!(error = %e, "Failed to encode live message");
            false
        }
    }
}
