//! Subscriber Gateway (spec §4.7): authenticated SSE endpoint streaming
//! `progress`/`status`/`completion` events for one `(tenant_id, job_name)`.
//! Grounded in `control-plane::api::events::stream_sse`'s axum `Sse` usage,
//! adapted from its database-polling `stream::unfold` loop to wrap the
//! `Broker`'s `broadcast::Receiver` instead, since delivery here is
//! in-process and best-effort rather than replayed from a table.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::routing::get;
use axum::Router;
use futures::stream::{self, Stream, StreamExt};
use serde::Deserialize;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::auth::AuthValidator;
use crate::broker::Broker;

/// Heartbeat cadence and disconnect threshold (spec §4.7: "Heartbeat pings
/// every 30 s; subscribers missing three pings are disconnected"). Plain
/// SSE has no client->server pong, so "missing a ping" is approximated by
/// the subscriber falling behind the broadcast buffer (`RecvError::Lagged`)
/// three heartbeat intervals in a row.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const MAX_CONSECUTIVE_LAGS: u32 = 3;

#[derive(Clone)]
pub struct GatewayState {
    pub broker: Broker,
    pub auth: AuthValidator,
}

pub fn router(state: GatewayState) -> Router {
    Router::new().route("/subscribe", get(subscribe)).with_state(state)
}

#[derive(Debug, Deserialize)]
struct SubscribeQuery {
    job_name: String,
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

async fn subscribe(
    State(state): State<GatewayState>,
    Query(query): Query<SubscribeQuery>,
    headers: HeaderMap,
) -> Result<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>, StatusCode> {
    let token = bearer_token(&headers).ok_or(StatusCode::UNAUTHORIZED)?;
    let claims = state.auth.validate(token).map_err(|_| StatusCode::UNAUTHORIZED)?;

    info!(tenant_id = claims.tenant_id, job_name = %query.job_name, "subscriber connected");

    let rx = state.broker.subscribe(claims.tenant_id, &query.job_name);
    let stream = event_stream(rx, claims.tenant_id, query.job_name);

    Ok(Sse::new(stream).keep_alive(KeepAlive::default().interval(HEARTBEAT_INTERVAL).text("ping")))
}

fn event_stream(
    rx: broadcast::Receiver<ingestflow_core::events::PipelineEvent>,
    tenant_id: i64,
    job_name: String,
) -> impl Stream<Item = Result<SseEvent, Infallible>> {
    struct State {
        rx: broadcast::Receiver<ingestflow_core::events::PipelineEvent>,
        consecutive_lags: u32,
        done: bool,
    }

    stream::unfold(
        State { rx, consecutive_lags: 0, done: false },
        move |mut st| {
            let tenant_id = tenant_id;
            let job_name = job_name.clone();
            async move {
                if st.done {
                    return None;
                }
                loop {
                    match st.rx.recv().await {
                        Ok(event) => {
                            st.consecutive_lags = 0;
                            let (event_type, data) = encode(&event);
                            return Some((Ok(SseEvent::default().event(event_type).data(data)), st));
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            st.consecutive_lags += 1;
                            warn!(tenant_id, %job_name, skipped, consecutive_lags = st.consecutive_lags, "subscriber lagging");
                            if st.consecutive_lags >= MAX_CONSECUTIVE_LAGS {
                                st.done = true;
                                return None;
                            }
                            continue;
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            st.done = true;
                            return None;
                        }
                    }
                }
            }
        },
    )
}

fn encode(event: &ingestflow_core::events::PipelineEvent) -> (&'static str, String) {
    use ingestflow_core::events::PipelineEvent;
    let kind = match event {
        PipelineEvent::Progress { .. } => "progress",
        PipelineEvent::Status { .. } => "status",
        PipelineEvent::Completion { .. } => "completion",
    };
    (kind, serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string()))
}
