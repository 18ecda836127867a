//! `POST /rpc/{method}`: hands the call to the RPC pipeline.
//!
//! Unary replies are the JSON `{"data": ..}` / `{"error": ..}` union; the
//! HTTP status mirrors the error code. `ConfigListener` answers with a
//! server-sent event stream that starts with the current config.

use std::convert::Infallible;

use accounts_core::Reply;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::stream::{self, Stream};
use tokio::sync::watch;
use tower::ServiceExt;
use tracing::debug;

use super::AppState;
use crate::config::AppConfig;
use crate::service::call::{Call, ConfigSubscription, RpcReply, Status};

fn status_code(code: accounts_core::Code) -> StatusCode {
    StatusCode::from_u16(code.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

pub async fn rpc_handler(
    State(state): State<AppState>,
    Path(method): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if state.shutdown.is_shutting_down() {
        return (StatusCode::SERVICE_UNAVAILABLE, Json(Status::new(accounts_core::Code::Unavailable, "server is shutting down")))
            .into_response();
    }
    let _guard = state.shutdown.in_flight_guard();

    let call = Call::new(method, headers, body.to_vec());
    match state.pipeline.oneshot(call).await {
        Ok(RpcReply::Unary(reply)) => {
            let status = reply.error().map_or(StatusCode::OK, |e| status_code(e.status_code));
            (status, Json(reply)).into_response()
        }
        Ok(RpcReply::Stream(sub)) => config_events(sub, state.shutdown.shutdown_receiver()).into_response(),
        Err(status) => (status_code(status.code), Json(Reply::<()>::Error(status_wire(&status)))).into_response(),
    }
}

fn status_wire(status: &Status) -> accounts_core::WireError {
    accounts_core::WireError {
        id: status.code.translation_id().to_string(),
        message: status.message.clone(),
        status_code: status.code,
        ..accounts_core::WireError::default()
    }
}

fn config_event(config: &AppConfig) -> Event {
    Event::default()
        .event("config")
        .json_data(config)
        .unwrap_or_else(|_| Event::default().event("config").data("{}"))
}

/// Current config, then one event per change, until shutdown or the
/// store goes away.
fn config_events(
    sub: ConfigSubscription,
    shutdown: watch::Receiver<bool>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let ConfigSubscription { ctx, mut changes } = sub;
    let first = config_event(&changes.borrow_and_update());
    debug!(request_id = %ctx.request_id(), "config listener attached");

    let updates = stream::unfold((changes, shutdown, ctx), |(mut changes, mut shutdown, ctx)| async move {
        if *shutdown.borrow() {
            return None;
        }
        tokio::select! {
            changed = changes.changed() => {
                changed.ok()?;
                let event = config_event(&changes.borrow_and_update());
                Some((Ok(event), (changes, shutdown, ctx)))
            }
            _ = shutdown.changed() => None,
            () = ctx.cancellation().cancelled() => None,
        }
    });

    Sse::new(futures_util::StreamExt::chain(stream::once(async move { Ok(first) }), updates))
        .keep_alive(KeepAlive::default())
}
