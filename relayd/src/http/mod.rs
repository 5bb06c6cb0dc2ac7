/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! HTTP trigger surface.
//!
//! | Route | Effect |
//! |---|---|
//! | `GET /timer?i=<channel>&t=<minutes>` | start a timed activation |
//! | `GET /emergency_stop` | all channels OFF, registry cleared |
//!
//! Handlers return as soon as the activation is admitted; the activation
//! itself runs in the engine's tracked task set.

pub mod error;

pub use error::ApiError;

use anyhow::{Context, Result};
use axum::extract::{Query, State};
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::engine::Engine;
use crate::task::{ChannelId, Trigger};

/// Raw `/timer` query.  Kept as strings so malformed values map to our own
/// `400` body instead of the extractor's rejection.
#[derive(Debug, Default, Deserialize)]
pub struct TimerParams {
    pub i: Option<String>,
    pub t: Option<String>,
}

pub fn router(engine: Engine) -> Router {
    Router::new()
        .route("/timer", get(handle_timer))
        .route("/emergency_stop", get(emergency_stop))
        .with_state(engine)
}

pub async fn handle_timer(
    State(engine): State<Engine>,
    Query(params): Query<TimerParams>,
) -> Result<String, ApiError> {
    let (channel, minutes) = parse_timer(&params)?;

    engine
        .controller()
        .activate(channel, minutes, Trigger::Api)
        .map_err(|e| {
            warn!(channel = %channel, minutes, error = %e, "timer request refused");
            ApiError::from(e)
        })?;

    info!(channel = %channel, minutes, "timer request accepted");
    Ok(format!(
        "relay on channel {} activated for {} min",
        channel, minutes
    ))
}

pub async fn emergency_stop(State(engine): State<Engine>) -> &'static str {
    engine.emergency_stop().await;
    "emergency shutdown complete"
}

fn parse_timer(params: &TimerParams) -> Result<(ChannelId, i64), ApiError> {
    let invalid = || ApiError::BadRequest("invalid parameters".to_string());

    let channel = params
        .i
        .as_deref()
        .and_then(|s| s.trim().parse::<u32>().ok())
        .ok_or_else(invalid)?;
    let minutes = params
        .t
        .as_deref()
        .and_then(|s| s.trim().parse::<i64>().ok())
        .ok_or_else(invalid)?;

    Ok((ChannelId(channel), minutes))
}

/// Serve `engine` on `listener` until the engine's running token is
/// cancelled.
///
/// # Errors
/// Returns an error if the server fails while accepting connections.
pub async fn serve(listener: TcpListener, engine: Engine) -> Result<()> {
    let local = listener.local_addr().context("listener has no local address")?;
    let token = engine.running().clone();
    info!(addr = %local, "HTTP server listening");

    axum::serve(listener, router(engine))
        .with_graceful_shutdown(async move { token.cancelled().await })
        .await
        .context("HTTP server failed")?;

    info!("HTTP server stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
