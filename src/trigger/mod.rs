//! HTTP trigger for one-shot cycles.
//!
//! An external scheduler calls `GET /api/keepalive` with
//! `Authorization: Bearer <secret>`. Each authorised request runs exactly one
//! cycle and answers with a JSON summary. Requests are rejected before any
//! backend call when the secret is missing or wrong.
//!
//! The cycle runs on its own task. A scheduler that gives up and drops the
//! connection does not stop it; the outcome is still committed and logged.

use std::io;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::backend::Backend;
use crate::config::CycleConfig;
use crate::cycle::{CycleReport, LeaseCycle};
use crate::handoff::HandoffStore;

/// Route served by the trigger.
pub const KEEPALIVE_PATH: &str = "/api/keepalive";

/// Request-level failures answered before a cycle starts.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum TriggerError {
    /// No shared secret is configured, so no request can be authorised.
    #[error("BATON_CRON_SECRET not configured")]
    SecretNotConfigured,
    /// The bearer token is missing or does not match.
    #[error("unauthorized")]
    Unauthorized,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    snapshot_id: Option<String>,
}

impl IntoResponse for TriggerError {
    fn into_response(self) -> Response {
        let status = match self {
            Self::SecretNotConfigured => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
        };
        let body = ErrorBody {
            error: self.to_string(),
            snapshot_id: None,
        };
        (status, Json(body)).into_response()
    }
}

/// Shared state behind the trigger route.
#[derive(Debug)]
pub struct TriggerState<B, S> {
    cycle: Arc<LeaseCycle<B, S>>,
    config: CycleConfig,
    secret: Option<String>,
}

impl<B, S> TriggerState<B, S> {
    /// Bundles the controller, its configuration, and the bearer secret.
    #[must_use]
    pub fn new(cycle: LeaseCycle<B, S>, config: CycleConfig, secret: Option<String>) -> Self {
        Self {
            cycle: Arc::new(cycle),
            config,
            secret,
        }
    }
}

/// Builds the trigger router.
#[must_use]
pub fn router<B, S>(state: TriggerState<B, S>) -> Router
where
    B: Backend + Send + Sync + 'static,
    S: HandoffStore + Send + Sync + 'static,
{
    Router::new()
        .route(KEEPALIVE_PATH, get(keepalive::<B, S>))
        .with_state(Arc::new(state))
}

/// Serves `app` on `listener` until `shutdown` is cancelled.
///
/// # Errors
///
/// Returns the underlying I/O error when the server fails.
pub async fn serve(
    listener: TcpListener,
    app: Router,
    shutdown: CancellationToken,
) -> io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, path = KEEPALIVE_PATH, "trigger listening");
    }
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

async fn keepalive<B, S>(
    State(state): State<Arc<TriggerState<B, S>>>,
    headers: HeaderMap,
) -> Response
where
    B: Backend + Send + Sync + 'static,
    S: HandoffStore + Send + Sync + 'static,
{
    if let Err(err) = authorize(&headers, state.secret.as_deref()) {
        warn!(error = %err, "rejected trigger request");
        return err.into_response();
    }

    let cycle = Arc::clone(&state.cycle);
    let config = state.config.clone();
    let task = tokio::spawn(async move { run_detached(&cycle, &config).await });

    match task.await {
        Ok(Ok(report)) => (StatusCode::OK, Json(report)).into_response(),
        Ok(Err(body)) => (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response(),
        Err(err) => {
            error!(error = %err, "triggered cycle task did not finish");
            let body = ErrorBody {
                error: format!("cycle task did not finish: {err}"),
                snapshot_id: None,
            };
            (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
        }
    }
}

async fn run_detached<B, S>(
    cycle: &LeaseCycle<B, S>,
    config: &CycleConfig,
) -> Result<CycleReport, ErrorBody>
where
    B: Backend,
    S: HandoffStore,
{
    match cycle.run(config, &CancellationToken::new()).await {
        Ok(outcome) => {
            let report = outcome.report();
            info!(
                status = report.status,
                snapshot_id = report.snapshot_id.as_deref().unwrap_or_default(),
                "triggered cycle finished"
            );
            Ok(report)
        }
        Err(err) => {
            error!(error = %err, "triggered cycle failed");
            Err(ErrorBody {
                error: err.to_string(),
                snapshot_id: err.image_id().map(str::to_owned),
            })
        }
    }
}

/// Checks the bearer token against the configured secret.
///
/// # Errors
///
/// Returns [`TriggerError::SecretNotConfigured`] when `secret` is absent and
/// [`TriggerError::Unauthorized`] when the header is missing or wrong.
pub fn authorize(headers: &HeaderMap, secret: Option<&str>) -> Result<(), TriggerError> {
    let expected = secret
        .filter(|value| !value.is_empty())
        .ok_or(TriggerError::SecretNotConfigured)?;
    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or(TriggerError::Unauthorized)?;
    if constant_time_eq(presented.as_bytes(), expected.as_bytes()) {
        Ok(())
    } else {
        Err(TriggerError::Unauthorized)
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0_u8, |diff, (x, y)| diff | (x ^ y)) == 0
}
