//! HTTP embedding of the normalized event feed.
//!
//! The engine consumes a normalized event stream; this module is one
//! possible embedding of that contract: an axum server accepting signed
//! JSON deliveries on `POST /events` plus a liveness probe on
//! `GET /healthz`. Deliveries are acknowledged with 202 once handed to the
//! registry; duplicate suppression also answers 202 since upstream delivery
//! is at-least-once either way.

mod signature;

pub use signature::{authenticate_delivery, DeliverySignature, SIGNATURE_HEADER};

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::Router;
use tracing::{debug, warn};

use crate::checkers::{ComplianceChecker, SubmoduleChecker};
use crate::forge::ForgeApi;
use crate::ingress::{EventIntake, IncomingEvent};
use crate::registry::ActorRegistry;
use crate::tracker::TrackerApi;

/// Shared server state.
pub struct AppState<F, T, C, S> {
    pub intake: Arc<EventIntake>,
    pub registry: Arc<ActorRegistry<F, T, C, S>>,
    pub feed_secret: Vec<u8>,
}

impl<F, T, C, S> Clone for AppState<F, T, C, S> {
    fn clone(&self) -> Self {
        AppState {
            intake: Arc::clone(&self.intake),
            registry: Arc::clone(&self.registry),
            feed_secret: self.feed_secret.clone(),
        }
    }
}

/// Builds the ingress router.
pub fn build_router<F, T, C, S>(state: AppState<F, T, C, S>) -> Router
where
    F: ForgeApi + 'static,
    T: TrackerApi + 'static,
    C: ComplianceChecker + 'static,
    S: SubmoduleChecker + 'static,
{
    Router::new()
        .route("/events", post(receive_event::<F, T, C, S>))
        .route("/healthz", get(healthz))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

/// Accepts one normalized event delivery.
///
/// 401 on a bad signature, 400 on an unparsable body, 202 otherwise,
/// including duplicates, which are suppressed silently.
async fn receive_event<F, T, C, S>(
    State(state): State<AppState<F, T, C, S>>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode
where
    F: ForgeApi + 'static,
    T: TrackerApi + 'static,
    C: ComplianceChecker + 'static,
    S: SubmoduleChecker + 'static,
{
    let signature = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());
    if !authenticate_delivery(signature, &body, &state.feed_secret) {
        warn!("Rejected event delivery with a bad signature");
        return StatusCode::UNAUTHORIZED;
    }

    let incoming: IncomingEvent = match serde_json::from_slice(&body) {
        Ok(incoming) => incoming,
        Err(e) => {
            warn!(error = %e, "Rejected unparsable event delivery");
            return StatusCode::BAD_REQUEST;
        }
    };

    match state.intake.accept(incoming) {
        Some(event) => {
            debug!(mr = %event.mr_id, kind = ?event.kind(), seq = event.seq, "Accepted event");
            state.registry.dispatch(event).await;
            StatusCode::ACCEPTED
        }
        None => StatusCode::ACCEPTED,
    }
}
