//! Router binding: mounts the hub's transports under a resource prefix.
//!
//! Request handling order matches the protocol: origin gate first, then the
//! method gate, then explicit `resource[/session-id[/...]]` path parsing.
//! A request with no session id mints a new session; one with an id
//! reattaches, or gets `400` if the session is gone.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::response::Response;
use axum::routing::any;
use axum::Router;
use thiserror::Error;
use tether_core::{Hub, HubError, SessionId};

use crate::exchange::status;
use crate::transport::HttpTransport;

/// Problem mounting the routes.
#[derive(Debug, Error)]
pub enum MuxError {
    /// The resource prefix must be rooted and end with a slash.
    #[error("resource prefix must start and end with '/'")]
    BadResource,

    /// The hub's wiring was already bound by an earlier mount.
    #[error(transparent)]
    AlreadyBound(#[from] HubError),
}

struct MuxState {
    hub: Hub,
    prefix: String,
    transports: Vec<Arc<dyn HttpTransport>>,
}

/// Build the router serving `hub` under `resource` (e.g. `"/sio/"`).
///
/// Each transport `t` answers under `<resource><t.resource()>[/...]`. The
/// transport list is snapshotted here; the hub's callbacks are frozen.
///
/// # Errors
///
/// [`MuxError::BadResource`] for a prefix that is not `/`-rooted and
/// `/`-terminated, [`MuxError::AlreadyBound`] when routes were already
/// mounted for this hub.
pub fn mux(
    hub: &Hub,
    resource: &str,
    transports: Vec<Arc<dyn HttpTransport>>,
) -> Result<Router, MuxError> {
    if !resource.starts_with('/') || !resource.ends_with('/') {
        return Err(MuxError::BadResource);
    }
    hub.bind()?;

    let state = Arc::new(MuxState {
        hub: hub.clone(),
        prefix: resource.to_owned(),
        transports,
    });

    Ok(Router::new()
        .route(&format!("{resource}{{*tail}}"), any(dispatch))
        .with_state(state))
}

async fn dispatch(State(state): State<Arc<MuxState>>, request: Request) -> Response {
    state.hub.note_request();

    let origin = request
        .headers()
        .get(header::ORIGIN)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);

    if let Some(origin) = &origin {
        if !state.hub.origin_allowed(origin) {
            tracing::debug!(origin, "unauthorized origin");
            return status(StatusCode::UNAUTHORIZED);
        }
    }

    let method = request.method().clone();
    let response = if method == Method::OPTIONS {
        status(StatusCode::OK)
    } else if method == Method::GET || method == Method::POST {
        route(&state, request).await
    } else {
        status(StatusCode::UNAUTHORIZED)
    };

    with_cors(response, origin)
}

async fn route(state: &MuxState, request: Request) -> Response {
    let path = request.uri().path().to_owned();
    let Some(tail) = path.strip_prefix(&state.prefix) else {
        return status(StatusCode::BAD_REQUEST);
    };

    let mut segments = tail.split('/');
    let resource = segments.next().unwrap_or("");
    let Some(transport) = state
        .transports
        .iter()
        .find(|transport| transport.resource() == resource)
    else {
        tracing::debug!(resource, "no transport for resource");
        return status(StatusCode::BAD_REQUEST);
    };

    let conn = match segments.next().filter(|segment| !segment.is_empty()) {
        None => state.hub.create_conn(),
        Some(raw) => {
            let Some(id) = SessionId::from_hex(raw) else {
                return status(StatusCode::BAD_REQUEST);
            };
            match state.hub.get(id) {
                Some(conn) => conn,
                None => return status(StatusCode::BAD_REQUEST),
            }
        }
    };

    transport.accept(conn, request).await
}

/// Echo the admitted origin per the CORS contract.
fn with_cors(mut response: Response, origin: Option<String>) -> Response {
    let Some(origin) = origin else {
        return response;
    };
    let Ok(origin) = HeaderValue::from_str(&origin) else {
        return response;
    };

    let headers = response.headers_mut();
    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin);
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
        HeaderValue::from_static("true"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("POST, GET"),
    );
    response
}
