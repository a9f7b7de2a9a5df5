//! User-Agent gate.

use axum::{
    body::Body,
    extract::State,
    http::{header, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;

use crate::api::handlers::ErrorBody;

/// Reject requests whose `User-Agent` does not contain `agent`.
///
/// Browsers send their own agent string, so this keeps a web page from
/// driving the API through the user's browser.
pub async fn require_agent(
    State(agent): State<Arc<str>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let allowed = request
        .headers()
        .get(header::USER_AGENT)
        .and_then(|h| h.to_str().ok())
        .is_some_and(|ua| ua.contains(agent.as_ref()));

    if !allowed {
        tracing::debug!(uri = %request.uri(), "Rejected request with unrecognized user agent");
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorBody {
                message: format!("browser access disabled: User-Agent must contain {agent:?}"),
            }),
        )
            .into_response();
    }

    next.run(request).await
}
