//! CSRF token issuance for the storefront frontend.

use axum::{
    extract::State,
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::http::server::AppState;
use crate::security::csrf;

/// Header name clients should echo the token in.
pub const TOKEN_HEADER_DISPLAY: &str = "X-CSRF-Token";

#[derive(Debug, Serialize)]
pub struct CsrfTokenResponse {
    pub token: String,
    pub header: &'static str,
    /// Ready-made `<meta>` tag for server-rendered pages.
    pub meta: String,
}

/// `GET {csrf_token_path}`: issue a fresh token as JSON and as a cookie.
pub async fn issue_csrf_token(State(state): State<AppState>) -> Response {
    let token = state.pipeline.csrf().issue();
    let cookie = csrf::cookie_header(&token, state.pipeline.production());
    let body = CsrfTokenResponse {
        meta: csrf::meta_tag(&token),
        header: TOKEN_HEADER_DISPLAY,
        token,
    };

    (
        [
            (header::SET_COOKIE, cookie),
            (header::CACHE_CONTROL, "no-store".to_string()),
        ],
        Json(body),
    )
        .into_response()
}
