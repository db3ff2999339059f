//! Origin check for proxied requests.

use axum::http::{header, HeaderMap};

use crate::context::RequestContext;

/// A present `Origin` header must name the host the request was sent to.
/// Requests without an `Origin` pass.
pub fn origin_allowed(headers: &HeaderMap, ctx: &RequestContext) -> bool {
    let Some(origin) = headers.get(header::ORIGIN) else {
        return true;
    };
    match origin.to_str() {
        Ok(origin) => origin.trim_end_matches('/').eq_ignore_ascii_case(&ctx.origin()),
        Err(_) => false,
    }
}
