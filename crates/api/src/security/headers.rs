//! Security headers middleware
//!
//! The API serves JSON only; these headers keep responses inert if one is
//! ever opened directly in a browser, and keep billing data out of shared
//! caches.

use axum::{
    body::Body,
    http::{HeaderValue, Request, Response},
    middleware::Next,
};

/// Middleware that adds security headers to all responses
pub async fn security_headers_middleware(request: Request<Body>, next: Next) -> Response<Body> {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();

    // Prevent MIME type sniffing
    headers.insert(
        "X-Content-Type-Options",
        HeaderValue::from_static("nosniff"),
    );

    // API responses have no business inside a frame
    headers.insert("X-Frame-Options", HeaderValue::from_static("DENY"));

    // Enforce HTTPS connections
    headers.insert(
        "Strict-Transport-Security",
        HeaderValue::from_static("max-age=63072000; includeSubDomains"),
    );

    // Restrictive CSP in case a response is rendered as a document
    headers.insert(
        "Content-Security-Policy",
        HeaderValue::from_static("default-src 'none'; frame-ancestors 'none'"),
    );

    // Usage and payment data must not land in shared caches.
    // Only add if not already set by the handler.
    if !headers.contains_key("Cache-Control") {
        headers.insert(
            "Cache-Control",
            HeaderValue::from_static("no-store, no-cache, must-revalidate, private"),
        );
    }

    response
}
