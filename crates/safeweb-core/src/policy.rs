// ABOUTME: Static security policy values shared by the middleware layers.
// ABOUTME: Covers CSP strings, Referer-Policy, HSTS, accepted media types, and HTTP method classes.

use http::Method;

use crate::route::Route;

const DEFAULT_CSP_DIRECTIVES: &[&str] = &[
    "default-src 'self'",
    "frame-ancestors 'none'",
    "form-action 'self'",
    "base-uri 'self'",
    "block-all-mixed-content",
    "object-src 'none'",
];

const INLINE_STYLES_DIRECTIVE: &str = "style-src 'self' 'unsafe-inline'";

/// Value sent in both `Referer-Policy` and `Referrer-Policy` on browser responses.
pub const REFERER_POLICY: &str = "same-origin";

/// One year, the usual HSTS preload requirement.
pub const HSTS_MAX_AGE_SECS: u64 = 31_536_000;

/// Content-Security-Policy for browser-classified responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ContentSecurityPolicy {
    pub allow_inline_styles: bool,
}

impl ContentSecurityPolicy {
    pub fn new(allow_inline_styles: bool) -> Self {
        Self {
            allow_inline_styles,
        }
    }

    /// Render the policy as a header value. Independent of any request.
    pub fn header_value(&self) -> String {
        let mut directives = DEFAULT_CSP_DIRECTIVES.to_vec();
        if self.allow_inline_styles {
            directives.push(INLINE_STYLES_DIRECTIVE);
        }
        directives.join("; ")
    }
}

/// Build the `Strict-Transport-Security` value, with optional extra directives.
pub fn strict_transport_security(options: Option<&str>) -> String {
    match options.map(str::trim).filter(|o| !o.is_empty()) {
        Some(extra) => format!("max-age={HSTS_MAX_AGE_SECS}; {extra}"),
        None => format!("max-age={HSTS_MAX_AGE_SECS}"),
    }
}

/// The single media type each traffic class accepts for request bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaType {
    Json,
    FormUrlEncoded,
}

impl MediaType {
    pub fn for_route(route: Route) -> Self {
        match route {
            Route::Api => MediaType::Json,
            Route::Browser => MediaType::FormUrlEncoded,
        }
    }

    pub fn essence(&self) -> &'static str {
        match self {
            MediaType::Json => "application/json",
            MediaType::FormUrlEncoded => "application/x-www-form-urlencoded",
        }
    }

    /// Compare against a `Content-Type` header value, ignoring parameters and case.
    pub fn matches(&self, content_type: &str) -> bool {
        let essence = content_type.split(';').next().unwrap_or_default().trim();
        essence.eq_ignore_ascii_case(self.essence())
    }
}

/// Methods whose bodies go through the content-type gate.
pub fn is_body_bearing(method: &Method) -> bool {
    matches!(*method, Method::POST | Method::PUT | Method::PATCH)
}

/// Methods the CSRF guard never blocks.
pub fn is_safe(method: &Method) -> bool {
    matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS)
}
