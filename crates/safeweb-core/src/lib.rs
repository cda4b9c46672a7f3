// ABOUTME: Core library for safeweb: traffic classification, the CSRF primitive, and policy values.
// ABOUTME: Has no HTTP server dependency so the policy rules can be tested in isolation.

pub mod csrf;
pub mod policy;
pub mod route;

pub use csrf::{CsrfError, CsrfProtector, HmacCsrf, SessionSecret};
pub use policy::{ContentSecurityPolicy, MediaType};
pub use route::{Classifier, Route};
