// ABOUTME: Demo application handlers mounted behind the safeweb policy layer.
// ABOUTME: A small JSON API under /api and an Askama-rendered feedback form for browsers.

use askama::Template;
use askama_derive_axum::IntoResponse as AskamaIntoResponse;
use axum::extract::Form;
use axum::routing::{get, post};
use axum::{Json, Router};
use safeweb_server::CsrfToken;
use serde::Deserialize;

/// Machine-to-machine routes. Mounted under the `/api` prefix.
pub fn api_router() -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/echo", post(echo))
}

/// Browser routes: everything outside `/api`.
pub fn browser_router() -> Router {
    Router::new()
        .route("/", get(feedback_form))
        .route("/feedback", post(submit_feedback))
}

/// Health check handler. Returns 200 OK with a simple JSON body.
async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Echo the JSON body back to the caller.
async fn echo(Json(body): Json<serde_json::Value>) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "received": body }))
}

#[derive(Template, AskamaIntoResponse)]
#[template(
    ext = "html",
    source = r#"<!doctype html>
<html>
  <head><title>Feedback</title></head>
  <body>
    <form method="post" action="/feedback">
      <input type="hidden" name="csrf_token" value="{{ csrf_token }}">
      <label>Message <input type="text" name="message"></label>
      <button type="submit">Send</button>
    </form>
  </body>
</html>"#
)]
pub struct FeedbackFormTemplate {
    pub csrf_token: String,
}

/// GET / - Render the feedback form with a token bound to this session.
async fn feedback_form(token: CsrfToken) -> FeedbackFormTemplate {
    FeedbackFormTemplate {
        csrf_token: token.0,
    }
}

#[derive(Debug, Deserialize)]
pub struct FeedbackInput {
    pub message: String,
}

#[derive(Template, AskamaIntoResponse)]
#[template(
    ext = "html",
    source = r#"<!doctype html>
<html>
  <head><title>Thanks</title></head>
  <body><p>Thanks! We received: {{ message }}</p></body>
</html>"#
)]
pub struct FeedbackThanksTemplate {
    pub message: String,
}

/// POST /feedback - Accept the form once the CSRF guard has let it through.
async fn submit_feedback(Form(input): Form<FeedbackInput>) -> FeedbackThanksTemplate {
    tracing::info!(length = input.message.len(), "feedback received");
    FeedbackThanksTemplate {
        message: input.message,
    }
}
