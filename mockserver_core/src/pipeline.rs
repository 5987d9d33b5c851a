//! Request pipeline (`§4.9`).
//!
//! Composes matcher -> extractor -> assertion engine -> selector ->
//! renderer into the end-to-end `execute(request) -> response` operation,
//! then honours the selected response's delay.

use crate::extractor;
use crate::matcher;
use crate::renderer;
use crate::repository::RuleStore;
use crate::request::MockRequest;
use crate::selector;
use crate::{assertion, Error};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// The final, rendered outcome of a mock invocation.
#[derive(Clone, Debug, PartialEq)]
pub struct MockResponse {
    pub body: String,
    pub content_type: String,
    pub http_status: u16,
    pub delay: u64,
}

/// A cooperative cancellation signal, checked at every suspension point
/// (`§5`). The HTTP transport adapter is expected to flip this when the
/// caller disconnects or the request times out.
#[derive(Clone, Default)]
pub struct CancellationToken(std::sync::Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

const DELAY_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Run the full pipeline for `request` against `store`.
pub fn execute(
    store: &RuleStore,
    request: &MockRequest,
    cancel: &CancellationToken,
) -> Result<MockResponse, Error> {
    if cancel.is_cancelled() {
        return Err(Error::backend("request cancelled before dispatch"));
    }

    let rule = matcher::match_request(store, &request.method, &request.path)?;
    tracing::debug!(rule.key = ?rule.key, "matched rule");

    if cancel.is_cancelled() {
        return Err(Error::backend("request cancelled after match"));
    }

    let resolved = extractor::extract(&rule, request)?;

    let outcome = assertion::check(&rule.variables, &resolved);
    for message in &outcome.messages {
        tracing::info!(%message, "variable assertion failed");
    }
    if outcome.fatal {
        return Err(Error::assertion_failed(outcome.messages));
    }

    if cancel.is_cancelled() {
        return Err(Error::backend("request cancelled before selection"));
    }

    let response = selector::select(&rule, &resolved, store)?;
    let body = renderer::render(&response.body, &resolved);

    sleep_with_cancellation(Duration::from_millis(response.delay), cancel);

    Ok(MockResponse {
        body,
        content_type: response.content_type,
        http_status: response.http_status,
        delay: response.delay,
    })
}

/// Sleep for `duration`, waking early to check `cancel` every
/// [`DELAY_POLL_INTERVAL`] so a cancelled request doesn't block its worker
/// for the full delay.
fn sleep_with_cancellation(duration: Duration, cancel: &CancellationToken) {
    let mut remaining = duration;
    while remaining > Duration::ZERO {
        if cancel.is_cancelled() {
            return;
        }
        let step = remaining.min(DELAY_POLL_INTERVAL);
        std::thread::sleep(step);
        remaining -= step;
    }
}
