//! Request-scoped execution context.
//!
//! A [`Context`] travels with every external operation. It carries the
//! caller's cancellation handle, an optional deadline, the preferred locale
//! used for translation lookups and a correlation id for logs.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct Context {
    cancel: CancellationToken,
    deadline: Option<Instant>,
    locale: Option<String>,
    trace_id: String,
}

impl Context {
    /// A context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        Self {
            cancel: CancellationToken::new(),
            deadline: None,
            locale: None,
            trace_id: new_trace_id(),
        }
    }

    /// Wrap an existing cancellation token.
    pub fn with_cancellation(token: CancellationToken) -> Self {
        Self {
            cancel: token,
            ..Self::background()
        }
    }

    /// Derive a child context that also expires after `timeout`.
    ///
    /// The child keeps the tighter of the two deadlines, and cancelling the
    /// parent cancels the child.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(existing) if existing < candidate => existing,
            _ => candidate,
        };
        Self {
            cancel: self.cancel.child_token(),
            deadline: Some(deadline),
            locale: self.locale.clone(),
            trace_id: self.trace_id.clone(),
        }
    }

    pub fn with_locale<S: Into<String>>(mut self, locale: S) -> Self {
        self.locale = Some(locale.into());
        self
    }

    pub fn with_trace_id<S: Into<String>>(mut self, trace_id: S) -> Self {
        self.trace_id = trace_id.into();
        self
    }

    pub fn locale(&self) -> Option<&str> {
        self.locale.as_deref()
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline, if one is set.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Cancel this context and every context derived from it.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// True once the token has fired or the deadline has passed.
    pub fn is_done(&self) -> bool {
        self.cancel.is_cancelled()
            || self
                .deadline
                .is_some_and(|deadline| Instant::now() >= deadline)
    }

    /// Resolves when the context is cancelled or its deadline elapses.
    pub async fn done(&self) {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.cancel.cancelled() => {}
                    _ = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => self.cancel.cancelled().await,
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}

fn new_trace_id() -> String {
    format!("ctx-{}", &uuid::Uuid::new_v4().simple().to_string()[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_background_is_not_done() {
        let ctx = Context::background();
        assert!(!ctx.is_done());
        assert!(ctx.remaining().is_none());
        assert!(ctx.trace_id().starts_with("ctx-"));
        assert_eq!(ctx.trace_id().len(), 12);
    }

    #[test]
    fn test_cancel_propagates_to_children() {
        let parent = Context::background();
        let child = parent.with_timeout(Duration::from_secs(60));
        parent.cancel();
        assert!(child.is_done());
    }

    #[test]
    fn test_child_keeps_tighter_deadline() {
        let parent = Context::background().with_timeout(Duration::from_millis(50));
        let child = parent.with_timeout(Duration::from_secs(60));
        assert_eq!(child.deadline(), parent.deadline());
    }

    #[tokio::test]
    async fn test_done_resolves_on_deadline() {
        let ctx = Context::background().with_timeout(Duration::from_millis(20));
        tokio::time::timeout(Duration::from_secs(2), ctx.done())
            .await
            .expect("deadline should resolve done()");
        assert!(ctx.is_done());
    }

    #[test]
    fn test_locale_is_carried() {
        let ctx = Context::background().with_locale("zh-CN");
        assert_eq!(ctx.locale(), Some("zh-CN"));
        let child = ctx.with_timeout(Duration::from_secs(1));
        assert_eq!(child.locale(), Some("zh-CN"));
    }
}
