//! Request-scoped operation context.

use tokio_util::sync::CancellationToken;
use warden_core::error::{WardenError, WardenResult};

/// Who is acting and whether the caller still wants the result.
///
/// Passed explicitly into every service operation. The actor id ends up in
/// audit fields; the token lets the caller abandon in-flight reads.
#[derive(Debug, Clone, Default)]
pub struct OperationContext {
    pub actor_id: Option<String>,
    pub cancel: CancellationToken,
}

impl OperationContext {
    /// Context for internal callers (seeding, maintenance) with no actor.
    pub fn system() -> Self {
        Self::default()
    }

    pub fn for_user(actor_id: impl Into<String>) -> Self {
        Self {
            actor_id: Some(actor_id.into()),
            cancel: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn actor(&self) -> Option<&str> {
        self.actor_id.as_deref()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Await a read unless the caller gives up first. A cancelled read
    /// leaves nothing behind.
    pub async fn cancellable<T>(
        &self,
        operation: impl Future<Output = WardenResult<T>>,
    ) -> WardenResult<T> {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(WardenError::Cancelled),
            result = operation => result,
        }
    }

    /// Last exit before an irreversible write. Once a commit is issued the
    /// token is no longer consulted.
    pub fn ensure_not_cancelled(&self) -> WardenResult<()> {
        if self.is_cancelled() {
            Err(WardenError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancelled_reads_short_circuit() {
        let ctx = OperationContext::for_user("admin");
        ctx.cancel.cancel();
        let result = ctx.cancellable(std::future::pending::<WardenResult<()>>()).await;
        assert!(matches!(result, Err(WardenError::Cancelled)));
        assert!(ctx.ensure_not_cancelled().is_err());
    }

    #[tokio::test]
    async fn live_context_passes_through() {
        let ctx = OperationContext::system();
        assert_eq!(ctx.cancellable(async { Ok(7) }).await.unwrap(), 7);
        assert!(ctx.ensure_not_cancelled().is_ok());
        assert!(ctx.actor().is_none());
    }
}
