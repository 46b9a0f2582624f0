//! Cancellation and deadline scope for coordination-service calls

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::messages::{StoreError, StoreResponse};
use crate::coord::CoordError;

/// Bounds every blocking call made on behalf of one store operation
///
/// A call ends early when the store token or the caller's token is
/// cancelled, or when the deadline passes.
#[derive(Debug, Clone)]
pub struct CallScope {
    store: CancellationToken,
    caller: Option<CancellationToken>,
    deadline: Option<(Instant, Duration)>,
}

impl CallScope {
    pub fn new(store: CancellationToken, timeout: Option<Duration>) -> Self {
        Self {
            store,
            caller: None,
            deadline: timeout.map(|timeout| (Instant::now() + timeout, timeout)),
        }
    }

    pub fn with_caller(mut self, caller: CancellationToken) -> Self {
        self.caller = Some(caller);
        self
    }

    /// Run a coordination-service call inside the scope
    pub async fn run<T, F>(&self, call: F) -> StoreResponse<T>
    where
        F: Future<Output = Result<T, CoordError>>,
    {
        tokio::select! {
            biased;
            reason = self.interrupted() => Err(reason),
            result = call => result.map_err(StoreError::from),
        }
    }

    /// Sleep inside the scope
    pub async fn sleep(&self, duration: Duration) -> StoreResponse<()> {
        if duration.is_zero() {
            return Ok(());
        }
        self.run(async {
            tokio::time::sleep(duration).await;
            Ok(())
        })
        .await
    }

    /// Resolves with the reason once the scope is cancelled or expired
    async fn interrupted(&self) -> StoreError {
        let caller = async {
            match &self.caller {
                Some(token) => token.cancelled().await,
                None => std::future::pending().await,
            }
        };
        let deadline = async {
            match self.deadline {
                Some((at, timeout)) => {
                    tokio::time::sleep_until(at).await;
                    timeout
                }
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            _ = self.store.cancelled() => StoreError::Cancelled,
            _ = caller => StoreError::Cancelled,
            timeout = deadline => StoreError::DeadlineExceeded(timeout),
        }
    }
}
