use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use tokio::sync::Barrier;

use crate::error::{LibError, Result};

/// Pause point for lining up concurrent subgroup updates.
///
/// A disabled rendezvous (the default everywhere in production wiring) is a
/// no-op carrying no synchronization state. An enabled one makes each
/// participating transaction stop right after its first lock acquisition
/// until `parties` transactions have reached the same point, which is how the
/// contention scenarios over overlapping row sets are reproduced
/// deterministically. Injected explicitly per call; there is no global
/// registry to configure.
///
/// Cloning shares the underlying barrier, so every participant must be given
/// a clone of the same value.
#[derive(Debug, Clone, Default)]
pub struct Rendezvous {
    inner: Option<Arc<RendezvousInner>>,
}

#[derive(Debug)]
struct RendezvousInner {
    barrier: Barrier,
    parties: usize,
    timeout: Duration,
}

impl Rendezvous {
    pub fn disabled() -> Self {
        Self { inner: None }
    }

    /// Block each participant after its first lock until `parties` arrive,
    /// failing the enclosing transaction if the barrier is not reached
    /// within `timeout`.
    pub fn after_first_lock(parties: usize, timeout: Duration) -> Self {
        Self {
            inner: Some(Arc::new(RendezvousInner {
                barrier: Barrier::new(parties),
                parties,
                timeout,
            })),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    pub(crate) async fn wait(&self) -> Result<()> {
        let Some(inner) = &self.inner else {
            return Ok(());
        };

        tokio::time::timeout(inner.timeout, inner.barrier.wait())
            .await
            .map(|_| ())
            .map_err(|_| {
                LibError::unknown_with_code(
                    "rendezvous_timeout",
                    "Rendezvous timed out",
                    anyhow!(
                        "not all {} parties reached the rendezvous within {:?}",
                        inner.parties,
                        inner.timeout
                    ),
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_rendezvous_is_a_noop() {
        let rendezvous = Rendezvous::disabled();
        assert!(!rendezvous.is_enabled());
        rendezvous.wait().await.expect("no-op wait should succeed");
    }

    #[tokio::test]
    async fn all_parties_pass_once_assembled() {
        let rendezvous = Rendezvous::after_first_lock(2, Duration::from_secs(5));
        let other = rendezvous.clone();

        let waiter = tokio::spawn(async move { other.wait().await });
        rendezvous.wait().await.expect("wait should succeed");
        waiter
            .await
            .expect("task should not panic")
            .expect("wait should succeed");
    }

    #[tokio::test]
    async fn missing_party_times_out() {
        let rendezvous = Rendezvous::after_first_lock(2, Duration::from_millis(20));
        let err = rendezvous.wait().await.expect_err("lone party should fail");
        assert_eq!(err.code, "rendezvous_timeout");
    }
}
