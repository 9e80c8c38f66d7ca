//! Seams between the worker loop and the browser automation it drives.

use crate::job::JobPayload;
use tracing::{info, warn};

/// Creates and tears down the long-lived session a worker owns.
///
/// `acquire` is called exactly once when the worker starts and `release`
/// exactly once when it stops.
pub trait SessionProvider {
    type Session;

    fn acquire(&mut self) -> anyhow::Result<Self::Session>;

    fn release(&mut self, session: Self::Session) -> anyhow::Result<()>;
}

/// The traffic analysis run for each job.
///
/// Opaque to the pool: an `Err` or a panic becomes a failed outcome for that
/// one job and the worker keeps serving.
pub trait Analyzer {
    type Session;

    fn analyze(
        &self,
        session: &mut Self::Session,
        payload: &JobPayload,
    ) -> anyhow::Result<serde_json::Value>;
}

/// Owns an acquired session and hands it back to its provider exactly once,
/// either through [`release`](Self::release) or on drop.
pub struct SessionGuard<'a, P: SessionProvider> {
    provider: &'a mut P,
    session: Option<P::Session>,
    worker_id: usize,
}

impl<'a, P: SessionProvider> SessionGuard<'a, P> {
    pub fn new(provider: &'a mut P, session: P::Session, worker_id: usize) -> Self {
        Self {
            provider,
            session: Some(session),
            worker_id,
        }
    }

    /// Borrow the live session.
    ///
    /// # Panics
    ///
    /// Never in practice: the session is only taken out by `release`, which
    /// consumes the guard.
    pub fn session_mut(&mut self) -> &mut P::Session {
        self.session
            .as_mut()
            .expect("session is present until the guard is released")
    }

    /// Release the session now. Failures are logged, never returned.
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        match self.provider.release(session) {
            Ok(()) => info!(worker_id = self.worker_id, "Browser session released"),
            Err(e) => warn!(
                worker_id = self.worker_id,
                error = format!("{:#}", e),
                "Browser session cleanup completed with errors"
            ),
        }
    }
}

impl<P: SessionProvider> Drop for SessionGuard<'_, P> {
    fn drop(&mut self) {
        self.release_inner();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    #[derive(Default)]
    struct Counting {
        released: Rc<Cell<usize>>,
        fail_release: bool,
    }

    impl SessionProvider for Counting {
        type Session = u32;

        fn acquire(&mut self) -> anyhow::Result<u32> {
            Ok(7)
        }

        fn release(&mut self, _session: u32) -> anyhow::Result<()> {
            self.released.set(self.released.get() + 1);
            if self.fail_release {
                anyhow::bail!("browser already gone");
            }
            Ok(())
        }
    }

    #[test]
    fn test_explicit_release_happens_once() {
        let mut provider = Counting::default();
        let released = provider.released.clone();
        let session = provider.acquire().unwrap();

        let mut guard = SessionGuard::new(&mut provider, session, 0);
        *guard.session_mut() += 1;
        guard.release();

        assert_eq!(released.get(), 1);
    }

    #[test]
    fn test_drop_releases() {
        let mut provider = Counting::default();
        let released = provider.released.clone();
        {
            let _guard = SessionGuard::new(&mut provider, 1, 0);
        }
        assert_eq!(released.get(), 1);
    }

    #[test]
    fn test_release_failure_is_swallowed() {
        let mut provider = Counting {
            fail_release: true,
            ..Default::default()
        };
        let released = provider.released.clone();
        SessionGuard::new(&mut provider, 1, 0).release();
        assert_eq!(released.get(), 1);
    }
}
