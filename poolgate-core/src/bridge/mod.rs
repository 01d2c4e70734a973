//! Per-slot completion bridge.
//!
//! A slot issues at most one async store operation at a time. Every operation is stamped
//! with a fresh generation; the completion callback only wakes the slot when its stamp is
//! still the live generation, so completions that arrive after a timeout (or after the slot
//! moved on to another request) are dropped instead of waking the wrong waiter.

mod completion;

pub use completion::{AioCompletion, CompletionCallback};

use crate::store::{AioOp, AioReply, ObjectPool};
use crate::{GateError, Result};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;

pub struct CompletionBridge {
    shared: Arc<BridgeShared>,
}

struct BridgeShared {
    slot: usize,
    inner: Mutex<BridgeInner>,
}

struct BridgeInner {
    generation: u64,
    wake: Option<mpsc::UnboundedSender<()>>,
}

impl BridgeShared {
    fn lock(&self) -> MutexGuard<'_, BridgeInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl CompletionBridge {
    pub fn new(slot: usize) -> Self {
        Self {
            shared: Arc::new(BridgeShared {
                slot,
                inner: Mutex::new(BridgeInner {
                    generation: 0,
                    wake: None,
                }),
            }),
        }
    }

    pub fn slot(&self) -> usize {
        self.shared.slot
    }

    pub fn generation(&self) -> u64 {
        self.shared.lock().generation
    }

    /// Creates the wake channel for one request. The channel is closed when the returned
    /// session is dropped.
    pub fn open_session(&self) -> BridgeSession {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.shared.lock().wake = Some(sender);

        BridgeSession {
            shared: self.shared.clone(),
            receiver,
        }
    }
}

/// Completion token moved into the store callback. Firing consumes it.
struct CompletionToken {
    generation: u64,
    shared: Arc<BridgeShared>,
}

impl CompletionToken {
    fn fire(self) {
        let inner = self.shared.lock();
        if inner.generation != self.generation {
            tracing::debug!(
                slot = self.shared.slot,
                generation = self.generation,
                live_generation = inner.generation,
                "completion woke up too late, discarding"
            );
            return;
        }

        match inner.wake.as_ref() {
            Some(wake) => {
                if wake.send(()).is_err() {
                    tracing::warn!(
                        slot = self.shared.slot,
                        generation = self.generation,
                        "wake channel receiver is gone"
                    );
                }
            }
            None => tracing::debug!(
                slot = self.shared.slot,
                generation = self.generation,
                "completion arrived with no open request"
            ),
        }
    }
}

/// Waiter side of one in-flight operation.
pub struct PendingOperation {
    generation: u64,
    completion: AioCompletion,
}

impl PendingOperation {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn completion(&self) -> &AioCompletion {
        &self.completion
    }
}

/// One request's view of a slot's bridge: owns the read side of the wake channel.
pub struct BridgeSession {
    shared: Arc<BridgeShared>,
    receiver: mpsc::UnboundedReceiver<()>,
}

impl BridgeSession {
    /// Bumps the slot generation and allocates the store completion for the next call.
    pub fn begin_operation(&mut self, pool: &dyn ObjectPool) -> Result<PendingOperation> {
        let generation = {
            let mut inner = self.shared.lock();
            inner.generation += 1;
            inner.generation
        };

        // A wake sent right before an abandoned call gave up is still queued; nothing
        // stamped with an older generation can send once the bump above is visible.
        while self.receiver.try_recv().is_ok() {
            tracing::debug!(slot = self.shared.slot, "dropped wake left by an abandoned call");
        }

        let token = CompletionToken {
            generation,
            shared: self.shared.clone(),
        };

        let completion = pool
            .create_completion(Box::new(move || token.fire()))
            .map_err(|error| GateError::CompletionAlloc {
                slot: self.shared.slot,
                reason: error.to_string(),
            })?;

        Ok(PendingOperation {
            generation,
            completion,
        })
    }

    /// Submits the call and suspends this slot until it completes or `timeout` elapses.
    pub async fn submit_and_wait<F>(
        &mut self,
        pending: PendingOperation,
        submit: F,
        timeout: Duration,
    ) -> Result<AioReply>
    where
        F: FnOnce(&AioCompletion) -> Result<()>,
    {
        let PendingOperation {
            generation,
            completion,
        } = pending;

        if let Err(error) = submit(&completion) {
            self.abandon(generation);
            completion.release();
            return Err(error);
        }

        match tokio::time::timeout(timeout, self.receiver.recv()).await {
            Err(_) => {
                self.abandon(generation);
                completion.release();
                tracing::warn!(
                    slot = self.shared.slot,
                    generation,
                    ?timeout,
                    "store operation timed out"
                );
                Err(GateError::Timeout(timeout))
            }
            Ok(None) => {
                self.abandon(generation);
                completion.release();
                Err(GateError::WakeChannelClosed(self.shared.slot))
            }
            Ok(Some(())) => {
                let outcome = completion.take_outcome();
                completion.release();
                outcome.unwrap_or_else(|| {
                    Err(GateError::Internal(format!(
                        "slot {} woken before generation {} completed",
                        self.shared.slot, generation
                    )))
                })
            }
        }
    }

    /// Issues `op` on `pool` through this bridge.
    pub async fn run(
        &mut self,
        pool: &dyn ObjectPool,
        op: AioOp,
        timeout: Duration,
    ) -> Result<AioReply> {
        let pending = self.begin_operation(pool)?;
        self.submit_and_wait(pending, |completion| pool.aio_submit(op, completion), timeout)
            .await
    }

    fn abandon(&self, generation: u64) {
        let mut inner = self.shared.lock();
        if inner.generation == generation {
            inner.generation += 1;
        }
    }
}

impl Drop for BridgeSession {
    fn drop(&mut self) {
        self.shared.lock().wake = None;
        self.receiver.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ObjectCursor, ObjectStat};
    use bytes::Bytes;

    /// Pool that parks completions so tests decide when (and whether) they fire.
    #[derive(Default)]
    struct ParkedPool {
        parked: Mutex<Vec<AioCompletion>>,
        fail_alloc: bool,
        fail_submit: bool,
    }

    impl ParkedPool {
        fn fire_oldest(&self, outcome: Result<AioReply>) {
            let completion = self.parked.lock().unwrap().remove(0);
            completion.complete(outcome);
        }
    }

    impl ObjectPool for ParkedPool {
        fn name(&self) -> &str {
            "parked"
        }

        fn stat(&self, key: &str) -> Result<ObjectStat> {
            Err(GateError::ObjectNotFound(key.to_string()))
        }

        fn read(&self, key: &str, _len: usize, _offset: u64) -> Result<Bytes> {
            Err(GateError::ObjectNotFound(key.to_string()))
        }

        fn write(&self, _key: &str, _data: &[u8], _offset: u64) -> Result<()> {
            Ok(())
        }

        fn remove(&self, key: &str) -> Result<()> {
            Err(GateError::ObjectNotFound(key.to_string()))
        }

        fn list_objects(&self) -> Result<ObjectCursor> {
            Ok(Box::new(std::iter::empty()))
        }

        fn create_completion(&self, callback: CompletionCallback) -> Result<AioCompletion> {
            if self.fail_alloc {
                return Err(GateError::Store("out of completions".to_string()));
            }
            Ok(AioCompletion::new(callback))
        }

        fn aio_submit(&self, _op: AioOp, completion: &AioCompletion) -> Result<()> {
            if self.fail_submit {
                return Err(GateError::Store("submission rejected".to_string()));
            }
            self.parked.lock().unwrap().push(completion.clone());
            Ok(())
        }
    }

    fn stat_op() -> AioOp {
        AioOp::Stat {
            key: "a".to_string(),
        }
    }

    #[test]
    fn stale_completion_never_signals() {
        let bridge = CompletionBridge::new(3);
        let pool = ParkedPool::default();
        let mut session = bridge.open_session();

        let first = session.begin_operation(&pool).unwrap();
        pool.aio_submit(stat_op(), first.completion()).unwrap();
        let second = session.begin_operation(&pool).unwrap();
        assert_eq!(second.generation(), first.generation() + 1);

        pool.fire_oldest(Ok(AioReply::Done));
        assert!(session.receiver.try_recv().is_err());
        assert_eq!(bridge.generation(), second.generation());
    }

    #[tokio::test]
    async fn wakes_on_current_completion() {
        let bridge = CompletionBridge::new(0);
        let pool = Arc::new(ParkedPool::default());
        let mut session = bridge.open_session();

        let firing = pool.clone();
        tokio::spawn(async move {
            loop {
                if !firing.parked.lock().unwrap().is_empty() {
                    break;
                }
                tokio::task::yield_now().await;
            }
            std::thread::spawn(move || {
                firing.fire_oldest(Ok(AioReply::Stat(ObjectStat { size: 7, mtime: 11 })))
            });
        });

        let reply = session
            .run(pool.as_ref(), stat_op(), Duration::from_secs(5))
            .await
            .unwrap();
        assert!(matches!(reply, AioReply::Stat(ObjectStat { size: 7, mtime: 11 })));
    }

    #[tokio::test]
    async fn timeout_releases_once_and_discards_late_completion() {
        let bridge = CompletionBridge::new(1);
        let pool = ParkedPool::default();
        let mut session = bridge.open_session();
        let baseline = Arc::strong_count(&bridge.shared);

        let error = session
            .run(&pool, stat_op(), Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(error, GateError::Timeout(_)));

        // Only the store still holds the completion, and through it the token.
        let parked = pool.parked.lock().unwrap()[0].clone();
        assert_eq!(parked.handle_count(), 2);
        assert_eq!(Arc::strong_count(&bridge.shared), baseline + 1);
        drop(parked);

        pool.fire_oldest(Ok(AioReply::Done));
        assert!(session.receiver.try_recv().is_err());
        assert_eq!(Arc::strong_count(&bridge.shared), baseline);
    }

    #[tokio::test]
    async fn wake_sent_before_abandon_does_not_leak_into_next_call() {
        let bridge = CompletionBridge::new(2);
        let pool = ParkedPool::default();
        let mut session = bridge.open_session();

        let pending = session.begin_operation(&pool).unwrap();
        pool.aio_submit(stat_op(), pending.completion()).unwrap();
        pool.fire_oldest(Ok(AioReply::Done));
        session.abandon(pending.generation());
        drop(pending);

        let next = session.begin_operation(&pool).unwrap();
        assert!(session.receiver.try_recv().is_err());
        assert!(!next.completion().is_complete());
    }

    #[tokio::test]
    async fn submission_failure_is_reported() {
        let bridge = CompletionBridge::new(0);
        let pool = ParkedPool {
            fail_submit: true,
            ..Default::default()
        };
        let mut session = bridge.open_session();

        let error = session
            .run(&pool, stat_op(), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(error, GateError::Store(_)));
        assert!(pool.parked.lock().unwrap().is_empty());
    }

    #[test]
    fn allocation_failure_yields_no_token() {
        let bridge = CompletionBridge::new(5);
        let pool = ParkedPool {
            fail_alloc: true,
            ..Default::default()
        };
        let baseline = Arc::strong_count(&bridge.shared);
        let mut session = bridge.open_session();

        let error = session.begin_operation(&pool).err().unwrap();
        assert!(matches!(error, GateError::CompletionAlloc { slot: 5, .. }));
        assert_eq!(Arc::strong_count(&bridge.shared), baseline + 1);
    }

    #[test]
    fn closing_session_detaches_wake_channel() {
        let bridge = CompletionBridge::new(0);
        let pool = ParkedPool::default();
        let mut session = bridge.open_session();
        let pending = session.begin_operation(&pool).unwrap();
        pool.aio_submit(stat_op(), pending.completion()).unwrap();
        drop(session);

        assert!(bridge.shared.lock().wake.is_none());
        pool.fire_oldest(Ok(AioReply::Done));
    }
}
