use crate::bridge::BridgeSession;
use crate::slots::SlotLease;
use crate::store::{AioOp, AioReply, ObjectCursor, ObjectPool, ObjectStat, execute_blocking};
use crate::{GateError, Result};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulingMode {
    /// Store calls block a native thread for their whole duration.
    Blocking,
    /// Store calls are submitted asynchronously and only suspend the issuing slot.
    #[default]
    Async,
}

enum Driver {
    Blocking,
    Bridged(BridgeSession),
}

/// Store access for one request on one leased slot.
///
/// Calls are strictly sequential: every method takes `&mut self` and finishes its store
/// call before returning. Dropping the session closes the request's wake channel and
/// then hands the slot back.
pub struct StoreSession {
    driver: Driver,
    pool: Arc<dyn ObjectPool>,
    timeout: Duration,
    lease: SlotLease,
}

impl StoreSession {
    pub fn open(
        lease: SlotLease,
        pool: Arc<dyn ObjectPool>,
        mode: SchedulingMode,
        timeout: Duration,
    ) -> Self {
        let driver = match mode {
            SchedulingMode::Blocking => Driver::Blocking,
            SchedulingMode::Async => Driver::Bridged(lease.slot().bridge().open_session()),
        };

        Self {
            driver,
            pool,
            timeout,
            lease,
        }
    }

    pub async fn stat(&mut self, key: &str) -> Result<ObjectStat> {
        match self.call(AioOp::Stat { key: key.to_string() }).await? {
            AioReply::Stat(stat) => Ok(stat),
            other => Err(unexpected_reply("stat", &other)),
        }
    }

    pub async fn read(&mut self, key: &str, len: usize, offset: u64) -> Result<Bytes> {
        let op = AioOp::Read {
            key: key.to_string(),
            len,
            offset,
        };
        match self.call(op).await? {
            AioReply::Data(data) => Ok(data),
            other => Err(unexpected_reply("read", &other)),
        }
    }

    pub async fn write(&mut self, key: &str, data: Bytes, offset: u64) -> Result<()> {
        let op = AioOp::Write {
            key: key.to_string(),
            data,
            offset,
        };
        self.call(op).await.map(|_| ())
    }

    pub async fn remove(&mut self, key: &str) -> Result<()> {
        self.call(AioOp::Remove { key: key.to_string() }).await.map(|_| ())
    }

    /// Opens the pool's native listing cursor. Cursors walk the store synchronously, so
    /// they run on the blocking pool in both modes.
    pub async fn list_objects(&mut self) -> Result<ObjectCursor> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || pool.list_objects())
            .await
            .map_err(|error| GateError::Internal(error.to_string()))?
    }

    /// Advances a cursor opened by [`StoreSession::list_objects`].
    pub async fn next_entry(
        &mut self,
        cursor: ObjectCursor,
    ) -> (ObjectCursor, Option<Result<String>>) {
        let joined = tokio::task::spawn_blocking(move || {
            let mut cursor = cursor;
            let entry = cursor.next();
            (cursor, entry)
        })
        .await;

        match joined {
            Ok(advanced) => advanced,
            Err(error) => {
                let exhausted: ObjectCursor = Box::new(std::iter::empty());
                (
                    exhausted,
                    Some(Err(GateError::Internal(error.to_string()))),
                )
            }
        }
    }

    async fn call(&mut self, op: AioOp) -> Result<AioReply> {
        tracing::trace!(
            slot = self.lease.index(),
            op = op.name(),
            key = op.key(),
            "store call"
        );
        match &mut self.driver {
            Driver::Blocking => {
                let pool = self.pool.clone();
                tokio::task::spawn_blocking(move || execute_blocking(pool.as_ref(), op))
                    .await
                    .map_err(|error| GateError::Internal(error.to_string()))?
            }
            Driver::Bridged(bridge) => bridge.run(self.pool.as_ref(), op, self.timeout).await,
        }
    }
}

fn unexpected_reply(op: &str, reply: &AioReply) -> GateError {
    GateError::Internal(format!("unexpected reply to {}: {:?}", op, reply))
}
