//! Poolgate Core - completion bridge and store plumbing for the poolgate gateway
//!
//! Requests run on a fixed set of slots. Store calls either block a native thread or go
//! through the slot's completion bridge, which suspends only that slot and discards
//! completions that arrive after their waiter gave up.

pub mod bridge;
pub mod error;
pub mod operations;
pub mod session;
pub mod slots;
pub mod store;

pub use bridge::{AioCompletion, BridgeSession, CompletionBridge, CompletionCallback, PendingOperation};
pub use error::{GateError, Result};
pub use operations::*;
pub use session::{SchedulingMode, StoreSession};
pub use slots::{Slot, SlotLease, SlotPool};
pub use store::{
    AioDispatcher, AioOp, DEFAULT_AIO_WORKERS, AioReply, FsCluster, MemoryCluster, ObjectCursor, ObjectPool,
    ObjectStat, StoreCluster, execute_blocking, validate_object_key, validate_pool_name,
};
