//! Multi-step store operations. Each one drives its store calls strictly one after
//! another through a [`crate::StoreSession`].

pub mod create_pool;
pub mod list_pool;
pub mod put_object;
pub mod read_object;

pub use create_pool::CreatePoolOperation;
pub use list_pool::{ListPoolOperation, ListedObject};
pub use put_object::{
    PUT_CHUNK_SIZE, PutObjectOperation, PutObjectOperationOutcome, PutObjectOperationRequest,
};
pub use read_object::{READ_CHUNK_SIZE, ReadObjectOperation};
