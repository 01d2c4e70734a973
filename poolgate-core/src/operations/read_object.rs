use crate::{GateError, Result, StoreSession};
use bytes::Bytes;
use futures::Stream;

pub const READ_CHUNK_SIZE: usize = 8 * 1024;

#[derive(Clone)]
pub struct ReadObjectOperation {
    chunk_size: usize,
}

impl Default for ReadObjectOperation {
    fn default() -> Self {
        Self::new(READ_CHUNK_SIZE)
    }
}

impl ReadObjectOperation {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
        }
    }

    /// Streams `size` bytes of `key`, one read in flight at a time. The session (and with
    /// it the slot) is held until the stream finishes or is dropped.
    ///
    /// An empty read before `size` bytes arrived ends the stream with
    /// [`GateError::ShortRead`].
    pub fn stream(
        &self,
        mut session: StoreSession,
        key: String,
        size: u64,
    ) -> impl Stream<Item = Result<Bytes>> + Send + 'static {
        let chunk_size = self.chunk_size as u64;
        async_stream::try_stream! {
            let mut offset = 0u64;
            while offset < size {
                let want = (size - offset).min(chunk_size) as usize;
                let data = session.read(&key, want, offset).await?;
                if data.is_empty() {
                    Err(GateError::ShortRead {
                        key: key.clone(),
                        expected: size - offset,
                    })?;
                }
                offset += data.len() as u64;
                yield data;
            }
        }
    }
}
