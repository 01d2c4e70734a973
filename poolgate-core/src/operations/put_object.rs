use crate::{GateError, Result, StoreSession};
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use futures::stream::BoxStream;

pub const PUT_CHUNK_SIZE: usize = 32 * 1024;

#[derive(Clone)]
pub struct PutObjectOperation {
    chunk_size: usize,
}

pub struct PutObjectOperationRequest {
    pub key: String,
    pub body: BoxStream<'static, Result<Bytes>>,
    /// Declared body length; the body must deliver exactly this many bytes.
    pub declared_length: Option<u64>,
    /// Object was found by the preceding stat and has to go before the new content.
    pub replace_existing: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutObjectOperationOutcome {
    pub size_bytes: u64,
    pub chunks_written: usize,
    pub replaced: bool,
}

impl Default for PutObjectOperation {
    fn default() -> Self {
        Self::new(PUT_CHUNK_SIZE)
    }
}

impl PutObjectOperation {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
        }
    }

    /// Overwrite is emulated as remove-then-write, and a failed chunk leaves whatever was
    /// already written in place.
    pub async fn run(
        &self,
        session: &mut StoreSession,
        request: PutObjectOperationRequest,
    ) -> Result<PutObjectOperationOutcome> {
        let PutObjectOperationRequest {
            key,
            mut body,
            declared_length,
            replace_existing,
        } = request;

        if replace_existing {
            match session.remove(&key).await {
                Ok(()) => {}
                Err(error) if error.is_not_found() => {}
                Err(error) => return Err(error),
            }
        }

        let mut pending = BytesMut::new();
        let mut received = 0u64;
        let mut offset = 0u64;
        let mut chunks_written = 0usize;

        while let Some(data) = body.next().await {
            let data = data?;
            received += data.len() as u64;
            if let Some(declared) = declared_length
                && received > declared
            {
                return Err(GateError::Body(format!(
                    "body exceeds declared length {}",
                    declared
                )));
            }

            pending.extend_from_slice(&data);
            while pending.len() >= self.chunk_size {
                let chunk = pending.split_to(self.chunk_size).freeze();
                let chunk_len = chunk.len() as u64;
                session.write(&key, chunk, offset).await?;
                offset += chunk_len;
                chunks_written += 1;
            }
        }

        if let Some(declared) = declared_length
            && received < declared
        {
            return Err(GateError::Body(format!(
                "body ended after {} of {} bytes",
                received, declared
            )));
        }

        // The tail chunk; an empty body still has to create the object.
        if !pending.is_empty() || chunks_written == 0 {
            session.write(&key, pending.freeze(), offset).await?;
            chunks_written += 1;
        }

        tracing::debug!(
            key = key.as_str(),
            size_bytes = received,
            chunks_written,
            replaced = replace_existing,
            "stored object"
        );

        Ok(PutObjectOperationOutcome {
            size_bytes: received,
            chunks_written,
            replaced: replace_existing,
        })
    }
}
