use crate::store::ObjectStat;
use crate::{Result, StoreSession};
use futures::Stream;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedObject {
    pub key: String,
    pub stat: ObjectStat,
}

/// Walks a whole pool with its native cursor and stats every entry.
#[derive(Clone, Default)]
pub struct ListPoolOperation;

impl ListPoolOperation {
    pub fn new() -> Self {
        Self
    }

    /// Yields entries in cursor order as soon as each stat completes. Objects removed
    /// between listing and stat are skipped; any other failure ends the stream.
    pub fn stream(
        &self,
        mut session: StoreSession,
    ) -> impl Stream<Item = Result<ListedObject>> + Send + 'static {
        async_stream::try_stream! {
            let mut cursor = session.list_objects().await?;
            loop {
                let (advanced, entry) = session.next_entry(cursor).await;
                cursor = advanced;

                let Some(entry) = entry else {
                    break;
                };
                let key = entry?;

                let stat = match session.stat(&key).await {
                    Ok(stat) => stat,
                    Err(error) if error.is_not_found() => {
                        tracing::debug!(key = key.as_str(), "object vanished during listing");
                        continue;
                    }
                    Err(error) => Err(error)?,
                };

                yield ListedObject { key, stat };
            }
        }
    }
}
