//! Streaming `207 Multi-Status` documents.
//!
//! The frame is opened once, every entry goes out as its own body chunk as soon as it is
//! known, and the frame is closed after the last one. Only one entry is held at a time.

use crate::server::mime::guess_content_type;
use crate::server::util::{encode_path, format_http_date, xml_escape};
use axum::{
    body::Body,
    http::{HeaderValue, StatusCode, header},
    response::Response,
};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use poolgate_core::{ListedObject, ObjectStat, Result};

const MULTISTATUS_OPEN: &str =
    "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<D:multistatus xmlns:D=\"DAV:\">\n";
const MULTISTATUS_CLOSE: &str = "</D:multistatus>\n";

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PropEntry {
    href: String,
    size: u64,
    mtime: i64,
    content_type: Option<&'static str>,
    collection: bool,
}

impl PropEntry {
    /// The mount root itself.
    pub(crate) fn collection(prefix: &str) -> Self {
        Self {
            href: format!("{}/", encode_path(prefix)),
            size: 0,
            mtime: 0,
            content_type: None,
            collection: true,
        }
    }

    pub(crate) fn object(prefix: &str, key: &str, stat: ObjectStat) -> Self {
        Self {
            href: format!("{}/{}", encode_path(prefix), encode_path(key)),
            size: stat.size,
            mtime: stat.mtime,
            content_type: guess_content_type(key),
            collection: false,
        }
    }

    pub(crate) fn listed(prefix: &str, listed: ListedObject) -> Self {
        Self::object(prefix, &listed.key, listed.stat)
    }

    fn render(&self) -> String {
        let mut xml = String::with_capacity(256);
        xml.push_str("<D:response>");
        push_tag(&mut xml, "D:href", &self.href);
        xml.push_str("<D:propstat><D:prop>");

        if self.collection {
            xml.push_str("<D:resourcetype><D:collection/></D:resourcetype>");
        } else {
            xml.push_str("<D:resourcetype/>");
            push_tag(&mut xml, "D:getcontentlength", &self.size.to_string());
            push_tag(&mut xml, "D:getlastmodified", &format_http_date(self.mtime));
            if let Some(content_type) = self.content_type {
                push_tag(&mut xml, "D:getcontenttype", content_type);
            }
        }

        xml.push_str("</D:prop><D:status>HTTP/1.1 200 OK</D:status></D:propstat>");
        xml.push_str("</D:response>\n");
        xml
    }
}

/// Body chunks of a multi-status document: the opening frame, one chunk per entry in
/// stream order, then the closing frame. An entry error ends the body early.
pub(crate) fn render_stream<S>(entries: S) -> impl Stream<Item = Result<Bytes>> + Send + 'static
where
    S: Stream<Item = Result<PropEntry>> + Send + 'static,
{
    async_stream::try_stream! {
        yield Bytes::from_static(MULTISTATUS_OPEN.as_bytes());

        let mut entries = Box::pin(entries);
        while let Some(entry) = entries.next().await {
            yield Bytes::from(entry?.render());
        }

        yield Bytes::from_static(MULTISTATUS_CLOSE.as_bytes());
    }
}

pub(crate) fn multistatus_response<S>(entries: S) -> Response
where
    S: Stream<Item = Result<PropEntry>> + Send + 'static,
{
    let mut response = Response::new(Body::from_stream(render_stream(entries)));
    *response.status_mut() = StatusCode::MULTI_STATUS;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/xml; charset=\"utf-8\""),
    );
    response
}

fn push_tag(xml: &mut String, name: &str, value: &str) {
    xml.push('<');
    xml.push_str(name);
    xml.push('>');
    xml.push_str(xml_escape(value).as_str());
    xml.push_str("</");
    xml.push_str(name);
    xml.push('>');
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use poolgate_core::GateError;

    fn stat(size: u64) -> ObjectStat {
        ObjectStat {
            size,
            mtime: 784111777,
        }
    }

    #[tokio::test]
    async fn emits_one_chunk_per_entry_between_frames() {
        let entries = stream::iter(vec![
            Ok(PropEntry::object("/files", "a.txt", stat(3))),
            Ok(PropEntry::object("/files", "dir/b c.png", stat(10))),
        ]);

        let chunks: Vec<Bytes> = render_stream(entries)
            .map(|chunk| chunk.unwrap())
            .collect()
            .await;

        assert_eq!(chunks.len(), 4);
        assert_eq!(chunks[0], Bytes::from_static(MULTISTATUS_OPEN.as_bytes()));
        assert_eq!(chunks[3], Bytes::from_static(MULTISTATUS_CLOSE.as_bytes()));

        let first = String::from_utf8(chunks[1].to_vec()).unwrap();
        assert!(first.contains("<D:href>/files/a.txt</D:href>"));
        assert!(first.contains("<D:getcontentlength>3</D:getcontentlength>"));
        assert!(first.contains("<D:getcontenttype>text/plain</D:getcontenttype>"));
        assert!(
            first.contains("<D:getlastmodified>Sun, 06 Nov 1994 08:49:37 GMT</D:getlastmodified>")
        );

        let second = String::from_utf8(chunks[2].to_vec()).unwrap();
        assert!(second.contains("<D:href>/files/dir/b%20c.png</D:href>"));
    }

    #[test]
    fn collection_entry_has_no_content_props() {
        let xml = PropEntry::collection("/files").render();
        assert!(xml.contains("<D:href>/files/</D:href>"));
        assert!(xml.contains("<D:collection/>"));
        assert!(!xml.contains("getcontentlength"));
    }

    #[tokio::test]
    async fn entry_error_stops_the_document() {
        let entries = stream::iter(vec![
            Ok(PropEntry::object("", "a", stat(1))),
            Err(GateError::Store("cursor broke".to_string())),
        ]);

        let results: Vec<Result<Bytes>> = render_stream(entries).collect().await;
        assert_eq!(results.len(), 3);
        assert!(results[2].is_err());
    }

    #[test]
    fn hrefs_escape_xml_metacharacters() {
        let xml = PropEntry::object("", "a&b", stat(1)).render();
        assert!(xml.contains("<D:href>/a%26b</D:href>"));
        assert!(!xml.contains("a&b"));
    }
}
