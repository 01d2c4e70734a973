use crate::mount::{Mount, MountPermissions, ResolvedPath};
use crate::server::AppContext;
use crate::server::error::{DavError, DavResult};
use crate::server::mime::guess_content_type;
use crate::server::multistatus::{PropEntry, multistatus_response};
use crate::server::util::{decode_path, format_http_date, parse_http_date};
use axum::{
    body::Body,
    extract::{Request, State},
    http::{HeaderMap, HeaderValue, Method, StatusCode, header},
    response::{IntoResponse, Response},
};
use futures::{StreamExt, TryStreamExt, stream};
use poolgate_core::{
    GateError, ObjectStat, PutObjectOperationRequest, StoreSession, validate_object_key,
};
use std::sync::Arc;

const MAX_PATH_LEN: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DavMethod {
    Options,
    Get,
    Head,
    Put,
    Delete,
    Mkcol,
    Propfind,
}

impl DavMethod {
    fn parse(method: &Method) -> Option<Self> {
        match method.as_str() {
            "OPTIONS" => Some(Self::Options),
            "GET" => Some(Self::Get),
            "HEAD" => Some(Self::Head),
            "PUT" => Some(Self::Put),
            "DELETE" => Some(Self::Delete),
            "MKCOL" => Some(Self::Mkcol),
            "PROPFIND" => Some(Self::Propfind),
            _ => None,
        }
    }

    fn permitted(self, permissions: MountPermissions) -> bool {
        match self {
            Self::Put => permissions.put,
            Self::Delete => permissions.delete,
            Self::Mkcol => permissions.mkcol,
            Self::Propfind => permissions.propfind,
            Self::Options | Self::Get | Self::Head => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Depth {
    /// The collection itself.
    Zero,
    /// The collection's members.
    Members,
}

fn parse_depth(headers: &HeaderMap) -> DavResult<Depth> {
    let Some(value) = headers.get("depth") else {
        return Ok(Depth::Zero);
    };

    let value = value
        .to_str()
        .map_err(|_| DavError::bad_request("invalid Depth header"))?
        .trim();

    if value.eq_ignore_ascii_case("infinity") {
        return Ok(Depth::Members);
    }

    match value.parse::<u64>() {
        Ok(0) => Ok(Depth::Zero),
        Ok(_) => Ok(Depth::Members),
        Err(_) => Err(DavError::bad_request(format!(
            "invalid Depth header: {}",
            value
        ))),
    }
}

pub(crate) async fn handle_request(
    State(context): State<Arc<AppContext>>,
    request: Request,
) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    match serve(&context, request).await {
        Ok(response) => response,
        Err(error) => {
            if error.status().is_server_error() {
                tracing::warn!(
                    method = %method,
                    path = path.as_str(),
                    status = error.status().as_u16(),
                    "request failed: {}",
                    error.message()
                );
            } else {
                tracing::debug!(
                    method = %method,
                    path = path.as_str(),
                    status = error.status().as_u16(),
                    "request rejected: {}",
                    error.message()
                );
            }
            error.into_response()
        }
    }
}

async fn serve(context: &AppContext, request: Request) -> DavResult<Response> {
    let (parts, body) = request.into_parts();

    let raw_path = parts.uri.path();
    if raw_path.is_empty() {
        return Err(DavError::forbidden("empty path"));
    }
    let path = decode_path(raw_path).ok_or_else(|| DavError::bad_request("malformed path"))?;
    if path.len() > MAX_PATH_LEN {
        return Err(DavError::forbidden("path too long"));
    }

    let ResolvedPath { mount, key } = context
        .mounts
        .resolve(&path)
        .ok_or_else(|| DavError::not_found(format!("no mount for {}", path)))?;

    let permissions = mount.permissions();
    let method = DavMethod::parse(&parts.method)
        .ok_or_else(|| DavError::method_not_allowed(permissions.allow_header()))?;

    if method == DavMethod::Options {
        return Ok(options_response(permissions));
    }

    let Some(key) = key else {
        if method == DavMethod::Propfind && permissions.propfind {
            let depth = parse_depth(&parts.headers)?;
            drain_body(body).await?;
            return propfind_root(context, &mount, depth).await;
        }
        return Err(DavError::method_not_allowed(permissions.allow_header()));
    };

    if !method.permitted(permissions) {
        return Err(DavError::method_not_allowed(permissions.allow_header()));
    }

    if method == DavMethod::Mkcol {
        context
            .create_pool_operation
            .run(mount.cluster(), key.trim_end_matches('/'))
            .await?;
        return Ok(StatusCode::CREATED.into_response());
    }

    validate_object_key(&key)?;
    let mut session = open_session(context, &mount).await?;

    let stat = match session.stat(&key).await {
        Ok(stat) => Some(stat),
        Err(error) if error.is_not_found() => None,
        Err(error) => return Err(DavError::internal(error.to_string())),
    };

    match (method, stat) {
        (DavMethod::Put, stat) => {
            put_object(context, &mut session, key, stat.is_some(), &parts.headers, body).await
        }
        (_, None) => Err(DavError::not_found(format!("object not found: {}", key))),
        (DavMethod::Delete, Some(_)) => {
            session
                .remove(&key)
                .await
                .map_err(|error| DavError::forbidden(error.to_string()))?;
            Ok(StatusCode::OK.into_response())
        }
        (DavMethod::Propfind, Some(stat)) => {
            drain_body(body).await?;
            let entry = PropEntry::object(mount.prefix(), &key, stat);
            Ok(multistatus_response(stream::iter([Ok(entry)])))
        }
        (DavMethod::Get | DavMethod::Head, Some(stat)) => Ok(object_response(
            context,
            session,
            key,
            stat,
            method == DavMethod::Head,
            &parts.headers,
        )),
        (DavMethod::Options | DavMethod::Mkcol, Some(_)) => {
            Err(DavError::method_not_allowed(permissions.allow_header()))
        }
    }
}

async fn open_session(context: &AppContext, mount: &Mount) -> DavResult<StoreSession> {
    let lease = context.slots.acquire().await?;
    let pool = mount.handle_for(lease.index());
    Ok(StoreSession::open(
        lease,
        pool,
        context.mode,
        mount.timeout(),
    ))
}

fn options_response(permissions: MountPermissions) -> Response {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::OK;
    response
        .headers_mut()
        .insert("dav", HeaderValue::from_static("1"));
    if let Ok(value) = HeaderValue::from_str(&permissions.allow_header()) {
        response.headers_mut().insert(header::ALLOW, value);
    }
    response
}

async fn propfind_root(context: &AppContext, mount: &Mount, depth: Depth) -> DavResult<Response> {
    match depth {
        Depth::Zero => {
            let entry = PropEntry::collection(mount.prefix());
            Ok(multistatus_response(stream::iter([Ok(entry)])))
        }
        Depth::Members => {
            let session = open_session(context, mount).await?;
            let prefix = mount.prefix().to_string();
            let entries = context
                .list_pool_operation
                .stream(session)
                .map_ok(move |listed| PropEntry::listed(&prefix, listed))
                .inspect_err(|error| tracing::warn!("listing aborted: {}", error));
            Ok(multistatus_response(entries))
        }
    }
}

async fn put_object(
    context: &AppContext,
    session: &mut StoreSession,
    key: String,
    exists: bool,
    headers: &HeaderMap,
    body: Body,
) -> DavResult<Response> {
    let declared_length = headers
        .get(header::CONTENT_LENGTH)
        .map(|value| {
            value
                .to_str()
                .ok()
                .and_then(|raw| raw.trim().parse::<u64>().ok())
                .ok_or_else(|| DavError::bad_request("invalid Content-Length"))
        })
        .transpose()?;

    let body = body
        .into_data_stream()
        .map_err(|error| GateError::Body(error.to_string()))
        .boxed();

    context
        .put_object_operation
        .run(
            session,
            PutObjectOperationRequest {
                key,
                body,
                declared_length,
                replace_existing: exists,
            },
        )
        .await?;

    Ok(StatusCode::CREATED.into_response())
}

fn object_response(
    context: &AppContext,
    session: StoreSession,
    key: String,
    stat: ObjectStat,
    head_only: bool,
    headers: &HeaderMap,
) -> Response {
    let if_modified_since = headers
        .get(header::IF_MODIFIED_SINCE)
        .and_then(|value| value.to_str().ok())
        .and_then(parse_http_date);
    if let Some(since) = if_modified_since
        && stat.mtime <= since
    {
        let mut response = Response::new(Body::empty());
        *response.status_mut() = StatusCode::NOT_MODIFIED;
        return response;
    }

    let content_type = guess_content_type(&key).unwrap_or("application/octet-stream");

    let body = if head_only {
        Body::empty()
    } else {
        let logged_key = key.clone();
        Body::from_stream(
            context
                .read_object_operation
                .stream(session, key, stat.size)
                .inspect_err(move |error| {
                    tracing::warn!(key = logged_key.as_str(), "object read aborted: {}", error)
                }),
        )
    };

    let mut response = Response::new(body);
    *response.status_mut() = StatusCode::OK;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    if let Ok(value) = HeaderValue::from_str(&format_http_date(stat.mtime)) {
        response.headers_mut().insert(header::LAST_MODIFIED, value);
    }
    if let Ok(value) = HeaderValue::from_str(&stat.size.to_string()) {
        response.headers_mut().insert(header::CONTENT_LENGTH, value);
    }
    response
}

/// Reads and discards a request body.
async fn drain_body(body: Body) -> DavResult<()> {
    let mut data = body.into_data_stream();
    while let Some(chunk) = data.next().await {
        chunk.map_err(|error| DavError::bad_request(error.to_string()))?;
    }
    Ok(())
}
