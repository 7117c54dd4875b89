//! Object HTTP API
//!
//! Routes:
//!   POST   /objects                 upload raw body (?encrypt=true&filename=...)
//!   GET    /objects                 list catalogued objects
//!   GET    /objects/{id}/stream     range-aware playback (200/206/416)
//!   GET    /objects/{id}/download   full content as attachment
//!   GET    /objects/{id}/chunk      explicit window (?start=&end=)
//!   GET    /objects/{id}/info       size, type and range support
//!   GET    /objects/{id}/diagnose   blob id resolution report
//!   DELETE /objects/{id}            remove blob and record

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::{delete, get},
    Json, Router,
};
use futures::TryStreamExt;
use mvault_core::types::{ByteStream, ObjectRecord};
use mvault_core::{VaultError, VaultResult};
use mvault_transfer::{negotiate, unsatisfied_content_range, window, RangeOutcome, ACCEPT_RANGES};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::metrics::Outcome;
use crate::service::{MediaService, UploadRequest};

pub const UPLOADER_HEADER: &str = "x-uploader-id";

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

pub fn router(service: Arc<MediaService>) -> Router {
    Router::new()
        .route("/objects", get(list_objects).post(upload))
        .route("/objects/{id}", delete(delete_object))
        .route("/objects/{id}/stream", get(stream))
        .route("/objects/{id}/download", get(download))
        .route("/objects/{id}/chunk", get(chunk))
        .route("/objects/{id}/info", get(info))
        .route("/objects/{id}/diagnose", get(diagnose))
        .with_state(service)
}

/// Uniform error body
#[derive(Debug, Serialize)]
struct ErrorEnvelope {
    timestamp: u64,
    status: u16,
    error: &'static str,
    message: String,
    path: String,
}

/// A `VaultError` bound to the request path it occurred on
pub struct ApiError {
    error: VaultError,
    path: String,
}

impl ApiError {
    fn at(uri: &Uri) -> impl FnOnce(VaultError) -> ApiError + '_ {
        move |error| ApiError {
            error,
            path: uri.path().to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.error.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            tracing::error!(path = %self.path, status = status.as_u16(), "request failed: {:#}", self.error);
        } else {
            tracing::debug!(path = %self.path, status = status.as_u16(), "request rejected: {}", self.error);
        }

        let envelope = ErrorEnvelope {
            timestamp: unix_now(),
            status: status.as_u16(),
            error: self.error.kind(),
            message: self.error.client_message(),
            path: self.path,
        };
        let mut res = (status, Json(envelope)).into_response();
        if let VaultError::RangeNotSatisfiable { total } = &self.error {
            if let Ok(v) = HeaderValue::from_str(&unsatisfied_content_range(*total)) {
                res.headers_mut().insert(header::CONTENT_RANGE, v);
            }
        }
        res
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// Record the outcome of a read request, then bind errors to the path.
fn observe<T>(svc: &MediaService, uri: &Uri, result: VaultResult<T>) -> ApiResult<T> {
    if let Err(e) = &result {
        svc.metrics().request(match e {
            VaultError::RangeNotSatisfiable { .. } => Outcome::NotSatisfiable,
            VaultError::ResourceNotFound(_) => Outcome::NotFound,
            _ => Outcome::Error,
        });
    }
    result.map_err(ApiError::at(uri))
}

#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    #[serde(default)]
    encrypt: bool,
    filename: Option<String>,
}

async fn upload(
    State(svc): State<Arc<MediaService>>,
    uri: Uri,
    Query(query): Query<UploadQuery>,
    headers: HeaderMap,
    body: Body,
) -> ApiResult<(StatusCode, Json<ObjectRecord>)> {
    let content_type = header_str(&headers, header::CONTENT_TYPE.as_str())
        .unwrap_or(DEFAULT_CONTENT_TYPE)
        .to_string();
    let uploader_id = header_str(&headers, UPLOADER_HEADER)
        .unwrap_or("anonymous")
        .to_string();
    let filename = query
        .filename
        .filter(|f| !f.trim().is_empty())
        .unwrap_or_else(|| "upload.bin".to_string());

    let body: ByteStream = Box::pin(body.into_data_stream().map_err(std::io::Error::other));
    let record = svc
        .upload(
            body,
            UploadRequest {
                filename,
                content_type,
                uploader_id,
                encrypt: query.encrypt,
            },
        )
        .await
        .map_err(ApiError::at(&uri))?;
    Ok((StatusCode::CREATED, Json(record)))
}

async fn list_objects(State(svc): State<Arc<MediaService>>) -> Json<Vec<ObjectRecord>> {
    Json(svc.list().await)
}

/// Range-aware playback endpoint.
async fn stream(
    State(svc): State<Arc<MediaService>>,
    Path(id): Path<String>,
    uri: Uri,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let result = async {
        let record = svc.get(&id).await?;
        // a non-ASCII Range header is unusable, not absent
        let range = headers
            .get(header::RANGE)
            .map(|v| v.to_str().unwrap_or_default());
        let outcome = negotiate(range, record.metadata.size)?;
        let res = serve(&svc, &record, outcome, true).await?;
        svc.record_view(&id).await;
        Ok::<_, VaultError>(res)
    }
    .await;
    observe(&svc, &uri, result)
}

async fn download(
    State(svc): State<Arc<MediaService>>,
    Path(id): Path<String>,
    uri: Uri,
) -> ApiResult<Response> {
    let result = async {
        let record = svc.get(&id).await?;
        let outcome = RangeOutcome::Full {
            total: record.metadata.size,
        };
        let mut res = serve(&svc, &record, outcome, false).await?;
        let disposition = format!(
            "attachment; filename=\"{}\"",
            sanitize_filename(&record.metadata.original_filename)
        );
        if let Ok(v) = HeaderValue::from_str(&disposition) {
            res.headers_mut().insert(header::CONTENT_DISPOSITION, v);
        }
        Ok::<_, VaultError>(res)
    }
    .await;
    observe(&svc, &uri, result)
}

#[derive(Debug, Deserialize)]
pub struct ChunkQuery {
    start: Option<u64>,
    end: Option<u64>,
}

async fn chunk(
    State(svc): State<Arc<MediaService>>,
    Path(id): Path<String>,
    uri: Uri,
    Query(query): Query<ChunkQuery>,
) -> ApiResult<Response> {
    let result: VaultResult<Response> = async {
        let record = svc.get(&id).await?;
        let total = record.metadata.size;
        let start = query.start.unwrap_or(0);
        let end = match query.end {
            Some(end) => end,
            None => total
                .checked_sub(1)
                .ok_or(VaultError::RangeNotSatisfiable { total })?,
        };
        let range = window(start, end, total)?;
        serve(&svc, &record, RangeOutcome::Partial(range), false).await
    }
    .await;
    observe(&svc, &uri, result)
}

async fn info(
    State(svc): State<Arc<MediaService>>,
    Path(id): Path<String>,
    uri: Uri,
) -> ApiResult<impl IntoResponse> {
    let info = svc.info(&id).await.map_err(ApiError::at(&uri))?;
    Ok(Json(info))
}

async fn diagnose(
    State(svc): State<Arc<MediaService>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    Json(svc.diagnose(&id).await)
}

async fn delete_object(
    State(svc): State<Arc<MediaService>>,
    Path(id): Path<String>,
    uri: Uri,
) -> ApiResult<StatusCode> {
    svc.delete(&id).await.map_err(ApiError::at(&uri))?;
    Ok(StatusCode::NO_CONTENT)
}

/// Build a 200 or 206 response streaming `outcome`'s window of `record`.
async fn serve(
    svc: &MediaService,
    record: &ObjectRecord,
    outcome: RangeOutcome,
    progressive: bool,
) -> VaultResult<Response> {
    let len = outcome.content_length();
    let body = svc.open_window(record, outcome.start(), len).await?;

    let content_type = HeaderValue::from_str(&record.metadata.content_type)
        .unwrap_or_else(|_| HeaderValue::from_static(DEFAULT_CONTENT_TYPE));

    let mut builder = Response::builder()
        .header(header::CONTENT_TYPE, content_type)
        .header(header::ACCEPT_RANGES, ACCEPT_RANGES)
        .header(header::CONTENT_LENGTH, len);
    builder = match outcome {
        RangeOutcome::Full { .. } => builder.status(StatusCode::OK),
        RangeOutcome::Partial(range) => builder
            .status(StatusCode::PARTIAL_CONTENT)
            .header(header::CONTENT_RANGE, range.content_range()),
    };
    if progressive {
        builder = builder
            .header(header::CACHE_CONTROL, "no-cache")
            .header(header::X_CONTENT_TYPE_OPTIONS, "nosniff");
    }

    let metrics = svc.metrics().clone();
    let body = body.inspect_ok(move |chunk| metrics.served(chunk.len() as u64));
    let res = builder
        .body(Body::from_stream(body))
        .map_err(|e| VaultError::Other(anyhow::anyhow!("building response: {e}")))?;

    svc.metrics().request(if outcome.is_partial() {
        Outcome::Partial
    } else {
        Outcome::Full
    });
    tracing::debug!(object = %record.id, start = outcome.start(), len, partial = outcome.is_partial(), "serving");
    Ok(res)
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| if c == '"' || c == '\\' || c.is_control() { '_' } else { c })
        .collect()
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::tests::{data, service, CHUNK};
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    struct TestApp {
        app: Router,
        svc: Arc<MediaService>,
        _dir: tempfile::TempDir,
    }

    fn app() -> TestApp {
        let dir = tempfile::tempdir().unwrap();
        let svc = Arc::new(service(&dir));
        TestApp {
            app: router(svc.clone()),
            svc,
            _dir: dir,
        }
    }

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, HeaderMap, Vec<u8>) {
        let res = app.clone().oneshot(req).await.unwrap();
        let status = res.status();
        let headers = res.headers().clone();
        let body = res.into_body().collect().await.unwrap().to_bytes().to_vec();
        (status, headers, body)
    }

    async fn upload_bytes(app: &Router, bytes: Vec<u8>, encrypt: bool) -> ObjectRecord {
        let req = Request::post(format!("/objects?encrypt={encrypt}&filename=clip%20one.mp4"))
            .header(header::CONTENT_TYPE, "video/mp4")
            .header(UPLOADER_HEADER, "user-7")
            .body(Body::from(bytes))
            .unwrap();
        let (status, _, body) = send(app, req).await;
        assert_eq!(status, StatusCode::CREATED);
        serde_json::from_slice(&body).unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).unwrap()
    }

    fn ranged(uri: &str, range: &str) -> Request<Body> {
        Request::get(uri)
            .header(header::RANGE, range)
            .body(Body::empty())
            .unwrap()
    }

    fn hdr<'a>(headers: &'a HeaderMap, name: header::HeaderName) -> &'a str {
        headers.get(name).unwrap().to_str().unwrap()
    }

    #[tokio::test]
    async fn test_upload_records_metadata() {
        let t = app();
        let record = upload_bytes(&t.app, data(300), false).await;
        assert_eq!(record.metadata.size, 300);
        assert_eq!(record.metadata.content_type, "video/mp4");
        assert_eq!(record.metadata.uploader_id, "user-7");
        assert_eq!(record.metadata.original_filename, "clip one.mp4");

        let (status, _, body) = send(&t.app, get("/objects")).await;
        assert_eq!(status, StatusCode::OK);
        let listed: Vec<ObjectRecord> = serde_json::from_slice(&body).unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[tokio::test]
    async fn test_stream_full_content() {
        let t = app();
        let original = data(1000);
        let record = upload_bytes(&t.app, original.clone(), false).await;

        let (status, headers, body) =
            send(&t.app, get(&format!("/objects/{}/stream", record.id))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(hdr(&headers, header::ACCEPT_RANGES), "bytes");
        assert_eq!(hdr(&headers, header::CONTENT_LENGTH), "1000");
        assert_eq!(hdr(&headers, header::CONTENT_TYPE), "video/mp4");
        assert!(headers.get(header::CONTENT_RANGE).is_none());
        assert_eq!(body, original);
    }

    #[tokio::test]
    async fn test_stream_partial_content() {
        let t = app();
        let original = data(1000);
        let record = upload_bytes(&t.app, original.clone(), false).await;
        let uri = format!("/objects/{}/stream", record.id);

        let (status, headers, body) = send(&t.app, ranged(&uri, "bytes=100-199")).await;
        assert_eq!(status, StatusCode::PARTIAL_CONTENT);
        assert_eq!(hdr(&headers, header::CONTENT_RANGE), "bytes 100-199/1000");
        assert_eq!(hdr(&headers, header::CONTENT_LENGTH), "100");
        assert_eq!(body, &original[100..200]);

        let (status, headers, body) = send(&t.app, ranged(&uri, "bytes=900-")).await;
        assert_eq!(status, StatusCode::PARTIAL_CONTENT);
        assert_eq!(hdr(&headers, header::CONTENT_RANGE), "bytes 900-999/1000");
        assert_eq!(body, &original[900..]);
    }

    #[tokio::test]
    async fn test_stream_unsatisfiable_range() {
        let t = app();
        let record = upload_bytes(&t.app, data(1000), false).await;
        let uri = format!("/objects/{}/stream", record.id);

        let (status, headers, body) = send(&t.app, ranged(&uri, "bytes=1000-1005")).await;
        assert_eq!(status, StatusCode::RANGE_NOT_SATISFIABLE);
        assert_eq!(hdr(&headers, header::CONTENT_RANGE), "bytes */1000");

        let envelope: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(envelope["status"], 416);
        assert_eq!(envelope["error"], "Range Not Satisfiable");
        assert_eq!(envelope["path"], uri.as_str());
        assert!(envelope["timestamp"].as_u64().is_some());
        assert_eq!(t.svc.metrics().request_count(Outcome::NotSatisfiable), 1);
    }

    #[tokio::test]
    async fn test_served_bytes_count_delivered_body() {
        let t = app();
        let record = upload_bytes(&t.app, data(1000), false).await;
        let uri = format!("/objects/{}/stream", record.id);

        let res = t.app.clone().oneshot(get(&uri)).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(t.svc.metrics().served_bytes(), 0);
        drop(res);
        assert_eq!(t.svc.metrics().served_bytes(), 0);

        let (_, _, body) = send(&t.app, get(&uri)).await;
        assert_eq!(body.len(), 1000);
        assert_eq!(t.svc.metrics().served_bytes(), 1000);

        send(&t.app, ranged(&uri, "bytes=100-199")).await;
        assert_eq!(t.svc.metrics().served_bytes(), 1100);

        send(&t.app, ranged(&uri, "bytes=5000-")).await;
        assert_eq!(t.svc.metrics().served_bytes(), 1100);
    }

    #[tokio::test]
    async fn test_unknown_object_is_404() {
        let t = app();
        let (status, _, body) = send(&t.app, get("/objects/nope/stream")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let envelope: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(envelope["error"], "Resource Not Found");
        assert_eq!(envelope["path"], "/objects/nope/stream");
    }

    #[tokio::test]
    async fn test_encrypted_object_range_requests() {
        let t = app();
        let original = data(5 * CHUNK + 7);
        let record = upload_bytes(&t.app, original.clone(), true).await;
        assert!(record.encryption.is_encrypted);
        assert!(record.encryption.wrapped_key().is_some());
        let uri = format!("/objects/{}/stream", record.id);

        let (status, headers, body) = send(&t.app, get(&uri)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            hdr(&headers, header::CONTENT_LENGTH),
            original.len().to_string()
        );
        assert_eq!(body, original);

        // window straddling two cipher frames
        let (status, headers, body) = send(&t.app, ranged(&uri, "bytes=60-140")).await;
        assert_eq!(status, StatusCode::PARTIAL_CONTENT);
        assert_eq!(
            hdr(&headers, header::CONTENT_RANGE),
            format!("bytes 60-140/{}", original.len())
        );
        assert_eq!(body, &original[60..=140]);
    }

    #[tokio::test]
    async fn test_download_sets_disposition() {
        let t = app();
        let original = data(64);
        let record = upload_bytes(&t.app, original.clone(), true).await;

        let (status, headers, body) =
            send(&t.app, get(&format!("/objects/{}/download", record.id))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            hdr(&headers, header::CONTENT_DISPOSITION),
            "attachment; filename=\"clip one.mp4\""
        );
        assert_eq!(body, original);
    }

    #[tokio::test]
    async fn test_chunk_endpoint() {
        let t = app();
        let original = data(500);
        let record = upload_bytes(&t.app, original.clone(), false).await;
        let base = format!("/objects/{}/chunk", record.id);

        let (status, headers, body) = send(&t.app, get(&format!("{base}?start=10&end=19"))).await;
        assert_eq!(status, StatusCode::PARTIAL_CONTENT);
        assert_eq!(hdr(&headers, header::CONTENT_RANGE), "bytes 10-19/500");
        assert_eq!(body, &original[10..20]);

        let (status, _, body) = send(&t.app, get(&format!("{base}?start=450"))).await;
        assert_eq!(status, StatusCode::PARTIAL_CONTENT);
        assert_eq!(body, &original[450..]);

        for q in ["?start=20&end=10", "?start=0&end=500"] {
            let (status, headers, _) = send(&t.app, get(&format!("{base}{q}"))).await;
            assert_eq!(status, StatusCode::RANGE_NOT_SATISFIABLE, "{q}");
            assert_eq!(hdr(&headers, header::CONTENT_RANGE), "bytes */500");
        }
    }

    #[tokio::test]
    async fn test_info_views_and_delete() {
        let t = app();
        let record = upload_bytes(&t.app, data(200), true).await;
        let id = record.id.to_string();

        send(&t.app, get(&format!("/objects/{id}/stream"))).await;
        send(&t.app, ranged(&format!("/objects/{id}/stream"), "bytes=0-9")).await;

        let (status, _, body) = send(&t.app, get(&format!("/objects/{id}/info"))).await;
        assert_eq!(status, StatusCode::OK);
        let info: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(info["size"], 200);
        assert_eq!(info["supports_range_requests"], true);
        assert_eq!(info["encrypted"], true);
        assert_eq!(info["chunk_size"], CHUNK as u64);
        assert_eq!(info["view_count"], 2);

        let (status, _, body) = send(&t.app, get(&format!("/objects/{id}/diagnose"))).await;
        assert_eq!(status, StatusCode::OK);
        let diag: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(diag["in_catalog"], true);
        assert!(diag["report"]["resolved"].is_string());

        let req = Request::delete(format!("/objects/{id}")).body(Body::empty()).unwrap();
        let (status, _, _) = send(&t.app, req).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, _, _) = send(&t.app, get(&format!("/objects/{id}/info"))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_missing_blob_is_404() {
        let t = app();
        let record = upload_bytes(&t.app, data(100), false).await;
        t.svc.store().delete(record.blob_id.as_str()).await.unwrap();

        let (status, _, body) =
            send(&t.app, get(&format!("/objects/{}/stream", record.id))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let envelope: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(envelope["error"], "Resource Not Found");
    }

    #[tokio::test]
    async fn test_server_errors_are_sanitized() {
        let err = ApiError {
            error: VaultError::DecryptionFailed("bad padding in frame 3".into()),
            path: "/objects/x/stream".into(),
        };
        let res = err.into_response();
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = res.into_body().collect().await.unwrap().to_bytes();
        let envelope: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert!(!envelope["message"].as_str().unwrap().contains("padding"));
        assert_eq!(envelope["error"], "Decryption Failed");
        assert_eq!(envelope["status"], 500);
    }
}
