// src/complaint_image.rs
//
// Complaint photos live in the `complaint_images` GridFS bucket, keyed by a
// uuid string. The complaint keeps the file id, its content type and the
// public URL the frontend renders.

use actix_web::{http::header, web, HttpRequest, HttpResponse};
use futures_util::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use futures_util::stream::{self, Stream};
use log::{error, info, warn};
use mongodb::bson::{doc, Bson};
use uuid::Uuid;

use crate::app_state::AppState;
use crate::auth::current_user;
use crate::complaint::{caller_scope, fetch_in_scope};
use crate::error::ApiError;
use crate::models::Role;

pub const MAX_IMAGE_BYTES: usize = 5 * 1024 * 1024;
const DOWNLOAD_CHUNK: usize = 64 * 1024;

pub fn image_url(complaint_id: &str) -> String {
    format!("/api/complaints/{}/image", complaint_id)
}

/// Returns the normalised `image/*` content type of an upload.
pub fn image_content_type(req: &HttpRequest) -> Result<String, ApiError> {
    let raw = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(';').next().unwrap_or_default().trim().to_lowercase())
        .unwrap_or_default();
    if raw.starts_with("image/") && raw.len() > "image/".len() {
        Ok(raw)
    } else {
        Err(ApiError::bad_request("Only image uploads are accepted"))
    }
}

pub fn check_image_size(len: usize) -> Result<(), ApiError> {
    match len {
        0 => Err(ApiError::bad_request("Image body is empty")),
        n if n > MAX_IMAGE_BYTES => Err(ApiError::bad_request("Image must be 5 MB or smaller")),
        _ => Ok(()),
    }
}

/// Turns a reader into a body stream of fixed-size chunks. The stream ends
/// after the first read error.
pub fn chunked<R>(reader: R) -> impl Stream<Item = std::io::Result<web::Bytes>>
where
    R: AsyncRead + Unpin + 'static,
{
    stream::unfold(Some(reader), |state| async move {
        let mut reader = state?;
        let mut buf = vec![0u8; DOWNLOAD_CHUNK];
        match reader.read(&mut buf).await {
            Ok(0) => None,
            Ok(n) => {
                buf.truncate(n);
                Some((Ok(web::Bytes::from(buf)), Some(reader)))
            }
            Err(e) => Some((Err(e), None)),
        }
    })
}

/// POST /api/complaints/{complaint_id}/image
/// Replaces any earlier image of the complaint.
pub async fn upload_image(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Bytes,
) -> Result<HttpResponse, ApiError> {
    let caller = current_user(&req)?;
    caller.require_role(&[Role::Student, Role::Staff])?;
    let content_type = image_content_type(&req)?;
    check_image_size(body.len())?;

    // Submitters are scoped to their own complaints.
    let (_, scope) = caller_scope(&data, &caller).await?;
    let complaint = fetch_in_scope(&data, &scope, &path).await?;

    let bucket = data.mongodb.images();
    let file_id = Uuid::new_v4().to_string();
    let mut upload = bucket
        .open_upload_stream(format!("{}-{}", complaint.complaint_id, file_id))
        .id(Bson::String(file_id.clone()))
        .await?;
    let written = async {
        upload.write_all(&body).await?;
        upload.close().await
    }
    .await;
    if let Err(e) = written {
        error!("Image upload for {} failed: {}", complaint.complaint_id, e);
        return Err(ApiError::Internal(e.to_string()));
    }

    let url = image_url(&complaint.complaint_id);
    data.mongodb
        .complaints()
        .update_one(
            doc! { "complaint_id": &complaint.complaint_id },
            doc! { "$set": {
                "image_file_id": &file_id,
                "image_content_type": &content_type,
                "image_url": &url,
            } },
        )
        .await?;
    info!(
        "Stored {} byte image for complaint {}",
        body.len(),
        complaint.complaint_id
    );

    if let Some(old) = complaint.image_file_id {
        if let Err(e) = bucket.delete(Bson::String(old.clone())).await {
            warn!("Could not remove replaced image {}: {}", old, e);
        }
    }

    Ok(HttpResponse::Created().json(serde_json::json!({
        "image_url": url,
        "content_type": content_type,
        "size": body.len(),
    })))
}

/// GET /api/complaints/{complaint_id}/image
pub async fn download_image(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let caller = current_user(&req)?;
    let (_, scope) = caller_scope(&data, &caller).await?;
    let complaint = fetch_in_scope(&data, &scope, &path).await?;
    let file_id = complaint
        .image_file_id
        .ok_or_else(|| ApiError::not_found("Complaint has no stored image"))?;

    let download = data
        .mongodb
        .images()
        .open_download_stream(Bson::String(file_id.clone()))
        .await?;
    info!("Streaming image {} of complaint {}", file_id, complaint.complaint_id);

    let content_type = complaint
        .image_content_type
        .unwrap_or_else(|| "application/octet-stream".to_string());
    Ok(HttpResponse::Ok()
        .insert_header((header::CONTENT_TYPE, content_type))
        .insert_header((header::CACHE_CONTROL, "private, max-age=300"))
        .streaming(chunked(download)))
}
