use std::time::Instant;

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Multipart, State, multipart::MultipartRejection},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::post,
};

use crate::error::{AppError, ProblemDetails};
use crate::state::AppState;

use super::normalizer::RestyleError;
use super::types::{ProcessingFailedBody, RestyleForm, RestyleFormDoc};

/// 成功响应以附件形式下载，文件名固定
const OUTPUT_DISPOSITION: &str = r#"attachment; filename="restyled_room.jpg""#;

pub fn create_restyle_router(max_upload_bytes: usize) -> Router<AppState> {
    Router::<AppState>::new()
        .route("/restyle", post(restyle))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
}

#[utoipa::path(
    post,
    path = "/restyle",
    summary = "图片规整为 JPEG",
    description = "上传图片与风格描述，返回 RGB JPEG（quality 90）。处理失败时默认仍返回 200，响应体为 {\"error\": \"Processing failed: ...\"}。",
    request_body(content = RestyleFormDoc, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "image/jpeg 字节（attachment; filename=restyled_room.jpg），或兼容模式下的处理失败 JSON"),
        (status = 400, description = "multipart 格式错误", body = ProblemDetails),
        (status = 413, description = "请求体过大", body = ProblemDetails),
        (status = 422, description = "缺少必需字段（ProblemDetails）；严格模式下的处理失败返回 ProcessingFailedBody", body = ProblemDetails)
    ),
    tag = "Restyle"
)]
pub async fn restyle(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, AppError> {
    let t_total = Instant::now();
    let form = RestyleForm::from_multipart(multipart?).await?;
    tracing::info!(
        bytes = form.image.bytes.len(),
        file_name = form.image.file_name.as_deref().unwrap_or("-"),
        content_type = form.image.content_type.as_deref().unwrap_or("-"),
        prompt_chars = form.prompt.chars().count(),
        "收到 restyle 请求"
    );

    // 许可随阻塞任务一起释放，客户端断开不会提前归还
    let permit = state
        .process_semaphore
        .clone()
        .acquire_owned()
        .await
        .map_err(|e| AppError::Internal(format!("获取处理信号量失败: {e}")))?;

    match state.normalizer.clone().normalize(form.image, permit).await {
        Ok(jpeg) => {
            tracing::info!(
                output_bytes = jpeg.len(),
                elapsed_ms = t_total.elapsed().as_millis() as u64,
                "restyle 完成"
            );
            Ok(jpeg_response(jpeg))
        }
        Err(e) => {
            tracing::warn!(error = %e, "restyle 处理失败");
            Ok(processing_failed_response(&e, state.legacy_error_status))
        }
    }
}

fn jpeg_response(jpeg: Vec<u8>) -> Response {
    let mut res = jpeg.into_response();
    let headers = res.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("image/jpeg"));
    headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_static(OUTPUT_DISPOSITION),
    );
    res
}

/// 兼容模式下以 200 返回错误体（旧前端只检查 JSON 中的 error 字段）
fn processing_failed_response(err: &RestyleError, legacy_status: bool) -> Response {
    let status = if legacy_status {
        StatusCode::OK
    } else {
        StatusCode::UNPROCESSABLE_ENTITY
    };
    (status, Json(ProcessingFailedBody::new(err))).into_response()
}
