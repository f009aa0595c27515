use axum::body::Bytes;
use axum::extract::Multipart;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::AppError;

/// 上传的原始图片（仅在单次请求内存活）
#[derive(Debug, Clone)]
pub struct UploadedImage {
    /// 原始字节
    pub bytes: Bytes,
    /// 客户端声明的文件名
    pub file_name: Option<String>,
    /// 客户端声明的 Content-Type
    pub content_type: Option<String>,
}

/// `/restyle` 表单
#[derive(Debug, Clone)]
pub struct RestyleForm {
    pub image: UploadedImage,
    /// 风格描述；当前只作为必填字段校验，不参与处理
    pub prompt: String,
}

impl RestyleForm {
    /// 读取完整个 multipart 请求体后再做必填校验，保证校验先于任何图片处理。
    ///
    /// 同名字段重复出现时以最后一个为准；未知字段忽略。
    /// `prompt` 为空字符串等同于缺失；`image` 必须带 filename。
    pub async fn from_multipart(mut multipart: Multipart) -> Result<Self, AppError> {
        let mut image: Option<UploadedImage> = None;
        let mut prompt: Option<String> = None;

        while let Some(field) = multipart.next_field().await? {
            let name = field.name().unwrap_or_default().to_string();
            match name.as_str() {
                "image" => {
                    // 没有 filename 的普通文本字段不算上传文件
                    let Some(file_name) = field.file_name().map(str::to_string) else {
                        return Err(AppError::Validation(
                            "字段 image 必须是上传文件".to_string(),
                        ));
                    };
                    let content_type = field.content_type().map(str::to_string);
                    let bytes = field.bytes().await?;
                    image = Some(UploadedImage {
                        bytes,
                        file_name: Some(file_name),
                        content_type,
                    });
                }
                "prompt" => {
                    let text = field.text().await?;
                    prompt = (!text.is_empty()).then_some(text);
                }
                _ => {}
            }
        }

        match (image, prompt) {
            (Some(image), Some(prompt)) => Ok(Self { image, prompt }),
            (image, prompt) => {
                let missing: Vec<&str> = [("image", image.is_none()), ("prompt", prompt.is_none())]
                    .into_iter()
                    .filter_map(|(name, absent)| absent.then_some(name))
                    .collect();
                Err(AppError::Validation(format!(
                    "缺少必需字段: {}",
                    missing.join(", ")
                )))
            }
        }
    }
}

/// OpenAPI 中的表单描述（仅用于文档）
#[derive(Debug, ToSchema)]
#[allow(dead_code)]
pub struct RestyleFormDoc {
    /// 待处理图片（任意常见格式）
    #[schema(value_type = String, format = Binary)]
    pub image: Vec<u8>,
    /// 风格描述（必填，当前不影响输出）
    #[schema(example = "make it blue")]
    pub prompt: String,
}

/// 处理失败时返回的 JSON 体
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ProcessingFailedBody {
    #[schema(example = "Processing failed: The image format could not be determined")]
    pub error: String,
}

impl ProcessingFailedBody {
    pub fn new(reason: impl std::fmt::Display) -> Self {
        Self {
            error: format!("Processing failed: {reason}"),
        }
    }
}
