use std::io::{BufRead, BufReader, BufWriter, Cursor, Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::codecs::jpeg::JpegEncoder;
use image::{ColorType, ImageError, ImageFormat, ImageReader, Limits, RgbImage};
use thiserror::Error;
use tokio::sync::OwnedSemaphorePermit;

use crate::config::RestyleConfig;

use super::types::UploadedImage;

/// 图片规整失败的原因；Display 只输出底层信息，由调用方加前缀。
#[derive(Debug, Error)]
pub enum RestyleError {
    /// 无法识别或解码
    #[error("{0}")]
    Decode(#[source] ImageError),
    /// JPEG 编码失败
    #[error("{0}")]
    Encode(#[source] ImageError),
    /// 临时文件读写失败
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// 阻塞任务异常退出
    #[error("{0}")]
    Worker(String),
}

/// 图片规整器：任意可解码图片 -> RGB -> JPEG
#[derive(Debug, Clone)]
pub struct ImageNormalizer {
    quality: u8,
    max_dimension: u32,
    /// Some 时经由临时文件完成解码/编码
    spool_dir: Option<PathBuf>,
}

impl ImageNormalizer {
    pub fn new(quality: u8, max_dimension: u32) -> Self {
        Self {
            quality: quality.clamp(1, 100),
            max_dimension,
            spool_dir: None,
        }
    }

    pub fn from_config(cfg: &RestyleConfig) -> Self {
        Self::new(cfg.effective_quality(), cfg.max_dimension).with_spool_dir(cfg.spool_path())
    }

    pub fn with_spool_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.spool_dir = dir;
        self
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    /// 在阻塞线程池上执行规整，避免解码/编码占住 tokio worker。
    ///
    /// `permit` 由阻塞任务持有，调用方被取消时仍要等任务结束才归还。
    pub async fn normalize(
        self: Arc<Self>,
        upload: UploadedImage,
        permit: OwnedSemaphorePermit,
    ) -> Result<Vec<u8>, RestyleError> {
        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            self.normalize_blocking(&upload)
        })
        .await
        .map_err(|e| RestyleError::Worker(format!("normalize task failed: {e}")))?
    }

    /// 同步版本
    pub fn normalize_blocking(&self, upload: &UploadedImage) -> Result<Vec<u8>, RestyleError> {
        match &self.spool_dir {
            Some(dir) => self.normalize_spooled(upload, dir),
            None => self.normalize_in_memory(upload),
        }
    }

    fn normalize_in_memory(&self, upload: &UploadedImage) -> Result<Vec<u8>, RestyleError> {
        let rgb = self.decode_rgb(ImageReader::new(Cursor::new(&upload.bytes[..])), upload)?;
        let mut out = Vec::new();
        self.encode_jpeg(&rgb, &mut out)?;
        Ok(out)
    }

    /// 输入、输出各占一个临时文件；两个句柄离开作用域即删除，失败路径同样如此。
    fn normalize_spooled(
        &self,
        upload: &UploadedImage,
        dir: &Path,
    ) -> Result<Vec<u8>, RestyleError> {
        let mut input = tempfile::Builder::new()
            .prefix("restyle-in-")
            .suffix(".jpg")
            .tempfile_in(dir)?;
        input.write_all(&upload.bytes)?;
        input.flush()?;

        let reader = ImageReader::new(BufReader::new(input.reopen()?));
        let rgb = self.decode_rgb(reader, upload)?;

        let output = tempfile::Builder::new()
            .prefix("restyle-out-")
            .suffix(".jpg")
            .tempfile_in(dir)?;
        {
            let mut writer = BufWriter::new(output.as_file());
            self.encode_jpeg(&rgb, &mut writer)?;
            writer.flush()?;
        }

        Ok(std::fs::read(output.path())?)
    }

    fn decode_rgb<R: BufRead + Seek>(
        &self,
        reader: ImageReader<R>,
        upload: &UploadedImage,
    ) -> Result<RgbImage, RestyleError> {
        let mut reader = reader.with_guessed_format()?;
        if reader.format().is_none()
            && let Some(format) = declared_format(upload)
        {
            tracing::debug!("内容嗅探失败，按声明格式解码: {:?}", format);
            reader.set_format(format);
        }

        let mut limits = Limits::default();
        limits.max_image_width = Some(self.max_dimension);
        limits.max_image_height = Some(self.max_dimension);
        reader.limits(limits);

        let img = reader.decode().map_err(RestyleError::Decode)?;
        if img.color() != ColorType::Rgb8 {
            tracing::debug!("颜色模式 {:?} 转换为 Rgb8", img.color());
        }
        Ok(img.into_rgb8())
    }

    fn encode_jpeg<W: Write>(&self, rgb: &RgbImage, writer: W) -> Result<(), RestyleError> {
        let mut enc = JpegEncoder::new_with_quality(writer, self.quality);
        enc.encode(
            rgb.as_raw(),
            rgb.width(),
            rgb.height(),
            ColorType::Rgb8.into(),
        )
        .map_err(RestyleError::Encode)
    }
}

/// 客户端声明的格式：先看 Content-Type，再看文件扩展名
fn declared_format(upload: &UploadedImage) -> Option<ImageFormat> {
    upload
        .content_type
        .as_deref()
        .and_then(ImageFormat::from_mime_type)
        .or_else(|| {
            upload
                .file_name
                .as_deref()
                .and_then(|name| ImageFormat::from_path(name).ok())
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Bytes;
    use image::{DynamicImage, GrayImage, Luma, Rgba, RgbaImage};
    use std::time::Duration;
    use tokio::sync::Semaphore;

    fn upload(bytes: Vec<u8>) -> UploadedImage {
        UploadedImage {
            bytes: Bytes::from(bytes),
            file_name: None,
            content_type: None,
        }
    }

    fn encode(img: DynamicImage, format: ImageFormat) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, format).expect("encode fixture");
        buf.into_inner()
    }

    fn decode_jpeg(bytes: &[u8]) -> DynamicImage {
        image::load_from_memory_with_format(bytes, ImageFormat::Jpeg).expect("valid jpeg")
    }

    #[test]
    fn rgba_png_becomes_rgb_jpeg() {
        let img = RgbaImage::from_pixel(8, 6, Rgba([255, 0, 0, 128]));
        let png = encode(DynamicImage::ImageRgba8(img), ImageFormat::Png);

        let out = ImageNormalizer::new(90, 1024)
            .normalize_blocking(&upload(png))
            .expect("normalize");
        let decoded = decode_jpeg(&out);
        assert_eq!(decoded.color(), ColorType::Rgb8);
        assert_eq!((decoded.width(), decoded.height()), (8, 6));
    }

    #[test]
    fn grayscale_is_expanded_to_rgb() {
        let img = GrayImage::from_pixel(5, 5, Luma([200]));
        let png = encode(DynamicImage::ImageLuma8(img), ImageFormat::Png);

        let out = ImageNormalizer::new(90, 1024)
            .normalize_blocking(&upload(png))
            .expect("normalize");
        assert_eq!(decode_jpeg(&out).color(), ColorType::Rgb8);
    }

    #[test]
    fn text_is_a_decode_error() {
        let err = ImageNormalizer::new(90, 1024)
            .normalize_blocking(&upload(b"definitely not an image".to_vec()))
            .expect_err("should fail");
        assert!(matches!(err, RestyleError::Decode(_)), "got {err:?}");
    }

    #[test]
    fn oversized_dimensions_are_rejected() {
        let img = RgbaImage::from_pixel(64, 2, Rgba([0, 0, 0, 255]));
        let png = encode(DynamicImage::ImageRgba8(img), ImageFormat::Png);

        let err = ImageNormalizer::new(90, 32)
            .normalize_blocking(&upload(png))
            .expect_err("should hit limits");
        assert!(matches!(err, RestyleError::Decode(_)), "got {err:?}");
    }

    #[test]
    fn output_is_deterministic() {
        let img = RgbaImage::from_fn(16, 16, |x, y| Rgba([(x * 16) as u8, (y * 16) as u8, 7, 255]));
        let png = encode(DynamicImage::ImageRgba8(img), ImageFormat::Png);
        let normalizer = ImageNormalizer::new(90, 1024);

        let a = normalizer.normalize_blocking(&upload(png.clone())).unwrap();
        let b = normalizer.normalize_blocking(&upload(png)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn spooled_mode_matches_in_memory_and_cleans_up() {
        let dir = tempfile::tempdir().expect("tempdir");
        let img = RgbaImage::from_pixel(10, 4, Rgba([10, 200, 30, 255]));
        let png = encode(DynamicImage::ImageRgba8(img), ImageFormat::Png);

        let in_memory = ImageNormalizer::new(90, 1024)
            .normalize_blocking(&upload(png.clone()))
            .unwrap();
        let spooled = ImageNormalizer::new(90, 1024)
            .with_spool_dir(Some(dir.path().to_path_buf()))
            .normalize_blocking(&upload(png))
            .unwrap();

        assert_eq!(in_memory, spooled);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn spooled_failure_also_cleans_up() {
        let dir = tempfile::tempdir().expect("tempdir");
        let normalizer =
            ImageNormalizer::new(90, 1024).with_spool_dir(Some(dir.path().to_path_buf()));

        assert!(normalizer.normalize_blocking(&upload(b"garbage".to_vec())).is_err());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn declared_format_prefers_content_type() {
        let up = UploadedImage {
            bytes: Bytes::new(),
            file_name: Some("room.png".to_string()),
            content_type: Some("image/gif".to_string()),
        };
        assert_eq!(declared_format(&up), Some(ImageFormat::Gif));

        let up = UploadedImage {
            content_type: None,
            ..up
        };
        assert_eq!(declared_format(&up), Some(ImageFormat::Png));
    }

    #[tokio::test]
    async fn async_normalize_runs_on_blocking_pool() {
        let img = RgbaImage::from_pixel(3, 3, Rgba([1, 2, 3, 255]));
        let png = encode(DynamicImage::ImageRgba8(img), ImageFormat::Png);
        let sem = Arc::new(Semaphore::new(1));
        let permit = sem.clone().acquire_owned().await.unwrap();
        let out = Arc::new(ImageNormalizer::new(90, 1024))
            .normalize(upload(png), permit)
            .await
            .expect("normalize");
        assert_eq!(decode_jpeg(&out).width(), 3);
        assert_eq!(sem.available_permits(), 1);
    }

    #[tokio::test]
    async fn cancelled_caller_keeps_permit_until_work_finishes() {
        let img = RgbaImage::from_fn(4000, 4000, |x, y| {
            Rgba([(x % 251) as u8, (y % 241) as u8, ((x ^ y) % 239) as u8, 255])
        });
        let png = encode(DynamicImage::ImageRgba8(img), ImageFormat::Png);
        let sem = Arc::new(Semaphore::new(1));
        let permit = sem.clone().acquire_owned().await.unwrap();

        let normalizer = Arc::new(ImageNormalizer::new(90, 16384));
        let task = tokio::spawn(normalizer.normalize(upload(png), permit));
        tokio::time::sleep(Duration::from_millis(50)).await;
        task.abort();
        let _ = task.await;

        // 阻塞任务仍在解码，许可不能回到池中
        assert_eq!(sem.available_permits(), 0);

        let reacquired = tokio::time::timeout(Duration::from_secs(60), sem.acquire()).await;
        assert!(reacquired.is_ok(), "permit never returned after work finished");
    }
}
