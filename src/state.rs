use std::sync::Arc;
use tokio::sync::Semaphore;

use crate::config::AppConfig;
use crate::features::restyle::ImageNormalizer;

/// 聚合的应用共享状态（只读，请求之间不共享可变数据）
#[derive(Clone)]
pub struct AppState {
    pub normalizer: Arc<ImageNormalizer>,
    /// 控制并发解码/编码的信号量（限制 CPU 密集型任务数量）
    pub process_semaphore: Arc<Semaphore>,
    /// 处理失败时是否仍返回 200
    pub legacy_error_status: bool,
}

impl AppState {
    pub fn from_config(config: &AppConfig) -> Self {
        let restyle = &config.restyle;
        Self {
            normalizer: Arc::new(ImageNormalizer::from_config(restyle)),
            process_semaphore: Arc::new(Semaphore::new(restyle.effective_parallelism())),
            legacy_error_status: restyle.legacy_error_status,
        }
    }
}
