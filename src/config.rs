use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// 全局配置单例
static CONFIG: OnceCell<AppConfig> = OnceCell::new();

/// 配置文件路径覆盖（未设置时读取工作目录下的 `config.toml`）
const CONFIG_PATH_ENV: &str = "RESTYLE_CONFIG";

/// 开发环境前端默认使用的 Origin 列表
pub const DEFAULT_ALLOWED_ORIGINS: [&str; 6] = [
    "http://localhost:5173",
    "http://127.0.0.1:5173",
    "http://localhost:5174",
    "http://127.0.0.1:5174",
    "http://localhost:3000",
    "http://127.0.0.1:3000",
];

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// 监听地址
    #[serde(default = "ServerConfig::default_host")]
    pub host: String,
    /// 监听端口
    #[serde(default = "ServerConfig::default_port")]
    pub port: u16,
}

impl ServerConfig {
    fn default_host() -> String {
        "0.0.0.0".to_string()
    }
    fn default_port() -> u16 {
        8000
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: Self::default_host(),
            port: Self::default_port(),
        }
    }
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// 日志级别（`RUST_LOG` 存在时以其为准）
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_string()
    }

    /// 未设置 `RUST_LOG` 时使用的过滤指令
    pub fn default_directive(&self) -> String {
        let level = self.level.trim();
        let level = if level.is_empty() { "info" } else { level };
        format!("restyle_backend={level},tower_http={level}")
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
        }
    }
}

/// CORS 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    /// 是否启用 CORS
    #[serde(default = "CorsConfig::default_enabled")]
    pub enabled: bool,
    /// 允许的 Origin 列表（支持 "*" 表示任意）
    #[serde(default = "CorsConfig::default_allowed_origins")]
    pub allowed_origins: Vec<String>,
    /// 允许的方法列表（支持 "*" 表示任意）
    #[serde(default = "CorsConfig::default_wildcard")]
    pub allowed_methods: Vec<String>,
    /// 允许的请求头列表（支持 "*" 表示任意）
    #[serde(default = "CorsConfig::default_wildcard")]
    pub allowed_headers: Vec<String>,
    /// 暴露的响应头列表
    #[serde(default)]
    pub expose_headers: Vec<String>,
    /// 是否允许携带凭证（Cookie/Authorization）
    #[serde(default = "CorsConfig::default_allow_credentials")]
    pub allow_credentials: bool,
    /// 预检缓存时间（秒）
    #[serde(default = "CorsConfig::default_max_age")]
    pub max_age_secs: Option<u64>,
}

impl CorsConfig {
    fn default_enabled() -> bool {
        true
    }

    fn default_allowed_origins() -> Vec<String> {
        DEFAULT_ALLOWED_ORIGINS
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    fn default_wildcard() -> Vec<String> {
        vec!["*".to_string()]
    }

    fn default_allow_credentials() -> bool {
        true
    }

    fn default_max_age() -> Option<u64> {
        Some(600)
    }
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            enabled: Self::default_enabled(),
            allowed_origins: Self::default_allowed_origins(),
            allowed_methods: Self::default_wildcard(),
            allowed_headers: Self::default_wildcard(),
            expose_headers: Vec::new(),
            allow_credentials: Self::default_allow_credentials(),
            max_age_secs: Self::default_max_age(),
        }
    }
}

/// 图片规整（/restyle）配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestyleConfig {
    /// JPEG 输出质量（1-100）
    #[serde(default = "RestyleConfig::default_jpeg_quality")]
    pub jpeg_quality: u8,
    /// 上传请求体上限（字节）
    #[serde(default = "RestyleConfig::default_max_upload_bytes")]
    pub max_upload_bytes: usize,
    /// 解码时单边像素上限，防止超大尺寸图片耗尽内存
    #[serde(default = "RestyleConfig::default_max_dimension")]
    pub max_dimension: u32,
    /// 并发处理许可数（0=自动，取 CPU 核心数）
    #[serde(default)]
    pub max_parallel: u32,
    /// 是否经由临时文件完成解码/编码
    #[serde(default)]
    pub spool_to_disk: bool,
    /// 临时文件目录（缺省为系统临时目录）
    #[serde(default)]
    pub spool_dir: Option<String>,
    /// 处理失败时仍返回 200（兼容旧前端）；为 false 时返回 422
    #[serde(default = "RestyleConfig::default_legacy_error_status")]
    pub legacy_error_status: bool,
}

impl RestyleConfig {
    fn default_jpeg_quality() -> u8 {
        90
    }
    fn default_max_upload_bytes() -> usize {
        20 * 1024 * 1024
    }
    fn default_max_dimension() -> u32 {
        16384
    }
    fn default_legacy_error_status() -> bool {
        true
    }

    /// 实际生效的 JPEG 质量
    pub fn effective_quality(&self) -> u8 {
        self.jpeg_quality.clamp(1, 100)
    }

    /// 实际生效的并发许可数
    pub fn effective_parallelism(&self) -> usize {
        match self.max_parallel {
            0 => num_cpus::get(),
            n => n as usize,
        }
    }

    /// 临时文件目录；仅在启用 spool_to_disk 时有值
    pub fn spool_path(&self) -> Option<PathBuf> {
        if !self.spool_to_disk {
            return None;
        }
        Some(
            self.spool_dir
                .as_deref()
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(std::env::temp_dir),
        )
    }
}

impl Default for RestyleConfig {
    fn default() -> Self {
        Self {
            jpeg_quality: Self::default_jpeg_quality(),
            max_upload_bytes: Self::default_max_upload_bytes(),
            max_dimension: Self::default_max_dimension(),
            max_parallel: 0,
            spool_to_disk: false,
            spool_dir: None,
            legacy_error_status: Self::default_legacy_error_status(),
        }
    }
}

/// OpenAPI 文档配置
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DocsConfig {
    /// 是否挂载 `/docs` 与 `/api-docs/openapi.json`
    #[serde(default)]
    pub enabled: bool,
}

/// 优雅退出配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownConfig {
    /// 等待在途请求完成的最长时间（秒）
    #[serde(default = "ShutdownConfig::default_timeout")]
    pub timeout_secs: u64,
}

impl ShutdownConfig {
    fn default_timeout() -> u64 {
        30
    }

    /// 获取优雅退出超时时间
    pub fn timeout_duration(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            timeout_secs: Self::default_timeout(),
        }
    }
}

/// 应用配置
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// CORS 配置
    #[serde(default)]
    pub cors: CorsConfig,
    /// 图片规整配置
    #[serde(default)]
    pub restyle: RestyleConfig,
    /// 文档配置
    #[serde(default)]
    pub docs: DocsConfig,
    /// 优雅退出配置
    #[serde(default)]
    pub shutdown: ShutdownConfig,
}

impl AppConfig {
    /// 从配置文件（可选）加载配置，支持环境变量覆盖
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::get_config_path();

        let builder = ConfigBuilder::builder()
            // 配置文件不存在时全部使用默认值
            .add_source(File::from(config_path).required(false))
            // 环境变量覆盖，例如：APP_SERVER__PORT=9000、APP_RESTYLE__JPEG_QUALITY=85
            .add_source(
                Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("cors.allowed_origins")
                    .with_list_parse_key("cors.allowed_methods")
                    .with_list_parse_key("cors.allowed_headers")
                    .with_list_parse_key("cors.expose_headers")
                    .try_parsing(true),
            )
            .build()?;

        builder.try_deserialize()
    }

    /// 获取全局配置单例
    pub fn global() -> &'static AppConfig {
        CONFIG.get().expect("配置未初始化，请先调用 init_global()")
    }

    /// 初始化全局配置
    pub fn init_global() -> Result<&'static AppConfig, ConfigError> {
        let config = Self::load()?;
        CONFIG
            .set(config)
            .map_err(|_| ConfigError::Message("配置已经被初始化".to_string()))?;
        Ok(Self::global())
    }

    /// 获取配置文件路径
    pub fn get_config_path() -> PathBuf {
        std::env::var_os(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("config.toml"))
    }

    /// 获取服务器监听地址
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
