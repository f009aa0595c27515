use restyle_backend::{AppConfig, AppState, ShutdownManager, create_app, shutdown};

#[tokio::main]
async fn main() {
    // 先加载配置，日志级别依赖配置
    let config = match AppConfig::init_global() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config init failed: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.default_directive().into()),
        )
        .init();
    tracing::info!("配置加载完成（文件: {:?}，不存在时使用默认值）", AppConfig::get_config_path());

    let shutdown_manager = ShutdownManager::new();
    if let Err(e) = shutdown_manager.start_signal_handler() {
        tracing::error!("信号处理器启动失败: {}", e);
        std::process::exit(1);
    }

    let state = AppState::from_config(config);
    tracing::info!(
        "图片处理: jpeg_quality={}, 并发许可={}, spool_to_disk={}, legacy_error_status={}",
        state.normalizer.quality(),
        config.restyle.effective_parallelism(),
        config.restyle.spool_to_disk,
        config.restyle.legacy_error_status
    );
    let app = create_app(config, state);

    let addr = config.server_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| {
            tracing::error!("Bind address failed {}: {}", addr, e);
            std::process::exit(1);
        });

    tracing::info!("Server: http://{}", addr);
    tracing::info!("Health: http://{}/health", addr);
    tracing::info!("Restyle: http://{}/restyle", addr);
    if config.docs.enabled {
        tracing::info!("Docs: http://{}/docs", addr);
    }

    let signal_manager = shutdown_manager.clone();
    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        let reason = signal_manager.wait_for_shutdown().await;
        tracing::info!("接收到退出信号: {:?}，开始优雅关闭HTTP服务器...", reason);
    });

    shutdown::serve_until_drained(
        server,
        &shutdown_manager,
        config.shutdown.timeout_duration(),
    )
    .await;

    tracing::info!("服务器已关闭");
}
