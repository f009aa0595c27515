use axum::Router;
use tower_http::compression::CompressionLayer;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::config::AppConfig;
use crate::cors::build_cors_layer;
use crate::features::{health, restyle};
use crate::openapi::ApiDoc;
use crate::request_id::request_id_middleware;
use crate::state::AppState;

pub(crate) fn compression_predicate() -> impl tower_http::compression::predicate::Predicate {
    use tower_http::compression::predicate::{NotForContentType, Predicate, SizeAbove};

    // 只压缩 JSON/文本：JPEG 本身已压缩，二进制下载收益不确定且浪费 CPU。
    SizeAbove::default()
        .and(NotForContentType::GRPC)
        .and(NotForContentType::IMAGES)
        .and(NotForContentType::SSE)
        .and(NotForContentType::const_new("application/octet-stream"))
}

/// 组装完整的应用路由（含全部中间件）
///
/// 中间件由外到内：CORS -> request_id -> trace -> 压缩 -> 路由。
/// CORS 放在最外层，预检请求不进入业务路由。
pub fn create_app(config: &AppConfig, state: AppState) -> Router {
    let mut router = Router::<AppState>::new()
        .merge(health::create_health_router())
        .merge(restyle::create_restyle_router(
            config.restyle.max_upload_bytes,
        ));

    if config.docs.enabled {
        router =
            router.merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()));
    }

    let mut app = router
        .with_state(state)
        .layer(CompressionLayer::new().compress_when(compression_predicate()))
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn(request_id_middleware));

    if let Some(cors) = build_cors_layer(&config.cors) {
        app = app.layer(cors);
    }

    app
}
