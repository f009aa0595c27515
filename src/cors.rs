use axum::http::{HeaderValue, Method, header};
use std::time::Duration;
use tower_http::cors::{AllowHeaders, AllowMethods, Any, CorsLayer, ExposeHeaders};

use crate::config::CorsConfig;

/// 根据配置构建 CORS 中间件
///
/// 允许凭证时，方法与请求头的 "*" 通过回显预检请求中的
/// `Access-Control-Request-Method/Headers` 实现（规范不允许凭证与通配符同时出现）。
/// Origin 不支持这种回显：凭证 + 任意 Origin 视为配置错误。
pub fn build_cors_layer(cors: &CorsConfig) -> Option<CorsLayer> {
    if !cors.enabled {
        return None;
    }

    let (any_origin, origins) = parse_allowed_origins(&cors.allowed_origins);
    if !any_origin && origins.is_empty() {
        tracing::warn!("CORS 已启用但 allowed_origins 为空，已跳过启用");
        return None;
    }
    if cors.allow_credentials && any_origin {
        tracing::error!("CORS 配置无效：allow_credentials=true 不能与 origin \"*\" 同时使用，已跳过启用");
        return None;
    }

    let (any_methods, methods) = parse_allowed_methods(&cors.allowed_methods);
    let (any_headers, headers) = parse_header_names("allowed_headers", &cors.allowed_headers);
    let (any_expose, expose_headers) = parse_header_names("expose_headers", &cors.expose_headers);

    let mut layer = CorsLayer::new();

    layer = if any_origin {
        layer.allow_origin(Any)
    } else {
        layer.allow_origin(origins)
    };

    layer = match (any_methods, cors.allow_credentials) {
        (true, true) => layer.allow_methods(AllowMethods::mirror_request()),
        (true, false) => layer.allow_methods(Any),
        (false, _) if !methods.is_empty() => layer.allow_methods(methods),
        _ => layer,
    };

    layer = match (any_headers, cors.allow_credentials) {
        (true, true) => layer.allow_headers(AllowHeaders::mirror_request()),
        (true, false) => layer.allow_headers(Any),
        (false, _) if !headers.is_empty() => layer.allow_headers(headers),
        _ => layer,
    };

    if any_expose {
        if cors.allow_credentials {
            tracing::warn!("CORS expose_headers=\"*\" 与凭证冲突，已忽略");
        } else {
            layer = layer.expose_headers(Any);
        }
    } else if !expose_headers.is_empty() {
        layer = layer.expose_headers(ExposeHeaders::list(expose_headers));
    }

    if cors.allow_credentials {
        layer = layer.allow_credentials(true);
    }

    if let Some(secs) = cors.max_age_secs
        && secs > 0
    {
        layer = layer.max_age(Duration::from_secs(secs));
    }

    Some(layer)
}

fn parse_allowed_origins(values: &[String]) -> (bool, Vec<HeaderValue>) {
    let mut any = false;
    let mut origins = Vec::new();
    for value in values.iter().map(|v| v.trim()).filter(|v| !v.is_empty()) {
        if value == "*" {
            any = true;
            continue;
        }
        // 浏览器发送的 Origin 不带结尾斜杠
        match HeaderValue::from_str(value.trim_end_matches('/')) {
            Ok(v) => origins.push(v),
            Err(_) => tracing::warn!("CORS allowed_origins 含无效值: {}", value),
        }
    }
    (any, origins)
}

fn parse_allowed_methods(values: &[String]) -> (bool, Vec<Method>) {
    let mut any = false;
    let mut methods = Vec::new();
    for value in values.iter().map(|v| v.trim()).filter(|v| !v.is_empty()) {
        if value == "*" {
            any = true;
            continue;
        }
        match Method::from_bytes(value.to_ascii_uppercase().as_bytes()) {
            Ok(m) => methods.push(m),
            Err(_) => tracing::warn!("CORS allowed_methods 含无效值: {}", value),
        }
    }
    (any, methods)
}

fn parse_header_names(label: &str, values: &[String]) -> (bool, Vec<header::HeaderName>) {
    let mut any = false;
    let mut headers = Vec::new();
    for value in values.iter().map(|v| v.trim()).filter(|v| !v.is_empty()) {
        if value == "*" {
            any = true;
            continue;
        }
        match header::HeaderName::from_bytes(value.to_ascii_lowercase().as_bytes()) {
            Ok(h) => headers.push(h),
            Err(_) => tracing::warn!("CORS {} 含无效值: {}", label, value),
        }
    }
    (any, headers)
}
