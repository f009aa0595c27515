/// 健康检查
pub mod health;

/// 图片规整（/restyle）
pub mod restyle;
