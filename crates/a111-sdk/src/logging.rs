//! 日志初始化
//!
//! SDK 内部统一使用 `tracing` 记录日志；`log` 生态的记录（如串口后端）
//! 通过 `tracing-log` 转发。

use tracing_subscriber::EnvFilter;

/// 安装全局日志订阅者
///
/// `RUST_LOG` 已设置时以其为准，否则使用 `default_filter`（如 `"info"`、
/// `"a111_client=debug"`）。重复调用时保留第一次安装的订阅者。
pub fn init_logger(default_filter: &str) {
    let _ = tracing_log::LogTracer::init();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}
