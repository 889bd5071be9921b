//! 客户端运行参数

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 客户端运行参数
///
/// 可从 TOML 加载，缺省字段使用默认值：
///
/// ```
/// use a111_client::ClientOptions;
///
/// let options = ClientOptions::from_toml_str("receive_timeout_ms = 500\nsqueeze = false").unwrap();
/// assert_eq!(options.receive_timeout_ms, 500);
/// assert!(!options.squeeze);
/// assert_eq!(options.max_consecutive_failures, 3);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientOptions {
    /// 单次应答 / 单帧的接收超时（毫秒）
    pub receive_timeout_ms: u64,
    /// 停止流的等待上限（毫秒）
    pub stop_timeout_ms: u64,
    /// 关闭链路的等待上限（毫秒），超时后强制放弃
    pub close_timeout_ms: u64,
    /// 连续超时/帧损坏达到此次数后断开链路
    pub max_consecutive_failures: u32,
    /// 单传感器时去掉传感器维度
    pub squeeze: bool,
    /// SPI 链路 STATUS 轮询间隔（微秒）
    pub spi_poll_interval_us: u64,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            receive_timeout_ms: 2_000,
            stop_timeout_ms: 500,
            close_timeout_ms: 1_000,
            max_consecutive_failures: 3,
            squeeze: true,
            spi_poll_interval_us: 500,
        }
    }
}

impl ClientOptions {
    /// 从 TOML 文本加载
    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }

    pub fn spi_poll_interval(&self) -> Duration {
        Duration::from_micros(self.spi_poll_interval_us)
    }
}
