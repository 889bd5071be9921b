//! 客户端错误类型定义

use crate::state::SessionState;
use a111_protocol::{ConfigError, ProtocolError};
use a111_transport::TransportError;
use thiserror::Error;

/// 客户端错误类型
#[derive(Error, Debug)]
pub enum ClientError {
    /// 配置未通过本地校验（不会发送到设备）
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// 链路打开/读写失败
    #[error("Connection error: {0}")]
    Connection(#[source] TransportError),

    /// 在限定时间内没有收到应答或数据帧
    #[error("Transport timeout")]
    TransportTimeout,

    /// 设备应答不符合协议（格式错误、缺少确认、应答不匹配）
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// 帧负载长度与会话形状不符
    #[error("Frame corrupt: expected {expected} bytes, got {actual}")]
    FrameCorrupt { expected: usize, actual: usize },

    /// 设备拒绝会话配置
    #[error("Configuration rejected by device: {0}")]
    ConfigRejected(String),

    /// 连续失败次数达到上限，链路已断开
    #[error("Stream lost after {failures} consecutive failures")]
    StreamLost { failures: u32 },

    /// 当前状态不允许该操作
    #[error("Invalid state: expected {expected}, actual {actual}")]
    InvalidState {
        expected: &'static str,
        actual: SessionState,
    },
}

impl ClientError {
    /// 单帧级别的失败，重试 `get_next()` 可能成功
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClientError::TransportTimeout | ClientError::FrameCorrupt { .. }
        )
    }
}

impl From<TransportError> for ClientError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Timeout => ClientError::TransportTimeout,
            TransportError::Malformed(message) => ClientError::Protocol(message),
            other => ClientError::Connection(other),
        }
    }
}

impl From<ProtocolError> for ClientError {
    fn from(e: ProtocolError) -> Self {
        match e {
            ProtocolError::FrameCorrupt { expected, actual } => {
                ClientError::FrameCorrupt { expected, actual }
            },
            other => ClientError::Protocol(other.to_string()),
        }
    }
}
