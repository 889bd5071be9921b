//! # A111 Transport Layer
//!
//! 链路抽象层：串口寄存器链路、SPI 寄存器链路、Socket JSON 链路。
//!
//! 每个链路只负责搬运字节/消息并维护连接状态，协议语义（会话建立、
//! 流控制）由上层客户端负责。

use std::time::Duration;
use thiserror::Error;

pub use a111_protocol::{JsonPacket, ProtocolError, RegisterPacket, StreamPacket};

pub mod serial;
pub mod socket;
pub mod spi;
pub mod stream;

pub use serial::SerialTransport;
pub use socket::SocketTransport;
pub use spi::{SpiBus, SpiTransport};
pub use stream::ByteStream;

/// 链路层统一错误类型
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Device Error: {0}")]
    Device(#[from] DeviceError),
    #[error("Read timeout")]
    Timeout,
    #[error("Transport not connected")]
    NotConnected,
    #[error("Malformed message: {0}")]
    Malformed(String),
}

impl TransportError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, TransportError::Timeout)
    }
}

impl From<ProtocolError> for TransportError {
    fn from(e: ProtocolError) -> Self {
        TransportError::Malformed(e.to_string())
    }
}

/// 设备/后端错误的结构化分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceErrorKind {
    Unknown,
    NotFound,
    NoDevice,
    AccessDenied,
    Busy,
    UnsupportedConfig,
    InvalidResponse,
    Backend,
}

/// 结构化设备错误
#[derive(Error, Debug, Clone)]
#[error("{kind:?}: {message}")]
pub struct DeviceError {
    pub kind: DeviceErrorKind,
    pub message: String,
}

impl DeviceError {
    pub fn new(kind: DeviceErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(
            self.kind,
            DeviceErrorKind::NoDevice | DeviceErrorKind::AccessDenied | DeviceErrorKind::NotFound
        )
    }
}

impl From<String> for DeviceError {
    fn from(message: String) -> Self {
        Self::new(DeviceErrorKind::Unknown, message)
    }
}

impl From<&str> for DeviceError {
    fn from(message: &str) -> Self {
        Self::new(DeviceErrorKind::Unknown, message)
    }
}

/// 链路统一接口
///
/// 严格的请求/应答模式：每次 `send` 之后至多一个未完成的应答。
pub trait Transport: Send {
    /// 链路上传输的消息类型
    type Message;

    /// 打开链路；已连接时为空操作
    fn connect(&mut self) -> Result<(), TransportError>;

    fn send(&mut self, message: Self::Message) -> Result<(), TransportError>;

    /// 阻塞接收一条消息，超过 `timeout` 返回 `TransportError::Timeout`
    fn receive(&mut self, timeout: Duration) -> Result<Self::Message, TransportError>;

    /// 关闭链路；未连接时为空操作
    fn disconnect(&mut self) -> Result<(), TransportError>;

    fn is_connected(&self) -> bool;

    /// 丢弃已缓冲但尚未交付的数据
    fn discard_pending(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_error_fatal() {
        assert!(DeviceError::new(DeviceErrorKind::NoDevice, "gone").is_fatal());
        assert!(!DeviceError::new(DeviceErrorKind::Busy, "busy").is_fatal());
        assert_eq!(
            DeviceError::from("x").to_string(),
            "Unknown: x".to_string()
        );
    }

    #[test]
    fn test_protocol_error_becomes_malformed() {
        let err: TransportError = ProtocolError::InvalidCommand { command: 0x42 }.into();
        assert!(matches!(err, TransportError::Malformed(ref m) if m.contains("0x42")));
        assert!(!err.is_timeout());
        assert!(TransportError::Timeout.is_timeout());
    }
}
