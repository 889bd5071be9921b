//! # A111 Protocol
//!
//! A111 雷达模组的会话配置模型与线协议编解码（无硬件依赖）
//!
//! ## 模块
//!
//! - `config`: 各采集模式的配置结构体（字段级 + 跨字段校验）
//! - `registers`: 寄存器地址、控制命令与状态位域
//! - `reg`: 寄存器协议帧（串口/SPI 共用）
//! - `json`: JSON 协议消息（Socket 链路）
//! - `session`: 会话建立请求编码、`SessionInfo` 解码
//! - `frame`: 流数据帧解码（按模式重塑为网格或峰值记录）
//!
//! ## 字节序
//!
//! 寄存器协议与 JSON 协议的二进制负载均为小端字节序。

pub mod config;
pub mod frame;
pub mod json;
pub mod reg;
pub mod registers;
pub mod session;

// 重新导出常用类型
pub use config::*;
pub use frame::{DistancePeak, Frame, FrameMetadata, RawFrame, SampleEncoding, decode_frame};
pub use json::{JsonDecoder, JsonPacket};
pub use reg::{FrameDecoder, RegisterPacket, StreamPacket};
pub use registers::{MainControl, Register, Status, StreamingControl};
pub use session::{RegisterWrite, SessionInfo, SetupReply};

use thiserror::Error;

/// 协议解析错误类型
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Invalid frame length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("Frame corrupt: payload is {actual} bytes, session shape implies {expected}")]
    FrameCorrupt { expected: usize, actual: usize },

    #[error("Invalid register: 0x{register:02X}")]
    InvalidRegister { register: u8 },

    #[error("Invalid command byte: 0x{command:02X}")]
    InvalidCommand { command: u8 },

    #[error("Invalid value for field {field}: {value}")]
    InvalidValue { field: String, value: i64 },

    #[error("Missing field: {0}")]
    MissingField(String),

    #[error("Malformed message: {0}")]
    Malformed(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// 从切片读取小端 u16（调用方保证长度）
pub(crate) fn read_u16_le(bytes: &[u8]) -> u16 {
    u16::from_le_bytes([bytes[0], bytes[1]])
}

/// 从切片读取小端 u32（调用方保证长度）
pub(crate) fn read_u32_le(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// 从切片读取小端 i16（调用方保证长度）
pub(crate) fn read_i16_le(bytes: &[u8]) -> i16 {
    i16::from_le_bytes([bytes[0], bytes[1]])
}

/// 从切片读取小端 f32（调用方保证长度）
pub(crate) fn read_f32_le(bytes: &[u8]) -> f32 {
    f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}
