//! 寄存器地址与控制值
//!
//! 串口与 SPI 链路共用同一张寄存器表，所有寄存器均为 32 位。

use crate::ProtocolError;
use bilge::prelude::*;
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// 设备产品 ID（连接握手时校验）
pub const PRODUCT_ID: u32 = 0xACC0;

/// 传感器选择位掩码可容纳的最大传感器编号
pub const MAX_SENSOR_ID: u32 = 32;

/// 寄存器地址
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum Register {
    ModeSelection = 0x02,
    MainControl = 0x03,
    StreamingControl = 0x05,
    Status = 0x06,
    SensorSelection = 0x07,
    ProductId = 0x10,
    RangeStart = 0x20,
    RangeLength = 0x21,
    SweepRate = 0x23,
    Gain = 0x24,
    ExperimentalStitching = 0x25,
    ProfileSelection = 0x28,
    BinCount = 0x40,
    RunningAverageFactor = 0x41,
    CompensatePhase = 0x42,
    NumberOfSubsweeps = 0x43,
    ActualRangeStart = 0x81,
    ActualRangeLength = 0x82,
    ActualBinCount = 0x83,
    DataLength = 0x84,
    ResultInfoLength = 0x85,
    DataLengthBytes = 0x86,
}

impl Register {
    /// 从地址字节解析
    pub fn from_address(address: u8) -> Result<Self, ProtocolError> {
        Register::try_from(address).map_err(|_| ProtocolError::InvalidRegister { register: address })
    }

    pub fn address(self) -> u8 {
        self.into()
    }
}

/// `MAIN_CONTROL` 写入值
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u32)]
pub enum MainControl {
    Stop = 0,
    Create = 1,
    Activate = 2,
    CreateAndActivate = 3,
    ClearStatus = 4,
    /// 确认当前帧已读取（清除 data_ready）
    AckData = 5,
}

/// `STREAMING_CONTROL` 写入值
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u32)]
pub enum StreamingControl {
    /// 主机轮询读取（SPI）
    Disable = 0,
    /// 设备主动推送流数据包（串口）
    Uart = 1,
}

/// `STATUS` 寄存器位域
///
/// - Bit 0: 会话已创建
/// - Bit 1: 会话已激活
/// - Bit 8: 有新帧可读
/// - Bit 16: 创建失败（配置被拒绝）
/// - Bit 17: 激活失败
/// - Bit 18: 缓冲区错误
#[bitsize(32)]
#[derive(FromBits, DebugBits, Clone, Copy, Default)]
pub struct Status {
    pub created: bool,
    pub activated: bool,
    pub reserved0: u6,
    pub data_ready: bool,
    pub reserved1: u7,
    pub creation_error: bool,
    pub activation_error: bool,
    pub buffer_error: bool,
    pub reserved2: u13,
}

impl Status {
    pub fn from_raw(raw: u32) -> Self {
        Status::from(u32::new(raw))
    }

    pub fn raw(self) -> u32 {
        u32::from(self).value()
    }

    /// 任一错误位置位
    pub fn has_error(self) -> bool {
        self.creation_error() || self.activation_error() || self.buffer_error()
    }
}
