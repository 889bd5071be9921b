//! 会话建立：配置 → 寄存器写入序列，寄存器读取 → `SessionInfo`
//!
//! 定点换算：米 → 毫米，Hz → mHz，增益/系数 × 1000。

use crate::ProtocolError;
use crate::config::{ConfigError, Mode, RadarConfig, ServiceSettings};
use crate::registers::{MAX_SENSOR_ID, Register};

/// 设备返回的会话参数
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SessionInfo {
    /// 实际测距起点（米）
    pub range_start: f64,
    /// 实际测距长度（米）
    pub range_length: f64,
    /// 每个传感器每帧的采样点数
    pub data_length: usize,
    /// 设备选定的 bin 数量（仅 power bin）
    pub actual_bin_count: Option<usize>,
    /// 采样步长（米，仅 JSON 协议提供）
    pub step_length: Option<f64>,
}

impl SessionInfo {
    /// 每个传感器每帧的元素个数
    ///
    /// Power bin 的帧长度由设备选定的 bin 数决定。
    pub fn samples_per_sensor(&self, mode: Mode) -> usize {
        match (mode, self.actual_bin_count) {
            (Mode::PowerBin, Some(bins)) => bins,
            _ => self.data_length,
        }
    }
}

/// 会话建立结果
#[derive(Debug, Clone, PartialEq)]
pub enum SetupReply {
    Accepted(SessionInfo),
    /// 设备拒绝配置（附设备给出的原因）
    Rejected(String),
}

/// 单次寄存器写入
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterWrite {
    pub register: Register,
    pub value: u32,
}

impl RegisterWrite {
    pub fn new(register: Register, value: impl Into<u32>) -> Self {
        Self {
            register,
            value: value.into(),
        }
    }
}

/// 以千分之一为单位写入寄存器，超出 u32 时报错
fn milli(field: &'static str, value: f64) -> Result<u32, ConfigError> {
    u32::try_from((value * 1000.0).round() as i64).map_err(|_| out_of_range(field, value))
}

/// 有符号毫米值按补码写入寄存器
fn milli_signed(field: &'static str, value: f64) -> Result<u32, ConfigError> {
    i32::try_from((value * 1000.0).round() as i64)
        .map(|v| v as u32)
        .map_err(|_| out_of_range(field, value))
}

fn out_of_range(field: &'static str, value: f64) -> ConfigError {
    ConfigError::InvalidValue {
        field,
        reason: format!("{} does not fit the 32-bit register in thousandths", value),
    }
}

fn sensor_mask(sensors: &[u32]) -> Result<u32, ConfigError> {
    sensors.iter().try_fold(0u32, |mask, &id| {
        if id == 0 || id > MAX_SENSOR_ID {
            return Err(ConfigError::InvalidValue {
                field: "sensors",
                reason: format!("sensor id {} cannot be addressed over the register protocol", id),
            });
        }
        Ok(mask | (1 << (id - 1)))
    })
}

/// 将配置编码为按固定顺序排列的寄存器写入
///
/// 顺序：mode, sensors, sweep_rate, gain, range_start, range_length,
/// stitching, 然后是模式字段。必需字段缺失时返回 `MissingField`。
pub fn encode_setup(config: &RadarConfig) -> Result<Vec<RegisterWrite>, ConfigError> {
    config.check_complete()?;
    let sweep_rate = config.sweep_rate().ok_or(ConfigError::MissingField("sweep_rate"))?;
    let range_start = config.range_start().ok_or(ConfigError::MissingField("range_start"))?;
    let range_length = config
        .range_length()
        .ok_or(ConfigError::MissingField("range_length"))?;

    let mut writes = vec![
        RegisterWrite::new(Register::ModeSelection, config.mode()),
        RegisterWrite::new(Register::SensorSelection, sensor_mask(config.sensors())?),
        RegisterWrite::new(Register::SweepRate, milli("sweep_rate", sweep_rate)?),
    ];
    if let Some(gain) = config.gain() {
        writes.push(RegisterWrite::new(Register::Gain, milli("gain", gain)?));
    }
    writes.push(RegisterWrite::new(
        Register::RangeStart,
        milli_signed("range_start", range_start)?,
    ));
    writes.push(RegisterWrite::new(
        Register::RangeLength,
        milli("range_length", range_length)?,
    ));
    if let Some(stitching) = config.experimental_stitching() {
        writes.push(RegisterWrite::new(Register::ExperimentalStitching, stitching));
    }

    if let Some(bins) = config.bin_count() {
        writes.push(RegisterWrite::new(Register::BinCount, bins));
    }
    if let Some(profile) = config.session_profile() {
        writes.push(RegisterWrite::new(Register::ProfileSelection, profile));
    }
    if let Some(compensate) = config.compensate_phase() {
        writes.push(RegisterWrite::new(Register::CompensatePhase, compensate));
    }
    if let Some(factor) = config.running_average_factor() {
        writes.push(RegisterWrite::new(
            Register::RunningAverageFactor,
            milli("running_average_factor", factor)?,
        ));
    }
    if let Some(subsweeps) = config.number_of_subsweeps() {
        writes.push(RegisterWrite::new(Register::NumberOfSubsweeps, subsweeps));
    }
    Ok(writes)
}

/// 会话建立后需要读取的寄存器
pub fn session_info_registers(mode: Mode) -> Vec<Register> {
    let mut registers = vec![
        Register::ActualRangeStart,
        Register::ActualRangeLength,
        Register::DataLength,
    ];
    if mode == Mode::PowerBin {
        registers.push(Register::ActualBinCount);
    }
    registers
}

/// 由寄存器读取结果解码 `SessionInfo`
pub fn decode_session_info(
    mode: Mode,
    reads: &[(Register, u32)],
) -> Result<SessionInfo, ProtocolError> {
    let lookup = |register: Register| {
        reads
            .iter()
            .find(|(r, _)| *r == register)
            .map(|&(_, value)| value)
            .ok_or_else(|| ProtocolError::MissingField(format!("{:?}", register)))
    };

    let range_start = lookup(Register::ActualRangeStart)? as i32 as f64 / 1000.0;
    let range_length_raw = lookup(Register::ActualRangeLength)? as i32;
    if range_length_raw < 0 {
        return Err(ProtocolError::InvalidValue {
            field: "range_length".into(),
            value: range_length_raw as i64,
        });
    }
    let data_length = lookup(Register::DataLength)?;
    if data_length == 0 {
        return Err(ProtocolError::InvalidValue {
            field: "data_length".into(),
            value: 0,
        });
    }

    let actual_bin_count = if mode == Mode::PowerBin {
        let bins = lookup(Register::ActualBinCount)?;
        if bins == 0 {
            return Err(ProtocolError::InvalidValue {
                field: "actual_bin_count".into(),
                value: 0,
            });
        }
        Some(bins as usize)
    } else {
        None
    };

    Ok(SessionInfo {
        range_start,
        range_length: range_length_raw as f64 / 1000.0,
        data_length: data_length as usize,
        actual_bin_count,
        step_length: None,
    })
}
