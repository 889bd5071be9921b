//! 流数据帧解码
//!
//! 负载的形状由会话配置（传感器数）和设备返回的 [`SessionInfo`] 共同决定：
//!
//! ```text
//! power_bin / envelope / sparse   → Amplitude [sensors × n]
//! iq                              → Complex   [sensors × n]
//! distance_peak_fix_threshold     → Peaks     (每个传感器一条记录)
//! ```
//!
//! 负载长度与形状不符时一律返回 `FrameCorrupt`，不做截断或补零。

use crate::config::{Mode, RadarConfig, ServiceSettings};
use crate::reg::StreamPacket;
use crate::session::SessionInfo;
use crate::{ProtocolError, read_f32_le, read_i16_le, read_u16_le, read_u32_le};
use ndarray::{ArrayD, Axis, IxDyn};
use num_complex::Complex64;

/// 寄存器协议结果信息长度
pub const RESULT_INFO_LEN: usize = 8;

/// 每帧的结果元数据
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FrameMetadata {
    pub sequence_number: u32,
    pub data_saturated: bool,
    pub missed_data: bool,
    pub sensor_communication_error: bool,
}

impl FrameMetadata {
    /// 解析寄存器协议结果信息
    ///
    /// `seq: u32 LE | saturated: u8 | missed: u8 | comm_error: u8 | reserved: u8`
    pub fn from_register_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() != RESULT_INFO_LEN {
            return Err(ProtocolError::InvalidLength {
                expected: RESULT_INFO_LEN,
                actual: bytes.len(),
            });
        }
        Ok(Self {
            sequence_number: read_u32_le(&bytes[0..4]),
            data_saturated: bytes[4] != 0,
            missed_data: bytes[5] != 0,
            sensor_communication_error: bytes[6] != 0,
        })
    }

    pub fn to_register_bytes(&self) -> [u8; RESULT_INFO_LEN] {
        let mut bytes = [0u8; RESULT_INFO_LEN];
        bytes[0..4].copy_from_slice(&self.sequence_number.to_le_bytes());
        bytes[4] = self.data_saturated as u8;
        bytes[5] = self.missed_data as u8;
        bytes[6] = self.sensor_communication_error as u8;
        bytes
    }
}

/// 距离峰值记录
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DistancePeak {
    /// 距离（米）
    pub distance: f64,
    pub amplitude: f64,
    pub flags: u32,
}

impl DistancePeak {
    /// Bit 0: 检测到峰值
    pub fn detected(&self) -> bool {
        self.flags & 0x01 != 0
    }
}

/// 负载元素编码（由链路协议决定）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleEncoding {
    /// u16 幅值、i16 + i16 IQ、8 字节峰值记录
    Register,
    /// f32 幅值、f32 + f32 IQ、12 字节峰值记录
    Json,
}

impl SampleEncoding {
    /// 单个元素的字节数
    pub fn element_size(self, mode: Mode) -> usize {
        match (self, mode) {
            (SampleEncoding::Register, Mode::Iq) => 4,
            (SampleEncoding::Register, Mode::DistancePeakFixThreshold) => 8,
            (SampleEncoding::Register, _) => 2,
            (SampleEncoding::Json, Mode::Iq) => 8,
            (SampleEncoding::Json, Mode::DistancePeakFixThreshold) => 12,
            (SampleEncoding::Json, _) => 4,
        }
    }
}

/// 未解码的帧（元数据已解析，负载保持原始字节）
#[derive(Debug, Clone, PartialEq)]
pub struct RawFrame {
    pub metadata: FrameMetadata,
    pub payload: Vec<u8>,
    pub encoding: SampleEncoding,
}

impl TryFrom<StreamPacket> for RawFrame {
    type Error = ProtocolError;

    fn try_from(packet: StreamPacket) -> Result<Self, Self::Error> {
        Ok(Self {
            metadata: FrameMetadata::from_register_bytes(&packet.result_info)?,
            payload: packet.buffer,
            encoding: SampleEncoding::Register,
        })
    }
}

/// 解码后的帧数据
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// power_bin / envelope / sparse
    Amplitude(ArrayD<f64>),
    /// iq
    Complex(ArrayD<Complex64>),
    /// distance_peak，每个传感器一条
    Peaks(Vec<DistancePeak>),
    /// 单传感器 squeeze 后的 distance_peak
    Peak(DistancePeak),
}

impl Frame {
    /// 仅配置了一个传感器时去掉传感器维度
    pub fn squeeze(self) -> Frame {
        match self {
            Frame::Amplitude(arr) if arr.ndim() == 2 && arr.shape()[0] == 1 => {
                Frame::Amplitude(arr.index_axis_move(Axis(0), 0))
            },
            Frame::Complex(arr) if arr.ndim() == 2 && arr.shape()[0] == 1 => {
                Frame::Complex(arr.index_axis_move(Axis(0), 0))
            },
            Frame::Peaks(peaks) if peaks.len() == 1 => Frame::Peak(peaks[0]),
            other => other,
        }
    }

    pub fn shape(&self) -> Vec<usize> {
        match self {
            Frame::Amplitude(arr) => arr.shape().to_vec(),
            Frame::Complex(arr) => arr.shape().to_vec(),
            Frame::Peaks(peaks) => vec![peaks.len()],
            Frame::Peak(_) => Vec::new(),
        }
    }

    pub fn as_amplitude(&self) -> Option<&ArrayD<f64>> {
        match self {
            Frame::Amplitude(arr) => Some(arr),
            _ => None,
        }
    }

    pub fn as_complex(&self) -> Option<&ArrayD<Complex64>> {
        match self {
            Frame::Complex(arr) => Some(arr),
            _ => None,
        }
    }
}

fn grid<T>(sensors: usize, samples: usize, values: Vec<T>) -> Result<ArrayD<T>, ProtocolError> {
    ArrayD::from_shape_vec(IxDyn(&[sensors, samples]), values)
        .map_err(|e| ProtocolError::Malformed(format!("grid shape: {}", e)))
}

fn decode_peak(chunk: &[u8], encoding: SampleEncoding) -> DistancePeak {
    match encoding {
        SampleEncoding::Register => DistancePeak {
            distance: read_u32_le(&chunk[0..4]) as f64 / 1000.0,
            amplitude: read_u16_le(&chunk[4..6]) as f64,
            flags: chunk[6] as u32,
        },
        SampleEncoding::Json => DistancePeak {
            distance: read_f32_le(&chunk[0..4]) as f64,
            amplitude: read_f32_le(&chunk[4..8]) as f64,
            flags: read_u32_le(&chunk[8..12]),
        },
    }
}

/// 按会话形状解码一帧
///
/// 返回未 squeeze 的帧；是否去掉传感器维度由调用方决定。
pub fn decode_frame(
    raw: &RawFrame,
    config: &RadarConfig,
    info: &SessionInfo,
) -> Result<(FrameMetadata, Frame), ProtocolError> {
    let mode = config.mode();
    let sensors = config.sensors().len();
    let element_size = raw.encoding.element_size(mode);
    let per_sensor = if mode.is_grid() {
        info.samples_per_sensor(mode)
    } else {
        1
    };

    let expected = sensors * per_sensor * element_size;
    if raw.payload.len() != expected {
        return Err(ProtocolError::FrameCorrupt {
            expected,
            actual: raw.payload.len(),
        });
    }

    let chunks = raw.payload.chunks_exact(element_size);
    let frame = match (mode, raw.encoding) {
        (Mode::Iq, SampleEncoding::Register) => {
            let values = chunks
                .map(|c| Complex64::new(read_i16_le(&c[0..2]) as f64, read_i16_le(&c[2..4]) as f64))
                .collect();
            Frame::Complex(grid(sensors, per_sensor, values)?)
        },
        (Mode::Iq, SampleEncoding::Json) => {
            let values = chunks
                .map(|c| Complex64::new(read_f32_le(&c[0..4]) as f64, read_f32_le(&c[4..8]) as f64))
                .collect();
            Frame::Complex(grid(sensors, per_sensor, values)?)
        },
        (Mode::DistancePeakFixThreshold, encoding) => {
            Frame::Peaks(chunks.map(|c| decode_peak(c, encoding)).collect())
        },
        (_, SampleEncoding::Register) => {
            let values = chunks.map(|c| read_u16_le(c) as f64).collect();
            Frame::Amplitude(grid(sensors, per_sensor, values)?)
        },
        (_, SampleEncoding::Json) => {
            let values = chunks.map(|c| read_f32_le(c) as f64).collect();
            Frame::Amplitude(grid(sensors, per_sensor, values)?)
        },
    };

    Ok((raw.metadata, frame))
}
