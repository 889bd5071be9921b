//! JSON 协议（Socket 链路）
//!
//! 每条消息是一行 JSON 文档，以 `\n` 结尾。若消息头包含
//! `"payload_size": N`，其后紧跟 N 字节原始二进制负载。
//!
//! ```text
//! → {"cmd":"setup_request","mode":"power_bin",...}
//! ← {"status":"ok","range_start":0.1,...}
//! → {"cmd":"start_streaming_request"}
//! ← {"status":"start"}
//! ← {"result_info":{...},"payload_size":10}<10 bytes>
//! ```

use crate::ProtocolError;
use crate::config::{ConfigError, Mode, RadarConfig, ServiceSettings};
use crate::frame::{FrameMetadata, RawFrame, SampleEncoding};
use crate::session::{SessionInfo, SetupReply};
use bytes::BytesMut;
use serde_json::{Map, Value, json};

pub const CMD_SETUP: &str = "setup_request";
pub const CMD_START_STREAMING: &str = "start_streaming_request";
pub const CMD_STOP_STREAMING: &str = "stop_streaming_request";

pub const STATUS_OK: &str = "ok";
pub const STATUS_ERROR: &str = "error";
pub const STATUS_START: &str = "start";
pub const STATUS_STOP: &str = "stop";

const PAYLOAD_SIZE: &str = "payload_size";

/// 一条 JSON 消息（消息头 + 可选二进制负载）
#[derive(Debug, Clone, PartialEq)]
pub struct JsonPacket {
    pub header: Value,
    pub payload: Option<Vec<u8>>,
}

impl JsonPacket {
    pub fn new(header: Value) -> Self {
        Self {
            header,
            payload: None,
        }
    }

    pub fn with_payload(header: Value, payload: Vec<u8>) -> Self {
        Self {
            header,
            payload: Some(payload),
        }
    }

    /// 消息头中的 `status` 字段
    pub fn status(&self) -> Option<&str> {
        self.header.get("status").and_then(Value::as_str)
    }

    /// 编码为一行 JSON（有负载时自动写入 `payload_size`）
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let mut header = self.header.clone();
        if let Some(payload) = &self.payload {
            match header.as_object_mut() {
                Some(obj) => {
                    obj.insert(PAYLOAD_SIZE.into(), payload.len().into());
                },
                None => {
                    return Err(ProtocolError::Malformed(
                        "message with payload must have an object header".into(),
                    ));
                },
            }
        }
        let mut bytes = serde_json::to_vec(&header)?;
        bytes.push(b'\n');
        if let Some(payload) = &self.payload {
            bytes.extend_from_slice(payload);
        }
        Ok(bytes)
    }
}

/// 字节流 → JSON 消息的增量解码器
#[derive(Debug, Default)]
pub struct JsonDecoder {
    buf: BytesMut,
    /// 已解析消息头、正在等待负载
    pending: Option<(Value, usize)>,
}

impl JsonDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn clear(&mut self) {
        self.buf.clear();
        self.pending = None;
    }

    /// 尝试解出下一条消息，数据不足时返回 `Ok(None)`
    pub fn next_packet(&mut self) -> Result<Option<JsonPacket>, ProtocolError> {
        if self.pending.is_none() {
            let Some(pos) = self.buf.iter().position(|&b| b == b'\n') else {
                return Ok(None);
            };
            let line = self.buf.split_to(pos + 1);
            let header: Value = serde_json::from_slice(&line[..pos])?;
            let size = match header.get(PAYLOAD_SIZE) {
                None => 0,
                Some(v) => v.as_u64().ok_or_else(|| {
                    ProtocolError::Malformed(format!("invalid payload_size: {}", v))
                })? as usize,
            };
            if size == 0 {
                return Ok(Some(JsonPacket::new(header)));
            }
            self.pending = Some((header, size));
        }

        match self.pending.take() {
            Some((header, size)) if self.buf.len() >= size => {
                let payload = self.buf.split_to(size).to_vec();
                Ok(Some(JsonPacket::with_payload(header, payload)))
            },
            pending => {
                self.pending = pending;
                Ok(None)
            },
        }
    }
}

/// 会话建立请求
///
/// 字段顺序与寄存器协议一致。必需字段缺失时返回 `MissingField`。
pub fn encode_setup(config: &RadarConfig) -> Result<Value, ConfigError> {
    config.check_complete()?;

    let mut obj = Map::new();
    obj.insert("cmd".into(), CMD_SETUP.into());
    obj.insert("mode".into(), config.mode().as_str().into());
    obj.insert("sensors".into(), config.sensors().to_vec().into());
    obj.insert(
        "sweep_rate".into(),
        config.sweep_rate().ok_or(ConfigError::MissingField("sweep_rate"))?.into(),
    );
    if let Some(gain) = config.gain() {
        obj.insert("gain".into(), gain.into());
    }
    obj.insert(
        "range_start".into(),
        config.range_start().ok_or(ConfigError::MissingField("range_start"))?.into(),
    );
    obj.insert(
        "range_length".into(),
        config
            .range_length()
            .ok_or(ConfigError::MissingField("range_length"))?
            .into(),
    );
    if let Some(stitching) = config.experimental_stitching() {
        obj.insert("experimental_stitching".into(), stitching.into());
    }

    if let Some(bins) = config.bin_count() {
        obj.insert("bin_count".into(), bins.into());
    }
    if let Some(profile) = config.session_profile() {
        obj.insert("session_profile".into(), profile.to_string().into());
    }
    if let Some(compensate) = config.compensate_phase() {
        obj.insert("compensate_phase".into(), compensate.into());
    }
    if let Some(factor) = config.running_average_factor() {
        obj.insert("running_average_factor".into(), factor.into());
    }
    if let Some(subsweeps) = config.number_of_subsweeps() {
        obj.insert("number_of_subsweeps".into(), subsweeps.into());
    }
    Ok(Value::Object(obj))
}

pub fn start_streaming_request() -> Value {
    json!({ "cmd": CMD_START_STREAMING })
}

pub fn stop_streaming_request() -> Value {
    json!({ "cmd": CMD_STOP_STREAMING })
}

/// 校验应答的 `status` 字段
pub fn expect_status(header: &Value, expected: &str) -> Result<(), ProtocolError> {
    match header.get("status").and_then(Value::as_str) {
        Some(status) if status == expected => Ok(()),
        Some(status) => Err(ProtocolError::Malformed(format!(
            "expected status '{}', got '{}'",
            expected, status
        ))),
        None => Err(ProtocolError::MissingField("status".into())),
    }
}

fn require_f64(header: &Value, field: &str) -> Result<f64, ProtocolError> {
    header
        .get(field)
        .ok_or_else(|| ProtocolError::MissingField(field.into()))?
        .as_f64()
        .ok_or_else(|| ProtocolError::Malformed(format!("{} is not a number", field)))
}

fn require_count(header: &Value, field: &str) -> Result<usize, ProtocolError> {
    let value = header
        .get(field)
        .ok_or_else(|| ProtocolError::MissingField(field.into()))?;
    match value.as_i64() {
        Some(n) if n > 0 => Ok(n as usize),
        Some(n) => Err(ProtocolError::InvalidValue {
            field: field.into(),
            value: n,
        }),
        None => Err(ProtocolError::Malformed(format!("{} is not an integer", field))),
    }
}

/// 解析会话建立应答
pub fn decode_setup_response(header: &Value, mode: Mode) -> Result<SetupReply, ProtocolError> {
    match header.get("status").and_then(Value::as_str) {
        Some(STATUS_OK) => {},
        Some(STATUS_ERROR) => {
            let message = header
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("setup rejected by device");
            return Ok(SetupReply::Rejected(message.to_string()));
        },
        Some(other) => {
            return Err(ProtocolError::Malformed(format!("unexpected status '{}'", other)));
        },
        None => return Err(ProtocolError::MissingField("status".into())),
    }

    let range_length = require_f64(header, "range_length")?;
    if range_length < 0.0 {
        return Err(ProtocolError::InvalidValue {
            field: "range_length".into(),
            value: (range_length * 1000.0) as i64,
        });
    }
    let actual_bin_count = match mode {
        Mode::PowerBin => Some(require_count(header, "actual_bin_count")?),
        _ => None,
    };
    let step_length = match header.get("step_length") {
        Some(v) => Some(
            v.as_f64()
                .ok_or_else(|| ProtocolError::Malformed("step_length is not a number".into()))?,
        ),
        None => None,
    };

    Ok(SetupReply::Accepted(SessionInfo {
        range_start: require_f64(header, "range_start")?,
        range_length,
        data_length: require_count(header, "data_length")?,
        actual_bin_count,
        step_length,
    }))
}

/// 解析数据消息中的 `result_info` 对象
pub fn decode_result_info(header: &Value) -> Result<FrameMetadata, ProtocolError> {
    let info = header
        .get("result_info")
        .ok_or_else(|| ProtocolError::MissingField("result_info".into()))?;
    let sequence_number = info
        .get("sequence_number")
        .and_then(Value::as_u64)
        .ok_or_else(|| ProtocolError::MissingField("result_info.sequence_number".into()))?;
    let sequence_number =
        u32::try_from(sequence_number).map_err(|_| ProtocolError::InvalidValue {
            field: "result_info.sequence_number".into(),
            value: i64::try_from(sequence_number).unwrap_or(i64::MAX),
        })?;
    let flag = |name: &str| info.get(name).and_then(Value::as_bool).unwrap_or(false);

    Ok(FrameMetadata {
        sequence_number,
        data_saturated: flag("data_saturated"),
        missed_data: flag("missed_data"),
        sensor_communication_error: flag("sensor_communication_error"),
    })
}

/// 构造数据消息的 `result_info` 对象
pub fn encode_result_info(metadata: &FrameMetadata) -> Value {
    json!({
        "sequence_number": metadata.sequence_number,
        "data_saturated": metadata.data_saturated,
        "missed_data": metadata.missed_data,
        "sensor_communication_error": metadata.sensor_communication_error,
    })
}

impl TryFrom<JsonPacket> for RawFrame {
    type Error = ProtocolError;

    fn try_from(packet: JsonPacket) -> Result<Self, Self::Error> {
        Ok(Self {
            metadata: decode_result_info(&packet.header)?,
            payload: packet.payload.unwrap_or_default(),
            encoding: SampleEncoding::Json,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EnvelopeConfig, PowerBinConfig, SessionProfile};

    #[test]
    fn test_encode_line_with_payload() {
        let packet = JsonPacket::with_payload(json!({"result_info": {}}), vec![1, 2, 3]);
        let bytes = packet.encode().unwrap();
        let newline = bytes.iter().position(|&b| b == b'\n').unwrap();
        let header: Value = serde_json::from_slice(&bytes[..newline]).unwrap();
        assert_eq!(header["payload_size"], 3);
        assert_eq!(&bytes[newline + 1..], &[1, 2, 3]);
    }

    #[test]
    fn test_decoder_waits_for_payload() {
        let bytes = JsonPacket::with_payload(json!({"a": 1}), vec![7; 4])
            .encode()
            .unwrap();
        let mut decoder = JsonDecoder::new();
        decoder.push(&bytes[..bytes.len() - 2]);
        assert_eq!(decoder.next_packet().unwrap(), None);
        decoder.push(&bytes[bytes.len() - 2..]);
        let packet = decoder.next_packet().unwrap().unwrap();
        assert_eq!(packet.payload, Some(vec![7; 4]));
        assert_eq!(decoder.next_packet().unwrap(), None);
    }

    #[test]
    fn test_decoder_multiple_lines() {
        let mut decoder = JsonDecoder::new();
        decoder.push(b"{\"status\":\"start\"}\n{\"status\":\"stop\"}\n");
        assert_eq!(decoder.next_packet().unwrap().unwrap().status(), Some("start"));
        assert_eq!(decoder.next_packet().unwrap().unwrap().status(), Some("stop"));
    }

    #[test]
    fn test_decoder_malformed_json() {
        let mut decoder = JsonDecoder::new();
        decoder.push(b"{not json\n{\"status\":\"ok\"}\n");
        assert!(matches!(decoder.next_packet(), Err(ProtocolError::Json(_))));
        // 损坏的行已被消费，后续消息仍可解析
        assert_eq!(decoder.next_packet().unwrap().unwrap().status(), Some("ok"));
    }

    #[test]
    fn test_encode_setup_field_order() {
        let mut cfg = PowerBinConfig::new();
        cfg.set_sweep_rate(60.0).unwrap();
        cfg.set_gain(0.6).unwrap();
        cfg.set_range_interval([0.1, 0.7]).unwrap();
        cfg.set_bin_count(5).unwrap();
        let value = encode_setup(&cfg.into()).unwrap();
        let keys: Vec<&str> = value.as_object().unwrap().keys().map(String::as_str).collect();
        assert_eq!(
            keys,
            vec![
                "cmd",
                "mode",
                "sensors",
                "sweep_rate",
                "gain",
                "range_start",
                "range_length",
                "bin_count"
            ]
        );
        assert_eq!(value["mode"], "power_bin");
    }

    #[test]
    fn test_encode_setup_envelope_profile() {
        let mut cfg = EnvelopeConfig::new();
        cfg.set_sweep_rate(30.0).unwrap();
        cfg.set_range_interval([0.2, 0.6]).unwrap();
        cfg.set_session_profile(SessionProfile::MaxDepthResolution).unwrap();
        let value = encode_setup(&cfg.into()).unwrap();
        assert_eq!(value["session_profile"], "MAX_DEPTH_RESOLUTION");
        assert!(value.get("gain").is_none());
    }

    #[test]
    fn test_encode_setup_missing_range() {
        let mut cfg = PowerBinConfig::new();
        cfg.set_sweep_rate(60.0).unwrap();
        assert_eq!(
            encode_setup(&cfg.into()),
            Err(ConfigError::MissingField("range_start"))
        );
    }

    #[test]
    fn test_decode_setup_response_accepted() {
        let header = json!({
            "status": "ok",
            "range_start": 0.1,
            "range_length": 0.6,
            "data_length": 5,
            "actual_bin_count": 5,
            "step_length": 0.12,
        });
        match decode_setup_response(&header, Mode::PowerBin).unwrap() {
            SetupReply::Accepted(info) => {
                assert_eq!(info.actual_bin_count, Some(5));
                assert_eq!(info.step_length, Some(0.12));
            },
            other => panic!("unexpected reply {:?}", other),
        }
    }

    #[test]
    fn test_decode_setup_response_rejected() {
        let header = json!({"status": "error", "message": "too many sensors"});
        assert_eq!(
            decode_setup_response(&header, Mode::Iq).unwrap(),
            SetupReply::Rejected("too many sensors".into())
        );
    }

    #[test]
    fn test_decode_setup_response_out_of_domain() {
        let header = json!({
            "status": "ok",
            "range_start": 0.1,
            "range_length": 0.6,
            "data_length": 0,
        });
        assert!(matches!(
            decode_setup_response(&header, Mode::Envelope),
            Err(ProtocolError::InvalidValue { .. })
        ));

        let header = json!({"status": "ok", "range_start": 0.1, "range_length": 0.6, "data_length": 8});
        assert!(matches!(
            decode_setup_response(&header, Mode::PowerBin),
            Err(ProtocolError::MissingField(_))
        ));
    }

    #[test]
    fn test_expect_status() {
        assert!(expect_status(&json!({"status": "start"}), STATUS_START).is_ok());
        assert!(matches!(
            expect_status(&json!({"status": "stop"}), STATUS_START),
            Err(ProtocolError::Malformed(_))
        ));
        assert!(matches!(
            expect_status(&json!({}), STATUS_START),
            Err(ProtocolError::MissingField(_))
        ));
    }

    #[test]
    fn test_result_info_to_raw_frame() {
        let meta = FrameMetadata {
            sequence_number: 9,
            data_saturated: true,
            ..Default::default()
        };
        let packet = JsonPacket::with_payload(
            json!({ "result_info": encode_result_info(&meta) }),
            vec![0; 8],
        );
        let raw = RawFrame::try_from(packet).unwrap();
        assert_eq!(raw.metadata, meta);
        assert_eq!(raw.encoding, SampleEncoding::Json);
        assert_eq!(raw.payload.len(), 8);
    }

    #[test]
    fn test_result_info_sequence_out_of_range() {
        let header = json!({ "result_info": { "sequence_number": 1u64 << 32 } });
        assert!(matches!(
            decode_result_info(&header),
            Err(ProtocolError::InvalidValue { value: 4_294_967_296, .. })
        ));
    }
}
