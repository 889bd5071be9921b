//! 寄存器协议帧
//!
//! 串口链路帧格式：
//!
//! ```text
//! 0xCC | len: u16 LE | cmd: u8 | payload[len] | 0xCD
//! ```
//!
//! SPI 链路使用定长事务（见 [`spi`]），但向上交付相同的 [`RegisterPacket`]。

use crate::registers::Register;
use crate::{ProtocolError, read_u16_le, read_u32_le};
use bytes::{Buf, BufMut, BytesMut};

pub const START_MARKER: u8 = 0xCC;
pub const END_MARKER: u8 = 0xCD;

/// 帧头长度（起始标记 + 长度 + 命令）
pub const HEADER_LEN: usize = 4;

pub const CMD_READ_REQUEST: u8 = 0xF8;
pub const CMD_READ_RESPONSE: u8 = 0xF6;
pub const CMD_WRITE_REQUEST: u8 = 0xF9;
pub const CMD_WRITE_RESPONSE: u8 = 0xF5;
pub const CMD_STREAM: u8 = 0xFE;

pub const SEGMENT_RESULT_INFO: u8 = 0xFD;
pub const SEGMENT_BUFFER: u8 = 0xFE;

/// 一帧流数据（结果信息 + 数据缓冲区原始字节）
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StreamPacket {
    pub result_info: Vec<u8>,
    pub buffer: Vec<u8>,
}

/// 长度字段为 u16
fn frame_length(len: usize) -> Result<u16, ProtocolError> {
    u16::try_from(len).map_err(|_| ProtocolError::InvalidLength {
        expected: u16::MAX as usize,
        actual: len,
    })
}

impl StreamPacket {
    fn encode_into(&self, out: &mut BytesMut) -> Result<(), ProtocolError> {
        for (kind, bytes) in [
            (SEGMENT_RESULT_INFO, &self.result_info),
            (SEGMENT_BUFFER, &self.buffer),
        ] {
            out.put_u8(kind);
            out.put_u16_le(frame_length(bytes.len())?);
            out.put_slice(bytes);
        }
        Ok(())
    }

    fn decode(mut payload: &[u8]) -> Result<Self, ProtocolError> {
        let mut packet = StreamPacket::default();
        while !payload.is_empty() {
            if payload.len() < 3 {
                return Err(ProtocolError::InvalidLength {
                    expected: 3,
                    actual: payload.len(),
                });
            }
            let kind = payload[0];
            let len = read_u16_le(&payload[1..3]) as usize;
            payload = &payload[3..];
            if payload.len() < len {
                return Err(ProtocolError::InvalidLength {
                    expected: len,
                    actual: payload.len(),
                });
            }
            let (segment, rest) = payload.split_at(len);
            match kind {
                SEGMENT_RESULT_INFO => packet.result_info = segment.to_vec(),
                SEGMENT_BUFFER => packet.buffer = segment.to_vec(),
                other => {
                    return Err(ProtocolError::Malformed(format!(
                        "unknown stream segment 0x{:02X}",
                        other
                    )));
                },
            }
            payload = rest;
        }
        Ok(packet)
    }
}

/// 寄存器协议消息
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegisterPacket {
    ReadRequest { register: Register },
    ReadResponse { register: Register, value: u32 },
    WriteRequest { register: Register, value: u32 },
    WriteResponse { register: Register, value: u32 },
    Stream(StreamPacket),
}

impl RegisterPacket {
    pub fn command(&self) -> u8 {
        match self {
            RegisterPacket::ReadRequest { .. } => CMD_READ_REQUEST,
            RegisterPacket::ReadResponse { .. } => CMD_READ_RESPONSE,
            RegisterPacket::WriteRequest { .. } => CMD_WRITE_REQUEST,
            RegisterPacket::WriteResponse { .. } => CMD_WRITE_RESPONSE,
            RegisterPacket::Stream(_) => CMD_STREAM,
        }
    }

    /// 编码为完整的串口帧；负载超过 u16 长度字段时返回 `InvalidLength`
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let mut payload = BytesMut::new();
        match self {
            RegisterPacket::ReadRequest { register } => payload.put_u8(register.address()),
            RegisterPacket::ReadResponse { register, value }
            | RegisterPacket::WriteRequest { register, value }
            | RegisterPacket::WriteResponse { register, value } => {
                payload.put_u8(register.address());
                payload.put_u32_le(*value);
            },
            RegisterPacket::Stream(packet) => packet.encode_into(&mut payload)?,
        }

        let mut frame = BytesMut::with_capacity(HEADER_LEN + payload.len() + 1);
        frame.put_u8(START_MARKER);
        frame.put_u16_le(frame_length(payload.len())?);
        frame.put_u8(self.command());
        frame.put_slice(&payload);
        frame.put_u8(END_MARKER);
        Ok(frame.to_vec())
    }

    /// 由命令字节和负载解析
    pub fn decode(command: u8, payload: &[u8]) -> Result<Self, ProtocolError> {
        let expect_len = |expected: usize| {
            if payload.len() != expected {
                Err(ProtocolError::InvalidLength {
                    expected,
                    actual: payload.len(),
                })
            } else {
                Ok(())
            }
        };

        match command {
            CMD_READ_REQUEST => {
                expect_len(1)?;
                Ok(RegisterPacket::ReadRequest {
                    register: Register::from_address(payload[0])?,
                })
            },
            CMD_READ_RESPONSE | CMD_WRITE_REQUEST | CMD_WRITE_RESPONSE => {
                expect_len(5)?;
                let register = Register::from_address(payload[0])?;
                let value = read_u32_le(&payload[1..5]);
                Ok(match command {
                    CMD_READ_RESPONSE => RegisterPacket::ReadResponse { register, value },
                    CMD_WRITE_REQUEST => RegisterPacket::WriteRequest { register, value },
                    _ => RegisterPacket::WriteResponse { register, value },
                })
            },
            CMD_STREAM => Ok(RegisterPacket::Stream(StreamPacket::decode(payload)?)),
            other => Err(ProtocolError::InvalidCommand { command: other }),
        }
    }
}

/// 字节流 → 寄存器帧的增量解码器
///
/// 不完整的数据保留在内部缓冲区中，等待后续 `push`。
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: BytesMut,
    discarded: usize,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// 缓冲区中尚未消费的字节数
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// 取出自上次调用以来丢弃的（起始标记之前的）字节数
    pub fn take_discarded(&mut self) -> usize {
        std::mem::take(&mut self.discarded)
    }

    pub fn clear(&mut self) {
        self.buf.clear();
        self.discarded = 0;
    }

    /// 尝试解出下一帧
    ///
    /// - `Ok(None)`: 数据不足
    /// - `Err(Malformed)`: 结束标记错误，该帧的起始标记已被跳过
    pub fn next_packet(&mut self) -> Result<Option<RegisterPacket>, ProtocolError> {
        match self.buf.iter().position(|&b| b == START_MARKER) {
            Some(0) => {},
            Some(pos) => {
                self.buf.advance(pos);
                self.discarded += pos;
            },
            None => {
                self.discarded += self.buf.len();
                self.buf.clear();
                return Ok(None);
            },
        }

        if self.buf.len() < HEADER_LEN {
            return Ok(None);
        }
        let len = read_u16_le(&self.buf[1..3]) as usize;
        let total = HEADER_LEN + len + 1;
        if self.buf.len() < total {
            return Ok(None);
        }

        if self.buf[total - 1] != END_MARKER {
            let found = self.buf[total - 1];
            self.buf.advance(1);
            return Err(ProtocolError::Malformed(format!(
                "expected end marker 0x{:02X}, found 0x{:02X}",
                END_MARKER, found
            )));
        }

        let frame = self.buf.split_to(total);
        let command = frame[3];
        RegisterPacket::decode(command, &frame[HEADER_LEN..total - 1]).map(Some)
    }
}

/// SPI 定长事务编码
pub mod spi {
    use super::*;

    /// 寄存器事务长度
    pub const REGISTER_TRANSACTION_LEN: usize = 8;
    /// 缓冲区事务长度
    pub const BUFFER_TRANSACTION_LEN: usize = 256;
    /// 缓冲区事务头长度
    pub const BUFFER_HEADER_LEN: usize = 4;
    /// 每次缓冲区事务可读取的负载字节数
    pub const BUFFER_CHUNK: usize = BUFFER_TRANSACTION_LEN - BUFFER_HEADER_LEN;
    /// 缓冲区偏移为 u16，可读取的最大长度
    pub const MAX_BUFFER_LEN: usize = u16::MAX as usize;

    pub const OP_READ: u8 = CMD_READ_REQUEST;
    pub const OP_WRITE: u8 = CMD_WRITE_REQUEST;
    pub const OP_BUFFER_READ: u8 = 0xFA;

    pub const BUFFER_RESULT_INFO: u8 = 0;
    pub const BUFFER_DATA: u8 = 1;

    /// 寄存器事务应答
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RegisterReply {
        pub op: u8,
        pub register: Register,
        pub status: u8,
        pub value: u32,
    }

    impl RegisterReply {
        pub fn is_ok(&self) -> bool {
            self.status == 0
        }
    }

    /// `[op, addr, 0, 0, value: u32 LE]`
    pub fn encode_register(op: u8, register: Register, value: u32) -> [u8; REGISTER_TRANSACTION_LEN] {
        let mut tx = [0u8; REGISTER_TRANSACTION_LEN];
        tx[0] = op;
        tx[1] = register.address();
        tx[4..8].copy_from_slice(&value.to_le_bytes());
        tx
    }

    /// `[op, addr, status, 0, value: u32 LE]`
    pub fn decode_register(rx: &[u8]) -> Result<RegisterReply, ProtocolError> {
        if rx.len() != REGISTER_TRANSACTION_LEN {
            return Err(ProtocolError::InvalidLength {
                expected: REGISTER_TRANSACTION_LEN,
                actual: rx.len(),
            });
        }
        if rx[0] != OP_READ && rx[0] != OP_WRITE {
            return Err(ProtocolError::InvalidCommand { command: rx[0] });
        }
        Ok(RegisterReply {
            op: rx[0],
            register: Register::from_address(rx[1])?,
            status: rx[2],
            value: read_u32_le(&rx[4..8]),
        })
    }

    /// `[0xFA, buffer_id, offset: u16 LE, 0...]`
    pub fn encode_buffer_read(buffer_id: u8, offset: u16) -> [u8; BUFFER_TRANSACTION_LEN] {
        let mut tx = [0u8; BUFFER_TRANSACTION_LEN];
        tx[0] = OP_BUFFER_READ;
        tx[1] = buffer_id;
        tx[2..4].copy_from_slice(&offset.to_le_bytes());
        tx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream(info: &[u8], buffer: &[u8]) -> RegisterPacket {
        RegisterPacket::Stream(StreamPacket {
            result_info: info.to_vec(),
            buffer: buffer.to_vec(),
        })
    }

    #[test]
    fn test_encode_read_request_layout() {
        let bytes = RegisterPacket::ReadRequest {
            register: Register::ProductId,
        }
        .encode().unwrap();
        assert_eq!(bytes, vec![0xCC, 0x01, 0x00, 0xF8, 0x10, 0xCD]);
    }

    #[test]
    fn test_encode_write_request_layout() {
        let bytes = RegisterPacket::WriteRequest {
            register: Register::SweepRate,
            value: 60_000,
        }
        .encode().unwrap();
        assert_eq!(
            bytes,
            vec![0xCC, 0x05, 0x00, 0xF9, 0x23, 0x60, 0xEA, 0x00, 0x00, 0xCD]
        );
    }

    #[test]
    fn test_encode_rejects_oversized_segment() {
        let packet = stream(&[0; 8], &vec![0; u16::MAX as usize + 1]);
        assert!(matches!(
            packet.encode(),
            Err(ProtocolError::InvalidLength { actual: 65536, .. })
        ));
    }

    #[test]
    fn test_decoder_handles_split_input() {
        let bytes = stream(&[1, 0, 0, 0, 0, 0, 0, 0], &[9, 8, 7]).encode().unwrap();
        let mut decoder = FrameDecoder::new();
        decoder.push(&bytes[..5]);
        assert_eq!(decoder.next_packet().unwrap(), None);
        decoder.push(&bytes[5..]);
        assert_eq!(
            decoder.next_packet().unwrap(),
            Some(stream(&[1, 0, 0, 0, 0, 0, 0, 0], &[9, 8, 7]))
        );
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_decoder_discards_leading_garbage() {
        let mut decoder = FrameDecoder::new();
        decoder.push(&[0x00, 0x11, 0x22]);
        decoder.push(
            &RegisterPacket::WriteResponse {
                register: Register::MainControl,
                value: 2,
            }
            .encode().unwrap(),
        );
        let packet = decoder.next_packet().unwrap();
        assert_eq!(
            packet,
            Some(RegisterPacket::WriteResponse {
                register: Register::MainControl,
                value: 2
            })
        );
        assert_eq!(decoder.take_discarded(), 3);
        assert_eq!(decoder.take_discarded(), 0);
    }

    #[test]
    fn test_decoder_two_frames_in_one_push() {
        let mut bytes = RegisterPacket::ReadResponse {
            register: Register::Status,
            value: 1,
        }
        .encode().unwrap();
        bytes.extend(stream(&[], &[1, 2]).encode().unwrap());
        let mut decoder = FrameDecoder::new();
        decoder.push(&bytes);
        assert!(matches!(
            decoder.next_packet().unwrap(),
            Some(RegisterPacket::ReadResponse { .. })
        ));
        assert!(matches!(
            decoder.next_packet().unwrap(),
            Some(RegisterPacket::Stream(_))
        ));
        assert_eq!(decoder.next_packet().unwrap(), None);
    }

    #[test]
    fn test_decoder_bad_end_marker() {
        let mut bytes = RegisterPacket::ReadRequest {
            register: Register::Status,
        }
        .encode().unwrap();
        let last = bytes.len() - 1;
        bytes[last] = 0x00;
        let mut decoder = FrameDecoder::new();
        decoder.push(&bytes);
        assert!(matches!(
            decoder.next_packet(),
            Err(ProtocolError::Malformed(_))
        ));
        // 起始标记已被跳过，剩余字节不再构成帧
        assert_eq!(decoder.next_packet().unwrap(), None);
    }

    #[test]
    fn test_decode_unknown_command() {
        assert!(matches!(
            RegisterPacket::decode(0x42, &[]),
            Err(ProtocolError::InvalidCommand { command: 0x42 })
        ));
    }

    #[test]
    fn test_decode_wrong_payload_length() {
        assert!(matches!(
            RegisterPacket::decode(CMD_READ_RESPONSE, &[0x06, 0x00]),
            Err(ProtocolError::InvalidLength {
                expected: 5,
                actual: 2
            })
        ));
    }

    #[test]
    fn test_decode_truncated_stream_segment() {
        let payload = [SEGMENT_BUFFER, 0x10, 0x00, 1, 2];
        assert!(matches!(
            RegisterPacket::decode(CMD_STREAM, &payload),
            Err(ProtocolError::InvalidLength { .. })
        ));
    }

    #[test]
    fn test_spi_register_transaction() {
        let tx = spi::encode_register(spi::OP_WRITE, Register::MainControl, 5);
        assert_eq!(tx, [0xF9, 0x03, 0, 0, 5, 0, 0, 0]);

        let reply = spi::decode_register(&[0xF8, 0x10, 0, 0, 0xC0, 0xAC, 0, 0]).unwrap();
        assert_eq!(reply.register, Register::ProductId);
        assert_eq!(reply.value, 0xACC0);
        assert!(reply.is_ok());

        let reply = spi::decode_register(&[0xF8, 0x10, 3, 0, 0, 0, 0, 0]).unwrap();
        assert!(!reply.is_ok());
    }

    #[test]
    fn test_spi_buffer_read_header() {
        let tx = spi::encode_buffer_read(spi::BUFFER_DATA, 504);
        assert_eq!(&tx[..4], &[0xFA, 0x01, 0xF8, 0x01]);
        assert_eq!(tx.len(), 256);
        assert_eq!(spi::BUFFER_CHUNK, 252);
    }
}
