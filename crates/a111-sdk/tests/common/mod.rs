//! 测试用设备模拟器
//!
//! - `SerialDevice`: 在内存字节流上应答寄存器协议帧
//! - `SpiDevice`: 应答 SPI 定长事务
//! - `SocketDevice`: 在内存字节流上应答 JSON 消息
//!
//! 三者共享同一份可在测试中检查/修改的设备状态。

#![allow(dead_code)]

use a111_protocol::json::{self, CMD_SETUP, CMD_START_STREAMING, CMD_STOP_STREAMING};
use a111_protocol::reg::spi;
use a111_protocol::registers::PRODUCT_ID;
use a111_protocol::{
    FrameDecoder, FrameMetadata, JsonDecoder, JsonPacket, MainControl, Register, RegisterPacket,
    StreamPacket,
};
use a111_sdk::{ByteStream, SpiBus};
use serde_json::{Value, json};
use std::collections::{HashMap, VecDeque};
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

const STATUS_CREATED: u32 = 1 << 0;
const STATUS_ACTIVATED: u32 = 1 << 1;
const STATUS_DATA_READY: u32 = 1 << 8;
const STATUS_CREATION_ERROR: u32 = 1 << 16;

/// 未请求 bin 数时设备选定的值
pub const DEFAULT_BIN_COUNT: u32 = 5;

/// 模拟设备的内部状态
#[derive(Debug, Default)]
pub struct DeviceState {
    pub registers: HashMap<Register, u32>,
    pub writes: Vec<(Register, u32)>,
    /// 待发送的帧负载
    pub frames: VecDeque<Vec<u8>>,
    pub streaming: bool,
    pub sequence: u32,
    /// 会话建立时报告的采样点数
    pub data_length: u32,
    pub reject_setup: bool,
    /// 不应答停止命令
    pub ignore_stop: bool,
    /// 不应答开始命令
    pub ignore_start: bool,
    /// 关闭字节流前的阻塞时间
    pub close_delay: Option<Duration>,
    /// 在数据帧之前原样发出的字节
    pub raw: VecDeque<u8>,
    pub json_requests: Vec<Value>,
    pub closed: bool,
}

impl DeviceState {
    fn register(&self, register: Register) -> u32 {
        self.registers.get(&register).copied().unwrap_or(0)
    }

    fn status(&self) -> u32 {
        let mut status = self.register(Register::Status);
        if self.streaming && !self.frames.is_empty() {
            status |= STATUS_DATA_READY;
        }
        status
    }

    fn read(&self, register: Register) -> u32 {
        match register {
            Register::Status => self.status(),
            Register::ResultInfoLength => 8,
            Register::DataLengthBytes => self.frames.front().map_or(0, |f| f.len() as u32),
            other => self.register(other),
        }
    }

    /// 执行寄存器写入，返回应答值（`None` 表示不应答）
    fn write(&mut self, register: Register, value: u32) -> Option<u32> {
        self.writes.push((register, value));
        if register != Register::MainControl {
            self.registers.insert(register, value);
            return Some(value);
        }

        match MainControl::try_from(value) {
            Ok(MainControl::Create) if self.reject_setup => {
                self.registers.insert(Register::Status, STATUS_CREATION_ERROR);
            },
            Ok(MainControl::Create) => {
                let bins = match self.register(Register::BinCount) {
                    0 => DEFAULT_BIN_COUNT,
                    n => n,
                };
                let results = [
                    (Register::ActualRangeStart, self.register(Register::RangeStart)),
                    (Register::ActualRangeLength, self.register(Register::RangeLength)),
                    (Register::DataLength, self.data_length),
                    (Register::ActualBinCount, bins),
                    (Register::Status, STATUS_CREATED),
                ];
                self.registers.extend(results);
            },
            Ok(MainControl::Activate) if self.ignore_start => return None,
            Ok(MainControl::Activate) => {
                self.streaming = true;
                let status = self.register(Register::Status) | STATUS_ACTIVATED;
                self.registers.insert(Register::Status, status);
            },
            Ok(MainControl::Stop) => {
                if self.ignore_stop {
                    return None;
                }
                self.streaming = false;
                let status = self.register(Register::Status) & !STATUS_ACTIVATED;
                self.registers.insert(Register::Status, status);
            },
            Ok(MainControl::ClearStatus) => {
                self.registers.insert(Register::Status, 0);
            },
            Ok(MainControl::AckData) => {
                self.frames.pop_front();
                self.sequence += 1;
            },
            _ => {},
        }
        Some(value)
    }

    fn metadata(&self) -> FrameMetadata {
        FrameMetadata {
            sequence_number: self.sequence,
            ..Default::default()
        }
    }
}

/// 可在测试线程与模拟器之间共享的状态句柄
#[derive(Clone, Default)]
pub struct DeviceHandle(Arc<Mutex<DeviceState>>);

impl DeviceHandle {
    pub fn new(data_length: u32) -> Self {
        let handle = Self::default();
        {
            let mut state = handle.lock();
            state.data_length = data_length;
            state.registers.insert(Register::ProductId, PRODUCT_ID);
        }
        handle
    }

    pub fn lock(&self) -> MutexGuard<'_, DeviceState> {
        self.0.lock().unwrap()
    }

    pub fn push_frame(&self, payload: Vec<u8>) {
        self.lock().frames.push_back(payload);
    }

    pub fn writes(&self) -> Vec<(Register, u32)> {
        self.lock().writes.clone()
    }

    pub fn push_raw(&self, bytes: &[u8]) {
        self.lock().raw.extend(bytes);
    }

    /// 模拟卡住的关闭：阻塞后再标记为已关闭
    fn close(&self) {
        let delay = self.lock().close_delay;
        if let Some(delay) = delay {
            thread::sleep(delay);
        }
        self.lock().closed = true;
    }
}

fn idle(timeout: Duration) -> io::Error {
    thread::sleep(timeout.min(Duration::from_millis(5)));
    io::ErrorKind::TimedOut.into()
}

fn drain(out: &mut VecDeque<u8>, buf: &mut [u8]) -> usize {
    let n = buf.len().min(out.len());
    for (dst, src) in buf.iter_mut().zip(out.drain(..n)) {
        *dst = src;
    }
    n
}

// ============================================================================
// 串口寄存器协议
// ============================================================================

pub struct SerialDevice {
    handle: DeviceHandle,
    decoder: FrameDecoder,
    out: VecDeque<u8>,
    read_timeout: Duration,
}

impl SerialDevice {
    pub fn new(handle: &DeviceHandle) -> Self {
        Self {
            handle: handle.clone(),
            decoder: FrameDecoder::new(),
            out: VecDeque::new(),
            read_timeout: Duration::from_millis(10),
        }
    }
}

impl Write for SerialDevice {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.decoder.push(buf);
        while let Some(packet) = self.decoder.next_packet().map_err(io::Error::other)? {
            let mut state = self.handle.lock();
            let reply = match packet {
                RegisterPacket::ReadRequest { register } => Some(RegisterPacket::ReadResponse {
                    register,
                    value: state.read(register),
                }),
                RegisterPacket::WriteRequest { register, value } => state
                    .write(register, value)
                    .map(|value| RegisterPacket::WriteResponse { register, value }),
                _ => None,
            };
            if let Some(reply) = reply {
                self.out.extend(reply.encode().unwrap());
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Read for SerialDevice {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.out.is_empty() {
            let mut state = self.handle.lock();
            if state.streaming
                && let Some(payload) = state.frames.pop_front()
            {
                let packet = RegisterPacket::Stream(StreamPacket {
                    result_info: state.metadata().to_register_bytes().to_vec(),
                    buffer: payload,
                });
                state.sequence += 1;
                self.out.extend(packet.encode().unwrap());
            }
        }
        if self.out.is_empty() {
            return Err(idle(self.read_timeout));
        }
        Ok(drain(&mut self.out, buf))
    }
}

impl ByteStream for SerialDevice {
    fn set_read_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.read_timeout = timeout;
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        self.handle.close();
        Ok(())
    }
}

// ============================================================================
// SPI 寄存器协议
// ============================================================================

pub struct SpiDevice {
    handle: DeviceHandle,
}

impl SpiDevice {
    pub fn new(handle: &DeviceHandle) -> Self {
        Self {
            handle: handle.clone(),
        }
    }
}

impl SpiBus for SpiDevice {
    fn transfer(&mut self, tx: &[u8], rx: &mut [u8]) -> io::Result<()> {
        let mut state = self.handle.lock();
        rx.fill(0);
        match tx[0] {
            spi::OP_READ | spi::OP_WRITE => {
                let register = Register::from_address(tx[1]).map_err(io::Error::other)?;
                let value = if tx[0] == spi::OP_READ {
                    state.read(register)
                } else {
                    let value = u32::from_le_bytes([tx[4], tx[5], tx[6], tx[7]]);
                    // 总线事务总会返回，忽略停止只影响设备状态
                    state.write(register, value).unwrap_or(value)
                };
                rx[..2].copy_from_slice(&tx[..2]);
                rx[4..8].copy_from_slice(&value.to_le_bytes());
            },
            spi::OP_BUFFER_READ => {
                let data = match tx[1] {
                    spi::BUFFER_RESULT_INFO => state.metadata().to_register_bytes().to_vec(),
                    _ => state.frames.front().cloned().unwrap_or_default(),
                };
                let offset = u16::from_le_bytes([tx[2], tx[3]]) as usize;
                let end = (offset + spi::BUFFER_CHUNK).min(data.len());
                if offset < end {
                    rx[spi::BUFFER_HEADER_LEN..spi::BUFFER_HEADER_LEN + end - offset]
                        .copy_from_slice(&data[offset..end]);
                }
            },
            _ => return Err(io::ErrorKind::InvalidInput.into()),
        }
        Ok(())
    }
}

// ============================================================================
// Socket JSON 协议
// ============================================================================

pub struct SocketDevice {
    handle: DeviceHandle,
    decoder: JsonDecoder,
    out: VecDeque<u8>,
    read_timeout: Duration,
}

impl SocketDevice {
    pub fn new(handle: &DeviceHandle) -> Self {
        Self {
            handle: handle.clone(),
            decoder: JsonDecoder::new(),
            out: VecDeque::new(),
            read_timeout: Duration::from_millis(10),
        }
    }

    fn reply(&mut self, header: Value) {
        let bytes = JsonPacket::new(header).encode().unwrap();
        self.out.extend(bytes);
    }
}

impl Write for SocketDevice {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.decoder.push(buf);
        while let Some(packet) = self.decoder.next_packet().map_err(io::Error::other)? {
            let request = packet.header;
            let reply = {
                let mut state = self.handle.lock();
                state.json_requests.push(request.clone());
                match request["cmd"].as_str() {
                    Some(CMD_SETUP) if state.reject_setup => Some(json!({
                        "status": "error",
                        "message": "range too long for profile",
                    })),
                    Some(CMD_SETUP) => {
                        let mut reply = json!({
                            "status": "ok",
                            "range_start": request["range_start"],
                            "range_length": request["range_length"],
                            "data_length": state.data_length,
                            "step_length": 0.000484,
                        });
                        if request["mode"] == "power_bin" {
                            reply["actual_bin_count"] = request
                                .get("bin_count")
                                .cloned()
                                .unwrap_or(json!(DEFAULT_BIN_COUNT));
                        }
                        Some(reply)
                    },
                    Some(CMD_START_STREAMING) if state.ignore_start => None,
                    Some(CMD_START_STREAMING) => {
                        state.streaming = true;
                        Some(json!({"status": "start"}))
                    },
                    Some(CMD_STOP_STREAMING) if state.ignore_stop => None,
                    Some(CMD_STOP_STREAMING) => {
                        state.streaming = false;
                        Some(json!({"status": "stop"}))
                    },
                    _ => Some(json!({"status": "error", "message": "unknown command"})),
                }
            };
            if let Some(reply) = reply {
                self.reply(reply);
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Read for SocketDevice {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.out.is_empty() {
            let mut state = self.handle.lock();
            if !state.raw.is_empty() {
                self.out.extend(state.raw.drain(..));
            } else if state.streaming
                && let Some(payload) = state.frames.pop_front()
            {
                let header = json!({"result_info": json::encode_result_info(&state.metadata())});
                state.sequence += 1;
                let bytes = JsonPacket::with_payload(header, payload).encode().unwrap();
                self.out.extend(bytes);
            }
        }
        if self.out.is_empty() {
            return Err(idle(self.read_timeout));
        }
        Ok(drain(&mut self.out, buf))
    }
}

impl ByteStream for SocketDevice {
    fn set_read_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.read_timeout = timeout;
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        self.handle.close();
        Ok(())
    }
}

// ============================================================================
// 负载构造
// ============================================================================

/// 寄存器协议 u16 幅值负载
pub fn u16_payload(values: &[u16]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// JSON 协议 f32 幅值负载
pub fn f32_payload(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}
