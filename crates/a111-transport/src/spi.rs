//! SPI 寄存器链路
//!
//! 寄存器访问是 8 字节全双工事务，应答在同一次传输中返回；帧数据通过
//! 256 字节缓冲区事务读取。上层看到的消息与串口链路完全一致：
//!
//! - 读/写请求立即执行，应答排队等待 `receive()`
//! - 没有排队应答时，`receive()` 轮询 `STATUS.data_ready`，读取两个缓冲区
//!   后写 `MAIN_CONTROL = ACK_DATA`，交付一个流数据包

use crate::{DeviceError, DeviceErrorKind, Transport, TransportError};
use a111_protocol::reg::spi::{self, RegisterReply};
use a111_protocol::{
    MainControl, ProtocolError, Register, RegisterPacket, Status, StreamPacket,
};
use std::collections::VecDeque;
use std::io;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// 默认 STATUS 轮询间隔
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_micros(500);

/// 全双工 SPI 总线（由环境提供）
pub trait SpiBus: Send {
    /// 同时发送 `tx` 并接收等长的 `rx`
    fn transfer(&mut self, tx: &[u8], rx: &mut [u8]) -> io::Result<()>;
}

impl<B: SpiBus + ?Sized> SpiBus for Box<B> {
    fn transfer(&mut self, tx: &[u8], rx: &mut [u8]) -> io::Result<()> {
        (**self).transfer(tx, rx)
    }
}

/// SPI 寄存器链路
pub struct SpiTransport<B: SpiBus> {
    bus: B,
    connected: bool,
    replies: VecDeque<RegisterPacket>,
    poll_interval: Duration,
}

impl<B: SpiBus> SpiTransport<B> {
    pub fn new(bus: B) -> Self {
        Self {
            bus,
            connected: false,
            replies: VecDeque::new(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    fn ensure_connected(&self) -> Result<(), TransportError> {
        if self.connected {
            Ok(())
        } else {
            Err(TransportError::NotConnected)
        }
    }

    fn register_transaction(
        &mut self,
        op: u8,
        register: Register,
        value: u32,
    ) -> Result<RegisterReply, TransportError> {
        let tx = spi::encode_register(op, register, value);
        let mut rx = [0u8; spi::REGISTER_TRANSACTION_LEN];
        self.bus.transfer(&tx, &mut rx)?;
        trace!("spi {} -> {}", hex::encode(tx), hex::encode(rx));

        let reply = spi::decode_register(&rx)?;
        if reply.register != register {
            return Err(TransportError::Malformed(format!(
                "reply for {:?} while accessing {:?}",
                reply.register, register
            )));
        }
        if !reply.is_ok() {
            return Err(DeviceError::new(
                DeviceErrorKind::InvalidResponse,
                format!("{:?} access failed with status {}", register, reply.status),
            )
            .into());
        }
        Ok(reply)
    }

    fn read_register(&mut self, register: Register) -> Result<u32, TransportError> {
        Ok(self.register_transaction(spi::OP_READ, register, 0)?.value)
    }

    fn write_register(&mut self, register: Register, value: u32) -> Result<u32, TransportError> {
        Ok(self.register_transaction(spi::OP_WRITE, register, value)?.value)
    }

    fn read_buffer(&mut self, buffer_id: u8, len: usize) -> Result<Vec<u8>, TransportError> {
        if len > spi::MAX_BUFFER_LEN {
            return Err(ProtocolError::InvalidValue {
                field: format!("buffer {} length", buffer_id),
                value: len as i64,
            }
            .into());
        }
        let mut out = Vec::with_capacity(len);
        let mut rx = [0u8; spi::BUFFER_TRANSACTION_LEN];
        while out.len() < len {
            let offset = u16::try_from(out.len()).map_err(|_| {
                TransportError::Malformed(format!("buffer length {} exceeds SPI addressing", len))
            })?;
            let tx = spi::encode_buffer_read(buffer_id, offset);
            self.bus.transfer(&tx, &mut rx)?;
            let chunk = spi::BUFFER_CHUNK.min(len - out.len());
            out.extend_from_slice(&rx[spi::BUFFER_HEADER_LEN..spi::BUFFER_HEADER_LEN + chunk]);
        }
        Ok(out)
    }

    fn read_frame(&mut self) -> Result<StreamPacket, TransportError> {
        let info_len = self.read_register(Register::ResultInfoLength)? as usize;
        let data_len = self.read_register(Register::DataLengthBytes)? as usize;
        let result_info = self.read_buffer(spi::BUFFER_RESULT_INFO, info_len)?;
        let buffer = self.read_buffer(spi::BUFFER_DATA, data_len)?;
        self.write_register(Register::MainControl, MainControl::AckData.into())?;
        trace!("spi frame: info {} bytes, data {} bytes", info_len, data_len);
        Ok(StreamPacket {
            result_info,
            buffer,
        })
    }
}

impl<B: SpiBus> Transport for SpiTransport<B> {
    type Message = RegisterPacket;

    fn connect(&mut self) -> Result<(), TransportError> {
        if !self.connected {
            self.replies.clear();
            self.connected = true;
            debug!("SPI transport connected");
        }
        Ok(())
    }

    fn send(&mut self, message: RegisterPacket) -> Result<(), TransportError> {
        self.ensure_connected()?;
        let reply = match message {
            RegisterPacket::ReadRequest { register } => RegisterPacket::ReadResponse {
                register,
                value: self.read_register(register)?,
            },
            RegisterPacket::WriteRequest { register, value } => RegisterPacket::WriteResponse {
                register,
                value: self.write_register(register, value)?,
            },
            other => {
                return Err(TransportError::Malformed(format!(
                    "command 0x{:02X} cannot be sent to the device",
                    other.command()
                )));
            },
        };
        self.replies.push_back(reply);
        Ok(())
    }

    fn receive(&mut self, timeout: Duration) -> Result<RegisterPacket, TransportError> {
        self.ensure_connected()?;
        if let Some(reply) = self.replies.pop_front() {
            return Ok(reply);
        }

        let deadline = Instant::now() + timeout;
        loop {
            let status = Status::from_raw(self.read_register(Register::Status)?);
            if status.buffer_error() {
                return Err(DeviceError::new(DeviceErrorKind::Backend, "device buffer error").into());
            }
            if status.data_ready() {
                return Ok(RegisterPacket::Stream(self.read_frame()?));
            }
            if Instant::now() >= deadline {
                return Err(TransportError::Timeout);
            }
            spin_sleep::sleep(self.poll_interval);
        }
    }

    fn disconnect(&mut self) -> Result<(), TransportError> {
        if self.connected {
            self.connected = false;
            self.replies.clear();
            debug!("SPI transport disconnected");
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn discard_pending(&mut self) {
        self.replies.clear();
    }
}
