//! 链路选择与协议会话流程
//!
//! 三种链路在构造时确定（封闭枚举），之后不再按调用重新判断。
//! 串口与 SPI 共用寄存器协议流程，Socket 使用 JSON 协议流程。

use crate::error::ClientError;
use a111_protocol::json::{self, STATUS_START, STATUS_STOP};
use a111_protocol::registers::PRODUCT_ID;
use a111_protocol::session::{self, SetupReply};
use a111_protocol::{
    JsonPacket, MainControl, ProtocolError, RadarConfig, RawFrame, Register, RegisterPacket,
    ServiceSettings, SessionInfo, Status, StreamingControl,
};
use a111_transport::{
    DeviceError, DeviceErrorKind, SerialTransport, SocketTransport, SpiBus, SpiTransport,
    Transport, TransportError,
};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// 已选定的链路
pub enum Link {
    Serial(SerialTransport),
    Spi(SpiTransport<Box<dyn SpiBus>>),
    Socket(SocketTransport),
}

impl Link {
    pub fn name(&self) -> &'static str {
        match self {
            Link::Serial(_) => "serial",
            Link::Spi(_) => "spi",
            Link::Socket(_) => "socket",
        }
    }

    pub fn is_connected(&self) -> bool {
        match self {
            Link::Serial(t) => t.is_connected(),
            Link::Spi(t) => t.is_connected(),
            Link::Socket(t) => t.is_connected(),
        }
    }

    /// 打开链路并完成握手；任何失败都报告为 `Connection`
    pub(crate) fn open(&mut self, timeout: Duration) -> Result<(), ClientError> {
        let result = match self {
            Link::Serial(t) => t.connect().and_then(|_| handshake(t, timeout)),
            Link::Spi(t) => t.connect().and_then(|_| handshake(t, timeout)),
            Link::Socket(t) => t.connect(),
        };
        if let Err(e) = result {
            // 握手失败时不保留半开的链路
            let _ = self.close();
            return Err(ClientError::Connection(e));
        }
        Ok(())
    }

    pub(crate) fn setup(
        &mut self,
        config: &RadarConfig,
        timeout: Duration,
    ) -> Result<SessionInfo, ClientError> {
        match self {
            Link::Serial(t) => setup_registers(t, config, timeout),
            Link::Spi(t) => setup_registers(t, config, timeout),
            Link::Socket(t) => setup_json(t, config, timeout),
        }
    }

    /// 开始数据流；设备在 `timeout` 内未确认时返回 `Protocol`
    pub(crate) fn start(&mut self, timeout: Duration) -> Result<(), ClientError> {
        let result = match self {
            Link::Serial(t) => start_registers(t, StreamingControl::Uart, timeout),
            Link::Spi(t) => start_registers(t, StreamingControl::Disable, timeout),
            Link::Socket(t) => {
                t.send(JsonPacket::new(json::start_streaming_request()))?;
                let reply = t.receive(timeout)?;
                json::expect_status(&reply.header, STATUS_START)
                    .map_err(|e| ClientError::Protocol(format!("start not acknowledged: {}", e)))
            },
        };
        result.map_err(|e| match e {
            ClientError::TransportTimeout => ClientError::Protocol(format!(
                "start not acknowledged within {:?}",
                timeout
            )),
            other => other,
        })
    }

    pub(crate) fn next_frame(&mut self, timeout: Duration) -> Result<RawFrame, ClientError> {
        let deadline = Instant::now() + timeout;
        match self {
            Link::Serial(t) => next_register_frame(t, deadline),
            Link::Spi(t) => next_register_frame(t, deadline),
            Link::Socket(t) => loop {
                let packet = t.receive(remaining(deadline)?)?;
                if packet.header.get("result_info").is_some() {
                    return Ok(RawFrame::try_from(packet)?);
                }
                trace!("Ignoring non-data message while streaming: {}", packet.header);
            },
        }
    }

    /// 发送停止命令并等待确认，整体耗时不超过 `timeout`
    pub(crate) fn stop(&mut self, timeout: Duration) -> Result<(), ClientError> {
        let deadline = Instant::now() + timeout;
        let result = match self {
            Link::Serial(t) => write_register(t, Register::MainControl, MainControl::Stop.into(), deadline)
                .map(|_| ()),
            Link::Spi(t) => write_register(t, Register::MainControl, MainControl::Stop.into(), deadline)
                .map(|_| ()),
            Link::Socket(t) => stop_json(t, deadline),
        };
        self.discard_pending();
        result
    }

    pub(crate) fn close(&mut self) -> Result<(), TransportError> {
        match self {
            Link::Serial(t) => t.disconnect(),
            Link::Spi(t) => t.disconnect(),
            Link::Socket(t) => t.disconnect(),
        }
    }

    fn discard_pending(&mut self) {
        match self {
            Link::Serial(t) => t.discard_pending(),
            Link::Spi(t) => t.discard_pending(),
            Link::Socket(t) => t.discard_pending(),
        }
    }
}

fn remaining(deadline: Instant) -> Result<Duration, ClientError> {
    let left = deadline.saturating_duration_since(Instant::now());
    if left.is_zero() {
        Err(ClientError::TransportTimeout)
    } else {
        Ok(left)
    }
}

// ============================================================================
// 寄存器协议（串口 / SPI）
// ============================================================================

/// 等待指定寄存器的应答，途中到达的流数据包被丢弃
fn await_reply<T>(
    t: &mut T,
    deadline: Instant,
    matches: impl Fn(&RegisterPacket) -> Option<u32>,
    what: &str,
) -> Result<u32, ClientError>
where
    T: Transport<Message = RegisterPacket>,
{
    loop {
        let packet = t.receive(remaining(deadline)?)?;
        if let Some(value) = matches(&packet) {
            return Ok(value);
        }
        match packet {
            RegisterPacket::Stream(_) => trace!("Dropping stream packet while waiting for {}", what),
            other => {
                return Err(ClientError::Protocol(format!(
                    "unexpected reply 0x{:02X} while waiting for {}",
                    other.command(),
                    what
                )));
            },
        }
    }
}

fn read_register<T>(t: &mut T, register: Register, deadline: Instant) -> Result<u32, ClientError>
where
    T: Transport<Message = RegisterPacket>,
{
    t.send(RegisterPacket::ReadRequest { register })?;
    await_reply(
        t,
        deadline,
        |packet| match *packet {
            RegisterPacket::ReadResponse { register: r, value } if r == register => Some(value),
            _ => None,
        },
        "read response",
    )
}

fn write_register<T>(
    t: &mut T,
    register: Register,
    value: u32,
    deadline: Instant,
) -> Result<u32, ClientError>
where
    T: Transport<Message = RegisterPacket>,
{
    t.send(RegisterPacket::WriteRequest { register, value })?;
    await_reply(
        t,
        deadline,
        |packet| match *packet {
            RegisterPacket::WriteResponse { register: r, value } if r == register => Some(value),
            _ => None,
        },
        "write response",
    )
}

fn handshake<T>(t: &mut T, timeout: Duration) -> Result<(), TransportError>
where
    T: Transport<Message = RegisterPacket>,
{
    let deadline = Instant::now() + timeout;
    let product_id = read_register(t, Register::ProductId, deadline).map_err(|e| match e {
        ClientError::TransportTimeout => TransportError::Timeout,
        ClientError::Connection(inner) => inner,
        other => TransportError::Malformed(other.to_string()),
    })?;
    if product_id != PRODUCT_ID {
        return Err(DeviceError::new(
            DeviceErrorKind::InvalidResponse,
            format!("unexpected product id 0x{:04X}", product_id),
        )
        .into());
    }
    debug!("Handshake ok, product id 0x{:04X}", product_id);
    Ok(())
}

fn setup_registers<T>(
    t: &mut T,
    config: &RadarConfig,
    timeout: Duration,
) -> Result<SessionInfo, ClientError>
where
    T: Transport<Message = RegisterPacket>,
{
    let writes = session::encode_setup(config)?;
    let deadline = Instant::now() + timeout;

    for write in &writes {
        write_register(t, write.register, write.value, deadline)?;
    }
    write_register(t, Register::MainControl, MainControl::Create.into(), deadline)?;

    let status = Status::from_raw(read_register(t, Register::Status, deadline)?);
    if status.creation_error() {
        // 清除错误位，供下一次建立会话
        let _ = write_register(t, Register::MainControl, MainControl::ClearStatus.into(), deadline);
        return Err(ClientError::ConfigRejected(format!(
            "session creation failed (status 0x{:08X})",
            status.raw()
        )));
    }
    if !status.created() {
        return Err(ClientError::Protocol(format!(
            "session not created (status 0x{:08X})",
            status.raw()
        )));
    }

    let mode = config.mode();
    let mut reads = Vec::new();
    for register in session::session_info_registers(mode) {
        reads.push((register, read_register(t, register, deadline)?));
    }
    Ok(session::decode_session_info(mode, &reads)?)
}

fn start_registers<T>(
    t: &mut T,
    streaming: StreamingControl,
    timeout: Duration,
) -> Result<(), ClientError>
where
    T: Transport<Message = RegisterPacket>,
{
    let deadline = Instant::now() + timeout;
    write_register(t, Register::StreamingControl, streaming.into(), deadline)?;
    let echoed = write_register(t, Register::MainControl, MainControl::Activate.into(), deadline)?;
    if echoed != u32::from(MainControl::Activate) {
        return Err(ClientError::Protocol(format!(
            "activation not acknowledged (device echoed {})",
            echoed
        )));
    }
    Ok(())
}

fn next_register_frame<T>(t: &mut T, deadline: Instant) -> Result<RawFrame, ClientError>
where
    T: Transport<Message = RegisterPacket>,
{
    loop {
        match t.receive(remaining(deadline)?)? {
            RegisterPacket::Stream(packet) => {
                return RawFrame::try_from(packet).map_err(|e| match e {
                    // 结果信息长度错误同样视为帧损坏
                    ProtocolError::InvalidLength { expected, actual } => {
                        ClientError::FrameCorrupt { expected, actual }
                    },
                    other => other.into(),
                });
            },
            other => trace!(
                "Ignoring register reply 0x{:02X} while streaming",
                other.command()
            ),
        }
    }
}

// ============================================================================
// JSON 协议（Socket）
// ============================================================================

fn setup_json(
    t: &mut SocketTransport,
    config: &RadarConfig,
    timeout: Duration,
) -> Result<SessionInfo, ClientError> {
    let request = json::encode_setup(config)?;
    t.send(JsonPacket::new(request))?;
    let reply = t.receive(timeout)?;
    match json::decode_setup_response(&reply.header, config.mode())? {
        SetupReply::Accepted(info) => Ok(info),
        SetupReply::Rejected(message) => Err(ClientError::ConfigRejected(message)),
    }
}

fn stop_json(t: &mut SocketTransport, deadline: Instant) -> Result<(), ClientError> {
    t.send(JsonPacket::new(json::stop_streaming_request()))?;
    loop {
        let packet = t.receive(remaining(deadline)?)?;
        if packet.status() == Some(STATUS_STOP) {
            return Ok(());
        }
        trace!("Dropping message while waiting for stop ack: {}", packet.header);
    }
}
