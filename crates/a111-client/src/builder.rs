//! Builder 模式实现
//!
//! 提供链式构造 `RadarClient` 的便捷方式。链路在此处一次性选定。

use crate::client::RadarClient;
use crate::error::ClientError;
use crate::link::Link;
use crate::options::ClientOptions;
use a111_transport::{
    ByteStream, DeviceError, DeviceErrorKind, SerialTransport, SocketTransport, SpiBus,
    SpiTransport, TransportError,
};

enum LinkChoice {
    Serial(SerialTransport),
    Spi(Box<dyn SpiBus>),
    Socket(SocketTransport),
}

/// RadarClient Builder（链式构造）
///
/// 多次选择链路时以最后一次为准。
///
/// # Example
///
/// ```no_run
/// use a111_client::{ClientBuilder, ClientOptions};
///
/// let options = ClientOptions {
///     receive_timeout_ms: 1_000,
///     ..Default::default()
/// };
/// let client = ClientBuilder::new()
///     .serial("/dev/ttyUSB0", 115_200)
///     .options(options)
///     .build()
///     .unwrap();
/// ```
#[derive(Default)]
pub struct ClientBuilder {
    link: Option<LinkChoice>,
    options: Option<ClientOptions>,
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 串口寄存器链路（`connect()` 时打开设备）
    #[cfg(feature = "serial")]
    pub fn serial(mut self, path: impl Into<String>, baud_rate: u32) -> Self {
        self.link = Some(LinkChoice::Serial(SerialTransport::open(path, baud_rate)));
        self
    }

    /// 在已打开的字节流上运行寄存器协议
    pub fn serial_stream(mut self, stream: impl ByteStream + 'static) -> Self {
        self.link = Some(LinkChoice::Serial(SerialTransport::from_stream(stream)));
        self
    }

    /// SPI 寄存器链路（总线由环境提供）
    pub fn spi(mut self, bus: impl SpiBus + 'static) -> Self {
        self.link = Some(LinkChoice::Spi(Box::new(bus)));
        self
    }

    /// Socket JSON 链路，`addr` 为 `host` 或 `host:port`
    pub fn socket(mut self, addr: impl Into<String>) -> Self {
        self.link = Some(LinkChoice::Socket(SocketTransport::tcp(addr)));
        self
    }

    /// 在已连接的字节流上运行 JSON 协议
    pub fn socket_stream(mut self, stream: impl ByteStream + 'static) -> Self {
        self.link = Some(LinkChoice::Socket(SocketTransport::from_stream(stream)));
        self
    }

    pub fn options(mut self, options: ClientOptions) -> Self {
        self.options = Some(options);
        self
    }

    /// 构造客户端（不连接）
    pub fn build(self) -> Result<RadarClient, ClientError> {
        let options = self.options.unwrap_or_default();
        let link = match self.link {
            Some(LinkChoice::Serial(t)) => Link::Serial(t),
            Some(LinkChoice::Spi(bus)) => Link::Spi(
                SpiTransport::new(bus).with_poll_interval(options.spi_poll_interval()),
            ),
            Some(LinkChoice::Socket(t)) => Link::Socket(t),
            None => {
                return Err(ClientError::Connection(TransportError::Device(
                    DeviceError::new(DeviceErrorKind::NotFound, "no link selected"),
                )));
            },
        };
        Ok(RadarClient::new(link, options))
    }
}
