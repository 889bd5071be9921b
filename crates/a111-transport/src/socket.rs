//! Socket JSON 链路
//!
//! 持久 TCP 连接上传输以 `\n` 分隔的 JSON 消息（可附二进制负载）。
//! JSON 解析失败返回 `TransportError::Malformed`。

use crate::stream::{self, ByteStream, READ_CHUNK};
use crate::{DeviceError, DeviceErrorKind, Transport, TransportError};
use a111_protocol::{JsonDecoder, JsonPacket};
use std::io;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// 默认服务端口
pub const DEFAULT_PORT: u16 = 6110;

/// 默认连接超时
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

enum Endpoint {
    Tcp {
        addr: String,
        connect_timeout: Duration,
    },
    Stream,
}

/// Socket JSON 链路
pub struct SocketTransport {
    endpoint: Endpoint,
    stream: Option<Box<dyn ByteStream>>,
    decoder: JsonDecoder,
    connected: bool,
}

impl SocketTransport {
    /// 延迟连接：`connect()` 时建立 TCP 连接
    ///
    /// `addr` 未带端口时使用 [`DEFAULT_PORT`]。
    pub fn tcp(addr: impl Into<String>) -> Self {
        Self {
            endpoint: Endpoint::Tcp {
                addr: addr.into(),
                connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            },
            stream: None,
            decoder: JsonDecoder::new(),
            connected: false,
        }
    }

    /// 使用环境提供的已连接字节流
    pub fn from_stream(stream: impl ByteStream + 'static) -> Self {
        Self {
            endpoint: Endpoint::Stream,
            stream: Some(Box::new(stream)),
            decoder: JsonDecoder::new(),
            connected: false,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        if let Endpoint::Tcp {
            connect_timeout, ..
        } = &mut self.endpoint
        {
            *connect_timeout = timeout;
        }
        self
    }

    fn open_endpoint(&mut self) -> Result<Box<dyn ByteStream>, TransportError> {
        if let Some(stream) = self.stream.take() {
            return Ok(stream);
        }
        match &self.endpoint {
            Endpoint::Tcp {
                addr,
                connect_timeout,
            } => {
                let stream = connect_tcp(addr, *connect_timeout)?;
                stream.set_nodelay(true)?;
                debug!("Connected to {}", addr);
                Ok(Box::new(stream))
            },
            Endpoint::Stream => Err(DeviceError::new(
                DeviceErrorKind::NoDevice,
                "byte stream was closed and cannot be reopened",
            )
            .into()),
        }
    }

    fn stream_mut(&mut self) -> Result<&mut Box<dyn ByteStream>, TransportError> {
        match (self.connected, self.stream.as_mut()) {
            (true, Some(stream)) => Ok(stream),
            _ => Err(TransportError::NotConnected),
        }
    }
}

fn resolve(addr: &str) -> io::Result<Vec<SocketAddr>> {
    match addr.to_socket_addrs() {
        Ok(addrs) => Ok(addrs.collect()),
        // 仅主机名时补上默认端口
        Err(_) => (addr, DEFAULT_PORT).to_socket_addrs().map(Iterator::collect),
    }
}

fn connect_tcp(addr: &str, timeout: Duration) -> Result<TcpStream, TransportError> {
    let mut last_err = None;
    for candidate in resolve(addr)? {
        match TcpStream::connect_timeout(&candidate, timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) => last_err = Some(e),
        }
    }
    Err(match last_err {
        Some(e) if e.kind() == io::ErrorKind::ConnectionRefused => {
            DeviceError::new(DeviceErrorKind::NotFound, format!("{}: {}", addr, e)).into()
        },
        Some(e) => TransportError::Io(e),
        None => DeviceError::new(DeviceErrorKind::NotFound, format!("{}: no address", addr)).into(),
    })
}

impl Transport for SocketTransport {
    type Message = JsonPacket;

    fn connect(&mut self) -> Result<(), TransportError> {
        if self.connected {
            return Ok(());
        }
        let stream = self.open_endpoint()?;
        self.stream = Some(stream);
        self.decoder.clear();
        self.connected = true;
        Ok(())
    }

    fn send(&mut self, message: JsonPacket) -> Result<(), TransportError> {
        let bytes = message.encode()?;
        trace!("socket tx: {}", String::from_utf8_lossy(&bytes).trim_end());
        stream::write_all(self.stream_mut()?.as_mut(), &bytes)
    }

    fn receive(&mut self, timeout: Duration) -> Result<JsonPacket, TransportError> {
        let deadline = Instant::now() + timeout;
        let mut buf = [0u8; READ_CHUNK];
        loop {
            if let Some(packet) = self.decoder.next_packet()? {
                trace!(
                    "socket rx: {} (+{} payload bytes)",
                    packet.header,
                    packet.payload.as_ref().map_or(0, Vec::len)
                );
                return Ok(packet);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(TransportError::Timeout);
            }
            let n = stream::read_chunk(self.stream_mut()?.as_mut(), &mut buf, remaining)?;
            if n > 0 {
                self.decoder.push(&buf[..n]);
            }
        }
    }

    fn disconnect(&mut self) -> Result<(), TransportError> {
        if !self.connected {
            return Ok(());
        }
        self.connected = false;
        self.decoder.clear();
        if let Some(mut stream) = self.stream.take() {
            stream.close()?;
        }
        debug!("Socket transport disconnected");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn discard_pending(&mut self) {
        self.decoder.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn test_tcp_request_response() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut writer = stream.try_clone().unwrap();
            let mut line = String::new();
            BufReader::new(stream).read_line(&mut line).unwrap();
            assert!(line.contains("start_streaming_request"));
            writer.write_all(b"{\"status\":\"start\"}\n").unwrap();
            writer
                .write_all(b"{\"result_info\":{\"sequence_number\":1},\"payload_size\":2}\n\x01\x02")
                .unwrap();
        });

        let mut transport = SocketTransport::tcp(addr.to_string());
        transport.connect().unwrap();
        transport
            .send(JsonPacket::new(a111_protocol::json::start_streaming_request()))
            .unwrap();
        let ack = transport.receive(Duration::from_secs(2)).unwrap();
        assert_eq!(ack.status(), Some("start"));
        let data = transport.receive(Duration::from_secs(2)).unwrap();
        assert_eq!(data.payload, Some(vec![1, 2]));

        server.join().unwrap();
        transport.disconnect().unwrap();
        assert!(!transport.is_connected());
    }

    #[test]
    fn test_malformed_json() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            stream.write_all(b"{\"status\": ok}\n").unwrap();
            // 保持连接直到客户端读完
            thread::sleep(Duration::from_millis(100));
        });

        let mut transport = SocketTransport::tcp(addr.to_string());
        transport.connect().unwrap();
        assert!(matches!(
            transport.receive(Duration::from_secs(2)),
            Err(TransportError::Malformed(_))
        ));
        server.join().unwrap();
    }

    #[test]
    fn test_connection_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let mut transport = SocketTransport::tcp(addr.to_string())
            .with_connect_timeout(Duration::from_millis(200));
        assert!(transport.connect().is_err());
        assert!(!transport.is_connected());
    }
}
