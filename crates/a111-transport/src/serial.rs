//! 串口寄存器链路
//!
//! 字节流上承载 `0xCC | len | cmd | payload | 0xCD` 帧，部分读取累积在
//! [`FrameDecoder`] 中直到组成完整帧。

use crate::stream::{self, ByteStream, READ_CHUNK};
use crate::{DeviceError, DeviceErrorKind, Transport, TransportError};
use a111_protocol::{FrameDecoder, RegisterPacket};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// 串口默认波特率
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

enum Endpoint {
    /// 由 `connect()` 打开的系统串口
    #[cfg_attr(not(feature = "serial"), allow(dead_code))]
    Port { path: String, baud_rate: u32 },
    /// 环境提供的已打开字节流
    Stream,
}

/// 串口寄存器链路
pub struct SerialTransport {
    endpoint: Endpoint,
    stream: Option<Box<dyn ByteStream>>,
    decoder: FrameDecoder,
    connected: bool,
}

impl SerialTransport {
    /// 延迟打开：`connect()` 时通过 `serialport` 打开 `path`
    #[cfg(feature = "serial")]
    pub fn open(path: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            endpoint: Endpoint::Port {
                path: path.into(),
                baud_rate,
            },
            stream: None,
            decoder: FrameDecoder::new(),
            connected: false,
        }
    }

    /// 使用环境提供的已打开字节流
    pub fn from_stream(stream: impl ByteStream + 'static) -> Self {
        Self {
            endpoint: Endpoint::Stream,
            stream: Some(Box::new(stream)),
            decoder: FrameDecoder::new(),
            connected: false,
        }
    }

    fn open_endpoint(&mut self) -> Result<Box<dyn ByteStream>, TransportError> {
        if let Some(stream) = self.stream.take() {
            return Ok(stream);
        }
        match &self.endpoint {
            #[cfg(feature = "serial")]
            Endpoint::Port { path, baud_rate } => {
                let port = serialport::new(path.as_str(), *baud_rate)
                    .timeout(Duration::from_millis(100))
                    .open()
                    .map_err(|e| DeviceError::new(map_serial_error(&e), format!("{}: {}", path, e)))?;
                debug!("Opened serial port {} at {} baud", path, baud_rate);
                Ok(Box::new(port))
            },
            #[cfg(not(feature = "serial"))]
            Endpoint::Port { path, .. } => Err(DeviceError::new(
                DeviceErrorKind::UnsupportedConfig,
                format!("{}: built without serial port support", path),
            )
            .into()),
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

    fn next_buffered(&mut self) -> Result<Option<RegisterPacket>, TransportError> {
        let result = self.decoder.next_packet();
        let discarded = self.decoder.take_discarded();
        if discarded > 0 {
            warn!("Discarded {} bytes before frame start marker", discarded);
        }
        Ok(result?)
    }
}

#[cfg(feature = "serial")]
fn map_serial_error(e: &serialport::Error) -> DeviceErrorKind {
    match e.kind() {
        serialport::ErrorKind::NoDevice => DeviceErrorKind::NoDevice,
        serialport::ErrorKind::InvalidInput => DeviceErrorKind::UnsupportedConfig,
        serialport::ErrorKind::Io(std::io::ErrorKind::NotFound) => DeviceErrorKind::NotFound,
        serialport::ErrorKind::Io(std::io::ErrorKind::PermissionDenied) => {
            DeviceErrorKind::AccessDenied
        },
        serialport::ErrorKind::Io(_) => DeviceErrorKind::Backend,
        _ => DeviceErrorKind::Unknown,
    }
}

impl Transport for SerialTransport {
    type Message = RegisterPacket;

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

    fn send(&mut self, message: RegisterPacket) -> Result<(), TransportError> {
        let bytes = message.encode()?;
        trace!("serial tx: {}", hex::encode(&bytes));
        stream::write_all(self.stream_mut()?.as_mut(), &bytes)
    }

    fn receive(&mut self, timeout: Duration) -> Result<RegisterPacket, TransportError> {
        let deadline = Instant::now() + timeout;
        let mut buf = [0u8; READ_CHUNK];
        loop {
            if let Some(packet) = self.next_buffered()? {
                return Ok(packet);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(TransportError::Timeout);
            }
            let n = stream::read_chunk(self.stream_mut()?.as_mut(), &mut buf, remaining)?;
            if n > 0 {
                trace!("serial rx: {}", hex::encode(&buf[..n]));
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
        debug!("Serial transport disconnected");
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
    use a111_protocol::Register;
    use std::collections::VecDeque;
    use std::io::{self, Read, Write};
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Pipe {
        rx: Arc<Mutex<VecDeque<Vec<u8>>>>,
        tx: Arc<Mutex<Vec<u8>>>,
    }

    impl Read for Pipe {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.rx.lock().unwrap().pop_front() {
                Some(chunk) => {
                    buf[..chunk.len()].copy_from_slice(&chunk);
                    Ok(chunk.len())
                },
                None => Err(io::ErrorKind::TimedOut.into()),
            }
        }
    }

    impl Write for Pipe {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.tx.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl ByteStream for Pipe {}

    #[test]
    fn test_requires_connect() {
        let mut transport = SerialTransport::from_stream(Pipe::default());
        assert!(matches!(
            transport.send(RegisterPacket::ReadRequest {
                register: Register::Status
            }),
            Err(TransportError::NotConnected)
        ));
    }

    #[test]
    fn test_send_writes_frame() {
        let pipe = Pipe::default();
        let mut transport = SerialTransport::from_stream(pipe.clone());
        transport.connect().unwrap();
        transport
            .send(RegisterPacket::ReadRequest {
                register: Register::ProductId,
            })
            .unwrap();
        assert_eq!(*pipe.tx.lock().unwrap(), vec![0xCC, 0x01, 0x00, 0xF8, 0x10, 0xCD]);
    }

    #[test]
    fn test_receive_accumulates_partial_reads() {
        let pipe = Pipe::default();
        let frame = RegisterPacket::ReadResponse {
            register: Register::ProductId,
            value: 0xACC0,
        }
        .encode().unwrap();
        {
            let mut rx = pipe.rx.lock().unwrap();
            rx.push_back(vec![0x00, 0x00]);
            rx.push_back(frame[..3].to_vec());
            rx.push_back(frame[3..].to_vec());
        }
        let mut transport = SerialTransport::from_stream(pipe);
        transport.connect().unwrap();
        let packet = transport.receive(Duration::from_millis(100)).unwrap();
        assert_eq!(
            packet,
            RegisterPacket::ReadResponse {
                register: Register::ProductId,
                value: 0xACC0
            }
        );
    }

    #[test]
    fn test_receive_times_out() {
        let mut transport = SerialTransport::from_stream(Pipe::default());
        transport.connect().unwrap();
        let start = Instant::now();
        assert!(matches!(
            transport.receive(Duration::from_millis(20)),
            Err(TransportError::Timeout)
        ));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_bad_end_marker_is_malformed() {
        let pipe = Pipe::default();
        let mut frame = RegisterPacket::WriteResponse {
            register: Register::MainControl,
            value: 1,
        }
        .encode().unwrap();
        let last = frame.len() - 1;
        frame[last] = 0xEE;
        pipe.rx.lock().unwrap().push_back(frame);
        let mut transport = SerialTransport::from_stream(pipe);
        transport.connect().unwrap();
        assert!(matches!(
            transport.receive(Duration::from_millis(50)),
            Err(TransportError::Malformed(_))
        ));
    }

    #[test]
    fn test_stream_cannot_reopen_after_disconnect() {
        let mut transport = SerialTransport::from_stream(Pipe::default());
        transport.connect().unwrap();
        transport.connect().unwrap();
        transport.disconnect().unwrap();
        assert!(!transport.is_connected());
        assert!(matches!(
            transport.connect(),
            Err(TransportError::Device(ref e)) if e.kind == DeviceErrorKind::NoDevice
        ));
    }
}
