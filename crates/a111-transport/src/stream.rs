//! 字节流句柄
//!
//! 串口与 Socket 链路都建立在 [`ByteStream`] 之上，环境可以提供任意实现
//! （系统串口、`TcpStream`、测试用的内存流）。

use crate::TransportError;
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::time::Duration;

/// 单次读取的最短阻塞时间（部分平台不接受零超时）
const MIN_READ_TIMEOUT: Duration = Duration::from_millis(1);

/// 读取缓冲区大小
pub(crate) const READ_CHUNK: usize = 4096;

/// 可读写的字节流
pub trait ByteStream: Read + Write + Send {
    /// 设置单次 `read` 的最长阻塞时间
    fn set_read_timeout(&mut self, _timeout: Duration) -> io::Result<()> {
        Ok(())
    }

    /// 关闭底层句柄
    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl ByteStream for TcpStream {
    fn set_read_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        TcpStream::set_read_timeout(self, Some(timeout.max(MIN_READ_TIMEOUT)))
    }

    fn close(&mut self) -> io::Result<()> {
        match self.shutdown(Shutdown::Both) {
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            other => other,
        }
    }
}

#[cfg(feature = "serial")]
impl ByteStream for dyn serialport::SerialPort {
    fn set_read_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.set_timeout(timeout.max(MIN_READ_TIMEOUT))
            .map_err(io::Error::from)
    }
}

impl<S: ByteStream + ?Sized> ByteStream for Box<S> {
    fn set_read_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        (**self).set_read_timeout(timeout)
    }

    fn close(&mut self) -> io::Result<()> {
        (**self).close()
    }
}

/// 读取一块数据
///
/// 在 `timeout` 内没有数据时返回 `Ok(0)`；对端关闭返回 `UnexpectedEof`。
pub(crate) fn read_chunk(
    stream: &mut dyn ByteStream,
    buf: &mut [u8],
    timeout: Duration,
) -> Result<usize, TransportError> {
    stream.set_read_timeout(timeout)?;
    match stream.read(buf) {
        Ok(0) => Err(TransportError::Io(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "stream closed by peer",
        ))),
        Ok(n) => Ok(n),
        Err(e)
            if matches!(
                e.kind(),
                io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
            ) =>
        {
            Ok(0)
        },
        Err(e) => Err(TransportError::Io(e)),
    }
}

/// 写入全部字节并刷新
pub(crate) fn write_all(stream: &mut dyn ByteStream, bytes: &[u8]) -> Result<(), TransportError> {
    stream.write_all(bytes)?;
    stream.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    struct Scripted {
        chunks: VecDeque<io::Result<Vec<u8>>>,
    }

    impl Read for Scripted {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.chunks.pop_front() {
                Some(Ok(bytes)) => {
                    buf[..bytes.len()].copy_from_slice(&bytes);
                    Ok(bytes.len())
                },
                Some(Err(e)) => Err(e),
                None => Err(io::ErrorKind::TimedOut.into()),
            }
        }
    }

    impl Write for Scripted {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl ByteStream for Scripted {}

    #[test]
    fn test_read_chunk_maps_timeouts_to_zero() {
        let mut stream = Scripted {
            chunks: VecDeque::from([Err(io::ErrorKind::WouldBlock.into()), Ok(vec![1, 2])]),
        };
        let mut buf = [0u8; 8];
        assert_eq!(read_chunk(&mut stream, &mut buf, Duration::ZERO).unwrap(), 0);
        assert_eq!(read_chunk(&mut stream, &mut buf, Duration::ZERO).unwrap(), 2);
        assert_eq!(read_chunk(&mut stream, &mut buf, Duration::ZERO).unwrap(), 0);
    }

    #[test]
    fn test_read_chunk_eof_is_error() {
        let mut stream = Scripted {
            chunks: VecDeque::from([Ok(Vec::new())]),
        };
        let mut buf = [0u8; 8];
        let err = read_chunk(&mut stream, &mut buf, Duration::ZERO).unwrap_err();
        assert!(matches!(err, TransportError::Io(ref e) if e.kind() == io::ErrorKind::UnexpectedEof));
    }
}
