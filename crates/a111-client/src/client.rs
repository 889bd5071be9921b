//! 雷达会话客户端
//!
//! 单一所有者、阻塞式 API。状态转换见 [`SessionState`]。

use crate::builder::ClientBuilder;
use crate::error::ClientError;
use crate::link::Link;
use crate::options::ClientOptions;
use crate::state::SessionState;
use a111_protocol::{
    Frame, FrameMetadata, RadarConfig, ServiceSettings, SessionInfo, decode_frame,
};
use a111_transport::{DeviceError, DeviceErrorKind, TransportError};
use std::thread::{JoinHandle, spawn};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// 带超时的 join，成功时取回线程返回值
trait JoinTimeout<T> {
    fn join_timeout(self, timeout: Duration) -> Option<T>;
}

impl<T: Send + 'static> JoinTimeout<T> for JoinHandle<T> {
    fn join_timeout(self, timeout: Duration) -> Option<T> {
        use std::sync::mpsc;

        let (tx, rx) = mpsc::channel();

        // 看门狗线程负责 join，超时后由它自行结束
        spawn(move || {
            let _ = tx.send(self.join());
        });

        match rx.recv_timeout(timeout) {
            Ok(Ok(value)) => Some(value),
            Ok(Err(_)) => {
                error!("Transport close thread panicked");
                None
            },
            Err(_) => None,
        }
    }
}

/// A111 雷达会话客户端
///
/// # Example
///
/// ```no_run
/// use a111_client::RadarClient;
/// use a111_protocol::{PowerBinConfig, ServiceSettings};
///
/// let mut client = RadarClient::builder().socket("192.168.1.20").build()?;
///
/// let mut config = PowerBinConfig::default();
/// config.set_range_interval([0.2, 0.6])?;
/// config.set_sweep_rate(20.0)?;
/// config.set_bin_count(5)?;
///
/// let info = client.setup_session(config)?;
/// println!("{:?}", info);
///
/// client.start_streaming()?;
/// let (metadata, frame) = client.get_next()?;
/// println!("#{} {:?}", metadata.sequence_number, frame.shape());
/// client.stop_streaming()?;
/// client.disconnect();
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct RadarClient {
    /// 关闭超时后链路被放弃，此后为 `None`
    link: Option<Link>,
    state: SessionState,
    options: ClientOptions,
    config: Option<RadarConfig>,
    session_info: Option<SessionInfo>,
    squeeze: bool,
    consecutive_failures: u32,
}

impl RadarClient {
    pub fn new(link: Link, options: ClientOptions) -> Self {
        Self {
            link: Some(link),
            state: SessionState::Disconnected,
            squeeze: options.squeeze,
            options,
            config: None,
            session_info: None,
            consecutive_failures: 0,
        }
    }

    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// 最近一次成功建立的会话信息
    pub fn session_info(&self) -> Option<&SessionInfo> {
        self.session_info.as_ref()
    }

    /// 当前会话使用的配置（客户端持有的副本）
    pub fn config(&self) -> Option<&RadarConfig> {
        self.config.as_ref()
    }

    pub fn squeeze(&self) -> bool {
        self.squeeze
    }

    pub fn set_squeeze(&mut self, squeeze: bool) {
        self.squeeze = squeeze;
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// 当前链路类型（"serial" / "spi" / "socket"）
    pub fn link_name(&self) -> Option<&'static str> {
        self.link.as_ref().map(Link::name)
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            debug!("Session state: {} -> {}", self.state, state);
            self.state = state;
        }
    }

    fn link_mut(&mut self) -> Result<&mut Link, ClientError> {
        self.link.as_mut().ok_or_else(abandoned)
    }

    /// 打开链路；已连接时无操作
    pub fn connect(&mut self) -> Result<(), ClientError> {
        if self.state.is_connected() {
            return Ok(());
        }
        let timeout = self.options.receive_timeout();
        let link = self.link_mut()?;
        link.open(timeout)?;
        info!("Connected via {} link", link.name());
        self.consecutive_failures = 0;
        self.set_state(SessionState::Connected);
        Ok(())
    }

    /// 建立会话
    ///
    /// 配置先在本地完整校验，未通过时不会发送任何字节。
    /// 未连接时自动连接。设备拒绝配置时返回 `ConfigRejected`，状态回到 `Connected`。
    pub fn setup_session(
        &mut self,
        config: impl Into<RadarConfig>,
    ) -> Result<SessionInfo, ClientError> {
        let config = config.into();
        if self.state == SessionState::Streaming {
            return Err(ClientError::InvalidState {
                expected: "Connected or Configured",
                actual: self.state,
            });
        }
        config.check_complete()?;

        self.connect()?;

        let timeout = self.options.receive_timeout();
        let result = self.link_mut()?.setup(&config, timeout);
        match result {
            Ok(info) => {
                info!(
                    "Session configured: {} (range {:.3}..{:.3} m, {} samples)",
                    config.mode(),
                    info.range_start,
                    info.range_start + info.range_length,
                    info.data_length
                );
                self.config = Some(config);
                self.session_info = Some(info.clone());
                self.set_state(SessionState::Configured);
                Ok(info)
            },
            Err(e) => {
                warn!("Session setup failed: {}", e);
                self.config = None;
                self.session_info = None;
                if self.state.is_connected() {
                    self.set_state(SessionState::Connected);
                }
                Err(e)
            },
        }
    }

    /// 开始数据流
    pub fn start_streaming(&mut self) -> Result<(), ClientError> {
        if self.state != SessionState::Configured {
            return Err(ClientError::InvalidState {
                expected: "Configured",
                actual: self.state,
            });
        }
        let timeout = self.options.receive_timeout();
        self.link_mut()?.start(timeout)?;
        self.consecutive_failures = 0;
        self.set_state(SessionState::Streaming);
        info!("Streaming started");
        Ok(())
    }

    /// 阻塞读取下一帧
    ///
    /// 超时和帧损坏只影响本次调用；连续失败达到
    /// `max_consecutive_failures` 次时断开链路并返回 `StreamLost`。
    pub fn get_next(&mut self) -> Result<(FrameMetadata, Frame), ClientError> {
        if self.state != SessionState::Streaming {
            return Err(ClientError::InvalidState {
                expected: "Streaming",
                actual: self.state,
            });
        }
        let timeout = self.options.receive_timeout();
        let (Some(link), Some(config), Some(info)) = (
            self.link.as_mut(),
            self.config.as_ref(),
            self.session_info.as_ref(),
        ) else {
            return Err(abandoned());
        };

        let result = link
            .next_frame(timeout)
            .and_then(|raw| decode_frame(&raw, config, info).map_err(ClientError::from));

        match result {
            Ok((metadata, frame)) => {
                self.consecutive_failures = 0;
                let frame = if self.squeeze { frame.squeeze() } else { frame };
                Ok((metadata, frame))
            },
            Err(e) if e.is_retryable() => {
                self.consecutive_failures += 1;
                let limit = self.options.max_consecutive_failures.max(1);
                warn!(
                    "Frame receive failed ({}/{}): {}",
                    self.consecutive_failures, limit, e
                );
                if self.consecutive_failures >= limit {
                    let failures = self.consecutive_failures;
                    error!("Stream lost after {} consecutive failures, disconnecting", failures);
                    self.disconnect();
                    return Err(ClientError::StreamLost { failures });
                }
                Err(e)
            },
            Err(e) => Err(e),
        }
    }

    /// 停止数据流
    ///
    /// 设备在 `stop_timeout` 内未确认时记录警告，状态仍回到 `Configured`。
    /// 已处于 `Configured` 时无操作。
    pub fn stop_streaming(&mut self) -> Result<(), ClientError> {
        match self.state {
            SessionState::Streaming => {},
            SessionState::Configured => return Ok(()),
            actual => {
                return Err(ClientError::InvalidState {
                    expected: "Streaming",
                    actual,
                });
            },
        }
        let timeout = self.options.stop_timeout();
        let result = self.link_mut()?.stop(timeout);
        if let Err(e) = result {
            warn!("Device did not acknowledge stop within {:?}: {}", timeout, e);
        }
        self.consecutive_failures = 0;
        self.set_state(SessionState::Configured);
        Ok(())
    }

    /// 关闭链路，任何状态下都可调用且不会失败
    ///
    /// 正在流式传输时先尝试停止。关闭在 `close_timeout` 内未完成时
    /// 放弃该链路（之后无法重新连接）。
    pub fn disconnect(&mut self) {
        if self.state == SessionState::Streaming {
            let _ = self.stop_streaming();
        }

        if let Some(mut link) = self.link.take() {
            if link.is_connected() {
                let timeout = self.options.close_timeout();
                let handle = spawn(move || {
                    let result = link.close();
                    (link, result)
                });
                match handle.join_timeout(timeout) {
                    Some((link, result)) => {
                        if let Err(e) = result {
                            warn!("Error while closing {} link: {}", link.name(), e);
                        }
                        self.link = Some(link);
                    },
                    None => {
                        error!("Link close did not finish within {:?}, abandoning it", timeout);
                    },
                }
            } else {
                self.link = Some(link);
            }
        }

        self.config = None;
        self.session_info = None;
        self.consecutive_failures = 0;
        if self.state != SessionState::Disconnected {
            info!("Disconnected");
        }
        self.set_state(SessionState::Disconnected);
    }
}

impl Drop for RadarClient {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn abandoned() -> ClientError {
    ClientError::Connection(TransportError::Device(DeviceError::new(
        DeviceErrorKind::NoDevice,
        "link was abandoned after a timed-out close",
    )))
}
