//! A111 SDK - A111 脉冲相干雷达模组 Rust SDK
//!
//! # 架构设计
//!
//! 本 SDK 采用分层架构，从底层到高层：
//!
//! - **协议层** (`protocol`): 会话配置模型、寄存器/JSON 协议编解码、帧解码
//! - **链路层** (`transport`): 串口、SPI、Socket 三种链路
//! - **客户端层** (`client`): 会话状态机（连接、建立会话、数据流）
//!
//! # 快速开始
//!
//! ```no_run
//! use a111_sdk::prelude::*;
//!
//! a111_sdk::init_logger("info");
//!
//! let mut config = EnvelopeConfig::new();
//! config.set_range_interval([0.2, 0.8])?;
//! config.set_sweep_rate(30.0)?;
//!
//! let mut client = RadarClient::builder().serial("/dev/ttyUSB0", 115_200).build()?;
//! client.setup_session(config)?;
//! client.start_streaming()?;
//! for _ in 0..10 {
//!     let (metadata, frame) = client.get_next()?;
//!     println!("#{} {:?}", metadata.sequence_number, frame.shape());
//! }
//! client.disconnect();
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub use a111_client as client;
pub use a111_protocol as protocol;
pub use a111_transport as transport;

pub mod logging;
pub mod prelude;

// --- 公共 API ---

pub use a111_client::{
    ClientBuilder, ClientError, ClientOptions, Link, RadarClient, SessionState,
};
pub use a111_protocol::{
    ConfigError, DistancePeak, Frame, FrameMetadata, Mode, ProtocolError, RadarConfig,
    SessionInfo,
};
pub use a111_transport::{ByteStream, SpiBus, TransportError};
pub use logging::init_logger;
