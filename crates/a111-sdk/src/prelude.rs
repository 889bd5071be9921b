//! Prelude - 常用类型的便捷导入
//!
//! ```rust
//! use a111_sdk::prelude::*;
//! ```

// 客户端层
pub use crate::client::{ClientBuilder, ClientError, ClientOptions, RadarClient, SessionState};

// 配置模型（含设置器 trait）
pub use crate::protocol::{
    ConfigValue, DenseSettings, DistancePeakConfig, EnvelopeConfig, FieldAccess, IqConfig, Mode,
    PowerBinConfig, RadarConfig, ServiceSettings, SessionProfile, SparseConfig,
};

// 帧与会话
pub use crate::protocol::{DistancePeak, Frame, FrameMetadata, SessionInfo};

// 错误类型
pub use crate::protocol::{ConfigError, ProtocolError};
pub use crate::transport::TransportError;
