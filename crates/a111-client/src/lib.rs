//! 会话客户端模块
//!
//! 本模块提供 A111 雷达的会话状态机：
//! - 链路选择（串口 / SPI / Socket）
//! - 会话建立、数据流启停、逐帧读取
//! - 连续失败计数与有界关闭
//!
//! # 使用场景
//!
//! 这是大多数用户应该使用的入口。若需要直接收发寄存器帧或 JSON 消息，
//! 可以使用 `a111-transport` 与 `a111-protocol`。

pub mod builder;
pub mod client;
pub mod error;
pub mod link;
pub mod options;
pub mod state;

// 重新导出常用类型
pub use builder::ClientBuilder;
pub use client::RadarClient;
pub use error::ClientError;
pub use link::Link;
pub use options::ClientOptions;
pub use state::SessionState;
