//! `ws_transport` 是聊天路由服务的 WebSocket 传输层 Crate。
//!
//! 它负责接受连接、完成握手、封装文本帧的收发，并定义统一的消息信封格式。
//! 路由核心只通过本 Crate 暴露的句柄与对端通信，不直接接触底层 WebSocket 流。
//!
//! 主要模块包括：
//! - `message`: 定义核心消息信封结构 `WsMessage`（编解码协作方）。
//! - `error`: 定义传输层统一错误类型 `WsError`。
//! - `server`: 提供服务端监听、握手与每连接收发逻辑。

pub mod error;
pub mod message;
pub mod server;
