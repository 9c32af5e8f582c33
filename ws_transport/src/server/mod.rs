//! WebSocket 服务端传输逻辑模块。

pub mod transport;
