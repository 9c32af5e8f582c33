// chat_service/src/ws_server/mod.rs

//! WebSocket 服务端逻辑模块。

pub mod client_session;
pub mod connection_registry;
pub mod lifecycle;
pub mod message_router;
pub mod room_store;
pub mod service;
