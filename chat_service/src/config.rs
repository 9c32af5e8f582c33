// chat_service/src/config.rs

//! 服务端配置信息。

use std::env;

pub const DEFAULT_WS_HOST: &str = "127.0.0.1";
pub const DEFAULT_WS_PORT: u16 = 8090;

/// 聊天路由服务配置结构体。
#[derive(Debug, Clone)]
pub struct ChatServiceConfig {
    /// WebSocket 服务监听的主机地址。
    pub host: String,
    /// WebSocket 服务监听的端口号。
    pub port: u16,
}

impl Default for ChatServiceConfig {
    fn default() -> Self {
        ChatServiceConfig {
            host: DEFAULT_WS_HOST.to_string(),
            port: DEFAULT_WS_PORT,
        }
    }
}

impl ChatServiceConfig {
    /// 加载服务配置。
    ///
    /// 依次读取环境变量 `CHAT_WS_HOST` 与 `CHAT_WS_PORT`，
    /// 未设置或取值非法时记录日志并回退到编译期默认值。
    pub fn load() -> Self {
        let mut config = ChatServiceConfig::default();

        if let Ok(host) = env::var("CHAT_WS_HOST") {
            if !host.is_empty() {
                config.host = host;
            }
        }
        if let Ok(port) = env::var("CHAT_WS_PORT") {
            match port.parse::<u16>() {
                Ok(port) => config.port = port,
                Err(e) => log::warn!(
                    "环境变量 CHAT_WS_PORT 取值非法 ('{}'): {}，回退到默认端口 {}",
                    port,
                    e,
                    config.port
                ),
            }
        }

        log::info!(
            "使用 WebSocket 配置: host={}, port={}",
            config.host,
            config.port
        );
        config
    }

    /// 返回 `host:port` 形式的监听地址。
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
