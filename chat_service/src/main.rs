// chat_service/src/main.rs

use std::sync::Arc;

use chat_service::auth::QueryAuthenticator;
use chat_service::config::ChatServiceConfig;
use chat_service::ws_server::service::ChatWsService;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 尽早初始化日志记录器；使用 try_init 以容忍重复初始化
    if let Err(e) = env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .try_init()
    {
        eprintln!("初始化 env_logger 失败: {}", e);
    }
    log::info!("日志系统已初始化。");

    let config = ChatServiceConfig::load();
    let service = ChatWsService::new(config, Arc::new(QueryAuthenticator));
    service.start().await
}
