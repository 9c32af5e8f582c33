//! 包含服务端 WebSocket 监听、握手、接受连接与每连接收发逻辑。

use crate::error::WsError;
use crate::message::WsMessage;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::{error, info, warn};
use std::borrow::Cow;
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::frame::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::tungstenite::Error as TungsteniteError;
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};

pub use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

/// `WsStream` 是一个类型别名，代表经过 WebSocket 握手后的 TCP 流。
pub type WsStream = WebSocketStream<TcpStream>;

/// 一次连接在握手阶段可观测到的元数据。
///
/// 认证协作方只依赖这里的信息（对端地址与请求 URI 的路径/查询串），
/// 不需要接触底层 WebSocket 流。
#[derive(Debug, Clone)]
pub struct ConnectMeta {
    /// 对端的 IP 地址和端口。
    pub peer_addr: SocketAddr,
    /// 握手请求的路径部分，例如 `/chat`。
    pub path: String,
    /// 握手请求的查询串（`?` 之后的部分），不存在时为 `None`。
    pub query: Option<String>,
}

impl ConnectMeta {
    /// 从查询串中取出指定键的取值。
    ///
    /// 查询串按 `key=value&key=value` 的简单形式解析，未做百分号解码；
    /// 键不存在时返回 `None`。
    pub fn query_param(&self, key: &str) -> Option<String> {
        let query = self.query.as_deref()?;
        query.split('&').find_map(|pair| {
            let (k, v) = pair.split_once('=')?;
            (k == key).then(|| v.to_string())
        })
    }
}

/// 一条已建立连接的写入半边。
///
/// 每个连接的发送泵任务独占持有一个 `ConnectionHandler`，
/// 通过它将 `WsMessage` 编码为文本帧写给对端，或主动关闭连接。
pub struct ConnectionHandler {
    sink: SplitSink<WsStream, Message>,
    peer_addr: SocketAddr,
}

impl ConnectionHandler {
    /// 返回对端地址。
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// 将一条 `WsMessage` 序列化为 JSON 文本帧并发送给对端。
    ///
    /// 连接已经关闭（本端或对端发起）时返回 `WsError::ConnectionClosed`，
    /// 其余写入失败按协议错误返回。
    pub async fn send_message(&mut self, message: &WsMessage) -> Result<(), WsError> {
        let text = serde_json::to_string(message)
            .map_err(|e| WsError::SerializationError(format!("发送前序列化 WsMessage 失败: {}", e)))?;
        self.sink
            .send(Message::Text(text))
            .await
            .map_err(|e| match e {
                TungsteniteError::ConnectionClosed
                | TungsteniteError::AlreadyClosed
                | TungsteniteError::Protocol(ProtocolError::SendAfterClosing) => {
                    WsError::ConnectionClosed
                }
                other => WsError::WebSocketProtocolError(other),
            })?;
        Ok(())
    }

    /// 主动向对端发送 Close 帧并结束写入半边。
    ///
    /// 握手身份校验失败时，服务端用 `CloseCode::Policy` 拒绝该连接。
    pub async fn close(&mut self, code: CloseCode, reason: &str) -> Result<(), WsError> {
        let frame = CloseFrame {
            code,
            reason: Cow::Owned(reason.to_string()),
        };
        self.sink.send(Message::Close(Some(frame))).await?;
        self.sink.close().await?;
        Ok(())
    }
}

/// 从连接的读取半边接收下一条 `WsMessage`。
///
/// Ping/Pong 等控制帧在内部消化；收到 Close 帧或流结束时返回 `None`，
/// 表示对端已关闭。文本帧解析失败返回 `DeserializationError`，
/// 该错误不代表连接失效，调用方可以继续接收后续消息。
pub async fn receive_message(
    receiver: &mut SplitStream<WsStream>,
) -> Option<Result<WsMessage, WsError>> {
    loop {
        match receiver.next().await? {
            Ok(Message::Text(text)) => {
                return Some(serde_json::from_str::<WsMessage>(&text).map_err(|e| {
                    WsError::DeserializationError(format!(
                        "入站文本帧不是合法的 WsMessage: {}, 原始文本: '{}'",
                        e, text
                    ))
                }));
            }
            Ok(Message::Binary(_)) => {
                return Some(Err(WsError::Message(
                    "不支持二进制帧，本服务只处理文本消息".to_string(),
                )));
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => continue,
            Ok(Message::Close(_)) => return None,
            Err(e) => return Some(Err(WsError::WebSocketProtocolError(e))),
        }
    }
}

/// 启动 WebSocket 服务器并开始监听指定的地址。
///
/// 对每一个握手成功的连接，服务器在独立的 Tokio 任务中调用 `on_connect` 回调，
/// 传入写入半边、读取半边与连接元数据。服务器会持续运行，
/// 直到监听器绑定失败等不可恢复错误发生。
///
/// # Arguments
/// * `addr`: 监听地址，例如 `"127.0.0.1:8090"`。
/// * `on_connect`: 新连接建立时的回调。需要 `Send + Sync + Clone + 'static`，
///   因为它会被克隆进每个连接的任务。
///
/// # Returns
/// 监听器绑定失败时返回错误；否则此函数将无限期运行。
pub async fn start_server<F, Fut>(addr: &str, on_connect: F) -> Result<(), WsError>
where
    F: Fn(ConnectionHandler, SplitStream<WsStream>, ConnectMeta) -> Fut + Send + Sync + Clone + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(addr).await?;
    info!("WebSocket 服务器正在监听地址: {}", addr);

    loop {
        match listener.accept().await {
            Ok((tcp_stream, peer_addr)) => {
                let on_connect_callback = on_connect.clone();

                tokio::spawn(async move {
                    // 在握手回调中捕获请求 URI，供认证协作方读取查询串。
                    let mut request_uri = None;
                    let capture_uri = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                        request_uri = Some(req.uri().clone());
                        Ok(resp)
                    };

                    match accept_hdr_async(tcp_stream, capture_uri).await {
                        Ok(ws_stream) => {
                            let meta = match request_uri {
                                Some(uri) => ConnectMeta {
                                    peer_addr,
                                    path: uri.path().to_string(),
                                    query: uri.query().map(str::to_string),
                                },
                                None => ConnectMeta {
                                    peer_addr,
                                    path: String::new(),
                                    query: None,
                                },
                            };
                            info!("与 {} 的 WebSocket 握手成功, 路径: {}", peer_addr, meta.path);

                            let (sink, stream) = ws_stream.split();
                            let handler = ConnectionHandler { sink, peer_addr };
                            on_connect_callback(handler, stream, meta).await;
                        }
                        Err(e) => {
                            error!("与 {} 的 WebSocket 握手失败: {}", peer_addr, e);
                        }
                    }
                });
            }
            Err(e) => {
                // 单次 accept 失败不终止服务器，记录后继续监听。
                warn!("接受 TCP 连接失败: {}。服务器将继续运行。", e);
            }
        }
    }
}
