// WebSocket模块 - 币安现货单品种原始流 (使用 tokio-tungstenite 实现)
use crate::common::{
    models::{Candle, DepthSample, RawKlineEvent, RawPartialDepth, RawTrade, Symbol, TradeEvent},
    AppError, Result,
};
use futures::stream::BoxStream;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{tungstenite::protocol::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

/// WebSocket连接日志目标
pub const WEBSOCKET_CONNECTION_TARGET: &str = "websocket连接";

/// 订阅返回的事件流。`Err` 项或流结束都表示连接已断开
pub type FeedStream<T> = BoxStream<'static, Result<T>>;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// 币安单品种行情流客户端
#[derive(Clone, Debug)]
pub struct BinanceStreamClient {
    ws_url: String,
}

impl BinanceStreamClient {
    pub fn new(ws_url: impl Into<String>) -> Self {
        Self { ws_url: ws_url.into() }
    }

    /// `<symbol>@depth<levels>@100ms`
    pub async fn depth_stream(&self, symbol: &Symbol, levels: usize) -> Result<FeedStream<DepthSample>> {
        let stream_name = format!("{}@depth{}@100ms", symbol.stream_name(), levels);
        let ws = self.connect(&stream_name).await?;
        Ok(decode_stream(ws, stream_name, move |text| {
            let raw: RawPartialDepth = serde_json::from_str(text)?;
            raw.to_sample(levels).map(Some)
        }))
    }

    /// `<symbol>@trade`
    pub async fn trade_stream(&self, symbol: &Symbol) -> Result<FeedStream<TradeEvent>> {
        let stream_name = format!("{}@trade", symbol.stream_name());
        let ws = self.connect(&stream_name).await?;
        Ok(decode_stream(ws, stream_name, |text| {
            let raw: RawTrade = serde_json::from_str(text)?;
            TradeEvent::try_from(raw).map(Some)
        }))
    }

    /// `<symbol>@kline_<interval>`
    pub async fn kline_stream(&self, symbol: &Symbol, interval: &str) -> Result<FeedStream<Candle>> {
        let stream_name = format!("{}@kline_{}", symbol.stream_name(), interval);
        let ws = self.connect(&stream_name).await?;
        Ok(decode_stream(ws, stream_name, |text| {
            let raw: RawKlineEvent = serde_json::from_str(text)?;
            Candle::try_from(raw.kline).map(Some)
        }))
    }

    /// 连接到单个原始流
    async fn connect(&self, stream_name: &str) -> Result<WsStream> {
        let url = Url::parse(&format!("{}/{}", self.ws_url.trim_end_matches('/'), stream_name))?;
        debug!(target: WEBSOCKET_CONNECTION_TARGET, %url, "连接到WebSocket");

        let (ws, _) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| AppError::WebSocketError(format!("连接 {} 失败: {}", stream_name, e)))?;

        info!(target: WEBSOCKET_CONNECTION_TARGET, stream = stream_name, "WebSocket连接已建立");
        Ok(ws)
    }
}

/// 把原始 WebSocket 消息流转换为解码后的事件流
///
/// 单条消息解析失败只记录并跳过；传输错误作为 `Err` 项交给上层监督器。
fn decode_stream<T, F>(ws: WsStream, stream_name: String, decode: F) -> FeedStream<T>
where
    T: Send + 'static,
    F: Fn(&str) -> Result<Option<T>> + Send + 'static,
{
    let stream = futures::stream::unfold((ws, decode, stream_name), |(mut ws, decode, stream_name)| async move {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => match decode(&text) {
                    Ok(Some(item)) => return Some((Ok(item), (ws, decode, stream_name))),
                    Ok(None) => continue,
                    Err(e) => {
                        warn!(
                            target: WEBSOCKET_CONNECTION_TARGET,
                            stream = %stream_name,
                            error.summary = e.get_error_type_summary(),
                            error.details = %e,
                            "消息解析失败，已跳过"
                        );
                        continue;
                    }
                },
                Some(Ok(Message::Ping(data))) => {
                    if let Err(e) = ws.send(Message::Pong(data)).await {
                        let err = AppError::WebSocketError(format!("{} 发送Pong失败: {}", stream_name, e));
                        return Some((Err(err), (ws, decode, stream_name)));
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    info!(target: WEBSOCKET_CONNECTION_TARGET, stream = %stream_name, ?frame, "收到关闭消息");
                    return None;
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    let err = AppError::WebSocketError(format!("{} 读取失败: {}", stream_name, e));
                    return Some((Err(err), (ws, decode, stream_name)));
                }
                None => return None,
            }
        }
    });
    Box::pin(stream)
}
