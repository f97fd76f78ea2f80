//! 看板 Web 服务器
//!
//! - `GET /ws`：WebSocket，推送每一条出口事件（指标快照、买入信号、卖出信号）的 JSON
//! - `GET /health`：各状态品种数量
//!
//! 事件经 broadcast 通道分发，慢客户端跳过积压的消息。

use crate::common::{AppError, Result};
use crate::pipeline::{
    aggregator::wait_for_shutdown,
    scheduler::{StatusCounts, SymbolRegistry},
    sink::{BroadcastSink, DashboardMessage},
};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use futures::StreamExt;
use serde::Serialize;
use tokio::sync::watch;
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, info, instrument, warn};

#[derive(Clone)]
struct AppState {
    sink: BroadcastSink,
    registry: SymbolRegistry,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    symbols: StatusCounts,
}

pub fn router(sink: BroadcastSink, registry: SymbolRegistry) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { sink, registry })
}

/// 启动看板服务器，直到收到关闭信号
#[instrument(target = "看板服务", skip_all, fields(port = port))]
pub async fn run_dashboard_server(
    port: u16,
    sink: BroadcastSink,
    registry: SymbolRegistry,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<()> {
    let app = router(sink, registry);
    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| AppError::WebServerError(format!("无法绑定到 {}: {}", addr, e)))?;

    info!(target: "看板服务", log_type = "low_freq", addr = %addr, "看板服务器已启动");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { wait_for_shutdown(&mut shutdown_rx).await })
        .await
        .map_err(|e| AppError::WebServerError(e.to_string()))?;

    info!(target: "看板服务", log_type = "low_freq", "看板服务器已停止");
    Ok(())
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        symbols: state.registry.counts().await,
    })
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    let rx = state.sink.subscribe();
    ws.on_upgrade(move |socket| handle_socket(socket, BroadcastStream::new(rx)))
}

/// 单个看板连接：转发出口事件，客户端关闭或发送失败时退出
async fn handle_socket(mut socket: WebSocket, mut events: BroadcastStream<DashboardMessage>) {
    debug!(target: "看板服务", "看板客户端已连接");

    loop {
        tokio::select! {
            item = events.next() => match item {
                Some(Ok(message)) => {
                    let Ok(text) = serde_json::to_string(&message) else {
                        continue;
                    };
                    if socket.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Some(Err(BroadcastStreamRecvError::Lagged(skipped))) => {
                    warn!(target: "看板服务", skipped, "看板客户端过慢，跳过积压消息");
                }
                None => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            },
        }
    }

    debug!(target: "看板服务", "看板客户端已断开");
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn health_reports_counts() {
        let app = router(BroadcastSink::new(8), SymbolRegistry::new());
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["symbols"]["live"], 0);
    }
}
