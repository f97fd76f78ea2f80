//! 审计日志层
//!
//! 按事件的 `log_type` 字段分流到独立的 JSON 行文件：
//! - `low_freq` → `lifecycle.log`：启动、品种状态变化、关闭等检查点
//! - `signal` → `signals.log`：信号判定与发出，可单独用于对账
//!
//! 其他事件不进入审计日志。

use serde::Serialize;
use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::{layer::Context, registry::LookupSpan, Layer};

/// 审计日志分档
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditChannel {
    Lifecycle,
    Signal,
}

impl AuditChannel {
    fn from_log_type(log_type: &str) -> Option<Self> {
        match log_type {
            "low_freq" => Some(Self::Lifecycle),
            "signal" => Some(Self::Signal),
            _ => None,
        }
    }

    pub fn file_name(self) -> &'static str {
        match self {
            Self::Lifecycle => "lifecycle.log",
            Self::Signal => "signals.log",
        }
    }
}

/// 一行审计记录；`symbol` 单独成列，其余字段放进 `fields`
#[derive(Debug, Serialize)]
struct AuditRecord<'a> {
    timestamp: String,
    level: &'static str,
    target: &'a str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    symbol: Option<String>,
    #[serde(skip_serializing_if = "serde_json::Map::is_empty")]
    fields: serde_json::Map<String, serde_json::Value>,
}

#[derive(Default)]
struct AuditFields {
    log_type: Option<String>,
    message: Option<String>,
    symbol: Option<String>,
    fields: serde_json::Map<String, serde_json::Value>,
}

impl AuditFields {
    fn insert(&mut self, field: &Field, value: serde_json::Value) {
        let as_text = |value: serde_json::Value| value.as_str().map(String::from).unwrap_or_else(|| value.to_string());
        match field.name() {
            "log_type" => self.log_type = Some(as_text(value)),
            "message" => self.message = Some(as_text(value)),
            "symbol" => self.symbol = Some(as_text(value)),
            name => {
                self.fields.insert(name.to_string(), value);
            }
        }
    }
}

impl Visit for AuditFields {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.insert(field, serde_json::json!(value));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.insert(field, serde_json::json!(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.insert(field, serde_json::json!(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.insert(field, serde_json::json!(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.insert(field, serde_json::json!(value));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.insert(field, serde_json::json!(format!("{:?}", value)));
    }
}

type SharedWriter = Arc<Mutex<Box<dyn Write + Send>>>;

/// 把 `low_freq` 和 `signal` 事件写入各自文件的 tracing 层
#[derive(Clone, Default)]
pub struct AuditLogLayer {
    lifecycle: Option<SharedWriter>,
    signal: Option<SharedWriter>,
}

impl AuditLogLayer {
    /// 在日志目录下以追加方式打开各档文件
    pub fn open(log_dir: impl AsRef<Path>) -> std::io::Result<Self> {
        let dir = log_dir.as_ref();
        std::fs::create_dir_all(dir)?;

        let mut layer = Self::default();
        for channel in [AuditChannel::Lifecycle, AuditChannel::Signal] {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(dir.join(channel.file_name()))?;
            layer = layer.with_writer(channel, BufWriter::new(file));
        }
        Ok(layer)
    }

    pub fn with_writer(mut self, channel: AuditChannel, writer: impl Write + Send + 'static) -> Self {
        let shared: SharedWriter = Arc::new(Mutex::new(Box::new(writer)));
        match channel {
            AuditChannel::Lifecycle => self.lifecycle = Some(shared),
            AuditChannel::Signal => self.signal = Some(shared),
        }
        self
    }

    fn writer(&self, channel: AuditChannel) -> Option<&SharedWriter> {
        match channel {
            AuditChannel::Lifecycle => self.lifecycle.as_ref(),
            AuditChannel::Signal => self.signal.as_ref(),
        }
    }
}

impl<S> Layer<S> for AuditLogLayer
where
    S: Subscriber + for<'lookup> LookupSpan<'lookup>,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut fields = AuditFields::default();
        event.record(&mut fields);

        let Some(channel) = fields.log_type.as_deref().and_then(AuditChannel::from_log_type) else {
            return;
        };
        let Some(writer) = self.writer(channel) else {
            return;
        };

        let metadata = event.metadata();
        let record = AuditRecord {
            timestamp: chrono::Utc::now().to_rfc3339(),
            level: metadata.level().as_str(),
            target: metadata.target(),
            message: fields.message.unwrap_or_else(|| metadata.name().to_string()),
            symbol: fields.symbol,
            fields: fields.fields,
        };

        let Ok(mut writer) = writer.lock() else {
            return;
        };
        let written = serde_json::to_writer(&mut *writer, &record)
            .map_err(std::io::Error::from)
            .and_then(|_| writeln!(writer))
            .and_then(|_| writer.flush());
        if let Err(e) = written {
            eprintln!("[审计日志] 写入 {} 失败: {}", channel.file_name(), e);
        }
    }
}
