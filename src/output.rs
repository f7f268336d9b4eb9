use async_trait::async_trait;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

/// Receives one line at a time from a task's output. Blank lines are passed
/// through as empty strings; a final line with no trailing newline is still
/// delivered once the child's pipe closes.
#[async_trait]
pub trait LineSink: Send + Sync {
    async fn emit(&self, line: &str, kind: StreamKind);
}

/// No prefixing: writes straight to the real stdout/stderr.
pub struct PlainSink;

#[async_trait]
impl LineSink for PlainSink {
    async fn emit(&self, line: &str, kind: StreamKind) {
        match kind {
            StreamKind::Stdout => println!("{line}"),
            StreamKind::Stderr => eprintln!("{line}"),
        }
    }
}

/// Prepends `[name]` right-padded to `width`, plus one space, to every line.
/// Color is cycled deterministically by name hash; cosmetic only.
pub struct LabelSink {
    label: String,
    width: usize,
    color: Option<u8>,
}

impl LabelSink {
    pub fn new(label: impl Into<String>, width: usize, colorize: bool) -> Self {
        let label = label.into();
        let color = colorize.then(|| color_for(&label));
        Self { label, width, color }
    }
}

#[async_trait]
impl LineSink for LabelSink {
    async fn emit(&self, line: &str, kind: StreamKind) {
        let padded = format!("{:<width$}", self.label, width = self.width);
        let prefix = match self.color {
            Some(code) => format!("\u{1b}[38;5;{code}m[{padded}]\u{1b}[0m "),
            None => format!("[{padded}] "),
        };
        match kind {
            StreamKind::Stdout => println!("{prefix}{line}"),
            StreamKind::Stderr => eprintln!("{prefix}{line}"),
        }
    }
}

fn color_for(name: &str) -> u8 {
    const PALETTE: [u8; 6] = [32, 33, 34, 35, 36, 37];
    let sum: usize = name.bytes().map(|b| b as usize).sum();
    PALETTE[sum % PALETTE.len()]
}

/// Buffers every line a task writes (across all its retry attempts, in
/// attempt order) and flushes them verbatim through `inner` the moment the
/// task completes — the aggregate-output mode required by parallel groups.
pub struct AggregatingSink {
    inner: Arc<dyn LineSink>,
    buffer: Mutex<Vec<(String, StreamKind)>>,
}

impl AggregatingSink {
    pub fn new(inner: Arc<dyn LineSink>) -> Self {
        Self {
            inner,
            buffer: Mutex::new(Vec::new()),
        }
    }

    pub async fn flush(&self) {
        let mut buf = self.buffer.lock().await;
        for (line, kind) in buf.drain(..) {
            self.inner.emit(&line, kind).await;
        }
    }
}

#[async_trait]
impl LineSink for AggregatingSink {
    async fn emit(&self, line: &str, kind: StreamKind) {
        self.buffer.lock().await.push((line.to_string(), kind));
    }
}

/// Reads `reader` line by line and forwards each line to `sink`. Runs until
/// the stream closes; a trailing partial line with no newline is still
/// emitted.
pub async fn pump_lines<R: AsyncRead + Unpin>(
    reader: R,
    kind: StreamKind,
    sink: Arc<dyn LineSink>,
) {
    let mut reader = BufReader::new(reader);
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => break,
            Ok(_) => {
                let trimmed = line.strip_suffix('\n').unwrap_or(&line);
                let trimmed = trimmed.strip_suffix('\r').unwrap_or(trimmed);
                sink.emit(trimmed, kind).await;
            }
            Err(_) => break,
        }
    }
}
