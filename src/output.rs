//! JSON-lines writer draining the event queue.

use anyhow::Context;
use tail_core::FlatEvent;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

/// Write every event received on `rx` to `out`, one JSON object per line.
///
/// Returns once the sending side is dropped and the queue is empty, with the
/// number of events written.
pub async fn write_events<W>(mut rx: mpsc::Receiver<FlatEvent>, out: &mut W) -> anyhow::Result<u64>
where
    W: AsyncWrite + Unpin,
{
    let mut written = 0u64;
    while let Some(event) = rx.recv().await {
        let mut line = event.to_json_line()?;
        line.push('\n');
        out.write_all(line.as_bytes())
            .await
            .context("Failed to write event")?;
        // Flush when the queue is momentarily empty so followers see events promptly.
        if rx.is_empty() {
            out.flush().await.context("Failed to flush output")?;
        }
        written += 1;
    }
    out.flush().await.context("Failed to flush output")?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tail_core::{ChannelSink, EventSink};

    #[tokio::test]
    async fn test_writes_one_line_per_event() {
        let (sink, rx) = ChannelSink::bounded(8);
        for i in 0..3i64 {
            let mut event = FlatEvent::new();
            event.insert("n", i);
            event.insert("host", "tailer");
            sink.emit(event).await.unwrap();
        }
        drop(sink);

        let mut out = Vec::new();
        let written = write_events(rx, &mut out).await.unwrap();
        assert_eq!(written, 3);

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        for (i, line) in lines.iter().enumerate() {
            let value: serde_json::Value = serde_json::from_str(line).unwrap();
            assert_eq!(value["n"], serde_json::json!(i));
            assert_eq!(value["host"], "tailer");
        }
        assert!(text.ends_with('\n'));
    }

    #[tokio::test]
    async fn test_empty_queue_writes_nothing() {
        let (sink, rx) = ChannelSink::bounded(1);
        drop(sink);

        let mut out = Vec::new();
        assert_eq!(write_events(rx, &mut out).await.unwrap(), 0);
        assert!(out.is_empty());
    }
}
