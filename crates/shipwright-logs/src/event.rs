//! Stream events.

use serde::Serialize;

/// One event on a log stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LogEvent {
    /// A single log line, flushed the moment it is read.
    Line { source: String, line: String },
    /// The stream failed. Written inline: by the time anything can go
    /// wrong the response headers are long committed.
    Error { message: String },
    /// Explicit end-of-stream marker, distinct from an error.
    End,
}

impl LogEvent {
    /// Wire-level event name.
    pub fn kind(&self) -> &'static str {
        match self {
            LogEvent::Line { .. } => "log",
            LogEvent::Error { .. } => "error",
            LogEvent::End => "end",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_distinct() {
        let line = LogEvent::Line {
            source: "app".to_string(),
            line: "ready".to_string(),
        };
        let error = LogEvent::Error {
            message: "watch failed".to_string(),
        };
        assert_eq!(line.kind(), "log");
        assert_eq!(error.kind(), "error");
        assert_eq!(LogEvent::End.kind(), "end");
    }

    #[tokio::test]
    async fn dropped_receiver_closes_the_sink() {
        // Every stream loop selects on `tx.closed()` and checks send
        // results; this is the signal that cancels in-flight work.
        let (tx, rx) = tokio::sync::mpsc::channel::<LogEvent>(8);
        drop(rx);

        assert!(tx.is_closed());
        assert!(tx.send(LogEvent::End).await.is_err());
        tx.closed().await;
    }

    #[test]
    fn line_serializes_with_source() {
        let event = LogEvent::Line {
            source: "init-deps".to_string(),
            line: "fetching".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "line");
        assert_eq!(json["source"], "init-deps");
        assert_eq!(json["line"], "fetching");
    }
}
