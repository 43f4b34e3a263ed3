//! Debuggee output forwarding

use tokio::io::{AsyncBufReadExt, BufReader};

use crate::backend::OutputStream;
use crate::dap::{Event, Outbox};

/// Forward `stream` to the client as `output` events, one per line
///
/// Each event carries the line followed by `\n`. Runs until the stream ends
/// or fails.
pub async fn pump_lines(stream: OutputStream, category: &'static str, outbox: Outbox, max_line_bytes: usize) {
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end_matches(['\n', '\r']);
                let mut output = truncate_line(line, max_line_bytes).to_string();
                output.push('\n');
                outbox.send_event(Event::output(category, output));
            }
            Err(e) => {
                tracing::warn!(category, error = %e, "Debuggee output stream failed");
                break;
            }
        }
    }

    tracing::debug!(category, "Debuggee output stream closed");
}

/// Cut `line` to at most `max_bytes` without splitting a character
pub fn truncate_line(line: &str, max_bytes: usize) -> &str {
    if line.len() <= max_bytes {
        return line;
    }
    let mut end = max_bytes;
    while !line.is_char_boundary(end) {
        end -= 1;
    }
    &line[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dap::OutgoingMessage;
    use tokio::io::AsyncWriteExt;

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate_line("hello", 10), "hello");
        assert_eq!(truncate_line("hello", 3), "hel");
        // 'é' is two bytes; cutting at 2 would split it
        assert_eq!(truncate_line("aé", 2), "a");
    }

    #[tokio::test]
    async fn test_lines_become_output_events_in_order() {
        let (outbox, mut rx) = Outbox::channel();
        let (mut writer, reader) = tokio::io::duplex(64);

        let pump = tokio::spawn(pump_lines(Box::new(reader), "stdout", outbox, 1024));
        writer.write_all(b"first\r\nsecond\nunterminated").await.unwrap();
        drop(writer);
        pump.await.unwrap();

        let mut outputs = Vec::new();
        while let Ok(OutgoingMessage::Event(Event::Output(body))) = rx.try_recv() {
            assert_eq!(body.category.as_deref(), Some("stdout"));
            outputs.push(body.output);
        }
        assert_eq!(outputs, vec!["first\n", "second\n", "unterminated\n"]);
    }
}
