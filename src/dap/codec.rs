//! Content-Length framing for DAP messages
//!
//! Each message is a header block terminated by an empty line, followed by
//! exactly `Content-Length` bytes of UTF-8 JSON:
//! ```text
//! Content-Length: 27\r\n
//! \r\n
//! {"seq":1,"type":"request"}
//! ```

use std::io;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::common::{Error, Result};

const CONTENT_LENGTH: &str = "Content-Length";

/// Frames above this size are treated as a corrupt stream
const MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

/// Read one frame and return its body
///
/// End of stream, even halfway through a frame, is reported as
/// [`Error::ClientDisconnected`].
pub async fn read_message<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<String> {
    let length = read_headers(reader).await?;
    if length > MAX_FRAME_BYTES {
        return Err(Error::DapProtocol(format!(
            "frame of {length} bytes exceeds the {MAX_FRAME_BYTES} byte limit"
        )));
    }

    let mut body = vec![0u8; length];
    reader.read_exact(&mut body).await.map_err(disconnect_on_eof)?;
    String::from_utf8(body).map_err(|e| Error::DapProtocol(format!("frame is not UTF-8: {e}")))
}

/// Consume the header block, returning the announced body length
async fn read_headers<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<usize> {
    let mut length = None;
    let mut line = String::new();

    loop {
        line.clear();
        if reader.read_line(&mut line).await.map_err(disconnect_on_eof)? == 0 {
            return Err(Error::ClientDisconnected);
        }

        let header = line.trim_end_matches(['\r', '\n']);
        if header.is_empty() {
            // Stray blank lines before the first header are skipped
            match length {
                Some(length) => return Ok(length),
                None => continue,
            }
        }

        if let Some(value) = parse_content_length(header)? {
            length = Some(value);
        }
    }
}

/// `Some(n)` for a Content-Length header, `None` for any other header
fn parse_content_length(header: &str) -> Result<Option<usize>> {
    let Some((name, value)) = header.split_once(':') else {
        return Err(Error::DapProtocol(format!("malformed header line '{header}'")));
    };
    if !name.trim().eq_ignore_ascii_case(CONTENT_LENGTH) {
        return Ok(None);
    }

    let value = value.trim();
    value
        .parse()
        .map(Some)
        .map_err(|_| Error::DapProtocol(format!("invalid {CONTENT_LENGTH} '{value}'")))
}

/// Write `json` as one frame and flush
pub async fn write_message<W: AsyncWrite + Unpin>(writer: &mut W, json: &str) -> Result<()> {
    let mut frame = format!("{CONTENT_LENGTH}: {}\r\n\r\n", json.len()).into_bytes();
    frame.extend_from_slice(json.as_bytes());

    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

fn disconnect_on_eof(e: io::Error) -> Error {
    match e.kind() {
        io::ErrorKind::UnexpectedEof => Error::ClientDisconnected,
        _ => Error::Io(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tokio::io::BufReader;

    fn reader(data: &[u8]) -> BufReader<Cursor<Vec<u8>>> {
        BufReader::new(Cursor::new(data.to_vec()))
    }

    #[tokio::test]
    async fn test_reads_consecutive_frames() {
        let mut r = reader(b"Content-Length: 2\r\n\r\n{}Content-Length: 8\r\n\r\n{\"a\":1}\n");

        assert_eq!(read_message(&mut r).await.unwrap(), "{}");
        assert_eq!(read_message(&mut r).await.unwrap(), "{\"a\":1}\n");
        assert!(matches!(read_message(&mut r).await, Err(Error::ClientDisconnected)));
    }

    #[tokio::test]
    async fn test_other_headers_are_ignored() {
        let mut r = reader(
            b"Content-Type: application/vscode-jsonrpc; charset=utf-8\r\ncontent-length: 2\r\n\r\n[]",
        );
        assert_eq!(read_message(&mut r).await.unwrap(), "[]");
    }

    #[tokio::test]
    async fn test_truncated_body_is_a_disconnect() {
        let mut r = reader(b"Content-Length: 40\r\n\r\n{\"seq\":1");
        assert!(matches!(read_message(&mut r).await, Err(Error::ClientDisconnected)));
    }

    #[tokio::test]
    async fn test_bad_length_is_a_protocol_error() {
        let mut r = reader(b"Content-Length: lots\r\n\r\n{}");
        assert!(matches!(read_message(&mut r).await, Err(Error::DapProtocol(_))));
    }

    #[tokio::test]
    async fn test_length_counts_bytes_not_chars() {
        let mut out = Vec::new();
        write_message(&mut out, "\"é\"").await.unwrap();
        assert_eq!(out, b"Content-Length: 4\r\n\r\n\"\xc3\xa9\"".to_vec());

        let mut r = reader(&out);
        assert_eq!(read_message(&mut r).await.unwrap(), "\"é\"");
    }
}
