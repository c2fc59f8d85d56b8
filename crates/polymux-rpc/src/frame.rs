//! `Content-Length`-framed JSON-RPC message I/O (spec §4.1).
//!
//! LSP frames a JSON-RPC 2.0 body with an HTTP-style header block:
//! `Content-Length: N\r\n\r\n` followed by exactly N bytes of UTF-8 JSON.
//! There is no other required header, though servers may send extras
//! (`Content-Type`) which we read and discard.

use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use polymux_types::GatewayError;

/// Reads one framed message from `reader`. Returns `Ok(None)` on clean EOF
/// (the peer closed the stream without writing a partial frame), `Err` on
/// any malformed frame — a malformed frame is fatal to the reader per spec
/// §4.1 ("reader crashes ... transition the wrapper to failed").
pub async fn read_message<R>(reader: &mut R) -> Result<Option<Value>, GatewayError>
where
    R: AsyncBufRead + Unpin,
{
    let mut content_length: Option<usize> = None;
    let mut line = String::new();

    loop {
        line.clear();
        let n = reader.read_line(&mut line).await?;
        if n == 0 {
            if content_length.is_some() {
                return Err(GatewayError::ProtocolError(
                    "stream closed mid-header".to_string(),
                ));
            }
            return Ok(None);
        }

        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed.is_empty() {
            // Blank line: end of header block.
            break;
        }

        if let Some((name, value)) = trimmed.split_once(':') {
            if name.eq_ignore_ascii_case("Content-Length") {
                content_length = Some(value.trim().parse().map_err(|_| {
                    GatewayError::ProtocolError(format!("invalid Content-Length: {}", value))
                })?);
            }
            // Other headers (Content-Type, ...) are read and discarded.
        }
    }

    let len = content_length.ok_or_else(|| {
        GatewayError::ProtocolError("frame missing Content-Length header".to_string())
    })?;

    let mut body = vec![0u8; len];
    tokio::io::AsyncReadExt::read_exact(reader, &mut body).await?;

    let value: Value = serde_json::from_slice(&body)
        .map_err(|e| GatewayError::ProtocolError(format!("malformed JSON frame: {e}")))?;
    Ok(Some(value))
}

/// Writes one framed message to `writer`. The caller is responsible for
/// serializing writes across concurrent callers (spec §4.1: "a single
/// writer is active at a time"); `Transport` enforces this with a mutex.
pub async fn write_message<W>(writer: &mut W, value: &Value) -> Result<(), GatewayError>
where
    W: AsyncWrite + Unpin,
{
    let body = serde_json::to_vec(value)?;
    let header = format!("Content-Length: {}\r\n\r\n", body.len());
    writer.write_all(header.as_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    #[tokio::test]
    async fn round_trips_a_message() {
        let (client, mut server) = tokio::io::duplex(4096);
        let mut reader = BufReader::new(client);

        let msg = serde_json::json!({"jsonrpc": "2.0", "id": 1, "method": "foo"});
        write_message(&mut server, &msg).await.unwrap();

        let read = read_message(&mut reader).await.unwrap().unwrap();
        assert_eq!(read, msg);
    }

    #[tokio::test]
    async fn clean_eof_returns_none() {
        let (client, server) = tokio::io::duplex(64);
        drop(server);
        let mut reader = BufReader::new(client);
        let read = read_message(&mut reader).await.unwrap();
        assert!(read.is_none());
    }

    #[tokio::test]
    async fn missing_content_length_is_protocol_error() {
        let (client, mut server) = tokio::io::duplex(64);
        server.write_all(b"\r\n").await.unwrap();
        server.shutdown().await.unwrap();
        let mut reader = BufReader::new(client);
        let result = read_message(&mut reader).await;
        assert!(result.is_err());
    }
}
