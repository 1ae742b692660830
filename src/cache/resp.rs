//! Minimal RESP2 codec for the remote cache tier
//!
//! Commands are sent as arrays of bulk strings. Only the reply types produced
//! by `GET`, `SET`, `DEL`, `PING`, `AUTH`, `SELECT` and `QUIT` are decoded.

use crate::error::{MediaError, Result};
use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

/// Longest bulk reply accepted from the server (512MB, the protocol maximum)
const MAX_BULK_LEN: i64 = 512 * 1024 * 1024;

/// A decoded server reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Simple(String),
    Error(String),
    Integer(i64),
    /// `None` is the nil bulk string
    Bulk(Option<Bytes>),
}

impl Reply {
    /// Turn a server-side error reply into a cache error
    pub fn into_result(self) -> Result<Reply> {
        match self {
            Reply::Error(msg) => Err(MediaError::Cache(format!("server replied: {}", msg))),
            other => Ok(other),
        }
    }
}

/// Encode a command as a RESP array of bulk strings
pub fn encode_command(args: &[&[u8]]) -> Bytes {
    let mut buf = BytesMut::with_capacity(16 + args.iter().map(|a| a.len() + 16).sum::<usize>());
    buf.put_slice(format!("*{}\r\n", args.len()).as_bytes());
    for arg in args {
        buf.put_slice(format!("${}\r\n", arg.len()).as_bytes());
        buf.put_slice(arg);
        buf.put_slice(b"\r\n");
    }
    buf.freeze()
}

/// Read one reply from the stream
pub async fn read_reply<R>(reader: &mut R) -> Result<Reply>
where
    R: AsyncBufRead + Unpin,
{
    let line = read_line(reader).await?;
    let (kind, rest) = line
        .split_first()
        .ok_or_else(|| protocol_error("empty reply line"))?;
    let rest = std::str::from_utf8(rest).map_err(|_| protocol_error("reply line is not UTF-8"))?;

    match kind {
        b'+' => Ok(Reply::Simple(rest.to_string())),
        b'-' => Ok(Reply::Error(rest.to_string())),
        b':' => rest
            .parse::<i64>()
            .map(Reply::Integer)
            .map_err(|_| protocol_error(&format!("invalid integer reply: {}", rest))),
        b'$' => {
            let len = rest
                .parse::<i64>()
                .map_err(|_| protocol_error(&format!("invalid bulk length: {}", rest)))?;
            if len < 0 {
                return Ok(Reply::Bulk(None));
            }
            if len > MAX_BULK_LEN {
                return Err(protocol_error(&format!("bulk length {} too large", len)));
            }

            let mut payload = vec![0u8; len as usize + 2];
            reader.read_exact(&mut payload).await.map_err(io_error)?;
            if !payload.ends_with(b"\r\n") {
                return Err(protocol_error("bulk string not terminated by CRLF"));
            }
            payload.truncate(len as usize);
            Ok(Reply::Bulk(Some(Bytes::from(payload))))
        }
        other => Err(protocol_error(&format!(
            "unsupported reply type '{}'",
            *other as char
        ))),
    }
}

/// Read a CRLF-terminated line, without the terminator
async fn read_line<R>(reader: &mut R) -> Result<Vec<u8>>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    let n = reader.read_until(b'\n', &mut line).await.map_err(io_error)?;
    if n == 0 {
        return Err(MediaError::Cache("connection closed by server".to_string()));
    }
    if !line.ends_with(b"\r\n") {
        return Err(protocol_error("reply line not terminated by CRLF"));
    }
    line.truncate(line.len() - 2);
    Ok(line)
}

fn protocol_error(detail: &str) -> MediaError {
    MediaError::Cache(format!("protocol error: {}", detail))
}

pub(crate) fn io_error(err: std::io::Error) -> MediaError {
    MediaError::Cache(format!("connection error: {}", err))
}
