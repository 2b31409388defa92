//! Text-protocol client for storage shards
//!
//! Each endpoint owns exactly one connection. The connection is dialed
//! lazily, commands are serialized behind an async mutex, and any I/O or
//! protocol error drops the connection so the next command re-dials.
//! Every exchange is bounded by a deadline.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufStream};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use crate::common::{Error, Result};

/// One parsed reply from a storage shard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Simple(String),
    Error(String),
    Integer(i64),
    Bulk(String),
    Null,
    Array(Vec<Reply>),
}

impl Reply {
    fn type_name(&self) -> &'static str {
        match self {
            Reply::Simple(_) => "simple string",
            Reply::Error(_) => "error",
            Reply::Integer(_) => "integer",
            Reply::Bulk(_) => "bulk string",
            Reply::Null => "null",
            Reply::Array(_) => "array",
        }
    }
}

/// Client for one storage shard endpoint.
pub struct ShardClient {
    addr: String,
    command_timeout: Duration,
    conn: Mutex<Option<BufStream<TcpStream>>>,
}

impl ShardClient {
    pub fn new(addr: String, command_timeout: Duration) -> Self {
        Self {
            addr,
            command_timeout,
            conn: Mutex::new(None),
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Liveness probe with an explicit deadline.
    pub async fn ping(&self, deadline: Duration) -> Result<()> {
        match self.request(&["PING"], deadline).await? {
            Reply::Simple(s) if s == "PONG" => Ok(()),
            other => Err(unexpected("PING", &other)),
        }
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        match self.request(&["GET", key], self.command_timeout).await? {
            Reply::Bulk(v) => Ok(Some(v)),
            Reply::Null => Ok(None),
            other => Err(unexpected("GET", &other)),
        }
    }

    pub async fn set(&self, key: &str, value: &str) -> Result<()> {
        match self
            .request(&["SET", key, value], self.command_timeout)
            .await?
        {
            Reply::Simple(s) if s == "OK" => Ok(()),
            other => Err(unexpected("SET", &other)),
        }
    }

    pub async fn set_ex(&self, key: &str, ttl_secs: u64, value: &str) -> Result<()> {
        let ttl = ttl_secs.to_string();
        match self
            .request(&["SETEX", key, &ttl, value], self.command_timeout)
            .await?
        {
            Reply::Simple(s) if s == "OK" => Ok(()),
            other => Err(unexpected("SETEX", &other)),
        }
    }

    pub async fn del(&self, key: &str) -> Result<i64> {
        match self.request(&["DEL", key], self.command_timeout).await? {
            Reply::Integer(n) => Ok(n),
            other => Err(unexpected("DEL", &other)),
        }
    }

    /// Blocks server-side until `numreplicas` acks or `timeout_ms` elapses.
    /// Returns the number of replicas that acknowledged.
    pub async fn wait(&self, numreplicas: usize, timeout_ms: u64) -> Result<i64> {
        let n = numreplicas.to_string();
        let t = timeout_ms.to_string();
        // The server may hold the command for the full window; give the
        // client deadline room on top of it.
        let deadline = Duration::from_millis(timeout_ms) + self.command_timeout;
        match self.request(&["WAIT", &n, &t], deadline).await? {
            Reply::Integer(n) => Ok(n),
            other => Err(unexpected("WAIT", &other)),
        }
    }

    pub async fn config_set(&self, param: &str, value: &str) -> Result<()> {
        match self
            .request(&["CONFIG", "SET", param, value], self.command_timeout)
            .await?
        {
            Reply::Simple(s) if s == "OK" => Ok(()),
            other => Err(unexpected("CONFIG SET", &other)),
        }
    }

    /// Make this endpoint replicate from the given master.
    pub async fn replicaof(&self, host: &str, port: u16) -> Result<()> {
        let port = port.to_string();
        match self
            .request(&["REPLICAOF", host, &port], self.command_timeout)
            .await?
        {
            Reply::Simple(s) if s == "OK" => Ok(()),
            other => Err(unexpected("REPLICAOF", &other)),
        }
    }

    /// Promote this endpoint to a standalone master.
    pub async fn replicaof_no_one(&self) -> Result<()> {
        match self
            .request(&["REPLICAOF", "NO", "ONE"], self.command_timeout)
            .await?
        {
            Reply::Simple(s) if s == "OK" => Ok(()),
            other => Err(unexpected("REPLICAOF NO ONE", &other)),
        }
    }

    /// Fetch one textual `INFO` section.
    pub async fn info(&self, section: &str) -> Result<String> {
        match self.request(&["INFO", section], self.command_timeout).await? {
            Reply::Bulk(text) => Ok(text),
            Reply::Simple(text) => Ok(text),
            other => Err(unexpected("INFO", &other)),
        }
    }

    /// Drop the connection. The next command re-dials.
    pub async fn close(&self) {
        let mut conn = self.conn.lock().await;
        *conn = None;
    }

    async fn request(&self, args: &[&str], deadline: Duration) -> Result<Reply> {
        let mut conn = self.conn.lock().await;

        let result = tokio::time::timeout(deadline, exchange(&mut conn, &self.addr, args)).await;

        match result {
            Ok(Ok(Reply::Error(msg))) => Err(Error::ErrorReply(msg)),
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(e)) => {
                *conn = None;
                Err(e)
            }
            Err(_) => {
                // A half-finished exchange leaves the stream out of sync
                *conn = None;
                Err(Error::Timeout(format!(
                    "{} to {} exceeded {:?}",
                    args.first().copied().unwrap_or(""),
                    self.addr,
                    deadline
                )))
            }
        }
    }
}

async fn exchange(
    conn: &mut Option<BufStream<TcpStream>>,
    addr: &str,
    args: &[&str],
) -> Result<Reply> {
    if conn.is_none() {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| Error::ConnectionFailed(format!("{}: {}", addr, e)))?;
        *conn = Some(BufStream::new(stream));
    }

    let stream = conn.as_mut().unwrap();

    write_command(stream, args)
        .await
        .map_err(|e| Error::ConnectionFailed(format!("{}: {}", addr, e)))?;

    read_reply(stream).await
}

/// Encode one command as a protocol array and flush it.
async fn write_command<S>(stream: &mut S, args: &[&str]) -> std::io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    let mut buf = Vec::with_capacity(64);
    buf.extend_from_slice(format!("*{}\r\n", args.len()).as_bytes());
    for arg in args {
        buf.extend_from_slice(format!("${}\r\n", arg.len()).as_bytes());
        buf.extend_from_slice(arg.as_bytes());
        buf.extend_from_slice(b"\r\n");
    }
    stream.write_all(&buf).await?;
    stream.flush().await
}

/// Parse one reply. Boxed for the recursive array case.
fn read_reply<'a, S>(stream: &'a mut S) -> Pin<Box<dyn Future<Output = Result<Reply>> + Send + 'a>>
where
    S: AsyncBufRead + Unpin + Send,
{
    Box::pin(async move {
        let mut line = String::new();
        let n = stream
            .read_line(&mut line)
            .await
            .map_err(|e| Error::ConnectionFailed(e.to_string()))?;
        if n == 0 {
            return Err(Error::ConnectionFailed("connection closed by shard".into()));
        }

        let line = line
            .strip_suffix("\r\n")
            .or_else(|| line.strip_suffix('\n'))
            .ok_or_else(|| Error::Protocol("unterminated reply line".into()))?;

        let (marker, rest) = line.split_at(1);
        match marker {
            "+" => Ok(Reply::Simple(rest.to_string())),
            "-" => Ok(Reply::Error(rest.to_string())),
            ":" => rest
                .parse()
                .map(Reply::Integer)
                .map_err(|_| Error::Protocol(format!("bad integer reply: {}", rest))),
            "$" => {
                let len: i64 = rest
                    .parse()
                    .map_err(|_| Error::Protocol(format!("bad bulk length: {}", rest)))?;
                if len < 0 {
                    return Ok(Reply::Null);
                }
                let mut payload = vec![0u8; len as usize + 2];
                stream
                    .read_exact(&mut payload)
                    .await
                    .map_err(|e| Error::ConnectionFailed(e.to_string()))?;
                payload.truncate(len as usize);
                String::from_utf8(payload)
                    .map(Reply::Bulk)
                    .map_err(|_| Error::Protocol("non-UTF-8 bulk payload".into()))
            }
            "*" => {
                let len: i64 = rest
                    .parse()
                    .map_err(|_| Error::Protocol(format!("bad array length: {}", rest)))?;
                if len < 0 {
                    return Ok(Reply::Null);
                }
                let mut items = Vec::with_capacity(len as usize);
                for _ in 0..len {
                    items.push(read_reply(stream).await?);
                }
                Ok(Reply::Array(items))
            }
            other => Err(Error::Protocol(format!("unknown reply marker: {}", other))),
        }
    })
}

fn unexpected(command: &str, reply: &Reply) -> Error {
    Error::Protocol(format!(
        "unexpected {} reply to {}",
        reply.type_name(),
        command
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tokio::io::BufReader;

    async fn parse(raw: &[u8]) -> Result<Reply> {
        let mut stream = BufReader::new(Cursor::new(raw.to_vec()));
        read_reply(&mut stream).await
    }

    #[tokio::test]
    async fn test_parse_simple_string() {
        assert_eq!(parse(b"+OK\r\n").await.unwrap(), Reply::Simple("OK".into()));
        assert_eq!(
            parse(b"+PONG\r\n").await.unwrap(),
            Reply::Simple("PONG".into())
        );
    }

    #[tokio::test]
    async fn test_parse_error() {
        assert_eq!(
            parse(b"-ERR unknown command\r\n").await.unwrap(),
            Reply::Error("ERR unknown command".into())
        );
    }

    #[tokio::test]
    async fn test_parse_integer() {
        assert_eq!(parse(b":42\r\n").await.unwrap(), Reply::Integer(42));
        assert_eq!(parse(b":-1\r\n").await.unwrap(), Reply::Integer(-1));
    }

    #[tokio::test]
    async fn test_parse_bulk_and_null() {
        assert_eq!(
            parse(b"$5\r\nhello\r\n").await.unwrap(),
            Reply::Bulk("hello".into())
        );
        assert_eq!(parse(b"$0\r\n\r\n").await.unwrap(), Reply::Bulk("".into()));
        assert_eq!(parse(b"$-1\r\n").await.unwrap(), Reply::Null);
    }

    #[tokio::test]
    async fn test_parse_bulk_with_embedded_newline() {
        assert_eq!(
            parse(b"$11\r\nline1\nline2\r\n").await.unwrap(),
            Reply::Bulk("line1\nline2".into())
        );
    }

    #[tokio::test]
    async fn test_parse_array() {
        assert_eq!(
            parse(b"*2\r\n$3\r\nfoo\r\n:7\r\n").await.unwrap(),
            Reply::Array(vec![Reply::Bulk("foo".into()), Reply::Integer(7)])
        );
    }

    #[tokio::test]
    async fn test_parse_truncated_input() {
        assert!(parse(b"").await.is_err());
        assert!(parse(b"$5\r\nhe").await.is_err());
    }

    #[tokio::test]
    async fn test_write_command_framing() {
        let mut buf = Vec::new();
        write_command(&mut buf, &["SET", "k", "v1"]).await.unwrap();
        assert_eq!(buf, b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$2\r\nv1\r\n");
    }
}
