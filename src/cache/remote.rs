//! Remote cache tier
//!
//! [`RemoteTier`] is the seam between the tiered cache and whatever remote
//! service holds the shared copy. The production implementation speaks RESP
//! to a Redis-compatible server over a single TCP connection.

use crate::cache::resp::{encode_command, io_error, read_reply, Reply};
use crate::error::{MediaError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWriteExt, BufStream};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, warn};

const DEFAULT_PORT: u16 = 6379;

/// An established connection to a remote cache
#[async_trait]
pub trait RemoteTier: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Bytes>>;

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Liveness probe
    async fn ping(&self) -> Result<()>;

    /// Graceful shutdown; further calls fail
    async fn close(&self) -> Result<()>;

    /// False once the connection can no longer carry commands
    fn is_open(&self) -> bool {
        true
    }
}

/// Opens connections to a remote cache
#[async_trait]
pub trait RemoteConnector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn RemoteTier>>;

    /// Printable endpoint for logs, without credentials
    fn endpoint(&self) -> String;
}

/// Parsed `redis://[:password@]host[:port][/db]` URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisEndpoint {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    pub db: u32,
}

impl RedisEndpoint {
    pub fn parse(url: &str) -> Result<Self> {
        let invalid = |detail: &str| MediaError::Config(format!("Invalid REDIS_URL '{}': {}", url, detail));

        let rest = url
            .trim()
            .strip_prefix("redis://")
            .ok_or_else(|| invalid("scheme must be redis://"))?;

        let (authority, path) = match rest.split_once('/') {
            Some((authority, path)) => (authority, path),
            None => (rest, ""),
        };

        let (userinfo, hostport) = match authority.rsplit_once('@') {
            Some((userinfo, hostport)) => (Some(userinfo), hostport),
            None => (None, authority),
        };

        // Only the password half of `user:password` is used
        let password = userinfo
            .map(|info| match info.split_once(':') {
                Some((_, password)) => password,
                None => info,
            })
            .filter(|p| !p.is_empty())
            .map(str::to_string);

        let (host, port) = if let Some(bracketed) = hostport.strip_prefix('[') {
            let (host, after) = bracketed
                .split_once(']')
                .ok_or_else(|| invalid("unterminated IPv6 host"))?;
            let port = match after.strip_prefix(':') {
                Some(port) => Some(port),
                None if after.is_empty() => None,
                None => return Err(invalid("unexpected characters after host")),
            };
            (host, port)
        } else {
            match hostport.rsplit_once(':') {
                Some((host, port)) => (host, Some(port)),
                None => (hostport, None),
            }
        };

        if host.is_empty() {
            return Err(invalid("missing host"));
        }

        let port = match port {
            Some(port) => port.parse::<u16>().map_err(|_| invalid("invalid port"))?,
            None => DEFAULT_PORT,
        };

        let db = match path.trim_matches('/') {
            "" => 0,
            db => db.parse::<u32>().map_err(|_| invalid("invalid database index"))?,
        };

        Ok(RedisEndpoint {
            host: host.to_string(),
            port,
            password,
            db,
        })
    }
}

/// Connects to a Redis-compatible server
pub struct RespConnector {
    endpoint: RedisEndpoint,
    connect_timeout: Duration,
    command_timeout: Duration,
}

impl RespConnector {
    pub fn new(endpoint: RedisEndpoint, connect_timeout: Duration, command_timeout: Duration) -> Self {
        Self {
            endpoint,
            connect_timeout,
            command_timeout,
        }
    }

    pub fn from_url(url: &str, connect_timeout: Duration, command_timeout: Duration) -> Result<Self> {
        Ok(Self::new(RedisEndpoint::parse(url)?, connect_timeout, command_timeout))
    }
}

#[async_trait]
impl RemoteConnector for RespConnector {
    async fn connect(&self) -> Result<Arc<dyn RemoteTier>> {
        let addr = (self.endpoint.host.as_str(), self.endpoint.port);
        let stream = timeout(self.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| {
                MediaError::Cache(format!(
                    "connect to {} timed out after {:?}",
                    self.endpoint(),
                    self.connect_timeout
                ))
            })?
            .map_err(io_error)?;
        stream.set_nodelay(true).map_err(io_error)?;

        let connection = RespConnection::new(stream, self.command_timeout);

        if let Some(password) = &self.endpoint.password {
            connection.execute(&[b"AUTH", password.as_bytes()]).await?;
        }
        if self.endpoint.db != 0 {
            let db = self.endpoint.db.to_string();
            connection.execute(&[b"SELECT", db.as_bytes()]).await?;
        }
        connection.ping().await?;

        info!("Connected to remote cache at {}", self.endpoint());
        Ok(Arc::new(connection))
    }

    fn endpoint(&self) -> String {
        format!("{}:{}/{}", self.endpoint.host, self.endpoint.port, self.endpoint.db)
    }
}

/// One RESP connection; commands are serialized over it
pub struct RespConnection {
    stream: Mutex<BufStream<TcpStream>>,
    command_timeout: Duration,
    closed: AtomicBool,
}

impl RespConnection {
    pub fn new(stream: TcpStream, command_timeout: Duration) -> Self {
        Self {
            stream: Mutex::new(BufStream::new(stream)),
            command_timeout,
            closed: AtomicBool::new(false),
        }
    }

    /// Send one command and wait for its reply
    ///
    /// A timeout or transport failure leaves the reply stream out of step
    /// with the commands sent, so the connection is closed for good.
    async fn execute(&self, args: &[&[u8]]) -> Result<Reply> {
        if self.closed.load(Ordering::Acquire) {
            return Err(MediaError::Cache("connection closed".to_string()));
        }

        let frame = encode_command(args);
        let mut guard = self.stream.lock().await;
        // A command that failed while we waited for the lock poisoned the stream
        if self.closed.load(Ordering::Acquire) {
            return Err(MediaError::Cache("connection closed".to_string()));
        }
        let stream = &mut *guard;

        let round_trip = async {
            stream.write_all(&frame).await.map_err(io_error)?;
            stream.flush().await.map_err(io_error)?;
            read_reply(stream).await
        };

        let outcome = timeout(self.command_timeout, round_trip).await;
        let reply = match outcome {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => {
                self.poison(stream).await;
                return Err(e);
            }
            Err(_) => {
                self.poison(stream).await;
                return Err(MediaError::Cache(format!(
                    "command timed out after {:?}",
                    self.command_timeout
                )));
            }
        };

        reply.into_result()
    }

    async fn poison(&self, stream: &mut BufStream<TcpStream>) {
        self.closed.store(true, Ordering::Release);
        warn!("Remote cache connection out of sync, closing it");
        if let Err(e) = stream.get_mut().shutdown().await {
            debug!("Remote cache socket shutdown failed: {}", e);
        }
    }
}

#[async_trait]
impl RemoteTier for RespConnection {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        match self.execute(&[b"GET", key.as_bytes()]).await? {
            Reply::Bulk(value) => Ok(value),
            other => Err(MediaError::Cache(format!("unexpected GET reply: {:?}", other))),
        }
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<()> {
        let millis = ttl.as_millis().max(1).to_string();
        match self
            .execute(&[b"SET", key.as_bytes(), &value, b"PX", millis.as_bytes()])
            .await?
        {
            Reply::Simple(_) => Ok(()),
            other => Err(MediaError::Cache(format!("unexpected SET reply: {:?}", other))),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        match self.execute(&[b"DEL", key.as_bytes()]).await? {
            Reply::Integer(_) => Ok(()),
            other => Err(MediaError::Cache(format!("unexpected DEL reply: {:?}", other))),
        }
    }

    async fn ping(&self) -> Result<()> {
        match self.execute(&[b"PING"]).await? {
            Reply::Simple(pong) if pong.eq_ignore_ascii_case("PONG") => Ok(()),
            other => Err(MediaError::Cache(format!("unexpected PING reply: {:?}", other))),
        }
    }

    async fn close(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Ok(());
        }
        let quit = self.execute(&[b"QUIT"]).await;
        self.closed.store(true, Ordering::Release);

        let mut stream = self.stream.lock().await;
        if let Err(e) = stream.get_mut().shutdown().await {
            debug!("Remote cache socket shutdown failed: {}", e);
        }
        quit.map(|_| ())
    }

    fn is_open(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }
}
