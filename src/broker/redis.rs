//! RESP pub/sub client.
//!
//! # Responsibilities
//! - Maintain a fixed-size pool of publish connections
//! - Open a dedicated connection per subscription
//! - Surface the protocol's subscribe confirmation as the readiness signal
//!
//! Only the slice of RESP2 the bridge needs is implemented: command
//! encoding, the five reply types, and the pub/sub push frames. A broken
//! connection is dropped and re-dialed on the next use of its pool slot.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufStream};
use tokio::net::TcpStream;

use crate::config::BrokerConfig;

use super::{Broker, BrokerError, BrokerMessage, Subscription};

// Protocol lines are tiny; anything longer is not a reply we ever asked for.
const MAX_LINE_BYTES: usize = 64 * 1024;

/// One decoded RESP value.
#[derive(Debug, Clone, PartialEq)]
enum RespValue {
    Simple(String),
    Error(String),
    Integer(i64),
    Bulk(Bytes),
    Null,
    Array(Vec<RespValue>),
}

fn unavailable(err: std::io::Error) -> BrokerError {
    BrokerError::Unavailable(err.to_string())
}

/// Parse a RESP length field. `None` is the protocol's null marker (-1).
fn parse_len(digits: &[u8]) -> Result<Option<usize>, BrokerError> {
    let value = std::str::from_utf8(digits)
        .ok()
        .and_then(|text| text.parse::<i64>().ok())
        .ok_or_else(|| BrokerError::Internal("bad length field".to_string()))?;
    if value < 0 {
        return Ok(None);
    }
    Ok(Some(value as usize))
}

/// A single framed connection to the broker.
#[derive(Debug)]
struct RespConnection {
    stream: BufStream<TcpStream>,
    max_payload: usize,
}

impl RespConnection {
    async fn open(config: &BrokerConfig, max_payload: usize) -> Result<Self, BrokerError> {
        let tcp = TcpStream::connect(&config.endpoint)
            .await
            .map_err(unavailable)?;
        tcp.set_nodelay(true).map_err(unavailable)?;
        let mut conn = Self {
            stream: BufStream::new(tcp),
            max_payload,
        };

        if let Some(credential) = &config.credential {
            match conn.command(&[b"AUTH".as_slice(), credential.as_bytes()]).await? {
                RespValue::Simple(_) => {}
                other => {
                    return Err(BrokerError::Internal(format!(
                        "unexpected AUTH reply: {:?}",
                        other
                    )))
                }
            }
        }
        if config.db_index != 0 {
            let index = config.db_index.to_string();
            match conn.command(&[b"SELECT".as_slice(), index.as_bytes()]).await? {
                RespValue::Simple(_) => {}
                other => {
                    return Err(BrokerError::Internal(format!(
                        "unexpected SELECT reply: {:?}",
                        other
                    )))
                }
            }
        }
        Ok(conn)
    }

    async fn send(&mut self, args: &[&[u8]]) -> Result<(), BrokerError> {
        let mut frame = Vec::with_capacity(64);
        frame.extend_from_slice(format!("*{}\r\n", args.len()).as_bytes());
        for arg in args {
            frame.extend_from_slice(format!("${}\r\n", arg.len()).as_bytes());
            frame.extend_from_slice(arg);
            frame.extend_from_slice(b"\r\n");
        }
        self.stream.write_all(&frame).await.map_err(unavailable)?;
        self.stream.flush().await.map_err(unavailable)
    }

    /// Send a command and read its single reply.
    async fn command(&mut self, args: &[&[u8]]) -> Result<RespValue, BrokerError> {
        self.send(args).await?;
        match self.read_value().await? {
            Some(RespValue::Error(message)) => Err(BrokerError::Internal(message)),
            Some(value) => Ok(value),
            None => Err(BrokerError::Unavailable("connection closed".to_string())),
        }
    }

    async fn ping(&mut self) -> Result<(), BrokerError> {
        match self.command(&[b"PING".as_slice()]).await? {
            RespValue::Simple(_) | RespValue::Bulk(_) => Ok(()),
            other => Err(BrokerError::Internal(format!(
                "unexpected PING reply: {:?}",
                other
            ))),
        }
    }

    /// Read one value. `Ok(None)` means the peer closed the connection
    /// cleanly before the next value started.
    ///
    /// Pub/sub pushes are flat arrays of scalars, so array elements are
    /// parsed as scalars only.
    async fn read_value(&mut self) -> Result<Option<RespValue>, BrokerError> {
        let Some(line) = self.read_line(true).await? else {
            return Ok(None);
        };
        if let Some(rest) = line.strip_prefix(b"*") {
            let len = parse_len(rest)?;
            let Some(len) = len else {
                return Ok(Some(RespValue::Null));
            };
            let mut items = Vec::with_capacity(len);
            for _ in 0..len {
                let line = self.read_line(false).await?.ok_or_else(|| {
                    BrokerError::Internal("connection closed mid-array".to_string())
                })?;
                items.push(self.parse_scalar(&line).await?);
            }
            return Ok(Some(RespValue::Array(items)));
        }
        Ok(Some(self.parse_scalar(&line).await?))
    }

    async fn parse_scalar(&mut self, line: &[u8]) -> Result<RespValue, BrokerError> {
        let (kind, rest) = line
            .split_first()
            .ok_or_else(|| BrokerError::Internal("empty protocol line".to_string()))?;
        let text = String::from_utf8_lossy(rest).into_owned();

        match kind {
            b'+' => Ok(RespValue::Simple(text)),
            b'-' => Ok(RespValue::Error(text)),
            b':' => {
                let value = text
                    .parse::<i64>()
                    .map_err(|_| BrokerError::Internal("bad integer reply".to_string()))?;
                Ok(RespValue::Integer(value))
            }
            b'$' => {
                let Some(len) = parse_len(rest)? else {
                    return Ok(RespValue::Null);
                };
                if len > self.max_payload {
                    return Err(BrokerError::Internal(format!(
                        "bulk payload of {} bytes exceeds cap",
                        len
                    )));
                }
                let mut payload = vec![0u8; len + 2];
                self.stream
                    .read_exact(&mut payload)
                    .await
                    .map_err(unavailable)?;
                payload.truncate(len);
                Ok(RespValue::Bulk(Bytes::from(payload)))
            }
            b'*' => Err(BrokerError::Internal(
                "nested array reply not supported".to_string(),
            )),
            other => Err(BrokerError::Internal(format!(
                "unknown reply type byte {:#x}",
                other
            ))),
        }
    }

    /// Read one `\r\n`-terminated line without the terminator.
    async fn read_line(&mut self, eof_ok: bool) -> Result<Option<Vec<u8>>, BrokerError> {
        let mut line = Vec::new();
        let read = self
            .stream
            .read_until(b'\n', &mut line)
            .await
            .map_err(unavailable)?;
        if read == 0 {
            if eof_ok {
                return Ok(None);
            }
            return Err(BrokerError::Internal(
                "connection closed mid-value".to_string(),
            ));
        }
        if line.len() > MAX_LINE_BYTES {
            return Err(BrokerError::Internal("protocol line too long".to_string()));
        }
        if line.ends_with(b"\n") {
            line.pop();
        }
        if line.ends_with(b"\r") {
            line.pop();
        }
        Ok(Some(line))
    }
}

/// Pub/sub broker client over RESP.
#[derive(Debug)]
pub struct RedisBroker {
    config: BrokerConfig,
    max_payload: usize,
    pool: Vec<tokio::sync::Mutex<Option<RespConnection>>>,
    next: AtomicUsize,
}

impl RedisBroker {
    /// Connect to the broker and verify connectivity with a ping.
    ///
    /// `max_payload` caps every inbound bulk payload; replies above it are
    /// surfaced as protocol errors.
    pub async fn connect(config: BrokerConfig, max_payload: usize) -> Result<Self, BrokerError> {
        let mut first = RespConnection::open(&config, max_payload).await?;
        first.ping().await?;

        let mut pool = Vec::with_capacity(config.pool_size.max(1));
        pool.push(tokio::sync::Mutex::new(Some(first)));
        // Remaining slots dial lazily on first use.
        for _ in 1..config.pool_size.max(1) {
            pool.push(tokio::sync::Mutex::new(None));
        }

        tracing::info!(
            endpoint = %config.endpoint,
            pool_size = pool.len(),
            db_index = config.db_index,
            "connected to broker"
        );

        Ok(Self {
            config,
            max_payload,
            pool,
            next: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl Broker for RedisBroker {
    async fn publish(&self, channel: &str, payload: Bytes) -> Result<(), BrokerError> {
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.pool.len();
        let mut slot = self.pool[index].lock().await;

        if slot.is_none() {
            *slot = Some(RespConnection::open(&self.config, self.max_payload).await?);
        }
        let Some(conn) = slot.as_mut() else {
            return Err(BrokerError::Internal("connection slot empty".to_string()));
        };

        match conn
            .command(&[b"PUBLISH".as_slice(), channel.as_bytes(), payload.as_ref()])
            .await {
            Ok(RespValue::Integer(receivers)) => {
                tracing::trace!(channel, receivers, "published");
                Ok(())
            }
            Ok(other) => {
                *slot = None;
                Err(BrokerError::Internal(format!(
                    "unexpected PUBLISH reply: {:?}",
                    other
                )))
            }
            Err(err) => {
                // Drop the broken connection; the slot re-dials next time.
                *slot = None;
                Err(err)
            }
        }
    }

    async fn subscribe(&self, channel: &str) -> Result<Box<dyn Subscription>, BrokerError> {
        let mut conn = RespConnection::open(&self.config, self.max_payload).await?;
        conn.send(&[b"SUBSCRIBE".as_slice(), channel.as_bytes()]).await?;
        Ok(Box::new(RedisSubscription {
            conn: Some(conn),
            channel: channel.to_string(),
            ready: false,
        }))
    }
}

struct RedisSubscription {
    conn: Option<RespConnection>,
    channel: String,
    ready: bool,
}

#[async_trait]
impl Subscription for RedisSubscription {
    async fn ready(&mut self) -> Result<(), BrokerError> {
        if self.ready {
            return Ok(());
        }
        let Some(conn) = self.conn.as_mut() else {
            return Err(BrokerError::Internal("subscription closed".to_string()));
        };
        loop {
            match conn.read_value().await? {
                Some(RespValue::Array(items)) => {
                    if matches!(items.first(), Some(RespValue::Bulk(kind)) if kind.as_ref() == b"subscribe")
                    {
                        self.ready = true;
                        tracing::debug!(channel = %self.channel, "subscription established");
                        return Ok(());
                    }
                }
                Some(RespValue::Error(message)) => return Err(BrokerError::Internal(message)),
                Some(_) => continue,
                None => {
                    return Err(BrokerError::Unavailable(
                        "connection closed before subscribe ack".to_string(),
                    ))
                }
            }
        }
    }

    async fn next_message(&mut self) -> Result<Option<BrokerMessage>, BrokerError> {
        let Some(conn) = self.conn.as_mut() else {
            return Ok(None);
        };
        loop {
            match conn.read_value().await? {
                Some(RespValue::Array(items)) => {
                    let mut items = items.into_iter();
                    let kind = items.next();
                    if !matches!(&kind, Some(RespValue::Bulk(k)) if k.as_ref() == b"message") {
                        // Subscribe/unsubscribe confirmations and pings.
                        continue;
                    }
                    let channel = match items.next() {
                        Some(RespValue::Bulk(ch)) => String::from_utf8_lossy(&ch).into_owned(),
                        _ => self.channel.clone(),
                    };
                    let payload = match items.next() {
                        Some(RespValue::Bulk(payload)) => payload,
                        other => {
                            return Err(BrokerError::Internal(format!(
                                "malformed message push: {:?}",
                                other
                            )))
                        }
                    };
                    return Ok(Some(BrokerMessage { channel, payload }));
                }
                Some(RespValue::Error(message)) => return Err(BrokerError::Internal(message)),
                Some(_) => continue,
                None => return Ok(None),
            }
        }
    }

    async fn close(&mut self) -> Result<(), BrokerError> {
        if let Some(mut conn) = self.conn.take() {
            // Best effort; the connection is dropped either way.
            let _ = conn.send(&[b"UNSUBSCRIBE".as_slice()]).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    /// A scripted peer that answers the handful of commands the client
    /// sends, keyed by substring.
    async fn spawn_fake_broker() -> std::net::SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    break;
                };
                tokio::spawn(async move {
                    let mut seen = Vec::new();
                    let mut buf = [0u8; 1024];
                    loop {
                        let Ok(read) = socket.read(&mut buf).await else {
                            break;
                        };
                        if read == 0 {
                            break;
                        }
                        seen.extend_from_slice(&buf[..read]);
                        let text = String::from_utf8_lossy(&seen).into_owned();
                        if text.contains("PING") {
                            seen.clear();
                            let _ = socket.write_all(b"+PONG\r\n").await;
                        } else if text.contains("PUBLISH") {
                            seen.clear();
                            let _ = socket.write_all(b":1\r\n").await;
                        } else if text.contains("SUBSCRIBE") && !text.contains("UNSUBSCRIBE") {
                            seen.clear();
                            let _ = socket
                                .write_all(
                                    b"*3\r\n$9\r\nsubscribe\r\n$6\r\norders\r\n:1\r\n\
                                      *3\r\n$7\r\nmessage\r\n$6\r\norders\r\n$5\r\nhello\r\n",
                                )
                                .await;
                        }
                    }
                });
            }
        });
        addr
    }

    fn config_for(addr: std::net::SocketAddr) -> BrokerConfig {
        BrokerConfig {
            endpoint: addr.to_string(),
            credential: None,
            db_index: 0,
            pool_size: 2,
        }
    }

    #[tokio::test]
    async fn connect_pings_and_publishes() {
        let addr = spawn_fake_broker().await;
        let broker = RedisBroker::connect(config_for(addr), 1 << 20).await.unwrap();

        broker
            .publish("orders", Bytes::from_static(b"{\"n\":1}"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn subscribe_ready_then_message() {
        let addr = spawn_fake_broker().await;
        let broker = RedisBroker::connect(config_for(addr), 1 << 20).await.unwrap();

        let mut sub = broker.subscribe("orders").await.unwrap();
        sub.ready().await.unwrap();
        let msg = sub.next_message().await.unwrap().unwrap();
        assert_eq!(msg.channel, "orders");
        assert_eq!(&msg.payload[..], b"hello");
        sub.close().await.unwrap();
        sub.close().await.unwrap();
    }

    #[tokio::test]
    async fn oversize_bulk_is_rejected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 256];
            // PING
            let _ = socket.read(&mut buf).await;
            let _ = socket.write_all(b"+PONG\r\n").await;
            // PUBLISH answered with an absurd bulk reply
            let _ = socket.read(&mut buf).await;
            let _ = socket.write_all(b"$999999999\r\n").await;
        });

        let config = BrokerConfig {
            endpoint: addr.to_string(),
            pool_size: 1,
            ..Default::default()
        };
        let broker = RedisBroker::connect(config, 1024).await.unwrap();
        let err = broker
            .publish("orders", Bytes::from_static(b"x"))
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::Internal(_)));
    }

    #[tokio::test]
    async fn connect_failure_is_unavailable() {
        let config = BrokerConfig {
            // Reserved port that nothing listens on.
            endpoint: "127.0.0.1:1".to_string(),
            ..Default::default()
        };
        let err = RedisBroker::connect(config, 1024).await.unwrap_err();
        assert!(matches!(err, BrokerError::Unavailable(_)));
    }
}
