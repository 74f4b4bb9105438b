//! Per-broker fetch connection
//!
//! A [`FetchConn`] owns one TCP connection to one broker, driven by a
//! dedicated I/O task. Workers hand encoded request frames to the task and
//! receive decoded response frames and connection-state sentinels on the
//! connection's channels.

use bytes::{Buf, Bytes, BytesMut};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{wire, FetchEvent};
use crate::error::{Error, Result};
use crate::models::BrokerEndpoint;

/// Client id advertised in request headers
const CLIENT_ID: &str = "fetchforge";

/// Channel capacity for request and event channels
const CHANNEL_CAPACITY: usize = 16;

/// Delay between reconnect attempts
const RECONNECT_DELAY: Duration = Duration::from_millis(500);

/// Upper bound on a single response frame; anything larger means the stream
/// is corrupt
const MAX_FRAME_BYTES: i32 = 64 * 1024 * 1024;

/// A live fetch connection to one broker endpoint
pub struct FetchConn {
    endpoint: BrokerEndpoint,

    /// Encoded request frames for the I/O task to write
    req_tx: mpsc::Sender<Bytes>,

    /// Response frames and connection sentinels
    pub read_rx: mpsc::Receiver<FetchEvent>,

    /// Request-level transport errors
    pub error_rx: mpsc::Receiver<Error>,

    /// Correlation id counter for outgoing requests
    correlation: i32,

    io_task: JoinHandle<()>,
}

impl FetchConn {
    /// Open a connection to the broker and start its I/O task
    pub async fn connect(endpoint: &BrokerEndpoint, reconnect_max_attempts: u32) -> Result<Self> {
        let stream = TcpStream::connect(endpoint.address()).await.map_err(|e| {
            Error::connection(format!("Failed to connect to broker {}: {}", endpoint, e))
        })?;
        stream.set_nodelay(true).ok();

        let (req_tx, req_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (read_tx, read_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (error_tx, error_rx) = mpsc::channel(CHANNEL_CAPACITY);

        let io_task = tokio::spawn(run_io(
            endpoint.clone(),
            stream,
            req_rx,
            read_tx,
            error_tx,
            reconnect_max_attempts,
        ));

        debug!(broker = %endpoint, "Opened fetch connection");

        Ok(Self {
            endpoint: endpoint.clone(),
            req_tx,
            read_rx,
            error_rx,
            correlation: 0,
            io_task,
        })
    }

    /// The broker this connection talks to
    pub fn endpoint(&self) -> &BrokerEndpoint {
        &self.endpoint
    }

    /// Encode and dispatch a fetch request; non-blocking with respect to the
    /// broker (the response arrives on `read_rx`)
    pub async fn send_fetch(&mut self, topic: &str, partition: i32, offset: i64) -> Result<()> {
        self.correlation = self.correlation.wrapping_add(1);
        let frame =
            wire::encode_fetch_request(self.correlation, CLIENT_ID, topic, partition, offset)?;

        self.req_tx.send(frame).await.map_err(|_| {
            Error::connection(format!("Connection task for {} has stopped", self.endpoint))
        })
    }

    /// Discard events left over from an abandoned request, so a stale frame
    /// is never mistaken for the answer to the next fetch
    pub fn drain_pending(&mut self) {
        while self.read_rx.try_recv().is_ok() {}
        while self.error_rx.try_recv().is_ok() {}
    }
}

impl Drop for FetchConn {
    fn drop(&mut self) {
        self.io_task.abort();
    }
}

/// I/O task: writes queued request frames and surfaces response frames,
/// reconnecting a bounded number of times when the socket drops
async fn run_io(
    endpoint: BrokerEndpoint,
    stream: TcpStream,
    mut req_rx: mpsc::Receiver<Bytes>,
    read_tx: mpsc::Sender<FetchEvent>,
    error_tx: mpsc::Sender<Error>,
    reconnect_max_attempts: u32,
) {
    let (mut rd, mut wr) = stream.into_split();
    let mut read_buf = BytesMut::with_capacity(64 * 1024);

    loop {
        tokio::select! {
            req = req_rx.recv() => match req {
                // The owning FetchConn was dropped
                None => break,
                Some(frame) => {
                    if let Err(e) = write_frame(&mut wr, &frame).await {
                        let _ = error_tx
                            .send(Error::connection(format!(
                                "Write to broker {} failed: {}",
                                endpoint, e
                            )))
                            .await;

                        match reconnect(&endpoint, reconnect_max_attempts).await {
                            Some(stream) => {
                                (rd, wr) = stream.into_split();
                                read_buf.clear();
                            }
                            None => {
                                let _ = read_tx.send(FetchEvent::Poison).await;
                                break;
                            }
                        }
                    }
                }
            },
            result = rd.read_buf(&mut read_buf) => {
                let failed = match result {
                    Ok(0) => true,
                    Ok(_) => {
                        match forward_frames(&mut read_buf, &read_tx).await {
                            Ok(receiver_alive) => {
                                if !receiver_alive {
                                    break;
                                }
                                false
                            }
                            // Framing is corrupt; the stream cannot be
                            // resynchronized, only replaced
                            Err(e) => {
                                warn!(broker = %endpoint, error = %e, "Corrupt response frame");
                                true
                            }
                        }
                    }
                    Err(e) => {
                        warn!(broker = %endpoint, error = %e, "Broker read failed");
                        true
                    }
                };

                if failed {
                    match reconnect(&endpoint, reconnect_max_attempts).await {
                        Some(stream) => {
                            (rd, wr) = stream.into_split();
                            read_buf.clear();
                            if read_tx.send(FetchEvent::Reconnected).await.is_err() {
                                break;
                            }
                        }
                        None => {
                            let _ = read_tx.send(FetchEvent::Poison).await;
                            break;
                        }
                    }
                }
            }
        }
    }

    debug!(broker = %endpoint, "Fetch connection task exiting");
}

/// Extract complete length-prefixed frames from the buffer and forward them.
/// Returns whether the receiver is still alive.
async fn forward_frames(
    read_buf: &mut BytesMut,
    read_tx: &mpsc::Sender<FetchEvent>,
) -> Result<bool> {
    loop {
        if read_buf.len() < 4 {
            return Ok(true);
        }

        let len = i32::from_be_bytes([read_buf[0], read_buf[1], read_buf[2], read_buf[3]]);
        if len <= 0 || len > MAX_FRAME_BYTES {
            return Err(Error::protocol(format!("Invalid frame length {}", len)));
        }

        let len = len as usize;
        if read_buf.len() < 4 + len {
            return Ok(true);
        }

        read_buf.advance(4);
        let frame = read_buf.split_to(len).freeze();

        if read_tx.send(FetchEvent::Payload(frame)).await.is_err() {
            return Ok(false);
        }
    }
}

async fn write_frame(wr: &mut OwnedWriteHalf, frame: &Bytes) -> std::io::Result<()> {
    wr.write_i32(frame.len() as i32).await?;
    wr.write_all(frame).await?;
    wr.flush().await
}

/// Try to re-establish the broker connection a bounded number of times
async fn reconnect(endpoint: &BrokerEndpoint, max_attempts: u32) -> Option<TcpStream> {
    for attempt in 1..=max_attempts {
        tokio::time::sleep(RECONNECT_DELAY).await;

        match TcpStream::connect(endpoint.address()).await {
            Ok(stream) => {
                stream.set_nodelay(true).ok();
                debug!(broker = %endpoint, attempt, "Reconnected to broker");
                return Some(stream);
            }
            Err(e) => {
                warn!(broker = %endpoint, attempt, error = %e, "Reconnect attempt failed");
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_refused_is_connection_error() {
        // Port 1 should refuse connections
        let endpoint = BrokerEndpoint::new("127.0.0.1", 1);
        let result = FetchConn::connect(&endpoint, 1).await;
        assert!(matches!(result, Err(Error::Connection(_))));
    }

    #[tokio::test]
    async fn test_frame_extraction() {
        let (tx, mut rx) = mpsc::channel(4);
        let mut buf = BytesMut::new();

        // One complete frame plus the prefix of a second
        buf.extend_from_slice(&3i32.to_be_bytes());
        buf.extend_from_slice(b"abc");
        buf.extend_from_slice(&10i32.to_be_bytes());
        buf.extend_from_slice(b"part");

        assert!(forward_frames(&mut buf, &tx).await.unwrap());

        let event = rx.try_recv().unwrap();
        match event {
            FetchEvent::Payload(frame) => assert_eq!(frame.as_ref(), b"abc"),
            other => panic!("unexpected event: {:?}", other),
        }

        // The partial second frame stays buffered
        assert!(rx.try_recv().is_err());
        assert_eq!(buf.len(), 4 + 4);
    }

    #[tokio::test]
    async fn test_invalid_frame_length_is_protocol_error() {
        let (tx, _rx) = mpsc::channel(4);
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&(-5i32).to_be_bytes());

        assert!(forward_frames(&mut buf, &tx).await.is_err());
    }
}
