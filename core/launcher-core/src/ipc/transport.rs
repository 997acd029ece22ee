//! Message transports for the worker channel.
//!
//! The worker speaks ZeroMQ pub/sub over loopback TCP. The channel loop only
//! needs "receive with a timeout" and "send a multipart message", so that is
//! all the `Transport` trait exposes; tests swap in an in-memory script.

use bytes::Bytes;
use std::time::Duration;
use tokio::runtime::Runtime;
use zeromq::{PubSocket, Socket, SocketRecv, SocketSend, SubSocket, ZmqMessage};

use crate::error::{LauncherError, Result};
use dlworker_protocol::{DEFAULT_EGRESS_PORT, DEFAULT_INGRESS_PORT};

/// Bidirectional multipart message transport owned by one channel loop.
pub trait Transport: Send {
    /// Waits up to `timeout` for one inbound message. `Ok(None)` on timeout.
    fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<Vec<Vec<u8>>>>;

    fn send(&mut self, frames: Vec<Vec<u8>>) -> Result<()>;

    /// Releases sockets and any messaging context. Idempotent.
    fn close(&mut self);
}

/// Opens a fresh transport for each session.
pub trait TransportFactory: Send + Sync {
    fn open(&self) -> Result<Box<dyn Transport>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelPorts {
    /// Inbound: we bind a SUB socket here and the worker publishes to it.
    pub ingress: u16,
    /// Outbound: we bind a PUB socket here and the worker subscribes to it.
    pub egress: u16,
}

impl Default for ChannelPorts {
    fn default() -> Self {
        Self {
            ingress: DEFAULT_INGRESS_PORT,
            egress: DEFAULT_EGRESS_PORT,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ZmqTransportFactory {
    ports: ChannelPorts,
}

impl ZmqTransportFactory {
    pub fn new(ports: ChannelPorts) -> Self {
        Self { ports }
    }
}

impl TransportFactory for ZmqTransportFactory {
    fn open(&self) -> Result<Box<dyn Transport>> {
        Ok(Box::new(ZmqTransport::bind(self.ports)?))
    }
}

/// ZeroMQ sockets bound on loopback, driven by a one-thread tokio runtime.
pub struct ZmqTransport {
    runtime: Option<Runtime>,
    inbound: Option<SubSocket>,
    outbound: Option<PubSocket>,
}

impl ZmqTransport {
    pub fn bind(ports: ChannelPorts) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("ipc-io")
            .enable_all()
            .build()
            .map_err(|err| LauncherError::io("start IPC runtime", err))?;

        let (inbound, outbound) = runtime.block_on(async {
            let mut inbound = SubSocket::new();
            inbound
                .bind(&loopback(ports.ingress))
                .await
                .map_err(|err| transport_error("bind inbound socket", err))?;
            inbound
                .subscribe("")
                .await
                .map_err(|err| transport_error("subscribe inbound socket", err))?;

            let mut outbound = PubSocket::new();
            outbound
                .bind(&loopback(ports.egress))
                .await
                .map_err(|err| transport_error("bind outbound socket", err))?;

            Ok::<_, LauncherError>((inbound, outbound))
        })?;

        tracing::debug!(
            ingress = ports.ingress,
            egress = ports.egress,
            "IPC sockets bound"
        );

        Ok(Self {
            runtime: Some(runtime),
            inbound: Some(inbound),
            outbound: Some(outbound),
        })
    }
}

impl Transport for ZmqTransport {
    fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<Vec<Vec<u8>>>> {
        let (Some(runtime), Some(inbound)) = (self.runtime.as_ref(), self.inbound.as_mut()) else {
            return Err(LauncherError::Transport("transport is closed".to_string()));
        };

        match runtime.block_on(async { tokio::time::timeout(timeout, inbound.recv()).await }) {
            Err(_elapsed) => Ok(None),
            Ok(Ok(message)) => Ok(Some(message.iter().map(|frame| frame.to_vec()).collect())),
            Ok(Err(err)) => Err(transport_error("receive", err)),
        }
    }

    fn send(&mut self, frames: Vec<Vec<u8>>) -> Result<()> {
        let (Some(runtime), Some(outbound)) = (self.runtime.as_ref(), self.outbound.as_mut()) else {
            return Err(LauncherError::Transport("transport is closed".to_string()));
        };

        let mut frames = frames.into_iter();
        let Some(first) = frames.next() else {
            return Ok(());
        };
        let mut message = ZmqMessage::from(Bytes::from(first));
        for frame in frames {
            message.push_back(Bytes::from(frame));
        }

        runtime
            .block_on(outbound.send(message))
            .map_err(|err| transport_error("send", err))
    }

    fn close(&mut self) {
        let Some(runtime) = self.runtime.take() else {
            return;
        };
        let inbound = self.inbound.take();
        let outbound = self.outbound.take();
        runtime.block_on(async {
            if let Some(socket) = inbound {
                let _ = socket.close().await;
            }
            if let Some(socket) = outbound {
                let _ = socket.close().await;
            }
        });
        runtime.shutdown_timeout(Duration::from_millis(200));
        tracing::debug!("IPC sockets closed");
    }
}

impl Drop for ZmqTransport {
    fn drop(&mut self) {
        self.close();
    }
}

fn loopback(port: u16) -> String {
    format!("tcp://127.0.0.1:{}", port)
}

fn transport_error(context: &str, err: impl std::fmt::Display) -> LauncherError {
    LauncherError::Transport(format!("{}: {}", context, err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::{ChannelExit, ChannelLoop, ChannelState};
    use crate::observer::NullObserver;
    use std::sync::Arc;
    use std::time::Instant;

    // Off the defaults so a real worker on this machine is never disturbed.
    const TEST_PORTS: ChannelPorts = ChannelPorts {
        ingress: 42569,
        egress: 42568,
    };

    fn worker_message(kind: &str, payload: &str) -> ZmqMessage {
        let mut message = ZmqMessage::from(Bytes::from_static(b"cid-7"));
        message.push_back(Bytes::from(kind.to_string()));
        message.push_back(Bytes::from(payload.to_string()));
        message
    }

    fn frames(message: ZmqMessage) -> Vec<Vec<u8>> {
        message.iter().map(|frame| frame.to_vec()).collect()
    }

    #[test]
    fn loopback_heartbeat_and_terminal_round_trip() {
        let transport = ZmqTransport::bind(TEST_PORTS).unwrap();
        let state = Arc::new(ChannelState::new());
        let channel = std::thread::spawn({
            let state = Arc::clone(&state);
            move || {
                ChannelLoop::new(Box::new(transport), state, Arc::new(NullObserver))
                    .with_poll_timeout(Duration::from_millis(20))
                    .run()
            }
        });

        let peer = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let replies = peer.block_on(async {
            let mut publisher = PubSocket::new();
            publisher.connect(&loopback(TEST_PORTS.ingress)).await.unwrap();
            let mut subscriber = SubSocket::new();
            subscriber.connect(&loopback(TEST_PORTS.egress)).await.unwrap();
            subscriber.subscribe("").await.unwrap();

            // Pub/sub drops messages until subscriptions settle, so repeat the
            // heartbeat until the first ack comes back.
            let mut replies = Vec::new();
            let deadline = Instant::now() + Duration::from_secs(5);
            while replies.is_empty() {
                assert!(Instant::now() < deadline, "no heartbeat ack");
                publisher.send(worker_message("10", "heartbeat")).await.unwrap();
                if let Ok(reply) = tokio::time::timeout(Duration::from_millis(100), subscriber.recv()).await {
                    replies.push(frames(reply.unwrap()));
                }
            }

            publisher.send(worker_message("1500", "")).await.unwrap();
            let stop = vec![b"cid-7".to_vec(), b"3".to_vec()];
            while replies.iter().filter(|reply| **reply == stop).count() < 2 {
                let reply = tokio::time::timeout(Duration::from_secs(5), subscriber.recv())
                    .await
                    .expect("stop frames")
                    .unwrap();
                replies.push(frames(reply));
            }
            replies
        });
        drop(peer);

        let exit = channel.join().unwrap();
        assert_eq!(exit, ChannelExit::WorkerTerminal { message_type: 1500 });
        assert_eq!(state.token(), Some(dlworker_protocol::CorrelationToken::new("cid-7")));

        let ack = vec![b"cid-7".to_vec(), b"4".to_vec()];
        let stop = vec![b"cid-7".to_vec(), b"3".to_vec()];
        let (acks, stops) = replies.split_at(replies.len() - 2);
        assert!(!acks.is_empty());
        assert!(acks.iter().all(|reply| *reply == ack));
        assert_eq!(stops, [stop.clone(), stop]);

        let mut rebound = ZmqTransport::bind(TEST_PORTS).expect("ports released after close");
        rebound.close();
    }

    #[test]
    fn closed_transport_rejects_io() {
        let mut transport = ZmqTransport::bind(ChannelPorts {
            ingress: 42579,
            egress: 42578,
        })
        .unwrap();
        transport.close();
        transport.close();

        assert!(transport.recv_timeout(Duration::from_millis(1)).is_err());
        assert!(transport.send(vec![b"cid".to_vec(), b"3".to_vec()]).is_err());
    }
}
