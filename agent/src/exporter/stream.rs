use std::io::ErrorKind;
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bon::Builder;
use flamegraph::Frame;
use protocol::{
    read_frame, write_frame, ArchivedWireMessage, Role, WireMessage,
};
use rkyv::util::AlignedVec;
use tracing::{debug, warn};

use crate::backoff::Backoff;
use crate::exporter::{Encoder, Exporter};
use crate::{AgentError, Result};

/// Connection parameters for the streaming exporter.
#[derive(Debug, Clone, Builder)]
pub struct StreamConfig {
    /// Gateway address, `host:port`.
    pub addr: String,
    /// Optional static bearer credential attached as stream metadata.
    pub auth_token: Option<String>,
    #[builder(default)]
    pub encoder: Encoder,
    /// Budget for one send, handshake included.
    #[builder(default = Duration::from_secs(5))]
    pub flush_timeout: Duration,
    #[builder(default = Duration::from_millis(500))]
    pub backoff_base: Duration,
    #[builder(default = Duration::from_secs(15))]
    pub backoff_cap: Duration,
    /// Total budget of one reconnect attempt sequence.
    #[builder(default = Duration::from_secs(60))]
    pub backoff_budget: Duration,
}

/// Maintains a persistent authenticated stream to the gateway and sends one
/// frame per snapshot. A send failure triggers a reconnect with jittered
/// exponential back-off; the failed snapshot itself is reported to the
/// caller and never buffered across the reconnect.
#[derive(Debug)]
pub struct StreamExporter {
    cfg: StreamConfig,
    stream: Option<TcpStream>,
    closing: Arc<AtomicBool>,
}

impl StreamExporter {
    /// Creates the exporter and blocks until the first successful
    /// handshake.
    pub fn connect(cfg: StreamConfig) -> Result<Self> {
        let mut exporter = StreamExporter {
            cfg,
            stream: None,
            closing: Arc::new(AtomicBool::new(false)),
        };
        exporter.dial()?;
        Ok(exporter)
    }

    fn bearer(&self) -> Option<String> {
        self.cfg
            .auth_token
            .as_ref()
            .map(|token| format!("Bearer {token}"))
    }

    fn dial(&mut self) -> Result<()> {
        let addr = self
            .cfg
            .addr
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| AgentError::InvalidAddr(self.cfg.addr.clone()))?;
        let mut stream = TcpStream::connect_timeout(&addr, self.cfg.flush_timeout)?;
        stream.set_read_timeout(Some(self.cfg.flush_timeout))?;
        stream.set_write_timeout(Some(self.cfg.flush_timeout))?;
        stream.set_nodelay(true)?;

        let bearer = self.bearer();
        write_frame(
            &mut stream,
            &WireMessage::Hello {
                role: Role::Producer,
                authorization: bearer.as_deref(),
            },
        )?;

        let mut buf = AlignedVec::new();
        read_frame(&mut stream, &mut buf)?;
        match protocol::access_message(&buf)? {
            ArchivedWireMessage::HelloAck => {
                debug!(addr = %self.cfg.addr, "stream established");
                self.stream = Some(stream);
                Ok(())
            }
            ArchivedWireMessage::HelloReject { status, message } => Err(AgentError::Rejected(
                format!("{:?}: {}", status, &**message),
            )),
            _ => Err(AgentError::Rejected(
                "unexpected response to hello".to_string(),
            )),
        }
    }

    /// Re-dials until success, cancellation or budget exhaustion.
    fn reconnect(&mut self) {
        self.stream = None;
        let mut backoff = Backoff::new(self.cfg.backoff_base, self.cfg.backoff_cap);
        let deadline = Instant::now() + self.cfg.backoff_budget;
        loop {
            if self.closing.load(Ordering::Relaxed) {
                return;
            }
            let delay = backoff.next();
            if Instant::now() + delay >= deadline {
                warn!(addr = %self.cfg.addr, "reconnect budget exhausted");
                return;
            }
            std::thread::sleep(delay);
            if self.closing.load(Ordering::Relaxed) {
                return;
            }
            match self.dial() {
                Ok(()) => return,
                Err(e) => debug!(error = %e, "reconnect attempt failed"),
            }
        }
    }
}

impl Exporter for StreamExporter {
    fn export(&mut self, snapshot: &Frame) -> Result<()> {
        if self.closing.load(Ordering::Relaxed) {
            return Err(AgentError::Closed);
        }
        let payload = self.cfg.encoder.encode(snapshot)?;

        if self.stream.is_none() {
            self.dial()?;
        }
        let stream = match self.stream.as_mut() {
            Some(stream) => stream,
            None => return Err(AgentError::Closed),
        };

        if let Err(e) = write_frame(stream, &WireMessage::Chunk { payload: &payload }) {
            self.reconnect();
            return Err(e.into());
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.closing.store(true, Ordering::Relaxed);
        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.shutdown(std::net::Shutdown::Both) {
                if e.kind() != ErrorKind::NotConnected {
                    return Err(e.into());
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::RejectStatus;
    use std::net::TcpListener;
    use std::sync::Once;

    static INIT: Once = Once::new();

    fn init_tracing() {
        INIT.call_once(|| {
            tracing_subscriber::fmt()
                .with_env_filter(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
                )
                .init();
        });
    }

    fn config(addr: String) -> StreamConfig {
        StreamConfig::builder()
            .addr(addr)
            .auth_token("sekrit".to_string())
            .flush_timeout(Duration::from_secs(2))
            .backoff_base(Duration::from_millis(10))
            .backoff_cap(Duration::from_millis(50))
            .backoff_budget(Duration::from_millis(400))
            .build()
    }

    /// Accepts one connection, checks the hello and answers it, then
    /// returns the chunks received before the peer hangs up.
    fn accept_producer(listener: TcpListener, reject: Option<RejectStatus>) -> Vec<Vec<u8>> {
        let (mut stream, _) = listener.accept().unwrap();
        let mut buf = AlignedVec::new();
        read_frame(&mut stream, &mut buf).unwrap();
        match protocol::access_message(&buf).unwrap() {
            ArchivedWireMessage::Hello {
                role,
                authorization,
            } => {
                assert_eq!(*role, Role::Producer);
                assert_eq!(
                    authorization.as_ref().map(|a| &**a),
                    Some("Bearer sekrit")
                );
            }
            _ => panic!("expected hello"),
        }

        if let Some(status) = reject {
            write_frame(
                &mut stream,
                &WireMessage::HelloReject {
                    status,
                    message: "nope",
                },
            )
            .unwrap();
            return Vec::new();
        }
        write_frame(&mut stream, &WireMessage::HelloAck).unwrap();

        let mut chunks = Vec::new();
        loop {
            if read_frame(&mut stream, &mut buf).is_err() {
                break;
            }
            match protocol::access_message(&buf).unwrap() {
                ArchivedWireMessage::Chunk { payload } => chunks.push(payload.to_vec()),
                _ => break,
            }
        }
        chunks
    }

    #[test]
    fn exports_chunks_over_the_stream() {
        init_tracing();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let server = std::thread::spawn(move || accept_producer(listener, None));

        let mut exporter = StreamExporter::connect(config(addr)).unwrap();
        let frame = Frame::leaf("root", 5);
        exporter.export(&frame).unwrap();
        exporter.close().unwrap();

        let chunks = server.join().unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(Frame::from_json(&chunks[0]).unwrap(), frame);
    }

    #[test]
    fn rejected_handshake_surfaces_status() {
        init_tracing();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let server = std::thread::spawn(move || {
            accept_producer(listener, Some(RejectStatus::PermissionDenied))
        });

        let err = StreamExporter::connect(config(addr)).unwrap_err();
        match err {
            AgentError::Rejected(msg) => assert!(msg.contains("PermissionDenied")),
            other => panic!("unexpected error: {other}"),
        }
        server.join().unwrap();
    }

    #[test]
    fn send_failure_reports_and_reconnects() {
        init_tracing();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        // First connection: ack, then drop immediately.
        let first = {
            let listener = listener.try_clone().unwrap();
            std::thread::spawn(move || {
                let (mut stream, _) = listener.accept().unwrap();
                let mut buf = AlignedVec::new();
                read_frame(&mut stream, &mut buf).unwrap();
                write_frame(&mut stream, &WireMessage::HelloAck).unwrap();
            })
        };

        let mut exporter = StreamExporter::connect(config(addr)).unwrap();
        first.join().unwrap();

        // Second connection serves the reconnect.
        let second = std::thread::spawn(move || accept_producer(listener, None));

        let frame = Frame::leaf("root", 1);
        // The peer is gone; the send eventually errors and kicks off the
        // back-off reconnect. A small TCP buffer may absorb the first write.
        let mut failed = false;
        for _ in 0..50 {
            if exporter.export(&frame).is_err() {
                failed = true;
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(failed, "send against a dead peer never failed");

        // After the reconnect the stream works again.
        exporter.export(&frame).unwrap();
        exporter.close().unwrap();
        let chunks = second.join().unwrap();
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn close_makes_export_fail_fast() {
        init_tracing();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let server = std::thread::spawn(move || accept_producer(listener, None));

        let mut exporter = StreamExporter::connect(config(addr)).unwrap();
        exporter.close().unwrap();
        assert!(matches!(
            exporter.export(&Frame::leaf("root", 1)),
            Err(AgentError::Closed)
        ));
        server.join().unwrap();
    }
}
