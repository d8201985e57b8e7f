//! Ingress server and subscriber fan-out hub.
//!
//! One accept loop polls the listener and spawns a handler thread per
//! connection. Producer streams push chunks that are written to retention,
//! evaluated for alerts and fanned out to every live subscriber queue with
//! a non-blocking send; a full queue drops the chunk for that subscriber
//! only. Subscriber streams replay the retention window first, then follow
//! live traffic.

use std::collections::HashMap;
use std::io::{ErrorKind, Read};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::os::fd::AsFd;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam::channel::{Receiver, Sender, TrySendError};
use flamegraph::Frame;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use parking_lot::{Mutex, RwLock};
use protocol::{
    write_frame, ArchivedWireMessage, RejectStatus, Role, WireMessage, MAX_FRAME_LEN,
};
use rkyv::util::AlignedVec;
use tracing::{debug, info, warn};

use crate::alerts::{metrics, AlertEngine};
use crate::auth::AuthMode;
use crate::retention::{InMemStore, RetentionStore};
use crate::{GatewayConfig, Result};

const STREAM_READ_TIMEOUT: Duration = Duration::from_millis(500);
const STREAM_WRITE_TIMEOUT: Duration = Duration::from_secs(5);
const SUBSCRIBER_POLL: Duration = Duration::from_millis(100);

struct SubscriberHandle {
    tx: Sender<Vec<u8>>,
    dropped: Arc<AtomicU64>,
}

struct Inner {
    cfg: GatewayConfig,
    auth: AuthMode,
    store: RetentionStore,
    subs: RwLock<HashMap<u64, SubscriberHandle>>,
    next_sub: AtomicU64,
    dropped_total: AtomicU64,
    alerts: Mutex<AlertEngine>,
    shutdown: AtomicBool,
    local_addr: Mutex<Option<SocketAddr>>,
}

/// Gateway front door: accepts producer and subscriber streams and owns the
/// retention store, the subscriber registry and the alert engine.
pub struct Server {
    inner: Arc<Inner>,
    accept_loop: Mutex<Option<JoinHandle<()>>>,
}

impl Server {
    /// Builds a server over an in-memory retention ring. Configuration is
    /// normalized and validated here; contradictions abort before serving.
    pub fn new(cfg: GatewayConfig, alerts: AlertEngine) -> Result<Self> {
        let store = RetentionStore::InMemory(InMemStore::with_rate(
            cfg.retention_window.max(Duration::from_secs(60)),
            cfg.expected_write_rate.max(1),
        ));
        Server::with_store(cfg, store, alerts)
    }

    /// Builds a server over a caller-provided retention store.
    pub fn with_store(
        mut cfg: GatewayConfig,
        store: RetentionStore,
        alerts: AlertEngine,
    ) -> Result<Self> {
        cfg.normalize();
        cfg.validate()?;
        let auth = AuthMode::from_config(&cfg);
        Ok(Server {
            inner: Arc::new(Inner {
                cfg,
                auth,
                store,
                subs: RwLock::new(HashMap::new()),
                next_sub: AtomicU64::new(1),
                dropped_total: AtomicU64::new(0),
                alerts: Mutex::new(alerts),
                shutdown: AtomicBool::new(false),
                local_addr: Mutex::new(None),
            }),
            accept_loop: Mutex::new(None),
        })
    }

    /// Binds the listener and starts accepting streams in the background.
    pub fn serve(&self) -> Result<()> {
        let mut accept_loop = self.accept_loop.lock();
        if accept_loop.is_some() || self.inner.shutdown.load(Ordering::SeqCst) {
            return Ok(());
        }

        let listener = TcpListener::bind(&self.inner.cfg.listen_addr)?;
        let local = listener.local_addr()?;
        *self.inner.local_addr.lock() = Some(local);
        info!(addr = %local, "gateway listening");

        let inner = self.inner.clone();
        let handle = std::thread::Builder::new()
            .name("gateway-accept".to_string())
            .spawn(move || accept_loop_body(listener, inner))?;
        *accept_loop = Some(handle);
        Ok(())
    }

    /// Stops accepting new streams and signals in-flight handlers, which
    /// observe the flag within their read/poll cadence.
    pub fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.accept_loop.lock().take() {
            let _ = handle.join();
        }
    }

    /// Address the listener actually bound, once serving.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.inner.local_addr.lock()
    }

    /// Registers an in-process subscriber. The handle's queue is populated
    /// with the retained history (oldest→newest) before live chunks start
    /// arriving; over the soft cap the handle comes back already closed.
    pub fn subscribe(&self) -> Subscription {
        register_subscriber(&self.inner)
    }

    /// Chunks currently replayable from retention.
    pub fn retained(&self) -> Vec<Vec<u8>> {
        self.inner.store.read_all()
    }

    /// Chunks dropped across all subscribers since startup.
    pub fn dropped_chunks(&self) -> u64 {
        self.inner.dropped_total.load(Ordering::Relaxed)
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subs.read().len()
    }

    #[cfg(test)]
    pub(crate) fn ingest(&self, payload: &[u8]) {
        self.inner.handle_chunk(payload);
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Live consumer handle with a bounded pending-chunk queue.
pub struct Subscription {
    id: Option<u64>,
    rx: Receiver<Vec<u8>>,
    dropped: Arc<AtomicU64>,
    inner: Arc<Inner>,
}

impl Subscription {
    pub fn receiver(&self) -> &Receiver<Vec<u8>> {
        &self.rx
    }

    /// Chunks dropped for this subscriber because its queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Removes the subscriber from the fan-out set and closes its queue.
    /// Safe to call more than once; also runs on drop.
    pub fn unregister(&mut self) {
        if let Some(id) = self.id.take() {
            self.inner.subs.write().remove(&id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unregister();
    }
}

/// Attaches one subscriber under the registry write lock, so the retention
/// replay and the switch to live delivery cannot interleave with a chunk
/// being ingested.
fn register_subscriber(inner: &Arc<Inner>) -> Subscription {
    let mut subs = inner.subs.write();
    let dropped = Arc::new(AtomicU64::new(0));

    if subs.len() >= inner.cfg.max_subscribers {
        warn!(cap = inner.cfg.max_subscribers, "subscriber cap reached");
        let (_tx, rx) = crossbeam::channel::bounded(0);
        return Subscription {
            id: None,
            rx,
            dropped,
            inner: inner.clone(),
        };
    }

    let id = inner.next_sub.fetch_add(1, Ordering::Relaxed);
    let (tx, rx) = crossbeam::channel::bounded(inner.cfg.subscriber_queue);
    for chunk in inner.store.read_all() {
        if tx.try_send(chunk).is_err() {
            dropped.fetch_add(1, Ordering::Relaxed);
            inner.dropped_total.fetch_add(1, Ordering::Relaxed);
        }
    }
    subs.insert(
        id,
        SubscriberHandle {
            tx,
            dropped: dropped.clone(),
        },
    );
    Subscription {
        id: Some(id),
        rx,
        dropped,
        inner: inner.clone(),
    }
}

impl Inner {
    /// Hot path for every ingested chunk: retention first, then the
    /// non-blocking fan-out. Holding the registry lock across both keeps
    /// replay-then-live exactly-once for attaching subscribers. Alert
    /// evaluation follows outside the lock; none of this ever fails the
    /// ingress stream.
    fn handle_chunk(&self, payload: &[u8]) {
        {
            let subs = self.subs.read();
            if let Err(e) = self.store.write(payload) {
                warn!(error = %e, "retention write failed");
            }
            for (id, sub) in subs.iter() {
                match sub.tx.try_send(payload.to_vec()) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        sub.dropped.fetch_add(1, Ordering::Relaxed);
                        self.dropped_total.fetch_add(1, Ordering::Relaxed);
                        debug!(subscriber = id, "dropping chunk for slow subscriber");
                    }
                    Err(TrySendError::Disconnected(_)) => {}
                }
            }
        }

        let mut alerts = self.alerts.lock();
        if alerts.is_empty() {
            return;
        }
        match Frame::from_json(payload) {
            Ok(snapshot) => {
                let derived = metrics::derive(&snapshot);
                alerts.observe(&derived);
            }
            Err(e) => debug!(error = %e, "chunk not evaluable for alerts"),
        }
    }
}

fn accept_loop_body(listener: TcpListener, inner: Arc<Inner>) {
    loop {
        if inner.shutdown.load(Ordering::SeqCst) {
            return;
        }
        let mut fds = [PollFd::new(listener.as_fd(), PollFlags::POLLIN)];
        match poll(&mut fds, PollTimeout::from(100u8)) {
            Ok(0) => continue,
            Ok(_) => {}
            Err(nix::errno::Errno::EINTR) => continue,
            Err(e) => {
                warn!(error = %e, "listener poll failed");
                return;
            }
        }
        match listener.accept() {
            Ok((stream, peer)) => {
                debug!(%peer, "stream connected");
                let inner = inner.clone();
                let spawned = std::thread::Builder::new()
                    .name("gateway-conn".to_string())
                    .spawn(move || {
                        if let Err(e) = handle_connection(stream, &inner) {
                            warn!(error = %e, %peer, "stream handler failed");
                        }
                    });
                if let Err(e) = spawned {
                    warn!(error = ?e, "failed to spawn stream handler");
                }
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => {}
            Err(e) => warn!(error = %e, "accept failed"),
        }
    }
}

enum ReadOutcome {
    Frame,
    CleanEof,
    Shutdown,
}

/// Frame reader that preserves partial progress across read timeouts so the
/// handler can observe the shutdown flag without desyncing the stream.
fn read_frame_interruptible(
    stream: &mut TcpStream,
    buf: &mut AlignedVec,
    shutdown: &AtomicBool,
) -> std::io::Result<ReadOutcome> {
    let mut header = [0u8; 4];
    let mut filled = 0;
    while filled < header.len() {
        if shutdown.load(Ordering::SeqCst) {
            return Ok(ReadOutcome::Shutdown);
        }
        match stream.read(&mut header[filled..]) {
            Ok(0) => {
                return if filled == 0 {
                    Ok(ReadOutcome::CleanEof)
                } else {
                    Err(std::io::Error::new(
                        ErrorKind::UnexpectedEof,
                        "stream closed mid-header",
                    ))
                };
            }
            Ok(n) => filled += n,
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
                ) => {}
            Err(e) => return Err(e),
        }
    }

    let len = u32::from_le_bytes(header) as usize;
    if len > MAX_FRAME_LEN {
        return Err(std::io::Error::new(
            ErrorKind::InvalidData,
            "frame exceeds size limit",
        ));
    }

    buf.clear();
    let mut scratch = [0u8; 8192];
    let mut remaining = len;
    while remaining > 0 {
        if shutdown.load(Ordering::SeqCst) {
            return Ok(ReadOutcome::Shutdown);
        }
        let chunk_len = remaining.min(scratch.len());
        match stream.read(&mut scratch[..chunk_len]) {
            Ok(0) => {
                return Err(std::io::Error::new(
                    ErrorKind::UnexpectedEof,
                    "stream closed mid-frame",
                ));
            }
            Ok(n) => {
                buf.extend_from_slice(&scratch[..n]);
                remaining -= n;
            }
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
                ) => {}
            Err(e) => return Err(e),
        }
    }
    Ok(ReadOutcome::Frame)
}

fn is_disconnect(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        ErrorKind::UnexpectedEof
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
    )
}

fn handle_connection(mut stream: TcpStream, inner: &Arc<Inner>) -> Result<()> {
    stream.set_nodelay(true)?;
    stream.set_read_timeout(Some(STREAM_READ_TIMEOUT))?;
    stream.set_write_timeout(Some(STREAM_WRITE_TIMEOUT))?;

    let mut buf = AlignedVec::new();
    match read_frame_interruptible(&mut stream, &mut buf, &inner.shutdown)? {
        ReadOutcome::Frame => {}
        ReadOutcome::CleanEof | ReadOutcome::Shutdown => return Ok(()),
    }

    let (role, authorization) = match protocol::access_message(&buf)? {
        ArchivedWireMessage::Hello {
            role,
            authorization,
        } => {
            let role = match role {
                protocol::ArchivedRole::Producer => Role::Producer,
                protocol::ArchivedRole::Subscriber => Role::Subscriber,
            };
            (role, authorization.as_ref().map(|a| (**a).to_string()))
        }
        _ => {
            debug!("first message was not a hello, dropping stream");
            return Ok(());
        }
    };

    if let Err(e) = inner.auth.verify(authorization.as_deref()) {
        let status: RejectStatus = e.reject_status();
        debug!(?status, "rejecting stream");
        let message = e.to_string();
        let reject = WireMessage::HelloReject {
            status,
            message: &message,
        };
        write_frame(&mut stream, &reject)?;
        return Ok(());
    }
    write_frame(&mut stream, &WireMessage::HelloAck)?;

    match role {
        Role::Producer => producer_loop(stream, buf, inner),
        Role::Subscriber => subscriber_loop(stream, inner),
    }
}

/// Reads chunks until the client hangs up. Client cancellation ends the
/// stream cleanly; anything else is logged and surfaced.
fn producer_loop(mut stream: TcpStream, mut buf: AlignedVec, inner: &Arc<Inner>) -> Result<()> {
    loop {
        match read_frame_interruptible(&mut stream, &mut buf, &inner.shutdown) {
            Ok(ReadOutcome::Frame) => {}
            Ok(ReadOutcome::CleanEof) => {
                debug!("producer disconnected");
                return Ok(());
            }
            Ok(ReadOutcome::Shutdown) => return Ok(()),
            Err(e) if is_disconnect(&e) => {
                debug!(error = %e, "producer stream ended");
                return Ok(());
            }
            Err(e) => {
                warn!(error = %e, "producer stream receive failed");
                return Err(e.into());
            }
        }
        match protocol::access_message(&buf) {
            Ok(ArchivedWireMessage::Chunk { payload }) => inner.handle_chunk(&**payload),
            Ok(_) => debug!("ignoring non-chunk message on producer stream"),
            Err(e) => {
                warn!(error = %e, "undecodable frame on producer stream");
                return Ok(());
            }
        }
    }
}

/// Replays retained chunks, then forwards live traffic until the client
/// goes away, the queue closes or the gateway shuts down.
fn subscriber_loop(mut stream: TcpStream, inner: &Arc<Inner>) -> Result<()> {
    let subscription = register_subscriber(inner);
    loop {
        if inner.shutdown.load(Ordering::SeqCst) {
            return Ok(());
        }
        match subscription.receiver().recv_timeout(SUBSCRIBER_POLL) {
            Ok(chunk) => {
                let msg = WireMessage::Chunk { payload: &chunk };
                if let Err(e) = write_frame(&mut stream, &msg) {
                    debug!(error = %e, "subscriber went away");
                    return Ok(());
                }
            }
            Err(crossbeam::channel::RecvTimeoutError::Timeout) => continue,
            Err(crossbeam::channel::RecvTimeoutError::Disconnected) => return Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::{Notification, Rule, Sink};
    use crate::auth::TokenSigner;
    use protocol::read_frame;
    use std::sync::Once;
    use std::time::Instant;

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

    fn chunk_payload(n: i64) -> Vec<u8> {
        Frame {
            name: "root".into(),
            value: 0,
            children: vec![Frame::leaf("main", n)],
        }
        .to_json()
        .unwrap()
    }

    fn wait_until(mut cond: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        panic!("condition not reached within deadline");
    }

    fn served(cfg: GatewayConfig, alerts: AlertEngine) -> (Server, SocketAddr) {
        init_tracing();
        let server = Server::new(
            GatewayConfig {
                listen_addr: "127.0.0.1:0".to_string(),
                ..cfg
            },
            alerts,
        )
        .unwrap();
        server.serve().unwrap();
        let addr = server.local_addr().unwrap();
        (server, addr)
    }

    fn client_hello(
        addr: SocketAddr,
        role: Role,
        authorization: Option<&str>,
    ) -> (TcpStream, AlignedVec) {
        let mut stream = TcpStream::connect(addr).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        write_frame(
            &mut stream,
            &WireMessage::Hello {
                role,
                authorization,
            },
        )
        .unwrap();
        let mut buf = AlignedVec::new();
        read_frame(&mut stream, &mut buf).unwrap();
        (stream, buf)
    }

    fn send_chunk(stream: &mut TcpStream, payload: &[u8]) {
        write_frame(stream, &WireMessage::Chunk { payload }).unwrap();
    }

    #[test]
    fn slow_subscriber_drops_while_attentive_one_keeps_up() {
        let cfg = GatewayConfig::builder().subscriber_queue(2).build();
        let server = Server::new(cfg, AlertEngine::new()).unwrap();

        let slow = server.subscribe();
        let attentive = server.subscribe();

        // The attentive consumer drains every chunk; the slow one never
        // reads and loses everything past its queue capacity.
        for n in 0..10 {
            server.ingest(&chunk_payload(n));
            let got = attentive
                .receiver()
                .recv_timeout(Duration::from_secs(1))
                .unwrap();
            assert_eq!(got, chunk_payload(n));
        }

        assert_eq!(slow.receiver().try_iter().count(), 2);
        assert_eq!(slow.dropped(), 8);
        assert!(server.dropped_chunks() >= 8);
    }

    #[test]
    fn late_subscriber_gets_history_then_live() {
        let server = Server::new(GatewayConfig::default(), AlertEngine::new()).unwrap();
        for n in 0..3 {
            server.ingest(&chunk_payload(n));
        }

        let sub = server.subscribe();
        for n in 0..3 {
            let got = sub
                .receiver()
                .recv_timeout(Duration::from_millis(100))
                .unwrap();
            assert_eq!(got, chunk_payload(n));
        }

        server.ingest(&chunk_payload(42));
        let got = sub
            .receiver()
            .recv_timeout(Duration::from_millis(100))
            .unwrap();
        assert_eq!(got, chunk_payload(42));
    }

    #[test]
    fn subscriber_cap_yields_closed_handle() {
        let cfg = GatewayConfig::builder().max_subscribers(1).build();
        let server = Server::new(cfg, AlertEngine::new()).unwrap();

        let _first = server.subscribe();
        let capped = server.subscribe();
        assert!(matches!(
            capped.receiver().recv_timeout(Duration::from_millis(50)),
            Err(crossbeam::channel::RecvTimeoutError::Disconnected)
        ));
        assert_eq!(server.subscriber_count(), 1);
    }

    #[test]
    fn unregister_is_idempotent_and_runs_on_drop() {
        let server = Server::new(GatewayConfig::default(), AlertEngine::new()).unwrap();
        let mut sub = server.subscribe();
        assert_eq!(server.subscriber_count(), 1);
        sub.unregister();
        sub.unregister();
        assert_eq!(server.subscriber_count(), 0);

        let sub2 = server.subscribe();
        assert_eq!(server.subscriber_count(), 1);
        drop(sub2);
        assert_eq!(server.subscriber_count(), 0);
    }

    #[test]
    fn wire_producer_to_wire_subscriber() {
        let (server, addr) = served(GatewayConfig::default(), AlertEngine::new());

        let (mut producer, ack) = client_hello(addr, Role::Producer, None);
        assert!(matches!(
            protocol::access_message(&ack).unwrap(),
            ArchivedWireMessage::HelloAck
        ));

        send_chunk(&mut producer, &chunk_payload(1));
        send_chunk(&mut producer, &chunk_payload(2));
        wait_until(|| server.retained().len() == 2);

        let (mut subscriber, ack) = client_hello(addr, Role::Subscriber, None);
        assert!(matches!(
            protocol::access_message(&ack).unwrap(),
            ArchivedWireMessage::HelloAck
        ));

        send_chunk(&mut producer, &chunk_payload(3));

        let mut buf = AlignedVec::new();
        let mut received = Vec::new();
        for _ in 0..3 {
            read_frame(&mut subscriber, &mut buf).unwrap();
            match protocol::access_message(&buf).unwrap() {
                ArchivedWireMessage::Chunk { payload } => received.push(payload.to_vec()),
                _ => panic!("expected chunk"),
            }
        }
        assert_eq!(
            received,
            vec![chunk_payload(1), chunk_payload(2), chunk_payload(3)]
        );

        server.shutdown();
    }

    #[test]
    fn missing_token_is_unauthenticated() {
        let cfg = GatewayConfig::builder()
            .auth_token("sekrit".to_string())
            .build();
        let (server, addr) = served(cfg, AlertEngine::new());

        let (_stream, reply) = client_hello(addr, Role::Producer, None);
        match protocol::access_message(&reply).unwrap() {
            ArchivedWireMessage::HelloReject { status, .. } => {
                assert_eq!(*status, RejectStatus::Unauthenticated);
            }
            _ => panic!("expected reject"),
        }
        server.shutdown();
    }

    #[test]
    fn wrong_token_is_permission_denied_and_chunks_never_land() {
        let cfg = GatewayConfig::builder()
            .auth_token("sekrit".to_string())
            .build();
        let (server, addr) = served(cfg, AlertEngine::new());
        let watcher = server.subscribe();

        let (mut stream, reply) = client_hello(addr, Role::Producer, Some("Bearer wrong"));
        match protocol::access_message(&reply).unwrap() {
            ArchivedWireMessage::HelloReject { status, .. } => {
                assert_eq!(*status, RejectStatus::PermissionDenied);
            }
            _ => panic!("expected reject"),
        }

        // The stream is dead server-side; whatever we push must not appear
        // in retention or any subscriber queue.
        let _ = write_frame(&mut stream, &WireMessage::Chunk {
            payload: &chunk_payload(9),
        });
        std::thread::sleep(Duration::from_millis(200));
        assert!(server.retained().is_empty());
        assert_eq!(watcher.receiver().try_iter().count(), 0);
        server.shutdown();
    }

    #[test]
    fn valid_static_token_is_accepted() {
        let cfg = GatewayConfig::builder()
            .auth_token("sekrit".to_string())
            .build();
        let (server, addr) = served(cfg, AlertEngine::new());

        let (mut producer, ack) = client_hello(addr, Role::Producer, Some("Bearer sekrit"));
        assert!(matches!(
            protocol::access_message(&ack).unwrap(),
            ArchivedWireMessage::HelloAck
        ));
        send_chunk(&mut producer, &chunk_payload(1));
        wait_until(|| server.retained().len() == 1);
        server.shutdown();
    }

    #[test]
    fn signed_tokens_verify_issuer_over_the_wire() {
        let secret = b"gateway-secret".to_vec();
        let cfg = GatewayConfig::builder()
            .hmac_secret(secret.clone())
            .issuer("flamewire".to_string())
            .build();
        let (server, addr) = served(cfg, AlertEngine::new());

        let good = TokenSigner::new(secret.clone(), "flamewire", Duration::from_secs(60))
            .sign("agent");
        let bearer = format!("Bearer {good}");
        let (_stream, ack) = client_hello(addr, Role::Producer, Some(&bearer));
        assert!(matches!(
            protocol::access_message(&ack).unwrap(),
            ArchivedWireMessage::HelloAck
        ));

        let bad = TokenSigner::new(secret, "impostor", Duration::from_secs(60)).sign("agent");
        let bearer = format!("Bearer {bad}");
        let (_stream, reply) = client_hello(addr, Role::Producer, Some(&bearer));
        match protocol::access_message(&reply).unwrap() {
            ArchivedWireMessage::HelloReject { status, .. } => {
                assert_eq!(*status, RejectStatus::IssuerMismatch);
            }
            _ => panic!("expected reject"),
        }
        server.shutdown();
    }

    #[test]
    fn alerts_fire_from_ingested_chunks() {
        let (tx, rx) = crossbeam::channel::unbounded::<Notification>();
        let mut engine = AlertEngine::new();
        engine.add_rule(
            Rule::new(
                "blocked-high",
                "blocked_goroutines > 150",
                Duration::ZERO,
                vec![Sink::Channel(tx)],
            )
            .unwrap(),
        );
        let server = Server::new(GatewayConfig::default(), engine).unwrap();

        let quiet = Frame {
            name: "root".into(),
            value: 0,
            children: vec![Frame::leaf(flamegraph::BLOCKED_LABEL, 10)],
        };
        server.ingest(&quiet.to_json().unwrap());
        assert!(rx.try_recv().is_err());

        let busy = Frame {
            name: "root".into(),
            value: 0,
            children: vec![Frame::leaf(flamegraph::BLOCKED_LABEL, 200)],
        };
        server.ingest(&busy.to_json().unwrap());
        let fired = rx.try_recv().unwrap();
        assert_eq!(fired.rule, "blocked-high");
    }

    #[test]
    fn undecodable_chunks_do_not_break_ingest() {
        let mut engine = AlertEngine::new();
        engine.add_rule(
            Rule::new("r", "x > 0", Duration::ZERO, vec![Sink::Log]).unwrap(),
        );
        let server = Server::new(GatewayConfig::default(), engine).unwrap();
        let sub = server.subscribe();

        server.ingest(b"definitely not json");
        // Retention and fan-out still saw the opaque bytes.
        assert_eq!(server.retained().len(), 1);
        assert_eq!(
            sub.receiver()
                .recv_timeout(Duration::from_millis(100))
                .unwrap(),
            b"definitely not json".to_vec()
        );
    }

    #[test]
    fn shutdown_stops_accepting() {
        let (server, addr) = served(GatewayConfig::default(), AlertEngine::new());
        server.shutdown();
        server.shutdown();

        // The listener is gone once the accept loop exits.
        wait_until(|| TcpStream::connect(addr).is_err());
    }
}
