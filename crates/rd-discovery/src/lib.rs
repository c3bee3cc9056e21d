//! UDP-broadcast presence service: announces this instance to the local
//! subnet and notifies a listener of peers announcing themselves back.
//!
//! Mirrors the teacher's two-sided discovery shape (an advertiser side and a
//! browser side) but swaps mDNS for a plain broadcast datagram, since nothing
//! here needs service records or TXT metadata — a four-field line is enough.

use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;
use socket2::{Domain, SockAddr, Socket, Type};
use tracing::{debug, info, warn};

use rd_core::{
    DiscoveryConfig, DiscoveryError, DiscoveryInfo, DISCOVERY_BROADCAST_ADDR, DISCOVERY_INTERVAL_MS,
    DISCOVERY_PORT, DISCOVERY_POLL_MS,
};

/// Notified whenever a peer's announcement is received and accepted.
///
/// Held weakly by [`DiscoveryService`] — a listener that has otherwise been
/// dropped is silently skipped rather than kept alive by discovery alone.
pub trait DiscoveryListener: Send + Sync {
    fn on_peer_found(&self, info: DiscoveryInfo);
}

struct Workers {
    should_stop: Arc<AtomicBool>,
    send_thread: JoinHandle<()>,
    recv_thread: JoinHandle<()>,
}

pub struct DiscoveryService {
    config: DiscoveryConfig,
    local_id: u32,
    listener: Arc<Mutex<Option<Weak<dyn DiscoveryListener>>>>,
    workers: Mutex<Option<Workers>>,
}

impl DiscoveryService {
    pub fn new(config: DiscoveryConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            local_id: generate_id(),
            listener: Arc::new(Mutex::new(None)),
            workers: Mutex::new(None),
        })
    }

    pub fn local_id(&self) -> u32 {
        self.local_id
    }

    pub fn set_listener(&self, listener: Weak<dyn DiscoveryListener>) {
        *self.listener.lock() = Some(listener);
    }

    pub fn is_running(&self) -> bool {
        self.workers.lock().is_some()
    }

    pub fn start(&self) -> Result<(), DiscoveryError> {
        if self.workers.lock().is_some() {
            return Ok(());
        }

        let recv_socket = bind_reusable(DISCOVERY_PORT).map_err(DiscoveryError::BindFailed)?;
        recv_socket
            .set_read_timeout(Some(Duration::from_millis(DISCOVERY_POLL_MS)))
            .map_err(DiscoveryError::BindFailed)?;

        let send_socket = UdpSocket::bind(("0.0.0.0", 0)).map_err(DiscoveryError::BroadcastSocketFailed)?;
        send_socket.set_broadcast(true).map_err(DiscoveryError::BroadcastSocketFailed)?;

        let should_stop = Arc::new(AtomicBool::new(false));

        let send_thread = {
            let should_stop = should_stop.clone();
            let message = self.build_message();
            let dest = format!("{DISCOVERY_BROADCAST_ADDR}:{DISCOVERY_PORT}");
            std::thread::spawn(move || {
                while !should_stop.load(Ordering::Relaxed) {
                    if let Err(e) = send_socket.send_to(message.as_bytes(), &dest) {
                        warn!("discovery: broadcast send failed: {e}");
                    }
                    sleep_responsively(Duration::from_millis(DISCOVERY_INTERVAL_MS), &should_stop);
                }
            })
        };

        let recv_thread = {
            let should_stop = should_stop.clone();
            let app_type = self.config.app_type.clone();
            let local_id = self.local_id;
            let listener = self.listener.clone();
            std::thread::spawn(move || {
                let mut buf = [0u8; 256];
                while !should_stop.load(Ordering::Relaxed) {
                    match recv_socket.recv_from(&mut buf) {
                        Ok((n, addr)) => {
                            let current = listener.lock().clone();
                            handle_datagram(&buf[..n], addr.ip(), &app_type, local_id, current.as_ref());
                        }
                        Err(e)
                            if e.kind() == std::io::ErrorKind::WouldBlock
                                || e.kind() == std::io::ErrorKind::TimedOut => {}
                        Err(e) => warn!("discovery: recv failed: {e}"),
                    }
                }
            })
        };

        *self.workers.lock() = Some(Workers { should_stop, send_thread, recv_thread });
        info!("discovery started: type={} id={} port={}", self.config.app_type, self.local_id, self.config.advertised_port);
        Ok(())
    }

    pub fn stop(&self) {
        let Some(workers) = self.workers.lock().take() else { return };
        workers.should_stop.store(true, Ordering::Relaxed);
        let _ = workers.send_thread.join();
        let _ = workers.recv_thread.join();
    }

    fn build_message(&self) -> String {
        format!("{}|{}|{}|{}", self.config.app_type, self.local_id, self.config.advertised_port, self.config.version)
    }
}

impl Drop for DiscoveryService {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Binds a UDP socket with `SO_REUSEADDR` (and `SO_REUSEPORT` on Linux) set
/// before `bind`, so two instances on the same host can each listen on
/// `port` and both receive broadcasts (§8 Scenario S4). `std::net::UdpSocket`
/// has no way to set these flags pre-bind.
fn bind_reusable(port: u16) -> std::io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, None)?;
    socket.set_reuse_address(true)?;
    #[cfg(target_os = "linux")]
    socket.set_reuse_port(true)?;
    let addr = SocketAddr::from((std::net::Ipv4Addr::UNSPECIFIED, port));
    socket.bind(&SockAddr::from(addr))?;
    Ok(socket.into())
}

fn sleep_responsively(total: Duration, should_stop: &AtomicBool) {
    const STEP: Duration = Duration::from_millis(50);
    let mut remaining = total;
    while remaining > Duration::ZERO {
        if should_stop.load(Ordering::Relaxed) {
            return;
        }
        let step = remaining.min(STEP);
        std::thread::sleep(step);
        remaining -= step;
    }
}

/// `type|id|port|version`; tolerates fragments shorter than four fields by
/// failing the parse rather than panicking.
fn parse_message(payload: &str) -> Option<(String, u32, u16, String)> {
    let mut parts = payload.splitn(4, '|');
    let app_type = parts.next()?.to_owned();
    let id: u32 = parts.next()?.parse().ok()?;
    let port: u16 = parts.next()?.parse().ok()?;
    let version = parts.next()?.to_owned();
    Some((app_type, id, port, version))
}

fn handle_datagram(
    buf: &[u8],
    source_ip: IpAddr,
    self_type: &str,
    self_id: u32,
    listener: Option<&Weak<dyn DiscoveryListener>>,
) {
    let Ok(text) = std::str::from_utf8(buf) else {
        warn!("discovery: non-utf8 datagram ignored");
        return;
    };
    let Some((app_type, id, port, version)) = parse_message(text) else {
        warn!("discovery: malformed datagram ignored: {text:?}");
        return;
    };
    if id == self_id || app_type != self_type {
        debug!("discovery: discarding self-echo or foreign-app datagram (type={app_type}, id={id})");
        return;
    }
    let Some(listener) = listener else { return };
    let Some(listener) = listener.upgrade() else {
        debug!("discovery: listener released, dropping peer announcement");
        return;
    };
    listener.on_peer_found(DiscoveryInfo { app_type, id, ip: source_ip, port, version });
}

/// Process-unique-enough 32-bit id, mixed from wall clock, pid, and a static
/// counter so two services created back to back never collide.
fn generate_id() -> u32 {
    static COUNTER: AtomicU32 = AtomicU32::new(0);
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    let pid = std::process::id();
    let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
    splitmix32(nanos ^ pid.rotate_left(16) ^ seq.wrapping_mul(0x9E37_79B9))
}

fn splitmix32(mut x: u32) -> u32 {
    x = x.wrapping_add(0x9E37_79B9);
    let mut z = x;
    z = (z ^ (z >> 16)).wrapping_mul(0x85EB_CA6B);
    z = (z ^ (z >> 13)).wrapping_mul(0xC2B2_AE35);
    z ^ (z >> 16)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn parses_well_formed_message() {
        let parsed = parse_message("remote-desk|42|9001|1.0.0").unwrap();
        assert_eq!(parsed, ("remote-desk".to_owned(), 42, 9001, "1.0.0".to_owned()));
    }

    #[test]
    fn rejects_short_fragment() {
        assert!(parse_message("remote-desk|42").is_none());
    }

    #[test]
    fn rejects_non_numeric_id() {
        assert!(parse_message("remote-desk|nope|9001|1.0.0").is_none());
    }

    struct CountingListener {
        count: AtomicUsize,
        last: Mutex<Option<DiscoveryInfo>>,
    }

    impl DiscoveryListener for CountingListener {
        fn on_peer_found(&self, info: DiscoveryInfo) {
            self.count.fetch_add(1, Ordering::SeqCst);
            *self.last.lock() = Some(info);
        }
    }

    #[test]
    fn self_echo_is_discarded() {
        let listener = Arc::new(CountingListener { count: AtomicUsize::new(0), last: Mutex::new(None) });
        let weak: Weak<dyn DiscoveryListener> = Arc::downgrade(&listener) as Weak<dyn DiscoveryListener>;
        handle_datagram(b"remote-desk|7|9001|1.0.0", "127.0.0.1".parse().unwrap(), "remote-desk", 7, Some(&weak));
        assert_eq!(listener.count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn cross_application_datagram_is_discarded() {
        let listener = Arc::new(CountingListener { count: AtomicUsize::new(0), last: Mutex::new(None) });
        let weak: Weak<dyn DiscoveryListener> = Arc::downgrade(&listener) as Weak<dyn DiscoveryListener>;
        handle_datagram(b"other-app|7|9001|1.0.0", "127.0.0.1".parse().unwrap(), "remote-desk", 99, Some(&weak));
        assert_eq!(listener.count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn accepted_peer_notifies_listener_with_source_ip() {
        let listener = Arc::new(CountingListener { count: AtomicUsize::new(0), last: Mutex::new(None) });
        let weak: Weak<dyn DiscoveryListener> = Arc::downgrade(&listener) as Weak<dyn DiscoveryListener>;
        handle_datagram(b"remote-desk|7|9002|1.0.0", "192.168.1.5".parse().unwrap(), "remote-desk", 99, Some(&weak));
        assert_eq!(listener.count.load(Ordering::SeqCst), 1);
        let last = listener.last.lock().clone().unwrap();
        assert_eq!(last.id, 7);
        assert_eq!(last.port, 9002);
        assert_eq!(last.ip, "192.168.1.5".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn released_listener_is_silently_skipped() {
        let listener = Arc::new(CountingListener { count: AtomicUsize::new(0), last: Mutex::new(None) });
        let weak: Weak<dyn DiscoveryListener> = Arc::downgrade(&listener) as Weak<dyn DiscoveryListener>;
        drop(listener);
        handle_datagram(b"remote-desk|7|9002|1.0.0", "192.168.1.5".parse().unwrap(), "remote-desk", 99, Some(&weak));
    }

    #[test]
    fn generated_ids_are_distinct_across_calls() {
        let a = generate_id();
        let b = generate_id();
        assert_ne!(a, b);
    }

    /// Two instances bound to the same port on the same host (§8 Scenario
    /// S4) — the second `bind_reusable` must succeed instead of EADDRINUSE.
    #[test]
    fn two_sockets_can_share_the_discovery_port() {
        let first = bind_reusable(DISCOVERY_PORT + 100).expect("first bind");
        let second = bind_reusable(DISCOVERY_PORT + 100).expect("second bind must not EADDRINUSE");
        drop(first);
        drop(second);
    }

    #[test]
    fn listener_installed_after_start_still_receives_peers() {
        let service = DiscoveryService::new(DiscoveryConfig {
            app_type: "remote-desk".to_owned(),
            advertised_port: 9100,
            version: "1.0.0".to_owned(),
        });
        service.start().expect("start");

        let listener = Arc::new(CountingListener { count: AtomicUsize::new(0), last: Mutex::new(None) });
        let weak: Weak<dyn DiscoveryListener> = Arc::downgrade(&listener) as Weak<dyn DiscoveryListener>;
        service.set_listener(weak);

        let current = service.listener.lock().clone();
        handle_datagram(b"remote-desk|7|9002|1.0.0", "192.168.1.5".parse().unwrap(), "remote-desk", 99, current.as_ref());
        assert_eq!(listener.count.load(Ordering::SeqCst), 1);

        service.stop();
    }
}
