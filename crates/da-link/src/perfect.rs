//! Perfect link: stubborn link plus upward deduplication, giving
//! at-most-once delivery per `(origin_pid, seq_id)` on top of the
//! at-least-once guarantee underneath.
//!
//! The delivered-set is sharded by origin process id so that bursts of
//! traffic from different senders don't serialize on one lock.

use std::collections::HashSet;
use std::net::UdpSocket as StdUdpSocket;
use std::sync::{Arc, Mutex, Weak};

use da_common::error::DaError;
use da_common::hosts::HostSet;
use da_io::{bind_connected_udp, ReadinessLoop, WorkerPool};
use da_wire::Packet;
use mio::net::UdpSocket as MioUdpSocket;
use mio::Interest;

use crate::stubborn::StubbornLink;

/// Invoked once per newly-delivered (deduplicated) DATA packet.
pub type UpwardDeliverFn = Arc<dyn Fn(Packet) + Send + Sync>;

/// Invoked on *every* inbound DATA packet, tagged with the peer whose
/// stubborn link physically delivered it, bypassing the dedup gate that
/// guards `on_deliver`. URB is the one consumer of this: majority-ack
/// quorum counting needs to tell apart independent echoes of the same
/// `(origin_pid, seq_id)` arriving from distinct peers, which a callback
/// that fires at most once globally cannot support. See `DESIGN.md` for
/// the full rationale. Idempotent per-peer bookkeeping downstream (a
/// `HashSet<u64>` of contributing peers) absorbs the fact that a single
/// peer's stubborn-link retransmissions make this fire more than once for
/// the same `(peer, origin_pid, seq_id)`.
pub type PeerEchoFn = Arc<dyn Fn(u64, Packet) + Send + Sync>;

pub struct PerfectLink {
    self_id: u64,
    links: Mutex<std::collections::HashMap<u64, Arc<StubbornLink>>>,
    delivered: Vec<Mutex<HashSet<(u64, u32)>>>,
    on_deliver: UpwardDeliverFn,
    on_peer_echo: Option<PeerEchoFn>,
}

impl PerfectLink {
    /// Build one stubborn link per peer in `hosts` (excluding `self_id`),
    /// bind its socket, and register it for read dispatch on `readiness`.
    /// Uses `Arc::new_cyclic` so each stubborn link's delivery callback can
    /// hold a `Weak<PerfectLink>` back-reference without a reference
    /// cycle, and can therefore call back into `deliver_packet` for
    /// dedup on every inbound DATA packet.
    pub fn new(
        self_id: u64,
        hosts: &HostSet,
        readiness: &ReadinessLoop,
        write_pool: Arc<WorkerPool>,
        on_deliver: UpwardDeliverFn,
    ) -> Result<Arc<Self>, DaError> {
        Self::new_with_echo_hook(self_id, hosts, readiness, write_pool, on_deliver, None)
    }

    /// As [`new`](Self::new), plus a [`PeerEchoFn`] invoked on every raw
    /// inbound DATA arrival. Only URB needs this; every other consumer
    /// should keep using `new`.
    pub fn new_with_echo_hook(
        self_id: u64,
        hosts: &HostSet,
        readiness: &ReadinessLoop,
        write_pool: Arc<WorkerPool>,
        on_deliver: UpwardDeliverFn,
        on_peer_echo: Option<PeerEchoFn>,
    ) -> Result<Arc<Self>, DaError> {
        let self_host = hosts
            .get(self_id)
            .ok_or_else(|| DaError::resource_acquisition("own host id not present in host set"))?;
        let local_addr = std::net::SocketAddr::new(self_host.ip.into(), self_host.port);

        let shard_count = hosts.len().max(1);
        let delivered = (0..shard_count).map(|_| Mutex::new(HashSet::new())).collect();

        let perfect = Arc::new_cyclic(|weak: &Weak<PerfectLink>| {
            let mut links = std::collections::HashMap::new();
            for peer in hosts.peers_excluding(self_id) {
                let peer_addr = std::net::SocketAddr::new(peer.ip.into(), peer.port);
                let socket = match bind_connected_udp(local_addr, peer_addr) {
                    Ok(s) => s,
                    Err(err) => {
                        tracing::error!(peer = peer.id, ?err, "failed to bind peer socket");
                        continue;
                    }
                };
                let read_clone = match socket.try_clone() {
                    Ok(s) => s,
                    Err(err) => {
                        tracing::error!(peer = peer.id, ?err, "failed to clone peer socket");
                        continue;
                    }
                };

                let weak_for_callback = weak.clone();
                let peer_id = peer.id;
                let link = StubbornLink::new(
                    self_id,
                    peer.id,
                    socket,
                    write_pool.clone(),
                    Arc::new(move |pkt: Packet| {
                        if let Some(perfect) = weak_for_callback.upgrade() {
                            if pkt.is_data() {
                                if let Some(echo) = perfect.on_peer_echo.as_ref() {
                                    echo(peer_id, pkt.clone());
                                }
                            }
                            perfect.deliver_packet(pkt);
                        }
                    }),
                );

                register_read_side(readiness, &link, read_clone, peer.id);
                links.insert(peer.id, link);
            }

            PerfectLink {
                self_id,
                links: Mutex::new(links),
                delivered,
                on_deliver,
                on_peer_echo,
            }
        });

        Ok(perfect)
    }

    /// `pl_send`: hand a packet to the named peer's stubborn link.
    pub fn send(&self, peer_id: u64, packet: Packet) -> Result<(), DaError> {
        let link = {
            let links = self.links.lock().expect("links mutex poisoned");
            links.get(&peer_id).cloned()
        };
        match link {
            Some(link) => link.send(vec![packet]),
            None => Err(DaError::resource_acquisition(format!(
                "no perfect link registered for peer {peer_id}"
            ))),
        }
    }

    /// `pl_send` broadcast to every known peer, including self-delivery —
    /// used by higher layers (URB/FIFO) that treat the broadcaster as one
    /// of the recipients of its own message.
    pub fn send_all(&self, packet: Packet) {
        let links: Vec<_> = self
            .links
            .lock()
            .expect("links mutex poisoned")
            .values()
            .cloned()
            .collect();
        for link in links {
            if let Err(err) = link.send(vec![packet.clone()]) {
                tracing::warn!(peer = link.peer_id(), ?err, "send_all failed for peer");
            }
        }
    }

    /// Deduplicate and deliver a DATA packet exactly once per
    /// `(origin_pid, seq_id)`. Called from a stubborn link's delivery
    /// callback, so `on_deliver` must not block.
    fn deliver_packet(&self, pkt: Packet) {
        let (origin, seq) = pkt.key();
        let shard = shard_index(origin, self.delivered.len());
        let first_time = {
            let mut shard_set = self.delivered[shard].lock().expect("delivered shard poisoned");
            shard_set.insert((origin, seq))
        };
        if first_time {
            (self.on_deliver)(pkt);
        }
    }

    pub fn self_id(&self) -> u64 {
        self.self_id
    }

    pub fn stop(&self) {
        for link in self.links.lock().expect("links mutex poisoned").values() {
            link.stop();
        }
    }
}

fn shard_index(origin_pid: u64, shard_count: usize) -> usize {
    ((origin_pid.saturating_sub(1)) as usize) % shard_count.max(1)
}

fn register_read_side(
    readiness: &ReadinessLoop,
    link: &Arc<StubbornLink>,
    read_clone: StdUdpSocket,
    peer_id: u64,
) {
    let mio_socket: MioUdpSocket = MioUdpSocket::from_std(read_clone);
    let socket_handle = Arc::new(Mutex::new(mio_socket));
    let link_for_handler = link.clone();
    if let Err(err) = readiness.register(socket_handle, Interest::READABLE, move |_token| {
        let mut buf = [0u8; 65536];
        loop {
            let recv_result = {
                let guard = link_for_handler.socket();
                guard.recv(&mut buf)
            };
            match recv_result {
                Ok(n) => link_for_handler.on_datagram(&buf[..n]),
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(err) => {
                    tracing::warn!(peer = peer_id, ?err, "read side recv error");
                    break;
                }
            }
        }
    }) {
        tracing::error!(peer = peer_id, ?err, "failed to register peer socket with readiness loop");
    }
}
