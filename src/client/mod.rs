//! Client multiplexer (C8): tracks connected clients across the three
//! transport variants, routes ingress into the engine and egress/TX-status
//! back out, and reaps a disconnected client's in-flight frames.
//!
//! Each transport variant (kernel netlink, vhost-user, API socket) runs its
//! own I/O on its own thread and feeds the engine through a single bounded
//! channel, mirroring the teacher's "independent tasks feeding one
//! coordinating task" shape (`simulation/node_task.rs`).

pub mod api_socket;
pub mod netlink;
pub mod vhost_user;

use std::collections::HashSet;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Channel, Sender};

use crate::engine::delivery::TxStatusReport;
use crate::engine::station::Mac;
use crate::engine::IngressFrame;

pub type ClientId = usize;

/// One event queued for the engine: either a submitted frame or a transport
/// telling the event loop one of its clients went away. Disconnect notices
/// travel through this same channel (rather than being applied directly by
/// the transport thread) so `Engine::disconnect_client`'s scheduler cleanup
/// only ever runs on the single engine-owning task, per §5.
pub enum IngressEvent {
    Frame { client: ClientId, frame: IngressFrame },
    Disconnected { client: ClientId },
}

/// Capacity of the ingress channel feeding the event loop (C10). Transport
/// threads call `try_send`; a full channel means the event loop has fallen
/// badly behind, at which point the frame is dropped and logged rather than
/// blocking the transport thread.
pub const INGRESS_CHANNEL_CAPACITY: usize = 1024;

/// Single-consumer channel from every transport's connection threads into
/// the event loop, mirroring the teacher's `UIRefreshQueue`/`UICommandQueue`
/// shape: a `'static`-leaked `embassy_sync::channel::Channel` shared across
/// OS threads via `Sender`/`Receiver` handles.
pub type IngressChannel = Channel<CriticalSectionRawMutex, IngressEvent, INGRESS_CHANNEL_CAPACITY>;
pub type IngressChannelSender = Sender<'static, CriticalSectionRawMutex, IngressEvent, INGRESS_CHANNEL_CAPACITY>;
pub type IngressChannelReceiver = embassy_sync::channel::Receiver<'static, CriticalSectionRawMutex, IngressEvent, INGRESS_CHANNEL_CAPACITY>;

/// A frame ready to publish to a receiver's bound (or broadcast) client.
#[derive(Debug, Clone)]
pub struct EgressFrame {
    pub receiver_hwaddr: Mac,
    pub freq: u32,
    pub signal: i32,
    pub data: Vec<u8>,
}

/// What a connected client can be sent. Implemented once per transport
/// variant (§4.10, §4.11); the engine never distinguishes between them.
pub trait ClientTransport: Send {
    fn send_egress(&self, frame: &EgressFrame) -> std::io::Result<()>;
    fn send_tx_status(&self, report: &TxStatusReport, transmitter_hwaddr: Mac, receiver_hwaddr: Mac) -> std::io::Result<()>;
}

struct ClientEntry {
    transport: Box<dyn ClientTransport>,
    /// Clients joining the broadcast set (API socket `REGISTER`, or any
    /// connection whose destination station has no bound client) receive
    /// every frame with no explicit receiver binding.
    broadcast: bool,
}

/// Owns every connected client and the broadcast set (§4.8's "published to
/// every client currently in the broadcast set").
#[derive(Default)]
pub struct ClientRegistry {
    clients: Vec<Option<ClientEntry>>,
    broadcast_set: HashSet<ClientId>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect(&mut self, transport: Box<dyn ClientTransport>, broadcast: bool) -> ClientId {
        let id = self.clients.len();
        self.clients.push(Some(ClientEntry { transport, broadcast }));
        if broadcast {
            self.broadcast_set.insert(id);
        }
        id
    }

    pub fn register_broadcast(&mut self, id: ClientId) {
        if let Some(Some(entry)) = self.clients.get_mut(id) {
            entry.broadcast = true;
        }
        self.broadcast_set.insert(id);
    }

    pub fn unregister_broadcast(&mut self, id: ClientId) {
        if let Some(Some(entry)) = self.clients.get_mut(id) {
            entry.broadcast = false;
        }
        self.broadcast_set.remove(&id);
    }

    /// Disconnects a client: removes it from the registry and the broadcast
    /// set. Caller is responsible for also calling `Engine::disconnect_client`.
    pub fn disconnect(&mut self, id: ClientId) {
        if let Some(slot) = self.clients.get_mut(id) {
            *slot = None;
        }
        self.broadcast_set.remove(&id);
    }

    /// Delivers to `bound` if given, else fans out to every broadcast client.
    pub fn deliver(&self, bound: Option<ClientId>, frame: &EgressFrame) {
        match bound {
            Some(id) => {
                if let Some(Some(entry)) = self.clients.get(id) {
                    if let Err(err) = entry.transport.send_egress(frame) {
                        log::warn!("egress delivery to client {id} failed: {err}");
                    }
                }
            }
            None => {
                for &id in &self.broadcast_set {
                    if let Some(Some(entry)) = self.clients.get(id) {
                        if let Err(err) = entry.transport.send_egress(frame) {
                            log::warn!("broadcast delivery to client {id} failed: {err}");
                        }
                    }
                }
            }
        }
    }

    pub fn report_tx_status(&self, client: ClientId, report: &TxStatusReport, transmitter_hwaddr: Mac, receiver_hwaddr: Mac) {
        if let Some(Some(entry)) = self.clients.get(client) {
            if let Err(err) = entry.transport.send_tx_status(report, transmitter_hwaddr, receiver_hwaddr) {
                log::warn!("TX-status report to client {client} failed: {err}");
            }
        }
    }
}

/// Handle returned to a transport's I/O thread: lets it push decoded ingress
/// events into the single-consumer channel the event loop drains.
#[derive(Clone, Copy)]
pub struct IngressSink {
    tx: IngressChannelSender,
}

impl IngressSink {
    pub fn new(tx: IngressChannelSender) -> Self {
        Self { tx }
    }

    pub fn push(&self, client: ClientId, frame: IngressFrame) {
        if self.tx.try_send(IngressEvent::Frame { client, frame }).is_err() {
            log::error!("ingress channel full, dropping frame from client {client}");
        }
    }

    pub fn notify_disconnect(&self, client: ClientId) {
        if self.tx.try_send(IngressEvent::Disconnected { client }).is_err() {
            log::error!("ingress channel full, dropping disconnect notice for client {client}");
        }
    }
}

/// Lets a transport shared behind an `Arc` (e.g. the single kernel-netlink
/// connection, referenced by both the registry and its receive-loop thread)
/// stand in for `Box<dyn ClientTransport>`.
impl<T: ClientTransport + ?Sized> ClientTransport for std::sync::Arc<T> {
    fn send_egress(&self, frame: &EgressFrame) -> std::io::Result<()> {
        (**self).send_egress(frame)
    }

    fn send_tx_status(&self, report: &TxStatusReport, transmitter_hwaddr: Mac, receiver_hwaddr: Mac) -> std::io::Result<()> {
        (**self).send_tx_status(report, transmitter_hwaddr, receiver_hwaddr)
    }
}
