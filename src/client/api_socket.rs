//! API socket transport (§4.11): a length-prefixed protocol server accepting
//! multiple concurrent `UnixStream` connections behind one listener, each
//! becoming one client in the multiplexer. Grounded on the teacher's
//! per-connection-task-feeding-one-channel shape (`simulation/node_task.rs`);
//! the actual framing follows §6's `{u32 type, u32 data_len}` header.

use std::io::{Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::Path;
use std::sync::Arc;
use std::thread;

use crate::engine::delivery::TxStatusReport;
use crate::engine::station::Mac;

use super::netlink::wire;
use super::{ClientId, ClientTransport, IngressSink};

/// Hard cap on `data_len` (§4.8): 1 MiB.
pub const MAX_PAYLOAD_LEN: u32 = 1 << 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum MessageType {
    Register = 0,
    Unregister = 1,
    Netlink = 2,
    Ack = 3,
    Invalid = 4,
}

impl MessageType {
    fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(Self::Register),
            1 => Some(Self::Unregister),
            2 => Some(Self::Netlink),
            3 => Some(Self::Ack),
            4 => Some(Self::Invalid),
            _ => None,
        }
    }
}

fn read_header(stream: &mut UnixStream) -> std::io::Result<(u32, u32)> {
    let mut hdr = [0u8; 8];
    stream.read_exact(&mut hdr)?;
    let msg_type = u32::from_ne_bytes(hdr[0..4].try_into().unwrap());
    let data_len = u32::from_ne_bytes(hdr[4..8].try_into().unwrap());
    Ok((msg_type, data_len))
}

fn write_header(stream: &mut UnixStream, msg_type: MessageType, data_len: u32) -> std::io::Result<()> {
    let mut out = Vec::with_capacity(8);
    out.extend_from_slice(&(msg_type as u32).to_ne_bytes());
    out.extend_from_slice(&data_len.to_ne_bytes());
    stream.write_all(&out)
}

/// One connection's `ClientTransport` impl: `NETLINK`-typed egress/TX-status
/// is framed the same way as ingress, through a cloned stream handle.
pub struct ApiSocketClient {
    stream: std::sync::Mutex<UnixStream>,
}

impl ClientTransport for ApiSocketClient {
    fn send_egress(&self, frame: &super::EgressFrame) -> std::io::Result<()> {
        let payload = super::netlink::wire::encode_ingress(&crate::engine::IngressFrame {
            transmitter_hwaddr: frame.receiver_hwaddr,
            data: frame.data.clone(),
            flags: 0,
            tx_rates: [crate::engine::frame::TxRate::TERMINATOR; crate::engine::frame::N_RATES],
            cookie: 0,
            freq: Some(frame.freq),
        })?;
        let mut stream = self.stream.lock().unwrap();
        write_header(&mut stream, MessageType::Netlink, payload.len() as u32)?;
        stream.write_all(&payload)
    }

    fn send_tx_status(&self, report: &TxStatusReport, transmitter_hwaddr: Mac, _receiver_hwaddr: Mac) -> std::io::Result<()> {
        let payload = wire::encode_tx_status(report, transmitter_hwaddr)?;
        let mut stream = self.stream.lock().unwrap();
        write_header(&mut stream, MessageType::Netlink, payload.len() as u32)?;
        stream.write_all(&payload)
    }
}

/// Accept loop: spawns a thread per connection, each running its own
/// request/response cycle (§4.11: "strictly request/response, no
/// pipelining"). `on_connect` registers the new client and returns its id;
/// `on_disconnect` reaps it.
pub fn serve(
    path: &Path,
    sink: IngressSink,
    on_connect: impl Fn(Box<dyn ClientTransport>) -> ClientId + Send + Sync + 'static,
    on_register: impl Fn(ClientId, bool) + Send + Sync + 'static,
    on_disconnect: impl Fn(ClientId) + Send + Sync + 'static,
) -> std::io::Result<()> {
    let _ = std::fs::remove_file(path);
    let listener = UnixListener::bind(path)?;
    let on_register = Arc::new(on_register);
    let on_disconnect = Arc::new(on_disconnect);

    for incoming in listener.incoming() {
        let stream = incoming?;
        let sink = sink.clone();
        let reply_stream = stream.try_clone()?;
        let transport: Box<dyn ClientTransport> = Box::new(ApiSocketClient {
            stream: std::sync::Mutex::new(reply_stream),
        });
        let client_id = on_connect(transport);
        handle_connection(stream, client_id, sink, Arc::clone(&on_register), Arc::clone(&on_disconnect));
    }
    Ok(())
}

fn handle_connection(
    mut stream: UnixStream,
    client_id: ClientId,
    sink: IngressSink,
    on_register: Arc<dyn Fn(ClientId, bool) + Send + Sync>,
    on_disconnect: Arc<dyn Fn(ClientId) + Send + Sync>,
) {
    thread::spawn(move || {
        loop {
            let (msg_type, data_len) = match read_header(&mut stream) {
                Ok(hdr) => hdr,
                Err(_) => break,
            };
            if data_len > MAX_PAYLOAD_LEN {
                let _ = write_header(&mut stream, MessageType::Invalid, 0);
                break;
            }
            let mut payload = vec![0u8; data_len as usize];
            if stream.read_exact(&mut payload).is_err() {
                break;
            }

            let Some(msg_type) = MessageType::from_u32(msg_type) else {
                let _ = write_header(&mut stream, MessageType::Invalid, 0);
                continue;
            };

            match msg_type {
                MessageType::Register => {
                    on_register(client_id, true);
                    let _ = write_header(&mut stream, MessageType::Ack, 0);
                }
                MessageType::Unregister => {
                    on_register(client_id, false);
                    let _ = write_header(&mut stream, MessageType::Ack, 0);
                }
                MessageType::Netlink => match wire::decode_ingress(&payload) {
                    Some(frame) => {
                        sink.push(client_id, frame);
                        let _ = write_header(&mut stream, MessageType::Ack, 0);
                    }
                    None => {
                        let _ = write_header(&mut stream, MessageType::Invalid, 0);
                    }
                },
                MessageType::Ack | MessageType::Invalid => {
                    let _ = write_header(&mut stream, MessageType::Invalid, 0);
                }
            }
        }
        on_disconnect(client_id);
    });
}
