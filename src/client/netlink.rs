//! Kernel netlink transport (§4.10): the singleton generic-netlink
//! connection to the `MAC80211_HWSIM` driver family. Grounded on
//! `examples/jbaublitz-neli`'s own `consts::mac80211_hwsim` module (the
//! crate already ships the attribute/command IDs this driver uses) and on
//! the NLA-alignment helper in the AOSP netsim `hwsim_attr_set.rs` file.

use std::iter::once;
use std::sync::Mutex;

use neli::consts::mac80211_hwsim::{Mac80211HwsimAttr, Mac80211HwsimCmd};
use neli::consts::nl::NlmF;
use neli::consts::socket::NlFamily;
use neli::err::RouterError;
use neli::genl::{AttrTypeBuilder, Genlmsghdr, GenlmsghdrBuilder, NlattrBuilder};
use neli::nl::NlPayload;
use neli::router::synchronous::NlRouter;
use neli::types::{Buffer, GenlBuffer};
use neli::utils::Groups;

use crate::engine::delivery::TxStatusReport;
use crate::engine::frame::{TxRate, N_RATES};
use crate::engine::station::Mac;
use crate::engine::IngressFrame;

use super::{ClientTransport, IngressSink};

const FAMILY_NAME: &str = "MAC80211_HWSIM";
const VERSION_NR: u8 = 1;

type HwsimMsg = Genlmsghdr<Mac80211HwsimCmd, Mac80211HwsimAttr>;

fn attr<P: neli::Size + neli::ToBytes>(nla_type: Mac80211HwsimAttr, payload: P) -> Result<neli::genl::Nlattr<Mac80211HwsimAttr, Buffer>, std::io::Error> {
    NlattrBuilder::default()
        .nla_type(AttrTypeBuilder::default().nla_type(nla_type).build().map_err(to_io)?)
        .nla_payload(payload)
        .build()
        .map_err(to_io)
}

fn to_io<E: std::fmt::Display>(err: E) -> std::io::Error {
    std::io::Error::other(err.to_string())
}

/// Decodes one `HWSIM_CMD_FRAME` message into the ingress shape the engine
/// consumes. Unknown attribute IDs are skipped, not fatal (§7 Protocol error).
fn decode_frame(msg: &HwsimMsg) -> Option<IngressFrame> {
    if *msg.cmd() != Mac80211HwsimCmd::Frame {
        return None;
    }
    let attrs = msg.attrs().get_attr_handle::<Mac80211HwsimAttr>().ok()?;

    let transmitter_hwaddr: Mac = attrs.get_attribute(Mac80211HwsimAttr::AddrTransmitter)?.get_payload_as::<Mac>().ok()?;
    let data: Vec<u8> = attrs
        .get_attribute(Mac80211HwsimAttr::Frame)?
        .get_payload_as::<Buffer>()
        .ok()?
        .as_ref()
        .to_vec();
    let flags: u32 = attrs.get_attribute(Mac80211HwsimAttr::Flags).and_then(|a| a.get_payload_as::<u32>().ok()).unwrap_or(0);
    let cookie: u64 = attrs.get_attribute(Mac80211HwsimAttr::Cookie).and_then(|a| a.get_payload_as::<u64>().ok()).unwrap_or(0);
    let freq: Option<u32> = attrs.get_attribute(Mac80211HwsimAttr::Freq).and_then(|a| a.get_payload_as::<u32>().ok());

    let tx_rates = decode_tx_info(&attrs);

    Some(IngressFrame {
        transmitter_hwaddr,
        data,
        flags,
        tx_rates,
        cookie,
        freq,
    })
}

fn decode_tx_info(attrs: &neli::attr::AttrHandle<'_, GenlBuffer<Mac80211HwsimAttr, Buffer>, neli::genl::Nlattr<Mac80211HwsimAttr, Buffer>>) -> [TxRate; N_RATES] {
    let mut rows = [TxRate::TERMINATOR; N_RATES];
    if let Some(tx_info) = attrs.get_attribute(Mac80211HwsimAttr::TxInfo) {
        let raw = tx_info.payload().as_ref();
        for (i, chunk) in raw.chunks_exact(2).take(N_RATES).enumerate() {
            rows[i] = TxRate {
                idx: chunk[0] as i8,
                count: chunk[1],
            };
        }
    }
    rows
}

fn build_tx_info_frame(report: &TxStatusReport, transmitter_hwaddr: Mac) -> Result<HwsimMsg, std::io::Error> {
    let mut raw = Vec::with_capacity(N_RATES * 2);
    for row in report.tx_rates.iter() {
        raw.push(row.idx as u8);
        raw.push(row.count);
    }

    let attrs: GenlBuffer<Mac80211HwsimAttr, Buffer> = vec![
        attr(Mac80211HwsimAttr::AddrTransmitter, transmitter_hwaddr)?,
        attr(Mac80211HwsimAttr::Flags, report.flags)?,
        attr(Mac80211HwsimAttr::TxInfo, Buffer::from(raw))?,
        attr(Mac80211HwsimAttr::Signal, report.signal)?,
        attr(Mac80211HwsimAttr::Cookie, report.cookie)?,
    ]
    .into_iter()
    .collect();

    GenlmsghdrBuilder::default()
        .cmd(Mac80211HwsimCmd::TxInfoFrame)
        .version(VERSION_NR)
        .attrs(attrs)
        .build()
        .map_err(to_io)
}

fn build_frame_message(frame: &super::EgressFrame, transmitter_hwaddr: Mac) -> Result<HwsimMsg, std::io::Error> {
    let attrs: GenlBuffer<Mac80211HwsimAttr, Buffer> = vec![
        attr(Mac80211HwsimAttr::AddrReceiver, frame.receiver_hwaddr)?,
        attr(Mac80211HwsimAttr::AddrTransmitter, transmitter_hwaddr)?,
        attr(Mac80211HwsimAttr::Frame, Buffer::from(frame.data.clone()))?,
        attr(Mac80211HwsimAttr::RxRate, 0u32)?,
        attr(Mac80211HwsimAttr::Signal, frame.signal)?,
        attr(Mac80211HwsimAttr::Freq, frame.freq)?,
    ]
    .into_iter()
    .collect();

    GenlmsghdrBuilder::default()
        .cmd(Mac80211HwsimCmd::Frame)
        .version(VERSION_NR)
        .attrs(attrs)
        .build()
        .map_err(to_io)
}

/// The single kernel-netlink client. `transmitter_hwaddr` tracks the last
/// address the kernel told us about per receiver via `addr2` binding; the
/// engine passes it back through `Station::hwaddr` so callers don't need to
/// thread it separately.
pub struct KernelNetlinkClient {
    router: Mutex<NlRouter>,
    family_id: u16,
}

impl KernelNetlinkClient {
    /// Connects, resolves the `MAC80211_HWSIM` family, and sends
    /// `HWSIM_CMD_REGISTER` to join the broadcast group.
    pub fn connect() -> Result<Self, std::io::Error> {
        let (router, _) = NlRouter::connect(NlFamily::Generic, None, Groups::empty()).map_err(to_io)?;
        let family_id = router.resolve_genl_family(FAMILY_NAME).map_err(to_io)?;

        let register: HwsimMsg = GenlmsghdrBuilder::default()
            .cmd(Mac80211HwsimCmd::Register)
            .version(VERSION_NR)
            .attrs(GenlBuffer::new())
            .build()
            .map_err(to_io)?;
        let _: Result<neli::router::synchronous::NlRouterReceiverHandle<u16, Buffer>, RouterError<u16, Buffer>> =
            router.send(family_id, NlmF::empty(), NlPayload::Payload(register));

        Ok(Self {
            router: Mutex::new(router),
            family_id,
        })
    }

    /// Runs the receive loop on the calling thread, decoding inbound
    /// `HWSIM_CMD_FRAME` messages and pushing them into `sink`. Intended to
    /// be spawned on its own `std::thread` by the process shell (C10).
    pub fn run_receive_loop(&self, client_id: super::ClientId, sink: IngressSink) {
        loop {
            let router = self.router.lock().unwrap();
            let handle: Result<neli::router::synchronous::NlRouterReceiverHandle<Mac80211HwsimCmd, HwsimMsg>, _> =
                router.send(self.family_id, NlmF::empty(), NlPayload::Empty);
            drop(router);

            let Ok(handle) = handle else {
                log::error!("netlink receive handle failed, stopping kernel transport");
                return;
            };
            for msg in handle {
                match msg {
                    Ok(nl) => {
                        if let NlPayload::Payload(genl) = nl.nl_payload() {
                            if let Some(frame) = decode_frame(genl) {
                                sink.push(client_id, frame);
                            }
                        }
                    }
                    Err(err) => log::warn!("netlink protocol error, dropping message: {err}"),
                }
            }
        }
    }
}

impl ClientTransport for KernelNetlinkClient {
    fn send_egress(&self, frame: &super::EgressFrame) -> std::io::Result<()> {
        let msg = build_frame_message(frame, frame.receiver_hwaddr)?;
        let router = self.router.lock().unwrap();
        let _: Result<neli::router::synchronous::NlRouterReceiverHandle<u16, Buffer>, _> =
            router.send(self.family_id, NlmF::empty(), NlPayload::Payload(msg));
        Ok(())
    }

    fn send_tx_status(&self, report: &TxStatusReport, transmitter_hwaddr: Mac, _receiver_hwaddr: Mac) -> std::io::Result<()> {
        let msg = build_tx_info_frame(report, transmitter_hwaddr)?;
        let router = self.router.lock().unwrap();
        let _: Result<neli::router::synchronous::NlRouterReceiverHandle<u16, Buffer>, _> =
            router.send(self.family_id, NlmF::empty(), NlPayload::Payload(msg));
        Ok(())
    }
}

/// Shared NLA encode/decode helpers reused by the API-socket and vhost-user
/// transports for their `NETLINK`-typed payloads (§4.11: "the same decode
/// path serves both transports").
pub mod wire {
    use super::*;

    /// Encodes a single ingress frame into the same flat attribute layout
    /// the kernel uses, for transports that frame their own envelope but
    /// still carry netlink-shaped attribute bytes as the body.
    pub fn encode_ingress(frame: &IngressFrame) -> Result<Vec<u8>, std::io::Error> {
        let attrs: GenlBuffer<Mac80211HwsimAttr, Buffer> = once(attr(Mac80211HwsimAttr::AddrTransmitter, frame.transmitter_hwaddr)?)
            .chain(once(attr(Mac80211HwsimAttr::Frame, Buffer::from(frame.data.clone()))?))
            .chain(once(attr(Mac80211HwsimAttr::Flags, frame.flags)?))
            .chain(once(attr(Mac80211HwsimAttr::Cookie, frame.cookie)?))
            .chain(frame.freq.map(|f| attr(Mac80211HwsimAttr::Freq, f)).transpose()?)
            .collect();

        let msg = GenlmsghdrBuilder::default()
            .cmd(Mac80211HwsimCmd::Frame)
            .version(VERSION_NR)
            .attrs(attrs)
            .build()
            .map_err(to_io)?;
        let mut buf = Vec::new();
        neli::ToBytes::to_bytes(&msg, &mut std::io::Cursor::new(&mut buf)).map_err(to_io)?;
        Ok(buf)
    }

    pub fn decode_ingress(bytes: &[u8]) -> Option<IngressFrame> {
        let msg: HwsimMsg = neli::FromBytes::from_bytes(&mut std::io::Cursor::new(bytes)).ok()?;
        decode_frame(&msg)
    }

    /// Encodes a TX-status report the same way `build_tx_info_frame` does for
    /// the kernel transport, carrying the truncated MRR table (`TxInfo`) and
    /// `Signal` alongside flags/cookie (§4.4) — not `encode_ingress`'s
    /// flat layout, which has no attribute for either.
    pub fn encode_tx_status(report: &TxStatusReport, transmitter_hwaddr: Mac) -> Result<Vec<u8>, std::io::Error> {
        let msg = build_tx_info_frame(report, transmitter_hwaddr)?;
        let mut buf = Vec::new();
        neli::ToBytes::to_bytes(&msg, &mut std::io::Cursor::new(&mut buf)).map_err(to_io)?;
        Ok(buf)
    }
}
