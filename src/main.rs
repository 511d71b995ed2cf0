//! Process shell (C10, C12): parses arguments, loads configuration, wires up
//! the engine and its transports, and runs the event loop that drains
//! ingress, fires due scheduler jobs, and ships deliveries/TX-status back
//! out. Mirrors the teacher's own "channel plus dedicated executor thread"
//! shape, minus its GUI.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread;

use anyhow::Context;
use clap::Parser;
use embassy_executor::Executor;
use embassy_futures::select::{select, Either};
use embassy_time::{Instant, Timer};
use env_logger::Builder;
use log::{error, info, warn};

use wmediumd_rs::cli::{Cli, level_filter};
use wmediumd_rs::client::{self, ClientId, ClientRegistry, ClientTransport, EgressFrame, IngressChannel, IngressEvent, IngressSink};
use wmediumd_rs::config::Config;
use wmediumd_rs::engine::delivery::FiredEvent;
use wmediumd_rs::engine::frame::TX_CTL_REQ_TX_STATUS;
use wmediumd_rs::engine::link::InterferenceMatrix;
use wmediumd_rs::engine::rates::ErrorProbModel;
use wmediumd_rs::engine::{Engine, IngressOutcome};
use wmediumd_rs::error::EngineError;

/// Interference is converted to collision probability every 10 simulated
/// milliseconds (§4.7).
const INTERFERENCE_TICK_USEC: u64 = 10_000;

fn init_logging(level: u8) {
    let filter = level_filter(level);
    Builder::new().filter_level(log::LevelFilter::Warn).filter(Some("wmediumd_rs"), filter).init();
}

/// Applies one ingress event against the engine. Runs only on the event
/// loop's own task, so the scheduler/queue mutation it triggers never races
/// with a transport thread (§5).
fn handle_event(event: IngressEvent, engine: &mut Engine, now_usec: u64) {
    match event {
        IngressEvent::Frame { client, frame } => match engine.ingress(now_usec, client, frame) {
            IngressOutcome::Queued(_) => {}
            IngressOutcome::FilteredDrop => info!("frame from client {client} dropped by filter"),
            IngressOutcome::UnknownStation => warn!("frame from client {client} names an unknown source station"),
            IngressOutcome::Malformed => warn!("malformed frame from client {client}"),
        },
        IngressEvent::Disconnected { client } => {
            let cancelled = engine.disconnect_client(client);
            info!("client {client} disconnected, cancelled {cancelled} pending frames");
        }
    }
}

/// Ships one fired job's deliveries and TX-status report out through the
/// client registry (§4.6, §4.8).
fn dispatch(fired: FiredEvent, engine: &Engine, registry: &Mutex<ClientRegistry>) {
    let registry = registry.lock().unwrap();
    for delivery in fired.deliveries {
        let station = engine.stations.get(delivery.receiver);
        let egress = EgressFrame {
            receiver_hwaddr: station.hwaddr,
            freq: delivery.freq,
            signal: delivery.signal,
            data: delivery.data,
        };
        registry.deliver(station.client, &egress);
    }

    if fired.status.flags & TX_CTL_REQ_TX_STATUS != 0 {
        let sender_hwaddr = engine.stations.get(fired.status.sender).hwaddr;
        registry.report_tx_status(fired.status.sender_client, &fired.status, sender_hwaddr, sender_hwaddr);
    }
}

#[embassy_executor::task]
async fn event_loop(mut engine: Engine, registry: Arc<Mutex<ClientRegistry>>, ingress_rx: client::IngressChannelReceiver) {
    let mut next_tick_usec = Instant::now().as_micros() + INTERFERENCE_TICK_USEC;

    loop {
        let now_usec = Instant::now().as_micros();
        while let Ok(event) = ingress_rx.try_receive() {
            handle_event(event, &mut engine, now_usec);
        }

        if now_usec >= next_tick_usec {
            engine.tick_interference();
            next_tick_usec = now_usec + INTERFERENCE_TICK_USEC;
        }

        for fired in engine.fire_due(now_usec) {
            dispatch(fired, &engine, &registry);
        }

        let wake_usec = [engine.next_deadline_usec(), Some(next_tick_usec)].into_iter().flatten().min().unwrap();

        match select(ingress_rx.receive(), Timer::at(Instant::from_micros(wake_usec))).await {
            Either::First(event) => handle_event(event, &mut engine, Instant::now().as_micros()),
            Either::Second(_) => {}
        }
    }
}

/// Builds the connect/register/disconnect closures shared by the API-socket
/// and vhost-user transports: connect joins the registry non-broadcast,
/// `REGISTER`/`UNREGISTER` toggle the broadcast set, disconnect reaps both
/// the registry entry and the engine's pending frames (via the ingress
/// channel, so the scheduler cleanup still runs on the event loop's task).
fn connection_callbacks(
    sink: IngressSink,
    registry: Arc<Mutex<ClientRegistry>>,
) -> (
    impl Fn(Box<dyn ClientTransport>) -> ClientId + Send + Sync + 'static,
    impl Fn(ClientId, bool) + Send + Sync + 'static,
    impl Fn(ClientId) + Send + Sync + 'static,
) {
    let connect_registry = Arc::clone(&registry);
    let on_connect = move |transport: Box<dyn ClientTransport>| connect_registry.lock().unwrap().connect(transport, false);

    let register_registry = Arc::clone(&registry);
    let on_register = move |client: ClientId, broadcast: bool| {
        let mut registry = register_registry.lock().unwrap();
        if broadcast {
            registry.register_broadcast(client);
        } else {
            registry.unregister_broadcast(client);
        }
    };

    let on_disconnect = move |client: ClientId| {
        registry.lock().unwrap().disconnect(client);
        sink.notify_disconnect(client);
    };

    (on_connect, on_register, on_disconnect)
}

fn spawn_api_socket(path: PathBuf, sink: IngressSink, registry: Arc<Mutex<ClientRegistry>>) -> std::io::Result<thread::JoinHandle<()>> {
    let (on_connect, on_register, on_disconnect) = connection_callbacks(sink, registry);
    thread::Builder::new().name("api-socket".to_string()).spawn(move || {
        if let Err(err) = client::api_socket::serve(&path, sink, on_connect, on_register, on_disconnect) {
            error!("api-socket transport failed: {err}");
        }
    })
}

fn spawn_vhost_user(path: PathBuf, sink: IngressSink, registry: Arc<Mutex<ClientRegistry>>) -> std::io::Result<thread::JoinHandle<()>> {
    let (on_connect, on_register, on_disconnect) = connection_callbacks(sink, registry);
    thread::Builder::new().name("vhost-user-socket".to_string()).spawn(move || {
        if let Err(err) = client::vhost_user::serve(&path, sink, on_connect, on_register, on_disconnect) {
            error!("vhost-user transport failed: {err}");
        }
    })
}

fn spawn_kernel_netlink(registry: Arc<Mutex<ClientRegistry>>, sink: IngressSink) -> Result<(), EngineError> {
    let kernel = client::netlink::KernelNetlinkClient::connect().map_err(|source| EngineError::TransportBind { name: "kernel-netlink", source })?;
    let kernel = Arc::new(kernel);
    let client_id = registry.lock().unwrap().connect(Box::new(Arc::clone(&kernel)), true);

    thread::Builder::new()
        .name("kernel-netlink".to_string())
        .spawn(move || {
            kernel.run_receive_loop(client_id, sink);
            registry.lock().unwrap().disconnect(client_id);
            sink.notify_disconnect(client_id);
        })
        .map_err(|source| EngineError::TransportBind { name: "kernel-netlink", source })?;
    Ok(())
}

fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.level);
    info!("starting up");

    let loaded = Config::load(&cli.config)
        .map_err(EngineError::from)
        .context("loading configuration")?
        .into_loaded()
        .map_err(EngineError::from)
        .context("validating configuration")?;
    let n = loaded.stations.len();

    let error_model = ErrorProbModel::from_path(cli.per_file.as_ref()).map_err(EngineError::from).context("loading per-rate error-probability file")?;
    let intf = InterferenceMatrix::new(n, true);

    let mut engine = Engine::new(loaded.stations, loaded.link_model, intf, error_model);
    for filter in loaded.filters {
        engine.add_filter(filter);
    }

    let registry = Arc::new(Mutex::new(ClientRegistry::new()));
    let ingress_channel: &'static IngressChannel = Box::leak(Box::new(IngressChannel::new()));
    let sink = IngressSink::new(ingress_channel.sender());
    let ingress_rx = ingress_channel.receiver();

    let mut netlink_needed = cli.force_netlink;

    if let Some(path) = cli.vhost_user_socket.clone() {
        spawn_vhost_user(path, sink, Arc::clone(&registry)).map_err(|source| EngineError::TransportBind { name: "vhost-user", source })?;
    } else {
        netlink_needed = true;
    }

    if let Some(path) = cli.api_socket.clone() {
        spawn_api_socket(path, sink, Arc::clone(&registry)).map_err(|source| EngineError::TransportBind { name: "api-socket", source })?;
    }

    if let Some(path) = cli.time_socket.clone() {
        thread::Builder::new().name("time-control-socket".to_string()).spawn(move || {
            if let Err(err) = wmediumd_rs::time_driver::serve_time_socket(&path) {
                error!("time-control socket failed: {err}");
            }
        })?;
    }

    if netlink_needed {
        spawn_kernel_netlink(Arc::clone(&registry), sink)?;
    }

    let executor: &'static mut Executor = Box::leak(Box::new(Executor::new()));
    executor.run(|spawner| {
        spawner.spawn(event_loop(engine, registry, ingress_rx)).expect("failed to spawn event loop task");
    })
}

fn main() -> anyhow::Result<()> {
    run()
}
