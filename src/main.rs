// botlinkd - daemon entry point
// Glue only: argument parsing, log setup, a TCP acceptor that turns accepted
// sockets into started endpoints, and file-backed firmware fetching. The
// device-manager core lives in the library.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use clap::Parser;
use tracing::{error, info, warn};

use botlink::endpoint::{Endpoint, EndpointConfig, EndpointDeps};
use botlink::firmware::{
    DeviceFamily, FirmwareError, FirmwareService, FlashDriver, FlashTarget, ProgressFn,
};
use botlink::registry::NodeRegistry;
use botlink::transport::{Acceptor, AcceptorRegistry, ReleaseToken, TransportKind};

#[derive(Parser, Debug)]
#[command(author, version, about = "Robot device manager daemon", long_about = None)]
struct Args {
    /// TCP listen address for robot connections
    #[arg(long, default_value = "127.0.0.1:33333")]
    listen: String,

    /// Path to a local firmware image served to upgrade requests
    #[arg(long)]
    firmware_image: Option<PathBuf>,

    /// Interval between liveness probes, in milliseconds
    #[arg(long, default_value_t = 2000)]
    health_check_interval_ms: u64,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

/// Serves a firmware image from a file on disk.
struct LocalFirmwareService {
    image: Option<PathBuf>,
}

#[async_trait]
impl FirmwareService for LocalFirmwareService {
    async fn firmware_data(&self, family: DeviceFamily) -> Result<Vec<u8>, FirmwareError> {
        let Some(path) = &self.image else {
            return Err(FirmwareError::FetchFailed(format!(
                "no firmware image configured for {family:?}"
            )));
        };
        tokio::fs::read(path)
            .await
            .map_err(|e| FirmwareError::FetchFailed(e.to_string()))
    }
}

/// This build carries no bootloader implementation; upgrade requests are
/// reported back as failed so the endpoint restores itself.
struct NoFlashDriver;

impl FlashDriver for NoFlashDriver {
    fn upgrade(&self, target: FlashTarget, _image: Vec<u8>, _node_id: u16, progress: ProgressFn) {
        warn!(?target, "no flashing driver built in, refusing upgrade");
        progress(
            Some(FirmwareError::FlashFailed(
                "no flashing driver built in".to_string(),
            )),
            0.0,
            false,
        );
    }
}

/// Keeps accepted endpoints alive, keyed by peer address, and reclaims
/// released ones.
struct TcpAcceptor {
    paused: AtomicBool,
    endpoints: Mutex<HashMap<String, Endpoint>>,
}

impl TcpAcceptor {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            paused: AtomicBool::new(false),
            endpoints: Mutex::new(HashMap::new()),
        })
    }

    fn adopt(&self, peer: String, endpoint: Endpoint) {
        self.endpoints.lock().unwrap().insert(peer, endpoint);
    }
}

impl Acceptor for TcpAcceptor {
    fn free_endpoint(&self, token: &ReleaseToken) {
        // Sockets are not rediscoverable; dropping the strong reference
        // destroys the endpoint and closes the connection.
        info!(%token, "reclaiming tcp endpoint");
        self.endpoints.lock().unwrap().remove(&token.target);
    }

    fn pause(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(if args.verbose {
                    tracing::Level::DEBUG.into()
                } else {
                    tracing::Level::INFO.into()
                })
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("failed to install log subscriber");
    }

    let registry = NodeRegistry::new();
    let acceptors = Arc::new(AcceptorRegistry::new());
    let tcp_acceptor = TcpAcceptor::new();
    acceptors.register(TransportKind::Tcp, tcp_acceptor.clone());

    let deps = EndpointDeps {
        registry: registry.clone(),
        acceptors: acceptors.clone(),
        firmware: Arc::new(LocalFirmwareService {
            image: args.firmware_image.clone(),
        }),
        flasher: Arc::new(NoFlashDriver),
    };
    let config = EndpointConfig::new()
        .with_health_check_interval_ms(args.health_check_interval_ms);

    let listener = match tokio::net::TcpListener::bind(&args.listen).await {
        Ok(l) => l,
        Err(e) => {
            error!(addr = %args.listen, error = %e, "failed to bind listener");
            std::process::exit(1);
        }
    };
    info!(addr = %args.listen, "listening for robot connections");

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(error = %e, "accept failed");
                continue;
            }
        };
        if tcp_acceptor.paused.load(Ordering::SeqCst) {
            info!(%peer, "acceptor paused, dropping connection");
            continue;
        }
        info!(%peer, "robot connected");
        let endpoint = Endpoint::create_for_tcp(stream, deps.clone(), config.clone());
        if let Err(e) = endpoint.start().await {
            warn!(%peer, error = %e, "endpoint failed to start");
            continue;
        }
        tcp_acceptor.adopt(peer.to_string(), endpoint);
    }
}
