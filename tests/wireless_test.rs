// Wireless dongle configuration integration tests
// An echoing DevicePeer stands in for the dongle: whatever settings record
// the endpoint writes during the configuration exchange comes straight back.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::time::{sleep, Duration};

use botlink::endpoint::{Endpoint, EndpointConfig, EndpointDeps, EndpointKind};
use botlink::firmware::{
    DeviceFamily, FirmwareError, FirmwareService, FlashDriver, FlashTarget, ProgressFn,
};
use botlink::registry::NodeRegistry;
use botlink::transport::{
    Acceptor, AcceptorRegistry, ControlRequest, DeviceChannel, DevicePeer, ReleaseToken,
    TransportKind,
};
use botlink::wireless::{DongleSettings, WirelessConfigurator, CTRL_FLASH};

struct NullAcceptor;

impl Acceptor for NullAcceptor {
    fn free_endpoint(&self, _token: &ReleaseToken) {}
    fn pause(&self, _paused: bool) {}
}

struct NoFirmware;

#[async_trait]
impl FirmwareService for NoFirmware {
    async fn firmware_data(&self, _family: DeviceFamily) -> Result<Vec<u8>, FirmwareError> {
        Err(FirmwareError::FetchFailed("none".to_string()))
    }
}

struct NoFlasher;

impl FlashDriver for NoFlasher {
    fn upgrade(&self, _target: FlashTarget, _image: Vec<u8>, _node_id: u16, progress: ProgressFn) {
        progress(Some(FirmwareError::FlashFailed("none".to_string())), 0.0, false);
    }
}

fn dongle_endpoint(kind: EndpointKind) -> (Endpoint, DevicePeer, Arc<NodeRegistry>) {
    let registry = NodeRegistry::new();
    let acceptors = Arc::new(AcceptorRegistry::new());
    acceptors.register(TransportKind::Serial, Arc::new(NullAcceptor));
    let deps = EndpointDeps {
        registry: registry.clone(),
        acceptors,
        firmware: Arc::new(NoFirmware),
        flasher: Arc::new(NoFlasher),
    };
    let config = EndpointConfig::new()
        .with_ping_delay_ms(60_000)
        .with_health_check(false)
        .with_config_settle_delay_ms(5)
        .with_wireless_startup_delay_ms(1);
    let (dev, peer) = DeviceChannel::pair("/dev/ttyDNGL0");
    let endpoint = Endpoint::create_for_serial(dev, kind, deps, config);
    (endpoint, peer, registry)
}

/// A handshake frame as a robot on the wireless network would send it.
fn handshake_frame(source: u16) -> Vec<u8> {
    let mut frame = vec![0u8; 6];
    frame[2..4].copy_from_slice(&source.to_le_bytes());
    frame[4..6].copy_from_slice(&0x8000u16.to_le_bytes());
    frame
}

/// Echo every written record back as the dongle's reply.
fn spawn_echo(mut peer: DevicePeer) -> tokio::task::JoinHandle<Vec<Vec<u8>>> {
    tokio::spawn(async move {
        let mut written = Vec::new();
        loop {
            tokio::select! {
                record = peer.written_rx.recv() => {
                    let Some(record) = record else { break };
                    written.push(record.clone());
                    if peer.inbound_tx.send(record).await.is_err() {
                        break;
                    }
                }
                ctrl = peer.ctrl_rx.recv() => {
                    // Control-line changes need no reply.
                    if ctrl.is_none() {
                        break;
                    }
                }
            }
        }
        written
    })
}

#[tokio::test]
async fn test_set_then_get_settings_roundtrip() {
    let (endpoint, peer, _registry) = dongle_endpoint(EndpointKind::WirelessDongle);
    let echo = spawn_echo(peer);

    assert!(endpoint.wireless_set_settings(100, 5, 3).await);

    let settings = endpoint.wireless_get_settings().await.expect("settings cached");
    assert_eq!(settings.network_id, 100);
    assert_eq!(settings.dongle_id, 5);
    assert_eq!(settings.channel, 3);

    // The record on the wire carried the flash bit and the radio channel
    // encoding 15 + 5 * 3.
    endpoint.teardown().await;
    drop(endpoint);
    let written = echo.await.unwrap();
    let record = DongleSettings::from_bytes(&written[0]).unwrap();
    assert_eq!(record.ctrl, CTRL_FLASH);
    assert_eq!(record.channel, 30);
    assert_eq!(record.pan_id, 100);
    assert_eq!(record.node_id, 5);
}

#[tokio::test]
async fn test_sync_reregisters_endpoint() {
    let (endpoint, peer, registry) = dongle_endpoint(EndpointKind::WirelessDongle);
    let _echo = spawn_echo(peer);

    assert_eq!(registry.endpoint_count(), 0);
    assert!(endpoint.sync_wireless_dongle_settings(false).await);
    assert_eq!(registry.endpoint_count(), 1);
}

#[tokio::test]
async fn test_wired_endpoint_refuses_wireless_ops() {
    let (endpoint, _peer, _registry) = dongle_endpoint(EndpointKind::Wired);

    // Configuration mode is a successful no-op, the settings ops refuse.
    assert_eq!(
        endpoint.wireless_enable_configuration_mode(true).await,
        Ok(true)
    );
    assert!(!endpoint.sync_wireless_dongle_settings(false).await);
    assert!(!endpoint.wireless_set_settings(1, 2, 3).await);
    assert_eq!(endpoint.wireless_get_settings().await, None);
}

#[tokio::test]
async fn test_config_mode_toggles_control_lines() {
    let (endpoint, mut peer, _registry) = dongle_endpoint(EndpointKind::WirelessDongle);

    assert_eq!(
        endpoint.wireless_enable_configuration_mode(true).await,
        Ok(true)
    );
    // Serial entry sequence: a standalone purge of buffered traffic, then
    // purge, RTS up, DTR down from the line toggle. The driver prepends a
    // cancel from the pre-toggle abort; skip those.
    let mut seen = Vec::new();
    while seen.len() < 4 {
        let ctrl = peer.ctrl_rx.recv().await.unwrap();
        if ctrl != ControlRequest::Cancel {
            seen.push(ctrl);
        }
    }
    assert_eq!(
        seen,
        vec![
            ControlRequest::Purge,
            ControlRequest::Purge,
            ControlRequest::SetRts(true),
            ControlRequest::SetDtr(false),
        ]
    );
}

#[tokio::test]
async fn test_stale_traffic_purged_before_settings_exchange() {
    let (endpoint, peer, _registry) = dongle_endpoint(EndpointKind::WirelessDongle);
    let inbound_tx = peer.inbound_tx.clone();
    let _echo = spawn_echo(peer);
    endpoint.start().await.unwrap();

    // A backlog of robot handshakes buffered ahead of the exchange. All
    // sends complete before the sync starts, so any record corruption can
    // only come from stale bytes left unpurged at exchange time.
    for i in 0..80u16 {
        inbound_tx.send(handshake_frame(i % 8)).await.unwrap();
    }

    assert!(endpoint.wireless_set_settings(100, 5, 3).await);

    // The cached record is the dongle's echo, not a stale frame.
    let settings = endpoint.wireless_get_settings().await.expect("settings cached");
    assert_eq!(settings.network_id, 100);
    assert_eq!(settings.dongle_id, 5);
    assert_eq!(settings.channel, 3);
}

#[tokio::test]
async fn test_sync_completes_with_traffic_in_flight() {
    let (endpoint, peer, _registry) = dongle_endpoint(EndpointKind::WirelessDongle);
    endpoint.start().await.unwrap();

    // Keep the wire saturated with handshake frames for the whole sync.
    let flood = tokio::spawn(async move {
        let mut i = 0u16;
        while peer.inbound_tx.send(handshake_frame(i % 8)).await.is_ok() {
            i = i.wrapping_add(1);
        }
    });

    // The sync must finish in bounded time instead of wedging behind the
    // inbound backlog; its outcome depends on what the exchange reads.
    tokio::time::timeout(
        Duration::from_secs(10),
        endpoint.sync_wireless_dongle_settings(false),
    )
    .await
    .expect("sync stalled under inbound load");
    flood.abort();
}

#[tokio::test]
async fn test_exchange_timeout_fails_sync() {
    let (endpoint, peer, _registry) = dongle_endpoint(EndpointKind::WirelessDongle);
    // Peer stays silent: the lockstep read times out and the sync fails.
    let _peer = peer;
    assert!(!endpoint.sync_wireless_dongle_settings(false).await);
    assert_eq!(endpoint.wireless_get_settings().await, None);
}

#[tokio::test]
async fn test_configurator_disconnects_wireless_nodes() {
    let (endpoint, peer, registry) = dongle_endpoint(EndpointKind::WirelessDongle);
    let _echo = spawn_echo(peer);
    endpoint.sync_wireless_dongle_settings(false).await;
    assert_eq!(registry.endpoint_count(), 1);

    let configurator = WirelessConfigurator::new(registry.clone());
    configurator.enable();
    assert!(configurator.is_enabled());
    sleep(Duration::from_millis(20)).await;

    // No nodes were attached; the sweep simply leaves the endpoint
    // registered and nodeless.
    assert_eq!(endpoint.node_count().await, 0);
    assert_eq!(registry.endpoint_count(), 1);
}
