// Endpoint - one managed connection to a physical robot
// Owns the transport handle (through its driver task), the outbound message
// queue and the logical nodes behind the connection. Drives the read loop,
// health checks, reboot sequencing, wireless configuration-mode toggling
// and firmware-upgrade orchestration.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, trace, warn};

use crate::firmware::{DeviceFamily, FirmwareError, FirmwareService, FlashDriver, FlashTarget};
use crate::node::{Node, NodeStatus};
use crate::protocol::{
    encode_event, encode_ping, encode_reboot, FrameDecoder, PropertyValue, ProtocolDefs,
    ProtocolError, WireMessage,
};
use crate::registry::NodeRegistry;
use crate::transport::{
    AcceptorRegistry, DeviceChannel, ReleaseToken, TransportError, TransportHandle, TransportKind,
};
use crate::wireless::{DongleSettings, WirelessSettings, CTRL_FLASH, SETTINGS_RECORD_LEN};

use super::config::EndpointConfig;
use super::driver::{spawn_driver, IoCommand};
use super::group::{EndpointGroup, GroupEvent};
use super::queue::MessageQueue;

/// Unique endpoint identifier, generated at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EndpointId([u8; 16]);

impl EndpointId {
    pub fn generate() -> Self {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill(&mut bytes);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0[..8]))
    }
}

/// Whether the far side is a robot on a cable or a wireless dongle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EndpointKind {
    Wired,
    WirelessDongle,
}

/// Endpoint lifecycle mode. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EndpointMode {
    Normal,
    Rebooting,
    UpgradingFirmware,
    WirelessConfigMode,
    Closed,
}

/// Errors returned by endpoint operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EndpointError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Endpoint is closed")]
    Closed,
}

/// Progress callback for firmware upgrades: (error, fraction, complete).
pub type UpgradeProgress = Arc<dyn Fn(Option<FirmwareError>, f64, bool) + Send + Sync>;

/// Collaborator services an endpoint consumes.
#[derive(Clone)]
pub struct EndpointDeps {
    pub registry: Arc<NodeRegistry>,
    pub acceptors: Arc<AcceptorRegistry>,
    pub firmware: Arc<dyn FirmwareService>,
    pub flasher: Arc<dyn FlashDriver>,
}

struct EndpointState {
    mode: EndpointMode,
    nodes: HashMap<u16, Arc<Node>>,
    defs: ProtocolDefs,
    dongle_settings: Option<DongleSettings>,
    queue: MessageQueue,
    io: mpsc::Sender<IoCommand>,
    /// Taken by the read loop on first start.
    inbound: Option<mpsc::Receiver<Vec<u8>>>,
    /// Taken exactly once when the transport is released to its acceptor.
    release: Option<ReleaseToken>,
    group: Arc<EndpointGroup>,
}

/// Shared endpoint core. External holders (registry, timers, acceptors)
/// keep weak references only; the strong side lives with whoever created
/// the endpoint.
pub struct EndpointShared {
    id: EndpointId,
    kind: TransportKind,
    endpoint_kind: EndpointKind,
    config: EndpointConfig,
    deps: EndpointDeps,
    state: tokio::sync::Mutex<EndpointState>,
}

impl Drop for EndpointShared {
    fn drop(&mut self) {
        debug!(endpoint = %self.id, "destroying endpoint");
        let state = self.state.get_mut();
        for node in state.nodes.values() {
            node.disconnect();
        }
        state.nodes.clear();
        if let Some(token) = state.release.take() {
            self.deps.acceptors.release(token);
        }
        let registry = self.deps.registry.clone();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                registry.unregister_expired_endpoints();
            });
        }
    }
}

/// Cloneable handle to a managed robot connection.
#[derive(Clone)]
pub struct Endpoint {
    shared: Arc<EndpointShared>,
}

impl Endpoint {
    fn create(
        handle: TransportHandle,
        endpoint_kind: EndpointKind,
        deps: EndpointDeps,
        config: EndpointConfig,
    ) -> Self {
        let kind = handle.kind();
        let release = handle.release_token();
        let (io, inbound) = spawn_driver(handle);
        let queue = MessageQueue::start(io.clone());
        let shared = Arc::new(EndpointShared {
            id: EndpointId::generate(),
            kind,
            endpoint_kind,
            config,
            deps,
            state: tokio::sync::Mutex::new(EndpointState {
                mode: EndpointMode::Normal,
                nodes: HashMap::new(),
                defs: ProtocolDefs::new(),
                dongle_settings: None,
                queue,
                io,
                inbound: Some(inbound),
                release: Some(release),
                group: EndpointGroup::new(),
            }),
        });
        info!(endpoint = %shared.id, %kind, "created endpoint");
        Self { shared }
    }

    /// Build an endpoint over an accepted TCP socket.
    pub fn create_for_tcp(stream: TcpStream, deps: EndpointDeps, config: EndpointConfig) -> Self {
        Self::create(TransportHandle::Tcp(stream), EndpointKind::Wired, deps, config)
    }

    /// Build an endpoint over a serial device handed out by the serial
    /// acceptor.
    pub fn create_for_serial(
        device: DeviceChannel,
        endpoint_kind: EndpointKind,
        deps: EndpointDeps,
        config: EndpointConfig,
    ) -> Self {
        Self::create(TransportHandle::Serial(device), endpoint_kind, deps, config)
    }

    /// Build an endpoint over a USB device handed out by the USB acceptor.
    pub fn create_for_usb(
        device: DeviceChannel,
        endpoint_kind: EndpointKind,
        deps: EndpointDeps,
        config: EndpointConfig,
    ) -> Self {
        Self::create(TransportHandle::Usb(device), endpoint_kind, deps, config)
    }

    pub(crate) fn from_shared(shared: Arc<EndpointShared>) -> Self {
        Self { shared }
    }

    pub(crate) fn downgrade(&self) -> Weak<EndpointShared> {
        Arc::downgrade(&self.shared)
    }

    pub fn id(&self) -> EndpointId {
        self.shared.id
    }

    pub fn kind(&self) -> TransportKind {
        self.shared.kind
    }

    pub fn endpoint_kind(&self) -> EndpointKind {
        self.shared.endpoint_kind
    }

    pub fn is_wireless(&self) -> bool {
        self.shared.endpoint_kind == EndpointKind::WirelessDongle
    }

    fn deps(&self) -> &EndpointDeps {
        &self.shared.deps
    }

    pub async fn mode(&self) -> EndpointMode {
        self.shared.state.lock().await.mode
    }

    pub async fn node_count(&self) -> usize {
        self.shared.state.lock().await.nodes.len()
    }

    pub async fn node(&self, native_id: u16) -> Option<Arc<Node>> {
        self.shared.state.lock().await.nodes.get(&native_id).cloned()
    }

    pub async fn group(&self) -> Arc<EndpointGroup> {
        self.shared.state.lock().await.group.clone()
    }

    /// Move this endpoint into a shared logical group.
    pub async fn join_group(&self, group: Arc<EndpointGroup>) {
        self.shared.state.lock().await.group = group;
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Bring the endpoint up: read cached dongle settings (wireless),
    /// register with the node registry, schedule the deferred ping, start
    /// the read loop and health checks.
    pub async fn start(&self) -> Result<(), EndpointError> {
        if self.mode().await == EndpointMode::Closed {
            return Err(EndpointError::Closed);
        }
        if self.is_wireless() {
            // Briefly enter configuration mode to read the dongle settings.
            tokio::time::sleep(self.shared.config.wireless_startup_delay()).await;
            match self.wireless_get_settings().await {
                Some(settings) => info!(
                    endpoint = %self.id(),
                    network = format_args!("{:x}", settings.network_id),
                    channel = settings.channel,
                    "wireless dongle settings"
                ),
                None => warn!(endpoint = %self.id(), "could not read dongle settings"),
            }
        }

        self.deps().registry.register_endpoint(self);
        self.schedule_ping();
        self.spawn_read_loop().await;
        if self.shared.config.health_check {
            self.spawn_health_checks();
        }
        Ok(())
    }

    /// Transport-specific quiesce.
    pub async fn stop(&self) {
        let io = self.shared.state.lock().await.io.clone();
        let _ = io.send(IoCommand::Stop).await;
    }

    /// Close the underlying transport handle.
    pub async fn close(&self) {
        let io = self.shared.state.lock().await.io.clone();
        let _ = io.send(IoCommand::Close).await;
    }

    /// Abort in-flight I/O and clear the outbound queue. Outstanding
    /// timers are not force-cancelled; their continuations no-op once the
    /// endpoint is gone.
    pub async fn cancel_all_ops(&self) {
        let io = {
            let state = self.shared.state.lock().await;
            state.queue.clear();
            state.io.clone()
        };
        let _ = io.send(IoCommand::Cancel).await;
    }

    /// Disconnect all owned nodes, sweep the registry, and release the
    /// transport handle back to its acceptor. Safe to call repeatedly;
    /// the release happens exactly once.
    pub async fn teardown(&self) {
        let io = {
            let mut state = self.shared.state.lock().await;
            state.mode = EndpointMode::Closed;
            for node in state.nodes.values() {
                node.disconnect();
            }
            state.nodes.clear();
            state.queue.clear();
            if let Some(token) = state.release.take() {
                self.deps().acceptors.release(token);
            }
            state.io.clone()
        };
        // Awaited outside the lock: a saturated command channel must not
        // drop the close or block the read loop.
        let _ = io.send(IoCommand::Close).await;
        let registry = self.deps().registry.clone();
        tokio::spawn(async move {
            registry.unregister_expired_endpoints();
        });
    }

    /// Disconnect all owned nodes without closing the transport.
    pub async fn disconnect_nodes(&self) {
        let nodes: Vec<Arc<Node>> = {
            let mut state = self.shared.state.lock().await;
            state.nodes.drain().map(|(_, node)| node).collect()
        };
        for node in nodes {
            node.disconnect();
        }
    }

    /// Reboot the robot behind this endpoint.
    ///
    /// Only the single-node case issues a reboot command on the wire; with
    /// several nodes attached the endpoint still cycles through Rebooting
    /// but sends nothing (upstream leaves that path unspecified). After
    /// the reboot delay the endpoint re-registers and resumes, unless it
    /// was destroyed in the meantime.
    pub async fn reboot(&self) {
        {
            let mut state = self.shared.state.lock().await;
            if state.mode == EndpointMode::Closed {
                return;
            }
            if state.nodes.len() == 1 {
                let native_id = state
                    .nodes
                    .values()
                    .next()
                    .map(|n| n.native_id())
                    .unwrap_or_default();
                for node in state.nodes.values() {
                    node.disconnect();
                }
                state.nodes.clear();
                state.queue.enqueue(encode_reboot(native_id), None);
            }
            state.mode = EndpointMode::Rebooting;
        }
        let weak = Arc::downgrade(&self.shared);
        let delay = self.shared.config.reboot_delay();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // The endpoint may be gone; the restart then silently no-ops.
            let Some(shared) = weak.upgrade() else { return };
            let endpoint = Endpoint { shared };
            {
                let mut state = endpoint.shared.state.lock().await;
                if state.mode != EndpointMode::Rebooting {
                    return;
                }
                state.mode = EndpointMode::Normal;
            }
            endpoint.deps().registry.register_endpoint(&endpoint);
            endpoint.schedule_ping();
        });
    }

    // ------------------------------------------------------------------
    // Outbound messages
    // ------------------------------------------------------------------

    /// Encode and queue a batch of named events.
    ///
    /// All-or-nothing: an unknown event name or a value/length mismatch
    /// aborts the whole batch before anything is queued. The returned
    /// channel resolves when the last message of the batch has been
    /// written (or failed).
    pub async fn emit_events(
        &self,
        events: Vec<(String, PropertyValue)>,
    ) -> Result<oneshot::Receiver<Result<(), TransportError>>, EndpointError> {
        let state = self.shared.state.lock().await;
        if state.mode == EndpointMode::Closed {
            return Err(EndpointError::Closed);
        }
        let mut frames = Vec::with_capacity(events.len());
        for (name, value) in &events {
            let (def, id) = state
                .defs
                .event_by_name(name)
                .ok_or(ProtocolError::NoSuchVariable)?;
            let payload = value.to_wire(def.size)?;
            frames.push(encode_event(id, &payload));
        }
        let (done_tx, done_rx) = oneshot::channel();
        if frames.is_empty() {
            let _ = done_tx.send(Ok(()));
            return Ok(done_rx);
        }
        let last = frames.len() - 1;
        let mut done_tx = Some(done_tx);
        for (i, frame) in frames.into_iter().enumerate() {
            let done = if i == last { done_tx.take() } else { None };
            state.queue.enqueue(frame, done);
        }
        Ok(done_rx)
    }

    /// Wholesale replacement of the endpoint's event table.
    pub async fn set_events_table(&self, events: Vec<crate::protocol::EventDef>) {
        self.shared.state.lock().await.defs.set_events_table(events);
    }

    /// Apply shared-variable updates; see [`ProtocolDefs::set_shared_variables`]
    /// for the best-effort ordering contract.
    pub async fn set_shared_variables(
        &self,
        variables: Vec<(String, PropertyValue)>,
    ) -> Result<(), EndpointError> {
        self.shared
            .state
            .lock()
            .await
            .defs
            .set_shared_variables(variables)
            .map_err(EndpointError::from)
    }

    pub async fn constant(&self, name: &str) -> Option<i16> {
        self.shared.state.lock().await.defs.constant(name)
    }

    // ------------------------------------------------------------------
    // Wireless configuration
    // ------------------------------------------------------------------

    /// Toggle dongle configuration mode.
    ///
    /// A no-op returning true for non-wireless endpoints. The owning
    /// acceptor is paused while the control lines toggle so a device
    /// re-enumeration cannot race the mode change; entering configuration
    /// mode purges buffered inbound bytes so stale robot traffic cannot
    /// pollute the settings exchange; leaving waits for the dongle to
    /// settle and resumes the read loop.
    ///
    /// The state lock is never held while waiting on the driver; the read
    /// loop must stay free to drain inbound traffic or the driver could
    /// park with the config commands still queued.
    pub async fn wireless_enable_configuration_mode(
        &self,
        enable: bool,
    ) -> Result<bool, EndpointError> {
        if !self.is_wireless() {
            return Ok(true);
        }
        let (io, currently) = {
            let state = self.shared.state.lock().await;
            if state.mode == EndpointMode::Closed {
                return Err(EndpointError::Closed);
            }
            (
                state.io.clone(),
                state.mode == EndpointMode::WirelessConfigMode,
            )
        };
        if currently != enable {
            self.deps().acceptors.pause(self.kind(), true);
            let _ = io.send(IoCommand::Cancel).await;
            if enable {
                let _ = io.send(IoCommand::PauseReads).await;
                let _ = io.send(IoCommand::Purge).await;
            }
            let (done_tx, done_rx) = oneshot::channel();
            let sent = io
                .send(IoCommand::SetConfigLines { enable, done: done_tx })
                .await
                .is_ok();
            let toggled = sent && matches!(done_rx.await, Ok(Ok(())));
            self.deps().acceptors.pause(self.kind(), false);
            if !toggled {
                warn!(endpoint = %self.id(), "failed to toggle configuration lines");
                return Ok(false);
            }
            let mut state = self.shared.state.lock().await;
            if state.mode == EndpointMode::Closed {
                return Err(EndpointError::Closed);
            }
            state.mode = if enable {
                EndpointMode::WirelessConfigMode
            } else {
                EndpointMode::Normal
            };
        }
        if !enable {
            tokio::time::sleep(self.shared.config.config_settle_delay()).await;
            let _ = io.send(IoCommand::ResumeReads).await;
        }
        Ok(true)
    }

    /// Exchange the cached settings record with the dongle.
    ///
    /// Writes the record (flash bit per `flash`), reads it back, and on a
    /// read of at least one byte less than the record size treats the
    /// exchange as successful and re-registers the endpoint (its identity
    /// may have changed). Always leaves configuration mode before
    /// returning.
    pub async fn sync_wireless_dongle_settings(&self, flash: bool) -> bool {
        if !self.is_wireless() {
            return false;
        }
        if !matches!(self.wireless_enable_configuration_mode(true).await, Ok(true)) {
            return false;
        }
        let ok = self.exchange_settings(flash).await;
        let _ = self.wireless_enable_configuration_mode(false).await;
        ok
    }

    async fn exchange_settings(&self, flash: bool) -> bool {
        // The lockstep exchange runs without the state lock so the read
        // loop can keep draining any traffic still in flight.
        let (io, mut settings) = {
            let state = self.shared.state.lock().await;
            (state.io.clone(), state.dongle_settings.unwrap_or_default())
        };
        settings.ctrl = if flash { CTRL_FLASH } else { 0 };
        let (done_tx, done_rx) = oneshot::channel();
        if io
            .send(IoCommand::Exchange {
                data: settings.to_bytes().to_vec(),
                done: done_tx,
            })
            .await
            .is_err()
        {
            return false;
        }
        match done_rx.await {
            Ok(Ok(reply)) if reply.len() >= SETTINGS_RECORD_LEN - 1 => {
                // A one-byte-short read keeps the record we wrote.
                self.shared.state.lock().await.dongle_settings =
                    Some(DongleSettings::from_bytes(&reply).unwrap_or(settings));
                self.deps().registry.register_endpoint(self);
                true
            }
            _ => false,
        }
    }

    /// Program network id, dongle id and channel, flashing the record.
    pub async fn wireless_set_settings(
        &self,
        network_id: u16,
        dongle_id: u16,
        channel: u8,
    ) -> bool {
        if !self.is_wireless() {
            return false;
        }
        {
            let mut state = self.shared.state.lock().await;
            let settings = state.dongle_settings.get_or_insert_with(DongleSettings::default);
            settings.ctrl = 0;
            settings.channel = crate::wireless::encode_channel(channel);
            settings.node_id = dongle_id;
            settings.pan_id = network_id;
        }
        self.sync_wireless_dongle_settings(true).await
    }

    /// Read the dongle settings, syncing once if nothing is cached.
    pub async fn wireless_get_settings(&self) -> Option<WirelessSettings> {
        if !self.is_wireless() {
            return None;
        }
        let cached = self.shared.state.lock().await.dongle_settings;
        if cached.is_none() && !self.sync_wireless_dongle_settings(false).await {
            return None;
        }
        self.shared
            .state
            .lock()
            .await
            .dongle_settings
            .map(WirelessSettings::from)
    }

    // ------------------------------------------------------------------
    // Firmware upgrade
    // ------------------------------------------------------------------

    /// Fetch and flash new firmware for the node with `node_id`.
    ///
    /// Refused synchronously for wireless endpoints and outside Normal
    /// mode. Progress reports are redelivered through this endpoint's
    /// serialized context; on error or completion the transport handle is
    /// released back to its acceptor and discovery resumes.
    pub async fn upgrade_firmware(&self, node_id: u16, progress: UpgradeProgress) -> bool {
        if self.is_wireless() {
            return false;
        }
        {
            let mut state = self.shared.state.lock().await;
            if state.mode != EndpointMode::Normal {
                return false;
            }
            state.mode = EndpointMode::UpgradingFirmware;
        }
        let endpoint = self.clone();
        tokio::spawn(async move {
            endpoint.run_upgrade(node_id, progress).await;
        });
        true
    }

    async fn run_upgrade(&self, node_id: u16, progress: UpgradeProgress) {
        let image = match self.deps().firmware.firmware_data(DeviceFamily::Robot2).await {
            Ok(image) if !image.is_empty() => image,
            Ok(_) => return self.abort_upgrade(FirmwareError::InvalidImage, &progress).await,
            Err(e) => return self.abort_upgrade(e, &progress).await,
        };

        let kind = self.kind();
        // No new devices while the flashing driver owns the raw handle.
        self.deps().acceptors.pause(kind, true);
        let (io, target) = {
            let mut state = self.shared.state.lock().await;
            state.queue.clear();
            let path = state.release.as_ref().map(|token| token.target.clone());
            let target = match (kind, path) {
                (TransportKind::Serial, Some(path)) => Some(FlashTarget::SerialPath(path)),
                (TransportKind::Usb, Some(path)) => Some(FlashTarget::UsbPath(path)),
                _ => None,
            };
            (state.io.clone(), target)
        };
        let _ = io.send(IoCommand::Close).await;
        let Some(target) = target else {
            self.deps().acceptors.pause(kind, false);
            return self
                .abort_upgrade(
                    FirmwareError::FlashFailed("no raw device handle".into()),
                    &progress,
                )
                .await;
        };

        info!(endpoint = %self.id(), node_id, bytes = image.len(), "starting firmware upgrade");
        let weak = Arc::downgrade(&self.shared);
        let callback = progress.clone();
        let runtime = tokio::runtime::Handle::current();
        self.deps().flasher.upgrade(
            target,
            image,
            node_id,
            Box::new(move |error, fraction, complete| {
                let weak = weak.clone();
                let callback = callback.clone();
                // Redeliver through the endpoint's serialized context; the
                // flashing driver may report from any thread.
                runtime.spawn(async move {
                    let Some(shared) = weak.upgrade() else { return };
                    let endpoint = Endpoint { shared };
                    let mut state = endpoint.shared.state.lock().await;
                    callback(error.clone(), fraction, complete);
                    if error.is_some() || complete {
                        if let Some(token) = state.release.take() {
                            endpoint.deps().acceptors.release(token);
                        }
                        endpoint.deps().acceptors.pause(endpoint.kind(), false);
                        state.mode = if complete && error.is_none() {
                            EndpointMode::Closed
                        } else {
                            EndpointMode::Normal
                        };
                    }
                });
            }),
        );
    }

    async fn abort_upgrade(&self, error: FirmwareError, progress: &UpgradeProgress) {
        warn!(endpoint = %self.id(), error = %error, "firmware upgrade aborted");
        {
            let mut state = self.shared.state.lock().await;
            if state.mode == EndpointMode::UpgradingFirmware {
                state.mode = EndpointMode::Normal;
            }
        }
        progress(Some(error), 0.0, false);
    }

    // ------------------------------------------------------------------
    // Read loop and timers
    // ------------------------------------------------------------------

    async fn spawn_read_loop(&self) {
        let inbound = self.shared.state.lock().await.inbound.take();
        let Some(mut inbound) = inbound else { return };
        let weak = Arc::downgrade(&self.shared);
        tokio::spawn(async move {
            let mut decoder = FrameDecoder::new();
            loop {
                match inbound.recv().await {
                    Some(chunk) => {
                        decoder.push(&chunk);
                        while let Some(message) = decoder.next_message() {
                            let Some(shared) = weak.upgrade() else { return };
                            Endpoint { shared }.handle_message(message).await;
                        }
                    }
                    None => {
                        if let Some(shared) = weak.upgrade() {
                            Endpoint { shared }.on_transport_closed().await;
                        }
                        return;
                    }
                }
            }
        });
    }

    async fn on_transport_closed(&self) {
        let mode = self.mode().await;
        // During an upgrade the handle is closed deliberately and released
        // by the upgrade path; in config mode reads are merely paused.
        if matches!(
            mode,
            EndpointMode::Closed | EndpointMode::UpgradingFirmware
        ) {
            return;
        }
        warn!(endpoint = %self.id(), "transport session ended, tearing down");
        self.teardown().await;
    }

    async fn handle_message(&self, message: WireMessage) {
        match message {
            WireMessage::Handshake { source } => {
                let node = {
                    let mut state = self.shared.state.lock().await;
                    let registry = Arc::downgrade(&self.deps().registry);
                    state
                        .nodes
                        .entry(source)
                        .or_insert_with(|| Arc::new(Node::new(source, registry)))
                        .clone()
                };
                node.touch();
                if node.status() != NodeStatus::Connected {
                    info!(endpoint = %self.id(), native_id = source, node = %node.uuid(), "node connected");
                    node.connect();
                }
            }
            WireMessage::Event {
                source,
                event_id,
                payload,
            } => {
                let (node, name, value, group) = {
                    let state = self.shared.state.lock().await;
                    let Some(def) = state.defs.event_by_id(event_id) else {
                        trace!(event_id, "event without definition, dropping");
                        return;
                    };
                    let Ok(value) = PropertyValue::from_wire(&payload) else {
                        return;
                    };
                    // A stale definition table shows up as a length
                    // mismatch; drop silently.
                    if (value.is_integer() && def.size != 1) || value.len() != def.size {
                        return;
                    }
                    let Some(node) = state.nodes.get(&source) else {
                        return;
                    };
                    (node.clone(), def.name.clone(), value, state.group.clone())
                };
                group.broadcast(GroupEvent {
                    origin: self.id(),
                    node: node.uuid(),
                    name: name.clone(),
                    value: value.clone(),
                });
                node.deliver(&name, value);
            }
            WireMessage::Ping => trace!(endpoint = %self.id(), "inbound ping"),
            WireMessage::Reboot { target } => {
                trace!(endpoint = %self.id(), target, "ignoring inbound reboot")
            }
            WireMessage::Unknown { source, kind } => {
                trace!(endpoint = %self.id(), source, kind, "unknown message kind")
            }
        }
    }

    /// A newly connected robot may not be ready; delay the first ping so
    /// its VM has time to come up, otherwise it may never see the request.
    fn schedule_ping(&self) {
        let weak = Arc::downgrade(&self.shared);
        let delay = self.shared.config.ping_delay();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(shared) = weak.upgrade() else { return };
            let state = shared.state.lock().await;
            if state.mode == EndpointMode::Normal {
                state.queue.enqueue(encode_ping(), None);
            }
        });
    }

    fn spawn_health_checks(&self) {
        let weak = Arc::downgrade(&self.shared);
        let interval = self.shared.config.health_check_interval();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let Some(shared) = weak.upgrade() else { return };
                let mut state = shared.state.lock().await;
                match state.mode {
                    EndpointMode::Closed => return,
                    EndpointMode::Normal => {
                        state.queue.enqueue(encode_ping(), None);
                        let stale: Vec<u16> = state
                            .nodes
                            .iter()
                            .filter(|(_, node)| node.is_stale(interval * 3))
                            .map(|(id, _)| *id)
                            .collect();
                        for id in stale {
                            if let Some(node) = state.nodes.remove(&id) {
                                warn!(endpoint = %shared.id, native_id = id, "node failed health check");
                                node.disconnect();
                            }
                        }
                    }
                    // Skip probes while rebooting, upgrading or configuring.
                    _ => {}
                }
            }
        });
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("id", &self.shared.id)
            .field("kind", &self.shared.kind)
            .field("endpoint_kind", &self.shared.endpoint_kind)
            .finish()
    }
}
