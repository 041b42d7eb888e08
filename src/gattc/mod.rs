pub mod event;
pub mod remote;

use std::{
    collections::HashMap,
    mem::{discriminant, Discriminant},
    sync::{
        atomic::{AtomicU8, Ordering},
        Arc, RwLock, Weak,
    },
    time::{Duration, Instant},
};

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use event::{client_matches, GattcEvent, CLIENT_ID_UNASSIGNED, GATT_SUCCESS};
use remote::{Property, RemoteCharacteristic, RemoteService};

use crate::{
    address::{AddrType, BdAddr},
    ble::BleInner,
    error::BleError,
    gap::{event::AppResult, link::MAX_LINKS, LinkEvent},
    peers::PeerDevice,
    radio::Radio,
    uuid::BleUuid,
};

const GATTC_TIMEOUT: Duration = Duration::from_secs(5);

type NotifyCallback = dyn Fn(u16, &[u8], bool) + Send + Sync;

#[derive(Clone)]
pub struct Client(pub Arc<ClientInner>);

pub struct ClientInner {
    ble: Weak<BleInner>,
    radio: Arc<dyn Radio>,

    gattc_if: AtomicU8,
    conn_id: RwLock<Option<u8>>,
    peer_address: RwLock<Option<BdAddr>>,

    services: RwLock<Vec<RemoteService>>,
    discovering: RwLock<Vec<RemoteService>>,
    notify_callback: RwLock<Option<Arc<NotifyCallback>>>,

    gattc_events: RwLock<HashMap<Discriminant<GattcEvent>, Sender<GattcEvent>>>,
}

impl Client {
    pub(crate) fn new(ble: &Arc<BleInner>) -> Self {
        let client = ClientInner {
            ble: Arc::downgrade(ble),
            radio: ble.radio.clone(),
            gattc_if: AtomicU8::new(CLIENT_ID_UNASSIGNED),
            conn_id: RwLock::new(None),
            peer_address: RwLock::new(None),
            services: RwLock::new(Vec::new()),
            discovering: RwLock::new(Vec::new()),
            notify_callback: RwLock::new(None),
            gattc_events: RwLock::new(HashMap::new()),
        };

        Self(Arc::new(client))
    }

    pub fn gattc_if(&self) -> u8 {
        self.0.gattc_if()
    }

    pub fn conn_id(&self) -> anyhow::Result<Option<u8>> {
        Ok(*self
            .0
            .conn_id
            .read()
            .map_err(|_| anyhow::anyhow!("Failed to read client conn_id"))?)
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.conn_id(), Ok(Some(_)))
    }

    pub fn peer_address(&self) -> anyhow::Result<Option<BdAddr>> {
        Ok(*self
            .0
            .peer_address
            .read()
            .map_err(|_| anyhow::anyhow!("Failed to read client peer address"))?)
    }

    /// Registers a GATT client interface with the stack and waits for its id.
    pub fn register(&self) -> anyhow::Result<()> {
        let rx = self
            .0
            .subscribe_event(discriminant(&GattcEvent::Registered { status: 0 }))?;

        self.0.radio.gattc_register()?;

        let result = match rx.recv_timeout(GATTC_TIMEOUT) {
            Ok(GattcEvent::Registered { status }) if status == GATT_SUCCESS => {
                log::info!("GATT client registered, gattc_if {}", self.gattc_if());
                Ok(())
            }
            Ok(GattcEvent::Registered { status }) => Err(anyhow::anyhow!(
                "Failed to register GATT client: status 0x{:x}",
                status
            )),
            Ok(event) => Err(anyhow::anyhow!("Unexpected event: {:?}", event)),
            Err(_) => Err(BleError::Timeout("GATT client registration").into()),
        };

        self.0
            .unsubscribe_event(discriminant(&GattcEvent::Registered { status: 0 }))?;
        result
    }

    /// Connects to `addr` as central.
    ///
    /// A running scan is cancelled and its results discarded. Fails with `NoCapacity` when
    /// every link slot is taken and with `Timeout` when the link is not up within 5 s.
    pub fn connect(&self, addr: BdAddr, addr_type: AddrType) -> anyhow::Result<u8> {
        let ble = self
            .0
            .ble
            .upgrade()
            .ok_or(anyhow::anyhow!("Failed to upgrade Ble from Weak reference"))?;

        if let Some(scan) = ble.existing_scan()? {
            scan.cancel()?;
        }

        let max_links = ble
            .config
            .read()
            .map_err(|_| anyhow::anyhow!("Failed to read gap config"))?
            .max_links;
        ble.gap
            .read()
            .map_err(|_| anyhow::anyhow!("Failed to read gap state"))?
            .links
            .ensure_capacity(max_links)?;

        if self.gattc_if() == CLIENT_ID_UNASSIGNED {
            self.register()?;
        }

        let key = discriminant(&LinkEvent::Connected {
            conn_id: 0,
            addr: BdAddr::default(),
        });
        let (tx, rx) = bounded(MAX_LINKS);
        ble.link_events
            .write()
            .map_err(|_| anyhow::anyhow!("Failed to write link events"))?
            .insert(key, tx);

        let connected: anyhow::Result<u8> = (|| {
            log::info!("Connecting to {} ({:?})", addr, addr_type);
            self.0.radio.connect(addr, addr_type)?;

            let deadline = Instant::now() + GATTC_TIMEOUT;
            loop {
                let remaining = deadline.saturating_duration_since(Instant::now());
                match rx.recv_timeout(remaining) {
                    Ok(LinkEvent::Connected {
                        conn_id,
                        addr: connected,
                    }) if connected == addr => return Ok(conn_id),
                    Ok(event) => log::debug!("Ignoring link event while connecting: {:?}", event),
                    Err(RecvTimeoutError::Timeout) => {
                        return Err(BleError::Timeout("connection").into())
                    }
                    Err(RecvTimeoutError::Disconnected) => {
                        return Err(anyhow::anyhow!("Link events channel closed"))
                    }
                }
            }
        })();

        ble.link_events
            .write()
            .map_err(|_| anyhow::anyhow!("Failed to write link events"))?
            .remove(&key);

        let conn_id = connected?;

        *self
            .0
            .conn_id
            .write()
            .map_err(|_| anyhow::anyhow!("Failed to write client conn_id"))? = Some(conn_id);
        *self
            .0
            .peer_address
            .write()
            .map_err(|_| anyhow::anyhow!("Failed to write client peer address"))? = Some(addr);

        ble.peers
            .write()
            .map_err(|_| anyhow::anyhow!("Failed to write peer registry"))?
            .add(PeerDevice::Client(Arc::downgrade(&self.0)), conn_id as u16)?;

        log::info!("Client connected to {} on conn_id {}", addr, conn_id);
        Ok(conn_id)
    }

    /// Runs a full primary service discovery and returns what was found.
    pub fn discover_services(&self) -> anyhow::Result<Vec<RemoteService>> {
        let conn_id = self.conn_id()?.ok_or(BleError::NotConnected)?;

        self.0
            .discovering
            .write()
            .map_err(|_| anyhow::anyhow!("Failed to write discovery buffer"))?
            .clear();

        let key = discriminant(&GattcEvent::DiscoveryComplete { status: 0 });
        let rx = self.0.subscribe_event(key)?;

        let result: anyhow::Result<()> = (|| {
            self.0.radio.gattc_discover_all(self.gattc_if(), conn_id)?;

            match rx.recv_timeout(GATTC_TIMEOUT) {
                Ok(GattcEvent::DiscoveryComplete { status }) if status == GATT_SUCCESS => Ok(()),
                Ok(GattcEvent::DiscoveryComplete { status }) => Err(anyhow::anyhow!(
                    "Service discovery failed: status 0x{:x}",
                    status
                )),
                Ok(event) => Err(anyhow::anyhow!("Unexpected event: {:?}", event)),
                Err(_) => Err(BleError::Timeout("service discovery").into()),
            }
        })();

        self.0.unsubscribe_event(key)?;
        result?;

        self.services()
    }

    pub fn services(&self) -> anyhow::Result<Vec<RemoteService>> {
        Ok(self
            .0
            .services
            .read()
            .map_err(|_| anyhow::anyhow!("Failed to read remote services"))?
            .clone())
    }

    pub fn service(&self, uuid: &BleUuid) -> anyhow::Result<Option<RemoteService>> {
        Ok(self
            .0
            .services
            .read()
            .map_err(|_| anyhow::anyhow!("Failed to read remote services"))?
            .iter()
            .find(|service| service.uuid.matches(uuid))
            .cloned())
    }

    /// `callback(value_handle, value, is_notify)` runs for every notification or indication.
    pub fn set_notify_callback<F>(&self, callback: F) -> anyhow::Result<()>
    where
        F: Fn(u16, &[u8], bool) + Send + Sync + 'static,
    {
        *self
            .0
            .notify_callback
            .write()
            .map_err(|_| anyhow::anyhow!("Failed to write notify callback"))? =
            Some(Arc::new(callback));

        Ok(())
    }

    /// Asks the stack to drop the link. Cleanup follows the disconnect event.
    pub fn disconnect(&self) -> anyhow::Result<()> {
        let conn_id = self.conn_id()?.ok_or(BleError::NotConnected)?;
        log::info!("Disconnecting conn_id {}", conn_id);
        self.0.radio.disconnect(conn_id)
    }
}

impl ClientInner {
    pub fn gattc_if(&self) -> u8 {
        self.gattc_if.load(Ordering::SeqCst)
    }

    fn subscribe_event(
        &self,
        key: Discriminant<GattcEvent>,
    ) -> anyhow::Result<crossbeam_channel::Receiver<GattcEvent>> {
        let (tx, rx) = bounded(1);
        self.gattc_events
            .write()
            .map_err(|_| anyhow::anyhow!("Failed to write gattc events"))?
            .insert(key, tx);
        Ok(rx)
    }

    fn unsubscribe_event(&self, key: Discriminant<GattcEvent>) -> anyhow::Result<()> {
        self.gattc_events
            .write()
            .map_err(|_| anyhow::anyhow!("Failed to write gattc events"))?
            .remove(&key);
        Ok(())
    }

    fn signal(&self, event: GattcEvent) {
        let Ok(waiters) = self.gattc_events.read() else {
            log::error!("Failed to acquire read lock for gattc events map");
            return;
        };

        if let Some(sender) = waiters.get(&discriminant(&event)) {
            if let Err(err) = sender.try_send(event) {
                log::debug!("Nobody waiting for gattc event: {:?}", err);
            }
        }
    }

    fn owns(&self, conn_id: u8) -> bool {
        matches!(self.conn_id.read().map(|current| *current), Ok(Some(own)) if own == conn_id)
    }

    /// Handles one routed event. Events for other connections are dropped here.
    pub(crate) fn handle_event(&self, client_id: u8, conn_id: u8, event: GattcEvent) {
        if let GattcEvent::Registered { status } = event {
            if status == GATT_SUCCESS && client_id != CLIENT_ID_UNASSIGNED {
                self.gattc_if.store(client_id, Ordering::SeqCst);
            }
            self.signal(event);
            return;
        }

        if !self.owns(conn_id) {
            log::debug!(
                "Client on gattc_if {} discarding event for conn_id {}",
                self.gattc_if(),
                conn_id
            );
            return;
        }

        if let Err(err) = self.handle_connection_event(conn_id, event) {
            log::error!("Failed to handle GATT client event: {:?}", err);
        }
    }

    fn handle_connection_event(&self, conn_id: u8, event: GattcEvent) -> anyhow::Result<()> {
        match event {
            GattcEvent::ServiceDiscovered {
                start_handle,
                end_handle,
                uuid,
            } => {
                log::debug!(
                    "Discovered service {} (0x{:04x}-0x{:04x})",
                    uuid,
                    start_handle,
                    end_handle
                );
                self.discovering
                    .write()
                    .map_err(|_| anyhow::anyhow!("Failed to write discovery buffer"))?
                    .push(RemoteService {
                        uuid,
                        start_handle,
                        end_handle,
                        characteristics: Vec::new(),
                    });
            }
            GattcEvent::CharacteristicDiscovered {
                decl_handle,
                properties,
                value_handle,
                uuid,
            } => {
                let mut discovering = self
                    .discovering
                    .write()
                    .map_err(|_| anyhow::anyhow!("Failed to write discovery buffer"))?;
                let service = discovering
                    .iter_mut()
                    .find(|service| service.contains_handle(decl_handle))
                    .ok_or(anyhow::anyhow!(
                        "No service found for characteristic handle 0x{:04x}",
                        decl_handle
                    ))?;
                service.characteristics.push(RemoteCharacteristic {
                    uuid,
                    decl_handle,
                    value_handle,
                    properties: Property::from_bits(properties),
                });
            }
            GattcEvent::DiscoveryComplete { status } => {
                if status == GATT_SUCCESS {
                    let found = std::mem::take(
                        &mut *self
                            .discovering
                            .write()
                            .map_err(|_| anyhow::anyhow!("Failed to write discovery buffer"))?,
                    );
                    log::info!("Discovery complete, {} services", found.len());
                    *self
                        .services
                        .write()
                        .map_err(|_| anyhow::anyhow!("Failed to write remote services"))? = found;
                }
                self.signal(GattcEvent::DiscoveryComplete { status });
            }
            GattcEvent::Notification {
                handle,
                value,
                is_notify,
            } => {
                let callback = self
                    .notify_callback
                    .read()
                    .map_err(|_| anyhow::anyhow!("Failed to read notify callback"))?
                    .clone();
                match callback {
                    Some(callback) => callback(handle, &value, is_notify),
                    None => log::debug!("Notification on 0x{:04x} without callback", handle),
                }
            }
            GattcEvent::Disconnected => self.on_link_lost(conn_id),
            GattcEvent::Registered { .. } => {}
            GattcEvent::Other(event_type) => {
                log::debug!("Unhandled GATT client event type {}", event_type);
            }
        }

        Ok(())
    }

    /// Forgets the link and everything learned over it.
    pub(crate) fn on_link_lost(&self, conn_id: u8) {
        if !self.owns(conn_id) {
            return;
        }

        let result = (|| {
            *self
                .conn_id
                .write()
                .map_err(|_| anyhow::anyhow!("Failed to write client conn_id"))? = None;
            *self
                .peer_address
                .write()
                .map_err(|_| anyhow::anyhow!("Failed to write client peer address"))? = None;
            self.services
                .write()
                .map_err(|_| anyhow::anyhow!("Failed to write remote services"))?
                .clear();
            self.discovering
                .write()
                .map_err(|_| anyhow::anyhow!("Failed to write discovery buffer"))?
                .clear();
            anyhow::Ok(())
        })();

        match result {
            Ok(()) => log::info!("Client lost conn_id {}", conn_id),
            Err(err) => log::error!("Failed to reset client: {:?}", err),
        }
    }
}

impl BleInner {
    /// Fans a GATT client event out to every client that might own it.
    pub(crate) fn route_gattc_event(
        &self,
        client_id: u8,
        conn_id: u8,
        event: GattcEvent,
    ) -> AppResult {
        let mut targets: Vec<Arc<ClientInner>> = match self.peers.read() {
            Ok(peers) => peers
                .snapshot(true)
                .into_values()
                .filter_map(|status| match status.peer_device {
                    PeerDevice::Client(client) => client.upgrade(),
                    PeerDevice::Server(_) => None,
                })
                .collect(),
            Err(_) => {
                log::error!("Failed to read peer registry");
                Vec::new()
            }
        };

        // The active client gets registration and discovery events before it is a peer.
        match self.client.read() {
            Ok(client) => {
                if let Some(client) = client.as_ref() {
                    targets.push(client.0.clone());
                }
            }
            Err(_) => log::error!("Failed to read active client"),
        }

        let mut delivered: Vec<Arc<ClientInner>> = Vec::new();
        for client in targets {
            if delivered.iter().any(|seen| Arc::ptr_eq(seen, &client)) {
                continue;
            }
            if client_matches(client.gattc_if(), client_id) {
                client.handle_event(client_id, conn_id, event.clone());
            }
            delivered.push(client);
        }

        AppResult::Success
    }
}
