use std::{
    collections::HashMap,
    mem::Discriminant,
    sync::{
        atomic::{AtomicBool, AtomicU8, Ordering},
        Arc, RwLock, Weak,
    },
};

use crossbeam_channel::Sender;

use crate::{
    advertising::Advertising,
    error::BleError,
    gap::{
        event::{AppResult, GapCallback},
        link::{LinkRecord, MAX_LINKS},
        security::{AcceptAll, SecurityPolicy},
        Authentication, GapConfig, GapState, LinkEvent, Role,
    },
    gattc::{event::GattcEvent, Client},
    gatts::{event::GattsEvent, Server},
    peers::{ConnectionStatus, PeerDevice, PeerRegistry},
    radio::{device_name_buffer, Radio},
    scan::Scan,
};

/// The BLE host context. Owns the scanner, advertiser, the active client and server and all
/// connection bookkeeping. Clones share the same context.
#[derive(Clone)]
pub struct Ble(pub Arc<BleInner>);

pub struct BleInner {
    pub(crate) radio: Arc<dyn Radio>,
    pub(crate) config: RwLock<GapConfig>,
    initialized: AtomicBool,

    pub(crate) gap: RwLock<GapState>,
    pub(crate) peers: RwLock<PeerRegistry>,
    pub(crate) security: RwLock<Arc<dyn SecurityPolicy>>,

    scan: RwLock<Option<Scan>>,
    advertising: RwLock<Option<Advertising>>,
    pub(crate) client: RwLock<Option<Client>>,
    pub(crate) server: RwLock<Option<Server>>,
    next_app_id: AtomicU8,

    pub(crate) link_events: RwLock<HashMap<Discriminant<LinkEvent>, Sender<LinkEvent>>>,
}

impl Ble {
    pub fn new(radio: Arc<dyn Radio>) -> Self {
        let ble = BleInner {
            radio,
            config: RwLock::new(GapConfig::default()),
            initialized: AtomicBool::new(false),
            gap: RwLock::new(GapState::default()),
            peers: RwLock::new(PeerRegistry::default()),
            security: RwLock::new(Arc::new(AcceptAll)),
            scan: RwLock::new(None),
            advertising: RwLock::new(None),
            client: RwLock::new(None),
            server: RwLock::new(None),
            next_app_id: AtomicU8::new(0),
            link_events: RwLock::new(HashMap::new()),
        };

        Self(Arc::new(ble))
    }

    /// Brings the stack up under `name`. Calls after the first one do nothing.
    pub fn init(&self, name: &str) -> anyhow::Result<()> {
        self.init_with_config(GapConfig {
            name: name.to_string(),
            ..Default::default()
        })
    }

    pub fn init_with_config(&self, mut config: GapConfig) -> anyhow::Result<()> {
        if self
            .0
            .initialized
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            log::info!("BLE already initialized");
            return Ok(());
        }

        config.max_links = config.max_links.min(MAX_LINKS);

        let result = (|| {
            self.0.radio.init()?;
            self.0.radio.subscribe(EventSink(Arc::downgrade(&self.0)))?;
            self.0.radio.set_device_name(&device_name_buffer(&config.name))?;
            self.0.radio.start()?;
            anyhow::Ok(())
        })();

        if let Err(err) = result {
            self.0.initialized.store(false, Ordering::SeqCst);
            return Err(err);
        }

        log::info!("BLE initialized as {:?}", config.name);
        *self
            .0
            .config
            .write()
            .map_err(|_| anyhow::anyhow!("Failed to write gap config"))? = config;

        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.0.initialized.load(Ordering::SeqCst)
    }

    fn ensure_initialized(&self) -> anyhow::Result<()> {
        if !self.is_initialized() {
            return Err(BleError::NotInitialized.into());
        }
        Ok(())
    }

    pub fn config(&self) -> anyhow::Result<GapConfig> {
        Ok(self
            .0
            .config
            .read()
            .map_err(|_| anyhow::anyhow!("Failed to read gap config"))?
            .clone())
    }

    pub fn set_security_policy(&self, policy: impl SecurityPolicy + 'static) -> anyhow::Result<()> {
        *self
            .0
            .security
            .write()
            .map_err(|_| anyhow::anyhow!("Failed to write security policy"))? = Arc::new(policy);

        Ok(())
    }

    /// The scanner, created on first use. Selects the central role.
    pub fn scan(&self) -> anyhow::Result<Scan> {
        self.ensure_initialized()?;
        self.set_role(Role::Central)?;

        let mut scan = self
            .0
            .scan
            .write()
            .map_err(|_| anyhow::anyhow!("Failed to write scan"))?;

        Ok(scan
            .get_or_insert_with(|| Scan::new(self.0.radio.clone()))
            .clone())
    }

    /// The advertiser, created on first use.
    pub fn advertising(&self) -> anyhow::Result<Advertising> {
        self.ensure_initialized()?;

        let mut advertising = self
            .0
            .advertising
            .write()
            .map_err(|_| anyhow::anyhow!("Failed to write advertising"))?;

        if let Some(advertising) = advertising.as_ref() {
            return Ok(advertising.clone());
        }

        let created = Advertising::new(self.0.radio.clone())?;
        *advertising = Some(created.clone());
        Ok(created)
    }

    pub fn start_advertising(&self) -> anyhow::Result<()> {
        self.advertising()?.start()
    }

    /// Replaces the active client with a fresh one and selects the central role.
    pub fn create_client(&self) -> anyhow::Result<Client> {
        self.ensure_initialized()?;
        self.set_role(Role::Central)?;

        let client = Client::new(&self.0);
        *self
            .0
            .client
            .write()
            .map_err(|_| anyhow::anyhow!("Failed to write client"))? = Some(client.clone());

        Ok(client)
    }

    pub fn client(&self) -> anyhow::Result<Option<Client>> {
        Ok(self
            .0
            .client
            .read()
            .map_err(|_| anyhow::anyhow!("Failed to read client"))?
            .clone())
    }

    /// Replaces the active server with one on the next application id and selects the
    /// peripheral role.
    pub fn create_server(&self) -> anyhow::Result<Server> {
        self.ensure_initialized()?;
        self.set_role(Role::Peripheral)?;

        let server = Server::new(self.0.next_app_id.fetch_add(1, Ordering::SeqCst));
        *self
            .0
            .server
            .write()
            .map_err(|_| anyhow::anyhow!("Failed to write server"))? = Some(server.clone());

        log::info!("Created server with app id {}", server.app_id());
        Ok(server)
    }

    pub fn server(&self) -> anyhow::Result<Option<Server>> {
        Ok(self
            .0
            .server
            .read()
            .map_err(|_| anyhow::anyhow!("Failed to read server"))?
            .clone())
    }

    pub fn role(&self) -> anyhow::Result<Role> {
        Ok(self
            .0
            .gap
            .read()
            .map_err(|_| anyhow::anyhow!("Failed to read gap state"))?
            .role)
    }

    fn set_role(&self, role: Role) -> anyhow::Result<()> {
        let mut gap = self
            .0
            .gap
            .write()
            .map_err(|_| anyhow::anyhow!("Failed to write gap state"))?;

        if gap.role != role {
            log::info!("Switching role to {:?}", role);
            gap.role = role;
        }

        Ok(())
    }

    /// Copy of the central link record for `conn_id`.
    pub fn link(&self, conn_id: u8) -> anyhow::Result<LinkRecord> {
        Ok(*self
            .0
            .gap
            .read()
            .map_err(|_| anyhow::anyhow!("Failed to read gap state"))?
            .links
            .get(conn_id)?)
    }

    pub fn authentication_state(&self, conn_id: u8) -> anyhow::Result<Option<Authentication>> {
        Ok(self
            .0
            .gap
            .read()
            .map_err(|_| anyhow::anyhow!("Failed to read gap state"))?
            .authentication(conn_id))
    }

    pub fn add_peer_device(&self, peer: PeerDevice, conn_id: u16) -> anyhow::Result<()> {
        self.0
            .peers
            .write()
            .map_err(|_| anyhow::anyhow!("Failed to write peer registry"))?
            .add(peer, conn_id)?;

        Ok(())
    }

    pub fn remove_peer_device(&self, conn_id: u16, is_client: bool) -> anyhow::Result<()> {
        self.0
            .peers
            .write()
            .map_err(|_| anyhow::anyhow!("Failed to write peer registry"))?
            .remove(conn_id, is_client);

        Ok(())
    }

    pub fn peer_devices(&self, is_client: bool) -> anyhow::Result<HashMap<u16, ConnectionStatus>> {
        Ok(self
            .0
            .peers
            .read()
            .map_err(|_| anyhow::anyhow!("Failed to read peer registry"))?
            .snapshot(is_client))
    }

    /// Entry points for the radio adapter. Normally handed over through [`Radio::subscribe`].
    pub fn event_sink(&self) -> EventSink {
        EventSink(Arc::downgrade(&self.0))
    }
}

impl BleInner {
    pub(crate) fn existing_scan(&self) -> anyhow::Result<Option<Scan>> {
        Ok(self
            .scan
            .read()
            .map_err(|_| anyhow::anyhow!("Failed to read scan"))?
            .clone())
    }

    pub(crate) fn existing_advertising(&self) -> anyhow::Result<Option<Advertising>> {
        Ok(self
            .advertising
            .read()
            .map_err(|_| anyhow::anyhow!("Failed to read advertising"))?
            .clone())
    }
}

/// Inbound side of the radio stack.
///
/// Holds the context weakly; once the [`Ble`] is dropped every call logs and returns the
/// neutral result.
#[derive(Clone)]
pub struct EventSink(Weak<BleInner>);

impl EventSink {
    fn upgrade(&self) -> Option<Arc<BleInner>> {
        let ble = self.0.upgrade();
        if ble.is_none() {
            log::error!("Failed to upgrade Ble, dropping event");
        }
        ble
    }

    pub fn handle_gap_message(&self, subtype: u16, payload: &[u8]) {
        if let Some(ble) = self.upgrade() {
            ble.handle_gap_message(subtype, payload);
        }
    }

    pub fn gap_callback(&self, event: GapCallback) -> AppResult {
        match self.upgrade() {
            Some(ble) => ble.handle_gap_callback(event),
            None => AppResult::Success,
        }
    }

    pub fn gatt_client_event(&self, client_id: u8, conn_id: u8, event: GattcEvent) -> AppResult {
        match self.upgrade() {
            Some(ble) => ble.route_gattc_event(client_id, conn_id, event),
            None => AppResult::Success,
        }
    }

    pub fn gatt_server_event(&self, service_id: u8, event: GattsEvent) -> AppResult {
        let Some(ble) = self.upgrade() else {
            return AppResult::Success;
        };

        let server = match ble.server.read() {
            Ok(server) => server.clone(),
            Err(_) => {
                log::error!("Failed to read server");
                None
            }
        };

        match server {
            Some(server) => server.handle_event(service_id, event),
            None => {
                log::debug!("GATT server event without server: {:?}", event);
                AppResult::Success
            }
        }
    }
}
