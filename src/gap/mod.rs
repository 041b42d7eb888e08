pub mod event;
pub mod link;
pub mod security;

use std::{collections::HashMap, mem::discriminant};

use event::{
    is_normal_disconnect, ActivityState, AdvIdleCause, AppResult, AuthenState, ConnState,
    DeviceState, GapCallback, GapMessage, InitState, ParamUpdateStatus, GAP_SUCCESS,
    LE_SUPPORT_FEATURES_LE_2M_MASK_BIT, LE_SUPPORT_FEATURES_LE_CODED_PHY_MASK_BIT,
    LE_SUPPORT_FEATURES_MASK_ARRAY_INDEX1,
};
use link::{LinkTable, MAX_LINKS};
use security::BondRequest;

use crate::{
    address::{AddrType, BdAddr},
    ble::BleInner,
    error::BleError,
    peers::PeerDevice,
    radio::{BondKind, ConnParam, Confirmation, GAP_OOB_LEN},
};

#[derive(Debug, Clone)]
pub struct GapConfig {
    pub name: String,
    pub appearance: u16,

    // Re-advertise after a peripheral link drops
    pub auto_advertise: bool,

    // Central links allowed at once, capped at MAX_LINKS
    pub max_links: usize,
}

impl Default for GapConfig {
    fn default() -> Self {
        Self {
            name: "AMEBA_BLE_DEV".to_string(),
            appearance: 0,
            auto_advertise: true,
            max_links: MAX_LINKS,
        }
    }
}

/// Which side of a link this device plays. Decides how connection events are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Role {
    #[default]
    Central,
    Peripheral,
}

/// Outcome of the last pairing procedure on a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authentication {
    Started,
    Succeeded,
    Failed(u16),
}

/// Connection edges that API callers can wait for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Connected { conn_id: u8, addr: BdAddr },
    Disconnected { conn_id: u8, cause: u16 },
}

#[derive(Debug, Clone, Copy, Default)]
struct LinkObservers {
    param_status: Option<ParamUpdateStatus>,
    mtu: Option<u16>,
    authen: Option<(AuthenState, u16)>,
}

/// Everything the GAP handlers remember between events.
#[derive(Debug, Default)]
pub struct GapState {
    pub role: Role,
    pub links: LinkTable,
    pub device_state: DeviceState,
    observers: HashMap<u8, LinkObservers>,
    authentication: HashMap<u8, Authentication>,
}

impl GapState {
    pub fn authentication(&self, conn_id: u8) -> Option<Authentication> {
        self.authentication.get(&conn_id).copied()
    }

    fn forget(&mut self, conn_id: u8) {
        self.observers.remove(&conn_id);
        self.authentication.remove(&conn_id);
    }
}

impl BleInner {
    /// Entry point for every GAP message. Never blocks and never fails towards the stack.
    pub(crate) fn handle_gap_message(&self, subtype: u16, payload: &[u8]) {
        let message = match GapMessage::decode(subtype, payload) {
            Ok(message) => message,
            Err(err) => {
                log::warn!("Dropping GAP message 0x{:02x}: {}", subtype, err);
                return;
            }
        };

        log::debug!("Received GAP message {:?}", message);

        let result = match message {
            GapMessage::DevStateChange { new_state, cause } => {
                self.handle_dev_state(new_state, cause)
            }
            GapMessage::ConnStateChange {
                conn_id,
                new_state,
                disc_cause,
            } => self.handle_conn_state(conn_id, new_state, disc_cause),
            GapMessage::ConnParamUpdate {
                conn_id,
                status,
                cause,
            } => self.handle_param_update(conn_id, status, cause),
            GapMessage::ConnMtuInfo { conn_id, mtu } => self.handle_mtu_info(conn_id, mtu),
            GapMessage::AuthenStateChange {
                conn_id,
                new_state,
                status,
            } => self.handle_authen_state(conn_id, new_state, status),
            GapMessage::BondPasskeyDisplay { conn_id } => {
                self.handle_bond(conn_id, BondKind::PasskeyDisplay)
            }
            GapMessage::BondPasskeyInput { conn_id } => {
                self.handle_bond(conn_id, BondKind::PasskeyInput)
            }
            GapMessage::BondOobInput { conn_id } => self.handle_bond(conn_id, BondKind::OobInput),
            GapMessage::BondUserConfirmation { conn_id } => {
                self.handle_bond(conn_id, BondKind::UserConfirmation)
            }
            GapMessage::BondJustWork { conn_id } => {
                self.handle_bond(conn_id, BondKind::JustWorks)
            }
            GapMessage::Unknown { subtype } => {
                log::warn!("Unknown GAP message subtype 0x{:02x}", subtype);
                Ok(())
            }
        };

        if let Err(err) = result {
            match err.downcast_ref::<BleError>() {
                Some(BleError::InvalidConnId { conn_id, max }) => {
                    log::warn!("Ignoring event for conn_id {} (max {})", conn_id, max)
                }
                _ => log::error!("Failed to handle GAP message 0x{:02x}: {:?}", subtype, err),
            }
        }
    }

    fn handle_conn_state(
        &self,
        conn_id: u8,
        new_state: ConnState,
        disc_cause: u16,
    ) -> anyhow::Result<()> {
        let role = self
            .gap
            .read()
            .map_err(|_| anyhow::anyhow!("Failed to read gap state"))?
            .role;

        match role {
            Role::Central => self.handle_central_conn_state(conn_id, new_state, disc_cause),
            Role::Peripheral => self.handle_peripheral_conn_state(conn_id, new_state, disc_cause),
        }
    }

    fn handle_central_conn_state(
        &self,
        conn_id: u8,
        new_state: ConnState,
        disc_cause: u16,
    ) -> anyhow::Result<()> {
        match new_state {
            ConnState::Disconnected => {
                if !is_normal_disconnect(disc_cause) {
                    log::warn!(
                        "Connection lost, conn_id {}, cause 0x{:x}",
                        conn_id,
                        disc_cause
                    );
                }

                {
                    let mut gap = self
                        .gap
                        .write()
                        .map_err(|_| anyhow::anyhow!("Failed to write gap state"))?;
                    gap.links.reset(conn_id)?;
                    gap.forget(conn_id);
                }
                log::info!("Disconnected conn_id {}", conn_id);

                self.drop_client_link(conn_id);
                self.notify_link_event(LinkEvent::Disconnected {
                    conn_id,
                    cause: disc_cause,
                });
            }
            ConnState::Connected => {
                self.gap
                    .read()
                    .map_err(|_| anyhow::anyhow!("Failed to read gap state"))?
                    .links
                    .get(conn_id)?;

                // The record only turns Connected once the link details are known
                let details = (|| -> anyhow::Result<(BdAddr, AddrType, u8, u8)> {
                    let (addr, addr_type) = self.radio.conn_address(conn_id)?;
                    let tx_phy = self.radio.conn_param(conn_id, ConnParam::TxPhy)? as u8;
                    let rx_phy = self.radio.conn_param(conn_id, ConnParam::RxPhy)? as u8;
                    Ok((addr, addr_type, tx_phy, rx_phy))
                })();

                let mut gap = self
                    .gap
                    .write()
                    .map_err(|_| anyhow::anyhow!("Failed to write gap state"))?;

                let (addr, addr_type, tx_phy, rx_phy) = match details {
                    Ok(details) => details,
                    Err(err) => {
                        log::error!(
                            "Failed to read link details for conn_id {}: {:?}",
                            conn_id,
                            err
                        );
                        gap.links.reset(conn_id)?;
                        return Ok(());
                    }
                };

                let link = gap.links.get_mut(conn_id)?;
                link.conn_state = ConnState::Connected;
                link.bd_addr = addr;
                link.bd_addr_type = addr_type;
                link.tx_phy = tx_phy;
                link.rx_phy = rx_phy;
                drop(gap);

                log::info!(
                    "Connected conn_id {} to {}, tx_phy {}, rx_phy {}",
                    conn_id,
                    addr,
                    tx_phy,
                    rx_phy
                );

                self.notify_link_event(LinkEvent::Connected { conn_id, addr });
            }
            _ => {
                self.gap
                    .write()
                    .map_err(|_| anyhow::anyhow!("Failed to write gap state"))?
                    .links
                    .set_state(conn_id, new_state)?;
            }
        }

        Ok(())
    }

    fn handle_peripheral_conn_state(
        &self,
        conn_id: u8,
        new_state: ConnState,
        disc_cause: u16,
    ) -> anyhow::Result<()> {
        match new_state {
            ConnState::Disconnected => {
                if !is_normal_disconnect(disc_cause) {
                    log::warn!("Connection lost, cause 0x{:x}", disc_cause);
                }

                self.gap
                    .write()
                    .map_err(|_| anyhow::anyhow!("Failed to write gap state"))?
                    .forget(conn_id);

                let server = self
                    .server
                    .read()
                    .map_err(|_| anyhow::anyhow!("Failed to read server"))?
                    .clone();
                if let Some(server) = server {
                    server.on_peer_disconnected(self, conn_id, disc_cause);
                }

                let auto_advertise = self
                    .config
                    .read()
                    .map_err(|_| anyhow::anyhow!("Failed to read gap config"))?
                    .auto_advertise;
                if auto_advertise {
                    if let Some(advertising) = self.existing_advertising()? {
                        log::info!("Peer disconnected, re-arming advertising");
                        advertising.request_restart();
                    }
                }
            }
            ConnState::Connected => {
                let interval = self.radio.conn_param(conn_id, ConnParam::Interval)?;
                let latency = self.radio.conn_param(conn_id, ConnParam::Latency)?;
                let timeout = self.radio.conn_param(conn_id, ConnParam::Timeout)?;
                let (addr, addr_type) = self.radio.conn_address(conn_id)?;

                log::info!(
                    "Connected: remote_bd {}, remote_addr_type {:?}, conn_interval 0x{:x}, conn_latency 0x{:x}, conn_supervision_timeout 0x{:x}",
                    addr,
                    addr_type,
                    interval,
                    latency,
                    timeout
                );

                let server = self
                    .server
                    .read()
                    .map_err(|_| anyhow::anyhow!("Failed to read server"))?
                    .clone();
                if let Some(server) = server {
                    server.on_peer_connected(self, conn_id, addr);
                }
            }
            _ => {}
        }

        Ok(())
    }

    fn handle_dev_state(&self, new_state: DeviceState, cause: u16) -> anyhow::Result<()> {
        let (previous, role) = {
            let mut gap = self
                .gap
                .write()
                .map_err(|_| anyhow::anyhow!("Failed to write gap state"))?;
            let previous = gap.device_state;
            gap.device_state = new_state;
            (previous, gap.role)
        };

        log::debug!(
            "Device state: init {:?}, adv {:?}, scan {:?}, cause 0x{:x}",
            new_state.init,
            new_state.adv,
            new_state.scan,
            cause
        );

        if previous.init != new_state.init && new_state.init == InitState::StackReady {
            match self.radio.local_address() {
                Ok(addr) => log::info!("GAP stack ready, local address {}", addr),
                Err(err) => log::error!("GAP stack ready, failed to read local address: {:?}", err),
            }
        }

        match role {
            Role::Central if previous.scan != new_state.scan => match new_state.scan {
                ActivityState::Idle => {
                    log::info!("GAP scan stop");
                    if let Some(scan) = self.existing_scan()? {
                        scan.on_controller_idle();
                    }
                }
                ActivityState::Starting | ActivityState::Active => {
                    if new_state.scan == ActivityState::Active {
                        log::info!("GAP scan start");
                    }
                    if let Some(scan) = self.existing_scan()? {
                        scan.on_controller_active();
                    }
                }
                _ => {}
            },
            Role::Peripheral if previous.adv != new_state.adv => match new_state.adv {
                ActivityState::Idle => match new_state.adv_idle_cause {
                    AdvIdleCause::ConnectionCreated => {
                        log::info!("GAP adv stopped: because connection created")
                    }
                    AdvIdleCause::Stopped => log::info!("GAP adv stopped"),
                },
                ActivityState::Active => log::info!("GAP adv start"),
                _ => {}
            },
            _ => {}
        }

        Ok(())
    }

    fn handle_param_update(
        &self,
        conn_id: u8,
        status: ParamUpdateStatus,
        cause: u16,
    ) -> anyhow::Result<()> {
        let previous = {
            let mut gap = self
                .gap
                .write()
                .map_err(|_| anyhow::anyhow!("Failed to write gap state"))?;
            let observers = gap.observers.entry(conn_id).or_default();
            observers.param_status.replace(status)
        };

        if previous == Some(status) {
            return Ok(());
        }

        match status {
            ParamUpdateStatus::Success => {
                let interval = self.radio.conn_param(conn_id, ConnParam::Interval)?;
                let latency = self.radio.conn_param(conn_id, ConnParam::Latency)?;
                let timeout = self.radio.conn_param(conn_id, ConnParam::Timeout)?;
                log::info!(
                    "Connection parameters updated on conn_id {}: interval 0x{:x}, latency 0x{:x}, supervision_timeout 0x{:x}",
                    conn_id,
                    interval,
                    latency,
                    timeout
                );
            }
            ParamUpdateStatus::Failed => {
                log::warn!(
                    "Connection parameter update failed on conn_id {}: cause 0x{:x}",
                    conn_id,
                    cause
                );
            }
            ParamUpdateStatus::Pending => {
                log::info!("Connection parameter update pending: conn_id {}", conn_id);
            }
            ParamUpdateStatus::Other(status) => {
                log::debug!("Connection parameter update status {} on conn_id {}", status, conn_id);
            }
        }

        Ok(())
    }

    fn handle_mtu_info(&self, conn_id: u8, mtu: u16) -> anyhow::Result<()> {
        let previous = {
            let mut gap = self
                .gap
                .write()
                .map_err(|_| anyhow::anyhow!("Failed to write gap state"))?;
            gap.observers.entry(conn_id).or_default().mtu.replace(mtu)
        };

        if previous == Some(mtu) {
            return Ok(());
        }

        log::info!("MTU exchanged: conn_id {}, mtu_size {}", conn_id, mtu);

        let known = self
            .peers
            .write()
            .map_err(|_| anyhow::anyhow!("Failed to write peer registry"))?
            .set_mtu(conn_id as u16, mtu);
        if !known {
            log::debug!("No peer registered for conn_id {}", conn_id);
        }

        let server = self
            .server
            .read()
            .map_err(|_| anyhow::anyhow!("Failed to read server"))?
            .clone();
        if let Some(server) = server {
            server.update_mtu(conn_id, mtu);
        }

        Ok(())
    }

    fn handle_authen_state(
        &self,
        conn_id: u8,
        new_state: AuthenState,
        status: u16,
    ) -> anyhow::Result<()> {
        let mut gap = self
            .gap
            .write()
            .map_err(|_| anyhow::anyhow!("Failed to write gap state"))?;

        let previous = gap
            .observers
            .entry(conn_id)
            .or_default()
            .authen
            .replace((new_state, status));
        if previous == Some((new_state, status)) {
            return Ok(());
        }

        match new_state {
            AuthenState::Started => {
                log::info!("Authentication started on conn_id {}", conn_id);
                gap.authentication.insert(conn_id, Authentication::Started);
            }
            AuthenState::Complete if status == GAP_SUCCESS => {
                log::info!("Pairing success on conn_id {}", conn_id);
                gap.authentication
                    .insert(conn_id, Authentication::Succeeded);
            }
            AuthenState::Complete => {
                log::warn!("Pairing failed on conn_id {}: status 0x{:x}", conn_id, status);
                gap.authentication
                    .insert(conn_id, Authentication::Failed(status));
            }
            AuthenState::Other(state) => {
                log::debug!("Authentication state {} on conn_id {}", state, conn_id);
            }
        }

        Ok(())
    }

    fn handle_bond(&self, conn_id: u8, kind: BondKind) -> anyhow::Result<()> {
        let passkey = match kind {
            BondKind::PasskeyDisplay | BondKind::UserConfirmation => {
                let passkey = self.radio.bond_display_key(conn_id)?;
                log::info!("{:?} on conn_id {}: passkey {:06}", kind, conn_id, passkey);
                Some(passkey)
            }
            BondKind::OobInput => {
                self.radio.set_bond_oob_data(&[0u8; GAP_OOB_LEN])?;
                None
            }
            BondKind::PasskeyInput | BondKind::JustWorks => None,
        };

        let policy = self
            .security
            .read()
            .map_err(|_| anyhow::anyhow!("Failed to read security policy"))?
            .clone();
        let confirmation = policy.confirm(&BondRequest {
            conn_id,
            kind,
            passkey,
        });

        if confirmation == Confirmation::Reject {
            log::warn!("Rejecting {:?} on conn_id {}", kind, conn_id);
        }

        self.radio.bond_confirm(conn_id, kind, confirmation)
    }

    /// The GAP application callback. Only connection update requests get a real answer.
    pub(crate) fn handle_gap_callback(&self, event: GapCallback) -> AppResult {
        match event {
            GapCallback::ScanInfo(info) => match self.existing_scan() {
                Ok(Some(scan)) => scan.ingest(&info),
                Ok(None) => log::debug!("Scan report from {} without scanner", info.address()),
                Err(err) => log::error!("Failed to get scanner: {:?}", err),
            },
            GapCallback::ConnUpdateInd {
                conn_id,
                conn_interval_min,
                conn_interval_max,
                conn_latency,
                supervision_timeout,
            } => {
                log::info!(
                    "Connection update request on conn_id {}: interval 0x{:x}-0x{:x}, latency 0x{:x}, timeout 0x{:x}",
                    conn_id,
                    conn_interval_min,
                    conn_interval_max,
                    conn_latency,
                    supervision_timeout
                );
                return AppResult::Accept;
            }
            GapCallback::DataLenChange {
                conn_id,
                max_tx_octets,
                max_tx_time,
            } => {
                log::debug!(
                    "Data length changed on conn_id {}: max_tx_octets 0x{:x}, max_tx_time 0x{:x}",
                    conn_id,
                    max_tx_octets,
                    max_tx_time
                );
            }
            GapCallback::ModifyWhiteList { operation, cause } => {
                log::debug!("White list modified: operation {}, cause 0x{:x}", operation, cause);
            }
            GapCallback::PhyUpdate {
                conn_id,
                cause,
                tx_phy,
                rx_phy,
            } => {
                log::info!(
                    "PHY update on conn_id {}: cause 0x{:x}, tx_phy {}, rx_phy {}",
                    conn_id,
                    cause,
                    tx_phy,
                    rx_phy
                );
            }
            GapCallback::RemoteFeatures {
                conn_id,
                cause,
                features,
            } => {
                if cause == GAP_SUCCESS {
                    let byte = features[LE_SUPPORT_FEATURES_MASK_ARRAY_INDEX1];
                    log::info!(
                        "Remote features of conn_id {}: LE 2M PHY {}, LE Coded PHY {}",
                        conn_id,
                        byte & LE_SUPPORT_FEATURES_LE_2M_MASK_BIT != 0,
                        byte & LE_SUPPORT_FEATURES_LE_CODED_PHY_MASK_BIT != 0
                    );
                } else {
                    log::warn!("Reading remote features of conn_id {} failed: 0x{:x}", conn_id, cause);
                }
            }
            GapCallback::Other(cb_type) => {
                log::debug!("Unhandled GAP callback type 0x{:02x}", cb_type);
            }
        }

        AppResult::Success
    }

    pub(crate) fn notify_link_event(&self, event: LinkEvent) {
        let Ok(waiters) = self.link_events.read() else {
            log::error!("Failed to acquire read lock for link events map");
            return;
        };

        if let Some(sender) = waiters.get(&discriminant(&event)) {
            if let Err(err) = sender.try_send(event) {
                log::debug!("Nobody took link event: {:?}", err);
            }
        }
    }

    fn drop_client_link(&self, conn_id: u8) {
        let removed = match self.peers.write() {
            Ok(mut peers) => peers.remove(conn_id as u16, true),
            Err(_) => {
                log::error!("Failed to write peer registry");
                None
            }
        };

        if let Some(status) = removed {
            if let PeerDevice::Client(client) = status.peer_device {
                if let Some(client) = client.upgrade() {
                    client.on_link_lost(conn_id);
                }
            }
        }
    }
}
