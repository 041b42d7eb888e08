use crate::{address::BdAddr, error::BleError};

pub const GAP_MSG_LE_DEV_STATE_CHANGE: u16 = 0x01;
pub const GAP_MSG_LE_CONN_STATE_CHANGE: u16 = 0x02;
pub const GAP_MSG_LE_CONN_PARAM_UPDATE: u16 = 0x03;
pub const GAP_MSG_LE_CONN_MTU_INFO: u16 = 0x04;
pub const GAP_MSG_LE_AUTHEN_STATE_CHANGE: u16 = 0x05;
pub const GAP_MSG_LE_BOND_PASSKEY_DISPLAY: u16 = 0x06;
pub const GAP_MSG_LE_BOND_PASSKEY_INPUT: u16 = 0x07;
pub const GAP_MSG_LE_BOND_OOB_INPUT: u16 = 0x08;
pub const GAP_MSG_LE_BOND_USER_CONFIRMATION: u16 = 0x09;
pub const GAP_MSG_LE_BOND_JUST_WORK: u16 = 0x0a;

pub const HCI_ERR: u16 = 0x0100;
pub const HCI_ERR_REMOTE_USER_TERMINATE: u16 = 0x13;
pub const HCI_ERR_LOCAL_HOST_TERMINATE: u16 = 0x16;

pub const GAP_SUCCESS: u16 = 0x00;

/// Result code handed back to the radio stack by callback entry points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AppResult {
    #[default]
    Success,
    Accept,
    Reject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

impl From<u8> for ConnState {
    fn from(value: u8) -> Self {
        match value {
            1 => ConnState::Connecting,
            2 => ConnState::Connected,
            3 => ConnState::Disconnecting,
            _ => ConnState::Disconnected,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InitState {
    #[default]
    Init,
    StackReady,
}

/// Shared by the advertising and scanning sub states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ActivityState {
    #[default]
    Idle,
    Starting,
    Active,
    Stopping,
}

impl From<u8> for ActivityState {
    fn from(value: u8) -> Self {
        match value & 0x03 {
            1 => ActivityState::Starting,
            2 => ActivityState::Active,
            3 => ActivityState::Stopping,
            _ => ActivityState::Idle,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AdvIdleCause {
    #[default]
    Stopped,
    ConnectionCreated,
}

/// GAP device state, packed by the stack as init:1, adv_sub:1, adv:2, scan:2, conn:2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceState {
    pub init: InitState,
    pub adv_idle_cause: AdvIdleCause,
    pub adv: ActivityState,
    pub scan: ActivityState,
    pub connecting: bool,
}

impl From<u8> for DeviceState {
    fn from(bits: u8) -> Self {
        Self {
            init: if bits & 0x01 != 0 {
                InitState::StackReady
            } else {
                InitState::Init
            },
            adv_idle_cause: if bits & 0x02 != 0 {
                AdvIdleCause::ConnectionCreated
            } else {
                AdvIdleCause::Stopped
            },
            adv: ActivityState::from(bits >> 2),
            scan: ActivityState::from(bits >> 4),
            connecting: (bits >> 6) & 0x03 != 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamUpdateStatus {
    Success,
    Failed,
    Pending,
    Other(u8),
}

impl From<u8> for ParamUpdateStatus {
    fn from(value: u8) -> Self {
        match value {
            0 => ParamUpdateStatus::Success,
            1 => ParamUpdateStatus::Failed,
            2 => ParamUpdateStatus::Pending,
            other => ParamUpdateStatus::Other(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthenState {
    Started,
    Complete,
    Other(u8),
}

impl From<u8> for AuthenState {
    fn from(value: u8) -> Self {
        match value {
            1 => AuthenState::Started,
            2 => AuthenState::Complete,
            other => AuthenState::Other(other),
        }
    }
}

/// One GAP message, with only the fields that are valid for its subtype.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GapMessage {
    DevStateChange {
        new_state: DeviceState,
        cause: u16,
    },
    ConnStateChange {
        conn_id: u8,
        new_state: ConnState,
        disc_cause: u16,
    },
    ConnParamUpdate {
        conn_id: u8,
        status: ParamUpdateStatus,
        cause: u16,
    },
    ConnMtuInfo {
        conn_id: u8,
        mtu: u16,
    },
    AuthenStateChange {
        conn_id: u8,
        new_state: AuthenState,
        status: u16,
    },
    BondPasskeyDisplay {
        conn_id: u8,
    },
    BondPasskeyInput {
        conn_id: u8,
    },
    BondOobInput {
        conn_id: u8,
    },
    BondUserConfirmation {
        conn_id: u8,
    },
    BondJustWork {
        conn_id: u8,
    },
    Unknown {
        subtype: u16,
    },
}

fn require(what: &'static str, payload: &[u8], needed: usize) -> Result<(), BleError> {
    if payload.len() < needed {
        return Err(BleError::MalformedPayload {
            what,
            needed,
            actual: payload.len(),
        });
    }
    Ok(())
}

fn u16_at(payload: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([payload[offset], payload[offset + 1]])
}

impl GapMessage {
    /// Decodes the raw message union. Which variant is valid depends only on `subtype`.
    pub fn decode(subtype: u16, payload: &[u8]) -> Result<Self, BleError> {
        let message = match subtype {
            GAP_MSG_LE_DEV_STATE_CHANGE => {
                require("GAP_MSG_LE_DEV_STATE_CHANGE", payload, 4)?;
                GapMessage::DevStateChange {
                    new_state: DeviceState::from(payload[0]),
                    cause: u16_at(payload, 2),
                }
            }
            GAP_MSG_LE_CONN_STATE_CHANGE => {
                require("GAP_MSG_LE_CONN_STATE_CHANGE", payload, 4)?;
                GapMessage::ConnStateChange {
                    conn_id: payload[0],
                    new_state: ConnState::from(payload[1]),
                    disc_cause: u16_at(payload, 2),
                }
            }
            GAP_MSG_LE_CONN_PARAM_UPDATE => {
                require("GAP_MSG_LE_CONN_PARAM_UPDATE", payload, 4)?;
                GapMessage::ConnParamUpdate {
                    conn_id: payload[0],
                    status: ParamUpdateStatus::from(payload[1]),
                    cause: u16_at(payload, 2),
                }
            }
            GAP_MSG_LE_CONN_MTU_INFO => {
                require("GAP_MSG_LE_CONN_MTU_INFO", payload, 4)?;
                GapMessage::ConnMtuInfo {
                    conn_id: payload[0],
                    mtu: u16_at(payload, 2),
                }
            }
            GAP_MSG_LE_AUTHEN_STATE_CHANGE => {
                require("GAP_MSG_LE_AUTHEN_STATE_CHANGE", payload, 4)?;
                GapMessage::AuthenStateChange {
                    conn_id: payload[0],
                    new_state: AuthenState::from(payload[1]),
                    status: u16_at(payload, 2),
                }
            }
            GAP_MSG_LE_BOND_PASSKEY_DISPLAY
            | GAP_MSG_LE_BOND_PASSKEY_INPUT
            | GAP_MSG_LE_BOND_OOB_INPUT
            | GAP_MSG_LE_BOND_USER_CONFIRMATION
            | GAP_MSG_LE_BOND_JUST_WORK => {
                require("GAP bond message", payload, 1)?;
                let conn_id = payload[0];
                match subtype {
                    GAP_MSG_LE_BOND_PASSKEY_DISPLAY => GapMessage::BondPasskeyDisplay { conn_id },
                    GAP_MSG_LE_BOND_PASSKEY_INPUT => GapMessage::BondPasskeyInput { conn_id },
                    GAP_MSG_LE_BOND_OOB_INPUT => GapMessage::BondOobInput { conn_id },
                    GAP_MSG_LE_BOND_USER_CONFIRMATION => {
                        GapMessage::BondUserConfirmation { conn_id }
                    }
                    _ => GapMessage::BondJustWork { conn_id },
                }
            }
            subtype => GapMessage::Unknown { subtype },
        };

        Ok(message)
    }
}

/// True for the two causes that mean somebody hung up on purpose.
pub fn is_normal_disconnect(cause: u16) -> bool {
    cause == (HCI_ERR | HCI_ERR_REMOTE_USER_TERMINATE)
        || cause == (HCI_ERR | HCI_ERR_LOCAL_HOST_TERMINATE)
}

/// Raw scan report as delivered with `GAP_MSG_LE_SCAN_INFO`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanInfo {
    pub adv_type: u8,
    pub bd_addr: [u8; 6],
    pub remote_addr_type: u8,
    pub rssi: i8,
    pub data: Vec<u8>,
}

impl ScanInfo {
    pub fn address(&self) -> BdAddr {
        BdAddr::from_bytes(self.bd_addr)
    }
}

/// Events of the GAP application callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GapCallback {
    DataLenChange {
        conn_id: u8,
        max_tx_octets: u16,
        max_tx_time: u16,
    },
    ModifyWhiteList {
        operation: u8,
        cause: u16,
    },
    ConnUpdateInd {
        conn_id: u8,
        conn_interval_min: u16,
        conn_interval_max: u16,
        conn_latency: u16,
        supervision_timeout: u16,
    },
    PhyUpdate {
        conn_id: u8,
        cause: u16,
        tx_phy: u8,
        rx_phy: u8,
    },
    RemoteFeatures {
        conn_id: u8,
        cause: u16,
        features: [u8; 8],
    },
    ScanInfo(ScanInfo),
    Other(u8),
}

pub const LE_SUPPORT_FEATURES_MASK_ARRAY_INDEX1: usize = 1;
pub const LE_SUPPORT_FEATURES_LE_2M_MASK_BIT: u8 = 0x01;
pub const LE_SUPPORT_FEATURES_LE_CODED_PHY_MASK_BIT: u8 = 0x08;
