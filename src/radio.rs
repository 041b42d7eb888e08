use crate::{
    address::{AddrType, BdAddr},
    ble::EventSink,
};

/// Size of the device name buffer handed to the controller, terminator included.
pub const GAP_DEVICE_NAME_LEN: usize = 39 + 1;
pub const GAP_OOB_LEN: usize = 16;

/// Per-connection values readable from the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnParam {
    Interval,
    Latency,
    Timeout,
    TxPhy,
    RxPhy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanType {
    Passive,
    Active,
}

/// Scan parameters, interval and window in 0.625 ms units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanParams {
    pub scan_type: ScanType,
    pub interval: u16,
    pub window: u16,
}

impl Default for ScanParams {
    fn default() -> Self {
        Self {
            scan_type: ScanType::Passive,
            interval: 0x40,
            window: 0x30,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvType {
    ConnectableUndirected,
    ConnectableDirected,
    Scannable,
    NonConnectable,
}

/// Advertising parameters, intervals in 0.625 ms units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdvParams {
    pub adv_type: AdvType,
    pub interval_min: u16,
    pub interval_max: u16,
}

impl Default for AdvParams {
    fn default() -> Self {
        Self {
            adv_type: AdvType::ConnectableUndirected,
            interval_min: 0x20,
            interval_max: 0x40,
        }
    }
}

/// Which bonding request a confirmation answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BondKind {
    PasskeyDisplay,
    PasskeyInput,
    OobInput,
    UserConfirmation,
    JustWorks,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    Accept,
    Reject,
}

/// Command side of the vendor radio stack.
///
/// Every call is synchronous from the caller's point of view and must not wait for a
/// controller event; results that arrive later are delivered through the [`EventSink`]
/// handed over in [`Radio::subscribe`].
pub trait Radio: Send + Sync + 'static {
    fn init(&self) -> anyhow::Result<()>;
    fn start(&self) -> anyhow::Result<()>;
    fn subscribe(&self, sink: EventSink) -> anyhow::Result<()>;

    fn set_device_name(&self, name: &[u8; GAP_DEVICE_NAME_LEN]) -> anyhow::Result<()>;
    fn local_address(&self) -> anyhow::Result<BdAddr>;

    fn set_adv_params(&self, params: &AdvParams) -> anyhow::Result<()>;
    fn set_adv_data(&self, data: &[u8]) -> anyhow::Result<()>;
    fn set_scan_response_data(&self, data: &[u8]) -> anyhow::Result<()>;
    fn adv_start(&self) -> anyhow::Result<()>;
    fn adv_stop(&self) -> anyhow::Result<()>;

    fn set_scan_params(&self, params: &ScanParams) -> anyhow::Result<()>;
    fn scan_start(&self) -> anyhow::Result<()>;
    fn scan_stop(&self) -> anyhow::Result<()>;

    fn conn_param(&self, conn_id: u8, param: ConnParam) -> anyhow::Result<u16>;
    fn conn_address(&self, conn_id: u8) -> anyhow::Result<(BdAddr, AddrType)>;
    fn connect(&self, addr: BdAddr, addr_type: AddrType) -> anyhow::Result<()>;
    fn disconnect(&self, conn_id: u8) -> anyhow::Result<()>;

    fn bond_display_key(&self, conn_id: u8) -> anyhow::Result<u32>;
    fn set_bond_oob_data(&self, data: &[u8; GAP_OOB_LEN]) -> anyhow::Result<()>;
    fn bond_confirm(
        &self,
        conn_id: u8,
        kind: BondKind,
        confirmation: Confirmation,
    ) -> anyhow::Result<()>;

    fn gattc_register(&self) -> anyhow::Result<()>;
    fn gattc_discover_all(&self, client_id: u8, conn_id: u8) -> anyhow::Result<()>;
}

/// Fixed-size, zero padded name buffer. At most `GAP_DEVICE_NAME_LEN - 1` bytes of the
/// name are kept so the controller always sees a terminator.
pub fn device_name_buffer(name: &str) -> [u8; GAP_DEVICE_NAME_LEN] {
    let mut buffer = [0u8; GAP_DEVICE_NAME_LEN];
    let bytes = name.as_bytes();
    let len = bytes.len().min(GAP_DEVICE_NAME_LEN - 1);
    buffer[..len].copy_from_slice(&bytes[..len]);
    buffer
}
