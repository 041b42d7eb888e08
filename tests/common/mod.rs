#![allow(dead_code)]

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::{Duration, Instant},
};

use rpc_ble::{
    address::{AddrType, BdAddr},
    gap::event::GAP_MSG_LE_CONN_STATE_CHANGE,
    gattc::event::{GattcEvent, GATT_SUCCESS},
    radio::{
        AdvParams, BondKind, ConnParam, Confirmation, Radio, ScanParams, GAP_DEVICE_NAME_LEN,
        GAP_OOB_LEN,
    },
    Ble, EventSink,
};

pub const CLIENT_ID: u8 = 3;

/// Every outbound call the host made, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Init,
    Start,
    SetDeviceName(Vec<u8>),
    LocalAddress,
    SetAdvParams(AdvParams),
    SetAdvData(Vec<u8>),
    SetScanResponseData(Vec<u8>),
    AdvStart,
    AdvStop,
    SetScanParams(ScanParams),
    ScanStart,
    ScanStop,
    ConnParam(u8, ConnParam),
    ConnAddress(u8),
    Connect(BdAddr, AddrType),
    Disconnect(u8),
    BondDisplayKey(u8),
    SetBondOobData([u8; GAP_OOB_LEN]),
    BondConfirm(u8, BondKind, Confirmation),
    GattcRegister,
    GattcDiscoverAll(u8, u8),
}

/// Radio double. Records commands and answers the few that the stack answers with events.
#[derive(Default)]
pub struct MockRadio {
    commands: Mutex<Vec<Command>>,
    sink: Mutex<Option<EventSink>>,

    links: Mutex<HashMap<u8, (BdAddr, AddrType)>>,
    params: Mutex<HashMap<ConnParam, u16>>,
    // conn_id handed out when connect() is called; None leaves the link down
    connect_as: Mutex<Option<u8>>,
    discovery: Mutex<Vec<GattcEvent>>,
    pub fail_scan_start: AtomicBool,
    pub fail_local_address: AtomicBool,
}

impl MockRadio {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn commands(&self) -> Vec<Command> {
        self.commands.lock().unwrap().clone()
    }

    pub fn count(&self, predicate: impl Fn(&Command) -> bool) -> usize {
        self.commands
            .lock()
            .unwrap()
            .iter()
            .filter(|command| predicate(command))
            .count()
    }

    pub fn clear(&self) {
        self.commands.lock().unwrap().clear();
    }

    pub fn sink(&self) -> EventSink {
        self.sink
            .lock()
            .unwrap()
            .clone()
            .expect("radio was never subscribed")
    }

    pub fn set_link(&self, conn_id: u8, addr: BdAddr, addr_type: AddrType) {
        self.links.lock().unwrap().insert(conn_id, (addr, addr_type));
    }

    pub fn set_param(&self, param: ConnParam, value: u16) {
        self.params.lock().unwrap().insert(param, value);
    }

    pub fn connect_as(&self, conn_id: u8) {
        *self.connect_as.lock().unwrap() = Some(conn_id);
    }

    pub fn set_discovery(&self, events: Vec<GattcEvent>) {
        *self.discovery.lock().unwrap() = events;
    }

    fn record(&self, command: Command) {
        self.commands.lock().unwrap().push(command);
    }
}

impl Radio for MockRadio {
    fn init(&self) -> anyhow::Result<()> {
        self.record(Command::Init);
        Ok(())
    }

    fn start(&self) -> anyhow::Result<()> {
        self.record(Command::Start);
        Ok(())
    }

    fn subscribe(&self, sink: EventSink) -> anyhow::Result<()> {
        *self.sink.lock().unwrap() = Some(sink);
        Ok(())
    }

    fn set_device_name(&self, name: &[u8; GAP_DEVICE_NAME_LEN]) -> anyhow::Result<()> {
        self.record(Command::SetDeviceName(name.to_vec()));
        Ok(())
    }

    fn local_address(&self) -> anyhow::Result<BdAddr> {
        self.record(Command::LocalAddress);
        if self.fail_local_address.load(Ordering::SeqCst) {
            anyhow::bail!("address not available");
        }
        Ok(BdAddr::from_msb_first([0x00, 0xe0, 0x4c, 0x23, 0x99, 0x87]))
    }

    fn set_adv_params(&self, params: &AdvParams) -> anyhow::Result<()> {
        self.record(Command::SetAdvParams(*params));
        Ok(())
    }

    fn set_adv_data(&self, data: &[u8]) -> anyhow::Result<()> {
        self.record(Command::SetAdvData(data.to_vec()));
        Ok(())
    }

    fn set_scan_response_data(&self, data: &[u8]) -> anyhow::Result<()> {
        self.record(Command::SetScanResponseData(data.to_vec()));
        Ok(())
    }

    fn adv_start(&self) -> anyhow::Result<()> {
        self.record(Command::AdvStart);
        Ok(())
    }

    fn adv_stop(&self) -> anyhow::Result<()> {
        self.record(Command::AdvStop);
        Ok(())
    }

    fn set_scan_params(&self, params: &ScanParams) -> anyhow::Result<()> {
        self.record(Command::SetScanParams(*params));
        Ok(())
    }

    fn scan_start(&self) -> anyhow::Result<()> {
        self.record(Command::ScanStart);
        if self.fail_scan_start.load(Ordering::SeqCst) {
            anyhow::bail!("controller busy");
        }
        Ok(())
    }

    fn scan_stop(&self) -> anyhow::Result<()> {
        self.record(Command::ScanStop);
        Ok(())
    }

    fn conn_param(&self, conn_id: u8, param: ConnParam) -> anyhow::Result<u16> {
        self.record(Command::ConnParam(conn_id, param));
        Ok(self
            .params
            .lock()
            .unwrap()
            .get(&param)
            .copied()
            .unwrap_or_default())
    }

    fn conn_address(&self, conn_id: u8) -> anyhow::Result<(BdAddr, AddrType)> {
        self.record(Command::ConnAddress(conn_id));
        self.links
            .lock()
            .unwrap()
            .get(&conn_id)
            .copied()
            .ok_or(anyhow::anyhow!("no link {}", conn_id))
    }

    fn connect(&self, addr: BdAddr, addr_type: AddrType) -> anyhow::Result<()> {
        self.record(Command::Connect(addr, addr_type));

        let conn_id = *self.connect_as.lock().unwrap();
        if let Some(conn_id) = conn_id {
            self.set_link(conn_id, addr, addr_type);
            self.sink()
                .handle_gap_message(GAP_MSG_LE_CONN_STATE_CHANGE, &conn_state(conn_id, 2, 0));
        }
        Ok(())
    }

    fn disconnect(&self, conn_id: u8) -> anyhow::Result<()> {
        self.record(Command::Disconnect(conn_id));
        Ok(())
    }

    fn bond_display_key(&self, conn_id: u8) -> anyhow::Result<u32> {
        self.record(Command::BondDisplayKey(conn_id));
        Ok(123456)
    }

    fn set_bond_oob_data(&self, data: &[u8; GAP_OOB_LEN]) -> anyhow::Result<()> {
        self.record(Command::SetBondOobData(*data));
        Ok(())
    }

    fn bond_confirm(
        &self,
        conn_id: u8,
        kind: BondKind,
        confirmation: Confirmation,
    ) -> anyhow::Result<()> {
        self.record(Command::BondConfirm(conn_id, kind, confirmation));
        Ok(())
    }

    fn gattc_register(&self) -> anyhow::Result<()> {
        self.record(Command::GattcRegister);
        self.sink().gatt_client_event(
            CLIENT_ID,
            0xff,
            GattcEvent::Registered {
                status: GATT_SUCCESS,
            },
        );
        Ok(())
    }

    fn gattc_discover_all(&self, client_id: u8, conn_id: u8) -> anyhow::Result<()> {
        self.record(Command::GattcDiscoverAll(client_id, conn_id));

        let events = self.discovery.lock().unwrap().clone();
        let sink = self.sink();
        for event in events {
            sink.gatt_client_event(client_id, conn_id, event);
        }
        sink.gatt_client_event(
            client_id,
            conn_id,
            GattcEvent::DiscoveryComplete {
                status: GATT_SUCCESS,
            },
        );
        Ok(())
    }
}

/// Initialised context on top of a fresh mock.
pub fn setup() -> (Ble, Arc<MockRadio>) {
    let _ = env_logger::try_init();

    let radio = MockRadio::new();
    let ble = Ble::new(radio.clone());
    ble.init("MyBeacon").unwrap();
    radio.clear();

    (ble, radio)
}

pub fn conn_state(conn_id: u8, state: u8, cause: u16) -> [u8; 4] {
    let cause = cause.to_le_bytes();
    [conn_id, state, cause[0], cause[1]]
}

pub fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}
