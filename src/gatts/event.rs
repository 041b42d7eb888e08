/// GATT server events, already decoded by the radio adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GattsEvent {
    ServiceRegistered {
        status: u16,
    },
    Read {
        conn_id: u8,
        handle: u16,
        offset: u16,
    },
    Write {
        conn_id: u8,
        handle: u16,
        value: Vec<u8>,
    },
    CccdUpdate {
        conn_id: u8,
        handle: u16,
        notify: bool,
        indicate: bool,
    },
    SendComplete {
        conn_id: u8,
        handle: u16,
        status: u16,
    },
    Other(u8),
}

impl GattsEvent {
    pub fn conn_id(&self) -> Option<u8> {
        match self {
            GattsEvent::Read { conn_id, .. }
            | GattsEvent::Write { conn_id, .. }
            | GattsEvent::CccdUpdate { conn_id, .. }
            | GattsEvent::SendComplete { conn_id, .. } => Some(*conn_id),
            GattsEvent::ServiceRegistered { .. } | GattsEvent::Other(_) => None,
        }
    }
}
