use crate::{address::BdAddr, peers::DEFAULT_MTU};

/// A central connected to one of our servers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerConnection {
    pub conn_id: u8,
    pub address: BdAddr,
    pub mtu: u16,
}

impl ServerConnection {
    pub fn new(conn_id: u8, address: BdAddr) -> Self {
        Self {
            conn_id,
            address,
            mtu: DEFAULT_MTU,
        }
    }
}
