use crate::{
    address::{AddrType, BdAddr},
    error::BleError,
};

use super::event::ConnState;

/// Maximum number of concurrent central links tracked by the host.
pub const MAX_LINKS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LinkRecord {
    pub conn_state: ConnState,
    pub bd_addr: BdAddr,
    pub bd_addr_type: AddrType,
    pub tx_phy: u8,
    pub rx_phy: u8,
}

/// Central-role link records indexed by connection id.
#[derive(Debug, Clone)]
pub struct LinkTable {
    links: [LinkRecord; MAX_LINKS],
}

impl Default for LinkTable {
    fn default() -> Self {
        Self {
            links: [LinkRecord::default(); MAX_LINKS],
        }
    }
}

impl LinkTable {
    fn index(conn_id: u8) -> Result<usize, BleError> {
        let index = conn_id as usize;
        if index >= MAX_LINKS {
            return Err(BleError::InvalidConnId {
                conn_id,
                max: MAX_LINKS,
            });
        }
        Ok(index)
    }

    pub fn get(&self, conn_id: u8) -> Result<&LinkRecord, BleError> {
        Ok(&self.links[Self::index(conn_id)?])
    }

    pub fn get_mut(&mut self, conn_id: u8) -> Result<&mut LinkRecord, BleError> {
        Ok(&mut self.links[Self::index(conn_id)?])
    }

    pub fn set_state(&mut self, conn_id: u8, state: ConnState) -> Result<(), BleError> {
        self.get_mut(conn_id)?.conn_state = state;
        Ok(())
    }

    /// Zeroes the whole record: address, state and cached parameters.
    pub fn reset(&mut self, conn_id: u8) -> Result<(), BleError> {
        *self.get_mut(conn_id)? = LinkRecord::default();
        Ok(())
    }

    pub fn connected_count(&self) -> usize {
        self.links
            .iter()
            .filter(|link| link.conn_state != ConnState::Disconnected)
            .count()
    }

    /// Fails with `NoCapacity` once every slot up to `limit` is in use.
    pub fn ensure_capacity(&self, limit: usize) -> Result<(), BleError> {
        if self.connected_count() >= limit.min(MAX_LINKS) {
            return Err(BleError::NoCapacity("link table"));
        }
        Ok(())
    }

    pub fn find_by_address(&self, addr: &BdAddr) -> Option<u8> {
        self.links
            .iter()
            .position(|link| link.conn_state == ConnState::Connected && link.bd_addr == *addr)
            .map(|index| index as u8)
    }

    pub fn iter(&self) -> impl Iterator<Item = (u8, &LinkRecord)> {
        self.links
            .iter()
            .enumerate()
            .map(|(index, link)| (index as u8, link))
    }
}
