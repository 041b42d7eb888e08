use std::fmt;

use crate::{
    address::{AddrType, BdAddr},
    error::BleError,
    uuid::BleUuid,
};

pub const AD_TYPE_FLAGS: u8 = 0x01;
pub const AD_TYPE_INCOMPLETE_16: u8 = 0x02;
pub const AD_TYPE_COMPLETE_16: u8 = 0x03;
pub const AD_TYPE_INCOMPLETE_32: u8 = 0x04;
pub const AD_TYPE_COMPLETE_32: u8 = 0x05;
pub const AD_TYPE_INCOMPLETE_128: u8 = 0x06;
pub const AD_TYPE_COMPLETE_128: u8 = 0x07;
pub const AD_TYPE_SHORT_NAME: u8 = 0x08;
pub const AD_TYPE_COMPLETE_NAME: u8 = 0x09;
pub const AD_TYPE_TX_POWER: u8 = 0x0a;
pub const AD_TYPE_SERVICE_DATA_16: u8 = 0x16;
pub const AD_TYPE_APPEARANCE: u8 = 0x19;
pub const AD_TYPE_SERVICE_DATA_32: u8 = 0x20;
pub const AD_TYPE_SERVICE_DATA_128: u8 = 0x21;
pub const AD_TYPE_MANUFACTURER_DATA: u8 = 0xff;

/// A device seen in one advertising report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvertisedDevice {
    address: BdAddr,
    address_type: AddrType,
    rssi: i8,
    adv_type: u8,
    payload: Vec<u8>,

    flags: Option<u8>,
    name: Option<String>,
    service_uuids: Vec<BleUuid>,
    service_data: Vec<(BleUuid, Vec<u8>)>,
    manufacturer_data: Option<Vec<u8>>,
    tx_power: Option<i8>,
    appearance: Option<u16>,
}

impl AdvertisedDevice {
    pub fn new(address: BdAddr, address_type: AddrType, rssi: i8, adv_type: u8) -> Self {
        Self {
            address,
            address_type,
            rssi,
            adv_type,
            payload: Vec::new(),
            flags: None,
            name: None,
            service_uuids: Vec::new(),
            service_data: Vec::new(),
            manufacturer_data: None,
            tx_power: None,
            appearance: None,
        }
    }

    /// Walks the length/type/value structures of `payload`.
    ///
    /// Fields decoded before a malformed structure are kept; everything after it is
    /// ignored and the error is returned so the caller can log it.
    pub fn parse_advertisement(&mut self, payload: &[u8]) -> Result<(), BleError> {
        self.payload = payload.to_vec();

        let mut offset = 0;
        while offset < payload.len() {
            let len = payload[offset] as usize;
            if len == 0 {
                // Zero length marks the significant part as finished.
                break;
            }
            if offset + 1 + len > payload.len() {
                return Err(BleError::MalformedPayload {
                    what: "advertising structure",
                    needed: offset + 1 + len,
                    actual: payload.len(),
                });
            }

            let ad_type = payload[offset + 1];
            let data = &payload[offset + 2..offset + 1 + len];
            self.parse_structure(ad_type, data)?;

            offset += len + 1;
        }

        Ok(())
    }

    fn parse_structure(&mut self, ad_type: u8, data: &[u8]) -> Result<(), BleError> {
        match ad_type {
            AD_TYPE_FLAGS => {
                self.flags = Some(*first(data, "flags")?);
            }
            AD_TYPE_INCOMPLETE_16 | AD_TYPE_COMPLETE_16 => self.parse_uuid_list(data, 2)?,
            AD_TYPE_INCOMPLETE_32 | AD_TYPE_COMPLETE_32 => self.parse_uuid_list(data, 4)?,
            AD_TYPE_INCOMPLETE_128 | AD_TYPE_COMPLETE_128 => self.parse_uuid_list(data, 16)?,
            AD_TYPE_SHORT_NAME | AD_TYPE_COMPLETE_NAME => {
                // A complete name wins over a shortened one seen earlier.
                if self.name.is_none() || ad_type == AD_TYPE_COMPLETE_NAME {
                    self.name = Some(String::from_utf8_lossy(data).into_owned());
                }
            }
            AD_TYPE_TX_POWER => {
                self.tx_power = Some(*first(data, "tx power")? as i8);
            }
            AD_TYPE_APPEARANCE => {
                if data.len() < 2 {
                    return Err(BleError::MalformedPayload {
                        what: "appearance",
                        needed: 2,
                        actual: data.len(),
                    });
                }
                self.appearance = Some(u16::from_le_bytes([data[0], data[1]]));
            }
            AD_TYPE_SERVICE_DATA_16 => self.parse_service_data(data, 2)?,
            AD_TYPE_SERVICE_DATA_32 => self.parse_service_data(data, 4)?,
            AD_TYPE_SERVICE_DATA_128 => self.parse_service_data(data, 16)?,
            AD_TYPE_MANUFACTURER_DATA => {
                self.manufacturer_data = Some(data.to_vec());
            }
            other => {
                log::trace!("Skipping AD type 0x{:02x} ({} bytes)", other, data.len());
            }
        }

        Ok(())
    }

    fn parse_uuid_list(&mut self, data: &[u8], size: usize) -> Result<(), BleError> {
        if data.len() % size != 0 {
            return Err(BleError::MalformedPayload {
                what: "service uuid list",
                needed: data.len() - data.len() % size + size,
                actual: data.len(),
            });
        }

        self.service_uuids
            .extend(data.chunks_exact(size).filter_map(BleUuid::from_le_slice));
        Ok(())
    }

    fn parse_service_data(&mut self, data: &[u8], size: usize) -> Result<(), BleError> {
        if data.len() < size {
            return Err(BleError::MalformedPayload {
                what: "service data",
                needed: size,
                actual: data.len(),
            });
        }

        let (uuid, value) = data.split_at(size);
        if let Some(uuid) = BleUuid::from_le_slice(uuid) {
            self.service_data.push((uuid, value.to_vec()));
        }
        Ok(())
    }

    pub fn address(&self) -> BdAddr {
        self.address
    }

    pub fn address_type(&self) -> AddrType {
        self.address_type
    }

    pub fn rssi(&self) -> i8 {
        self.rssi
    }

    pub fn adv_type(&self) -> u8 {
        self.adv_type
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn flags(&self) -> Option<u8> {
        self.flags
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn service_uuids(&self) -> &[BleUuid] {
        &self.service_uuids
    }

    pub fn is_advertising_service(&self, uuid: &BleUuid) -> bool {
        self.service_uuids.iter().any(|known| known.matches(uuid))
    }

    pub fn service_data(&self) -> &[(BleUuid, Vec<u8>)] {
        &self.service_data
    }

    pub fn service_data_for(&self, uuid: &BleUuid) -> Option<&[u8]> {
        self.service_data
            .iter()
            .find(|(known, _)| known.matches(uuid))
            .map(|(_, data)| data.as_slice())
    }

    /// Raw manufacturer data, company identifier included.
    pub fn manufacturer_data(&self) -> Option<&[u8]> {
        self.manufacturer_data.as_deref()
    }

    pub fn tx_power(&self) -> Option<i8> {
        self.tx_power
    }

    pub fn appearance(&self) -> Option<u16> {
        self.appearance
    }
}

fn first<'a>(data: &'a [u8], what: &'static str) -> Result<&'a u8, BleError> {
    data.first().ok_or(BleError::MalformedPayload {
        what,
        needed: 1,
        actual: 0,
    })
}

impl fmt::Display for AdvertisedDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address: {}", self.address)?;
        if let Some(name) = &self.name {
            write!(f, ", Name: {}", name)?;
        }
        if let Some(appearance) = self.appearance {
            write!(f, ", appearance: {}", appearance)?;
        }
        if let Some(data) = &self.manufacturer_data {
            write!(f, ", manufacturer data: ")?;
            for byte in data {
                write!(f, "{:02x}", byte)?;
            }
        }
        for uuid in &self.service_uuids {
            write!(f, ", serviceUUID: {}", uuid)?;
        }
        if let Some(tx_power) = self.tx_power {
            write!(f, ", txPower: {}", tx_power)?;
        }
        write!(f, ", rssi: {}", self.rssi)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device() -> AdvertisedDevice {
        AdvertisedDevice::new(BdAddr::from_bytes([1, 2, 3, 4, 5, 6]), AddrType::Public, -60, 0)
    }

    #[test]
    fn parses_typed_fields() {
        let payload = [
            0x02, 0x01, 0x06, // flags
            0x03, 0x03, 0x0f, 0x18, // complete 16-bit uuids: battery
            0x05, 0x09, b'T', b'e', b's', b't', // complete name
            0x02, 0x0a, 0xf4, // tx power -12
            0x05, 0xff, 0x4c, 0x00, 0x02, 0x15, // manufacturer data
            0x05, 0x16, 0xaa, 0xfe, 0x20, 0x00, // service data 0xfeaa
        ];

        let mut device = device();
        device.parse_advertisement(&payload).unwrap();

        assert_eq!(device.flags(), Some(0x06));
        assert_eq!(device.name(), Some("Test"));
        assert!(device.is_advertising_service(&BleUuid::uuid16(0x180f)));
        assert_eq!(device.tx_power(), Some(-12));
        assert_eq!(device.manufacturer_data(), Some(&[0x4c, 0x00, 0x02, 0x15][..]));
        assert_eq!(
            device.service_data_for(&BleUuid::uuid16(0xfeaa)),
            Some(&[0x20, 0x00][..])
        );
        assert_eq!(device.payload(), &payload[..]);
    }

    #[test]
    fn truncated_structure_keeps_earlier_fields() {
        // name claims 9 bytes but only 3 follow
        let payload = [0x02, 0x01, 0x06, 0x0a, 0x09, b'a', b'b', b'c'];

        let mut device = device();
        let err = device.parse_advertisement(&payload).unwrap_err();

        assert!(matches!(err, BleError::MalformedPayload { .. }));
        assert_eq!(device.flags(), Some(0x06));
        assert_eq!(device.name(), None);
    }

    #[test]
    fn uneven_uuid_list_stops_parsing() {
        let payload = [0x04, 0x03, 0x0f, 0x18, 0x00, 0x02, 0x01, 0x06];

        let mut device = device();
        assert!(device.parse_advertisement(&payload).is_err());
        assert!(device.service_uuids().is_empty());
        assert_eq!(device.flags(), None);
    }

    #[test]
    fn zero_length_terminates_quietly() {
        let payload = [0x02, 0x01, 0x04, 0x00, 0xde, 0xad];

        let mut device = device();
        device.parse_advertisement(&payload).unwrap();
        assert_eq!(device.flags(), Some(0x04));
    }
}
