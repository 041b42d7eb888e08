use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, RwLock, Weak,
};

use crossbeam_channel::{bounded, Receiver, Sender};

use crate::{
    error::BleError,
    radio::{AdvParams, Radio},
    scan::advertised_device::{
        AD_TYPE_APPEARANCE, AD_TYPE_COMPLETE_128, AD_TYPE_COMPLETE_16, AD_TYPE_COMPLETE_32,
        AD_TYPE_COMPLETE_NAME, AD_TYPE_FLAGS, AD_TYPE_MANUFACTURER_DATA, AD_TYPE_SERVICE_DATA_128,
        AD_TYPE_SERVICE_DATA_16, AD_TYPE_SERVICE_DATA_32, AD_TYPE_SHORT_NAME, AD_TYPE_TX_POWER,
    },
    uuid::BleUuid,
};

pub const AD_FLAG_LE_LIMITED_DISCOVERABLE: u8 = 0b00000001;
pub const LE_GENERAL_DISCOVERABLE: u8 = 0b00000010;
pub const BR_EDR_NOT_SUPPORTED: u8 = 0b00000100;

/// Largest legacy advertising or scan response payload.
pub const MAX_ADV_DATA_LEN: usize = 31;

const MIN_ADV_INTERVAL: u16 = 0x0020;
const MAX_ADV_INTERVAL: u16 = 0x4000;

#[derive(Debug, Clone, Copy)]
pub enum AdStructure<'a> {
    /// Must not be used in scan response data.
    Flags(u8),

    /// Complete list of service UUIDs. Mixed sizes produce one structure per size.
    ServiceUuids(&'a [BleUuid]),

    ServiceData {
        uuid: BleUuid,
        data: &'a [u8],
    },

    CompleteLocalName(&'a str),
    ShortenedLocalName(&'a str),

    TxPowerLevel(i8),
    Appearance(u16),

    ManufacturerSpecificData {
        company_identifier: u16,
        payload: &'a [u8],
    },

    Unknown {
        ty: u8,
        data: &'a [u8],
    },
}

fn append_structure(buffer: &mut Vec<u8>, ty: u8, body: &[u8]) {
    buffer.push((body.len() + 1) as u8);
    buffer.push(ty);
    buffer.extend_from_slice(body);
}

impl AdStructure<'_> {
    fn append_to(&self, buffer: &mut Vec<u8>) {
        match self {
            AdStructure::Flags(flags) => append_structure(buffer, AD_TYPE_FLAGS, &[*flags]),
            AdStructure::ServiceUuids(uuids) => {
                for (size, ty) in [
                    (2, AD_TYPE_COMPLETE_16),
                    (4, AD_TYPE_COMPLETE_32),
                    (16, AD_TYPE_COMPLETE_128),
                ] {
                    let mut body = Vec::new();
                    for uuid in uuids.iter().filter(|uuid| uuid.encoded_len() == size) {
                        uuid.append_le(&mut body);
                    }
                    if !body.is_empty() {
                        append_structure(buffer, ty, &body);
                    }
                }
            }
            AdStructure::ServiceData { uuid, data } => {
                let ty = match uuid.encoded_len() {
                    2 => AD_TYPE_SERVICE_DATA_16,
                    4 => AD_TYPE_SERVICE_DATA_32,
                    _ => AD_TYPE_SERVICE_DATA_128,
                };
                let mut body = Vec::with_capacity(uuid.encoded_len() + data.len());
                uuid.append_le(&mut body);
                body.extend_from_slice(data);
                append_structure(buffer, ty, &body);
            }
            AdStructure::CompleteLocalName(name) => {
                append_structure(buffer, AD_TYPE_COMPLETE_NAME, name.as_bytes())
            }
            AdStructure::ShortenedLocalName(name) => {
                append_structure(buffer, AD_TYPE_SHORT_NAME, name.as_bytes())
            }
            AdStructure::TxPowerLevel(power) => {
                append_structure(buffer, AD_TYPE_TX_POWER, &[*power as u8])
            }
            AdStructure::Appearance(appearance) => {
                append_structure(buffer, AD_TYPE_APPEARANCE, &appearance.to_le_bytes())
            }
            AdStructure::ManufacturerSpecificData {
                company_identifier,
                payload,
            } => {
                let mut body = company_identifier.to_le_bytes().to_vec();
                body.extend_from_slice(payload);
                append_structure(buffer, AD_TYPE_MANUFACTURER_DATA, &body);
            }
            AdStructure::Unknown { ty, data } => append_structure(buffer, *ty, data),
        }
    }
}

/// Serializes `structures` into one advertising payload of at most 31 bytes.
pub fn create_advertising_data(structures: &[AdStructure]) -> Result<Vec<u8>, BleError> {
    let mut data = Vec::with_capacity(MAX_ADV_DATA_LEN);
    for structure in structures {
        structure.append_to(&mut data);
    }

    if data.len() > MAX_ADV_DATA_LEN {
        return Err(BleError::PayloadTooLong(data.len()));
    }

    Ok(data)
}

#[derive(Clone)]
pub struct Advertising(pub Arc<AdvertisingInner>);

pub struct AdvertisingInner {
    radio: Arc<dyn Radio>,
    params: RwLock<AdvParams>,
    adv_data: RwLock<Vec<u8>>,
    scan_response: RwLock<Option<Vec<u8>>>,

    // Cleared by stop(); re-arming only happens while set
    enabled: AtomicBool,
    restart_tx: Sender<()>,
}

impl Advertising {
    pub(crate) fn new(radio: Arc<dyn Radio>) -> anyhow::Result<Self> {
        let (restart_tx, restart_rx) = bounded(1);
        let advertising = AdvertisingInner {
            radio,
            params: RwLock::new(AdvParams::default()),
            adv_data: RwLock::new(Vec::new()),
            scan_response: RwLock::new(None),
            enabled: AtomicBool::new(false),
            restart_tx,
        };
        let advertising = Self(Arc::new(advertising));

        advertising.spawn_restart_worker(restart_rx)?;

        Ok(advertising)
    }

    fn spawn_restart_worker(&self, restart_rx: Receiver<()>) -> anyhow::Result<()> {
        let advertising: Weak<AdvertisingInner> = Arc::downgrade(&self.0);
        std::thread::Builder::new()
            .name("ble-adv".into())
            .stack_size(8 * 1024)
            .spawn(move || {
                log::info!("Starting advertising restart thread");

                for _ in restart_rx.iter() {
                    let Some(advertising) = advertising.upgrade() else {
                        log::warn!("Advertising dropped, exiting restart thread");
                        return;
                    };

                    if !advertising.enabled.load(Ordering::SeqCst) {
                        log::info!("Advertising was stopped, not restarting");
                        continue;
                    }

                    if let Err(err) = advertising.radio.adv_start() {
                        log::error!("Failed to restart advertising: {:?}", err);
                    }
                }
            })?;

        Ok(())
    }

    pub fn set_params(&self, params: AdvParams) -> anyhow::Result<()> {
        for (name, value) in [
            ("interval_min", params.interval_min),
            ("interval_max", params.interval_max),
        ] {
            if !(MIN_ADV_INTERVAL..=MAX_ADV_INTERVAL).contains(&value) {
                return Err(BleError::InvalidParameter {
                    name,
                    value: value as u32,
                }
                .into());
            }
        }
        if params.interval_min > params.interval_max {
            return Err(BleError::InvalidParameter {
                name: "interval_min",
                value: params.interval_min as u32,
            }
            .into());
        }

        *self
            .0
            .params
            .write()
            .map_err(|_| anyhow::anyhow!("Failed to write advertising params"))? = params;

        Ok(())
    }

    pub fn params(&self) -> anyhow::Result<AdvParams> {
        Ok(*self
            .0
            .params
            .read()
            .map_err(|_| anyhow::anyhow!("Failed to read advertising params"))?)
    }

    pub fn set_data(&self, structures: &[AdStructure]) -> anyhow::Result<()> {
        let data = create_advertising_data(structures)?;
        *self
            .0
            .adv_data
            .write()
            .map_err(|_| anyhow::anyhow!("Failed to write advertising data"))? = data;

        Ok(())
    }

    pub fn set_scan_response(&self, structures: &[AdStructure]) -> anyhow::Result<()> {
        let data = create_advertising_data(structures)?;
        *self
            .0
            .scan_response
            .write()
            .map_err(|_| anyhow::anyhow!("Failed to write scan response"))? = Some(data);

        Ok(())
    }

    /// Pushes parameters and payloads to the controller and starts advertising.
    pub fn start(&self) -> anyhow::Result<()> {
        let params = self.params()?;
        self.0.radio.set_adv_params(&params)?;

        {
            let data = self
                .0
                .adv_data
                .read()
                .map_err(|_| anyhow::anyhow!("Failed to read advertising data"))?;
            self.0.radio.set_adv_data(&data)?;
        }
        {
            let scan_response = self
                .0
                .scan_response
                .read()
                .map_err(|_| anyhow::anyhow!("Failed to read scan response"))?;
            if let Some(scan_response) = scan_response.as_ref() {
                self.0.radio.set_scan_response_data(scan_response)?;
            }
        }

        self.0.radio.adv_start()?;
        self.0.enabled.store(true, Ordering::SeqCst);
        log::info!("Advertising started");

        Ok(())
    }

    pub fn stop(&self) -> anyhow::Result<()> {
        self.0.enabled.store(false, Ordering::SeqCst);
        self.0.radio.adv_stop()?;
        log::info!("Advertising stopped");

        Ok(())
    }

    pub fn is_enabled(&self) -> bool {
        self.0.enabled.load(Ordering::SeqCst)
    }

    /// Asks the worker to start advertising again. Returns at once.
    pub(crate) fn request_restart(&self) {
        if !self.is_enabled() {
            log::info!("Advertising disabled, not re-arming");
            return;
        }

        if self.0.restart_tx.try_send(()).is_err() {
            log::debug!("Advertising restart already pending");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_length_type_value_structures() {
        let uuids = [BleUuid::uuid16(0x180f), BleUuid::uuid16(0x180a)];
        let data = create_advertising_data(&[
            AdStructure::Flags(LE_GENERAL_DISCOVERABLE | BR_EDR_NOT_SUPPORTED),
            AdStructure::ServiceUuids(&uuids),
            AdStructure::CompleteLocalName("Ameba"),
        ])
        .unwrap();

        assert_eq!(
            data,
            vec![
                0x02, 0x01, 0x06, //
                0x05, 0x03, 0x0f, 0x18, 0x0a, 0x18, //
                0x06, 0x09, b'A', b'm', b'e', b'b', b'a',
            ]
        );
    }

    #[test]
    fn service_data_carries_uuid_first() {
        let data = create_advertising_data(&[AdStructure::ServiceData {
            uuid: BleUuid::uuid16(0xfeaa),
            data: &[0x20, 0x00],
        }])
        .unwrap();

        assert_eq!(data, vec![0x05, 0x16, 0xaa, 0xfe, 0x20, 0x00]);
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let name = "a-very-long-device-name-that-does-not-fit";
        assert_eq!(
            create_advertising_data(&[AdStructure::CompleteLocalName(name)]),
            Err(BleError::PayloadTooLong(name.len() + 2))
        );
    }
}
