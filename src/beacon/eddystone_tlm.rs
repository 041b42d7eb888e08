use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{error::BleError, scan::advertised_device::AdvertisedDevice, uuid::BleUuid};

pub const EDDYSTONE_UUID: u16 = 0xfeaa;
pub const EDDYSTONE_TLM_FRAME_TYPE: u8 = 0x20;

/// Encoded size of an unencrypted TLM frame.
pub const TLM_FRAME_LEN: usize = 14;

// Eddystone fields are big endian; fixed int encoding keeps every field at its declared width.
fn wire_config() -> impl bincode::config::Config {
    bincode::config::standard()
        .with_big_endian()
        .with_fixed_int_encoding()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct TlmFrame {
    frame_type: u8,
    version: u8,
    volt: u16,
    // signed 8.8 fixed point
    temp: i16,
    adv_count: u32,
    // uptime in 0.1 s ticks
    tmil: u32,
}

/// Eddystone telemetry frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EddystoneTlm {
    uuid: BleUuid,
    frame: TlmFrame,
}

impl Default for EddystoneTlm {
    fn default() -> Self {
        Self {
            uuid: BleUuid::uuid16(EDDYSTONE_UUID),
            frame: TlmFrame {
                frame_type: EDDYSTONE_TLM_FRAME_TYPE,
                version: 0,
                volt: 3300,
                temp: 23 << 8,
                adv_count: 0,
                tmil: 0,
            },
        }
    }
}

impl EddystoneTlm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads the TLM frame from the Eddystone service data of `device`, if it carries one.
    pub fn from_advertised_device(device: &AdvertisedDevice) -> anyhow::Result<Option<Self>> {
        let Some(data) = device.service_data_for(&BleUuid::uuid16(EDDYSTONE_UUID)) else {
            return Ok(None);
        };
        if data.first() != Some(&EDDYSTONE_TLM_FRAME_TYPE) {
            return Ok(None);
        }

        let mut tlm = Self::new();
        tlm.set_data(data)?;
        Ok(Some(tlm))
    }

    /// The frame as sent over the air.
    pub fn data(&self) -> anyhow::Result<Vec<u8>> {
        bincode::serde::encode_to_vec(self.frame, wire_config())
            .map_err(|err| anyhow::anyhow!("Failed to encode TLM frame: {:?}", err))
    }

    /// Replaces the frame with `data`. Anything but exactly 14 bytes is rejected and the
    /// current frame is kept.
    pub fn set_data(&mut self, data: &[u8]) -> anyhow::Result<()> {
        if data.len() != TLM_FRAME_LEN {
            return Err(BleError::InvalidLength {
                expected: TLM_FRAME_LEN,
                actual: data.len(),
            }
            .into());
        }

        let (frame, _): (TlmFrame, usize) =
            bincode::serde::decode_from_slice(data, wire_config())
                .map_err(|err| anyhow::anyhow!("Failed to decode TLM frame: {:?}", err))?;
        self.frame = frame;

        Ok(())
    }

    pub fn uuid(&self) -> BleUuid {
        self.uuid
    }

    pub fn set_uuid(&mut self, uuid: BleUuid) {
        self.uuid = uuid;
    }

    pub fn frame_type(&self) -> u8 {
        self.frame.frame_type
    }

    pub fn version(&self) -> u8 {
        self.frame.version
    }

    pub fn set_version(&mut self, version: u8) {
        self.frame.version = version;
    }

    /// Battery voltage in millivolts.
    pub fn volt(&self) -> u16 {
        self.frame.volt
    }

    pub fn set_volt(&mut self, volt: u16) {
        self.frame.volt = volt;
    }

    /// Beacon temperature in degrees Celsius.
    pub fn temp(&self) -> f32 {
        self.frame.temp as f32 / 256.0
    }

    /// Rounded to 1/256 °C and clamped to the range of the 8.8 encoding.
    pub fn set_temp(&mut self, temp: f32) {
        self.frame.temp = (temp * 256.0).round() as i16;
    }

    pub fn count(&self) -> u32 {
        self.frame.adv_count
    }

    pub fn set_count(&mut self, adv_count: u32) {
        self.frame.adv_count = adv_count;
    }

    /// Time since power-up in 0.1 s units.
    pub fn time(&self) -> u32 {
        self.frame.tmil
    }

    pub fn set_time(&mut self, tmil: u32) {
        self.frame.tmil = tmil;
    }
}

impl fmt::Display for EddystoneTlm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ticks = self.frame.tmil;

        writeln!(f, "Version {}", self.frame.version)?;
        writeln!(f, "Battery Voltage {} mV", self.frame.volt)?;
        writeln!(f, "Temperature {:.1} °C", self.temp())?;
        writeln!(f, "Adv. Count {}", self.frame.adv_count)?;
        writeln!(
            f,
            "Time {:04}.{:02}:{:02}:{:02}",
            ticks / 864000,
            (ticks / 36000) % 24,
            (ticks / 600) % 60,
            (ticks / 10) % 60
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::{AddrType, BdAddr};

    #[test]
    fn default_frame_encodes_big_endian() {
        let tlm = EddystoneTlm::new();
        assert_eq!(
            tlm.data().unwrap(),
            vec![0x20, 0x00, 0x0c, 0xe4, 0x17, 0x00, 0, 0, 0, 0, 0, 0, 0, 0]
        );
        assert_eq!(tlm.uuid(), BleUuid::uuid16(0xfeaa));
        assert_eq!(tlm.temp(), 23.0);
    }

    #[test]
    fn decode_restores_every_field() {
        let mut tlm = EddystoneTlm::new();
        tlm.set_version(1);
        tlm.set_volt(2950);
        tlm.set_temp(-4.5);
        tlm.set_count(0x0102_0304);
        tlm.set_time(1_234_567);

        let mut decoded = EddystoneTlm::new();
        decoded.set_data(&tlm.data().unwrap()).unwrap();
        assert_eq!(decoded, tlm);
        assert_eq!(decoded.temp(), -4.5);
    }

    #[test]
    fn wrong_length_leaves_frame_untouched() {
        let mut tlm = EddystoneTlm::new();
        tlm.set_count(7);
        let before = tlm.clone();

        for len in [0, 13, 15, 20] {
            let err = tlm.set_data(&vec![0xff; len]).unwrap_err();
            assert_eq!(
                err.downcast_ref::<BleError>(),
                Some(&BleError::InvalidLength {
                    expected: TLM_FRAME_LEN,
                    actual: len
                })
            );
        }
        assert_eq!(tlm, before);
    }

    #[test]
    fn display_formats_uptime() {
        let mut tlm = EddystoneTlm::new();
        // 1 day, 2 h, 3 min, 4 s
        tlm.set_time(864000 + 2 * 36000 + 3 * 600 + 40);

        let text = tlm.to_string();
        assert!(text.contains("Battery Voltage 3300 mV"));
        assert!(text.contains("Temperature 23.0 °C"));
        assert!(text.contains("Time 0001.02:03:04"));
    }

    #[test]
    fn reads_frame_from_service_data() {
        let mut payload = vec![0x11, 0x16, 0xaa, 0xfe];
        payload.extend_from_slice(&EddystoneTlm::new().data().unwrap());

        let mut device = AdvertisedDevice::new(BdAddr::default(), AddrType::Public, -70, 0);
        device.parse_advertisement(&payload).unwrap();

        let tlm = EddystoneTlm::from_advertised_device(&device).unwrap().unwrap();
        assert_eq!(tlm.volt(), 3300);

        let other = AdvertisedDevice::new(BdAddr::default(), AddrType::Public, -70, 0);
        assert!(EddystoneTlm::from_advertised_device(&other).unwrap().is_none());
    }
}
