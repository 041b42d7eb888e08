pub mod address;
pub mod advertising;
pub mod beacon;
pub mod ble;
pub mod error;
pub mod gap;
pub mod gattc;
pub mod gatts;
pub mod peers;
pub mod radio;
pub mod scan;
pub mod uuid;

pub use address::{AddrType, BdAddr};
pub use ble::{Ble, EventSink};
pub use error::BleError;
pub use radio::Radio;
pub use uuid::BleUuid;
