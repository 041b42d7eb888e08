pub mod eddystone_tlm;

pub use eddystone_tlm::EddystoneTlm;
