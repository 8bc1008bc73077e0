//! BlueZ-backed transports: bluest for the central role and bluer for the
//! peripheral role.

mod central;
mod peripheral;

pub use central::BluestBus;
pub use peripheral::BluerRegistrar;
