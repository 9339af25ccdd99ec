pub mod broker;
pub mod colors;
pub mod events;
pub mod key;
pub mod stall;

pub use broker::{BrokerRequest, BrokerResponse, MapConfig, MapCredentials, is_zip_archive};
pub use colors::Rgb;
pub use events::*;
pub use key::{first_present, normalize_key};
pub use stall::{Stall, StallMap, StallStatus, stalls_fingerprint};
