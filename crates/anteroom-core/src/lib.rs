pub mod config;
pub mod counterpart;
pub mod error;
pub mod notify;
pub mod ports;
pub mod status;
pub mod sync;

pub use config::CoreConfig;
pub use error::{PortalError, PortalResult};
