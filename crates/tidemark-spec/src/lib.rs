pub mod config;
pub mod fingerprint;

pub use config::*;
pub use fingerprint::*;
