pub mod config;
pub mod error;
pub mod logger;
pub mod peer;
pub mod session;
pub mod utils;

#[cfg(feature = "tauri")]
pub mod commands;

pub use config::Config;
pub use error::{CallError, DecodeError, EngineError, InvalidCodeError, MediaAccessError};
pub use peer::codec::{decode, encode, fingerprint};
pub use session::PeerSessionController;

#[cfg(feature = "tauri")]
pub use commands::init;
