//! Wireless network manager for Linux hosts using ifupdown.
//!
//! Scans for access points, keeps one persistent profile per
//! (interface, SSID) in the interfaces file alongside a SQLite record of
//! where the network was last seen, and joins networks with a bounded
//! retry loop. The same operations are exposed on the command line and
//! over an authenticated REST API.
//!
//! # Modules
//!
//! - [`scan`] - access point discovery and the cell model
//! - [`profile`] - profiles, passkey derivation and the interfaces file store
//! - [`records`] - SQLite store of known networks and their locations
//! - [`interface`] - bringing interfaces up and down, activating profiles
//! - [`selector`] - choosing the best known network in range
//! - [`manager`] - save/connect/delete orchestration and the retry loop
//! - [`server`] - REST API
//! - [`config`] - TOML configuration
//! - [`error`] - error kinds shared by every layer
//!
//! # Example
//!
//! ```no_run
//! use wifi_manager::{config::Config, WifiManager};
//!
//! let config = Config::load(None).expect("config");
//! let manager = WifiManager::from_config(&config).expect("stores");
//!
//! let best = manager.best_known_network("wlan0").expect("scan");
//! if !best.is_empty() {
//!     let connection = manager.connect("wlan0", &best, None, None, None).expect("connect");
//!     println!("joined {} after {} attempts", connection.profile.name, connection.attempts);
//! }
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod interface;
pub mod manager;
pub mod profile;
pub mod records;
pub mod scan;
pub mod selector;
pub mod server;

pub use error::{ErrorKind, WifiError, WifiResult};
pub use interface::{IfupdownControl, InterfaceControl, InterfaceInfo};
pub use manager::{ConnectPolicy, Connection, Saved, WifiManager};
pub use profile::{InterfacesFile, Profile, ProfileStore};
pub use records::{DeleteSummary, Record, RecordStore, SqliteRecordStore, LOCATION_UNKNOWN};
pub use scan::{Cell, EncryptionType, IwlistScanner, Scanner, SsidMatch};
