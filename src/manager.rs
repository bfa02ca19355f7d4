//! Connection orchestration.
//!
//! [`WifiManager`] ties the collaborators together: it resolves cells through
//! the [`Scanner`], writes profiles and records as one logical operation
//! (undoing the profile half when the record half fails), and drives the
//! bounded retry loop that activates a profile.
//!
//! # Connection states
//!
//! ```text
//! Idle -> Saved -> Activating -> Connected
//!                     |  ^
//!                     |  | interface up, backoff
//!                     v  |
//!                  (retry) ---- budget exhausted ----> Failed
//! ```
//!
//! The retry budget is wall-clock time measured from the first activation
//! attempt; at least one attempt is always made.
//!
//! # Concurrency
//!
//! Calls that mutate the stores (`save`, `connect`, `delete`) must be
//! serialized per interface by the caller. The two stores are written one
//! after the other, and a concurrent writer on the same interface could see
//! a profile without its record.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::{Config, ConnectConfig};
use crate::error::{ErrorKind, WifiError, WifiResult};
use crate::interface::{IfupdownControl, InterfaceControl, InterfaceInfo};
use crate::profile::{InterfacesFile, Profile, ProfileStore};
use crate::records::{DeleteSummary, Record, RecordStore, SqliteRecordStore};
use crate::scan::{Cell, IwlistScanner, Scanner, SsidMatch, find_cell};
use crate::selector;

/// Tunables of the connect loop and of cell resolution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConnectPolicy {
    /// Wait between two activation attempts.
    pub retry_after: Duration,
    /// Budget for all attempts, from the first one.
    pub timeout: Duration,
    pub ssid_match: SsidMatch,
}

impl Default for ConnectPolicy {
    fn default() -> Self {
        Self::from(&ConnectConfig::default())
    }
}

impl From<&ConnectConfig> for ConnectPolicy {
    fn from(config: &ConnectConfig) -> Self {
        Self {
            retry_after: config.retry_after(),
            timeout: config.timeout(),
            ssid_match: config.ssid_match,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectState {
    Idle,
    Saved,
    Activating { attempt: u32 },
    Connected,
    Failed,
}

/// Result of the save protocol.
#[derive(Debug, Clone, PartialEq)]
pub struct Saved {
    pub profile: Profile,
    /// False when the profile was already stored and got reused.
    pub created: bool,
}

/// A successful connect.
#[derive(Debug, Clone, PartialEq)]
pub struct Connection {
    pub profile: Profile,
    pub attempts: u32,
    pub elapsed: Duration,
    pub address: Option<String>,
}

pub struct WifiManager {
    scanner: Arc<dyn Scanner>,
    profiles: Arc<dyn ProfileStore>,
    records: Arc<dyn RecordStore>,
    control: Arc<dyn InterfaceControl>,
    clock: Arc<dyn Clock>,
    policy: ConnectPolicy,
}

impl WifiManager {
    pub fn new(
        scanner: Arc<dyn Scanner>,
        profiles: Arc<dyn ProfileStore>,
        records: Arc<dyn RecordStore>,
        control: Arc<dyn InterfaceControl>,
        policy: ConnectPolicy,
    ) -> Self {
        Self {
            scanner,
            profiles,
            records,
            control,
            clock: Arc::new(SystemClock),
            policy,
        }
    }

    /// Manager wired to the system tools and stores named in `config`.
    pub fn from_config(config: &Config) -> WifiResult<Self> {
        let records = SqliteRecordStore::open(&config.store.database)?;
        info!(
            database = %config.store.database.display(),
            interfaces = %config.store.interfaces_file.display(),
            "stores opened"
        );

        Ok(Self::new(
            Arc::new(IwlistScanner::new(config.commands.iwlist.clone())),
            Arc::new(InterfacesFile::new(config.store.interfaces_file.clone())),
            Arc::new(records),
            Arc::new(IfupdownControl::new(config.commands.clone())),
            ConnectPolicy::from(&config.connect),
        ))
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn policy(&self) -> &ConnectPolicy {
        &self.policy
    }

    /// Interface names, with their IPv4 address when `addresses` is set.
    pub fn list_interfaces(&self, addresses: bool) -> WifiResult<Vec<InterfaceInfo>> {
        let mut interfaces = self.control.interfaces()?;
        if !addresses {
            for interface in &mut interfaces {
                interface.address = None;
            }
        }
        Ok(interfaces)
    }

    pub fn scan(&self, interface: &str) -> WifiResult<Vec<Cell>> {
        self.scanner.scan(interface)
    }

    /// SSID the interface is associated with right now, or empty. Derived
    /// from the interface every time.
    pub fn status(&self, interface: &str) -> String {
        self.control.current_ssid(interface).unwrap_or_else(|e| {
            debug!(interface, error = %e, "status unavailable");
            String::new()
        })
    }

    pub fn best_known_network(&self, interface: &str) -> WifiResult<String> {
        selector::best_known_network(self.scanner.as_ref(), self.profiles.as_ref(), interface)
    }

    pub fn networks(&self) -> WifiResult<Vec<Profile>> {
        self.profiles.all()
    }

    pub fn network_records(&self) -> WifiResult<Vec<Record>> {
        self.records.all()
    }

    pub fn last_location(&self, ssid: &str) -> WifiResult<(f64, f64)> {
        self.records.last_location(ssid)
    }

    pub fn enable(&self, interface: &str) -> WifiResult<()> {
        self.control.up(interface)?;
        info!(interface, "interface enabled");
        Ok(())
    }

    pub fn disable(&self, interface: &str) -> WifiResult<()> {
        self.control.down(interface)?;
        info!(interface, "interface disabled");
        Ok(())
    }

    /// Stores a profile for a network currently in range together with its
    /// record.
    ///
    /// An already stored profile is reused. Missing coordinates keep the
    /// record's last known location. If the record cannot be written and the
    /// profile was created by this call, the profile is removed again before
    /// the error is returned.
    pub fn save(
        &self,
        interface: &str,
        ssid: &str,
        passkey: Option<&str>,
        lat: Option<f64>,
        lng: Option<f64>,
    ) -> WifiResult<Saved> {
        let cells = self.scanner.scan(interface)?;
        let cell = find_cell(&cells, ssid, self.policy.ssid_match)
            .ok_or_else(|| WifiError::cell_not_found(ssid))?;
        // The scanned spelling is authoritative for the stored key.
        let ssid = cell.ssid.as_str();

        let (profile, created) = match self.profiles.find(interface, ssid)? {
            Some(existing) => (existing, false),
            None => match self.profiles.create(interface, ssid, cell, passkey) {
                Ok(profile) => (profile, true),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => match e.into_existing_profile() {
                    Some(existing) => (existing, false),
                    None => return Err(WifiError::persistence(format!(
                        "{}:{}: profile reported as existing but not found",
                        interface, ssid
                    ))),
                },
                Err(e) => return Err(e),
            },
        };

        // Without coordinates the record keeps its last known location.
        if let Err(e) = self
            .records
            .upsert(interface, ssid, profile.stored_passkey(), lat, lng)
        {
            if created {
                warn!(interface, ssid, error = %e, "record write failed, removing new profile");
                if let Err(rollback) = self.profiles.delete(&profile) {
                    error!(interface, ssid, error = %rollback, "profile rollback failed");
                }
            }
            return Err(e);
        }

        if created {
            info!(interface, ssid, "network saved");
        } else {
            debug!(interface, ssid, "network already saved, record refreshed");
        }
        Ok(Saved { profile, created })
    }

    /// Saves the network, then activates its profile until it succeeds or the
    /// retry budget runs out.
    pub fn connect(
        &self,
        interface: &str,
        ssid: &str,
        passkey: Option<&str>,
        lat: Option<f64>,
        lng: Option<f64>,
    ) -> WifiResult<Connection> {
        let mut state = ConnectState::Idle;

        let Saved { profile, .. } = self.save(interface, ssid, passkey, lat, lng)?;
        transition(&mut state, ConnectState::Saved, &profile);

        let start = self.clock.now();
        let mut attempts = 0;

        loop {
            attempts += 1;
            transition(&mut state, ConnectState::Activating { attempt: attempts }, &profile);

            let mut reason = match self.control.activate(&profile) {
                Ok(activation) => {
                    let elapsed = self.clock.now().duration_since(start);
                    transition(&mut state, ConnectState::Connected, &profile);
                    info!(
                        interface,
                        ssid = %profile.name,
                        attempts,
                        elapsed_secs = elapsed.as_secs_f64(),
                        "connected"
                    );
                    return Ok(Connection {
                        profile,
                        attempts,
                        elapsed,
                        address: activation.address,
                    });
                }
                Err(e) => e,
            };
            warn!(interface, ssid = %profile.name, attempt = attempts, error = %reason, "activation failed");

            // The interface may be wedged after a failed association.
            if let Err(e) = self.control.up(interface) {
                warn!(interface, error = %e, "interface recovery failed");
                reason = e;
            }

            self.clock.sleep(self.policy.retry_after);

            let elapsed = self.clock.now().duration_since(start);
            if elapsed >= self.policy.timeout {
                transition(&mut state, ConnectState::Failed, &profile);
                return Err(WifiError::connection_failed(format!(
                    "{}:{}: not connected after {} attempts in {}s: {}",
                    interface,
                    profile.name,
                    attempts,
                    elapsed.as_secs(),
                    reason
                )));
            }
        }
    }

    /// Deletes the profile and its record. With `db_only` the profile stays
    /// and only the record goes.
    ///
    /// If the record cannot be deleted the profile is restored before the
    /// error is returned.
    pub fn delete(&self, interface: &str, ssid: &str, db_only: bool) -> WifiResult<()> {
        let profile = self
            .profiles
            .find(interface, ssid)?
            .ok_or_else(|| WifiError::profile_not_found(ssid))?;

        if !db_only {
            self.profiles.delete(&profile)?;
        }

        if let Err(e) = self.records.delete(interface, ssid) {
            if !db_only {
                warn!(interface, ssid, error = %e, "record delete failed, restoring profile");
                if let Err(restore) = self.profiles.save(&profile) {
                    error!(interface, ssid, error = %restore, "profile restore failed");
                }
            }
            return Err(e);
        }

        info!(interface, ssid, db_only, "network deleted");
        Ok(())
    }

    /// Deletes every profile (with its record) or, with `db_only`, every
    /// record. Individual failures are logged and listed in the summary;
    /// the remaining entries are still processed.
    pub fn delete_all(&self, db_only: bool) -> WifiResult<DeleteSummary> {
        let summary = if db_only {
            self.records.delete_all()?
        } else {
            let profiles = self.profiles.all()?;
            let mut summary = DeleteSummary {
                total: profiles.len(),
                ..Default::default()
            };
            for profile in profiles {
                match self.delete(&profile.interface, &profile.name, false) {
                    Ok(()) => summary.deleted += 1,
                    Err(e) => {
                        warn!(interface = %profile.interface, ssid = %profile.name, error = %e, "scheme not deleted");
                        summary
                            .failed
                            .push(format!("{}:{}", profile.interface, profile.name));
                    }
                }
            }
            summary
        };

        if summary.is_complete() {
            info!(total = summary.total, db_only, "all networks deleted");
        } else {
            warn!(total = summary.total, deleted = summary.deleted, db_only, "networks partially deleted");
        }
        Ok(summary)
    }
}

fn transition(state: &mut ConnectState, next: ConnectState, profile: &Profile) {
    debug!(
        interface = %profile.interface,
        ssid = %profile.name,
        from = ?state,
        to = ?next,
        "connect state"
    );
    *state = next;
}
