//! Choice of the best known network in range.

use std::collections::HashSet;

use tracing::debug;

use crate::error::WifiResult;
use crate::profile::ProfileStore;
use crate::scan::{Cell, Scanner};

/// First cell (in ranked order) whose SSID is exactly one of `known`.
pub fn select_best<'a>(ranked: &'a [Cell], known: &HashSet<&str>) -> Option<&'a str> {
    ranked
        .iter()
        .map(|cell| cell.ssid.as_str())
        .find(|ssid| known.contains(ssid))
}

/// SSID of the strongest visible network that has a stored profile on any
/// interface, or an empty string if none does.
///
/// Scan failures propagate; callers decide what an unavailable interface
/// means.
pub fn best_known_network(
    scanner: &dyn Scanner,
    profiles: &dyn ProfileStore,
    interface: &str,
) -> WifiResult<String> {
    let scanned = scanner.scan(interface)?;
    let stored = profiles.all()?;
    let known: HashSet<&str> = stored.iter().map(|p| p.name.as_str()).collect();

    let best = select_best(&scanned, &known).unwrap_or_default().to_string();
    debug!(interface, best = %best, scanned = scanned.len(), known = known.len(), "selected network");
    Ok(best)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, WifiError};
    use crate::profile::{InterfacesFile, Profile};
    use crate::scan::{test_cell, MockScanner};
    use std::collections::BTreeMap;

    fn store_with(names: &[(&str, &str)]) -> (tempfile::TempDir, InterfacesFile) {
        let dir = tempfile::tempdir().unwrap();
        let store = InterfacesFile::new(dir.path().join("interfaces"));
        for (interface, name) in names {
            store
                .save(&Profile {
                    interface: interface.to_string(),
                    name: name.to_string(),
                    options: BTreeMap::from([(
                        "wireless-essid".to_string(),
                        name.to_string(),
                    )]),
                })
                .unwrap();
        }
        (dir, store)
    }

    fn scanner_returning(cells: Vec<Cell>) -> MockScanner {
        let mut scanner = MockScanner::new();
        scanner.expect_scan().returning(move |_| Ok(cells.clone()));
        scanner
    }

    #[test]
    fn picks_strongest_known_network() {
        let scanner = scanner_returning(vec![test_cell("A", -40, None), test_cell("B", -70, None)]);
        let (_dir, store) = store_with(&[("wlan0", "A"), ("wlan0", "C")]);

        assert_eq!(best_known_network(&scanner, &store, "wlan0").unwrap(), "A");
    }

    #[test]
    fn unknown_networks_yield_empty() {
        let scanner = scanner_returning(vec![test_cell("X", -50, None)]);
        let (_dir, store) = store_with(&[]);

        assert_eq!(best_known_network(&scanner, &store, "wlan0").unwrap(), "");
    }

    #[test]
    fn profiles_on_other_interfaces_count() {
        let scanner = scanner_returning(vec![test_cell("B", -60, None), test_cell("A", -65, None)]);
        let (_dir, store) = store_with(&[("wlan1", "A")]);

        assert_eq!(best_known_network(&scanner, &store, "wlan0").unwrap(), "A");
    }

    #[test]
    fn matching_is_case_sensitive() {
        let cells = vec![test_cell("home", -40, None)];
        let known: HashSet<&str> = ["Home"].into_iter().collect();
        assert_eq!(select_best(&cells, &known), None);
    }

    #[test]
    fn scan_failure_propagates() {
        let mut scanner = MockScanner::new();
        scanner
            .expect_scan()
            .returning(|_| Err(WifiError::interface_unavailable("Network is down")));
        let (_dir, store) = store_with(&[("wlan0", "A")]);

        let err = best_known_network(&scanner, &store, "wlan0").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InterfaceUnavailable);
    }
}
