//! Durable network profiles.
//!
//! A [`Profile`] is the interface-scoped configuration needed to join one
//! network. The default [`InterfacesFile`] store keeps profiles as ifupdown
//! stanzas in `interfaces(5)` format:
//!
//! ```text
//! iface wlan0-home inet dhcp
//!     wireless-channel auto
//!     wpa-psk 0dc0d6eb90555ed6419756b9a15ec3e3209b63df707dd508d14581f8982721af
//!     wpa-ssid home
//! ```
//!
//! Everything in the file that is not a profile stanza (loopback, comments,
//! `source` lines, plain `iface wlan0 inet manual` stanzas) is kept verbatim
//! when the file is rewritten.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use pbkdf2::pbkdf2_hmac;
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use tracing::{debug, info};

use crate::error::{WifiError, WifiResult};
use crate::scan::{Cell, EncryptionType};

/// Number of PBKDF2 rounds used by WPA to turn a passphrase into a PSK.
const WPA_PSK_ROUNDS: u32 = 4096;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub interface: String,
    /// The SSID this profile joins.
    pub name: String,
    pub options: BTreeMap<String, String>,
}

impl Profile {
    /// ifupdown logical interface name for this profile.
    pub fn stanza_name(&self) -> String {
        format!("{}-{}", self.interface, self.name)
    }

    /// The derived credential kept in the options, never the plaintext.
    pub fn stored_passkey(&self) -> Option<&str> {
        self.options
            .get("wpa-psk")
            .or_else(|| self.options.get("wireless-key"))
            .map(String::as_str)
    }

    pub fn is_key(&self, interface: &str, ssid: &str) -> bool {
        self.interface == interface && self.name == ssid
    }
}

/// Builds the profile that joins `cell`, deriving authentication options from
/// its encryption type.
pub fn profile_for_cell(
    interface: &str,
    ssid: &str,
    cell: &Cell,
    passkey: Option<&str>,
) -> WifiResult<Profile> {
    let passkey = passkey.filter(|p| !p.is_empty());
    if cell.encrypted && passkey.is_none() {
        return Err(WifiError::passkey_required(ssid));
    }

    let mut options = BTreeMap::new();
    match (cell.encryption_type, passkey) {
        (Some(kind), Some(passkey)) if kind.is_wpa() => {
            options.insert("wpa-ssid".to_string(), ssid.to_string());
            options.insert("wpa-psk".to_string(), wpa_psk(ssid, passkey)?);
            options.insert("wireless-channel".to_string(), "auto".to_string());
        }
        (Some(EncryptionType::Wep), Some(passkey)) => {
            options.insert("wireless-essid".to_string(), ssid.to_string());
            options.insert("wireless-key".to_string(), wep_key(passkey));
        }
        _ => {
            options.insert("wireless-essid".to_string(), ssid.to_string());
            options.insert("wireless-channel".to_string(), "auto".to_string());
        }
    }

    Ok(Profile {
        interface: interface.to_string(),
        name: ssid.to_string(),
        options,
    })
}

/// WPA pre-shared key for `passphrase` on `ssid`, as `wpa_passphrase`
/// computes it. A 64 digit hex key is taken as already derived.
pub fn wpa_psk(ssid: &str, passphrase: &str) -> WifiResult<String> {
    if passphrase.len() == 64 && passphrase.chars().all(|c| c.is_ascii_hexdigit()) {
        return Ok(passphrase.to_ascii_lowercase());
    }

    let length = passphrase.chars().count();
    if !(8..=63).contains(&length) {
        return Err(WifiError::invalid_passkey(format!(
            "ssid {}: passphrase must be 8..63 characters",
            ssid
        )));
    }

    let mut psk = [0u8; 32];
    pbkdf2_hmac::<Sha1>(passphrase.as_bytes(), ssid.as_bytes(), WPA_PSK_ROUNDS, &mut psk);
    Ok(psk.iter().map(|b| format!("{:02x}", b)).collect())
}

/// ASCII WEP keys (5 or 13 characters) need the `s:` prefix; anything else is
/// passed through as a hex key.
fn wep_key(passkey: &str) -> String {
    match passkey.len() {
        5 | 13 => format!("s:{}", passkey),
        _ => passkey.to_string(),
    }
}

/// Owner of the durable profiles.
///
/// `delete` and `save` are inverses: a profile removed by `delete` is put
/// back unchanged by `save`, which is what rollback relies on.
pub trait ProfileStore: Send + Sync {
    fn find(&self, interface: &str, ssid: &str) -> WifiResult<Option<Profile>>;

    fn all(&self) -> WifiResult<Vec<Profile>>;

    /// Creates and stores the profile joining `cell`.
    ///
    /// Fails with `PasskeyRequired` for an encrypted cell without passkey and
    /// with `AlreadyExists` (carrying the stored profile) if the key is taken.
    fn create(
        &self,
        interface: &str,
        ssid: &str,
        cell: &Cell,
        passkey: Option<&str>,
    ) -> WifiResult<Profile>;

    /// Writes `profile` as is, replacing any profile with the same key.
    fn save(&self, profile: &Profile) -> WifiResult<()>;

    fn delete(&self, profile: &Profile) -> WifiResult<()>;
}

#[derive(Debug, Clone, PartialEq)]
enum Entry {
    Raw(String),
    /// A profile stanza with the lines it was read from. The lines are
    /// written back untouched until the profile itself changes.
    Profile(Profile, Option<Vec<String>>),
}

/// Profiles kept as stanzas of an ifupdown `interfaces` file.
///
/// A stanza is a profile when its logical name is `<interface>-<ssid>` and
/// it names a network (`wpa-ssid` or `wireless-essid`). Any other stanza is
/// foreign and kept as text.
pub struct InterfacesFile {
    path: PathBuf,
    lock: Mutex<()>,
}

impl InterfacesFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_entries(&self) -> WifiResult<Vec<Entry>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&self.path).map_err(|e| {
            WifiError::persistence(format!("failed to read {}: {}", self.path.display(), e))
        })?;
        Ok(parse_entries(&content))
    }

    fn write_entries(&self, entries: &[Entry]) -> WifiResult<()> {
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, render_entries(entries)).map_err(|e| {
            WifiError::persistence(format!("failed to write {}: {}", tmp.display(), e))
        })?;
        fs::rename(&tmp, &self.path).map_err(|e| {
            WifiError::persistence(format!("failed to replace {}: {}", self.path.display(), e))
        })?;
        debug!(path = %self.path.display(), "interfaces file written");
        Ok(())
    }

    fn insert(entries: &mut Vec<Entry>, profile: Profile) {
        let needs_gap = match entries.last() {
            Some(Entry::Raw(line)) => !line.trim().is_empty(),
            Some(Entry::Profile(..)) => true,
            None => false,
        };
        if needs_gap {
            entries.push(Entry::Raw(String::new()));
        }
        entries.push(Entry::Profile(profile, None));
    }

    /// Removes the stanza for the key, with the blank line that separated it.
    fn remove(entries: &mut Vec<Entry>, interface: &str, ssid: &str) -> bool {
        let Some(index) = entries
            .iter()
            .position(|e| matches!(e, Entry::Profile(p, _) if p.is_key(interface, ssid)))
        else {
            return false;
        };
        entries.remove(index);
        if index > 0 && matches!(&entries[index - 1], Entry::Raw(line) if line.trim().is_empty()) {
            entries.remove(index - 1);
        }
        true
    }
}

fn names_network(options: &BTreeMap<String, String>) -> bool {
    options.contains_key("wpa-ssid") || options.contains_key("wireless-essid")
}

/// Rejects profiles that would not read back as the same profile.
fn validate(profile: &Profile) -> WifiResult<()> {
    let valid = |s: &str| !s.is_empty() && !s.chars().any(char::is_whitespace);
    if !valid(&profile.interface) || !valid(&profile.name) || profile.interface.contains('-') {
        return Err(WifiError::persistence(format!(
            "{}:{}: cannot be stored as an ifupdown stanza",
            profile.interface, profile.name
        )));
    }
    if !names_network(&profile.options) {
        return Err(WifiError::persistence(format!(
            "{}:{}: profile names no network",
            profile.interface, profile.name
        )));
    }
    Ok(())
}

impl ProfileStore for InterfacesFile {
    fn find(&self, interface: &str, ssid: &str) -> WifiResult<Option<Profile>> {
        let _guard = self.lock.lock();
        Ok(self.read_entries()?.into_iter().find_map(|e| match e {
            Entry::Profile(p, _) if p.is_key(interface, ssid) => Some(p),
            _ => None,
        }))
    }

    fn all(&self) -> WifiResult<Vec<Profile>> {
        let _guard = self.lock.lock();
        Ok(self
            .read_entries()?
            .into_iter()
            .filter_map(|e| match e {
                Entry::Profile(p, _) => Some(p),
                Entry::Raw(_) => None,
            })
            .collect())
    }

    fn create(
        &self,
        interface: &str,
        ssid: &str,
        cell: &Cell,
        passkey: Option<&str>,
    ) -> WifiResult<Profile> {
        let _guard = self.lock.lock();
        let mut entries = self.read_entries()?;

        let existing = entries.iter().find_map(|e| match e {
            Entry::Profile(p, _) if p.is_key(interface, ssid) => Some(p.clone()),
            _ => None,
        });
        if let Some(existing) = existing {
            return Err(WifiError::already_exists(existing));
        }

        let profile = profile_for_cell(interface, ssid, cell, passkey)?;
        validate(&profile)?;
        Self::insert(&mut entries, profile.clone());
        self.write_entries(&entries)?;

        info!(interface, ssid, "profile created");
        Ok(profile)
    }

    fn save(&self, profile: &Profile) -> WifiResult<()> {
        validate(profile)?;
        let _guard = self.lock.lock();
        let mut entries = self.read_entries()?;

        let slot = entries.iter_mut().find_map(|e| match e {
            Entry::Profile(p, lines) if p.is_key(&profile.interface, &profile.name) => {
                Some((p, lines))
            }
            _ => None,
        });
        match slot {
            Some((stored, lines)) => {
                if *stored != *profile {
                    *stored = profile.clone();
                    *lines = None;
                }
            }
            None => Self::insert(&mut entries, profile.clone()),
        }
        self.write_entries(&entries)?;

        info!(interface = %profile.interface, ssid = %profile.name, "profile saved");
        Ok(())
    }

    fn delete(&self, profile: &Profile) -> WifiResult<()> {
        let _guard = self.lock.lock();
        let mut entries = self.read_entries()?;

        if Self::remove(&mut entries, &profile.interface, &profile.name) {
            self.write_entries(&entries)?;
            info!(interface = %profile.interface, ssid = %profile.name, "profile deleted");
        }
        Ok(())
    }
}

/// Splits `iface <interface>-<name> inet <method>` into interface and name.
fn profile_header(line: &str) -> Option<(String, String)> {
    let mut parts = line.split_whitespace();
    if parts.next()? != "iface" {
        return None;
    }
    let logical = parts.next()?;
    parts.next()?;
    parts.next()?;

    let (interface, name) = logical.split_once('-')?;
    if interface.is_empty() || name.is_empty() {
        return None;
    }
    Some((interface.to_string(), name.to_string()))
}

/// Option and comment lines of a stanza are indented and non-empty.
fn is_stanza_body(line: &str) -> bool {
    line.starts_with(char::is_whitespace) && !line.trim().is_empty()
}

fn stanza_options(body: &[&str]) -> BTreeMap<String, String> {
    body.iter()
        .map(|line| line.trim())
        .filter(|line| !line.starts_with('#'))
        .map(|line| {
            let (key, value) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
            (key.to_string(), value.trim().to_string())
        })
        .collect()
}

fn parse_entries(content: &str) -> Vec<Entry> {
    let lines: Vec<&str> = content.lines().collect();
    let mut entries = Vec::new();
    let mut index = 0;

    while index < lines.len() {
        let Some((interface, name)) = profile_header(lines[index]) else {
            entries.push(Entry::Raw(lines[index].to_string()));
            index += 1;
            continue;
        };

        let mut end = index + 1;
        while end < lines.len() && is_stanza_body(lines[end]) {
            end += 1;
        }
        let stanza = &lines[index..end];
        let options = stanza_options(&stanza[1..]);

        if names_network(&options) {
            let profile = Profile {
                interface,
                name,
                options,
            };
            let text = stanza.iter().map(|l| l.to_string()).collect();
            entries.push(Entry::Profile(profile, Some(text)));
        } else {
            entries.extend(stanza.iter().map(|l| Entry::Raw(l.to_string())));
        }
        index = end;
    }

    entries
}

fn render_entries(entries: &[Entry]) -> String {
    let mut out = String::new();
    for entry in entries {
        match entry {
            Entry::Raw(line) => {
                out.push_str(line);
                out.push('\n');
            }
            Entry::Profile(_, Some(lines)) => {
                for line in lines {
                    out.push_str(line);
                    out.push('\n');
                }
            }
            Entry::Profile(profile, None) => {
                out.push_str(&format!("iface {} inet dhcp\n", profile.stanza_name()));
                for (key, value) in &profile.options {
                    out.push_str(&format!("    {} {}\n", key, value));
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::scan::test_cell;

    const BASE: &str = "\
# interfaces(5) file used by ifup(8) and ifdown(8)
auto lo
iface lo inet loopback

allow-hotplug wlan0
iface wlan0 inet manual
    wpa-roam /etc/wpa_supplicant/wpa_supplicant.conf
";

    fn store_with(content: &str) -> (tempfile::TempDir, InterfacesFile) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("interfaces");
        fs::write(&path, content).unwrap();
        let store = InterfacesFile::new(path);
        (dir, store)
    }

    #[test]
    fn wpa_psk_matches_ieee_test_vector() {
        assert_eq!(
            wpa_psk("IEEE", "password").unwrap(),
            "f42c6fc52df0ebef9ebb4b90b38a5f902e83fe1b135a70e23aed762e9710a12e"
        );
    }

    #[test]
    fn wpa_psk_rejects_bad_lengths_and_keeps_raw_keys() {
        assert_eq!(
            wpa_psk("home", "short").unwrap_err().kind(),
            ErrorKind::InvalidPasskey
        );
        let raw = "A".repeat(64);
        assert_eq!(wpa_psk("home", &raw).unwrap(), "a".repeat(64));
    }

    #[test]
    fn options_follow_encryption_type() {
        let open = profile_for_cell("wlan0", "cafe", &test_cell("cafe", -40, None), None).unwrap();
        assert_eq!(open.options["wireless-essid"], "cafe");
        assert_eq!(open.options["wireless-channel"], "auto");
        assert_eq!(open.stored_passkey(), None);

        let wpa = profile_for_cell(
            "wlan0",
            "IEEE",
            &test_cell("IEEE", -40, Some(EncryptionType::Wpa2)),
            Some("password"),
        )
        .unwrap();
        assert_eq!(wpa.options["wpa-ssid"], "IEEE");
        assert_eq!(wpa.stored_passkey(), Some(wpa.options["wpa-psk"].as_str()));
        assert_ne!(wpa.stored_passkey(), Some("password"));

        let wep = profile_for_cell(
            "wlan0",
            "old",
            &test_cell("old", -40, Some(EncryptionType::Wep)),
            Some("abcde"),
        )
        .unwrap();
        assert_eq!(wep.options["wireless-key"], "s:abcde");
    }

    #[test]
    fn encrypted_cell_requires_passkey() {
        let cell = test_cell("home", -40, Some(EncryptionType::Wpa));
        let err = profile_for_cell("wlan0", "home", &cell, None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PasskeyRequired);
        let err = profile_for_cell("wlan0", "home", &cell, Some("")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PasskeyRequired);
    }

    #[test]
    fn create_find_and_reject_duplicates() {
        let (_dir, store) = store_with(BASE);
        let cell = test_cell("home", -40, Some(EncryptionType::Wpa2));

        let created = store.create("wlan0", "home", &cell, Some("password")).unwrap();
        assert_eq!(store.find("wlan0", "home").unwrap(), Some(created.clone()));
        assert_eq!(store.find("wlan1", "home").unwrap(), None);

        let err = store.create("wlan0", "home", &cell, Some("other-pass")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
        assert_eq!(err.existing_profile(), Some(&created));
        assert_eq!(store.all().unwrap().len(), 1);
    }

    #[test]
    fn foreign_stanzas_survive_create_and_delete() {
        let (_dir, store) = store_with(BASE);
        let profile = store
            .create("wlan0", "cafe", &test_cell("cafe", -40, None), None)
            .unwrap();

        let written = fs::read_to_string(store.path()).unwrap();
        assert!(written.starts_with(BASE));
        assert!(written.contains("iface wlan0-cafe inet dhcp\n    wireless-channel auto\n"));

        store.delete(&profile).unwrap();
        assert_eq!(fs::read_to_string(store.path()).unwrap(), BASE);
    }

    #[test]
    fn save_restores_a_deleted_profile() {
        let (_dir, store) = store_with("");
        let profile = store
            .create("wlan0", "cafe", &test_cell("cafe", -40, None), None)
            .unwrap();
        store.delete(&profile).unwrap();
        assert!(store.find("wlan0", "cafe").unwrap().is_none());

        store.save(&profile).unwrap();
        assert_eq!(store.find("wlan0", "cafe").unwrap(), Some(profile));
    }

    #[test]
    fn parses_existing_profile_stanzas() {
        let content = format!(
            "{}\niface wlan0-home inet dhcp\n    wpa-ssid home\n    wpa-psk abc\n# trailing\n",
            BASE
        );
        let (_dir, store) = store_with(&content);
        let all = store.all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].interface, "wlan0");
        assert_eq!(all[0].name, "home");
        assert_eq!(all[0].options["wpa-psk"], "abc");
    }

    #[test]
    fn dashed_foreign_stanzas_are_not_profiles() {
        let base = "\
auto br-lan
iface br-lan inet static
\taddress 10.0.0.5
\tnetmask 255.255.255.0
\tbridge_ports eth0 wlan1
";
        let (_dir, store) = store_with(base);
        assert!(store.all().unwrap().is_empty());

        store
            .create("wlan0", "cafe", &test_cell("cafe", -40, None), None)
            .unwrap();
        let written = fs::read_to_string(store.path()).unwrap();
        assert!(written.starts_with(base));
        assert!(written.contains("iface br-lan inet static\n\taddress 10.0.0.5\n"));
        assert_eq!(store.all().unwrap().len(), 1);
    }

    #[test]
    fn untouched_profiles_keep_their_text() {
        let base = "\
iface wlan0-home inet static
\t# office network
\twpa-ssid home
\twpa-psk abc
\taddress 192.168.1.50
";
        let (_dir, store) = store_with(base);
        let home = store.find("wlan0", "home").unwrap().unwrap();
        assert_eq!(home.stored_passkey(), Some("abc"));
        assert_eq!(home.options["address"], "192.168.1.50");

        store
            .create("wlan0", "cafe", &test_cell("cafe", -40, None), None)
            .unwrap();
        store.save(&home).unwrap();
        assert!(fs::read_to_string(store.path()).unwrap().starts_with(base));
    }

    #[test]
    fn indented_comments_stay_inside_the_stanza() {
        let content = "iface wlan0-home inet dhcp\n    # home\n    wpa-ssid home\n    wpa-psk abc\n";
        let (_dir, store) = store_with(content);
        let all = store.all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].stored_passkey(), Some("abc"));
        assert!(!all[0].options.contains_key("#"));
    }

    #[test]
    fn profiles_without_a_network_are_refused() {
        let (_dir, store) = store_with("");
        let err = store
            .save(&Profile {
                interface: "wlan0".to_string(),
                name: "cafe".to_string(),
                options: BTreeMap::new(),
            })
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PersistenceFailure);
    }

    #[test]
    fn whitespace_in_ssid_cannot_be_stored() {
        let (_dir, store) = store_with("");
        let err = store
            .create("wlan0", "my cafe", &test_cell("my cafe", -40, None), None)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PersistenceFailure);
        assert!(store.all().unwrap().is_empty());
    }

    #[test]
    fn missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = InterfacesFile::new(dir.path().join("absent"));
        assert!(store.all().unwrap().is_empty());
    }
}
