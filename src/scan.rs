//! WiFi network scanning module.
//!
//! Scanning goes through the [`Scanner`] trait so the orchestration logic can
//! be exercised without a radio. The default implementation,
//! [`IwlistScanner`], runs `iwlist <interface> scan` and parses the cell
//! blocks it prints.
//!
//! # Ranking
//!
//! Every scanner result is passed through [`rank_cells`], which orders cells
//! strongest first. The sort is stable, so cells with equal signal keep the
//! order the driver reported them in. The selector and the scan listing both
//! rely on this ordering.
//!
//! # Example
//!
//! ```no_run
//! use wifi_manager::scan::{display_cells, IwlistScanner, Scanner};
//!
//! let scanner = IwlistScanner::default();
//! let cells = scanner.scan("wlan0").expect("Scan failed");
//! display_cells(&cells);
//! ```

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{WifiError, WifiResult};
use crate::interface::run_tool;

/// Encryption scheme advertised by a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncryptionType {
    Wep,
    Wpa,
    Wpa2,
}

impl EncryptionType {
    pub fn is_wpa(self) -> bool {
        matches!(self, EncryptionType::Wpa | EncryptionType::Wpa2)
    }
}

/// One entry of a scan: a wireless network visible from an interface.
///
/// Cells are produced fresh on every scan and never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cell {
    /// Network name. Empty for hidden networks.
    pub ssid: String,

    /// Signal level in dBm. Closer to zero is stronger.
    pub signal: i32,

    /// Link quality as reported by the driver (e.g., "70/70").
    pub quality: String,

    /// Centre frequency (e.g., "2.437 GHz").
    pub frequency: String,

    /// Supported bit rates in the order the driver listed them.
    pub bitrates: Vec<String>,

    pub encrypted: bool,

    /// Only present when `encrypted` is true.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption_type: Option<EncryptionType>,

    pub channel: u32,

    /// MAC address of the access point.
    pub address: String,

    /// Operating mode (e.g., "Master").
    pub mode: String,
}

/// How a requested SSID is compared with scanned SSIDs when resolving the
/// cell for a save.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SsidMatch {
    #[default]
    Exact,
    CaseInsensitive,
}

impl SsidMatch {
    /// Normalizes an SSID before equality comparison.
    pub fn normalize(self, ssid: &str) -> String {
        match self {
            SsidMatch::Exact => ssid.to_string(),
            SsidMatch::CaseInsensitive => ssid.to_lowercase(),
        }
    }

    pub fn matches(self, scanned: &str, requested: &str) -> bool {
        self.normalize(scanned) == self.normalize(requested)
    }
}

/// Platform scan capability.
#[cfg_attr(test, mockall::automock)]
pub trait Scanner: Send + Sync {
    /// Returns the cells visible from `interface`, strongest first.
    ///
    /// Fails with `InterfaceUnavailable` when the interface is down or
    /// missing.
    fn scan(&self, interface: &str) -> WifiResult<Vec<Cell>>;
}

/// Sorts cells by signal, strongest first. Ties keep scan order.
pub fn rank_cells(mut cells: Vec<Cell>) -> Vec<Cell> {
    cells.sort_by(|a, b| b.signal.cmp(&a.signal));
    cells
}

/// Returns the first cell whose SSID matches `ssid` under `policy`.
pub fn find_cell<'a>(cells: &'a [Cell], ssid: &str, policy: SsidMatch) -> Option<&'a Cell> {
    cells.iter().find(|c| policy.matches(&c.ssid, ssid))
}

/// Scanner backed by the wireless-tools `iwlist` command.
#[derive(Debug, Clone)]
pub struct IwlistScanner {
    /// Command prefix, e.g. `["sudo", "iwlist"]`.
    pub command: Vec<String>,
}

impl Default for IwlistScanner {
    fn default() -> Self {
        Self {
            command: vec!["iwlist".to_string()],
        }
    }
}

impl IwlistScanner {
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }
}

impl Scanner for IwlistScanner {
    fn scan(&self, interface: &str) -> WifiResult<Vec<Cell>> {
        let output = run_tool(&self.command, &[interface, "scan"])
            .map_err(|e| WifiError::interface_unavailable(e.message().to_string()))?;

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if !output.status.success() || reports_interface_down(&stderr) {
            return Err(WifiError::interface_unavailable(stderr));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let cells = parse_iwlist(&stdout);
        debug!(interface, count = cells.len(), "scan completed");

        Ok(rank_cells(cells))
    }
}

fn reports_interface_down(stderr: &str) -> bool {
    stderr.contains("Network is down") || stderr.contains("No such device")
}

/// Accumulates the fields of one `Cell NN - Address:` block.
#[derive(Default)]
struct CellBuilder {
    address: String,
    ssid: String,
    signal: i32,
    quality: String,
    frequency: String,
    bitrates: Vec<String>,
    encrypted: bool,
    wpa: bool,
    wpa2: bool,
    channel: u32,
    mode: String,
}

impl CellBuilder {
    fn build(self) -> Cell {
        let encryption_type = if !self.encrypted {
            None
        } else if self.wpa2 {
            Some(EncryptionType::Wpa2)
        } else if self.wpa {
            Some(EncryptionType::Wpa)
        } else {
            Some(EncryptionType::Wep)
        };

        Cell {
            ssid: self.ssid,
            signal: self.signal,
            quality: self.quality,
            frequency: self.frequency,
            bitrates: self.bitrates,
            encrypted: self.encrypted,
            encryption_type,
            channel: self.channel,
            address: self.address,
            mode: self.mode,
        }
    }
}

/// Parses the output of `iwlist <interface> scan` into cells, in the order
/// they were printed.
pub fn parse_iwlist(output: &str) -> Vec<Cell> {
    let mut cells = Vec::new();
    let mut current: Option<CellBuilder> = None;
    let mut in_bitrates = false;

    for raw in output.lines() {
        let line = raw.trim();

        if line.starts_with("Cell ") {
            if let Some(done) = current.take() {
                cells.push(done.build());
            }
            let address = line
                .split_once("Address:")
                .map(|(_, a)| a.trim().to_string())
                .unwrap_or_default();
            current = Some(CellBuilder {
                address,
                ..Default::default()
            });
            in_bitrates = false;
            continue;
        }

        let Some(cell) = current.as_mut() else {
            continue;
        };

        if line.starts_with("Quality") || line.starts_with("Signal level") {
            in_bitrates = false;
            parse_quality_line(line, cell);
            continue;
        }

        if let Some(rest) = line.strip_prefix("IE:") {
            in_bitrates = false;
            if rest.contains("WPA2") {
                cell.wpa2 = true;
            } else if rest.contains("WPA") {
                cell.wpa = true;
            }
            continue;
        }

        let Some((key, value)) = line.split_once(':') else {
            // Continuation of a multi-line "Bit Rates:" entry.
            if in_bitrates {
                cell.bitrates.extend(split_bitrates(line));
            }
            continue;
        };
        in_bitrates = false;

        match key.trim() {
            "ESSID" => cell.ssid = value.trim().trim_matches('"').to_string(),
            "Mode" => cell.mode = value.trim().to_string(),
            "Channel" => {
                if let Ok(channel) = value.trim().parse() {
                    cell.channel = channel;
                }
            }
            "Frequency" => {
                let value = value.trim();
                match value.split_once('(') {
                    Some((freq, rest)) => {
                        cell.frequency = freq.trim().to_string();
                        let channel = rest
                            .trim_end_matches(')')
                            .trim()
                            .strip_prefix("Channel")
                            .and_then(|c| c.trim().parse().ok());
                        if let Some(channel) = channel {
                            cell.channel = channel;
                        }
                    }
                    None => cell.frequency = value.to_string(),
                }
            }
            "Encryption key" => cell.encrypted = value.trim() == "on",
            "Bit Rates" => {
                in_bitrates = true;
                cell.bitrates.extend(split_bitrates(value));
            }
            _ => {}
        }
    }

    if let Some(done) = current.take() {
        cells.push(done.build());
    }

    cells
}

fn split_bitrates(value: &str) -> impl Iterator<Item = String> + '_ {
    value
        .split(';')
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(str::to_string)
}

/// Handles `Quality=70/70  Signal level=-40 dBm` and its `:`-separated and
/// `N/100` variants.
fn parse_quality_line(line: &str, cell: &mut CellBuilder) {
    if let Some(rest) = line
        .strip_prefix("Quality=")
        .or_else(|| line.strip_prefix("Quality:"))
    {
        cell.quality = rest.split_whitespace().next().unwrap_or_default().to_string();
    }

    let signal = line
        .split_once("Signal level=")
        .or_else(|| line.split_once("Signal level:"))
        .and_then(|(_, rest)| rest.split_whitespace().next())
        .and_then(parse_signal);
    if let Some(signal) = signal {
        cell.signal = signal;
    }
}

/// Converts a signal token to dBm. Percentages (`60/100`) map linearly onto
/// -100..-50 dBm.
fn parse_signal(token: &str) -> Option<i32> {
    if let Some((num, den)) = token.split_once('/') {
        let num: i32 = num.parse().ok()?;
        let den: i32 = den.parse().ok()?;
        if den == 0 {
            return None;
        }
        let percent = num * 100 / den;
        return Some(percent / 2 - 100);
    }
    token.trim_end_matches("dBm").parse().ok()
}

/// Displays a list of cells in a formatted table.
///
/// # Output Format
/// ```text
/// SSID                             SIGNAL  CH SECURITY
/// ------------------------------------------------------------
/// MyHomeNetwork                   -40 dBm ████   6 wpa2
/// OpenCafe                        -78 dBm █░░░  11
/// ```
pub fn display_cells(cells: &[Cell]) {
    if cells.is_empty() {
        println!("No networks found.");
        return;
    }

    println!("{:<32} {:>7} {:<4} {:>3} {}", "SSID", "SIGNAL", "", "CH", "SECURITY");
    println!("{}", "-".repeat(60));

    for cell in cells {
        let security = match cell.encryption_type {
            Some(EncryptionType::Wep) => "wep",
            Some(EncryptionType::Wpa) => "wpa",
            Some(EncryptionType::Wpa2) => "wpa2",
            None => "",
        };
        println!(
            "{:<32} {:>3} dBm {} {:>3} {}",
            truncate_ssid(&cell.ssid, 32),
            cell.signal,
            signal_to_bar(cell.signal),
            cell.channel,
            security
        );
    }
}

/// Truncates an SSID to fit a column, appending "..." when shortened.
fn truncate_ssid(ssid: &str, max_len: usize) -> String {
    if ssid.chars().count() > max_len {
        let kept: String = ssid.chars().take(max_len - 3).collect();
        format!("{}...", kept)
    } else {
        ssid.to_string()
    }
}

/// Four-segment bar for a dBm reading.
fn signal_to_bar(signal: i32) -> &'static str {
    match signal {
        -55..=0 => "████",
        -67..=-56 => "███░",
        -75..=-68 => "██░░",
        -85..=-76 => "█░░░",
        _ => "░░░░",
    }
}

#[cfg(test)]
pub(crate) fn test_cell(ssid: &str, signal: i32, encryption: Option<EncryptionType>) -> Cell {
    Cell {
        ssid: ssid.to_string(),
        signal,
        quality: "50/70".to_string(),
        frequency: "2.437 GHz".to_string(),
        bitrates: vec!["54 Mb/s".to_string()],
        encrypted: encryption.is_some(),
        encryption_type: encryption,
        channel: 6,
        address: "00:11:22:33:44:55".to_string(),
        mode: "Master".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const IWLIST: &str = r#"wlan0     Scan completed :
          Cell 01 - Address: 00:11:22:33:44:55
                    Channel:6
                    Frequency:2.437 GHz (Channel 6)
                    Quality=40/70  Signal level=-70 dBm
                    Encryption key:on
                    ESSID:"office"
                    Bit Rates:1 Mb/s; 2 Mb/s; 5.5 Mb/s; 11 Mb/s; 18 Mb/s
                              24 Mb/s; 36 Mb/s; 54 Mb/s
                    Bit Rates:6 Mb/s; 9 Mb/s
                    Mode:Master
                    Extra:tsf=0000000000000000
                    IE: IEEE 802.11i/WPA2 Version 1
                        Group Cipher : CCMP
          Cell 02 - Address: AA:BB:CC:DD:EE:FF
                    Channel:11
                    Frequency:2.462 GHz (Channel 11)
                    Quality=70/70  Signal level=-40 dBm
                    Encryption key:off
                    ESSID:"cafe"
                    Bit Rates:54 Mb/s
                    Mode:Master
          Cell 03 - Address: 12:34:56:78:9A:BC
                    Frequency:5.18 GHz (Channel 36)
                    Quality:4/5  Signal level:60/100
                    Encryption key:on
                    ESSID:"legacy"
                    Mode:Master
                    IE: WPA Version 1
          Cell 04 - Address: 01:02:03:04:05:06
                    Channel:1
                    Quality=30/70  Signal level=-80 dBm
                    Encryption key:on
                    ESSID:"old"
                    Mode:Master
"#;

    #[test]
    fn parses_iwlist_cells() {
        let cells = parse_iwlist(IWLIST);
        assert_eq!(cells.len(), 4);

        let office = &cells[0];
        assert_eq!(office.ssid, "office");
        assert_eq!(office.address, "00:11:22:33:44:55");
        assert_eq!(office.signal, -70);
        assert_eq!(office.quality, "40/70");
        assert_eq!(office.frequency, "2.437 GHz");
        assert_eq!(office.channel, 6);
        assert_eq!(office.mode, "Master");
        assert!(office.encrypted);
        assert_eq!(office.encryption_type, Some(EncryptionType::Wpa2));
        assert_eq!(office.bitrates.len(), 10);
        assert_eq!(office.bitrates[5], "24 Mb/s");

        assert_eq!(cells[1].encryption_type, None);
        assert!(!cells[1].encrypted);

        assert_eq!(cells[2].channel, 36);
        assert_eq!(cells[2].signal, -70);
        assert_eq!(cells[2].quality, "4/5");
        assert_eq!(cells[2].encryption_type, Some(EncryptionType::Wpa));

        assert_eq!(cells[3].encryption_type, Some(EncryptionType::Wep));
    }

    #[test]
    fn ranking_is_strongest_first_and_stable() {
        let cells = vec![
            test_cell("weak", -80, None),
            test_cell("tie-a", -50, None),
            test_cell("strong", -30, None),
            test_cell("tie-b", -50, None),
        ];
        let ranked: Vec<String> = rank_cells(cells).into_iter().map(|c| c.ssid).collect();
        assert_eq!(ranked, ["strong", "tie-a", "tie-b", "weak"]);
    }

    #[test]
    fn find_cell_honours_match_policy() {
        let cells = vec![test_cell("Home", -40, None)];
        assert!(find_cell(&cells, "home", SsidMatch::Exact).is_none());
        assert!(find_cell(&cells, "Home", SsidMatch::Exact).is_some());
        assert!(find_cell(&cells, "home", SsidMatch::CaseInsensitive).is_some());
    }

    #[test]
    fn open_cells_serialize_without_encryption_type() {
        let json = serde_json::to_value(test_cell("cafe", -40, None)).unwrap();
        assert!(json.get("encryption_type").is_none());

        let json = serde_json::to_value(test_cell("home", -40, Some(EncryptionType::Wpa2))).unwrap();
        assert_eq!(json["encryption_type"], "wpa2");
    }

    #[test]
    fn truncates_long_ssids() {
        assert_eq!(truncate_ssid("Short", 10), "Short");
        assert_eq!(truncate_ssid("VeryLongNetworkName", 10), "VeryLon...");
    }
}
