use std::process::{Command, Output};

use serde::Serialize;
use tracing::debug;

use crate::config::CommandsConfig;
use crate::error::{WifiError, WifiResult};
use crate::profile::Profile;

/// A network interface as reported by the OS.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InterfaceInfo {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

/// Result of applying a profile to an interface.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Activation {
    /// Address leased by DHCP, when the tool reported one.
    pub address: Option<String>,
}

/// OS-level operations on wireless interfaces.
///
/// Every call blocks until the underlying tool returns.
#[cfg_attr(test, mockall::automock)]
pub trait InterfaceControl: Send + Sync {
    /// Brings the interface up.
    fn up(&self, interface: &str) -> WifiResult<()>;

    /// Takes the interface down.
    fn down(&self, interface: &str) -> WifiResult<()>;

    /// Applies a stored profile so the interface associates with its network.
    fn activate(&self, profile: &Profile) -> WifiResult<Activation>;

    /// SSID the interface is currently associated with, empty if none.
    fn current_ssid(&self, interface: &str) -> WifiResult<String>;

    /// Interfaces with their IPv4 address.
    fn interfaces(&self) -> WifiResult<Vec<InterfaceInfo>>;
}

/// Runs `command` (program plus fixed leading arguments) with `args`.
pub(crate) fn run_tool(command: &[String], args: &[&str]) -> WifiResult<Output> {
    let (program, prefix) = command
        .split_first()
        .ok_or_else(|| WifiError::command_failed("empty command"))?;

    debug!(command = %command.join(" "), args = ?args, "running");

    Command::new(program)
        .args(prefix)
        .args(args)
        .output()
        .map_err(|e| {
            WifiError::command_failed(format!("failed to execute {}: {}", command.join(" "), e))
        })
}

/// ifupdown backed control: `ifup`/`ifdown` for state changes, `iwgetid` for
/// association and `ip` for enumeration.
#[derive(Debug, Clone)]
pub struct IfupdownControl {
    commands: CommandsConfig,
}

impl IfupdownControl {
    pub fn new(commands: CommandsConfig) -> Self {
        Self { commands }
    }
}

impl InterfaceControl for IfupdownControl {
    fn up(&self, interface: &str) -> WifiResult<()> {
        let output = run_tool(&self.commands.ifup, &[interface])?;
        if !output.status.success() {
            return Err(WifiError::command_failed(format!("error enabling {}", interface)));
        }
        Ok(())
    }

    fn down(&self, interface: &str) -> WifiResult<()> {
        let output = run_tool(&self.commands.ifdown, &[interface])?;
        if !output.status.success() {
            return Err(WifiError::command_failed(format!("error disabling {}", interface)));
        }
        Ok(())
    }

    fn activate(&self, profile: &Profile) -> WifiResult<Activation> {
        // The interface may already be down; only ifup decides the outcome.
        if let Err(e) = self.down(&profile.interface) {
            debug!(interface = %profile.interface, error = %e, "ifdown before activation failed");
        }

        let mapping = format!("{}={}", profile.interface, profile.stanza_name());
        let output = run_tool(&self.commands.ifup, &[mapping.as_str()])?;

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));

        match parse_ifup_output(&text) {
            Some(address) if output.status.success() => Ok(Activation {
                address: Some(address),
            }),
            _ => Err(WifiError::connection_failed(format!(
                "Failed to connect to {}:{}",
                profile.interface, profile.name
            ))),
        }
    }

    fn current_ssid(&self, interface: &str) -> WifiResult<String> {
        let output = run_tool(&self.commands.iwgetid, &["-r", interface])?;
        // iwgetid exits non-zero when not associated.
        if !output.status.success() {
            return Ok(String::new());
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn interfaces(&self) -> WifiResult<Vec<InterfaceInfo>> {
        let output = run_tool(&self.commands.ip, &["-o", "-4", "addr", "show"])?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(WifiError::command_failed(stderr.trim().to_string()));
        }
        Ok(parse_ip_addr(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// Extracts the leased address from dhclient output relayed by ifup
/// (`bound to 192.168.1.23 -- renewal in 1234 seconds.`).
pub fn parse_ifup_output(output: &str) -> Option<String> {
    output.lines().find_map(|line| {
        let (_, rest) = line.split_once("bound to ")?;
        let address = rest.split_whitespace().next()?;
        let looks_like_ipv4 =
            !address.is_empty() && address.chars().all(|c| c.is_ascii_digit() || c == '.');
        looks_like_ipv4.then(|| address.to_string())
    })
}

/// Parses `ip -o -4 addr show`. One entry per interface; the first address
/// wins.
pub fn parse_ip_addr(output: &str) -> Vec<InterfaceInfo> {
    let mut interfaces: Vec<InterfaceInfo> = Vec::new();

    for line in output.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 4 || parts[2] != "inet" {
            continue;
        }

        let name = parts[1].trim_end_matches(':');
        let name = name.split('@').next().unwrap_or(name);
        if interfaces.iter().any(|i| i.name == name) {
            continue;
        }

        let address = parts[3].split('/').next().map(str::to_string);
        interfaces.push(InterfaceInfo {
            name: name.to_string(),
            address,
        });
    }

    interfaces
}
