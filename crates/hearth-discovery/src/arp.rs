//! Address-resolution table parsing for probe candidate selection

use hearth_shell::{CommandRunner, Platform};
use std::net::Ipv4Addr;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

use crate::error::{DiscoveryError, Result};
use crate::subnet::SubnetInfo;

const ARP_TIMEOUT: Duration = Duration::from_secs(5);

/// ARP table entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArpEntry {
    pub ip: Ipv4Addr,
    pub mac: String,
    pub interface: Option<String>,
    pub state: ArpState,
}

/// ARP entry state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArpState {
    Reachable,
    Stale,
    Delay,
    Probe,
    Failed,
    Incomplete,
    Permanent,
    Dynamic,
    Static,
    Unknown,
}

impl ArpState {
    /// Whether a host in this state is worth probing
    pub fn is_candidate(&self) -> bool {
        !matches!(self, ArpState::Failed | ArpState::Incomplete)
    }
}

/// Read the host's ARP table with the platform's tool
pub async fn read_arp_table(runner: &dyn CommandRunner, platform: Platform) -> Result<Vec<ArpEntry>> {
    let (program, args): (&str, &[&str]) = match platform {
        Platform::Linux => ("ip", &["neigh", "show"]),
        _ => ("arp", &["-a"]),
    };

    let output = runner.run(program, args, ARP_TIMEOUT).await?;
    if !output.success() {
        return Err(DiscoveryError::ToolFailed {
            program: program.to_string(),
            status: output.status,
            stderr: output.stderr,
        });
    }

    let entries = parse_arp_output(&output.stdout);
    debug!("Found {} ARP entries", entries.len());
    Ok(entries)
}

/// Parse `ip neigh show` or `arp -a` output, whichever shape each line has
pub fn parse_arp_output(output: &str) -> Vec<ArpEntry> {
    output
        .lines()
        .filter_map(|line| parse_ip_neigh_line(line).or_else(|| parse_arp_a_line(line)))
        .collect()
}

/// Candidate hosts from the ARP table that sit in `subnet`'s /24
pub fn candidates_in_subnet(entries: &[ArpEntry], subnet: &SubnetInfo) -> Vec<Ipv4Addr> {
    let mut candidates = Vec::new();
    for entry in entries {
        if entry.state.is_candidate()
            && subnet.contains(entry.ip)
            && !is_reserved_host(entry.ip)
            && !candidates.contains(&entry.ip)
        {
            candidates.push(entry.ip);
        }
    }
    candidates
}

fn is_reserved_host(ip: Ipv4Addr) -> bool {
    let last = ip.octets()[3];
    last == 0 || last == 255 || ip.is_multicast()
}

/// Parse a line from `ip neigh show` output
fn parse_ip_neigh_line(line: &str) -> Option<ArpEntry> {
    // Format: "192.168.1.1 dev eth0 lladdr aa:bb:cc:dd:ee:ff REACHABLE"
    let parts: Vec<&str> = line.split_whitespace().collect();

    if parts.len() < 4 {
        return None;
    }

    let ip = Ipv4Addr::from_str(parts[0]).ok()?;

    let dev_idx = parts.iter().position(|&p| p == "dev")?;
    let lladdr_idx = parts.iter().position(|&p| p == "lladdr");

    if dev_idx + 1 >= parts.len() {
        return None;
    }

    let interface = parts[dev_idx + 1].to_string();

    // MAC might not be present for INCOMPLETE entries
    let mac = lladdr_idx
        .and_then(|idx| parts.get(idx + 1))
        .map(|s| s.to_string())
        .unwrap_or_default();

    let state = parts.last().map(|s| parse_arp_state(s)).unwrap_or(ArpState::Unknown);

    Some(ArpEntry {
        ip,
        mac,
        interface: Some(interface),
        state,
    })
}

/// Parse a line from BSD or Windows `arp -a` output
fn parse_arp_a_line(line: &str) -> Option<ArpEntry> {
    let trimmed = line.trim();

    // BSD: "? (192.168.1.1) at aa:bb:cc:dd:ee:ff on en0 ifscope [ethernet]"
    if let (Some(open), Some(close)) = (trimmed.find('('), trimmed.find(')')) {
        let ip = Ipv4Addr::from_str(trimmed.get(open + 1..close)?).ok()?;
        let rest: Vec<&str> = trimmed[close + 1..].split_whitespace().collect();
        let mac = rest
            .iter()
            .position(|&p| p == "at")
            .and_then(|idx| rest.get(idx + 1))
            .map(|s| s.to_string())
            .unwrap_or_default();
        let interface = rest
            .iter()
            .position(|&p| p == "on")
            .and_then(|idx| rest.get(idx + 1))
            .map(|s| s.to_string());
        let state = if mac.is_empty() || mac.contains("incomplete") {
            ArpState::Incomplete
        } else if trimmed.contains("permanent") {
            ArpState::Permanent
        } else {
            ArpState::Dynamic
        };
        return Some(ArpEntry {
            ip,
            mac,
            interface,
            state,
        });
    }

    // Windows: "  192.168.1.1          aa-bb-cc-dd-ee-ff     dynamic"
    let parts: Vec<&str> = trimmed.split_whitespace().collect();
    if parts.len() != 3 {
        return None;
    }
    let ip = Ipv4Addr::from_str(parts[0]).ok()?;
    if !parts[1].contains('-') && !parts[1].contains(':') {
        return None;
    }
    Some(ArpEntry {
        ip,
        mac: parts[1].replace('-', ":").to_lowercase(),
        interface: None,
        state: parse_arp_state(parts[2]),
    })
}

/// Parse ARP state string
fn parse_arp_state(s: &str) -> ArpState {
    match s.to_uppercase().as_str() {
        "REACHABLE" => ArpState::Reachable,
        "STALE" => ArpState::Stale,
        "DELAY" => ArpState::Delay,
        "PROBE" => ArpState::Probe,
        "FAILED" => ArpState::Failed,
        "INCOMPLETE" => ArpState::Incomplete,
        "PERMANENT" => ArpState::Permanent,
        "DYNAMIC" => ArpState::Dynamic,
        "STATIC" => ArpState::Static,
        _ => ArpState::Unknown,
    }
}
