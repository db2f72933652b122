//! Host socket table queries used by port health checks

#![cfg_attr(not(target_os = "linux"), allow(dead_code))]

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::io;
use sysinfo::{Pid, ProcessesToUpdate, System};

/// TCP socket state for a listening socket in `/proc/net/tcp`
const TCP_LISTEN: u8 = 0x0A;

/// Transport protocol of a checked port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Tcp,
    Udp,
}

impl Protocol {
    fn tables(self) -> [&'static str; 2] {
        match self {
            Protocol::Tcp => ["/proc/net/tcp", "/proc/net/tcp6"],
            Protocol::Udp => ["/proc/net/udp", "/proc/net/udp6"],
        }
    }

    fn accepts_state(self, state: u8) -> bool {
        match self {
            Protocol::Tcp => state == TCP_LISTEN,
            // Any bound UDP socket counts
            Protocol::Udp => true,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "tcp"),
            Protocol::Udp => write!(f, "udp"),
        }
    }
}

/// One parsed row of a `/proc/net/{tcp,udp}[6]` table
#[derive(Debug, Clone, PartialEq, Eq)]
struct SocketEntry {
    local_port: u16,
    state: u8,
    inode: u64,
}

fn parse_entry(line: &str) -> Option<SocketEntry> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 10 {
        return None;
    }
    let (_, port_hex) = fields[1].rsplit_once(':')?;
    Some(SocketEntry {
        local_port: u16::from_str_radix(port_hex, 16).ok()?,
        state: u8::from_str_radix(fields[3], 16).ok()?,
        inode: fields[9].parse().ok()?,
    })
}

fn parse_table(content: &str) -> impl Iterator<Item = SocketEntry> + '_ {
    // First line is the column header
    content.lines().skip(1).filter_map(parse_entry)
}

/// Inodes of sockets bound (UDP) or listening (TCP) on `port`
fn socket_inodes(protocol: Protocol, port: u16) -> io::Result<HashSet<u64>> {
    let mut inodes = HashSet::new();
    for table in protocol.tables() {
        let content = match std::fs::read_to_string(table) {
            Ok(content) => content,
            // IPv6 disabled
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e),
        };
        inodes.extend(
            parse_table(&content)
                .filter(|e| e.local_port == port && protocol.accepts_state(e.state) && e.inode != 0)
                .map(|e| e.inode),
        );
    }
    Ok(inodes)
}

/// The process and all of its descendants
fn process_tree(root: u32) -> Vec<u32> {
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::All, true);

    let mut children: HashMap<Pid, Vec<Pid>> = HashMap::new();
    for (pid, process) in system.processes() {
        if let Some(parent) = process.parent() {
            children.entry(parent).or_default().push(*pid);
        }
    }

    let mut tree = Vec::new();
    let mut queue = VecDeque::from([Pid::from_u32(root)]);
    while let Some(pid) = queue.pop_front() {
        tree.push(pid.as_u32());
        if let Some(kids) = children.get(&pid) {
            queue.extend(kids.iter().copied());
        }
    }
    tree
}

/// True if any open descriptor of `pid` refers to one of `inodes`
fn holds_any_socket(pid: u32, inodes: &HashSet<u64>) -> bool {
    let Ok(entries) = std::fs::read_dir(format!("/proc/{}/fd", pid)) else {
        return false;
    };
    entries.flatten().any(|entry| {
        std::fs::read_link(entry.path())
            .ok()
            .and_then(|target| {
                target
                    .to_str()
                    .and_then(|t| t.strip_prefix("socket:["))
                    .and_then(|t| t.strip_suffix(']'))
                    .and_then(|t| t.parse::<u64>().ok())
            })
            .is_some_and(|inode| inodes.contains(&inode))
    })
}

/// Check that `port` is listening (TCP) or bound (UDP) and owned by `pid`
/// or one of its descendants.
///
/// Returns `Ok(false)` when nothing is bound to the port or the socket
/// belongs to an unrelated process.
#[cfg(target_os = "linux")]
pub fn port_owned_by(protocol: Protocol, port: u16, pid: u32) -> io::Result<bool> {
    let inodes = socket_inodes(protocol, port)?;
    if inodes.is_empty() {
        return Ok(false);
    }
    Ok(process_tree(pid)
        .into_iter()
        .any(|candidate| holds_any_socket(candidate, &inodes)))
}

#[cfg(not(target_os = "linux"))]
pub fn port_owned_by(protocol: Protocol, port: u16, _pid: u32) -> io::Result<bool> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        format!("{} port check on {} requires /proc", protocol, port),
    ))
}
