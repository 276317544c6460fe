//! Parsers for the kernel's text interfaces.
//!
//! Pure functions over `&str` so they can be tested with literal fixtures. Malformed lines
//! are skipped; a parser only returns `None` when nothing usable was found at all.

use std::collections::HashMap;

/// Linux block accounting unit, independent of the device's real block size.
pub const SECTOR_SIZE: u64 = 512;
/// Page size assumed when converting `statm` page counts to bytes.
pub const PAGE_SIZE: u64 = 4096;

// ============ /proc/stat ============

/// Cumulative tick counters of one `cpu` line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuTimes {
    pub user: u64,
    pub nice: u64,
    pub system: u64,
    pub idle: u64,
    pub iowait: u64,
    pub irq: u64,
    pub softirq: u64,
    pub steal: u64,
}

impl CpuTimes {
    /// All accounted time. Guest time is already folded into user/nice by the kernel.
    pub fn total(&self) -> u64 {
        self.user
            .saturating_add(self.nice)
            .saturating_add(self.system)
            .saturating_add(self.idle)
            .saturating_add(self.iowait)
            .saturating_add(self.irq)
            .saturating_add(self.softirq)
            .saturating_add(self.steal)
    }

    /// Time the CPU had nothing runnable, including waits on I/O.
    pub fn idle_all(&self) -> u64 {
        self.idle.saturating_add(self.iowait)
    }
}

/// The CPU section of `/proc/stat`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CpuStat {
    /// The aggregate `cpu` line.
    pub all: Option<CpuTimes>,
    /// `cpuN` lines in file order.
    pub cores: Vec<CpuTimes>,
}

fn parse_cpu_line(parts: &[&str]) -> Option<CpuTimes> {
    // user nice system idle are mandatory; older kernels stop early after that
    let val = |idx: usize| parts.get(idx).and_then(|s| s.parse::<u64>().ok());
    Some(CpuTimes {
        user: val(1)?,
        nice: val(2)?,
        system: val(3)?,
        idle: val(4)?,
        iowait: val(5).unwrap_or(0),
        irq: val(6).unwrap_or(0),
        softirq: val(7).unwrap_or(0),
        steal: val(8).unwrap_or(0),
    })
}

pub fn parse_cpu_stat(content: &str) -> CpuStat {
    let mut stat = CpuStat::default();
    for line in content.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        let Some(label) = parts.first() else {
            continue;
        };
        if *label == "cpu" {
            stat.all = parse_cpu_line(&parts);
        } else if label
            .strip_prefix("cpu")
            .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
        {
            if let Some(times) = parse_cpu_line(&parts) {
                stat.cores.push(times);
            }
        }
    }
    stat
}

// ============ /proc/uptime, /proc/loadavg ============

pub fn parse_uptime(content: &str) -> Option<f64> {
    content
        .split_whitespace()
        .next()?
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite() && *v >= 0.0)
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LoadAvg {
    pub one: f64,
    pub five: f64,
    pub fifteen: f64,
    /// Total scheduling entities (threads) from the `running/total` field.
    pub threads: Option<u64>,
}

pub fn parse_loadavg(content: &str) -> Option<LoadAvg> {
    let parts: Vec<&str> = content.split_whitespace().collect();
    if parts.len() < 3 {
        return None;
    }
    let threads = parts
        .get(3)
        .and_then(|s| s.split_once('/'))
        .and_then(|(_, total)| total.parse().ok());
    Some(LoadAvg {
        one: parts[0].parse().ok()?,
        five: parts[1].parse().ok()?,
        fifteen: parts[2].parse().ok()?,
        threads,
    })
}

// ============ /proc/meminfo ============

/// `Key:   123 kB` lines converted to bytes. Lines without a kB value are skipped.
pub fn parse_meminfo(content: &str) -> HashMap<String, u64> {
    let mut values = HashMap::new();
    for line in content.lines() {
        let Some((key, rest)) = line.split_once(':') else {
            continue;
        };
        let mut it = rest.split_whitespace();
        let (Some(num), Some("kB"), None) = (it.next(), it.next(), it.next()) else {
            continue;
        };
        if let Ok(kb) = num.parse::<u64>() {
            values.insert(key.trim().to_string(), kb.saturating_mul(1024));
        }
    }
    values
}

// ============ /proc/self/mountinfo ============

/// Raw mountinfo entry, before any filtering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountInfo {
    /// `major:minor` of the backing device.
    pub dev: String,
    pub mountpoint: String,
    pub fs_type: String,
    pub source: String,
}

/// Decodes the kernel's `\ooo` escapes (space is `\040`, tab `\011`, backslash `\134`).
pub fn decode_mount_field(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && bytes.get(i + 1..i + 4).is_some_and(is_octal_escape) {
            let v = (bytes[i + 1] - b'0') as u32 * 64
                + (bytes[i + 2] - b'0') as u32 * 8
                + (bytes[i + 3] - b'0') as u32;
            out.push(v as u8);
            i += 4;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn is_octal_escape(digits: &[u8]) -> bool {
    // \377 is the largest value that fits a byte
    digits.len() == 3 && digits[0] <= b'3' && digits.iter().all(|d| (b'0'..=b'7').contains(d))
}

/// Format: `id parent major:minor root mountpoint options [optional...] - fstype source superopts`
pub fn parse_mountinfo(content: &str) -> Vec<MountInfo> {
    let mut mounts = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        let Some((left, right)) = line.split_once(" - ") else {
            continue;
        };
        let left: Vec<&str> = left.split(' ').collect();
        let right: Vec<&str> = right.split(' ').collect();
        if left.len() < 6 || right.len() < 3 {
            continue;
        }
        let mountpoint = decode_mount_field(left[4]);
        if mountpoint.is_empty() {
            continue;
        }
        mounts.push(MountInfo {
            dev: left[2].to_string(),
            mountpoint,
            fs_type: right[0].to_string(),
            source: decode_mount_field(right[1]),
        });
    }
    mounts
}

// ============ /proc/diskstats ============

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiskIo {
    pub read_sectors: u64,
    pub write_sectors: u64,
}

impl DiskIo {
    pub fn read_bytes(&self) -> u64 {
        self.read_sectors.saturating_mul(SECTOR_SIZE)
    }

    pub fn write_bytes(&self) -> u64 {
        self.write_sectors.saturating_mul(SECTOR_SIZE)
    }
}

/// Sector counters keyed by `major:minor`.
pub fn parse_diskstats(content: &str) -> HashMap<String, DiskIo> {
    let mut entries = HashMap::new();
    for line in content.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 14 {
            continue;
        }
        let (Ok(read_sectors), Ok(write_sectors)) = (fields[5].parse(), fields[9].parse()) else {
            continue;
        };
        entries.insert(
            format!("{}:{}", fields[0], fields[1]),
            DiskIo {
                read_sectors,
                write_sectors,
            },
        );
    }
    entries
}

// ============ /proc/net/dev ============

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetDevCounters {
    pub iface: String,
    pub rx_bytes: u64,
    pub rx_packets: u64,
    pub rx_errors: u64,
    pub rx_drops: u64,
    pub tx_bytes: u64,
    pub tx_packets: u64,
    pub tx_errors: u64,
    pub tx_drops: u64,
}

/// Skips the two header lines; each data line is `iface: 8 rx fields 8 tx fields`.
pub fn parse_net_dev(content: &str) -> Vec<NetDevCounters> {
    let mut items = Vec::new();
    for line in content.lines().skip(2) {
        let Some((iface, rest)) = line.trim().split_once(':') else {
            continue;
        };
        let iface = iface.trim();
        if iface.is_empty() {
            continue;
        }
        let fields: Option<Vec<u64>> = rest.split_whitespace().map(|v| v.parse().ok()).collect();
        let Some(f) = fields.filter(|f| f.len() >= 16) else {
            continue;
        };
        items.push(NetDevCounters {
            iface: iface.to_string(),
            rx_bytes: f[0],
            rx_packets: f[1],
            rx_errors: f[2],
            rx_drops: f[3],
            tx_bytes: f[8],
            tx_packets: f[9],
            tx_errors: f[10],
            tx_drops: f[11],
        });
    }
    items
}

// ============ /proc/[pid]/stat, statm, cmdline ============

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcStat {
    pub comm: String,
    pub state: String,
    /// utime + stime.
    pub cpu_ticks: u64,
    pub vsize_bytes: Option<u64>,
}

/// The command name sits in parentheses and may itself contain spaces or `)`,
/// so fields are counted from the last `)`.
pub fn parse_proc_stat(content: &str) -> Option<ProcStat> {
    let open = content.find('(')?;
    let close = content.rfind(')')?;
    if close <= open {
        return None;
    }
    let comm = content[open + 1..close].to_string();
    let fields: Vec<&str> = content[close + 1..].split_whitespace().collect();
    if fields.len() < 22 {
        return None;
    }
    let utime: u64 = fields[11].parse().ok()?;
    let stime: u64 = fields[12].parse().ok()?;
    Some(ProcStat {
        comm,
        state: fields[0].to_string(),
        cpu_ticks: utime.saturating_add(stime),
        vsize_bytes: fields[20].parse().ok(),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcStatm {
    pub res_bytes: u64,
    pub shr_bytes: u64,
}

/// `size resident shared text lib data dt`, all in pages.
pub fn parse_statm(content: &str) -> Option<ProcStatm> {
    let mut it = content.split_whitespace().skip(1);
    let resident: u64 = it.next()?.parse().ok()?;
    let shared: u64 = it.next()?.parse().ok()?;
    Some(ProcStatm {
        res_bytes: resident.saturating_mul(PAGE_SIZE),
        shr_bytes: shared.saturating_mul(PAGE_SIZE),
    })
}

/// NUL-separated argv joined with spaces; kernel threads have none and show as `[comm]`.
pub fn format_cmdline(raw: &str, comm: &str) -> String {
    let command = raw.replace('\0', " ");
    let command = command.trim();
    if !command.is_empty() {
        command.to_string()
    } else if !comm.is_empty() {
        format!("[{comm}]")
    } else {
        "-".to_string()
    }
}

// ============ /etc/passwd ============

/// UID -> username. Format: `name:password:uid:gid:gecos:home:shell`.
pub fn parse_passwd(content: &str) -> HashMap<u32, String> {
    let mut map = HashMap::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let parts: Vec<&str> = line.split(':').collect();
        if parts.len() < 3 || parts[0].is_empty() {
            continue;
        }
        if let Ok(uid) = parts[2].parse::<u32>() {
            map.insert(uid, parts[0].to_string());
        }
    }
    map
}
