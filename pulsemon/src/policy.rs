//! Which mounts and interfaces are worth reporting.
//!
//! Both policies are plain data handed to the collectors at construction, so tests and
//! embedders can widen or narrow them without touching the parsers.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

const PSEUDO_FS_TYPES: &[&str] = &[
    "autofs",
    "bpf",
    "cgroup",
    "cgroup2",
    "configfs",
    "debugfs",
    "devpts",
    "devtmpfs",
    "fusectl",
    "hugetlbfs",
    "mqueue",
    "nsfs",
    "overlay",
    "proc",
    "pstore",
    "ramfs",
    "rpc_pipefs",
    "securityfs",
    "squashfs",
    "sysfs",
    "tmpfs",
    "tracefs",
];

static DEFAULT_IGNORED_INTERFACES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(lo|docker\d+|veth.*|br-.*|virbr.*|vmnet.*|zt.*|tailscale.*|tun.*|tap.*|flannel.*|cni.*|cali.*)$",
    )
    .expect("interface denylist regex")
});

#[derive(Debug, Clone)]
pub struct MountPolicy {
    pub pseudo_fs_types: HashSet<String>,
    /// Sources must start with this to count as a real block device.
    pub device_prefix: String,
    /// Loop-backed sources, skipped even though they live under `device_prefix`.
    pub ignored_source_prefixes: Vec<String>,
    /// Transient package mounts (snaps and the like).
    pub ignored_mount_prefixes: Vec<String>,
}

impl Default for MountPolicy {
    fn default() -> Self {
        Self {
            pseudo_fs_types: PSEUDO_FS_TYPES.iter().map(|s| s.to_string()).collect(),
            device_prefix: "/dev/".into(),
            ignored_source_prefixes: vec!["/dev/loop".into()],
            ignored_mount_prefixes: vec!["/snap/".into()],
        }
    }
}

impl MountPolicy {
    pub fn accepts(&self, fs_type: &str, source: &str, mountpoint: &str) -> bool {
        !self.pseudo_fs_types.contains(fs_type)
            && source.starts_with(&self.device_prefix)
            && !self
                .ignored_source_prefixes
                .iter()
                .any(|p| source.starts_with(p.as_str()))
            && !self
                .ignored_mount_prefixes
                .iter()
                .any(|p| mountpoint.starts_with(p.as_str()))
    }
}

#[derive(Debug, Clone)]
pub struct InterfacePolicy {
    pub ignored: Regex,
}

impl Default for InterfacePolicy {
    fn default() -> Self {
        Self {
            ignored: DEFAULT_IGNORED_INTERFACES.clone(),
        }
    }
}

impl InterfacePolicy {
    pub fn new(ignored: Regex) -> Self {
        Self { ignored }
    }

    pub fn accepts(&self, iface: &str) -> bool {
        !iface.is_empty() && !self.ignored.is_match(iface)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mount_policy_defaults() {
        let p = MountPolicy::default();
        assert!(p.accepts("ext4", "/dev/sda1", "/"));
        assert!(!p.accepts("tmpfs", "/dev/sda1", "/run"));
        assert!(!p.accepts("ext4", "tmpfs", "/tmp"));
        assert!(!p.accepts("squashfs", "/dev/loop3", "/snap/core/1"));
        assert!(!p.accepts("ext4", "/dev/loop0", "/mnt/img"));
        assert!(!p.accepts("ext4", "/dev/sdb1", "/snap/thing"));
    }

    #[test]
    fn interface_policy_defaults() {
        let p = InterfacePolicy::default();
        for name in ["lo", "docker0", "veth12ab", "br-5f2a", "virbr0", "tailscale0", "tun0", "cali123"] {
            assert!(!p.accepts(name), "{name} should be ignored");
        }
        for name in ["eth0", "enp3s0", "wlan0", "wlp2s0", "bond0", "dockerish"] {
            assert!(p.accepts(name), "{name} should be kept");
        }
    }

    #[test]
    fn interface_policy_is_replaceable() {
        let p = InterfacePolicy::new(Regex::new("^eth").unwrap());
        assert!(!p.accepts("eth0"));
        assert!(p.accepts("docker0"));
    }
}
