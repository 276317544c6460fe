//! Collectors driven end to end over an in-memory /proc with explicit sample instants.

use pulsemon::{
    Collector, CpuCollector, CpuConfig, DeviceQuery, DiskCollector, DiskConfig, FileSystem,
    FsCapacity, GpuCollector, Health, MemoryCollector, MemoryConfig, MockFs, NetworkCollector,
    NetworkConfig, ProcessCollector, ProcessConfig, QueryError,
};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const NET_HEADER: &str = "Inter-|   Receive                                                |  Transmit\n \
face |bytes    packets errs drop fifo frame compressed multicast|bytes    packets errs drop fifo colls carrier compressed\n";

fn net_dev(rows: &[(&str, u64, u64)]) -> String {
    let mut out = NET_HEADER.to_string();
    for (iface, rx, tx) in rows {
        out.push_str(&format!(
            "{iface:>6}: {rx} 10 0 0 0 0 0 0 {tx} 20 0 0 0 0 0 0\n"
        ));
    }
    out
}

fn proc_stat_line(pid: u32, utime: u64) -> String {
    format!("{pid} (worker) R 1 {pid} {pid} 0 -1 0 0 0 0 0 {utime} 0 0 0 20 0 1 0 10 4096000 10 0")
}

#[tokio::test]
async fn network_rates_and_denylist() {
    let fs = Arc::new(MockFs::new());
    fs.add_file("/proc/net/dev", net_dev(&[("lo", 5, 5), ("docker0", 0, 0), ("eth0", 1_000, 500)]));
    fs.add_file("/sys/class/net/eth0/operstate", "up\n");
    let mut net = NetworkCollector::new(fs.clone(), NetworkConfig::default());

    let t0 = Instant::now();
    let first = net.sample_at(t0).await.unwrap();
    assert_eq!(first.items.len(), 1);
    assert_eq!(first.items[0].iface, "eth0");
    assert_eq!(first.items[0].rx_bps, None);

    fs.add_file("/proc/net/dev", net_dev(&[("lo", 5, 5), ("docker0", 9, 9), ("eth0", 1_001_000, 1_500)]));
    let second = net.sample_at(t0 + Duration::from_secs(1)).await.unwrap();
    let eth0 = &second.items[0];
    assert_eq!(eth0.rx_bps, Some(1_000_000.0));
    assert_eq!(eth0.tx_bps, Some(1_000.0));
    assert_eq!(eth0.state, "up");
    assert_eq!(second.summary.interfaces, 1);
    assert_eq!(second.summary.rx_bps, 1_000_000.0);
}

#[tokio::test]
async fn network_counter_reset_yields_no_rate() {
    let fs = Arc::new(MockFs::new());
    fs.add_file("/proc/net/dev", net_dev(&[("eth0", 5_000, 5_000)]));
    let mut net = NetworkCollector::new(fs.clone(), NetworkConfig::default());
    let t0 = Instant::now();
    net.sample_at(t0).await.unwrap();

    fs.add_file("/proc/net/dev", net_dev(&[("eth0", 10, 6_000)]));
    let s = net.sample_at(t0 + Duration::from_secs(1)).await.unwrap();
    assert_eq!(s.items[0].rx_bps, None);
    assert_eq!(s.items[0].tx_bps, None);
}

#[tokio::test]
async fn disk_filters_mounts_and_reports_health() {
    let fs = Arc::new(MockFs::new());
    fs.add_file(
        "/proc/self/mountinfo",
        "22 1 8:1 / / rw,relatime - ext4 /dev/sda1 rw\n\
         23 22 0:21 / /run rw - tmpfs tmpfs rw\n\
         24 22 8:17 / /data rw - xfs /dev/sdb1 rw\n\
         25 22 8:33 / /backup rw - ext4 /dev/sdc1 rw\n\
         26 22 8:49 / /mnt/my\\040disk rw - ext4 /dev/sdd1 rw\n",
    );
    fs.add_file(
        "/proc/diskstats",
        "   8       1 sda1 100 0 2000 0 50 0 1000 0 0 0 0\n",
    );
    fs.set_capacity("/", 1000, 51);
    fs.set_capacity("/data", 1000, 40);
    fs.set_capacity("/backup", 1000, 500);

    let mut disk = DiskCollector::new(fs.clone(), DiskConfig::default());
    let t0 = Instant::now();
    let s = disk.sample_at(t0).await.unwrap();

    let points: Vec<&str> = s.items.iter().map(|i| i.mountpoint.as_str()).collect();
    assert_eq!(points, vec!["/data", "/", "/backup", "/mnt/my disk"]);
    let health: Vec<Health> = s.items.iter().map(|i| i.health).collect();
    assert_eq!(
        health,
        vec![Health::Critical, Health::Warning, Health::Normal, Health::Unknown]
    );
    assert!((s.items[1].used_percent.unwrap() - 94.9).abs() < 1e-9);
    assert_eq!(s.items[3].total_bytes, None);
    assert_eq!(s.summary.mounts, 4);
    assert_eq!(s.summary.total_bytes, 3000);
    assert!(s.items.iter().all(|i| i.read_bps.is_none()));

    fs.add_file(
        "/proc/diskstats",
        "   8       1 sda1 100 0 4000 0 50 0 1000 0 0 0 0\n",
    );
    let s = disk.sample_at(t0 + Duration::from_secs(2)).await.unwrap();
    let root = s.items.iter().find(|i| i.mountpoint == "/").unwrap();
    assert_eq!(root.read_bps, Some(2000.0 * 512.0 / 2.0));
    assert_eq!(root.write_bps, Some(0.0));
    assert_eq!(s.summary.read_bps, 512_000.0);
}

#[tokio::test]
async fn shared_device_counts_once_in_summary() {
    let fs = Arc::new(MockFs::new());
    fs.add_file(
        "/proc/self/mountinfo",
        "22 1 8:1 / / rw - ext4 /dev/sda1 rw\n\
         30 22 8:1 /srv /srv rw - ext4 /dev/sda1 rw\n\
         31 22 8:1 /var/lib/app /opt/app rw - ext4 /dev/sda1 rw\n",
    );
    fs.add_file("/proc/diskstats", "   8       1 sda1 10 0 2000 0 5 0 400 0 0 0 0\n");
    for mountpoint in ["/", "/srv", "/opt/app"] {
        fs.set_capacity(mountpoint, 1000, 500);
    }
    let mut disk = DiskCollector::new(fs.clone(), DiskConfig::default());
    let t0 = Instant::now();
    disk.sample_at(t0).await.unwrap();

    fs.add_file("/proc/diskstats", "   8       1 sda1 20 0 4000 0 5 0 400 0 0 0 0\n");
    let s = disk.sample_at(t0 + Duration::from_secs(2)).await.unwrap();
    assert_eq!(s.items.len(), 3);
    assert!(s.items.iter().all(|i| i.read_bps == Some(512_000.0)));
    assert_eq!(s.summary.read_bps, 512_000.0);
    assert_eq!(s.summary.write_bps, 0.0);
}

#[tokio::test]
async fn disk_mount_and_usage_caches_expire_independently() {
    let fs = Arc::new(MockFs::new());
    fs.add_file("/proc/self/mountinfo", "22 1 8:1 / / rw - ext4 /dev/sda1 rw\n");
    fs.add_file("/proc/diskstats", "");
    fs.set_capacity("/", 1000, 500);
    let mut disk = DiskCollector::new(fs.clone(), DiskConfig::default());
    let t0 = Instant::now();
    let used = |s: &pulsemon::DiskSnapshot, mp: &str| {
        s.items.iter().find(|i| i.mountpoint == mp).and_then(|i| i.used_percent)
    };

    assert_eq!(used(&disk.sample_at(t0).await.unwrap(), "/"), Some(50.0));

    fs.set_capacity("/", 1000, 100);
    let s = disk.sample_at(t0 + Duration::from_secs(4)).await.unwrap();
    assert_eq!(used(&s, "/"), Some(50.0));
    let s = disk.sample_at(t0 + Duration::from_secs(5)).await.unwrap();
    assert_eq!(used(&s, "/"), Some(90.0));

    fs.add_file(
        "/proc/self/mountinfo",
        "22 1 8:1 / / rw - ext4 /dev/sda1 rw\n24 22 8:17 / /data rw - xfs /dev/sdb1 rw\n",
    );
    fs.set_capacity("/data", 1000, 750);
    let s = disk.sample_at(t0 + Duration::from_secs(10)).await.unwrap();
    assert_eq!(s.items.len(), 1);

    // a newly listed mount gets its usage right away, not after the usage interval
    let s = disk.sample_at(t0 + Duration::from_secs(15)).await.unwrap();
    assert_eq!(s.items.len(), 2);
    assert_eq!(used(&s, "/data"), Some(25.0));
}

#[tokio::test]
async fn new_interface_refreshes_link_metadata() {
    let fs = Arc::new(MockFs::new());
    fs.add_file("/proc/net/dev", net_dev(&[("eth0", 100, 100)]));
    fs.add_file("/sys/class/net/eth0/operstate", "up\n");
    let mut net = NetworkCollector::new(fs.clone(), NetworkConfig::default());
    let t0 = Instant::now();
    let state = |s: &pulsemon::NetworkSnapshot, iface: &str| {
        s.items.iter().find(|i| i.iface == iface).map(|i| i.state.clone())
    };

    net.sample_at(t0).await.unwrap();
    fs.add_file("/sys/class/net/eth0/operstate", "down\n");
    let s = net.sample_at(t0 + Duration::from_secs(1)).await.unwrap();
    assert_eq!(state(&s, "eth0").as_deref(), Some("up"));

    fs.add_file("/proc/net/dev", net_dev(&[("eth0", 100, 100), ("eth1", 50, 50)]));
    fs.add_file("/sys/class/net/eth1/operstate", "up\n");
    fs.add_file("/sys/class/net/eth1/speed", "1000\n");
    let s = net.sample_at(t0 + Duration::from_secs(2)).await.unwrap();
    let eth1 = s.items.iter().find(|i| i.iface == "eth1").unwrap();
    assert_eq!(eth1.state, "up");
    assert_eq!(eth1.speed_mbps, Some(1000));
    assert_eq!(state(&s, "eth0").as_deref(), Some("down"));
}

#[tokio::test]
async fn zero_elapsed_produces_null_rates_not_errors() {
    let fs = Arc::new(MockFs::new());
    fs.add_file("/proc/net/dev", net_dev(&[("eth0", 100, 100)]));
    fs.add_file("/proc/self/mountinfo", "22 1 8:1 / / rw - ext4 /dev/sda1 rw\n");
    fs.add_file("/proc/diskstats", "   8       1 sda1 1 0 8 0 1 0 8 0 0 0 0\n");
    fs.set_capacity("/", 100, 50);

    let mut net = NetworkCollector::new(fs.clone(), NetworkConfig::default());
    let mut disk = DiskCollector::new(fs.clone(), DiskConfig::default());
    let t = Instant::now();
    for _ in 0..2 {
        let n = net.sample_at(t).await.unwrap();
        assert_eq!(n.items[0].rx_bps, None);
        assert!(n.summary.rx_bps.is_finite());
        let d = disk.sample_at(t).await.unwrap();
        assert_eq!(d.items[0].read_bps, None);
        assert!(d.summary.read_bps.is_finite());
    }
}

#[tokio::test]
async fn cpu_bootstrap_then_zero_delta() {
    let fs = Arc::new(MockFs::new());
    fs.add_file("/proc/stat", "cpu  4 0 4 92 0 0 0 0\ncpu0 2 0 2 46 0 0 0 0\ncpu1 2 0 2 46 0 0 0 0\n");
    fs.add_file("/proc/uptime", "12.00 20.00\n");
    fs.add_file("/proc/loadavg", "1.00 0.50 0.25 2/300 999\n");
    let mut cpu = CpuCollector::new(fs, CpuConfig::default());

    let t = Instant::now();
    let first = cpu.sample_at(t).await.unwrap();
    assert_eq!(first.overall_percent, None);
    assert!(first.per_core_percent.iter().all(Option::is_none));

    let second = cpu.sample_at(t).await.unwrap();
    assert_eq!(second.overall_percent, Some(0.0));
    assert_eq!(second.per_core_percent, vec![Some(0.0), Some(0.0)]);
}

#[tokio::test]
async fn memory_percent_stays_in_range() {
    let fs = Arc::new(MockFs::new());
    // available larger than total must not go negative
    fs.add_file("/proc/meminfo", "MemTotal: 100 kB\nMemAvailable: 150 kB\nSwapTotal: 10 kB\nSwapFree: 0 kB\n");
    let mut mem = MemoryCollector::new(fs, MemoryConfig::default());
    let s = mem.sample().await.unwrap();
    let ram = s.ram.unwrap();
    assert_eq!(ram.used_bytes, 0);
    assert_eq!(ram.used_percent, 0.0);
    assert_eq!(s.swap.unwrap().used_percent, 100.0);
}

/// Every file read blocks the calling thread for `delay`.
struct SlowFs {
    inner: MockFs,
    delay: Duration,
}

impl FileSystem for SlowFs {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        std::thread::sleep(self.delay);
        self.inner.read_to_string(path)
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        self.inner.read_dir(path)
    }

    fn owner_uid(&self, path: &Path) -> io::Result<u32> {
        self.inner.owner_uid(path)
    }

    fn capacity(&self, mountpoint: &Path) -> io::Result<FsCapacity> {
        self.inner.capacity(mountpoint)
    }
}

#[tokio::test(flavor = "current_thread")]
async fn slow_reads_overlap_across_collectors() {
    let inner = MockFs::new();
    inner.add_file("/proc/stat", "cpu 1 0 1 8\ncpu0 1 0 1 8\n");
    inner.add_file("/proc/uptime", "1.0 1.0\n");
    inner.add_file("/proc/loadavg", "0.0 0.0 0.0 1/1 1\n");
    inner.add_file("/proc/meminfo", "MemTotal: 100 kB\nMemAvailable: 50 kB\n");
    inner.add_file("/proc/net/dev", net_dev(&[("eth0", 1, 1)]));
    let fs = Arc::new(SlowFs {
        inner,
        delay: Duration::from_millis(200),
    });
    let mut cpu = CpuCollector::new(fs.clone(), CpuConfig::default());
    let mut mem = MemoryCollector::new(fs.clone(), MemoryConfig::default());
    let mut net = NetworkCollector::new(fs, NetworkConfig::default());

    // seven blocking reads (link metadata included); back to back they take 1.4 s
    let started = Instant::now();
    let (c, m, n) = tokio::join!(cpu.sample(), mem.sample(), net.sample());
    let elapsed = started.elapsed();
    assert!(c.is_ok() && m.is_ok() && n.is_ok());
    assert!(elapsed < Duration::from_millis(1_000), "reads ran serially: {elapsed:?}");
}

#[tokio::test]
async fn reused_pid_has_no_cpu_percent() {
    let fs = Arc::new(MockFs::new());
    fs.add_file("/proc/stat", "cpu 100 0 0 900\ncpu0 100 0 0 900\n");
    fs.add_file("/etc/passwd", "root:x:0:0::/root:/bin/sh\n");
    fs.add_process(500, &proc_stat_line(500, 80), "100 10 5 0 0 0 0", "worker\0", 0);
    fs.add_process(501, &proc_stat_line(501, 10), "100 10 5 0 0 0 0", "worker\0", 0);
    let mut procs = ProcessCollector::new(fs.clone(), ProcessConfig::default());

    let t0 = Instant::now();
    procs.sample_at(t0).await.unwrap();

    fs.add_file("/proc/stat", "cpu 200 0 0 1000\ncpu0 200 0 0 1000\n");
    // pid 500 exited and was reused by a fresh process with fewer ticks
    fs.add_file("/proc/500/stat", proc_stat_line(500, 3));
    fs.add_file("/proc/501/stat", proc_stat_line(501, 60));
    let s = procs.sample_at(t0 + Duration::from_secs(1)).await.unwrap();

    assert_eq!(s.items[0].pid, 500);
    assert_eq!(s.items[0].cpu_percent, None);
    assert_eq!(s.items[1].cpu_percent, Some(25.0));
    assert_eq!(s.items[1].user, "root");
}

struct MissingTool {
    calls: AtomicUsize,
}

impl DeviceQuery for MissingTool {
    async fn query(&self, _scope: &str, _fields: &[&str]) -> Result<String, QueryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(QueryError::NotFound("nvidia-smi".into()))
    }
}

#[tokio::test]
async fn gpu_tool_is_probed_once() {
    let tool = Arc::new(MissingTool {
        calls: AtomicUsize::new(0),
    });
    let mut gpu = GpuCollector::new(SharedQuery(tool.clone()));

    let first = gpu.sample().await.unwrap();
    let second = gpu.sample().await.unwrap();
    assert!(!first.available && !second.available);
    assert_eq!(first.reason.as_deref(), Some("nvidia-smi not found"));
    assert_eq!(second.reason, first.reason);
    assert!(second.summary.is_none());
    assert_eq!(tool.calls.load(Ordering::SeqCst), 1);
}

struct SharedQuery(Arc<MissingTool>);

impl DeviceQuery for SharedQuery {
    async fn query(&self, scope: &str, fields: &[&str]) -> Result<String, QueryError> {
        self.0.query(scope, fields).await
    }
}
