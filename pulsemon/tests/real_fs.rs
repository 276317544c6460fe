//! Collectors over `RealFs` with a /proc tree laid out in a temp directory.

use pulsemon::{Collector, DiskCollector, DiskConfig, ProcessCollector, ProcessConfig, RealFs};
use std::fs;
use std::path::Path;
use std::sync::Arc;

fn write_process(proc_root: &Path, pid: u32, cmdline: &[u8]) {
    let dir = proc_root.join(pid.to_string());
    fs::create_dir_all(&dir).unwrap();
    fs::write(
        dir.join("stat"),
        format!("{pid} (worker) S 1 {pid} {pid} 0 -1 0 0 0 0 0 5 5 0 0 20 0 1 0 10 4096000 10 0\n"),
    )
    .unwrap();
    fs::write(dir.join("statm"), "1000 10 5 0 0 0 0\n").unwrap();
    fs::write(dir.join("cmdline"), cmdline).unwrap();
}

#[tokio::test]
async fn process_with_non_utf8_argv_is_listed() {
    let dir = tempfile::tempdir().unwrap();
    let proc_root = dir.path().join("proc");
    fs::create_dir_all(&proc_root).unwrap();
    fs::write(proc_root.join("stat"), "cpu 100 0 0 900\ncpu0 100 0 0 900\n").unwrap();
    write_process(&proc_root, 10, b"ok\0");
    write_process(&proc_root, 11, b"caf\xe9\0--x\0");
    let passwd = dir.path().join("passwd");
    fs::write(&passwd, "root:x:0:0::/root:/bin/sh\n").unwrap();

    let config = ProcessConfig {
        proc_root,
        passwd_path: passwd,
        ..Default::default()
    };
    let mut procs = ProcessCollector::new(Arc::new(RealFs::new()), config);
    let s = procs.sample().await.unwrap();

    let pids: Vec<u32> = s.items.iter().map(|i| i.pid).collect();
    assert_eq!(pids, vec![10, 11]);
    assert_eq!(s.items[0].command, "ok");
    assert_eq!(s.items[1].command, "caf\u{fffd} --x");
}

#[tokio::test]
async fn non_utf8_mount_path_does_not_fail_the_disk_family() {
    let dir = tempfile::tempdir().unwrap();
    let proc_root = dir.path().join("proc");
    fs::create_dir_all(proc_root.join("self")).unwrap();
    let real_mount = dir.path().to_str().unwrap().to_string();

    let mut mountinfo = format!("22 1 8:1 / {real_mount} rw - ext4 /dev/sda1 rw\n").into_bytes();
    mountinfo.extend_from_slice(b"40 22 8:17 / /mnt/caf\xe9 rw - ext4 /dev/sdb1 rw\n");
    fs::write(proc_root.join("self/mountinfo"), mountinfo).unwrap();
    fs::write(
        proc_root.join("diskstats"),
        "   8       1 sda1 1 0 8 0 1 0 8 0 0 0 0\n",
    )
    .unwrap();

    let config = DiskConfig {
        proc_root,
        ..Default::default()
    };
    let mut disk = DiskCollector::new(Arc::new(RealFs::new()), config);
    let s = disk.sample().await.unwrap();

    assert_eq!(s.items.len(), 2);
    let real = s.items.iter().find(|i| i.mountpoint == real_mount).unwrap();
    assert!(real.total_bytes.is_some_and(|t| t > 0));
    let odd = s.items.iter().find(|i| i.mountpoint == "/mnt/caf\u{fffd}").unwrap();
    assert_eq!(odd.total_bytes, None);
}
