use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, Local, NaiveDate, TimeZone, Utc};
use flate2::Compression;
use flate2::write::GzEncoder;
use tracing::{debug, error};

use super::{LogFileName, LoggingConfig, daily_log_path, open_append};

/// 一次目录维护的结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    /// 超过保留期被删除的文件
    pub removed: Vec<PathBuf>,
    /// 新压缩出的 `.gz` 文件
    pub compressed: Vec<PathBuf>,
}

pub(super) fn spawn_log_maintenance_task(config: LoggingConfig, rotate_requested: Arc<AtomicBool>) {
    tokio::spawn(async move {
        let period = Duration::from_secs(config.cleanup_interval_seconds.max(1));
        let mut cleanup_interval = tokio::time::interval(period);

        run_maintenance(&config, "启动时");
        let mut next_rollover_at = next_rollover_or_soon(Local::now());

        loop {
            tokio::select! {
                _ = cleanup_interval.tick() => {
                    run_maintenance(&config, "定时");
                }
                _ = tokio::time::sleep_until(next_rollover_at) => {
                    match ensure_today_file(&config) {
                        Ok(()) => rotate_requested.store(true, Ordering::Release),
                        Err(err) => error!("日志切换失败: {err:#}"),
                    }
                    run_maintenance(&config, "切换后");
                    next_rollover_at = next_rollover_or_soon(Local::now());
                }
            }
        }
    });
}

fn run_maintenance(config: &LoggingConfig, stage: &str) {
    match maintain_log_directory(config, Local::now().date_naive()) {
        Ok(report) => debug!(
            "{stage}日志维护完成, 删除 {} 个, 压缩 {} 个",
            report.removed.len(),
            report.compressed.len()
        ),
        Err(err) => error!("{stage}日志维护失败: {err:#}"),
    }
}

fn ensure_today_file(config: &LoggingConfig) -> Result<()> {
    let directory = Path::new(&config.directory);
    fs::create_dir_all(directory)?;
    let path = daily_log_path(directory, &config.file_prefix, Local::now().date_naive());
    open_append(&path)?;
    Ok(())
}

/// 按 `today` 维护日志目录
///
/// 早于 `today - retention_days` 的文件删除; 开启压缩时, 今天之前的 `.log`
/// 压缩为 `.log.gz`. 目录不存在时什么都不做.
pub fn maintain_log_directory(config: &LoggingConfig, today: NaiveDate) -> Result<MaintenanceReport> {
    let mut report = MaintenanceReport::default();
    let directory = Path::new(&config.directory);
    if !directory.exists() {
        return Ok(report);
    }

    let cutoff = today - ChronoDuration::days(config.retention_days);
    let entries = fs::read_dir(directory)
        .with_context(|| format!("读取日志目录失败, path={}", directory.display()))?;

    for entry in entries {
        let entry = entry?;
        let file_name = entry.file_name().to_string_lossy().to_string();
        let Some(name) = LogFileName::parse(&file_name, &config.file_prefix) else {
            continue;
        };
        let path = entry.path();

        if name.date < cutoff {
            if fs::remove_file(&path).is_ok() {
                report.removed.push(path);
            }
            continue;
        }

        if config.compress_history && !name.compressed && name.date < today {
            match compress_to_gz(&path) {
                Ok(Some(gz_path)) => report.compressed.push(gz_path),
                Ok(None) => {}
                Err(err) => error!("压缩日志失败: {err:#}"),
            }
        }
    }

    report.removed.sort();
    report.compressed.sort();
    Ok(report)
}

/// 压缩为同名 `.gz` 并删除原文件, 目标已存在时跳过
fn compress_to_gz(path: &Path) -> Result<Option<PathBuf>> {
    let gz_path = PathBuf::from(format!("{}.gz", path.display()));
    if gz_path.exists() {
        return Ok(None);
    }

    let mut input =
        File::open(path).with_context(|| format!("打开待压缩日志失败, path={}", path.display()))?;
    let output = File::create(&gz_path)
        .with_context(|| format!("创建压缩日志失败, path={}", gz_path.display()))?;
    let mut encoder = GzEncoder::new(output, Compression::default());
    io::copy(&mut input, &mut encoder)?;
    encoder.finish()?;

    fs::remove_file(path)
        .with_context(|| format!("删除已压缩日志失败, path={}", path.display()))?;
    Ok(Some(gz_path))
}

fn next_rollover_or_soon(now: DateTime<Local>) -> tokio::time::Instant {
    match compute_next_rollover(now) {
        Ok(at) => at,
        Err(err) => {
            error!("计算下一次日志切换时间失败: {err:#}");
            tokio::time::Instant::now() + Duration::from_secs(1)
        }
    }
}

fn compute_next_rollover(now: DateTime<Local>) -> Result<tokio::time::Instant> {
    let next_date = now.date_naive() + ChronoDuration::days(1);
    let next_midnight = next_date
        .and_hms_opt(0, 0, 0)
        .context("计算下一次日志切换时间失败")?;
    let next_local = Local
        .from_local_datetime(&next_midnight)
        .earliest()
        .context("转换本地时间失败")?;
    let system_time = SystemTime::from(next_local.with_timezone(&Utc));
    let duration = system_time
        .duration_since(SystemTime::now())
        .unwrap_or(Duration::ZERO);
    Ok(tokio::time::Instant::now() + duration)
}
