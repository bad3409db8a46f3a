//! hwdec-probe - H.264 码流探测工具
//!
//! 列出码流中的每个 NAL 单元, 以及每个访问单元提交给硬件时的切片布局.

use std::path::PathBuf;

use anyhow::{Context, Result, ensure};
use clap::Parser;

mod analyze;

use analyze::{AccessUnitInfo, NalInfo, ProbeReport, probe};

/// H.264 码流探测工具
#[derive(Parser, Debug)]
#[command(name = "hwdec-probe", version, about = "H.264 码流 NAL 与硬件切片布局探测工具")]
struct Cli {
    /// 输入文件路径 (H.264 基本流)
    input: PathBuf,

    /// NAL 长度前缀字节数, 0 表示 Annex B 起始码
    #[arg(long, default_value_t = 0)]
    length_size: usize,

    /// 切片控制记录容量
    #[arg(long, default_value_t = 16)]
    max_slices: usize,

    /// 输出 JSON 格式
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    ensure!(cli.length_size <= 4, "--length-size 只能为 0-4, 实际为 {}", cli.length_size);
    ensure!(cli.max_slices > 0, "--max-slices 必须大于 0");

    let data = std::fs::read(&cli.input)
        .with_context(|| format!("无法读取文件 '{}'", cli.input.display()))?;
    let report = probe(&data, cli.length_size, cli.max_slices);

    if cli.json {
        let json = serde_json::to_string_pretty(&report).context("序列化探测结果失败")?;
        println!("{json}");
    } else {
        eprintln!(
            "hwdec-probe 版本 {} -- 输入文件: {}",
            env!("CARGO_PKG_VERSION"),
            cli.input.display()
        );
        print_report_text(&report);
    }
    Ok(())
}

fn print_report_text(report: &ProbeReport) {
    print_nal_units_text(&report.nal_units);
    for au in &report.access_units {
        print_access_unit_text(au);
    }
    println!(
        "共 {} 个 NAL 单元, {} 个访问单元",
        report.nal_units.len(),
        report.access_units.len()
    );
}

/// 文本输出: NAL 列表
fn print_nal_units_text(nals: &[NalInfo]) {
    println!("[NAL]");
    println!("  {:>10}  {:<12} {:>7}  {:>8}", "偏移", "类型", "ref_idc", "大小");
    for nal in nals {
        println!(
            "  {:>10}  {:<12} {:>7}  {:>8}",
            nal.offset,
            format!("{}({})", nal.name, nal.nal_type),
            nal.ref_idc,
            nal.size
        );
    }
    println!("[/NAL]");
    println!();
}

/// 文本输出: 一个访问单元的切片布局
fn print_access_unit_text(au: &AccessUnitInfo) {
    println!("[ACCESS UNIT #{}]", au.index);
    println!("  偏移         : {}", au.offset);
    println!("  大小         : {} 字节, {} 个 NAL", au.size, au.nal_count);
    if let Some(error) = &au.error {
        println!("  跳过         : {error}");
    }
    if let Some(padded) = au.padded_len {
        println!("  码流缓冲区   : {padded} 字节");
    }
    for (i, slice) in au.slices.iter().enumerate() {
        let first_mb = slice.first_mb.map_or("?".to_string(), |v| v.to_string());
        let num_mbs = slice.num_mbs.map_or("?".to_string(), |v| v.to_string());
        println!(
            "  切片 {i:<2}      : location={} bytes={} first_mb={first_mb} mbs={num_mbs}{}",
            slice.location,
            slice.length,
            if slice.idr { " IDR" } else { "" }
        );
    }
    println!("[/ACCESS UNIT]");
    println!();
}
