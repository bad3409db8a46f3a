//! JSON 配置.
//!
//! 配置文件包含日志与解码器两部分, 缺省字段使用默认值:
//!
//! ```json
//! {
//!   "logging": { "level": "info", "directory": "logs", "file_prefix": "hwdec" },
//!   "decoder": { "surface_count": 16, "gpu_vendor": "nvidia" }
//! }
//! ```

use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use hwdec_codec::DxvaOptions;
use hwdec_codec::decoders::h264::{GpuVendor, RetryPolicy};
use hwdec_core::ReferenceTime;

use crate::logging::LoggingConfig;

/// 顶层配置
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct HwDecConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub decoder: DecoderConfig,
}

/// 硬件解码器配置
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DecoderConfig {
    /// 解码表面数量 (1..=127)
    pub surface_count: usize,
    /// 平均帧时长, 100ns 单位
    pub average_frame_duration: ReferenceTime,
    /// NAL 长度前缀字节数, 0 表示 Annex B
    pub nal_length_size: usize,
    /// 显卡厂商 ("nvidia" / "ati" / "intel" / "s3"), 不填时使用探测结果
    pub gpu_vendor: Option<String>,
    /// 切片控制记录容量
    pub max_slices: usize,
    /// 缓冲区申请与 execute 的最大尝试次数
    pub execute_retry: u32,
    /// begin_frame 的最大轮数
    pub begin_frame_rounds: u32,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        let options = DxvaOptions::default();
        Self {
            surface_count: options.surface_count,
            average_frame_duration: options.average_frame_duration,
            nal_length_size: options.nal_length_size,
            gpu_vendor: None,
            max_slices: options.max_slices,
            execute_retry: options.retry.execute_retry,
            begin_frame_rounds: options.retry.begin_frame_rounds,
        }
    }
}

impl DecoderConfig {
    /// 校验配置取值
    pub fn validate(&self) -> Result<()> {
        if !(1..=127).contains(&self.surface_count) {
            bail!("surface_count 必须在 1..=127 之间, 实际为 {}", self.surface_count);
        }
        if self.max_slices == 0 {
            bail!("max_slices 必须大于 0");
        }
        if self.nal_length_size > 4 {
            bail!("nal_length_size 只能为 0-4, 实际为 {}", self.nal_length_size);
        }
        if self.average_frame_duration <= 0 {
            bail!(
                "average_frame_duration 必须为正数, 实际为 {}",
                self.average_frame_duration
            );
        }
        if let Some(name) = &self.gpu_vendor {
            if GpuVendor::from_name(name).is_none() {
                bail!("未知的显卡厂商: {name}");
            }
        }
        Ok(())
    }

    /// 转换为解码器选项
    ///
    /// 无法识别的厂商名按未指定处理.
    pub fn to_options(&self) -> DxvaOptions {
        DxvaOptions {
            surface_count: self.surface_count,
            average_frame_duration: self.average_frame_duration,
            nal_length_size: self.nal_length_size,
            vendor: self.gpu_vendor.as_deref().and_then(GpuVendor::from_name),
            max_slices: self.max_slices,
            retry: RetryPolicy {
                execute_retry: self.execute_retry,
                begin_frame_rounds: self.begin_frame_rounds,
                ..RetryPolicy::default()
            },
        }
    }
}

impl From<&DecoderConfig> for DxvaOptions {
    fn from(config: &DecoderConfig) -> Self {
        config.to_options()
    }
}

/// 从 JSON 文本解析配置
pub fn parse_config(text: &str) -> Result<HwDecConfig> {
    let config: HwDecConfig = serde_json::from_str(text).context("解析配置 JSON 失败")?;
    config.decoder.validate().context("解码器配置无效")?;
    Ok(config)
}

/// 从文件加载配置
pub fn load_config(path: impl AsRef<Path>) -> Result<HwDecConfig> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("读取配置文件失败, path={}", path.display()))?;
    parse_config(&text).with_context(|| format!("加载配置失败, path={}", path.display()))
}
