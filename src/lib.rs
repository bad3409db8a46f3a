//! # hwdec
//!
//! H.264 DXVA 硬件加速解码管线.
//!
//! 管线把上游码流解析器的状态翻译成 DXVA 缓冲区, 交给视频加速器解码,
//! 再按显示顺序输出解码表面:
//! - **NAL 切分**: Annex B 起始码与长度前缀两种格式
//! - **参数翻译**: SPS/PPS/切片头 → DXVA_PicParams_H264 / 缩放表 / 切片控制
//! - **表面池**: 解码表面的分配, 回收与场对合并
//! - **输出重排**: 按解析器给出的输出顺序选择图像并补齐时间戳
//!
//! # 快速开始
//!
//! ```rust,no_run
//! use hwdec::config::HwDecConfig;
//!
//! let config = HwDecConfig::default();
//! let options = config.decoder.to_options();
//! println!("表面数: {}", options.surface_count);
//! ```
//!
//! # Crate 结构
//!
//! | Crate | 功能 |
//! |-------|------|
//! | `hwdec-core` | 错误类型, 时间戳, 位读取器 |
//! | `hwdec-codec` | NAL 读取, DXVA H.264 解码管线 |

/// 核心类型与工具
pub use hwdec_core as core;

/// H.264 解码管线
pub use hwdec_codec as codec;

pub mod config;
pub mod logging;

/// 获取 hwdec 版本号
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
