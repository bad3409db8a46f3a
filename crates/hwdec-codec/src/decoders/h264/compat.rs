//! 硬件兼容性检查与解码器选择.

use bitflags::bitflags;
use log::{debug, info};

use super::scaling::{DriverVersion, GpuVendor, HardwareEnv};

bitflags! {
    /// 硬件解码的兼容性问题
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct HwCompatIssues: u32 {
        /// 不支持 level 5.1
        const UNSUPPORTED_LEVEL = 1;
        /// 参考帧数超过硬件上限
        const TOO_MANY_REF_FRAMES = 2;
        /// 像素宽高比不兼容
        const INCOMPATIBLE_SAR = 4;
    }
}

/// 默认参考帧上限
const DEFAULT_MAX_REF_FRAMES: u32 = 11;

/// 默认上限按像素数推算时使用的总量
const MAX_REF_PIXELS: u32 = 8_388_608;

/// 支持 level 5.1 的 NVIDIA 驱动 (Vista 及以后)
const NVIDIA_MIN_DRIVER: DriverVersion = DriverVersion(7, 15, 11, 7800);

/// 支持 level 5.1 的 NVIDIA 驱动 (XP)
const NVIDIA_LEGACY_MIN_DRIVER: DriverVersion = DriverVersion(6, 14, 11, 7800);

/// 支持 level 5.1 的 ATI 驱动
const ATI_MIN_DRIVER: DriverVersion = DriverVersion(8, 14, 1, 6105);

/// 支持 level 5.1 的 ATI 设备系列 (device_id >> 8)
const ATI_L51_FAMILIES: [u16; 2] = [0x68, 0x94];

/// level_idc 5.1
const LEVEL_5_1: u8 = 51;

/// 检查流参数能否交给硬件解码
///
/// `level` 为 None 时不检查 level.
pub fn check_hw_compatibility(
    width: u32,
    height: u32,
    level: Option<u8>,
    ref_frames: u32,
    env: &HardwareEnv,
) -> HwCompatIssues {
    let pixels = width.saturating_mul(height).max(1);
    let mut max_ref_frames = DEFAULT_MAX_REF_FRAMES.min(MAX_REF_PIXELS / pixels);
    let mut level51_supported = false;

    match env.vendor {
        GpuVendor::Nvidia => {
            // 主版本 6 为 XP 驱动
            if env.driver_version.0 <= 6 {
                if env.driver_version >= NVIDIA_LEGACY_MIN_DRIVER {
                    level51_supported = true;
                    max_ref_frames = 14;
                }
            } else if env.driver_version >= NVIDIA_MIN_DRIVER {
                level51_supported = true;
                max_ref_frames = if width >= 1280 { 16 } else { 11 };
            }
        }
        GpuVendor::S3Graphics => level51_supported = true,
        GpuVendor::Ati => {
            if ATI_L51_FAMILIES.contains(&(env.device_id >> 8))
                && env.driver_version >= ATI_MIN_DRIVER
            {
                level51_supported = true;
                max_ref_frames = 16;
            }
        }
        GpuVendor::Intel | GpuVendor::Unknown => {}
    }

    let mut issues = HwCompatIssues::empty();
    if level.is_some_and(|l| l >= LEVEL_5_1) && !level51_supported {
        issues |= HwCompatIssues::UNSUPPORTED_LEVEL;
    }
    if ref_frames > max_ref_frames {
        issues |= HwCompatIssues::TOO_MANY_REF_FRAMES;
    }
    debug!(
        "H.264: 兼容性检查 {width}x{height}, level={level:?}, refs={ref_frames}/{max_ref_frames}, vendor={:?}, driver={}, issues={issues:?}",
        env.vendor, env.driver_version
    );
    issues
}

/// 解码器实现
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderKind {
    Software,
    Dxva,
}

/// 按兼容性检查结果选择解码器
///
/// 只有 level 不受支持时回退到软件解码; 参考帧过多仅记录.
pub fn select_decoder_kind(issues: HwCompatIssues, hardware_available: bool) -> DecoderKind {
    if !hardware_available {
        return DecoderKind::Software;
    }
    if issues.contains(HwCompatIssues::UNSUPPORTED_LEVEL) {
        info!("H.264: 硬件不支持该 level, 使用软件解码");
        return DecoderKind::Software;
    }
    if issues.contains(HwCompatIssues::TOO_MANY_REF_FRAMES) {
        info!("H.264: 参考帧数超过硬件上限, 仍尝试硬件解码");
    }
    DecoderKind::Dxva
}
