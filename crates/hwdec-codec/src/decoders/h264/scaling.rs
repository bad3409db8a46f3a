//! 缩放矩阵与显卡厂商相关的扫描顺序.
//!
//! 解析器以自身的系数顺序保存缩放表. ATI 驱动直接接受这个顺序, 其他厂商
//! 需要先按 Zig-Zag 表重排. 厂商是静态的环境属性, 只探测一次并缓存.

use std::sync::OnceLock;

use super::structs::DxvaQmatrixH264;
use crate::parsers::h264::PictureParamState;

/// 4x4 Zig-Zag 重排表
pub const ZZ_SCAN: [usize; 16] = [0, 1, 4, 8, 5, 2, 3, 6, 9, 12, 13, 10, 7, 11, 14, 15];

/// 8x8 Zig-Zag 重排表
pub const ZZ_SCAN8: [usize; 64] = [
    0, 1, 8, 16, 9, 2, 3, 10, 17, 24, 32, 25, 18, 11, 4, 5, //
    12, 19, 26, 33, 40, 48, 41, 34, 27, 20, 13, 6, 7, 14, 21, 28, //
    35, 42, 49, 56, 57, 50, 43, 36, 29, 22, 15, 23, 30, 37, 44, 51, //
    58, 59, 52, 45, 38, 31, 39, 46, 53, 60, 61, 54, 47, 55, 62, 63,
];

/// 显卡厂商
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum GpuVendor {
    Nvidia,
    Ati,
    Intel,
    S3Graphics,
    #[default]
    Unknown,
}

impl GpuVendor {
    /// 由 PCI 厂商 ID 识别
    pub fn from_pci_id(id: u32) -> Self {
        match id {
            0x10DE => Self::Nvidia,
            0x1002 => Self::Ati,
            0x8086 => Self::Intel,
            0x5333 => Self::S3Graphics,
            _ => Self::Unknown,
        }
    }

    /// 由名称识别 (配置文件使用), 不区分大小写
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "nvidia" => Some(Self::Nvidia),
            "ati" | "amd" => Some(Self::Ati),
            "intel" => Some(Self::Intel),
            "s3" | "s3graphics" => Some(Self::S3Graphics),
            "unknown" => Some(Self::Unknown),
            _ => None,
        }
    }

    /// 该厂商期望的缩放表顺序
    pub fn scan_order(&self) -> ScanOrder {
        match self {
            Self::Ati => ScanOrder::Native,
            _ => ScanOrder::ZigZag,
        }
    }
}

/// 驱动版本号 a.b.c.d
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct DriverVersion(pub u16, pub u16, pub u16, pub u16);

impl DriverVersion {
    /// 由 64 位打包版本号 (每段 16 位, 高位在前) 构造
    pub fn from_packed(packed: u64) -> Self {
        Self(
            (packed >> 48) as u16,
            (packed >> 32) as u16,
            (packed >> 16) as u16,
            packed as u16,
        )
    }
}

impl std::fmt::Display for DriverVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}.{}", self.0, self.1, self.2, self.3)
    }
}

/// 显卡环境信息
///
/// 由宿主探测后通过 [`HardwareEnv::install`] 注册一次; 未注册时视为未知厂商.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HardwareEnv {
    pub vendor: GpuVendor,
    pub device_id: u16,
    pub driver_version: DriverVersion,
}

static HARDWARE_ENV: OnceLock<HardwareEnv> = OnceLock::new();

impl HardwareEnv {
    /// 注册显卡环境, 只有第一次调用生效
    ///
    /// 返回是否由本次调用完成注册.
    pub fn install(env: HardwareEnv) -> bool {
        HARDWARE_ENV.set(env).is_ok()
    }

    /// 当前显卡环境 (首次读取后固定)
    pub fn current() -> &'static HardwareEnv {
        HARDWARE_ENV.get_or_init(HardwareEnv::default)
    }
}

/// 缩放表系数顺序
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOrder {
    /// 解析器原生顺序
    Native,
    /// Zig-Zag 重排
    ZigZag,
}

/// 按硬件期望的顺序构建缩放矩阵
pub fn build_scaling_matrix(pps: &PictureParamState, order: ScanOrder) -> DxvaQmatrixH264 {
    let mut matrix = DxvaQmatrixH264 {
        scaling_lists_4x4: pps.scaling_matrix4,
        scaling_lists_8x8: pps.scaling_matrix8,
    };
    if order == ScanOrder::Native {
        return matrix;
    }

    for (dst, src) in matrix
        .scaling_lists_4x4
        .iter_mut()
        .zip(pps.scaling_matrix4.iter())
    {
        for (j, coeff) in dst.iter_mut().enumerate() {
            *coeff = src[ZZ_SCAN[j]];
        }
    }
    for (dst, src) in matrix
        .scaling_lists_8x8
        .iter_mut()
        .zip(pps.scaling_matrix8.iter())
    {
        for (j, coeff) in dst.iter_mut().enumerate() {
            *coeff = src[ZZ_SCAN8[j]];
        }
    }
    matrix
}
