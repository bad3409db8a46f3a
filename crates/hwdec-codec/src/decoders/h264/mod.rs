//! H.264 解码器.
//!
//! 两种实现在连接时二选一:
//! - [`DxvaH264Decoder`]: 把解析器状态翻译成 DXVA 缓冲区, 交给视频加速器解码
//! - [`SoftwareH264Decoder`]: 委托外部软件后端

pub mod accelerator;
pub mod compat;
pub mod dxva;
pub mod reorder;
pub mod scaling;
pub mod sequencer;
pub mod slice_builder;
pub mod software;
pub mod structs;
pub mod surface_pool;
pub mod translate;

use log::{info, warn};

use hwdec_core::{HwDecResult, ReferenceTime};

use crate::access_unit::AccessUnit;
use crate::decoder::{DecodeOutcome, Decoder};
use crate::frame::SampleHandle;
use crate::parsers::h264::BitstreamParser;

pub use accelerator::{BufferType, ExecBuffers, VideoAccelerator};
pub use compat::{DecoderKind, HwCompatIssues, check_hw_compatibility, select_decoder_kind};
pub use dxva::{DxvaH264Decoder, SliceForm};
pub use scaling::{DriverVersion, GpuVendor, HardwareEnv, ScanOrder};
pub use sequencer::RetryPolicy;
pub use software::{SoftwareBackend, SoftwareH264Decoder, SoftwareOutput};
pub use surface_pool::{DecodedPicture, SurfacePool};

// ============================================================
// 选项
// ============================================================

/// 硬件解码器选项
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DxvaOptions {
    /// 解码表面数量 (1..=127)
    pub surface_count: usize,
    /// 平均帧时长, 100ns 单位
    pub average_frame_duration: ReferenceTime,
    /// 默认的 NAL 长度前缀字节数, 0 表示 Annex B
    pub nal_length_size: usize,
    /// 显卡厂商, None 时使用已注册的 [`HardwareEnv`]
    pub vendor: Option<GpuVendor>,
    /// 切片控制记录容量
    pub max_slices: usize,
    /// 忙等待重试策略
    pub retry: RetryPolicy,
}

impl Default for DxvaOptions {
    fn default() -> Self {
        Self {
            surface_count: 16,
            average_frame_duration: 400_000,
            nal_length_size: 0,
            vendor: None,
            max_slices: 16,
            retry: RetryPolicy::default(),
        }
    }
}

/// 创建硬件解码器所需的部件
pub struct DxvaParts {
    pub accelerator: Box<dyn VideoAccelerator>,
    pub parser: Box<dyn BitstreamParser>,
    pub options: DxvaOptions,
}

// ============================================================
// 解码器变体
// ============================================================

/// H.264 解码器
pub enum H264Decoder {
    Software(SoftwareH264Decoder),
    Dxva(Box<DxvaH264Decoder>),
}

impl H264Decoder {
    /// 按兼容性检查结果选择实现
    ///
    /// 选中硬件但配置握手失败时回退到软件解码.
    pub fn connect(
        issues: HwCompatIssues,
        hardware: Option<DxvaParts>,
        software: Box<dyn SoftwareBackend>,
    ) -> Self {
        let kind = select_decoder_kind(issues, hardware.is_some());
        if let (DecoderKind::Dxva, Some(parts)) = (kind, hardware) {
            match DxvaH264Decoder::open(parts.accelerator, parts.parser, parts.options) {
                Ok(dec) => {
                    info!("H.264: 使用 DXVA 硬件解码");
                    return Self::Dxva(Box::new(dec));
                }
                Err(e) => warn!("H.264: 硬件解码器初始化失败, 回退到软件解码, {e}"),
            }
        }
        Self::Software(SoftwareH264Decoder::new(software))
    }

    /// 当前实现
    pub fn kind(&self) -> DecoderKind {
        match self {
            Self::Software(_) => DecoderKind::Software,
            Self::Dxva(_) => DecoderKind::Dxva,
        }
    }

    /// 硬件实现
    pub fn as_dxva(&self) -> Option<&DxvaH264Decoder> {
        match self {
            Self::Dxva(dec) => Some(dec),
            Self::Software(_) => None,
        }
    }
}

impl Decoder for H264Decoder {
    fn name(&self) -> &str {
        match self {
            Self::Software(dec) => dec.name(),
            Self::Dxva(dec) => dec.name(),
        }
    }

    fn decode(&mut self, unit: &AccessUnit, sample: &SampleHandle) -> HwDecResult<DecodeOutcome> {
        match self {
            Self::Software(dec) => dec.decode(unit, sample),
            Self::Dxva(dec) => dec.decode(unit, sample),
        }
    }

    fn flush(&mut self) {
        match self {
            Self::Software(dec) => dec.flush(),
            Self::Dxva(dec) => dec.flush(),
        }
    }
}
