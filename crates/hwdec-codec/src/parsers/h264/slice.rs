//! 切片头前缀解析.
//!
//! 硬件只需要从码流中拿到每个切片的起始宏块与切片类型, 其余切片头字段
//! 由外部码流解析器提供 (见 [`super::state`]).

use hwdec_core::bitreader::BitReader;
use hwdec_core::{HwDecError, HwDecResult};

use super::nal::{NalUnit, remove_emulation_prevention};

/// 解析切片头前缀时最多去除防竞争字节的长度
///
/// 两个 ue(v) 最长 2 * 65 位, 32 字节足够.
const PREFIX_SCAN_BYTES: usize = 32;

/// 切片类型 (slice_type % 5)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SliceKind {
    /// P 切片
    P,
    /// B 切片
    B,
    /// I 切片
    #[default]
    I,
    /// SP 切片
    Sp,
    /// SI 切片
    Si,
}

impl SliceKind {
    /// 从切片头中的 slice_type (0-9) 转换
    pub fn from_slice_type(slice_type: u32) -> Option<Self> {
        match slice_type % 5 {
            0 if slice_type < 10 => Some(Self::P),
            1 if slice_type < 10 => Some(Self::B),
            2 if slice_type < 10 => Some(Self::I),
            3 if slice_type < 10 => Some(Self::Sp),
            4 if slice_type < 10 => Some(Self::Si),
            _ => None,
        }
    }

    /// 是否为帧内切片 (I 或 SI)
    pub fn is_intra(&self) -> bool {
        matches!(self, Self::I | Self::Si)
    }

    /// 是否使用参考列表 1
    pub fn uses_list1(&self) -> bool {
        matches!(self, Self::B)
    }
}

impl std::fmt::Display for SliceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::P => "P",
            Self::B => "B",
            Self::I => "I",
            Self::Sp => "SP",
            Self::Si => "SI",
        };
        f.write_str(name)
    }
}

/// 切片头前缀
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlicePrefix {
    /// 切片第一个宏块的地址
    pub first_mb_in_slice: u32,
    /// 原始 slice_type (0-9)
    pub slice_type: u32,
    /// 切片类型分类
    pub kind: SliceKind,
}

/// 从切片 NAL 单元解析 first_mb_in_slice 与 slice_type
pub fn parse_slice_prefix(nal: &NalUnit<'_>) -> HwDecResult<SlicePrefix> {
    if !nal.nal_type.is_hw_slice() {
        return Err(HwDecError::InvalidArgument(format!(
            "H.264: NAL 类型 {} 不是切片",
            nal.nal_type
        )));
    }
    // 跳过 1 字节 NAL 头部
    let body = nal.payload.get(1..).unwrap_or_default();
    let scan = &body[..body.len().min(PREFIX_SCAN_BYTES)];
    let rbsp = remove_emulation_prevention(scan);

    let mut br = BitReader::new(&rbsp);
    let first_mb_in_slice = br.read_ue()?;
    let slice_type = br.read_ue()?;
    let kind = SliceKind::from_slice_type(slice_type).ok_or_else(|| {
        HwDecError::InvalidData(format!("H.264: 非法 slice_type={slice_type}"))
    })?;

    Ok(SlicePrefix {
        first_mb_in_slice,
        slice_type,
        kind,
    })
}
