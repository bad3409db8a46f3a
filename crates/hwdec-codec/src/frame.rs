//! 输出图像与媒体样本.
//!
//! 解码后的像素留在硬件表面中, 管线只向交付端报告"哪个表面, 什么时间,
//! 什么类型", 由交付端据此盖戳并转发媒体样本.

use std::sync::Arc;

use bitflags::bitflags;
use hwdec_core::ReferenceTime;

use crate::parsers::h264::SliceKind;

/// 图像 (或首场) 的场类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FieldType {
    /// 顶场
    Top,
    /// 底场
    Bottom,
    /// 帧
    #[default]
    Frame,
}

impl FieldType {
    /// 是否为场图像
    pub fn is_field(&self) -> bool {
        !matches!(self, Self::Frame)
    }
}

bitflags! {
    /// 样本的类型相关标志 (dwTypeSpecificFlags 低 7 位)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TypeSpecificFlags: u32 {
        /// 顶场先显示
        const FIELD1FIRST = 0x04;
        /// 两场交织成帧显示
        const WEAVE       = 0x08;
        /// P 样本
        const P_SAMPLE    = 0x10;
        /// B 样本
        const B_SAMPLE    = 0x20;
    }
}

/// dwTypeSpecificFlags 中归管线管理的位
pub const TYPE_SPECIFIC_MASK: u32 = 0x7F;

impl TypeSpecificFlags {
    /// 按首场类型和切片类型计算样本标志
    ///
    /// I 样本的类型值为 0, 因此 I/SI 只体现为没有 P/B 位.
    pub fn for_picture(first_field_type: FieldType, slice_kind: SliceKind) -> Self {
        let mut flags = match first_field_type {
            FieldType::Frame => Self::WEAVE,
            FieldType::Top => Self::FIELD1FIRST,
            FieldType::Bottom => Self::empty(),
        };
        match slice_kind {
            SliceKind::I | SliceKind::Si => {}
            SliceKind::P | SliceKind::Sp => flags |= Self::P_SAMPLE,
            SliceKind::B => flags |= Self::B_SAMPLE,
        }
        flags
    }

    /// 在样本原有标志上改写低 7 位
    pub fn revise(existing: u32, first_field_type: FieldType, slice_kind: SliceKind) -> u32 {
        (existing & !TYPE_SPECIFIC_MASK) | Self::for_picture(first_field_type, slice_kind).bits()
    }
}

/// 交付端的媒体样本
///
/// 样本由宿主分配并可能被多个位置共享, 因此方法都只取 `&self`,
/// 实现方自行处理内部可变性.
pub trait MediaSample: Send + Sync {
    /// 设置开始/结束时间
    fn set_time(&self, start: ReferenceTime, stop: ReferenceTime);

    /// 读取当前的类型相关标志
    fn type_specific_flags(&self) -> u32;

    /// 写入类型相关标志
    fn set_type_specific_flags(&self, flags: u32);
}

/// 共享的媒体样本句柄
pub type SampleHandle = Arc<dyn MediaSample>;

/// 一幅被选中输出的图像
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayPicture {
    /// 图像所在的表面索引
    pub surface_index: u8,
    /// 开始时间
    pub start: ReferenceTime,
    /// 结束时间
    pub stop: ReferenceTime,
    /// 首场类型
    pub first_field_type: FieldType,
    /// 切片类型
    pub slice_kind: SliceKind,
    /// 是否已经盖戳并提交显示 (开始时间为负时只标记为已显示)
    pub presented: bool,
}

impl DisplayPicture {
    /// 该图像对应的样本标志
    pub fn type_flags(&self) -> TypeSpecificFlags {
        TypeSpecificFlags::for_picture(self.first_field_type, self.slice_kind)
    }
}
