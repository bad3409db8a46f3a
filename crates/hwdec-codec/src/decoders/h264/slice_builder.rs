//! 硬件码流缓冲区与切片控制记录的构建.
//!
//! 每个切片 NAL 前面补 3 字节起始码后依次写入码流缓冲区, 其他 NAL 不写入.
//! 总长度补零到 128 字节的整数倍, 补齐的字节计入最后一个切片.

use bytemuck::Zeroable;
use log::debug;
use thiserror::Error;

use super::structs::{DxvaSliceH264Long, DxvaSliceH264Short};
use crate::parsers::h264::nal::{NalReader, NalUnitType, START_CODE};
use crate::parsers::h264::parse_slice_prefix;

/// 码流缓冲区长度对齐
pub const BITSTREAM_ALIGNMENT: usize = 128;

/// 切片构建失败原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SliceBuildError {
    /// 访问单元中没有切片
    #[error("H.264: 访问单元中没有切片")]
    NoSlices,

    /// 切片数超过切片控制记录容量
    #[error("H.264: 切片数超过容量 {capacity}")]
    TooManySlices { capacity: usize },

    /// 码流缓冲区放不下
    #[error("H.264: 码流缓冲区不足, 需要 {needed} 字节, 可用 {available} 字节")]
    BufferTooSmall { needed: usize, available: usize },
}

/// 一个切片在码流缓冲区中的布局
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SliceEntry {
    /// 起始码在码流缓冲区中的偏移
    pub location: u32,
    /// 字节数 (含起始码; 最后一个切片含补齐字节)
    pub length: u32,
    /// 切片头中的 first_mb_in_slice, 解析失败时为 None
    pub first_mb: Option<u32>,
    /// 宏块数, 由下一个切片的起始宏块推算
    pub num_mbs: Option<u32>,
    /// NAL 类型 (Slice 或 IDR)
    pub nal_type: NalUnitType,
}

/// 一个访问单元的码流布局
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SliceLayout {
    /// 各切片
    pub slices: Vec<SliceEntry>,
    /// 补齐前的码流长度
    pub data_len: usize,
    /// 补齐后的码流长度
    pub padded_len: usize,
}

/// 统计访问单元中需要提交给硬件的切片数
pub fn count_slices(data: &[u8], length_size: usize) -> usize {
    NalReader::new(data, length_size)
        .filter(|nal| nal.nal_type.is_hw_slice())
        .count()
}

/// 访问单元中是否含有 IDR 切片
pub fn contains_idr(data: &[u8], length_size: usize) -> bool {
    NalReader::new(data, length_size).any(|nal| nal.nal_type.is_idr())
}

/// 把访问单元中的切片写入 `dest`, 返回布局
///
/// `capacity` 为切片控制记录的最大数量.
pub fn build(
    data: &[u8],
    length_size: usize,
    dest: &mut [u8],
    capacity: usize,
) -> Result<SliceLayout, SliceBuildError> {
    let mut layout = SliceLayout::default();
    let mut offset = 0usize;

    for nal in NalReader::new(data, length_size) {
        if !nal.nal_type.is_hw_slice() {
            continue;
        }
        if layout.slices.len() >= capacity {
            return Err(SliceBuildError::TooManySlices { capacity });
        }

        let length = START_CODE.len() + nal.len();
        let end = offset + length;
        if end > dest.len() {
            return Err(SliceBuildError::BufferTooSmall {
                needed: end,
                available: dest.len(),
            });
        }
        dest[offset..offset + START_CODE.len()].copy_from_slice(&START_CODE);
        dest[offset + START_CODE.len()..end].copy_from_slice(nal.payload);

        let first_mb = match parse_slice_prefix(&nal) {
            Ok(prefix) => Some(prefix.first_mb_in_slice),
            Err(e) => {
                debug!("H.264: 切片头前缀解析失败, offset={}, {e}", nal.start);
                None
            }
        };
        if let Some(prev) = layout.slices.last_mut() {
            prev.num_mbs = match (prev.first_mb, first_mb) {
                (Some(a), Some(b)) => Some(b.saturating_sub(a)),
                _ => None,
            };
        }

        layout.slices.push(SliceEntry {
            location: offset as u32,
            length: length as u32,
            first_mb,
            num_mbs: None,
            nal_type: nal.nal_type,
        });
        offset = end;
    }

    let Some(last) = layout.slices.last_mut() else {
        return Err(SliceBuildError::NoSlices);
    };

    let padded_len = offset.next_multiple_of(BITSTREAM_ALIGNMENT);
    if padded_len > dest.len() {
        return Err(SliceBuildError::BufferTooSmall {
            needed: padded_len,
            available: dest.len(),
        });
    }
    dest[offset..padded_len].fill(0);
    last.length += (padded_len - offset) as u32;

    layout.data_len = offset;
    layout.padded_len = padded_len;
    Ok(layout)
}

impl SliceLayout {
    /// 切片数
    pub fn len(&self) -> usize {
        self.slices.len()
    }

    /// 是否没有切片
    pub fn is_empty(&self) -> bool {
        self.slices.is_empty()
    }

    /// 用图像宏块总数推算最后一个切片的宏块数
    pub fn finish_last_slice(&mut self, total_mbs: u32) {
        if let Some(last) = self.slices.last_mut() {
            last.num_mbs = last.first_mb.map(|first| total_mbs.saturating_sub(first));
        }
    }

    /// 短格式切片控制记录
    pub fn short_records(&self) -> Vec<DxvaSliceH264Short> {
        self.slices
            .iter()
            .map(|slice| DxvaSliceH264Short {
                bs_nal_unit_data_location: slice.location,
                slice_bytes_in_buffer: slice.length,
                w_bad_slice_chopping: 0,
            })
            .collect()
    }

    /// 长格式切片控制记录 (只含码流布局字段, 切片头字段另行填充)
    pub fn long_records(&self) -> Vec<DxvaSliceH264Long> {
        self.slices
            .iter()
            .enumerate()
            .map(|(i, slice)| {
                let mut record = DxvaSliceH264Long::zeroed();
                record.bs_nal_unit_data_location = slice.location;
                record.slice_bytes_in_buffer = slice.length;
                record.first_mb_in_slice = slice.first_mb.unwrap_or(0) as u16;
                record.num_mbs_for_slice = slice.num_mbs.unwrap_or(0) as u16;
                record.slice_id = i as u16;
                record
            })
            .collect()
    }
}
