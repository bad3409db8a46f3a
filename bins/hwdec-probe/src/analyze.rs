//! 码流分析: NAL 单元列表与每个访问单元的硬件切片布局.
//!
//! 访问单元在 AUD 处, 或在已有切片之后遇到 first_mb_in_slice = 0 的切片处分割.

use log::debug;
use serde::Serialize;

use hwdec_codec::decoders::h264::slice_builder::{self, BITSTREAM_ALIGNMENT};
use hwdec_codec::parsers::h264::{NalReader, NalUnit, NalUnitType, parse_slice_prefix};

/// 一个 NAL 单元
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NalInfo {
    /// 起始码或长度前缀的偏移
    pub offset: usize,
    pub nal_type: u8,
    pub name: String,
    pub ref_idc: u8,
    /// NAL 数据长度 (含头部字节)
    pub size: usize,
}

/// 一个切片控制记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SliceInfo {
    pub location: u32,
    pub length: u32,
    pub first_mb: Option<u32>,
    /// 最后一个切片需要 SPS 才能推算, 这里为 None
    pub num_mbs: Option<u32>,
    pub idr: bool,
}

/// 一个访问单元
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccessUnitInfo {
    pub index: usize,
    pub offset: usize,
    pub size: usize,
    pub nal_count: usize,
    /// 补齐后的码流缓冲区长度
    #[serde(skip_serializing_if = "Option::is_none")]
    pub padded_len: Option<usize>,
    pub slices: Vec<SliceInfo>,
    /// 切片构建失败原因
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// 完整探测结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeReport {
    pub length_size: usize,
    pub nal_units: Vec<NalInfo>,
    pub access_units: Vec<AccessUnitInfo>,
}

fn starts_access_unit(nal: &NalUnit<'_>, has_slice: bool) -> bool {
    match nal.nal_type {
        NalUnitType::Aud => true,
        t if t.is_hw_slice() && has_slice => {
            parse_slice_prefix(nal).is_ok_and(|prefix| prefix.first_mb_in_slice == 0)
        }
        _ => false,
    }
}

/// 分析整段码流
pub fn probe(data: &[u8], length_size: usize, max_slices: usize) -> ProbeReport {
    let mut nal_units = Vec::new();
    let mut ranges = Vec::new();
    let mut current: Option<(usize, usize)> = None;
    let mut has_slice = false;

    for nal in NalReader::new(data, length_size) {
        nal_units.push(NalInfo {
            offset: nal.start,
            nal_type: nal.nal_type.type_id(),
            name: nal.nal_type.to_string(),
            ref_idc: nal.ref_idc,
            size: nal.len(),
        });

        if starts_access_unit(&nal, has_slice) {
            if let Some((start, count)) = current.take() {
                ranges.push((start, nal.start, count));
            }
            has_slice = false;
        }
        let (_, count) = current.get_or_insert((nal.start, 0));
        *count += 1;
        if nal.nal_type.is_hw_slice() {
            has_slice = true;
        }
    }
    if let Some((start, count)) = current {
        ranges.push((start, data.len(), count));
    }

    let access_units = ranges
        .into_iter()
        .enumerate()
        .map(|(index, (start, end, nal_count))| {
            describe_access_unit(index, start, &data[start..end], nal_count, length_size, max_slices)
        })
        .collect();

    ProbeReport {
        length_size,
        nal_units,
        access_units,
    }
}

fn describe_access_unit(
    index: usize,
    offset: usize,
    data: &[u8],
    nal_count: usize,
    length_size: usize,
    max_slices: usize,
) -> AccessUnitInfo {
    let mut info = AccessUnitInfo {
        index,
        offset,
        size: data.len(),
        nal_count,
        padded_len: None,
        slices: Vec::new(),
        error: None,
    };

    // 每个 NAL 的起始码/长度前缀替换为 3 字节起始码
    let capacity = (data.len() + 3 * nal_count).next_multiple_of(BITSTREAM_ALIGNMENT);
    let mut scratch = vec![0u8; capacity];
    match slice_builder::build(data, length_size, &mut scratch, max_slices) {
        Ok(layout) => {
            info.padded_len = Some(layout.padded_len);
            info.slices = layout
                .slices
                .iter()
                .map(|slice| SliceInfo {
                    location: slice.location,
                    length: slice.length,
                    first_mb: slice.first_mb,
                    num_mbs: slice.num_mbs,
                    idr: slice.nal_type.is_idr(),
                })
                .collect();
        }
        Err(e) => {
            debug!("访问单元 #{index} 切片构建失败: {e}");
            info.error = Some(e.to_string());
        }
    }
    info
}
