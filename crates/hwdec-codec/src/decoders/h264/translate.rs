//! 解析器状态 → DXVA 参数结构的翻译.
//!
//! 除了把当前表面索引写回解析器之外, 这里都是纯映射, 不触碰加速器.

use bytemuck::Zeroable;
use thiserror::Error;

use super::scaling::GpuVendor;
use super::structs::{DxvaPicParamsH264, DxvaSliceH264Long, PicEntry, pic_bits};
use crate::frame::FieldType;
use crate::parsers::h264::{BitstreamParser, PictureState, RefPicture, SliceKind, SliceState};

/// Intel 驱动要求的 Reserved16Bits 取值
const INTEL_RESERVED16_BITS: u16 = 0x534C;

/// 参考帧列表长度
const REF_FRAME_LIST_LEN: usize = 16;

/// 翻译失败原因, 都意味着"等待有效参数集"
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TranslateError {
    /// 尚未收到 SPS 或 PPS
    #[error("H.264: 缺少参数集")]
    MissingParameterSets,

    /// SPS 中的宏块宽高为 0
    #[error("H.264: 宏块尺寸无效, mb_width={mb_width}, mb_height={mb_height}")]
    EmptyDimensions { mb_width: u32, mb_height: u32 },
}

/// 一个访问单元翻译后的图像信息
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameInfo {
    /// 场类型 (SEI pic_struct 优先)
    pub field_type: FieldType,
    /// 是否以场编码
    pub is_field: bool,
    /// 切片类型
    pub slice_kind: SliceKind,
    /// 是否为参考图像
    pub is_reference: bool,
    /// 本图像 (帧或场) 的宏块数
    pub mb_count: u32,
}

/// 构造解码器生命周期内保持的图像参数初值
pub fn init_pic_params(vendor: GpuVendor) -> Box<DxvaPicParamsH264> {
    let mut params = Box::new(DxvaPicParamsH264::zeroed());
    params.reserved16_bits = if vendor == GpuVendor::Intel {
        INTEL_RESERVED16_BITS
    } else {
        0
    };
    params.set_flag(pic_bits::MBS_CONSECUTIVE_FLAG, true);
    params.set_flag(pic_bits::MIN_LUMA_BIPRED_SIZE_8X8_FLAG, true);
    params.continuation_flag = 1;
    params.ref_frame_list = [PicEntry::UNUSED; REF_FRAME_LIST_LEN];
    params
}

/// 按当前图像的场结构与 SEI pic_struct 得到场类型
fn resolve_field_type(picture: &PictureState, pic_struct_present: bool) -> FieldType {
    match picture.sei_pic_struct {
        Some(sei) if pic_struct_present => sei.field_type(),
        _ => picture.structure,
    }
}

/// 填充帧级图像参数
///
/// 参考帧列表 (RefFrameList/FieldOrderCntList/FrameNumList) 不在这里改写,
/// 它们由上一次 [`update_ref_frame_list`] 得到.
pub fn build_frame_params(
    params: &mut DxvaPicParamsH264,
    parser: &dyn BitstreamParser,
) -> Result<FrameInfo, TranslateError> {
    let (Some(sps), Some(pps)) = (parser.sequence(), parser.picture_params()) else {
        return Err(TranslateError::MissingParameterSets);
    };
    if sps.mb_width == 0 || sps.mb_height == 0 {
        return Err(TranslateError::EmptyDimensions {
            mb_width: sps.mb_width,
            mb_height: sps.mb_height,
        });
    }

    let picture = parser.picture();
    let field_type = resolve_field_type(picture, sps.pic_struct_present_flag);
    let is_field = picture.structure.is_field();
    let frame_mbs_factor = if sps.frame_mbs_only_flag { 1 } else { 2 };

    params.w_frame_width_in_mbs_minus1 = (sps.mb_width - 1) as u16;
    params.w_frame_height_in_mbs_minus1 = (sps.mb_height * frame_mbs_factor - 1) as u16;
    params.num_ref_frames = sps.ref_frame_count;

    params.set_flag(pic_bits::FIELD_PIC_FLAG, is_field);
    params.set_flag(pic_bits::MBAFF_FRAME_FLAG, sps.mb_aff && !is_field);
    params.set_flag(
        pic_bits::RESIDUAL_COLOUR_TRANSFORM_FLAG,
        sps.residual_color_transform_flag,
    );
    params.set_flag(pic_bits::SP_FOR_SWITCH_FLAG, picture.sp_for_switch_flag);
    params.set_bits(pic_bits::CHROMA_FORMAT_IDC, u16::from(sps.chroma_format_idc));
    params.set_flag(pic_bits::REF_PIC_FLAG, picture.ref_pic_flag);
    params.set_flag(
        pic_bits::CONSTRAINED_INTRA_PRED_FLAG,
        pps.constrained_intra_pred,
    );
    params.set_flag(pic_bits::WEIGHTED_PRED_FLAG, pps.weighted_pred);
    params.set_bits(
        pic_bits::WEIGHTED_BIPRED_IDC,
        u16::from(pps.weighted_bipred_idc),
    );
    params.set_flag(pic_bits::FRAME_MBS_ONLY_FLAG, sps.frame_mbs_only_flag);
    params.set_flag(pic_bits::TRANSFORM_8X8_MODE_FLAG, pps.transform_8x8_mode);
    params.set_flag(pic_bits::MIN_LUMA_BIPRED_SIZE_8X8_FLAG, sps.level_idc >= 31);
    params.set_flag(
        pic_bits::INTRA_PIC_FLAG,
        picture.slice_kind == SliceKind::I,
    );

    params.bit_depth_luma_minus8 = sps.bit_depth_luma.saturating_sub(8);
    params.bit_depth_chroma_minus8 = sps.bit_depth_chroma.saturating_sub(8);
    params.frame_num = picture.frame_num;
    params.log2_max_frame_num_minus4 = sps.log2_max_frame_num.saturating_sub(4);
    params.pic_order_cnt_type = sps.poc_type;
    params.log2_max_pic_order_cnt_lsb_minus4 = sps.log2_max_poc_lsb.saturating_sub(4);
    params.delta_pic_order_always_zero_flag = u8::from(sps.delta_pic_order_always_zero_flag);
    params.direct_8x8_inference_flag = u8::from(sps.direct_8x8_inference_flag);
    params.entropy_coding_mode_flag = u8::from(pps.cabac);
    params.pic_order_present_flag = u8::from(pps.pic_order_present);
    params.num_slice_groups_minus1 = pps.slice_group_count.saturating_sub(1);
    params.slice_group_map_type = pps.mb_slice_group_map_type;
    params.deblocking_filter_control_present_flag =
        u8::from(pps.deblocking_filter_parameters_present);
    params.redundant_pic_cnt_present_flag = u8::from(pps.redundant_pic_cnt_present);
    params.slice_group_change_rate_minus1 = pps.slice_group_change_rate_minus1;

    params.chroma_qp_index_offset = pps.chroma_qp_index_offset[0];
    params.second_chroma_qp_index_offset = pps.chroma_qp_index_offset[1];
    params.num_ref_idx_l0_active_minus1 = pps.ref_count[0].saturating_sub(1);
    params.num_ref_idx_l1_active_minus1 = pps.ref_count[1].saturating_sub(1);
    params.pic_init_qp_minus26 = (pps.init_qp - 26) as i8;
    params.pic_init_qs_minus26 = (pps.init_qs - 26) as i8;

    let poc = picture.poc;
    match picture.structure {
        FieldType::Bottom => {
            params.curr_pic.set_associated(true);
            params.curr_field_order_cnt = [0, poc];
        }
        FieldType::Top => {
            params.curr_pic.set_associated(false);
            params.curr_field_order_cnt = [poc, 0];
        }
        FieldType::Frame => {
            params.curr_pic.set_associated(false);
            params.curr_field_order_cnt = [poc, poc];
        }
    }

    let frame_mbs = sps.frame_mb_count();
    Ok(FrameInfo {
        field_type,
        is_field,
        slice_kind: picture.slice_kind,
        is_reference: picture.ref_pic_flag,
        mb_count: if is_field { frame_mbs / 2 } else { frame_mbs },
    })
}

/// 记录当前图像的表面索引, 并写回解析器的当前图像
pub fn set_current_pic(
    params: &mut DxvaPicParamsH264,
    surface: u8,
    parser: &mut dyn BitstreamParser,
) {
    params.curr_pic.set_index(surface);
    parser.set_current_surface(surface);
}

/// 按解析器的参考集合重建 16 项参考帧列表
///
/// 短期参考在前 (最近解码的在前), 其后是长期参考.
pub fn update_ref_frame_list(params: &mut DxvaPicParamsH264, parser: &dyn BitstreamParser) {
    let refs: Vec<(&RefPicture, bool)> = parser
        .short_term_refs()
        .iter()
        .map(|pic| (pic, pic.long_term))
        .chain(parser.long_term_refs().iter().map(|pic| (pic, true)))
        .take(REF_FRAME_LIST_LEN)
        .collect();

    // 逐项写入 packed 结构的数组字段会产生未对齐引用, 先在局部数组中构建
    let mut frame_num_list = [0u16; REF_FRAME_LIST_LEN];
    let mut field_order_cnt_list = [[0i32; 2]; REF_FRAME_LIST_LEN];
    let mut ref_frame_list = [PicEntry::new(PicEntry::NO_INDEX, true); REF_FRAME_LIST_LEN];
    let mut used_for_reference = 0u32;
    for (i, &(pic, associated)) in refs.iter().enumerate() {
        frame_num_list[i] = if pic.long_term {
            pic.pic_id as u16
        } else {
            pic.frame_num as u16
        };
        for (parity, poc) in pic.field_poc.iter().enumerate() {
            if let Some(poc) = poc {
                field_order_cnt_list[i][parity] = *poc;
                used_for_reference |= 1 << (i * 2 + parity);
            }
        }
        ref_frame_list[i] = PicEntry::new(
            pic.surface_index.unwrap_or(PicEntry::NO_INDEX),
            associated,
        );
    }
    params.frame_num_list = frame_num_list;
    params.field_order_cnt_list = field_order_cnt_list;
    params.ref_frame_list = ref_frame_list;
    params.used_for_reference_flags = used_for_reference;
}

/// 在参考帧列表中按 frame_num 查找表面索引, 找不到时为 127
pub fn find_ref_frame_index(frame_num: u32, params: &DxvaPicParamsH264) -> u8 {
    let count = usize::from(params.num_ref_frames).min(REF_FRAME_LIST_LEN);
    let frame_num_list = params.frame_num_list;
    let ref_frame_list = params.ref_frame_list;
    frame_num_list[..count]
        .iter()
        .position(|&num| u32::from(num) == frame_num)
        .map_or(PicEntry::NO_INDEX, |i| ref_frame_list[i].index())
}

/// 填充长格式切片控制记录中的切片头字段与参考列表
///
/// 码流位置, 字节数, 起始宏块和宏块数由切片构建器负责.
pub fn fill_slice_long(
    record: &mut DxvaSliceH264Long,
    params: &DxvaPicParamsH264,
    picture: &PictureState,
    slice: Option<&SliceState>,
) {
    record.ref_pic_list = [[PicEntry::UNUSED; 32]; 2];

    let slice_kind = slice.map_or(picture.slice_kind, |s| s.slice_kind);
    let associated = picture.structure.is_field()
        && picture
            .sei_pic_struct
            .is_some_and(|sei| sei.forces_reference_association());

    if let Some(slice) = slice {
        record.bit_offset_to_slice_data = slice.bit_offset_to_slice_data;
        record.slice_type = slice.slice_type;
        record.luma_log2_weight_denom = slice.luma_log2_weight_denom;
        record.chroma_log2_weight_denom = slice.chroma_log2_weight_denom;
        record.num_ref_idx_l0_active_minus1 = slice.ref_count[0].saturating_sub(1);
        record.num_ref_idx_l1_active_minus1 = slice.ref_count[1].saturating_sub(1);
        record.slice_alpha_c0_offset_div2 = slice.slice_alpha_c0_offset_div2;
        record.slice_beta_offset_div2 = slice.slice_beta_offset_div2;
        record.slice_qs_delta = slice.slice_qs_delta;
        record.slice_qp_delta = slice.slice_qp_delta;
        record.redundant_pic_cnt = slice.redundant_pic_cnt;
        record.direct_spatial_mv_pred_flag = u8::from(slice.direct_spatial_mv_pred_flag);
        record.cabac_init_idc = slice.cabac_init_idc;
        record.disable_deblocking_filter_idc = slice.disable_deblocking_filter_idc;
        record.weights = slice.weights.as_deref().copied().unwrap_or_default();
    }

    let mut ref_pic_list = record.ref_pic_list;
    for (list, entries) in ref_pic_list.iter_mut().enumerate() {
        let used = match list {
            0 => !slice_kind.is_intra(),
            _ => slice_kind.uses_list1(),
        };
        if !used {
            continue;
        }
        let Some(slice) = slice else { continue };
        let count = usize::from(slice.ref_count[list]).min(32);
        for (entry, item) in entries.iter_mut().zip(slice.ref_list[list].iter().take(count)) {
            *entry = PicEntry::new(find_ref_frame_index(item.frame_num, params), associated);
        }
    }
    record.ref_pic_list = ref_pic_list;

    if slice_kind.is_intra() {
        record.num_ref_idx_l0_active_minus1 = 0;
    }
    if !slice_kind.uses_list1() {
        record.num_ref_idx_l1_active_minus1 = 0;
    }
}
