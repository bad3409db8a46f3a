//! DXVA H.264 固定布局结构体.
//!
//! 字段顺序和大小是硬件驱动的二进制约定 (1 字节对齐), 通过 `bytemuck`
//! 以字节视图直接提交给加速器.

use bytemuck::{Pod, Zeroable};

// ============================================================
// 图像项 DXVA_PicEntry_H264
// ============================================================

/// 图像项: 低 7 位为表面索引, 最高位为 AssociatedFlag
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Pod, Zeroable)]
pub struct PicEntry(pub u8);

impl PicEntry {
    /// 无效项 (bPicEntry = 0xFF)
    pub const UNUSED: Self = Self(0xFF);
    /// 空参考项的表面索引
    pub const NO_INDEX: u8 = 127;

    /// 由表面索引和关联标志构造
    pub fn new(index: u8, associated: bool) -> Self {
        Self((index & 0x7F) | (u8::from(associated) << 7))
    }

    /// 表面索引 (Index7Bits)
    pub fn index(&self) -> u8 {
        self.0 & 0x7F
    }

    /// AssociatedFlag
    pub fn associated(&self) -> bool {
        self.0 & 0x80 != 0
    }

    /// 改写表面索引, 保留关联标志
    pub fn set_index(&mut self, index: u8) {
        self.0 = (self.0 & 0x80) | (index & 0x7F);
    }

    /// 改写关联标志, 保留表面索引
    pub fn set_associated(&mut self, associated: bool) {
        self.0 = (self.0 & 0x7F) | (u8::from(associated) << 7);
    }
}

// ============================================================
// 图像参数 DXVA_PicParams_H264
// ============================================================

/// wBitFields 中各字段的 (起始位, 位宽)
pub mod pic_bits {
    pub const FIELD_PIC_FLAG: (u32, u32) = (0, 1);
    pub const MBAFF_FRAME_FLAG: (u32, u32) = (1, 1);
    pub const RESIDUAL_COLOUR_TRANSFORM_FLAG: (u32, u32) = (2, 1);
    pub const SP_FOR_SWITCH_FLAG: (u32, u32) = (3, 1);
    pub const CHROMA_FORMAT_IDC: (u32, u32) = (4, 2);
    pub const REF_PIC_FLAG: (u32, u32) = (6, 1);
    pub const CONSTRAINED_INTRA_PRED_FLAG: (u32, u32) = (7, 1);
    pub const WEIGHTED_PRED_FLAG: (u32, u32) = (8, 1);
    pub const WEIGHTED_BIPRED_IDC: (u32, u32) = (9, 2);
    pub const MBS_CONSECUTIVE_FLAG: (u32, u32) = (11, 1);
    pub const FRAME_MBS_ONLY_FLAG: (u32, u32) = (12, 1);
    pub const TRANSFORM_8X8_MODE_FLAG: (u32, u32) = (13, 1);
    pub const MIN_LUMA_BIPRED_SIZE_8X8_FLAG: (u32, u32) = (14, 1);
    pub const INTRA_PIC_FLAG: (u32, u32) = (15, 1);
}

/// DXVA_PicParams_H264
#[repr(C, packed)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct DxvaPicParamsH264 {
    pub w_frame_width_in_mbs_minus1: u16,
    pub w_frame_height_in_mbs_minus1: u16,
    pub curr_pic: PicEntry,
    pub num_ref_frames: u8,
    pub w_bit_fields: u16,
    pub bit_depth_luma_minus8: u8,
    pub bit_depth_chroma_minus8: u8,
    pub reserved16_bits: u16,
    pub status_report_feedback_number: u32,
    pub ref_frame_list: [PicEntry; 16],
    pub curr_field_order_cnt: [i32; 2],
    pub field_order_cnt_list: [[i32; 2]; 16],
    pub pic_init_qs_minus26: i8,
    pub chroma_qp_index_offset: i8,
    pub second_chroma_qp_index_offset: i8,
    pub continuation_flag: u8,
    pub pic_init_qp_minus26: i8,
    pub num_ref_idx_l0_active_minus1: u8,
    pub num_ref_idx_l1_active_minus1: u8,
    pub reserved8_bits_a: u8,
    pub frame_num_list: [u16; 16],
    pub used_for_reference_flags: u32,
    pub non_existing_frame_flags: u16,
    pub frame_num: u16,
    pub log2_max_frame_num_minus4: u8,
    pub pic_order_cnt_type: u8,
    pub log2_max_pic_order_cnt_lsb_minus4: u8,
    pub delta_pic_order_always_zero_flag: u8,
    pub direct_8x8_inference_flag: u8,
    pub entropy_coding_mode_flag: u8,
    pub pic_order_present_flag: u8,
    pub num_slice_groups_minus1: u8,
    pub slice_group_map_type: u8,
    pub deblocking_filter_control_present_flag: u8,
    pub redundant_pic_cnt_present_flag: u8,
    pub reserved8_bits_b: u8,
    pub slice_group_change_rate_minus1: u16,
    pub slice_group_map: [u8; 810],
}

impl DxvaPicParamsH264 {
    /// 写入 wBitFields 中的一个字段
    pub fn set_bits(&mut self, (shift, width): (u32, u32), value: u16) {
        let mask = ((1u16 << width) - 1) << shift;
        let fields = self.w_bit_fields;
        self.w_bit_fields = (fields & !mask) | ((value << shift) & mask);
    }

    /// 写入 wBitFields 中的一个布尔字段
    pub fn set_flag(&mut self, field: (u32, u32), value: bool) {
        self.set_bits(field, u16::from(value));
    }

    /// 读取 wBitFields 中的一个字段
    pub fn bits(&self, (shift, width): (u32, u32)) -> u16 {
        let fields = self.w_bit_fields;
        (fields >> shift) & ((1u16 << width) - 1)
    }

    /// 读取 wBitFields 中的一个布尔字段
    pub fn flag(&self, field: (u32, u32)) -> bool {
        self.bits(field) != 0
    }
}

// ============================================================
// 缩放矩阵 DXVA_Qmatrix_H264
// ============================================================

/// DXVA_Qmatrix_H264
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct DxvaQmatrixH264 {
    pub scaling_lists_4x4: [[u8; 16]; 6],
    pub scaling_lists_8x8: [[u8; 64]; 2],
}

// ============================================================
// 切片控制 DXVA_Slice_H264_Short / DXVA_Slice_H264_Long
// ============================================================

/// DXVA_Slice_H264_Short
#[repr(C, packed)]
#[derive(Clone, Copy, Default, Pod, Zeroable)]
pub struct DxvaSliceH264Short {
    pub bs_nal_unit_data_location: u32,
    pub slice_bytes_in_buffer: u32,
    pub w_bad_slice_chopping: u16,
}

/// DXVA_Slice_H264_Long
#[repr(C, packed)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct DxvaSliceH264Long {
    pub bs_nal_unit_data_location: u32,
    pub slice_bytes_in_buffer: u32,
    pub w_bad_slice_chopping: u16,
    pub first_mb_in_slice: u16,
    pub num_mbs_for_slice: u16,
    pub bit_offset_to_slice_data: u16,
    pub slice_type: u8,
    pub luma_log2_weight_denom: u8,
    pub chroma_log2_weight_denom: u8,
    pub num_ref_idx_l0_active_minus1: u8,
    pub num_ref_idx_l1_active_minus1: u8,
    pub slice_alpha_c0_offset_div2: i8,
    pub slice_beta_offset_div2: i8,
    pub reserved8_bits: u8,
    pub ref_pic_list: [[PicEntry; 32]; 2],
    pub weights: [[[[i16; 2]; 3]; 32]; 2],
    pub slice_qs_delta: i8,
    pub slice_qp_delta: i8,
    pub redundant_pic_cnt: u8,
    pub direct_spatial_mv_pred_flag: u8,
    pub cabac_init_idc: u8,
    pub disable_deblocking_filter_idc: u8,
    pub slice_id: u16,
}

// ============================================================
// 缓冲区描述与解码器配置
// ============================================================

/// DXVA_BufferDescription
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Pod, Zeroable)]
pub struct DxvaBufferDescription {
    pub dw_type_index: u32,
    pub dw_buffer_index: u32,
    pub dw_data_offset: u32,
    pub dw_data_size: u32,
    pub dw_first_mb_address: u32,
    pub dw_num_mbs_in_buffer: u32,
    pub dw_width: u32,
    pub dw_height: u32,
    pub dw_stride: u32,
    pub dw_reserved_bits: u32,
}

/// AMVABUFFERINFO
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Pod, Zeroable)]
pub struct AmvaBufferInfo {
    pub dw_type_index: u32,
    pub dw_buffer_index: u32,
    pub dw_data_offset: u32,
    pub dw_data_size: u32,
}

/// DXVA_NoEncrypt {1b81beD0-a0c7-11d3-b984-00c04f2e73c5}, GUID 内存布局
pub const DXVA_NO_ENCRYPT: [u8; 16] = [
    0xD0, 0xBE, 0x81, 0x1B, 0xC7, 0xA0, 0xD3, 0x11, 0xB9, 0x84, 0x00, 0xC0, 0x4F, 0x2E, 0x73,
    0xC5,
];

/// DXVA_ConfigPictureDecode
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct DxvaConfigPictureDecode {
    pub dw_function: u32,
    pub dw_reserved_bits: [u32; 3],
    pub guid_config_bitstream_encryption: [u8; 16],
    pub guid_config_mb_control_encryption: [u8; 16],
    pub guid_config_resid_diff_encryption: [u8; 16],
    pub b_config_bitstream_raw: u8,
    pub b_config_mb_control_raster_order: u8,
    pub b_config_resid_diff_host: u8,
    pub b_config_spatial_resid8: u8,
    pub b_config_resid8_subtraction: u8,
    pub b_config_spatial_host8or9_clipping: u8,
    pub b_config_spatial_resid_interleaved: u8,
    pub b_config_intra_resid_unsigned: u8,
    pub b_config_resid_diff_accelerator: u8,
    pub b_config_host_inverse_scan: u8,
    pub b_config_specific_idct: u8,
    pub b_config_4_group_coeffs: u8,
}

impl DxvaConfigPictureDecode {
    /// 请求的配置: 不加密, 原始码流 (bConfigBitstreamRaw = 2)
    pub fn requested() -> Self {
        Self {
            guid_config_bitstream_encryption: DXVA_NO_ENCRYPT,
            guid_config_mb_control_encryption: DXVA_NO_ENCRYPT,
            guid_config_resid_diff_encryption: DXVA_NO_ENCRYPT,
            b_config_bitstream_raw: 2,
            ..Self::zeroed()
        }
    }
}

const _: () = assert!(std::mem::size_of::<PicEntry>() == 1);
const _: () = assert!(std::mem::size_of::<DxvaPicParamsH264>() == 1040);
const _: () = assert!(std::mem::size_of::<DxvaQmatrixH264>() == 224);
const _: () = assert!(std::mem::size_of::<DxvaSliceH264Short>() == 10);
const _: () = assert!(std::mem::size_of::<DxvaSliceH264Long>() == 864);
const _: () = assert!(std::mem::size_of::<DxvaBufferDescription>() == 40);
const _: () = assert!(std::mem::size_of::<AmvaBufferInfo>() == 16);
const _: () = assert!(std::mem::size_of::<DxvaConfigPictureDecode>() == 76);
