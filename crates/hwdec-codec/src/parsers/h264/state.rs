//! 外部码流解析器的类型化状态接口.
//!
//! 硬件管线不自己解析 SPS/PPS/切片头, 而是读取上游码流解析器维护的状态.
//! 这里把需要的字段整理成普通结构体, 由 [`BitstreamParser`] 按需提供.

use hwdec_core::ReferenceTime;

use crate::frame::FieldType;

use super::slice::SliceKind;

/// SEI pic_timing 中的 pic_struct
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeiPicStruct {
    /// 逐行帧
    Frame,
    /// 顶场
    TopField,
    /// 底场
    BottomField,
    /// 顶场, 底场
    TopBottom,
    /// 底场, 顶场
    BottomTop,
    /// 顶场, 底场, 顶场重复
    TopBottomTop,
    /// 底场, 顶场, 底场重复
    BottomTopBottom,
    /// 帧重复一次
    FrameDoubling,
    /// 帧重复两次
    FrameTripling,
}

impl SeiPicStruct {
    /// 从 pic_struct 数值转换
    pub fn from_value(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Frame),
            1 => Some(Self::TopField),
            2 => Some(Self::BottomField),
            3 => Some(Self::TopBottom),
            4 => Some(Self::BottomTop),
            5 => Some(Self::TopBottomTop),
            6 => Some(Self::BottomTopBottom),
            7 => Some(Self::FrameDoubling),
            8 => Some(Self::FrameTripling),
            _ => None,
        }
    }

    /// 按 SEI 语义得到的场类型
    pub fn field_type(&self) -> FieldType {
        match self {
            Self::TopField | Self::TopBottom | Self::TopBottomTop => FieldType::Top,
            Self::BottomField | Self::BottomTop | Self::BottomTopBottom => FieldType::Bottom,
            Self::Frame | Self::FrameDoubling | Self::FrameTripling => FieldType::Frame,
        }
    }

    /// 场图像的参考项是否需要置 AssociatedFlag
    ///
    /// 只认 BottomField, TopBottom, TopBottomTop 三种取值.
    pub fn forces_reference_association(&self) -> bool {
        matches!(
            self,
            Self::BottomField | Self::TopBottom | Self::TopBottomTop
        )
    }
}

/// 活动 SPS 中管线需要的字段
#[derive(Debug, Clone, Default)]
pub struct SequenceState {
    /// 以宏块为单位的宽度
    pub mb_width: u32,
    /// 以宏块为单位的高度 (场编码时为每场高度)
    pub mb_height: u32,
    pub frame_mbs_only_flag: bool,
    /// mb_adaptive_frame_field_flag
    pub mb_aff: bool,
    pub chroma_format_idc: u8,
    pub residual_color_transform_flag: bool,
    pub bit_depth_luma: u8,
    pub bit_depth_chroma: u8,
    /// max_num_ref_frames
    pub ref_frame_count: u8,
    pub log2_max_frame_num: u8,
    pub poc_type: u8,
    pub log2_max_poc_lsb: u8,
    pub delta_pic_order_always_zero_flag: bool,
    pub direct_8x8_inference_flag: bool,
    pub level_idc: u8,
    /// VUI 中的 pic_struct_present_flag, 决定 SEI pic_struct 是否生效
    pub pic_struct_present_flag: bool,
}

impl SequenceState {
    /// 一帧的宏块总数
    pub fn frame_mb_count(&self) -> u32 {
        let height = self.mb_height * if self.frame_mbs_only_flag { 1 } else { 2 };
        self.mb_width * height
    }
}

/// 活动 PPS 中管线需要的字段
#[derive(Debug, Clone)]
pub struct PictureParamState {
    /// entropy_coding_mode_flag
    pub cabac: bool,
    pub pic_order_present: bool,
    /// num_slice_groups_minus1 + 1
    pub slice_group_count: u8,
    pub mb_slice_group_map_type: u8,
    pub slice_group_change_rate_minus1: u16,
    pub deblocking_filter_parameters_present: bool,
    pub redundant_pic_cnt_present: bool,
    pub transform_8x8_mode: bool,
    pub constrained_intra_pred: bool,
    pub weighted_pred: bool,
    pub weighted_bipred_idc: u8,
    pub init_qp: i32,
    pub init_qs: i32,
    pub chroma_qp_index_offset: [i8; 2],
    /// num_ref_idx_l0/l1_default_active
    pub ref_count: [u8; 2],
    /// 4x4 缩放表 (解析器原生系数顺序)
    pub scaling_matrix4: [[u8; 16]; 6],
    /// 8x8 缩放表 (解析器原生系数顺序)
    pub scaling_matrix8: [[u8; 64]; 2],
}

impl Default for PictureParamState {
    fn default() -> Self {
        Self {
            cabac: false,
            pic_order_present: false,
            slice_group_count: 1,
            mb_slice_group_map_type: 0,
            slice_group_change_rate_minus1: 0,
            deblocking_filter_parameters_present: false,
            redundant_pic_cnt_present: false,
            transform_8x8_mode: false,
            constrained_intra_pred: false,
            weighted_pred: false,
            weighted_bipred_idc: 0,
            init_qp: 26,
            init_qs: 26,
            chroma_qp_index_offset: [0; 2],
            ref_count: [1, 1],
            scaling_matrix4: [[16; 16]; 6],
            scaling_matrix8: [[16; 64]; 2],
        }
    }
}

/// 当前正在解码的图像
#[derive(Debug, Clone, Default)]
pub struct PictureState {
    /// 原始图像结构 (field_pic_flag / bottom_field_flag)
    pub structure: FieldType,
    /// 最后一个切片的类型
    pub slice_kind: SliceKind,
    pub frame_num: u16,
    /// nal_ref_idc != 0
    pub ref_pic_flag: bool,
    pub sp_for_switch_flag: bool,
    /// pic_order_cnt_lsb + pic_order_cnt_msb
    pub poc: i32,
    /// SEI pic_timing 中的 pic_struct
    pub sei_pic_struct: Option<SeiPicStruct>,
}

/// 切片参考列表中的一项
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefListEntry {
    /// 被引用图像的 frame_num
    pub frame_num: u32,
}

/// 单个切片的切片头字段 (长格式切片控制需要)
#[derive(Debug, Clone, Default)]
pub struct SliceState {
    pub first_mb_in_slice: u32,
    /// 原始 slice_type (0-9)
    pub slice_type: u8,
    pub slice_kind: SliceKind,
    /// 切片数据 (slice_data) 相对 NAL 头部之后的位偏移
    pub bit_offset_to_slice_data: u16,
    pub luma_log2_weight_denom: u8,
    pub chroma_log2_weight_denom: u8,
    /// num_ref_idx_l0/l1_active
    pub ref_count: [u8; 2],
    pub slice_alpha_c0_offset_div2: i8,
    pub slice_beta_offset_div2: i8,
    pub slice_qs_delta: i8,
    pub slice_qp_delta: i8,
    pub redundant_pic_cnt: u8,
    pub direct_spatial_mv_pred_flag: bool,
    pub cabac_init_idc: u8,
    pub disable_deblocking_filter_idc: u8,
    /// 加权预测表: [list][ref][Y/Cb/Cr][weight/offset]
    pub weights: Option<Box<[[[[i16; 2]; 3]; 32]; 2]>>,
    /// 参考列表 0/1
    pub ref_list: [Vec<RefListEntry>; 2],
}

/// 解码器参考集合中的一幅图像
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefPicture {
    pub frame_num: u32,
    /// 长期参考的 LongTermPicNum
    pub pic_id: u32,
    pub long_term: bool,
    /// 顶场/底场 POC, 该场不作参考时为 None
    pub field_poc: [Option<i32>; 2],
    /// 解码这幅图像时使用的表面索引
    pub surface_index: Option<u8>,
}

/// 对一个访问单元预解析后上报的信息
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseReport {
    /// 当前图像的输出顺序标识 (顶场 POC)
    pub current_key: Option<i32>,
    /// 解码器此刻要求输出的图像标识
    pub output_key: Option<i32>,
    /// 要求输出图像的开始时间 (可能为 NOPTS_VALUE)
    pub output_start: ReferenceTime,
}

impl Default for ParseReport {
    fn default() -> Self {
        Self {
            current_key: None,
            output_key: None,
            output_start: hwdec_core::NOPTS_VALUE,
        }
    }
}

/// 外部码流解析器
///
/// 解析器负责维护参数集, 切片头和参考图像集合. 硬件管线只通过这个接口读取,
/// 唯一的写入是 [`BitstreamParser::set_current_surface`].
pub trait BitstreamParser: Send {
    /// 预解析一个访问单元, 更新内部状态
    fn parse_access_unit(
        &mut self,
        data: &[u8],
        start: ReferenceTime,
        stop: ReferenceTime,
    ) -> ParseReport;

    /// 活动 SPS, 尚未收到时为 None
    fn sequence(&self) -> Option<&SequenceState>;

    /// 活动 PPS, 尚未收到时为 None
    fn picture_params(&self) -> Option<&PictureParamState>;

    /// 当前图像
    fn picture(&self) -> &PictureState;

    /// 当前访问单元第 `index` 个切片的切片头
    fn slice(&self, index: usize) -> Option<&SliceState>;

    /// 短期参考图像, 最近解码的在前
    fn short_term_refs(&self) -> &[RefPicture];

    /// 长期参考图像
    fn long_term_refs(&self) -> &[RefPicture];

    /// 把当前图像使用的表面索引写回解析器
    fn set_current_surface(&mut self, surface: u8);

    /// 清空参考状态, 保留参数集
    fn flush(&mut self);

    /// 表面是否仍被某个参考图像占用
    fn is_reference_in_use(&self, surface: u8) -> bool {
        self.short_term_refs()
            .iter()
            .chain(self.long_term_refs())
            .any(|pic| pic.surface_index == Some(surface))
    }
}
