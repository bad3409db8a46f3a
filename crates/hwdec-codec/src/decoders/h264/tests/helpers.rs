use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use hwdec_core::{AccelError, AccelResult, NOPTS_VALUE, ReferenceTime};

use crate::access_unit::AccessUnit;
use crate::frame::{FieldType, MediaSample, SampleHandle};
use crate::parsers::h264::{
    BitstreamParser, ParseReport, PictureParamState, PictureState, RefListEntry, RefPicture,
    SeiPicStruct, SequenceState, SliceKind, SliceState,
};

use super::super::accelerator::{
    DECODE_FUNCTION, LOCK_QUERY_FLAGS, PICTURE_DECODING_FUNCTION, PROBE_QUERY_FLAGS,
    VideoAccelerator, query_or_reply_function,
};
use super::super::structs::AmvaBufferInfo;
use super::super::{DxvaH264Decoder, DxvaOptions, GpuVendor, RetryPolicy};

// ============================================================
// 码流构造
// ============================================================

pub const NAL_IDR: u8 = 0x65;
pub const NAL_SLICE_REF: u8 = 0x41;
pub const NAL_SLICE_NONREF: u8 = 0x01;
pub const NAL_SPS: u8 = 0x67;

fn push_ue(bits: &mut Vec<bool>, value: u32) {
    let x = value + 1;
    let len = 32 - x.leading_zeros();
    bits.extend(std::iter::repeat_n(false, (len - 1) as usize));
    for i in (0..len).rev() {
        bits.push((x >> i) & 1 == 1);
    }
}

/// 构造一个切片 NAL (不含起始码): first_mb_in_slice, slice_type 后跟填充数据
pub fn slice_nal(header: u8, first_mb: u32) -> Vec<u8> {
    let mut bits = Vec::new();
    push_ue(&mut bits, first_mb);
    push_ue(&mut bits, 0);
    bits.push(true);
    let mut out = vec![header];
    for chunk in bits.chunks(8) {
        let mut byte = 0u8;
        for (i, bit) in chunk.iter().enumerate() {
            if *bit {
                byte |= 0x80 >> i;
            }
        }
        out.push(byte);
    }
    out.extend_from_slice(&[0x5A, 0xA5, 0x3C]);
    out
}

/// 用 4 字节起始码拼接 Annex B 访问单元
pub fn annexb(nals: &[Vec<u8>]) -> Vec<u8> {
    let mut out = Vec::new();
    for nal in nals {
        out.extend_from_slice(&[0, 0, 0, 1]);
        out.extend_from_slice(nal);
    }
    out
}

/// 单切片访问单元
pub fn single_slice_au(header: u8) -> Vec<u8> {
    annexb(&[slice_nal(header, 0)])
}

// ============================================================
// 假加速器
// ============================================================

/// 加速器调用记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccelCall {
    BeginFrame(u8),
    QueryRenderStatus,
    EndFrame(u8),
    GetBuffer(u32, u32),
    ReleaseBuffer(u32, u32),
    Execute(u32),
    Display(u8),
}

/// 一次解码 execute 提交的缓冲区内容
#[derive(Debug, Clone)]
pub struct ExecutedBuffers {
    pub infos: Vec<AmvaBufferInfo>,
    pub data: HashMap<u32, Vec<u8>>,
}

/// 假加速器的共享状态
#[derive(Debug, Default)]
pub struct AccelState {
    pub calls: Vec<AccelCall>,
    /// 解码 execute 在成功前返回忙的次数
    pub busy_execute: u32,
    /// begin_frame 在成功前返回忙的次数
    pub busy_begin: u32,
    /// 解码 execute 返回的硬错误
    pub fail_execute: Option<u32>,
    /// display_frame 返回的硬错误
    pub fail_display: Option<u32>,
    /// 配置握手失败
    pub fail_probe: bool,
    /// 探测应答中的 bConfigBitstreamRaw
    pub bitstream_raw: u8,
    pub executed: Vec<ExecutedBuffers>,
    pub displayed: Vec<u8>,
}

impl AccelState {
    pub fn count(&self, call: &AccelCall) -> usize {
        self.calls.iter().filter(|c| *c == call).count()
    }
}

pub type SharedAccelState = Arc<Mutex<AccelState>>;

pub struct FakeAccelerator {
    state: SharedAccelState,
    buffers: HashMap<u32, Vec<u8>>,
    buffer_size: usize,
}

impl FakeAccelerator {
    pub fn new(bitstream_raw: u8) -> (Self, SharedAccelState) {
        let state = Arc::new(Mutex::new(AccelState {
            bitstream_raw,
            ..AccelState::default()
        }));
        (
            Self {
                state: Arc::clone(&state),
                buffers: HashMap::new(),
                buffer_size: 64 * 1024,
            },
            state,
        )
    }

    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    fn log(&self, call: AccelCall) {
        self.state.lock().unwrap().calls.push(call);
    }
}

impl VideoAccelerator for FakeAccelerator {
    fn begin_frame(&mut self, surface: u8) -> AccelResult<()> {
        self.log(AccelCall::BeginFrame(surface));
        let mut state = self.state.lock().unwrap();
        if state.busy_begin > 0 {
            state.busy_begin -= 1;
            return Err(AccelError::Pending);
        }
        Ok(())
    }

    fn query_render_status(&mut self) -> AccelResult<()> {
        self.log(AccelCall::QueryRenderStatus);
        Ok(())
    }

    fn end_frame(&mut self, surface: u8) -> AccelResult<()> {
        self.log(AccelCall::EndFrame(surface));
        Ok(())
    }

    fn get_buffer(&mut self, type_index: u32, buffer_index: u32) -> AccelResult<()> {
        self.log(AccelCall::GetBuffer(type_index, buffer_index));
        let size = self.buffer_size;
        let buffer = self.buffers.entry(type_index).or_default();
        buffer.clear();
        buffer.resize(size, 0xEE);
        Ok(())
    }

    fn buffer_mut(&mut self, type_index: u32, _buffer_index: u32) -> AccelResult<&mut [u8]> {
        self.buffers
            .get_mut(&type_index)
            .map(Vec::as_mut_slice)
            .ok_or(AccelError::Failed(0x8007_0057))
    }

    fn release_buffer(&mut self, type_index: u32, buffer_index: u32) -> AccelResult<()> {
        self.log(AccelCall::ReleaseBuffer(type_index, buffer_index));
        Ok(())
    }

    fn execute(
        &mut self,
        function: u32,
        input: &[u8],
        output: &mut [u8],
        buffers: &[AmvaBufferInfo],
    ) -> AccelResult<()> {
        self.log(AccelCall::Execute(function));
        let mut state = self.state.lock().unwrap();

        if function == query_or_reply_function(PROBE_QUERY_FLAGS, PICTURE_DECODING_FUNCTION) {
            if state.fail_probe {
                return Err(AccelError::Failed(0x8000_4005));
            }
            output.copy_from_slice(input);
            output[64] = state.bitstream_raw;
            return Ok(());
        }
        if function == query_or_reply_function(LOCK_QUERY_FLAGS, PICTURE_DECODING_FUNCTION) {
            output.copy_from_slice(input);
            return Ok(());
        }

        assert_eq!(function, DECODE_FUNCTION, "未知的功能码");
        if state.busy_execute > 0 {
            state.busy_execute -= 1;
            return Err(AccelError::Pending);
        }
        if let Some(code) = state.fail_execute {
            return Err(AccelError::Failed(code));
        }
        assert_eq!(output.len(), 4, "解码 execute 的输出应为 4 字节");
        assert_eq!(input.len(), buffers.len() * 40, "缓冲区描述数量应与缓冲区信息一致");

        let data = buffers
            .iter()
            .map(|info| {
                let bytes = self.buffers.get(&info.dw_type_index).cloned().unwrap_or_default();
                let size = (info.dw_data_size as usize).min(bytes.len());
                (info.dw_type_index, bytes[..size].to_vec())
            })
            .collect();
        state.executed.push(ExecutedBuffers {
            infos: buffers.to_vec(),
            data,
        });
        Ok(())
    }

    fn display_frame(&mut self, surface: u8, _sample: &SampleHandle) -> AccelResult<()> {
        self.log(AccelCall::Display(surface));
        let mut state = self.state.lock().unwrap();
        state.displayed.push(surface);
        match state.fail_display {
            Some(code) => Err(AccelError::Failed(code)),
            None => Ok(()),
        }
    }
}

// ============================================================
// 假码流解析器
// ============================================================

/// 脚本中的一幅图像
#[derive(Debug, Clone)]
pub struct ScriptedPicture {
    pub slice_kind: SliceKind,
    pub frame_num: u16,
    pub poc: i32,
    pub is_reference: bool,
    pub structure: FieldType,
    pub sei_pic_struct: Option<SeiPicStruct>,
    pub output_key: Option<i32>,
    pub output_start: ReferenceTime,
    pub slices: Vec<SliceState>,
}

impl ScriptedPicture {
    pub fn frame(slice_kind: SliceKind, frame_num: u16, poc: i32, is_reference: bool) -> Self {
        Self {
            slice_kind,
            frame_num,
            poc,
            is_reference,
            structure: FieldType::Frame,
            sei_pic_struct: None,
            output_key: None,
            output_start: NOPTS_VALUE,
            slices: Vec::new(),
        }
    }

    pub fn field(
        structure: FieldType,
        slice_kind: SliceKind,
        frame_num: u16,
        poc: i32,
    ) -> Self {
        Self {
            structure,
            ..Self::frame(slice_kind, frame_num, poc, true)
        }
    }

    pub fn outputs(mut self, key: i32) -> Self {
        self.output_key = Some(key);
        self
    }
}

pub fn test_sequence() -> SequenceState {
    SequenceState {
        mb_width: 2,
        mb_height: 2,
        frame_mbs_only_flag: true,
        chroma_format_idc: 1,
        bit_depth_luma: 8,
        bit_depth_chroma: 8,
        ref_frame_count: 4,
        log2_max_frame_num: 4,
        log2_max_poc_lsb: 6,
        direct_8x8_inference_flag: true,
        level_idc: 40,
        ..SequenceState::default()
    }
}

pub fn interlaced_sequence() -> SequenceState {
    SequenceState {
        frame_mbs_only_flag: false,
        mb_height: 1,
        ..test_sequence()
    }
}

/// 按脚本逐个访问单元给出图像状态的解析器
///
/// 参考集合按滑动窗口维护: 参考图像在写回表面索引时加入短期参考最前面.
pub struct FakeParser {
    pub sps: Option<SequenceState>,
    pub pps: Option<PictureParamState>,
    script: VecDeque<ScriptedPicture>,
    picture: PictureState,
    slices: Vec<SliceState>,
    short_refs: Vec<RefPicture>,
    long_refs: Vec<RefPicture>,
    flushes: Arc<AtomicU32>,
}

impl FakeParser {
    pub fn new(script: Vec<ScriptedPicture>) -> Self {
        Self::with_sequence(test_sequence(), script)
    }

    pub fn with_sequence(sps: SequenceState, script: Vec<ScriptedPicture>) -> Self {
        Self {
            sps: Some(sps),
            pps: Some(PictureParamState::default()),
            script: script.into(),
            picture: PictureState::default(),
            slices: Vec::new(),
            short_refs: Vec::new(),
            long_refs: Vec::new(),
            flushes: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn without_parameter_sets(script: Vec<ScriptedPicture>) -> Self {
        Self {
            sps: None,
            pps: None,
            ..Self::new(script)
        }
    }

    pub fn with_long_term(mut self, refs: Vec<RefPicture>) -> Self {
        self.long_refs = refs;
        self
    }

    pub fn flush_counter(&self) -> Arc<AtomicU32> {
        Arc::clone(&self.flushes)
    }

    fn max_refs(&self) -> usize {
        self.sps
            .as_ref()
            .map_or(1, |sps| usize::from(sps.ref_frame_count.max(1)))
    }
}

impl BitstreamParser for FakeParser {
    fn parse_access_unit(
        &mut self,
        _data: &[u8],
        _start: ReferenceTime,
        _stop: ReferenceTime,
    ) -> ParseReport {
        let Some(next) = self.script.pop_front() else {
            return ParseReport::default();
        };
        self.picture = PictureState {
            structure: next.structure,
            slice_kind: next.slice_kind,
            frame_num: next.frame_num,
            ref_pic_flag: next.is_reference,
            sp_for_switch_flag: false,
            poc: next.poc,
            sei_pic_struct: next.sei_pic_struct,
        };
        self.slices = next.slices;
        ParseReport {
            current_key: Some(next.poc),
            output_key: next.output_key,
            output_start: next.output_start,
        }
    }

    fn sequence(&self) -> Option<&SequenceState> {
        self.sps.as_ref()
    }

    fn picture_params(&self) -> Option<&PictureParamState> {
        self.pps.as_ref()
    }

    fn picture(&self) -> &PictureState {
        &self.picture
    }

    fn slice(&self, index: usize) -> Option<&SliceState> {
        self.slices.get(index)
    }

    fn short_term_refs(&self) -> &[RefPicture] {
        &self.short_refs
    }

    fn long_term_refs(&self) -> &[RefPicture] {
        &self.long_refs
    }

    fn set_current_surface(&mut self, surface: u8) {
        if !self.picture.ref_pic_flag {
            return;
        }
        let frame_num = u32::from(self.picture.frame_num);
        let parity = match self.picture.structure {
            FieldType::Bottom => Some(1),
            FieldType::Top => Some(0),
            FieldType::Frame => None,
        };

        // 次场: 同一 frame_num 的首场已在最前面
        let first_field = self
            .short_refs
            .first_mut()
            .filter(|first| first.frame_num == frame_num && first.surface_index == Some(surface));
        if let (Some(parity), Some(first)) = (parity, first_field) {
            first.field_poc[parity] = Some(self.picture.poc);
            return;
        }

        let mut field_poc = [None, None];
        match parity {
            Some(parity) => field_poc[parity] = Some(self.picture.poc),
            None => field_poc = [Some(self.picture.poc), Some(self.picture.poc)],
        }
        self.short_refs.insert(
            0,
            RefPicture {
                frame_num,
                pic_id: frame_num,
                long_term: false,
                field_poc,
                surface_index: Some(surface),
            },
        );
        let max = self.max_refs();
        self.short_refs.truncate(max);
    }

    fn flush(&mut self) {
        self.short_refs.clear();
        self.long_refs.clear();
        self.flushes.fetch_add(1, Ordering::SeqCst);
    }
}

/// 参考列表 0 引用给定 frame_num 的切片
pub fn p_slice_referencing(frame_nums: &[u32]) -> SliceState {
    SliceState {
        slice_type: 0,
        slice_kind: SliceKind::P,
        ref_count: [frame_nums.len() as u8, 0],
        ref_list: [
            frame_nums
                .iter()
                .map(|&frame_num| RefListEntry { frame_num })
                .collect(),
            Vec::new(),
        ],
        ..SliceState::default()
    }
}

// ============================================================
// 样本
// ============================================================

#[derive(Debug, Default)]
pub struct RecordingSample {
    pub times: Mutex<Vec<(ReferenceTime, ReferenceTime)>>,
    pub flags: AtomicU32,
}

impl MediaSample for RecordingSample {
    fn set_time(&self, start: ReferenceTime, stop: ReferenceTime) {
        self.times.lock().unwrap().push((start, stop));
    }

    fn type_specific_flags(&self) -> u32 {
        self.flags.load(Ordering::SeqCst)
    }

    fn set_type_specific_flags(&self, flags: u32) {
        self.flags.store(flags, Ordering::SeqCst);
    }
}

pub fn recording_sample() -> (Arc<RecordingSample>, SampleHandle) {
    let sample = Arc::new(RecordingSample::default());
    let handle: SampleHandle = sample.clone();
    (sample, handle)
}

// ============================================================
// 解码器
// ============================================================

pub fn fast_options() -> DxvaOptions {
    DxvaOptions {
        vendor: Some(GpuVendor::Nvidia),
        retry: RetryPolicy {
            round_sleep: std::time::Duration::ZERO,
            ..RetryPolicy::default()
        },
        ..DxvaOptions::default()
    }
}

pub fn build_decoder(
    script: Vec<ScriptedPicture>,
    bitstream_raw: u8,
) -> (DxvaH264Decoder, SharedAccelState) {
    let (accel, state) = FakeAccelerator::new(bitstream_raw);
    let dec = DxvaH264Decoder::open(
        Box::new(accel),
        Box::new(FakeParser::new(script)),
        fast_options(),
    )
    .expect("打开 DXVA 解码器失败");
    (dec, state)
}

pub fn timed_unit(data: Vec<u8>, start: ReferenceTime) -> AccessUnit {
    AccessUnit::from_data(data).with_time(start, NOPTS_VALUE)
}
