//! DXVA H.264 硬件解码器.
//!
//! 每个访问单元的处理顺序:
//! 1. 预解析, 把解析器状态翻译成图像参数
//! 2. 分配表面, begin_frame
//! 3. 提交图像参数并 execute
//! 4. 提交码流, 切片控制, 缩放矩阵并 execute, end_frame
//! 5. 更新 DPB 与参考帧列表, 选出下一幅显示的图像

use std::sync::Arc;

use bytemuck::Zeroable;
use log::{debug, error, warn};

use hwdec_core::timestamp::{display, normalize_stop};
use hwdec_core::{AccelError, AccelResult, HwDecError, HwDecResult};

use super::DxvaOptions;
use super::accelerator::{
    BufferType, ExecBuffers, LOCK_QUERY_FLAGS, PICTURE_DECODING_FUNCTION, PROBE_QUERY_FLAGS,
    VideoAccelerator, query_or_reply_function,
};
use super::reorder::OutputReorder;
use super::scaling::{GpuVendor, HardwareEnv, ScanOrder, build_scaling_matrix};
use super::sequencer::begin_frame;
use super::slice_builder::{self, SliceBuildError, SliceLayout};
use super::structs::{DxvaConfigPictureDecode, DxvaPicParamsH264, DxvaQmatrixH264, PicEntry};
use super::surface_pool::{PictureSubmission, SurfacePool};
use super::translate::{
    FrameInfo, build_frame_params, fill_slice_long, init_pic_params, set_current_pic,
    update_ref_frame_list,
};
use crate::access_unit::AccessUnit;
use crate::decoder::{DecodeOutcome, DecodeStatus, Decoder, SkipReason};
use crate::frame::{DisplayPicture, SampleHandle, TypeSpecificFlags};
use crate::parsers::h264::BitstreamParser;

/// 表面池耗尽告警的间隔
const EXHAUSTED_WARN_INTERVAL: u64 = 100;

/// 原始码流模式下使用短格式切片控制
const BITSTREAM_RAW_SHORT: u8 = 2;

/// 切片控制记录格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SliceForm {
    /// 只含码流位置
    Short,
    /// 含切片头字段与参考列表
    Long,
}

/// DXVA H.264 硬件解码器
pub struct DxvaH264Decoder {
    accel: Box<dyn VideoAccelerator>,
    parser: Box<dyn BitstreamParser>,
    options: DxvaOptions,
    vendor: GpuVendor,
    scan_order: ScanOrder,
    slice_form: SliceForm,
    pic_params: Box<DxvaPicParamsH264>,
    pool: SurfacePool,
    reorder: OutputReorder,
    exec: ExecBuffers,
    exhausted_count: u64,
}

impl DxvaH264Decoder {
    /// 完成加速器配置握手并创建解码器
    pub fn open(
        mut accel: Box<dyn VideoAccelerator>,
        parser: Box<dyn BitstreamParser>,
        options: DxvaOptions,
    ) -> HwDecResult<Self> {
        if options.surface_count == 0 || options.surface_count > usize::from(PicEntry::NO_INDEX) {
            return Err(HwDecError::InvalidArgument(format!(
                "H.264: 表面数量必须在 1..={} 之间, 实际 {}",
                PicEntry::NO_INDEX,
                options.surface_count
            )));
        }
        if options.max_slices == 0 {
            return Err(HwDecError::InvalidArgument(
                "H.264: 切片容量不能为 0".into(),
            ));
        }

        let config = negotiate_config(accel.as_mut()).map_err(|e| {
            error!("H.264: 加速器配置握手失败, {e}");
            HwDecError::Accelerator(e)
        })?;
        let bitstream_raw = config.b_config_bitstream_raw;
        let slice_form = if bitstream_raw != BITSTREAM_RAW_SHORT {
            SliceForm::Long
        } else {
            SliceForm::Short
        };

        let vendor = options.vendor.unwrap_or(HardwareEnv::current().vendor);
        let scan_order = vendor.scan_order();
        debug!(
            "H.264: DXVA 解码器已打开, surfaces={}, vendor={vendor:?}, bitstream_raw={bitstream_raw}, slice_form={slice_form:?}",
            options.surface_count
        );

        Ok(Self {
            accel,
            parser,
            vendor,
            scan_order,
            slice_form,
            pic_params: init_pic_params(vendor),
            pool: SurfacePool::new(options.surface_count),
            reorder: OutputReorder::new(options.average_frame_duration),
            exec: ExecBuffers::new(),
            exhausted_count: 0,
            options,
        })
    }

    /// 切片控制记录格式
    pub fn slice_form(&self) -> SliceForm {
        self.slice_form
    }

    /// 当前的图像参数 (含上一次重建的参考帧列表)
    pub fn pic_params(&self) -> &DxvaPicParamsH264 {
        &self.pic_params
    }

    /// 表面池
    pub fn pool(&self) -> &SurfacePool {
        &self.pool
    }

    /// 解码器选项
    pub fn options(&self) -> &DxvaOptions {
        &self.options
    }

    /// 清空所有解码状态, 之后要求 IDR
    fn reset(&mut self) {
        self.pool.flush();
        self.reorder.flush();
        let feedback = self.pic_params.status_report_feedback_number;
        self.pic_params = init_pic_params(self.vendor);
        self.pic_params.status_report_feedback_number = feedback;
        self.exec.release_all(self.accel.as_mut());
        self.parser.flush();
    }

    fn fatal(&mut self, stage: &str, err: AccelError) -> HwDecError {
        error!("H.264: {stage} 失败, {err}");
        self.exec.release_all(self.accel.as_mut());
        HwDecError::Accelerator(err)
    }

    /// 提交图像参数, 码流, 切片控制和缩放矩阵
    ///
    /// 外层 Err 为加速器错误; 内层 Err 表示码流无法装入, 访问单元被跳过.
    fn submit_buffers(
        &mut self,
        data: &[u8],
        length_size: usize,
        info: &FrameInfo,
        qmatrix: &DxvaQmatrixH264,
    ) -> AccelResult<Result<SliceLayout, SliceBuildError>> {
        let policy = self.options.retry;
        let accel = self.accel.as_mut();

        let feedback = self.pic_params.status_report_feedback_number;
        self.pic_params.status_report_feedback_number = feedback.wrapping_add(1);
        self.exec.alloc(
            accel,
            &policy,
            BufferType::PictureParameters,
            0,
            Some(bytemuck::bytes_of(self.pic_params.as_ref())),
        )?;
        self.exec.execute(accel, &policy)?;

        self.exec
            .alloc(accel, &policy, BufferType::BitStreamData, 0, None)?;
        let built = {
            let dest = accel.buffer_mut(BufferType::BitStreamData.dxva1_type_index(), 0)?;
            slice_builder::build(data, length_size, dest, self.options.max_slices)
        };
        let mut layout = match built {
            Ok(layout) => layout,
            Err(e) => {
                self.exec.release_all(accel);
                return Ok(Err(e));
            }
        };
        self.exec.revise_last_data_size(layout.padded_len as u32);
        layout.finish_last_slice(info.mb_count);

        let slice_control: Vec<u8> = match self.slice_form {
            SliceForm::Short => bytemuck::cast_slice(&layout.short_records()).to_vec(),
            SliceForm::Long => {
                let mut records = layout.long_records();
                let picture = self.parser.picture();
                for (i, record) in records.iter_mut().enumerate() {
                    fill_slice_long(record, &self.pic_params, picture, self.parser.slice(i));
                }
                bytemuck::cast_slice(&records).to_vec()
            }
        };
        self.exec.alloc(
            accel,
            &policy,
            BufferType::SliceControl,
            0,
            Some(&slice_control),
        )?;
        self.exec.alloc(
            accel,
            &policy,
            BufferType::InverseQuantizationMatrix,
            0,
            Some(bytemuck::bytes_of(qmatrix)),
        )?;
        self.exec.execute(accel, &policy)?;
        Ok(Ok(layout))
    }

    /// 选出下一幅图像, 盖戳并提交显示
    fn display_next(&mut self, sample: &SampleHandle) -> Option<DisplayPicture> {
        let selection = self.reorder.select(&mut self.pool)?;
        let slot = self.pool.slot(selection.surface)?;
        let mut picture = DisplayPicture {
            surface_index: slot.surface_index,
            start: selection.start,
            stop: selection.stop,
            first_field_type: slot.first_field_type,
            slice_kind: slot.slice_kind,
            presented: false,
        };

        if picture.start >= 0 {
            sample.set_time(picture.start, picture.stop);
            sample.set_type_specific_flags(TypeSpecificFlags::revise(
                sample.type_specific_flags(),
                picture.first_field_type,
                picture.slice_kind,
            ));
            if let Err(e) = self.accel.display_frame(picture.surface_index, sample) {
                warn!(
                    "H.264: 显示表面 {} 失败, {e}",
                    picture.surface_index
                );
            }
            picture.presented = true;
        }
        self.pool.mark_displayed(selection.surface);
        debug!(
            "H.264: 输出表面 {}, {} ~ {}, {}",
            picture.surface_index,
            display(picture.start),
            display(picture.stop),
            picture.slice_kind
        );
        Some(picture)
    }
}

/// 加速器配置握手: 先探测, 再锁定
fn negotiate_config(accel: &mut dyn VideoAccelerator) -> AccelResult<DxvaConfigPictureDecode> {
    let requested = DxvaConfigPictureDecode::requested();
    let mut reply = DxvaConfigPictureDecode::zeroed();
    accel.execute(
        query_or_reply_function(PROBE_QUERY_FLAGS, PICTURE_DECODING_FUNCTION),
        bytemuck::bytes_of(&requested),
        bytemuck::bytes_of_mut(&mut reply),
        &[],
    )?;

    let probed = reply;
    accel.execute(
        query_or_reply_function(LOCK_QUERY_FLAGS, PICTURE_DECODING_FUNCTION),
        bytemuck::bytes_of(&probed),
        bytemuck::bytes_of_mut(&mut reply),
        &[],
    )?;
    Ok(reply)
}

impl Decoder for DxvaH264Decoder {
    fn name(&self) -> &str {
        "h264_dxva"
    }

    fn decode(&mut self, unit: &AccessUnit, sample: &SampleHandle) -> HwDecResult<DecodeOutcome> {
        let size = unit.size();
        if unit.discontinuity {
            debug!("H.264: 不连续点, 清空解码状态");
            self.reset();
        }
        let length_size = if unit.length_size != 0 {
            unit.length_size
        } else {
            self.options.nal_length_size
        };

        let report = self
            .parser
            .parse_access_unit(&unit.data, unit.start, unit.stop);

        let info = match build_frame_params(&mut self.pic_params, self.parser.as_ref()) {
            Ok(info) => info,
            Err(e) => {
                debug!("H.264: 等待参数集, {e}");
                return Ok(DecodeOutcome::status(DecodeStatus::NotReady, size));
            }
        };
        let Some(pps) = self.parser.picture_params() else {
            return Ok(DecodeOutcome::status(DecodeStatus::NotReady, size));
        };
        let qmatrix = build_scaling_matrix(pps, self.scan_order);

        if self.pool.is_flushed() && !slice_builder::contains_idr(&unit.data, length_size) {
            debug!("H.264: 刷新后等待 IDR, 丢弃 {size} 字节");
            return Ok(DecodeOutcome::status(DecodeStatus::RejectUntilIdr, size));
        }

        let slice_count = slice_builder::count_slices(&unit.data, length_size);
        if slice_count == 0 {
            debug!("H.264: 访问单元中没有切片");
            return Ok(DecodeOutcome::status(
                DecodeStatus::Skipped(SkipReason::NoSlices),
                size,
            ));
        }
        if slice_count > self.options.max_slices {
            warn!(
                "H.264: 切片数 {slice_count} 超过容量 {}, 跳过访问单元",
                self.options.max_slices
            );
            return Ok(DecodeOutcome::status(
                DecodeStatus::Skipped(SkipReason::TooManySlices),
                size,
            ));
        }

        let acquired = match self.pool.acquire() {
            Ok(acquired) => acquired,
            Err(e) => {
                self.exhausted_count += 1;
                if self.exhausted_count % EXHAUSTED_WARN_INTERVAL == 1 {
                    warn!("{e}, 复位解码器 (累计 {} 次)", self.exhausted_count);
                }
                self.reset();
                return Ok(DecodeOutcome::status(DecodeStatus::HardwareExhausted, size));
            }
        };
        let surface = acquired.surface as u8;
        set_current_pic(&mut self.pic_params, surface, self.parser.as_mut());

        if let Err(e) = begin_frame(self.accel.as_mut(), &self.options.retry, surface) {
            return Err(self.fatal("begin_frame", e));
        }

        let submitted = match self.submit_buffers(&unit.data, length_size, &info, &qmatrix) {
            Ok(submitted) => submitted,
            Err(e) => return Err(self.fatal("提交缓冲区", e)),
        };
        if let Err(e) = self.accel.end_frame(surface) {
            return Err(self.fatal("end_frame", e));
        }
        let layout = match submitted {
            Ok(layout) => layout,
            Err(e) => {
                warn!("H.264: {e}, 跳过访问单元");
                let reason = match e {
                    SliceBuildError::NoSlices => SkipReason::NoSlices,
                    SliceBuildError::TooManySlices { .. } => SkipReason::TooManySlices,
                    SliceBuildError::BufferTooSmall { .. } => SkipReason::BitstreamOverflow,
                };
                return Ok(DecodeOutcome::status(DecodeStatus::Skipped(reason), size));
            }
        };

        let start = unit.start;
        let stop = normalize_stop(start, unit.stop, self.options.average_frame_duration);
        let complete = self.pool.commit(
            acquired.surface,
            PictureSubmission {
                is_reference: info.is_reference,
                start,
                stop,
                is_field: info.is_field,
                field_type: info.field_type,
                slice_kind: info.slice_kind,
                output_order_key: report.current_key,
                sample: Some(Arc::clone(sample)),
            },
        );
        debug!(
            "H.264: 表面 {surface} 已提交, {} 切片, {} 字节, {}{}, start={}",
            layout.len(),
            layout.padded_len,
            info.slice_kind,
            if acquired.second_field { " (次场)" } else { "" },
            display(start)
        );

        update_ref_frame_list(&mut self.pic_params, self.parser.as_ref());
        let parser = self.parser.as_ref();
        self.pool
            .retire_unused_references(|s| parser.is_reference_in_use(s));

        self.reorder.apply_report(&report);
        let picture = if complete {
            self.display_next(sample)
        } else {
            None
        };
        self.pool.clear_flushed();
        Ok(DecodeOutcome::with_picture(size, picture))
    }

    fn flush(&mut self) {
        debug!("H.264: 刷新 DXVA 解码器");
        self.reset();
    }
}
