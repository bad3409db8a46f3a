//! 视频加速器接口与执行缓冲区登记.
//!
//! 管线从不自己分配表面内存, 只按类型向加速器申请/释放缓冲区, 然后以
//! 缓冲区描述数组调用 execute.

use log::warn;

use hwdec_core::{AccelError, AccelResult};

use super::sequencer::{RetryPolicy, retry_busy};
use super::structs::{AmvaBufferInfo, DxvaBufferDescription};
use crate::frame::SampleHandle;

/// E_INVALIDARG
pub const E_INVALIDARG: u32 = 0x8007_0057;

/// 解码执行的功能码
pub const DECODE_FUNCTION: u32 = 0x0100_0000;

/// DXVA_PICTURE_DECODING_FUNCTION
pub const PICTURE_DECODING_FUNCTION: u32 = 1;

/// DXVA_QUERYORREPLYFUNCFLAG_DECODER_PROBE_QUERY
pub const PROBE_QUERY_FLAGS: u32 = 0x00FF_FFF1;

/// DXVA_QUERYORREPLYFUNCFLAG_DECODER_LOCK_QUERY
pub const LOCK_QUERY_FLAGS: u32 = 0x00FF_FFF5;

/// 查询/应答功能码: 标志在高 24 位, 功能在低 8 位
pub const fn query_or_reply_function(flags: u32, function: u32) -> u32 {
    (flags << 8) | (function & 0xFF)
}

/// 压缩缓冲区类型 (DXVA2 编号)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferType {
    PictureParameters,
    MacroBlockControl,
    ResidualDifference,
    Deblocking,
    InverseQuantizationMatrix,
    SliceControl,
    BitStreamData,
    MotionVector,
    FilmGrain,
}

impl BufferType {
    /// DXVA2 压缩缓冲区类型编号
    pub fn dxva2_type(&self) -> u32 {
        match self {
            Self::PictureParameters => 0,
            Self::MacroBlockControl => 1,
            Self::ResidualDifference => 2,
            Self::Deblocking => 3,
            Self::InverseQuantizationMatrix => 4,
            Self::SliceControl => 5,
            Self::BitStreamData => 6,
            Self::MotionVector => 7,
            Self::FilmGrain => 8,
        }
    }

    /// DXVA1 缓冲区类型索引 (DXVA2 编号 + 1)
    pub fn dxva1_type_index(&self) -> u32 {
        self.dxva2_type() + 1
    }
}

/// 视频加速器
///
/// 返回 [`AccelError::Pending`] 表示硬件队列忙, 调用方按重试策略轮询;
/// 其他错误都是硬错误.
pub trait VideoAccelerator: Send {
    /// 开始解码一帧到指定表面
    fn begin_frame(&mut self, surface: u8) -> AccelResult<()>;

    /// 查询渲染状态, 仍在处理前一帧时返回 Pending
    fn query_render_status(&mut self) -> AccelResult<()>;

    /// 结束当前帧
    fn end_frame(&mut self, surface: u8) -> AccelResult<()>;

    /// 锁定一个压缩缓冲区
    fn get_buffer(&mut self, type_index: u32, buffer_index: u32) -> AccelResult<()>;

    /// 访问已锁定缓冲区的内存
    fn buffer_mut(&mut self, type_index: u32, buffer_index: u32) -> AccelResult<&mut [u8]>;

    /// 释放缓冲区
    fn release_buffer(&mut self, type_index: u32, buffer_index: u32) -> AccelResult<()>;

    /// 执行一个功能
    fn execute(
        &mut self,
        function: u32,
        input: &[u8],
        output: &mut [u8],
        buffers: &[AmvaBufferInfo],
    ) -> AccelResult<()>;

    /// 显示表面上的图像
    fn display_frame(&mut self, surface: u8, sample: &SampleHandle) -> AccelResult<()>;
}

/// 一次 execute 要提交的缓冲区登记
#[derive(Debug, Default)]
pub struct ExecBuffers {
    infos: Vec<AmvaBufferInfo>,
    descriptions: Vec<DxvaBufferDescription>,
}

impl ExecBuffers {
    pub fn new() -> Self {
        Self::default()
    }

    /// 已登记的缓冲区数
    pub fn len(&self) -> usize {
        self.infos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }

    /// 已登记的缓冲区信息
    pub fn infos(&self) -> &[AmvaBufferInfo] {
        &self.infos
    }

    /// 申请缓冲区并登记
    ///
    /// `data` 为 Some 时拷入缓冲区并以其长度登记; 码流缓冲区传 None,
    /// 由调用方写入后通过 [`ExecBuffers::revise_last_data_size`] 修正长度.
    pub fn alloc(
        &mut self,
        accel: &mut dyn VideoAccelerator,
        policy: &RetryPolicy,
        buffer_type: BufferType,
        buffer_index: u32,
        data: Option<&[u8]>,
    ) -> AccelResult<()> {
        let type_index = buffer_type.dxva1_type_index();
        retry_busy(policy.execute_retry, || {
            accel.get_buffer(type_index, buffer_index)
        })?;

        let size = match data {
            Some(data) => {
                let dest = accel.buffer_mut(type_index, buffer_index)?;
                let Some(dest) = dest.get_mut(..data.len()) else {
                    // 先登记, 失败路径上也会被释放
                    self.push(type_index, buffer_index, 0);
                    return Err(AccelError::Failed(E_INVALIDARG));
                };
                dest.copy_from_slice(data);
                data.len() as u32
            }
            None => 0,
        };
        self.push(type_index, buffer_index, size);
        Ok(())
    }

    fn push(&mut self, type_index: u32, buffer_index: u32, size: u32) {
        self.infos.push(AmvaBufferInfo {
            dw_type_index: type_index,
            dw_buffer_index: buffer_index,
            dw_data_offset: 0,
            dw_data_size: size,
        });
        self.descriptions.push(DxvaBufferDescription {
            dw_type_index: type_index,
            dw_buffer_index: buffer_index,
            dw_data_size: size,
            ..DxvaBufferDescription::default()
        });
    }

    /// 修正最后登记的缓冲区的数据长度
    pub fn revise_last_data_size(&mut self, size: u32) {
        if let Some(info) = self.infos.last_mut() {
            info.dw_data_size = size;
        }
        if let Some(desc) = self.descriptions.last_mut() {
            desc.dw_data_size = size;
        }
    }

    /// 以已登记的缓冲区执行解码, 之后释放全部缓冲区
    pub fn execute(
        &mut self,
        accel: &mut dyn VideoAccelerator,
        policy: &RetryPolicy,
    ) -> AccelResult<()> {
        let input: &[u8] = bytemuck::cast_slice(&self.descriptions);
        let mut result = [0u8; 4];
        let infos = &self.infos;
        let r = retry_busy(policy.execute_retry, || {
            accel.execute(DECODE_FUNCTION, input, &mut result, infos)
        });
        self.release_all(accel);
        r
    }

    /// 释放全部已登记的缓冲区
    pub fn release_all(&mut self, accel: &mut dyn VideoAccelerator) {
        for info in &self.infos {
            if let Err(e) = accel.release_buffer(info.dw_type_index, info.dw_buffer_index) {
                warn!(
                    "H.264: 释放缓冲区失败, type={}, index={}, {e}",
                    info.dw_type_index, info.dw_buffer_index
                );
            }
        }
        self.infos.clear();
        self.descriptions.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_type_index() {
        assert_eq!(BufferType::PictureParameters.dxva1_type_index(), 1);
        assert_eq!(BufferType::InverseQuantizationMatrix.dxva1_type_index(), 5);
        assert_eq!(BufferType::SliceControl.dxva1_type_index(), 6);
        assert_eq!(BufferType::BitStreamData.dxva1_type_index(), 7);
        assert_eq!(BufferType::FilmGrain.dxva1_type_index(), 9);
    }

    #[test]
    fn test_query_function_codes() {
        assert_eq!(
            query_or_reply_function(PROBE_QUERY_FLAGS, PICTURE_DECODING_FUNCTION),
            0xFFFF_F101
        );
        assert_eq!(
            query_or_reply_function(LOCK_QUERY_FLAGS, PICTURE_DECODING_FUNCTION),
            0xFFFF_F501
        );
    }

    #[test]
    fn test_revise_last_data_size() {
        let mut buffers = ExecBuffers::new();
        buffers.push(1, 0, 1040);
        buffers.push(7, 0, 0);
        buffers.revise_last_data_size(256);
        assert_eq!(buffers.infos()[0].dw_data_size, 1040);
        assert_eq!(buffers.infos()[1].dw_data_size, 256);
        assert_eq!(buffers.descriptions[1].dw_data_size, 256);
    }
}
