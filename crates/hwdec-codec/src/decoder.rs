//! 解码器 trait 定义.
//!
//! 每次调用 `decode()` 处理一个完整的访问单元, 返回本次的处理状态以及
//! (可能的) 一幅按显示顺序选出的图像.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use hwdec_core::HwDecResult;

use crate::access_unit::AccessUnit;
use crate::frame::{DisplayPicture, SampleHandle};

/// 访问单元被跳过的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// 访问单元中没有切片
    NoSlices,
    /// 切片数超过切片控制记录容量
    TooManySlices,
    /// 码流缓冲区放不下全部切片
    BitstreamOverflow,
}

/// 单个访问单元的处理状态
///
/// 加速器硬错误不在此列, 通过 `Err(HwDecError::Accelerator(..))` 返回.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStatus {
    /// 已提交硬件解码
    Ready,
    /// 参数集尚未就绪, 等待后续访问单元
    NotReady,
    /// 刷新后等待 IDR, 非 IDR 访问单元被拒绝
    RejectUntilIdr,
    /// 访问单元被丢弃
    Skipped(SkipReason),
    /// 表面池耗尽, 解码器已复位
    HardwareExhausted,
}

impl DecodeStatus {
    /// 是否提交了硬件解码
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }
}

/// 单个访问单元的解码结果
#[derive(Debug, Clone)]
pub struct DecodeOutcome {
    /// 处理状态
    pub status: DecodeStatus,
    /// 消耗的字节数
    pub bytes_consumed: usize,
    /// 是否产出了完整的一帧
    pub frame_ready: bool,
    /// 按显示顺序选出的图像 (硬件路径)
    pub picture: Option<DisplayPicture>,
}

impl DecodeOutcome {
    /// 没有图像输出的结果
    pub fn status(status: DecodeStatus, bytes_consumed: usize) -> Self {
        Self {
            status,
            bytes_consumed,
            frame_ready: false,
            picture: None,
        }
    }

    /// 硬件路径的结果
    pub fn with_picture(bytes_consumed: usize, picture: Option<DisplayPicture>) -> Self {
        Self {
            status: DecodeStatus::Ready,
            bytes_consumed,
            frame_ready: picture.is_some(),
            picture,
        }
    }
}

/// 解码器 trait
///
/// 解码流程:
/// 1. 调用 `decode()` 送入一个访问单元和本次可用的输出样本
/// 2. 根据返回状态决定是否交付样本
/// 3. seek 或新片段开始时调用 `flush()`
pub trait Decoder: Send {
    /// 获取解码器名称
    fn name(&self) -> &str;

    /// 解码一个访问单元
    fn decode(&mut self, unit: &AccessUnit, sample: &SampleHandle) -> HwDecResult<DecodeOutcome>;

    /// 刷新解码器, 清空内部状态
    fn flush(&mut self);
}

/// 可跨线程共享的解码器
///
/// 宿主串行送入数据, 但 flush 可能在另一个线程到达, 所以解码和刷新在
/// 同一把锁下互斥. 锁覆盖整个硬件提交序列, flush 总会等正在进行的
/// 提交完成 (或其重试耗尽) 后才执行.
pub struct SharedDecoder<D: Decoder> {
    inner: Arc<Mutex<D>>,
}

impl<D: Decoder> Clone for SharedDecoder<D> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<D: Decoder> SharedDecoder<D> {
    /// 包装解码器
    pub fn new(decoder: D) -> Self {
        Self {
            inner: Arc::new(Mutex::new(decoder)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, D> {
        // 持锁线程 panic 后解码器状态仍然可用: 最坏情况下下一次 flush 会复位
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 解码一个访问单元
    pub fn decode(&self, unit: &AccessUnit, sample: &SampleHandle) -> HwDecResult<DecodeOutcome> {
        self.lock().decode(unit, sample)
    }

    /// 刷新解码器
    pub fn flush(&self) {
        self.lock().flush();
    }

    /// 在锁内访问解码器
    pub fn with<R>(&self, f: impl FnOnce(&mut D) -> R) -> R {
        f(&mut self.lock())
    }
}
