//! 解码表面池 (DPB).
//!
//! 固定数量的表面槽位, 每个槽位描述一幅已解码图像的状态. 槽位状态:
//!
//! ```text
//! Free ──首场──▶ PendingField ──次场──▶ Complete
//!   ▲                                     │
//!   └──── 已显示且不再作参考 ◀────────────┘
//! ```
//!
//! 帧图像直接从 Free 进入 Complete. 半完成的场对由单独的 `pending_field`
//! 记录, 不会同时占用两个槽位.

use hwdec_core::{NOPTS_VALUE, ReferenceTime};
use log::debug;
use thiserror::Error;

use crate::frame::{FieldType, SampleHandle};
use crate::parsers::h264::SliceKind;

/// display_generation 的初值
const INITIAL_GENERATION: u64 = 1;

/// 表面池耗尽
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("H.264: 没有空闲的解码表面, 容量 {capacity}")]
pub struct PoolExhausted {
    pub capacity: usize,
}

/// 一个表面槽位中的已解码图像
#[derive(Clone)]
pub struct DecodedPicture {
    /// 表面索引, 等于槽位下标
    pub surface_index: u8,
    pub in_use: bool,
    pub displayed: bool,
    pub is_reference: bool,
    pub start: ReferenceTime,
    pub stop: ReferenceTime,
    pub first_field_type: FieldType,
    pub slice_kind: SliceKind,
    /// 与输出请求匹配的标识 (POC), None 表示尚未匹配
    pub output_order_key: Option<i32>,
    /// 槽位释放时分配的代数, 越小越早释放
    pub display_generation: u64,
    sample: Option<SampleHandle>,
}

impl std::fmt::Debug for DecodedPicture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecodedPicture")
            .field("surface_index", &self.surface_index)
            .field("in_use", &self.in_use)
            .field("displayed", &self.displayed)
            .field("is_reference", &self.is_reference)
            .field("start", &self.start)
            .field("output_order_key", &self.output_order_key)
            .field("display_generation", &self.display_generation)
            .field("has_sample", &self.sample.is_some())
            .finish()
    }
}

impl DecodedPicture {
    fn new(surface_index: u8) -> Self {
        Self {
            surface_index,
            in_use: false,
            displayed: false,
            is_reference: false,
            start: 0,
            stop: 0,
            first_field_type: FieldType::Frame,
            slice_kind: SliceKind::I,
            output_order_key: None,
            display_generation: 0,
            sample: None,
        }
    }

    /// 槽位持有的输出样本
    pub fn sample(&self) -> Option<&SampleHandle> {
        self.sample.as_ref()
    }
}

/// 提交到表面池的一幅图像
#[derive(Clone)]
pub struct PictureSubmission {
    pub is_reference: bool,
    pub start: ReferenceTime,
    pub stop: ReferenceTime,
    pub is_field: bool,
    pub field_type: FieldType,
    pub slice_kind: SliceKind,
    pub output_order_key: Option<i32>,
    pub sample: Option<SampleHandle>,
}

/// 分配结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Acquired {
    /// 表面索引
    pub surface: usize,
    /// 是否复用等待中的首场槽位
    pub second_field: bool,
}

/// 等待次场的首场
#[derive(Clone)]
struct PendingField {
    surface: usize,
    sample: Option<SampleHandle>,
}

impl std::fmt::Debug for PictureSubmission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PictureSubmission")
            .field("is_reference", &self.is_reference)
            .field("start", &self.start)
            .field("stop", &self.stop)
            .field("is_field", &self.is_field)
            .field("field_type", &self.field_type)
            .field("slice_kind", &self.slice_kind)
            .field("output_order_key", &self.output_order_key)
            .field("has_sample", &self.sample.is_some())
            .finish()
    }
}

impl std::fmt::Debug for PendingField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingField")
            .field("surface", &self.surface)
            .field("has_sample", &self.sample.is_some())
            .finish()
    }
}

/// 解码表面池
pub struct SurfacePool {
    slots: Vec<DecodedPicture>,
    pending_field: Option<PendingField>,
    next_generation: u64,
    flushed: bool,
}

impl SurfacePool {
    /// 创建表面池, `count` 不超过 127 (7 位表面索引)
    pub fn new(count: usize) -> Self {
        let count = count.min(usize::from(u8::MAX >> 1));
        Self {
            slots: (0..count).map(|i| DecodedPicture::new(i as u8)).collect(),
            pending_field: None,
            next_generation: INITIAL_GENERATION,
            flushed: false,
        }
    }

    /// 槽位数量
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// 是否没有槽位
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// 所有槽位
    pub fn slots(&self) -> &[DecodedPicture] {
        &self.slots
    }

    /// 单个槽位
    pub fn slot(&self, surface: usize) -> Option<&DecodedPicture> {
        self.slots.get(surface)
    }

    pub(crate) fn slot_mut(&mut self, surface: usize) -> Option<&mut DecodedPicture> {
        self.slots.get_mut(surface)
    }

    /// 等待次场的槽位
    pub fn pending_field(&self) -> Option<usize> {
        self.pending_field.as_ref().map(|p| p.surface)
    }

    /// 刷新后是否还在等待 IDR
    pub fn is_flushed(&self) -> bool {
        self.flushed
    }

    /// 成功解码后清除刷新标志
    pub fn clear_flushed(&mut self) {
        self.flushed = false;
    }

    /// 为新的访问单元分配表面
    ///
    /// 有等待中的首场时直接复用其槽位; 否则在空闲槽位中选 display_generation
    /// 最小的. 没有空闲槽位时整体复位并返回 [`PoolExhausted`].
    /// 分配本身不改变槽位状态, 提交 ([`SurfacePool::commit`]) 时才生效.
    pub fn acquire(&mut self) -> Result<Acquired, PoolExhausted> {
        if let Some(pending) = &self.pending_field {
            return Ok(Acquired {
                surface: pending.surface,
                second_field: true,
            });
        }

        let found = self
            .slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| !slot.in_use)
            .min_by_key(|(i, slot)| (slot.display_generation, *i))
            .map(|(i, _)| i);

        match found {
            Some(surface) => Ok(Acquired {
                surface,
                second_field: false,
            }),
            None => {
                let capacity = self.slots.len();
                self.flush();
                Err(PoolExhausted { capacity })
            }
        }
    }

    /// 提交一幅已送入硬件的图像
    ///
    /// 场图像的首场只记为等待次场, 返回 false; 帧图像或次场使槽位完成, 返回 true.
    pub fn commit(&mut self, surface: usize, submission: PictureSubmission) -> bool {
        let Some(slot) = self.slots.get_mut(surface) else {
            return false;
        };

        if submission.is_field && self.pending_field.is_none() {
            slot.first_field_type = submission.field_type;
            slot.start = submission.start;
            slot.stop = submission.stop;
            slot.output_order_key = submission.output_order_key;
            self.pending_field = Some(PendingField {
                surface,
                sample: submission.sample,
            });
            return false;
        }

        let pending_sample = self
            .pending_field
            .take()
            .filter(|p| p.surface == surface)
            .and_then(|p| p.sample);

        slot.is_reference = submission.is_reference;
        slot.in_use = true;
        slot.displayed = false;
        slot.slice_kind = submission.slice_kind;
        slot.sample = pending_sample.or(submission.sample);
        if !submission.is_field {
            slot.start = submission.start;
            slot.stop = submission.stop;
            slot.first_field_type = submission.field_type;
            slot.output_order_key = submission.output_order_key;
        }
        true
    }

    /// 释放槽位, 分配新的 display_generation
    pub fn free(&mut self, surface: usize) {
        let generation = self.next_generation;
        let Some(slot) = self.slots.get_mut(surface) else {
            return;
        };
        slot.display_generation = generation;
        slot.in_use = false;
        slot.displayed = false;
        slot.output_order_key = None;
        slot.sample = None;
        self.next_generation += 1;
    }

    /// 标记为已显示; 非参考图像随即释放
    ///
    /// 返回槽位是否被释放.
    pub fn mark_displayed(&mut self, surface: usize) -> bool {
        let Some(slot) = self.slots.get_mut(surface) else {
            return false;
        };
        slot.displayed = true;
        if slot.is_reference {
            return false;
        }
        self.free(surface);
        true
    }

    /// 回收不再被参考的图像
    ///
    /// `in_use(surface)` 判断表面是否仍在解析器的短期/长期参考集合中.
    /// 不再被参考的槽位清除参考标志, 已显示的随即释放.
    pub fn retire_unused_references(&mut self, in_use: impl Fn(u8) -> bool) {
        for surface in 0..self.slots.len() {
            let slot = &mut self.slots[surface];
            if !slot.in_use || !slot.is_reference || in_use(slot.surface_index) {
                continue;
            }
            slot.is_reference = false;
            if slot.displayed {
                debug!("H.264: 表面 {surface} 不再作参考, 释放");
                self.free(surface);
            }
        }
    }

    /// 清空所有槽位, 之后必须等到 IDR
    pub fn flush(&mut self) {
        for slot in &mut self.slots {
            *slot = DecodedPicture::new(slot.surface_index);
        }
        self.pending_field = None;
        self.next_generation = INITIAL_GENERATION;
        self.flushed = true;
    }

    /// 已完成但尚未显示的槽位数
    pub fn undisplayed_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.in_use && !slot.displayed)
            .count()
    }
}

impl PictureSubmission {
    /// 不带时间戳的帧图像, 便于构造
    pub fn frame(slice_kind: SliceKind, is_reference: bool, key: Option<i32>) -> Self {
        Self {
            is_reference,
            start: NOPTS_VALUE,
            stop: NOPTS_VALUE,
            is_field: false,
            field_type: FieldType::Frame,
            slice_kind,
            output_order_key: key,
            sample: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(field_type: FieldType, key: i32) -> PictureSubmission {
        PictureSubmission {
            is_field: true,
            field_type,
            ..PictureSubmission::frame(SliceKind::I, true, Some(key))
        }
    }

    #[test]
    fn test_acquire_prefers_oldest_freed() {
        let mut pool = SurfacePool::new(4);
        for surface in 0..4 {
            let acquired = pool.acquire().expect("应有空闲表面");
            assert_eq!(acquired.surface, surface, "初始时按下标顺序分配");
            pool.commit(surface, PictureSubmission::frame(SliceKind::P, false, None));
        }

        pool.mark_displayed(2);
        pool.mark_displayed(0);
        assert_eq!(pool.slot(2).map(|s| s.display_generation), Some(1));
        assert_eq!(pool.slot(0).map(|s| s.display_generation), Some(2));

        let acquired = pool.acquire().expect("应有空闲表面");
        assert_eq!(acquired.surface, 2, "先释放的槽位应先被复用");
        pool.commit(2, PictureSubmission::frame(SliceKind::P, false, None));
        assert_eq!(pool.acquire().map(|a| a.surface), Ok(0));
    }

    #[test]
    fn test_exhaustion_resets_pool() {
        let mut pool = SurfacePool::new(2);
        for surface in 0..2 {
            pool.commit(surface, PictureSubmission::frame(SliceKind::I, true, None));
        }
        let err = pool.acquire().expect_err("表面全部占用时应返回耗尽");
        assert_eq!(err.capacity, 2);
        assert_eq!(
            pool.acquire(),
            Ok(Acquired {
                surface: 0,
                second_field: false
            }),
            "复位后应能重新分配"
        );
        assert!(pool.slots().iter().all(|s| !s.in_use), "耗尽后所有槽位应复位");
        assert!(pool.is_flushed(), "耗尽等同于刷新");
    }

    #[test]
    fn test_field_pair_shares_surface() {
        let mut pool = SurfacePool::new(4);
        let first = pool.acquire().expect("应有空闲表面");
        assert!(!first.second_field);
        assert!(!pool.commit(first.surface, field(FieldType::Top, 8)));
        assert_eq!(pool.pending_field(), Some(first.surface));
        assert!(!pool.slot(first.surface).is_some_and(|s| s.in_use));

        let second = pool.acquire().expect("次场应复用首场槽位");
        assert!(second.second_field);
        assert_eq!(second.surface, first.surface);
        assert!(pool.commit(second.surface, field(FieldType::Bottom, 9)));
        assert_eq!(pool.pending_field(), None);

        let slot = pool.slot(first.surface).expect("槽位应存在");
        assert!(slot.in_use);
        assert_eq!(slot.first_field_type, FieldType::Top, "首场类型应保留");
        assert_eq!(slot.output_order_key, Some(8), "输出标识应来自首场");
    }

    #[test]
    fn test_reference_retirement() {
        let mut pool = SurfacePool::new(3);
        pool.commit(0, PictureSubmission::frame(SliceKind::I, true, Some(0)));
        pool.commit(1, PictureSubmission::frame(SliceKind::P, true, Some(2)));

        assert!(!pool.mark_displayed(0), "参考图像显示后不应释放");
        pool.retire_unused_references(|surface| surface == 0);
        assert!(pool.slot(0).is_some_and(|s| s.in_use));

        pool.retire_unused_references(|_| false);
        assert!(pool.slot(0).is_some_and(|s| !s.in_use), "已显示且不再参考应释放");
        let slot1 = pool.slot(1).expect("槽位应存在");
        assert!(slot1.in_use, "未显示的图像只清除参考标志");
        assert!(!slot1.is_reference);
        assert!(pool.mark_displayed(1), "非参考图像显示后应释放");
    }

    #[test]
    fn test_flush_resets_everything() {
        let mut pool = SurfacePool::new(3);
        pool.commit(0, PictureSubmission::frame(SliceKind::I, true, Some(0)));
        pool.commit(1, field(FieldType::Top, 4));
        pool.mark_displayed(0);
        pool.free(0);

        pool.flush();
        assert!(pool.is_flushed());
        assert_eq!(pool.pending_field(), None);
        assert!(pool.slots().iter().all(|s| !s.in_use && s.display_generation == 0));

        pool.commit(0, PictureSubmission::frame(SliceKind::I, false, None));
        pool.mark_displayed(0);
        assert_eq!(
            pool.slot(0).map(|s| s.display_generation),
            Some(INITIAL_GENERATION),
            "刷新后代数计数应回到初值"
        );
    }
}
