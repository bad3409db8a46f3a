//! 输出重排.
//!
//! 硬件按解码顺序提交, 显示顺序由解析器上报的输出标识 (POC) 决定. 每次提交后
//! 从已完成且未显示的槽位中找出与最近一次输出标识匹配的图像.

use hwdec_core::timestamp::is_valid;
use hwdec_core::{NOPTS_VALUE, ReferenceTime};

use super::surface_pool::SurfacePool;
use crate::parsers::h264::ParseReport;

/// 被选中的输出图像
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection {
    /// 表面索引
    pub surface: usize,
    /// 最终开始时间
    pub start: ReferenceTime,
    /// 最终结束时间
    pub stop: ReferenceTime,
}

/// 输出重排状态
#[derive(Debug, Clone)]
pub struct OutputReorder {
    out_key: Option<i32>,
    out_start: ReferenceTime,
    last_frame_time: ReferenceTime,
    average_frame_duration: ReferenceTime,
}

impl OutputReorder {
    /// 创建重排器, `average_frame_duration` 用于合成缺失的时间戳
    pub fn new(average_frame_duration: ReferenceTime) -> Self {
        Self {
            out_key: None,
            out_start: NOPTS_VALUE,
            last_frame_time: 0,
            average_frame_duration: average_frame_duration.max(1),
        }
    }

    /// 最近一次上报的输出标识
    pub fn out_key(&self) -> Option<i32> {
        self.out_key
    }

    /// 合成时间戳的游标
    pub fn last_frame_time(&self) -> ReferenceTime {
        self.last_frame_time
    }

    /// 记录解析器上报的输出请求, 没有输出标识的上报不覆盖之前的请求
    pub fn apply_report(&mut self, report: &ParseReport) {
        if let Some(key) = report.output_key {
            self.out_key = Some(key);
            self.out_start = report.output_start;
        }
    }

    /// 选出下一幅要显示的图像, 并写回其开始/结束时间
    ///
    /// 候选为已完成, 未显示, 输出标识匹配的槽位; 多个候选时取开始时间最小的,
    /// 相同时取下标最小的. 不改变显示状态, 由调用方在交付后标记.
    pub fn select(&mut self, pool: &mut SurfacePool) -> Option<Selection> {
        let key = self.out_key?;
        let (surface, slot_start) = pool
            .slots()
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.in_use && !slot.displayed)
            .filter(|(_, slot)| slot.output_order_key == Some(key))
            .min_by_key(|(i, slot)| (slot.start, *i))
            .map(|(i, slot)| (i, slot.start))?;

        let start = if is_valid(self.out_start) {
            self.out_start
        } else if is_valid(slot_start) {
            slot_start
        } else {
            self.last_frame_time
        };
        let stop = start.saturating_add(self.average_frame_duration);
        self.last_frame_time = stop;

        if let Some(slot) = pool.slot_mut(surface) {
            slot.start = start;
            slot.stop = stop;
        }
        Some(Selection {
            surface,
            start,
            stop,
        })
    }

    /// 清空输出请求与时间戳游标
    pub fn flush(&mut self) {
        self.out_key = None;
        self.out_start = NOPTS_VALUE;
        self.last_frame_time = 0;
    }
}
