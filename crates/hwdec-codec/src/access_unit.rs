//! 压缩访问单元 (AccessUnit).
//!
//! 上游每次送入一个访问单元: 一幅图像 (或一个场) 的全部 NAL 单元.

use bytes::Bytes;
use hwdec_core::{NOPTS_VALUE, ReferenceTime};

/// 压缩访问单元
#[derive(Debug, Clone)]
pub struct AccessUnit {
    /// 压缩数据
    pub data: Bytes,
    /// 开始时间 (NOPTS_VALUE 表示未提供)
    pub start: ReferenceTime,
    /// 结束时间 (NOPTS_VALUE 表示未提供)
    pub stop: ReferenceTime,
    /// 长度前缀字节数, 0 表示 Annex B
    pub length_size: usize,
    /// 是否为刷新边界 (seek/新片段), 解码前先清空状态
    pub discontinuity: bool,
}

impl AccessUnit {
    /// 从 Annex B 数据创建, 时间戳未定义
    pub fn from_data(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            start: NOPTS_VALUE,
            stop: NOPTS_VALUE,
            length_size: 0,
            discontinuity: false,
        }
    }

    /// 设置时间戳
    pub fn with_time(mut self, start: ReferenceTime, stop: ReferenceTime) -> Self {
        self.start = start;
        self.stop = stop;
        self
    }

    /// 设置长度前缀字节数
    pub fn with_length_size(mut self, length_size: usize) -> Self {
        self.length_size = length_size;
        self
    }

    /// 标记为刷新边界
    pub fn with_discontinuity(mut self) -> Self {
        self.discontinuity = true;
        self
    }

    /// 数据大小 (字节)
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
