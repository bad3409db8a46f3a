//! 硬件命令序列的忙等待重试.
//!
//! 加速器是异步硬件队列, 不提供阻塞等待原语. 忙状态只能按次数轮询,
//! 每次之间让出调度器.

use std::thread;
use std::time::Duration;

use log::trace;

use hwdec_core::{AccelError, AccelResult};

use super::accelerator::VideoAccelerator;

/// 忙等待重试策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// 缓冲区申请与 execute 的最大尝试次数
    pub execute_retry: u32,
    /// begin_frame 的最大轮数
    pub begin_frame_rounds: u32,
    /// begin_frame 每轮之间的休眠
    pub round_sleep: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            execute_retry: 50,
            begin_frame_rounds: 20,
            round_sleep: Duration::from_millis(1),
        }
    }
}

/// 反复调用 `op` 直到返回非忙状态, 最多 `attempts` 次
///
/// 次数耗尽时返回最后一次的 [`AccelError::Pending`].
pub fn retry_busy<T>(
    attempts: u32,
    mut op: impl FnMut() -> AccelResult<T>,
) -> AccelResult<T> {
    let mut result = Err(AccelError::Pending);
    for attempt in 0..attempts.max(1) {
        result = op();
        match &result {
            Err(e) if e.is_pending() => {
                trace!("H.264: 加速器忙, 第 {} 次重试", attempt + 1);
                thread::yield_now();
            }
            _ => break,
        }
    }
    result
}

/// 开始一帧: 每轮先 begin_frame 再查询渲染状态, 两者都不忙时成功
///
/// 轮与轮之间休眠 `round_sleep`.
pub fn begin_frame(
    accel: &mut dyn VideoAccelerator,
    policy: &RetryPolicy,
    surface: u8,
) -> AccelResult<()> {
    let mut result = Err(AccelError::Pending);
    for round in 0..policy.begin_frame_rounds.max(1) {
        if round > 0 {
            thread::sleep(policy.round_sleep);
        }
        result = retry_busy(policy.execute_retry, || accel.begin_frame(surface))
            .and_then(|()| retry_busy(policy.execute_retry, || accel.query_render_status()));
        match &result {
            Err(e) if e.is_pending() => continue,
            _ => break,
        }
    }
    result
}
