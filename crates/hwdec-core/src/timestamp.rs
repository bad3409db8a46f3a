//! 时间戳约定.
//!
//! 时间戳沿用 DirectShow 的参考时钟单位: 100 纳秒 (1 秒 = 10_000_000).
//! `NOPTS_VALUE` 表示上游没有提供时间戳.

/// 表示"未定义"的时间戳值
pub const NOPTS_VALUE: i64 = i64::MIN;

/// 每秒对应的参考时钟单位数
pub const UNITS_PER_SECOND: i64 = 10_000_000;

/// 参考时钟时间 (100ns 单位)
pub type ReferenceTime = i64;

/// 时间戳是否有效 (非 NOPTS_VALUE)
pub const fn is_valid(ts: ReferenceTime) -> bool {
    ts != NOPTS_VALUE
}

/// 转换为秒, 无效时间戳返回 `f64::NAN`
pub fn to_seconds(ts: ReferenceTime) -> f64 {
    if !is_valid(ts) {
        return f64::NAN;
    }
    ts as f64 / UNITS_PER_SECOND as f64
}

/// 修正上游给出的结束时间
///
/// 结束时间不晚于开始时间且有效时, 用平均帧时长推算结束时间.
pub fn normalize_stop(
    start: ReferenceTime,
    stop: ReferenceTime,
    average_frame_duration: ReferenceTime,
) -> ReferenceTime {
    if stop <= start && is_valid(stop) {
        start.saturating_add(average_frame_duration)
    } else {
        stop
    }
}

/// 格式化为便于日志阅读的字符串
pub fn display(ts: ReferenceTime) -> String {
    if is_valid(ts) {
        format!("{:.4}s", to_seconds(ts))
    } else {
        "NOPTS".to_string()
    }
}
