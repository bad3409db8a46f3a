//! 统一错误类型定义.
//!
//! 解析/翻译阶段的问题在解码器内部吸收, 仅以每个访问单元的状态上报;
//! 这里的错误类型只承载真正需要向调用方传播的情况.

use thiserror::Error;

/// 加速器调用返回的失败状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AccelError {
    /// 硬件队列忙 (E_PENDING), 可以稍后重试
    #[error("加速器忙, 请求仍在排队")]
    Pending,

    /// 硬件返回的硬错误码, 加速器状态未知
    #[error("加速器调用失败: hr=0x{0:08X}")]
    Failed(u32),
}

impl AccelError {
    /// 是否为可重试的忙状态
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }
}

/// 加速器调用结果
pub type AccelResult<T> = Result<T, AccelError>;

/// hwdec 统一错误类型
#[derive(Debug, Error)]
pub enum HwDecError {
    /// 无效参数
    #[error("无效参数: {0}")]
    InvalidArgument(String),

    /// 无效数据 (损坏的码流等)
    #[error("无效数据: {0}")]
    InvalidData(String),

    /// 不支持的操作
    #[error("不支持的操作: {0}")]
    Unsupported(String),

    /// 已到达数据末尾
    #[error("已到达数据末尾")]
    Eof,

    /// 加速器硬错误, 或忙等待重试耗尽
    #[error("加速器错误: {0}")]
    Accelerator(#[from] AccelError),

    /// 软件解码后端错误
    #[error("软件解码失败: {0}")]
    Software(String),

    /// I/O 错误
    #[error("I/O 错误: {0}")]
    Io(#[from] std::io::Error),
}

/// hwdec 统一 Result 类型
pub type HwDecResult<T> = Result<T, HwDecError>;
