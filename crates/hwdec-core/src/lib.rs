//! # hwdec-core
//!
//! hwdec 硬件解码管线的核心库, 提供错误类型、时间戳约定和比特流读取工具.

pub mod bitreader;
pub mod error;
pub mod timestamp;

// 重导出常用类型
pub use error::{AccelError, AccelResult, HwDecError, HwDecResult};
pub use timestamp::{NOPTS_VALUE, ReferenceTime};
