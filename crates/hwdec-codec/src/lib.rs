//! # hwdec-codec
//!
//! H.264 硬件解码管线: 把外部码流解析器的状态翻译成 DXVA 固定布局的
//! 参数/切片/缩放矩阵缓冲区, 按顺序提交给视频加速器, 并管理解码表面池
//! 与显示顺序重排.
//!
//! ## 使用示例
//!
//! ```rust,ignore
//! use hwdec_codec::{AccessUnit, Decoder, DxvaOptions, H264Decoder};
//! use hwdec_codec::decoders::h264::{DxvaParts, HwCompatIssues};
//!
//! let parts = DxvaParts { accelerator, parser, options: DxvaOptions::default() };
//! let mut dec = H264Decoder::connect(HwCompatIssues::empty(), Some(parts), software);
//! let outcome = dec.decode(&AccessUnit::from_data(data), &sample)?;
//! ```

pub mod access_unit;
pub mod decoder;
pub mod decoders;
pub mod frame;
pub mod parsers;

// 重导出常用类型
pub use access_unit::AccessUnit;
pub use decoder::{DecodeOutcome, DecodeStatus, Decoder, SharedDecoder, SkipReason};
pub use decoders::h264::{DxvaOptions, H264Decoder};
pub use frame::{DisplayPicture, FieldType, MediaSample, SampleHandle, TypeSpecificFlags};
