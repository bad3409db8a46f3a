//! H.264/AVC 码流解析.
//!
//! 硬件解码管线只需要少量的码流知识:
//! - NAL 单元切分与类型识别 (Annex B 与长度前缀两种格式)
//! - 切片头前两个语法元素 (first_mb_in_slice, slice_type)
//! - 与外部码流解析器协作的类型化状态接口

pub mod nal;
pub mod slice;
pub mod state;

pub use nal::{NalReader, NalUnit, NalUnitType, remove_emulation_prevention};
pub use slice::{SliceKind, SlicePrefix, parse_slice_prefix};
pub use state::{
    BitstreamParser, ParseReport, PictureParamState, PictureState, RefListEntry, RefPicture,
    SeiPicStruct, SequenceState, SliceState,
};
