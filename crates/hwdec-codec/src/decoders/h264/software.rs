//! 软件解码变体.
//!
//! 实际解码由外部后端完成, 这里只负责接口适配; 没有自己的 DPB.

use log::debug;

use hwdec_core::HwDecResult;

use crate::access_unit::AccessUnit;
use crate::decoder::{DecodeOutcome, DecodeStatus, Decoder};
use crate::frame::SampleHandle;

/// 软件后端一次调用的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SoftwareOutput {
    /// 消耗的字节数
    pub bytes_used: usize,
    /// 是否产出完整的一帧
    pub frame_complete: bool,
}

/// 外部软件解码后端
pub trait SoftwareBackend: Send {
    /// 解码一段数据, 产出的图像写入 `sample`
    fn decode(&mut self, data: &[u8], sample: &SampleHandle) -> HwDecResult<SoftwareOutput>;

    /// 丢弃内部缓存的图像
    fn flush(&mut self);
}

/// 软件 H.264 解码器
pub struct SoftwareH264Decoder {
    backend: Box<dyn SoftwareBackend>,
}

impl SoftwareH264Decoder {
    pub fn new(backend: Box<dyn SoftwareBackend>) -> Self {
        Self { backend }
    }
}

impl Decoder for SoftwareH264Decoder {
    fn name(&self) -> &str {
        "h264_software"
    }

    fn decode(&mut self, unit: &AccessUnit, sample: &SampleHandle) -> HwDecResult<DecodeOutcome> {
        if unit.discontinuity {
            self.backend.flush();
        }
        let output = self.backend.decode(&unit.data, sample)?;
        debug!(
            "H.264: 软件解码 {} 字节, 消耗 {}, 完整帧={}",
            unit.size(),
            output.bytes_used,
            output.frame_complete
        );
        Ok(DecodeOutcome {
            status: DecodeStatus::Ready,
            bytes_consumed: output.bytes_used,
            frame_ready: output.frame_complete,
            picture: None,
        })
    }

    fn flush(&mut self) {
        self.backend.flush();
    }
}
