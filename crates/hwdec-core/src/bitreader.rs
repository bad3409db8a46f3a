//! 比特流读取器.
//!
//! MSB 优先读取字节缓冲区, 只覆盖切片头前缀需要的定长字段与 ue(v).

use crate::{HwDecError, HwDecResult};

/// ue(v) 前导零的上限, 超过时结果不能放进 u32
const MAX_LEADING_ZEROS: u32 = 31;

/// 比特流读取器
///
/// # 示例
/// ```
/// use hwdec_core::bitreader::BitReader;
///
/// // first_mb_in_slice = 0 ("1"), slice_type = 7 ("0001000")
/// let data = [0b1000_1000];
/// let mut br = BitReader::new(&data);
/// assert_eq!(br.read_ue().unwrap(), 0);
/// assert_eq!(br.read_ue().unwrap(), 7);
/// ```
pub struct BitReader<'a> {
    data: &'a [u8],
    /// 已读取的位数
    pos: usize,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// 已读取的位数
    pub fn bits_read(&self) -> usize {
        self.pos
    }

    /// 剩余可读位数
    pub fn bits_left(&self) -> usize {
        (self.data.len() * 8).saturating_sub(self.pos)
    }

    /// 读取 1 位
    pub fn read_bit(&mut self) -> HwDecResult<bool> {
        let byte = self.data.get(self.pos / 8).ok_or(HwDecError::Eof)?;
        let bit = byte & (0x80 >> (self.pos % 8)) != 0;
        self.pos += 1;
        Ok(bit)
    }

    /// 读取 `n` 位 (n <= 32)
    pub fn read_bits(&mut self, n: u32) -> HwDecResult<u32> {
        if n > 32 {
            return Err(HwDecError::InvalidArgument(format!(
                "read_bits: n={n} 超过 32 位"
            )));
        }
        if n as usize > self.bits_left() {
            return Err(HwDecError::Eof);
        }
        let mut value = 0u64;
        for _ in 0..n {
            value = (value << 1) | u64::from(self.read_bit()?);
        }
        Ok(value as u32)
    }

    /// 读取无符号 Exp-Golomb 编码 ue(v)
    pub fn read_ue(&mut self) -> HwDecResult<u32> {
        let mut leading_zeros = 0;
        while !self.read_bit()? {
            leading_zeros += 1;
            if leading_zeros > MAX_LEADING_ZEROS {
                return Err(HwDecError::InvalidData(
                    "Exp-Golomb 前导零超过 31 位".into(),
                ));
            }
        }
        let suffix = self.read_bits(leading_zeros)?;
        let value = (1u64 << leading_zeros) - 1 + u64::from(suffix);
        u32::try_from(value).map_err(|_| {
            HwDecError::InvalidData(format!("Exp-Golomb 值超出 u32 范围, value={value}"))
        })
    }
}
