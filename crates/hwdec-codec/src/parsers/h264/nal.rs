//! H.264 NAL (Network Abstraction Layer) 单元切分.
//!
//! # Annex B 格式
//!
//! 使用起始码 `00 00 01` 分隔 NAL 单元, 起始码之间允许出现任意数量的零填充
//! (包括 4 字节起始码 `00 00 00 01` 的前导零).
//!
//! # 长度前缀格式 (AVC1)
//!
//! 每个 NAL 单元前面是 N 字节大端长度:
//! ```text
//! [length: N bytes BE] [NAL data: length bytes]
//! ```
//!
//! # NAL 头部 (1 字节)
//! ```text
//! ┌─────────────────────────────────────┐
//! │ forbidden(1) | ref_idc(2) | type(5) │
//! └─────────────────────────────────────┘
//! ```

/// Annex B 起始码
pub const START_CODE: [u8; 3] = [0x00, 0x00, 0x01];

/// NAL 单元类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum NalUnitType {
    /// 非 IDR 图像切片 (P/B slice)
    Slice,
    /// 数据分区 A
    SliceDpa,
    /// 数据分区 B
    SliceDpb,
    /// 数据分区 C
    SliceDpc,
    /// IDR 图像切片
    SliceIdr,
    /// 增补增强信息 (SEI)
    Sei,
    /// 序列参数集 (SPS)
    Sps,
    /// 图像参数集 (PPS)
    Pps,
    /// 访问单元分隔符 (AUD)
    Aud,
    /// 序列结束
    EndOfSequence,
    /// 流结束
    EndOfStream,
    /// 填充数据
    Filler,
    /// 未知类型
    Unknown(u8),
}

impl NalUnitType {
    /// 从 NAL 类型编号创建
    pub fn from_type_id(type_id: u8) -> Self {
        match type_id {
            1 => Self::Slice,
            2 => Self::SliceDpa,
            3 => Self::SliceDpb,
            4 => Self::SliceDpc,
            5 => Self::SliceIdr,
            6 => Self::Sei,
            7 => Self::Sps,
            8 => Self::Pps,
            9 => Self::Aud,
            10 => Self::EndOfSequence,
            11 => Self::EndOfStream,
            12 => Self::Filler,
            _ => Self::Unknown(type_id),
        }
    }

    /// 获取类型编号
    pub fn type_id(&self) -> u8 {
        match self {
            Self::Slice => 1,
            Self::SliceDpa => 2,
            Self::SliceDpb => 3,
            Self::SliceDpc => 4,
            Self::SliceIdr => 5,
            Self::Sei => 6,
            Self::Sps => 7,
            Self::Pps => 8,
            Self::Aud => 9,
            Self::EndOfSequence => 10,
            Self::EndOfStream => 11,
            Self::Filler => 12,
            Self::Unknown(id) => *id,
        }
    }

    /// 是否需要写入硬件码流缓冲 (普通切片与 IDR 切片)
    ///
    /// 数据分区切片不在 DXVA 的 VLD 模式支持范围内.
    pub fn is_hw_slice(&self) -> bool {
        matches!(self, Self::Slice | Self::SliceIdr)
    }

    /// 是否为关键帧 (IDR)
    pub fn is_idr(&self) -> bool {
        matches!(self, Self::SliceIdr)
    }
}

impl std::fmt::Display for NalUnitType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Slice => write!(f, "Slice"),
            Self::SliceDpa => write!(f, "SliceDPA"),
            Self::SliceDpb => write!(f, "SliceDPB"),
            Self::SliceDpc => write!(f, "SliceDPC"),
            Self::SliceIdr => write!(f, "IDR"),
            Self::Sei => write!(f, "SEI"),
            Self::Sps => write!(f, "SPS"),
            Self::Pps => write!(f, "PPS"),
            Self::Aud => write!(f, "AUD"),
            Self::EndOfSequence => write!(f, "EndOfSeq"),
            Self::EndOfStream => write!(f, "EndOfStream"),
            Self::Filler => write!(f, "Filler"),
            Self::Unknown(id) => write!(f, "Unknown({id})"),
        }
    }
}

/// 单次切分过程中的 NAL 单元视图
///
/// 只借用源缓冲区, 不复制数据.
#[derive(Debug, Clone, Copy)]
pub struct NalUnit<'a> {
    /// NAL 单元类型
    pub nal_type: NalUnitType,
    /// nal_ref_idc (参考重要性, 0 表示非参考)
    pub ref_idc: u8,
    /// forbidden_zero_bit, 合法码流应为 false
    pub forbidden_bit: bool,
    /// 起始码或长度前缀在源缓冲区中的偏移
    pub start: usize,
    /// NAL 头部字节在源缓冲区中的偏移
    pub payload_offset: usize,
    /// NAL 数据 (含头部字节, 不含起始码/长度前缀)
    pub payload: &'a [u8],
}

impl NalUnit<'_> {
    /// NAL 数据长度 (含头部字节)
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// 是否为空单元
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// 起始码/前缀 + 数据在源缓冲区中占用的字节数
    pub fn total_len(&self) -> usize {
        self.payload_offset - self.start + self.payload.len()
    }

    /// 是否为参考单元
    pub fn is_reference(&self) -> bool {
        self.ref_idc != 0
    }

    fn from_payload(start: usize, payload_offset: usize, payload: &[u8]) -> NalUnit<'_> {
        let header = payload.first().copied().unwrap_or(0);
        NalUnit {
            nal_type: NalUnitType::from_type_id(header & 0x1F),
            ref_idc: (header >> 5) & 0x03,
            forbidden_bit: (header >> 7) & 1 != 0,
            start,
            payload_offset,
            payload,
        }
    }
}

/// NAL 单元读取器
///
/// 对一个访问单元按需逐个产出 NAL 单元. `length_size` 为 0 表示 Annex B,
/// 否则表示每个单元前的大端长度字节数 (1-4).
#[derive(Debug, Clone)]
pub struct NalReader<'a> {
    data: &'a [u8],
    length_size: usize,
    pos: usize,
}

impl<'a> NalReader<'a> {
    /// 创建读取器
    pub fn new(data: &'a [u8], length_size: usize) -> Self {
        Self {
            data,
            length_size,
            pos: 0,
        }
    }

    /// 源数据
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// 当前游标位置
    pub fn position(&self) -> usize {
        self.pos
    }

    /// 是否已经读完
    pub fn is_eof(&self) -> bool {
        self.pos >= self.data.len()
    }

    fn read_length_prefixed(&mut self) -> Option<NalUnit<'a>> {
        if !(1..=4).contains(&self.length_size) {
            self.pos = self.data.len();
            return None;
        }

        let start = self.pos;
        let payload_offset = start.checked_add(self.length_size)?;
        if payload_offset > self.data.len() {
            self.pos = self.data.len();
            return None;
        }

        let nal_len = self.data[start..payload_offset]
            .iter()
            .fold(0usize, |acc, b| (acc << 8) | usize::from(*b));
        let end = payload_offset + nal_len;
        if end > self.data.len() {
            // 声明长度超出缓冲区, 视为截断
            self.pos = self.data.len();
            return None;
        }

        self.pos = end;
        Some(NalUnit::from_payload(
            start,
            payload_offset,
            &self.data[payload_offset..end],
        ))
    }

    fn read_annex_b(&mut self) -> Option<NalUnit<'a>> {
        loop {
            // 跳过零填充, 定位到起始码
            let start = find_start_code(self.data, self.pos)?;
            let payload_offset = start + START_CODE.len();
            if payload_offset >= self.data.len() {
                self.pos = self.data.len();
                return None;
            }

            let next = find_start_code(self.data, payload_offset).unwrap_or(self.data.len());
            self.pos = next;

            // 去除尾部零字节 (trailing_zero_8bits / 4 字节起始码的前导零)
            let mut end = next;
            while end > payload_offset && self.data[end - 1] == 0x00 {
                end -= 1;
            }
            // 两个起始码之间只有零字节时继续找下一个
            if end > payload_offset {
                return Some(NalUnit::from_payload(
                    start,
                    payload_offset,
                    &self.data[payload_offset..end],
                ));
            }
        }
    }
}

impl<'a> Iterator for NalReader<'a> {
    type Item = NalUnit<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.is_eof() {
            return None;
        }
        if self.length_size == 0 {
            self.read_annex_b()
        } else {
            self.read_length_prefixed()
        }
    }
}

/// 从 `from` 开始查找下一个 `00 00 01` 起始码
///
/// 剩余不足 4 字节时不再扫描.
fn find_start_code(data: &[u8], from: usize) -> Option<usize> {
    if data.len() < 4 {
        return None;
    }
    (from..data.len() - 3).find(|&i| data[i] == 0x00 && data[i + 1] == 0x00 && data[i + 2] == 0x01)
}

/// 移除 emulation prevention 字节 (0x00 0x00 0x03 → 0x00 0x00)
pub fn remove_emulation_prevention(data: &[u8]) -> Vec<u8> {
    let mut rbsp = Vec::with_capacity(data.len());
    let mut i = 0;

    while i < data.len() {
        let is_emulation_prevention =
            i + 2 < data.len() && data[i] == 0x00 && data[i + 1] == 0x00 && data[i + 2] == 0x03;
        if is_emulation_prevention {
            rbsp.push(0x00);
            rbsp.push(0x00);
            i += 3;
        } else {
            rbsp.push(data[i]);
            i += 1;
        }
    }

    rbsp
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect_types(data: &[u8], length_size: usize) -> Vec<NalUnitType> {
        NalReader::new(data, length_size)
            .map(|nal| nal.nal_type)
            .collect()
    }

    #[test]
    fn test_nal_type_type_id() {
        for id in 0..=12 {
            let nt = NalUnitType::from_type_id(id);
            assert_eq!(nt.type_id(), id);
        }
        assert!(NalUnitType::SliceIdr.is_hw_slice());
        assert!(NalUnitType::Slice.is_hw_slice());
        assert!(!NalUnitType::SliceDpa.is_hw_slice());
        assert!(!NalUnitType::Sps.is_hw_slice());
    }

    #[test]
    fn test_annex_b_header_fields() {
        let data = [0x00, 0x00, 0x01, 0x67, 0x42, 0x00, 0x1E, 0x00, 0x00, 0x01, 0x06, 0x05, 0x80];
        let nalus: Vec<_> = NalReader::new(&data, 0).collect();
        assert_eq!(nalus.len(), 2);
        assert_eq!(nalus[0].nal_type, NalUnitType::Sps);
        assert_eq!(nalus[0].ref_idc, 3);
        assert!(!nalus[0].forbidden_bit);
        assert_eq!(nalus[0].start, 0);
        assert_eq!(nalus[0].payload_offset, 3);
        assert_eq!(nalus[0].payload, &[0x67, 0x42, 0x00, 0x1E]);
        assert_eq!(nalus[1].nal_type, NalUnitType::Sei);
        assert_eq!(nalus[1].ref_idc, 0);
        assert!(!nalus[1].is_reference());
    }

    #[test]
    fn test_annex_b_padding_is_ignored() {
        let plain = [
            0x00, 0x00, 0x01, 0x67, 0xAA, // SPS
            0x00, 0x00, 0x01, 0x68, 0xBB, // PPS
            0x00, 0x00, 0x01, 0x65, 0xCC, 0xDD, // IDR
        ];
        let padded = [
            0x00, 0x00, 0x00, 0x00, 0x01, 0x67, 0xAA, // 前导零填充
            0x00, 0x00, 0x00, 0x01, 0x68, 0xBB, // 4 字节起始码
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x65, 0xCC, 0xDD, // 额外零填充
        ];

        let plain_units: Vec<_> = NalReader::new(&plain, 0)
            .map(|n| (n.nal_type, n.payload.to_vec()))
            .collect();
        let padded_units: Vec<_> = NalReader::new(&padded, 0)
            .map(|n| (n.nal_type, n.payload.to_vec()))
            .collect();
        assert_eq!(plain_units, padded_units, "零填充不应影响切分结果");
    }

    #[test]
    fn test_annex_b_without_start_code_yields_nothing() {
        assert!(collect_types(&[0x12, 0x34, 0x56, 0x78, 0x9A], 0).is_empty());
        assert!(collect_types(&[0x00, 0x00, 0x01], 0).is_empty());
    }

    #[test]
    fn test_annex_b_last_unit_runs_to_end() {
        let data = [0x00, 0x00, 0x01, 0x41, 0x9A, 0x01, 0x02];
        let nalus: Vec<_> = NalReader::new(&data, 0).collect();
        assert_eq!(nalus.len(), 1);
        assert_eq!(nalus[0].nal_type, NalUnitType::Slice);
        assert_eq!(nalus[0].len(), 4);
        assert_eq!(nalus[0].total_len(), 7);
    }

    #[test]
    fn test_length_prefixed_cursor_advance() {
        let mut data = Vec::new();
        data.extend_from_slice(&[0x00, 0x00, 0x00, 0x03]);
        data.extend_from_slice(&[0x67, 0xAA, 0xBB]);
        data.extend_from_slice(&[0x00, 0x00, 0x00, 0x02]);
        data.extend_from_slice(&[0x65, 0xCC]);

        let mut reader = NalReader::new(&data, 4);
        let first = reader.next().expect("应读到第一个 NAL");
        assert_eq!(first.nal_type, NalUnitType::Sps);
        assert_eq!(first.len(), 3);
        assert_eq!(reader.position(), 3 + 4, "长度 L 的单元应前进 L+4 字节");

        let second = reader.next().expect("应读到第二个 NAL");
        assert_eq!(second.nal_type, NalUnitType::SliceIdr);
        assert_eq!(second.start, 7);
        assert_eq!(second.payload_offset, 11);
        assert_eq!(reader.position(), 7 + 2 + 4);
        assert!(reader.next().is_none());
    }

    #[test]
    fn test_length_prefixed_two_byte_prefix() {
        let data = [0x00, 0x02, 0x68, 0xCE, 0x00, 0x01, 0x09];
        assert_eq!(
            collect_types(&data, 2),
            vec![NalUnitType::Pps, NalUnitType::Aud]
        );
    }

    #[test]
    fn test_length_prefixed_truncated_unit_stops() {
        let data = [0x00, 0x00, 0x00, 0x10, 0x65, 0x88];
        assert!(collect_types(&data, 4).is_empty(), "截断的单元不应产出");
    }

    #[test]
    fn test_length_prefixed_invalid_size() {
        let data = [0x00, 0x00, 0x00, 0x02, 0x67, 0xAA];
        assert!(collect_types(&data, 5).is_empty(), "length_size>4 应直接返回空");
    }

    #[test]
    fn test_annex_b_skips_long_run_of_empty_units() {
        let mut data = Vec::new();
        for _ in 0..100_000 {
            data.extend_from_slice(&[0x00, 0x00, 0x01]);
        }
        data.extend_from_slice(&[0x00, 0x00, 0x01, 0x65, 0x88, 0x80]);

        let nalus: Vec<_> = NalReader::new(&data, 0).collect();
        assert_eq!(nalus.len(), 1, "空单元不应产出");
        assert_eq!(nalus[0].nal_type, NalUnitType::SliceIdr);
        assert_eq!(nalus[0].start, 300_000);
    }

    #[test]
    fn test_forbidden_bit_is_reported() {
        let data = [0x00, 0x00, 0x01, 0xE7, 0x00, 0x01];
        let nalus: Vec<_> = NalReader::new(&data, 0).collect();
        assert_eq!(nalus.len(), 1);
        assert!(nalus[0].forbidden_bit);
    }

    #[test]
    fn test_emulation_prevention_remove() {
        let data = [0x01, 0x00, 0x00, 0x03, 0x02, 0x03];
        assert_eq!(
            remove_emulation_prevention(&data),
            vec![0x01, 0x00, 0x00, 0x02, 0x03]
        );
    }
}
