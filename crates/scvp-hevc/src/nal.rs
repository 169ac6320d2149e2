//! HEVC NAL 单元与 Annex B 分割.
//!
//! HEVC NAL 头部为 2 字节:
//! - forbidden_zero_bit (1 bit)
//! - nal_unit_type (6 bits)
//! - nuh_layer_id (6 bits)
//! - nuh_temporal_id_plus1 (3 bits)
//!
//! 分割结果只记录偏移, 通过借用访问调用方的输入缓冲区, 不复制数据.

use scvp_core::rbsp::escape_rbsp;
use scvp_core::{ScvpError, ScvpResult};

/// 4 字节起始码
pub const START_CODE: [u8; 4] = [0, 0, 0, 1];

/// HEVC NAL 单元类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NalUnitType {
    /// TRAIL_N
    TrailN,
    /// TRAIL_R
    TrailR,
    /// TSA_N
    TsaN,
    /// TSA_R
    TsaR,
    /// STSA_N
    StsaN,
    /// STSA_R
    StsaR,
    /// RADL_N
    RadlN,
    /// RADL_R
    RadlR,
    /// RASL_N
    RaslN,
    /// RASL_R
    RaslR,
    /// BLA_W_LP
    BlaWLp,
    /// BLA_W_RADL
    BlaWRadl,
    /// BLA_N_LP
    BlaNLp,
    /// IDR_W_RADL
    IdrWRadl,
    /// IDR_N_LP
    IdrNLp,
    /// CRA_NUT
    Cra,
    /// 视频参数集
    Vps,
    /// 序列参数集
    Sps,
    /// 图像参数集
    Pps,
    /// 访问单元分隔符
    Aud,
    /// 序列结束
    Eos,
    /// 码流结束
    Eob,
    /// 填充数据
    FillerData,
    /// 前缀 SEI
    PrefixSei,
    /// 后缀 SEI
    SuffixSei,
    /// 保留或未定义的类型
    Reserved(u8),
}

impl NalUnitType {
    /// 从类型编号创建
    pub fn from_type_id(id: u8) -> Self {
        match id {
            0 => Self::TrailN,
            1 => Self::TrailR,
            2 => Self::TsaN,
            3 => Self::TsaR,
            4 => Self::StsaN,
            5 => Self::StsaR,
            6 => Self::RadlN,
            7 => Self::RadlR,
            8 => Self::RaslN,
            9 => Self::RaslR,
            16 => Self::BlaWLp,
            17 => Self::BlaWRadl,
            18 => Self::BlaNLp,
            19 => Self::IdrWRadl,
            20 => Self::IdrNLp,
            21 => Self::Cra,
            32 => Self::Vps,
            33 => Self::Sps,
            34 => Self::Pps,
            35 => Self::Aud,
            36 => Self::Eos,
            37 => Self::Eob,
            38 => Self::FillerData,
            39 => Self::PrefixSei,
            40 => Self::SuffixSei,
            _ => Self::Reserved(id),
        }
    }

    /// 类型编号
    pub fn type_id(self) -> u8 {
        match self {
            Self::TrailN => 0,
            Self::TrailR => 1,
            Self::TsaN => 2,
            Self::TsaR => 3,
            Self::StsaN => 4,
            Self::StsaR => 5,
            Self::RadlN => 6,
            Self::RadlR => 7,
            Self::RaslN => 8,
            Self::RaslR => 9,
            Self::BlaWLp => 16,
            Self::BlaWRadl => 17,
            Self::BlaNLp => 18,
            Self::IdrWRadl => 19,
            Self::IdrNLp => 20,
            Self::Cra => 21,
            Self::Vps => 32,
            Self::Sps => 33,
            Self::Pps => 34,
            Self::Aud => 35,
            Self::Eos => 36,
            Self::Eob => 37,
            Self::FillerData => 38,
            Self::PrefixSei => 39,
            Self::SuffixSei => 40,
            Self::Reserved(id) => id,
        }
    }

    /// 是否为条带 (编码图像数据)
    ///
    /// 只有 0..=9 与 16..=21 携带条带, 22..=31 为保留的 VCL 类型.
    pub fn is_slice(self) -> bool {
        matches!(self.type_id(), 0..=9 | 16..=21)
    }

    /// 是否为 IRAP
    pub fn is_irap(self) -> bool {
        matches!(self.type_id(), 16..=23)
    }

    /// 是否为 IDR
    pub fn is_idr(self) -> bool {
        matches!(self, Self::IdrWRadl | Self::IdrNLp)
    }

    /// 是否为参数集
    pub fn is_parameter_set(self) -> bool {
        matches!(self, Self::Vps | Self::Sps | Self::Pps)
    }
}

/// 2 字节 NAL 头
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NalHeader {
    /// NAL 类型
    pub nal_type: NalUnitType,
    /// nuh_layer_id
    pub layer_id: u8,
    /// nuh_temporal_id_plus1
    pub temporal_id_plus1: u8,
}

impl NalHeader {
    /// 构造基础层头部
    pub fn new(nal_type: NalUnitType) -> Self {
        Self {
            nal_type,
            layer_id: 0,
            temporal_id_plus1: 1,
        }
    }

    /// 从 NAL 开头两个字节解析
    pub fn parse(data: &[u8]) -> ScvpResult<Self> {
        if data.len() < 2 {
            return Err(ScvpError::InvalidData("HEVC: NAL 数据太短".into()));
        }
        if data[0] & 0x80 != 0 {
            return Err(ScvpError::InvalidData(
                "HEVC: forbidden_zero_bit 非零".into(),
            ));
        }
        Ok(Self {
            nal_type: NalUnitType::from_type_id((data[0] >> 1) & 0x3F),
            layer_id: ((data[0] & 1) << 5) | (data[1] >> 3),
            temporal_id_plus1: data[1] & 0x07,
        })
    }

    /// 序列化为 2 字节
    pub fn to_bytes(self) -> [u8; 2] {
        [
            (self.nal_type.type_id() << 1) | (self.layer_id >> 5),
            ((self.layer_id & 0x1F) << 3) | self.temporal_id_plus1,
        ]
    }
}

/// 输入缓冲区中的一个 NAL 单元
///
/// 只保存偏移, 数据通过借用的输入缓冲区访问.
#[derive(Debug, Clone, Copy)]
pub struct NalUnit<'a> {
    /// NAL 头
    pub header: NalHeader,
    /// 起始码长度 (3 或 4)
    pub start_code_size: usize,
    /// 起始码在输入中的偏移
    pub offset: usize,
    /// NAL 头在输入中的偏移
    pub payload_offset: usize,
    /// NAL 长度 (含 2 字节头, 不含尾随零字节)
    pub payload_length: usize,
    /// 条带头长度 (含 NAL 头, 转义字节计)
    pub slice_header_len: Option<usize>,
    /// 首个 SEI 消息的 payloadType
    pub sei_payload_type: Option<u32>,
    source: &'a [u8],
}

impl<'a> NalUnit<'a> {
    /// NAL 类型
    pub fn nal_type(&self) -> NalUnitType {
        self.header.nal_type
    }

    /// NAL 字节 (含 2 字节头, 不含起始码)
    pub fn bytes(&self) -> &'a [u8] {
        &self.source[self.payload_offset..self.payload_offset + self.payload_length]
    }

    /// NAL 头之后的转义载荷
    pub fn payload(&self) -> &'a [u8] {
        &self.bytes()[2..]
    }

    /// 含起始码的完整字节
    pub fn with_start_code(&self) -> &'a [u8] {
        &self.source[self.offset..self.payload_offset + self.payload_length]
    }

    /// 含起始码的总长度
    pub fn total_len(&self) -> usize {
        self.start_code_size + self.payload_length
    }

    /// 条带数据 (条带头之后的原始字节)
    pub fn slice_data(&self) -> Option<&'a [u8]> {
        self.slice_header_len.map(|len| &self.bytes()[len..])
    }
}

// ============================================================
// Annex B 分割
// ============================================================

/// 查找所有起始码, 返回 (起始码偏移, 起始码长度)
fn find_start_codes(data: &[u8]) -> Vec<(usize, usize)> {
    let mut positions = Vec::new();
    let mut i = 0;
    while i + 2 < data.len() {
        if data[i] == 0 && data[i + 1] == 0 {
            if data[i + 2] == 1 {
                positions.push((i, 3));
                i += 3;
                continue;
            }
            if i + 3 < data.len() && data[i + 2] == 0 && data[i + 3] == 1 {
                positions.push((i, 4));
                i += 4;
                continue;
            }
        }
        i += 1;
    }
    positions
}

/// 将 Annex B 字节流分割为 NAL 单元
///
/// 第一个起始码之前的字节被忽略. 找不到任何起始码时返回错误, 调用方可以补充数据后重试.
pub fn split_annex_b(data: &[u8]) -> ScvpResult<Vec<NalUnit<'_>>> {
    let starts = find_start_codes(data);
    if starts.is_empty() {
        return Err(ScvpError::InvalidData("未找到 Annex B 起始码".into()));
    }

    let mut nalus = Vec::with_capacity(starts.len());
    for (i, &(offset, sc_len)) in starts.iter().enumerate() {
        let end = starts.get(i + 1).map_or(data.len(), |&(next, _)| next);
        let nal_start = offset + sc_len;
        let mut nal_end = end;
        while nal_end > nal_start && data[nal_end - 1] == 0x00 {
            nal_end -= 1;
        }
        if nal_end <= nal_start {
            continue;
        }
        let header = NalHeader::parse(&data[nal_start..nal_end])?;
        nalus.push(NalUnit {
            header,
            start_code_size: sc_len,
            offset,
            payload_offset: nal_start,
            payload_length: nal_end - nal_start,
            slice_header_len: None,
            sei_payload_type: None,
            source: data,
        });
    }
    Ok(nalus)
}

/// 把 RBSP 封装为带 4 字节起始码的 NAL
pub fn write_nal(out: &mut Vec<u8>, header: NalHeader, rbsp: &[u8]) {
    out.extend_from_slice(&START_CODE);
    out.extend_from_slice(&header.to_bytes());
    out.extend_from_slice(&escape_rbsp(rbsp));
}

/// 封装为新的 NAL 字节串
pub fn build_nal(header: NalHeader, rbsp: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(rbsp.len() + 8);
    write_nal(&mut out, header, rbsp);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nal_类型() {
        assert_eq!(NalUnitType::from_type_id(19), NalUnitType::IdrWRadl);
        assert!(NalUnitType::IdrWRadl.is_idr());
        assert!(NalUnitType::Cra.is_irap());
        assert!(NalUnitType::TrailR.is_slice());
        assert!(!NalUnitType::Reserved(25).is_slice());
        assert!(NalUnitType::Pps.is_parameter_set());
        assert_eq!(NalUnitType::Reserved(45).type_id(), 45);
    }

    #[test]
    fn test_nal_头往返() {
        let header = NalHeader::parse(&[0x40, 0x01]).unwrap();
        assert_eq!(header.nal_type, NalUnitType::Vps);
        assert_eq!(header.layer_id, 0);
        assert_eq!(header.temporal_id_plus1, 1);
        assert_eq!(header.to_bytes(), [0x40, 0x01]);

        assert!(NalHeader::parse(&[0xC0, 0x01]).is_err());
        assert!(NalHeader::parse(&[0x40]).is_err());
    }

    #[test]
    fn test_annex_b_分割() {
        let data = [
            0xAA, 0xBB, // 起始码之前的垃圾数据
            0, 0, 0, 1, 0x40, 0x01, 0x0C, // VPS
            0, 0, 1, 0x42, 0x01, 0x01, 0x00, 0x00, // SPS, 含尾随零
            0, 0, 0, 1, 0x26, 0x01, 0xAF, // IDR
        ];
        let nalus = split_annex_b(&data).unwrap();
        assert_eq!(nalus.len(), 3);
        assert_eq!(nalus[0].nal_type(), NalUnitType::Vps);
        assert_eq!(nalus[0].offset, 2);
        assert_eq!(nalus[0].start_code_size, 4);
        assert_eq!(nalus[1].nal_type(), NalUnitType::Sps);
        assert_eq!(nalus[1].start_code_size, 3);
        assert_eq!(nalus[1].bytes(), &[0x42, 0x01, 0x01]);
        assert_eq!(nalus[2].nal_type(), NalUnitType::IdrWRadl);
        assert_eq!(nalus[2].payload(), &[0xAF]);
        assert_eq!(nalus[2].with_start_code(), &[0, 0, 0, 1, 0x26, 0x01, 0xAF]);
    }

    #[test]
    fn test_无起始码() {
        assert!(split_annex_b(&[1, 2, 3, 4]).is_err());
    }

    #[test]
    fn test_写入_nal_插入防竞争字节() {
        let nal = build_nal(NalHeader::new(NalUnitType::PrefixSei), &[0, 0, 1, 0x80]);
        assert_eq!(nal, vec![0, 0, 0, 1, 0x4E, 0x01, 0, 0, 3, 1, 0x80]);
    }
}
