//! NAL 扫描器.
//!
//! 把 Annex B 输入分割为 NAL, 解析其中的参数集并写入参数集表, 解析条带头得到
//! 条带数据的起始位置. 扫描是原子的: 先在参数集表的副本上工作, 整个调用成功后
//! 才提交.

use log::{debug, trace};

use scvp_core::rbsp::unescape_rbsp;
use scvp_core::{ScvpError, ScvpResult};

use crate::nal::{NalUnit, NalUnitType, split_annex_b};
use crate::params::{Pps, Sps, Vps};
use crate::slice::{SliceHeader, SliceType, peek_pps_id};
use crate::store::ParameterSetStore;

/// 扫描模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScanMode {
    /// 流拼接: 读到图像的第一个条带为止
    StitchOnly,
    /// 高低分辨率合并: 处理一个访问单元
    MergeAndViewport,
    /// 处理一个访问单元
    ParseAllNals,
    /// 只处理第一个 NAL
    ParseOneNal,
}

impl ScanMode {
    fn is_access_unit(self) -> bool {
        matches!(self, Self::MergeAndViewport | Self::ParseAllNals)
    }
}

/// 条带 NAL 在输入中的位置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NalInfo {
    /// 起始码偏移
    pub offset: usize,
    /// 含起始码的长度
    pub length: usize,
}

/// 已解析头部的条带
#[derive(Debug, Clone)]
pub struct ParsedSlice<'a> {
    /// 条带 NAL
    pub nal: NalUnit<'a>,
    /// 条带段头
    pub header: SliceHeader,
}

/// 一次扫描的结果
#[derive(Debug, Clone, Default)]
pub struct ScanReport<'a> {
    /// 本次处理的全部 NAL
    pub nal_units: Vec<NalUnit<'a>>,
    /// 其中的条带, 按出现顺序
    pub slices: Vec<ParsedSlice<'a>>,
    /// 生效 PPS 的 tile 列数
    pub tile_columns: u32,
    /// 生效 PPS 的 tile 行数
    pub tile_rows: u32,
    /// 第一个条带的类型
    pub slice_type: Option<SliceType>,
    /// 第一个条带的 slice_pic_order_cnt_lsb (IDR 为 0)
    pub pic_order_cnt_lsb: u32,
    /// 第一个条带之前的字节数 (参数集等前缀)
    pub special_len: usize,
    /// 本次消耗的字节数
    pub consumed: usize,
}

impl<'a> ScanReport<'a> {
    /// 每个条带 NAL 的位置, 按 tile 顺序
    pub fn nal_info(&self) -> Vec<NalInfo> {
        self.slices
            .iter()
            .map(|s| NalInfo {
                offset: s.nal.offset,
                length: s.nal.total_len(),
            })
            .collect()
    }

    /// 第一个 NAL
    pub fn first_nal(&self) -> Option<&NalUnit<'a>> {
        self.nal_units.first()
    }

    /// 第一个条带是否为 IDR
    pub fn is_idr(&self) -> bool {
        self.slices
            .first()
            .is_some_and(|s| s.header.is_idr())
    }
}

/// NAL 扫描器
#[derive(Debug, Clone, Copy)]
pub struct NalScanner {
    mode: ScanMode,
}

impl NalScanner {
    /// 创建扫描器
    pub fn new(mode: ScanMode) -> Self {
        Self { mode }
    }

    /// 扫描模式
    pub fn mode(&self) -> ScanMode {
        self.mode
    }

    /// 扫描输入, 成功时把新解析的参数集提交到 `store`
    ///
    /// 携带的参数集前缀可以先单独扫描一次, 参数集表会在多次调用之间累积.
    pub fn scan<'a>(&self, store: &mut ParameterSetStore, data: &'a [u8]) -> ScvpResult<ScanReport<'a>> {
        if data.is_empty() {
            return Err(ScvpError::EmptyInput("码流"));
        }
        let nalus = split_annex_b(data)?;
        let mut staged = store.clone();
        let mut report = ScanReport {
            special_len: data.len(),
            consumed: data.len(),
            ..ScanReport::default()
        };

        for mut nal in nalus {
            if nal.header.layer_id != 0 {
                return Err(ScvpError::InvalidArgument(format!(
                    "不支持 nuh_layer_id={} 的 NAL",
                    nal.header.layer_id
                )));
            }
            let nal_type = nal.nal_type();
            let seen_slice = !report.slices.is_empty();
            trace!("NAL: 类型 {:?}, 偏移 {}, 长度 {}", nal_type, nal.offset, nal.payload_length);

            match nal_type {
                t if t.is_slice() => {
                    let pps_id = peek_pps_id(nal.bytes())?;
                    let (sps, pps) = staged.resolve(pps_id)?;
                    let header = SliceHeader::parse(nal.bytes(), &sps, &pps)?;
                    if self.mode.is_access_unit() && seen_slice && header.first_slice_segment_in_pic {
                        report.consumed = nal.offset;
                        break;
                    }
                    nal.slice_header_len = Some(header.header_len);
                    if !seen_slice {
                        report.special_len = nal.offset;
                        report.tile_columns = pps.tiles.columns;
                        report.tile_rows = pps.tiles.rows;
                        report.pic_order_cnt_lsb = header.pic_order_cnt_lsb;
                    }
                    if report.slice_type.is_none() {
                        report.slice_type = header.slice_type;
                    }
                    report.slices.push(ParsedSlice { nal, header });
                }
                NalUnitType::Vps | NalUnitType::Sps | NalUnitType::Pps
                | NalUnitType::Aud | NalUnitType::PrefixSei
                    if self.mode.is_access_unit() && seen_slice =>
                {
                    report.consumed = nal.offset;
                    break;
                }
                NalUnitType::Vps => staged.insert_vps(Vps::parse(nal.bytes())?)?,
                NalUnitType::Sps => staged.insert_sps(Sps::parse(nal.bytes())?)?,
                NalUnitType::Pps => staged.insert_pps(Pps::parse(nal.bytes())?)?,
                NalUnitType::PrefixSei | NalUnitType::SuffixSei => {
                    nal.sei_payload_type = first_sei_payload_type(nal.payload());
                }
                _ => {}
            }

            report.nal_units.push(nal);
            let stop = match self.mode {
                ScanMode::ParseOneNal => true,
                ScanMode::StitchOnly => nal.slice_header_len.is_some(),
                _ => false,
            };
            if stop {
                report.consumed = nal.payload_offset + nal.payload_length;
                break;
            }
        }

        if report.slices.is_empty() {
            if let Some(pps) = staged.last_pps() {
                report.tile_columns = pps.tiles.columns;
                report.tile_rows = pps.tiles.rows;
            }
            report.special_len = report.consumed;
        }
        debug!(
            "扫描完成: {} 个 NAL, {} 个条带, 前缀 {} 字节, 消耗 {} 字节",
            report.nal_units.len(),
            report.slices.len(),
            report.special_len,
            report.consumed
        );
        *store = staged;
        Ok(report)
    }
}

/// 读取 SEI 中第一条消息的 payloadType
fn first_sei_payload_type(payload: &[u8]) -> Option<u32> {
    let rbsp = unescape_rbsp(&payload[..payload.len().min(16)]);
    let mut value = 0u32;
    for &b in &rbsp {
        value += u32::from(b);
        if b != 0xFF {
            return Some(value);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{SliceParams, StreamParams};
    use crate::nal::START_CODE;

    fn tiled() -> StreamParams {
        StreamParams {
            tile_columns: 2,
            tile_rows: 2,
            ..StreamParams::new(512, 256)
        }
    }

    fn two_frames(params: &StreamParams) -> Vec<u8> {
        let payloads = vec![vec![0x11, 0x80]; 4];
        let mut data = params.frame(true, NalUnitType::IdrWRadl, SliceType::I, 0, &payloads);
        data.extend(params.frame(false, NalUnitType::TrailR, SliceType::P, 1, &payloads));
        data
    }

    #[test]
    fn test_访问单元模式只处理一帧() {
        let params = tiled();
        let data = two_frames(&params);
        let mut store = ParameterSetStore::new();
        let report = NalScanner::new(ScanMode::ParseAllNals)
            .scan(&mut store, &data)
            .unwrap();
        assert_eq!(report.slices.len(), 4);
        assert_eq!((report.tile_columns, report.tile_rows), (2, 2));
        assert_eq!(report.slice_type, Some(SliceType::I));
        assert!(report.is_idr());
        assert_eq!(report.special_len, params.parameter_sets().len());

        let infos = report.nal_info();
        assert_eq!(infos.len(), 4);
        assert_eq!(infos[0].offset, report.special_len);
        assert_eq!(report.consumed, infos[3].offset + infos[3].length);

        // 剩余部分是第二帧
        let rest = NalScanner::new(ScanMode::ParseAllNals)
            .scan(&mut store, &data[report.consumed..])
            .unwrap();
        assert_eq!(rest.slices.len(), 4);
        assert_eq!(rest.slice_type, Some(SliceType::P));
        assert_eq!(rest.pic_order_cnt_lsb, 1);
        assert_eq!(rest.special_len, 0);
    }

    #[test]
    fn test_拼接模式在首个条带后停止() {
        let data = two_frames(&tiled());
        let mut store = ParameterSetStore::new();
        let report = NalScanner::new(ScanMode::StitchOnly)
            .scan(&mut store, &data)
            .unwrap();
        assert_eq!(report.slices.len(), 1);
        assert_eq!(report.nal_units.len(), 4);
        let slice = &report.slices[0];
        assert_eq!(slice.nal.slice_data(), Some(&[0x11, 0x80][..]));
    }

    #[test]
    fn test_逐个_nal_累积上下文() {
        let params = tiled();
        let data = params.frame(true, NalUnitType::IdrWRadl, SliceType::I, 0, &[vec![0x80]]);
        let scanner = NalScanner::new(ScanMode::ParseOneNal);
        let mut store = ParameterSetStore::new();

        // 跳过 VPS/SPS/PPS 直接给条带: 缺少参数集
        let slice_start = params.parameter_sets().len();
        let err = scanner.scan(&mut store, &data[slice_start..]).unwrap_err();
        assert!(matches!(err, ScvpError::NoValue(_)));

        let mut offset = 0;
        for expected in [NalUnitType::Vps, NalUnitType::Sps, NalUnitType::Pps, NalUnitType::IdrWRadl] {
            let report = scanner.scan(&mut store, &data[offset..]).unwrap();
            assert_eq!(report.nal_units.len(), 1);
            assert_eq!(report.nal_units[0].nal_type(), expected);
            offset += report.consumed;
        }
        assert!(store.is_ready());
    }

    #[test]
    fn test_截断输入不修改参数集表() {
        let params = tiled();
        let mut store = ParameterSetStore::new();
        let before = store.clone();
        let mut data = START_CODE.to_vec();
        data.extend(params.vps_nal());
        data.extend(START_CODE);
        let pps = params.pps_nal();
        data.extend(&pps[..pps.len() - 2]);
        assert!(NalScanner::new(ScanMode::ParseAllNals).scan(&mut store, &data).is_err());
        assert_eq!(store, before);
    }

    #[test]
    fn test_非零层_id() {
        let data = [0, 0, 0, 1, 0x40, 0x09, 0x0C];
        let mut store = ParameterSetStore::new();
        let err = NalScanner::new(ScanMode::ParseAllNals)
            .scan(&mut store, &data)
            .unwrap_err();
        assert_eq!(err.code(), scvp_core::ErrorCode::BadParam);
    }

    #[test]
    fn test_无起始码与空输入() {
        let mut store = ParameterSetStore::new();
        let scanner = NalScanner::new(ScanMode::ParseAllNals);
        assert!(matches!(scanner.scan(&mut store, &[1, 2, 3]), Err(ScvpError::InvalidData(_))));
        assert!(matches!(scanner.scan(&mut store, &[]), Err(ScvpError::EmptyInput(_))));
    }

    #[test]
    fn test_sei_payload_type() {
        assert_eq!(first_sei_payload_type(&[0x9B, 0x10]), Some(155));
        assert_eq!(first_sei_payload_type(&[0xFF, 0x05]), Some(260));
        assert_eq!(first_sei_payload_type(&[0xFF]), None);
    }
}
