//! 条带段头解析.
//!
//! 解析到 byte_alignment() 为止, 得到条带数据的起始位置, 并记录改写时需要替换的
//! 语法区间:
//!
//! ```text
//! first_slice_segment_in_pic_flag
//! [no_output_of_prior_pics_flag]
//! slice_pic_parameter_set_id          <- pps_id_bits
//! [dependent_slice_segment_flag]
//! [slice_segment_address]
//! ... 条带类型, POC, 参考图像, QP ...  <- body_bits (原样复制)
//! [num_entry_point_offsets ...]        <- entry_point_bits
//! [slice_segment_header_extension]     <- extension_bits
//! byte_alignment()
//! ```

use std::ops::Range;

use scvp_core::rbsp::{escaped_len, unescape_rbsp};
use scvp_core::{BitReader, ScvpError, ScvpResult};

use crate::nal::NalHeader;
use crate::params::{Pps, ShortTermRps, Sps, address_bits};

/// 先尝试只去转义这么多字节解析条带头, 不够时再处理整个 NAL
const HEADER_PROBE_BYTES: usize = 512;

/// 条带类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SliceType {
    /// B 条带
    B,
    /// P 条带
    P,
    /// I 条带
    I,
}

impl SliceType {
    /// 从 slice_type 语法值创建
    pub fn from_value(v: u32) -> ScvpResult<Self> {
        match v {
            0 => Ok(Self::B),
            1 => Ok(Self::P),
            2 => Ok(Self::I),
            _ => Err(ScvpError::InvalidData(format!("无效的 slice_type: {}", v))),
        }
    }

    /// AUD 中 pic_type 的取值
    pub fn aud_pic_type(self) -> u32 {
        match self {
            Self::I => 0,
            Self::P => 1,
            Self::B => 2,
        }
    }
}

/// 条带段头
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SliceHeader {
    /// NAL 头
    pub nal_header: NalHeader,
    /// first_slice_segment_in_pic_flag
    pub first_slice_segment_in_pic: bool,
    /// no_output_of_prior_pics_flag (仅 IRAP)
    pub no_output_of_prior_pics: Option<bool>,
    /// slice_pic_parameter_set_id
    pub pps_id: u32,
    /// dependent_slice_segment_flag
    pub dependent_slice_segment: bool,
    /// slice_segment_address
    pub segment_address: u32,
    /// slice_type (依赖条带段继承前一段, 此处为 None)
    pub slice_type: Option<SliceType>,
    /// slice_pic_order_cnt_lsb (IDR 为 0)
    pub pic_order_cnt_lsb: u32,
    /// num_entry_point_offsets
    pub num_entry_point_offsets: u32,
    /// 条带头的 RBSP (含 byte_alignment)
    pub rbsp: Vec<u8>,
    /// slice_pic_parameter_set_id 的位区间
    pub pps_id_bits: Range<usize>,
    /// 地址之后到入口点之前的位区间
    pub body_bits: Range<usize>,
    /// 入口点语法的位区间 (tile 或 WPP 启用时存在)
    pub entry_point_bits: Option<Range<usize>>,
    /// 条带头扩展的位区间
    pub extension_bits: Range<usize>,
    /// 条带头在原始 NAL 中的字节长度 (含 2 字节 NAL 头, 按转义后计)
    pub header_len: usize,
}

impl SliceHeader {
    /// 从完整的条带 NAL (含 2 字节头) 解析
    pub fn parse(nal: &[u8], sps: &Sps, pps: &Pps) -> ScvpResult<Self> {
        let nal_header = NalHeader::parse(nal)?;
        let payload = &nal[2..];

        let probe_len = payload.len().min(HEADER_PROBE_BYTES);
        let probe = unescape_rbsp(&payload[..probe_len]);
        let result = parse_rbsp(nal_header, &probe, sps, pps);
        let (mut header, header_bytes) = match result {
            Err(ScvpError::Eof) if probe_len < payload.len() => {
                let full = unescape_rbsp(payload);
                parse_rbsp(nal_header, &full, sps, pps)?
            }
            other => other?,
        };

        header.header_len = escaped_len(payload, header_bytes).ok_or(ScvpError::Eof)? + 2;
        Ok(header)
    }

    /// IDR 条带
    pub fn is_idr(&self) -> bool {
        self.nal_header.nal_type.is_idr()
    }
}

/// 只读取条带引用的 slice_pic_parameter_set_id
pub fn peek_pps_id(nal: &[u8]) -> ScvpResult<u32> {
    let nal_header = NalHeader::parse(nal)?;
    let payload = &nal[2..];
    let rbsp = unescape_rbsp(&payload[..payload.len().min(16)]);
    let mut br = BitReader::new(&rbsp);
    br.skip_bits(1)?; // first_slice_segment_in_pic_flag
    if nal_header.nal_type.is_irap() {
        br.skip_bits(1)?; // no_output_of_prior_pics_flag
    }
    br.read_ue()
}

fn parse_rbsp(
    nal_header: NalHeader,
    rbsp: &[u8],
    sps: &Sps,
    pps: &Pps,
) -> ScvpResult<(SliceHeader, usize)> {
    let nal_type = nal_header.nal_type;
    let mut br = BitReader::new(rbsp);

    let first_slice_segment_in_pic = br.read_flag()?;
    let no_output_of_prior_pics = if nal_type.is_irap() {
        Some(br.read_flag()?)
    } else {
        None
    };
    let pps_id_start = br.position();
    let pps_id = br.read_ue()?;
    let pps_id_bits = pps_id_start..br.position();
    if pps_id != u32::from(pps.pps_id) {
        return Err(ScvpError::InvalidData(format!(
            "条带引用 PPS {}, 当前 PPS 为 {}",
            pps_id, pps.pps_id
        )));
    }

    let mut dependent_slice_segment = false;
    let mut segment_address = 0;
    if !first_slice_segment_in_pic {
        if pps.dependent_slice_segments_enabled {
            dependent_slice_segment = br.read_flag()?;
        }
        segment_address = br.read_bits(address_bits(sps.pic_size_in_ctbs()))?;
        if segment_address >= sps.pic_size_in_ctbs() {
            return Err(ScvpError::InvalidData(format!(
                "slice_segment_address={} 超出图像范围",
                segment_address
            )));
        }
    }

    let body_start = br.position();
    let mut slice_type = None;
    let mut pic_order_cnt_lsb = 0;
    if !dependent_slice_segment {
        br.skip_bits(pps.num_extra_slice_header_bits as usize)?;
        let ty = SliceType::from_value(br.read_ue()?)?;
        slice_type = Some(ty);
        if pps.output_flag_present {
            br.skip_bits(1)?; // pic_output_flag
        }
        if sps.separate_colour_plane {
            br.skip_bits(2)?; // colour_plane_id
        }

        let mut slice_temporal_mvp = false;
        let mut num_pic_total_curr = 0u32;
        if !nal_type.is_idr() {
            pic_order_cnt_lsb = br.read_bits(sps.log2_max_poc_lsb)?;
            num_pic_total_curr += parse_reference_pictures(&mut br, sps)?;
            if sps.temporal_mvp_enabled {
                slice_temporal_mvp = br.read_flag()?;
            }
        }

        let mut sao_luma = false;
        let mut sao_chroma = false;
        if sps.sample_adaptive_offset {
            sao_luma = br.read_flag()?;
            if sps.chroma_array_type() != 0 {
                sao_chroma = br.read_flag()?;
            }
        }

        if ty != SliceType::I {
            parse_inter_prediction(&mut br, sps, pps, ty, slice_temporal_mvp, num_pic_total_curr)?;
        }

        br.read_se()?; // slice_qp_delta
        if pps.slice_chroma_qp_offsets_present {
            br.read_se()?; // slice_cb_qp_offset
            br.read_se()?; // slice_cr_qp_offset
        }
        if pps.chroma_qp_offset_list_enabled {
            br.skip_bits(1)?; // cu_chroma_qp_offset_enabled_flag
        }

        let override_flag = pps.deblocking_filter_override_enabled && br.read_flag()?;
        let mut deblocking_disabled = pps.deblocking_filter_disabled;
        if override_flag {
            deblocking_disabled = br.read_flag()?;
            if !deblocking_disabled {
                br.read_se()?; // slice_beta_offset_div2
                br.read_se()?; // slice_tc_offset_div2
            }
        }
        if pps.loop_filter_across_slices && (sao_luma || sao_chroma || !deblocking_disabled) {
            br.skip_bits(1)?; // slice_loop_filter_across_slices_enabled_flag
        }
    }
    let body_bits = body_start..br.position();

    let mut num_entry_point_offsets = 0;
    let entry_point_bits = if pps.tiles_enabled || pps.entropy_coding_sync {
        let start = br.position();
        num_entry_point_offsets = br.read_ue()?;
        if num_entry_point_offsets > sps.pic_size_in_ctbs() {
            return Err(ScvpError::InvalidData(format!(
                "num_entry_point_offsets={} 超出范围",
                num_entry_point_offsets
            )));
        }
        if num_entry_point_offsets > 0 {
            let offset_len = br.read_ue_max(31, "offset_len_minus1")? + 1;
            br.skip_bits(offset_len as usize * num_entry_point_offsets as usize)?;
        }
        Some(start..br.position())
    } else {
        None
    };

    let ext_start = br.position();
    if pps.slice_header_extension_present {
        let len = br.read_ue()?;
        br.skip_bytes(len as usize)?;
    }
    let extension_bits = ext_start..br.position();

    // byte_alignment()
    br.read_trailing_bits()?;
    let header_bytes = br.position() / 8;

    Ok((
        SliceHeader {
            nal_header,
            first_slice_segment_in_pic,
            no_output_of_prior_pics,
            pps_id,
            dependent_slice_segment,
            segment_address,
            slice_type,
            pic_order_cnt_lsb,
            num_entry_point_offsets,
            rbsp: rbsp[..header_bytes].to_vec(),
            pps_id_bits,
            body_bits,
            entry_point_bits,
            extension_bits,
            header_len: 0,
        },
        header_bytes,
    ))
}

/// 解析短期/长期参考图像语法, 返回 NumPicTotalCurr
fn parse_reference_pictures(br: &mut BitReader<'_>, sps: &Sps) -> ScvpResult<u32> {
    let num_sets = sps.short_term_rps.len();
    let mut used = 0;
    if !br.read_flag()? {
        // short_term_ref_pic_set_sps_flag == 0
        let rps = ShortTermRps::parse(br, num_sets, num_sets, &sps.short_term_rps)?;
        used += rps.num_used();
    } else {
        if num_sets == 0 {
            return Err(ScvpError::InvalidData("SPS 中没有短期参考图像集".into()));
        }
        let idx = if num_sets > 1 {
            br.read_bits(address_bits(num_sets as u32))? as usize
        } else {
            0
        };
        let rps = sps
            .short_term_rps
            .get(idx)
            .ok_or_else(|| ScvpError::InvalidData(format!("short_term_ref_pic_set_idx={} 越界", idx)))?;
        used += rps.num_used();
    }

    if sps.long_term_ref_pics_present {
        let candidates = sps.long_term_used_by_curr.len() as u32;
        let num_lt_sps = if candidates > 0 {
            br.read_ue_max(candidates, "num_long_term_sps")?
        } else {
            0
        };
        let num_lt_pics = br.read_ue_max(32, "num_long_term_pics")?;
        if num_lt_sps + num_lt_pics > 32 {
            return Err(ScvpError::InvalidData("长期参考图像数超出范围".into()));
        }
        for i in 0..num_lt_sps + num_lt_pics {
            if i < num_lt_sps {
                let idx = if candidates > 1 {
                    br.read_bits(address_bits(candidates))? as usize
                } else {
                    0
                };
                let flag = sps.long_term_used_by_curr.get(idx).ok_or_else(|| {
                    ScvpError::InvalidData(format!("lt_idx_sps={} 越界", idx))
                })?;
                used += u32::from(*flag);
            } else {
                br.read_bits(sps.log2_max_poc_lsb)?; // poc_lsb_lt
                used += br.read_bit()?; // used_by_curr_pic_lt_flag
            }
            if br.read_flag()? {
                br.read_ue()?; // delta_poc_msb_cycle_lt
            }
        }
    }
    Ok(used)
}

/// 解析 P/B 条带的帧间预测相关语法
fn parse_inter_prediction(
    br: &mut BitReader<'_>,
    sps: &Sps,
    pps: &Pps,
    ty: SliceType,
    slice_temporal_mvp: bool,
    num_pic_total_curr: u32,
) -> ScvpResult<()> {
    let mut num_ref_idx_l0 = pps.num_ref_idx_l0_default_active_minus1;
    let mut num_ref_idx_l1 = pps.num_ref_idx_l1_default_active_minus1;
    if br.read_flag()? {
        num_ref_idx_l0 = br.read_ue()?;
        if ty == SliceType::B {
            num_ref_idx_l1 = br.read_ue()?;
        }
        if num_ref_idx_l0 > 14 || num_ref_idx_l1 > 14 {
            return Err(ScvpError::InvalidData("num_ref_idx_active 超出范围".into()));
        }
    }

    if pps.lists_modification_present && num_pic_total_curr > 1 {
        let entry_bits = address_bits(num_pic_total_curr);
        if br.read_flag()? {
            br.skip_bits(entry_bits as usize * (num_ref_idx_l0 as usize + 1))?;
        }
        if ty == SliceType::B && br.read_flag()? {
            br.skip_bits(entry_bits as usize * (num_ref_idx_l1 as usize + 1))?;
        }
    }

    if ty == SliceType::B {
        br.skip_bits(1)?; // mvd_l1_zero_flag
    }
    if pps.cabac_init_present {
        br.skip_bits(1)?; // cabac_init_flag
    }
    if slice_temporal_mvp {
        let from_l0 = ty != SliceType::B || br.read_flag()?;
        if (from_l0 && num_ref_idx_l0 > 0) || (!from_l0 && num_ref_idx_l1 > 0) {
            br.read_ue()?; // collocated_ref_idx
        }
    }
    if (pps.weighted_pred && ty == SliceType::P) || (pps.weighted_bipred && ty == SliceType::B) {
        skip_pred_weight_table(br, sps, ty, num_ref_idx_l0, num_ref_idx_l1)?;
    }
    br.read_ue()?; // five_minus_max_num_merge_cand
    Ok(())
}

fn skip_pred_weight_table(
    br: &mut BitReader<'_>,
    sps: &Sps,
    ty: SliceType,
    num_ref_idx_l0: u32,
    num_ref_idx_l1: u32,
) -> ScvpResult<()> {
    let chroma = sps.chroma_array_type() != 0;
    br.read_ue()?; // luma_log2_weight_denom
    if chroma {
        br.read_se()?; // delta_chroma_log2_weight_denom
    }
    let lists: &[u32] = if ty == SliceType::B {
        &[num_ref_idx_l0, num_ref_idx_l1]
    } else {
        &[num_ref_idx_l0]
    };
    for &num_minus1 in lists {
        let n = num_minus1 as usize + 1;
        let mut luma_flags = Vec::with_capacity(n);
        for _ in 0..n {
            luma_flags.push(br.read_flag()?);
        }
        let mut chroma_flags = vec![false; n];
        if chroma {
            for flag in chroma_flags.iter_mut() {
                *flag = br.read_flag()?;
            }
        }
        for i in 0..n {
            if luma_flags[i] {
                br.read_se()?; // delta_luma_weight
                br.read_se()?; // luma_offset
            }
            if chroma_flags[i] {
                for _ in 0..2 {
                    br.read_se()?; // delta_chroma_weight
                    br.read_se()?; // delta_chroma_offset
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use scvp_core::{BitWriter, ErrorCode};

    use crate::builder::{SliceParams, StreamParams};
    use crate::nal::NalUnitType;

    fn parse_built(params: &StreamParams, slice: &SliceParams) -> SliceHeader {
        let sps = Sps::parse(&params.sps_nal()).unwrap();
        let pps = Pps::parse(&params.pps_nal()).unwrap();
        SliceHeader::parse(&params.slice_nal(slice), &sps, &pps).unwrap()
    }

    #[test]
    fn test_解析_idr_首条带() {
        let params = StreamParams::new(512, 256);
        let slice = SliceParams::idr(&[0x11, 0x22, 0x80]);
        let header = parse_built(&params, &slice);
        assert!(header.first_slice_segment_in_pic);
        assert_eq!(header.no_output_of_prior_pics, Some(false));
        assert_eq!(header.slice_type, Some(SliceType::I));
        assert_eq!(header.segment_address, 0);
        assert!(header.is_idr());
        assert!(header.entry_point_bits.is_none());

        let nal = params.slice_nal(&slice);
        assert_eq!(&nal[header.header_len..], &[0x11, 0x22, 0x80]);
    }

    #[test]
    fn test_解析_p_条带地址与_poc() {
        let params = StreamParams {
            tile_columns: 2,
            tile_rows: 2,
            ..StreamParams::new(512, 256)
        };
        let slice = SliceParams {
            nal_type: NalUnitType::TrailR,
            slice_type: SliceType::P,
            segment_address: 12,
            pic_order_cnt_lsb: 5,
            payload: vec![0xAB, 0xCD],
        };
        let header = parse_built(&params, &slice);
        assert!(!header.first_slice_segment_in_pic);
        assert_eq!(header.segment_address, 12);
        assert_eq!(header.slice_type, Some(SliceType::P));
        assert_eq!(header.pic_order_cnt_lsb, 5);
        assert_eq!(header.num_entry_point_offsets, 0);
        assert!(header.entry_point_bits.is_some());
    }

    #[test]
    fn test_载荷含起始码模式时头长度按转义计() {
        let params = StreamParams::new(512, 256);
        let slice = SliceParams::idr(&[0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x80]);
        let header = parse_built(&params, &slice);
        let nal = params.slice_nal(&slice);
        let data = &nal[header.header_len..];
        assert_eq!(unescape_rbsp(data), vec![0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x80]);
    }

    #[test]
    fn test_截断的条带头() {
        let params = StreamParams::new(512, 256);
        let sps = Sps::parse(&params.sps_nal()).unwrap();
        let pps = Pps::parse(&params.pps_nal()).unwrap();
        let nal = params.slice_nal(&SliceParams::idr(&[0x80]));
        assert!(SliceHeader::parse(&nal[..3], &sps, &pps).is_err());
    }

    #[test]
    fn test_pps_id_不匹配() {
        let params = StreamParams::new(512, 256);
        let other = StreamParams {
            pps_id: 3,
            ..params.clone()
        };
        let sps = Sps::parse(&params.sps_nal()).unwrap();
        let pps = Pps::parse(&params.pps_nal()).unwrap();
        let nal = other.slice_nal(&SliceParams::idr(&[0x80]));
        assert_eq!(peek_pps_id(&nal).unwrap(), 3);
        assert!(SliceHeader::parse(&nal, &sps, &pps).is_err());
    }

    // ========================================================
    // 异常输入
    // ========================================================

    fn handmade_nal(nal_type: NalUnitType, write: impl FnOnce(&mut BitWriter)) -> Vec<u8> {
        let mut bw = BitWriter::new();
        write(&mut bw);
        bw.write_trailing_bits();
        let mut nal = crate::nal::NalHeader::new(nal_type).to_bytes().to_vec();
        nal.extend(scvp_core::rbsp::escape_rbsp(&bw.finish()));
        nal
    }

    /// 2x2 tile 的 IDR 首条带, 写到 num_entry_point_offsets 之后
    fn idr_with_entry_points(offsets: u32, offset_len_minus1: u32) -> Vec<u8> {
        handmade_nal(NalUnitType::IdrWRadl, |bw| {
            bw.write_bit(1); // first_slice_segment_in_pic_flag
            bw.write_bit(0); // no_output_of_prior_pics_flag
            bw.write_ue(0); // slice_pic_parameter_set_id
            bw.write_ue(2); // slice_type: I
            bw.write_bits(0b11, 2); // slice_sao_luma_flag, slice_sao_chroma_flag
            bw.write_se(0); // slice_qp_delta
            bw.write_bit(1); // slice_loop_filter_across_slices_enabled_flag
            bw.write_ue(offsets);
            bw.write_ue(offset_len_minus1);
            for _ in 0..offsets.min(4) {
                bw.write_bits(0, offset_len_minus1.min(31) + 1); // entry_point_offset_minus1
            }
        })
    }

    fn tiled_sets() -> (Sps, Pps) {
        let params = StreamParams {
            tile_columns: 2,
            tile_rows: 2,
            ..StreamParams::new(512, 256)
        };
        (
            Sps::parse(&params.sps_nal()).unwrap(),
            Pps::parse(&params.pps_nal()).unwrap(),
        )
    }

    #[test]
    fn test_入口点偏移位宽为最大_ue_值() {
        let (sps, pps) = tiled_sets();
        let err = SliceHeader::parse(&idr_with_entry_points(1, u32::MAX), &sps, &pps).unwrap_err();
        assert_eq!(err.code(), ErrorCode::Invalid);
        let err = SliceHeader::parse(&idr_with_entry_points(1, 32), &sps, &pps).unwrap_err();
        assert_eq!(err.code(), ErrorCode::Invalid);
    }

    #[test]
    fn test_入口点数超出图像_ctb_数() {
        let (sps, pps) = tiled_sets();
        let err = SliceHeader::parse(&idr_with_entry_points(sps.pic_size_in_ctbs() + 1, 0), &sps, &pps)
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::Invalid);
    }

    #[test]
    fn test_入口点合法时正常解析() {
        let (sps, pps) = tiled_sets();
        let header = SliceHeader::parse(&idr_with_entry_points(1, 7), &sps, &pps).unwrap();
        assert_eq!(header.num_entry_point_offsets, 1);
    }

    #[test]
    fn test_长期参考图像数为最大_ue_值() {
        let params = StreamParams {
            temporal_mvp: false,
            sample_adaptive_offset: false,
            ..StreamParams::new(512, 256)
        };
        let mut sps = Sps::parse(&params.sps_nal()).unwrap();
        sps.long_term_ref_pics_present = true;
        sps.long_term_used_by_curr = vec![true];
        let pps = Pps::parse(&params.pps_nal()).unwrap();
        let nal = handmade_nal(NalUnitType::TrailR, |bw| {
            bw.write_bit(1); // first_slice_segment_in_pic_flag
            bw.write_ue(0); // slice_pic_parameter_set_id
            bw.write_ue(1); // slice_type: P
            bw.write_bits(1, 8); // slice_pic_order_cnt_lsb
            bw.write_bit(1); // short_term_ref_pic_set_sps_flag
            bw.write_ue(1); // num_long_term_sps
            bw.write_ue(u32::MAX); // num_long_term_pics
            bw.write_bits(0, 32);
        });
        let err = SliceHeader::parse(&nal, &sps, &pps).unwrap_err();
        assert_eq!(err.code(), ErrorCode::Invalid);
    }
}
