//! 合成 HEVC 码流生成器.
//!
//! 按给定的图像尺寸与 tile 网格生成语法合法的 VPS/SPS/PPS 与条带 NAL.
//! 条带数据是调用方给定的任意字节, 不是真实的 CABAC 数据, 因此生成的码流只用于
//! 验证语法层处理 (拼接、改写、载荷透传), 不能解码出图像.

use scvp_core::BitWriter;
use scvp_core::rbsp::escape_rbsp;

use crate::nal::{NalHeader, NalUnitType, START_CODE};
use crate::params::address_bits;
use crate::slice::SliceType;

/// 合成码流的参数集配置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamParams {
    /// 图像宽度
    pub width: u32,
    /// 图像高度
    pub height: u32,
    /// log2 CTB 大小
    pub log2_ctb_size: u32,
    /// VPS id
    pub vps_id: u8,
    /// SPS id
    pub sps_id: u8,
    /// PPS id
    pub pps_id: u8,
    /// 裁剪窗口 (left, right, top, bottom)
    pub conformance_window: Option<[u32; 4]>,
    /// tile 列数
    pub tile_columns: u32,
    /// tile 行数
    pub tile_rows: u32,
    /// 均匀划分
    pub uniform_spacing: bool,
    /// 非均匀划分时的显式列宽 (CTB, 共 tile_columns-1 项)
    pub column_widths: Vec<u32>,
    /// 非均匀划分时的显式行高 (CTB, 共 tile_rows-1 项)
    pub row_heights: Vec<u32>,
    /// entropy_coding_sync_enabled_flag
    pub entropy_coding_sync: bool,
    /// dependent_slice_segments_enabled_flag
    pub dependent_slice_segments: bool,
    /// sample_adaptive_offset_enabled_flag
    pub sample_adaptive_offset: bool,
    /// sps_temporal_mvp_enabled_flag
    pub temporal_mvp: bool,
    /// SPS 中的短期参考图像集个数
    pub num_short_term_ref_pic_sets: u32,
    /// slice_segment_header_extension_present_flag
    pub slice_header_extension: bool,
    /// 写入一个所有标志为 0 的 VUI
    pub vui: bool,
}

/// 一个条带的生成参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SliceParams {
    /// NAL 类型
    pub nal_type: NalUnitType,
    /// 条带类型
    pub slice_type: SliceType,
    /// slice_segment_address (0 表示首条带)
    pub segment_address: u32,
    /// slice_pic_order_cnt_lsb
    pub pic_order_cnt_lsb: u32,
    /// 条带数据 (RBSP 形式, 生成时整体转义)
    pub payload: Vec<u8>,
}

impl SliceParams {
    /// IDR 首条带
    pub fn idr(payload: &[u8]) -> Self {
        Self {
            nal_type: NalUnitType::IdrWRadl,
            slice_type: SliceType::I,
            segment_address: 0,
            pic_order_cnt_lsb: 0,
            payload: payload.to_vec(),
        }
    }
}

impl StreamParams {
    /// 默认配置: 64x64 CTB, 单 tile, 启用 SAO 与时域 MVP
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            log2_ctb_size: 6,
            vps_id: 0,
            sps_id: 0,
            pps_id: 0,
            conformance_window: None,
            tile_columns: 1,
            tile_rows: 1,
            uniform_spacing: true,
            column_widths: Vec::new(),
            row_heights: Vec::new(),
            entropy_coding_sync: false,
            dependent_slice_segments: false,
            sample_adaptive_offset: true,
            temporal_mvp: true,
            num_short_term_ref_pic_sets: 1,
            slice_header_extension: false,
            vui: false,
        }
    }

    fn ctb_size(&self) -> u32 {
        1 << self.log2_ctb_size
    }

    fn width_in_ctbs(&self) -> u32 {
        self.width.div_ceil(self.ctb_size())
    }

    fn height_in_ctbs(&self) -> u32 {
        self.height.div_ceil(self.ctb_size())
    }

    fn tiles_enabled(&self) -> bool {
        self.tile_columns > 1 || self.tile_rows > 1
    }

    /// VPS NAL (含头, 不含起始码)
    pub fn vps_nal(&self) -> Vec<u8> {
        let mut bw = BitWriter::new();
        bw.write_bits(u32::from(self.vps_id), 4);
        bw.write_bits(0b11, 2); // vps_base_layer_internal_flag, vps_base_layer_available_flag
        bw.write_bits(0, 6); // vps_max_layers_minus1
        bw.write_bits(0, 3); // vps_max_sub_layers_minus1
        bw.write_bit(1); // vps_temporal_id_nesting_flag
        bw.write_bits(0xFFFF, 16); // vps_reserved_0xffff_16bits
        write_profile_tier_level(&mut bw);
        bw.write_bit(1); // vps_sub_layer_ordering_info_present_flag
        bw.write_ue(4);
        bw.write_ue(0);
        bw.write_ue(0);
        bw.write_bits(0, 6); // vps_max_layer_id
        bw.write_ue(0); // vps_num_layer_sets_minus1
        bw.write_bit(0); // vps_timing_info_present_flag
        bw.write_bit(0); // vps_extension_flag
        bw.write_trailing_bits();
        nal_bytes(NalUnitType::Vps, &bw.finish())
    }

    /// SPS NAL (含头, 不含起始码)
    pub fn sps_nal(&self) -> Vec<u8> {
        let mut bw = BitWriter::new();
        bw.write_bits(u32::from(self.vps_id), 4);
        bw.write_bits(0, 3); // sps_max_sub_layers_minus1
        bw.write_bit(1); // sps_temporal_id_nesting_flag
        write_profile_tier_level(&mut bw);
        bw.write_ue(u32::from(self.sps_id));
        bw.write_ue(1); // chroma_format_idc: 4:2:0
        bw.write_ue(self.width);
        bw.write_ue(self.height);
        match self.conformance_window {
            Some(window) => {
                bw.write_bit(1);
                for v in window {
                    bw.write_ue(v);
                }
            }
            None => bw.write_bit(0),
        }
        bw.write_ue(0); // bit_depth_luma_minus8
        bw.write_ue(0); // bit_depth_chroma_minus8
        bw.write_ue(4); // log2_max_pic_order_cnt_lsb_minus4
        bw.write_bit(1); // sps_sub_layer_ordering_info_present_flag
        bw.write_ue(4);
        bw.write_ue(0);
        bw.write_ue(0);
        bw.write_ue(0); // log2_min_luma_coding_block_size_minus3
        bw.write_ue(self.log2_ctb_size - 3);
        bw.write_ue(0); // log2_min_luma_transform_block_size_minus2
        bw.write_ue(3);
        bw.write_ue(1); // max_transform_hierarchy_depth_inter
        bw.write_ue(1); // max_transform_hierarchy_depth_intra
        bw.write_bit(0); // scaling_list_enabled_flag
        bw.write_bit(1); // amp_enabled_flag
        bw.write_flag(self.sample_adaptive_offset);
        bw.write_bit(0); // pcm_enabled_flag
        bw.write_ue(self.num_short_term_ref_pic_sets);
        for i in 0..self.num_short_term_ref_pic_sets {
            if i != 0 {
                bw.write_bit(0); // inter_ref_pic_set_prediction_flag
            }
            bw.write_ue(1); // num_negative_pics
            bw.write_ue(0); // num_positive_pics
            bw.write_ue(i); // delta_poc_s0_minus1
            bw.write_bit(1); // used_by_curr_pic_s0_flag
        }
        bw.write_bit(0); // long_term_ref_pics_present_flag
        bw.write_flag(self.temporal_mvp);
        bw.write_bit(1); // strong_intra_smoothing_enabled_flag
        bw.write_flag(self.vui);
        if self.vui {
            // 宽高比/过扫描/信号类型/色度位置等 10 个存在标志
            bw.write_bits(0, 10);
        }
        bw.write_bit(0); // sps_extension_present_flag
        bw.write_trailing_bits();
        nal_bytes(NalUnitType::Sps, &bw.finish())
    }

    /// PPS NAL (含头, 不含起始码)
    pub fn pps_nal(&self) -> Vec<u8> {
        let mut bw = BitWriter::new();
        bw.write_ue(u32::from(self.pps_id));
        bw.write_ue(u32::from(self.sps_id));
        bw.write_flag(self.dependent_slice_segments);
        bw.write_bit(0); // output_flag_present_flag
        bw.write_bits(0, 3); // num_extra_slice_header_bits
        bw.write_bit(0); // sign_data_hiding_enabled_flag
        bw.write_bit(0); // cabac_init_present_flag
        bw.write_ue(0); // num_ref_idx_l0_default_active_minus1
        bw.write_ue(0); // num_ref_idx_l1_default_active_minus1
        bw.write_se(0); // init_qp_minus26
        bw.write_bit(0); // constrained_intra_pred_flag
        bw.write_bit(0); // transform_skip_enabled_flag
        bw.write_bit(0); // cu_qp_delta_enabled_flag
        bw.write_se(0); // pps_cb_qp_offset
        bw.write_se(0); // pps_cr_qp_offset
        bw.write_bit(0); // pps_slice_chroma_qp_offsets_present_flag
        bw.write_bit(0); // weighted_pred_flag
        bw.write_bit(0); // weighted_bipred_flag
        bw.write_bit(0); // transquant_bypass_enabled_flag
        bw.write_flag(self.tiles_enabled());
        bw.write_flag(self.entropy_coding_sync);
        if self.tiles_enabled() {
            bw.write_ue(self.tile_columns - 1);
            bw.write_ue(self.tile_rows - 1);
            bw.write_flag(self.uniform_spacing);
            if !self.uniform_spacing {
                for &w in &self.column_widths {
                    bw.write_ue(w - 1);
                }
                for &h in &self.row_heights {
                    bw.write_ue(h - 1);
                }
            }
            bw.write_bit(1); // loop_filter_across_tiles_enabled_flag
        }
        bw.write_bit(1); // pps_loop_filter_across_slices_enabled_flag
        bw.write_bit(0); // deblocking_filter_control_present_flag
        bw.write_bit(0); // pps_scaling_list_data_present_flag
        bw.write_bit(0); // lists_modification_present_flag
        bw.write_ue(0); // log2_parallel_merge_level_minus2
        bw.write_flag(self.slice_header_extension);
        bw.write_bit(0); // pps_extension_present_flag
        bw.write_trailing_bits();
        nal_bytes(NalUnitType::Pps, &bw.finish())
    }

    /// 条带 NAL (含头, 不含起始码)
    pub fn slice_nal(&self, slice: &SliceParams) -> Vec<u8> {
        let first = slice.segment_address == 0;
        let mut bw = BitWriter::new();
        bw.write_flag(first);
        if slice.nal_type.is_irap() {
            bw.write_bit(0); // no_output_of_prior_pics_flag
        }
        bw.write_ue(u32::from(self.pps_id));
        if !first {
            if self.dependent_slice_segments {
                bw.write_bit(0); // dependent_slice_segment_flag
            }
            let pic_size = self.width_in_ctbs() * self.height_in_ctbs();
            bw.write_bits(slice.segment_address, address_bits(pic_size));
        }
        bw.write_ue(match slice.slice_type {
            SliceType::B => 0,
            SliceType::P => 1,
            SliceType::I => 2,
        });

        let mut slice_temporal_mvp = false;
        if !slice.nal_type.is_idr() {
            bw.write_bits(slice.pic_order_cnt_lsb, 8);
            if self.num_short_term_ref_pic_sets > 0 {
                bw.write_bit(1); // short_term_ref_pic_set_sps_flag
                if self.num_short_term_ref_pic_sets > 1 {
                    bw.write_bits(0, address_bits(self.num_short_term_ref_pic_sets));
                }
            } else {
                bw.write_bit(0);
                bw.write_ue(1); // num_negative_pics
                bw.write_ue(0); // num_positive_pics
                bw.write_ue(0); // delta_poc_s0_minus1
                bw.write_bit(1); // used_by_curr_pic_s0_flag
            }
            if self.temporal_mvp {
                bw.write_bit(1);
                slice_temporal_mvp = true;
            }
        }
        if self.sample_adaptive_offset {
            bw.write_bit(1); // slice_sao_luma_flag
            bw.write_bit(1); // slice_sao_chroma_flag
        }
        if slice.slice_type != SliceType::I {
            bw.write_bit(0); // num_ref_idx_active_override_flag
            if slice.slice_type == SliceType::B {
                bw.write_bit(0); // mvd_l1_zero_flag
            }
            if slice_temporal_mvp && slice.slice_type == SliceType::B {
                bw.write_bit(1); // collocated_from_l0_flag
            }
            bw.write_ue(0); // five_minus_max_num_merge_cand
        }
        bw.write_se(0); // slice_qp_delta
        bw.write_bit(1); // slice_loop_filter_across_slices_enabled_flag
        if self.tiles_enabled() || self.entropy_coding_sync {
            bw.write_ue(0); // num_entry_point_offsets
        }
        if self.slice_header_extension {
            bw.write_ue(1);
            bw.write_bits(0xA5, 8);
        }
        bw.write_trailing_bits(); // byte_alignment()
        bw.write_bytes(&slice.payload);
        nal_bytes(slice.nal_type, &bw.finish())
    }

    /// Annex B 形式的 VPS + SPS + PPS
    pub fn parameter_sets(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for nal in [self.vps_nal(), self.sps_nal(), self.pps_nal()] {
            out.extend_from_slice(&START_CODE);
            out.extend_from_slice(&nal);
        }
        out
    }

    /// 每个 tile 的首 CTB 地址 (tile 光栅顺序)
    pub fn tile_addresses(&self) -> Vec<u32> {
        let split = |count: u32, total: u32, explicit: &[u32]| -> Vec<u32> {
            if self.uniform_spacing || count == 1 {
                (0..count)
                    .map(|i| ((i + 1) * total) / count - (i * total) / count)
                    .collect()
            } else {
                let mut v = explicit.to_vec();
                v.push(total - explicit.iter().sum::<u32>());
                v
            }
        };
        let cols = split(self.tile_columns, self.width_in_ctbs(), &self.column_widths);
        let rows = split(self.tile_rows, self.height_in_ctbs(), &self.row_heights);
        let mut addrs = Vec::with_capacity(cols.len() * rows.len());
        let mut y = 0;
        for &h in &rows {
            let mut x = 0;
            for &w in &cols {
                addrs.push(y * self.width_in_ctbs() + x);
                x += w;
            }
            y += h;
        }
        addrs
    }

    /// 生成一帧: 可选参数集 + 每个 tile 一个条带
    pub fn frame(
        &self,
        with_parameter_sets: bool,
        nal_type: NalUnitType,
        slice_type: SliceType,
        pic_order_cnt_lsb: u32,
        payloads: &[Vec<u8>],
    ) -> Vec<u8> {
        let mut out = if with_parameter_sets {
            self.parameter_sets()
        } else {
            Vec::new()
        };
        for (addr, payload) in self.tile_addresses().into_iter().zip(payloads) {
            let slice = SliceParams {
                nal_type,
                slice_type,
                segment_address: addr,
                pic_order_cnt_lsb,
                payload: payload.clone(),
            };
            out.extend_from_slice(&START_CODE);
            out.extend_from_slice(&self.slice_nal(&slice));
        }
        out
    }
}

fn write_profile_tier_level(bw: &mut BitWriter) {
    bw.write_bits(0, 2); // general_profile_space
    bw.write_bit(0); // general_tier_flag
    bw.write_bits(1, 5); // general_profile_idc: Main
    bw.write_bits(0x6000_0000, 32); // general_profile_compatibility_flag[1..2]
    bw.write_bits(0b1001, 4); // progressive, interlaced, non_packed, frame_only
    bw.write_bits_u64(0, 43);
    bw.write_bit(0); // general_inbld_flag
    bw.write_bits(123, 8); // general_level_idc: 4.1
}

fn nal_bytes(nal_type: NalUnitType, rbsp: &[u8]) -> Vec<u8> {
    let mut out = NalHeader::new(nal_type).to_bytes().to_vec();
    out.extend_from_slice(&escape_rbsp(rbsp));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nal::split_annex_b;
    use crate::params::{Pps, Sps, Vps};

    #[test]
    fn test_生成的参数集可被解析() {
        let params = StreamParams {
            tile_columns: 3,
            tile_rows: 2,
            uniform_spacing: false,
            column_widths: vec![2, 3],
            row_heights: vec![3],
            ..StreamParams::new(576, 384)
        };
        let vps = Vps::parse(&params.vps_nal()).unwrap();
        assert_eq!(vps.vps_id, 0);
        let sps = Sps::parse(&params.sps_nal()).unwrap();
        assert_eq!((sps.width, sps.height), (576, 384));
        let pps = Pps::parse(&params.pps_nal()).unwrap();
        assert!(!pps.tiles.uniform_spacing);
        let (cols, rows) = pps
            .tiles
            .resolve(sps.width_in_ctbs(), sps.height_in_ctbs())
            .unwrap();
        assert_eq!(cols, vec![2, 3, 4]);
        assert_eq!(rows, vec![3, 3]);
    }

    #[test]
    fn test_tile_首地址() {
        let params = StreamParams {
            tile_columns: 2,
            tile_rows: 2,
            ..StreamParams::new(512, 256)
        };
        // 8x4 CTB, 每个 tile 4x2
        assert_eq!(params.tile_addresses(), vec![0, 4, 16, 20]);
    }

    #[test]
    fn test_生成一帧() {
        let params = StreamParams {
            tile_columns: 2,
            ..StreamParams::new(512, 256)
        };
        let data = params.frame(
            true,
            NalUnitType::IdrWRadl,
            SliceType::I,
            0,
            &[vec![1, 0x80], vec![2, 0x80]],
        );
        let nalus = split_annex_b(&data).unwrap();
        let types: Vec<_> = nalus.iter().map(|n| n.nal_type()).collect();
        assert_eq!(
            types,
            vec![
                NalUnitType::Vps,
                NalUnitType::Sps,
                NalUnitType::Pps,
                NalUnitType::IdrWRadl,
                NalUnitType::IdrWRadl
            ]
        );
    }
}
