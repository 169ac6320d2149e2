//! VPS/SPS/PPS 解析.
//!
//! 只解析拼接所需的语法元素, 同时记录需要改写的字段在 RBSP 中的位区间,
//! 其余语法由改写器按位原样复制.

use std::ops::Range;

use scvp_core::rbsp::unescape_rbsp;
use scvp_core::{BitReader, ScvpError, ScvpResult};

use crate::nal::NalHeader;

/// VPS/SPS id 上限
pub const MAX_VPS_COUNT: usize = 16;
/// SPS id 上限
pub const MAX_SPS_COUNT: usize = 16;
/// PPS id 上限
pub const MAX_PPS_COUNT: usize = 64;
/// 每幅图像的最大 tile 列数
pub const MAX_TILE_COLUMNS: u32 = 22;
/// 每幅图像的最大 tile 行数
pub const MAX_TILE_ROWS: u32 = 20;
/// 图像宽高上限 (像素), 即 level 6.2 的 sqrt(MaxLumaPs * 8)
pub const MAX_PICTURE_DIMENSION: u32 = 16888;

/// 最后一个停止位在 RBSP 中的位置
///
/// 改写参数集时, 原始语法复制到这里为止, 再重新写入 rbsp_trailing_bits.
pub fn stop_bit_position(rbsp: &[u8]) -> ScvpResult<usize> {
    let (idx, &byte) = rbsp
        .iter()
        .enumerate()
        .rev()
        .find(|&(_, &b)| b != 0)
        .ok_or_else(|| ScvpError::InvalidData("RBSP 缺少停止位".into()))?;
    Ok(idx * 8 + 7 - byte.trailing_zeros() as usize)
}

// ============================================================
// VPS
// ============================================================

/// 视频参数集
///
/// 拼接不修改 VPS, 只记录 id 并保留原始 NAL 以便原样输出.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vps {
    /// vps_video_parameter_set_id
    pub vps_id: u8,
    /// vps_max_sub_layers_minus1
    pub max_sub_layers_minus1: u8,
    /// 原始 NAL (含头, 不含起始码)
    pub nal: Vec<u8>,
}

impl Vps {
    /// 从完整 NAL (含 2 字节头) 解析
    pub fn parse(nal: &[u8]) -> ScvpResult<Self> {
        let rbsp = unescape_rbsp(nal.get(2..).unwrap_or_default());
        let mut br = BitReader::new(&rbsp);
        let vps_id = br.read_bits(4)? as u8;
        br.skip_bits(2)?; // vps_base_layer_internal_flag, vps_base_layer_available_flag
        br.skip_bits(6)?; // vps_max_layers_minus1
        let max_sub_layers_minus1 = br.read_bits(3)? as u8;
        Ok(Self {
            vps_id,
            max_sub_layers_minus1,
            nal: nal.to_vec(),
        })
    }
}

// ============================================================
// 短期参考图像集
// ============================================================

/// 短期参考图像集 (推导后的形式)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShortTermRps {
    /// 负向参考: (delta_poc, used_by_curr_pic)
    pub negative: Vec<(i32, bool)>,
    /// 正向参考: (delta_poc, used_by_curr_pic)
    pub positive: Vec<(i32, bool)>,
}

impl ShortTermRps {
    /// NumDeltaPocs
    pub fn num_delta_pocs(&self) -> usize {
        self.negative.len() + self.positive.len()
    }

    /// 当前图像实际使用的参考数
    pub fn num_used(&self) -> u32 {
        self.negative
            .iter()
            .chain(self.positive.iter())
            .filter(|(_, used)| *used)
            .count() as u32
    }

    /// 解析 st_ref_pic_set(idx)
    ///
    /// `sets` 为已解析的集合, `num_sets` 为 SPS 中的集合总数.
    /// 在条带头中解析时 `idx == num_sets`.
    pub fn parse(
        br: &mut BitReader<'_>,
        idx: usize,
        num_sets: usize,
        sets: &[ShortTermRps],
    ) -> ScvpResult<Self> {
        let inter = idx != 0 && br.read_flag()?;
        if !inter {
            return Self::parse_explicit(br);
        }

        let delta_idx = if idx == num_sets {
            br.read_ue_max(63, "delta_idx_minus1")? as usize + 1
        } else {
            1
        };
        let ref_idx = idx
            .checked_sub(delta_idx)
            .filter(|&r| r < sets.len())
            .ok_or_else(|| ScvpError::InvalidData(format!("st_ref_pic_set 引用越界: {}", idx)))?;
        let sign = br.read_bit()?;
        let abs_delta = br.read_ue_max(0x7FFF, "abs_delta_rps_minus1")? as i32 + 1;
        let delta_rps = if sign == 1 { -abs_delta } else { abs_delta };

        let reference = &sets[ref_idx];
        let count = reference.num_delta_pocs() + 1;
        let mut used = Vec::with_capacity(count);
        let mut use_delta = Vec::with_capacity(count);
        for _ in 0..count {
            let u = br.read_flag()?;
            let d = if u { true } else { br.read_flag()? };
            used.push(u);
            use_delta.push(d);
        }

        let neg_ref = reference.negative.len();
        let all = reference.num_delta_pocs();
        let mut rps = ShortTermRps::default();

        for (j, &(dp, _)) in reference.positive.iter().enumerate().rev() {
            let d_poc = dp + delta_rps;
            if d_poc < 0 && use_delta[neg_ref + j] {
                rps.negative.push((d_poc, used[neg_ref + j]));
            }
        }
        if delta_rps < 0 && use_delta[all] {
            rps.negative.push((delta_rps, used[all]));
        }
        for (j, &(dp, _)) in reference.negative.iter().enumerate() {
            let d_poc = dp + delta_rps;
            if d_poc < 0 && use_delta[j] {
                rps.negative.push((d_poc, used[j]));
            }
        }

        for (j, &(dp, _)) in reference.negative.iter().enumerate().rev() {
            let d_poc = dp + delta_rps;
            if d_poc > 0 && use_delta[j] {
                rps.positive.push((d_poc, used[j]));
            }
        }
        if delta_rps > 0 && use_delta[all] {
            rps.positive.push((delta_rps, used[all]));
        }
        for (j, &(dp, _)) in reference.positive.iter().enumerate() {
            let d_poc = dp + delta_rps;
            if d_poc > 0 && use_delta[neg_ref + j] {
                rps.positive.push((d_poc, used[neg_ref + j]));
            }
        }
        Ok(rps)
    }

    fn parse_explicit(br: &mut BitReader<'_>) -> ScvpResult<Self> {
        let num_negative = br.read_ue()?;
        let num_positive = br.read_ue()?;
        if num_negative > 16 || num_positive > 16 {
            return Err(ScvpError::InvalidData(format!(
                "st_ref_pic_set 参考数过大: {}+{}",
                num_negative, num_positive
            )));
        }
        let mut rps = ShortTermRps::default();
        let mut poc = 0i32;
        for _ in 0..num_negative {
            poc -= br.read_ue_max(0x7FFF, "delta_poc_s0_minus1")? as i32 + 1;
            rps.negative.push((poc, br.read_flag()?));
        }
        poc = 0;
        for _ in 0..num_positive {
            poc += br.read_ue_max(0x7FFF, "delta_poc_s1_minus1")? as i32 + 1;
            rps.positive.push((poc, br.read_flag()?));
        }
        Ok(rps)
    }
}

// ============================================================
// SPS
// ============================================================

/// 序列参数集
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sps {
    /// NAL 头
    pub header: NalHeader,
    /// sps_video_parameter_set_id
    pub vps_id: u8,
    /// sps_max_sub_layers_minus1
    pub max_sub_layers_minus1: u8,
    /// sps_seq_parameter_set_id
    pub sps_id: u8,
    /// chroma_format_idc
    pub chroma_format_idc: u32,
    /// separate_colour_plane_flag
    pub separate_colour_plane: bool,
    /// pic_width_in_luma_samples
    pub width: u32,
    /// pic_height_in_luma_samples
    pub height: u32,
    /// 裁剪窗口 (left, right, top, bottom)
    pub conformance_window: Option<[u32; 4]>,
    /// log2_max_pic_order_cnt_lsb
    pub log2_max_poc_lsb: u32,
    /// log2 最小编码块
    pub log2_min_cb_size: u32,
    /// log2 CTB 大小
    pub log2_ctb_size: u32,
    /// sample_adaptive_offset_enabled_flag
    pub sample_adaptive_offset: bool,
    /// SPS 中的短期参考图像集
    pub short_term_rps: Vec<ShortTermRps>,
    /// long_term_ref_pics_present_flag
    pub long_term_ref_pics_present: bool,
    /// SPS 中每个长期参考候选的 used_by_curr_pic_lt_sps_flag
    pub long_term_used_by_curr: Vec<bool>,
    /// sps_temporal_mvp_enabled_flag
    pub temporal_mvp_enabled: bool,
    /// vui_parameters_present_flag
    pub vui_present: bool,
    /// vui_parameters_present_flag 在 RBSP 中的位置
    pub vui_flag_bit: usize,
    /// RBSP (已去除防竞争字节)
    pub rbsp: Vec<u8>,
    /// 从 pic_width_in_luma_samples 到裁剪窗口结束的位区间
    pub size_bits: Range<usize>,
}

impl Sps {
    /// 从完整 NAL (含 2 字节头) 解析
    pub fn parse(nal: &[u8]) -> ScvpResult<Self> {
        let header = NalHeader::parse(nal)?;
        let rbsp = unescape_rbsp(&nal[2..]);
        let mut br = BitReader::new(&rbsp);

        let vps_id = br.read_bits(4)? as u8;
        let max_sub_layers_minus1 = br.read_bits(3)? as u8;
        if max_sub_layers_minus1 > 6 {
            return Err(ScvpError::InvalidData(format!(
                "SPS: sps_max_sub_layers_minus1={} 超出范围",
                max_sub_layers_minus1
            )));
        }
        br.skip_bits(1)?; // sps_temporal_id_nesting_flag
        skip_profile_tier_level(&mut br, max_sub_layers_minus1)?;

        let sps_id = br.read_ue()?;
        if sps_id as usize >= MAX_SPS_COUNT {
            return Err(ScvpError::InvalidData(format!(
                "SPS: sps_id={} 超出范围",
                sps_id
            )));
        }
        let chroma_format_idc = br.read_ue()?;
        if chroma_format_idc > 3 {
            return Err(ScvpError::InvalidData(format!(
                "SPS: chroma_format_idc={} 无效",
                chroma_format_idc
            )));
        }
        let separate_colour_plane = chroma_format_idc == 3 && br.read_flag()?;

        let size_start = br.position();
        let width = br.read_ue_max(MAX_PICTURE_DIMENSION, "pic_width_in_luma_samples")?;
        let height = br.read_ue_max(MAX_PICTURE_DIMENSION, "pic_height_in_luma_samples")?;
        if width == 0 || height == 0 {
            return Err(ScvpError::InvalidData(format!("SPS: 图像尺寸 {}x{} 无效", width, height)));
        }
        let conformance_window = if br.read_flag()? {
            Some([br.read_ue()?, br.read_ue()?, br.read_ue()?, br.read_ue()?])
        } else {
            None
        };
        let size_end = br.position();

        let _bit_depth_luma_minus8 = br.read_ue()?;
        let _bit_depth_chroma_minus8 = br.read_ue()?;
        let log2_max_poc_lsb = br.read_ue_max(12, "log2_max_pic_order_cnt_lsb_minus4")? + 4;

        let sub_layer_ordering_info = br.read_flag()?;
        let first = if sub_layer_ordering_info {
            0
        } else {
            max_sub_layers_minus1
        };
        for _ in first..=max_sub_layers_minus1 {
            br.read_ue()?; // sps_max_dec_pic_buffering_minus1
            br.read_ue()?; // sps_max_num_reorder_pics
            br.read_ue()?; // sps_max_latency_increase_plus1
        }

        let log2_min_cb_size = br.read_ue_max(3, "log2_min_luma_coding_block_size_minus3")? + 3;
        let log2_ctb_size =
            log2_min_cb_size + br.read_ue_max(3, "log2_diff_max_min_luma_coding_block_size")?;
        if !(4..=6).contains(&log2_ctb_size) {
            return Err(ScvpError::InvalidData(format!(
                "SPS: CTB 大小 2^{} 无效",
                log2_ctb_size
            )));
        }
        br.read_ue()?; // log2_min_luma_transform_block_size_minus2
        br.read_ue()?; // log2_diff_max_min_luma_transform_block_size
        br.read_ue()?; // max_transform_hierarchy_depth_inter
        br.read_ue()?; // max_transform_hierarchy_depth_intra

        if br.read_flag()? && br.read_flag()? {
            skip_scaling_list_data(&mut br)?;
        }
        br.skip_bits(1)?; // amp_enabled_flag
        let sample_adaptive_offset = br.read_flag()?;
        if br.read_flag()? {
            // pcm: 两个 4 位深度, 两个块大小, pcm_loop_filter_disabled_flag
            br.skip_bits(8)?;
            br.read_ue()?;
            br.read_ue()?;
            br.skip_bits(1)?;
        }

        let num_short_term_ref_pic_sets = br.read_ue()? as usize;
        if num_short_term_ref_pic_sets > 64 {
            return Err(ScvpError::InvalidData(format!(
                "SPS: num_short_term_ref_pic_sets={} 超出范围",
                num_short_term_ref_pic_sets
            )));
        }
        let mut short_term_rps = Vec::with_capacity(num_short_term_ref_pic_sets);
        for i in 0..num_short_term_ref_pic_sets {
            let rps = ShortTermRps::parse(&mut br, i, num_short_term_ref_pic_sets, &short_term_rps)?;
            short_term_rps.push(rps);
        }

        let long_term_ref_pics_present = br.read_flag()?;
        let mut long_term_used_by_curr = Vec::new();
        if long_term_ref_pics_present {
            let num_long_term_ref_pics_sps = br.read_ue()?;
            if num_long_term_ref_pics_sps > 32 {
                return Err(ScvpError::InvalidData(format!(
                    "SPS: num_long_term_ref_pics_sps={} 超出范围",
                    num_long_term_ref_pics_sps
                )));
            }
            for _ in 0..num_long_term_ref_pics_sps {
                br.skip_bits(log2_max_poc_lsb as usize)?; // lt_ref_pic_poc_lsb_sps
                long_term_used_by_curr.push(br.read_flag()?);
            }
        }
        let temporal_mvp_enabled = br.read_flag()?;
        br.skip_bits(1)?; // strong_intra_smoothing_enabled_flag
        let vui_flag_bit = br.position();
        let vui_present = br.read_flag()?;

        Ok(Self {
            header,
            vps_id,
            max_sub_layers_minus1,
            sps_id: sps_id as u8,
            chroma_format_idc,
            separate_colour_plane,
            width,
            height,
            conformance_window,
            log2_max_poc_lsb,
            log2_min_cb_size,
            log2_ctb_size,
            sample_adaptive_offset,
            short_term_rps,
            long_term_ref_pics_present,
            long_term_used_by_curr,
            temporal_mvp_enabled,
            vui_present,
            vui_flag_bit,
            size_bits: size_start..size_end,
            rbsp,
        })
    }

    /// CTB 边长 (像素)
    pub fn ctb_size(&self) -> u32 {
        1 << self.log2_ctb_size
    }

    /// 图像宽度 (CTB 数)
    pub fn width_in_ctbs(&self) -> u32 {
        self.width.div_ceil(self.ctb_size())
    }

    /// 图像高度 (CTB 数)
    pub fn height_in_ctbs(&self) -> u32 {
        self.height.div_ceil(self.ctb_size())
    }

    /// PicSizeInCtbsY
    pub fn pic_size_in_ctbs(&self) -> u32 {
        self.width_in_ctbs() * self.height_in_ctbs()
    }

    /// ChromaArrayType
    pub fn chroma_array_type(&self) -> u32 {
        if self.separate_colour_plane {
            0
        } else {
            self.chroma_format_idc
        }
    }
}

/// slice_segment_address 的位宽: Ceil(Log2(PicSizeInCtbsY))
pub fn address_bits(pic_size_in_ctbs: u32) -> u32 {
    if pic_size_in_ctbs <= 1 {
        0
    } else {
        32 - (pic_size_in_ctbs - 1).leading_zeros()
    }
}

/// 跳过 profile_tier_level(1, max_sub_layers_minus1)
fn skip_profile_tier_level(br: &mut BitReader<'_>, max_sub_layers_minus1: u8) -> ScvpResult<()> {
    // general_profile_space .. general_inbld_flag 共 88 位, 加 general_level_idc
    br.skip_bits(88 + 8)?;

    let mut profile_present = [false; 8];
    let mut level_present = [false; 8];
    for i in 0..max_sub_layers_minus1 as usize {
        profile_present[i] = br.read_flag()?;
        level_present[i] = br.read_flag()?;
    }
    if max_sub_layers_minus1 > 0 {
        br.skip_bits(2 * (8 - max_sub_layers_minus1 as usize))?;
    }
    for i in 0..max_sub_layers_minus1 as usize {
        if profile_present[i] {
            br.skip_bits(88)?;
        }
        if level_present[i] {
            br.skip_bits(8)?;
        }
    }
    Ok(())
}

/// 跳过 scaling_list_data()
fn skip_scaling_list_data(br: &mut BitReader<'_>) -> ScvpResult<()> {
    for size_id in 0..4u32 {
        let step = if size_id == 3 { 3 } else { 1 };
        let mut matrix_id = 0;
        while matrix_id < 6 {
            if !br.read_flag()? {
                br.read_ue()?; // scaling_list_pred_matrix_id_delta
            } else {
                let coef_num = 64.min(1u32 << (4 + (size_id << 1)));
                if size_id > 1 {
                    br.read_se()?; // scaling_list_dc_coef_minus8
                }
                for _ in 0..coef_num {
                    br.read_se()?;
                }
            }
            matrix_id += step;
        }
    }
    Ok(())
}

// ============================================================
// PPS
// ============================================================

/// PPS 中的 tile 配置
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TileConfig {
    /// tile 列数
    pub columns: u32,
    /// tile 行数
    pub rows: u32,
    /// uniform_spacing_flag
    pub uniform_spacing: bool,
    /// 显式列宽 (CTB), 共 columns-1 项, 最后一列由图像宽度推导
    pub column_widths: Vec<u32>,
    /// 显式行高 (CTB), 共 rows-1 项
    pub row_heights: Vec<u32>,
    /// loop_filter_across_tiles_enabled_flag
    pub loop_filter_across_tiles: bool,
}

impl TileConfig {
    /// 单 tile 配置
    pub fn single() -> Self {
        Self {
            columns: 1,
            rows: 1,
            uniform_spacing: true,
            column_widths: Vec::new(),
            row_heights: Vec::new(),
            loop_filter_across_tiles: false,
        }
    }

    /// 解析出完整的列宽与行高 (CTB)
    pub fn resolve(&self, width_in_ctbs: u32, height_in_ctbs: u32) -> ScvpResult<(Vec<u32>, Vec<u32>)> {
        let cols = resolve_spacing(
            self.uniform_spacing,
            self.columns,
            &self.column_widths,
            width_in_ctbs,
        )?;
        let rows = resolve_spacing(
            self.uniform_spacing,
            self.rows,
            &self.row_heights,
            height_in_ctbs,
        )?;
        Ok((cols, rows))
    }
}

fn resolve_spacing(uniform: bool, count: u32, explicit: &[u32], total: u32) -> ScvpResult<Vec<u32>> {
    if count == 0 || count > total {
        return Err(ScvpError::InvalidData(format!(
            "tile 数 {} 与图像尺寸 {} CTB 不匹配",
            count, total
        )));
    }
    if uniform {
        return Ok((0..count)
            .map(|i| ((i + 1) * total) / count - (i * total) / count)
            .collect());
    }
    let used = explicit
        .iter()
        .try_fold(0u32, |acc, &v| acc.checked_add(v))
        .unwrap_or(u32::MAX);
    if explicit.len() + 1 != count as usize || used >= total {
        return Err(ScvpError::InvalidData(format!(
            "显式 tile 尺寸之和 {} 超出图像尺寸 {} CTB",
            used, total
        )));
    }
    let mut sizes = explicit.to_vec();
    sizes.push(total - used);
    Ok(sizes)
}

/// 图像参数集
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pps {
    /// NAL 头
    pub header: NalHeader,
    /// pps_pic_parameter_set_id
    pub pps_id: u8,
    /// pps_seq_parameter_set_id
    pub sps_id: u8,
    /// dependent_slice_segments_enabled_flag
    pub dependent_slice_segments_enabled: bool,
    /// output_flag_present_flag
    pub output_flag_present: bool,
    /// num_extra_slice_header_bits
    pub num_extra_slice_header_bits: u32,
    /// cabac_init_present_flag
    pub cabac_init_present: bool,
    /// num_ref_idx_l0_default_active_minus1
    pub num_ref_idx_l0_default_active_minus1: u32,
    /// num_ref_idx_l1_default_active_minus1
    pub num_ref_idx_l1_default_active_minus1: u32,
    /// pps_slice_chroma_qp_offsets_present_flag
    pub slice_chroma_qp_offsets_present: bool,
    /// weighted_pred_flag
    pub weighted_pred: bool,
    /// weighted_bipred_flag
    pub weighted_bipred: bool,
    /// tiles_enabled_flag
    pub tiles_enabled: bool,
    /// entropy_coding_sync_enabled_flag
    pub entropy_coding_sync: bool,
    /// tile 配置 (未启用时为单 tile)
    pub tiles: TileConfig,
    /// pps_loop_filter_across_slices_enabled_flag
    pub loop_filter_across_slices: bool,
    /// deblocking_filter_override_enabled_flag
    pub deblocking_filter_override_enabled: bool,
    /// pps_deblocking_filter_disabled_flag
    pub deblocking_filter_disabled: bool,
    /// lists_modification_present_flag
    pub lists_modification_present: bool,
    /// slice_segment_header_extension_present_flag
    pub slice_header_extension_present: bool,
    /// chroma_qp_offset_list_enabled_flag (range extension)
    pub chroma_qp_offset_list_enabled: bool,
    /// RBSP (已去除防竞争字节)
    pub rbsp: Vec<u8>,
    /// 从 tiles_enabled_flag 到 tile 语法结束的位区间
    pub tiles_bits: Range<usize>,
}

impl Pps {
    /// 从完整 NAL (含 2 字节头) 解析
    pub fn parse(nal: &[u8]) -> ScvpResult<Self> {
        let header = NalHeader::parse(nal)?;
        let rbsp = unescape_rbsp(&nal[2..]);
        let mut br = BitReader::new(&rbsp);

        let pps_id = br.read_ue()?;
        if pps_id as usize >= MAX_PPS_COUNT {
            return Err(ScvpError::InvalidData(format!(
                "PPS: pps_id={} 超出范围",
                pps_id
            )));
        }
        let sps_id = br.read_ue()?;
        if sps_id as usize >= MAX_SPS_COUNT {
            return Err(ScvpError::InvalidData(format!(
                "PPS: sps_id={} 超出范围",
                sps_id
            )));
        }
        let dependent_slice_segments_enabled = br.read_flag()?;
        let output_flag_present = br.read_flag()?;
        let num_extra_slice_header_bits = br.read_bits(3)?;
        br.skip_bits(1)?; // sign_data_hiding_enabled_flag
        let cabac_init_present = br.read_flag()?;
        let num_ref_idx_l0_default_active_minus1 =
            br.read_ue_max(14, "num_ref_idx_l0_default_active_minus1")?;
        let num_ref_idx_l1_default_active_minus1 =
            br.read_ue_max(14, "num_ref_idx_l1_default_active_minus1")?;
        br.read_se()?; // init_qp_minus26
        br.skip_bits(1)?; // constrained_intra_pred_flag
        let transform_skip_enabled = br.read_flag()?;
        if br.read_flag()? {
            br.read_ue()?; // diff_cu_qp_delta_depth
        }
        br.read_se()?; // pps_cb_qp_offset
        br.read_se()?; // pps_cr_qp_offset
        let slice_chroma_qp_offsets_present = br.read_flag()?;
        let weighted_pred = br.read_flag()?;
        let weighted_bipred = br.read_flag()?;
        br.skip_bits(1)?; // transquant_bypass_enabled_flag

        let tiles_start = br.position();
        let tiles_enabled = br.read_flag()?;
        let entropy_coding_sync = br.read_flag()?;
        let tiles = if tiles_enabled {
            parse_tile_config(&mut br)?
        } else {
            TileConfig::single()
        };
        let tiles_end = br.position();

        let loop_filter_across_slices = br.read_flag()?;
        let mut deblocking_filter_override_enabled = false;
        let mut deblocking_filter_disabled = false;
        if br.read_flag()? {
            deblocking_filter_override_enabled = br.read_flag()?;
            deblocking_filter_disabled = br.read_flag()?;
            if !deblocking_filter_disabled {
                br.read_se()?; // pps_beta_offset_div2
                br.read_se()?; // pps_tc_offset_div2
            }
        }
        if br.read_flag()? {
            skip_scaling_list_data(&mut br)?;
        }
        let lists_modification_present = br.read_flag()?;
        br.read_ue()?; // log2_parallel_merge_level_minus2
        let slice_header_extension_present = br.read_flag()?;

        let mut chroma_qp_offset_list_enabled = false;
        let mut verify_trailing = true;
        if br.read_flag()? {
            let range_extension = br.read_flag()?;
            let other_extensions = br.read_bits(7)?;
            if range_extension {
                if transform_skip_enabled {
                    br.read_ue()?; // log2_max_transform_skip_block_size_minus2
                }
                br.skip_bits(1)?; // cross_component_prediction_enabled_flag
                chroma_qp_offset_list_enabled = br.read_flag()?;
                if chroma_qp_offset_list_enabled {
                    br.read_ue()?; // diff_cu_chroma_qp_offset_depth
                    let len = br.read_ue_max(5, "chroma_qp_offset_list_len_minus1")? + 1;
                    for _ in 0..len {
                        br.read_se()?;
                        br.read_se()?;
                    }
                }
                br.read_ue()?; // log2_sao_offset_scale_luma
                br.read_ue()?; // log2_sao_offset_scale_chroma
            }
            verify_trailing = other_extensions == 0;
        }
        if verify_trailing {
            br.read_trailing_bits()?;
        }

        Ok(Self {
            header,
            pps_id: pps_id as u8,
            sps_id: sps_id as u8,
            dependent_slice_segments_enabled,
            output_flag_present,
            num_extra_slice_header_bits,
            cabac_init_present,
            num_ref_idx_l0_default_active_minus1,
            num_ref_idx_l1_default_active_minus1,
            slice_chroma_qp_offsets_present,
            weighted_pred,
            weighted_bipred,
            tiles_enabled,
            entropy_coding_sync,
            tiles,
            loop_filter_across_slices,
            deblocking_filter_override_enabled,
            deblocking_filter_disabled,
            lists_modification_present,
            slice_header_extension_present,
            chroma_qp_offset_list_enabled,
            tiles_bits: tiles_start..tiles_end,
            rbsp,
        })
    }
}

fn parse_tile_config(br: &mut BitReader<'_>) -> ScvpResult<TileConfig> {
    let columns = br.read_ue_max(MAX_TILE_COLUMNS - 1, "num_tile_columns_minus1")? + 1;
    let rows = br.read_ue_max(MAX_TILE_ROWS - 1, "num_tile_rows_minus1")? + 1;
    let uniform_spacing = br.read_flag()?;
    let mut column_widths = Vec::new();
    let mut row_heights = Vec::new();
    if !uniform_spacing {
        for _ in 1..columns {
            column_widths.push(br.read_ue_max(MAX_PICTURE_DIMENSION - 1, "column_width_minus1")? + 1);
        }
        for _ in 1..rows {
            row_heights.push(br.read_ue_max(MAX_PICTURE_DIMENSION - 1, "row_height_minus1")? + 1);
        }
    }
    let loop_filter_across_tiles = br.read_flag()?;
    Ok(TileConfig {
        columns,
        rows,
        uniform_spacing,
        column_widths,
        row_heights,
        loop_filter_across_tiles,
    })
}
