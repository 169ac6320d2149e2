//! 参数集与条带头改写.
//!
//! 改写只替换少数语法元素, 其余比特从原始 RBSP 原样复制:
//! - SPS: 图像宽高, 去掉裁剪窗口;
//! - PPS: tile 划分 (显式列宽行高, 关闭跨 tile 环路滤波);
//! - 条带头: 首条带标志, 条带地址, 可选的 PPS id, 入口点.
//!
//! 改写器只借用参数集表, 不会修改其中任何记录.

use std::sync::Arc;

use log::trace;

use scvp_core::rbsp::escape_rbsp;
use scvp_core::{BitWriter, ScvpError, ScvpResult};

use crate::nal::{NalHeader, NalUnit, NalUnitType, START_CODE, build_nal};
use crate::params::{
    MAX_PICTURE_DIMENSION, MAX_TILE_COLUMNS, MAX_TILE_ROWS, Pps, Sps, address_bits, stop_bit_position,
};
use crate::scanner::ParsedSlice;
use crate::slice::{SliceHeader, SliceType};
use crate::store::ParameterSetStore;

/// 条带头改写参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SliceOverrides {
    /// 新的 first_slice_segment_in_pic_flag
    pub first_slice_segment_in_pic: bool,
    /// 新的 slice_segment_address
    pub segment_address: u32,
    /// 输出图像的 PicSizeInCtbsY
    pub pic_size_in_ctbs: u32,
    /// 替换 slice_pic_parameter_set_id, `None` 保留原值
    pub pps_id: Option<u32>,
    /// 输出 PPS 是否启用 tile 或 WPP
    pub tiles_or_wpp_enabled: bool,
}

/// 输出图像的 tile 划分 (CTB)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLayout {
    /// 各列宽度
    pub column_widths: Vec<u32>,
    /// 各行高度
    pub row_heights: Vec<u32>,
    /// 输出条带引用的 PPS id
    pub pps_id: Option<u32>,
}

impl OutputLayout {
    /// 图像宽度 (CTB)
    pub fn width_in_ctbs(&self) -> u32 {
        self.column_widths.iter().sum()
    }

    /// 图像高度 (CTB)
    pub fn height_in_ctbs(&self) -> u32 {
        self.row_heights.iter().sum()
    }

    /// PicSizeInCtbsY
    pub fn pic_size_in_ctbs(&self) -> u32 {
        self.width_in_ctbs() * self.height_in_ctbs()
    }

    /// tile 总数
    pub fn tile_count(&self) -> usize {
        self.column_widths.len() * self.row_heights.len()
    }

    /// 是否需要开启 tile
    pub fn tiles_enabled(&self) -> bool {
        self.column_widths.len() > 1 || self.row_heights.len() > 1
    }

    /// 第 `index` 个 tile (光栅顺序) 的首 CTB 地址
    pub fn tile_address(&self, index: usize) -> Option<u32> {
        let cols = self.column_widths.len();
        if cols == 0 || index >= self.tile_count() {
            return None;
        }
        let (row, col) = (index / cols, index % cols);
        let x: u32 = self.column_widths[..col].iter().sum();
        let y: u32 = self.row_heights[..row].iter().sum();
        Some(y * self.width_in_ctbs() + x)
    }
}

/// 参数集改写器
#[derive(Debug, Clone, Copy)]
pub struct ParamSetRewriter<'s> {
    store: &'s ParameterSetStore,
}

impl<'s> ParamSetRewriter<'s> {
    /// 基于参数集表创建
    pub fn new(store: &'s ParameterSetStore) -> Self {
        Self { store }
    }

    /// 生效的 SPS/PPS
    fn active(&self) -> ScvpResult<(Arc<Sps>, Arc<Pps>)> {
        self.store.active()
    }

    /// 以新尺寸改写生效的 SPS, 返回带起始码的 NAL
    pub fn rewrite_sps(&self, width: u32, height: u32) -> ScvpResult<Vec<u8>> {
        self.rewrite_sps_with_vui(width, height, true)
    }

    /// 同 [`rewrite_sps`](Self::rewrite_sps), `keep_vui` 为假时去掉 VUI
    ///
    /// 去掉 VUI 时 SPS 扩展一并丢弃.
    pub fn rewrite_sps_with_vui(&self, width: u32, height: u32, keep_vui: bool) -> ScvpResult<Vec<u8>> {
        let (sps, _) = self.active()?;
        let min_cb = 1u32 << sps.log2_min_cb_size;
        if width == 0 || height == 0 || width % min_cb != 0 || height % min_cb != 0 {
            return Err(ScvpError::InvalidArgument(format!(
                "输出尺寸 {}x{} 不是最小编码块 {} 的整数倍",
                width, height, min_cb
            )));
        }
        if width > MAX_PICTURE_DIMENSION || height > MAX_PICTURE_DIMENSION {
            return Err(ScvpError::InvalidArgument(format!(
                "输出尺寸 {}x{} 超出上限 {}",
                width, height, MAX_PICTURE_DIMENSION
            )));
        }
        let stop = stop_bit_position(&sps.rbsp)?;

        let mut bw = BitWriter::with_capacity(sps.rbsp.len() + 8);
        bw.copy_bits(&sps.rbsp, 0, sps.size_bits.start)?;
        bw.write_ue(width);
        bw.write_ue(height);
        bw.write_bit(0); // conformance_window_flag
        if keep_vui || !sps.vui_present {
            bw.copy_bits(&sps.rbsp, sps.size_bits.end, stop)?;
        } else {
            bw.copy_bits(&sps.rbsp, sps.size_bits.end, sps.vui_flag_bit)?;
            bw.write_bit(0); // vui_parameters_present_flag
            bw.write_bit(0); // sps_extension_present_flag
        }
        bw.write_trailing_bits();
        trace!("改写 SPS {}: {}x{} -> {}x{}", sps.sps_id, sps.width, sps.height, width, height);
        Ok(build_nal(sps.header, &bw.finish()))
    }

    /// 以显式列宽/行高 (CTB) 改写生效的 PPS, 返回带起始码的 NAL
    pub fn rewrite_pps(&self, column_widths: &[u32], row_heights: &[u32]) -> ScvpResult<Vec<u8>> {
        let (_, pps) = self.active()?;
        let cols = column_widths.len() as u32;
        let rows = row_heights.len() as u32;
        if cols == 0 || rows == 0 || cols > MAX_TILE_COLUMNS || rows > MAX_TILE_ROWS {
            return Err(ScvpError::InvalidArgument(format!(
                "tile 网格 {}x{} 超出范围",
                cols, rows
            )));
        }
        if column_widths.iter().chain(row_heights).any(|&v| v == 0) {
            return Err(ScvpError::InvalidArgument("tile 尺寸不能为 0".into()));
        }
        let stop = stop_bit_position(&pps.rbsp)?;
        let tiles_enabled = cols > 1 || rows > 1;

        let mut bw = BitWriter::with_capacity(pps.rbsp.len() + 16);
        bw.copy_bits(&pps.rbsp, 0, pps.tiles_bits.start)?;
        bw.write_flag(tiles_enabled);
        bw.write_flag(pps.entropy_coding_sync);
        if tiles_enabled {
            bw.write_ue(cols - 1);
            bw.write_ue(rows - 1);
            bw.write_bit(0); // uniform_spacing_flag
            for &w in &column_widths[..column_widths.len() - 1] {
                bw.write_ue(w - 1);
            }
            for &h in &row_heights[..row_heights.len() - 1] {
                bw.write_ue(h - 1);
            }
            bw.write_bit(0); // loop_filter_across_tiles_enabled_flag
        }
        bw.copy_bits(&pps.rbsp, pps.tiles_bits.end, stop)?;
        bw.write_trailing_bits();
        trace!("改写 PPS {}: tile 网格 {}x{}", pps.pps_id, cols, rows);
        Ok(build_nal(pps.header, &bw.finish()))
    }

    /// 改写条带头, 返回新的条带头 RBSP (含 byte_alignment)
    pub fn rewrite_slice_header(&self, header: &SliceHeader, overrides: &SliceOverrides) -> ScvpResult<Vec<u8>> {
        let (_, pps) = self.store.resolve(header.pps_id)?;
        let rbsp = &header.rbsp;
        let mut bw = BitWriter::with_capacity(rbsp.len() + 8);

        bw.write_flag(overrides.first_slice_segment_in_pic);
        if let Some(flag) = header.no_output_of_prior_pics {
            bw.write_flag(flag);
        }
        match overrides.pps_id {
            Some(id) => bw.write_ue(id),
            None => bw.copy_bits(rbsp, header.pps_id_bits.start, header.pps_id_bits.end)?,
        }
        if overrides.first_slice_segment_in_pic {
            if header.dependent_slice_segment {
                return Err(ScvpError::InvalidData(
                    "依赖条带段不能作为图像的首条带".into(),
                ));
            }
        } else {
            if pps.dependent_slice_segments_enabled {
                bw.write_flag(header.dependent_slice_segment);
            }
            if overrides.segment_address >= overrides.pic_size_in_ctbs {
                return Err(ScvpError::InvalidArgument(format!(
                    "条带地址 {} 超出输出图像 {} CTB",
                    overrides.segment_address, overrides.pic_size_in_ctbs
                )));
            }
            bw.write_bits(overrides.segment_address, address_bits(overrides.pic_size_in_ctbs));
        }

        bw.copy_bits(rbsp, header.body_bits.start, header.body_bits.end)?;

        match (&header.entry_point_bits, overrides.tiles_or_wpp_enabled) {
            (Some(bits), true) => bw.copy_bits(rbsp, bits.start, bits.end)?,
            (None, true) => bw.write_ue(0), // num_entry_point_offsets
            (_, false) if header.num_entry_point_offsets > 0 => {
                return Err(ScvpError::Unsupported(format!(
                    "条带有 {} 个入口点, 输出未启用 tile/WPP",
                    header.num_entry_point_offsets
                )));
            }
            (_, false) => {}
        }

        bw.copy_bits(rbsp, header.extension_bits.start, header.extension_bits.end)?;
        bw.write_trailing_bits(); // byte_alignment()
        Ok(bw.finish())
    }

    /// 改写条带头并接上原始条带数据, 返回带起始码的条带 NAL
    pub fn rewrite_slice(&self, slice: &ParsedSlice<'_>, overrides: &SliceOverrides) -> ScvpResult<Vec<u8>> {
        let header_rbsp = self.rewrite_slice_header(&slice.header, overrides)?;
        assemble_slice_nal(&slice.nal, &header_rbsp)
    }

    /// 把一个单 tile 条带放到输出图像的第 `tile_index` 个 tile
    ///
    /// 返回条带 NAL 与输出是否启用 tile/WPP.
    pub fn stitch_slice_segment(
        &self,
        slice: &ParsedSlice<'_>,
        tile_index: usize,
        layout: &OutputLayout,
    ) -> ScvpResult<(Vec<u8>, bool)> {
        let address = layout.tile_address(tile_index).ok_or_else(|| {
            ScvpError::InvalidArgument(format!(
                "tile 索引 {} 超出输出网格 ({} 个 tile)",
                tile_index,
                layout.tile_count()
            ))
        })?;
        let (_, pps) = self.store.resolve(slice.header.pps_id)?;
        let enabled = layout.tiles_enabled() || pps.entropy_coding_sync;
        let overrides = SliceOverrides {
            first_slice_segment_in_pic: tile_index == 0,
            segment_address: address,
            pic_size_in_ctbs: layout.pic_size_in_ctbs(),
            pps_id: layout.pps_id,
            tiles_or_wpp_enabled: enabled,
        };
        Ok((self.rewrite_slice(slice, &overrides)?, enabled))
    }
}

/// 起始码 + 原 NAL 头 + 新条带头 + 原始条带数据
pub fn assemble_slice_nal(nal: &NalUnit<'_>, header_rbsp: &[u8]) -> ScvpResult<Vec<u8>> {
    let data = nal
        .slice_data()
        .ok_or_else(|| ScvpError::NoValue("NAL 尚未解析条带头".into()))?;
    let escaped = escape_rbsp(header_rbsp);
    let mut out = Vec::with_capacity(START_CODE.len() + 2 + escaped.len() + data.len());
    out.extend_from_slice(&START_CODE);
    out.extend_from_slice(&nal.header.to_bytes());
    out.extend_from_slice(&escaped);
    out.extend_from_slice(data);
    Ok(out)
}

/// 访问单元分隔符
pub fn aud_nal(slice_type: SliceType) -> Vec<u8> {
    let mut bw = BitWriter::new();
    bw.write_bits(slice_type.aud_pic_type(), 3);
    bw.write_trailing_bits();
    build_nal(NalHeader::new(NalUnitType::Aud), &bw.finish())
}
