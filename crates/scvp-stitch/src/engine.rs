//! tile 合并引擎.
//!
//! 引擎本身无状态: 调用方给出输出 tile 划分、可选的图像头以及每个条带的去向,
//! 引擎依次写出 AUD、参数集、SEI 和改写后的条带. 条带数据原样复制.

use std::ops::Range;

use log::{debug, trace};

use scvp_core::{ScvpError, ScvpResult};
use scvp_hevc::nal::START_CODE;
use scvp_hevc::rewriter::aud_nal;
use scvp_hevc::{
    OutputLayout, ParamSetRewriter, ParameterSetStore, ParsedSlice, SeiMessage, SliceOverrides,
    SliceType,
};

/// 在码流网格中定位输出 tile 的来源.
///
/// `column_counts[i]` 是第 i 列码流的 tile 列数, `row_counts[j]` 是第 j 行码流的
/// tile 行数. 返回 (码流序号, 码流内 tile 序号), 均为光栅顺序.
pub fn locate_source(
    row: u32,
    col: u32,
    column_counts: &[u32],
    row_counts: &[u32],
) -> Option<(usize, usize)> {
    let (stream_col, local_col) = locate_axis(col, column_counts)?;
    let (stream_row, local_row) = locate_axis(row, row_counts)?;
    let stream = stream_row * column_counts.len() + stream_col;
    let tile = local_row as usize * column_counts[stream_col] as usize + local_col as usize;
    Some((stream, tile))
}

fn locate_axis(pos: u32, counts: &[u32]) -> Option<(usize, u32)> {
    let mut start = 0;
    for (i, &n) in counts.iter().enumerate() {
        if pos < start + n {
            return Some((i, pos - start));
        }
        start += n;
    }
    None
}

/// 条带在输出图像中的位置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SliceTarget {
    /// 占据输出的第 n 个 tile (光栅顺序)
    Tile(usize),
    /// 从指定 CTB 地址开始
    Address(u32),
}

/// 一个待写出的条带
#[derive(Debug, Clone, Copy)]
pub struct SlicePlacement<'a> {
    /// 条带所在码流的参数集表
    pub store: &'a ParameterSetStore,
    /// 源条带
    pub slice: &'a ParsedSlice<'a>,
    /// 在输出中的位置
    pub target: SliceTarget,
}

/// 输出参数集的来源
#[derive(Debug, Clone, Copy)]
pub struct HeaderPlan<'a> {
    /// 以其中生效的 VPS/SPS/PPS 为模板
    pub store: &'a ParameterSetStore,
    /// 输出图像宽度 (像素)
    pub width: u32,
    /// 输出图像高度 (像素)
    pub height: u32,
    /// 是否保留 SPS 中的 VUI
    pub keep_vui: bool,
}

/// 一帧合并结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedPicture {
    /// 完整的 Annex B 访问单元
    pub bitstream: Vec<u8>,
    /// 参数集与 SEI 在 `bitstream` 中的范围, 未写出时为空
    pub header: Range<usize>,
    /// 首条带的类型
    pub slice_type: Option<SliceType>,
}

impl MergedPicture {
    /// 参数集与 SEI 部分
    pub fn header_bytes(&self) -> &[u8] {
        &self.bitstream[self.header.clone()]
    }
}

/// tile 合并引擎
#[derive(Debug, Clone, Copy, Default)]
pub struct TileMergeEngine {
    aud: bool,
}

impl TileMergeEngine {
    /// `aud` 为真时每帧以访问单元分隔符开头
    pub fn new(aud: bool) -> Self {
        Self { aud }
    }

    /// 合并一帧
    ///
    /// `header` 为 `None` 时不写参数集, 沿用之前帧的. `seis` 紧跟在参数集之后.
    pub fn merge(
        &self,
        layout: &OutputLayout,
        header: Option<&HeaderPlan<'_>>,
        seis: &[SeiMessage],
        slices: &[SlicePlacement<'_>],
    ) -> ScvpResult<MergedPicture> {
        let first = slices.first().ok_or(ScvpError::EmptyInput("条带"))?;
        let slice_type = first.slice.header.slice_type;
        let payload: usize = slices.iter().map(|p| p.slice.nal.total_len()).sum();
        let mut out = Vec::with_capacity(payload + 256);

        if self.aud {
            out.extend(aud_nal(slice_type.unwrap_or(SliceType::I)));
        }

        let header_start = out.len();
        if let Some(plan) = header {
            self.write_parameter_sets(&mut out, layout, plan)?;
        }
        for sei in seis {
            out.extend(sei.to_nal()?);
        }
        let header_range = header_start..out.len();

        for placement in slices {
            out.extend(self.place_slice(layout, placement)?);
        }
        debug!(
            "合并完成: {} 个条带, 输出 {} 字节 (头部 {} 字节)",
            slices.len(),
            out.len(),
            header_range.len()
        );
        Ok(MergedPicture {
            bitstream: out,
            header: header_range,
            slice_type,
        })
    }

    fn write_parameter_sets(
        &self,
        out: &mut Vec<u8>,
        layout: &OutputLayout,
        plan: &HeaderPlan<'_>,
    ) -> ScvpResult<()> {
        let (sps, pps) = plan.store.active()?;
        let vps = plan
            .store
            .vps(u32::from(sps.vps_id))
            .ok_or_else(|| ScvpError::NoValue(format!("SPS 引用的 VPS {} 尚未解析", sps.vps_id)))?;
        if let Some(id) = layout.pps_id {
            if id != u32::from(pps.pps_id) {
                return Err(ScvpError::InvalidArgument(format!(
                    "输出条带引用 PPS {}, 而输出 PPS 为 {}",
                    id, pps.pps_id
                )));
            }
        }
        let rewriter = ParamSetRewriter::new(plan.store);
        out.extend_from_slice(&START_CODE);
        out.extend_from_slice(&vps.nal);
        out.extend(rewriter.rewrite_sps_with_vui(plan.width, plan.height, plan.keep_vui)?);
        out.extend(rewriter.rewrite_pps(&layout.column_widths, &layout.row_heights)?);
        trace!(
            "写出参数集: {}x{}, tile 网格 {}x{}",
            plan.width,
            plan.height,
            layout.column_widths.len(),
            layout.row_heights.len()
        );
        Ok(())
    }

    fn place_slice(&self, layout: &OutputLayout, placement: &SlicePlacement<'_>) -> ScvpResult<Vec<u8>> {
        let rewriter = ParamSetRewriter::new(placement.store);
        match placement.target {
            SliceTarget::Tile(index) => {
                let (nal, _) = rewriter.stitch_slice_segment(placement.slice, index, layout)?;
                Ok(nal)
            }
            SliceTarget::Address(address) => {
                let (_, pps) = placement.store.resolve(placement.slice.header.pps_id)?;
                let overrides = SliceOverrides {
                    first_slice_segment_in_pic: address == 0,
                    segment_address: address,
                    pic_size_in_ctbs: layout.pic_size_in_ctbs(),
                    pps_id: layout.pps_id,
                    tiles_or_wpp_enabled: layout.tiles_enabled() || pps.entropy_coding_sync,
                };
                rewriter.rewrite_slice(placement.slice, &overrides)
            }
        }
    }
}
