//! 高低分辨率合并方案与区域打包信息.
//!
//! 合并后的图像只有一行 tile: 左侧是按列优先排列的高分辨率 tile, 右侧是全部
//! 低分辨率 tile. 每个源 tile 对应输出中的一个条带.

use scvp_core::{ScvpError, ScvpResult};
use scvp_geometry::TileLayout;
use scvp_hevc::{OutputLayout, RectRegionPacking, RegionWisePacking};

/// 一层参与合并的 tile
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierTiles {
    /// tile 个数
    pub count: u32,
    pub tile_width: u32,
    pub tile_height: u32,
    /// 选中区域是完整矩形时的 (行, 列), 合并时保持该形状
    pub grid: Option<(u32, u32)>,
}

/// 合并方案
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeSolution {
    /// 输出图像宽度 (像素)
    pub width: u32,
    /// 输出图像高度 (像素)
    pub height: u32,
    pub hr_rows: u32,
    pub hr_columns: u32,
    pub lr_rows: u32,
    pub lr_columns: u32,
    /// 输出 tile 列宽 (CTB)
    pub column_widths: Vec<u32>,
    /// 输出 tile 行高 (CTB), 只有一行
    pub row_heights: Vec<u32>,
    /// 高分辨率条带地址, 按输出顺序
    pub hr_addresses: Vec<u32>,
    /// 低分辨率条带地址, 按输出顺序
    pub lr_addresses: Vec<u32>,
}

fn gcd(a: u32, b: u32) -> u32 {
    if b == 0 { a } else { gcd(b, a % b) }
}

fn lcm(a: u32, b: u32) -> u32 {
    if a == 0 || b == 0 {
        0
    } else {
        a / gcd(a, b) * b
    }
}

fn in_ctbs(pixels: u32, ctb_size: u32, what: &str) -> ScvpResult<u32> {
    if pixels == 0 || pixels % ctb_size != 0 {
        return Err(ScvpError::InvalidArgument(format!(
            "{} {} 不是 CTB {} 的整数倍",
            what, pixels, ctb_size
        )));
    }
    Ok(pixels / ctb_size)
}

/// 单层时的行数: 完整矩形保持原形状, 否则取不超过平方根的最大因数
fn single_tier_rows(tier: &TierTiles) -> u32 {
    if let Some((rows, _)) = tier.grid {
        return rows;
    }
    let mut rows = (f64::from(tier.count).sqrt().floor() as u32).max(1);
    while tier.count % rows != 0 {
        rows -= 1;
    }
    rows
}

/// 高分辨率层与低分辨率层并存时的高分辨率行数
fn dual_tier_rows(high: &TierTiles, low: &TierTiles) -> ScvpResult<u32> {
    let rows = match high.grid {
        Some((rows, _)) => rows,
        None => {
            let height = lcm(high.tile_height, low.tile_height);
            let mut sqrt_h = f64::from(high.count).sqrt().ceil() as u32;
            while sqrt_h > 1 && high.count % sqrt_h != 0 {
                sqrt_h -= 1;
            }
            lcm(height / high.tile_height, sqrt_h.max(1))
        }
    };
    let height = rows * high.tile_height;
    if rows == 0 || height % low.tile_height != 0 || high.count % rows != 0 {
        return Err(ScvpError::InvalidArgument(format!(
            "无法合并: 高分辨率 {} 个 {}x{} tile 排成 {} 行, 低分辨率 tile 高 {}",
            high.count, high.tile_width, high.tile_height, rows, low.tile_height
        )));
    }
    Ok(rows)
}

fn slice_addresses(
    tier: &TierTiles,
    rows: u32,
    pic_width_ctbs: u32,
    x_offset_ctbs: u32,
    ctb_size: u32,
) -> Vec<u32> {
    let tile_w = tier.tile_width / ctb_size;
    let tile_h = tier.tile_height / ctb_size;
    (0..tier.count)
        .map(|i| (i % rows) * tile_h * pic_width_ctbs + (i / rows) * tile_w + x_offset_ctbs)
        .collect()
}

impl MergeSolution {
    /// 计算合并方案
    pub fn compute(
        high: Option<&TierTiles>,
        low: Option<&TierTiles>,
        ctb_size: u32,
    ) -> ScvpResult<Self> {
        let high = high.filter(|t| t.count > 0);
        let low = low.filter(|t| t.count > 0);
        for tier in high.iter().chain(low.iter()) {
            in_ctbs(tier.tile_width, ctb_size, "tile 宽度")?;
            in_ctbs(tier.tile_height, ctb_size, "tile 高度")?;
        }

        let (hr_rows, lr_rows) = match (high, low) {
            (Some(h), Some(l)) => {
                let hr_rows = dual_tier_rows(h, l)?;
                (hr_rows, hr_rows * h.tile_height / l.tile_height)
            }
            (Some(h), None) => (single_tier_rows(h), 0),
            (None, Some(l)) => (0, single_tier_rows(l)),
            (None, None) => {
                return Err(ScvpError::InvalidArgument("没有需要合并的 tile".into()));
            }
        };

        let hr_columns = high.map_or(0, |h| h.count / hr_rows);
        let lr_columns = match low {
            Some(l) => {
                if l.count % lr_rows != 0 {
                    return Err(ScvpError::InvalidArgument(format!(
                        "低分辨率 {} 个 tile 无法排成 {} 行",
                        l.count, lr_rows
                    )));
                }
                l.count / lr_rows
            }
            None => 0,
        };

        let hr_width = high.map_or(0, |h| hr_columns * h.tile_width);
        let width = hr_width + low.map_or(0, |l| lr_columns * l.tile_width);
        let height = match (high, low) {
            (Some(h), _) => hr_rows * h.tile_height,
            (None, Some(l)) => lr_rows * l.tile_height,
            (None, None) => 0,
        };
        let pic_width_ctbs = width / ctb_size;

        let mut column_widths = Vec::with_capacity((hr_columns + lr_columns) as usize);
        if let Some(h) = high {
            column_widths.extend(std::iter::repeat_n(h.tile_width / ctb_size, hr_columns as usize));
        }
        if let Some(l) = low {
            column_widths.extend(std::iter::repeat_n(l.tile_width / ctb_size, lr_columns as usize));
        }

        let solution = Self {
            width,
            height,
            hr_rows,
            hr_columns,
            lr_rows,
            lr_columns,
            column_widths,
            row_heights: vec![height / ctb_size],
            hr_addresses: high.map_or_else(Vec::new, |h| {
                slice_addresses(h, hr_rows, pic_width_ctbs, 0, ctb_size)
            }),
            lr_addresses: low.map_or_else(Vec::new, |l| {
                slice_addresses(l, lr_rows, pic_width_ctbs, hr_width / ctb_size, ctb_size)
            }),
        };
        log::debug!(
            "合并方案: {}x{}, 高分辨率 {}x{}, 低分辨率 {}x{}",
            solution.width,
            solution.height,
            solution.hr_columns,
            solution.hr_rows,
            solution.lr_columns,
            solution.lr_rows
        );
        Ok(solution)
    }

    /// 输出 PPS 使用的 tile 划分
    pub fn output_layout(&self, pps_id: Option<u32>) -> OutputLayout {
        OutputLayout {
            column_widths: self.column_widths.clone(),
            row_heights: self.row_heights.clone(),
            pps_id,
        }
    }
}

fn to_u16(value: u32, what: &str) -> ScvpResult<u16> {
    u16::try_from(value)
        .map_err(|_| ScvpError::InvalidArgument(format!("{} {} 超出 16 位范围", what, value)))
}

fn region(
    proj: (u32, u32, u32, u32),
    packed_left: u32,
    packed_top: u32,
) -> ScvpResult<RectRegionPacking> {
    let (left, top, width, height) = proj;
    Ok(RectRegionPacking {
        proj_reg_width: width,
        proj_reg_height: height,
        proj_reg_top: top,
        proj_reg_left: left,
        packed_reg_width: to_u16(width, "打包区域宽度")?,
        packed_reg_height: to_u16(height, "打包区域高度")?,
        packed_reg_top: to_u16(packed_top, "打包区域上边")?,
        packed_reg_left: to_u16(packed_left, "打包区域左边")?,
        ..RectRegionPacking::default()
    })
}

/// 由合并方案生成区域打包信息.
///
/// `high` 中的位置列表给出每个高分辨率 tile 在源帧中的像素位置, 顺序与输出一致.
/// 低分辨率 tile 的投影区域使用低分辨率帧内的坐标, 由 `low_res_pic_width/height`
/// 给出换算基准.
pub fn generate_rwpk(
    solution: &MergeSolution,
    high: Option<(&TileLayout, &[(u32, u32)])>,
    low: Option<&TileLayout>,
    time_stamp: u32,
) -> ScvpResult<RegionWisePacking> {
    let proj_frame = high
        .map(|(layout, _)| layout)
        .or(low)
        .ok_or_else(|| ScvpError::InvalidArgument("没有需要打包的区域".into()))?;

    let mut regions = Vec::new();
    let mut hr_width = 0;
    if let Some((layout, positions)) = high {
        let (tw, th) = (layout.tile_width, layout.tile_height);
        for (i, &(x, y)) in positions.iter().enumerate() {
            let i = i as u32;
            regions.push(region(
                (x, y, tw, th),
                (i / solution.hr_rows) * tw,
                (i % solution.hr_rows) * th,
            )?);
        }
        hr_width = solution.hr_columns * tw;
    }
    let num_hi_regions = u8::try_from(regions.len()).map_err(|_| {
        ScvpError::InvalidArgument(format!("高分辨率区域 {} 个超出上限 255", regions.len()))
    })?;

    if let Some(layout) = low {
        let (tw, th) = (layout.tile_width, layout.tile_height);
        let cols = layout.columns_original;
        for j in 0..layout.original_count() as u32 {
            regions.push(region(
                ((j % cols) * tw, (j / cols) * th, tw, th),
                (j / solution.lr_rows) * tw + hr_width,
                (j % solution.lr_rows) * th,
            )?);
        }
    }
    if regions.len() > usize::from(u8::MAX) {
        return Err(ScvpError::InvalidArgument(format!(
            "区域数 {} 超出上限 255",
            regions.len()
        )));
    }

    Ok(RegionWisePacking {
        constituent_picture_matching: false,
        proj_pic_width: proj_frame.frame_width(),
        proj_pic_height: proj_frame.frame_height(),
        packed_pic_width: to_u16(solution.width, "打包图像宽度")?,
        packed_pic_height: to_u16(solution.height, "打包图像高度")?,
        regions,
        num_hi_regions,
        low_res_pic_width: low.map_or(0, |l| l.frame_width()),
        low_res_pic_height: low.map_or(0, |l| l.frame_height()),
        time_stamp,
    })
}
