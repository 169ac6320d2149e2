//! tile 网格与 tile 信息表.
//!
//! [`TileInfoTable`] 记录原始码流中每个 tile (按光栅顺序) 所在的面以及在面内的
//! 像素位置. 视口选块返回的是几何位置, 合并时需要的是码流中的 tile 序号,
//! 二者之间由 [`convert_selected_to_region_index`] 转换.

use serde::{Deserialize, Serialize};

use scvp_core::{ScvpError, ScvpResult};

use crate::projection::{FaceLayout, ProjectionType};

/// 单层码流允许的最大 tile 数
pub const MAX_TILE_NUM: usize = 1000;

/// 一个分辨率层的 tile 网格
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileLayout {
    pub columns_original: u32,
    pub rows_original: u32,
    pub columns_selected: u32,
    pub rows_selected: u32,
    /// tile 宽度 (像素)
    pub tile_width: u32,
    /// tile 高度 (像素)
    pub tile_height: u32,
}

impl TileLayout {
    /// 由帧尺寸和原始行列数构造, 初始选中全部 tile
    pub fn new(frame_width: u32, frame_height: u32, columns: u32, rows: u32) -> ScvpResult<Self> {
        if columns == 0 || rows == 0 {
            return Err(ScvpError::InvalidArgument(format!(
                "tile 行列数不能为 0: {}x{}",
                columns, rows
            )));
        }
        let count = columns.checked_mul(rows).map(|n| n as usize);
        if count.is_none_or(|n| n > MAX_TILE_NUM) {
            return Err(ScvpError::InvalidArgument(format!(
                "tile 网格 {}x{} 超过上限 {}",
                columns, rows, MAX_TILE_NUM
            )));
        }
        let tile_width = frame_width / columns;
        let tile_height = frame_height / rows;
        if tile_width == 0 || tile_height == 0 {
            return Err(ScvpError::InvalidArgument(format!(
                "帧 {}x{} 无法划分为 {}x{} 个 tile",
                frame_width, frame_height, columns, rows
            )));
        }
        Ok(Self {
            columns_original: columns,
            rows_original: rows,
            columns_selected: columns,
            rows_selected: rows,
            tile_width,
            tile_height,
        })
    }

    /// 设置选中区域的行列数, 不得超过原始行列数
    pub fn select(&mut self, columns: u32, rows: u32) -> ScvpResult<()> {
        if columns > self.columns_original || rows > self.rows_original {
            return Err(ScvpError::InvalidArgument(format!(
                "选中 {}x{} 超过原始网格 {}x{}",
                columns, rows, self.columns_original, self.rows_original
            )));
        }
        self.columns_selected = columns;
        self.rows_selected = rows;
        Ok(())
    }

    /// 原始 tile 总数
    pub fn original_count(&self) -> usize {
        (self.columns_original * self.rows_original) as usize
    }

    /// 选中 tile 总数
    pub fn selected_count(&self) -> usize {
        (self.columns_selected * self.rows_selected) as usize
    }

    /// 帧宽 (按 tile 对齐)
    pub fn frame_width(&self) -> u32 {
        self.tile_width * self.columns_original
    }

    /// 帧高 (按 tile 对齐)
    pub fn frame_height(&self) -> u32 {
        self.tile_height * self.rows_original
    }

    /// 光栅序号对应的 (列, 行)
    pub fn position(&self, index: usize) -> (u32, u32) {
        let cols = self.columns_original as usize;
        ((index % cols) as u32, (index / cols) as u32)
    }

    /// 像素位置所在 tile 的光栅序号
    pub fn index_at(&self, x: u32, y: u32) -> Option<usize> {
        let col = x / self.tile_width;
        let row = y / self.tile_height;
        if col >= self.columns_original || row >= self.rows_original {
            return None;
        }
        Some((row * self.columns_original + col) as usize)
    }
}

/// 单个原始 tile 的几何信息
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileInfo {
    pub face_id: u8,
    /// 在面内的水平位置 (像素)
    pub local_x: u32,
    /// 在面内的垂直位置 (像素)
    pub local_y: u32,
}

/// 高低分辨率两层的 tile 信息表
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileInfoTable {
    pub high: Vec<TileInfo>,
    pub low: Vec<TileInfo>,
}

/// 视口选块结果中的一个 tile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectedTile {
    /// 面内水平位置 (像素)
    pub x: u32,
    /// 面内垂直位置 (像素)
    pub y: u32,
    pub face_id: u8,
    /// 在原始码流中的 tile 序号, 未解析时为 `None`
    #[serde(default)]
    pub region_index: Option<usize>,
}

impl SelectedTile {
    pub fn new(x: u32, y: u32, face_id: u8) -> Self {
        Self {
            x,
            y,
            face_id,
            region_index: None,
        }
    }
}

/// 构建 tile 信息表.
///
/// 立方体投影只接受 2 行 3 列的面布局, 其他排列返回 `InvalidArgument`.
pub fn build_tile_info(
    projection: ProjectionType,
    faces: &FaceLayout,
    high: &TileLayout,
    low: Option<&TileLayout>,
) -> ScvpResult<TileInfoTable> {
    let high_info = build_tier(projection, faces, high)?;
    let low_info = match low {
        // 低分辨率层沿用同一面排列, 面尺寸由该层帧尺寸推出
        Some(layout) => build_tier(projection, faces, layout)?,
        None => Vec::new(),
    };
    log::debug!(
        "tile 信息表: 投影 {:?}, 高分辨率 {} 个, 低分辨率 {} 个",
        projection,
        high_info.len(),
        low_info.len()
    );
    Ok(TileInfoTable {
        high: high_info,
        low: low_info,
    })
}

fn build_tier(
    projection: ProjectionType,
    faces: &FaceLayout,
    layout: &TileLayout,
) -> ScvpResult<Vec<TileInfo>> {
    let count = layout.original_count();
    if count > MAX_TILE_NUM {
        return Err(ScvpError::InvalidArgument(format!(
            "tile 数 {} 超过上限 {}",
            count, MAX_TILE_NUM
        )));
    }

    match projection {
        ProjectionType::Equirect | ProjectionType::Planar => Ok((0..count)
            .map(|idx| {
                let (col, row) = layout.position(idx);
                TileInfo {
                    face_id: 0,
                    local_x: col * layout.tile_width,
                    local_y: row * layout.tile_height,
                }
            })
            .collect()),
        ProjectionType::Cubemap => {
            faces.validate()?;
            if faces.rows != 2 || faces.cols != 3 {
                return Err(ScvpError::InvalidArgument(format!(
                    "暂不支持 {}x{} 的立方体面布局, 仅支持 2 行 3 列",
                    faces.rows, faces.cols
                )));
            }
            let face_w = layout.frame_width() / 3;
            let face_h = layout.frame_height() / 2;
            if face_w % layout.tile_width != 0 || face_h % layout.tile_height != 0 {
                return Err(ScvpError::InvalidArgument(format!(
                    "tile {}x{} 跨越了 {}x{} 的面边界",
                    layout.tile_width, layout.tile_height, face_w, face_h
                )));
            }

            let mut table = Vec::with_capacity(count);
            for idx in 0..count {
                let (col, row) = layout.position(idx);
                let px = col * layout.tile_width;
                let py = row * layout.tile_height;
                let prop = faces
                    .get((py / face_h) as usize, (px / face_w) as usize)
                    .ok_or_else(|| {
                        ScvpError::InvalidArgument(format!("tile {} 不在任何面内", idx))
                    })?;
                let (lx, ly) = (px % face_w, py % face_h);
                let (local_x, local_y) = if prop.face.is_z_axis() {
                    (face_h - (ly + layout.tile_height), lx)
                } else {
                    prop.transform.invert_rect(
                        (lx, ly, layout.tile_width, layout.tile_height),
                        face_w,
                        face_h,
                    )?
                };
                table.push(TileInfo {
                    face_id: prop.face.id(),
                    local_x,
                    local_y,
                });
            }
            Ok(table)
        }
    }
}

/// 按 `(x, y, face_id)` 在信息表中查找每个选中 tile 的序号.
///
/// 已解析的 tile 保持不变, 因此重复调用结果相同.
pub fn convert_selected_to_region_index(
    selected: &mut [SelectedTile],
    table: &[TileInfo],
) -> ScvpResult<()> {
    for tile in selected.iter_mut().filter(|t| t.region_index.is_none()) {
        let index = table
            .iter()
            .position(|info| {
                info.face_id == tile.face_id && info.local_x == tile.x && info.local_y == tile.y
            })
            .ok_or_else(|| {
                ScvpError::NoValue(format!(
                    "面 {} 上的 tile ({}, {}) 不在 tile 信息表中",
                    tile.face_id, tile.x, tile.y
                ))
            })?;
        tile.region_index = Some(index);
    }
    Ok(())
}
