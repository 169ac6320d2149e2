//! 视口选块.
//!
//! [`TileSelection`] 是会话调用视口计算的唯一接口, 外部算法 (例如插件适配层)
//! 实现该 trait 后注入会话. [`ErpTileSelection`] 是内置的等距柱状投影实现.

use serde::{Deserialize, Serialize};

use scvp_core::{ScvpError, ScvpResult};

use crate::layout::SelectedTile;
use crate::projection::{FaceLayout, ProjectionType};

/// 视口计算的初始化参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewportParams {
    #[serde(default)]
    pub projection: ProjectionType,
    pub frame_width: u32,
    pub frame_height: u32,
    pub tile_columns: u32,
    pub tile_rows: u32,
    /// 输出视口宽度 (像素)
    #[serde(default = "default_viewport_size")]
    pub viewport_width: u32,
    /// 输出视口高度 (像素)
    #[serde(default = "default_viewport_size")]
    pub viewport_height: u32,
    /// 水平视场角 (度)
    #[serde(default = "default_fov")]
    pub h_fov: f32,
    /// 垂直视场角 (度)
    #[serde(default = "default_fov")]
    pub v_fov: f32,
    /// 立方体投影的面布局
    #[serde(default)]
    pub face_layout: Option<FaceLayout>,
}

fn default_viewport_size() -> u32 {
    1024
}

fn default_fov() -> f32 {
    90.0
}

impl ViewportParams {
    /// 等距柱状投影的默认参数
    pub fn equirect(frame_width: u32, frame_height: u32, tile_columns: u32, tile_rows: u32) -> Self {
        Self {
            projection: ProjectionType::Equirect,
            frame_width,
            frame_height,
            tile_columns,
            tile_rows,
            viewport_width: default_viewport_size(),
            viewport_height: default_viewport_size(),
            h_fov: default_fov(),
            v_fov: default_fov(),
            face_layout: None,
        }
    }
}

/// 头部姿态, 角度单位为度
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct HeadPose {
    /// 偏航角, [-180, 180]
    pub yaw: f32,
    /// 俯仰角, [-90, 90]
    pub pitch: f32,
    #[serde(default)]
    pub roll: f32,
    /// 覆盖初始化时的水平视场角
    #[serde(default)]
    pub h_fov: Option<f32>,
    /// 覆盖初始化时的垂直视场角
    #[serde(default)]
    pub v_fov: Option<f32>,
}

impl HeadPose {
    pub fn new(yaw: f32, pitch: f32) -> Self {
        Self {
            yaw,
            pitch,
            ..Self::default()
        }
    }

    fn validate(&self) -> ScvpResult<()> {
        if !(-180.0..=180.0).contains(&self.yaw) || !(-90.0..=90.0).contains(&self.pitch) {
            return Err(ScvpError::InvalidArgument(format!(
                "视角超出范围: yaw={}, pitch={}",
                self.yaw, self.pitch
            )));
        }
        for fov in [self.h_fov, self.v_fov].into_iter().flatten() {
            if !(fov > 0.0 && fov <= 360.0) {
                return Err(ScvpError::InvalidArgument(format!("视场角 {} 非法", fov)));
            }
        }
        Ok(())
    }
}

/// 视口在球面上的覆盖范围, 单位 2^-16 度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ContentCoverage {
    pub centre_azimuth: i32,
    pub centre_elevation: i32,
    pub azimuth_range: u32,
    pub elevation_range: u32,
}

/// 视口选块能力
pub trait TileSelection: Send {
    /// 初始化, 每个会话调用一次
    fn initialize(&mut self, params: &ViewportParams) -> ScvpResult<()>;

    /// 更新头部姿态
    fn set_viewport_info(&mut self, pose: &HeadPose) -> ScvpResult<()>;

    /// 当前姿态下需要的 tile
    fn tiles_in_viewport(&mut self) -> ScvpResult<Vec<SelectedTile>>;

    /// 最近一次选块对应的覆盖范围
    fn content_coverage(&self) -> Option<ContentCoverage> {
        None
    }

    /// 释放资源, 可重复调用
    fn uninit(&mut self) {}
}

/// 像素窗口, 水平方向不做回绕
#[derive(Debug, Clone, Copy, PartialEq)]
struct ViewWindow {
    x0: f64,
    x1: f64,
    y0: f64,
    y1: f64,
}

/// 内置的等距柱状投影选块
#[derive(Debug, Clone, Default)]
pub struct ErpTileSelection {
    params: Option<ViewportParams>,
    pose: HeadPose,
    window: Option<ViewWindow>,
}

impl ErpTileSelection {
    pub fn new() -> Self {
        Self::default()
    }

    fn compute_window(params: &ViewportParams, pose: &HeadPose) -> ViewWindow {
        let w = f64::from(params.frame_width);
        let h = f64::from(params.frame_height);
        let h_fov = f64::from(pose.h_fov.unwrap_or(params.h_fov)).min(360.0);
        let v_fov = f64::from(pose.v_fov.unwrap_or(params.v_fov)).min(180.0);

        let xc = (0.5 + f64::from(pose.yaw) / 360.0) * w;
        let yc = (0.5 - f64::from(pose.pitch) / 180.0) * h;
        let half_w = h_fov / 360.0 * w / 2.0;
        let half_h = v_fov / 180.0 * h / 2.0;
        ViewWindow {
            x0: xc - half_w,
            x1: xc + half_w,
            y0: (yc - half_h).max(0.0),
            y1: (yc + half_h).min(h),
        }
    }
}

/// 半开区间是否相交
fn overlaps(a0: f64, a1: f64, b0: f64, b1: f64) -> bool {
    a0 < b1 && b0 < a1
}

impl TileSelection for ErpTileSelection {
    fn initialize(&mut self, params: &ViewportParams) -> ScvpResult<()> {
        if params.projection != ProjectionType::Equirect {
            return Err(ScvpError::Unsupported(format!(
                "内置选块只支持等距柱状投影, 实际 {:?}",
                params.projection
            )));
        }
        if params.frame_width == 0
            || params.frame_height == 0
            || params.tile_columns == 0
            || params.tile_rows == 0
        {
            return Err(ScvpError::InvalidArgument(format!(
                "视口参数非法: 帧 {}x{}, tile {}x{}",
                params.frame_width, params.frame_height, params.tile_columns, params.tile_rows
            )));
        }
        if !(params.h_fov > 0.0 && params.h_fov <= 360.0 && params.v_fov > 0.0 && params.v_fov <= 180.0)
        {
            return Err(ScvpError::InvalidArgument(format!(
                "视场角非法: {}x{}",
                params.h_fov, params.v_fov
            )));
        }
        self.params = Some(params.clone());
        self.window = None;
        Ok(())
    }

    fn set_viewport_info(&mut self, pose: &HeadPose) -> ScvpResult<()> {
        pose.validate()?;
        self.pose = *pose;
        self.window = None;
        Ok(())
    }

    fn tiles_in_viewport(&mut self) -> ScvpResult<Vec<SelectedTile>> {
        let params = self
            .params
            .as_ref()
            .ok_or_else(|| ScvpError::NoValue("视口选块尚未初始化".into()))?;
        let window = Self::compute_window(params, &self.pose);

        let frame_w = f64::from(params.frame_width);
        let tile_w = params.frame_width / params.tile_columns;
        let tile_h = params.frame_height / params.tile_rows;

        let columns: Vec<u32> = (0..params.tile_columns)
            .filter(|&c| {
                if window.x1 - window.x0 >= frame_w {
                    return true;
                }
                let t0 = f64::from(c * tile_w);
                let t1 = f64::from((c + 1) * tile_w);
                [-frame_w, 0.0, frame_w]
                    .iter()
                    .any(|shift| overlaps(t0, t1, window.x0 + shift, window.x1 + shift))
            })
            .collect();
        let rows: Vec<u32> = (0..params.tile_rows)
            .filter(|&r| {
                let t0 = f64::from(r * tile_h);
                let t1 = f64::from((r + 1) * tile_h);
                overlaps(t0, t1, window.y0, window.y1)
            })
            .collect();

        let tiles: Vec<SelectedTile> = columns
            .iter()
            .flat_map(|&c| rows.iter().map(move |&r| SelectedTile::new(c * tile_w, r * tile_h, 0)))
            .collect();
        log::debug!(
            "视口 yaw={} pitch={}: 选中 {} 列 x {} 行",
            self.pose.yaw,
            self.pose.pitch,
            columns.len(),
            rows.len()
        );
        self.window = Some(window);
        Ok(tiles)
    }

    fn content_coverage(&self) -> Option<ContentCoverage> {
        let params = self.params.as_ref()?;
        let window = self.window?;
        let w = f64::from(params.frame_width);
        let h = f64::from(params.frame_height);
        let (x, vw) = (window.x0, window.x1 - window.x0);
        let (y, vh) = (window.y0, window.y1 - window.y0);
        let unit = 65536.0;
        Some(ContentCoverage {
            centre_azimuth: ((w / 2.0 - (x + vw / 2.0)) * 360.0 * unit / w).round() as i32,
            centre_elevation: ((h / 2.0 - (y + vh / 2.0)) * 180.0 * unit / h).round() as i32,
            azimuth_range: (vw.min(w) * 360.0 * unit / w).round() as u32,
            elevation_range: (vh * 180.0 * unit / h).round() as u32,
        })
    }

    fn uninit(&mut self) {
        self.params = None;
        self.window = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init(h_fov: f32, v_fov: f32) -> ErpTileSelection {
        let mut sel = ErpTileSelection::new();
        let params = ViewportParams {
            h_fov,
            v_fov,
            ..ViewportParams::equirect(3840, 1920, 4, 2)
        };
        sel.initialize(&params).unwrap();
        sel
    }

    fn positions(tiles: &[SelectedTile]) -> Vec<(u32, u32)> {
        tiles.iter().map(|t| (t.x, t.y)).collect()
    }

    #[test]
    fn test_正前方视口选中四块() {
        let mut sel = init(90.0, 90.0);
        sel.set_viewport_info(&HeadPose::new(0.0, 0.0)).unwrap();
        let tiles = sel.tiles_in_viewport().unwrap();
        assert_eq!(
            positions(&tiles),
            vec![(960, 0), (960, 960), (1920, 0), (1920, 960)]
        );
        assert!(tiles.iter().all(|t| t.face_id == 0 && t.region_index.is_none()));
    }

    #[test]
    fn test_水平回绕() {
        let mut sel = init(90.0, 60.0);
        sel.set_viewport_info(&HeadPose::new(180.0, 0.0)).unwrap();
        let tiles = sel.tiles_in_viewport().unwrap();
        let cols: Vec<u32> = tiles.iter().map(|t| t.x / 960).collect();
        assert_eq!(cols, vec![0, 0, 3, 3]);
    }

    #[test]
    fn test_极点附近只选一行() {
        let mut sel = init(90.0, 60.0);
        sel.set_viewport_info(&HeadPose::new(0.0, 80.0)).unwrap();
        let tiles = sel.tiles_in_viewport().unwrap();
        assert!(tiles.iter().all(|t| t.y == 0));
        assert_eq!(tiles.len(), 2);
    }

    #[test]
    fn test_全景视场角选中全部列() {
        let mut sel = init(90.0, 90.0);
        let pose = HeadPose {
            h_fov: Some(360.0),
            ..HeadPose::new(30.0, 0.0)
        };
        sel.set_viewport_info(&pose).unwrap();
        assert_eq!(sel.tiles_in_viewport().unwrap().len(), 8);
    }

    #[test]
    fn test_覆盖范围() {
        let mut sel = init(90.0, 90.0);
        assert_eq!(sel.content_coverage(), None);
        sel.set_viewport_info(&HeadPose::new(0.0, 0.0)).unwrap();
        sel.tiles_in_viewport().unwrap();
        let cc = sel.content_coverage().unwrap();
        assert_eq!(cc.centre_azimuth, 0);
        assert_eq!(cc.centre_elevation, 0);
        assert_eq!(cc.azimuth_range, 90 * 65536);
        assert_eq!(cc.elevation_range, 90 * 65536);

        sel.set_viewport_info(&HeadPose::new(-90.0, 0.0)).unwrap();
        sel.tiles_in_viewport().unwrap();
        assert_eq!(sel.content_coverage().unwrap().centre_azimuth, 90 * 65536);
    }

    #[test]
    fn test_非法参数() {
        let mut sel = ErpTileSelection::new();
        assert!(matches!(sel.tiles_in_viewport(), Err(ScvpError::NoValue(_))));
        let mut cube = ViewportParams::equirect(3840, 1920, 4, 2);
        cube.projection = ProjectionType::Cubemap;
        assert!(matches!(sel.initialize(&cube), Err(ScvpError::Unsupported(_))));
        let zero = ViewportParams::equirect(3840, 1920, 0, 2);
        assert!(sel.initialize(&zero).is_err());

        let mut sel = init(90.0, 90.0);
        assert!(sel.set_viewport_info(&HeadPose::new(200.0, 0.0)).is_err());
        assert!(sel.set_viewport_info(&HeadPose::new(0.0, -91.0)).is_err());
        sel.uninit();
        sel.uninit();
        assert!(sel.tiles_in_viewport().is_err());
    }
}
