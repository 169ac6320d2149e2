//! # scvp-geometry
//!
//! 全景视频的几何映射, 不涉及码流语法.
//!
//! - 投影类型、立方体面编号与区域变换
//! - 分辨率层的 tile 网格与 tile 信息表
//! - 视口选块接口及内置的等距柱状投影实现
//!
//! ```rust
//! use scvp_geometry::{ErpTileSelection, HeadPose, TileSelection, ViewportParams};
//!
//! let mut selection = ErpTileSelection::new();
//! selection.initialize(&ViewportParams::equirect(3840, 1920, 4, 2)).unwrap();
//! selection.set_viewport_info(&HeadPose::new(0.0, 0.0)).unwrap();
//! assert_eq!(selection.tiles_in_viewport().unwrap().len(), 4);
//! ```

pub mod layout;
pub mod projection;
pub mod selection;

pub use layout::{
    MAX_TILE_NUM, SelectedTile, TileInfo, TileInfoTable, TileLayout, build_tile_info,
    convert_selected_to_region_index,
};
pub use projection::{CubeFace, FaceLayout, FaceProperty, ProjectionType, TransformType};
pub use selection::{ContentCoverage, ErpTileSelection, HeadPose, TileSelection, ViewportParams};
