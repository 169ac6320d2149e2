//! # scvp-stitch
//!
//! SCVP 拼接引擎, 把多个 tile 码流重组为一个可解码的 HEVC 码流.
//!
//! - [`MergeSession`]: 会话, 持有参数集表、tile 网格与 SEI 设置
//! - [`TileMergeEngine`]: 写出参数集与改写后的条带
//! - [`MergeSolution`]: 高低分辨率 tile 的排列与区域打包信息
//! - [`ScvpConfig`]: 可序列化的会话配置
//!
//! ## 使用示例
//!
//! ```rust
//! use scvp_hevc::builder::StreamParams;
//! use scvp_hevc::nal::NalUnitType;
//! use scvp_hevc::SliceType;
//! use scvp_stitch::{MergeInput, MergeSession, ScvpConfig, TierConfig};
//! use scvp_geometry::SelectedTile;
//!
//! let params = StreamParams { tile_columns: 2, ..StreamParams::new(512, 256) };
//! let frame = params.frame(true, NalUnitType::IdrWRadl, SliceType::I, 0, &[vec![0x80], vec![0x80]]);
//!
//! let config = ScvpConfig::merge(
//!     TierConfig { frame_width: 512, frame_height: 256, tile_columns: 2, tile_rows: 1 },
//!     None,
//! );
//! let mut session = MergeSession::new(config).unwrap();
//! session.init(&[&frame]).unwrap();
//! let out = session
//!     .merge(MergeInput { high: &frame, low: None }, &[SelectedTile::new(256, 0, 0)])
//!     .unwrap();
//! assert_eq!(out.rwpk.num_hi_regions, 1);
//! ```

pub mod config;
pub mod engine;
pub mod packing;
pub mod session;

pub use config::{PluginDef, ScvpConfig, StitchConfig, TierConfig, UsageMode, ViewportConfig};
pub use engine::{
    HeaderPlan, MergedPicture, SlicePlacement, SliceTarget, TileMergeEngine, locate_source,
};
pub use packing::{MergeSolution, TierTiles, generate_rwpk};
pub use session::{
    MergeInput, MergeOutput, MergeSession, ParsedNal, PicInfo, Readiness, SeiSettings,
    StitchOutput,
};
