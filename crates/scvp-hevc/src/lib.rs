//! # scvp-hevc
//!
//! SCVP 的 HEVC 码流语法层, 只处理拼接所需的语法, 不做像素解码.
//!
//! - NAL 分割与扫描, 参数集表
//! - SPS/PPS/条带头解析, 按比特区间改写
//! - 全景视频相关 SEI (RWPK、投影、球面旋转、帧打包、视口) 编解码
//! - 合成码流生成器, 供测试与基准使用
//!
//! ## 使用示例
//!
//! ```rust
//! use scvp_hevc::builder::StreamParams;
//! use scvp_hevc::{NalScanner, ParamSetRewriter, ParameterSetStore, ScanMode};
//! use scvp_hevc::nal::NalUnitType;
//! use scvp_hevc::slice::SliceType;
//!
//! let params = StreamParams { tile_columns: 2, ..StreamParams::new(512, 256) };
//! let data = params.frame(true, NalUnitType::IdrWRadl, SliceType::I, 0, &[vec![0x80], vec![0x80]]);
//!
//! let mut store = ParameterSetStore::new();
//! let report = NalScanner::new(ScanMode::ParseAllNals).scan(&mut store, &data).unwrap();
//! assert_eq!(report.slices.len(), 2);
//!
//! let sps = ParamSetRewriter::new(&store).rewrite_sps(1024, 256).unwrap();
//! assert!(!sps.is_empty());
//! ```

pub mod builder;
pub mod nal;
pub mod params;
pub mod rewriter;
pub mod scanner;
pub mod sei;
pub mod slice;
pub mod store;

// 重导出常用类型
pub use nal::{NalHeader, NalUnit, NalUnitType};
pub use params::{Pps, Sps, TileConfig, Vps};
pub use rewriter::{OutputLayout, ParamSetRewriter, SliceOverrides};
pub use scanner::{NalInfo, NalScanner, ParsedSlice, ScanMode, ScanReport};
pub use sei::{RegionWisePacking, RectRegionPacking, RwpkCodec, SeiMessage};
pub use slice::{SliceHeader, SliceType};
pub use store::ParameterSetStore;
