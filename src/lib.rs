//! # SCVP
//!
//! 360 度分块 HEVC 视频的视口选块与码流合并.
//!
//! 服务端把全景视频编码为独立的 tile, 客户端只取视口可见的高分辨率 tile 与
//! 一路低分辨率全景, 在压缩域中合并为一路标准码流交给普通解码器:
//! - **码流语法层**: NAL 扫描, 参数集改写, 条带头重写, SEI 编解码
//! - **几何**: 投影与面布局, tile 信息表, 视口选块
//! - **拼接**: 高低分辨率合并方案, 区域打包生成, 多路拼接会话
//!
//! # 快速开始
//!
//! ```rust
//! use scvp::geometry::HeadPose;
//! use scvp::stitch::{MergeSession, ScvpConfig, TierConfig, UsageMode};
//!
//! let mut config = ScvpConfig::merge(
//!     TierConfig { frame_width: 3840, frame_height: 1920, tile_columns: 4, tile_rows: 2 },
//!     None,
//! );
//! config.mode = UsageMode::ViewportOnly;
//! let mut session = MergeSession::new(config).unwrap();
//! session.init(&[]).unwrap();
//! let tiles = session.compute_viewport_tiles(&HeadPose::new(0.0, 0.0)).unwrap();
//! assert_eq!(tiles.len(), 4);
//! ```
//!
//! # Crate 结构
//!
//! | Crate | 功能 |
//! |-------|------|
//! | `scvp-core` | 错误类型, 位读写, RBSP 转义, 输出缓冲区 |
//! | `scvp-hevc` | HEVC 语法层 |
//! | `scvp-geometry` | 投影几何与视口选块 |
//! | `scvp-stitch` | 合并引擎与会话 |

/// 核心类型与工具
pub use scvp_core as core;

/// HEVC 码流语法层
pub use scvp_hevc as hevc;

/// 投影几何与视口选块
pub use scvp_geometry as geometry;

/// 合并引擎与会话
pub use scvp_stitch as stitch;

pub use scvp_core::{ErrorCode, ScvpError, ScvpResult};

/// 获取 SCVP 版本号
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
