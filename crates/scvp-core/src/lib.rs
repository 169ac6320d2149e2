//! # scvp-core
//!
//! SCVP 全景视频拼接核心库, 提供比特流读写、RBSP 转义、有界输出缓冲区和统一错误类型.
//!
//! 上层的 HEVC 语法解析 (scvp-hevc)、几何映射 (scvp-geometry) 与拼接引擎 (scvp-stitch)
//! 都建立在本 crate 之上.

pub mod bitreader;
pub mod bitwriter;
pub mod error;
pub mod output;
pub mod rbsp;

// 重导出常用类型
pub use bitreader::BitReader;
pub use bitwriter::BitWriter;
pub use error::{ErrorCode, ScvpError, ScvpResult};
pub use output::OutputBuffer;
