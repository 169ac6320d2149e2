//! 会话配置.
//!
//! 配置结构均可序列化, 命令行工具从 JSON 文件加载.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use scvp_core::{ScvpError, ScvpResult};
use scvp_geometry::{FaceLayout, MAX_TILE_NUM, ProjectionType, TileLayout, ViewportParams};
use scvp_hevc::ScanMode;

/// 会话的使用方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageMode {
    /// 多路码流按网格拼接
    StitchOnly,
    /// 视口选块 + 高低分辨率合并
    #[default]
    MergeAndViewport,
    /// 逐个 NAL 解析
    ParseOneNal,
    /// 客户端解析 (NAL 与 RWPK)
    ParserForClient,
    /// 只做视口选块
    ViewportOnly,
}

impl UsageMode {
    /// 对应的扫描模式
    pub fn scan_mode(self) -> ScanMode {
        match self {
            Self::StitchOnly => ScanMode::StitchOnly,
            Self::MergeAndViewport => ScanMode::MergeAndViewport,
            Self::ParseOneNal | Self::ParserForClient => ScanMode::ParseOneNal,
            Self::ViewportOnly => ScanMode::ParseAllNals,
        }
    }
}

/// 一个分辨率层
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierConfig {
    /// 帧宽度 (像素)
    pub frame_width: u32,
    /// 帧高度 (像素)
    pub frame_height: u32,
    /// tile 列数
    #[serde(default = "default_one")]
    pub tile_columns: u32,
    /// tile 行数
    #[serde(default = "default_one")]
    pub tile_rows: u32,
}

fn default_one() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

impl TierConfig {
    /// 该层的 tile 网格
    pub fn tile_layout(&self) -> ScvpResult<TileLayout> {
        TileLayout::new(
            self.frame_width,
            self.frame_height,
            self.tile_columns,
            self.tile_rows,
        )
    }
}

/// 多路码流拼接参数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StitchConfig {
    /// 输出图像宽度
    pub frame_width: u32,
    /// 输出图像高度
    pub frame_height: u32,
    /// 水平方向的码流路数
    pub streams_wide: u32,
    /// 垂直方向的码流路数
    pub streams_high: u32,
    /// 各路码流是否均匀划分 tile
    #[serde(default = "default_true")]
    pub uniform_spacing: bool,
}

impl StitchConfig {
    /// 码流总路数, 每路至少贡献一个 tile, 不得超过 [`MAX_TILE_NUM`]
    pub fn stream_count(&self) -> ScvpResult<usize> {
        self.streams_wide
            .checked_mul(self.streams_high)
            .map(|n| n as usize)
            .filter(|&n| n > 0 && n <= MAX_TILE_NUM)
            .ok_or_else(|| {
                ScvpError::InvalidArgument(format!(
                    "拼接路数 {}x{} 超出范围",
                    self.streams_wide, self.streams_high
                ))
            })
    }
}

/// 外部选块插件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginDef {
    /// 动态库路径
    pub library: PathBuf,
    /// 算法名称
    #[serde(default)]
    pub name: String,
}

/// 视口参数
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ViewportConfig {
    /// 视口宽度 (像素)
    #[serde(default = "default_viewport_size")]
    pub width: u32,
    /// 视口高度 (像素)
    #[serde(default = "default_viewport_size")]
    pub height: u32,
    /// 水平视场角 (度)
    #[serde(default = "default_fov")]
    pub h_fov: f32,
    /// 垂直视场角 (度)
    #[serde(default = "default_fov")]
    pub v_fov: f32,
    /// 初始偏航角
    #[serde(default)]
    pub yaw: f32,
    /// 初始俯仰角
    #[serde(default)]
    pub pitch: f32,
}

fn default_viewport_size() -> u32 {
    1024
}

fn default_fov() -> f32 {
    90.0
}

impl Default for ViewportConfig {
    fn default() -> Self {
        Self {
            width: default_viewport_size(),
            height: default_viewport_size(),
            h_fov: default_fov(),
            v_fov: default_fov(),
            yaw: 0.0,
            pitch: 0.0,
        }
    }
}

/// 会话配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScvpConfig {
    /// 使用方式
    #[serde(default)]
    pub mode: UsageMode,
    /// 高分辨率层
    #[serde(default)]
    pub high: Option<TierConfig>,
    /// 低分辨率层
    #[serde(default)]
    pub low: Option<TierConfig>,
    /// 多路拼接参数, 仅 `StitchOnly` 使用
    #[serde(default)]
    pub stitch: Option<StitchConfig>,
    /// 在每帧前插入访问单元分隔符
    #[serde(default)]
    pub aud: bool,
    /// 输出 SPS 保留 VUI
    #[serde(default = "default_true")]
    pub vui: bool,
    /// 投影类型
    #[serde(default)]
    pub projection: ProjectionType,
    /// 立方体投影的面布局, 缺省为标准 3x2
    #[serde(default)]
    pub face_layout: Option<FaceLayout>,
    /// 外部选块插件, 需通过 `set_tile_selection` 注入实现
    #[serde(default)]
    pub plugin: Option<PluginDef>,
    /// 视口参数
    #[serde(default)]
    pub viewport: ViewportConfig,
    /// 合并结果中嵌入生成的 RWPK SEI
    #[serde(default)]
    pub embed_rwpk: bool,
}

impl Default for ScvpConfig {
    fn default() -> Self {
        Self {
            mode: UsageMode::default(),
            high: None,
            low: None,
            stitch: None,
            aud: false,
            vui: true,
            projection: ProjectionType::default(),
            face_layout: None,
            plugin: None,
            viewport: ViewportConfig::default(),
            embed_rwpk: false,
        }
    }
}

impl ScvpConfig {
    /// 高低分辨率合并配置
    pub fn merge(high: TierConfig, low: Option<TierConfig>) -> Self {
        Self {
            mode: UsageMode::MergeAndViewport,
            high: Some(high),
            low,
            ..Self::default()
        }
    }

    /// 多路码流拼接配置
    pub fn stitch(stitch: StitchConfig) -> Self {
        Self {
            mode: UsageMode::StitchOnly,
            stitch: Some(stitch),
            ..Self::default()
        }
    }

    /// 按使用方式检查必填项
    pub fn validate(&self) -> ScvpResult<()> {
        match self.mode {
            UsageMode::StitchOnly => {
                let stitch = self
                    .stitch
                    .as_ref()
                    .ok_or_else(|| ScvpError::InvalidArgument("拼接模式缺少 stitch 参数".into()))?;
                if stitch.frame_width == 0 || stitch.frame_height == 0 {
                    return Err(ScvpError::InvalidArgument(format!(
                        "拼接输出尺寸非法: {}x{}",
                        stitch.frame_width, stitch.frame_height
                    )));
                }
                stitch.stream_count()?;
            }
            UsageMode::MergeAndViewport | UsageMode::ViewportOnly => {
                let high = self
                    .high
                    .as_ref()
                    .ok_or_else(|| ScvpError::InvalidArgument("缺少高分辨率层参数".into()))?;
                high.tile_layout()?;
                if let Some(low) = &self.low {
                    low.tile_layout()?;
                }
                self.faces()?.validate()?;
            }
            UsageMode::ParseOneNal | UsageMode::ParserForClient => {}
        }
        Ok(())
    }

    /// 生效的面布局
    pub fn faces(&self) -> ScvpResult<FaceLayout> {
        if let Some(layout) = &self.face_layout {
            return Ok(layout.clone());
        }
        let high = self
            .high
            .as_ref()
            .ok_or_else(|| ScvpError::InvalidArgument("缺少高分辨率层参数".into()))?;
        Ok(match self.projection {
            ProjectionType::Cubemap => FaceLayout::cubemap_3x2(high.frame_width / 3),
            ProjectionType::Equirect | ProjectionType::Planar => {
                FaceLayout::single(high.frame_width, high.frame_height)
            }
        })
    }

    /// 视口选块的初始化参数
    pub fn viewport_params(&self) -> ScvpResult<ViewportParams> {
        let high = self
            .high
            .as_ref()
            .ok_or_else(|| ScvpError::InvalidArgument("缺少高分辨率层参数".into()))?;
        Ok(ViewportParams {
            projection: self.projection,
            frame_width: high.frame_width,
            frame_height: high.frame_height,
            tile_columns: high.tile_columns,
            tile_rows: high.tile_rows,
            viewport_width: self.viewport.width,
            viewport_height: self.viewport.height,
            h_fov: self.viewport.h_fov,
            v_fov: self.viewport.v_fov,
            face_layout: match self.projection {
                ProjectionType::Cubemap => Some(self.faces()?),
                _ => None,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_缺省值() {
        let json = r#"{
            "mode": "merge_and_viewport",
            "high": { "frame_width": 3840, "frame_height": 1920, "tile_columns": 4, "tile_rows": 2 }
        }"#;
        let config: ScvpConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.mode, UsageMode::MergeAndViewport);
        assert!(config.vui);
        assert!(!config.aud);
        assert_eq!(config.viewport.h_fov, 90.0);
        assert_eq!(config.low, None);
        config.validate().unwrap();
        let params = config.viewport_params().unwrap();
        assert_eq!((params.tile_columns, params.tile_rows), (4, 2));
    }

    #[test]
    fn test_模式校验() {
        let mut config = ScvpConfig::default();
        config.validate().unwrap_err();
        config.mode = UsageMode::ParseOneNal;
        config.validate().unwrap();

        let stitch = ScvpConfig::stitch(StitchConfig {
            frame_width: 1024,
            frame_height: 512,
            streams_wide: 0,
            streams_high: 1,
            uniform_spacing: true,
        });
        assert!(matches!(stitch.validate(), Err(ScvpError::InvalidArgument(_))));
    }

    #[test]
    fn test_拼接路数溢出() {
        let mut cfg = StitchConfig {
            frame_width: 1024,
            frame_height: 512,
            streams_wide: 0x1_0000,
            streams_high: 0x1_0000,
            uniform_spacing: true,
        };
        assert!(cfg.stream_count().is_err());
        assert!(ScvpConfig::stitch(cfg).validate().is_err());
        cfg.streams_wide = 40;
        cfg.streams_high = 40;
        assert!(cfg.stream_count().is_err());
        cfg.streams_high = 2;
        assert_eq!(cfg.stream_count().unwrap(), 80);
    }

    #[test]
    fn test_立方体缺省布局() {
        let mut config = ScvpConfig::merge(
            TierConfig {
                frame_width: 1536,
                frame_height: 1024,
                tile_columns: 6,
                tile_rows: 4,
            },
            None,
        );
        config.projection = ProjectionType::Cubemap;
        let faces = config.faces().unwrap();
        assert_eq!((faces.rows, faces.cols), (2, 3));
        assert_eq!(faces.faces[0].width, 512);
        assert!(config.viewport_params().unwrap().face_layout.is_some());
    }

    #[test]
    fn test_扫描模式映射() {
        assert_eq!(UsageMode::StitchOnly.scan_mode(), ScanMode::StitchOnly);
        assert_eq!(UsageMode::ParserForClient.scan_mode(), ScanMode::ParseOneNal);
        assert_eq!(UsageMode::ViewportOnly.scan_mode(), ScanMode::ParseAllNals);
    }
}
