//! 投影类型与立方体面布局.
//!
//! 面编号沿用 OMAF 立方体投影的顺序, 变换类型对应 RWPK 中的 `transform_type`.

use serde::{Deserialize, Serialize};

use scvp_core::{ScvpError, ScvpResult};

/// 面布局的最大行列数
pub const MAX_FACE_ROWS: usize = 6;
/// 面布局的最大列数
pub const MAX_FACE_COLS: usize = 6;

/// 输入视频的投影方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectionType {
    /// 等距柱状投影 (ERP)
    #[default]
    Equirect,
    /// 立方体投影 (CMP)
    Cubemap,
    /// 平面视频, 选块交给外部实现
    Planar,
}

impl ProjectionType {
    /// 投影包含的面数
    pub const fn face_count(self) -> usize {
        match self {
            Self::Cubemap => 6,
            Self::Equirect | Self::Planar => 1,
        }
    }
}

/// 立方体的面
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CubeFace {
    PositiveY = 0,
    PositiveX = 1,
    NegativeY = 2,
    NegativeZ = 3,
    NegativeX = 4,
    PositiveZ = 5,
}

impl CubeFace {
    /// 全部六个面, 按编号排列
    pub const ALL: [CubeFace; 6] = [
        Self::PositiveY,
        Self::PositiveX,
        Self::NegativeY,
        Self::NegativeZ,
        Self::NegativeX,
        Self::PositiveZ,
    ];

    /// 由编号构造
    pub fn from_id(id: u8) -> Option<Self> {
        Self::ALL.get(usize::from(id)).copied()
    }

    /// 面编号
    pub const fn id(self) -> u8 {
        self as u8
    }

    /// 是否为 ±Z 面 (坐标轴与其余四面不同)
    pub const fn is_z_axis(self) -> bool {
        matches!(self, Self::PositiveZ | Self::NegativeZ)
    }
}

/// 区域变换类型, 取值与 RWPK `transform_type` 一致
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformType {
    #[default]
    None = 0,
    /// 水平镜像
    MirrorHorizontal = 1,
    /// 旋转 180°
    Rotate180 = 2,
    /// 水平镜像后旋转 180°
    MirrorRotate180 = 3,
    /// 水平镜像后逆时针旋转 90°
    MirrorRotate90 = 4,
    /// 逆时针旋转 90°
    Rotate90 = 5,
    /// 水平镜像后逆时针旋转 270°
    MirrorRotate270 = 6,
    /// 逆时针旋转 270°
    Rotate270 = 7,
}

impl TransformType {
    /// 由编码值构造
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0 => Self::None,
            1 => Self::MirrorHorizontal,
            2 => Self::Rotate180,
            3 => Self::MirrorRotate180,
            4 => Self::MirrorRotate90,
            5 => Self::Rotate90,
            6 => Self::MirrorRotate270,
            7 => Self::Rotate270,
            _ => return None,
        })
    }

    /// 编码值
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// 是否交换宽高
    pub const fn swaps_axes(self) -> bool {
        (self as u8) >= 4
    }

    /// 把打包面内的矩形还原到未变换的面坐标.
    ///
    /// `(x, y, w, h)` 为打包面 (尺寸 `packed_w × packed_h`) 内的矩形,
    /// 返回原始面中对应矩形的左上角.
    pub fn invert_rect(
        self,
        (x, y, w, h): (u32, u32, u32, u32),
        packed_w: u32,
        packed_h: u32,
    ) -> ScvpResult<(u32, u32)> {
        let span = |total: u32, pos: u32, len: u32| {
            total.checked_sub(pos + len).ok_or_else(|| {
                ScvpError::InvalidArgument(format!(
                    "区域 {}+{} 超出面尺寸 {}",
                    pos, len, total
                ))
            })
        };
        Ok(match self {
            Self::None => (x, y),
            Self::MirrorHorizontal => (span(packed_w, x, w)?, y),
            Self::Rotate180 => (span(packed_w, x, w)?, span(packed_h, y, h)?),
            Self::MirrorRotate180 => (x, span(packed_h, y, h)?),
            Self::MirrorRotate90 => (y, x),
            Self::Rotate90 => (span(packed_h, y, h)?, x),
            Self::MirrorRotate270 => (span(packed_h, y, h)?, span(packed_w, x, w)?),
            Self::Rotate270 => (y, span(packed_w, x, w)?),
        })
    }
}

/// 面布局中的一格
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceProperty {
    /// 面在打包帧中的宽度 (像素)
    pub width: u32,
    /// 面在打包帧中的高度 (像素)
    pub height: u32,
    pub face: CubeFace,
    #[serde(default)]
    pub transform: TransformType,
}

/// 打包帧中的面排列, 按行存放
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceLayout {
    pub rows: usize,
    pub cols: usize,
    pub faces: Vec<FaceProperty>,
}

impl FaceLayout {
    /// 等距柱状投影的 1×1 布局
    pub fn single(width: u32, height: u32) -> Self {
        Self {
            rows: 1,
            cols: 1,
            faces: vec![FaceProperty {
                width,
                height,
                face: CubeFace::PositiveY,
                transform: TransformType::None,
            }],
        }
    }

    /// 标准 3×2 立方体布局:
    ///
    /// ```text
    /// +X -X +Y
    /// -Y +Z -Z
    /// ```
    pub fn cubemap_3x2(face_size: u32) -> Self {
        let order = [
            CubeFace::PositiveX,
            CubeFace::NegativeX,
            CubeFace::PositiveY,
            CubeFace::NegativeY,
            CubeFace::PositiveZ,
            CubeFace::NegativeZ,
        ];
        Self {
            rows: 2,
            cols: 3,
            faces: order
                .into_iter()
                .map(|face| FaceProperty {
                    width: face_size,
                    height: face_size,
                    face,
                    transform: TransformType::None,
                })
                .collect(),
        }
    }

    /// 检查尺寸限制与格数
    pub fn validate(&self) -> ScvpResult<()> {
        if self.rows == 0 || self.cols == 0 {
            return Err(ScvpError::InvalidArgument("面布局不能为空".into()));
        }
        if self.rows > MAX_FACE_ROWS || self.cols > MAX_FACE_COLS {
            return Err(ScvpError::InvalidArgument(format!(
                "面布局 {}x{} 超过 {}x{}",
                self.rows, self.cols, MAX_FACE_ROWS, MAX_FACE_COLS
            )));
        }
        if self.faces.len() != self.rows * self.cols {
            return Err(ScvpError::InvalidArgument(format!(
                "面布局 {}x{} 需要 {} 个面, 实际 {}",
                self.rows,
                self.cols,
                self.rows * self.cols,
                self.faces.len()
            )));
        }
        if self.faces.iter().any(|f| f.width == 0 || f.height == 0) {
            return Err(ScvpError::InvalidArgument("面尺寸不能为 0".into()));
        }
        Ok(())
    }

    /// 第 `row` 行第 `col` 列的面
    pub fn get(&self, row: usize, col: usize) -> Option<&FaceProperty> {
        if row >= self.rows || col >= self.cols {
            return None;
        }
        self.faces.get(row * self.cols + col)
    }
}
