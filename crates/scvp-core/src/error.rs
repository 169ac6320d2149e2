//! 统一错误类型定义.
//!
//! 所有 SCVP crate 共用的错误类型, 每个错误都能映射到一个对外的整数错误码.

use thiserror::Error;

/// 对外错误码
///
/// 封闭集合, 每个入口返回的错误都归入其中之一.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// 成功
    None,
    /// 输入为空
    NullPtr,
    /// 参数错误
    BadParam,
    /// 数据无效
    Invalid,
    /// 缺少必需的数据
    NoValue,
    /// 选块插件加载失败
    DlOpen,
    /// 选块插件符号解析失败
    DlSym,
}

impl ErrorCode {
    /// 整数形式的错误码
    pub fn as_i32(self) -> i32 {
        match self {
            Self::None => 0,
            Self::Invalid => -1,
            Self::BadParam => -8,
            Self::NullPtr => -13,
            Self::NoValue => -15,
            Self::DlOpen => -98,
            Self::DlSym => -99,
        }
    }
}

/// SCVP 统一错误类型
#[derive(Debug, Error)]
pub enum ScvpError {
    /// 无效参数
    #[error("无效参数: {0}")]
    InvalidArgument(String),

    /// 输入缓冲区为空
    #[error("输入为空: {0}")]
    EmptyInput(&'static str),

    /// 不支持的配置
    #[error("不支持的配置: {0}")]
    Unsupported(String),

    /// 无效数据 (损坏的码流等)
    #[error("无效数据: {0}")]
    InvalidData(String),

    /// 读取越过码流末尾
    #[error("已到达码流末尾")]
    Eof,

    /// 缺少必需的参数集或状态
    #[error("缺少数据: {0}")]
    NoValue(String),

    /// 输出缓冲区容量不足
    #[error("输出缓冲区不足: 需要 {needed} 字节, 容量 {capacity} 字节")]
    BufferOverflow { needed: usize, capacity: usize },

    /// 选块插件无法加载
    #[error("插件加载失败: {0}")]
    PluginLoad(String),

    /// 选块插件缺少入口
    #[error("插件符号缺失: {0}")]
    PluginSymbol(String),

    /// I/O 错误
    #[error("I/O 错误: {0}")]
    Io(#[from] std::io::Error),
}

impl ScvpError {
    /// 映射为对外错误码
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidArgument(_) | Self::Unsupported(_) => ErrorCode::BadParam,
            Self::EmptyInput(_) => ErrorCode::NullPtr,
            Self::NoValue(_) => ErrorCode::NoValue,
            Self::PluginLoad(_) => ErrorCode::DlOpen,
            Self::PluginSymbol(_) => ErrorCode::DlSym,
            Self::InvalidData(_) | Self::Eof | Self::BufferOverflow { .. } | Self::Io(_) => {
                ErrorCode::Invalid
            }
        }
    }
}

/// SCVP 统一 Result 类型
pub type ScvpResult<T> = Result<T, ScvpError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_错误码映射() {
        assert_eq!(
            ScvpError::InvalidArgument("x".into()).code(),
            ErrorCode::BadParam
        );
        assert_eq!(ScvpError::EmptyInput("hr").code(), ErrorCode::NullPtr);
        assert_eq!(ScvpError::Eof.code(), ErrorCode::Invalid);
        assert_eq!(ScvpError::NoValue("sps".into()).code(), ErrorCode::NoValue);
        assert_eq!(ScvpError::PluginLoad("a".into()).code().as_i32(), -98);
        assert_eq!(ScvpError::PluginSymbol("b".into()).code().as_i32(), -99);
        assert_eq!(ErrorCode::None.as_i32(), 0);
    }

    #[test]
    fn test_错误信息() {
        let err = ScvpError::BufferOverflow {
            needed: 10,
            capacity: 4,
        };
        assert_eq!(err.to_string(), "输出缓冲区不足: 需要 10 字节, 容量 4 字节");
    }
}
