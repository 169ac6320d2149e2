//! 有界输出缓冲区.
//!
//! 拼接结果写入调用方提供的固定大小缓冲区, 任何越界写入都返回
//! [`ScvpError::BufferOverflow`], 不做截断.

use crate::{ScvpError, ScvpResult};

/// 写入调用方缓冲区的游标
pub struct OutputBuffer<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> OutputBuffer<'a> {
    /// 包装调用方缓冲区
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// 已写入字节数
    pub fn len(&self) -> usize {
        self.pos
    }

    /// 是否尚未写入任何字节
    pub fn is_empty(&self) -> bool {
        self.pos == 0
    }

    /// 总容量
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// 剩余容量
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// 追加字节
    pub fn put(&mut self, bytes: &[u8]) -> ScvpResult<()> {
        let end = self.pos + bytes.len();
        if end > self.buf.len() {
            return Err(ScvpError::BufferOverflow {
                needed: end,
                capacity: self.buf.len(),
            });
        }
        self.buf[self.pos..end].copy_from_slice(bytes);
        self.pos = end;
        Ok(())
    }

    /// 已写入部分
    pub fn written(&self) -> &[u8] {
        &self.buf[..self.pos]
    }
}
