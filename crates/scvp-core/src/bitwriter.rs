//! 比特流写入器.
//!
//! 生成 RBSP 比特串, 与 [`BitReader`](crate::bitreader::BitReader) 对应.
//! 防竞争字节由 [`crate::rbsp::escape_rbsp`] 在封装 NAL 时插入, 写入器本身只处理 RBSP.

use crate::{ScvpError, ScvpResult};
use crate::bitreader::BitReader;

/// 比特流写入器
///
/// # 示例
/// ```
/// use scvp_core::bitwriter::BitWriter;
///
/// let mut bw = BitWriter::new();
/// bw.write_bits(0b1011, 4);
/// bw.write_ue(0);
/// bw.write_trailing_bits();
/// assert_eq!(bw.finish(), vec![0b1011_1100]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct BitWriter {
    /// 输出缓冲区
    data: Vec<u8>,
    /// 当前字节 (正在填充)
    current_byte: u8,
    /// 当前字节中已填充的位数 (0-7)
    bit_count: u8,
    /// 输出上限 (字节)
    limit: Option<usize>,
}

impl BitWriter {
    /// 创建新的比特流写入器
    pub fn new() -> Self {
        Self::default()
    }

    /// 以指定容量创建比特流写入器
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            current_byte: 0,
            bit_count: 0,
            limit: None,
        }
    }

    /// 创建有输出上限的写入器
    ///
    /// 超出上限的内容仍会被缓冲, 但 [`BitWriter::finish_checked`] 会返回
    /// [`ScvpError::BufferOverflow`].
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..Self::with_capacity(limit.min(4096))
        }
    }

    /// 已写入的总位数
    pub fn bits_written(&self) -> usize {
        self.data.len() * 8 + self.bit_count as usize
    }

    /// 是否位于字节边界
    pub fn is_byte_aligned(&self) -> bool {
        self.bit_count == 0
    }

    /// 写入 1 个位
    pub fn write_bit(&mut self, bit: u32) {
        self.current_byte = (self.current_byte << 1) | (bit & 1) as u8;
        self.bit_count += 1;
        if self.bit_count >= 8 {
            self.data.push(self.current_byte);
            self.current_byte = 0;
            self.bit_count = 0;
        }
    }

    /// 写入 1 位标志
    pub fn write_flag(&mut self, flag: bool) {
        self.write_bit(u32::from(flag));
    }

    /// 写入 N 个位 (最多 32 位), 值的低 N 位高位在前
    pub fn write_bits(&mut self, value: u32, n: u32) {
        debug_assert!(n <= 32, "write_bits: n={} 超过 32 位", n);

        let mut remaining = n;
        while remaining > 0 {
            let available = 8 - self.bit_count as u32;
            let to_write = remaining.min(available);

            let shift = remaining - to_write;
            let mask = (1u32 << to_write) - 1;
            let bits = ((value >> shift) & mask) as u8;

            self.current_byte = if to_write == 8 {
                bits
            } else {
                (self.current_byte << to_write) | bits
            };
            self.bit_count += to_write as u8;

            if self.bit_count >= 8 {
                self.data.push(self.current_byte);
                self.current_byte = 0;
                self.bit_count = 0;
            }

            remaining -= to_write;
        }
    }

    /// 写入 N 个位 (最多 64 位)
    pub fn write_bits_u64(&mut self, value: u64, n: u32) {
        if n <= 32 {
            self.write_bits(value as u32, n);
        } else {
            self.write_bits((value >> 32) as u32, n - 32);
            self.write_bits(value as u32, 32);
        }
    }

    /// 写入 32 位有符号整数 (二进制补码)
    pub fn write_i32(&mut self, value: i32) {
        self.write_bits(value as u32, 32);
    }

    /// 写入无符号 Exp-Golomb 码 ue(v)
    pub fn write_ue(&mut self, value: u32) {
        let code = u64::from(value) + 1;
        let len = 64 - code.leading_zeros();
        self.write_bits(0, len - 1);
        self.write_bits_u64(code, len);
    }

    /// 写入有符号 Exp-Golomb 码 se(v)
    pub fn write_se(&mut self, value: i32) {
        let code = if value > 0 {
            (i64::from(value) * 2 - 1) as u32
        } else {
            (-i64::from(value) * 2) as u32
        };
        self.write_ue(code);
    }

    /// 从另一段 RBSP 中原样复制 `[start, end)` 位区间
    pub fn copy_bits(&mut self, src: &[u8], start: usize, end: usize) -> ScvpResult<()> {
        if end <= start {
            return Ok(());
        }
        let mut br = BitReader::new(src);
        br.skip_bits(start)?;
        let mut remaining = end - start;
        while remaining > 0 {
            let n = remaining.min(32);
            let bits = br.read_bits(n as u32)?;
            self.write_bits(bits, n as u32);
            remaining -= n;
        }
        Ok(())
    }

    /// 写入 rbsp_trailing_bits (停止位 1 + 补零对齐)
    pub fn write_trailing_bits(&mut self) {
        self.write_bit(1);
        self.align_zero();
    }

    /// 以 0 填充到字节边界
    pub fn align_zero(&mut self) {
        while self.bit_count != 0 {
            self.write_bit(0);
        }
    }

    /// 写入完整字节 (要求当前字节对齐)
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        if self.is_byte_aligned() {
            self.data.extend_from_slice(bytes);
        } else {
            for &b in bytes {
                self.write_bits(u32::from(b), 8);
            }
        }
    }

    /// 完成写入, 不足一字节的部分以 0 补齐
    pub fn finish(mut self) -> Vec<u8> {
        self.align_zero();
        self.data
    }

    /// 完成写入并检查输出上限
    pub fn finish_checked(self) -> ScvpResult<Vec<u8>> {
        let limit = self.limit;
        let data = self.finish();
        match limit {
            Some(capacity) if data.len() > capacity => Err(ScvpError::BufferOverflow {
                needed: data.len(),
                capacity,
            }),
            _ => Ok(data),
        }
    }
}
