//! 比特流读取器.
//!
//! 在 RBSP (已去除防竞争字节) 上按位读取, 提供 HEVC 语法中常用的 u(n)/ue(v)/se(v) 原语.
//!
//! 按大端位序读取 (MSB first). 越过缓冲区末尾的读取一律返回 [`ScvpError::Eof`],
//! 不会隐式补零.

use crate::{ScvpError, ScvpResult};

/// 比特流读取器
///
/// # 示例
/// ```
/// use scvp_core::bitreader::BitReader;
///
/// let data = [0b1011_1000, 0b0101_0101];
/// let mut br = BitReader::new(&data);
/// assert_eq!(br.read_bits(4).unwrap(), 0b1011);
/// assert_eq!(br.read_ue().unwrap(), 0);
/// assert_eq!(br.position(), 5);
/// ```
#[derive(Clone)]
pub struct BitReader<'a> {
    /// 源数据
    data: &'a [u8],
    /// 当前字节索引
    byte_pos: usize,
    /// 当前字节中的位位置 (0-7, 0 表示最高位)
    bit_pos: u8,
}

impl<'a> BitReader<'a> {
    /// 创建新的比特流读取器
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            byte_pos: 0,
            bit_pos: 0,
        }
    }

    /// 已读取的总位数
    pub fn position(&self) -> usize {
        self.byte_pos * 8 + self.bit_pos as usize
    }

    /// 剩余可读位数
    pub fn bits_left(&self) -> usize {
        (self.data.len() * 8).saturating_sub(self.position())
    }

    /// 是否已到达末尾
    pub fn is_eof(&self) -> bool {
        self.bits_left() == 0
    }

    /// 是否位于字节边界
    pub fn is_byte_aligned(&self) -> bool {
        self.bit_pos == 0
    }

    /// 底层数据
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// 读取 1 个位
    pub fn read_bit(&mut self) -> ScvpResult<u32> {
        if self.byte_pos >= self.data.len() {
            return Err(ScvpError::Eof);
        }

        let bit = (self.data[self.byte_pos] >> (7 - self.bit_pos)) & 1;
        self.bit_pos += 1;
        if self.bit_pos >= 8 {
            self.bit_pos = 0;
            self.byte_pos += 1;
        }

        Ok(u32::from(bit))
    }

    /// 读取 1 位标志
    pub fn read_flag(&mut self) -> ScvpResult<bool> {
        Ok(self.read_bit()? == 1)
    }

    /// 读取 N 个位 (最多 32 位)
    pub fn read_bits(&mut self, n: u32) -> ScvpResult<u32> {
        if n == 0 {
            return Ok(0);
        }
        if n > 32 {
            return Err(ScvpError::InvalidArgument(format!(
                "read_bits: n={} 超过 32 位",
                n,
            )));
        }
        if (n as usize) > self.bits_left() {
            return Err(ScvpError::Eof);
        }

        let mut result: u32 = 0;
        let mut remaining = n;

        while remaining > 0 {
            let available = 8 - self.bit_pos as u32;
            let to_read = remaining.min(available);

            let shift = available - to_read;
            let mask = ((1u32 << to_read) - 1) as u8;
            let bits = (self.data[self.byte_pos] >> shift) & mask;

            result = (result << to_read) | u32::from(bits);

            self.bit_pos += to_read as u8;
            if self.bit_pos >= 8 {
                self.bit_pos = 0;
                self.byte_pos += 1;
            }
            remaining -= to_read;
        }

        Ok(result)
    }

    /// 读取 N 个位 (最多 64 位)
    pub fn read_bits_u64(&mut self, n: u32) -> ScvpResult<u64> {
        if n <= 32 {
            return self.read_bits(n).map(u64::from);
        }
        if n > 64 {
            return Err(ScvpError::InvalidArgument(format!(
                "read_bits_u64: n={} 超过 64 位",
                n,
            )));
        }

        let high = u64::from(self.read_bits(n - 32)?);
        let low = u64::from(self.read_bits(32)?);
        Ok((high << 32) | low)
    }

    /// 读取 32 位有符号整数 (二进制补码)
    pub fn read_i32(&mut self) -> ScvpResult<i32> {
        Ok(self.read_bits(32)? as i32)
    }

    /// 读取无符号 Exp-Golomb 码 ue(v)
    pub fn read_ue(&mut self) -> ScvpResult<u32> {
        let mut leading_zeros = 0u32;
        while self.read_bit()? == 0 {
            leading_zeros += 1;
            if leading_zeros > 32 {
                return Err(ScvpError::InvalidData(
                    "Exp-Golomb 前导零超过 32 位".into(),
                ));
            }
        }
        if leading_zeros == 0 {
            return Ok(0);
        }
        let suffix = u64::from(self.read_bits(leading_zeros)?);
        let value = (1u64 << leading_zeros) - 1 + suffix;
        u32::try_from(value)
            .map_err(|_| ScvpError::InvalidData(format!("ue(v) 溢出: {}", value)))
    }

    /// 读取有符号 Exp-Golomb 码 se(v)
    pub fn read_se(&mut self) -> ScvpResult<i32> {
        let code = i64::from(self.read_ue()?);
        let value = if code & 1 == 1 {
            (code + 1) / 2
        } else {
            -(code / 2)
        };
        i32::try_from(value).map_err(|_| ScvpError::InvalidData(format!("se(v) 溢出: {}", value)))
    }

    /// 读取 ue(v) 并检查不超过 `max`
    pub fn read_ue_max(&mut self, max: u32, name: &str) -> ScvpResult<u32> {
        let value = self.read_ue()?;
        if value > max {
            return Err(ScvpError::InvalidData(format!(
                "{} = {} 超出范围 (最大 {})",
                name, value, max
            )));
        }
        Ok(value)
    }

    /// 跳过 N 个位
    pub fn skip_bits(&mut self, n: usize) -> ScvpResult<()> {
        if n > self.bits_left() {
            return Err(ScvpError::Eof);
        }
        let total = self.position() + n;
        self.byte_pos = total / 8;
        self.bit_pos = (total % 8) as u8;
        Ok(())
    }

    /// 跳过 N 个字节
    pub fn skip_bytes(&mut self, n: usize) -> ScvpResult<()> {
        self.skip_bits(n * 8)
    }

    /// 对齐到下一个字节边界
    pub fn align_to_byte(&mut self) {
        if self.bit_pos != 0 {
            self.bit_pos = 0;
            self.byte_pos += 1;
        }
    }

    /// 校验 rbsp_trailing_bits: 一个停止位 1, 随后补零直至字节对齐
    pub fn read_trailing_bits(&mut self) -> ScvpResult<()> {
        if self.read_bit()? != 1 {
            return Err(ScvpError::InvalidData("缺少 RBSP 停止位".into()));
        }
        while !self.is_byte_aligned() {
            if self.read_bit()? != 0 {
                return Err(ScvpError::InvalidData("RBSP 对齐位非零".into()));
            }
        }
        Ok(())
    }
}
