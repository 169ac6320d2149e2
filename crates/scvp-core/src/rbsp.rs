//! RBSP 与 NAL 载荷之间的转换.
//!
//! NAL 载荷中任何 `00 00 0x` (x <= 3) 序列都必须插入防竞争字节 `0x03`,
//! 读取时需要先去掉它们再做比特解析.

/// 去除防竞争字节, 得到 RBSP
pub fn unescape_rbsp(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut zeros = 0usize;
    for &b in data {
        if zeros >= 2 && b == 0x03 {
            zeros = 0;
            continue;
        }
        zeros = if b == 0 { zeros + 1 } else { 0 };
        out.push(b);
    }
    out
}

/// 插入防竞争字节, 得到可直接放入 NAL 的载荷
pub fn escape_rbsp(rbsp: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(rbsp.len() + rbsp.len() / 64 + 4);
    let mut zeros = 0usize;
    for &b in rbsp {
        if zeros >= 2 && b <= 0x03 {
            out.push(0x03);
            zeros = 0;
        }
        zeros = if b == 0 { zeros + 1 } else { 0 };
        out.push(b);
    }
    out
}

/// 计算 RBSP 前 `rbsp_len` 字节在转义载荷中占用的字节数
///
/// 用于把在 RBSP 上解析得到的头部长度换算回原始码流中的偏移.
/// 若载荷不足 `rbsp_len` 字节, 返回 `None`.
pub fn escaped_len(escaped: &[u8], rbsp_len: usize) -> Option<usize> {
    if rbsp_len == 0 {
        return Some(0);
    }
    let mut produced = 0usize;
    let mut zeros = 0usize;
    for (i, &b) in escaped.iter().enumerate() {
        if zeros >= 2 && b == 0x03 {
            zeros = 0;
            continue;
        }
        zeros = if b == 0 { zeros + 1 } else { 0 };
        produced += 1;
        if produced == rbsp_len {
            return Some(i + 1);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_去除防竞争字节() {
        let data = [0x00, 0x00, 0x03, 0x01, 0x00, 0x00, 0x03, 0x00, 0x00, 0x03];
        assert_eq!(
            unescape_rbsp(&data),
            vec![0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00]
        );
    }

    #[test]
    fn test_插入防竞争字节() {
        let rbsp = [0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x04];
        assert_eq!(
            escape_rbsp(&rbsp),
            vec![0x00, 0x00, 0x03, 0x00, 0x00, 0x03, 0x01, 0x00, 0x00, 0x04]
        );
    }

    #[test]
    fn test_转义后可还原() {
        let rbsp: Vec<u8> = (0..600u32).map(|i| if i % 5 < 3 { 0 } else { (i % 4) as u8 }).collect();
        let escaped = escape_rbsp(&rbsp);
        assert!(escaped.len() > rbsp.len());
        assert_eq!(unescape_rbsp(&escaped), rbsp);
        assert!(
            !escaped
                .windows(3)
                .any(|w| w[0] == 0 && w[1] == 0 && w[2] <= 2),
            "转义结果中不应出现起始码前缀"
        );
    }

    #[test]
    fn test_转义长度换算() {
        let escaped = [0x40, 0x00, 0x00, 0x03, 0x01, 0x80];
        assert_eq!(escaped_len(&escaped, 0), Some(0));
        assert_eq!(escaped_len(&escaped, 3), Some(3));
        // 第 4 个 RBSP 字节 (0x01) 位于防竞争字节之后
        assert_eq!(escaped_len(&escaped, 4), Some(5));
        assert_eq!(escaped_len(&escaped, 5), Some(6));
        assert_eq!(escaped_len(&escaped, 6), None);
    }
}
