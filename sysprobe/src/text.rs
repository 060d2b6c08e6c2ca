use std::borrow::Cow;
use std::fmt;

/// Text stored in a fixed `N`-byte, null-terminated field.
///
/// Decoding stops at the first zero byte, or takes the whole field when
/// there is none. Encoding always leaves room for the terminator.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct FixedText<const N: usize> {
    bytes: [u8; N],
    len: usize,
}

impl<const N: usize> FixedText<N> {
    pub const CAPACITY: usize = N;

    pub fn decode(field: &[u8; N]) -> Self {
        let len = field.iter().position(|&b| b == 0).unwrap_or(N);
        let mut bytes = [0u8; N];
        bytes[..len].copy_from_slice(&field[..len]);
        Self { bytes, len }
    }

    /// 超过 N-1 字节时按 UTF-8 字符边界截断
    pub fn from_str_truncated(text: &str) -> Self {
        let mut len = text.len().min(N.saturating_sub(1));
        while !text.is_char_boundary(len) {
            len -= 1;
        }
        let mut bytes = [0u8; N];
        bytes[..len].copy_from_slice(&text.as_bytes()[..len]);
        Self { bytes, len }
    }

    pub fn encode(&self) -> [u8; N] {
        self.bytes
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn to_str_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(self.as_bytes())
    }
}

impl<const N: usize> Default for FixedText<N> {
    fn default() -> Self {
        Self {
            bytes: [0u8; N],
            len: 0,
        }
    }
}

impl<const N: usize> fmt::Display for FixedText<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_str_lossy())
    }
}

impl<const N: usize> fmt::Debug for FixedText<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.to_str_lossy())
    }
}
