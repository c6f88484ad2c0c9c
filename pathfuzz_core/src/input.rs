use std::borrow::Cow;

/// A fuzz input. The engine treats every input as an opaque byte sequence.
pub trait Input: Clone + Send + Sync + std::fmt::Debug + 'static {
    fn as_bytes(&self) -> &[u8];
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool;

    /// Text view of the input for logs and reports.
    ///
    /// Byte-level mutations routinely split multi-byte characters, so invalid
    /// sequences are replaced with U+FFFD instead of failing.
    fn to_lossy_string(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(self.as_bytes())
    }
}

impl Input for Vec<u8> {
    fn as_bytes(&self) -> &[u8] {
        self.as_slice()
    }
    fn len(&self) -> usize {
        self.len()
    }
    fn is_empty(&self) -> bool {
        self.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    #[test]
    fn vec_u8_impl_input() {
        let data: Vec<u8> = vec![1, 2, 3];
        let empty_data: Vec<u8> = vec![];
        assert_eq!(data.as_bytes(), &[1, 2, 3]);
        assert_eq!(data.len(), 3);
        assert!(!data.is_empty());
        assert!(empty_data.is_empty());
    }

    #[test]
    fn lossy_string_replaces_split_characters() {
        // "é" is 0xC3 0xA9; dropping the continuation byte leaves a dangling lead byte.
        let split: Vec<u8> = vec![b'a', 0xC3, b'b'];
        assert_eq!(split.to_lossy_string(), "a\u{FFFD}b");

        let valid: Vec<u8> = "héllo".as_bytes().to_vec();
        assert_eq!(valid.to_lossy_string(), "héllo");
    }
}
