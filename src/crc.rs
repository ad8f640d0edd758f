//! 블록 전송용 CRC-16 (CCITT, XMODEM 변형)
//!
//! 다항식 0x1021, 초기값 0, 반사 없음

use std::fmt;

use crc::{Crc, Digest, CRC_16_XMODEM};

static CCITT: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);

/// 누적 체크섬
pub struct BlockCrc {
    digest: Digest<'static, u16>,
}

impl BlockCrc {
    pub fn new() -> Self {
        Self {
            digest: CCITT.digest(),
        }
    }

    /// 데이터 누적
    pub fn update(&mut self, data: &[u8]) {
        self.digest.update(data);
    }

    /// 최종 값
    pub fn finalize(self) -> u16 {
        self.digest.finalize()
    }

    /// 한 번에 계산
    pub fn checksum(data: &[u8]) -> u16 {
        CCITT.checksum(data)
    }
}

impl Default for BlockCrc {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for BlockCrc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockCrc").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_value() {
        assert_eq!(BlockCrc::checksum(b"123456789"), 0x31C3);
    }

    #[test]
    fn test_incremental_matches_oneshot() {
        let data: Vec<u8> = (0..53).collect();
        let mut crc = BlockCrc::new();
        for piece in data.chunks(7) {
            crc.update(piece);
        }
        assert_eq!(crc.finalize(), BlockCrc::checksum(&data));
    }

    #[test]
    fn test_empty_is_zero() {
        assert_eq!(BlockCrc::new().finalize(), 0);
    }
}
