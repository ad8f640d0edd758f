//! SDO 프레임 정의
//!
//! 모든 프레임은 8바이트 고정, 다중 바이트 정수는 리틀 엔디언
//!
//! ```text
//! [0]    command byte: 상위 3비트 = 명령 계열, 나머지 = 계열별 플래그/시퀀스
//! [1..3] object index
//! [3]    object subindex
//! [4..8] 계열별: 페이로드, 선언 크기, 중단 코드
//! ```

use bytes::{Buf, BufMut};

use crate::abort::AbortCode;
use crate::{Error, Result, FRAME_LEN};

/// 8바이트 프레임
pub type Frame = [u8; FRAME_LEN];

/// 명령 계열 마스크 (상위 3비트)
pub const COMMAND_MASK: u8 = 0xE0;

// 서버 응답 명령
pub const RESPONSE_SEGMENT_UPLOAD: u8 = 0 << 5;
pub const RESPONSE_SEGMENT_DOWNLOAD: u8 = 1 << 5;
pub const RESPONSE_UPLOAD: u8 = 2 << 5;
pub const RESPONSE_DOWNLOAD: u8 = 3 << 5;
pub const RESPONSE_ABORTED: u8 = 4 << 5;
pub const RESPONSE_BLOCK_DOWNLOAD: u8 = 5 << 5;
pub const RESPONSE_BLOCK_UPLOAD: u8 = 6 << 5;

// 개시(initiate) 플래그
pub const EXPEDITED: u8 = 0x02;
pub const SIZE_SPECIFIED: u8 = 0x01;

// 분할(segmented) 플래그
pub const TOGGLE_BIT: u8 = 0x10;
pub const NO_MORE_DATA: u8 = 0x01;

// 블록 플래그
pub const BLOCK_SIZE_SPECIFIED: u8 = 0x02;
pub const CRC_SUPPORTED: u8 = 0x04;
pub const NO_MORE_BLOCKS: u8 = 0x80;
pub const SEQUENCE_MASK: u8 = 0x7F;

/// 세그먼트당 최대 데이터 바이트
pub const SEGMENT_DATA_LEN: usize = 7;

/// 익스피다이티드 최대 데이터 바이트
pub const EXPEDITED_DATA_LEN: usize = 4;

/// 클라이언트 요청 명령 계열
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandFamily {
    DownloadSegment,
    InitiateDownload,
    InitiateUpload,
    UploadSegment,
    Abort,
    BlockUpload,
    BlockDownload,
    Unknown,
}

impl CommandFamily {
    /// command byte의 상위 3비트로 분류
    pub fn from_command(command: u8) -> Self {
        match command >> 5 {
            0 => Self::DownloadSegment,
            1 => Self::InitiateDownload,
            2 => Self::InitiateUpload,
            3 => Self::UploadSegment,
            4 => Self::Abort,
            5 => Self::BlockUpload,
            6 => Self::BlockDownload,
            _ => Self::Unknown,
        }
    }
}

/// 블록 계열 하위 명령 (하위 2비트)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BlockSubcommand {
    Initiate = 0,
    End = 1,
    Response = 2,
    Start = 3,
}

impl BlockSubcommand {
    pub fn from_command(command: u8) -> Self {
        match command & 0x03 {
            0 => Self::Initiate,
            1 => Self::End,
            2 => Self::Response,
            _ => Self::Start,
        }
    }
}

/// 전송 대상 오브젝트
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Target {
    pub index: u16,
    pub subindex: u8,
}

impl Target {
    pub fn new(index: u16, subindex: u8) -> Self {
        Self { index, subindex }
    }

    /// 개시 계열 프레임의 바이트 1..4에서 대상 파싱
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 4 {
            return Err(Error::FrameTooShort {
                expected: 4,
                got: data.len(),
            });
        }
        let mut buf = &data[1..4];
        let index = buf.get_u16_le();
        let subindex = buf.get_u8();
        Ok(Self { index, subindex })
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:04X}:{:02X}", self.index, self.subindex)
    }
}

/// 바이트 4..8의 리틀 엔디언 u32 (없으면 None)
pub fn read_u32(data: &[u8]) -> Option<u32> {
    data.get(4..8).map(|mut buf| buf.get_u32_le())
}

/// 바이트 1..3의 CRC 값
pub fn read_crc(data: &[u8]) -> Option<u16> {
    data.get(1..3).map(|mut buf| buf.get_u16_le())
}

/// 토글 상태를 command byte 비트로
pub fn toggle_bit(toggle: bool) -> u8 {
    if toggle {
        TOGGLE_BIT
    } else {
        0
    }
}

/// 로그용 16진 표기
pub fn hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("0x{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

fn with_target(command: u8, target: Target) -> Frame {
    let mut frame = [0u8; FRAME_LEN];
    let mut buf = &mut frame[..];
    buf.put_u8(command);
    buf.put_u16_le(target.index);
    buf.put_u8(target.subindex);
    frame
}

/// 익스피다이티드 업로드 응답 (데이터 4바이트 이하)
pub fn expedited_upload(target: Target, data: &[u8]) -> Frame {
    debug_assert!(!data.is_empty() && data.len() <= EXPEDITED_DATA_LEN);
    let unused = (EXPEDITED_DATA_LEN - data.len()) as u8;
    let command = RESPONSE_UPLOAD | EXPEDITED | SIZE_SPECIFIED | (unused << 2);
    let mut frame = with_target(command, target);
    frame[4..4 + data.len()].copy_from_slice(data);
    frame
}

/// 분할 업로드 개시 응답
pub fn segmented_upload_initiate(target: Target, size: u32) -> Frame {
    let mut frame = with_target(RESPONSE_UPLOAD | SIZE_SPECIFIED, target);
    (&mut frame[4..]).put_u32_le(size);
    frame
}

/// 분할 업로드 세그먼트 응답
pub fn upload_segment(toggle: bool, data: &[u8], last: bool) -> Frame {
    debug_assert!(data.len() <= SEGMENT_DATA_LEN);
    let unused = (SEGMENT_DATA_LEN - data.len()) as u8;
    let mut command = RESPONSE_SEGMENT_UPLOAD | toggle_bit(toggle) | (unused << 1);
    if last {
        command |= NO_MORE_DATA;
    }
    let mut frame = [0u8; FRAME_LEN];
    frame[0] = command;
    frame[1..1 + data.len()].copy_from_slice(data);
    frame
}

/// 다운로드 개시 응답
pub fn download_initiate(target: Target) -> Frame {
    with_target(RESPONSE_DOWNLOAD, target)
}

/// 분할 다운로드 세그먼트 응답
pub fn download_segment(toggle: bool) -> Frame {
    let mut frame = [0u8; FRAME_LEN];
    frame[0] = RESPONSE_SEGMENT_DOWNLOAD | toggle_bit(toggle);
    frame
}

/// 블록 업로드 개시 응답
pub fn block_upload_initiate(target: Target, size: u32, crc: bool) -> Frame {
    let mut command =
        RESPONSE_BLOCK_UPLOAD | BLOCK_SIZE_SPECIFIED | BlockSubcommand::Initiate as u8;
    if crc {
        command |= CRC_SUPPORTED;
    }
    let mut frame = with_target(command, target);
    (&mut frame[4..]).put_u32_le(size);
    frame
}

/// 블록 세그먼트 (시퀀스 + 데이터 7바이트)
pub fn block_segment(sequence: u8, data: &[u8], last: bool) -> Frame {
    debug_assert!(data.len() <= SEGMENT_DATA_LEN);
    let mut command = sequence & SEQUENCE_MASK;
    if last {
        command |= NO_MORE_BLOCKS;
    }
    let mut frame = [0u8; FRAME_LEN];
    frame[0] = command;
    frame[1..1 + data.len()].copy_from_slice(data);
    frame
}

/// 블록 업로드 종료
pub fn block_upload_end(unused: u8, crc: Option<u16>) -> Frame {
    let mut frame = [0u8; FRAME_LEN];
    frame[0] = RESPONSE_BLOCK_UPLOAD | ((unused & 0x07) << 2) | BlockSubcommand::End as u8;
    if let Some(crc) = crc {
        (&mut frame[1..]).put_u16_le(crc);
    }
    frame
}

/// 블록 다운로드 개시 응답
pub fn block_download_initiate(target: Target, crc: bool, block_size: u8) -> Frame {
    let mut command = RESPONSE_BLOCK_DOWNLOAD | BlockSubcommand::Initiate as u8;
    if crc {
        command |= CRC_SUPPORTED;
    }
    let mut frame = with_target(command, target);
    frame[4] = block_size;
    frame
}

/// 블록 다운로드 윈도우 확인 응답
pub fn block_download_ack(sequence: u8, block_size: u8) -> Frame {
    let mut frame = [0u8; FRAME_LEN];
    frame[0] = RESPONSE_BLOCK_DOWNLOAD | BlockSubcommand::Response as u8;
    frame[1] = sequence;
    frame[2] = block_size;
    frame
}

/// 블록 다운로드 종료 응답
pub fn block_download_end() -> Frame {
    let mut frame = [0u8; FRAME_LEN];
    frame[0] = RESPONSE_BLOCK_DOWNLOAD | BlockSubcommand::End as u8;
    frame
}

/// 중단 프레임
pub fn abort(target: Target, code: AbortCode) -> Frame {
    let mut frame = with_target(RESPONSE_ABORTED, target);
    (&mut frame[4..]).put_u32_le(code.code());
    frame
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_family() {
        assert_eq!(CommandFamily::from_command(0x40), CommandFamily::InitiateUpload);
        assert_eq!(CommandFamily::from_command(0x71), CommandFamily::UploadSegment);
        assert_eq!(CommandFamily::from_command(0x23), CommandFamily::InitiateDownload);
        assert_eq!(CommandFamily::from_command(0x15), CommandFamily::DownloadSegment);
        assert_eq!(CommandFamily::from_command(0x80), CommandFamily::Abort);
        assert_eq!(CommandFamily::from_command(0xA4), CommandFamily::BlockUpload);
        assert_eq!(CommandFamily::from_command(0xC1), CommandFamily::BlockDownload);
        assert_eq!(CommandFamily::from_command(0xE0), CommandFamily::Unknown);
    }

    #[test]
    fn test_target_parse() {
        let target = Target::parse(&[0x40, 0x08, 0x10, 0x02, 0, 0, 0, 0]).unwrap();
        assert_eq!(target, Target::new(0x1008, 2));
        assert!(matches!(
            Target::parse(&[0x40, 0x08]),
            Err(Error::FrameTooShort { expected: 4, got: 2 })
        ));
    }

    #[test]
    fn test_expedited_upload_layout() {
        let frame = expedited_upload(Target::new(0x1400, 1), &[0x99]);
        // 3바이트 미사용
        assert_eq!(frame, [0x4F, 0x00, 0x14, 0x01, 0x99, 0, 0, 0]);
    }

    #[test]
    fn test_upload_segment_layout() {
        let frame = upload_segment(true, b"abc", true);
        assert_eq!(frame[0], 0x10 | (4 << 1) | 0x01);
        assert_eq!(&frame[1..4], b"abc");
    }

    #[test]
    fn test_abort_layout() {
        let frame = abort(Target::new(0x2000, 0), AbortCode::CRC_ERROR);
        assert_eq!(frame, [0x80, 0x00, 0x20, 0x00, 0x04, 0x00, 0x04, 0x05]);
    }

    #[test]
    fn test_block_upload_end_layout() {
        let frame = block_upload_end(3, Some(0x31C3));
        assert_eq!(frame[0], 0xC0 | (3 << 2) | 0x01);
        assert_eq!(read_crc(&frame), Some(0x31C3));
    }

    #[test]
    fn test_optional_fields() {
        assert_eq!(read_u32(&[0x21, 0, 0x20, 0, 53, 0, 0, 0]), Some(53));
        assert_eq!(read_u32(&[0x21, 0, 0x20, 0]), None);
        assert_eq!(read_crc(&[0xC1]), None);
    }
}
