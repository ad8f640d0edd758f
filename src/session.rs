//! 전송 세션 상태
//!
//! 서버 엔드포인트당 세션 하나, 동시에 열린 전송은 최대 하나.
//! 전송별 상태는 `Mode` 변형 안에만 존재하므로 모드가 바뀌면 함께 사라짐

use bytes::{Bytes, BytesMut};

use crate::abort::AbortCode;
use crate::crc::BlockCrc;
use crate::frame::{Frame, Target};
use crate::MAX_BLOCK_SIZE;

/// 분할 업로드 상태
#[derive(Debug)]
pub struct SegmentedUpload {
    /// 아직 보내지 않은 데이터
    pub buffer: Bytes,
    pub toggle: bool,
}

impl SegmentedUpload {
    pub fn new(buffer: Bytes) -> Self {
        Self {
            buffer,
            toggle: false,
        }
    }
}

/// 분할 다운로드 상태
#[derive(Debug)]
pub struct SegmentedDownload {
    /// 지금까지 받은 데이터
    pub buffer: BytesMut,
    pub toggle: bool,
    /// 클라이언트가 선언한 전체 크기 (참고용)
    pub declared_size: Option<u32>,
}

impl SegmentedDownload {
    pub fn new(declared_size: Option<u32>) -> Self {
        Self {
            buffer: BytesMut::new(),
            toggle: false,
            declared_size,
        }
    }
}

/// 블록 업로드 단계
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockUploadPhase {
    /// 개시 응답 전송, 클라이언트 start 대기
    Initiated,
    /// 윈도우 전송 후 ack 대기
    Streaming,
}

/// 블록 업로드 상태
#[derive(Debug)]
pub struct BlockUpload {
    pub phase: BlockUploadPhase,

    /// 아직 보내지 않은 데이터
    pub buffer: Bytes,

    /// 전체 크기
    pub total_size: usize,

    /// 윈도우 크기 (세그먼트 수, 1 ~ 127)
    pub block_size: u8,

    /// 현재 윈도우에서 마지막으로 보낸 시퀀스 (윈도우마다 0으로 리셋)
    pub sequence: u8,

    /// CRC 사용 시 누적 체크섬
    pub crc: Option<BlockCrc>,

    /// 현재 윈도우에서 보낸 세그먼트 (재전송용, 시퀀스 오름차순)
    pub pending: Vec<(u8, Frame)>,

    /// 마지막 데이터 세그먼트의 실제 길이
    pub last_segment_len: usize,
}

impl BlockUpload {
    pub fn new(buffer: Bytes, block_size: u8, crc: Option<BlockCrc>) -> Self {
        Self {
            phase: BlockUploadPhase::Initiated,
            total_size: buffer.len(),
            buffer,
            block_size,
            sequence: 0,
            crc,
            pending: Vec::with_capacity(MAX_BLOCK_SIZE as usize),
            last_segment_len: 0,
        }
    }
}

/// 블록 다운로드 단계
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockDownloadPhase {
    /// 세그먼트 수신 중 (모든 프레임이 데이터 세그먼트)
    Receiving,
    /// 마지막 세그먼트 확인 완료, 종료 프레임 대기
    AwaitingEnd,
    /// 수신 중 상대 중단 알림을 받음 (세그먼트/종료 모두 거부)
    Cancelled,
}

/// 블록 다운로드 상태
#[derive(Debug)]
pub struct BlockDownload {
    pub phase: BlockDownloadPhase,

    /// 받은 데이터 (마지막 세그먼트의 패딩 포함)
    pub buffer: BytesMut,

    /// 윈도우 크기 (1 ~ 127)
    pub block_size: u8,

    /// 현재 윈도우에서 마지막으로 받은 시퀀스
    pub sequence: u8,

    /// CRC 사용 시 누적 체크섬 (패딩 포함이라 최종 비교에는 쓰지 않음)
    pub crc: Option<BlockCrc>,

    /// 클라이언트가 선언한 전체 크기
    pub declared_size: Option<u32>,
}

impl BlockDownload {
    pub fn new(block_size: u8, crc: Option<BlockCrc>, declared_size: Option<u32>) -> Self {
        Self {
            phase: BlockDownloadPhase::Receiving,
            buffer: BytesMut::new(),
            block_size,
            sequence: 0,
            crc,
            declared_size,
        }
    }
}

/// 현재 전송 모드
#[derive(Debug, Default)]
pub enum Mode {
    #[default]
    Idle,
    SegmentedUpload(SegmentedUpload),
    SegmentedDownload(SegmentedDownload),
    BlockUpload(BlockUpload),
    BlockDownload(BlockDownload),
}

impl Mode {
    /// 로그용 이름
    pub fn name(&self) -> &'static str {
        match self {
            Mode::Idle => "idle",
            Mode::SegmentedUpload(_) => "segmented-upload",
            Mode::SegmentedDownload(_) => "segmented-download",
            Mode::BlockUpload(_) => "block-upload",
            Mode::BlockDownload(_) => "block-download",
        }
    }
}

/// 서버 세션
#[derive(Debug, Default)]
pub struct Session {
    /// 전송 중인 오브젝트
    pub target: Target,

    pub mode: Mode,

    /// 상대가 마지막으로 보낸 중단 코드 (진단용)
    pub last_abort_code: Option<AbortCode>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// 새 전송 시작: 열린 전송은 버리고 대상 교체
    pub fn begin(&mut self, target: Target) {
        self.target = target;
        self.mode = Mode::Idle;
    }

    /// 전송 종료 (대상은 중단 프레임용으로 유지)
    pub fn reset(&mut self) {
        self.mode = Mode::Idle;
    }

    /// 현재 모드를 꺼내고 Idle로 전환
    pub fn take_mode(&mut self) -> Mode {
        std::mem::take(&mut self.mode)
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.mode, Mode::Idle)
    }
}
