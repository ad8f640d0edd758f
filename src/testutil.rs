//! 테스트용 클라이언트 하니스

use std::sync::Arc;
use std::time::Instant;

use bytes::BufMut;

use crate::abort::AbortCode;
use crate::crc::BlockCrc;
use crate::frame::{
    self, Frame, CRC_SUPPORTED, EXPEDITED, NO_MORE_BLOCKS, NO_MORE_DATA, SEGMENT_DATA_LEN,
    SEQUENCE_MASK, SIZE_SPECIFIED, TOGGLE_BIT,
};
use crate::server::SdoServer;
use crate::sink::FrameLog;
use crate::store::{Access, MemoryStore, ObjectEntry};
use crate::Config;

pub use crate::frame::block_segment;

/// 테스트용 오브젝트 딕셔너리
pub fn sample_store() -> MemoryStore {
    MemoryStore::new()
        .with_entry(0x1008, 0, ObjectEntry::new("Device name", Access::Const, "TEST DEVICE"))
        .with_entry(0x1400, 1, ObjectEntry::new("COB-ID", Access::ReadWrite, vec![0x01u8]))
        .with_entry(0x2000, 0, ObjectEntry::new("Writable string", Access::ReadWrite, ""))
        .with_entry(0x2001, 0, ObjectEntry::fixed("INTEGER16", Access::ReadWrite, [0u8, 0]))
}

/// 서버 + 기록 싱크
pub struct Harness {
    pub server: SdoServer,
    pub store: Arc<MemoryStore>,
    pub log: Arc<FrameLog>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(Config::for_node(2))
    }

    pub fn with_config(config: Config) -> Self {
        let store = Arc::new(sample_store());
        let log = Arc::new(FrameLog::new());
        let server = SdoServer::new(config, store.clone(), log.clone());
        Self { server, store, log }
    }

    /// 요청 프레임 하나 전달
    pub fn send(&mut self, data: &[u8]) {
        self.server.handle_incoming_frame(data, Instant::now());
    }

    /// 지금까지 보낸 응답 (데이터만)
    pub fn take(&mut self) -> Vec<Frame> {
        let tx_cob_id = self.server.config().tx_cob_id;
        self.log
            .take()
            .into_iter()
            .map(|frame| {
                assert_eq!(frame.cob_id, tx_cob_id);
                frame.data
            })
            .collect()
    }

    /// 응답이 중단 프레임 하나뿐인지 확인하고 코드 반환
    pub fn single_abort(&mut self) -> AbortCode {
        let frames = self.take();
        assert_eq!(frames.len(), 1, "expected one abort frame, got {:?}", frames);
        assert_eq!(frames[0][0], 0x80, "not an abort frame: {:?}", frames[0]);
        frame::read_u32(&frames[0]).map(AbortCode).unwrap_or_default()
    }

    /// 응답 하나를 기대 (중단이면 Err)
    fn expect_response(&mut self) -> Result<Frame, AbortCode> {
        let frames = self.take();
        assert_eq!(frames.len(), 1, "expected one response, got {:?}", frames);
        check_abort(frames[0])
    }

    /// 응답이 없어야 하는 구간 (중단이면 Err)
    fn expect_silence(&mut self) -> Result<(), AbortCode> {
        match self.take().as_slice() {
            [] => Ok(()),
            [response] => check_abort(*response).map(|_| ()),
            frames => panic!("unexpected responses: {:?}", frames),
        }
    }

    /// 분할 다운로드 전체 수행, 보낸 세그먼트 수 반환
    pub fn segmented_download(&mut self, index: u16, subindex: u8, data: &[u8]) -> Result<usize, AbortCode> {
        self.send(&initiate_download(index, subindex, Some(data.len() as u32)));
        let response = self.expect_response()?;
        assert_eq!(response[0], 0x60);

        let mut chunks: Vec<&[u8]> = data.chunks(SEGMENT_DATA_LEN).collect();
        if chunks.is_empty() {
            chunks.push(&[]);
        }

        let mut toggle = false;
        for (i, chunk) in chunks.iter().enumerate() {
            self.send(&download_segment(toggle, chunk, i + 1 == chunks.len()));
            let response = self.expect_response()?;
            assert_eq!(response[0], 0x20 | frame::toggle_bit(toggle));
            toggle = !toggle;
        }
        Ok(chunks.len())
    }

    /// 업로드 전체 수행 (익스피다이티드/분할 자동 판별)
    pub fn segmented_upload(&mut self, index: u16, subindex: u8) -> Result<Vec<u8>, AbortCode> {
        self.send(&initiate_upload(index, subindex));
        let response = self.expect_response()?;
        assert_eq!(response[0] & 0xE0, 0x40);

        if response[0] & EXPEDITED != 0 {
            let len = 4 - ((response[0] >> 2) & 0x03) as usize;
            return Ok(response[4..4 + len].to_vec());
        }

        let size = frame::read_u32(&response).unwrap_or(0) as usize;
        let mut received = Vec::with_capacity(size);
        let mut toggle = false;
        loop {
            self.send(&upload_segment_request(toggle));
            let segment = self.expect_response()?;
            assert_eq!(segment[0] & TOGGLE_BIT != 0, toggle);

            let len = SEGMENT_DATA_LEN - ((segment[0] >> 1) & 0x07) as usize;
            received.extend_from_slice(&segment[1..1 + len]);
            if segment[0] & NO_MORE_DATA != 0 {
                break;
            }
            toggle = !toggle;
        }
        assert_eq!(received.len(), size);
        Ok(received)
    }

    /// 블록 다운로드 전체 수행
    pub fn block_download(&mut self, index: u16, subindex: u8, data: &[u8], crc: bool) -> Result<(), AbortCode> {
        self.send(&initiate_block_download(index, subindex, crc, Some(data.len() as u32)));
        let response = self.expect_response()?;
        assert_eq!(response[0] & 0xE3, 0xA0);
        let mut block_size = response[4];

        // 빈 데이터도 세그먼트 하나는 보냄 (전부 패딩)
        let mut chunks: Vec<&[u8]> = data.chunks(SEGMENT_DATA_LEN).collect();
        if chunks.is_empty() {
            chunks.push(&[]);
        }

        let mut sequence = 0u8;
        for (i, chunk) in chunks.iter().enumerate() {
            let last = i + 1 == chunks.len();
            sequence += 1;
            self.send(&block_segment(sequence, chunk, last));

            if sequence == block_size || last {
                let ack = self.expect_response()?;
                assert_eq!(ack[0], 0xA2);
                assert_eq!(ack[1], sequence);
                block_size = ack[2];
                sequence = 0;
            } else {
                self.expect_silence()?;
            }
        }

        let unused = if data.is_empty() {
            SEGMENT_DATA_LEN
        } else {
            (SEGMENT_DATA_LEN - data.len() % SEGMENT_DATA_LEN) % SEGMENT_DATA_LEN
        };
        let checksum = crc.then(|| BlockCrc::checksum(data));
        self.send(&block_download_end(unused as u8, checksum));
        let response = self.expect_response()?;
        assert_eq!(response, frame::block_download_end());
        Ok(())
    }

    /// 블록 업로드 전체 수행 (CRC 검증 포함)
    pub fn block_upload(&mut self, index: u16, subindex: u8, block_size: u8, crc: bool) -> Result<Vec<u8>, AbortCode> {
        self.send(&initiate_block_upload(index, subindex, crc, block_size));
        let response = self.expect_response()?;
        assert_eq!(response[0] & 0xE3, 0xC2);
        let size = frame::read_u32(&response).unwrap_or(0) as usize;
        let crc_enabled = response[0] & CRC_SUPPORTED != 0;

        self.send(&block_upload_start());
        let mut received = Vec::with_capacity(size + SEGMENT_DATA_LEN);
        loop {
            let window = self.take();
            assert!(!window.is_empty(), "empty window");
            if window[0][0] == 0x80 {
                return Err(check_abort(window[0]).unwrap_err());
            }

            let mut done = false;
            for (i, segment) in window.iter().enumerate() {
                assert_eq!((segment[0] & SEQUENCE_MASK) as usize, i + 1);
                received.extend_from_slice(&segment[1..]);
                done = segment[0] & NO_MORE_BLOCKS != 0;
            }
            self.send(&block_upload_ack(window.len() as u8, block_size));
            if done {
                break;
            }
        }

        let end = self.expect_response()?;
        assert_eq!(end[0] & 0xE3, 0xC1);
        let unused = ((end[0] >> 2) & 0x07) as usize;
        received.truncate(received.len() - unused);
        assert_eq!(received.len(), size);
        if crc_enabled {
            assert_eq!(frame::read_crc(&end), Some(BlockCrc::checksum(&received)));
        }

        self.send(&block_upload_end_confirm());
        assert!(self.take().is_empty());
        Ok(received)
    }
}

fn check_abort(response: Frame) -> Result<Frame, AbortCode> {
    if response[0] == 0x80 {
        Err(frame::read_u32(&response).map(AbortCode).unwrap_or_default())
    } else {
        Ok(response)
    }
}

fn request(command: u8, index: u16, subindex: u8) -> Frame {
    let mut frame = [0u8; 8];
    let mut buf = &mut frame[..];
    buf.put_u8(command);
    buf.put_u16_le(index);
    buf.put_u8(subindex);
    frame
}

pub fn initiate_upload(index: u16, subindex: u8) -> Frame {
    request(0x40, index, subindex)
}

pub fn upload_segment_request(toggle: bool) -> Frame {
    let mut frame = [0u8; 8];
    frame[0] = 0x60 | frame::toggle_bit(toggle);
    frame
}

/// 분할 다운로드 개시 (size가 있으면 크기 지정)
pub fn initiate_download(index: u16, subindex: u8, size: Option<u32>) -> Frame {
    match size {
        Some(size) => {
            let mut frame = request(0x20 | SIZE_SPECIFIED, index, subindex);
            (&mut frame[4..]).put_u32_le(size);
            frame
        }
        None => request(0x20, index, subindex),
    }
}

/// 익스피다이티드 다운로드 (1 ~ 4바이트)
pub fn expedited_download(index: u16, subindex: u8, data: &[u8]) -> Frame {
    let unused = (4 - data.len()) as u8;
    let mut frame = request(0x20 | EXPEDITED | SIZE_SPECIFIED | (unused << 2), index, subindex);
    frame[4..4 + data.len()].copy_from_slice(data);
    frame
}

pub fn download_segment(toggle: bool, data: &[u8], last: bool) -> Frame {
    let unused = (SEGMENT_DATA_LEN - data.len()) as u8;
    let mut frame = [0u8; 8];
    frame[0] = frame::toggle_bit(toggle) | (unused << 1);
    if last {
        frame[0] |= NO_MORE_DATA;
    }
    frame[1..1 + data.len()].copy_from_slice(data);
    frame
}

pub fn initiate_block_upload(index: u16, subindex: u8, crc: bool, block_size: u8) -> Frame {
    let mut command = 0xA0;
    if crc {
        command |= CRC_SUPPORTED;
    }
    let mut frame = request(command, index, subindex);
    frame[4] = block_size;
    frame
}

pub fn block_upload_start() -> Frame {
    [0xA3, 0, 0, 0, 0, 0, 0, 0]
}

pub fn block_upload_ack(sequence: u8, block_size: u8) -> Frame {
    [0xA2, sequence, block_size, 0, 0, 0, 0, 0]
}

pub fn block_upload_end_confirm() -> Frame {
    [0xA1, 0, 0, 0, 0, 0, 0, 0]
}

pub fn initiate_block_download(index: u16, subindex: u8, crc: bool, size: Option<u32>) -> Frame {
    let mut command = 0xC0;
    if crc {
        command |= CRC_SUPPORTED;
    }
    if size.is_some() {
        command |= frame::BLOCK_SIZE_SPECIFIED;
    }
    let mut frame = request(command, index, subindex);
    if let Some(size) = size {
        (&mut frame[4..]).put_u32_le(size);
    }
    frame
}

/// 블록 다운로드 종료 요청
pub fn block_download_end(unused: u8, crc: Option<u16>) -> Frame {
    let mut frame = [0u8; 8];
    frame[0] = 0xC1 | ((unused & 0x07) << 2);
    if let Some(crc) = crc {
        (&mut frame[1..]).put_u16_le(crc);
    }
    frame
}

pub fn peer_abort(index: u16, subindex: u8, code: AbortCode) -> Frame {
    let mut frame = request(0x80, index, subindex);
    (&mut frame[4..]).put_u32_le(code.code());
    frame
}
