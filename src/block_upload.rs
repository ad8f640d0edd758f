//! 블록 업로드 (서버 → 클라이언트)
//!
//! ```text
//! Idle → Initiated → Streaming ⇄ (ack) → End → Idle
//! ```
//!
//! 윈도우 단위로 세그먼트를 연속 전송하고 클라이언트 ack를 기다림.
//! ack 시퀀스가 마지막으로 보낸 것보다 작으면 그 뒤의 세그먼트만 그대로 재전송.
//! 이 계층에는 타임아웃 기반 재시도가 없음

use bytes::Bytes;
use tracing::{debug, error, info};

use crate::abort::AbortCode;
use crate::config::clamp_block_size;
use crate::crc::BlockCrc;
use crate::frame::{self, BlockSubcommand, Frame, Target, CRC_SUPPORTED, SEGMENT_DATA_LEN};
use crate::server::SdoServer;
use crate::session::{BlockUpload, BlockUploadPhase, Mode};
use crate::{Error, Result, MAX_BLOCK_SIZE};

impl BlockUpload {
    /// 다음 윈도우 생성
    ///
    /// 최대 `block_size`개 또는 데이터가 끝날 때까지. 보낸 프레임은 재전송용으로 기록
    fn next_window(&mut self) -> Vec<Frame> {
        let mut frames = Vec::with_capacity(self.block_size as usize);

        while self.sequence < self.block_size && !self.buffer.is_empty() {
            self.sequence += 1;

            let len = self.buffer.len().min(SEGMENT_DATA_LEN);
            let chunk = self.buffer.split_to(len);
            let last = self.buffer.is_empty();
            if last {
                self.last_segment_len = chunk.len();
            }

            let segment = frame::block_segment(self.sequence, &chunk, last);
            if let Some(crc) = self.crc.as_mut() {
                crc.update(&chunk);
            }

            self.pending.push((self.sequence, segment));
            frames.push(segment);
        }

        frames
    }

    /// ack 이후 다시 보내야 할 세그먼트 (시퀀스 오름차순)
    fn unacknowledged(&self, acked: u8) -> Vec<Frame> {
        self.pending
            .iter()
            .filter(|(sequence, _)| *sequence > acked)
            .map(|(_, segment)| *segment)
            .collect()
    }
}

impl SdoServer {
    /// 블록 업로드 요청 분기
    pub(crate) fn block_upload(&mut self, subcommand: BlockSubcommand, data: &[u8]) -> Result<()> {
        match subcommand {
            BlockSubcommand::Initiate => self.init_block_upload(data),
            BlockSubcommand::Start => self.start_block_upload(),
            BlockSubcommand::Response => self.block_upload_ack(data),
            BlockSubcommand::End => self.block_upload_end_request(),
        }
    }

    fn init_block_upload(&mut self, data: &[u8]) -> Result<()> {
        let command = data[0];
        let target = Target::parse(data)?;
        self.session.begin(target);

        let block_size = clamp_block_size(data.get(4).copied().unwrap_or(MAX_BLOCK_SIZE));

        let value = self.store.read(target.index, target.subindex)?;
        if value.is_empty() {
            info!("업로드할 데이터 없음: {}", target);
            return Err(AbortCode::NO_DATA_AVAILABLE.into());
        }
        let size = u32::try_from(value.len()).map_err(|_| Error::Aborted(AbortCode::LENGTH_TOO_HIGH))?;

        let crc = (command & CRC_SUPPORTED != 0 && self.config.crc_supported).then(BlockCrc::new);
        let crc_enabled = crc.is_some();

        info!(
            "블록 업로드 개시: {} ({} bytes, blksize={}, crc={})",
            target, size, block_size, crc_enabled
        );
        self.session.mode = Mode::BlockUpload(BlockUpload::new(Bytes::from(value), block_size, crc));
        self.send_response(frame::block_upload_initiate(target, size, crc_enabled));
        Ok(())
    }

    fn start_block_upload(&mut self) -> Result<()> {
        match &mut self.session.mode {
            Mode::BlockUpload(transfer) if transfer.phase == BlockUploadPhase::Initiated => {
                transfer.phase = BlockUploadPhase::Streaming;
            }
            Mode::BlockUpload(_) => return Err(AbortCode::INVALID_COMMAND_SPECIFIER.into()),
            _ => {
                error!("블록 업로드가 열려 있지 않음");
                return Err(AbortCode::GENERAL_ERROR.into());
            }
        }
        self.send_window()
    }

    fn send_window(&mut self) -> Result<()> {
        let Mode::BlockUpload(transfer) = &mut self.session.mode else {
            return Err(AbortCode::GENERAL_ERROR.into());
        };

        let frames = transfer.next_window();
        debug!("윈도우 전송: {} segments", frames.len());
        for segment in frames {
            self.send_response(segment);
        }
        Ok(())
    }

    fn block_upload_ack(&mut self, data: &[u8]) -> Result<()> {
        let Mode::BlockUpload(transfer) = &mut self.session.mode else {
            error!("블록 업로드가 열려 있지 않음");
            return Err(AbortCode::GENERAL_ERROR.into());
        };
        if transfer.phase != BlockUploadPhase::Streaming {
            return Err(AbortCode::INVALID_COMMAND_SPECIFIER.into());
        }

        let acked = data.get(1).copied().unwrap_or(0);
        let block_size = data.get(2).copied().unwrap_or(transfer.block_size);
        if acked > transfer.sequence {
            return Err(AbortCode::INVALID_SEQUENCE_NUMBER.into());
        }
        transfer.block_size = clamp_block_size(block_size);

        if acked < transfer.sequence {
            let resend = transfer.unacknowledged(acked);
            debug!(
                "재전송: ackseq={}, sent={}, {} segments",
                acked,
                transfer.sequence,
                resend.len()
            );
            self.stats.retransmitted_segments += resend.len() as u64;
            for segment in resend {
                self.send_response(segment);
            }
            return Ok(());
        }

        transfer.pending.clear();
        transfer.sequence = 0;

        if transfer.buffer.is_empty() {
            self.finish_block_upload()
        } else {
            self.send_window()
        }
    }

    /// 클라이언트 종료 요청/확인
    fn block_upload_end_request(&mut self) -> Result<()> {
        match self.session.mode {
            Mode::BlockUpload(_) => self.finish_block_upload(),
            // 서버가 이미 종료 프레임을 보낸 뒤의 확인
            Mode::Idle => {
                debug!("블록 업로드 종료 확인: {}", self.session.target);
                Ok(())
            }
            _ => Err(AbortCode::INVALID_COMMAND_SPECIFIER.into()),
        }
    }

    /// 종료 프레임 전송 후 세션 정리
    fn finish_block_upload(&mut self) -> Result<()> {
        let transfer = match self.session.take_mode() {
            Mode::BlockUpload(transfer) => transfer,
            other => {
                self.session.mode = other;
                return Err(AbortCode::GENERAL_ERROR.into());
            }
        };

        let unused = if transfer.last_segment_len > 0 {
            (SEGMENT_DATA_LEN - transfer.last_segment_len) as u8
        } else {
            0
        };
        let crc = transfer.crc.map(BlockCrc::finalize);

        info!(
            "블록 업로드 완료: {} ({} bytes, crc={:?})",
            self.session.target, transfer.total_size, crc
        );
        self.stats.record_upload(transfer.total_size);
        self.send_response(frame::block_upload_end(unused, crc));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{NO_MORE_BLOCKS, SEQUENCE_MASK};
    use crate::testutil::*;

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 + 3) as u8).collect()
    }

    #[test]
    fn test_initiate_response() {
        let mut h = Harness::new();
        h.store.set(0x2000, 0, payload(20));

        h.send(&initiate_block_upload(0x2000, 0, true, 10));
        let frames = h.take();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0][0], 0xC0 | CRC_SUPPORTED | frame::BLOCK_SIZE_SPECIFIED);
        assert_eq!(frame::read_u32(&frames[0]), Some(20));
        assert_eq!(h.server.session().mode.name(), "block-upload");
    }

    #[test]
    fn test_crc_not_negotiated_when_server_disables_it() {
        let mut h = Harness::with_config(crate::Config::constrained(2));
        h.store.set(0x2000, 0, payload(20));

        h.send(&initiate_block_upload(0x2000, 0, true, 10));
        assert_eq!(h.take()[0][0] & CRC_SUPPORTED, 0);
    }

    #[test]
    fn test_windows_and_crc() {
        let mut h = Harness::new();
        let data = payload(100);
        h.store.set(0x2000, 0, data.clone());

        h.send(&initiate_block_upload(0x2000, 0, true, 4));
        h.take();
        h.send(&block_upload_start());

        // 100 bytes = 15 segments, 윈도우 4개씩
        let mut sequences = Vec::new();
        let mut received = Vec::new();
        let mut window = h.take();
        loop {
            assert!(window.len() <= 4);
            for (i, segment) in window.iter().enumerate() {
                assert_eq!((segment[0] & SEQUENCE_MASK) as usize, i + 1);
                sequences.push(segment[0] & SEQUENCE_MASK);
                received.extend_from_slice(&segment[1..8]);
            }
            let last = window.last().unwrap();
            let ackseq = last[0] & SEQUENCE_MASK;
            let done = last[0] & NO_MORE_BLOCKS != 0;

            h.send(&block_upload_ack(ackseq, 4));
            window = h.take();
            if done {
                break;
            }
        }
        assert_eq!(sequences.len(), 15);

        // 종료 프레임: 100 = 14 * 7 + 2 → 미사용 5바이트
        assert_eq!(window.len(), 1);
        let end = window[0];
        assert_eq!(end[0], 0xC1 | (5 << 2));
        assert_eq!(frame::read_crc(&end), Some(BlockCrc::checksum(&data)));

        received.truncate(100);
        assert_eq!(received, data);
        assert!(h.server.session().is_idle());

        // 클라이언트 종료 확인은 응답 없이 수용
        h.send(&block_upload_end_confirm());
        assert!(h.take().is_empty());
    }

    #[test]
    fn test_retransmission_after_partial_ack() {
        let mut h = Harness::new();
        h.store.set(0x2000, 0, payload(70));

        h.send(&initiate_block_upload(0x2000, 0, false, 10));
        h.take();
        h.send(&block_upload_start());
        let first = h.take();
        assert_eq!(first.len(), 10);

        // 6번 세그먼트부터 유실
        h.send(&block_upload_ack(5, 10));
        let resent = h.take();
        assert_eq!(resent, first[5..].to_vec());
        assert_eq!(h.server.stats().retransmitted_segments, 5);

        // 전부 확인 → 데이터가 끝났으므로 종료 프레임
        h.send(&block_upload_ack(10, 10));
        let end = h.take();
        assert_eq!(end.len(), 1);
        assert_eq!(end[0][0], 0xC1);
        assert_eq!(frame::read_crc(&end[0]), Some(0));
    }

    #[test]
    fn test_ack_beyond_sent_sequence() {
        let mut h = Harness::new();
        h.store.set(0x2000, 0, payload(14));

        h.send(&initiate_block_upload(0x2000, 0, false, 127));
        h.send(&block_upload_start());
        h.take();

        h.send(&block_upload_ack(3, 127));
        assert_eq!(h.single_abort(), AbortCode::INVALID_SEQUENCE_NUMBER);
    }

    #[test]
    fn test_ack_revises_block_size() {
        let mut h = Harness::new();
        h.store.set(0x2000, 0, payload(70));

        h.send(&initiate_block_upload(0x2000, 0, false, 2));
        h.send(&block_upload_start());
        h.take();

        h.send(&block_upload_ack(2, 5));
        assert_eq!(h.take().len(), 5);

        // 0은 1로 제한
        h.send(&block_upload_ack(5, 0));
        assert_eq!(h.take().len(), 1);
    }

    #[test]
    fn test_start_twice_is_rejected() {
        let mut h = Harness::new();
        h.store.set(0x2000, 0, payload(30));

        h.send(&initiate_block_upload(0x2000, 0, false, 127));
        h.send(&block_upload_start());
        h.take();

        h.send(&block_upload_start());
        assert_eq!(h.single_abort(), AbortCode::INVALID_COMMAND_SPECIFIER);
    }

    #[test]
    fn test_ack_without_transfer() {
        let mut h = Harness::new();
        h.send(&block_upload_ack(1, 127));
        assert_eq!(h.single_abort(), AbortCode::GENERAL_ERROR);
    }

    #[test]
    fn test_missing_block_size_defaults_to_max() {
        let mut h = Harness::new();
        h.store.set(0x2000, 0, payload(7 * 127 + 1));

        h.send(&[0xA0, 0x00, 0x20, 0x00]);
        h.send(&block_upload_start());
        let frames = h.take();
        // 개시 응답 + 윈도우 127개
        assert_eq!(frames.len(), 128);
    }

    #[test]
    fn test_exact_multiple_of_segment_len() {
        let mut h = Harness::new();
        let data = payload(14);
        h.store.set(0x2000, 0, data.clone());
        assert_eq!(h.block_upload(0x2000, 0, 127, true).unwrap(), data);
    }

    #[test]
    fn test_random_block_uploads() {
        use rand::Rng;
        let mut rng = rand::thread_rng();

        for _ in 0..20 {
            let len = rng.gen_range(1..600);
            let block_size = rng.gen_range(1..=127u8);
            let data: Vec<u8> = (0..len).map(|_| rng.gen()).collect();

            let mut h = Harness::new();
            h.store.set(0x2000, 0, data.clone());
            assert_eq!(h.block_upload(0x2000, 0, block_size, true).unwrap(), data);
        }
    }
}
