//! 블록 다운로드 (클라이언트 → 서버)
//!
//! ```text
//! Idle → Receiving ⇄ (ack) → AwaitingEnd → End → Idle
//! ```
//!
//! 세그먼트는 반드시 직전 시퀀스 + 1 순서로 도착해야 함 (빈틈 허용 안 함).
//! 마지막 세그먼트의 패딩은 종료 프레임을 받은 뒤에 잘라냄

use tracing::{debug, error, info, warn};

use crate::abort::AbortCode;
use crate::crc::BlockCrc;
use crate::frame::{
    self, Target, BLOCK_SIZE_SPECIFIED, CRC_SUPPORTED, NO_MORE_BLOCKS, SEGMENT_DATA_LEN,
    SEQUENCE_MASK,
};
use crate::server::{check_declared_size, SdoServer};
use crate::session::{BlockDownload, BlockDownloadPhase, Mode};
use crate::{Error, Result};

impl SdoServer {
    /// 블록 다운로드 개시
    pub(crate) fn init_block_download(&mut self, data: &[u8]) -> Result<()> {
        let command = data[0];
        let target = Target::parse(data)?;
        self.session.begin(target);

        let declared = if command & BLOCK_SIZE_SPECIFIED != 0 {
            frame::read_u32(data)
        } else {
            None
        };
        let crc = (command & CRC_SUPPORTED != 0 && self.config.crc_supported).then(BlockCrc::new);
        let crc_enabled = crc.is_some();
        let block_size = self.config.effective_block_size();

        info!(
            "블록 다운로드 개시: {} (size={:?}, blksize={}, crc={})",
            target, declared, block_size, crc_enabled
        );
        self.session.mode = Mode::BlockDownload(BlockDownload::new(block_size, crc, declared));
        self.send_response(frame::block_download_initiate(target, crc_enabled, block_size));
        Ok(())
    }

    /// 블록 다운로드 세그먼트
    pub(crate) fn block_download_segment(&mut self, data: &[u8]) -> Result<()> {
        let command = data[0];
        let Mode::BlockDownload(transfer) = &mut self.session.mode else {
            error!("블록 다운로드가 열려 있지 않음");
            return Err(AbortCode::GENERAL_ERROR.into());
        };

        let sequence = command & SEQUENCE_MASK;
        let last = command & NO_MORE_BLOCKS != 0;
        if sequence != transfer.sequence + 1 {
            warn!(
                "시퀀스 불일치: expected {}, got {}",
                transfer.sequence + 1,
                sequence
            );
            return Err(AbortCode::INVALID_SEQUENCE_NUMBER.into());
        }

        // 짧은 프레임은 0으로 채워 항상 7바이트 단위로 누적
        let mut segment = [0u8; SEGMENT_DATA_LEN];
        let available = &data[1..data.len().min(1 + SEGMENT_DATA_LEN)];
        segment[..available.len()].copy_from_slice(available);

        transfer.sequence = sequence;
        transfer.buffer.extend_from_slice(&segment);
        if let Some(crc) = transfer.crc.as_mut() {
            crc.update(&segment);
        }

        if sequence < transfer.block_size && !last {
            return Ok(());
        }

        let ack = frame::block_download_ack(sequence, transfer.block_size);
        transfer.sequence = 0;
        if last {
            transfer.phase = BlockDownloadPhase::AwaitingEnd;
        }
        debug!(
            "윈도우 확인: ackseq={}, last={}, received={} bytes",
            sequence,
            last,
            transfer.buffer.len()
        );
        self.send_response(ack);
        Ok(())
    }

    /// 블록 다운로드 종료
    pub(crate) fn end_block_download(&mut self, data: &[u8]) -> Result<()> {
        let command = data[0];
        let transfer = match self.session.take_mode() {
            Mode::BlockDownload(transfer) => transfer,
            other => {
                error!("블록 다운로드가 열려 있지 않음 (mode={})", other.name());
                self.session.mode = other;
                return Err(AbortCode::GENERAL_ERROR.into());
            }
        };
        let target = self.session.target;
        if transfer.phase != BlockDownloadPhase::AwaitingEnd {
            warn!("종료 대기 상태가 아님: {} (phase={:?})", target, transfer.phase);
            return Err(AbortCode::INVALID_COMMAND_SPECIFIER.into());
        }

        let unused = ((command >> 2) & 0x07) as usize;
        let mut buffer = transfer.buffer;
        buffer.truncate(buffer.len().saturating_sub(unused));

        // 누적 CRC는 패딩을 포함하므로 잘라낸 데이터로 다시 계산
        if transfer.crc.is_some() {
            let received = frame::read_crc(data).ok_or(Error::FrameTooShort {
                expected: 3,
                got: data.len(),
            })?;
            let calculated = BlockCrc::checksum(&buffer);
            if received != calculated {
                warn!(
                    "CRC 불일치: {} received=0x{:04X}, calculated=0x{:04X}",
                    target, received, calculated
                );
                return Err(AbortCode::CRC_ERROR.into());
            }
        }

        check_declared_size(transfer.declared_size, buffer.len())?;
        self.store
            .write(target.index, target.subindex, &buffer)
            .map_err(|e| {
                warn!("저장 실패: {} {}", target, e);
                Error::Aborted(AbortCode::STORE_APPLICATION_FAILURE)
            })?;

        info!("블록 다운로드 완료: {} ({} bytes)", target, buffer.len());
        self.stats.record_download(buffer.len());
        self.send_response(frame::block_download_end());
        Ok(())
    }
}
