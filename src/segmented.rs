//! 익스피다이티드 / 분할 전송
//!
//! - 4바이트 이하: 개시 프레임 하나로 끝남 (세션 상태 없음)
//! - 그 이상: 토글 비트를 번갈아 가며 7바이트씩 주고받음

use bytes::Bytes;
use tracing::{error, info};

use crate::abort::AbortCode;
use crate::frame::{
    self, Target, EXPEDITED, EXPEDITED_DATA_LEN, NO_MORE_DATA, SEGMENT_DATA_LEN, SIZE_SPECIFIED,
    TOGGLE_BIT,
};
use crate::server::{check_declared_size, SdoServer};
use crate::session::{Mode, SegmentedDownload, SegmentedUpload};
use crate::{Error, Result};

impl SdoServer {
    /// 업로드 개시
    pub(crate) fn init_upload(&mut self, data: &[u8]) -> Result<()> {
        let target = Target::parse(data)?;
        self.session.begin(target);

        let value = self.store.read(target.index, target.subindex)?;
        let size = value.len();

        if size == 0 {
            info!("업로드할 데이터 없음: {}", target);
            return Err(AbortCode::NO_DATA_AVAILABLE.into());
        }

        if size <= EXPEDITED_DATA_LEN {
            info!("익스피다이티드 업로드: {} ({} bytes)", target, size);
            self.send_response(frame::expedited_upload(target, &value));
            self.stats.record_upload(size);
            return Ok(());
        }

        let declared = u32::try_from(size).map_err(|_| Error::Aborted(AbortCode::LENGTH_TOO_HIGH))?;
        info!("분할 업로드 개시: {} ({} bytes)", target, size);
        self.session.mode = Mode::SegmentedUpload(SegmentedUpload::new(Bytes::from(value)));
        self.send_response(frame::segmented_upload_initiate(target, declared));
        Ok(())
    }

    /// 업로드 세그먼트 요청
    pub(crate) fn segmented_upload(&mut self, command: u8) -> Result<()> {
        let Mode::SegmentedUpload(transfer) = &mut self.session.mode else {
            error!("분할 업로드가 열려 있지 않음");
            return Err(AbortCode::GENERAL_ERROR.into());
        };

        if (command & TOGGLE_BIT != 0) != transfer.toggle {
            return Err(AbortCode::TOGGLE_NOT_ALTERNATED.into());
        }

        let len = transfer.buffer.len().min(SEGMENT_DATA_LEN);
        let chunk = transfer.buffer.split_to(len);
        let last = transfer.buffer.is_empty();
        let response = frame::upload_segment(transfer.toggle, &chunk, last);
        transfer.toggle = !transfer.toggle;

        self.stats.bytes_uploaded += chunk.len() as u64;
        if last {
            info!("분할 업로드 완료: {}", self.session.target);
            self.stats.completed_uploads += 1;
            self.session.reset();
        }

        self.send_response(response);
        Ok(())
    }

    /// 다운로드 개시
    pub(crate) fn init_download(&mut self, data: &[u8]) -> Result<()> {
        let command = data[0];
        let target = Target::parse(data)?;
        self.session.begin(target);

        if command & EXPEDITED != 0 {
            let size = if command & SIZE_SPECIFIED != 0 {
                EXPEDITED_DATA_LEN - ((command >> 2) & 0x03) as usize
            } else {
                EXPEDITED_DATA_LEN
            };
            let payload = data.get(4..4 + size).ok_or(Error::FrameTooShort {
                expected: 4 + size,
                got: data.len(),
            })?;

            info!("익스피다이티드 다운로드: {} ({} bytes)", target, size);
            self.store.write(target.index, target.subindex, payload)?;
            self.stats.record_download(size);
        } else {
            let declared = if command & SIZE_SPECIFIED != 0 {
                frame::read_u32(data)
            } else {
                None
            };
            match declared {
                Some(size) => info!("분할 다운로드 개시: {} ({} bytes)", target, size),
                None => info!("분할 다운로드 개시: {} (크기 미지정)", target),
            }
            self.session.mode = Mode::SegmentedDownload(SegmentedDownload::new(declared));
        }

        self.send_response(frame::download_initiate(target));
        Ok(())
    }

    /// 다운로드 세그먼트
    pub(crate) fn segmented_download(&mut self, data: &[u8]) -> Result<()> {
        let command = data[0];
        let Mode::SegmentedDownload(transfer) = &mut self.session.mode else {
            error!("분할 다운로드가 열려 있지 않음");
            return Err(AbortCode::GENERAL_ERROR.into());
        };

        if (command & TOGGLE_BIT != 0) != transfer.toggle {
            return Err(AbortCode::TOGGLE_NOT_ALTERNATED.into());
        }

        let len = SEGMENT_DATA_LEN - ((command >> 1) & 0x07) as usize;
        let payload = data.get(1..1 + len).ok_or(Error::FrameTooShort {
            expected: 1 + len,
            got: data.len(),
        })?;
        transfer.buffer.extend_from_slice(payload);

        let response = frame::download_segment(transfer.toggle);
        transfer.toggle = !transfer.toggle;

        if command & NO_MORE_DATA != 0 {
            let buffer = transfer.buffer.split().freeze();
            let declared = transfer.declared_size;
            let target = self.session.target;
            self.session.reset();

            check_declared_size(declared, buffer.len())?;
            self.store.write(target.index, target.subindex, &buffer)?;
            info!("분할 다운로드 완료: {} ({} bytes)", target, buffer.len());
            self.stats.record_download(buffer.len());
        }

        self.send_response(response);
        Ok(())
    }
}
