//! 송신 프레임 싱크
//!
//! 서버는 응답 프레임을 보내기만 하고 전달 여부는 확인하지 않음

use parking_lot::Mutex;
use tracing::trace;

use crate::frame::Frame;

/// 송신 대기 프레임
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutgoingFrame {
    pub cob_id: u32,
    pub data: Frame,
}

/// 프레임 전송 인터페이스
pub trait FrameSink: Send + Sync {
    fn send(&self, cob_id: u32, data: Frame);
}

/// 비동기 호스트용 (tokio 태스크가 소비)
impl FrameSink for tokio::sync::mpsc::UnboundedSender<OutgoingFrame> {
    fn send(&self, cob_id: u32, data: Frame) {
        if tokio::sync::mpsc::UnboundedSender::send(self, OutgoingFrame { cob_id, data }).is_err() {
            trace!("송신 채널 닫힘, 프레임 폐기: cob_id=0x{:03X}", cob_id);
        }
    }
}

/// 스레드 기반 호스트용
impl FrameSink for crossbeam_channel::Sender<OutgoingFrame> {
    fn send(&self, cob_id: u32, data: Frame) {
        if crossbeam_channel::Sender::send(self, OutgoingFrame { cob_id, data }).is_err() {
            trace!("송신 채널 닫힘, 프레임 폐기: cob_id=0x{:03X}", cob_id);
        }
    }
}

/// 보낸 프레임을 기록만 하는 싱크
#[derive(Debug, Default)]
pub struct FrameLog {
    frames: Mutex<Vec<OutgoingFrame>>,
}

impl FrameLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// 기록된 프레임을 꺼내고 비움
    pub fn take(&self) -> Vec<OutgoingFrame> {
        std::mem::take(&mut *self.frames.lock())
    }

    /// 기록된 프레임 수
    pub fn len(&self) -> usize {
        self.frames.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FrameSink for FrameLog {
    fn send(&self, cob_id: u32, data: Frame) {
        self.frames.lock().push(OutgoingFrame { cob_id, data });
    }
}
