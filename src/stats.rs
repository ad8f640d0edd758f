//! 서버 통계

use std::time::Instant;

/// 세션 단위 통계
#[derive(Debug, Clone)]
pub struct ServerStats {
    /// 생성 시간
    pub start_time: Instant,

    /// 수신 프레임 수
    pub frames_received: u64,

    /// 송신 프레임 수 (중단 프레임 포함)
    pub frames_sent: u64,

    /// 보낸 중단 프레임 수
    pub aborts_sent: u64,

    /// 받은 중단 프레임 수
    pub aborts_received: u64,

    /// 재전송한 블록 세그먼트 수
    pub retransmitted_segments: u64,

    /// 완료된 업로드 수
    pub completed_uploads: u64,

    /// 완료된 다운로드 수
    pub completed_downloads: u64,

    /// 업로드한 페이로드 바이트
    pub bytes_uploaded: u64,

    /// 다운로드받은 페이로드 바이트
    pub bytes_downloaded: u64,

    /// 마지막 프레임 처리 시각
    pub last_activity: Option<Instant>,
}

impl ServerStats {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            frames_received: 0,
            frames_sent: 0,
            aborts_sent: 0,
            aborts_received: 0,
            retransmitted_segments: 0,
            completed_uploads: 0,
            completed_downloads: 0,
            bytes_uploaded: 0,
            bytes_downloaded: 0,
            last_activity: None,
        }
    }

    /// 프레임 수신 기록
    pub fn record_received(&mut self, timestamp: Instant) {
        self.frames_received += 1;
        self.last_activity = Some(timestamp);
    }

    /// 업로드 완료 기록
    pub fn record_upload(&mut self, bytes: usize) {
        self.completed_uploads += 1;
        self.bytes_uploaded += bytes as u64;
    }

    /// 다운로드 완료 기록
    pub fn record_download(&mut self, bytes: usize) {
        self.completed_downloads += 1;
        self.bytes_downloaded += bytes as u64;
    }

    /// 중단 비율 (수신 프레임 대비)
    pub fn abort_rate(&self) -> f64 {
        if self.frames_received == 0 {
            return 0.0;
        }
        self.aborts_sent as f64 / self.frames_received as f64
    }

    /// 통계 리셋
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// 통계 요약 문자열
    pub fn summary(&self) -> String {
        format!(
            "Elapsed: {:.2}s | Frames: {} in / {} out | Uploads: {} ({} bytes) | Downloads: {} ({} bytes) | Aborts: {} sent / {} received | Retransmits: {}",
            self.start_time.elapsed().as_secs_f64(),
            self.frames_received,
            self.frames_sent,
            self.completed_uploads,
            self.bytes_uploaded,
            self.completed_downloads,
            self.bytes_downloaded,
            self.aborts_sent,
            self.aborts_received,
            self.retransmitted_segments,
        )
    }
}

impl Default for ServerStats {
    fn default() -> Self {
        Self::new()
    }
}
