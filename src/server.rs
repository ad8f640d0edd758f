//! SDO 서버 (응답자)
//!
//! - 수신 프레임을 (현재 모드, 명령 계열)로 분류해 처리기로 전달
//! - 처리기 에러는 여기서만 중단 프레임으로 변환됨
//! - 프레임 하나를 끝까지 처리한 뒤 다음 프레임을 받음 (세션별 외부 직렬화 전제)

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, info, warn};

use crate::abort::AbortCode;
use crate::frame::{
    self, BlockSubcommand, CommandFamily, Frame, Target, SEQUENCE_MASK,
};
use crate::session::{BlockDownloadPhase, Mode, Session};
use crate::sink::FrameSink;
use crate::stats::ServerStats;
use crate::store::ObjectStore;
use crate::{Config, Error, Result};

/// 프레임 처리 경로
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Route {
    InitiateUpload,
    UploadSegment,
    InitiateDownload,
    DownloadSegment,
    BlockUpload(BlockSubcommand),
    BlockDownloadInitiate,
    BlockDownloadSegment,
    BlockDownloadEnd,
    PeerAbort,
    Invalid,
}

/// SDO 서버
pub struct SdoServer {
    pub(crate) config: Config,
    pub(crate) store: Arc<dyn ObjectStore>,
    sink: Arc<dyn FrameSink>,
    pub(crate) session: Session,
    pub(crate) stats: ServerStats,
}

impl SdoServer {
    /// 새 서버 생성
    pub fn new(config: Config, store: Arc<dyn ObjectStore>, sink: Arc<dyn FrameSink>) -> Self {
        Self {
            config,
            store,
            sink,
            session: Session::new(),
            stats: ServerStats::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn stats(&self) -> &ServerStats {
        &self.stats
    }

    /// 상대가 마지막으로 보낸 중단 코드
    pub fn last_abort_code(&self) -> Option<AbortCode> {
        self.session.last_abort_code
    }

    /// 수신 프레임 처리 (유일한 진입점)
    ///
    /// 어떤 에러도 호출자에게 전파하지 않음. 거부된 프레임마다 중단 프레임 하나를 보냄
    pub fn handle_incoming_frame(&mut self, data: &[u8], timestamp: Instant) {
        self.stats.record_received(timestamp);

        let Some(&command) = data.first() else {
            warn!("빈 프레임 수신");
            self.abort(AbortCode::INVALID_COMMAND_SPECIFIER);
            return;
        };

        let route = self.route(command);
        debug!(
            "요청 수신: {} (command=0x{:02X}, mode={}, route={:?})",
            frame::hex(data),
            command,
            self.session.mode.name(),
            route
        );

        if let Err(e) = self.dispatch(route, data) {
            match &e {
                Error::Aborted(_) | Error::Store(_) | Error::FrameTooShort { .. } => {
                    warn!("{} 전송 중단: {}", self.session.target, e);
                }
                _ => {
                    error!("{} 처리 중 예기치 않은 에러: {}", self.session.target, e);
                }
            }
            self.abort(e.abort_code());
            self.session.reset();
        }
    }

    /// (현재 모드, 명령 계열)로 처리 경로 결정
    ///
    /// 블록 다운로드 수신 중에는 command byte가 시퀀스 번호이므로 계열 비트를 보지 않음.
    /// 예외:
    /// - 시퀀스 0인 0x80은 유효한 세그먼트가 될 수 없으므로 중단 알림
    /// - 기대 시퀀스가 아닌 개시 요청은 새 전송으로 처리 (열린 전송 대체)
    pub(crate) fn route(&self, command: u8) -> Route {
        let family = CommandFamily::from_command(command);
        match (&self.session.mode, family) {
            (Mode::BlockDownload(transfer), CommandFamily::Abort)
                if transfer.phase == BlockDownloadPhase::Receiving
                    && command & SEQUENCE_MASK == 0 =>
            {
                Route::PeerAbort
            }
            (Mode::BlockDownload(transfer), _)
                if transfer.phase == BlockDownloadPhase::Receiving
                    && (command & SEQUENCE_MASK == transfer.sequence + 1
                        || !is_initiate(command, family)) =>
            {
                Route::BlockDownloadSegment
            }
            (_, CommandFamily::BlockUpload | CommandFamily::BlockDownload)
                if !self.config.block_transfer_enabled =>
            {
                Route::Invalid
            }
            (_, CommandFamily::InitiateUpload) => Route::InitiateUpload,
            (_, CommandFamily::UploadSegment) => Route::UploadSegment,
            (_, CommandFamily::InitiateDownload) => Route::InitiateDownload,
            (_, CommandFamily::DownloadSegment) => Route::DownloadSegment,
            (_, CommandFamily::BlockUpload) => {
                Route::BlockUpload(BlockSubcommand::from_command(command))
            }
            // 블록 다운로드 요청은 bit 0만 구분 (bit 1은 크기 지정 플래그)
            (_, CommandFamily::BlockDownload) if command & 0x01 == 0 => {
                Route::BlockDownloadInitiate
            }
            (_, CommandFamily::BlockDownload) => Route::BlockDownloadEnd,
            (_, CommandFamily::Abort) => Route::PeerAbort,
            (_, CommandFamily::Unknown) => Route::Invalid,
        }
    }

    fn dispatch(&mut self, route: Route, data: &[u8]) -> Result<()> {
        match route {
            Route::InitiateUpload => self.init_upload(data),
            Route::UploadSegment => self.segmented_upload(data[0]),
            Route::InitiateDownload => self.init_download(data),
            Route::DownloadSegment => self.segmented_download(data),
            Route::BlockUpload(subcommand) => self.block_upload(subcommand, data),
            Route::BlockDownloadInitiate => self.init_block_download(data),
            Route::BlockDownloadSegment => self.block_download_segment(data),
            Route::BlockDownloadEnd => self.end_block_download(data),
            Route::PeerAbort => {
                self.peer_aborted(data);
                Ok(())
            }
            Route::Invalid => Err(AbortCode::INVALID_COMMAND_SPECIFIER.into()),
        }
    }

    /// 응답 프레임 전송
    pub(crate) fn send_response(&mut self, response: Frame) {
        debug!("응답 전송: {}", frame::hex(&response));
        self.stats.frames_sent += 1;
        self.sink.send(self.config.tx_cob_id, response);
    }

    /// 현재 대상으로 중단 프레임 전송
    ///
    /// 세션 상태는 건드리지 않음. 정리는 호출자 몫
    pub fn abort(&mut self, code: AbortCode) {
        warn!("중단 전송: {} {}", self.session.target, code);
        self.stats.aborts_sent += 1;
        self.send_response(frame::abort(self.session.target, code));
    }

    /// 애플리케이션 측 중단 요청: 중단 프레임 전송 후 세션 정리
    pub fn request_abort(&mut self, code: AbortCode) {
        self.abort(code);
        self.session.reset();
    }

    /// 상대의 중단 알림 기록 (로컬 전송은 그대로 둠)
    fn peer_aborted(&mut self, data: &[u8]) {
        let code = frame::read_u32(data).map(AbortCode).unwrap_or_default();
        let target = Target::parse(data).unwrap_or(self.session.target);
        info!("중단 요청 수신: {} {}", target, code);

        self.session.last_abort_code = Some(code);
        self.stats.aborts_received += 1;

        // 수신 중이던 블록 다운로드는 더 이상 세그먼트를 받지 않음
        if let Mode::BlockDownload(transfer) = &mut self.session.mode {
            if transfer.phase == BlockDownloadPhase::Receiving {
                transfer.phase = BlockDownloadPhase::Cancelled;
            }
        }
    }

    /// 로컬 읽기 (프레임 없이 저장소 직접 접근)
    pub fn upload(&self, index: u16, subindex: u8) -> Result<Vec<u8>> {
        Ok(self.store.read(index, subindex)?)
    }

    /// 로컬 쓰기
    pub fn download(&self, index: u16, subindex: u8, data: &[u8]) -> Result<()> {
        Ok(self.store.write(index, subindex, data)?)
    }
}

/// 새 전송을 여는 요청인지 (블록 계열은 하위 명령까지 확인)
fn is_initiate(command: u8, family: CommandFamily) -> bool {
    match family {
        CommandFamily::InitiateUpload | CommandFamily::InitiateDownload => true,
        CommandFamily::BlockUpload => BlockSubcommand::from_command(command) == BlockSubcommand::Initiate,
        CommandFamily::BlockDownload => command & 0x01 == 0,
        _ => false,
    }
}

/// 완료된 다운로드 길이를 선언 크기와 비교
///
/// 선언보다 길면 중단, 짧으면 경고만 남김
pub(crate) fn check_declared_size(declared: Option<u32>, len: usize) -> Result<()> {
    let Some(declared) = declared else {
        return Ok(());
    };
    let declared = declared as usize;
    if len > declared {
        return Err(AbortCode::LENGTH_TOO_HIGH.into());
    }
    if len < declared {
        warn!("선언 크기보다 짧은 데이터: declared={}, received={}", declared, len);
    }
    Ok(())
}
