//! # SDO (Service Data Object) 서버
//!
//! CANopen 오브젝트 딕셔너리를 8바이트 프레임으로 읽고 쓰는 서버 측 구현
//!
//! ## 핵심 특징
//! - **익스피다이티드 / 분할 전송**: 4바이트 이하는 한 번에, 그 이상은 토글 비트로 7바이트씩
//! - **블록 업로드**: 윈도우 단위 연속 전송, ack 기준 선택적 재전송, CRC-16 검증
//! - **블록 다운로드**: 엄격한 시퀀스 검사, 패딩 제거, CRC-16 검증
//! - **중단 처리**: 모든 실패는 중단 코드가 담긴 프레임 하나로 응답
//! - **전송 독립**: 프레임 입출력은 [`FrameSink`]로 추상화 (CAN, UDP, 채널 등)

pub mod abort;
mod block_download;
mod block_upload;
pub mod config;
pub mod crc;
pub mod error;
pub mod frame;
mod segmented;
pub mod server;
pub mod session;
pub mod sink;
pub mod stats;
pub mod store;

#[cfg(test)]
mod testutil;

pub use abort::AbortCode;
pub use config::Config;
pub use crc::BlockCrc;
pub use error::{Error, Result};
pub use frame::{Frame, Target};
pub use server::SdoServer;
pub use session::{Mode, Session};
pub use sink::{FrameLog, FrameSink, OutgoingFrame};
pub use stats::ServerStats;
pub use store::{Access, MemoryStore, ObjectEntry, ObjectStore, StoreError};

/// 프레임 길이 (바이트)
pub const FRAME_LEN: usize = 8;

/// 블록 전송 최대 블록 크기 (세그먼트 수)
pub const MAX_BLOCK_SIZE: u8 = 127;

/// 요청 수신 COB-ID 기준값 (클라이언트 → 서버)
pub const RX_COB_ID_BASE: u32 = 0x600;

/// 응답 송신 COB-ID 기준값 (서버 → 클라이언트)
pub const TX_COB_ID_BASE: u32 = 0x580;
