//! 에러 타입 정의

use thiserror::Error;

use crate::abort::AbortCode;
use crate::store::StoreError;

/// SDO 서버 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO 에러: {0}")]
    Io(#[from] std::io::Error),

    #[error("직렬화 에러: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("오브젝트 저장소 에러: {0}")]
    Store(#[from] StoreError),

    #[error("전송 중단: {0}")]
    Aborted(AbortCode),

    #[error("프레임 길이 부족: expected {expected}, got {got}")]
    FrameTooShort { expected: usize, got: usize },

    #[error("잘못된 설정: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// 이 에러를 상대에게 보낼 중단 코드
    pub fn abort_code(&self) -> AbortCode {
        match self {
            Error::Aborted(code) => *code,
            Error::Store(e) => e.abort_code(),
            _ => AbortCode::GENERAL_ERROR,
        }
    }
}

impl From<AbortCode> for Error {
    fn from(code: AbortCode) -> Self {
        Error::Aborted(code)
    }
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;
