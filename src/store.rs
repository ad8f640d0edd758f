//! 오브젝트 저장소
//!
//! - `ObjectStore`: 서버가 사용하는 읽기/쓰기 인터페이스
//! - `MemoryStore`: 여러 세션이 공유하는 메모리 오브젝트 딕셔너리

use std::collections::BTreeMap;
use std::path::Path;

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::abort::AbortCode;
use crate::frame::Target;
use crate::Result;

/// 저장소 에러
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("오브젝트 없음: 0x{index:04X}")]
    NoObject { index: u16 },

    #[error("서브인덱스 없음: 0x{index:04X}:{subindex:02X}")]
    NoSubindex { index: u16, subindex: u8 },

    #[error("읽기 불가: {0}")]
    NotReadable(Target),

    #[error("쓰기 불가: {0}")]
    NotWritable(Target),

    #[error("길이 불일치: expected {expected}, got {got}")]
    LengthMismatch { expected: usize, got: usize },

    #[error("유효하지 않은 값: {0}")]
    InvalidValue(String),
}

impl StoreError {
    /// 가장 가까운 중단 코드
    pub fn abort_code(&self) -> AbortCode {
        match self {
            StoreError::NoObject { .. } => AbortCode::OBJECT_DOES_NOT_EXIST,
            StoreError::NoSubindex { .. } => AbortCode::SUBINDEX_DOES_NOT_EXIST,
            StoreError::NotReadable(_) => AbortCode::READ_WRITE_ONLY,
            StoreError::NotWritable(_) => AbortCode::WRITE_READ_ONLY,
            StoreError::LengthMismatch { .. } => AbortCode::TYPE_MISMATCH,
            StoreError::InvalidValue(_) => AbortCode::INVALID_VALUE,
        }
    }
}

/// 서버가 보는 오브젝트 저장소
///
/// 읽기/쓰기 모두 접근 권한을 확인한 뒤 수행됨
pub trait ObjectStore: Send + Sync {
    fn read(&self, index: u16, subindex: u8) -> std::result::Result<Vec<u8>, StoreError>;

    fn write(&self, index: u16, subindex: u8, data: &[u8]) -> std::result::Result<(), StoreError>;
}

/// 접근 권한
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Access {
    ReadOnly,
    WriteOnly,
    ReadWrite,
    Const,
}

impl Access {
    pub fn is_readable(self) -> bool {
        !matches!(self, Access::WriteOnly)
    }

    pub fn is_writable(self) -> bool {
        matches!(self, Access::WriteOnly | Access::ReadWrite)
    }
}

/// 오브젝트 딕셔너리 항목
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectEntry {
    /// 이름 (로그/진단용)
    pub name: String,

    /// 접근 권한
    pub access: Access,

    /// 고정 길이 (숫자형), None이면 가변 길이
    pub fixed_len: Option<usize>,

    /// 현재 값
    pub value: Vec<u8>,
}

impl ObjectEntry {
    /// 가변 길이 항목
    pub fn new(name: impl Into<String>, access: Access, value: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            access,
            fixed_len: None,
            value: value.into(),
        }
    }

    /// 고정 길이 항목 (길이는 초기 값에서 결정)
    pub fn fixed(name: impl Into<String>, access: Access, value: impl Into<Vec<u8>>) -> Self {
        let value = value.into();
        Self {
            name: name.into(),
            access,
            fixed_len: Some(value.len()),
            value,
        }
    }
}

type ReadCallback = Box<dyn Fn(Target) -> Option<Vec<u8>> + Send + Sync>;
type WriteCallback = Box<dyn Fn(Target, &[u8]) + Send + Sync>;

/// 메모리 오브젝트 딕셔너리
///
/// 인덱스 단위로 묶어 저장하므로 인덱스 없음과 서브인덱스 없음을 구분함
#[derive(Default)]
pub struct MemoryStore {
    objects: DashMap<u16, BTreeMap<u8, ObjectEntry>>,
    read_callbacks: RwLock<Vec<ReadCallback>>,
    write_callbacks: RwLock<Vec<WriteCallback>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 항목 추가 (기존 항목은 교체)
    pub fn insert(&self, index: u16, subindex: u8, entry: ObjectEntry) {
        self.objects.entry(index).or_default().insert(subindex, entry);
    }

    /// 빌더 형태의 항목 추가
    pub fn with_entry(self, index: u16, subindex: u8, entry: ObjectEntry) -> Self {
        self.insert(index, subindex, entry);
        self
    }

    /// 권한 확인 없이 현재 값 조회
    pub fn get(&self, index: u16, subindex: u8) -> Option<Vec<u8>> {
        self.objects
            .get(&index)
            .and_then(|sub| sub.get(&subindex).map(|entry| entry.value.clone()))
    }

    /// 권한 확인 없이 값 설정 (애플리케이션 측 갱신)
    pub fn set(&self, index: u16, subindex: u8, value: impl Into<Vec<u8>>) -> bool {
        match self.objects.get_mut(&index) {
            Some(mut sub) => match sub.get_mut(&subindex) {
                Some(entry) => {
                    entry.value = value.into();
                    true
                }
                None => false,
            },
            None => false,
        }
    }

    /// 읽기 콜백 등록 (Some을 반환하면 저장된 값 대신 사용)
    pub fn add_read_callback<F>(&self, callback: F)
    where
        F: Fn(Target) -> Option<Vec<u8>> + Send + Sync + 'static,
    {
        self.read_callbacks.write().push(Box::new(callback));
    }

    /// 쓰기 콜백 등록 (성공한 쓰기마다 호출)
    pub fn add_write_callback<F>(&self, callback: F)
    where
        F: Fn(Target, &[u8]) + Send + Sync + 'static,
    {
        self.write_callbacks.write().push(Box::new(callback));
    }

    /// 항목 수
    pub fn len(&self) -> usize {
        self.objects.iter().map(|sub| sub.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 전체 항목을 파일로 저장 (콜백은 저장하지 않음)
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut entries: Vec<(u16, u8, ObjectEntry)> = Vec::with_capacity(self.len());
        for sub in self.objects.iter() {
            for (&subindex, entry) in sub.value() {
                entries.push((*sub.key(), subindex, entry.clone()));
            }
        }
        entries.sort_by_key(|(index, subindex, _)| (*index, *subindex));

        let bytes = bincode::serialize(&entries)?;
        std::fs::write(path, bytes)?;
        Ok(())
    }

    /// 저장된 파일에서 복원
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let entries: Vec<(u16, u8, ObjectEntry)> = bincode::deserialize(&bytes)?;

        let store = Self::new();
        for (index, subindex, entry) in entries {
            store.insert(index, subindex, entry);
        }
        Ok(store)
    }

    /// 읽기 경로 (샤드 공유 락)
    fn lookup<T>(
        &self,
        target: Target,
        f: impl FnOnce(&ObjectEntry) -> std::result::Result<T, StoreError>,
    ) -> std::result::Result<T, StoreError> {
        let sub = self.objects.get(&target.index).ok_or(StoreError::NoObject {
            index: target.index,
        })?;
        let entry = sub.get(&target.subindex).ok_or(StoreError::NoSubindex {
            index: target.index,
            subindex: target.subindex,
        })?;
        f(entry)
    }

    /// 쓰기 경로 (샤드 배타 락)
    fn lookup_mut<T>(
        &self,
        target: Target,
        f: impl FnOnce(&mut ObjectEntry) -> std::result::Result<T, StoreError>,
    ) -> std::result::Result<T, StoreError> {
        let mut sub = self
            .objects
            .get_mut(&target.index)
            .ok_or(StoreError::NoObject {
                index: target.index,
            })?;
        let entry = sub
            .get_mut(&target.subindex)
            .ok_or(StoreError::NoSubindex {
                index: target.index,
                subindex: target.subindex,
            })?;
        f(entry)
    }
}

impl ObjectStore for MemoryStore {
    fn read(&self, index: u16, subindex: u8) -> std::result::Result<Vec<u8>, StoreError> {
        let target = Target::new(index, subindex);
        let value = self.lookup(target, |entry| {
            if !entry.access.is_readable() {
                return Err(StoreError::NotReadable(target));
            }
            Ok(entry.value.clone())
        })?;

        // 엔트리 락을 놓은 뒤 콜백 실행
        for callback in self.read_callbacks.read().iter() {
            if let Some(value) = callback(target) {
                debug!("읽기 콜백 값 사용: {}", target);
                return Ok(value);
            }
        }
        Ok(value)
    }

    fn write(&self, index: u16, subindex: u8, data: &[u8]) -> std::result::Result<(), StoreError> {
        let target = Target::new(index, subindex);
        self.lookup_mut(target, |entry| {
            if !entry.access.is_writable() {
                return Err(StoreError::NotWritable(target));
            }
            if let Some(expected) = entry.fixed_len {
                if expected != data.len() {
                    return Err(StoreError::LengthMismatch {
                        expected,
                        got: data.len(),
                    });
                }
            }
            entry.value = data.to_vec();
            Ok(())
        })?;

        for callback in self.write_callbacks.read().iter() {
            callback(target, data);
        }
        Ok(())
    }
}
