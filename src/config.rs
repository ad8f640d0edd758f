//! 서버 설정

use crate::{Error, Result, MAX_BLOCK_SIZE, RX_COB_ID_BASE, TX_COB_ID_BASE};

/// 최소 노드 ID
pub const MIN_NODE_ID: u8 = 1;

/// 최대 노드 ID
pub const MAX_NODE_ID: u8 = 127;

/// SDO 서버 설정
#[derive(Debug, Clone)]
pub struct Config {
    /// 노드 ID (1 ~ 127)
    pub node_id: u8,

    /// 요청 수신 COB-ID (기본: 0x600 + 노드 ID)
    pub rx_cob_id: u32,

    /// 응답 송신 COB-ID (기본: 0x580 + 노드 ID)
    pub tx_cob_id: u32,

    /// 블록 다운로드 시 서버가 제시하는 블록 크기 (1 ~ 127)
    pub block_size: u8,

    /// CRC 지원 여부
    /// 실제 사용 여부는 클라이언트 플래그와 AND
    pub crc_supported: bool,

    /// 블록 전송 허용 여부
    pub block_transfer_enabled: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self::for_node(1)
    }
}

impl Config {
    /// 새 설정 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 노드 ID 기준 기본 설정
    pub fn for_node(node_id: u8) -> Self {
        Self {
            node_id,
            rx_cob_id: RX_COB_ID_BASE + node_id as u32,
            tx_cob_id: TX_COB_ID_BASE + node_id as u32,
            block_size: MAX_BLOCK_SIZE,
            crc_supported: true,
            block_transfer_enabled: true,
        }
    }

    /// 수신 버퍼가 작은 기기용 설정
    pub fn constrained(node_id: u8) -> Self {
        Self {
            block_size: 16,
            crc_supported: false,
            ..Self::for_node(node_id)
        }
    }

    /// 블록 크기 지정 (1 ~ 127로 제한)
    pub fn with_block_size(mut self, block_size: u8) -> Self {
        self.block_size = clamp_block_size(block_size);
        self
    }

    /// 노드 ID 범위 확인 (1 ~ 127)
    pub fn validate(&self) -> Result<()> {
        if !(MIN_NODE_ID..=MAX_NODE_ID).contains(&self.node_id) {
            return Err(Error::InvalidConfig(format!(
                "node id {} (허용 범위 {} ~ {})",
                self.node_id, MIN_NODE_ID, MAX_NODE_ID
            )));
        }
        Ok(())
    }

    /// 제한 적용된 블록 크기
    pub fn effective_block_size(&self) -> u8 {
        clamp_block_size(self.block_size)
    }
}

/// 블록 크기를 1 ~ 127로 제한
pub fn clamp_block_size(block_size: u8) -> u8 {
    block_size.clamp(1, MAX_BLOCK_SIZE)
}
