//! SDO 서버 - UDP 브리지
//!
//! CAN 버스 대신 UDP 데이터그램으로 SDO 프레임을 주고받는 데모 호스트
//! - 데이터그램 = COB-ID (u32 LE) + 데이터 최대 8바이트
//! - 서버의 요청 COB-ID로 온 프레임만 처리, 응답은 마지막 송신자에게
//!
//! 사용법:
//!   cargo run --release --bin sdo-server -- [OPTIONS]
//!
//! 예시:
//!   # 노드 5, 블록 크기 32
//!   cargo run --release --bin sdo-server -- --node-id 5 --block-size 32
//!
//!   # 오브젝트 딕셔너리 스냅샷 사용
//!   cargo run --release --bin sdo-server -- --store od.bin

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::{Buf, BufMut, BytesMut};
use parking_lot::RwLock;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use sdo::{Access, Config, MemoryStore, ObjectEntry, OutgoingFrame, SdoServer, FRAME_LEN};

/// COB-ID 헤더 길이
const COB_ID_LEN: usize = 4;

/// 통계 출력 주기
const REPORT_INTERVAL: Duration = Duration::from_secs(30);

/// 실행 옵션
struct ServerOptions {
    bind_addr: SocketAddr,
    store_path: Option<PathBuf>,
    config: Config,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 9600)),
            store_path: None,
            config: Config::default(),
        }
    }
}

fn parse_args() -> ServerOptions {
    let args: Vec<String> = std::env::args().collect();
    let mut options = ServerOptions::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--bind" | "-b" => {
                if i + 1 < args.len() {
                    options.bind_addr = args[i + 1].parse().expect("유효한 주소 필요");
                    i += 1;
                }
            }
            "--node-id" | "-n" => {
                if i + 1 < args.len() {
                    let node_id: u8 = args[i + 1].parse().expect("유효한 노드 ID 필요");
                    let Config {
                        block_size,
                        crc_supported,
                        ..
                    } = options.config;
                    options.config = Config {
                        block_size,
                        crc_supported,
                        ..Config::for_node(node_id)
                    };
                    i += 1;
                }
            }
            "--block-size" => {
                if i + 1 < args.len() {
                    let block_size = args[i + 1].parse().expect("유효한 숫자 필요");
                    options.config = options.config.with_block_size(block_size);
                    i += 1;
                }
            }
            "--no-crc" => {
                options.config.crc_supported = false;
            }
            "--store" | "-s" => {
                if i + 1 < args.len() {
                    options.store_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!(
                    r#"SDO Server - UDP 브리지

데이터그램 형식: COB-ID (u32 LE) + SDO 프레임 (최대 8바이트)

사용법:
  cargo run --release --bin sdo-server -- [OPTIONS]

옵션:
  -b, --bind <ADDR>       바인드 주소 (기본: 0.0.0.0:9600)
  -n, --node-id <ID>      노드 ID 1~127 (기본: 1 → 요청 0x601 / 응답 0x581)
  --block-size <N>        블록 다운로드 블록 크기 1~127 (기본: 127)
  --no-crc                블록 전송 CRC 비활성화
  -s, --store <PATH>      오브젝트 딕셔너리 스냅샷 (없으면 종료 시 생성)
  -h, --help              이 도움말 출력

로그 레벨은 RUST_LOG로 지정 (기본: info)
"#
                );
                std::process::exit(0);
            }
            other => warn!("알 수 없는 옵션 무시: {}", other),
        }
        i += 1;
    }

    options
}

/// 데모용 오브젝트 딕셔너리
fn sample_store(node_id: u8) -> MemoryStore {
    let store = MemoryStore::new()
        .with_entry(0x1000, 0, ObjectEntry::new("Device type", Access::Const, 0x0000_0191u32.to_le_bytes()))
        .with_entry(0x1008, 0, ObjectEntry::new("Manufacturer device name", Access::Const, "SDO UDP BRIDGE"))
        .with_entry(0x1009, 0, ObjectEntry::new("Manufacturer hardware version", Access::Const, "1.0"))
        .with_entry(0x100A, 0, ObjectEntry::new("Manufacturer software version", Access::Const, env!("CARGO_PKG_VERSION")))
        .with_entry(0x1017, 0, ObjectEntry::fixed("Producer heartbeat time", Access::ReadWrite, 1000u16.to_le_bytes()))
        .with_entry(0x1200, 1, ObjectEntry::fixed("COB-ID client to server", Access::ReadOnly, (0x600 + node_id as u32).to_le_bytes()))
        .with_entry(0x1200, 2, ObjectEntry::fixed("COB-ID server to client", Access::ReadOnly, (0x580 + node_id as u32).to_le_bytes()))
        .with_entry(0x2000, 0, ObjectEntry::new("Domain buffer", Access::ReadWrite, Vec::new()))
        .with_entry(0x2001, 0, ObjectEntry::fixed("INTEGER16 value", Access::ReadWrite, 0i16.to_le_bytes()))
        .with_entry(0x2002, 0, ObjectEntry::fixed("Uptime (s)", Access::ReadOnly, 0u32.to_le_bytes()));
    attach_callbacks(&store);
    store
}

/// 업타임 읽기 + 쓰기 로그 콜백
fn attach_callbacks(store: &MemoryStore) {
    let started = Instant::now();
    store.add_read_callback(move |target| {
        (target.index == 0x2002 && target.subindex == 0)
            .then(|| (started.elapsed().as_secs() as u32).to_le_bytes().to_vec())
    });
    store.add_write_callback(|target, data| {
        info!("오브젝트 갱신: {} ({} bytes)", target, data.len());
    });
}

fn load_store(options: &ServerOptions) -> Result<MemoryStore, Box<dyn std::error::Error>> {
    match &options.store_path {
        Some(path) if path.exists() => {
            info!("Loading object dictionary: {:?}", path);
            let store = MemoryStore::load(path)?;
            attach_callbacks(&store);
            Ok(store)
        }
        _ => Ok(sample_store(options.config.node_id)),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 로깅 설정
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let options = parse_args();
    let config = options.config.clone();
    config.validate()?;

    info!("SDO Server starting...");
    info!("Bind address: {}", options.bind_addr);
    info!("Node ID: {}", config.node_id);
    info!("COB-ID: rx 0x{:03X} / tx 0x{:03X}", config.rx_cob_id, config.tx_cob_id);
    info!("Block size: {}, CRC: {}", config.block_size, config.crc_supported);

    let store = Arc::new(load_store(&options)?);
    info!("Object dictionary: {} entries", store.len());

    // 소켓 바인딩
    let socket = Arc::new(UdpSocket::bind(options.bind_addr).await?);
    info!("Server listening on {}", options.bind_addr);

    // 마지막으로 요청을 보낸 피어 (응답 대상)
    let peer: Arc<RwLock<Option<SocketAddr>>> = Arc::new(RwLock::new(None));

    // ─────────────────────────────────────────────────────────────────
    // 송신 태스크: 서버 응답을 데이터그램으로 변환
    // ─────────────────────────────────────────────────────────────────
    let (frame_tx, mut frame_rx) = mpsc::unbounded_channel::<OutgoingFrame>();
    let send_socket = socket.clone();
    let send_peer = peer.clone();
    let send_task = tokio::spawn(async move {
        while let Some(frame) = frame_rx.recv().await {
            let addr = *send_peer.read();
            let Some(addr) = addr else {
                debug!("응답 대상 없음, 프레임 폐기");
                continue;
            };

            let mut datagram = BytesMut::with_capacity(COB_ID_LEN + FRAME_LEN);
            datagram.put_u32_le(frame.cob_id);
            datagram.put_slice(&frame.data);
            if let Err(e) = send_socket.send_to(&datagram, addr).await {
                warn!("응답 전송 실패: {} ({})", addr, e);
            }
        }
    });

    // ─────────────────────────────────────────────────────────────────
    // 수신 및 처리 루프
    // ─────────────────────────────────────────────────────────────────
    let mut server = SdoServer::new(config.clone(), store.clone(), Arc::new(frame_tx));
    let mut buf = [0u8; 64];
    let mut report = tokio::time::interval(REPORT_INTERVAL);
    report.tick().await;

    loop {
        tokio::select! {
            received = socket.recv_from(&mut buf) => {
                let (len, addr) = received?;
                let mut datagram = &buf[..len];
                if datagram.len() < COB_ID_LEN || datagram.len() > COB_ID_LEN + FRAME_LEN {
                    warn!("잘못된 데이터그램 길이: {} bytes from {}", len, addr);
                    continue;
                }

                let cob_id = datagram.get_u32_le();
                if cob_id != config.rx_cob_id {
                    debug!("다른 노드 프레임 무시: cob_id=0x{:03X}", cob_id);
                    continue;
                }

                *peer.write() = Some(addr);
                server.handle_incoming_frame(datagram, Instant::now());
            }
            _ = report.tick() => {
                info!("{}", server.stats().summary());
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down...");
                break;
            }
        }
    }

    info!("{}", server.stats().summary());

    // 서버가 송신 채널을 닫아야 송신 태스크가 끝남
    drop(server);
    let _ = send_task.await;

    if let Some(path) = &options.store_path {
        store.save(path)?;
        info!("Object dictionary saved: {:?}", path);
    }
    Ok(())
}
