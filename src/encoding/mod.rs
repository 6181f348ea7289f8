// 인코딩 & 내보내기 모듈
// 타임라인 렌더 프레임 + 링 버퍼 오디오 → 인코더 → 컨테이너

pub mod audio;
pub mod config;
pub mod container;
pub mod encode;
pub mod exporter;
pub mod session;
pub mod video;

pub use config::{AudioSettings, CodecSelector, ExportConfig, RateControl, SequenceInfo, VideoSettings};
pub use container::{ContainerWriter, StreamStats};
pub use encode::{EncodeStatus, PacketEncoder, PacketSink, StreamDescriptor};
pub use exporter::ExportJob;
pub use session::{ExportSession, ExportSummary, ProgressSink, SessionPhase, SessionState};
