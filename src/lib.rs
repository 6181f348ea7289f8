// Export 엔진 - 타임라인 렌더 프레임/오디오를 인코딩해 미디어 파일로 기록
// Rust + ffmpeg-next 기반

pub mod audio;
pub mod encoding;
pub mod error;
pub mod ffi;
pub mod rendering;
pub mod utils;

pub use audio::AudioRingBuffer;
pub use encoding::{ExportConfig, ExportJob, ExportSession, ExportSummary};
pub use error::{ExportError, MediaKind, Result};
pub use rendering::{FrameBuffer, FrameRenderer};
