// C ABI - 호스트 애플리케이션 연동

pub mod exporter;
pub mod ring_buffer;
pub mod types;

pub use exporter::{ExportParams, RendererCallbacks};
pub use types::{engine_init_logging, ErrorCode};
