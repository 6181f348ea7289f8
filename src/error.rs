// Export 에러 타입
// 세션 전체에서 첫 번째 에러만 보존되어 호출자에게 전달됨

use std::fmt;
use std::path::PathBuf;

/// 스트림 종류 (에러 메시지/로그 태그용)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Video,
    Audio,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Video => f.write_str("video"),
            MediaKind::Audio => f.write_str("audio"),
        }
    }
}

/// Export 세션 에러
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExportError {
    #[error("could not make render context current: {0}")]
    SurfaceAcquisition(String),

    #[error("could not create output format context: {0}")]
    ContainerCreate(String),

    #[error("could not open output file {path}: {message}")]
    FileOpen { path: PathBuf, message: String },

    #[error("could not find {kind} encoder for {codec}")]
    EncoderNotFound { kind: MediaKind, codec: String },

    #[error("could not open output {kind} encoder: {message}")]
    EncoderOpen { kind: MediaKind, message: String },

    #[error("could not copy {kind} encoder parameters to output stream ({code})")]
    ParameterCopy { kind: MediaKind, code: i32 },

    #[error("could not write output file header: {0}")]
    HeaderWrite(String),

    #[error("{kind} encoding failed: {message}")]
    Encode { kind: MediaKind, message: String },

    #[error("could not write output file trailer: {0}")]
    TrailerWrite(String),

    #[error("invalid export configuration: {0}")]
    Config(String),

    #[error("could not create {kind} converter: {message}")]
    Converter { kind: MediaKind, message: String },

    #[error("render failed: {0}")]
    Render(String),

    #[error("export cancelled")]
    Cancelled,
}

impl ExportError {
    pub fn encode(kind: MediaKind, message: impl Into<String>) -> Self {
        Self::Encode {
            kind,
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn converter(kind: MediaKind, message: impl Into<String>) -> Self {
        Self::Converter {
            kind,
            message: message.into(),
        }
    }

    /// 설정 단계(헤더 작성 전)에서 발생하는 에러인지
    pub fn is_setup_error(&self) -> bool {
        matches!(
            self,
            Self::SurfaceAcquisition(_)
                | Self::ContainerCreate(_)
                | Self::FileOpen { .. }
                | Self::EncoderNotFound { .. }
                | Self::EncoderOpen { .. }
                | Self::ParameterCopy { .. }
                | Self::HeaderWrite(_)
                | Self::Config(_)
                | Self::Converter { .. }
        )
    }
}

/// Export 결과 타입
pub type Result<T> = std::result::Result<T, ExportError>;
