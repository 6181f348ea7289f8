// Export 설정 - 세션 시작 전에 한 번 생성, 인코딩 중에는 변경 불가
// 출력 경로/컨테이너 + 비디오/오디오 인코더 설정 + 원본 시퀀스 정보 + 구간

use crate::error::{ExportError, MediaKind, Result};
use ffmpeg_next as ffmpeg;
use ffmpeg::codec;
use std::fmt;
use std::path::PathBuf;

/// 인코더 지정 방식 (코덱 ID 또는 인코더 이름)
#[derive(Debug, Clone, PartialEq)]
pub enum CodecSelector {
    /// 코덱 ID로 기본 인코더 검색 (예: H264 → libx264)
    Id(codec::Id),
    /// 인코더 이름으로 검색 (예: "libx264", "aac", "mpeg4")
    Name(String),
}

impl CodecSelector {
    /// 인코더 검색 (없으면 EncoderNotFound)
    pub fn find_encoder(&self, kind: MediaKind) -> Result<ffmpeg::Codec> {
        let found = match self {
            CodecSelector::Id(id) => ffmpeg::encoder::find(*id),
            CodecSelector::Name(name) => ffmpeg::encoder::find_by_name(name),
        };
        found.ok_or_else(|| ExportError::EncoderNotFound {
            kind,
            codec: self.to_string(),
        })
    }
}

impl fmt::Display for CodecSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecSelector::Id(id) => write!(f, "{:?}", id),
            CodecSelector::Name(name) => f.write_str(name),
        }
    }
}

impl From<codec::Id> for CodecSelector {
    fn from(id: codec::Id) -> Self {
        CodecSelector::Id(id)
    }
}

impl From<&str> for CodecSelector {
    fn from(name: &str) -> Self {
        CodecSelector::Name(name.to_string())
    }
}

/// 비디오 비트레이트 모드
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RateControl {
    /// 고정 비트레이트 (Mbps)
    ConstantBitrate(f64),
    /// 고정 품질 (CRF, 0=무손실 ~ 51=최저)
    ConstantQuality(u32),
}

impl Default for RateControl {
    fn default() -> Self {
        RateControl::ConstantQuality(23)
    }
}

/// 비디오 인코더 설정
#[derive(Debug, Clone, PartialEq)]
pub struct VideoSettings {
    pub enabled: bool,
    pub codec: CodecSelector,
    pub width: u32,
    pub height: u32,
    pub frame_rate: f64,
    pub rate_control: RateControl,
    /// x264/x265 preset (None이면 인코더 기본값)
    pub preset: Option<String>,
    /// true: LANCZOS 스케일링, false: FAST_BILINEAR
    pub high_quality_scaling: bool,
}

impl VideoSettings {
    pub fn new(codec: impl Into<CodecSelector>, width: u32, height: u32, frame_rate: f64) -> Self {
        Self {
            enabled: true,
            codec: codec.into(),
            width,
            height,
            frame_rate,
            rate_control: RateControl::default(),
            preset: Some("medium".to_string()),
            high_quality_scaling: false,
        }
    }

    /// H.264 기본 설정 (CRF 23, preset medium)
    pub fn h264(width: u32, height: u32, frame_rate: f64) -> Self {
        Self::new(codec::Id::H264, width, height, frame_rate)
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::h264(0, 0, 0.0)
        }
    }

    /// 고정 비트레이트 (Mbps)
    pub fn with_bitrate(mut self, mbps: f64) -> Self {
        self.rate_control = RateControl::ConstantBitrate(mbps);
        self
    }

    /// 고정 품질 (CRF)
    pub fn with_quality(mut self, crf: u32) -> Self {
        self.rate_control = RateControl::ConstantQuality(crf.min(51));
        self
    }

    pub fn with_preset(mut self, preset: impl Into<String>) -> Self {
        self.preset = Some(preset.into());
        self
    }

    pub fn with_high_quality_scaling(mut self) -> Self {
        self.high_quality_scaling = true;
        self
    }
}

/// 오디오 인코더 설정
#[derive(Debug, Clone, PartialEq)]
pub struct AudioSettings {
    pub enabled: bool,
    pub codec: CodecSelector,
    pub sample_rate: u32,
    /// 비트레이트 (kbps)
    pub bitrate_kbps: u32,
    /// 인코더가 선호 프레임 크기를 보고하지 않을 때 사용하는 청크 크기 (샘플)
    pub fallback_chunk_samples: usize,
}

impl AudioSettings {
    pub fn new(codec: impl Into<CodecSelector>, sample_rate: u32, bitrate_kbps: u32) -> Self {
        Self {
            enabled: true,
            codec: codec.into(),
            sample_rate,
            bitrate_kbps,
            fallback_chunk_samples: DEFAULT_CHUNK_SAMPLES,
        }
    }

    /// AAC 기본 설정 (192kbps)
    pub fn aac(sample_rate: u32) -> Self {
        Self::new(codec::Id::AAC, sample_rate, 192)
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::aac(48000)
        }
    }

    pub fn with_fallback_chunk(mut self, samples: usize) -> Self {
        self.fallback_chunk_samples = samples;
        self
    }
}

/// 기본 오디오 청크 크기 (인코더가 frame_size=0 보고 시)
pub const DEFAULT_CHUNK_SAMPLES: usize = 2048;

/// 원본 시퀀스(타임라인) 정보 — 렌더러/링 버퍼가 제공하는 포맷
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SequenceInfo {
    /// 렌더러가 내보내는 RGBA 프레임 크기
    pub width: u32,
    pub height: u32,
    /// 타임라인 프레임레이트 (playhead 진행 단위)
    pub frame_rate: f64,
    /// 링 버퍼 샘플레이트 (S16 interleaved stereo)
    pub sample_rate: u32,
}

/// Export 설정 (세션 단위, 불변)
#[derive(Debug, Clone, PartialEq)]
pub struct ExportConfig {
    pub output_path: PathBuf,
    /// 명시적 먹서 이름 (None이면 확장자로 추론)
    pub format: Option<String>,
    pub video: VideoSettings,
    pub audio: AudioSettings,
    pub sequence: SequenceInfo,
    /// 시작 프레임 (포함)
    pub start_frame: i64,
    /// 끝 프레임 (미포함)
    pub end_frame: i64,
}

impl ExportConfig {
    /// 기본값: 시퀀스 크기/프레임레이트 그대로 H.264 + AAC
    pub fn new(
        output_path: impl Into<PathBuf>,
        sequence: SequenceInfo,
        start_frame: i64,
        end_frame: i64,
    ) -> Self {
        Self {
            output_path: output_path.into(),
            format: None,
            video: VideoSettings::h264(sequence.width, sequence.height, sequence.frame_rate),
            audio: AudioSettings::aac(sequence.sample_rate),
            sequence,
            start_frame,
            end_frame,
        }
    }

    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    pub fn with_video(mut self, video: VideoSettings) -> Self {
        self.video = video;
        self
    }

    pub fn with_audio(mut self, audio: AudioSettings) -> Self {
        self.audio = audio;
        self
    }

    pub fn without_video(mut self) -> Self {
        self.video.enabled = false;
        self
    }

    pub fn without_audio(mut self) -> Self {
        self.audio.enabled = false;
        self
    }

    /// 내보낼 프레임 수
    pub fn frame_count(&self) -> i64 {
        (self.end_frame - self.start_frame).max(0)
    }

    /// 구간 길이 (초)
    pub fn duration_secs(&self) -> f64 {
        self.frame_count() as f64 / self.sequence.frame_rate
    }

    /// 세션 시작 전 검증 (Configuring 진입 전에 호출)
    pub fn validate(&self) -> Result<()> {
        if self.output_path.as_os_str().is_empty() {
            return Err(ExportError::config("output path is empty"));
        }
        if !self.video.enabled && !self.audio.enabled {
            return Err(ExportError::config("both video and audio are disabled"));
        }
        if self.end_frame <= self.start_frame {
            return Err(ExportError::config(format!(
                "empty export range: {}..{}",
                self.start_frame, self.end_frame
            )));
        }

        let seq = &self.sequence;
        if !(seq.frame_rate > 0.0 && seq.frame_rate.is_finite()) {
            return Err(ExportError::config(format!("invalid sequence frame rate {}", seq.frame_rate)));
        }
        if self.video.enabled && (seq.width == 0 || seq.height == 0) {
            return Err(ExportError::config("sequence has no picture size"));
        }
        if self.audio.enabled && seq.sample_rate == 0 {
            return Err(ExportError::config("sequence has no audio sample rate"));
        }

        if self.video.enabled {
            let v = &self.video;
            if v.width == 0 || v.height == 0 {
                return Err(ExportError::config(format!("invalid video size {}x{}", v.width, v.height)));
            }
            if !(v.frame_rate > 0.0 && v.frame_rate.is_finite()) {
                return Err(ExportError::config(format!("invalid video frame rate {}", v.frame_rate)));
            }
            if let RateControl::ConstantBitrate(mbps) = v.rate_control {
                if !(mbps > 0.0) {
                    return Err(ExportError::config(format!("invalid video bitrate {} Mbps", mbps)));
                }
            }
        }

        if self.audio.enabled {
            let a = &self.audio;
            if a.sample_rate == 0 {
                return Err(ExportError::config("audio sample rate is zero"));
            }
            if a.fallback_chunk_samples == 0 {
                return Err(ExportError::config("audio chunk size is zero"));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sequence() -> SequenceInfo {
        SequenceInfo { width: 640, height: 480, frame_rate: 30.0, sample_rate: 48000 }
    }

    #[test]
    fn test_defaults_follow_sequence() {
        let config = ExportConfig::new("out.mp4", sequence(), 0, 300);
        assert_eq!(config.video.width, 640);
        assert_eq!(config.video.height, 480);
        assert_eq!(config.video.frame_rate, 30.0);
        assert_eq!(config.audio.sample_rate, 48000);
        assert_eq!(config.video.rate_control, RateControl::ConstantQuality(23));
        assert_eq!(config.frame_count(), 300);
        assert!((config.duration_secs() - 10.0).abs() < 1e-9);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_range() {
        let config = ExportConfig::new("out.mp4", sequence(), 10, 10);
        assert!(matches!(config.validate(), Err(ExportError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_no_streams() {
        let config = ExportConfig::new("out.mp4", sequence(), 0, 10)
            .without_video()
            .without_audio();
        assert!(matches!(config.validate(), Err(ExportError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_bad_bitrate() {
        let config = ExportConfig::new("out.mp4", sequence(), 0, 10)
            .with_video(VideoSettings::h264(640, 480, 30.0).with_bitrate(0.0));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_audio_only_ignores_picture_size() {
        let mut seq = sequence();
        seq.width = 0;
        seq.height = 0;
        let config = ExportConfig::new("out.wav", seq, 0, 10).without_video();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_quality_is_clamped() {
        let video = VideoSettings::h264(640, 480, 30.0).with_quality(80);
        assert_eq!(video.rate_control, RateControl::ConstantQuality(51));
    }

    #[test]
    fn test_codec_selector_display() {
        assert_eq!(CodecSelector::from("mpeg4").to_string(), "mpeg4");
        assert_eq!(CodecSelector::from(codec::Id::H264).to_string(), "H264");
    }
}
