// 비디오 인코딩 파이프라인
// RGBA FrameBuffer → PixelConverter(sws) → 인코더 포맷 → send/receive → 컨테이너

use crate::encoding::config::{RateControl, SequenceInfo, VideoSettings};
use crate::encoding::container::ContainerWriter;
use crate::encoding::encode::{encode, EncodeStatus, PacketSink, StreamDescriptor};
use crate::error::{ExportError, MediaKind, Result};
use crate::rendering::FrameBuffer;
use crate::utils::{frame_rate_rational, pts_for_elapsed};
use ffmpeg_next as ffmpeg;
use ffmpeg::codec;
use ffmpeg::format::Pixel;
use ffmpeg::software::scaling;

/// CRF 옵션을 이해하는 인코더들 (그 외는 QSCALE + global_quality)
const CRF_ENCODERS: &[&str] = &[
    "libx264", "libx264rgb", "libx265", "libvpx", "libvpx-vp9", "libaom-av1", "libsvtav1",
];

/// preset 옵션을 지원하는 인코더들
const PRESET_ENCODERS: &[&str] = &["libx264", "libx264rgb", "libx265"];

/// RGBA → 인코더 픽셀 포맷/크기 변환기
pub struct PixelConverter {
    scaler: scaling::Context,
    src_width: u32,
    src_height: u32,
    dst_format: Pixel,
}

impl PixelConverter {
    /// - high_quality: true면 LANCZOS, false면 FAST_BILINEAR
    pub fn new(
        src_width: u32,
        src_height: u32,
        dst_format: Pixel,
        dst_width: u32,
        dst_height: u32,
        high_quality: bool,
    ) -> Result<Self> {
        let flags = if high_quality {
            scaling::Flags::LANCZOS
        } else {
            scaling::Flags::FAST_BILINEAR
        };

        let scaler = scaling::Context::get(
            Pixel::RGBA,
            src_width,
            src_height,
            dst_format,
            dst_width,
            dst_height,
            flags,
        )
        .map_err(|e| ExportError::converter(MediaKind::Video, format!("Failed to create scaler: {}", e)))?;

        Ok(Self {
            scaler,
            src_width,
            src_height,
            dst_format,
        })
    }

    pub fn dst_format(&self) -> Pixel {
        self.dst_format
    }

    /// 렌더링된 프레임 변환 (매 호출마다 새 출력 프레임)
    pub fn convert(&mut self, buffer: &FrameBuffer) -> Result<ffmpeg::frame::Video> {
        if buffer.width != self.src_width || buffer.height != self.src_height {
            return Err(ExportError::Render(format!(
                "frame is {}x{}, expected {}x{}",
                buffer.width, buffer.height, self.src_width, self.src_height
            )));
        }
        if !buffer.is_valid() {
            return Err(ExportError::Render(format!(
                "Invalid frame data size: got {}, expected {} ({}x{}x4)",
                buffer.data.len(),
                buffer.expected_len(),
                buffer.width,
                buffer.height
            )));
        }

        // RGBA 데이터 → ffmpeg Video 프레임 (행 단위, stride 고려)
        let mut src_frame = ffmpeg::frame::Video::new(Pixel::RGBA, self.src_width, self.src_height);
        {
            let linesize = src_frame.stride(0);
            let row_size = self.src_width as usize * 4;
            let dst = src_frame.data_mut(0);
            for (y, row) in buffer.data.chunks_exact(row_size).enumerate() {
                let dst_offset = y * linesize;
                dst[dst_offset..dst_offset + row_size].copy_from_slice(row);
            }
        }

        let mut converted = ffmpeg::frame::Video::empty();
        self.scaler
            .run(&src_frame, &mut converted)
            .map_err(|e| ExportError::encode(MediaKind::Video, format!("Scaler failed: {}", e)))?;
        Ok(converted)
    }
}

/// 비디오 인코딩 파이프라인 (인코더 + 변환기 + 스트림)
pub struct VideoPipeline {
    encoder: ffmpeg::encoder::Video,
    converter: PixelConverter,
    stream: StreamDescriptor,
    last_pts: Option<i64>,
    frames_encoded: u64,
    /// pts가 진행하지 않아 버린 프레임 수
    frames_dropped: u64,
    packets_written: u64,
    finished: bool,
}

impl VideoPipeline {
    /// 인코더 검색 → 스트림 추가 → 설정 → open → 파라미터 복사 → 변환기 생성
    pub fn new(
        settings: &VideoSettings,
        sequence: &SequenceInfo,
        container: &mut ContainerWriter,
    ) -> Result<Self> {
        let codec = settings.codec.find_encoder(MediaKind::Video)?;
        let codec_name = codec.name().to_string();

        let frame_rate = frame_rate_rational(settings.frame_rate);
        let time_base = frame_rate.invert();

        // 글로벌 헤더 플래그 사전 확인 (borrow 충돌 방지)
        let needs_global_header = container.requires_global_header();
        let index = container.add_stream(codec, time_base, MediaKind::Video)?;
        let stream = StreamDescriptor {
            index,
            time_base,
            kind: MediaKind::Video,
        };

        // 인코더가 알려주는 첫 번째 픽셀 포맷 (없으면 YUV420P)
        let pixel_format = codec
            .video()
            .ok()
            .and_then(|video| video.formats())
            .and_then(|mut formats| formats.next())
            .unwrap_or(Pixel::YUV420P);

        let mut encoder = codec::context::Context::new_with_codec(codec)
            .encoder()
            .video()
            .map_err(|e| ExportError::EncoderOpen {
                kind: MediaKind::Video,
                message: format!("Failed to get video encoder: {}", e),
            })?;

        encoder.set_width(settings.width);
        encoder.set_height(settings.height);
        encoder.set_format(pixel_format);
        encoder.set_time_base(time_base);
        encoder.set_frame_rate(Some(frame_rate));
        // 정사각 픽셀 → DAR = width/height
        encoder.set_aspect_ratio(ffmpeg::Rational::new(1, 1));

        let mut opts = ffmpeg::Dictionary::new();
        match settings.rate_control {
            RateControl::ConstantBitrate(mbps) => {
                let bit_rate = (mbps * 1_000_000.0) as usize;
                encoder.set_bit_rate(bit_rate);
                encoder.set_max_bit_rate(bit_rate);
            }
            RateControl::ConstantQuality(crf) => {
                if CRF_ENCODERS.contains(&codec_name.as_str()) {
                    opts.set("crf", &crf.to_string());
                } else {
                    // CRF 0~51 → qscale 1~31
                    let qscale = 1 + (crf.min(51) * 30 + 25) / 51;
                    unsafe {
                        let ctx = encoder.as_mut_ptr();
                        (*ctx).flags |= codec::flag::Flags::QSCALE.bits() as i32;
                        (*ctx).global_quality = qscale as i32 * ffmpeg::ffi::FF_QP2LAMBDA as i32;
                    }
                }
            }
        }
        if let Some(preset) = &settings.preset {
            if PRESET_ENCODERS.contains(&codec_name.as_str()) {
                opts.set("preset", preset);
            }
        }

        // 글로벌 헤더 플래그 (MP4 컨테이너 호환)
        if needs_global_header {
            unsafe {
                (*encoder.as_mut_ptr()).flags |= codec::flag::Flags::GLOBAL_HEADER.bits() as i32;
            }
        }

        let mut encoder = encoder.open_as_with(codec, opts).map_err(|e| {
            log::error!("[VIDEO] failed to open {} encoder: {}", codec_name, e);
            ExportError::EncoderOpen {
                kind: MediaKind::Video,
                message: e.to_string(),
            }
        })?;
        // open 과정에서 초기화되므로 다시 설정
        encoder.set_aspect_ratio(ffmpeg::Rational::new(1, 1));

        container.copy_parameters(&stream, &encoder)?;

        let converter = PixelConverter::new(
            sequence.width,
            sequence.height,
            pixel_format,
            settings.width,
            settings.height,
            settings.high_quality_scaling,
        )?;

        log::info!(
            "[VIDEO] {} {}x{} {:?} @ {} fps, time_base {}, {:?}",
            codec_name,
            settings.width,
            settings.height,
            pixel_format,
            settings.frame_rate,
            time_base,
            settings.rate_control
        );

        Ok(Self {
            encoder,
            converter,
            stream,
            last_pts: None,
            frames_encoded: 0,
            frames_dropped: 0,
            packets_written: 0,
            finished: false,
        })
    }

    /// 프레임 제출 (None이면 flush)
    pub fn submit<S: PacketSink + ?Sized>(
        &mut self,
        frame: Option<&FrameBuffer>,
        sink: &mut S,
    ) -> Result<EncodeStatus> {
        let Some(buffer) = frame else {
            return self.flush(sink);
        };
        if self.finished {
            return Err(ExportError::encode(MediaKind::Video, "frame submitted after flush"));
        }

        let pts = pts_for_elapsed(buffer.timecode, self.stream.time_base);
        if self.last_pts.map_or(false, |last| pts <= last) {
            // 출력 fps < 타임라인 fps → 같은 pts로 떨어지는 프레임은 버림
            self.frames_dropped += 1;
            log::trace!("[VIDEO] dropping frame at {:.3}s (pts {} not advancing)", buffer.timecode, pts);
            return Ok(EncodeStatus::NeedsInput { packets: 0 });
        }

        let mut converted = self.converter.convert(buffer)?;
        converted.set_pts(Some(pts));

        let encoder: &mut ffmpeg::encoder::Encoder = &mut self.encoder;
        let status = encode(encoder, Some(&*converted), &self.stream, sink)?;
        match status {
            EncodeStatus::NotReady => {
                self.frames_dropped += 1;
                log::warn!("[VIDEO] encoder not ready, frame at pts {} skipped", pts);
            }
            _ => {
                self.last_pts = Some(pts);
                self.frames_encoded += 1;
            }
        }
        self.packets_written += status.packets() as u64;
        Ok(status)
    }

    /// EOF 전송 + 남은 패킷 수신 (반복 호출해도 추가 패킷 없음)
    fn flush<S: PacketSink + ?Sized>(&mut self, sink: &mut S) -> Result<EncodeStatus> {
        let encoder: &mut ffmpeg::encoder::Encoder = &mut self.encoder;
        let status = encode(encoder, None, &self.stream, sink)?;
        self.packets_written += status.packets() as u64;
        if status.is_finished() && !self.finished {
            self.finished = true;
            log::debug!(
                "[VIDEO] flushed: {} frames encoded, {} dropped, {} packets",
                self.frames_encoded, self.frames_dropped, self.packets_written
            );
        }
        Ok(status)
    }

    pub fn stream(&self) -> &StreamDescriptor {
        &self.stream
    }

    pub fn pixel_format(&self) -> Pixel {
        self.converter.dst_format()
    }

    pub fn frames_encoded(&self) -> u64 {
        self.frames_encoded
    }

    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped
    }

    pub fn packets_written(&self) -> u64 {
        self.packets_written
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_converter_rgba_to_yuv420p() {
        ffmpeg::init().unwrap();
        let mut converter = PixelConverter::new(64, 48, Pixel::YUV420P, 32, 24, false).unwrap();
        let frame = converter.convert(&FrameBuffer::black(64, 48, 0.0)).unwrap();
        assert_eq!(frame.format(), Pixel::YUV420P);
        assert_eq!(frame.width(), 32);
        assert_eq!(frame.height(), 24);
    }

    #[test]
    fn test_converter_lanczos() {
        ffmpeg::init().unwrap();
        let mut converter = PixelConverter::new(64, 48, Pixel::YUV420P, 64, 48, true).unwrap();
        let frame = converter
            .convert(&FrameBuffer::filled(64, 48, [255, 255, 255, 255], 0.0))
            .unwrap();
        // 흰색 → Y 평면 밝음
        assert!(frame.data(0)[0] > 200);
    }

    #[test]
    fn test_converter_rejects_wrong_size() {
        ffmpeg::init().unwrap();
        let mut converter = PixelConverter::new(64, 48, Pixel::YUV420P, 64, 48, false).unwrap();

        let err = converter.convert(&FrameBuffer::black(32, 32, 0.0)).unwrap_err();
        assert!(matches!(err, ExportError::Render(_)));

        let mut truncated = FrameBuffer::black(64, 48, 0.0);
        truncated.data.truncate(100);
        assert!(matches!(converter.convert(&truncated), Err(ExportError::Render(_))));
    }
}
