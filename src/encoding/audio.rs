// 오디오 인코딩 파이프라인
// 링 버퍼(S16 stereo) → 리샘플러(swr) → [샘플 FIFO] → send/receive → 컨테이너
//
// 오디오 시계 = 리샘플러가 실제로 내놓은 샘플 누적 수 (변환 전 청크 크기 아님)

use crate::audio::{AudioRingBuffer, BYTES_PER_SAMPLE_FRAME};
use crate::encoding::config::{AudioSettings, SequenceInfo};
use crate::encoding::container::ContainerWriter;
use crate::encoding::encode::{encode, EncodeStatus, PacketSink, StreamDescriptor};
use crate::error::{ExportError, MediaKind, Result};
use ffmpeg_next as ffmpeg;
use ffmpeg::codec;
use ffmpeg::format::{sample, Sample};
use ffmpeg::software::resampling;
use ffmpeg::ChannelLayout;

/// 링 버퍼 입력 포맷
const INPUT_FORMAT: Sample = Sample::I16(sample::Type::Packed);
const CHANNELS: usize = 2;

/// 리샘플링 여유분 (샘플)
const RESAMPLE_MARGIN: usize = 64;

/// S16 interleaved stereo → 인코더 포맷/샘플레이트 변환기
pub struct SampleResampler {
    context: resampling::Context,
    in_rate: u32,
    out_format: Sample,
    out_rate: u32,
}

impl SampleResampler {
    pub fn new(in_rate: u32, out_format: Sample, out_rate: u32) -> Result<Self> {
        let context = resampling::Context::get(
            INPUT_FORMAT,
            ChannelLayout::STEREO,
            in_rate,
            out_format,
            ChannelLayout::STEREO,
            out_rate,
        )
        .map_err(|e| ExportError::converter(MediaKind::Audio, format!("Failed to create resampler: {}", e)))?;

        Ok(Self {
            context,
            in_rate,
            out_format,
            out_rate,
        })
    }

    /// 입력 샘플 수에 대한 출력 프레임 용량
    fn output_capacity(&self, in_samples: usize) -> usize {
        if self.in_rate == self.out_rate {
            in_samples + RESAMPLE_MARGIN
        } else {
            (in_samples as u64 * self.out_rate as u64 / self.in_rate as u64) as usize + RESAMPLE_MARGIN * 2
        }
    }

    fn output_frame(&self, capacity: usize) -> ffmpeg::frame::Audio {
        let mut frame = ffmpeg::frame::Audio::new(self.out_format, capacity, ChannelLayout::STEREO);
        frame.set_rate(self.out_rate);
        frame
    }

    /// S16 interleaved 바이트 변환 (출력 샘플 수는 리샘플러 지연에 따라 달라질 수 있음)
    pub fn resample(&mut self, bytes: &[u8]) -> Result<ffmpeg::frame::Audio> {
        let in_samples = bytes.len() / BYTES_PER_SAMPLE_FRAME;
        let mut input = ffmpeg::frame::Audio::new(INPUT_FORMAT, in_samples, ChannelLayout::STEREO);
        input.set_rate(self.in_rate);
        let used = in_samples * BYTES_PER_SAMPLE_FRAME;
        input.data_mut(0)[..used].copy_from_slice(&bytes[..used]);

        let mut output = self.output_frame(self.output_capacity(in_samples));
        self.context
            .run(&input, &mut output)
            .map_err(|e| ExportError::encode(MediaKind::Audio, format!("resampling failed: {}", e)))?;
        Ok(output)
    }

    /// 내부에 남은 샘플 배출 (빈 프레임이 나올 때까지 호출)
    pub fn flush(&mut self) -> Result<ffmpeg::frame::Audio> {
        let buffered = self
            .context
            .delay()
            .map(|d| d.output.max(0) as usize)
            .unwrap_or(0);
        let mut output = self.output_frame(buffered.max(RESAMPLE_MARGIN));
        self.context
            .flush(&mut output)
            .map_err(|e| ExportError::encode(MediaKind::Audio, format!("resampler flush failed: {}", e)))?;
        Ok(output)
    }

    pub fn out_format(&self) -> Sample {
        self.out_format
    }

    pub fn out_rate(&self) -> u32 {
        self.out_rate
    }
}

/// 고정 프레임 크기 인코더(AAC 등)용 샘플 FIFO
/// 포맷 무관하게 plane별 바이트로 보관 (planar: 채널당 1 plane, packed: 1 plane)
pub struct SampleFifo {
    format: Sample,
    rate: u32,
    planes: Vec<Vec<u8>>,
    /// plane 하나에서 샘플 하나가 차지하는 바이트
    stride: usize,
}

impl SampleFifo {
    pub fn new(format: Sample, rate: u32) -> Self {
        let (plane_count, stride) = if format.is_planar() {
            (CHANNELS, format.bytes())
        } else {
            (1, format.bytes() * CHANNELS)
        };
        Self {
            format,
            rate,
            planes: vec![Vec::new(); plane_count],
            stride,
        }
    }

    /// 버퍼된 샘플 수 (채널당)
    pub fn len(&self) -> usize {
        self.planes.first().map_or(0, |p| p.len() / self.stride)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn push(&mut self, frame: &ffmpeg::frame::Audio) {
        let bytes = frame.samples() * self.stride;
        if bytes == 0 {
            return;
        }
        for (index, plane) in self.planes.iter_mut().enumerate() {
            plane.extend_from_slice(&frame.data(index)[..bytes]);
        }
    }

    /// 앞에서 최대 n 샘플 꺼냄
    /// - pad: true면 부족분을 무음으로 채워 항상 n 샘플
    pub fn pop(&mut self, n: usize, pad: bool, pts: i64) -> Option<ffmpeg::frame::Audio> {
        let available = self.len().min(n);
        if available == 0 {
            return None;
        }
        let samples = if pad { n } else { available };

        let mut frame = ffmpeg::frame::Audio::new(self.format, samples, ChannelLayout::STEREO);
        frame.set_rate(self.rate);
        frame.set_pts(Some(pts));

        let taken = available * self.stride;
        let total = samples * self.stride;
        for (index, plane) in self.planes.iter_mut().enumerate() {
            let dst = &mut frame.data_mut(index)[..total];
            dst[..taken].copy_from_slice(&plane[..taken]);
            dst[taken..].fill(0);
            plane.drain(..taken);
        }
        Some(frame)
    }
}

/// 오디오 인코딩 파이프라인 (인코더 + 리샘플러 + 스트림)
pub struct AudioPipeline {
    encoder: ffmpeg::encoder::Audio,
    resampler: SampleResampler,
    /// 인코더가 고정 frame_size를 요구할 때만 Some
    fifo: Option<SampleFifo>,
    /// 마지막 프레임이 짧아도 되는지 (아니면 무음 패딩)
    small_last_frame: bool,
    stream: StreamDescriptor,
    /// 작업 청크 (출력 샘플 기준)
    chunk_samples: usize,
    /// 링 버퍼에서 한 번에 꺼내는 입력 샘플 수
    input_chunk_samples: usize,
    /// 한 비디오 프레임당 최대 청크 수
    max_chunks_per_frame: usize,
    /// 리샘플러 출력 누적 샘플 수 (오디오 시계)
    samples_written: i64,
    /// 인코더로 보낸 샘플 수 (다음 프레임 pts)
    samples_sent: i64,
    chunks_drained: u64,
    packets_written: u64,
    resampler_flushed: bool,
    finished: bool,
}

impl AudioPipeline {
    /// 인코더 검색 → 스트림 추가 → 설정 → open → 파라미터 복사 → 리샘플러 생성
    pub fn new(
        settings: &AudioSettings,
        sequence: &SequenceInfo,
        container: &mut ContainerWriter,
    ) -> Result<Self> {
        let codec = settings.codec.find_encoder(MediaKind::Audio)?;
        let codec_name = codec.name().to_string();
        let rate = settings.sample_rate;
        let time_base = ffmpeg::Rational::new(1, rate as i32);

        let needs_global_header = container.requires_global_header();
        let index = container.add_stream(codec, time_base, MediaKind::Audio)?;
        let stream = StreamDescriptor {
            index,
            time_base,
            kind: MediaKind::Audio,
        };

        // 인코더가 알려주는 첫 번째 샘플 포맷
        let sample_format = codec
            .audio()
            .ok()
            .and_then(|audio| audio.formats())
            .and_then(|mut formats| formats.next())
            .unwrap_or(Sample::F32(sample::Type::Planar));
        let capabilities = codec.capabilities();

        let mut encoder = codec::context::Context::new_with_codec(codec)
            .encoder()
            .audio()
            .map_err(|e| ExportError::EncoderOpen {
                kind: MediaKind::Audio,
                message: format!("Failed to get audio encoder: {}", e),
            })?;

        encoder.set_rate(rate as i32);
        encoder.set_channel_layout(ChannelLayout::STEREO);
        encoder.set_format(sample_format);
        encoder.set_bit_rate(settings.bitrate_kbps as usize * 1000);
        encoder.set_time_base(time_base);

        if needs_global_header {
            unsafe {
                (*encoder.as_mut_ptr()).flags |= codec::flag::Flags::GLOBAL_HEADER.bits() as i32;
            }
        }

        let encoder = encoder
            .open_as_with(codec, ffmpeg::Dictionary::new())
            .map_err(|e| {
                log::error!("[AUDIO] failed to open {} encoder: {}", codec_name, e);
                ExportError::EncoderOpen {
                    kind: MediaKind::Audio,
                    message: e.to_string(),
                }
            })?;

        container.copy_parameters(&stream, &encoder)?;

        let resampler = SampleResampler::new(sequence.sample_rate, sample_format, rate)?;

        let frame_size = encoder.frame_size() as usize;
        let fixed_frame_size = frame_size > 0
            && !capabilities.contains(codec::capabilities::Capabilities::VARIABLE_FRAME_SIZE);
        let chunk_samples = if fixed_frame_size { frame_size } else { settings.fallback_chunk_samples };
        let input_chunk_samples =
            ((chunk_samples as u64 * sequence.sample_rate as u64).div_ceil(rate as u64) as usize).max(1);

        // 한 비디오 프레임 분량 + 1 청크
        let per_frame = rate as f64 / sequence.frame_rate;
        let max_chunks_per_frame = (per_frame / chunk_samples as f64).ceil() as usize + 1;

        log::info!(
            "[AUDIO] {} {} Hz {:?}, {} kbps, chunk {} samples{}",
            codec_name,
            rate,
            sample_format,
            settings.bitrate_kbps,
            chunk_samples,
            if fixed_frame_size { " (fixed frame size)" } else { "" }
        );

        Ok(Self {
            encoder,
            resampler,
            fifo: fixed_frame_size.then(|| SampleFifo::new(sample_format, rate)),
            small_last_frame: capabilities.contains(codec::capabilities::Capabilities::SMALL_LAST_FRAME),
            stream,
            chunk_samples,
            input_chunk_samples,
            max_chunks_per_frame,
            samples_written: 0,
            samples_sent: 0,
            chunks_drained: 0,
            packets_written: 0,
            resampler_flushed: false,
            finished: false,
        })
    }

    /// 오디오가 비디오 timecode(초)를 따라잡을 때까지 링 버퍼에서 청크를 꺼내 인코딩
    /// 반환: 이번에 꺼낸 청크 수
    pub fn catch_up<S: PacketSink + ?Sized>(
        &mut self,
        ring: &AudioRingBuffer,
        timecode: f64,
        sink: &mut S,
    ) -> Result<usize> {
        if self.resampler_flushed {
            return Err(ExportError::encode(MediaKind::Audio, "audio submitted after flush"));
        }

        let target = (timecode * self.resampler.out_rate() as f64).round() as i64;
        let mut chunk = vec![0u8; self.input_chunk_samples * BYTES_PER_SAMPLE_FRAME];
        let mut drained = 0;

        while self.samples_written <= target && drained < self.max_chunks_per_frame {
            ring.drain(&mut chunk);
            let resampled = self.resampler.resample(&chunk)?;
            drained += 1;
            self.chunks_drained += 1;

            let produced = resampled.samples();
            if produced > 0 {
                self.encode_samples(resampled, sink)?;
            }
            self.samples_written += produced as i64;
        }

        log::trace!(
            "[AUDIO] catch-up to {:.3}s: {} chunks, {} samples total",
            timecode, drained, self.samples_written
        );
        Ok(drained)
    }

    /// 리샘플러 잔여 샘플 + FIFO 잔여분을 인코더로 (인코더 EOF 전 1회)
    pub fn flush_resampler<S: PacketSink + ?Sized>(&mut self, sink: &mut S) -> Result<()> {
        if self.resampler_flushed {
            return Ok(());
        }
        loop {
            let remaining = self.resampler.flush()?;
            let produced = remaining.samples();
            if produced == 0 {
                break;
            }
            self.encode_samples(remaining, sink)?;
            self.samples_written += produced as i64;
        }

        // 마지막 프레임 (고정 크기 인코더)
        let pad = !self.small_last_frame;
        if let Some(fifo) = self.fifo.as_mut() {
            if let Some(frame) = fifo.pop(self.chunk_samples, pad, self.samples_sent) {
                self.samples_sent += frame.samples() as i64;
                self.send(&frame, sink)?;
            }
        }

        self.resampler_flushed = true;
        log::debug!("[AUDIO] resampler flushed, {} samples written", self.samples_written);
        Ok(())
    }

    /// 인코더 EOF 전송 + 남은 패킷 수신
    pub fn flush<S: PacketSink + ?Sized>(&mut self, sink: &mut S) -> Result<EncodeStatus> {
        if !self.resampler_flushed {
            self.flush_resampler(sink)?;
        }
        let encoder: &mut ffmpeg::encoder::Encoder = &mut self.encoder;
        let status = encode(encoder, None, &self.stream, sink)?;
        self.packets_written += status.packets() as u64;
        if status.is_finished() && !self.finished {
            self.finished = true;
            log::debug!(
                "[AUDIO] flushed: {} chunks, {} samples, {} packets",
                self.chunks_drained, self.samples_written, self.packets_written
            );
        }
        Ok(status)
    }

    /// 리샘플 결과를 인코더로 (FIFO 경유 또는 직접)
    fn encode_samples<S: PacketSink + ?Sized>(
        &mut self,
        mut frame: ffmpeg::frame::Audio,
        sink: &mut S,
    ) -> Result<()> {
        if self.fifo.is_none() {
            frame.set_pts(Some(self.samples_sent));
            self.samples_sent += frame.samples() as i64;
            return self.send(&frame, sink);
        }

        let mut ready = Vec::new();
        if let Some(fifo) = self.fifo.as_mut() {
            fifo.push(&frame);
            while fifo.len() >= self.chunk_samples {
                if let Some(out) = fifo.pop(self.chunk_samples, false, self.samples_sent) {
                    self.samples_sent += out.samples() as i64;
                    ready.push(out);
                }
            }
        }
        for out in &ready {
            self.send(out, sink)?;
        }
        Ok(())
    }

    fn send<S: PacketSink + ?Sized>(&mut self, frame: &ffmpeg::frame::Audio, sink: &mut S) -> Result<()> {
        let encoder: &mut ffmpeg::encoder::Encoder = &mut self.encoder;
        let status = encode(encoder, Some(&**frame), &self.stream, sink)?;
        if status == EncodeStatus::NotReady {
            log::warn!("[AUDIO] encoder not ready, {} samples skipped", frame.samples());
        }
        self.packets_written += status.packets() as u64;
        Ok(())
    }

    pub fn stream(&self) -> &StreamDescriptor {
        &self.stream
    }

    /// 리샘플러 출력 누적 샘플 수
    pub fn samples_written(&self) -> i64 {
        self.samples_written
    }

    pub fn chunk_samples(&self) -> usize {
        self.chunk_samples
    }

    pub fn max_chunks_per_frame(&self) -> usize {
        self.max_chunks_per_frame
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

    fn s16_bytes(samples: &[(i16, i16)]) -> Vec<u8> {
        let mut bytes = Vec::new();
        for (l, r) in samples {
            bytes.extend_from_slice(&l.to_ne_bytes());
            bytes.extend_from_slice(&r.to_ne_bytes());
        }
        bytes
    }

    #[test]
    fn test_resampler_same_rate_passthrough_count() {
        ffmpeg::init().unwrap();
        let mut resampler = SampleResampler::new(48000, Sample::I16(sample::Type::Packed), 48000).unwrap();
        let input = s16_bytes(&vec![(100, -100); 1600]);
        let output = resampler.resample(&input).unwrap();
        assert_eq!(output.samples(), 1600);
        assert_eq!(output.format(), Sample::I16(sample::Type::Packed));
    }

    #[test]
    fn test_resampler_rate_conversion_and_flush() {
        ffmpeg::init().unwrap();
        let mut resampler = SampleResampler::new(44100, Sample::F32(sample::Type::Planar), 48000).unwrap();
        let input = s16_bytes(&vec![(0, 0); 4410]);

        let mut total = 0;
        for _ in 0..10 {
            total += resampler.resample(&input).unwrap().samples();
        }
        loop {
            let flushed = resampler.flush().unwrap().samples();
            if flushed == 0 {
                break;
            }
            total += flushed;
        }
        // 1초 분량 입력 → 약 48000 출력
        assert!((total as i64 - 48000).abs() <= 64, "got {}", total);
    }

    #[test]
    fn test_fifo_planar_exact_frames() {
        let format = Sample::F32(sample::Type::Planar);
        let mut fifo = SampleFifo::new(format, 48000);
        let mut frame = ffmpeg::frame::Audio::new(format, 1500, ChannelLayout::STEREO);
        frame.set_rate(48000);
        fifo.push(&frame);
        assert_eq!(fifo.len(), 1500);

        let first = fifo.pop(1024, false, 0).unwrap();
        assert_eq!(first.samples(), 1024);
        assert_eq!(first.pts(), Some(0));
        assert_eq!(fifo.len(), 476);

        // 마지막 프레임: 짧게 또는 패딩
        let last = fifo.pop(1024, true, 1024).unwrap();
        assert_eq!(last.samples(), 1024);
        assert!(fifo.is_empty());
        assert!(fifo.pop(1024, false, 2048).is_none());
    }

    #[test]
    fn test_fifo_packed_preserves_order() {
        let format = Sample::I16(sample::Type::Packed);
        let mut fifo = SampleFifo::new(format, 48000);
        let mut frame = ffmpeg::frame::Audio::new(format, 3, ChannelLayout::STEREO);
        frame.data_mut(0)[..12].copy_from_slice(&s16_bytes(&[(1, 2), (3, 4), (5, 6)]));
        fifo.push(&frame);

        let out = fifo.pop(2, false, 0).unwrap();
        assert_eq!(&out.data(0)[..8], s16_bytes(&[(1, 2), (3, 4)]).as_slice());
        let rest = fifo.pop(2, false, 2).unwrap();
        assert_eq!(rest.samples(), 1);
        assert_eq!(&rest.data(0)[..4], s16_bytes(&[(5, 6)]).as_slice());
    }
}
