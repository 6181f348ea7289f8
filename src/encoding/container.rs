// 컨테이너 라이터 - 출력 포맷 컨텍스트 소유
// 스트림 등록 → 헤더 → 인터리브 패킷 기록 → 트레일러 → 닫기

use crate::encoding::encode::{PacketSink, StreamDescriptor};
use crate::error::{ExportError, MediaKind, Result};
use crate::utils::describe_av_error;
use ffmpeg_next as ffmpeg;
use ffmpeg::ffi;
use std::ffi::CString;
use std::path::{Path, PathBuf};
use std::ptr;

/// 스트림별 기록 통계
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamStats {
    pub kind: MediaKind,
    pub packets_written: u64,
    /// 기록 실패로 버려진 패킷 수
    pub packets_dropped: u64,
    /// 마지막으로 기록한 DTS (스트림 time_base)
    pub last_dts: Option<i64>,
    /// DTS가 역행한 횟수 (정상이면 0)
    pub non_monotonic: u64,
}

impl StreamStats {
    fn new(kind: MediaKind) -> Self {
        Self {
            kind,
            packets_written: 0,
            packets_dropped: 0,
            last_dts: None,
            non_monotonic: 0,
        }
    }
}

/// 출력 컨테이너 라이터
pub struct ContainerWriter {
    /// None이면 이미 닫힘
    output: Option<ffmpeg::format::context::Output>,
    path: PathBuf,
    header_written: bool,
    trailer_written: bool,
    stats: Vec<StreamStats>,
}

impl ContainerWriter {
    /// 출력 컨텍스트 생성 + 파일 열기
    /// - format: 명시적 먹서 이름 (None이면 확장자로 추론)
    pub fn open(path: &Path, format: Option<&str>) -> Result<Self> {
        ffmpeg::init().map_err(|e| ExportError::ContainerCreate(format!("FFmpeg init failed: {}", e)))?;

        let path_str = path.to_str().ok_or_else(|| ExportError::FileOpen {
            path: path.to_path_buf(),
            message: "path is not valid UTF-8".to_string(),
        })?;
        let c_path = CString::new(path_str).map_err(|_| ExportError::FileOpen {
            path: path.to_path_buf(),
            message: "path contains a NUL byte".to_string(),
        })?;
        let c_format = match format {
            Some(name) => Some(CString::new(name).map_err(|_| {
                ExportError::ContainerCreate(format!("invalid format name {:?}", name))
            })?),
            None => None,
        };

        unsafe {
            let mut ctx: *mut ffi::AVFormatContext = ptr::null_mut();
            let ret = ffi::avformat_alloc_output_context2(
                &mut ctx,
                ptr::null(),
                c_format.as_ref().map_or(ptr::null(), |f| f.as_ptr()),
                c_path.as_ptr(),
            );
            if ret < 0 || ctx.is_null() {
                log::error!("[CONTAINER] could not create output context for {}", path.display());
                return Err(ExportError::ContainerCreate(format!(
                    "no output format for {} ({})",
                    format.unwrap_or(path_str),
                    describe_av_error(ret)
                )));
            }

            // AVFMT_NOFILE 포맷(이미지 시퀀스 등)은 먹서가 직접 파일을 다룸
            let needs_file = ((*(*ctx).oformat).flags & ffi::AVFMT_NOFILE as i32) == 0;
            if needs_file {
                let ret = ffi::avio_open(&mut (*ctx).pb, c_path.as_ptr(), ffi::AVIO_FLAG_WRITE as i32);
                if ret < 0 {
                    ffi::avformat_free_context(ctx);
                    log::error!("[CONTAINER] could not open output file {}", path.display());
                    return Err(ExportError::FileOpen {
                        path: path.to_path_buf(),
                        message: describe_av_error(ret),
                    });
                }
            }

            log::info!("[CONTAINER] opened {}", path.display());

            Ok(Self {
                output: Some(ffmpeg::format::context::Output::wrap(ctx)),
                path: path.to_path_buf(),
                header_written: false,
                trailer_written: false,
                stats: Vec::new(),
            })
        }
    }

    /// 먹서가 글로벌 헤더(extradata)를 요구하는지
    pub fn requires_global_header(&self) -> bool {
        self.output.as_ref().map_or(false, |output| {
            output.format().flags().contains(ffmpeg::format::flag::Flags::GLOBAL_HEADER)
        })
    }

    /// 스트림 등록 (헤더 작성 전에만 가능)
    pub fn add_stream(
        &mut self,
        codec: ffmpeg::Codec,
        time_base: ffmpeg::Rational,
        kind: MediaKind,
    ) -> Result<usize> {
        if self.header_written {
            return Err(ExportError::ContainerCreate(format!(
                "cannot add {} stream after the header was written",
                kind
            )));
        }
        let output = self.output_mut()?;

        let mut stream = output
            .add_stream(codec)
            .map_err(|e| ExportError::ContainerCreate(format!("could not allocate {} stream: {}", kind, e)))?;
        stream.set_time_base(time_base);
        let index = stream.index();

        if self.stats.len() <= index {
            self.stats.resize(index + 1, StreamStats::new(kind));
        }
        self.stats[index] = StreamStats::new(kind);

        log::debug!("[CONTAINER] added {} stream #{}", kind, index);
        Ok(index)
    }

    /// 열린 인코더 파라미터를 스트림 codecpar에 복사
    pub fn copy_parameters(
        &mut self,
        stream: &StreamDescriptor,
        encoder: &ffmpeg::codec::Context,
    ) -> Result<()> {
        let output = self.output_mut()?;
        unsafe {
            let ctx = output.as_mut_ptr();
            if stream.index >= (*ctx).nb_streams as usize {
                return Err(ExportError::ParameterCopy { kind: stream.kind, code: ffi::AVERROR(libc::EINVAL) });
            }
            let av_stream = *(*ctx).streams.add(stream.index);
            let ret = ffi::avcodec_parameters_from_context(
                (*av_stream).codecpar,
                encoder.as_ptr() as *mut ffi::AVCodecContext,
            );
            if ret < 0 {
                log::error!("[CONTAINER] could not copy {} encoder parameters ({})", stream.kind, ret);
                return Err(ExportError::ParameterCopy { kind: stream.kind, code: ret });
            }
        }
        Ok(())
    }

    /// 파일 헤더 작성 (모든 스트림 설정 후 1회)
    pub fn write_header(&mut self) -> Result<()> {
        let output = self
            .output
            .as_mut()
            .ok_or_else(|| ExportError::HeaderWrite("container already closed".to_string()))?;
        output
            .write_header()
            .map_err(|e| ExportError::HeaderWrite(e.to_string()))?;
        self.header_written = true;
        log::info!("[CONTAINER] header written ({} streams)", self.stats.len());
        Ok(())
    }

    /// 트레일러 작성 (인덱스/길이 메타데이터 확정)
    pub fn write_trailer(&mut self) -> Result<()> {
        if !self.header_written {
            return Err(ExportError::TrailerWrite("header was never written".to_string()));
        }
        if self.trailer_written {
            return Ok(());
        }
        let output = self
            .output
            .as_mut()
            .ok_or_else(|| ExportError::TrailerWrite("container already closed".to_string()))?;
        output
            .write_trailer()
            .map_err(|e| ExportError::TrailerWrite(e.to_string()))?;
        self.trailer_written = true;
        log::info!("[CONTAINER] trailer written: {}", self.path.display());
        Ok(())
    }

    /// 컨텍스트 해제 + 파일 닫기 (여러 번 호출해도 안전)
    pub fn close(&mut self) {
        if self.output.take().is_some() {
            log::debug!("[CONTAINER] closed {}", self.path.display());
        }
    }

    pub fn is_closed(&self) -> bool {
        self.output.is_none()
    }

    pub fn header_written(&self) -> bool {
        self.header_written
    }

    pub fn trailer_written(&self) -> bool {
        self.trailer_written
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 스트림별 통계 (인덱스 순)
    pub fn stats(&self) -> &[StreamStats] {
        &self.stats
    }

    pub fn stream_stats(&self, index: usize) -> Option<&StreamStats> {
        self.stats.get(index)
    }

    fn output_mut(&mut self) -> Result<&mut ffmpeg::format::context::Output> {
        self.output
            .as_mut()
            .ok_or_else(|| ExportError::ContainerCreate("container already closed".to_string()))
    }
}

impl PacketSink for ContainerWriter {
    /// 인코더 time_base → 스트림 time_base 변환 후 인터리브 기록
    /// 실패는 로그만 남기고 세션은 계속 진행
    fn write_packet(&mut self, packet: &mut ffmpeg::Packet, stream: &StreamDescriptor) {
        let Some(output) = self.output.as_mut() else {
            log::warn!("[CONTAINER] dropping {} packet: container closed", stream.kind);
            return;
        };
        let Some(stream_time_base) = output.stream(stream.index).map(|s| s.time_base()) else {
            log::warn!("[CONTAINER] dropping packet for unknown stream #{}", stream.index);
            return;
        };

        packet.set_stream(stream.index);
        packet.rescale_ts(stream.time_base, stream_time_base);
        let dts = packet.dts().or(packet.pts());

        let result = packet.write_interleaved(output);

        let Some(stats) = self.stats.get_mut(stream.index) else {
            return;
        };
        match result {
            Ok(()) => {
                stats.packets_written += 1;
                if let Some(dts) = dts {
                    if stats.last_dts.map_or(false, |last| dts < last) {
                        stats.non_monotonic += 1;
                        log::warn!(
                            "[CONTAINER] non-monotonic {} dts {} after {:?}",
                            stream.kind, dts, stats.last_dts
                        );
                    }
                    stats.last_dts = Some(dts);
                }
            }
            Err(e) => {
                stats.packets_dropped += 1;
                log::warn!("[CONTAINER] failed to write {} packet: {}", stream.kind, e);
            }
        }
    }
}

impl Drop for ContainerWriter {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_format_is_container_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.definitely-not-a-format");
        let err = ContainerWriter::open(&path, None).err().unwrap();
        assert!(matches!(err, ExportError::ContainerCreate(_)));
    }

    #[test]
    fn test_unknown_explicit_format_is_container_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.mp4");
        let err = ContainerWriter::open(&path, Some("no_such_muxer")).err().unwrap();
        assert!(matches!(err, ExportError::ContainerCreate(_)));
    }

    #[test]
    fn test_missing_directory_is_file_open_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("out.mp4");
        let err = ContainerWriter::open(&path, None).err().unwrap();
        assert!(matches!(err, ExportError::FileOpen { .. }));
        assert!(!path.exists());
    }

    #[test]
    fn test_close_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.mkv");
        let mut writer = ContainerWriter::open(&path, None).unwrap();
        assert!(!writer.is_closed());
        writer.close();
        writer.close();
        assert!(writer.is_closed());
        assert!(writer.write_header().is_err());
    }

    #[test]
    fn test_trailer_requires_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.mkv");
        let mut writer = ContainerWriter::open(&path, None).unwrap();
        assert!(matches!(writer.write_trailer(), Err(ExportError::TrailerWrite(_))));
        assert!(!writer.trailer_written());
    }

    #[test]
    fn test_explicit_format_overrides_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");
        let writer = ContainerWriter::open(&path, Some("matroska")).unwrap();
        assert!(!writer.header_written());
        assert_eq!(writer.path(), path.as_path());
    }
}
