// Exporter FFI - 호스트 연동
// Export 작업 생성/진행률/취소/파괴, 렌더러는 C 콜백으로 주입

use crate::audio::AudioRingBuffer;
use crate::encoding::config::{
    AudioSettings, CodecSelector, ExportConfig, SequenceInfo, VideoSettings,
};
use crate::encoding::exporter::ExportJob;
use crate::ffi::ring_buffer::clone_handle;
use crate::ffi::types::{optional_str, ErrorCode};
use crate::rendering::{FrameBuffer, FrameRenderer};
use std::ffi::{c_char, c_void, CStr, CString};
use std::sync::Arc;

/// 렌더 surface 획득 (0 = 성공)
pub type AcquireSurfaceFn = extern "C" fn(user_data: *mut c_void) -> i32;
pub type ReleaseSurfaceFn = extern "C" fn(user_data: *mut c_void);
pub type SeekFn = extern "C" fn(user_data: *mut c_void, frame: i64);
/// out_rgba(width*height*4 바이트)에 프레임을 채움 (0 = 성공)
pub type RenderFrameFn =
    extern "C" fn(user_data: *mut c_void, timecode: f64, out_rgba: *mut u8, len: usize) -> i32;

/// 호스트 렌더러 콜백
#[repr(C)]
#[derive(Clone, Copy)]
pub struct RendererCallbacks {
    pub user_data: *mut c_void,
    pub acquire_surface: Option<AcquireSurfaceFn>,
    pub release_surface: Option<ReleaseSurfaceFn>,
    pub seek: Option<SeekFn>,
    pub render_frame: Option<RenderFrameFn>,
}

/// Export 파라미터 (문자열은 UTF-8, nullable 항목은 기본값 사용)
#[repr(C)]
pub struct ExportParams {
    pub output_path: *const c_char,
    /// 먹서 이름 (null이면 확장자로 추론)
    pub format: *const c_char,

    pub video_enabled: i32,
    /// 인코더 이름 (null이면 H.264)
    pub video_codec: *const c_char,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    /// > 0 이면 고정 비트레이트(Mbps), 아니면 crf 사용
    pub bitrate_mbps: f64,
    pub crf: u32,
    pub high_quality_scaling: i32,

    pub audio_enabled: i32,
    /// 인코더 이름 (null이면 AAC)
    pub audio_codec: *const c_char,
    pub sample_rate: u32,
    pub audio_bitrate_kbps: u32,

    pub sequence_width: u32,
    pub sequence_height: u32,
    pub sequence_fps: f64,
    pub sequence_sample_rate: u32,

    pub start_frame: i64,
    pub end_frame: i64,
}

/// C 콜백 기반 렌더러 (워커 스레드로 이동)
struct CallbackRenderer {
    callbacks: RendererCallbacks,
    width: u32,
    height: u32,
}

// 호스트가 user_data를 워커 스레드에서 사용하는 것을 보장
unsafe impl Send for CallbackRenderer {}

impl FrameRenderer for CallbackRenderer {
    fn acquire_surface(&mut self) -> Result<(), String> {
        match self.callbacks.acquire_surface {
            Some(acquire) => match acquire(self.callbacks.user_data) {
                0 => Ok(()),
                code => Err(format!("host returned {}", code)),
            },
            None => Ok(()),
        }
    }

    fn release_surface(&mut self) {
        if let Some(release) = self.callbacks.release_surface {
            release(self.callbacks.user_data);
        }
    }

    fn seek(&mut self, frame: i64) {
        if let Some(seek) = self.callbacks.seek {
            seek(self.callbacks.user_data, frame);
        }
    }

    fn render_frame(&mut self, timecode: f64) -> Result<FrameBuffer, String> {
        let render = self
            .callbacks
            .render_frame
            .ok_or_else(|| "no render callback".to_string())?;
        let mut frame = FrameBuffer::black(self.width, self.height, timecode);
        let len = frame.data.len();
        match render(self.callbacks.user_data, timecode, frame.data.as_mut_ptr(), len) {
            0 => Ok(frame),
            code => Err(format!("host render returned {}", code)),
        }
    }
}

/// ExportParams → ExportConfig
unsafe fn config_from_params(params: &ExportParams) -> Result<ExportConfig, ErrorCode> {
    if params.output_path.is_null() {
        return Err(ErrorCode::NullPointer);
    }
    let output_path = CStr::from_ptr(params.output_path)
        .to_str()
        .map_err(|_| ErrorCode::InvalidParam)?
        .to_string();

    let sequence = SequenceInfo {
        width: params.sequence_width,
        height: params.sequence_height,
        frame_rate: params.sequence_fps,
        sample_rate: params.sequence_sample_rate,
    };
    let mut config = ExportConfig::new(output_path, sequence, params.start_frame, params.end_frame);

    if let Some(format) = optional_str(params.format)? {
        config = config.with_format(format);
    }

    if params.video_enabled != 0 {
        let codec = optional_str(params.video_codec)?
            .map(CodecSelector::Name)
            .unwrap_or(CodecSelector::Id(ffmpeg_next::codec::Id::H264));
        let mut video = VideoSettings::new(codec, params.width, params.height, params.fps);
        video = if params.bitrate_mbps > 0.0 {
            video.with_bitrate(params.bitrate_mbps)
        } else {
            video.with_quality(params.crf)
        };
        if params.high_quality_scaling != 0 {
            video = video.with_high_quality_scaling();
        }
        config = config.with_video(video);
    } else {
        config = config.without_video();
    }

    if params.audio_enabled != 0 {
        let codec = optional_str(params.audio_codec)?
            .map(CodecSelector::Name)
            .unwrap_or(CodecSelector::Id(ffmpeg_next::codec::Id::AAC));
        config = config.with_audio(AudioSettings::new(codec, params.sample_rate, params.audio_bitrate_kbps));
    } else {
        config = config.without_audio();
    }

    Ok(config)
}

/// Export 시작 (백그라운드 스레드에서 실행)
/// ring: ring_buffer_create 핸들 (null이면 무음)
/// out_job: ExportJob 핸들 반환
#[no_mangle]
pub extern "C" fn exporter_start(
    params: *const ExportParams,
    callbacks: *const RendererCallbacks,
    ring: *mut c_void,
    out_job: *mut *mut c_void,
) -> i32 {
    if params.is_null() || callbacks.is_null() || out_job.is_null() {
        return ErrorCode::NullPointer as i32;
    }

    crate::utils::init_logging();

    unsafe {
        let params = &*params;
        let config = match config_from_params(params) {
            Ok(config) => config,
            Err(code) => return code as i32,
        };
        // 파라미터 검증은 스레드 시작 전에
        if let Err(e) = config.validate() {
            log::error!("[EXPORT_FFI] 잘못된 설정: {}", e);
            return ErrorCode::from(&e) as i32;
        }

        let ring = if ring.is_null() {
            Arc::new(AudioRingBuffer::with_duration(config.sequence.sample_rate.max(1), 1.0))
        } else {
            clone_handle(ring)
        };

        let renderer = CallbackRenderer {
            callbacks: *callbacks,
            width: config.sequence.width,
            height: config.sequence.height,
        };

        // ExportJob 시작 (백그라운드 스레드)
        let job = ExportJob::start(config, Box::new(renderer), ring);
        *out_job = Box::into_raw(Box::new(job)) as *mut c_void;
    }

    ErrorCode::Success as i32
}

/// Export 진행률 가져오기 (0~100)
#[no_mangle]
pub extern "C" fn exporter_get_progress(job: *mut c_void) -> u32 {
    if job.is_null() {
        return 0;
    }

    unsafe {
        let job_ref = &*(job as *const ExportJob);
        job_ref.get_progress()
    }
}

/// Export 완료 여부 확인
/// 반환: 1=완료, 0=진행중
#[no_mangle]
pub extern "C" fn exporter_is_finished(job: *mut c_void) -> i32 {
    if job.is_null() {
        return 1; // null이면 완료로 처리
    }

    unsafe {
        let job_ref = &*(job as *const ExportJob);
        if job_ref.is_finished() { 1 } else { 0 }
    }
}

/// Export 에러 메시지 가져오기
/// out_error: 에러 문자열 포인터 (없으면 null)
/// 반환 후 string_free()로 해제 필요
#[no_mangle]
pub extern "C" fn exporter_get_error(
    job: *mut c_void,
    out_error: *mut *mut c_char,
) -> i32 {
    if job.is_null() || out_error.is_null() {
        return ErrorCode::NullPointer as i32;
    }

    unsafe {
        let job_ref = &*(job as *const ExportJob);

        *out_error = match job_ref.get_error().map(CString::new) {
            Some(Ok(c_str)) => c_str.into_raw(),
            _ => std::ptr::null_mut(),
        };
    }

    ErrorCode::Success as i32
}

/// Export 취소
#[no_mangle]
pub extern "C" fn exporter_cancel(job: *mut c_void) -> i32 {
    if job.is_null() {
        return ErrorCode::NullPointer as i32;
    }

    unsafe {
        let job_ref = &*(job as *const ExportJob);
        job_ref.cancel();
    }

    ErrorCode::Success as i32
}

/// ExportJob 파괴 (진행 중이면 취소 후 워커 종료까지 대기)
#[no_mangle]
pub extern "C" fn exporter_destroy(job: *mut c_void) -> i32 {
    if job.is_null() {
        return ErrorCode::NullPointer as i32;
    }

    unsafe {
        let _ = Box::from_raw(job as *mut ExportJob);
    }

    ErrorCode::Success as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(path: &CString) -> ExportParams {
        ExportParams {
            output_path: path.as_ptr(),
            format: std::ptr::null(),
            video_enabled: 1,
            video_codec: std::ptr::null(),
            width: 64,
            height: 48,
            fps: 30.0,
            bitrate_mbps: 0.0,
            crf: 23,
            high_quality_scaling: 0,
            audio_enabled: 0,
            audio_codec: std::ptr::null(),
            sample_rate: 48000,
            audio_bitrate_kbps: 192,
            sequence_width: 64,
            sequence_height: 48,
            sequence_fps: 30.0,
            sequence_sample_rate: 48000,
            start_frame: 0,
            end_frame: 10,
        }
    }

    #[test]
    fn test_params_to_config() {
        let path = CString::new("out.mkv").unwrap();
        let codec = CString::new("mpeg4").unwrap();
        let mut p = params(&path);
        p.video_codec = codec.as_ptr();
        p.bitrate_mbps = 4.0;

        let config = unsafe { config_from_params(&p) }.unwrap();
        assert_eq!(config.video.codec, CodecSelector::Name("mpeg4".into()));
        assert_eq!(config.video.rate_control, crate::encoding::config::RateControl::ConstantBitrate(4.0));
        assert!(!config.audio.enabled);
        assert_eq!(config.frame_count(), 10);
    }

    #[test]
    fn test_start_rejects_invalid_range() {
        let path = CString::new("out.mkv").unwrap();
        let mut p = params(&path);
        p.end_frame = 0;
        let callbacks = RendererCallbacks {
            user_data: std::ptr::null_mut(),
            acquire_surface: None,
            release_surface: None,
            seek: None,
            render_frame: None,
        };
        let mut job: *mut c_void = std::ptr::null_mut();
        let code = exporter_start(&p, &callbacks, std::ptr::null_mut(), &mut job);
        assert_eq!(code, ErrorCode::InvalidParam as i32);
        assert!(job.is_null());
    }

    #[test]
    fn test_null_job_handles() {
        assert_eq!(exporter_get_progress(std::ptr::null_mut()), 0);
        assert_eq!(exporter_is_finished(std::ptr::null_mut()), 1);
        assert_eq!(exporter_cancel(std::ptr::null_mut()), ErrorCode::NullPointer as i32);
        assert_eq!(exporter_destroy(std::ptr::null_mut()), ErrorCode::NullPointer as i32);
    }
}
