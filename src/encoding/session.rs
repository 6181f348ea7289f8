// Export 세션 컨트롤러 - 상태 머신
// Idle → Configuring → HeaderWritten → Encoding → Flushing → TrailerWritten → Closed
// 어느 단계에서든 첫 에러 → Aborted (트레일러 없음), 정리는 항상 수행

use crate::audio::AudioRingBuffer;
use crate::encoding::audio::AudioPipeline;
use crate::encoding::config::ExportConfig;
use crate::encoding::container::{ContainerWriter, StreamStats};
use crate::encoding::video::VideoPipeline;
use crate::error::{ExportError, MediaKind, Result};
use crate::rendering::FrameRenderer;
use crate::utils::progress_percent;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::mpsc;
use std::sync::Arc;

/// flush 단계에서 인코더 EOF 반복 최대 횟수
const MAX_FLUSH_ROUNDS: usize = 16;

/// 세션 단계
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    Configuring,
    HeaderWritten,
    Encoding,
    Flushing,
    TrailerWritten,
    Aborted,
    Closed,
}

/// 진행률 알림 (프레임당 1회, 0~100)
pub trait ProgressSink {
    fn report(&self, percent: u32);
}

impl ProgressSink for AtomicU32 {
    fn report(&self, percent: u32) {
        self.store(percent, Ordering::SeqCst);
    }
}

impl ProgressSink for mpsc::Sender<u32> {
    fn report(&self, percent: u32) {
        // 수신 측이 사라져도 Export는 계속
        let _ = self.send(percent);
    }
}

impl ProgressSink for () {
    fn report(&self, _percent: u32) {}
}

/// 세션 진행 상태
#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    /// 현재 타임라인 프레임
    pub playhead: i64,
    /// 리샘플러 출력 누적 샘플 수
    pub audio_samples: i64,
    running: bool,
    first_error: Option<ExportError>,
}

impl SessionState {
    pub fn new(start_frame: i64) -> Self {
        Self {
            playhead: start_frame,
            audio_samples: 0,
            running: true,
            first_error: None,
        }
    }

    /// 에러 기록 (첫 번째만 보존) + 루프 중단
    pub fn fail(&mut self, error: ExportError) {
        self.running = false;
        if self.first_error.is_none() {
            self.first_error = Some(error);
        }
    }

    pub fn should_continue(&self) -> bool {
        self.running
    }

    pub fn first_error(&self) -> Option<&ExportError> {
        self.first_error.as_ref()
    }
}

/// 세션이 소유하는 네이티브 리소스 묶음
/// 해제 순서: 오디오 → 비디오 → 컨테이너 (획득 역순)
#[derive(Default)]
pub struct SessionResources {
    pub container: Option<ContainerWriter>,
    pub video: Option<VideoPipeline>,
    pub audio: Option<AudioPipeline>,
}

impl SessionResources {
    /// 여러 번 호출해도 안전
    pub fn release(&mut self) {
        if self.audio.take().is_some() {
            log::debug!("[EXPORT] 오디오 파이프라인 해제");
        }
        if self.video.take().is_some() {
            log::debug!("[EXPORT] 비디오 파이프라인 해제");
        }
        if let Some(mut container) = self.container.take() {
            container.close();
        }
    }

    pub fn is_empty(&self) -> bool {
        self.container.is_none() && self.video.is_none() && self.audio.is_none()
    }
}

/// Export 결과 요약
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExportSummary {
    pub output_path: PathBuf,
    /// 트레일러까지 정상 기록됐는지
    pub completed: bool,
    pub frames_rendered: u64,
    pub video_frames_encoded: u64,
    pub video_frames_dropped: u64,
    pub audio_samples: i64,
    /// 스트림별 기록 통계 (인덱스 순)
    pub streams: Vec<StreamStats>,
}

impl ExportSummary {
    /// 해당 종류 스트림들의 기록 패킷 합
    pub fn packets(&self, kind: MediaKind) -> u64 {
        self.streams
            .iter()
            .filter(|s| s.kind == kind)
            .map(|s| s.packets_written)
            .sum()
    }
}

/// Export 세션 (워커 스레드에서 생성/실행)
pub struct ExportSession<'a, R: FrameRenderer + ?Sized> {
    config: Arc<ExportConfig>,
    renderer: &'a mut R,
    ring: Arc<AudioRingBuffer>,
    progress: Option<&'a dyn ProgressSink>,
    cancel: Option<&'a AtomicBool>,
    phase: SessionPhase,
    state: SessionState,
    resources: SessionResources,
    surface_requested: bool,
    summary: ExportSummary,
}

impl<'a, R: FrameRenderer + ?Sized> ExportSession<'a, R> {
    pub fn new(config: Arc<ExportConfig>, renderer: &'a mut R, ring: Arc<AudioRingBuffer>) -> Self {
        let state = SessionState::new(config.start_frame);
        let summary = ExportSummary {
            output_path: config.output_path.clone(),
            ..ExportSummary::default()
        };
        Self {
            config,
            renderer,
            ring,
            progress: None,
            cancel: None,
            phase: SessionPhase::Idle,
            state,
            resources: SessionResources::default(),
            surface_requested: false,
            summary,
        }
    }

    pub fn with_progress(mut self, progress: &'a dyn ProgressSink) -> Self {
        self.progress = Some(progress);
        self
    }

    /// 프레임마다 확인하는 취소 플래그
    pub fn with_cancel_flag(mut self, cancel: &'a AtomicBool) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// 전체 실행: 설정 → 인코딩 → flush/트레일러 → 정리
    pub fn run(&mut self) -> Result<ExportSummary> {
        log::info!(
            "[EXPORT] 시작: frames {}..{} → {}",
            self.config.start_frame,
            self.config.end_frame,
            self.config.output_path.display()
        );

        let outcome = self
            .configure()
            .and_then(|()| self.encode_frames())
            .and_then(|()| self.finish());
        self.teardown();

        match outcome {
            Ok(()) => {
                log::info!(
                    "[EXPORT] 완료: {} ({} frames)",
                    self.config.output_path.display(),
                    self.summary.frames_rendered
                );
                Ok(self.summary.clone())
            }
            Err(e) => {
                log::error!("[EXPORT] 에러: {}", e);
                Err(e)
            }
        }
    }

    /// Idle → Configuring → HeaderWritten
    pub fn configure(&mut self) -> Result<()> {
        if self.phase != SessionPhase::Idle {
            return Err(ExportError::config(format!("cannot configure in phase {:?}", self.phase)));
        }
        if let Err(e) = self.config.validate() {
            return self.abort(e);
        }

        self.surface_requested = true;
        if let Err(message) = self.renderer.acquire_surface() {
            return self.abort(ExportError::SurfaceAcquisition(message));
        }
        self.phase = SessionPhase::Configuring;

        if let Err(e) = self.setup_resources() {
            return self.abort(e);
        }
        self.phase = SessionPhase::HeaderWritten;
        Ok(())
    }

    /// 컨테이너 → 비디오 → 오디오 → 헤더 (첫 실패에서 중단)
    fn setup_resources(&mut self) -> Result<()> {
        let config = Arc::clone(&self.config);
        let container = ContainerWriter::open(&config.output_path, config.format.as_deref())?;
        let container = self.resources.container.insert(container);

        if config.video.enabled {
            self.resources.video = Some(VideoPipeline::new(&config.video, &config.sequence, container)?);
        }
        if config.audio.enabled {
            self.resources.audio = Some(AudioPipeline::new(&config.audio, &config.sequence, container)?);
        }

        container.write_header()
    }

    /// HeaderWritten → Encoding: 프레임 루프
    pub fn encode_frames(&mut self) -> Result<()> {
        if self.phase != SessionPhase::HeaderWritten {
            return Err(ExportError::config(format!("cannot encode in phase {:?}", self.phase)));
        }
        let start = self.config.start_frame;
        let end = self.config.end_frame;
        let fps = self.config.sequence.frame_rate;

        self.renderer.seek(start);
        self.phase = SessionPhase::Encoding;
        log::info!("[EXPORT] 총 프레임: {}", end - start);

        while self.state.should_continue() && self.state.playhead < end {
            if self.cancel.map_or(false, |flag| flag.load(Ordering::SeqCst)) {
                log::info!("[EXPORT] 취소됨 (frame {}/{})", self.state.playhead - start, end - start);
                return self.abort(ExportError::Cancelled);
            }

            let frame_index = self.state.playhead;
            let timecode = (frame_index - start) as f64 / fps;
            if let Err(e) = self.encode_frame(timecode) {
                return self.abort(e);
            }

            let pct = progress_percent(frame_index, start, end);
            if let Some(progress) = self.progress {
                progress.report(pct);
            }
            self.state.playhead += 1;

            // 매 300프레임(~10초)마다 로그
            if (frame_index - start + 1) % 300 == 0 {
                log::info!("[EXPORT] 진행: {}/{} ({}%)", frame_index - start + 1, end - start, pct);
            }
        }
        Ok(())
    }

    /// 한 프레임: 렌더 → 비디오 제출 → 오디오 따라잡기
    fn encode_frame(&mut self, timecode: f64) -> Result<()> {
        let frame = self
            .renderer
            .render_frame(timecode)
            .map_err(|e| ExportError::Render(format!("렌더링 실패 ({:.3}s): {}", timecode, e)))?;
        self.summary.frames_rendered += 1;

        let SessionResources { container, video, audio } = &mut self.resources;
        let container = container
            .as_mut()
            .ok_or_else(|| ExportError::encode(MediaKind::Video, "container is not open"))?;

        if let Some(video) = video.as_mut() {
            video.submit(Some(&frame), container)?;
        }
        if let Some(audio) = audio.as_mut() {
            audio.catch_up(&self.ring, timecode, container)?;
            self.state.audio_samples = audio.samples_written();
        }
        Ok(())
    }

    /// Encoding → Flushing → TrailerWritten
    pub fn finish(&mut self) -> Result<()> {
        if self.phase != SessionPhase::Encoding {
            return Err(ExportError::config(format!("cannot finish in phase {:?}", self.phase)));
        }
        self.phase = SessionPhase::Flushing;

        if let Err(e) = self.flush_encoders() {
            return self.abort(e);
        }

        let trailer = match self.resources.container.as_mut() {
            Some(container) => container.write_trailer(),
            None => Err(ExportError::TrailerWrite("container is not open".to_string())),
        };
        if let Err(e) = trailer {
            return self.abort(e);
        }

        self.phase = SessionPhase::TrailerWritten;
        self.summary.completed = true;
        if let Some(progress) = self.progress {
            progress.report(100);
        }
        Ok(())
    }

    /// 리샘플러 잔여분 → 비디오/오디오 인코더 번갈아 EOF
    fn flush_encoders(&mut self) -> Result<()> {
        let SessionResources { container, video, audio } = &mut self.resources;
        let container = container
            .as_mut()
            .ok_or_else(|| ExportError::encode(MediaKind::Video, "container is not open"))?;

        if let Some(audio) = audio.as_mut() {
            audio.flush_resampler(container)?;
        }

        let mut video_done = video.is_none();
        let mut audio_done = audio.is_none();
        let mut rounds = 0;
        while !(video_done && audio_done) {
            if rounds == MAX_FLUSH_ROUNDS {
                let kind = if video_done { MediaKind::Audio } else { MediaKind::Video };
                return Err(ExportError::encode(kind, "encoder did not reach end of stream"));
            }
            rounds += 1;

            if let Some(video) = video.as_mut().filter(|_| !video_done) {
                video_done = video.submit(None, container)?.is_finished();
            }
            if let Some(audio) = audio.as_mut().filter(|_| !audio_done) {
                audio_done = audio.flush(container)?.is_finished();
            }
        }

        if let Some(audio) = audio.as_ref() {
            self.state.audio_samples = audio.samples_written();
        }
        log::debug!("[EXPORT] 인코더 flush 완료 ({} rounds)", rounds);
        Ok(())
    }

    /// → Closed: 리소스 역순 해제 후 렌더 surface 반납 (여러 번 호출해도 안전)
    pub fn teardown(&mut self) {
        if self.phase == SessionPhase::Closed {
            return;
        }

        self.capture_summary();
        self.resources.release();

        if self.surface_requested {
            self.renderer.release_surface();
            self.surface_requested = false;
        }

        if self.state.first_error.is_some() {
            log::warn!("[EXPORT] 중단 후 세션 종료: {}", self.config.output_path.display());
        }
        self.phase = SessionPhase::Closed;
    }

    fn capture_summary(&mut self) {
        if let Some(container) = self.resources.container.as_ref() {
            self.summary.streams = container.stats().to_vec();
        }
        if let Some(video) = self.resources.video.as_ref() {
            self.summary.video_frames_encoded = video.frames_encoded();
            self.summary.video_frames_dropped = video.frames_dropped();
        }
        self.summary.audio_samples = self.state.audio_samples;
    }

    fn abort(&mut self, error: ExportError) -> Result<()> {
        log::error!("[EXPORT] 중단 (단계 {:?}): {}", self.phase, error);
        self.state.fail(error.clone());
        self.phase = SessionPhase::Aborted;
        Err(error)
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn resources(&self) -> &SessionResources {
        &self.resources
    }

    pub fn summary(&self) -> &ExportSummary {
        &self.summary
    }
}

impl<'a, R: FrameRenderer + ?Sized> Drop for ExportSession<'a, R> {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::config::SequenceInfo;
    use crate::rendering::SolidColorRenderer;

    fn sequence() -> SequenceInfo {
        SequenceInfo { width: 64, height: 48, frame_rate: 30.0, sample_rate: 48000 }
    }

    fn ring() -> Arc<AudioRingBuffer> {
        Arc::new(AudioRingBuffer::with_duration(48000, 1.0))
    }

    #[test]
    fn test_state_keeps_first_error() {
        let mut state = SessionState::new(10);
        assert!(state.should_continue());
        assert_eq!(state.playhead, 10);

        state.fail(ExportError::Cancelled);
        state.fail(ExportError::TrailerWrite("late".into()));
        assert!(!state.should_continue());
        assert_eq!(state.first_error(), Some(&ExportError::Cancelled));
    }

    #[test]
    fn test_progress_sinks() {
        let atomic = AtomicU32::new(0);
        atomic.report(40);
        assert_eq!(atomic.load(Ordering::SeqCst), 40);

        let (tx, rx) = mpsc::channel();
        tx.report(10);
        tx.report(20);
        assert_eq!(rx.try_iter().collect::<Vec<_>>(), vec![10, 20]);

        drop(rx);
        tx.report(30); // 수신자 없음 → 무시
    }

    #[test]
    fn test_invalid_config_never_touches_renderer() {
        let dir = tempfile::tempdir().unwrap();
        let config = Arc::new(ExportConfig::new(dir.path().join("out.mkv"), sequence(), 5, 5));
        let mut renderer = SolidColorRenderer::new(64, 48, [0, 0, 0, 255]);

        let mut session = ExportSession::new(config, &mut renderer, ring());
        let err = session.run().unwrap_err();
        assert!(matches!(err, ExportError::Config(_)));
        assert_eq!(session.phase(), SessionPhase::Closed);
        drop(session);

        assert_eq!(renderer.acquire_count(), 0);
        assert_eq!(renderer.release_count(), 0);
    }

    #[test]
    fn test_surface_failure_releases_and_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.mkv");
        let config = Arc::new(ExportConfig::new(&path, sequence(), 0, 10));
        let mut renderer = SolidColorRenderer::failing_surface(64, 48);

        let mut session = ExportSession::new(config, &mut renderer, ring());
        let err = session.run().unwrap_err();
        assert!(matches!(err, ExportError::SurfaceAcquisition(_)));
        assert!(session.resources().is_empty());
        assert!(!session.summary().completed);
        drop(session);

        assert_eq!(renderer.release_count(), 1);
        assert!(!path.exists());
    }

    #[test]
    fn test_teardown_twice_after_abort() {
        let dir = tempfile::tempdir().unwrap();
        let config = Arc::new(
            ExportConfig::new(dir.path().join("out.mkv"), sequence(), 0, 10)
                .with_video(crate::encoding::config::VideoSettings::new("no-such-encoder", 64, 48, 30.0)),
        );
        let mut renderer = SolidColorRenderer::new(64, 48, [0, 0, 0, 255]);

        let mut session = ExportSession::new(config, &mut renderer, ring());
        assert!(session.configure().is_err());
        assert_eq!(session.phase(), SessionPhase::Aborted);
        // 중단 후 다음 단계는 진행 불가
        assert!(session.encode_frames().is_err());

        session.teardown();
        session.teardown();
        assert_eq!(session.phase(), SessionPhase::Closed);
        assert!(session.resources().is_empty());
        drop(session);

        assert_eq!(renderer.release_count(), 1);
    }
}
