// Export 작업 관리 - 백그라운드 스레드, 진행률, 취소
// ExportJob: 렌더러를 워커 스레드로 넘겨 세션 실행, 끝나면 join으로 돌려받음

use crate::audio::AudioRingBuffer;
use crate::encoding::config::ExportConfig;
use crate::encoding::session::{ExportSession, ExportSummary};
use crate::error::ExportError;
use crate::rendering::FrameRenderer;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;

/// Export 작업 핸들 (호스트에서 폴링으로 상태 확인)
pub struct ExportJob {
    /// 진행률 (0~100)
    progress: Arc<AtomicU32>,
    /// 취소 플래그
    cancelled: Arc<AtomicBool>,
    /// 완료 플래그
    finished: Arc<AtomicBool>,
    /// 첫 번째 에러 (있으면 실패)
    error: Arc<Mutex<Option<ExportError>>>,
    summary: Arc<Mutex<Option<ExportSummary>>>,
    /// 워커 종료 시 렌더러 반환
    handle: Option<JoinHandle<Box<dyn FrameRenderer>>>,
}

impl ExportJob {
    /// Export 시작 (백그라운드 스레드에서 실행)
    pub fn start(
        config: ExportConfig,
        renderer: Box<dyn FrameRenderer>,
        ring: Arc<AudioRingBuffer>,
    ) -> Self {
        let progress = Arc::new(AtomicU32::new(0));
        let cancelled = Arc::new(AtomicBool::new(false));
        let finished = Arc::new(AtomicBool::new(false));
        let error: Arc<Mutex<Option<ExportError>>> = Arc::new(Mutex::new(None));
        let summary: Arc<Mutex<Option<ExportSummary>>> = Arc::new(Mutex::new(None));

        let p = progress.clone();
        let c = cancelled.clone();
        let f = finished.clone();
        let e = error.clone();
        let s = summary.clone();
        let config = Arc::new(config);

        let handle = std::thread::spawn(move || {
            let mut renderer = renderer;
            let result = {
                let mut session = ExportSession::new(config, &mut *renderer, ring)
                    .with_progress(&*p)
                    .with_cancel_flag(&c);
                let result = session.run();
                *lock_recover(&s) = Some(session.summary().clone());
                result
            };
            if let Err(err) = result {
                *lock_recover(&e) = Some(err);
            }
            f.store(true, Ordering::SeqCst);
            renderer
        });

        Self {
            progress,
            cancelled,
            finished,
            error,
            summary,
            handle: Some(handle),
        }
    }

    /// 진행률 가져오기 (0~100)
    pub fn get_progress(&self) -> u32 {
        self.progress.load(Ordering::SeqCst)
    }

    /// 취소 요청 (다음 프레임 경계에서 중단)
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// 완료 여부 (성공/실패/취소 모두)
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    /// 에러 (None이면 성공 또는 진행 중)
    pub fn error(&self) -> Option<ExportError> {
        lock_recover(&self.error).clone()
    }

    /// 에러 메시지 가져오기
    pub fn get_error(&self) -> Option<String> {
        self.error().map(|e| e.to_string())
    }

    /// 세션 요약 (완료 후에만 Some)
    pub fn summary(&self) -> Option<ExportSummary> {
        lock_recover(&self.summary).clone()
    }

    /// 워커 종료 대기 후 렌더러 반환 (두 번째 호출부터는 None)
    pub fn join(&mut self) -> Option<Box<dyn FrameRenderer>> {
        let handle = self.handle.take()?;
        match handle.join() {
            Ok(renderer) => Some(renderer),
            Err(_) => {
                log::error!("[EXPORT] worker thread panicked");
                self.finished.store(true, Ordering::SeqCst);
                None
            }
        }
    }
}

impl Drop for ExportJob {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.cancel();
            let _ = self.join();
        }
    }
}

fn lock_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::config::SequenceInfo;
    use crate::rendering::SolidColorRenderer;

    #[test]
    fn test_job_reports_config_error_and_returns_renderer() {
        let dir = tempfile::tempdir().unwrap();
        let sequence = SequenceInfo { width: 64, height: 48, frame_rate: 30.0, sample_rate: 48000 };
        let config = ExportConfig::new(dir.path().join("out.mkv"), sequence, 0, 0);
        let ring = Arc::new(AudioRingBuffer::with_duration(48000, 1.0));

        let mut job = ExportJob::start(config, Box::new(SolidColorRenderer::new(64, 48, [0, 0, 0, 255])), ring);
        let renderer = job.join();
        assert!(renderer.is_some());
        assert!(job.is_finished());
        assert!(matches!(job.error(), Some(ExportError::Config(_))));
        assert!(job.get_error().unwrap().contains("empty export range"));
        assert!(job.join().is_none());
    }
}
