// 렌더 협력자 인터페이스 - Export 워커가 프레임을 요청하는 쪽
// 호스트(타임라인 합성기)가 구현, Export 세션이 워커 스레드에서 독점 사용

/// 렌더링된 RGBA 프레임 (합성 크기 고정)
#[derive(Debug, Clone, PartialEq)]
pub struct FrameBuffer {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>, // RGBA 포맷, stride = width * 4
    /// Export 시작 기준 표시 시각 (초)
    pub timecode: f64,
}

impl FrameBuffer {
    /// 검은색 프레임
    pub fn black(width: u32, height: u32, timecode: f64) -> Self {
        Self::filled(width, height, [0, 0, 0, 255], timecode)
    }

    /// 단색 프레임
    pub fn filled(width: u32, height: u32, rgba: [u8; 4], timecode: f64) -> Self {
        let pixels = width as usize * height as usize;
        let mut data = Vec::with_capacity(pixels * 4);
        for _ in 0..pixels {
            data.extend_from_slice(&rgba);
        }
        Self { width, height, data, timecode }
    }

    /// width * height * 4
    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * 4
    }

    pub fn is_valid(&self) -> bool {
        self.data.len() == self.expected_len()
    }
}

/// Export 세션이 사용하는 렌더러
///
/// 세션 동안 워커 스레드가 독점하므로 Send 필요.
/// acquire_surface 성공 후에는 세션 결과와 무관하게 release_surface가 정확히 한 번 호출됨.
pub trait FrameRenderer: Send {
    /// 렌더 컨텍스트를 현재 스레드에 바인딩
    fn acquire_surface(&mut self) -> Result<(), String>;

    fn release_surface(&mut self);

    /// 타임라인 재생 위치 이동 (Export 시작 프레임)
    fn seek(&mut self, frame: i64);

    /// timecode(초, Export 시작 기준) 프레임 렌더링
    fn render_frame(&mut self, timecode: f64) -> Result<FrameBuffer, String>;
}

impl<R: FrameRenderer + ?Sized> FrameRenderer for Box<R> {
    fn acquire_surface(&mut self) -> Result<(), String> {
        (**self).acquire_surface()
    }

    fn release_surface(&mut self) {
        (**self).release_surface()
    }

    fn seek(&mut self, frame: i64) {
        (**self).seek(frame)
    }

    fn render_frame(&mut self, timecode: f64) -> Result<FrameBuffer, String> {
        (**self).render_frame(timecode)
    }
}

/// 단색 테스트 패턴 렌더러
/// 프레임마다 밝기를 조금씩 바꿔서 인코더가 모든 프레임을 스킵하지 않게 함
pub struct SolidColorRenderer {
    width: u32,
    height: u32,
    color: [u8; 4],
    acquired: bool,
    /// acquire/release 호출 횟수 (테스트 검증용)
    acquire_count: u32,
    release_count: u32,
    seek_frame: Option<i64>,
    rendered: u64,
    fail_acquire: bool,
}

impl SolidColorRenderer {
    pub fn new(width: u32, height: u32, color: [u8; 4]) -> Self {
        Self {
            width,
            height,
            color,
            acquired: false,
            acquire_count: 0,
            release_count: 0,
            seek_frame: None,
            rendered: 0,
            fail_acquire: false,
        }
    }

    /// acquire_surface가 항상 실패하는 렌더러
    pub fn failing_surface(width: u32, height: u32) -> Self {
        Self {
            fail_acquire: true,
            ..Self::new(width, height, [0, 0, 0, 255])
        }
    }

    pub fn is_acquired(&self) -> bool {
        self.acquired
    }

    pub fn acquire_count(&self) -> u32 {
        self.acquire_count
    }

    pub fn release_count(&self) -> u32 {
        self.release_count
    }

    /// 마지막 seek 위치
    pub fn seek_frame(&self) -> Option<i64> {
        self.seek_frame
    }

    pub fn frames_rendered(&self) -> u64 {
        self.rendered
    }
}

impl FrameRenderer for SolidColorRenderer {
    fn acquire_surface(&mut self) -> Result<(), String> {
        self.acquire_count += 1;
        if self.fail_acquire {
            return Err("surface unavailable".to_string());
        }
        self.acquired = true;
        Ok(())
    }

    fn release_surface(&mut self) {
        self.release_count += 1;
        self.acquired = false;
    }

    fn seek(&mut self, frame: i64) {
        self.seek_frame = Some(frame);
    }

    fn render_frame(&mut self, timecode: f64) -> Result<FrameBuffer, String> {
        if !self.acquired {
            return Err("render surface not acquired".to_string());
        }
        let shade = (self.rendered % 64) as u8;
        let [r, g, b, a] = self.color;
        self.rendered += 1;
        Ok(FrameBuffer::filled(
            self.width,
            self.height,
            [r.saturating_add(shade), g, b.saturating_add(shade), a],
            timecode,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_black_frame() {
        let frame = FrameBuffer::black(960, 540, 1.0);
        assert_eq!(frame.width, 960);
        assert_eq!(frame.height, 540);
        assert_eq!(frame.data.len(), 960 * 540 * 4);
        assert!(frame.is_valid());
        assert!(frame.data.chunks(4).all(|px| px == [0, 0, 0, 255]));
    }

    #[test]
    fn test_solid_renderer_requires_surface() {
        let mut renderer = SolidColorRenderer::new(16, 16, [255, 0, 0, 255]);
        assert!(renderer.render_frame(0.0).is_err());

        renderer.acquire_surface().unwrap();
        let frame = renderer.render_frame(0.5).unwrap();
        assert_eq!(frame.timecode, 0.5);
        assert_eq!(&frame.data[..4], &[255, 0, 0, 255]);
        assert_eq!(renderer.frames_rendered(), 1);

        renderer.release_surface();
        assert!(!renderer.is_acquired());
        assert_eq!(renderer.release_count(), 1);
    }

    #[test]
    fn test_failing_surface() {
        let mut renderer = SolidColorRenderer::failing_surface(16, 16);
        assert!(renderer.acquire_surface().is_err());
        assert_eq!(renderer.acquire_count(), 1);
        assert!(!renderer.is_acquired());
    }

    #[test]
    fn test_boxed_renderer() {
        let mut renderer: Box<dyn FrameRenderer> = Box::new(SolidColorRenderer::new(8, 8, [0, 0, 0, 255]));
        renderer.acquire_surface().unwrap();
        renderer.seek(42);
        assert!(renderer.render_frame(0.0).unwrap().is_valid());
    }
}
