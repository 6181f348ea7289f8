// 오디오 링 버퍼 - 재생/렌더 서브시스템이 채우고 Export가 소비하는 공유 바이트 영역
// 포맷: S16 interleaved stereo (샘플당 4바이트)
//
// 읽기는 파괴적: drain된 구간은 즉시 0으로 채워져 재소비 불가
// Export 스레드가 유일한 reader (단일 소비자 가정)

use std::sync::{Mutex, MutexGuard};

/// S16 stereo 한 샘플(양 채널)의 바이트 수
pub const BYTES_PER_SAMPLE_FRAME: usize = 4;

struct RingState {
    data: Box<[u8]>,
    /// 누적 읽기 위치 (바이트, 단조 증가 — 실제 위치는 size로 나눈 나머지)
    read: u64,
    /// 누적 쓰기 위치 (바이트)
    write: u64,
}

/// 공유 오디오 링 버퍼 (Arc로 감싸서 스레드 간 공유)
pub struct AudioRingBuffer {
    state: Mutex<RingState>,
    size: usize,
}

impl AudioRingBuffer {
    /// 바이트 크기 지정 생성 (0으로 초기화)
    pub fn new(size_bytes: usize) -> Self {
        let size = size_bytes.max(1);
        Self {
            state: Mutex::new(RingState {
                data: vec![0u8; size].into_boxed_slice(),
                read: 0,
                write: 0,
            }),
            size,
        }
    }

    /// 초 단위 용량으로 생성 (S16 stereo)
    pub fn with_duration(sample_rate: u32, seconds: f64) -> Self {
        let samples = (sample_rate as f64 * seconds).ceil() as usize;
        Self::new(samples.max(1) * BYTES_PER_SAMPLE_FRAME)
    }

    /// 물리 크기 (바이트)
    pub fn size(&self) -> usize {
        self.size
    }

    /// 누적 읽기 위치 (바이트)
    pub fn read_position(&self) -> u64 {
        self.lock().read
    }

    /// 누적 쓰기 위치 (바이트)
    pub fn write_position(&self) -> u64 {
        self.lock().write
    }

    /// 읽기 위치를 지정 (seek 시 타임라인 쪽에서 호출)
    pub fn set_read_position(&self, position: u64) {
        self.lock().read = position;
    }

    /// 쓰기 위치에 바이트 기록 (producer 측, wrap 처리)
    /// 아직 읽지 않은 구간을 덮어쓰는지는 검사하지 않음 (위치 관리는 producer 책임)
    pub fn write(&self, bytes: &[u8]) {
        let mut state = self.lock();
        let start = (state.write % self.size as u64) as usize;
        copy_wrapping(&mut state.data, start, bytes);
        state.write += bytes.len() as u64;
    }

    /// S16 interleaved 샘플 기록
    pub fn write_samples(&self, samples: &[i16]) {
        let mut bytes = Vec::with_capacity(samples.len() * 2);
        for sample in samples {
            bytes.extend_from_slice(&sample.to_ne_bytes());
        }
        self.write(&bytes);
    }

    /// 읽기 위치에서 dst.len() 바이트를 꺼내고 해당 구간을 0으로 채움
    /// 버퍼 끝을 넘으면 tail → head 순서로 읽음
    pub fn drain(&self, dst: &mut [u8]) {
        let mut state = self.lock();
        let mut offset = (state.read % self.size as u64) as usize;
        let mut filled = 0;

        while filled < dst.len() {
            let copylen = (dst.len() - filled).min(self.size - offset);
            dst[filled..filled + copylen].copy_from_slice(&state.data[offset..offset + copylen]);
            state.data[offset..offset + copylen].fill(0);
            filled += copylen;
            offset = (offset + copylen) % self.size;
        }

        state.read += dst.len() as u64;
    }

    fn lock(&self) -> MutexGuard<'_, RingState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("[AUDIO] ring buffer mutex poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}

/// start 위치부터 src를 wrap하면서 복사
fn copy_wrapping(data: &mut [u8], start: usize, src: &[u8]) {
    let size = data.len();
    let mut offset = start;
    let mut written = 0;
    while written < src.len() {
        let copylen = (src.len() - written).min(size - offset);
        data[offset..offset + copylen].copy_from_slice(&src[written..written + copylen]);
        written += copylen;
        offset = (offset + copylen) % size;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_drain_reads_and_zero_fills() {
        let ring = AudioRingBuffer::new(16);
        ring.write(&[1, 2, 3, 4, 5, 6, 7, 8]);

        let mut out = [0u8; 4];
        ring.drain(&mut out);
        assert_eq!(out, [1, 2, 3, 4]);
        assert_eq!(ring.read_position(), 4);

        // 같은 구간을 다시 읽으면 0 (재소비 불가)
        ring.set_read_position(0);
        ring.drain(&mut out);
        assert_eq!(out, [0, 0, 0, 0]);
    }

    #[test]
    fn test_drain_wraps_tail_then_head() {
        let ring = AudioRingBuffer::new(8);
        ring.write(&[10, 11, 12, 13, 14, 15, 16, 17]);

        // 읽기 위치를 끝에서 3바이트 앞으로
        ring.set_read_position(5);
        let mut out = [0u8; 6];
        ring.drain(&mut out);

        // tail(5..8) → head(0..3)
        assert_eq!(out, [15, 16, 17, 10, 11, 12]);
        assert_eq!(ring.read_position(), 11);

        // 두 구간 모두 0으로 채워짐, 중간(3..5)은 유지
        ring.set_read_position(0);
        let mut all = [0u8; 8];
        ring.drain(&mut all);
        assert_eq!(all, [0, 0, 0, 13, 14, 0, 0, 0]);
    }

    #[test]
    fn test_write_wraps() {
        let ring = AudioRingBuffer::new(4);
        ring.write(&[1, 2, 3]);
        ring.write(&[4, 5, 6]);
        assert_eq!(ring.write_position(), 6);

        // 물리 버퍼: [5, 6, 3, 4]
        let mut out = [0u8; 4];
        ring.drain(&mut out);
        assert_eq!(out, [5, 6, 3, 4]);
    }

    #[test]
    fn test_drain_larger_than_buffer() {
        let ring = AudioRingBuffer::new(4);
        ring.write(&[1, 2, 3, 4]);
        let mut out = [9u8; 10];
        ring.drain(&mut out);
        // 첫 바퀴만 데이터, 이후 0
        assert_eq!(out, [1, 2, 3, 4, 0, 0, 0, 0, 0, 0]);
        assert_eq!(ring.read_position(), 10);
    }

    #[test]
    fn test_write_samples_native_endian() {
        let ring = AudioRingBuffer::new(8);
        ring.write_samples(&[1, -1]);
        let mut out = [0u8; 4];
        ring.drain(&mut out);
        assert_eq!(i16::from_ne_bytes([out[0], out[1]]), 1);
        assert_eq!(i16::from_ne_bytes([out[2], out[3]]), -1);
    }

    #[test]
    fn test_with_duration_capacity() {
        let ring = AudioRingBuffer::with_duration(48000, 1.0);
        assert_eq!(ring.size(), 48000 * BYTES_PER_SAMPLE_FRAME);
    }

    #[test]
    fn test_concurrent_producer_consumer() {
        let ring = Arc::new(AudioRingBuffer::new(4096));
        let producer = {
            let ring = Arc::clone(&ring);
            std::thread::spawn(move || {
                for _ in 0..100 {
                    ring.write(&[7u8; 64]);
                }
            })
        };
        producer.join().unwrap();

        let mut total = 0usize;
        let mut out = [0u8; 64];
        for _ in 0..64 {
            ring.drain(&mut out);
            total += out.iter().filter(|&&b| b == 7).count();
        }
        // 100*64 = 6400바이트 기록 (4096 wrap) → 4096바이트 모두 7
        assert_eq!(total, 4096);
    }
}
