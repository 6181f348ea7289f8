// 오디오 모듈 - Export가 소비하는 공유 링 버퍼

pub mod ring_buffer;

pub use ring_buffer::{AudioRingBuffer, BYTES_PER_SAMPLE_FRAME};
