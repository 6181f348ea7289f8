// 오디오 링 버퍼 FFI - 호스트 오디오 렌더러가 S16 stereo 샘플을 채움
// 핸들 = Arc<AudioRingBuffer>의 raw pointer

use crate::audio::AudioRingBuffer;
use crate::ffi::types::ErrorCode;
use std::ffi::c_void;
use std::sync::Arc;

/// 링 버퍼 생성
/// size_bytes: 물리 크기 (S16 stereo = 샘플당 4바이트)
#[no_mangle]
pub extern "C" fn ring_buffer_create(size_bytes: usize, out_ring: *mut *mut c_void) -> i32 {
    if out_ring.is_null() {
        return ErrorCode::NullPointer as i32;
    }
    if size_bytes == 0 {
        return ErrorCode::InvalidParam as i32;
    }

    let ring = Arc::new(AudioRingBuffer::new(size_bytes));
    unsafe {
        *out_ring = Arc::into_raw(ring) as *mut c_void;
    }
    ErrorCode::Success as i32
}

/// 쓰기 위치에 바이트 기록 (wrap 처리)
#[no_mangle]
pub extern "C" fn ring_buffer_write(ring: *mut c_void, data: *const u8, len: usize) -> i32 {
    if ring.is_null() || (data.is_null() && len > 0) {
        return ErrorCode::NullPointer as i32;
    }
    if len == 0 {
        return ErrorCode::Success as i32;
    }

    unsafe {
        let ring_ref = &*(ring as *const AudioRingBuffer);
        ring_ref.write(std::slice::from_raw_parts(data, len));
    }
    ErrorCode::Success as i32
}

/// 읽기 위치 지정 (바이트, 누적)
#[no_mangle]
pub extern "C" fn ring_buffer_set_read_position(ring: *mut c_void, position: u64) -> i32 {
    if ring.is_null() {
        return ErrorCode::NullPointer as i32;
    }
    unsafe {
        let ring_ref = &*(ring as *const AudioRingBuffer);
        ring_ref.set_read_position(position);
    }
    ErrorCode::Success as i32
}

/// 링 버퍼 해제 (진행 중인 Export가 있으면 그쪽 참조는 유지됨)
#[no_mangle]
pub extern "C" fn ring_buffer_destroy(ring: *mut c_void) -> i32 {
    if ring.is_null() {
        return ErrorCode::NullPointer as i32;
    }
    unsafe {
        let _ = Arc::from_raw(ring as *const AudioRingBuffer);
    }
    ErrorCode::Success as i32
}

/// 핸들에서 Arc 복제 (원본 소유권 유지)
///
/// # Safety
/// ring은 ring_buffer_create가 반환한, 아직 destroy되지 않은 핸들이어야 함
pub(crate) unsafe fn clone_handle(ring: *mut c_void) -> Arc<AudioRingBuffer> {
    let ring_arc = Arc::from_raw(ring as *const AudioRingBuffer);
    let ring_clone = Arc::clone(&ring_arc);
    let _ = Arc::into_raw(ring_arc); // 원본 유지
    ring_clone
}
