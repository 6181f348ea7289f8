// FFI 공용 타입 - C 호출자에게 돌려주는 에러 코드

use crate::error::ExportError;
use std::ffi::{c_char, CStr, CString};

/// FFI 함수 반환 코드
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Success = 0,
    NullPointer = 1,
    InvalidParam = 2,
    Ffmpeg = 3,
    Cancelled = 4,
    Unknown = 99,
}

impl From<&ExportError> for ErrorCode {
    fn from(error: &ExportError) -> Self {
        match error {
            ExportError::Config(_) => ErrorCode::InvalidParam,
            ExportError::Cancelled => ErrorCode::Cancelled,
            ExportError::SurfaceAcquisition(_) | ExportError::Render(_) => ErrorCode::Unknown,
            _ => ErrorCode::Ffmpeg,
        }
    }
}

/// nullable C 문자열 → Option<String> (UTF-8 아니면 Err)
///
/// # Safety
/// ptr은 null이거나 NUL 종료 문자열이어야 함
pub(crate) unsafe fn optional_str(ptr: *const c_char) -> Result<Option<String>, ErrorCode> {
    if ptr.is_null() {
        return Ok(None);
    }
    CStr::from_ptr(ptr)
        .to_str()
        .map(|s| Some(s.to_string()))
        .map_err(|_| ErrorCode::InvalidParam)
}

/// 문자열 해제 (exporter_get_error로 할당된 것)
#[no_mangle]
pub extern "C" fn string_free(ptr: *mut c_char) {
    if !ptr.is_null() {
        unsafe {
            let _ = CString::from_raw(ptr);
        }
    }
}

/// 로거 초기화 (호스트에서 1회 호출, RUST_LOG로 레벨 조정)
#[no_mangle]
pub extern "C" fn engine_init_logging() -> i32 {
    crate::utils::init_logging();
    log::info!("[EXPORT_FFI] 로깅 초기화 완료");
    ErrorCode::Success as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_mapping() {
        assert_eq!(ErrorCode::from(&ExportError::config("x")), ErrorCode::InvalidParam);
        assert_eq!(ErrorCode::from(&ExportError::Cancelled), ErrorCode::Cancelled);
        assert_eq!(ErrorCode::from(&ExportError::HeaderWrite("x".into())), ErrorCode::Ffmpeg);
    }

    #[test]
    fn test_optional_str() {
        let s = CString::new("libx264").unwrap();
        assert_eq!(unsafe { optional_str(s.as_ptr()) }, Ok(Some("libx264".to_string())));
        assert_eq!(unsafe { optional_str(std::ptr::null()) }, Ok(None));
    }

    #[test]
    fn test_engine_init_logging() {
        assert_eq!(engine_init_logging(), ErrorCode::Success as i32);
        assert_eq!(engine_init_logging(), ErrorCode::Success as i32);
        if std::env::var("RUST_LOG").is_err() {
            assert!(log::max_level() >= log::LevelFilter::Info);
        }
    }
}
