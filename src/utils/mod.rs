// 공용 유틸리티 - 로깅 초기화, 타임스탬프/진행률 계산

use ffmpeg_next as ffmpeg;
use std::sync::Once;

static LOGGING: Once = Once::new();

/// 로거 초기화 (RUST_LOG 미설정 시 info)
/// FFmpeg 자체 로그는 경고 이상만 출력. 두 번째 호출부터는 아무것도 안 함
pub fn init_logging() {
    LOGGING.call_once(|| {
        let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
            .format_timestamp_millis()
            .try_init();
        ffmpeg::util::log::set_level(ffmpeg::util::log::Level::Warning);
    });
}

/// 경과 시간(초) → 스트림 time_base 기준 PTS
/// pts = round(elapsed / time_base)
pub fn pts_for_elapsed(elapsed_secs: f64, time_base: ffmpeg::Rational) -> i64 {
    let tb = f64::from(time_base);
    if tb <= 0.0 {
        return 0;
    }
    (elapsed_secs / tb).round() as i64
}

/// 프레임레이트(f64) → 유리수 (소수 fps는 1/1000 단위)
/// 29.97 → 2997/100, 30 → 30/1
pub fn frame_rate_rational(fps: f64) -> ffmpeg::Rational {
    ffmpeg::Rational::new((fps * 1000.0).round() as i32, 1000).reduce()
}

/// 진행률 (0~100) — (frame - start) / (end - start)
pub fn progress_percent(frame: i64, start: i64, end: i64) -> u32 {
    if end <= start {
        return 0;
    }
    let fraction = (frame - start) as f64 / (end - start) as f64;
    (fraction * 100.0).clamp(0.0, 100.0) as u32
}

/// FFmpeg 에러 코드 → 사람이 읽을 수 있는 문자열 ("message (code)")
pub fn describe_av_error(code: i32) -> String {
    format!("{} ({})", ffmpeg::Error::from(code), code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pts_for_elapsed_30fps() {
        let tb = ffmpeg::Rational::new(1, 30);
        assert_eq!(pts_for_elapsed(0.0, tb), 0);
        assert_eq!(pts_for_elapsed(1.0, tb), 30);
        assert_eq!(pts_for_elapsed(1.0 / 30.0, tb), 1);
        // 반올림: 29.6프레임 → 30
        assert_eq!(pts_for_elapsed(29.6 / 30.0, tb), 30);
    }

    #[test]
    fn test_pts_for_elapsed_ntsc() {
        let tb = ffmpeg::Rational::new(1001, 30000);
        // 1초 = 29.97 tick → 30
        assert_eq!(pts_for_elapsed(1.0, tb), 30);
        assert_eq!(pts_for_elapsed(10.01, tb), 300);
    }

    #[test]
    fn test_pts_monotonic_over_frames() {
        let tb = ffmpeg::Rational::new(1, 25);
        let mut last = -1;
        for frame in 0..500 {
            let pts = pts_for_elapsed(frame as f64 / 25.0, tb);
            assert!(pts > last);
            last = pts;
        }
    }

    #[test]
    fn test_frame_rate_rational() {
        assert_eq!(frame_rate_rational(30.0), ffmpeg::Rational::new(30, 1));
        assert_eq!(frame_rate_rational(29.97), ffmpeg::Rational::new(2997, 100));
        assert_eq!(frame_rate_rational(23.976), ffmpeg::Rational::new(2997, 125));
    }

    #[test]
    fn test_progress_percent() {
        assert_eq!(progress_percent(0, 0, 10), 0);
        assert_eq!(progress_percent(5, 0, 10), 50);
        assert_eq!(progress_percent(9, 0, 10), 90);
        assert_eq!(progress_percent(150, 100, 200), 50);
        assert_eq!(progress_percent(300, 100, 200), 100);
        assert_eq!(progress_percent(5, 10, 10), 0);
    }

    #[test]
    fn test_init_logging_twice() {
        init_logging();
        init_logging();
        if std::env::var("RUST_LOG").is_err() {
            assert!(log::max_level() >= log::LevelFilter::Info);
            assert!(log::log_enabled!(target: "export_engine", log::Level::Info));
        }
    }
}
