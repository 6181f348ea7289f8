// 렌더링 인터페이스 모듈

pub mod renderer;

pub use renderer::{FrameBuffer, FrameRenderer, SolidColorRenderer};
