// 인코더 send/receive 프로토콜 - 비디오/오디오 파이프라인 공용
// send(frame | EOF) → receive 루프 → 패킷을 컨테이너로 전달

use crate::error::{ExportError, MediaKind, Result};
use ffmpeg_next as ffmpeg;
use ffmpeg::frame;

/// 스트림 기술자 (파이프라인 소유, 컨테이너는 패킷 태깅에 참조만)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamDescriptor {
    /// 컨테이너가 할당한 스트림 인덱스
    pub index: usize,
    /// 인코더 time_base (1/fps 또는 1/sample_rate)
    pub time_base: ffmpeg::Rational,
    pub kind: MediaKind,
}

/// send/receive 한 번의 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeStatus {
    /// 인코더가 입력을 받을 수 없는 상태 (다음 호출에서 재시도)
    NotReady,
    /// 패킷 기록 후 추가 입력 대기
    NeedsInput { packets: usize },
    /// 스트림 종료 (flush 완료)
    EndOfStream { packets: usize },
}

impl EncodeStatus {
    /// 이번 호출에서 기록된 패킷 수
    pub fn packets(&self) -> usize {
        match self {
            EncodeStatus::NotReady => 0,
            EncodeStatus::NeedsInput { packets } | EncodeStatus::EndOfStream { packets } => *packets,
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, EncodeStatus::EndOfStream { .. })
    }
}

/// 패킷을 생산하는 인코더 (libavcodec 인코더 / 테스트용 가짜 인코더)
pub trait PacketEncoder {
    /// 프레임 전송, None이면 EOF
    fn send(&mut self, frame: Option<&frame::Frame>) -> std::result::Result<(), ffmpeg::Error>;
    fn receive(&mut self, packet: &mut ffmpeg::Packet) -> std::result::Result<(), ffmpeg::Error>;
}

impl PacketEncoder for ffmpeg::encoder::Encoder {
    fn send(&mut self, frame: Option<&frame::Frame>) -> std::result::Result<(), ffmpeg::Error> {
        match frame {
            Some(frame) => self.send_frame(frame),
            None => self.send_eof(),
        }
    }

    fn receive(&mut self, packet: &mut ffmpeg::Packet) -> std::result::Result<(), ffmpeg::Error> {
        self.receive_packet(packet)
    }
}

/// 인코딩된 패킷을 받는 쪽 (컨테이너 라이터)
/// 기록 실패는 세션을 중단시키지 않음 — 구현체가 로그만 남김
pub trait PacketSink {
    fn write_packet(&mut self, packet: &mut ffmpeg::Packet, stream: &StreamDescriptor);
}

fn is_again(err: &ffmpeg::Error) -> bool {
    matches!(err, ffmpeg::Error::Other { errno } if *errno == libc::EAGAIN)
}

/// 프레임 하나(또는 EOF)를 인코더에 보내고 나온 패킷을 모두 sink에 기록
pub fn encode<E, S>(
    encoder: &mut E,
    frame: Option<&frame::Frame>,
    stream: &StreamDescriptor,
    sink: &mut S,
) -> Result<EncodeStatus>
where
    E: PacketEncoder + ?Sized,
    S: PacketSink + ?Sized,
{
    match encoder.send(frame) {
        Ok(()) => {}
        Err(e) if is_again(&e) => {
            log::trace!("[ENCODE] {} encoder not ready, retry next call", stream.kind);
            return Ok(EncodeStatus::NotReady);
        }
        // 이미 EOF를 보낸 인코더에 다시 EOF → 남은 패킷만 수신
        Err(ffmpeg::Error::Eof) if frame.is_none() => {}
        Err(e) => {
            log::error!("[ENCODE] failed to send frame to {} encoder: {}", stream.kind, e);
            return Err(ExportError::encode(
                stream.kind,
                format!("failed to send frame to encoder ({})", e),
            ));
        }
    }

    let mut packets = 0;
    let mut packet = ffmpeg::Packet::empty();
    loop {
        match encoder.receive(&mut packet) {
            Ok(()) => {
                packet.set_stream(stream.index);
                sink.write_packet(&mut packet, stream);
                packets += 1;
            }
            Err(e) if is_again(&e) => return Ok(EncodeStatus::NeedsInput { packets }),
            Err(ffmpeg::Error::Eof) => return Ok(EncodeStatus::EndOfStream { packets }),
            Err(e) => {
                log::error!("[ENCODE] failed to receive packet from {} encoder: {}", stream.kind, e);
                return Err(ExportError::encode(
                    stream.kind,
                    format!("failed to receive packet from encoder ({})", e),
                ));
            }
        }
    }
}
