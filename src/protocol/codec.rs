//! `tokio_util::codec` framing for the fixed-size protocol.

use bytes::{Buf, BytesMut};
use std::io;
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

use super::{decode, Command, PROTOCOL_MSG_SIZE};
use crate::color::hex_bytes;
use crate::error::{ConnectionError, DecodeError};
use crate::grid::GridLayout;

/// Splits a byte stream into frames and decodes each one.
///
/// A frame that fails to decode is yielded as `Some(Err(..))` rather than as
/// a stream error, so a bad frame never ends the connection.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameCodec {
    layout: GridLayout,
}

impl FrameCodec {
    pub fn new(layout: GridLayout) -> Self {
        FrameCodec { layout }
    }
}

impl Decoder for FrameCodec {
    type Item = Result<Command, DecodeError>;
    type Error = ConnectionError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < PROTOCOL_MSG_SIZE {
            src.reserve(PROTOCOL_MSG_SIZE - src.len());
            return Ok(None);
        }
        let frame = &src[..PROTOCOL_MSG_SIZE];
        trace!("Frame: {}", hex_bytes(frame));
        let result = decode(frame, &self.layout);
        src.advance(PROTOCOL_MSG_SIZE);
        Ok(Some(result))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(item) = self.decode(src)? {
            return Ok(Some(item));
        }
        if src.is_empty() {
            return Ok(None);
        }
        // Peer hung up mid-frame
        let received = src.len();
        trace!("Partial frame at EOF: {}", hex_bytes(src));
        src.clear();
        Ok(Some(Err(DecodeError::IncompleteFrame {
            received,
            expected: PROTOCOL_MSG_SIZE,
        })))
    }
}

impl Encoder<Command> for FrameCodec {
    type Error = io::Error;

    fn encode(&mut self, item: Command, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.extend_from_slice(&item.encode());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::Rgb;

    #[test]
    fn test_buffers_until_full_frame() {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::from(&[16u8, 3, 255][..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 3);

        buf.extend_from_slice(&[0, 0, 0, 0]);
        let item = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(
            item,
            Ok(Command::SetStripe {
                index: 3,
                color: Rgb::RED
            })
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn test_bad_frame_does_not_poison_stream() {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&[99, 0, 0, 0, 0, 0, 0]);
        buf.extend_from_slice(&[22, 0, 0, 0, 0, 0, 0]);

        let first = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(first, Err(DecodeError::UnknownOpcode(99)));
        let second = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(second, Ok(Command::FadeAllToWhite));
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_trailing_bytes_at_eof() {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::from(&[21u8, 0, 0, 0, 0, 0, 0, 16, 1][..]);

        let first = codec.decode_eof(&mut buf).unwrap().unwrap();
        assert_eq!(first, Ok(Command::FadeAllToBlack));
        let second = codec.decode_eof(&mut buf).unwrap().unwrap();
        assert_eq!(
            second,
            Err(DecodeError::IncompleteFrame {
                received: 2,
                expected: PROTOCOL_MSG_SIZE
            })
        );
        assert!(codec.decode_eof(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_encoder_writes_wire_frame() {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::new();
        let command = Command::SetRow {
            index: 0,
            color: Rgb::new(1, 2, 3),
        };
        codec.encode(command, &mut buf).unwrap();
        codec.encode(Command::Demo, &mut buf).unwrap();
        assert_eq!(&buf[..], &[12, 0, 1, 2, 3, 0, 0, 254, 0, 0, 0, 0, 0, 0]);
    }
}
