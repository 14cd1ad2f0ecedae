//! [`tokio_util::codec`] framing of COBS delimited packets.
use crate::cobs;
use crate::error::CodecError;
use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Splits a byte stream at `0x00` delimiters and decodes each frame.
///
/// After a malformed frame the codec keeps failing until [`reset`](CobsCodec::reset) is
/// called, mirroring the terminal error of the streaming decoder.
#[derive(Debug, Default)]
pub struct CobsCodec {
    max_frame_length: Option<usize>,
    failed: bool,
}

impl CobsCodec {
    pub fn new() -> CobsCodec {
        CobsCodec::default()
    }

    /// Reject frames longer than `max` encoded bytes, delimiter included.
    pub fn with_max_frame_length(max: usize) -> CobsCodec {
        CobsCodec {
            max_frame_length: Some(max),
            failed: false,
        }
    }

    pub fn reset(&mut self) {
        self.failed = false;
    }

    fn check_length(&self, got: usize) -> Result<(), CodecError> {
        match self.max_frame_length {
            Some(max) if got > max => Err(CodecError::FrameTooLong { max, got }),
            _ => Ok(()),
        }
    }
}

impl Decoder for CobsCodec {
    type Item = Vec<u8>;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if self.failed {
            return Err(CodecError::InvalidCobs);
        }
        let Some(position) = src.iter().position(|byte| *byte == 0x00) else {
            self.check_length(src.len())?;
            return Ok(None);
        };
        if let Err(error) = self.check_length(position + 1) {
            src.advance(position + 1);
            return Err(error);
        }
        let frame = src.split_to(position + 1);
        match cobs::decode(&frame) {
            Ok(mut packets) => Ok(packets.pop()),
            Err(error) => {
                self.failed = true;
                Err(error)
            }
        }
    }
}

impl<T: AsRef<[u8]>> Encoder<T> for CobsCodec {
    type Error = CodecError;

    fn encode(&mut self, item: T, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let encoded = cobs::encode(item.as_ref());
        self.check_length(encoded.len())?;
        dst.reserve(encoded.len());
        dst.put_slice(&encoded);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn decode_frames_incrementally() {
        let mut codec = CobsCodec::new();
        let mut buffer = BytesMut::from(&[0x03, 0x11, 0x22][..]);
        assert_eq!(codec.decode(&mut buffer).unwrap(), None);
        buffer.extend_from_slice(&[0x02, 0x33, 0x00, 0x01]);
        assert_eq!(
            codec.decode(&mut buffer).unwrap(),
            Some(vec![0x11, 0x22, 0x00, 0x33])
        );
        assert_eq!(codec.decode(&mut buffer).unwrap(), None);
        assert_eq!(&buffer[..], &[0x01]);
    }

    #[test]
    fn encode_then_decode() {
        let mut codec = CobsCodec::new();
        let mut buffer = BytesMut::new();
        codec.encode(vec![0x00, 0x01], &mut buffer).unwrap();
        codec.encode(&b"tick"[..], &mut buffer).unwrap();
        assert_eq!(codec.decode(&mut buffer).unwrap(), Some(vec![0x00, 0x01]));
        assert_eq!(codec.decode(&mut buffer).unwrap(), Some(b"tick".to_vec()));
        assert!(buffer.is_empty());
    }

    #[test]
    fn errors_are_sticky_until_reset() {
        let mut codec = CobsCodec::new();
        let mut buffer = BytesMut::from(&[0x03, 0x00, 0x02, 0x01, 0x00][..]);
        assert!(matches!(
            codec.decode(&mut buffer),
            Err(CodecError::InvalidCobs)
        ));
        assert!(matches!(
            codec.decode(&mut buffer),
            Err(CodecError::InvalidCobs)
        ));
        codec.reset();
        assert_eq!(codec.decode(&mut buffer).unwrap(), Some(vec![0x01]));
    }

    #[test]
    fn frame_length_limit() {
        let mut codec = CobsCodec::with_max_frame_length(4);
        let mut buffer = BytesMut::new();
        assert!(matches!(
            codec.encode(&[1u8, 2, 3, 4][..], &mut buffer),
            Err(CodecError::FrameTooLong { max: 4, got: 6 })
        ));
        let mut buffer = BytesMut::from(&[0x05, 0x01, 0x02, 0x03, 0x04][..]);
        assert!(matches!(
            codec.decode(&mut buffer),
            Err(CodecError::FrameTooLong { max: 4, got: 5 })
        ));
    }
}
