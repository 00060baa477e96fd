use {
    bytes::{BufMut, BytesMut},
    tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError},
};

/// Upper bound for one inbound line, tags included.
const MAX_LINE_LENGTH: usize = 16 * 1024;

/// Line framing for IRC: accepts `\n` or `\r\n` on input, always writes `\r\n`.
#[derive(Debug)]
pub struct IrcCodec {
    lines: LinesCodec,
}

impl IrcCodec {
    pub fn new() -> Self {
        Self {
            lines: LinesCodec::new_with_max_length(MAX_LINE_LENGTH),
        }
    }
}

impl Default for IrcCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for IrcCodec {
    type Error = LinesCodecError;
    type Item = String;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<String>, LinesCodecError> {
        self.lines.decode(src)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<String>, LinesCodecError> {
        self.lines.decode_eof(src)
    }
}

impl Encoder<String> for IrcCodec {
    type Error = LinesCodecError;

    fn encode(&mut self, line: String, dst: &mut BytesMut) -> Result<(), LinesCodecError> {
        let line = line.trim_end_matches(['\r', '\n']);
        dst.reserve(line.len() + 2);
        dst.put(line.as_bytes());
        dst.put_slice(b"\r\n");
        Ok(())
    }
}
