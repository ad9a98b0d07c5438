//! Record sources
//!
//! A [`RecordSource`] combines a transport with a decoding strategy and
//! yields one decoded protocol unit at a time. Which strategy is used is
//! decided once at startup through [`SourceFormat`]; the supervisor only
//! sees the trait.

use crate::decoder::{StructuredDecoder, TextLineDecoder};
use async_trait::async_trait;
use bytes::BytesMut;
use smartmeter_core::{MeterResult, RawRecord};
use smartmeter_sml::SmlFrameDecoder;
use smartmeter_transport::TransportLayer;
use std::collections::VecDeque;

const READ_CHUNK_SIZE: usize = 1024;

/// Longest line accepted before the buffer is discarded
pub const MAX_LINE_LENGTH: usize = 4096;

/// Result of decoding one protocol unit
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedUnit {
    /// The unit carried a record
    Record(RawRecord),
    /// The unit was malformed and has been discarded
    Malformed,
}

/// Source of decoded protocol units
#[async_trait]
pub trait RecordSource: Send {
    /// Open the underlying input
    async fn open(&mut self) -> MeterResult<()>;

    /// Read the next protocol unit
    ///
    /// # Returns
    ///
    /// - `Ok(Some(unit))` for each unit read
    /// - `Ok(None)` at end of stream
    /// - `Err(_)` on read failure; the session is over
    async fn next_unit(&mut self) -> MeterResult<Option<DecodedUnit>>;

    /// Close the underlying input; errors are only logged
    async fn close(&mut self);

    /// Human readable description, used in logs
    fn describe(&self) -> String;
}

/// Decoding strategy of the input stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum SourceFormat {
    /// Newline separated `code#value#unit` lines
    #[default]
    Text,
    /// Binary SML transmissions
    Sml,
}

/// Build the record source for a transport and format
///
/// `verify_crc` only applies to SML transmissions.
pub fn build_source(
    format: SourceFormat,
    transport: Box<dyn TransportLayer>,
    verify_crc: bool,
) -> Box<dyn RecordSource> {
    match format {
        SourceFormat::Text => Box::new(TextLineSource::new(transport)),
        SourceFormat::Sml => Box::new(StructuredEntrySource::with_frame_decoder(
            transport,
            SmlFrameDecoder::new().with_crc_check(verify_crc),
        )),
    }
}

/// Line oriented source using [`TextLineDecoder`]
pub struct TextLineSource {
    transport: Box<dyn TransportLayer>,
    buffer: BytesMut,
    /// Skipping the tail of an overlong line up to its line break
    discarding: bool,
    eof: bool,
}

impl TextLineSource {
    /// Create a new line source reading from `transport`
    pub fn new(transport: Box<dyn TransportLayer>) -> Self {
        Self {
            transport,
            buffer: BytesMut::with_capacity(READ_CHUNK_SIZE),
            discarding: false,
            eof: false,
        }
    }

    /// Decode one line; blank lines yield `None`
    fn decode_line(line: &[u8]) -> Option<DecodedUnit> {
        let text = String::from_utf8_lossy(line);
        if text.trim().is_empty() {
            return None;
        }
        Some(match TextLineDecoder::decode(&text) {
            Some(record) => DecodedUnit::Record(record),
            None => DecodedUnit::Malformed,
        })
    }
}

#[async_trait]
impl RecordSource for TextLineSource {
    async fn open(&mut self) -> MeterResult<()> {
        self.buffer.clear();
        self.discarding = false;
        self.eof = false;
        self.transport.open().await
    }

    async fn next_unit(&mut self) -> MeterResult<Option<DecodedUnit>> {
        loop {
            let newline = self.buffer.iter().position(|b| *b == b'\n');

            if self.discarding {
                match newline {
                    Some(pos) => {
                        let _ = self.buffer.split_to(pos + 1);
                        self.discarding = false;
                        continue;
                    }
                    None => self.buffer.clear(),
                }
            } else if let Some(pos) = newline {
                let line = self.buffer.split_to(pos + 1);
                if pos > MAX_LINE_LENGTH {
                    log::warn!("Discarding line of {} bytes", pos);
                    return Ok(Some(DecodedUnit::Malformed));
                }
                match Self::decode_line(&line[..pos]) {
                    Some(unit) => return Ok(Some(unit)),
                    None => continue,
                }
            } else if self.buffer.len() > MAX_LINE_LENGTH {
                log::warn!("Discarding {} bytes without line break", self.buffer.len());
                self.buffer.clear();
                self.discarding = true;
                return Ok(Some(DecodedUnit::Malformed));
            }

            if self.eof {
                if self.discarding {
                    return Ok(None);
                }
                // A last line without terminating newline
                let rest = self.buffer.split();
                return Ok(Self::decode_line(&rest));
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let n = self.transport.read(&mut chunk).await?;
            if n == 0 {
                self.eof = true;
            } else {
                self.buffer.extend_from_slice(&chunk[..n]);
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.transport.close().await {
            log::debug!("Error closing {}: {}", self.transport.describe(), e);
        }
    }

    fn describe(&self) -> String {
        format!("{} (text)", self.transport.describe())
    }
}

/// Binary SML source using [`StructuredDecoder`]
pub struct StructuredEntrySource {
    transport: Box<dyn TransportLayer>,
    frames: SmlFrameDecoder,
    pending: VecDeque<RawRecord>,
    eof: bool,
}

impl StructuredEntrySource {
    /// Create a new SML source reading from `transport`
    pub fn new(transport: Box<dyn TransportLayer>) -> Self {
        Self::with_frame_decoder(transport, SmlFrameDecoder::new())
    }

    /// Create a new SML source with a preconfigured frame decoder
    pub fn with_frame_decoder(transport: Box<dyn TransportLayer>, frames: SmlFrameDecoder) -> Self {
        Self {
            transport,
            frames,
            pending: VecDeque::new(),
            eof: false,
        }
    }
}

#[async_trait]
impl RecordSource for StructuredEntrySource {
    async fn open(&mut self) -> MeterResult<()> {
        self.frames.reset();
        self.pending.clear();
        self.eof = false;
        self.transport.open().await
    }

    async fn next_unit(&mut self) -> MeterResult<Option<DecodedUnit>> {
        loop {
            if let Some(record) = self.pending.pop_front() {
                return Ok(Some(DecodedUnit::Record(record)));
            }

            match self.frames.next_frame() {
                Some(Ok(payload)) => match StructuredDecoder::decode(&payload) {
                    Ok(records) => {
                        self.pending.extend(records);
                        continue;
                    }
                    Err(e) => {
                        log::warn!("Ignoring undecodable SML transmission: {}", e);
                        return Ok(Some(DecodedUnit::Malformed));
                    }
                },
                Some(Err(e)) => {
                    log::warn!("Ignoring invalid SML transmission: {}", e);
                    return Ok(Some(DecodedUnit::Malformed));
                }
                None => {}
            }

            if self.eof {
                return Ok(None);
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let n = self.transport.read(&mut chunk).await?;
            if n == 0 {
                self.eof = true;
            } else {
                self.frames.push(&chunk[..n]);
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.transport.close().await {
            log::debug!("Error closing {}: {}", self.transport.describe(), e);
        }
    }

    fn describe(&self) -> String {
        format!("{} (sml)", self.transport.describe())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use smartmeter_core::MeterError;
    use smartmeter_transport::StreamAccessor;

    /// Transport serving a fixed list of chunks per open
    pub(crate) struct ChunkTransport {
        pub(crate) chunks: VecDeque<Vec<u8>>,
        pub(crate) closed: bool,
    }

    impl ChunkTransport {
        pub(crate) fn new(chunks: Vec<&[u8]>) -> Self {
            Self {
                chunks: chunks.into_iter().map(|c| c.to_vec()).collect(),
                closed: true,
            }
        }
    }

    #[async_trait]
    impl StreamAccessor for ChunkTransport {
        async fn read(&mut self, buf: &mut [u8]) -> MeterResult<usize> {
            match self.chunks.pop_front() {
                Some(mut chunk) => {
                    let n = chunk.len().min(buf.len());
                    buf[..n].copy_from_slice(&chunk[..n]);
                    if n < chunk.len() {
                        self.chunks.push_front(chunk.split_off(n));
                    }
                    Ok(n)
                }
                None => {
                    self.closed = true;
                    Ok(0)
                }
            }
        }

        fn is_closed(&self) -> bool {
            self.closed
        }

        async fn close(&mut self) -> MeterResult<()> {
            self.closed = true;
            Ok(())
        }
    }

    #[async_trait]
    impl TransportLayer for ChunkTransport {
        async fn open(&mut self) -> MeterResult<()> {
            if !self.closed {
                return Err(MeterError::Protocol("already open".to_string()));
            }
            self.closed = false;
            Ok(())
        }

        fn describe(&self) -> String {
            "chunks".to_string()
        }
    }

    async fn collect(source: &mut dyn RecordSource) -> Vec<DecodedUnit> {
        source.open().await.unwrap();
        let mut units = Vec::new();
        while let Some(unit) = source.next_unit().await.unwrap() {
            units.push(unit);
        }
        source.close().await;
        units
    }

    #[tokio::test]
    async fn test_text_source_splits_lines() {
        let transport = ChunkTransport::new(vec![
            &b"1-0:1.8.0*255#768"[..],
            &b".2#Wh\n\n1-0:96.1.0*255# AB CD #\r\nnot a record\n"[..],
            &b"1-0:16.7.0*255#-178#W"[..],
        ]);
        let mut source = TextLineSource::new(Box::new(transport));
        let units = collect(&mut source).await;

        assert_eq!(units.len(), 4);
        assert_eq!(
            units[0],
            DecodedUnit::Record(RawRecord::text("1-0:1.8.0*255", "768.2", Some("Wh".to_string())))
        );
        assert!(matches!(&units[1], DecodedUnit::Record(r) if r.value.as_text() == "AB CD"));
        assert_eq!(units[2], DecodedUnit::Malformed);
        assert!(matches!(&units[3], DecodedUnit::Record(r) if r.code.as_str() == "1-0:16.7.0*255"));
    }

    #[tokio::test]
    async fn test_text_source_discards_overlong_line() {
        let long = vec![b'x'; MAX_LINE_LENGTH + 10];
        let transport = ChunkTransport::new(vec![&long[..1000], &long[1000..], &b"\n1-0:1.8.0*255#1#Wh\n"[..]]);
        let mut source = TextLineSource::new(Box::new(transport));
        let units = collect(&mut source).await;

        assert_eq!(units.len(), 2);
        assert_eq!(units[0], DecodedUnit::Malformed);
        assert!(matches!(&units[1], DecodedUnit::Record(r) if r.code.as_str() == "1-0:1.8.0*255"));
    }

    #[tokio::test]
    async fn test_text_source_drops_tail_of_overlong_line() {
        // The tail of the oversized line looks like a record and must not surface
        let long = vec![b'x'; MAX_LINE_LENGTH + 100];
        let transport = ChunkTransport::new(vec![
            &long[..],
            &b"1-0:2.8.0*255#5#Wh\n"[..],
            &b"1-0:1.8.0*255#1#Wh\n"[..],
        ]);
        let mut source = TextLineSource::new(Box::new(transport));
        let units = collect(&mut source).await;

        assert_eq!(
            units,
            vec![
                DecodedUnit::Malformed,
                DecodedUnit::Record(RawRecord::text("1-0:1.8.0*255", "1", Some("Wh".to_string()))),
            ]
        );
    }

    #[tokio::test]
    async fn test_text_source_rejects_complete_overlong_line() {
        let mut line = vec![b'x'; MAX_LINE_LENGTH];
        line.extend_from_slice(b"1-0:2.8.0*255#5#Wh\n1-0:1.8.0*255#1#Wh\n");
        let transport = ChunkTransport::new(vec![&line[..]]);
        let mut source = TextLineSource::new(Box::new(transport));
        let units = collect(&mut source).await;

        assert_eq!(units.len(), 2);
        assert_eq!(units[0], DecodedUnit::Malformed);
        assert!(matches!(&units[1], DecodedUnit::Record(r) if r.code.as_str() == "1-0:1.8.0*255"));
    }

    #[tokio::test]
    async fn test_sml_source_yields_entries() {
        use smartmeter_sml::{SmlValue, frame};

        let entry = |obis: [u8; 6], value: SmlValue| {
            SmlValue::List(vec![
                SmlValue::OctetString(obis.to_vec()),
                SmlValue::None,
                SmlValue::None,
                SmlValue::UInt(30),
                SmlValue::Int(0),
                value,
                SmlValue::None,
            ])
        };
        let message = SmlValue::List(vec![
            SmlValue::OctetString(vec![0x01]),
            SmlValue::UInt(0),
            SmlValue::UInt(0),
            SmlValue::List(vec![
                SmlValue::UInt(0x0701),
                SmlValue::List(vec![
                    SmlValue::None,
                    SmlValue::None,
                    SmlValue::None,
                    SmlValue::None,
                    SmlValue::List(vec![
                        entry([1, 0, 1, 8, 0, 255], SmlValue::UInt(1000)),
                        entry([1, 0, 2, 8, 0, 255], SmlValue::UInt(2000)),
                    ]),
                    SmlValue::None,
                    SmlValue::None,
                ]),
            ]),
            SmlValue::UInt(0),
            SmlValue::EndOfMessage,
        ]);
        let good = frame::encode(&message.to_bytes());
        let mut bad = good.clone();
        let last = bad.len() - 1;
        bad[last] ^= 0x55;

        let transport = ChunkTransport::new(vec![&bad, &good[..7], &good[7..]]);
        let mut source = StructuredEntrySource::new(Box::new(transport));
        let units = collect(&mut source).await;

        assert_eq!(units.len(), 3);
        assert_eq!(units[0], DecodedUnit::Malformed);
        assert!(matches!(&units[1], DecodedUnit::Record(r) if r.code.as_str() == "1-0:1.8.0*255"));
        assert!(matches!(&units[2], DecodedUnit::Record(r) if r.value.as_f64().unwrap() == 2000.0));
    }

    #[tokio::test]
    async fn test_sml_source_survives_oversized_length() {
        use smartmeter_sml::{SmlValue, frame};

        let mut hostile = vec![0x71, 0x8F];
        hostile.extend_from_slice(&[0x8F; 14]);
        hostile.push(0x0F);
        let bad = frame::encode(&hostile);

        let message = SmlValue::List(vec![
            SmlValue::OctetString(vec![0x02]),
            SmlValue::UInt(0),
            SmlValue::UInt(0),
            SmlValue::List(vec![
                SmlValue::UInt(0x0701),
                SmlValue::List(vec![
                    SmlValue::None,
                    SmlValue::None,
                    SmlValue::None,
                    SmlValue::None,
                    SmlValue::List(vec![SmlValue::List(vec![
                        SmlValue::OctetString(vec![1, 0, 16, 7, 0, 255]),
                        SmlValue::None,
                        SmlValue::None,
                        SmlValue::UInt(27),
                        SmlValue::Int(0),
                        SmlValue::Int(-178),
                        SmlValue::None,
                    ])]),
                    SmlValue::None,
                    SmlValue::None,
                ]),
            ]),
            SmlValue::UInt(0),
            SmlValue::EndOfMessage,
        ]);
        let good = frame::encode(&message.to_bytes());

        let transport = ChunkTransport::new(vec![&bad, &good]);
        let mut source = build_source(SourceFormat::Sml, Box::new(transport), true);
        let units = collect(source.as_mut()).await;

        assert_eq!(units.len(), 2);
        assert_eq!(units[0], DecodedUnit::Malformed);
        assert!(matches!(&units[1], DecodedUnit::Record(r) if r.value.as_f64().unwrap() == -178.0));
    }

    #[tokio::test]
    async fn test_build_source_without_crc_check() {
        let transport = ChunkTransport::new(vec![&b"1-0:1.8.0*255#1#Wh\n"[..]]);
        let mut source = build_source(SourceFormat::Text, Box::new(transport), false);
        assert_eq!(source.describe(), "chunks (text)");
        assert_eq!(collect(source.as_mut()).await.len(), 1);
    }

    #[tokio::test]
    async fn test_sml_source_skips_crc_check_when_disabled() {
        let mut payload = smartmeter_sml::SmlValue::EndOfMessage.to_bytes();
        payload.extend_from_slice(&[0x00, 0x00, 0x00]);
        let mut data = smartmeter_sml::frame::encode(&payload);
        let last = data.len() - 1;
        data[last] ^= 0x55;

        let strict = ChunkTransport::new(vec![&data[..]]);
        let mut source = build_source(SourceFormat::Sml, Box::new(strict), true);
        assert_eq!(collect(source.as_mut()).await, vec![DecodedUnit::Malformed]);

        let lenient = ChunkTransport::new(vec![&data[..]]);
        let mut source = build_source(SourceFormat::Sml, Box::new(lenient), false);
        assert!(collect(source.as_mut()).await.is_empty());
    }
}
