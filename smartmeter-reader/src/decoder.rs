//! Record decoders
//!
//! Two strategies turn one protocol unit into a [`RawRecord`]:
//!
//! - [`TextLineDecoder`] parses lines of the form `<code>#<value>#<unit>`,
//!   as printed by `sml_server` and similar tools:
//!
//!   ```text
//!   1-0:96.50.1*1#EMH#
//!   1-0:96.1.0*255# XX XX XX XX XX #
//!   1-0:1.8.0*255#768.2#Wh
//!   1-0:16.7.0*255#-178#W
//!   ```
//!
//! - [`StructuredDecoder`] walks the list entries of a binary SML payload.

use once_cell::sync::Lazy;
use regex::Regex;
use smartmeter_core::{MeterResult, RawRecord};
use smartmeter_sml::parse_list_entries;

static LINE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([^:#]+:[^*#]+\*\d+)#([^#]+)#(.*)$").expect("line grammar is a valid regex")
});

/// Decoder for the textual `code#value#unit` line format
pub struct TextLineDecoder;

impl TextLineDecoder {
    /// Decode one line
    ///
    /// # Returns
    ///
    /// `None` if the line does not match the grammar; a warning is logged
    /// and the caller moves on to the next line.
    pub fn decode(line: &str) -> Option<RawRecord> {
        let line = line.trim_end_matches(['\r', '\n']);
        let Some(captures) = LINE_RE.captures(line) else {
            log::warn!("Ignoring invalid line: {}", line);
            return None;
        };

        let unit = captures[3].trim();
        let unit = (!unit.is_empty()).then(|| unit.to_string());
        Some(RawRecord::text(&captures[1], &captures[2], unit))
    }
}

/// Decoder for binary SML payloads
pub struct StructuredDecoder;

impl StructuredDecoder {
    /// Decode all entries of one SML payload
    ///
    /// Entries without a six byte object name or without a scalar value are
    /// skipped.
    pub fn decode(payload: &[u8]) -> MeterResult<Vec<RawRecord>> {
        let entries = parse_list_entries(payload)?;
        Ok(entries
            .iter()
            .filter_map(|entry| {
                let record = entry.to_record();
                if record.is_none() {
                    log::debug!("Skipping SML entry {:02X?}", entry.obj_name);
                }
                record
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smartmeter_core::RawValue;
    use smartmeter_sml::SmlValue;

    #[test]
    fn test_decode_numeric_line() {
        let record = TextLineDecoder::decode("1-0:1.8.0*255#768.2#Wh").unwrap();
        assert_eq!(record.code.as_str(), "1-0:1.8.0*255");
        assert_eq!(record.value, RawValue::Text("768.2".to_string()));
        assert_eq!(record.unit.as_deref(), Some("Wh"));
    }

    #[test]
    fn test_decode_string_line() {
        let record = TextLineDecoder::decode("1-0:96.1.0*255# AB CD EF #").unwrap();
        assert_eq!(record.code.as_str(), "1-0:96.1.0*255");
        assert_eq!(record.value.as_text(), "AB CD EF");
        assert_eq!(record.unit, None);

        let record = TextLineDecoder::decode("1-0:96.50.1*1#EMH#").unwrap();
        assert_eq!(record.value.as_text(), "EMH");
    }

    #[test]
    fn test_decode_strips_carriage_return() {
        let record = TextLineDecoder::decode("1-0:16.7.0*255#-178#W\r").unwrap();
        assert_eq!(record.unit.as_deref(), Some("W"));
        assert_eq!(record.value.as_f64().unwrap(), -178.0);
    }

    #[test]
    fn test_invalid_lines() {
        for line in [
            "",
            "garbage",
            "1-0:1.8.0*255",
            "1-0:1.8.0*255##Wh",
            "1-0:1.8.0#768.2#Wh",
            "1.8.0*255#768.2#Wh",
            "1-0:1.8.0*abc#768.2#Wh",
            "1-0:1.8.0*255#768.2",
        ] {
            assert!(TextLineDecoder::decode(line).is_none(), "accepted {:?}", line);
        }
    }

    #[test]
    fn test_unit_rest_of_line() {
        let record = TextLineDecoder::decode("1-0:1.8.0*255#768.2#Wh # comment").unwrap();
        assert_eq!(record.value.as_text(), "768.2");
        assert_eq!(record.unit.as_deref(), Some("Wh # comment"));
    }

    #[test]
    fn test_structured_decode() {
        let entry = SmlValue::List(vec![
            SmlValue::OctetString(vec![1, 0, 2, 8, 0, 255]),
            SmlValue::None,
            SmlValue::None,
            SmlValue::UInt(30),
            SmlValue::Int(-1),
            SmlValue::UInt(125),
            SmlValue::None,
        ]);
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
                    SmlValue::List(vec![entry]),
                    SmlValue::None,
                    SmlValue::None,
                ]),
            ]),
            SmlValue::UInt(0),
            SmlValue::EndOfMessage,
        ]);

        let records = StructuredDecoder::decode(&message.to_bytes()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].code.as_str(), "1-0:2.8.0*255");
        assert_eq!(records[0].value.as_f64().unwrap(), 12.5);
        assert_eq!(records[0].unit.as_deref(), Some("Wh"));
    }
}
