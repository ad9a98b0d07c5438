//! SML message decoding
//!
//! Meters push one transmission every few seconds containing an
//! `OpenResponse`, a `GetListResponse` and a `CloseResponse`. Only the list
//! entries of the `GetListResponse` carry readings:
//!
//! ```text
//! SML_Message     ::= list(6) { transactionId, groupNo, abortOnError,
//!                               messageBody, crc16, endOfSmlMsg }
//! messageBody     ::= list(2) { tag, body }
//! GetListResponse ::= list(7) { clientId, serverId, listName, actSensorTime,
//!                               valList, listSignature, actGatewayTime }
//! SML_ListEntry   ::= list(7) { objName, status, valTime, unit, scaler,
//!                               value, valueSignature }
//! ```

use crate::tlv::{SmlParser, SmlValue};
use crate::unit;
use smartmeter_core::{EntryValue, MeterError, MeterResult, ObisCode, RawRecord};

/// Message body tag of `GetListResponse`
pub const GET_LIST_RESPONSE: u64 = 0x0000_0701;

/// One entry of a `GetListResponse` value list
#[derive(Debug, Clone, PartialEq)]
pub struct SmlListEntry {
    pub obj_name: Vec<u8>,
    pub unit: Option<u8>,
    pub scaler: Option<i8>,
    pub value: SmlValue,
}

impl SmlListEntry {
    /// OBIS code of the entry, if the object name has the usual six bytes
    pub fn obis_code(&self) -> Option<ObisCode> {
        let bytes: [u8; 6] = self.obj_name.as_slice().try_into().ok()?;
        Some(ObisCode::from_bytes(bytes))
    }

    /// Value with the entry's scaler attached
    ///
    /// Returns `None` for lists and omitted values, which carry no reading.
    pub fn entry_value(&self) -> Option<EntryValue> {
        let scaler = self.scaler.unwrap_or(0);
        match &self.value {
            SmlValue::OctetString(bytes) => Some(EntryValue::Octets(bytes.clone())),
            SmlValue::Bool(b) => Some(EntryValue::Bool(*b)),
            SmlValue::Int(v) => Some(EntryValue::Signed { value: *v, scaler }),
            SmlValue::UInt(v) => Some(EntryValue::Unsigned { value: *v, scaler }),
            SmlValue::List(_) | SmlValue::None | SmlValue::EndOfMessage => None,
        }
    }

    /// Normalize into a record
    pub fn to_record(&self) -> Option<RawRecord> {
        let code = self.obis_code()?;
        let value = self.entry_value()?;
        let unit = self.unit.and_then(unit::symbol).map(str::to_string);
        Some(RawRecord::entry(code, value, unit))
    }

    fn from_value(value: &SmlValue) -> MeterResult<Self> {
        let fields = value
            .as_list()
            .filter(|f| f.len() == 7)
            .ok_or_else(|| MeterError::Protocol("SML list entry is not a list of 7".to_string()))?;

        let obj_name = match &fields[0] {
            SmlValue::OctetString(bytes) => bytes.clone(),
            other => {
                return Err(MeterError::Protocol(format!("Invalid SML object name {:?}", other)));
            }
        };
        let unit = fields[3].as_u64().and_then(|u| u8::try_from(u).ok());
        let scaler = fields[4].as_i64().and_then(|s| i8::try_from(s).ok());

        Ok(Self {
            obj_name,
            unit,
            scaler,
            value: fields[5].clone(),
        })
    }
}

/// Decode all list entries contained in one SML payload
///
/// Messages other than `GetListResponse` are skipped. Padding zeros between
/// messages are tolerated. An entry that cannot be decoded is logged and
/// skipped; a payload whose message structure is broken is an error.
pub fn parse_list_entries(payload: &[u8]) -> MeterResult<Vec<SmlListEntry>> {
    let mut parser = SmlParser::new(payload);
    let mut entries = Vec::new();

    while !parser.is_empty() {
        let message = parser.parse_value()?;
        let fields = match &message {
            SmlValue::EndOfMessage => continue,
            SmlValue::List(fields) if fields.len() >= 4 => fields,
            other => {
                return Err(MeterError::Protocol(format!(
                    "Unexpected top level SML value {:?}",
                    other
                )));
            }
        };

        let Some([tag, body]) = fields[3].as_list().and_then(|b| <&[SmlValue; 2]>::try_from(b).ok())
        else {
            return Err(MeterError::Protocol("SML message body is not a list of 2".to_string()));
        };
        if tag.as_u64() != Some(GET_LIST_RESPONSE) {
            continue;
        }

        let val_list = body
            .as_list()
            .and_then(|b| b.get(4))
            .and_then(SmlValue::as_list)
            .ok_or_else(|| MeterError::Protocol("GetListResponse without value list".to_string()))?;

        for value in val_list {
            match SmlListEntry::from_value(value) {
                Ok(entry) => entries.push(entry),
                Err(e) => log::warn!("Skipping SML list entry: {}", e),
            }
        }
    }

    Ok(entries)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn list_entry(obis: [u8; 6], unit: Option<u8>, scaler: Option<i8>, value: SmlValue) -> SmlValue {
        SmlValue::List(vec![
            SmlValue::OctetString(obis.to_vec()),
            SmlValue::None,
            SmlValue::None,
            unit.map_or(SmlValue::None, |u| SmlValue::UInt(u as u64)),
            scaler.map_or(SmlValue::None, |s| SmlValue::Int(s as i64)),
            value,
            SmlValue::None,
        ])
    }

    pub(crate) fn message(tag: u64, body: SmlValue) -> SmlValue {
        SmlValue::List(vec![
            SmlValue::OctetString(vec![0x01]),
            SmlValue::UInt(0),
            SmlValue::UInt(0),
            SmlValue::List(vec![SmlValue::UInt(tag), body]),
            SmlValue::UInt(0x1234),
            SmlValue::EndOfMessage,
        ])
    }

    pub(crate) fn get_list_response(entries: Vec<SmlValue>) -> SmlValue {
        message(
            GET_LIST_RESPONSE,
            SmlValue::List(vec![
                SmlValue::None,
                SmlValue::OctetString(vec![0x0A, 0x01, 0x45]),
                SmlValue::None,
                SmlValue::None,
                SmlValue::List(entries),
                SmlValue::None,
                SmlValue::None,
            ]),
        )
    }

    fn sample_payload() -> Vec<u8> {
        let mut payload = Vec::new();
        message(0x0101, SmlValue::List(vec![SmlValue::None])).encode(&mut payload);
        get_list_response(vec![
            list_entry([1, 0, 96, 50, 1, 1], None, None, SmlValue::OctetString(b"EMH".to_vec())),
            list_entry([1, 0, 96, 1, 0, 255], None, None, SmlValue::OctetString(vec![0xAB, 0xCD, 0xEF])),
            list_entry([1, 0, 1, 8, 0, 255], Some(30), Some(-1), SmlValue::UInt(7682)),
            list_entry([1, 0, 16, 7, 0, 255], Some(27), Some(0), SmlValue::Int(-178)),
        ])
        .encode(&mut payload);
        message(0x0201, SmlValue::List(vec![SmlValue::None])).encode(&mut payload);
        payload.extend_from_slice(&[0x00, 0x00]);
        payload
    }

    #[test]
    fn test_parse_get_list_response() {
        let entries = parse_list_entries(&sample_payload()).unwrap();
        assert_eq!(entries.len(), 4);
        assert_eq!(entries[2].obis_code().unwrap().as_str(), "1-0:1.8.0*255");
        assert_eq!(entries[2].unit, Some(30));
        assert_eq!(entries[2].scaler, Some(-1));
    }

    #[test]
    fn test_entries_to_records() {
        let entries = parse_list_entries(&sample_payload()).unwrap();
        let records: Vec<RawRecord> = entries.iter().filter_map(SmlListEntry::to_record).collect();

        assert_eq!(records[0].value.as_text(), "EMH");
        assert_eq!(records[1].code.as_str(), "1-0:96.1.0*255");
        assert_eq!(records[1].value.as_text(), "AB CD EF");
        assert_eq!(records[2].value.as_f64().unwrap(), 768.2);
        assert_eq!(records[2].unit.as_deref(), Some("Wh"));
        assert_eq!(records[3].value.as_f64().unwrap(), -178.0);
        assert_eq!(records[3].unit.as_deref(), Some("W"));
    }

    #[test]
    fn test_short_object_name_has_no_code() {
        let entry = SmlListEntry {
            obj_name: vec![1, 0, 1],
            unit: None,
            scaler: None,
            value: SmlValue::UInt(1),
        };
        assert!(entry.to_record().is_none());
    }

    #[test]
    fn test_broken_message_is_error() {
        let payload = SmlValue::UInt(5).to_bytes();
        assert!(parse_list_entries(&payload).is_err());
    }
}
