//! Self-describing container header.

use crate::compression::Compression;
use crate::error::FormatError;
use bytes::{Buf, BufMut};
use chrono::{DateTime, NaiveDateTime};
use flim_core::AcquisitionParameters;
use std::io::{ErrorKind, Read};

/// First word of every container.
pub const MAGIC: u32 = 0xF1F0;

/// Newest format version this crate reads and the one it writes.
pub const FORMAT_VERSION: u32 = 1;

/// Bytes before the tag list.
pub const PREAMBLE_BYTES: usize = 12;

/// Header tag type codes.
pub mod type_tag {
    /// IEEE 754 double.
    pub const DOUBLE: u16 = 0;
    /// Signed 64-bit integer.
    pub const INT64: u16 = 1;
    /// Unsigned 64-bit integer.
    pub const UINT64: u16 = 2;
    /// Boolean byte.
    pub const BOOL: u16 = 3;
    /// Length-prefixed UTF-8 string.
    pub const STRING: u16 = 4;
    /// Date string.
    pub const DATE: u16 = 5;
    /// Terminates the tag list.
    pub const END_HEADER: u16 = 0xFFFF;
}

/// Well-known tag names.
pub mod names {
    /// File creation time.
    pub const CREATION_DATE: &str = "CreationDate";
    /// Name of the producing system.
    pub const TCSPC_SYSTEM: &str = "TcspcSystem";
    /// Sync rate in Hz.
    pub const SYNC_RATE: &str = "SyncRate_Hz";
    /// Micro-time bins.
    pub const NUM_TIME_BINS: &str = "NumTimeBins";
    /// Photon channels.
    pub const NUM_CHANNELS: &str = "NumChannels";
    /// Micro-time bin width in ps.
    pub const MICRO_RESOLUTION: &str = "MicrotimeResolutionUnit_ps";
    /// Macro-time tick in ps.
    pub const MACRO_RESOLUTION: &str = "MacrotimeResolutionUnit_ps";
    /// Pixel clock markers present.
    pub const USING_PIXEL_MARKERS: &str = "UsingPixelMarkers";
    /// Bidirectional scan.
    pub const BIDIRECTIONAL: &str = "BidirectionalScan";
    /// Payload compression name.
    pub const EVENT_COMPRESSION: &str = "EventCompression";
    /// Image index of a segment file.
    pub const IMAGE_INDEX: &str = "ImageIndex";
}

const DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// Value of a header tag.
#[derive(Debug, Clone, PartialEq)]
pub enum TagValue {
    Double(f64),
    Int64(i64),
    UInt64(u64),
    Bool(bool),
    String(String),
    /// ISO-8601 text, kept verbatim.
    Date(String),
    /// Type this reader does not know; carried through untouched.
    Unknown { type_tag: u16, data: Vec<u8> },
}

impl std::fmt::Display for TagValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TagValue::Double(v) => write!(f, "{v}"),
            TagValue::Int64(v) => write!(f, "{v}"),
            TagValue::UInt64(v) => write!(f, "{v}"),
            TagValue::Bool(v) => write!(f, "{v}"),
            TagValue::String(v) | TagValue::Date(v) => f.write_str(v),
            TagValue::Unknown { type_tag, data } => {
                write!(f, "<type 0x{type_tag:04X}, {} bytes>", data.len())
            }
        }
    }
}

impl TagValue {
    /// Date value.
    pub fn date(value: NaiveDateTime) -> Self {
        TagValue::Date(value.format(DATE_FORMAT).to_string())
    }

    /// Wire type code.
    pub fn type_tag(&self) -> u16 {
        match self {
            TagValue::Double(_) => type_tag::DOUBLE,
            TagValue::Int64(_) => type_tag::INT64,
            TagValue::UInt64(_) => type_tag::UINT64,
            TagValue::Bool(_) => type_tag::BOOL,
            TagValue::String(_) => type_tag::STRING,
            TagValue::Date(_) => type_tag::DATE,
            TagValue::Unknown { type_tag, .. } => *type_tag,
        }
    }

    fn payload(&self) -> Vec<u8> {
        match self {
            TagValue::Double(v) => v.to_le_bytes().to_vec(),
            TagValue::Int64(v) => v.to_le_bytes().to_vec(),
            TagValue::UInt64(v) => v.to_le_bytes().to_vec(),
            TagValue::Bool(v) => vec![u8::from(*v)],
            TagValue::String(s) | TagValue::Date(s) => s.as_bytes().to_vec(),
            TagValue::Unknown { data, .. } => data.clone(),
        }
    }

    fn decode(name: &str, type_tag: u16, data: &[u8]) -> Result<Self, FormatError> {
        let fixed = |n: usize| -> Result<[u8; 8], FormatError> {
            if data.len() != n {
                return Err(FormatError::InvalidTag {
                    name: name.to_string(),
                    reason: format!("expected {} bytes, found {}", n, data.len()),
                });
            }
            let mut out = [0u8; 8];
            out[..n].copy_from_slice(data);
            Ok(out)
        };

        Ok(match type_tag {
            type_tag::DOUBLE => TagValue::Double(f64::from_le_bytes(fixed(8)?)),
            type_tag::INT64 => TagValue::Int64(i64::from_le_bytes(fixed(8)?)),
            type_tag::UINT64 => TagValue::UInt64(u64::from_le_bytes(fixed(8)?)),
            type_tag::BOOL => TagValue::Bool(fixed(1)?[0] != 0),
            type_tag::STRING => TagValue::String(String::from_utf8_lossy(data).into_owned()),
            type_tag::DATE => TagValue::Date(String::from_utf8_lossy(data).into_owned()),
            other => TagValue::Unknown {
                type_tag: other,
                data: data.to_vec(),
            },
        })
    }
}

/// A named header entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Tag {
    /// Tag name.
    pub name: String,
    /// Tag value.
    pub value: TagValue,
}

/// Parsed container header.
#[derive(Debug, Clone, PartialEq)]
pub struct FileHeader {
    /// Format version read or written.
    pub version: u32,
    /// Tags in file order, unknown types included.
    pub tags: Vec<Tag>,
}

impl Default for FileHeader {
    fn default() -> Self {
        Self::new()
    }
}

impl FileHeader {
    /// Empty header at the current version.
    pub fn new() -> Self {
        Self {
            version: FORMAT_VERSION,
            tags: Vec::new(),
        }
    }

    /// Header carrying the canonical metadata tags for `params`.
    pub fn for_acquisition(
        params: &AcquisitionParameters,
        compression: Compression,
        created: NaiveDateTime,
    ) -> Self {
        let mut header = Self::new();
        header.push(names::CREATION_DATE, TagValue::date(created));
        header.push(
            names::TCSPC_SYSTEM,
            TagValue::String(params.tcspc_system.clone()),
        );
        header.push(names::SYNC_RATE, TagValue::Double(params.sync_rate_hz));
        header.push(
            names::NUM_TIME_BINS,
            TagValue::Int64(i64::from(params.n_timebins)),
        );
        header.push(
            names::NUM_CHANNELS,
            TagValue::Int64(i64::from(params.n_channels)),
        );
        header.push(
            names::MICRO_RESOLUTION,
            TagValue::Double(params.micro_resolution_ps),
        );
        header.push(
            names::MACRO_RESOLUTION,
            TagValue::Double(params.macro_resolution_ps),
        );
        header.push(
            names::USING_PIXEL_MARKERS,
            TagValue::Bool(params.using_pixel_markers),
        );
        header.push(names::BIDIRECTIONAL, TagValue::Bool(params.bidirectional));
        header.push(
            names::EVENT_COMPRESSION,
            TagValue::String(compression.as_str().to_string()),
        );
        header
    }

    /// Append a tag, replacing any earlier tag with the same name.
    pub fn push(&mut self, name: impl Into<String>, value: TagValue) {
        let name = name.into();
        if let Some(tag) = self.tags.iter_mut().find(|t| t.name == name) {
            tag.value = value;
        } else {
            self.tags.push(Tag { name, value });
        }
    }

    /// Value of tag `name`.
    pub fn get(&self, name: &str) -> Option<&TagValue> {
        self.tags.iter().find(|t| t.name == name).map(|t| &t.value)
    }

    /// Numeric tag as `f64`.
    pub fn get_f64(&self, name: &str) -> Option<f64> {
        match self.get(name)? {
            TagValue::Double(v) => Some(*v),
            TagValue::Int64(v) => Some(*v as f64),
            TagValue::UInt64(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Integer tag as `i64`.
    pub fn get_i64(&self, name: &str) -> Option<i64> {
        match self.get(name)? {
            TagValue::Int64(v) => Some(*v),
            TagValue::UInt64(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    /// Boolean tag.
    pub fn get_bool(&self, name: &str) -> Option<bool> {
        match self.get(name)? {
            TagValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// String tag.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        match self.get(name)? {
            TagValue::String(s) | TagValue::Date(s) => Some(s),
            _ => None,
        }
    }

    /// Creation time, if present and parseable.
    pub fn creation_date(&self) -> Option<NaiveDateTime> {
        let text = self.get_str(names::CREATION_DATE)?;
        NaiveDateTime::parse_from_str(text, DATE_FORMAT)
            .ok()
            .or_else(|| DateTime::parse_from_rfc3339(text).ok().map(|d| d.naive_local()))
    }

    /// Payload encoding. Files without the tag are uncompressed.
    pub fn compression(&self) -> Result<Compression, FormatError> {
        match self.get_str(names::EVENT_COMPRESSION) {
            None => Ok(Compression::None),
            Some(s) => s.parse().map_err(|reason| FormatError::InvalidTag {
                name: names::EVENT_COMPRESSION.to_string(),
                reason,
            }),
        }
    }

    /// Rebuild the acquisition description.
    ///
    /// The two resolution tags are required; everything else falls back to
    /// defaults.
    pub fn acquisition(&self) -> Result<AcquisitionParameters, FormatError> {
        let defaults = AcquisitionParameters::default();
        let micro_resolution_ps = self
            .get_f64(names::MICRO_RESOLUTION)
            .ok_or(FormatError::MissingTag(names::MICRO_RESOLUTION))?;
        let macro_resolution_ps = self
            .get_f64(names::MACRO_RESOLUTION)
            .ok_or(FormatError::MissingTag(names::MACRO_RESOLUTION))?;
        let count = |name: &str, default: u32| {
            self.get_i64(name)
                .and_then(|v| u32::try_from(v).ok())
                .unwrap_or(default)
        };

        Ok(AcquisitionParameters {
            tcspc_system: self
                .get_str(names::TCSPC_SYSTEM)
                .map(str::to_string)
                .unwrap_or(defaults.tcspc_system),
            sync_rate_hz: self
                .get_f64(names::SYNC_RATE)
                .unwrap_or(defaults.sync_rate_hz),
            n_timebins: count(names::NUM_TIME_BINS, defaults.n_timebins),
            n_channels: count(names::NUM_CHANNELS, defaults.n_channels),
            micro_resolution_ps,
            macro_resolution_ps,
            using_pixel_markers: self
                .get_bool(names::USING_PIXEL_MARKERS)
                .unwrap_or(defaults.using_pixel_markers),
            bidirectional: self
                .get_bool(names::BIDIRECTIONAL)
                .unwrap_or(defaults.bidirectional),
        })
    }

    /// Encode the tag list including the end tag.
    pub fn encode_tags(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(64 * (self.tags.len() + 1));
        for tag in &self.tags {
            let payload = tag.value.payload();
            put_name(&mut buf, &tag.name);
            buf.put_u16_le(tag.value.type_tag());
            buf.put_u32_le(payload.len() as u32);
            buf.put_slice(&payload);
        }
        put_name(&mut buf, "EndHeader");
        buf.put_u16_le(type_tag::END_HEADER);
        buf.put_u32_le(0);
        buf
    }

    /// Encode the preamble and tag list.
    pub fn encode(&self) -> Vec<u8> {
        let tags = self.encode_tags();
        let mut buf = Vec::with_capacity(PREAMBLE_BYTES + tags.len());
        buf.put_u32_le(MAGIC);
        buf.put_u32_le(self.version);
        buf.put_u32_le(tags.len() as u32);
        buf.put_slice(&tags);
        buf
    }

    /// Parse a header from the start of `reader`, leaving it positioned at
    /// the first payload byte.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self, FormatError> {
        let mut preamble = [0u8; PREAMBLE_BYTES];
        read_exact_or_truncated(reader, &mut preamble, "preamble")?;
        let mut cursor = &preamble[..];

        let magic = cursor.get_u32_le();
        if magic != MAGIC {
            return Err(FormatError::BadMagic {
                found: magic,
                expected: MAGIC,
            });
        }
        let version = cursor.get_u32_le();
        if version == 0 || version > FORMAT_VERSION {
            return Err(FormatError::UnsupportedVersion(version));
        }
        let header_len = cursor.get_u32_le();

        // Grow with the bytes actually present; the length is not trusted.
        let mut tag_bytes = Vec::new();
        reader
            .by_ref()
            .take(u64::from(header_len))
            .read_to_end(&mut tag_bytes)?;
        if tag_bytes.len() < header_len as usize {
            return Err(FormatError::TruncatedHeader(format!(
                "tag list is {} of {header_len} bytes",
                tag_bytes.len()
            )));
        }

        let tags = parse_tags(&tag_bytes)?;
        Ok(Self { version, tags })
    }
}

fn put_name(buf: &mut Vec<u8>, name: &str) {
    buf.put_u32_le(name.len() as u32 + 1);
    buf.put_slice(name.as_bytes());
    buf.put_u8(0);
}

fn read_exact_or_truncated<R: Read>(
    reader: &mut R,
    buf: &mut [u8],
    what: &str,
) -> Result<(), FormatError> {
    reader.read_exact(buf).map_err(|e| match e.kind() {
        ErrorKind::UnexpectedEof => {
            FormatError::TruncatedHeader(format!("end of file inside {what}"))
        }
        _ => FormatError::Io(e),
    })
}

fn parse_tags(mut buf: &[u8]) -> Result<Vec<Tag>, FormatError> {
    let total = buf.len();
    let mut tags = Vec::new();

    loop {
        if buf.remaining() < 4 {
            return Err(FormatError::TruncatedHeader(
                "tag list ended without an end tag".into(),
            ));
        }
        let name_len = buf.get_u32_le() as usize;
        if name_len == 0 || buf.remaining() < name_len + 6 {
            return Err(FormatError::TruncatedHeader(format!(
                "tag name of {name_len} bytes at offset {}",
                total - buf.remaining() - 4
            )));
        }
        let raw_name = &buf[..name_len];
        let name = String::from_utf8_lossy(raw_name.strip_suffix(&[0u8][..]).unwrap_or(raw_name))
            .into_owned();
        buf.advance(name_len);

        let type_tag = buf.get_u16_le();
        let data_len = buf.get_u32_le() as usize;
        if type_tag == type_tag::END_HEADER {
            if buf.has_remaining() {
                return Err(FormatError::TruncatedHeader(format!(
                    "{} bytes after end tag disagree with header length",
                    buf.remaining()
                )));
            }
            return Ok(tags);
        }
        if buf.remaining() < data_len {
            return Err(FormatError::TruncatedHeader(format!(
                "tag '{name}' declares {data_len} bytes, {} left",
                buf.remaining()
            )));
        }
        let value = TagValue::decode(&name, type_tag, &buf[..data_len])?;
        buf.advance(data_len);
        tags.push(Tag { name, value });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn sample_time() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 1)
            .and_then(|d| d.and_hms_opt(12, 30, 5))
            .unwrap()
    }

    #[test]
    fn test_name_encoding() {
        let mut header = FileHeader::new();
        header.push("Ab", TagValue::Bool(true));
        let bytes = header.encode_tags();
        assert_eq!(
            &bytes[..14],
            &[3, 0, 0, 0, b'A', b'b', 0, 3, 0, 1, 0, 0, 0, 1]
        );
    }

    #[test]
    fn test_header_roundtrip() {
        let params = AcquisitionParameters {
            tcspc_system: "sim".into(),
            n_channels: 2,
            bidirectional: true,
            ..Default::default()
        };
        let mut header = FileHeader::for_acquisition(&params, Compression::Lz4, sample_time());
        header.push("Objective", TagValue::String("40x".into()));

        let bytes = header.encode();
        let parsed = FileHeader::read_from(&mut &bytes[..]).unwrap();
        assert_eq!(parsed, header);
        assert_eq!(parsed.acquisition().unwrap(), params);
        assert_eq!(parsed.compression().unwrap(), Compression::Lz4);
        assert_eq!(parsed.creation_date(), Some(sample_time()));
        assert_eq!(parsed.get_str("Objective"), Some("40x"));
    }

    #[test]
    fn test_unknown_type_is_skipped() {
        let mut header = FileHeader::new();
        header.push(
            "Future",
            TagValue::Unknown {
                type_tag: 0x0042,
                data: vec![1, 2, 3, 4, 5],
            },
        );
        header.push(names::MICRO_RESOLUTION, TagValue::Double(10.0));
        header.push(names::MACRO_RESOLUTION, TagValue::Double(100.0));

        let bytes = header.encode();
        let parsed = FileHeader::read_from(&mut &bytes[..]).unwrap();
        assert_eq!(parsed.tags.len(), 3);
        assert_eq!(parsed.acquisition().unwrap().micro_resolution_ps, 10.0);
    }

    #[test]
    fn test_bad_magic() {
        let mut bytes = FileHeader::new().encode();
        bytes[0] = 0xAA;
        assert!(matches!(
            FileHeader::read_from(&mut &bytes[..]),
            Err(FormatError::BadMagic { .. })
        ));
    }

    #[test]
    fn test_truncated() {
        let bytes = FileHeader::for_acquisition(
            &AcquisitionParameters::default(),
            Compression::None,
            sample_time(),
        )
        .encode();
        for cut in [0, 5, PREAMBLE_BYTES, bytes.len() - 1] {
            let err = FileHeader::read_from(&mut &bytes[..cut]).unwrap_err();
            assert!(matches!(err, FormatError::TruncatedHeader(_)), "cut {cut}");
        }
    }

    #[test]
    fn test_oversized_header_length_is_truncation() {
        let mut bytes = FileHeader::new().encode();
        bytes[8..12].copy_from_slice(&u32::MAX.to_le_bytes());
        let err = FileHeader::read_from(&mut &bytes[..]).unwrap_err();
        assert!(matches!(err, FormatError::TruncatedHeader(_)), "{err}");
    }

    #[test]
    fn test_header_length_mismatch() {
        let mut bytes = FileHeader::new().encode();
        let len = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) + 2;
        bytes[8..12].copy_from_slice(&len.to_le_bytes());
        bytes.extend_from_slice(&[0, 0]);
        assert!(matches!(
            FileHeader::read_from(&mut &bytes[..]),
            Err(FormatError::TruncatedHeader(_))
        ));
    }

    #[test]
    fn test_missing_resolution() {
        assert!(matches!(
            FileHeader::new().acquisition(),
            Err(FormatError::MissingTag(_))
        ));
    }
}
