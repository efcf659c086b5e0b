// Copyright 2025 RustFS Team
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! KMIP tag-type-length-value encoding.

use snafu::Snafu;

#[derive(Snafu, Debug, PartialEq, Eq)]
pub enum DecodeError {
    #[snafu(display("truncated item at offset {offset}"))]
    Truncated { offset: usize },

    #[snafu(display("unknown item type {item_type:#04x}"))]
    UnknownType { item_type: u8 },

    #[snafu(display("bad length {length} for item type {item_type:#04x}"))]
    BadLength { item_type: u8, length: u32 },

    #[snafu(display("text is not utf-8"))]
    BadText,
}

pub mod tag {
    pub const ATTRIBUTE: u32 = 0x420008;
    pub const ATTRIBUTE_NAME: u32 = 0x42000A;
    pub const ATTRIBUTE_VALUE: u32 = 0x42000B;
    pub const BATCH_COUNT: u32 = 0x42000D;
    pub const BATCH_ITEM: u32 = 0x42000F;
    pub const CRYPTOGRAPHIC_ALGORITHM: u32 = 0x420028;
    pub const CRYPTOGRAPHIC_LENGTH: u32 = 0x42002A;
    pub const KEY_BLOCK: u32 = 0x420040;
    pub const KEY_FORMAT_TYPE: u32 = 0x420042;
    pub const KEY_MATERIAL: u32 = 0x420043;
    pub const KEY_VALUE: u32 = 0x420045;
    pub const OBJECT_TYPE: u32 = 0x420057;
    pub const OPERATION: u32 = 0x42005C;
    pub const PROTOCOL_VERSION: u32 = 0x420069;
    pub const PROTOCOL_VERSION_MAJOR: u32 = 0x42006A;
    pub const PROTOCOL_VERSION_MINOR: u32 = 0x42006B;
    pub const REQUEST_HEADER: u32 = 0x420077;
    pub const REQUEST_MESSAGE: u32 = 0x420078;
    pub const REQUEST_PAYLOAD: u32 = 0x420079;
    pub const RESPONSE_HEADER: u32 = 0x42007A;
    pub const RESPONSE_MESSAGE: u32 = 0x42007B;
    pub const RESPONSE_PAYLOAD: u32 = 0x42007C;
    pub const RESULT_MESSAGE: u32 = 0x42007D;
    pub const RESULT_REASON: u32 = 0x42007E;
    pub const RESULT_STATUS: u32 = 0x42007F;
    pub const REVOCATION_REASON: u32 = 0x420081;
    pub const REVOCATION_REASON_CODE: u32 = 0x420082;
    pub const SYMMETRIC_KEY: u32 = 0x42008F;
    pub const TEMPLATE_ATTRIBUTE: u32 = 0x420091;
    pub const UNIQUE_IDENTIFIER: u32 = 0x420094;
}

const STRUCTURE: u8 = 0x01;
const INTEGER: u8 = 0x02;
const LONG_INTEGER: u8 = 0x03;
const ENUMERATION: u8 = 0x05;
const BOOLEAN: u8 = 0x06;
const TEXT_STRING: u8 = 0x07;
const BYTE_STRING: u8 = 0x08;
const DATE_TIME: u8 = 0x09;
const INTERVAL: u8 = 0x0A;

/// Size of the tag, type and length prefix.
pub const HEADER_LEN: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Structure(Vec<Item>),
    Integer(i32),
    LongInteger(i64),
    Enumeration(u32),
    Boolean(bool),
    TextString(String),
    ByteString(Vec<u8>),
    DateTime(i64),
    Interval(u32),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    pub tag: u32,
    pub value: Value,
}

fn padded(len: usize) -> usize {
    len.div_ceil(8) * 8
}

impl Item {
    pub fn structure(tag: u32, items: Vec<Item>) -> Self {
        Item {
            tag,
            value: Value::Structure(items),
        }
    }

    pub fn integer(tag: u32, v: i32) -> Self {
        Item {
            tag,
            value: Value::Integer(v),
        }
    }

    pub fn enumeration(tag: u32, v: u32) -> Self {
        Item {
            tag,
            value: Value::Enumeration(v),
        }
    }

    pub fn text(tag: u32, v: impl Into<String>) -> Self {
        Item {
            tag,
            value: Value::TextString(v.into()),
        }
    }

    pub fn bytes(tag: u32, v: Vec<u8>) -> Self {
        Item {
            tag,
            value: Value::ByteString(v),
        }
    }

    /// First direct child with `tag`.
    pub fn child(&self, tag: u32) -> Option<&Item> {
        match &self.value {
            Value::Structure(items) => items.iter().find(|i| i.tag == tag),
            _ => None,
        }
    }

    pub fn children(&self, tag: u32) -> impl Iterator<Item = &Item> {
        let items: &[Item] = match &self.value {
            Value::Structure(items) => items,
            _ => &[],
        };
        items.iter().filter(move |i| i.tag == tag)
    }

    /// Follows a chain of nested tags.
    pub fn path(&self, tags: &[u32]) -> Option<&Item> {
        tags.iter().try_fold(self, |item, tag| item.child(*tag))
    }

    pub fn as_text(&self) -> Option<&str> {
        match &self.value {
            Value::TextString(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match &self.value {
            Value::ByteString(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_enum(&self) -> Option<u32> {
        match self.value {
            Value::Enumeration(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i32> {
        match self.value {
            Value::Integer(v) => Some(v),
            _ => None,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode_into(&mut out);
        out
    }

    fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.tag.to_be_bytes()[1..]);
        let (item_type, body): (u8, Vec<u8>) = match &self.value {
            Value::Structure(items) => {
                let mut body = Vec::new();
                for item in items {
                    item.encode_into(&mut body);
                }
                (STRUCTURE, body)
            }
            Value::Integer(v) => (INTEGER, v.to_be_bytes().to_vec()),
            Value::LongInteger(v) => (LONG_INTEGER, v.to_be_bytes().to_vec()),
            Value::Enumeration(v) => (ENUMERATION, v.to_be_bytes().to_vec()),
            Value::Boolean(v) => (BOOLEAN, u64::from(*v).to_be_bytes().to_vec()),
            Value::TextString(v) => (TEXT_STRING, v.as_bytes().to_vec()),
            Value::ByteString(v) => (BYTE_STRING, v.clone()),
            Value::DateTime(v) => (DATE_TIME, v.to_be_bytes().to_vec()),
            Value::Interval(v) => (INTERVAL, v.to_be_bytes().to_vec()),
        };
        out.push(item_type);
        out.extend_from_slice(&(body.len() as u32).to_be_bytes());
        let pad = padded(body.len()) - body.len();
        out.extend_from_slice(&body);
        out.extend(std::iter::repeat_n(0u8, pad));
    }

    /// Total encoded size announced by an item header.
    pub fn encoded_len(header: &[u8; HEADER_LEN]) -> usize {
        let length = u32::from_be_bytes([header[4], header[5], header[6], header[7]]) as usize;
        HEADER_LEN + padded(length)
    }

    pub fn decode(buf: &[u8]) -> Result<Item, DecodeError> {
        let (item, _) = decode_at(buf, 0)?;
        Ok(item)
    }
}

fn fixed<const N: usize>(body: &[u8], item_type: u8, length: u32) -> Result<[u8; N], DecodeError> {
    body.try_into()
        .map_err(|_| DecodeError::BadLength { item_type, length })
}

fn decode_at(buf: &[u8], offset: usize) -> Result<(Item, usize), DecodeError> {
    let header = buf
        .get(offset..offset + HEADER_LEN)
        .ok_or(DecodeError::Truncated { offset })?;
    let tag = u32::from_be_bytes([0, header[0], header[1], header[2]]);
    let item_type = header[3];
    let length = u32::from_be_bytes([header[4], header[5], header[6], header[7]]);
    let start = offset + HEADER_LEN;
    let body = buf
        .get(start..start + length as usize)
        .ok_or(DecodeError::Truncated { offset })?;
    let next = start + padded(length as usize);

    let value = match item_type {
        STRUCTURE => {
            let mut items = Vec::new();
            let mut at = 0;
            while at < body.len() {
                let (item, end) = decode_at(body, at)?;
                items.push(item);
                at = end;
            }
            Value::Structure(items)
        }
        INTEGER => Value::Integer(i32::from_be_bytes(fixed(body, item_type, length)?)),
        LONG_INTEGER => Value::LongInteger(i64::from_be_bytes(fixed(body, item_type, length)?)),
        ENUMERATION => Value::Enumeration(u32::from_be_bytes(fixed(body, item_type, length)?)),
        BOOLEAN => Value::Boolean(u64::from_be_bytes(fixed(body, item_type, length)?) != 0),
        TEXT_STRING => Value::TextString(
            String::from_utf8(body.to_vec()).map_err(|_| DecodeError::BadText)?,
        ),
        BYTE_STRING => Value::ByteString(body.to_vec()),
        DATE_TIME => Value::DateTime(i64::from_be_bytes(fixed(body, item_type, length)?)),
        INTERVAL => Value::Interval(u32::from_be_bytes(fixed(body, item_type, length)?)),
        other => return Err(DecodeError::UnknownType { item_type: other }),
    };
    Ok((Item { tag, value }, next))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_is_padded() {
        let bytes = Item::integer(tag::BATCH_COUNT, 1).encode();
        assert_eq!(
            bytes,
            vec![
                0x42, 0x00, 0x0D, 0x02, 0x00, 0x00, 0x00, 0x04, 0x00, 0x00, 0x00, 0x01, 0x00,
                0x00, 0x00, 0x00
            ]
        );
    }

    #[test]
    fn test_text_string_length_excludes_padding() {
        let bytes = Item::text(tag::UNIQUE_IDENTIFIER, "abc").encode();
        assert_eq!(&bytes[..8], &[0x42, 0x00, 0x94, 0x07, 0, 0, 0, 3]);
        assert_eq!(bytes.len(), 16);
        let header: [u8; HEADER_LEN] = bytes[..8].try_into().unwrap();
        assert_eq!(Item::encoded_len(&header), 16);
    }

    #[test]
    fn test_nested_structure_decodes() {
        let msg = Item::structure(
            tag::RESPONSE_MESSAGE,
            vec![Item::structure(
                tag::BATCH_ITEM,
                vec![
                    Item::enumeration(tag::RESULT_STATUS, 0),
                    Item::structure(
                        tag::RESPONSE_PAYLOAD,
                        vec![Item::text(tag::UNIQUE_IDENTIFIER, "42")],
                    ),
                ],
            )],
        );
        let decoded = Item::decode(&msg.encode()).unwrap();
        assert_eq!(decoded, msg);
        let uid = decoded
            .path(&[tag::BATCH_ITEM, tag::RESPONSE_PAYLOAD, tag::UNIQUE_IDENTIFIER])
            .and_then(Item::as_text);
        assert_eq!(uid, Some("42"));
    }

    #[test]
    fn test_truncated_input() {
        let bytes = Item::bytes(tag::KEY_MATERIAL, vec![1; 32]).encode();
        assert!(matches!(
            Item::decode(&bytes[..20]),
            Err(DecodeError::Truncated { .. })
        ));
    }
}
