//! Serde codec for the `key=value` connection-header format.
//!
//! Headers only ever contain flat structs of strings and booleans, so the
//! serializer and deserializer reject every other shape outright. Booleans
//! travel as `0`/`1`.

use std::{
    fmt,
    io::{Cursor, ErrorKind, Read, Write},
    string::FromUtf8Error,
};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{
    de::{self, value::StringDeserializer, Deserialize, DeserializeSeed, MapAccess, Visitor},
    ser::{self, Impossible, Serialize},
};
use tokio::io::AsyncReadExt;

use crate::tcpros;

/// Key a peer uses to report a handshake failure instead of a header.
const ERROR_FIELD: &str = "error";

#[derive(thiserror::Error, Debug)]
pub enum HeaderError {
    #[error("Header had an invalid length: {0}")]
    InvalidLength(String),
    #[error("Field did not match expected format: {0}")]
    InvalidFormat(String),
    #[error(transparent)]
    InvalidUtf8(#[from] FromUtf8Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("Serde error: {0}")]
    Serde(String),
    #[error("Peer rejected the handshake: {0}")]
    PeerRejection(String),
}

impl de::Error for HeaderError {
    fn custom<T: fmt::Display>(msg: T) -> Self {
        HeaderError::Serde(msg.to_string())
    }
}

impl ser::Error for HeaderError {
    fn custom<T: fmt::Display>(msg: T) -> Self {
        HeaderError::Serde(msg.to_string())
    }
}

/// Serialize a header struct into its wire form, total length included.
pub fn to_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, HeaderError> {
    let mut buffer = Vec::new();
    buffer.write_u32::<LittleEndian>(0)?;

    value.serialize(&mut Serializer {
        writer: &mut buffer,
        field_name: None,
    })?;

    let header_size = (buffer.len() - 4) as u32;
    (&mut buffer[..4]).write_u32::<LittleEndian>(header_size)?;

    Ok(buffer)
}

/// Deserialize a header struct from a full frame (length prefix included).
pub fn from_bytes<'a, T: Deserialize<'a>>(bytes: &[u8]) -> Result<T, HeaderError> {
    let mut cursor = Cursor::new(bytes);
    let expected = ReadBytesExt::read_u32::<LittleEndian>(&mut cursor)? as usize;
    let actual = bytes.len().saturating_sub(4);

    if expected != actual {
        return Err(HeaderError::InvalidLength(format!(
            "expected: {expected}, actual: {actual}"
        )));
    }

    T::deserialize(&mut Deserializer {
        reader: cursor,
        field: None,
    })
}

/// Read one frame off the socket and deserialize a header from it.
pub async fn from_async_read<'a, T, R>(reader: &mut R) -> Result<T, HeaderError>
where
    T: Deserialize<'a>,
    R: AsyncReadExt + Unpin,
{
    from_bytes(&tcpros::read_frame(reader).await?)
}

struct Serializer<W> {
    writer: W,
    field_name: Option<&'static str>,
}

impl<W: Write> Serializer<W> {
    fn write_field(&mut self, value: &str) -> Result<(), HeaderError> {
        let name = self.field_name.take().ok_or_else(|| {
            HeaderError::Serde("header values must be struct fields".into())
        })?;

        let field = format!("{name}={value}");
        self.writer.write_u32::<LittleEndian>(field.len() as u32)?;
        self.writer.write_all(field.as_bytes())?;
        Ok(())
    }
}

macro_rules! unsupported_ser {
    ($($method:ident: $t:ty,)*) => {$(
        fn $method(self, _v: $t) -> Result<(), HeaderError> {
            Err(HeaderError::Serde(format!("unsupported header type: {}", stringify!($t))))
        }
    )*};
}

impl<'a, W: Write> ser::Serializer for &'a mut Serializer<W> {
    type Ok = ();
    type Error = HeaderError;

    type SerializeSeq = Impossible<(), HeaderError>;
    type SerializeTuple = Impossible<(), HeaderError>;
    type SerializeTupleStruct = Impossible<(), HeaderError>;
    type SerializeTupleVariant = Impossible<(), HeaderError>;
    type SerializeMap = Impossible<(), HeaderError>;
    type SerializeStruct = Self;
    type SerializeStructVariant = Impossible<(), HeaderError>;

    unsupported_ser! {
        serialize_i8: i8,
        serialize_i16: i16,
        serialize_i32: i32,
        serialize_i64: i64,
        serialize_u8: u8,
        serialize_u16: u16,
        serialize_u32: u32,
        serialize_u64: u64,
        serialize_f32: f32,
        serialize_f64: f64,
        serialize_char: char,
        serialize_bytes: &[u8],
    }

    fn serialize_str(self, v: &str) -> Result<(), HeaderError> {
        self.write_field(v)
    }

    fn serialize_bool(self, v: bool) -> Result<(), HeaderError> {
        self.write_field(if v { "1" } else { "0" })
    }

    fn serialize_none(self) -> Result<(), HeaderError> {
        self.field_name.take();
        Ok(())
    }

    fn serialize_some<T: ?Sized + Serialize>(self, value: &T) -> Result<(), HeaderError> {
        value.serialize(self)
    }

    fn serialize_struct(
        self,
        _name: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeStruct, HeaderError> {
        Ok(self)
    }

    fn serialize_unit(self) -> Result<(), HeaderError> {
        Err(HeaderError::Serde("unsupported header type: unit".into()))
    }

    fn serialize_unit_struct(self, _name: &'static str) -> Result<(), HeaderError> {
        Err(HeaderError::Serde("unsupported header type: unit struct".into()))
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        _index: u32,
        _variant: &'static str,
    ) -> Result<(), HeaderError> {
        Err(HeaderError::Serde("unsupported header type: enum".into()))
    }

    fn serialize_newtype_struct<T: ?Sized + Serialize>(
        self,
        _name: &'static str,
        _value: &T,
    ) -> Result<(), HeaderError> {
        Err(HeaderError::Serde("unsupported header type: newtype struct".into()))
    }

    fn serialize_newtype_variant<T: ?Sized + Serialize>(
        self,
        _name: &'static str,
        _index: u32,
        _variant: &'static str,
        _value: &T,
    ) -> Result<(), HeaderError> {
        Err(HeaderError::Serde("unsupported header type: enum".into()))
    }

    fn serialize_seq(self, _len: Option<usize>) -> Result<Self::SerializeSeq, HeaderError> {
        Err(HeaderError::Serde("unsupported header type: sequence".into()))
    }

    fn serialize_tuple(self, _len: usize) -> Result<Self::SerializeTuple, HeaderError> {
        Err(HeaderError::Serde("unsupported header type: tuple".into()))
    }

    fn serialize_tuple_struct(
        self,
        _name: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeTupleStruct, HeaderError> {
        Err(HeaderError::Serde("unsupported header type: tuple struct".into()))
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeTupleVariant, HeaderError> {
        Err(HeaderError::Serde("unsupported header type: enum".into()))
    }

    fn serialize_map(self, _len: Option<usize>) -> Result<Self::SerializeMap, HeaderError> {
        Err(HeaderError::Serde("unsupported header type: map".into()))
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeStructVariant, HeaderError> {
        Err(HeaderError::Serde("unsupported header type: enum".into()))
    }
}

impl<'a, W: Write> ser::SerializeStruct for &'a mut Serializer<W> {
    type Ok = ();
    type Error = HeaderError;

    fn serialize_field<T: ?Sized + Serialize>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> Result<(), HeaderError> {
        self.field_name = Some(key);
        value.serialize(&mut **self)
    }

    fn end(self) -> Result<(), HeaderError> {
        Ok(())
    }
}

struct Deserializer<R> {
    reader: R,
    field: Option<(String, String)>,
}

impl<R: Read> Deserializer<R> {
    fn next_field(&mut self) -> Result<Option<(String, String)>, HeaderError> {
        let field_length = match self.reader.read_u32::<LittleEndian>() {
            Ok(length) => length,
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut buffer = vec![0u8; field_length as usize];
        self.reader.read_exact(&mut buffer)?;
        let raw = String::from_utf8(buffer)?;

        let (key, value) = raw
            .split_once('=')
            .ok_or_else(|| HeaderError::InvalidFormat(raw.clone()))?;

        // A peer that reports an error instead of a header will usually
        // omit every expected field, so fail the whole handshake here.
        if key == ERROR_FIELD {
            return Err(HeaderError::PeerRejection(value.to_string()));
        }

        Ok(Some((key.to_string(), value.to_string())))
    }

    fn take_value(&mut self) -> Result<String, HeaderError> {
        self.field
            .take()
            .map(|(_, value)| value)
            .ok_or_else(|| HeaderError::Serde("header values must be struct fields".into()))
    }
}

macro_rules! unsupported_de {
    ($($method:ident,)*) => {$(
        fn $method<V: Visitor<'de>>(self, _visitor: V) -> Result<V::Value, HeaderError> {
            Err(HeaderError::Serde(
                format!("unsupported header type: {}", stringify!($method)),
            ))
        }
    )*};
}

impl<'de, 'a, R: Read> de::Deserializer<'de> for &'a mut Deserializer<R> {
    type Error = HeaderError;

    fn deserialize_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        _fields: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, HeaderError> {
        visitor.visit_map(FieldAccess { de: self })
    }

    fn deserialize_str<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, HeaderError> {
        let value = self.take_value()?;
        visitor.visit_string(value)
    }

    fn deserialize_string<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, HeaderError> {
        self.deserialize_str(visitor)
    }

    fn deserialize_bool<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, HeaderError> {
        match self.take_value()?.as_str() {
            "0" => visitor.visit_bool(false),
            "1" => visitor.visit_bool(true),
            other => Err(HeaderError::Serde(format!("invalid bool value: {other}"))),
        }
    }

    fn deserialize_option<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, HeaderError> {
        visitor.visit_some(self)
    }

    fn deserialize_ignored_any<V: Visitor<'de>>(
        self,
        visitor: V,
    ) -> Result<V::Value, HeaderError> {
        // Unknown keys are ignored, whatever their value looks like.
        self.deserialize_string(visitor)
    }

    fn deserialize_any<V: Visitor<'de>>(self, _visitor: V) -> Result<V::Value, HeaderError> {
        Err(HeaderError::Serde("unsupported header type: any".into()))
    }

    unsupported_de! {
        deserialize_i8,
        deserialize_i16,
        deserialize_i32,
        deserialize_i64,
        deserialize_u8,
        deserialize_u16,
        deserialize_u32,
        deserialize_u64,
        deserialize_f32,
        deserialize_f64,
        deserialize_char,
        deserialize_bytes,
        deserialize_byte_buf,
        deserialize_unit,
        deserialize_map,
        deserialize_identifier,
        deserialize_seq,
    }

    fn deserialize_enum<V: Visitor<'de>>(
        self,
        _name: &'static str,
        _variants: &'static [&'static str],
        _visitor: V,
    ) -> Result<V::Value, HeaderError> {
        Err(HeaderError::Serde("unsupported header type: enum".into()))
    }

    fn deserialize_unit_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        _visitor: V,
    ) -> Result<V::Value, HeaderError> {
        Err(HeaderError::Serde("unsupported header type: unit struct".into()))
    }

    fn deserialize_newtype_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        _visitor: V,
    ) -> Result<V::Value, HeaderError> {
        Err(HeaderError::Serde("unsupported header type: newtype struct".into()))
    }

    fn deserialize_tuple<V: Visitor<'de>>(
        self,
        _len: usize,
        _visitor: V,
    ) -> Result<V::Value, HeaderError> {
        Err(HeaderError::Serde("unsupported header type: tuple".into()))
    }

    fn deserialize_tuple_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        _len: usize,
        _visitor: V,
    ) -> Result<V::Value, HeaderError> {
        Err(HeaderError::Serde("unsupported header type: tuple struct".into()))
    }
}

struct FieldAccess<'a, R> {
    de: &'a mut Deserializer<R>,
}

impl<'de, 'a, R: Read> MapAccess<'de> for FieldAccess<'a, R> {
    type Error = HeaderError;

    fn next_key_seed<K: DeserializeSeed<'de>>(
        &mut self,
        seed: K,
    ) -> Result<Option<K::Value>, HeaderError> {
        self.de.field = self.de.next_field()?;

        self.de
            .field
            .as_ref()
            .map(|(key, _)| seed.deserialize(StringDeserializer::<HeaderError>::new(key.clone())))
            .transpose()
    }

    fn next_value_seed<V: DeserializeSeed<'de>>(&mut self, seed: V) -> Result<V::Value, HeaderError> {
        seed.deserialize(&mut *self.de)
    }
}
