//! Message traits and the binary body codec.
//!
//! TCPROS message bodies are little-endian: strings and unbounded arrays
//! carry a `u32` length prefix, fixed-size arrays are bare elements, and
//! `time`/`duration` are a pair of 32-bit integers. A complete message on
//! the wire is a 4-byte length followed by the encoded fields.
//!
//! Concrete message types are normally produced by the code generator from
//! loaded [MsgSpec](crate::msg::MsgSpec)s; hand-written implementations
//! only need [RosMsg] for the field codec plus the [Message] metadata.

use std::io;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

/// Field-level binary encoding.
pub trait RosMsg: Sized {
    fn encode<W: io::Write>(&self, w: W) -> io::Result<()>;
    fn decode<R: io::Read>(r: R) -> io::Result<Self>;
}

/// A complete ROS message type: the field codec plus the registration
/// metadata exchanged during connection handshakes.
pub trait Message: RosMsg + Clone + Default + Send + Sync + 'static {
    /// Full type name, `package/Name`.
    fn msg_type() -> String;
    /// Canonical MD5 checksum of the message definition.
    fn md5sum() -> String;
    /// Full definition text, as found in the `.msg` file.
    fn msg_definition() -> String;

    /// Encode into a length-prefixed TCPROS frame.
    fn encode_vec(&self) -> io::Result<Vec<u8>> {
        let mut buffer = vec![0u8; 4];
        self.encode(&mut buffer)?;
        let body_length = (buffer.len() - 4) as u32;
        buffer[..4].copy_from_slice(&body_length.to_le_bytes());
        Ok(buffer)
    }

    /// Decode from a length-prefixed TCPROS frame.
    fn decode_slice(bytes: &[u8]) -> io::Result<Self> {
        let prefix = bytes
            .get(..4)
            .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "missing frame length"))?;
        let body_length = u32::from_le_bytes(prefix.try_into().unwrap()) as usize;
        let body = bytes[4..]
            .get(..body_length)
            .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "truncated frame body"))?;
        Self::decode(body)
    }
}

/// A service type, tying together its request and response messages.
pub trait ServicePair: Clone + Send + Sync + 'static {
    type Request: Message;
    type Response: Message;

    /// Full service type name, `package/Name`.
    fn srv_type() -> String;
    /// Canonical MD5 checksum of the service definition.
    fn md5sum() -> String;
}

/// A point in time, seconds and nanoseconds since the epoch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Time {
    pub sec: i32,
    pub nsec: i32,
}

/// A signed span of time, seconds and nanoseconds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Duration {
    pub sec: i32,
    pub nsec: i32,
}

macro_rules! stamp_codec {
    ($($t:ty,)*) => {$(
        impl RosMsg for $t {
            fn encode<W: io::Write>(&self, mut w: W) -> io::Result<()> {
                w.write_i32::<LittleEndian>(self.sec)?;
                w.write_i32::<LittleEndian>(self.nsec)
            }

            fn decode<R: io::Read>(mut r: R) -> io::Result<Self> {
                Ok(Self {
                    sec: r.read_i32::<LittleEndian>()?,
                    nsec: r.read_i32::<LittleEndian>()?,
                })
            }
        }
    )*};
}

stamp_codec! {
    Time,
    Duration,
}

impl RosMsg for bool {
    fn encode<W: io::Write>(&self, mut w: W) -> io::Result<()> {
        w.write_u8(*self as u8)
    }

    fn decode<R: io::Read>(mut r: R) -> io::Result<Self> {
        Ok(r.read_u8()? != 0)
    }
}

impl RosMsg for u8 {
    fn encode<W: io::Write>(&self, mut w: W) -> io::Result<()> {
        w.write_u8(*self)
    }

    fn decode<R: io::Read>(mut r: R) -> io::Result<Self> {
        r.read_u8()
    }
}

impl RosMsg for i8 {
    fn encode<W: io::Write>(&self, mut w: W) -> io::Result<()> {
        w.write_i8(*self)
    }

    fn decode<R: io::Read>(mut r: R) -> io::Result<Self> {
        r.read_i8()
    }
}

macro_rules! numeric_codec {
    ($($t:ty => $read:ident / $write:ident,)*) => {$(
        impl RosMsg for $t {
            fn encode<W: io::Write>(&self, mut w: W) -> io::Result<()> {
                w.$write::<LittleEndian>(*self)
            }

            fn decode<R: io::Read>(mut r: R) -> io::Result<Self> {
                r.$read::<LittleEndian>()
            }
        }
    )*};
}

numeric_codec! {
    u16 => read_u16 / write_u16,
    i16 => read_i16 / write_i16,
    u32 => read_u32 / write_u32,
    i32 => read_i32 / write_i32,
    u64 => read_u64 / write_u64,
    i64 => read_i64 / write_i64,
    f32 => read_f32 / write_f32,
    f64 => read_f64 / write_f64,
}

impl RosMsg for String {
    fn encode<W: io::Write>(&self, mut w: W) -> io::Result<()> {
        w.write_u32::<LittleEndian>(self.len() as u32)?;
        w.write_all(self.as_bytes())
    }

    fn decode<R: io::Read>(mut r: R) -> io::Result<Self> {
        let length = r.read_u32::<LittleEndian>()? as usize;
        let mut buffer = vec![0u8; length];
        r.read_exact(&mut buffer)?;
        String::from_utf8(buffer)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

impl<T: RosMsg> RosMsg for Vec<T> {
    fn encode<W: io::Write>(&self, mut w: W) -> io::Result<()> {
        w.write_u32::<LittleEndian>(self.len() as u32)?;
        for item in self {
            item.encode(w.by_ref())?;
        }
        Ok(())
    }

    fn decode<R: io::Read>(mut r: R) -> io::Result<Self> {
        let length = r.read_u32::<LittleEndian>()? as usize;
        let mut items = Vec::with_capacity(length.min(4096));
        for _ in 0..length {
            items.push(T::decode(r.by_ref())?);
        }
        Ok(items)
    }
}

// Fixed-size arrays have no length prefix on the wire.
impl<T: RosMsg, const N: usize> RosMsg for [T; N] {
    fn encode<W: io::Write>(&self, mut w: W) -> io::Result<()> {
        for item in self {
            item.encode(w.by_ref())?;
        }
        Ok(())
    }

    fn decode<R: io::Read>(mut r: R) -> io::Result<Self> {
        let mut items = Vec::with_capacity(N);
        for _ in 0..N {
            items.push(T::decode(r.by_ref())?);
        }
        items
            .try_into()
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "fixed array length mismatch"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip<T: RosMsg + PartialEq + std::fmt::Debug>(value: T, expected_bytes: &[u8]) {
        let mut encoded = Vec::new();
        value.encode(&mut encoded).unwrap();
        assert_eq!(encoded, expected_bytes);
        assert_eq!(T::decode(encoded.as_slice()).unwrap(), value);
    }

    #[test]
    fn primitives_encode_little_endian() {
        round_trip(true, &[1]);
        round_trip(0x0102_i16, &[0x02, 0x01]);
        round_trip(0x01020304_u32, &[0x04, 0x03, 0x02, 0x01]);
        round_trip(1.5_f32, &1.5_f32.to_le_bytes());
        round_trip(-2.5_f64, &(-2.5_f64).to_le_bytes());
    }

    #[test]
    fn strings_carry_a_length_prefix() {
        round_trip("abc".to_string(), &[3, 0, 0, 0, b'a', b'b', b'c']);
        round_trip(String::new(), &[0, 0, 0, 0]);
    }

    #[test]
    fn unbounded_arrays_carry_a_length_prefix() {
        round_trip(vec![1u8, 2, 3], &[3, 0, 0, 0, 1, 2, 3]);
    }

    #[test]
    fn fixed_arrays_are_bare_elements() {
        round_trip([0x0102_u16, 0x0304], &[0x02, 0x01, 0x04, 0x03]);
    }

    #[test]
    fn stamps_are_two_words() {
        round_trip(Time { sec: 1, nsec: 2 }, &[1, 0, 0, 0, 2, 0, 0, 0]);
        round_trip(
            Duration { sec: -1, nsec: 0 },
            &[0xff, 0xff, 0xff, 0xff, 0, 0, 0, 0],
        );
    }

    #[test]
    fn decoding_a_truncated_string_fails() {
        let bytes = [10, 0, 0, 0, b'a'];
        assert!(String::decode(bytes.as_slice()).is_err());
    }
}
