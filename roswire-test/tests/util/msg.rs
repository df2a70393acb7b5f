// Hard-coded message types matching their std_msgs / rospy_tutorials
// definitions; a code generator would normally emit these from the
// loaded specs.

use roswire::{Message, RosMsg, ServicePair};

#[derive(Default, Clone, Debug, PartialEq)]
pub struct RosString {
    pub data: String,
}

impl Message for RosString {
    #[inline]
    fn msg_type() -> String {
        "std_msgs/String".into()
    }
    #[inline]
    fn md5sum() -> String {
        "992ce8a1687cec8c8bd883ec73ca41d1".into()
    }
    #[inline]
    fn msg_definition() -> String {
        "string data\n".into()
    }
}

impl RosMsg for RosString {
    fn encode<W: std::io::Write>(&self, mut w: W) -> std::io::Result<()> {
        self.data.encode(w.by_ref())
    }
    fn decode<R: std::io::Read>(mut r: R) -> std::io::Result<Self> {
        Ok(Self {
            data: RosMsg::decode(r.by_ref())?,
        })
    }
}

#[derive(Default, Clone, Copy, Debug, PartialEq)]
pub struct RosInt32 {
    pub data: i32,
}

impl Message for RosInt32 {
    #[inline]
    fn msg_type() -> String {
        "std_msgs/Int32".into()
    }
    #[inline]
    fn md5sum() -> String {
        "da5909fbe378aeaf85e547e830cc1bb7".into()
    }
    #[inline]
    fn msg_definition() -> String {
        "int32 data\n".into()
    }
}

impl RosMsg for RosInt32 {
    fn encode<W: std::io::Write>(&self, mut w: W) -> std::io::Result<()> {
        self.data.encode(w.by_ref())
    }
    fn decode<R: std::io::Read>(mut r: R) -> std::io::Result<Self> {
        Ok(Self {
            data: RosMsg::decode(r.by_ref())?,
        })
    }
}

#[derive(Default, Clone, Debug, PartialEq)]
pub struct TwoIntsReq {
    pub a: i64,
    pub b: i64,
}

impl Message for TwoIntsReq {
    #[inline]
    fn msg_type() -> String {
        "test_msgs/TwoIntsRequest".into()
    }
    #[inline]
    fn md5sum() -> String {
        "36d09b846be0b371c5f190354dd3153e".into()
    }
    #[inline]
    fn msg_definition() -> String {
        "int64 a\nint64 b\n".into()
    }
}

impl RosMsg for TwoIntsReq {
    fn encode<W: std::io::Write>(&self, mut w: W) -> std::io::Result<()> {
        self.a.encode(w.by_ref())?;
        self.b.encode(w.by_ref())
    }
    fn decode<R: std::io::Read>(mut r: R) -> std::io::Result<Self> {
        Ok(Self {
            a: RosMsg::decode(r.by_ref())?,
            b: RosMsg::decode(r.by_ref())?,
        })
    }
}

#[derive(Default, Clone, Debug, PartialEq)]
pub struct TwoIntsRes {
    pub sum: i64,
}

impl Message for TwoIntsRes {
    #[inline]
    fn msg_type() -> String {
        "test_msgs/TwoIntsResponse".into()
    }
    #[inline]
    fn md5sum() -> String {
        "b88405221c77b1878a3cbbfff53428d7".into()
    }
    #[inline]
    fn msg_definition() -> String {
        "int64 sum\n".into()
    }
}

impl RosMsg for TwoIntsRes {
    fn encode<W: std::io::Write>(&self, mut w: W) -> std::io::Result<()> {
        self.sum.encode(w.by_ref())
    }
    fn decode<R: std::io::Read>(mut r: R) -> std::io::Result<Self> {
        Ok(Self {
            sum: RosMsg::decode(r.by_ref())?,
        })
    }
}

#[derive(Default, Clone, Debug)]
pub struct TwoInts;

impl ServicePair for TwoInts {
    type Request = TwoIntsReq;
    type Response = TwoIntsRes;

    #[inline]
    fn srv_type() -> String {
        "test_msgs/TwoInts".into()
    }
    #[inline]
    fn md5sum() -> String {
        "6a2e34150c00229791cc89ff309fff21".into()
    }
}
