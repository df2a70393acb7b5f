//! The TCPROS transport: connection headers, compatibility validation and
//! the data-channel implementations behind publishers, subscribers and
//! services.

use std::{io, time::Duration};

use tokio::io::AsyncReadExt;

use crate::message::{Message, ServicePair};

pub mod header;
pub mod publication;
pub mod service;
pub mod subscription;

/// Protocol name offered during topic negotiation.
pub const TCPROS_PROTOCOL: &str = "TCPROS";

/// Wildcard accepted for any md5sum/type during a handshake probe.
pub const ROS_WILDCARD: &str = "*";

/// Time allowed for completing a connection handshake, both directions.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(thiserror::Error, Debug)]
pub enum CompatibilityError {
    #[error("Md5sum mismatch: {expected} != {actual}")]
    Md5 { expected: String, actual: String },
    #[error("Type mismatch: {expected} != {actual}")]
    Type { expected: String, actual: String },
    #[error("Topic mismatch: {expected} != {actual}")]
    Topic { expected: String, actual: String },
}

fn fields_match(lhs: &str, rhs: &str) -> bool {
    lhs == rhs || lhs == ROS_WILDCARD || rhs == ROS_WILDCARD
}

/// A topic name plus the message metadata negotiated for it.
#[derive(Clone, Debug)]
pub struct Topic {
    pub name: String,
    pub spec: TopicSpec,
}

impl Topic {
    pub fn new<T: Message>(name: impl Into<String>) -> Self {
        Topic {
            name: name.into(),
            spec: TopicSpec {
                md5sum: T::md5sum(),
                msg_type: T::msg_type(),
                msg_definition: T::msg_definition(),
            },
        }
    }
}

#[derive(Clone, Debug)]
pub struct TopicSpec {
    pub md5sum: String,
    pub msg_type: String,
    pub msg_definition: String,
}

impl TopicSpec {
    /// Check a peer's advertised checksum and type against ours,
    /// honoring the `*` wildcard on either side.
    pub fn validate(&self, md5sum: &str, msg_type: &str) -> Result<(), CompatibilityError> {
        if !fields_match(&self.md5sum, md5sum) {
            return Err(CompatibilityError::Md5 {
                expected: self.md5sum.clone(),
                actual: md5sum.to_string(),
            });
        }

        if !fields_match(&self.msg_type, msg_type) {
            return Err(CompatibilityError::Type {
                expected: self.msg_type.clone(),
                actual: msg_type.to_string(),
            });
        }

        Ok(())
    }
}

/// A service name plus the metadata negotiated for it.
#[derive(Clone, Debug)]
pub struct Service {
    pub name: String,
    pub spec: ServiceSpec,
}

impl Service {
    pub fn new<T: ServicePair>(name: impl Into<String>) -> Self {
        Service {
            name: name.into(),
            spec: ServiceSpec {
                md5sum: T::md5sum(),
                srv_type: T::srv_type(),
            },
        }
    }
}

#[derive(Clone, Debug)]
pub struct ServiceSpec {
    pub md5sum: String,
    pub srv_type: String,
}

impl ServiceSpec {
    pub fn validate(&self, md5sum: &str, srv_type: &str) -> Result<(), CompatibilityError> {
        if !fields_match(&self.md5sum, md5sum) {
            return Err(CompatibilityError::Md5 {
                expected: self.md5sum.clone(),
                actual: md5sum.to_string(),
            });
        }

        if !fields_match(&self.srv_type, srv_type) {
            return Err(CompatibilityError::Type {
                expected: self.srv_type.clone(),
                actual: srv_type.to_string(),
            });
        }

        Ok(())
    }
}

/// Read one length-prefixed TCPROS frame, returning the buffer with its
/// 4-byte prefix intact so it can be handed to `decode_slice` as-is.
pub async fn read_frame<R>(reader: &mut R) -> Result<Vec<u8>, io::Error>
where
    R: AsyncReadExt + Unpin,
{
    let body_length = reader.read_u32_le().await?;

    let mut buffer = vec![0u8; body_length as usize + 4];
    buffer[..4].copy_from_slice(&body_length.to_le_bytes());
    reader.read_exact(&mut buffer[4..]).await?;

    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(md5sum: &str, msg_type: &str) -> TopicSpec {
        TopicSpec {
            md5sum: md5sum.into(),
            msg_type: msg_type.into(),
            msg_definition: String::new(),
        }
    }

    #[test]
    fn matching_specs_validate() {
        let ours = spec("992ce8a1687cec8c8bd883ec73ca41d1", "std_msgs/String");
        assert!(ours
            .validate("992ce8a1687cec8c8bd883ec73ca41d1", "std_msgs/String")
            .is_ok());
    }

    #[test]
    fn wildcards_match_anything() {
        let ours = spec("992ce8a1687cec8c8bd883ec73ca41d1", "std_msgs/String");
        assert!(ours.validate(ROS_WILDCARD, ROS_WILDCARD).is_ok());
        assert!(ours.validate(ROS_WILDCARD, "std_msgs/String").is_ok());
    }

    #[test]
    fn md5_mismatch_is_rejected() {
        let ours = spec("992ce8a1687cec8c8bd883ec73ca41d1", "std_msgs/String");
        assert!(matches!(
            ours.validate("da5909fbe378aeaf85e547e830cc1bb7", "std_msgs/String"),
            Err(CompatibilityError::Md5 { .. })
        ));
    }

    #[test]
    fn type_mismatch_is_rejected() {
        let ours = spec("992ce8a1687cec8c8bd883ec73ca41d1", "std_msgs/String");
        assert!(matches!(
            ours.validate("992ce8a1687cec8c8bd883ec73ca41d1", "std_msgs/Int32"),
            Err(CompatibilityError::Type { .. })
        ));
    }
}
