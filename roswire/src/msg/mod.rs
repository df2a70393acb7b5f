//! Loading of ROS interface definitions (`.msg`, `.srv`, `.action`) and
//! computation of their canonical MD5 checksums.
//!
//! The checksum algorithm must match the canonical ROS implementation
//! byte-for-byte; it is what both ends of a TCPROS handshake compare to
//! decide wire compatibility.

use std::fmt;

mod context;
mod md5sum;
mod parse;

pub use context::MsgContext;

#[derive(thiserror::Error, Debug)]
pub enum SpecError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("Syntax error in {name} line {line}: {message}")]
    Syntax {
        name: String,
        line: usize,
        message: String,
    },
    #[error("Definition of \"{0}\" was not found")]
    NotFound(String),
    #[error("Invalid interface name: \"{0}\"")]
    InvalidName(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArrayKind {
    Scalar,
    Unbounded,
    Fixed(usize),
}

/// A single field of a message definition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Field {
    /// Owning package of the field type. `None` for builtin types.
    pub package: Option<String>,
    pub ty: String,
    pub name: String,
    pub array: ArrayKind,
}

impl Field {
    pub fn is_builtin(&self) -> bool {
        self.package.is_none()
    }

    /// `package/Type` for compound fields, `None` for builtins.
    pub fn full_type(&self) -> Option<String> {
        self.package
            .as_ref()
            .map(|package| format!("{package}/{}", self.ty))
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(package) = &self.package {
            write!(f, "{package}/")?;
        }
        write!(f, "{}", self.ty)?;
        match self.array {
            ArrayKind::Scalar => {}
            ArrayKind::Unbounded => write!(f, "[]")?,
            ArrayKind::Fixed(n) => write!(f, "[{n}]")?,
        }
        write!(f, " {}", self.name)
    }
}

/// A constant declaration (`TYPE NAME = VALUE`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Constant {
    pub ty: String,
    pub name: String,
    /// Right-hand side as written in the source, untrimmed.
    pub value_text: String,
}

/// A parsed message definition.
#[derive(Clone, Debug)]
pub struct MsgSpec {
    pub package: String,
    pub short_name: String,
    pub full_name: String,
    /// Original definition text.
    pub text: String,
    pub fields: Vec<Field>,
    pub constants: Vec<Constant>,
    pub md5: String,
}

/// A parsed service definition: request and response message halves.
#[derive(Clone, Debug)]
pub struct SrvSpec {
    pub package: String,
    pub short_name: String,
    pub full_name: String,
    pub text: String,
    pub md5: String,
    pub request: MsgSpec,
    pub response: MsgSpec,
}

/// A parsed action definition.
///
/// `goal`, `result` and `feedback` come from the `.action` file; the
/// `action_*` specs are synthesized messages that wrap them with the
/// actionlib bookkeeping fields.
#[derive(Clone, Debug)]
pub struct ActionSpec {
    pub package: String,
    pub short_name: String,
    pub full_name: String,
    pub text: String,
    pub md5: String,
    pub goal: MsgSpec,
    pub result: MsgSpec,
    pub feedback: MsgSpec,
    pub action_goal: MsgSpec,
    pub action_result: MsgSpec,
    pub action_feedback: MsgSpec,
}

/// Split `package/Resource` into its halves. Names without a package part
/// resolve to an empty package.
pub(crate) fn package_resource_name(full_name: &str) -> Result<(String, String), SpecError> {
    match full_name.split_once('/') {
        Some((package, resource)) => {
            if package.is_empty() || resource.is_empty() || resource.contains('/') {
                return Err(SpecError::InvalidName(full_name.to_string()));
            }
            Ok((package.to_string(), resource.to_string()))
        }
        None if full_name.is_empty() => Err(SpecError::InvalidName(full_name.to_string())),
        None => Ok((String::new(), full_name.to_string())),
    }
}
