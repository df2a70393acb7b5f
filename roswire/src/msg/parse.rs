//! Line-level parsing of the `.msg` grammar.

use super::{ArrayKind, Constant, Field};

/// Builtin field types, hashed by their canonical spelling. `char` and
/// `byte` are legacy aliases of `uint8`/`int8` but keep their own spelling
/// in checksum texts.
const BUILTIN_TYPES: &[&str] = &[
    "bool", "int8", "uint8", "int16", "uint16", "int32", "uint32", "int64", "uint64", "float32",
    "float64", "string", "time", "duration", "char", "byte",
];

/// Package that the bare `Header` alias resolves into.
const HEADER_PACKAGE: &str = "std_msgs";
const HEADER_TYPE: &str = "Header";

pub fn is_builtin(ty: &str) -> bool {
    BUILTIN_TYPES.contains(&ty)
}

/// Cut a line at the first `#`.
pub fn strip_comment(line: &str) -> &str {
    match line.find('#') {
        Some(idx) => &line[..idx],
        None => line,
    }
}

fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Parse a constant declaration from the original (un-stripped) line.
///
/// The declaration is recognized beforehand by the presence of `=` in the
/// comment-stripped line. String constants keep the raw right-hand side
/// verbatim, including anything that looks like a comment; all other types
/// take the comment-stripped, trimmed value.
pub fn parse_constant(orig_line: &str) -> Result<Constant, String> {
    let clean = strip_comment(orig_line);
    let (lhs, clean_value) = clean
        .split_once('=')
        .ok_or_else(|| "missing '=' in constant declaration".to_string())?;

    let mut tokens = lhs.split_whitespace();
    let ty = tokens.next().ok_or("missing constant type")?;
    let name = tokens.next().ok_or("missing constant name")?;
    if tokens.next().is_some() {
        return Err(format!("unexpected token before '=' in \"{}\"", clean.trim()));
    }

    if !is_builtin(ty) || ty == "time" || ty == "duration" {
        return Err(format!("constants cannot have type \"{ty}\""));
    }
    if !is_valid_identifier(name) {
        return Err(format!("invalid constant name \"{name}\""));
    }

    let value_text = if ty == "string" {
        // Comments are not stripped from string constants.
        orig_line.split_once('=').unwrap().1.to_string()
    } else {
        clean_value.trim().to_string()
    };

    Ok(Constant {
        ty: ty.to_string(),
        name: name.to_string(),
        value_text,
    })
}

fn parse_array_suffix(type_token: &str) -> Result<(&str, ArrayKind), String> {
    match type_token.find('[') {
        None => Ok((type_token, ArrayKind::Scalar)),
        Some(idx) => {
            let (base, suffix) = type_token.split_at(idx);
            let inner = suffix
                .strip_prefix('[')
                .and_then(|s| s.strip_suffix(']'))
                .ok_or_else(|| format!("malformed array suffix in \"{type_token}\""))?;
            if inner.is_empty() {
                return Ok((base, ArrayKind::Unbounded));
            }
            let size: usize = inner
                .parse()
                .map_err(|_| format!("invalid array size in \"{type_token}\""))?;
            Ok((base, ArrayKind::Fixed(size)))
        }
    }
}

/// Parse a field declaration (`TYPE NAME`) from a comment-stripped line.
///
/// Unqualified compound types belong to `local_package`; the bare `Header`
/// spelling is an alias for `std_msgs/Header`.
pub fn parse_field(clean_line: &str, local_package: &str) -> Result<Field, String> {
    let mut tokens = clean_line.split_whitespace();
    let type_token = tokens.next().ok_or("missing field type")?;
    let name = tokens.next().ok_or("missing field name")?;
    if tokens.next().is_some() {
        return Err(format!("unexpected token in field \"{clean_line}\""));
    }
    if !is_valid_identifier(name) {
        return Err(format!("invalid field name \"{name}\""));
    }

    let (base, array) = parse_array_suffix(type_token)?;

    let (package, ty) = match base.split_once('/') {
        Some((package, ty)) if !package.is_empty() && !ty.is_empty() => {
            (Some(package.to_string()), ty.to_string())
        }
        Some(_) => return Err(format!("malformed field type \"{base}\"")),
        None if base == HEADER_TYPE => (Some(HEADER_PACKAGE.to_string()), HEADER_TYPE.to_string()),
        None if is_builtin(base) => (None, base.to_string()),
        None => (Some(local_package.to_string()), base.to_string()),
    };

    Ok(Field {
        package,
        ty,
        name: name.to_string(),
        array,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_builtin_fields() {
        let field = parse_field("uint32 seq", "std_msgs").unwrap();
        assert_eq!(field.package, None);
        assert_eq!(field.ty, "uint32");
        assert_eq!(field.name, "seq");
        assert_eq!(field.array, ArrayKind::Scalar);
    }

    #[test]
    fn parses_array_suffixes() {
        let field = parse_field("float64[] positions", "test_pkg").unwrap();
        assert_eq!(field.array, ArrayKind::Unbounded);

        let field = parse_field("uint8[16] digest", "test_pkg").unwrap();
        assert_eq!(field.array, ArrayKind::Fixed(16));

        assert!(parse_field("uint8[x] digest", "test_pkg").is_err());
    }

    #[test]
    fn qualifies_compound_fields() {
        let field = parse_field("geometry_msgs/Point position", "nav_pkg").unwrap();
        assert_eq!(field.full_type().as_deref(), Some("geometry_msgs/Point"));

        let field = parse_field("Header header", "nav_pkg").unwrap();
        assert_eq!(field.full_type().as_deref(), Some("std_msgs/Header"));

        let field = parse_field("LocalType value", "nav_pkg").unwrap();
        assert_eq!(field.full_type().as_deref(), Some("nav_pkg/LocalType"));
    }

    #[test]
    fn parses_numeric_constants() {
        let constant = parse_constant("int32 ANSWER = 42 # the answer").unwrap();
        assert_eq!(constant.ty, "int32");
        assert_eq!(constant.name, "ANSWER");
        assert_eq!(constant.value_text, "42");
    }

    #[test]
    fn string_constants_keep_the_raw_value() {
        let constant = parse_constant("string GREETING=hello # not a comment").unwrap();
        assert_eq!(constant.value_text, "hello # not a comment");
    }

    #[test]
    fn rejects_stamp_constants() {
        assert!(parse_constant("time NOW = 0").is_err());
        assert!(parse_constant("duration SOON = 1").is_err());
    }
}
