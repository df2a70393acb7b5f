//! Canonical MD5 checksum computation.
//!
//! The checksum text is rebuilt from the parsed spec rather than the raw
//! file, which is what makes it stable under comment and whitespace edits:
//! constants first in source order as `TYPE NAME=VALUE`, then fields in
//! source order, with every compound field replaced by the checksum of its
//! own definition.

use md5::{Digest, Md5};

use super::{MsgContext, MsgSpec, SpecError};

/// Build the canonical checksum text for a message.
///
/// Compound field types are loaded (and hashed) recursively through the
/// context as needed.
pub fn md5_text(ctx: &mut MsgContext, spec: &MsgSpec) -> Result<String, SpecError> {
    let mut lines = Vec::with_capacity(spec.constants.len() + spec.fields.len());

    for constant in &spec.constants {
        lines.push(format!(
            "{} {}={}",
            constant.ty,
            constant.name,
            constant.value_text.trim()
        ));
    }

    for field in &spec.fields {
        match field.full_type() {
            // Builtins keep their declaration, array suffix included.
            None => lines.push(field.to_string()),
            // Compound fields collapse to `<md5> name`, suffix dropped.
            Some(dep_name) => {
                let dep = ctx.load_msg(&dep_name)?;
                lines.push(format!("{} {}", dep.md5, field.name));
            }
        }
    }

    Ok(lines.join("\n").trim_matches('\n').to_string())
}

fn hex_digest(parts: &[&str]) -> String {
    let mut hasher = Md5::new();
    for part in parts {
        hasher.update(part.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

pub fn compute_msg_md5(ctx: &mut MsgContext, spec: &MsgSpec) -> Result<String, SpecError> {
    Ok(hex_digest(&[&md5_text(ctx, spec)?]))
}

/// The service checksum hashes the concatenated request and response
/// checksum texts (the texts themselves, not their digests).
pub fn compute_srv_md5(
    ctx: &mut MsgContext,
    request: &MsgSpec,
    response: &MsgSpec,
) -> Result<String, SpecError> {
    let request_text = md5_text(ctx, request)?;
    let response_text = md5_text(ctx, response)?;
    Ok(hex_digest(&[&request_text, &response_text]))
}

/// The action checksum hashes the concatenated checksum texts of the three
/// synthesized top-level messages, in goal / feedback / result order.
pub fn compute_action_md5(
    ctx: &mut MsgContext,
    action_goal: &MsgSpec,
    action_feedback: &MsgSpec,
    action_result: &MsgSpec,
) -> Result<String, SpecError> {
    let goal_text = md5_text(ctx, action_goal)?;
    let feedback_text = md5_text(ctx, action_feedback)?;
    let result_text = md5_text(ctx, action_result)?;
    Ok(hex_digest(&[&goal_text, &feedback_text, &result_text]))
}
