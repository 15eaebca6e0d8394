//! Identifier validation and quoting for destination DDL.
//!
//! User-chosen schema, table and column names cross a hard security boundary
//! here: every name is validated before any SQL is built, in every adapter.

use std::borrow::Cow;

use crate::bail;
use crate::error::{ErrorKind, SyncResult};

/// Validates a user-supplied schema, table or column name.
///
/// A valid identifier starts with a letter and contains only letters, digits,
/// spaces and underscores. Anything else is rejected before SQL is built;
/// values that look like injection payloads (a `;` followed by a `drop`
/// token) get an explicit callout in the message.
pub fn validate_identifier(name: &str) -> SyncResult<()> {
    let mut chars = name.chars();

    let valid = match chars.next() {
        Some(first) if first.is_ascii_alphabetic() => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ' ')
        }
        _ => false,
    };

    if valid {
        return Ok(());
    }

    if looks_like_injection(name) {
        bail!(
            ErrorKind::InvalidIdentifier,
            "Identifier looks like a SQL injection attempt",
            format!(
                "'{name}' contains a statement separator followed by a DROP keyword, a \
                 common SQL injection shape; identifiers must start with a letter and \
                 contain only letters, digits, spaces and underscores"
            )
        );
    }

    bail!(
        ErrorKind::InvalidIdentifier,
        "Identifier is invalid",
        format!(
            "'{name}' must start with a letter and contain only letters, digits, \
             spaces and underscores"
        )
    );
}

/// Quotes an identifier for use in SQL.
///
/// Names that are safe bare words (lowercase letters, digits, underscores,
/// leading letter) are rendered as-is; everything else is double-quoted with
/// embedded quotes doubled. Both destination families use double-quote
/// identifier quoting.
pub fn quote_identifier(name: &str) -> Cow<'_, str> {
    let mut chars = name.chars();
    let bare = match chars.next() {
        Some(first) if first.is_ascii_lowercase() => {
            chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        }
        _ => false,
    };

    if bare {
        Cow::Borrowed(name)
    } else {
        Cow::Owned(format!("\"{}\"", name.replace('"', "\"\"")))
    }
}

/// Returns a validated, quoted identifier in one step.
pub fn quoted(name: &str) -> SyncResult<Cow<'_, str>> {
    validate_identifier(name)?;
    Ok(quote_identifier(name))
}

fn looks_like_injection(name: &str) -> bool {
    let lowered = name.to_lowercase();
    let Some(separator) = lowered.find(';') else {
        return false;
    };

    lowered[separator + 1..]
        .split(|c: char| !c.is_ascii_alphanumeric())
        .any(|token| token == "drop")
}
