//! SQL identifier checks.
//!
//! Table and element names end up interpolated into source queries, since
//! Postgres cannot bind identifiers. Only plain identifiers are accepted.

use kdvh_common::{MigrationError, MigrationResult};

const MAX_IDENT_LEN: usize = 63;

/// Accept `[A-Za-z_][A-Za-z0-9_]*` up to the Postgres identifier limit.
pub fn validate_ident(name: &str) -> MigrationResult<&str> {
    let mut chars = name.chars();
    let valid_start = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_');
    let valid_rest = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');

    if valid_start && valid_rest && name.len() <= MAX_IDENT_LEN {
        Ok(name)
    } else {
        Err(MigrationError::InvalidIdentifier(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_table_and_element_names() {
        for name in ["T_ADATA", "t_elem_obs", "ta", "OT_24", "_x1"] {
            assert_eq!(validate_ident(name).unwrap(), name);
        }
    }

    #[test]
    fn test_rejects_injection() {
        for name in ["", "1ta", "ta; DROP TABLE x", "ta--", "\"ta\"", "t a", "tä"] {
            assert!(validate_ident(name).is_err(), "{name:?}");
        }
        assert!(validate_ident(&"a".repeat(64)).is_err());
    }
}
