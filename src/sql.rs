//! SQL identifier validation shared by the Postgres-backed components.

/// Check that a name is a plain SQL identifier (letters, digits, underscore,
/// dollar sign, not starting with a digit). Identifiers that pass can be
/// safely double-quoted into dynamic DDL.
pub(crate) fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    if !first.is_alphabetic() && first != '_' {
        return false;
    }
    chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$')
}

/// Quote a schema-qualified table name, rejecting anything that is not a
/// plain identifier. Dynamic table names always go through here; everything
/// else uses bound parameters.
pub(crate) fn quote_qualified(schema: &str, name: &str) -> Result<String, String> {
    for part in [schema, name] {
        if !is_valid_identifier(part) {
            return Err(format!(
                "invalid SQL identifier '{}': must contain only letters, numbers, \
                 underscores, and dollar signs, starting with a letter or underscore",
                part
            ));
        }
    }
    Ok(format!(r#""{}"."{}""#, schema, name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_identifiers() {
        assert!(is_valid_identifier("upgrade_ledger"));
        assert!(is_valid_identifier("_private"));
        assert!(is_valid_identifier("t$1"));
    }

    #[test]
    fn rejects_injection_shapes() {
        assert!(!is_valid_identifier(""));
        assert!(!is_valid_identifier("1table"));
        assert!(!is_valid_identifier("t;DROP TABLE x"));
        assert!(!is_valid_identifier("a\"b"));
    }

    #[test]
    fn quotes_qualified_names() {
        assert_eq!(
            quote_qualified("public", "upgrade_ledger").unwrap(),
            r#""public"."upgrade_ledger""#
        );
        assert!(quote_qualified("public", "bad name").is_err());
    }
}
