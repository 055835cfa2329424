//! SQL identifier quoting and statement helpers.

/// Quote a SQL identifier using ANSI double-quoting.
///
/// Embedded double-quotes are escaped by doubling them (`"` → `""`).
///
/// ```
/// use rowgraph_core::quote_ident;
///
/// assert_eq!(quote_ident("user"), "\"user\"");
/// assert_eq!(quote_ident("user\"name"), "\"user\"\"name\"");
/// ```
#[inline]
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Reverse of [`quote_ident`]; returns `None` for unquoted input.
pub fn unquote_ident(quoted: &str) -> Option<String> {
    let inner = quoted.strip_prefix('"')?.strip_suffix('"')?;
    Some(inner.replace("\"\"", "\""))
}

/// Positional placeholder for the `n`-th (1-based) parameter.
#[inline]
pub fn placeholder(n: usize) -> String {
    format!("${n}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_roundtrip_with_embedded_quote() {
        let quoted = quote_ident("we\"ird");
        assert_eq!(quoted, "\"we\"\"ird\"");
        assert_eq!(unquote_ident(&quoted).as_deref(), Some("we\"ird"));
    }

    #[test]
    fn unquote_rejects_bare_names() {
        assert_eq!(unquote_ident("user"), None);
    }

    #[test]
    fn placeholders_are_one_based() {
        assert_eq!(placeholder(1), "$1");
        assert_eq!(placeholder(12), "$12");
    }
}
