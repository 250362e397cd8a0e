/// Trims and uppercases a user-entered symbol and appends the default
/// exchange suffix when the symbol carries none. Index symbols (`^NSEI`)
/// are left alone.
pub fn normalize_ticker(raw: &str, default_suffix: Option<&str>) -> Option<String> {
    let mut ticker = raw.trim().to_ascii_uppercase();
    if ticker.is_empty() || ticker.len() > 32 {
        return None;
    }
    let valid = ticker
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '^' | '&' | '_' | '='));
    if !valid {
        return None;
    }

    if let Some(suffix) = default_suffix.map(str::trim).filter(|s| !s.is_empty()) {
        if !ticker.contains('.') && !ticker.starts_with('^') {
            let suffix = suffix.to_ascii_uppercase();
            if !suffix.starts_with('.') {
                ticker.push('.');
            }
            ticker.push_str(&suffix);
        }
    }
    Some(ticker)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_default_suffix() {
        assert_eq!(
            normalize_ticker(" reliance ", Some(".NS")),
            Some("RELIANCE.NS".to_string())
        );
        assert_eq!(normalize_ticker("tcs", Some("ns")), Some("TCS.NS".to_string()));
    }

    #[test]
    fn keeps_existing_suffix_and_indices() {
        assert_eq!(normalize_ticker("infy.bo", Some(".NS")), Some("INFY.BO".to_string()));
        assert_eq!(normalize_ticker("^nsei", Some(".NS")), Some("^NSEI".to_string()));
        assert_eq!(normalize_ticker("m&m", None), Some("M&M".to_string()));
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(normalize_ticker("   ", Some(".NS")), None);
        assert_eq!(normalize_ticker("DROP TABLE", None), None);
        assert_eq!(normalize_ticker("a/b", None), None);
    }
}
