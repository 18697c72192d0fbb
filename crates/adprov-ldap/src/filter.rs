//! Search filter construction.

/// Escapes a value for inclusion in an LDAP search filter (RFC 4515).
///
/// The backslash is handled first by virtue of a single pass, so already-escaped sequences are
/// escaped again rather than passed through.
#[must_use]
pub fn sanitize(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '\\' => escaped.push_str("\\5c"),
            '*' => escaped.push_str("\\2a"),
            '(' => escaped.push_str("\\28"),
            ')' => escaped.push_str("\\29"),
            '\0' => escaped.push_str("\\00"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

/// Substitutes the sanitized `login` into every `{login}` placeholder of `template`.
#[must_use]
pub fn login_filter(template: &str, login: &str) -> String {
    template.replace("{login}", &sanitize(login))
}
