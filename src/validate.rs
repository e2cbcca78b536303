//! Normalization of channel names, usernames and tokens into their wire
//! format.

/// Normalize a channel name: lowercased, with a leading `#`.
///
/// Idempotent: `channel(channel(s)) == channel(s)`.
///
/// # Examples
///
/// ```
/// use tmi_client::validate::channel;
///
/// assert_eq!(channel("Pajlada"), "#pajlada");
/// assert_eq!(channel("#pajlada"), "#pajlada");
/// ```
pub fn channel(name: &str) -> String {
    let name = name.trim().to_lowercase();
    if name.starts_with('#') {
        name
    } else {
        format!("#{}", name)
    }
}

/// Normalize a username: lowercased, without a leading `#`.
pub fn username(name: &str) -> String {
    let name = name.trim().to_lowercase();
    match name.strip_prefix('#') {
        Some(rest) => rest.to_owned(),
        None => name,
    }
}

/// Normalize an OAuth token into the `oauth:`-prefixed form the `PASS`
/// command expects.
pub fn token(token: &str) -> String {
    if token.starts_with("oauth:") {
        token.to_owned()
    } else {
        format!("oauth:{}", token)
    }
}

/// Whether the given login name is an anonymous (`justinfan<digits>`)
/// login.
pub fn is_justinfan(login: &str) -> bool {
    match login.strip_prefix("justinfan") {
        Some(digits) => !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()),
        None => false,
    }
}
