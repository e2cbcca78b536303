use super::AsRawIRC;
use std::fmt;

/// The "prefix" part of an IRC message, naming its source.
///
/// On Twitch this is either a bare host (`tmi.twitch.tv`, or the legacy
/// service user `jtv`), or the `nick[!user]@host` form for messages
/// originating from a chatting user. RFC 2812 additionally allows a
/// nickname without a host, but that form never appears on Twitch and is
/// indistinguishable from a bare host, so a prefix without `@` is always
/// read as host-only.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum IRCPrefix {
    /// A sending server or service.
    HostOnly {
        /// `host` part of the prefix
        host: String,
    },
    /// A sending user.
    Full {
        /// `nick` part of the prefix
        nick: String,
        /// `user` part of the prefix, absent in the `nick@host` form
        user: Option<String>,
        /// `host` part of the prefix
        host: String,
    },
}

impl IRCPrefix {
    /// Parse the `IRCPrefix` from the given string slice. `source` should be
    /// specified without the leading `:` present in full IRC messages.
    ///
    /// # Examples
    ///
    /// ```
    /// use tmi_client::message::IRCPrefix;
    ///
    /// let prefix = IRCPrefix::parse("pajbot!pajbot@pajbot.tmi.twitch.tv");
    /// assert_eq!(prefix.nick(), Some("pajbot"));
    ///
    /// let prefix = IRCPrefix::parse("tmi.twitch.tv");
    /// assert!(prefix.is_host("tmi.twitch.tv"));
    /// ```
    pub fn parse(source: &str) -> IRCPrefix {
        let Some((sender, host)) = source.split_once('@') else {
            return IRCPrefix::HostOnly {
                host: source.to_owned(),
            };
        };

        // the part before the @ is "nick" or "nick!user"
        let (nick, user) = match sender.split_once('!') {
            Some((nick, user)) => (nick, Some(user.to_owned())),
            None => (sender, None),
        };

        IRCPrefix::Full {
            nick: nick.to_owned(),
            user,
            host: host.to_owned(),
        }
    }

    /// The sending user's nickname, if this prefix has the full form.
    pub fn nick(&self) -> Option<&str> {
        match self {
            IRCPrefix::HostOnly { .. } => None,
            IRCPrefix::Full { nick, .. } => Some(nick),
        }
    }

    /// Whether this prefix names the given host or service user, e.g.
    /// `tmi.twitch.tv` or `jtv`.
    pub fn is_host(&self, name: &str) -> bool {
        matches!(self, IRCPrefix::HostOnly { host } if host == name)
    }
}

impl AsRawIRC for IRCPrefix {
    fn format_as_raw_irc(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HostOnly { host } => f.write_str(host),
            Self::Full {
                nick,
                user: Some(user),
                host,
            } => write!(f, "{}!{}@{}", nick, user, host),
            Self::Full {
                nick,
                user: None,
                host,
            } => write!(f, "{}@{}", nick, host),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_server() {
        let prefix = IRCPrefix::parse("tmi.twitch.tv");
        assert!(prefix.is_host("tmi.twitch.tv"));
        assert!(!prefix.is_host("jtv"));
        assert_eq!(prefix.nick(), None);
    }

    #[test]
    fn test_parse_jtv() {
        assert!(IRCPrefix::parse("jtv").is_host("jtv"));
    }

    #[test]
    fn test_parse_chatting_user() {
        let prefix = IRCPrefix::parse("pajbot!pajbot@pajbot.tmi.twitch.tv");
        assert_eq!(
            prefix,
            IRCPrefix::Full {
                nick: "pajbot".to_owned(),
                user: Some("pajbot".to_owned()),
                host: "pajbot.tmi.twitch.tv".to_owned(),
            }
        );
        assert_eq!(prefix.nick(), Some("pajbot"));
        assert!(!prefix.is_host("pajbot.tmi.twitch.tv"));
    }

    #[test]
    fn test_parse_without_user() {
        assert_eq!(
            IRCPrefix::parse("pajbot@pajbot.tmi.twitch.tv"),
            IRCPrefix::Full {
                nick: "pajbot".to_owned(),
                user: None,
                host: "pajbot.tmi.twitch.tv".to_owned(),
            }
        );
    }

    #[test]
    fn test_round_trips() {
        for source in [
            "tmi.twitch.tv",
            "jtv",
            "pajbot!pajbot@pajbot.tmi.twitch.tv",
            "pajbot@pajbot.tmi.twitch.tv",
        ] {
            assert_eq!(IRCPrefix::parse(source).as_raw_irc(), source);
        }
    }
}
