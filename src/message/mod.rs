//! Generic IRCv3 messages and the line-level parser.

pub(crate) mod prefix;
pub(crate) mod tags;

pub use prefix::IRCPrefix;
pub use tags::{BadgeList, EmoteList, IRCTags, TagValue};

use std::fmt;
use std::fmt::Write;
use thiserror::Error;

/// Error while parsing a string into an `IRCMessage`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum IRCParseError {
    /// No space found after tags (no command/prefix)
    #[error("No space found after tags (no command/prefix)")]
    NoSpaceAfterTags,
    /// No space found after prefix (no command)
    #[error("No space found after prefix (no command)")]
    NoSpaceAfterPrefix,
    /// No command found after tags and prefix
    #[error("No command found after tags and prefix")]
    MissingCommand,
}

struct RawIRCDisplay<'a, T: AsRawIRC>(&'a T);

impl<'a, T: AsRawIRC> fmt::Display for RawIRCDisplay<'a, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.format_as_raw_irc(f)
    }
}

/// Anything that can be converted into the raw IRC wire format.
pub trait AsRawIRC {
    /// Writes the raw IRC message to the given formatter.
    fn format_as_raw_irc(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result;
    /// Creates a new string with the raw IRC message.
    ///
    /// The output is guaranteed to parse to the same value it was created
    /// from, but due to protocol ambiguity it is not guaranteed to be
    /// byte-identical to the line the value was parsed from (tag order may
    /// differ, a trailing parameter may gain a `:`).
    fn as_raw_irc(&self) -> String
    where
        Self: Sized,
    {
        format!("{}", RawIRCDisplay(self))
    }
}

/// A protocol-level IRC message, with arbitrary command, parameters, tags
/// and prefix.
///
/// See [RFC 2812, section 2.3.1](https://tools.ietf.org/html/rfc2812#section-2.3.1)
/// for the message format that this is based on.
/// Further, this implements [IRCv3 tags](https://ircv3.net/specs/extensions/message-tags.html).
///
/// Equality disregards the `raw` field, so a parsed message compares equal
/// to its re-serialized round trip.
#[derive(Debug, Clone)]
pub struct IRCMessage {
    /// The original line this message was parsed from. Empty for messages
    /// built by this crate for sending.
    pub raw: String,
    /// A map of additional key-value tags on this message.
    pub tags: IRCTags,
    /// The "prefix" of this message, as defined by RFC 2812. Typically
    /// specifies the sending server and/or user.
    pub prefix: Option<IRCPrefix>,
    /// A command like `PRIVMSG` or `001` (see RFC 2812 for the definition).
    pub command: String,
    /// A list of parameters on this IRC message. Middle parameters and
    /// trailing parameters are treated the same here; the trailing
    /// parameter, if any, is always last.
    pub params: Vec<String>,
}

impl PartialEq for IRCMessage {
    fn eq(&self, other: &Self) -> bool {
        self.tags == other.tags
            && self.prefix == other.prefix
            && self.command == other.command
            && self.params == other.params
    }
}

impl Eq for IRCMessage {}

/// Allows quick creation of simple IRC messages using a command and optional
/// parameters.
///
/// # Example
///
/// ```
/// use tmi_client::irc;
/// use tmi_client::message::AsRawIRC;
///
/// # fn main() {
/// let msg = irc!["PRIVMSG", "#sodapoppin", "Hello guys!"];
///
/// assert_eq!(msg.command, "PRIVMSG");
/// assert_eq!(msg.as_raw_irc(), "PRIVMSG #sodapoppin :Hello guys!");
/// # }
/// ```
#[macro_export]
macro_rules! irc {
    ($command:expr $(, $argument:expr )* ) => {
        {
            #[allow(unused_mut)]
            let mut params: Vec<String> = Vec::new();
            $(
                params.push(String::from($argument));
            )*
            $crate::message::IRCMessage::new_simple(String::from($command), params)
        }
    };
}

impl IRCMessage {
    /// Create a new `IRCMessage` with just a command and parameters, similar
    /// to the `irc!` macro.
    pub fn new_simple(command: String, params: Vec<String>) -> IRCMessage {
        IRCMessage {
            raw: String::new(),
            tags: IRCTags::new(),
            prefix: None,
            command,
            params,
        }
    }

    /// Create a new `IRCMessage` by specifying all fields.
    pub fn new(
        tags: IRCTags,
        prefix: Option<IRCPrefix>,
        command: String,
        params: Vec<String>,
    ) -> IRCMessage {
        IRCMessage {
            raw: String::new(),
            tags,
            prefix,
            command,
            params,
        }
    }

    /// Parse a raw IRC wire-format line into an `IRCMessage`. `source`
    /// should be specified without trailing newline character(s).
    ///
    /// The scan is strictly positional: an optional `@tags` block, runs of
    /// spaces, an optional `:prefix`, the command, then space-delimited
    /// parameters where a parameter introduced by `:` consumes the entire
    /// remainder verbatim.
    ///
    /// Tag values are left in their escaped wire form here, see
    /// [`IRCTags::normalize`].
    pub fn parse(source: &str) -> Result<IRCMessage, IRCParseError> {
        let mut rest = source;

        let tags = if let Some(after_at) = rest.strip_prefix('@') {
            let (tags_part, remainder) = after_at
                .split_once(' ')
                .ok_or(IRCParseError::NoSpaceAfterTags)?;
            rest = remainder;

            if tags_part.is_empty() {
                IRCTags::new()
            } else {
                IRCTags::parse(tags_part)
            }
        } else {
            IRCTags::new()
        };

        rest = rest.trim_start_matches(' ');

        let prefix = if let Some(after_colon) = rest.strip_prefix(':') {
            let (prefix_part, remainder) = after_colon
                .split_once(' ')
                .ok_or(IRCParseError::NoSpaceAfterPrefix)?;
            rest = remainder.trim_start_matches(' ');

            if prefix_part.is_empty() {
                None
            } else {
                Some(IRCPrefix::parse(prefix_part))
            }
        } else {
            None
        };

        let (command, params_part) = match rest.split_once(' ') {
            Some((command, remainder)) => (command, Some(remainder)),
            None => (rest, None),
        };
        if command.is_empty() {
            return Err(IRCParseError::MissingCommand);
        }

        let mut params = vec![];
        if let Some(mut rest) = params_part {
            loop {
                rest = rest.trim_start_matches(' ');
                if rest.is_empty() {
                    break;
                }

                if let Some(trailing) = rest.strip_prefix(':') {
                    // trailing param, remove : and consume the rest of the input
                    params.push(trailing.to_owned());
                    break;
                }

                match rest.split_once(' ') {
                    Some((param, remainder)) => {
                        params.push(param.to_owned());
                        rest = remainder;
                    }
                    None => {
                        params.push(rest.to_owned());
                        break;
                    }
                }
            }
        }

        Ok(IRCMessage {
            raw: source.to_owned(),
            tags,
            prefix,
            command: command.to_owned(),
            params,
        })
    }
}

impl AsRawIRC for IRCMessage {
    fn format_as_raw_irc(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.tags.0.is_empty() {
            f.write_char('@')?;
            self.tags.format_as_raw_irc(f)?;
            f.write_char(' ')?;
        }

        if let Some(prefix) = &self.prefix {
            f.write_char(':')?;
            prefix.format_as_raw_irc(f)?;
            f.write_char(' ')?;
        }

        f.write_str(&self.command)?;

        for (i, param) in self.params.iter().enumerate() {
            // a final /command payload must reach the server as a trailing
            // parameter
            let chat_command = i == self.params.len() - 1 && param.starts_with('/');
            if !param.contains(' ') && !param.is_empty() && !param.starts_with(':') && !chat_command
            {
                // middle parameter
                write!(f, " {}", param)?;
            } else {
                // trailing parameter
                write!(f, " :{}", param)?;
                break;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::TagValue::{Bool, Str};
    use maplit::hashmap;

    #[test]
    fn test_privmsg() {
        let source = "@rm-received-ts=1577040815136;historical=1;badge-info=subscriber/16;badges=moderator/1,subscriber/12;color=#19E6E6;display-name=randers;emotes=;flags=;id=6e2ccb1f-01ed-44d0-85b6-edf762524475;mod=1;room-id=11148817;subscriber=1;tmi-sent-ts=1577040814959;turbo=0;user-id=40286300;user-type=mod :randers!randers@randers.tmi.twitch.tv PRIVMSG #pajlada :Pajapains";
        let message = IRCMessage::parse(source).unwrap();
        assert_eq!(
            message,
            IRCMessage {
                raw: source.to_owned(),
                tags: IRCTags::from(hashmap! {
                    "display-name".to_owned() => Str("randers".to_owned()),
                    "tmi-sent-ts".to_owned() => Str("1577040814959".to_owned()),
                    "historical".to_owned() => Str("1".to_owned()),
                    "room-id".to_owned() => Str("11148817".to_owned()),
                    "emotes".to_owned() => Str("".to_owned()),
                    "color".to_owned() => Str("#19E6E6".to_owned()),
                    "id".to_owned() => Str("6e2ccb1f-01ed-44d0-85b6-edf762524475".to_owned()),
                    "turbo".to_owned() => Str("0".to_owned()),
                    "flags".to_owned() => Str("".to_owned()),
                    "user-id".to_owned() => Str("40286300".to_owned()),
                    "rm-received-ts".to_owned() => Str("1577040815136".to_owned()),
                    "user-type".to_owned() => Str("mod".to_owned()),
                    "subscriber".to_owned() => Str("1".to_owned()),
                    "badges".to_owned() => Str("moderator/1,subscriber/12".to_owned()),
                    "badge-info".to_owned() => Str("subscriber/16".to_owned()),
                    "mod".to_owned() => Str("1".to_owned()),
                }),
                prefix: Some(IRCPrefix::Full {
                    nick: "randers".to_owned(),
                    user: Some("randers".to_owned()),
                    host: "randers.tmi.twitch.tv".to_owned(),
                }),
                command: "PRIVMSG".to_owned(),
                params: vec!["#pajlada".to_owned(), "Pajapains".to_owned()],
            }
        );
        assert_eq!(IRCMessage::parse(&message.as_raw_irc()).unwrap(), message);
    }

    #[test]
    fn test_raw_is_preserved() {
        let source = ":tmi.twitch.tv PING";
        assert_eq!(IRCMessage::parse(source).unwrap().raw, source);
    }

    #[test]
    fn test_confusing_prefix_trailing_param() {
        let source = ":coolguy foo bar baz asdf";
        let message = IRCMessage::parse(source).unwrap();
        assert_eq!(
            message.prefix,
            Some(IRCPrefix::HostOnly {
                host: "coolguy".to_owned()
            })
        );
        assert_eq!(message.command, "foo");
        assert_eq!(
            message.params,
            vec!["bar".to_owned(), "baz".to_owned(), "asdf".to_owned()]
        );
        assert_eq!(IRCMessage::parse(&message.as_raw_irc()).unwrap(), message);
    }

    #[test]
    fn test_double_colon_trailing_param() {
        let message = IRCMessage::parse("foo bar baz ::asdf").unwrap();
        assert_eq!(
            message.params,
            vec!["bar".to_owned(), "baz".to_owned(), ":asdf".to_owned()]
        );
    }

    #[test]
    fn test_trailing_param_preserves_spaces() {
        let message = IRCMessage::parse(":coolguy foo bar baz :  asdf quux ").unwrap();
        assert_eq!(
            message.params,
            vec!["bar".to_owned(), "baz".to_owned(), "  asdf quux ".to_owned()]
        );
    }

    #[test]
    fn test_trailing_param_with_colons() {
        let message = IRCMessage::parse(":coolguy PRIVMSG bar :lol :) ").unwrap();
        assert_eq!(message.params, vec!["bar".to_owned(), "lol :) ".to_owned()]);
    }

    #[test]
    fn test_empty_trailing_param() {
        let message = IRCMessage::parse(":coolguy foo bar baz :").unwrap();
        assert_eq!(
            message.params,
            vec!["bar".to_owned(), "baz".to_owned(), "".to_owned()]
        );
    }

    #[test]
    fn test_runs_of_spaces_are_skipped() {
        let message = IRCMessage::parse("@key=value :tmi.twitch.tv  PING  asd  def ").unwrap();
        assert_eq!(message.command, "PING");
        assert_eq!(message.params, vec!["asd".to_owned(), "def".to_owned()]);
    }

    #[test]
    fn test_tags_without_command() {
        let message = IRCMessage::parse("@a=b;c=32;k;rt=ql7 foo").unwrap();
        assert_eq!(
            message.tags,
            hashmap! {
                "a".to_owned() => Str("b".to_owned()),
                "c".to_owned() => Str("32".to_owned()),
                "k".to_owned() => Bool(true),
                "rt".to_owned() => Str("ql7".to_owned()),
            }
        );
        assert_eq!(message.command, "foo");
        assert_eq!(message.params, Vec::<String>::new());
    }

    #[test]
    fn test_join() {
        let source = ":src JOIN #chan";
        let message = IRCMessage::parse(source).unwrap();
        assert_eq!(message.command, "JOIN");
        assert_eq!(message.params, vec!["#chan".to_owned()]);
        assert_eq!(
            IRCMessage::parse(":src JOIN #chan").unwrap(),
            IRCMessage::parse(":src JOIN :#chan").unwrap(),
        );
    }

    #[test]
    fn test_command_only() {
        let message = IRCMessage::parse(":src AWAY").unwrap();
        assert_eq!(message.command, "AWAY");
        assert_eq!(message.params, Vec::<String>::new());
    }

    #[test]
    fn test_asian_characters_display_name() {
        let source = "@display-name=테스트계정420 :tmi.twitch.tv PRIVMSG #pajlada :test";
        let message = IRCMessage::parse(source).unwrap();
        assert_eq!(
            message.tags.get_str("display-name"),
            Some("테스트계정420")
        );
        assert_eq!(IRCMessage::parse(&message.as_raw_irc()).unwrap(), message);
    }

    #[test]
    fn test_ping_1() {
        let message = IRCMessage::parse("PING :tmi.twitch.tv").unwrap();
        assert_eq!(message.prefix, None);
        assert_eq!(message.command, "PING");
        assert_eq!(message.params, vec!["tmi.twitch.tv".to_owned()]);
    }

    #[test]
    fn test_ping_2() {
        let message = IRCMessage::parse(":tmi.twitch.tv PING").unwrap();
        assert_eq!(
            message.prefix,
            Some(IRCPrefix::HostOnly {
                host: "tmi.twitch.tv".to_owned()
            })
        );
        assert_eq!(message.command, "PING");
        assert_eq!(message.params, Vec::<String>::new());
    }

    #[test]
    fn test_numeric_command() {
        let message = IRCMessage::parse("500 :Internal Server Error").unwrap();
        assert_eq!(message.command, "500");
        assert_eq!(message.params, vec!["Internal Server Error".to_owned()]);
    }

    #[test]
    fn test_invalid_nothing_after_tags() {
        assert_eq!(
            IRCMessage::parse("@key=value"),
            Err(IRCParseError::NoSpaceAfterTags)
        );
    }

    #[test]
    fn test_invalid_nothing_after_prefix() {
        assert_eq!(
            IRCMessage::parse("@key=value :tmi.twitch.tv"),
            Err(IRCParseError::NoSpaceAfterPrefix)
        );
        assert_eq!(
            IRCMessage::parse(":tmi.twitch.tv"),
            Err(IRCParseError::NoSpaceAfterPrefix)
        );
    }

    #[test]
    fn test_invalid_empty_command_1() {
        assert_eq!(
            IRCMessage::parse("@key=value :tmi.twitch.tv "),
            Err(IRCParseError::MissingCommand)
        );
    }

    #[test]
    fn test_invalid_empty_command_2() {
        assert_eq!(IRCMessage::parse(""), Err(IRCParseError::MissingCommand));
    }

    #[test]
    fn test_stringify_pass() {
        assert_eq!(
            irc!["PASS", "oauth:9892879487293847"].as_raw_irc(),
            "PASS oauth:9892879487293847"
        );
    }

    #[test]
    fn test_irc_macro() {
        assert_eq!(
            irc!["PRIVMSG"],
            IRCMessage::new_simple("PRIVMSG".to_owned(), vec![]),
        );
        assert_eq!(
            irc!["PRIVMSG", "#pajlada"],
            IRCMessage::new_simple("PRIVMSG".to_owned(), vec!["#pajlada".to_owned()]),
        );
        assert_eq!(
            irc!["PRIVMSG", "#pajlada", "LUL xD"],
            IRCMessage::new_simple(
                "PRIVMSG".to_owned(),
                vec!["#pajlada".to_owned(), "LUL xD".to_owned()]
            ),
        );
    }

    #[test]
    fn test_chat_command_payload_is_trailing() {
        assert_eq!(
            irc!["PRIVMSG", "#pajlada", "/mods"].as_raw_irc(),
            "PRIVMSG #pajlada :/mods"
        );
        assert_eq!(
            irc!["PRIVMSG", "#pajlada", "/ban weeb123 spam"].as_raw_irc(),
            "PRIVMSG #pajlada :/ban weeb123 spam"
        );
    }

    #[test]
    fn test_outgoing_tags() {
        let mut tags = IRCTags::new();
        tags.set_str("reply-parent-msg-id", "abc-def");
        let message = IRCMessage::new(
            tags,
            None,
            "PRIVMSG".to_owned(),
            vec!["#pajlada".to_owned(), "hi there".to_owned()],
        );
        assert_eq!(
            message.as_raw_irc(),
            "@reply-parent-msg-id=abc-def PRIVMSG #pajlada :hi there"
        );
    }
}
