use super::AsRawIRC;
use itertools::Itertools;
use std::collections::HashMap;
use std::fmt;
use std::fmt::Write;
use std::str::FromStr;

/// Tags that keep their raw string value through [`IRCTags::normalize`].
const EXEMPT_FROM_NORMALIZATION: [&str; 3] = ["emote-sets", "ban-duration", "bits"];

/// The escape alphabet of the IRCv3 tag grammar, as
/// `(literal, escape letter)` pairs: `\:` `\s` `\\` `\r` `\n`.
const TAG_ESCAPES: [(char, char); 5] = [
    (';', ':'),
    (' ', 's'),
    ('\\', '\\'),
    ('\r', 'r'),
    ('\n', 'n'),
];

fn decode_tag_value(raw: &str) -> String {
    let mut output = String::with_capacity(raw.len());

    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            output.push(c);
            continue;
        }

        match chars.next() {
            Some(escaped) => {
                let literal = TAG_ESCAPES
                    .iter()
                    .find(|(_, letter)| *letter == escaped)
                    .map(|(literal, _)| *literal);
                // an unknown escape yields the character itself, e.g.
                // a\bc decodes to abc
                output.push(literal.unwrap_or(escaped));
            }
            // dangling backslash at the end of the value
            None => {}
        }
    }
    output
}

fn encode_tag_value(value: &str) -> String {
    let mut output = String::with_capacity(value.len() + value.len() / 4);

    for c in value.chars() {
        match TAG_ESCAPES.iter().find(|(literal, _)| *literal == c) {
            Some((_, letter)) => {
                output.push('\\');
                output.push(*letter);
            }
            None => output.push(c),
        }
    }

    output
}

/// List of badges (or badge metadata), as key/version pairs in their
/// original wire order.
pub type BadgeList = Vec<(String, Option<String>)>;

/// List of emotes: emote ID plus the `(start, end)` index pairs where the
/// emote occurs in the message, in their original wire order.
pub type EmoteList = Vec<(String, Vec<(usize, usize)>)>;

/// The value of a single IRCv3 tag.
///
/// Directly after parsing, every tag is either [`TagValue::Str`] (the raw,
/// still-escaped value) or `TagValue::Bool(true)` (tag present without a
/// `=value` part). [`IRCTags::normalize`] then rewrites the map into its
/// semantic form, see there.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum TagValue {
    /// A plain string value.
    Str(String),
    /// `true` for a valueless tag, `false`/`true` for `0`/`1` values after
    /// normalization.
    Bool(bool),
    /// A valueless tag after normalization.
    None,
    /// Parsed `badges` / `badge-info` composite.
    Badges(BadgeList),
    /// Parsed `emotes` composite.
    Emotes(EmoteList),
}

impl TagValue {
    /// The string value, if this is a string tag.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            TagValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Whether this tag is boolean `true`.
    pub fn is_true(&self) -> bool {
        matches!(self, TagValue::Bool(true))
    }
}

fn parse_badges(raw: &str) -> BadgeList {
    if raw.is_empty() {
        return vec![];
    }

    raw.split(',')
        .map(|src| {
            let mut split = src.splitn(2, '/');
            // splitting a non-empty string always yields at least one element
            let key = split.next().unwrap().to_owned();
            (key, split.next().map(|s| s.to_owned()))
        })
        .collect()
}

fn format_badges(badges: &[(String, Option<String>)]) -> String {
    badges
        .iter()
        .map(|(key, version)| match version {
            Some(version) => format!("{}/{}", key, version),
            None => key.clone(),
        })
        .join(",")
}

fn parse_emotes(raw: &str) -> EmoteList {
    if raw.is_empty() {
        return vec![];
    }

    let mut emotes = Vec::new();
    for src in raw.split('/') {
        let mut split = src.splitn(2, ':');
        let id = split.next().unwrap();
        let Some(indices) = split.next() else {
            continue;
        };

        let ranges = indices
            .split(',')
            .filter_map(|range| {
                let (start, end) = range.splitn(2, '-').next_tuple()?;
                Some((usize::from_str(start).ok()?, usize::from_str(end).ok()?))
            })
            .collect::<Vec<_>>();
        emotes.push((id.to_owned(), ranges));
    }
    emotes
}

fn format_emotes(emotes: &[(String, Vec<(usize, usize)>)]) -> String {
    emotes
        .iter()
        .map(|(id, ranges)| {
            format!(
                "{}:{}",
                id,
                ranges
                    .iter()
                    .map(|(start, end)| format!("{}-{}", start, end))
                    .join(",")
            )
        })
        .join("/")
}

/// A map of key-value [IRCv3 tags](https://ircv3.net/specs/extensions/message-tags.html).
///
/// # Examples
///
/// ```
/// use tmi_client::message::{IRCTags, TagValue};
/// use maplit::hashmap;
///
/// let tags = IRCTags::parse("key=value;key3");
/// assert_eq!(tags, hashmap! {
///     "key".to_owned() => TagValue::Str("value".to_owned()),
///     "key3".to_owned() => TagValue::Bool(true),
/// })
/// ```
#[derive(Debug, PartialEq, Eq, Clone, Default)]
pub struct IRCTags(pub HashMap<String, TagValue>);

impl IRCTags {
    /// Creates a new empty map of tags.
    pub fn new() -> IRCTags {
        IRCTags(HashMap::new())
    }

    /// Parses a new set of tags from their wire-format representation.
    /// `source` should be specified without the leading `@` present in the
    /// full IRC message.
    ///
    /// No unescaping is performed here. The escape codec runs during
    /// [`normalize`](IRCTags::normalize), after composite tags have been
    /// taken out of the map.
    pub fn parse(source: &str) -> IRCTags {
        let mut tags = IRCTags::new();

        for raw_tag in source.split(';') {
            let mut tag_split = raw_tag.splitn(2, '=');

            // always present, even splitting an empty string yields [""]
            let key = tag_split.next().unwrap();
            let value = match tag_split.next() {
                Some(value) => TagValue::Str(value.to_owned()),
                None => TagValue::Bool(true),
            };

            tags.0.insert(key.to_owned(), value);
        }

        tags
    }

    /// Rewrites the raw parsed tags into their semantic form:
    ///
    /// * `badges` and `badge-info` become [`TagValue::Badges`], `emotes`
    ///   becomes [`TagValue::Emotes`]; the original strings are preserved
    ///   under `badges-raw`, `badge-info-raw` and `emotes-raw`.
    /// * `"1"` becomes `true`, `"0"` becomes `false`, a valueless tag
    ///   becomes [`TagValue::None`], any other string is unescaped.
    /// * `emote-sets`, `ban-duration` and `bits` keep their raw string
    ///   value.
    pub fn normalize(&mut self) {
        for key in ["badges", "badge-info"] {
            if let Some(raw) = self.0.get(key).and_then(TagValue::as_str) {
                let parsed = TagValue::Badges(parse_badges(raw));
                let raw = raw.to_owned();
                self.0.insert(format!("{}-raw", key), TagValue::Str(raw));
                self.0.insert(key.to_owned(), parsed);
            }
        }
        if let Some(raw) = self.0.get("emotes").and_then(TagValue::as_str) {
            let parsed = TagValue::Emotes(parse_emotes(raw));
            let raw = raw.to_owned();
            self.0.insert("emotes-raw".to_owned(), TagValue::Str(raw));
            self.0.insert("emotes".to_owned(), parsed);
        }

        for (key, value) in self.0.iter_mut() {
            if EXEMPT_FROM_NORMALIZATION.contains(&key.as_str()) || key.ends_with("-raw") {
                continue;
            }

            match value {
                TagValue::Bool(true) => *value = TagValue::None,
                TagValue::Str(s) if s == "1" => *value = TagValue::Bool(true),
                TagValue::Str(s) if s == "0" => *value = TagValue::Bool(false),
                TagValue::Str(s) => *value = TagValue::Str(decode_tag_value(s)),
                _ => {}
            }
        }
    }

    /// The string value of the given tag, if present and a string.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(TagValue::as_str)
    }

    /// The string value of the given tag, parsed as a number.
    pub fn get_number<N: FromStr>(&self, key: &str) -> Option<N> {
        N::from_str(self.get_str(key)?).ok()
    }

    /// Whether the given tag is present with boolean value `true`.
    pub fn is_true(&self, key: &str) -> bool {
        self.0.get(key).is_some_and(TagValue::is_true)
    }

    /// Whether the given tag is present at all.
    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// The `msg-id` tag value, the semantic identity of `NOTICE` and
    /// `USERNOTICE` messages.
    pub fn msg_id(&self) -> Option<&str> {
        self.get_str("msg-id")
    }

    /// Inserts a plain string tag, used when building outgoing messages.
    pub fn set_str(&mut self, key: &str, value: &str) {
        self.0
            .insert(key.to_owned(), TagValue::Str(value.to_owned()));
    }
}

impl From<HashMap<String, TagValue>> for IRCTags {
    fn from(map: HashMap<String, TagValue>) -> Self {
        IRCTags(map)
    }
}

impl AsRawIRC for IRCTags {
    fn format_as_raw_irc(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut add_separator = false;
        for (key, value) in self.0.iter().sorted_by(|a, b| a.0.cmp(b.0)) {
            if add_separator {
                f.write_char(';')?;
            } else {
                add_separator = true;
            }
            f.write_str(key)?;
            match value {
                TagValue::Str(value) => write!(f, "={}", encode_tag_value(value))?,
                TagValue::Bool(false) => f.write_str("=0")?,
                TagValue::Badges(badges) => write!(f, "={}", format_badges(badges))?,
                TagValue::Emotes(emotes) => write!(f, "={}", format_emotes(emotes))?,
                // a bare key encodes boolean true/none
                TagValue::Bool(true) | TagValue::None => {}
            }
        }

        Ok(())
    }
}

impl PartialEq<HashMap<String, TagValue>> for IRCTags {
    fn eq(&self, other: &HashMap<String, TagValue>) -> bool {
        &self.0 == other
    }
}

impl PartialEq<IRCTags> for HashMap<String, TagValue> {
    fn eq(&self, other: &IRCTags) -> bool {
        self == &other.0
    }
}
