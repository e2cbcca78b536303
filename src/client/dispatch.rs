//! Turns the incoming message stream into state updates, public events and
//! completions of pending operations.

use crate::client::bus::{classify_msg_id, NoticeClass, Reply, ReplyTopic};
use crate::client::event_loop::ClientLoopWorker;
use crate::error::Error;
use crate::events::Event;
use crate::irc;
use crate::login::LoginCredentials;
use crate::message::{IRCMessage, IRCTags, TagValue};
use crate::transport::Transport;
use crate::validate;

/// `NOTICE` texts that identify a rejected login during the handshake.
const HANDSHAKE_FAILURES: [&str; 5] = [
    "Login unsuccessful",
    "Login authentication failed",
    "Error logging in",
    "Improperly formatted auth",
    "Invalid NICK",
];

impl<T: Transport, L: LoginCredentials> ClientLoopWorker<T, L> {
    pub(super) fn dispatch_message(&mut self, mut message: IRCMessage) {
        message.tags.normalize();
        self.emit(Event::RawMessage {
            message: message.clone(),
        });

        let from_server = message
            .prefix
            .as_ref()
            .is_some_and(|p| p.is_host("tmi.twitch.tv"));
        let from_jtv = message.prefix.as_ref().is_some_and(|p| p.is_host("jtv"));

        if message.prefix.is_none() {
            self.on_no_prefix_message(message);
        } else if from_server {
            self.on_server_message(message);
        } else if from_jtv {
            self.on_jtv_message(message);
        } else {
            self.on_other_message(message);
        }
    }

    fn on_no_prefix_message(&mut self, message: IRCMessage) {
        match message.command.as_str() {
            "PING" => {
                self.send_message(irc!["PONG", "tmi.twitch.tv"], None);
                self.emit(Event::Ping);
            }
            "PONG" => self.on_pong(),
            _ => tracing::debug!("Could not parse message with no prefix: {}", message.raw),
        }
    }

    fn on_server_message(&mut self, message: IRCMessage) {
        match message.command.as_str() {
            "002" | "003" | "004" | "372" | "375" | "CAP" => {}
            "001" => {
                // the server-assigned username is authoritative
                if let Some(username) = message.params.first() {
                    self.username = username.clone();
                }
                self.emit(Event::Logon);
            }
            "376" => self.on_handshake_complete(),
            "PONG" => self.on_pong(),
            "NOTICE" => self.on_notice(message),
            "USERNOTICE" => self.on_usernotice(message),
            "HOSTTARGET" => self.on_hosttarget(message),
            "CLEARCHAT" => self.on_clearchat(message),
            "CLEARMSG" => self.on_clearmsg(message),
            "RECONNECT" => {
                tracing::info!("Server requested a reconnect");
                self.transition_to_closed(Error::ConnectionClosed);
            }
            "USERSTATE" => self.on_userstate(message),
            "GLOBALUSERSTATE" => self.on_globaluserstate(message),
            "ROOMSTATE" => self.on_roomstate(message),
            "421" => tracing::warn!("Server does not recognize a command we sent: {}", message.raw),
            _ => tracing::warn!("Could not parse server message: {}", message.raw),
        }
    }

    //
    // NOTICE: the principal correlation surface
    //

    fn on_notice(&mut self, message: IRCMessage) {
        let channel = message.params.first().cloned().unwrap_or_default();
        let text = message.params.get(1).cloned().unwrap_or_default();
        let msg_id = message.tags.msg_id().map(|s| s.to_owned());

        if self.is_handshaking() && HANDSHAKE_FAILURES.iter().any(|n| text.contains(n)) {
            tracing::error!("Login failed: {}", text);
            self.disable_reconnect();
            self.transition_to_closed(Error::LoginFailed(text));
            return;
        }

        self.emit(Event::Notice {
            channel: channel.clone(),
            msg_id: msg_id.clone(),
            message: text.clone(),
        });

        let Some(msg_id) = msg_id else {
            return;
        };

        match msg_id.as_str() {
            "msg_rejected" | "msg_rejected_mandatory" => {
                self.emit(Event::AutoMod {
                    channel,
                    msg_id,
                    message: text,
                });
            }
            "room_mods" | "no_mods" => {
                let mods = parse_name_list(&text);
                self.moderators
                    .insert(channel.clone(), mods.iter().cloned().collect());
                self.emit(Event::Mods {
                    channel: channel.clone(),
                    mods: mods.clone(),
                });
                self.bus
                    .complete(ReplyTopic::Mods, &channel, Ok(Reply::Names(mods)));
            }
            "vips_success" | "no_vips" => {
                let vips = parse_name_list(&text);
                self.emit(Event::Vips {
                    channel: channel.clone(),
                    vips: vips.clone(),
                });
                self.bus
                    .complete(ReplyTopic::Vips, &channel, Ok(Reply::Names(vips)));
            }
            "hosts_remaining" => {
                let remaining = leading_number(&text);
                self.bus
                    .complete(ReplyTopic::Host, &channel, Ok(Reply::Count(remaining)));
            }
            _ => match classify_msg_id(&msg_id) {
                Some(NoticeClass::Success(topic)) => {
                    self.emit_mode_change(topic, &channel);
                    self.bus.complete(topic, &channel, Ok(Reply::Ack));
                }
                Some(NoticeClass::Failure(topic)) => {
                    self.bus.fail(topic, &channel, &msg_id);
                }
                Some(NoticeClass::FailureAll) => {
                    // the permission class rejects everything outstanding
                    // for the implicated channel
                    self.bus.fail_channel(&channel, &msg_id);
                }
                None => {
                    tracing::debug!("Received NOTICE with unrecognized msg-id {}: {}", msg_id, text)
                }
            },
        }
    }

    /// Room mode confirmations double as public events.
    fn emit_mode_change(&mut self, topic: ReplyTopic, channel: &str) {
        let channel = channel.to_owned();
        match topic {
            ReplyTopic::EmoteOnly => self.emit(Event::EmoteOnly {
                channel,
                enabled: true,
            }),
            ReplyTopic::EmoteOnlyOff => self.emit(Event::EmoteOnly {
                channel,
                enabled: false,
            }),
            ReplyTopic::Subscribers => self.emit(Event::Subscribers {
                channel,
                enabled: true,
            }),
            ReplyTopic::SubscribersOff => self.emit(Event::Subscribers {
                channel,
                enabled: false,
            }),
            ReplyTopic::R9kBeta => self.emit(Event::R9kBeta {
                channel,
                enabled: true,
            }),
            ReplyTopic::R9kBetaOff => self.emit(Event::R9kBeta {
                channel,
                enabled: false,
            }),
            _ => {}
        }
    }

    //
    // USERNOTICE: subscriptions, gifts, raids, announcements
    //

    fn on_usernotice(&mut self, message: IRCMessage) {
        let channel = message.params.first().cloned().unwrap_or_default();
        let text = message.params.get(1).cloned();
        let tags = message.tags;
        let username = tags.get_str("login").unwrap_or_default().to_owned();

        let Some(msg_id) = tags.msg_id().map(|s| s.to_owned()) else {
            tracing::warn!("USERNOTICE without msg-id: {}", message.raw);
            return;
        };

        match msg_id.as_str() {
            "sub" => self.emit(Event::Sub {
                channel,
                username,
                tags,
                message: text,
            }),
            "resub" => {
                let cumulative_months = tag_count(&tags, "msg-param-cumulative-months");
                self.emit(Event::Resub {
                    channel,
                    username,
                    cumulative_months,
                    tags,
                    message: text,
                });
            }
            "subgift" => {
                let recipient = tags
                    .get_str("msg-param-recipient-user-name")
                    .unwrap_or_default()
                    .to_owned();
                self.emit(Event::SubGift {
                    channel,
                    username,
                    recipient,
                    tags,
                });
            }
            "anonsubgift" => {
                let recipient = tags
                    .get_str("msg-param-recipient-user-name")
                    .unwrap_or_default()
                    .to_owned();
                self.emit(Event::AnonSubGift {
                    channel,
                    recipient,
                    tags,
                });
            }
            "submysterygift" => {
                let count = tag_count(&tags, "msg-param-mass-gift-count");
                self.emit(Event::SubMysteryGift {
                    channel,
                    username,
                    count,
                    tags,
                });
            }
            "anonsubmysterygift" => {
                let count = tag_count(&tags, "msg-param-mass-gift-count");
                self.emit(Event::AnonSubMysteryGift {
                    channel,
                    count,
                    tags,
                });
            }
            "primepaidupgrade" => self.emit(Event::PrimePaidUpgrade {
                channel,
                username,
                tags,
            }),
            "giftpaidupgrade" => {
                let sender = tags
                    .get_str("msg-param-sender-login")
                    .map(|s| s.to_owned());
                self.emit(Event::GiftPaidUpgrade {
                    channel,
                    username,
                    sender,
                    tags,
                });
            }
            "anongiftpaidupgrade" => self.emit(Event::AnonGiftPaidUpgrade {
                channel,
                username,
                tags,
            }),
            "announcement" => self.emit(Event::Announcement {
                channel,
                username,
                tags,
                message: text.unwrap_or_default(),
            }),
            "raid" => {
                let username = tags
                    .get_str("msg-param-login")
                    .unwrap_or(&username)
                    .to_owned();
                let viewers = tag_count(&tags, "msg-param-viewerCount");
                self.emit(Event::Raided {
                    channel,
                    username,
                    viewers,
                    tags,
                });
            }
            _ => self.emit(Event::UserNotice {
                channel,
                msg_id,
                tags,
                message: text,
            }),
        }
    }

    fn on_hosttarget(&mut self, message: IRCMessage) {
        let channel = message.params.first().cloned().unwrap_or_default();
        let payload = message.params.get(1).cloned().unwrap_or_default();

        let mut parts = payload.split_whitespace();
        let target = parts.next().unwrap_or("-");
        let viewers = parts.next().and_then(|v| v.parse::<u64>().ok()).unwrap_or(0);

        if target.starts_with('-') {
            self.emit(Event::Unhost {
                channel: channel.clone(),
                viewers,
            });
            self.bus
                .complete(ReplyTopic::Unhost, &channel, Ok(Reply::Ack));
        } else {
            self.emit(Event::Hosting {
                channel,
                target: validate::username(target),
                viewers,
            });
        }
    }

    fn on_clearchat(&mut self, message: IRCMessage) {
        let channel = message.params.first().cloned().unwrap_or_default();

        match message.params.get(1) {
            Some(target) => {
                // the ban-duration tag distinguishes a timeout from a ban
                if let Some(duration) = message.tags.get_number::<u64>("ban-duration") {
                    self.emit(Event::TimedOut {
                        channel,
                        username: target.clone(),
                        duration,
                        tags: message.tags,
                    });
                } else {
                    self.emit(Event::Ban {
                        channel,
                        username: target.clone(),
                        tags: message.tags,
                    });
                }
            }
            None => {
                self.emit(Event::ClearChat {
                    channel: channel.clone(),
                });
                self.bus
                    .complete(ReplyTopic::Clear, &channel, Ok(Reply::Ack));
            }
        }
    }

    fn on_clearmsg(&mut self, message: IRCMessage) {
        let channel = message.params.first().cloned().unwrap_or_default();
        let text = message.params.get(1).cloned().unwrap_or_default();
        let username = message.tags.get_str("login").unwrap_or_default().to_owned();
        self.emit(Event::MessageDeleted {
            channel,
            username,
            message: text,
            tags: message.tags,
        });
    }

    //
    // per-channel and global state
    //

    fn on_userstate(&mut self, message: IRCMessage) {
        let Some(channel) = message.params.first().cloned() else {
            return;
        };
        let tags = message.tags;

        let first_time = !self.userstate.contains_key(&channel);
        self.userstate.insert(channel.clone(), tags.clone());

        if first_time {
            // the first USERSTATE for a channel is the join confirmation
            // for ourselves
            self.last_joined = Some(channel.clone());
            if !self.channels.contains(&channel) {
                self.channels.push(channel.clone());
            }
            tracing::info!("Joined {}", channel);
            self.emit(Event::Join {
                channel: channel.clone(),
                username: self.username.clone(),
                is_self: true,
            });
        }

        if tags.get_str("user-type") == Some("mod") {
            let username = self.username.clone();
            self.moderators.entry(channel).or_default().insert(username);
        }

        self.track_emote_sets(&tags);
    }

    fn on_globaluserstate(&mut self, message: IRCMessage) {
        self.global_userstate = message.tags.clone();
        self.emit(Event::GlobalUserState { tags: message.tags });
        let tags = self.global_userstate.clone();
        self.track_emote_sets(&tags);
    }

    fn track_emote_sets(&mut self, tags: &IRCTags) {
        if let Some(sets) = tags.get_str("emote-sets") {
            if sets != self.emote_sets {
                self.emote_sets = sets.to_owned();
                self.emit(Event::EmoteSets {
                    emote_sets: self.emote_sets.clone(),
                });
            }
        }
    }

    fn on_roomstate(&mut self, message: IRCMessage) {
        let Some(channel) = message.params.first().cloned() else {
            return;
        };
        let tags = message.tags;

        if self.last_joined.as_deref() == Some(channel.as_str()) {
            self.bus.confirm_join(&channel);
        }

        self.emit(Event::RoomState {
            channel: channel.clone(),
            tags: tags.clone(),
        });

        // a ROOMSTATE without subs-only is a single-mode transition; its
        // slow / followers-only durations supersede the NOTICE msg-id
        // stream
        if tags.contains("subs-only") {
            return;
        }

        if let Some(value) = tags.0.get("slow") {
            match slow_mode_seconds(value) {
                0 => {
                    self.emit(Event::Slow {
                        channel: channel.clone(),
                        enabled: false,
                        seconds: 0,
                    });
                    self.bus
                        .complete(ReplyTopic::SlowOff, &channel, Ok(Reply::Ack));
                }
                seconds => {
                    self.emit(Event::Slow {
                        channel: channel.clone(),
                        enabled: true,
                        seconds,
                    });
                    self.bus.complete(ReplyTopic::Slow, &channel, Ok(Reply::Ack));
                }
            }
        }

        if let Some(value) = tags.0.get("followers-only") {
            match followers_only_minutes(value) {
                None => {
                    self.emit(Event::FollowersOnly {
                        channel: channel.clone(),
                        enabled: false,
                        minutes: 0,
                    });
                    self.bus
                        .complete(ReplyTopic::FollowersOnlyOff, &channel, Ok(Reply::Ack));
                }
                Some(minutes) => {
                    self.emit(Event::FollowersOnly {
                        channel: channel.clone(),
                        enabled: true,
                        minutes,
                    });
                    self.bus
                        .complete(ReplyTopic::FollowersOnly, &channel, Ok(Reply::Ack));
                }
            }
        }
    }

    //
    // jtv service messages
    //

    fn on_jtv_message(&mut self, message: IRCMessage) {
        match message.command.as_str() {
            "MODE" => {
                let channel = message.params.first().cloned().unwrap_or_default();
                let mode = message.params.get(1).map(String::as_str).unwrap_or_default();
                let username = message.params.get(2).cloned().unwrap_or_default();

                match mode {
                    "+o" => {
                        self.moderators
                            .entry(channel.clone())
                            .or_default()
                            .insert(username.clone());
                        self.emit(Event::Mod { channel, username });
                    }
                    "-o" => {
                        if let Some(mods) = self.moderators.get_mut(&channel) {
                            mods.remove(&username);
                        }
                        self.emit(Event::Unmod { channel, username });
                    }
                    _ => {}
                }
            }
            "PRIVMSG" => self.on_hosted(message),
            _ => tracing::debug!("Could not parse jtv message: {}", message.raw),
        }
    }

    /// `jtv` whispers us "<channel> is now hosting you for N viewers."
    fn on_hosted(&mut self, message: IRCMessage) {
        let channel = validate::channel(message.params.first().map(String::as_str).unwrap_or(""));
        let text = message.params.get(1).cloned().unwrap_or_default();

        if !text.contains("hosting you") {
            return;
        }

        let host = validate::username(text.split_whitespace().next().unwrap_or_default());
        let viewers = text.split_whitespace().find_map(|w| w.parse::<u64>().ok());
        let auto_host = text.contains("auto hosting");

        self.emit(Event::Hosted {
            channel,
            host,
            viewers,
            auto_host,
        });
    }

    //
    // messages from chatting users
    //

    fn on_other_message(&mut self, message: IRCMessage) {
        match message.command.as_str() {
            "353" => {
                let channel = message.params.get(2).cloned().unwrap_or_default();
                let usernames = message
                    .params
                    .get(3)
                    .map(|names| names.split_whitespace().map(|s| s.to_owned()).collect())
                    .unwrap_or_default();
                self.emit(Event::Names { channel, usernames });
            }
            "366" => {}
            "JOIN" => self.on_join(message),
            "PART" => self.on_part(message),
            "PRIVMSG" => self.on_privmsg(message),
            "WHISPER" => self.on_whisper(message),
            _ => tracing::debug!("Could not parse message: {}", message.raw),
        }
    }

    fn on_join(&mut self, message: IRCMessage) {
        let Some(channel) = message.params.first().cloned() else {
            return;
        };
        let Some(username) = message.prefix.as_ref().and_then(|p| p.nick()) else {
            return;
        };
        let username = username.to_owned();
        let is_self = username == self.username;

        if is_self && validate::is_justinfan(&username) {
            // anonymous logins receive no USERSTATE, the JOIN echo is the
            // only join confirmation
            if !self.userstate.contains_key(&channel) {
                self.userstate.insert(channel.clone(), IRCTags::new());
                self.last_joined = Some(channel.clone());
                if !self.channels.contains(&channel) {
                    self.channels.push(channel.clone());
                }
                tracing::info!("Joined {}", channel);
                self.emit(Event::Join {
                    channel,
                    username,
                    is_self: true,
                });
            }
        } else if !is_self {
            self.emit(Event::Join {
                channel,
                username,
                is_self: false,
            });
        }
    }

    fn on_part(&mut self, message: IRCMessage) {
        let Some(channel) = message.params.first().cloned() else {
            return;
        };
        let Some(username) = message.prefix.as_ref().and_then(|p| p.nick()) else {
            return;
        };
        let username = username.to_owned();
        let is_self = username == self.username;

        if is_self {
            self.channels.retain(|c| c != &channel);
            self.userstate.remove(&channel);
            tracing::info!("Parted {}", channel);
            self.bus.complete(ReplyTopic::Part, &channel, Ok(Reply::Ack));
        }

        self.emit(Event::Part {
            channel,
            username,
            is_self,
        });
    }

    fn on_privmsg(&mut self, message: IRCMessage) {
        let Some(username) = message.prefix.as_ref().and_then(|p| p.nick()) else {
            return;
        };
        let username = username.to_owned();

        if username == "jtv" {
            self.on_hosted(message);
            return;
        }

        let channel = message.params.first().cloned().unwrap_or_default();
        let text = message.params.get(1).cloned().unwrap_or_default();
        let tags = message.tags;
        let is_self = username == self.username;

        if tags.contains("bits") {
            self.emit(Event::Cheer {
                channel,
                tags,
                message: text,
                username,
            });
            return;
        }

        if let Some(reward_type) = tags.get_str("custom-reward-id").map(|s| s.to_owned()) {
            self.emit(Event::Redeem {
                channel,
                username,
                reward_type,
                tags,
                message: text,
            });
            return;
        }

        match text
            .strip_prefix("\u{1}ACTION ")
            .and_then(|t| t.strip_suffix('\u{1}'))
        {
            Some(action_text) => {
                let action_text = action_text.to_owned();
                self.emit(Event::Action {
                    channel,
                    tags,
                    message: action_text,
                    username,
                    is_self,
                });
            }
            None => {
                self.emit(Event::Chat {
                    channel,
                    tags,
                    message: text,
                    username,
                    is_self,
                });
            }
        }
    }

    fn on_whisper(&mut self, message: IRCMessage) {
        let Some(from) = message.prefix.as_ref().and_then(|p| p.nick()) else {
            return;
        };
        let from = from.to_owned();
        let text = message.params.get(1).cloned().unwrap_or_default();
        self.emit(Event::Whisper {
            from,
            tags: message.tags,
            message: text,
        });
    }
}

/// Parses the name list out of `room_mods`/`vips_success` notice text,
/// e.g. `The moderators of this channel are: a, b, c`.
fn parse_name_list(text: &str) -> Vec<String> {
    match text.split_once(": ") {
        Some((_, list)) => list
            .trim_end_matches('.')
            .split(", ")
            .map(validate::username)
            .filter(|name| !name.is_empty())
            .collect(),
        None => vec![],
    }
}

/// Leading integer of a notice text, e.g. `2 host commands remaining ...`.
fn leading_number(text: &str) -> u64 {
    text.split_whitespace()
        .next()
        .and_then(|w| w.parse().ok())
        .unwrap_or(0)
}

/// Seconds of slow mode carried by a normalized `slow` tag.
fn slow_mode_seconds(value: &TagValue) -> u64 {
    match value {
        TagValue::Bool(true) => 1,
        TagValue::Str(s) => s.parse().unwrap_or(0),
        _ => 0,
    }
}

/// Minutes of followers-only mode carried by a normalized `followers-only`
/// tag. `None` means disabled (`-1` on the wire); the raw values `0` and
/// `1` arrive here as booleans after normalization.
fn followers_only_minutes(value: &TagValue) -> Option<u64> {
    match value {
        TagValue::Bool(false) => Some(0),
        TagValue::Bool(true) => Some(1),
        TagValue::Str(s) => {
            let minutes: i64 = s.parse().unwrap_or(-1);
            if minutes < 0 {
                None
            } else {
                Some(minutes as u64)
            }
        }
        _ => None,
    }
}

/// Mirrors the lenient numeric reading of `msg-param-*` counters: the
/// values `1`/`0` have become booleans during normalization.
fn tag_count(tags: &IRCTags, key: &str) -> u64 {
    match tags.0.get(key) {
        Some(TagValue::Str(s)) => s.parse().unwrap_or(0),
        Some(TagValue::Bool(true)) => 1,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_name_list() {
        assert_eq!(
            parse_name_list("The moderators of this channel are: pajbot, snusbot"),
            vec!["pajbot".to_owned(), "snusbot".to_owned()]
        );
        assert_eq!(
            parse_name_list("The VIPs of this channel are: a, b."),
            vec!["a".to_owned(), "b".to_owned()]
        );
        assert_eq!(
            parse_name_list("There are no moderators of this channel."),
            Vec::<String>::new()
        );
    }

    #[test]
    fn test_leading_number() {
        assert_eq!(leading_number("2 host commands remaining this half hour."), 2);
        assert_eq!(leading_number("no number here"), 0);
    }

    #[test]
    fn test_slow_mode_seconds() {
        assert_eq!(slow_mode_seconds(&TagValue::Str("10".to_owned())), 10);
        assert_eq!(slow_mode_seconds(&TagValue::Bool(true)), 1);
        assert_eq!(slow_mode_seconds(&TagValue::Bool(false)), 0);
    }

    #[test]
    fn test_followers_only_minutes() {
        assert_eq!(
            followers_only_minutes(&TagValue::Str("-1".to_owned())),
            None
        );
        assert_eq!(followers_only_minutes(&TagValue::Bool(false)), Some(0));
        assert_eq!(followers_only_minutes(&TagValue::Bool(true)), Some(1));
        assert_eq!(
            followers_only_minutes(&TagValue::Str("10".to_owned())),
            Some(10)
        );
    }

    #[test]
    fn test_tag_count_reads_normalized_booleans() {
        let mut tags = IRCTags::parse("msg-param-cumulative-months=1;msg-param-mass-gift-count=20");
        tags.normalize();
        assert_eq!(tag_count(&tags, "msg-param-cumulative-months"), 1);
        assert_eq!(tag_count(&tags, "msg-param-mass-gift-count"), 20);
        assert_eq!(tag_count(&tags, "missing"), 0);
    }
}
