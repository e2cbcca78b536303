//! The reply bus: one-shot listeners that turn fire-and-observe IRC
//! exchanges into request/response operations.
//!
//! Twitch never echoes request IDs, so every correlated command registers a
//! listener under the internal topic its confirmation will fire on, plus
//! the channel it expects the confirmation for. The dispatcher completes
//! listeners as recognizable `NOTICE`/`ROOMSTATE`/`JOIN`/`HOSTTARGET`
//! messages arrive; a deadline task reaps listeners that never hear back.

use crate::error::Error;
use crate::login::LoginCredentials;
use crate::transport::Transport;
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;
use tokio::sync::oneshot;

/// Payload of a successful command reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Reply {
    /// Plain confirmation, no data attached.
    Ack,
    /// A list of login names (`/mods`, `/vips`).
    Names(Vec<String>),
    /// A count (remaining host commands).
    Count(u64),
    /// Measured round-trip time (`ping`).
    Latency(Duration),
}

/// Internal completion topics, one per correlated command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum ReplyTopic {
    Ban,
    Clear,
    Color,
    Commercial,
    DeleteMessage,
    EmoteOnly,
    EmoteOnlyOff,
    FollowersOnly,
    FollowersOnlyOff,
    Host,
    Unhost,
    Mod,
    Unmod,
    Mods,
    Part,
    Ping,
    R9kBeta,
    R9kBetaOff,
    Raid,
    Unraid,
    Slow,
    SlowOff,
    Subscribers,
    SubscribersOff,
    TimeoutUser,
    Unban,
    Untimeout,
    Vip,
    Unvip,
    Vips,
    Whisper,
}

/// How a `NOTICE` `msg-id` relates to the pending operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NoticeClass {
    /// Confirms the next pending operation on the given topic.
    Success(ReplyTopic),
    /// Rejects the next pending operation on the given topic.
    Failure(ReplyTopic),
    /// Rejects every pending operation for the implicated channel
    /// (the generic permission class).
    FailureAll,
}

/// Classifies a `NOTICE` `msg-id` tag. Returns `None` for msg-ids that
/// carry no correlation meaning (they still surface as `notice` events).
pub(crate) fn classify_msg_id(msg_id: &str) -> Option<NoticeClass> {
    use NoticeClass::*;
    use ReplyTopic::*;

    Some(match msg_id {
        "ban_success" => Success(Ban),
        "already_banned" | "bad_ban_admin" | "bad_ban_anon" | "bad_ban_broadcaster"
        | "bad_ban_global_mod" | "bad_ban_mod" | "bad_ban_self" | "bad_ban_staff"
        | "usage_ban" => Failure(Ban),

        "usage_clear" => Failure(Clear),

        "color_changed" => Success(Color),
        "turbo_only_color" | "usage_color" => Failure(Color),

        "commercial_success" => Success(Commercial),
        "bad_commercial_error" | "usage_commercial" => Failure(Commercial),

        "delete_message_success" => Success(DeleteMessage),
        "bad_delete_message_broadcaster" | "bad_delete_message_mod" | "bad_delete_message_error"
        | "usage_delete" => Failure(DeleteMessage),

        "emote_only_on" => Success(EmoteOnly),
        "already_emote_only_on" | "usage_emote_only_on" => Failure(EmoteOnly),
        "emote_only_off" => Success(EmoteOnlyOff),
        "already_emote_only_off" | "usage_emote_only_off" => Failure(EmoteOnlyOff),

        "followers_on" | "followers_on_zero" => Success(FollowersOnly),
        "usage_followers_on" => Failure(FollowersOnly),
        "followers_off" => Success(FollowersOnlyOff),
        "usage_followers_off" => Failure(FollowersOnlyOff),

        // host confirmations arrive as a remaining-host-count notice
        "hosts_remaining" => Success(Host),
        "bad_host_error" | "bad_host_hosting" | "bad_host_rate_exceeded" | "usage_host" => {
            Failure(Host)
        }
        "not_hosting" | "bad_unhost_error" | "usage_unhost" => Failure(Unhost),

        "mod_success" => Success(Mod),
        "bad_mod_banned" | "bad_mod_mod" | "usage_mod" => Failure(Mod),
        "unmod_success" => Success(Unmod),
        "bad_unmod_mod" | "usage_unmod" => Failure(Unmod),

        "room_mods" | "no_mods" => Success(Mods),
        "usage_mods" => Failure(Mods),

        "r9k_on" => Success(R9kBeta),
        "already_r9k_on" | "usage_r9k_on" => Failure(R9kBeta),
        "r9k_off" => Success(R9kBetaOff),
        "already_r9k_off" | "usage_r9k_off" => Failure(R9kBetaOff),

        "raid_error_already_raiding" | "raid_error_forbidden" | "raid_error_self"
        | "raid_error_too_many_viewers" | "raid_error_unbanned" | "usage_raid" => Failure(Raid),
        "unraid_error_no_active_raid" | "usage_unraid" => Failure(Unraid),

        "usage_slow_on" => Failure(Slow),
        "usage_slow_off" => Failure(SlowOff),

        "subs_on" => Success(Subscribers),
        "already_subs_on" | "usage_subs_on" => Failure(Subscribers),
        "subs_off" => Success(SubscribersOff),
        "already_subs_off" | "usage_subs_off" => Failure(SubscribersOff),

        "timeout_success" => Success(TimeoutUser),
        "bad_timeout_admin" | "bad_timeout_anon" | "bad_timeout_broadcaster"
        | "bad_timeout_duration" | "bad_timeout_global_mod" | "bad_timeout_mod"
        | "bad_timeout_self" | "bad_timeout_staff" | "usage_timeout" => Failure(TimeoutUser),

        "unban_success" => Success(Unban),
        "bad_unban_no_ban" | "usage_unban" => Failure(Unban),
        "untimeout_success" => Success(Untimeout),
        "bad_untimeout_banned" | "usage_untimeout" => Failure(Untimeout),

        "vip_success" => Success(Vip),
        "bad_vip_grantee_banned" | "bad_vip_grantee_already_vip" | "bad_vip_max_vips_reached"
        | "bad_vip_achievement_incomplete" | "usage_vip" => Failure(Vip),
        "unvip_success" => Success(Unvip),
        "bad_unvip_grantee_not_vip" | "usage_unvip" => Failure(Unvip),

        "vips_success" | "no_vips" => Success(Vips),
        "usage_vips" => Failure(Vips),

        "whisper_banned" | "whisper_banned_recipient" | "whisper_invalid_args"
        | "whisper_invalid_login" | "whisper_invalid_self" | "whisper_limit_per_min"
        | "whisper_limit_per_sec" | "whisper_restricted" | "whisper_restricted_recipient" => {
            Failure(Whisper)
        }

        "no_permission" | "msg_banned" | "msg_room_not_found" | "msg_channel_suspended"
        | "tos_ban" | "invalid_user" => FailureAll,

        _ => return None,
    })
}

struct PendingReply<T: Transport, L: LoginCredentials> {
    topic: ReplyTopic,
    channel: String,
    /// Whisper-style commands: Twitch stays silent on success, so the
    /// deadline resolves the operation instead of rejecting it.
    timeout_ok: bool,
    tx: oneshot::Sender<Result<Reply, Error<T, L>>>,
}

struct PendingJoin<T: Transport, L: LoginCredentials> {
    /// All requested channels, in call order; the resolved value.
    channels: Vec<String>,
    remaining: HashSet<String>,
    tx: oneshot::Sender<Result<Vec<String>, Error<T, L>>>,
}

/// All in-flight correlated operations. Owned by the connection event loop.
pub(crate) struct ReplyBus<T: Transport, L: LoginCredentials> {
    next_id: u64,
    // BTreeMaps keep listeners in registration order, so the oldest
    // matching operation is always the one a reply fulfils
    replies: BTreeMap<u64, PendingReply<T, L>>,
    joins: BTreeMap<u64, PendingJoin<T, L>>,
}

impl<T: Transport, L: LoginCredentials> ReplyBus<T, L> {
    pub fn new() -> ReplyBus<T, L> {
        ReplyBus {
            next_id: 0,
            replies: BTreeMap::new(),
            joins: BTreeMap::new(),
        }
    }

    fn take_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Registers a one-shot listener; returns the ID to arm a deadline
    /// with.
    pub fn listen_once(
        &mut self,
        topic: ReplyTopic,
        channel: String,
        timeout_ok: bool,
        tx: oneshot::Sender<Result<Reply, Error<T, L>>>,
    ) -> u64 {
        let id = self.take_id();
        self.replies.insert(
            id,
            PendingReply {
                topic,
                channel,
                timeout_ok,
                tx,
            },
        );
        id
    }

    /// Registers a join operation awaiting confirmation for every given
    /// channel.
    pub fn listen_join(
        &mut self,
        channels: Vec<String>,
        tx: oneshot::Sender<Result<Vec<String>, Error<T, L>>>,
    ) -> u64 {
        let id = self.take_id();
        self.joins.insert(
            id,
            PendingJoin {
                remaining: channels.iter().cloned().collect(),
                channels,
                tx,
            },
        );
        id
    }

    /// Completes the oldest listener on `topic` whose expected channel
    /// matches. Returns whether a listener was fulfilled.
    pub fn complete(
        &mut self,
        topic: ReplyTopic,
        channel: &str,
        result: Result<Reply, Error<T, L>>,
    ) -> bool {
        let id = self
            .replies
            .iter()
            .find(|(_, pending)| pending.topic == topic && pending.channel == channel)
            .map(|(id, _)| *id);

        match id {
            Some(id) => {
                let pending = self.replies.remove(&id).unwrap();
                pending.tx.send(result).ok();
                true
            }
            None => false,
        }
    }

    /// Rejects the oldest listener on `topic` for `channel` with the given
    /// `msg-id`.
    pub fn fail(&mut self, topic: ReplyTopic, channel: &str, msg_id: &str) -> bool {
        self.complete(
            topic,
            channel,
            Err(Error::CommandRejected(msg_id.to_owned())),
        )
    }

    /// The generic permission class: rejects every pending operation (and
    /// every pending join) for the implicated channel, across all topics at
    /// once.
    pub fn fail_channel(&mut self, channel: &str, msg_id: &str) {
        let ids = self
            .replies
            .iter()
            .filter(|(_, pending)| pending.channel == channel)
            .map(|(id, _)| *id)
            .collect::<Vec<_>>();
        for id in ids {
            let pending = self.replies.remove(&id).unwrap();
            pending
                .tx
                .send(Err(Error::CommandRejected(msg_id.to_owned())))
                .ok();
        }

        self.fail_join(channel, msg_id);
    }

    /// Marks `channel` as confirmed for the join operations awaiting it;
    /// resolves any operation whose last channel this was.
    pub fn confirm_join(&mut self, channel: &str) {
        let mut done = Vec::new();
        for (id, pending) in self.joins.iter_mut() {
            if pending.remaining.remove(channel) && pending.remaining.is_empty() {
                done.push(*id);
            }
        }
        for id in done {
            let pending = self.joins.remove(&id).unwrap();
            pending.tx.send(Ok(pending.channels)).ok();
        }
    }

    /// Rejects every join operation that still awaits `channel`. Joined
    /// channel state elsewhere is unaffected, only the futures reject.
    pub fn fail_join(&mut self, channel: &str, msg_id: &str) {
        let ids = self
            .joins
            .iter()
            .filter(|(_, pending)| pending.remaining.contains(channel))
            .map(|(id, _)| *id)
            .collect::<Vec<_>>();
        for id in ids {
            let pending = self.joins.remove(&id).unwrap();
            pending
                .tx
                .send(Err(Error::CommandRejected(msg_id.to_owned())))
                .ok();
        }
    }

    /// Reaps the listener with the given ID, if it is still outstanding.
    /// Listeners registered with `timeout_ok` resolve successfully; all
    /// others reject with the no-response error.
    pub fn deadline(&mut self, id: u64) {
        if let Some(pending) = self.replies.remove(&id) {
            if pending.timeout_ok {
                pending.tx.send(Ok(Reply::Ack)).ok();
            } else {
                pending.tx.send(Err(Error::NoResponse)).ok();
            }
        } else if let Some(pending) = self.joins.remove(&id) {
            let unconfirmed = pending
                .channels
                .iter()
                .filter(|c| pending.remaining.contains(*c))
                .cloned()
                .collect();
            pending.tx.send(Err(Error::JoinTimeout(unconfirmed))).ok();
        }
    }

    /// Fails every outstanding operation, used when the connection closes.
    pub fn fail_all(&mut self, error: Error<T, L>) {
        for (_, pending) in std::mem::take(&mut self.replies) {
            pending.tx.send(Err(error.clone())).ok();
        }
        for (_, pending) in std::mem::take(&mut self.joins) {
            pending.tx.send(Err(error.clone())).ok();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::login::StaticLoginCredentials;
    use crate::transport::WsTransport;

    type TestBus = ReplyBus<WsTransport, StaticLoginCredentials>;

    #[test]
    fn test_complete_matches_topic_and_channel() {
        let mut bus = TestBus::new();
        let (tx, mut rx) = oneshot::channel();
        bus.listen_once(ReplyTopic::Ban, "#pajlada".to_owned(), false, tx);

        assert!(!bus.complete(ReplyTopic::Ban, "#other", Ok(Reply::Ack)));
        assert!(!bus.complete(ReplyTopic::TimeoutUser, "#pajlada", Ok(Reply::Ack)));
        assert!(rx.try_recv().is_err());

        assert!(bus.complete(ReplyTopic::Ban, "#pajlada", Ok(Reply::Ack)));
        assert!(matches!(rx.try_recv().unwrap(), Ok(Reply::Ack)));
    }

    #[test]
    fn test_oldest_listener_wins() {
        let mut bus = TestBus::new();
        let (tx1, mut rx1) = oneshot::channel();
        let (tx2, mut rx2) = oneshot::channel();
        bus.listen_once(ReplyTopic::Ban, "#pajlada".to_owned(), false, tx1);
        bus.listen_once(ReplyTopic::Ban, "#pajlada".to_owned(), false, tx2);

        bus.complete(ReplyTopic::Ban, "#pajlada", Ok(Reply::Ack));
        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_err());
    }

    #[test]
    fn test_fail_carries_msg_id() {
        let mut bus = TestBus::new();
        let (tx, mut rx) = oneshot::channel();
        bus.listen_once(ReplyTopic::Ban, "#pajlada".to_owned(), false, tx);

        bus.fail(ReplyTopic::Ban, "#pajlada", "already_banned");
        match rx.try_recv().unwrap() {
            Err(Error::CommandRejected(msg_id)) => assert_eq!(msg_id, "already_banned"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_fail_channel_rejects_everything_for_channel() {
        let mut bus = TestBus::new();
        let (tx1, mut rx1) = oneshot::channel();
        let (tx2, mut rx2) = oneshot::channel();
        let (tx3, mut rx3) = oneshot::channel();
        let (jtx, mut jrx) = oneshot::channel();
        bus.listen_once(ReplyTopic::Ban, "#pajlada".to_owned(), false, tx1);
        bus.listen_once(ReplyTopic::Slow, "#pajlada".to_owned(), false, tx2);
        bus.listen_once(ReplyTopic::Ban, "#other".to_owned(), false, tx3);
        bus.listen_join(vec!["#pajlada".to_owned()], jtx);

        bus.fail_channel("#pajlada", "msg_channel_suspended");

        assert!(matches!(
            rx1.try_recv().unwrap(),
            Err(Error::CommandRejected(_))
        ));
        assert!(matches!(
            rx2.try_recv().unwrap(),
            Err(Error::CommandRejected(_))
        ));
        assert!(matches!(
            jrx.try_recv().unwrap(),
            Err(Error::CommandRejected(_))
        ));
        // the other channel's operation stays pending
        assert!(rx3.try_recv().is_err());
    }

    #[test]
    fn test_join_requires_all_confirmations() {
        let mut bus = TestBus::new();
        let (tx, mut rx) = oneshot::channel();
        bus.listen_join(
            vec!["#a".to_owned(), "#b".to_owned(), "#c".to_owned()],
            tx,
        );

        bus.confirm_join("#a");
        bus.confirm_join("#c");
        assert!(rx.try_recv().is_err());

        bus.confirm_join("#b");
        assert_eq!(
            rx.try_recv().unwrap().unwrap(),
            vec!["#a".to_owned(), "#b".to_owned(), "#c".to_owned()]
        );
    }

    #[test]
    fn test_join_single_failure_rejects_whole_operation() {
        let mut bus = TestBus::new();
        let (tx, mut rx) = oneshot::channel();
        bus.listen_join(vec!["#a".to_owned(), "#b".to_owned()], tx);

        bus.confirm_join("#a");
        bus.fail_join("#b", "msg_channel_suspended");
        assert!(matches!(
            rx.try_recv().unwrap(),
            Err(Error::CommandRejected(_))
        ));
    }

    #[test]
    fn test_deadline_rejects() {
        let mut bus = TestBus::new();
        let (tx, mut rx) = oneshot::channel();
        let id = bus.listen_once(ReplyTopic::Ban, "#pajlada".to_owned(), false, tx);

        bus.deadline(id);
        assert!(matches!(rx.try_recv().unwrap(), Err(Error::NoResponse)));
    }

    #[test]
    fn test_deadline_after_completion_is_noop() {
        let mut bus = TestBus::new();
        let (tx, mut rx) = oneshot::channel();
        let id = bus.listen_once(ReplyTopic::Ban, "#pajlada".to_owned(), false, tx);

        bus.complete(ReplyTopic::Ban, "#pajlada", Ok(Reply::Ack));
        bus.deadline(id);
        assert!(matches!(rx.try_recv().unwrap(), Ok(Reply::Ack)));
    }

    #[test]
    fn test_whisper_style_deadline_is_success() {
        let mut bus = TestBus::new();
        let (tx, mut rx) = oneshot::channel();
        let id = bus.listen_once(ReplyTopic::Whisper, "#tmijs".to_owned(), true, tx);

        bus.deadline(id);
        assert!(matches!(rx.try_recv().unwrap(), Ok(Reply::Ack)));
    }

    #[test]
    fn test_join_deadline_lists_unconfirmed_channels() {
        let mut bus = TestBus::new();
        let (tx, mut rx) = oneshot::channel();
        let id = bus.listen_join(
            vec!["#a".to_owned(), "#b".to_owned(), "#c".to_owned()],
            tx,
        );

        bus.confirm_join("#b");
        bus.deadline(id);
        match rx.try_recv().unwrap() {
            Err(Error::JoinTimeout(channels)) => {
                assert_eq!(channels, vec!["#a".to_owned(), "#c".to_owned()]);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_classify_representative_msg_ids() {
        use NoticeClass::*;
        use ReplyTopic::*;

        assert_eq!(classify_msg_id("ban_success"), Some(Success(Ban)));
        assert_eq!(classify_msg_id("already_banned"), Some(Failure(Ban)));
        assert_eq!(classify_msg_id("color_changed"), Some(Success(Color)));
        assert_eq!(classify_msg_id("usage_slow_on"), Some(Failure(Slow)));
        assert_eq!(classify_msg_id("room_mods"), Some(Success(Mods)));
        assert_eq!(classify_msg_id("msg_channel_suspended"), Some(FailureAll));
        assert_eq!(classify_msg_id("no_permission"), Some(FailureAll));
        assert_eq!(classify_msg_id("some_future_msg_id"), None);
    }
}
