//! The semantic events delivered to the embedding application.

use crate::message::{IRCMessage, IRCTags};
use std::time::Duration;

/// A semantic event derived from the incoming message stream, delivered
/// through the receiver returned by [`Client::new`](crate::Client::new).
///
/// This type is non-exhaustive because more types of events exist and can
/// be added.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum Event {
    /// The client is opening a connection.
    Connecting {
        /// Hostname being connected to
        server: String,
        /// Port being connected to
        port: u16,
    },
    /// The handshake completed (`376` received).
    Connected {
        /// Hostname connected to
        server: String,
        /// Port connected to
        port: u16,
    },
    /// The server accepted the login (`001` received).
    Logon,
    /// The connection was closed, by either side.
    Disconnected {
        /// Human-readable close reason
        reason: String,
    },
    /// A reconnect attempt is about to be made.
    Reconnect,
    /// The configured maximum number of reconnect attempts was exhausted.
    MaxReconnect,
    /// The server pinged us (the client answers automatically).
    Ping,
    /// The server answered one of our pings.
    Pong {
        /// Time between our `PING` and the server's `PONG`
        latency: Duration,
    },
    /// A user joined a channel. `is_self` is set when it is the logged-in
    /// user (emitted on the first `USERSTATE` for the channel, or on the
    /// `JOIN` echo for anonymous logins).
    Join {
        /// Channel that was joined
        channel: String,
        /// Login name of the joining user
        username: String,
        /// Whether the joining user is the logged-in user
        is_self: bool,
    },
    /// A user left a channel.
    Part {
        /// Channel that was left
        channel: String,
        /// Login name of the leaving user
        username: String,
        /// Whether the leaving user is the logged-in user
        is_self: bool,
    },
    /// A regular chat message.
    Chat {
        /// Channel the message was sent to
        channel: String,
        /// Message tags (normalized)
        tags: IRCTags,
        /// Message text
        message: String,
        /// Sending user's login name
        username: String,
        /// Whether the message was sent by the logged-in user
        is_self: bool,
    },
    /// A `/me` chat message (`\u{1}ACTION ...\u{1}` payload).
    Action {
        /// Channel the message was sent to
        channel: String,
        /// Message tags (normalized)
        tags: IRCTags,
        /// Message text, without the ACTION control sequence
        message: String,
        /// Sending user's login name
        username: String,
        /// Whether the message was sent by the logged-in user
        is_self: bool,
    },
    /// A chat message cheering bits.
    Cheer {
        /// Channel the message was sent to
        channel: String,
        /// Message tags; the amount is in the raw `bits` tag
        tags: IRCTags,
        /// Message text
        message: String,
        /// Sending user's login name
        username: String,
    },
    /// A chat message redeeming a custom channel-points reward.
    Redeem {
        /// Channel the message was sent to
        channel: String,
        /// Login name of the redeeming user
        username: String,
        /// The reward that was redeemed (`custom-reward-id` tag)
        reward_type: String,
        /// Message tags (normalized)
        tags: IRCTags,
        /// Message text
        message: String,
    },
    /// A whisper sent to the logged-in user.
    Whisper {
        /// Login name of the sending user
        from: String,
        /// Message tags (normalized)
        tags: IRCTags,
        /// Message text
        message: String,
    },
    /// A server `NOTICE`.
    Notice {
        /// Channel the notice refers to (the global default channel for
        /// notices that are not channel-scoped)
        channel: String,
        /// The notice's `msg-id` tag, if any
        msg_id: Option<String>,
        /// Notice text
        message: String,
    },
    /// A user was permanently banned (`CLEARCHAT` with a target but no
    /// `ban-duration`).
    Ban {
        /// Channel the ban happened in
        channel: String,
        /// Login name of the banned user
        username: String,
        /// Message tags (normalized)
        tags: IRCTags,
    },
    /// A user was timed out (`CLEARCHAT` with a `ban-duration`).
    TimedOut {
        /// Channel the timeout happened in
        channel: String,
        /// Login name of the timed-out user
        username: String,
        /// Length of the timeout in seconds
        duration: u64,
        /// Message tags (normalized)
        tags: IRCTags,
    },
    /// The entire chat was cleared.
    ClearChat {
        /// Channel that was cleared
        channel: String,
    },
    /// A single message was deleted (`CLEARMSG`).
    MessageDeleted {
        /// Channel the message was deleted in
        channel: String,
        /// Login name of the user whose message was deleted
        username: String,
        /// Text of the deleted message
        message: String,
        /// Message tags; the deleted message's ID is in `target-msg-id`
        tags: IRCTags,
    },
    /// Current room modes of a channel.
    RoomState {
        /// The channel
        channel: String,
        /// Room state tags (normalized)
        tags: IRCTags,
    },
    /// Emote-only mode was enabled or disabled.
    EmoteOnly {
        /// The channel
        channel: String,
        /// New state
        enabled: bool,
    },
    /// Followers-only mode changed.
    FollowersOnly {
        /// The channel
        channel: String,
        /// New state
        enabled: bool,
        /// Minimum follow age in minutes (0 when disabled)
        minutes: u64,
    },
    /// Slow mode changed.
    Slow {
        /// The channel
        channel: String,
        /// New state
        enabled: bool,
        /// Seconds users must wait between messages (0 when disabled)
        seconds: u64,
    },
    /// Unique-chat (r9k) mode was enabled or disabled.
    R9kBeta {
        /// The channel
        channel: String,
        /// New state
        enabled: bool,
    },
    /// Subscribers-only mode was enabled or disabled.
    Subscribers {
        /// The channel
        channel: String,
        /// New state
        enabled: bool,
    },
    /// A new subscription.
    Sub {
        /// The channel
        channel: String,
        /// Login name of the subscribing user
        username: String,
        /// `USERNOTICE` tags, including the `msg-param-*` details
        tags: IRCTags,
        /// Share message, if the user wrote one
        message: Option<String>,
    },
    /// A resubscription.
    Resub {
        /// The channel
        channel: String,
        /// Login name of the resubscribing user
        username: String,
        /// Total number of months subscribed
        cumulative_months: u64,
        /// `USERNOTICE` tags, including the `msg-param-*` details
        tags: IRCTags,
        /// Share message, if the user wrote one
        message: Option<String>,
    },
    /// A gifted subscription.
    SubGift {
        /// The channel
        channel: String,
        /// Login name of the gifting user
        username: String,
        /// Login name of the recipient
        recipient: String,
        /// `USERNOTICE` tags, including the `msg-param-*` details
        tags: IRCTags,
    },
    /// A gifted subscription from an anonymous gifter.
    AnonSubGift {
        /// The channel
        channel: String,
        /// Login name of the recipient
        recipient: String,
        /// `USERNOTICE` tags, including the `msg-param-*` details
        tags: IRCTags,
    },
    /// A batch of random gift subs.
    SubMysteryGift {
        /// The channel
        channel: String,
        /// Login name of the gifting user
        username: String,
        /// Number of gifted subscriptions
        count: u64,
        /// `USERNOTICE` tags, including the `msg-param-*` details
        tags: IRCTags,
    },
    /// A batch of random gift subs from an anonymous gifter.
    AnonSubMysteryGift {
        /// The channel
        channel: String,
        /// Number of gifted subscriptions
        count: u64,
        /// `USERNOTICE` tags, including the `msg-param-*` details
        tags: IRCTags,
    },
    /// A user converted their Prime sub into a paid one.
    PrimePaidUpgrade {
        /// The channel
        channel: String,
        /// Login name of the upgrading user
        username: String,
        /// `USERNOTICE` tags
        tags: IRCTags,
    },
    /// A user continued their gifted sub as a paid one.
    GiftPaidUpgrade {
        /// The channel
        channel: String,
        /// Login name of the upgrading user
        username: String,
        /// Login name of the original gifter
        sender: Option<String>,
        /// `USERNOTICE` tags
        tags: IRCTags,
    },
    /// A user continued an anonymously gifted sub as a paid one.
    AnonGiftPaidUpgrade {
        /// The channel
        channel: String,
        /// Login name of the upgrading user
        username: String,
        /// `USERNOTICE` tags
        tags: IRCTags,
    },
    /// A moderator announcement.
    Announcement {
        /// The channel
        channel: String,
        /// Login name of the announcing moderator
        username: String,
        /// `USERNOTICE` tags
        tags: IRCTags,
        /// Announcement text
        message: String,
    },
    /// Another channel raided this channel.
    Raided {
        /// The raided channel
        channel: String,
        /// Login name of the raiding channel
        username: String,
        /// Number of raiding viewers
        viewers: u64,
        /// `USERNOTICE` tags
        tags: IRCTags,
    },
    /// A `USERNOTICE` with a `msg-id` outside the known taxonomy.
    UserNotice {
        /// The channel
        channel: String,
        /// The unrecognized `msg-id`
        msg_id: String,
        /// `USERNOTICE` tags
        tags: IRCTags,
        /// Attached message, if any
        message: Option<String>,
    },
    /// The channel started hosting another channel.
    Hosting {
        /// The hosting channel
        channel: String,
        /// The channel being hosted
        target: String,
        /// Number of viewers being sent over
        viewers: u64,
    },
    /// Another channel started hosting us (`jtv` service message).
    Hosted {
        /// The hosted channel (ours)
        channel: String,
        /// Login name of the hosting channel
        host: String,
        /// Number of viewers sent over, if announced
        viewers: Option<u64>,
        /// Whether this is an auto-host
        auto_host: bool,
    },
    /// The channel stopped hosting.
    Unhost {
        /// The channel
        channel: String,
        /// Number of viewers that were being sent over
        viewers: u64,
    },
    /// The moderator list of a channel, in reply to `/mods`.
    Mods {
        /// The channel
        channel: String,
        /// Login names of all moderators
        mods: Vec<String>,
    },
    /// The VIP list of a channel, in reply to `/vips`.
    Vips {
        /// The channel
        channel: String,
        /// Login names of all VIPs
        vips: Vec<String>,
    },
    /// A user gained moderator status (`MODE +o`).
    Mod {
        /// The channel
        channel: String,
        /// Login name of the new moderator
        username: String,
    },
    /// A user lost moderator status (`MODE -o`).
    Unmod {
        /// The channel
        channel: String,
        /// Login name of the removed moderator
        username: String,
    },
    /// The logged-in user's emote sets changed.
    EmoteSets {
        /// Raw comma-separated `emote-sets` tag value
        emote_sets: String,
    },
    /// Global state of the logged-in user (`GLOBALUSERSTATE`).
    GlobalUserState {
        /// State tags (normalized)
        tags: IRCTags,
    },
    /// Names list for a channel (numeric `353`).
    Names {
        /// The channel
        channel: String,
        /// Login names of (some of) the users in the channel
        usernames: Vec<String>,
    },
    /// A message was caught by AutoMod.
    AutoMod {
        /// The channel
        channel: String,
        /// The rejecting `msg-id` (`msg_rejected` or
        /// `msg_rejected_mandatory`)
        msg_id: String,
        /// Notice text
        message: String,
    },
    /// Every successfully parsed incoming message, before dispatch.
    RawMessage {
        /// The parsed message, with normalized tags
        message: IRCMessage,
    },
}
