//! Session-key routing: a pure function set turning channel-supplied
//! identity tuples into the opaque session-key strings the Dispatcher
//! and agent consume. The Dispatcher never interprets these strings;
//! interpretation lives here and in the channel adapters that call it.

/// Session key reserved for all heartbeat-originated dispatches.
pub const HEARTBEAT_SESSION_KEY: &str = "heartbeat";
/// Session key reserved for all cron-originated dispatches.
pub const CRON_SESSION_KEY: &str = "cron";
/// Session key reserved for the optional rerouted "main" debug channel.
pub const MAIN_SESSION_KEY: &str = "main";

/// One-to-one chat session: `agent:<agent_id>:user:<user_id>`.
pub fn one_to_one(agent_id: &str, user_id: &str) -> String {
    format!("agent:{agent_id}:user:{user_id}")
}

/// Group chat on a platform: `<platform>:<agent_id>:guild:<guild_id>:<channel_id>:<user_id>`.
pub fn guild_channel(platform: &str, agent_id: &str, guild_id: &str, channel_id: &str, user_id: &str) -> String {
    format!("{platform}:{agent_id}:guild:{guild_id}:{channel_id}:{user_id}")
}

/// Chat-platform direct message: `<platform>:<agent_id>:dm:<user_id>`.
pub fn direct_message(platform: &str, agent_id: &str, user_id: &str) -> String {
    format!("{platform}:{agent_id}:dm:{user_id}")
}

/// Thread-in-channel: `<platform>:<agent_id>:guild:<guild_id>:<channel_id>:<thread_id>:<user_id>`.
pub fn thread(platform: &str, agent_id: &str, guild_id: &str, channel_id: &str, thread_id: &str, user_id: &str) -> String {
    format!("{platform}:{agent_id}:guild:{guild_id}:{channel_id}:{thread_id}:{user_id}")
}

/// Rewrites a routed session key to [`MAIN_SESSION_KEY`] when it matches
/// the configured "main" channel, enabling a single cross-channel
/// conversation for debugging. `main_channel` is typically a platform's
/// channel id, compared against the `channel_id` the caller routed with.
pub fn reroute_main(session_key: String, channel_id: &str, main_channel: Option<&str>) -> String {
    match main_channel {
        Some(main) if main == channel_id => MAIN_SESSION_KEY.to_string(),
        _ => session_key,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_tuple_yields_same_key() {
        assert_eq!(one_to_one("bot", "u1"), one_to_one("bot", "u1"));
    }

    #[test]
    fn thread_key_differs_from_parent_channel_key() {
        let channel_key = guild_channel("discord", "bot", "g1", "c1", "u1");
        let thread_key = thread("discord", "bot", "g1", "c1", "t1", "u1");
        assert_ne!(channel_key, thread_key);
    }

    #[test]
    fn routing_functions_never_collide_with_reserved_keys() {
        let keys = vec![
            one_to_one("bot", "u1"),
            guild_channel("discord", "bot", "g1", "c1", "u1"),
            direct_message("discord", "bot", "u1"),
            thread("discord", "bot", "g1", "c1", "t1", "u1"),
        ];
        for key in keys {
            assert_ne!(key, HEARTBEAT_SESSION_KEY);
            assert_ne!(key, CRON_SESSION_KEY);
            assert_ne!(key, MAIN_SESSION_KEY);
        }
    }

    #[test]
    fn reroute_main_only_applies_to_the_configured_channel() {
        let key = guild_channel("discord", "bot", "g1", "general", "u1");
        let rerouted = reroute_main(key.clone(), "general", Some("general"));
        assert_eq!(rerouted, MAIN_SESSION_KEY);

        let not_rerouted = reroute_main(key.clone(), "random", Some("general"));
        assert_eq!(not_rerouted, key);

        let unset = reroute_main(key.clone(), "general", None);
        assert_eq!(unset, key);
    }
}
