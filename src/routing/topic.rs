//! Path-to-channel mapping and reply-channel allocation.

use uuid::Uuid;

/// Map an HTTP path to a broker channel: strip one leading `/`, then
/// replace the remaining separators with `:`. The root path maps to the
/// empty string, which is still a legal channel.
pub fn channel_for_path(path: &str) -> String {
    path.strip_prefix('/').unwrap_or(path).replace('/', ":")
}

/// Resolve the outbound channel for a request.
pub fn resolve_channel(fixed_channel: Option<&str>, path: &str) -> String {
    match fixed_channel {
        Some(channel) => channel.to_string(),
        None => channel_for_path(path),
    }
}

/// Allocate a fresh reply channel under the outbound channel's hierarchy.
///
/// The random id is 128 bits, so two concurrent bridges can never share a
/// reply channel in practice.
pub fn allocate_reply_channel(outbound_channel: &str) -> String {
    format!("{}:response:{}", outbound_channel, Uuid::new_v4())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn path_mapping() {
        assert_eq!(channel_for_path("/"), "");
        assert_eq!(channel_for_path("/api/users"), "api:users");
        assert_eq!(channel_for_path("/a/b/c"), "a:b:c");
        assert_eq!(channel_for_path("api/x"), "api:x");
    }

    #[test]
    fn fixed_channel_wins() {
        assert_eq!(
            resolve_channel(Some("incoming-messages"), "/ignored/path"),
            "incoming-messages"
        );
        assert_eq!(resolve_channel(None, "/api/users"), "api:users");
    }

    #[test]
    fn reply_channels_are_prefixed_and_unique() {
        let mut seen = HashSet::new();
        for _ in 0..1000 {
            let channel = allocate_reply_channel("api:users");
            assert!(channel.starts_with("api:users:response:"));
            assert!(seen.insert(channel));
        }
    }
}
