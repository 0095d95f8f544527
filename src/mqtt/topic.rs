//! Topic filters and the device's private namespace.

use crate::config::DeviceIdentity;

pub const STATUS: &str = "status";
pub const ERROR: &str = "error";
pub const UPDATE: &str = "update";
pub const CONFIG: &str = "config";

/// Matches `topic` against a subscription filter.
///
/// The two strings are walked in lockstep. `+` consumes one topic segment up
/// to the next `/`; `#` reached while topic bytes remain accepts the rest.
/// Any other byte must match literally, and both cursors must run out
/// together.
///
/// Neither wildcard matches an empty tail: `a/+` does not match `a/`, and
/// `a/#` matches neither `a` nor `a/`.
pub fn match_topic(filter: &str, topic: &str) -> bool {
    let pattern = filter.as_bytes();
    let topic = topic.as_bytes();
    let (mut p, mut t) = (0, 0);

    while p < pattern.len() && t < topic.len() {
        match pattern[p] {
            b'+' => {
                while t < topic.len() && topic[t] != b'/' {
                    t += 1;
                }
                p += 1;
            }
            b'#' => return true,
            c if c != topic[t] => return false,
            _ => {
                p += 1;
                t += 1;
            }
        }
    }

    p == pattern.len() && t == topic.len()
}

/// `<base_topic>/<chip id hex>`, without a trailing slash.
pub fn device_topic(base_topic: &str, identity: &DeviceIdentity) -> String {
    let base = base_topic.trim_end_matches('/');
    if base.is_empty() {
        format!("{:x}", identity.chip_id)
    } else {
        format!("{}/{:x}", base, identity.chip_id)
    }
}

/// Resolves a publish target. Relative subtopics land under the device topic.
pub fn resolve(device_topic: &str, topic: &str, absolute: bool) -> String {
    if absolute {
        topic.to_string()
    } else {
        format!("{}/{}", device_topic, topic.trim_start_matches('/'))
    }
}
