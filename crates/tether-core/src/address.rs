//! Network addressing (JIDs).
//!
//! A JID is `user[:device]@server`. Individual accounts appear either under
//! the phone-number server or under the linked-id server; groups, broadcasts
//! and newsletters have servers of their own.

pub const USER_SERVER: &str = "s.whatsapp.net";
pub const LID_SERVER: &str = "lid";
pub const GROUP_SERVER: &str = "g.us";
pub const BROADCAST_SERVER: &str = "broadcast";
pub const NEWSLETTER_SERVER: &str = "newsletter";

/// Split a JID into its user part (device suffix dropped) and server.
pub fn split_jid(jid: &str) -> (&str, &str) {
    let (user, server) = jid.split_once('@').unwrap_or((jid, ""));
    let user = user.split_once(':').map_or(user, |(u, _)| u);
    (user, server)
}

pub fn server_of(jid: &str) -> &str {
    split_jid(jid).1
}

pub fn is_group(jid: &str) -> bool {
    server_of(jid) == GROUP_SERVER
}

/// Chats this bridge never answers: groups, status/broadcast lists, newsletters.
pub fn is_non_personal(jid: &str) -> bool {
    matches!(
        server_of(jid),
        GROUP_SERVER | BROADCAST_SERVER | NEWSLETTER_SERVER
    )
}

/// Canonical phone-like sender id.
///
/// Linked-id senders are resolved through the alternate phone JID when the
/// library supplies one; otherwise the bare linked id is used.
pub fn canonical_sender(jid: &str, alt_jid: Option<&str>) -> String {
    let chosen = match alt_jid {
        Some(alt) if server_of(jid) == LID_SERVER && server_of(alt) == USER_SERVER => alt,
        _ => jid,
    };
    split_jid(chosen).0.to_string()
}

/// Phone part of our own identity, e.g. `15550001111:7@s.whatsapp.net`.
pub fn phone_of(identity: &str) -> &str {
    split_jid(identity).0
}

/// Normalize an outbound address to JID form.
///
/// Anything that already carries a server is passed through unchanged, so
/// the function is idempotent. Bare numbers are stripped to digits.
pub fn normalize_address(address: &str) -> Option<String> {
    let trimmed = address.trim();
    if trimmed.contains('@') {
        return Some(trimmed.to_string());
    }
    let digits: String = trimmed.chars().filter(char::is_ascii_digit).collect();
    if digits.is_empty() {
        return None;
    }
    Some(format!("{digits}@{USER_SERVER}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_drops_device() {
        assert_eq!(
            split_jid("5511999999999:12@s.whatsapp.net"),
            ("5511999999999", "s.whatsapp.net")
        );
        assert_eq!(split_jid("bare"), ("bare", ""));
    }

    #[test]
    fn non_personal_servers() {
        assert!(is_group("120363025246125486@g.us"));
        assert!(is_non_personal("status@broadcast"));
        assert!(is_non_personal("1203630@newsletter"));
        assert!(!is_non_personal("5511999999999@s.whatsapp.net"));
        assert!(!is_non_personal("123456789@lid"));
    }

    #[test]
    fn canonical_sender_phone_scheme() {
        assert_eq!(
            canonical_sender("5511999999999@s.whatsapp.net", None),
            "5511999999999"
        );
    }

    #[test]
    fn canonical_sender_lid_with_alt() {
        assert_eq!(
            canonical_sender("98765432101234@lid", Some("5511988887777@s.whatsapp.net")),
            "5511988887777"
        );
    }

    #[test]
    fn canonical_sender_lid_without_alt() {
        assert_eq!(canonical_sender("98765432101234:4@lid", None), "98765432101234");
    }

    #[test]
    fn alt_ignored_for_phone_scheme() {
        assert_eq!(
            canonical_sender("5511999999999@s.whatsapp.net", Some("1@lid")),
            "5511999999999"
        );
    }

    #[test]
    fn normalize_bare_number() {
        assert_eq!(
            normalize_address("+55 (11) 99999-9999").as_deref(),
            Some("5511999999999@s.whatsapp.net")
        );
    }

    #[test]
    fn normalize_is_idempotent() {
        let once = normalize_address("15550001111").unwrap();
        assert_eq!(normalize_address(&once).unwrap(), once);
        assert_eq!(
            normalize_address("98765@lid").as_deref(),
            Some("98765@lid")
        );
    }

    #[test]
    fn normalize_rejects_empty() {
        assert!(normalize_address("   ").is_none());
        assert!(normalize_address("abc").is_none());
    }

    #[test]
    fn phone_of_identity() {
        assert_eq!(phone_of("15550001111:7@s.whatsapp.net"), "15550001111");
    }
}
