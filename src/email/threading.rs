use mailparse::{parse_headers, MailHeaderMap};

/// Canonical sender extracted from a `From` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sender {
    pub email: String,
    pub display_name: String,
}

/// Parse `Name <addr>` into (addr, Name). A header without angle brackets is
/// treated as a bare address, and the display name falls back to the
/// address's local part.
pub fn parse_from_field(from: &str) -> Sender {
    if let (Some(start), Some(end)) = (from.find('<'), from.rfind('>')) {
        if start < end {
            let email = from[start + 1..end].trim().to_string();
            let name = from[..start].trim().trim_matches('"').to_string();
            let display_name = if name.is_empty() {
                local_part(&email)
            } else {
                name
            };
            return Sender {
                email,
                display_name,
            };
        }
    }
    let email = from.trim().to_string();
    Sender {
        display_name: local_part(&email),
        email,
    }
}

fn local_part(email: &str) -> String {
    email.split('@').next().unwrap_or(email).to_string()
}

/// RFC 5322 threading headers, ids stored without angle brackets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ThreadHeaders {
    pub message_id: Option<String>,
    pub in_reply_to: Option<String>,
    pub references: Vec<String>,
}

/// Extract `Message-Id`, `In-Reply-To` and `References` from a raw header
/// block (folded headers are unfolded by mailparse).
pub fn parse_thread_headers(raw: &str) -> ThreadHeaders {
    let Ok((headers, _)) = parse_headers(raw.as_bytes()) else {
        return ThreadHeaders::default();
    };
    let message_id = headers
        .get_first_value("Message-Id")
        .map(|v| strip_brackets(&v))
        .filter(|v| !v.is_empty());
    let in_reply_to = headers
        .get_first_value("In-Reply-To")
        .map(|v| strip_brackets(&v))
        .filter(|v| !v.is_empty());
    let references = headers
        .get_first_value("References")
        .map(|v| {
            v.split_whitespace()
                .map(strip_brackets)
                .filter(|r| !r.is_empty())
                .collect()
        })
        .unwrap_or_default();
    ThreadHeaders {
        message_id,
        in_reply_to,
        references,
    }
}

pub fn strip_brackets(id: &str) -> String {
    id.trim().trim_start_matches('<').trim_end_matches('>').to_string()
}

/// Drop quoted reply text: keep everything before the first line that starts
/// (after optional whitespace) with `>`.
pub fn strip_quoted_reply(text: &str) -> String {
    let mut kept = Vec::new();
    for line in text.lines() {
        if line.trim_start().starts_with('>') {
            break;
        }
        kept.push(line);
    }
    kept.join("\n").trim().to_string()
}

/// Recipient address from a SendGrid-style `envelope` JSON blob
/// (`{"to": "a@b"}` or `{"to": ["a@b", ...]}`).
pub fn parse_envelope_recipient(envelope: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(envelope).ok()?;
    match &value["to"] {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Array(items) => items.first().and_then(|v| v.as_str()).map(String::from),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_with_display_name() {
        let sender = parse_from_field("Ada Lovelace <ada@example.com>");
        assert_eq!(sender.email, "ada@example.com");
        assert_eq!(sender.display_name, "Ada Lovelace");
    }

    #[test]
    fn from_with_quoted_display_name() {
        let sender = parse_from_field("\"Lovelace, Ada\" <ada@example.com>");
        assert_eq!(sender.email, "ada@example.com");
        assert_eq!(sender.display_name, "Lovelace, Ada");
    }

    #[test]
    fn from_bare_address_uses_local_part_as_name() {
        let sender = parse_from_field("ada@example.com");
        assert_eq!(sender.email, "ada@example.com");
        assert_eq!(sender.display_name, "ada");
    }

    #[test]
    fn malformed_from_falls_back_to_whole_header() {
        let sender = parse_from_field("not an address");
        assert_eq!(sender.email, "not an address");
    }

    #[test]
    fn thread_headers_extracted_without_brackets() {
        let raw = "Message-Id: <abc.123@mail.example.com>\r\n\
                   In-Reply-To: <prev@mail.example.com>\r\n\
                   References: <a@x> <b@x>\r\n";
        let headers = parse_thread_headers(raw);
        assert_eq!(headers.message_id.as_deref(), Some("abc.123@mail.example.com"));
        assert_eq!(headers.in_reply_to.as_deref(), Some("prev@mail.example.com"));
        assert_eq!(headers.references, vec!["a@x", "b@x"]);
    }

    #[test]
    fn folded_references_header_is_unfolded() {
        let raw = "Message-Id: <abc@x>\r\nReferences: <a@x>\r\n <b@x>\r\n <c@x>\r\n";
        let headers = parse_thread_headers(raw);
        assert_eq!(headers.references, vec!["a@x", "b@x", "c@x"]);
    }

    #[test]
    fn missing_message_id_is_none() {
        let headers = parse_thread_headers("Subject: hi\r\n");
        assert_eq!(headers.message_id, None);
        assert!(headers.references.is_empty());
    }

    #[test]
    fn quoted_reply_truncated_at_first_quote_line() {
        let text = "Thanks, that fixed it!\n\nOn Tue, Jan 7 someone wrote:\n> previous\n> more";
        assert_eq!(
            strip_quoted_reply(text),
            "Thanks, that fixed it!\n\nOn Tue, Jan 7 someone wrote:"
        );
    }

    #[test]
    fn quoted_reply_with_indented_quote() {
        assert_eq!(strip_quoted_reply("ok\n  > old text"), "ok");
    }

    #[test]
    fn envelope_recipient_string_and_array() {
        assert_eq!(
            parse_envelope_recipient(r#"{"to":"support@acme.example"}"#).as_deref(),
            Some("support@acme.example")
        );
        assert_eq!(
            parse_envelope_recipient(r#"{"to":["a@x","b@x"],"from":"c@x"}"#).as_deref(),
            Some("a@x")
        );
        assert_eq!(parse_envelope_recipient("not json"), None);
    }
}
