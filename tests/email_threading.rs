//! End-to-end threading: headers parsed from an inbound email feed the
//! composed outbound reply, and the reply's own headers parse back into a
//! thread the next inbound message can join.

use switchboard::email::outbound::{build_threaded_reply, compose, OutboundEmail};
use switchboard::email::threading::{parse_from_field, parse_thread_headers};

const DOMAIN: &str = "helpdesk.test";

fn formatted_headers(email: &OutboundEmail) -> String {
    let message = compose(email).expect("compose");
    String::from_utf8(message.formatted()).expect("utf8")
}

#[test]
fn reply_threads_into_the_customers_email() {
    let inbound = "Message-Id: <cust-1@mail.example>\r\nSubject: Broken login\r\n";
    let headers = parse_thread_headers(inbound);
    let customer_id = headers.message_id.expect("message id");

    let (reply_id, references) =
        build_threaded_reply(Some(&customer_id), &headers.references, DOMAIN);
    let reply = OutboundEmail {
        from: "Acme Support <support@acme.example>".to_string(),
        to: "ada@example.com".to_string(),
        subject: "Re: Broken login".to_string(),
        content: "Looking into it.".to_string(),
        message_id: reply_id.clone(),
        in_reply_to: Some(customer_id.clone()),
        references,
    };
    let raw = formatted_headers(&reply);

    // A mail client parsing our reply sees the customer's id in both
    // In-Reply-To and References, and our id round-trips bare.
    let parsed = parse_thread_headers(&raw);
    assert_eq!(parsed.message_id.as_deref(), Some(reply_id.as_str()));
    assert_eq!(parsed.in_reply_to.as_deref(), Some(customer_id.as_str()));
    assert_eq!(parsed.references, vec![customer_id]);
}

#[test]
fn three_hop_conversation_accumulates_references() {
    // Hop 1: customer opens the thread.
    let first = parse_thread_headers("Message-Id: <cust-1@mail.example>\r\n");
    let cust_1 = first.message_id.unwrap();

    // Hop 2: agent replies.
    let (agent_id, agent_refs) = build_threaded_reply(Some(&cust_1), &[], DOMAIN);
    assert_eq!(agent_refs, vec![cust_1.clone()]);

    // Hop 3: customer answers the agent from a real client, carrying the
    // chain so far. The next agent reply references every prior id once.
    let inbound = format!(
        "Message-Id: <cust-2@mail.example>\r\nIn-Reply-To: <{agent_id}>\r\nReferences: <{cust_1}> <{agent_id}>\r\n"
    );
    let headers = parse_thread_headers(&inbound);
    let cust_2 = headers.message_id.unwrap();

    let (second_agent_id, refs) =
        build_threaded_reply(Some(&cust_2), &headers.references, DOMAIN);
    assert_eq!(refs, vec![cust_1, agent_id, cust_2]);
    assert_ne!(second_agent_id, refs[1]);
}

#[test]
fn sender_from_inbound_payload_is_usable_as_reply_target() {
    let sender = parse_from_field("\"Lovelace, Ada\" <ada@example.com>");
    let email = OutboundEmail {
        from: "support@acme.example".to_string(),
        to: sender.email.clone(),
        subject: "Re: hello".to_string(),
        content: "hi".to_string(),
        message_id: "1.abc@helpdesk.test".to_string(),
        in_reply_to: None,
        references: Vec::new(),
    };
    let raw = formatted_headers(&email);
    assert!(raw.contains("To: ada@example.com"));
}
