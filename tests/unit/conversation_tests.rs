use dispatcher::models::chat_id::ChatId;
use dispatcher::models::conversation::Conversation;

#[test]
fn new_auto_registered_starts_with_no_trigger_and_no_capabilities() {
    let chat_id = ChatId::parse("sig:+15551234567").expect("valid");
    let conversation = Conversation::new_auto_registered(chat_id, "andy".into());

    assert!(conversation.auto_registered);
    assert!(!conversation.requires_trigger);
    assert!(!conversation.is_main);
    assert!(conversation.capabilities.is_empty());
    assert_eq!(conversation.created_at, conversation.last_active_at);
}

#[test]
fn has_capability_checks_exact_membership() {
    let chat_id = ChatId::parse("sig:+15551234567").expect("valid");
    let mut conversation = Conversation::new_auto_registered(chat_id, "andy".into());
    conversation.capabilities = vec!["schedule".into(), "bookmark".into()];

    assert!(conversation.has_capability("schedule"));
    assert!(conversation.has_capability("bookmark"));
    assert!(!conversation.has_capability("voice"));
}
