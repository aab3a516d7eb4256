use dispatcher::channel::OfflineQueue;
use dispatcher::models::chat_id::ChatId;

#[test]
fn drain_returns_pending_sends_in_fifo_order() {
    let queue = OfflineQueue::new();
    let a = ChatId::parse("sig:+15551234567").expect("valid");
    let b = ChatId::parse("slack:U0123456").expect("valid");

    queue.push(a.clone(), "first".into());
    queue.push(b.clone(), "second".into());
    queue.push(a.clone(), "third".into());

    let drained = queue.drain();
    assert_eq!(
        drained,
        vec![
            (a.clone(), "first".to_owned()),
            (b, "second".to_owned()),
            (a, "third".to_owned()),
        ]
    );
}

#[test]
fn drain_empties_the_queue() {
    let queue = OfflineQueue::new();
    queue.push(ChatId::parse("sig:+15551234567").expect("valid"), "hi".into());

    assert_eq!(queue.drain().len(), 1);
    assert!(queue.drain().is_empty());
}
