use std::sync::Arc;

use dispatcher::models::chat_id::ChatId;
use dispatcher::models::conversation::Conversation;
use dispatcher::persistence::address_book_repo::AddressBookRepo;
use dispatcher::persistence::db;
use dispatcher::AppError;

async fn repo() -> AddressBookRepo {
    let db = db::connect_memory().await.expect("in-memory db");
    AddressBookRepo::new(Arc::new(db))
}

#[tokio::test]
async fn link_aliases_a_new_chat_id_onto_the_target_folder() {
    let repo = repo().await;
    let target = ChatId::parse("sig:+15551234567").expect("valid");
    let mut conversation = Conversation::new_auto_registered(target.clone(), "andy".into());
    conversation.capabilities = vec!["schedule".into()];
    repo.put(&conversation).await.expect("put target");

    let alias = ChatId::parse("slack:U0123456").expect("valid");
    let aliased = repo.link(alias.clone(), &target).await.expect("link");

    assert_eq!(aliased.folder, "andy");
    assert_eq!(aliased.capabilities, vec!["schedule".to_owned()]);
    assert!(!aliased.auto_registered);

    let reloaded = repo.get(&alias).await.expect("get").expect("present");
    assert_eq!(reloaded.folder, "andy");
}

#[tokio::test]
async fn link_is_idempotent_when_alias_already_points_at_the_same_folder() {
    let repo = repo().await;
    let target = ChatId::parse("sig:+15551234567").expect("valid");
    let conversation = Conversation::new_auto_registered(target.clone(), "andy".into());
    repo.put(&conversation).await.expect("put target");

    let alias = ChatId::parse("slack:U0123456").expect("valid");
    let first = repo.link(alias.clone(), &target).await.expect("first link");
    let second = repo.link(alias, &target).await.expect("second link");

    assert_eq!(first.folder, second.folder);
}

#[tokio::test]
async fn link_rejects_an_alias_already_bound_to_a_different_folder() {
    let repo = repo().await;

    let target_a = ChatId::parse("sig:+15551234567").expect("valid");
    repo.put(&Conversation::new_auto_registered(target_a.clone(), "andy".into()))
        .await
        .expect("put target a");

    let target_b = ChatId::parse("sig:+15557654321").expect("valid");
    repo.put(&Conversation::new_auto_registered(target_b.clone(), "bob".into()))
        .await
        .expect("put target b");

    let alias = ChatId::parse("slack:U0123456").expect("valid");
    repo.link(alias.clone(), &target_a).await.expect("first link wins");

    let err = repo.link(alias, &target_b).await.unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));
}

#[tokio::test]
async fn link_against_an_unregistered_target_is_not_found() {
    let repo = repo().await;
    let target = ChatId::parse("sig:+15551234567").expect("valid");
    let alias = ChatId::parse("slack:U0123456").expect("valid");

    let err = repo.link(alias, &target).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}
