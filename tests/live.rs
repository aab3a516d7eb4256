//! Tier 2 live integration tests against a real Slack workspace.
//!
//! Disabled by default — enable with:
//!
//! ```sh
//! SLACK_TEST_BOT_TOKEN=xoxb-... SLACK_TEST_CHANNEL_ID=C0123456 \
//!     cargo test --test live --features live-slack-tests
//! ```
//!
//! Posts a real message to `SLACK_TEST_CHANNEL_ID` and confirms the API
//! call succeeds. This only exercises the raw Slack API surface the
//! `SlackChannel` adapter wraps; it does not spin up the dispatcher binary
//! or a Socket Mode listener.
#![cfg(feature = "live-slack-tests")]
#![allow(clippy::expect_used, clippy::unwrap_used, missing_docs)]

use slack_morphism::prelude::{
    SlackApiChatPostMessageRequest, SlackApiToken, SlackApiTokenType, SlackApiTokenValue,
    SlackChannelId, SlackClient, SlackClientHyperHttpsConnector, SlackMessageContent,
};

fn env_var(name: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| panic!("{name} must be set to run live Slack tests"))
}

#[tokio::test]
async fn chat_post_message_reaches_the_test_channel() {
    let bot_token = env_var("SLACK_TEST_BOT_TOKEN");
    let channel_id = env_var("SLACK_TEST_CHANNEL_ID");

    let connector = SlackClientHyperHttpsConnector::new().expect("https connector");
    let client = SlackClient::new(connector);
    let token = SlackApiToken {
        token_value: SlackApiTokenValue(bot_token),
        cookie: None,
        team_id: None,
        scope: None,
        token_type: Some(SlackApiTokenType::Bot),
    };
    let session = client.open_session(&token);

    let request = SlackApiChatPostMessageRequest {
        channel: SlackChannelId(channel_id),
        content: SlackMessageContent {
            text: Some("dispatcher live test: chat.postMessage round-trip".into()),
            blocks: None,
            attachments: None,
            upload: None,
            files: None,
            reactions: None,
            metadata: None,
        },
        as_user: None,
        icon_emoji: None,
        icon_url: None,
        link_names: None,
        parse: None,
        thread_ts: None,
        username: None,
        reply_broadcast: None,
        unfurl_links: None,
        unfurl_media: None,
    };

    let response = session
        .chat_post_message(&request)
        .await
        .expect("chat.postMessage should succeed against the test workspace");

    assert!(!response.ts.0.is_empty());
}

#[tokio::test]
async fn auth_test_resolves_a_bot_user_id() {
    let bot_token = env_var("SLACK_TEST_BOT_TOKEN");

    let connector = SlackClientHyperHttpsConnector::new().expect("https connector");
    let client = SlackClient::new(connector);
    let token = SlackApiToken {
        token_value: SlackApiTokenValue(bot_token),
        cookie: None,
        team_id: None,
        scope: None,
        token_type: Some(SlackApiTokenType::Bot),
    };
    let session = client.open_session(&token);

    let auth = session
        .auth_test()
        .await
        .expect("auth.test should succeed against the test workspace");

    assert!(!auth.user_id.0.is_empty());
}
