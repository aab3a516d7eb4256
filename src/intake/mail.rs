//! Mail→bookmark intake poller: scans a mailbox for unprocessed messages
//! from a configured sender, extracts candidate URLs, and forwards each to
//! the bookmark relay. A message is labeled processed only after every URL
//! in it has been forwarded successfully — per-message atomicity, so a
//! relay outage mid-batch leaves the message unlabeled for retry on the
//! next poll.

use std::time::Duration;

use reqwest::Client;
use tracing::{info, warn};

use crate::config::MailIntakeConfig;
use crate::{AppError, Result};

/// URL blacklist substrings: tracker/meeting links that are never useful
/// bookmarks even when they pass the length floor.
const URL_BLACKLIST: &[&str] = &[
    "teams.microsoft.com",
    "zoom.us",
    "meet.google.com",
    "calendly.com",
];

/// Minimum URL length (inclusive) for a candidate to be forwarded.
const MIN_URL_LENGTH: usize = 15;

/// Spawn the mail-to-bookmark poller as a background task.
pub fn spawn_mail_poller(config: MailIntakeConfig, bookmark_relay_url: String, http: Client) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(config.poll_seconds));
        loop {
            ticker.tick().await;
            if let Err(err) = poll_once(&config, &bookmark_relay_url, &http).await {
                warn!(%err, "mail intake poll failed");
            }
        }
    });
}

async fn poll_once(config: &MailIntakeConfig, bookmark_relay_url: &str, http: &Client) -> Result<()> {
    let config = config.clone();
    let candidates = tokio::task::spawn_blocking(move || fetch_candidates(&config))
        .await
        .map_err(|err| AppError::BridgeOutage(format!("mail poll task panicked: {err}")))??;

    for candidate in candidates {
        let urls = extract_urls(&candidate.body);
        if urls.is_empty() {
            mark_processed(&candidate)?;
            continue;
        }

        let mut all_ok = true;
        for url in &urls {
            if let Err(err) = forward_to_relay(http, bookmark_relay_url, url).await {
                warn!(%err, %url, "bookmark relay forward failed; message left unlabeled for retry");
                all_ok = false;
                break;
            }
        }

        if all_ok {
            mark_processed(&candidate)?;
            info!(uid = candidate.uid, count = urls.len(), "forwarded urls from mail intake");
        }
    }

    Ok(())
}

struct MailCandidate {
    uid: u32,
    body: String,
    config: MailIntakeConfig,
}

fn fetch_candidates(config: &MailIntakeConfig) -> Result<Vec<MailCandidate>> {
    let tls = native_tls::TlsConnector::builder()
        .build()
        .map_err(|err| AppError::BridgeOutage(format!("tls connector init: {err}")))?;

    let client = imap::connect((config.imap_host.as_str(), config.imap_port), &config.imap_host, &tls)
        .map_err(|err| AppError::BridgeOutage(format!("imap connect: {err}")))?;

    let password = std::env::var(&config.password_env)
        .map_err(|_| AppError::Config(format!("{} not set", config.password_env)))?;

    let mut session = client
        .login(&config.username, &password)
        .map_err(|(err, _)| AppError::BridgeOutage(format!("imap login: {err}")))?;

    session
        .select("INBOX")
        .map_err(|err| AppError::BridgeOutage(format!("imap select INBOX: {err}")))?;

    let query = format!(
        "FROM \"{}\" UNKEYWORD {}",
        config.from_filter, config.processed_label
    );
    let uids = session
        .uid_search(&query)
        .map_err(|err| AppError::BridgeOutage(format!("imap search: {err}")))?;

    let mut candidates = Vec::new();
    for uid in uids {
        let uid_set = uid.to_string();
        let fetched = session
            .uid_fetch(&uid_set, "RFC822")
            .map_err(|err| AppError::BridgeOutage(format!("imap fetch {uid}: {err}")))?;

        let Some(message) = fetched.iter().next() else {
            continue;
        };
        let Some(raw) = message.body() else { continue };

        let Ok(parsed) = mailparse::parse_mail(raw) else {
            warn!(uid, "failed to parse fetched mail body; skipping");
            continue;
        };
        let Ok(body) = parsed.get_body() else {
            continue;
        };

        candidates.push(MailCandidate {
            uid,
            body,
            config: config.clone(),
        });
    }

    session.logout().ok();
    Ok(candidates)
}

fn mark_processed(candidate: &MailCandidate) -> Result<()> {
    let tls = native_tls::TlsConnector::builder()
        .build()
        .map_err(|err| AppError::BridgeOutage(format!("tls connector init: {err}")))?;
    let client = imap::connect(
        (candidate.config.imap_host.as_str(), candidate.config.imap_port),
        &candidate.config.imap_host,
        &tls,
    )
    .map_err(|err| AppError::BridgeOutage(format!("imap connect: {err}")))?;

    let password = std::env::var(&candidate.config.password_env)
        .map_err(|_| AppError::Config(format!("{} not set", candidate.config.password_env)))?;
    let mut session = client
        .login(&candidate.config.username, &password)
        .map_err(|(err, _)| AppError::BridgeOutage(format!("imap login: {err}")))?;
    session
        .select("INBOX")
        .map_err(|err| AppError::BridgeOutage(format!("imap select INBOX: {err}")))?;

    session
        .uid_store(
            candidate.uid.to_string(),
            format!("+FLAGS ({})", candidate.config.processed_label),
        )
        .map_err(|err| AppError::BridgeOutage(format!("imap store flag: {err}")))?;

    session.logout().ok();
    Ok(())
}

async fn forward_to_relay(http: &Client, relay_url: &str, url: &str) -> Result<()> {
    let response = http
        .post(format!("{relay_url}/bookmarks"))
        .timeout(Duration::from_secs(90))
        .json(&serde_json::json!({ "url": url }))
        .send()
        .await
        .map_err(|err| AppError::BridgeOutage(format!("bookmark relay unreachable: {err}")))?;

    if !response.status().is_success() {
        return Err(AppError::BridgeOutage(format!(
            "bookmark relay returned status {}",
            response.status()
        )));
    }
    Ok(())
}

/// Extract plain HTTP(S) URLs from `text`, dropping blacklisted
/// tracker/meeting links and anything shorter than [`MIN_URL_LENGTH`].
fn extract_urls(text: &str) -> Vec<String> {
    let re = regex::Regex::new(r"https?://\S+").unwrap_or_else(|_| {
        #[allow(clippy::unwrap_used)]
        regex::Regex::new(r"a^").unwrap()
    });

    re.find_iter(text)
        .map(|m| m.as_str().trim_end_matches(|c: char| ",.;)".contains(c)).to_owned())
        .filter(|url| url.len() >= MIN_URL_LENGTH)
        .filter(|url| !URL_BLACKLIST.iter().any(|blocked| url.contains(blocked)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_only_non_blacklisted_long_urls() {
        let text = "See https://example.com/a, and https://teams.microsoft.com/meeting/xyz. Also http://x";
        let urls = extract_urls(text);
        assert_eq!(urls, vec!["https://example.com/a".to_owned()]);
    }

    #[test]
    fn strips_trailing_punctuation() {
        let urls = extract_urls("check this out: https://example.com/page).");
        assert_eq!(urls, vec!["https://example.com/page".to_owned()]);
    }
}
