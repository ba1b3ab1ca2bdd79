//! IMAP mail client adapter
//!
//! Every operation opens a fresh session against the configured folder
//! and logs out on all exit paths. Fetches use `BODY.PEEK` throughout so
//! reading mail on behalf of the model never flips the `\Seen` flag.

use async_imap::Client as ImapClientAsync;
use async_native_tls::TlsConnector;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use tokio::net::TcpStream;
use tokio_util::compat::TokioAsyncReadCompatExt;
use tracing::{debug, info, warn};

use crate::config::{Config, IMAP_FOLDER};
use crate::error::{Error, Result};
use crate::models::{EmailSummary, FetchedEmail};

/// Retry configuration
const MAX_RETRIES: u32 = 3;
const INITIAL_RETRY_DELAY_MS: u64 = 1000;
const MAX_RETRY_DELAY_MS: u64 = 30000;

/// Type alias for the IMAP session with our TLS stream
type ImapSession = async_imap::Session<async_native_tls::TlsStream<tokio_util::compat::Compat<TcpStream>>>;

/// Read access to a mailbox, as the tool layer sees it.
///
/// The IMAP adapter is the production implementation; tests substitute
/// an in-memory fake.
#[async_trait]
pub trait Mailbox: Send + Sync {
    /// Header-level metadata for every unread message, oldest first.
    /// Empty when nothing is unread.
    async fn list_unread(&self) -> Result<Vec<EmailSummary>>;

    /// Fetch one message by UID. `Ok(None)` when the server has no
    /// message with that UID, so callers can answer "no such message"
    /// without failing the turn.
    async fn fetch_by_uid(&self, uid: u32) -> Result<Option<FetchedEmail>>;
}

/// IMAP-backed mailbox bound to one account and one folder
pub struct ImapMailbox {
    host: String,
    port: u16,
    user: String,
    password: String,
}

impl ImapMailbox {
    /// Create an adapter from the loaded configuration
    pub fn new(config: &Config) -> Self {
        Self {
            host: config.imap_host.clone(),
            port: config.imap_port,
            user: config.imap_user.clone(),
            password: config.imap_password.clone(),
        }
    }

    /// Connect with retry logic
    async fn connect_with_retry(&self) -> Result<ImapSession> {
        let mut last_error = None;
        let mut delay_ms = INITIAL_RETRY_DELAY_MS;

        for attempt in 1..=MAX_RETRIES {
            match self.connect().await {
                Ok(session) => return Ok(session),
                Err(e) => {
                    warn!(
                        "IMAP connection attempt {}/{} to {} failed: {}",
                        attempt, MAX_RETRIES, self.host, e
                    );
                    last_error = Some(e);

                    if attempt < MAX_RETRIES {
                        tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
                        delay_ms = (delay_ms * 2).min(MAX_RETRY_DELAY_MS);
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| Error::Imap("Connection failed after retries".to_string())))
    }

    /// Open a TLS connection, authenticate, and select the folder
    async fn connect(&self) -> Result<ImapSession> {
        debug!("Connecting to {}:{}...", self.host, self.port);

        let tcp = TcpStream::connect((self.host.as_str(), self.port))
            .await
            .map_err(|e| Error::ConnectionFailed {
                host: self.host.clone(),
                reason: e.to_string(),
            })?;

        // Wrap TCP stream with compat layer for futures AsyncRead/Write
        let tcp_compat = tcp.compat();

        let tls = TlsConnector::new();
        let tls_stream = tls.connect(&self.host, tcp_compat).await.map_err(|e| {
            Error::ConnectionFailed {
                host: self.host.clone(),
                reason: e.to_string(),
            }
        })?;

        let mut client = ImapClientAsync::new(tls_stream);

        // The server sends a greeting before accepting commands; it must
        // be consumed before authenticating (see async-imap #84)
        match client.read_response().await {
            Some(Ok(_greeting)) => {}
            Some(Err(e)) => {
                return Err(Error::Imap(format!("Failed to read greeting: {:?}", e)));
            }
            None => {
                return Err(Error::Imap("Unexpected end of stream, expected greeting".to_string()));
            }
        }

        let mut session = client
            .login(&self.user, &self.password)
            .await
            .map_err(|(e, _client)| Error::Imap(format!("Login failed for {}: {}", self.user, e)))?;

        session
            .select(IMAP_FOLDER)
            .await
            .map_err(|e| Error::Imap(format!("Failed to select {}: {:?}", IMAP_FOLDER, e)))?;

        debug!("Session established for {}", self.user);
        Ok(session)
    }
}

#[async_trait]
impl Mailbox for ImapMailbox {
    async fn list_unread(&self) -> Result<Vec<EmailSummary>> {
        let mut session = self.connect_with_retry().await?;

        let uids = match session.uid_search("UNSEEN").await {
            Ok(uids) => uids,
            Err(e) => {
                session.logout().await.ok();
                return Err(Error::Imap(format!("Search failed: {:?}", e)));
            }
        };

        let mut uids: Vec<u32> = uids.into_iter().collect();
        uids.sort_unstable();
        debug!("Found {} unread messages", uids.len());

        if uids.is_empty() {
            session.logout().await.ok();
            return Ok(vec![]);
        }

        let uid_range = uids
            .iter()
            .map(|u| u.to_string())
            .collect::<Vec<_>>()
            .join(",");

        // Headers only; PEEK leaves the \Seen flag untouched
        let fetch_result = match session
            .uid_fetch(&uid_range, "(UID BODY.PEEK[HEADER])")
            .await
        {
            Ok(stream) => Ok(stream.collect::<Vec<_>>().await),
            Err(e) => Err(e),
        };

        let fetches: Vec<_> = match fetch_result {
            Ok(fetches) => fetches,
            Err(e) => {
                session.logout().await.ok();
                return Err(Error::Imap(format!("Fetch failed: {:?}", e)));
            }
        };

        // All responses collected, the session can go
        session.logout().await.ok();

        let mut summaries = Vec::new();
        for result in fetches {
            match result {
                Ok(fetch) => {
                    if let Some(summary) = parse_header_fetch(&fetch)? {
                        summaries.push(summary);
                    }
                }
                Err(e) => {
                    warn!("Error fetching message headers: {:?}", e);
                }
            }
        }

        info!("Listed {} unread messages in {}", summaries.len(), IMAP_FOLDER);
        Ok(summaries)
    }

    async fn fetch_by_uid(&self, uid: u32) -> Result<Option<FetchedEmail>> {
        let mut session = self.connect_with_retry().await?;

        let fetch_result = match session
            .uid_fetch(uid.to_string(), "(UID BODY.PEEK[])")
            .await
        {
            Ok(stream) => Ok(stream.collect::<Vec<_>>().await),
            Err(e) => Err(e),
        };

        let fetches: Vec<_> = match fetch_result {
            Ok(fetches) => fetches,
            Err(e) => {
                session.logout().await.ok();
                return Err(Error::Imap(format!("Fetch failed: {:?}", e)));
            }
        };

        session.logout().await.ok();

        for result in fetches {
            match result {
                Ok(fetch) => {
                    // Servers answer a UID FETCH for a missing UID with an
                    // empty response, so reaching a body here means found
                    if let Some(email) = parse_body_fetch(&fetch)? {
                        return Ok(Some(email));
                    }
                }
                Err(e) => {
                    warn!("Error fetching message {}: {:?}", uid, e);
                }
            }
        }

        debug!("UID {} not found in {}", uid, IMAP_FOLDER);
        Ok(None)
    }
}

/// Parse a headers-only fetch into a summary record
fn parse_header_fetch(fetch: &async_imap::types::Fetch) -> Result<Option<EmailSummary>> {
    let uid = match fetch.uid {
        Some(uid) => uid,
        None => return Ok(None),
    };

    let header = match fetch.header() {
        Some(h) => h,
        None => return Ok(None),
    };

    let parsed = mail_parser::MessageParser::default()
        .parse(header)
        .ok_or_else(|| Error::InvalidEmailFormat(format!("Unparseable headers for UID {}", uid)))?;

    Ok(Some(EmailSummary {
        uid,
        date: crate::models::fmt_local(parse_date(&parsed)),
        subject: parse_subject(&parsed),
        sender: parse_sender(&parsed),
    }))
}

/// Parse a full-body fetch into a `FetchedEmail`
fn parse_body_fetch(fetch: &async_imap::types::Fetch) -> Result<Option<FetchedEmail>> {
    let uid = match fetch.uid {
        Some(uid) => uid,
        None => return Ok(None),
    };

    let body = match fetch.body() {
        Some(b) => b,
        None => return Ok(None),
    };

    let parsed = mail_parser::MessageParser::default()
        .parse(body)
        .ok_or_else(|| Error::InvalidEmailFormat(format!("Unparseable message for UID {}", uid)))?;

    let text = extract_body_text(&parsed);

    Ok(Some(FetchedEmail {
        uid,
        subject: parse_subject(&parsed),
        sender: parse_sender(&parsed),
        date: parse_date(&parsed),
        body: text,
    }))
}

/// Prefer the plain-text part; fall back to the HTML part flattened to
/// readable text.
fn extract_body_text(parsed: &mail_parser::Message<'_>) -> String {
    let plain = parsed
        .body_text(0)
        .map(|s| s.to_string())
        .unwrap_or_default();
    if !plain.trim().is_empty() {
        return plain;
    }

    match parsed.body_html(0) {
        Some(html) => html2text::from_read(html.as_bytes(), 80)
            .unwrap_or_else(|_| html.to_string()),
        None => String::new(),
    }
}

fn parse_subject(parsed: &mail_parser::Message<'_>) -> String {
    parsed.subject().unwrap_or("(No Subject)").to_string()
}

fn parse_sender(parsed: &mail_parser::Message<'_>) -> String {
    parsed
        .from()
        .and_then(|addrs| addrs.first())
        .map(|addr| {
            let email = addr.address().map(|s| s.to_string()).unwrap_or_default();
            match addr.name() {
                Some(name) => format!("{} <{}>", name, email),
                None => email,
            }
        })
        .unwrap_or_else(|| "unknown".to_string())
}

fn parse_date(parsed: &mail_parser::Message<'_>) -> Option<DateTime<Utc>> {
    parsed
        .date()
        .and_then(|d| DateTime::from_timestamp(d.to_timestamp(), 0))
}

#[cfg(test)]
mod tests {
    use super::*;

    const RAW_PLAIN: &[u8] = b"From: Ada Lovelace <ada@example.com>\r\n\
To: you@example.com\r\n\
Subject: Analytical engines\r\n\
Date: Sat, 09 Mar 2024 14:30:00 +0000\r\n\
Content-Type: text/plain; charset=utf-8\r\n\
\r\n\
The engine weaves algebraic patterns.\r\n";

    const RAW_HTML_ONLY: &[u8] = b"From: bob@example.com\r\n\
Subject: Newsletter\r\n\
Content-Type: text/html; charset=utf-8\r\n\
\r\n\
<html><body><p>Big <b>sale</b> today</p></body></html>\r\n";

    #[test]
    fn test_extract_body_prefers_plain_text() {
        let parsed = mail_parser::MessageParser::default().parse(RAW_PLAIN).unwrap();
        let text = extract_body_text(&parsed);
        assert!(text.contains("algebraic patterns"));
    }

    #[test]
    fn test_extract_body_falls_back_to_html() {
        let parsed = mail_parser::MessageParser::default()
            .parse(RAW_HTML_ONLY)
            .unwrap();
        let text = extract_body_text(&parsed);
        assert!(text.contains("sale"));
        assert!(!text.contains("<b>"));
    }

    #[test]
    fn test_sender_formatting() {
        let parsed = mail_parser::MessageParser::default().parse(RAW_PLAIN).unwrap();
        assert_eq!(parse_sender(&parsed), "Ada Lovelace <ada@example.com>");

        let parsed = mail_parser::MessageParser::default()
            .parse(RAW_HTML_ONLY)
            .unwrap();
        assert_eq!(parse_sender(&parsed), "bob@example.com");
    }

    #[test]
    fn test_subject_default() {
        let parsed = mail_parser::MessageParser::default()
            .parse(b"From: a@b.c\r\n\r\nbody\r\n" as &[u8])
            .unwrap();
        assert_eq!(parse_subject(&parsed), "(No Subject)");
    }
}
