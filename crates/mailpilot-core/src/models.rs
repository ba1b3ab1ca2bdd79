//! Email data structures

use chrono::{DateTime, Local, Utc};
use serde::Serialize;

/// Header-level view of one unread message, as returned by the
/// `list_unread_emails` tool. The `date` field carries the already
/// formatted local time so the payload is flat text for the model.
#[derive(Debug, Clone, Serialize)]
pub struct EmailSummary {
    /// IMAP UID (server-assigned, stable within the folder)
    pub uid: u32,

    /// Localized "YYYY-MM-DD HH:MM", empty if the message has no date
    pub date: String,

    /// Subject line, "(No Subject)" if absent
    pub subject: String,

    /// Sender as "Name <email>" or bare address
    pub sender: String,
}

/// A fully fetched message, body included
#[derive(Debug, Clone)]
pub struct FetchedEmail {
    /// IMAP UID
    pub uid: u32,

    /// Subject line
    pub subject: String,

    /// Sender as "Name <email>" or bare address
    pub sender: String,

    /// Message date, if the headers carried one
    pub date: Option<DateTime<Utc>>,

    /// Body text. Prefers the text/plain part; falls back to the HTML
    /// part flattened to plain text.
    pub body: String,
}

/// Format a timestamp for display in the local timezone.
///
/// Returns `""` for `None`. Timestamps are stored UTC-normalized, so a
/// naive source timestamp (treated as UTC at parse time) and an aware
/// one format identically.
pub fn fmt_local(date: Option<DateTime<Utc>>) -> String {
    match date {
        Some(dt) => dt.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone};

    #[test]
    fn test_fmt_local_none_is_empty() {
        assert_eq!(fmt_local(None), "");
    }

    #[test]
    fn test_fmt_local_naive_and_aware_agree() {
        let naive = NaiveDate::from_ymd_opt(2024, 3, 9)
            .unwrap()
            .and_hms_opt(14, 30, 0)
            .unwrap();
        // A naive timestamp is assumed UTC before conversion
        let from_naive = fmt_local(Some(Utc.from_utc_datetime(&naive)));
        let aware = Utc.with_ymd_and_hms(2024, 3, 9, 14, 30, 0).unwrap();
        assert_eq!(from_naive, fmt_local(Some(aware)));
    }

    #[test]
    fn test_fmt_local_shape() {
        let dt = Utc.with_ymd_and_hms(2024, 12, 1, 8, 5, 33).unwrap();
        let s = fmt_local(Some(dt));
        // "YYYY-MM-DD HH:MM", seconds dropped
        assert_eq!(s.len(), 16);
        assert_eq!(&s[4..5], "-");
        assert_eq!(&s[10..11], " ");
        assert_eq!(&s[13..14], ":");
    }
}
