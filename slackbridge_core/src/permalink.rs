//! Best-effort thread association from Slack permalinks.
//!
//! Search matches do not carry `thread_ts` directly; reply permalinks do,
//! as a query parameter. This is lossy: top-level messages and permalinks
//! in unexpected formats simply yield `None`.

/// Extract the `thread_ts` query parameter from a message permalink.
pub fn thread_ts_from_permalink(permalink: &str) -> Option<String> {
    let url = url::Url::parse(permalink.trim()).ok()?;
    url.query_pairs()
        .find(|(k, _)| k == "thread_ts")
        .and_then(|(_, v)| normalize_ts(&v))
}

/// Accept a dotted ts (1716932719.000123), 16 bare digits, or a `p`-segment.
pub fn normalize_ts(raw: &str) -> Option<String> {
    let s = raw.trim();
    if let Some(ts) = ts_from_p_segment(s) {
        return Some(ts);
    }
    if let Some((secs, micros)) = s.split_once('.') {
        let digits = |part: &str| !part.is_empty() && part.chars().all(|c| c.is_ascii_digit());
        if digits(secs) && digits(micros) {
            return Some(s.to_string());
        }
        return None;
    }
    if s.len() == 16 && s.chars().all(|c| c.is_ascii_digit()) {
        return Some(format!("{}.{}", &s[..10], &s[10..]));
    }
    None
}

/// `p1716932719000123` -> `1716932719.000123`
fn ts_from_p_segment(p: &str) -> Option<String> {
    let digits = p.strip_prefix('p')?;
    if digits.len() == 16 && digits.chars().all(|c| c.is_ascii_digit()) {
        return Some(format!("{}.{}", &digits[..10], &digits[10..]));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_thread_ts_from_reply_permalink() {
        let link = "https://acme.slack.com/archives/C024BE91L/p1716932800000200?thread_ts=1716932719.000123&cid=C024BE91L";
        assert_eq!(
            thread_ts_from_permalink(link).as_deref(),
            Some("1716932719.000123")
        );
    }

    #[test]
    fn top_level_permalink_has_no_thread() {
        let link = "https://acme.slack.com/archives/C024BE91L/p1716932719000123";
        assert_eq!(thread_ts_from_permalink(link), None);
    }

    #[test]
    fn garbage_is_ignored() {
        assert_eq!(thread_ts_from_permalink("not a url"), None);
        assert_eq!(
            thread_ts_from_permalink("https://acme.slack.com/x?thread_ts=abc"),
            None
        );
    }

    #[test]
    fn normalizes_alternate_forms() {
        assert_eq!(
            normalize_ts("p1716932719000123").as_deref(),
            Some("1716932719.000123")
        );
        assert_eq!(
            normalize_ts("1716932719000123").as_deref(),
            Some("1716932719.000123")
        );
        assert_eq!(normalize_ts("17.1.2"), None);
    }
}
