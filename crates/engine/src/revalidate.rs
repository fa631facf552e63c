use stowaway_storage::Headers;
use time::PrimitiveDateTime;
use time::macros::format_description;

/// Whether a cached, non-hash-pinned response should be refetched.
///
/// `fetched_at` is when the engine stored it (from asset metadata), which
/// takes precedence over the response's own `Date` header. Anything that
/// can't be interpreted is treated as stale.
pub fn needs_revalidation(headers: &Headers, fetched_at: Option<u64>, now: u64) -> bool {
    if let Some(cache_control) = headers.get("Cache-Control") {
        let Some(max_age) = max_age(cache_control) else {
            return true;
        };
        let Some(timestamp) = fetched_at.or_else(|| headers.get("Date").and_then(parse_http_date)) else {
            return true;
        };
        return match now.checked_sub(timestamp) {
            Some(age) => age > max_age.saturating_mul(1000),
            // Stored in the future; the clock moved.
            None => true,
        };
    }
    if let Some(expires) = headers.get("Expires") {
        return parse_http_date(expires).is_none_or(|expires| now > expires);
    }
    true
}

/// `max-age` directive, in seconds.
fn max_age(cache_control: &str) -> Option<u64> {
    cache_control.split(',').find_map(|directive| {
        let (name, value) = directive.trim().split_once('=')?;
        name.trim().eq_ignore_ascii_case("max-age").then(|| value.trim().trim_matches('"').parse().ok())?
    })
}

/// IMF-fixdate (`Sun, 06 Nov 1994 08:49:37 GMT`) as milliseconds since the epoch.
pub fn parse_http_date(value: &str) -> Option<u64> {
    let format = format_description!("[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT");
    let parsed = PrimitiveDateTime::parse(value.trim(), &format).ok()?.assume_utc();
    u64::try_from(parsed.unix_timestamp()).ok().map(|seconds| seconds * 1000)
}
