/// Structured warnings for conditions the crawl recovers from locally.
/// One line per event on stderr so operators can grep the run log.
pub struct WarnEvent<'a> {
    pub code: &'a str,
    pub stage: &'a str,
    pub url: &'a str,
    pub reason: &'a str,
    pub detail: &'a str,
}

fn sanitize_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut prev_sep = false;
    for ch in value.chars() {
        if ch.is_ascii_whitespace() {
            if !out.is_empty() && !prev_sep {
                out.push('_');
                prev_sep = true;
            }
        } else if ch.is_ascii_graphic() {
            out.push(ch);
            prev_sep = false;
        }
    }
    let trimmed = out.trim_matches('_');
    if trimmed.is_empty() {
        "na".to_string()
    } else {
        trimmed.to_string()
    }
}

pub fn emit(event: WarnEvent<'_>) {
    eprintln!(
        "HYDROSCAN_WARN code={} stage={} url={} reason={} detail={}",
        sanitize_value(event.code),
        sanitize_value(event.stage),
        sanitize_value(event.url),
        sanitize_value(event.reason),
        sanitize_value(event.detail),
    );
}
