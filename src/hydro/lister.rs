use crate::error::ScanError;
use reqwest::blocking::Client;
use std::time::Duration;

/// The raw-data server prefixes every folder listing with the same sort and
/// parent-directory links. Fixed convention for this host; skipped as-is.
pub const LISTING_BOILERPLATE_LINKS: usize = 6;

/// One fetched folder listing. The raw body is kept so the anomaly filter can
/// judge the payload size before any links are extracted.
#[derive(Debug, Clone)]
pub struct RawListing {
    pub url: String,
    pub body: String,
}

impl RawListing {
    pub fn payload_bytes(&self) -> usize {
        self.body.len()
    }

    /// Hrefs of the listed children, in document order, with the host's
    /// boilerplate links dropped.
    pub fn child_hrefs(&self) -> Vec<String> {
        extract_anchor_hrefs(&self.body)
            .into_iter()
            .skip(LISTING_BOILERPLATE_LINKS)
            .collect()
    }
}

/// Fetches one folder's listing. The production implementation talks HTTP;
/// tests substitute an in-memory tree.
pub trait DirectoryLister {
    fn fetch(&self, url: &str) -> Result<RawListing, ScanError>;
}

pub struct HttpLister {
    client: Client,
}

impl HttpLister {
    /// A bounded-wait client: one unresponsive remote folder must not stall
    /// the crawl indefinitely.
    pub fn new(timeout_secs: u64) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self { client })
    }
}

impl DirectoryLister for HttpLister {
    fn fetch(&self, url: &str) -> Result<RawListing, ScanError> {
        let response = self.client.get(url).send().map_err(|err| ScanError::Fetch {
            url: url.to_string(),
            reason: err.to_string(),
        })?;
        let status = response.status();
        if !status.is_success() {
            return Err(ScanError::Fetch {
                url: url.to_string(),
                reason: format!("http status {status}"),
            });
        }
        let body = response.text().map_err(|err| ScanError::Fetch {
            url: url.to_string(),
            reason: err.to_string(),
        })?;
        Ok(RawListing {
            url: url.to_string(),
            body,
        })
    }
}

/// Tolerant scan for `href` attributes inside `<a>` tags. The listings are
/// machine-generated index pages; local scanning of anchor tags beats a full
/// DOM parse and survives whitespace and attribute-order noise.
fn extract_anchor_hrefs(html: &str) -> Vec<String> {
    let lower = html.to_ascii_lowercase();
    let mut out = Vec::new();
    let mut cursor = 0usize;

    while let Some(rel) = lower[cursor..].find("<a") {
        let tag_start = cursor + rel;
        let after_name = tag_start + 2;
        let next_byte = lower.as_bytes().get(after_name).copied();
        if !matches!(next_byte, Some(b) if b.is_ascii_whitespace()) {
            cursor = after_name;
            continue;
        }

        let Some(close_rel) = lower[after_name..].find('>') else {
            break;
        };
        let tag_end = after_name + close_rel;
        if let Some(href) = attr_value(&html[after_name..tag_end], &lower[after_name..tag_end]) {
            out.push(href);
        }
        cursor = tag_end + 1;
    }

    out
}

fn attr_value(tag: &str, tag_lower: &str) -> Option<String> {
    let mut search = 0usize;
    while let Some(rel) = tag_lower[search..].find("href") {
        let at = search + rel;
        let boundary_ok = at == 0
            || tag_lower
                .as_bytes()
                .get(at - 1)
                .is_some_and(|b| b.is_ascii_whitespace());
        let mut rest = tag[at + 4..].trim_start();
        if !boundary_ok || !rest.starts_with('=') {
            search = at + 4;
            continue;
        }
        rest = rest[1..].trim_start();

        let value = match rest.as_bytes().first() {
            Some(b'"') => {
                let inner = &rest[1..];
                inner.find('"').map(|end| &inner[..end])
            }
            Some(b'\'') => {
                let inner = &rest[1..];
                inner.find('\'').map(|end| &inner[..end])
            }
            Some(_) => {
                let end = rest
                    .find(|c: char| c.is_ascii_whitespace() || c == '>')
                    .unwrap_or(rest.len());
                Some(&rest[..end])
            }
            None => None,
        };
        return value.map(str::to_string);
    }
    None
}
