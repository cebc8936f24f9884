//! Wiremock responder that serves a fixed body honoring `Range` requests.

use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

/// How the responder treats range requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeMode {
    /// Answers `206` with the requested slice.
    Honor,
    /// Answers `200` with the whole body.
    IgnoreRange,
    /// Honors ranges starting at zero; later ranges report a `Content-Range`
    /// shifted one byte forward.
    ShiftLaterRanges,
}

pub struct RangeResponder {
    body: Vec<u8>,
    mode: RangeMode,
    content_disposition: Option<String>,
}

impl RangeResponder {
    pub fn new(body: Vec<u8>, mode: RangeMode) -> Self {
        Self {
            body,
            mode,
            content_disposition: None,
        }
    }

    pub fn with_content_disposition(mut self, value: &str) -> Self {
        self.content_disposition = Some(value.to_string());
        self
    }
}

/// Parses `bytes=a-b` / `bytes=a-` into an inclusive `(first, last)`.
fn parse_range_header(value: &str, len: u64) -> Option<(u64, u64)> {
    let spec = value.trim().strip_prefix("bytes=")?;
    let (first, last) = spec.split_once('-')?;
    let first: u64 = first.trim().parse().ok()?;
    let last = match last.trim() {
        "" => len.checked_sub(1)?,
        raw => raw.parse::<u64>().ok()?.min(len.checked_sub(1)?),
    };
    (first <= last).then_some((first, last))
}

impl Respond for RangeResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let len = self.body.len() as u64;
        let range = request
            .headers
            .get("range")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| parse_range_header(value, len));

        let mut template = match (self.mode, range) {
            (RangeMode::IgnoreRange, _) | (_, None) => {
                ResponseTemplate::new(200).set_body_bytes(self.body.clone())
            }
            (mode, Some((first, last))) => {
                let shift = u64::from(mode == RangeMode::ShiftLaterRanges && first > 0);
                let slice = self.body[first as usize..=last as usize].to_vec();
                ResponseTemplate::new(206)
                    .insert_header(
                        "content-range",
                        format!("bytes {}-{}/{len}", first + shift, last + shift).as_str(),
                    )
                    .set_body_bytes(slice)
            }
        };
        if let Some(disposition) = &self.content_disposition {
            template = template.insert_header("content-disposition", disposition.as_str());
        }
        template
    }
}

/// Deterministic, non-repeating-looking payload.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| ((i * 31 + i / 251) % 256) as u8).collect()
}

/// Mounts `responder` for `GET route`.
pub async fn mount(server: &MockServer, route: &str, responder: RangeResponder) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(responder)
        .mount(server)
        .await;
}
