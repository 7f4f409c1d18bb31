//! Fully buffered response of a fetch

use bytes::{Bytes, BytesMut};
use reqwest::header::{HeaderMap, CONTENT_LENGTH};
use reqwest::StatusCode;

/// A fully read HTTP response
#[derive(Clone, Debug)]
pub struct FetchResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl FetchResponse {
    /// Body decoded as UTF-8, lossily
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Buffer the body of `response`
    ///
    /// A close-delimited body that ends without a TLS close_notify is kept
    /// as read; `openssl s_server -www` closes that way after its page.
    pub(crate) async fn read(mut response: reqwest::Response) -> Result<Self, reqwest::Error> {
        let status = response.status();
        let headers = response.headers().clone();
        let close_delimited = !headers.contains_key(CONTENT_LENGTH);

        let mut body = BytesMut::new();
        loop {
            match response.chunk().await {
                Ok(Some(chunk)) => body.extend_from_slice(&chunk),
                Ok(None) => break,
                Err(e) if close_delimited && !body.is_empty() && is_unexpected_eof(&e) => {
                    tracing::debug!("Peer closed without close_notify after {} bytes", body.len());
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        Ok(Self {
            status,
            headers,
            body: body.freeze(),
        })
    }
}

fn is_unexpected_eof(err: &reqwest::Error) -> bool {
    let mut current: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(e) = current {
        if let Some(io) = e.downcast_ref::<std::io::Error>() {
            if io.kind() == std::io::ErrorKind::UnexpectedEof {
                return true;
            }
        }
        current = e.source();
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_is_lossy() {
        let response = FetchResponse {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: Bytes::from_static(b"s_server \xff-www"),
        };
        assert!(response.text().starts_with("s_server "));
        assert!(response.text().ends_with("-www"));
    }
}
