//! HTTP client for the stroke server (native).

use super::{ApiError, ApiResult, SaveStrokesRequest, SaveStrokesResponse, StrokeApi};
use crate::platform::BoxFuture;
use crate::stroke::{PageId, Stroke, StrokeId};
use reqwest::blocking::{Client, Response};
use std::time::Duration;
use url::Url;

/// Default request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Blocking `reqwest` client. Calls run wherever the returned future is
/// polled, so spawn them off the UI loop (see [`crate::spawn::ThreadSpawner`]).
#[derive(Debug, Clone)]
pub struct HttpStrokeApi {
    client: Client,
    base_url: Url,
}

impl HttpStrokeApi {
    /// Create a client for `base_url`, e.g. `http://localhost:3030`.
    pub fn new(base_url: &str, timeout: Duration) -> ApiResult<Self> {
        let base_url = Url::parse(base_url).map_err(|e| ApiError::Transport(format!("Invalid URL: {}", e)))?;
        if base_url.scheme() != "http" && base_url.scheme() != "https" {
            return Err(ApiError::Transport(format!(
                "Invalid HTTP URL scheme: {}",
                base_url.scheme()
            )));
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        Ok(Self { client, base_url })
    }

    /// `{base}/api/pages/{page}/strokes[/{stroke}]`, with segments percent-encoded.
    fn strokes_url(&self, page_id: &PageId, stroke_id: Option<&StrokeId>) -> ApiResult<Url> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| ApiError::Transport("Base URL cannot have a path".to_string()))?;
            segments.pop_if_empty();
            segments.extend(["api", "pages", page_id.as_str(), "strokes"]);
            if let Some(id) = stroke_id {
                segments.push(id.as_str());
            }
        }
        Ok(url)
    }
}

fn transport_error(e: reqwest::Error) -> ApiError {
    if e.is_connect() {
        ApiError::Offline
    } else {
        ApiError::Transport(e.to_string())
    }
}

fn check_status(response: Response) -> ApiResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().unwrap_or_default();
    Err(ApiError::from_status(status.as_u16(), body))
}

impl StrokeApi for HttpStrokeApi {
    fn save_strokes(&self, page_id: &PageId, strokes: &[Stroke]) -> BoxFuture<'static, ApiResult<usize>> {
        let client = self.client.clone();
        let url = self.strokes_url(page_id, None);
        let body = SaveStrokesRequest {
            strokes: strokes.to_vec(),
        };
        Box::pin(async move {
            let response = client.post(url?).json(&body).send().map_err(transport_error)?;
            let response = check_status(response)?;
            let parsed: SaveStrokesResponse = response.json().map_err(|e| ApiError::Decode(e.to_string()))?;
            Ok(parsed.count)
        })
    }

    fn delete_stroke(&self, page_id: &PageId, stroke_id: &StrokeId) -> BoxFuture<'static, ApiResult<()>> {
        let client = self.client.clone();
        let url = self.strokes_url(page_id, Some(stroke_id));
        Box::pin(async move {
            let response = client.delete(url?).send().map_err(transport_error)?;
            check_status(response)?;
            Ok(())
        })
    }

    fn clear_strokes(&self, page_id: &PageId) -> BoxFuture<'static, ApiResult<()>> {
        let client = self.client.clone();
        let url = self.strokes_url(page_id, None);
        Box::pin(async move {
            let response = client.delete(url?).send().map_err(transport_error)?;
            check_status(response)?;
            Ok(())
        })
    }

    fn fetch_strokes(&self, page_id: &PageId) -> BoxFuture<'static, ApiResult<Vec<Stroke>>> {
        let client = self.client.clone();
        let url = self.strokes_url(page_id, None);
        Box::pin(async move {
            let response = client.get(url?).send().map_err(transport_error)?;
            let response = check_status(response)?;
            response.json().map_err(|e| ApiError::Decode(e.to_string()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_non_http_scheme() {
        assert!(HttpStrokeApi::new("ws://localhost:3030", DEFAULT_REQUEST_TIMEOUT).is_err());
        assert!(HttpStrokeApi::new("not a url", DEFAULT_REQUEST_TIMEOUT).is_err());
    }

    #[test]
    fn test_strokes_url_encodes_segments() {
        let api = HttpStrokeApi::new("http://localhost:3030/", DEFAULT_REQUEST_TIMEOUT).unwrap();
        let url = api
            .strokes_url(&PageId::from("page 1"), Some(&StrokeId::from("s/1")))
            .unwrap();
        assert_eq!(url.as_str(), "http://localhost:3030/api/pages/page%201/strokes/s%2F1");
    }
}
