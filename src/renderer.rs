//! Board renderer client.
//! Sends a render request as a GET query to the rendering service and decodes the returned image.
//! Every call carries a timeout; transient failures are retried a bounded number of times
//! with doubling backoff, then surface as a per-item `RenderError`.

use std::future::Future;

use image::DynamicImage;
use reqwest::Client;
use tracing::{debug, warn};

use crate::config::RendererConfig;
use crate::error::{Error, RenderError};
use crate::request::RenderRequest;

const MAX_ERROR_BODY: usize = 200;

/// Anything that can turn a render request into a board image.
pub trait BoardRenderer: Send + Sync {
    fn render(
        &self,
        request: &RenderRequest,
    ) -> impl Future<Output = Result<DynamicImage, RenderError>> + Send;
}

pub struct HttpRenderer {
    client: Client,
    config: RendererConfig,
}

impl HttpRenderer {
    pub fn new(config: RendererConfig) -> Result<Self, Error> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    async fn render_once(&self, request: &RenderRequest) -> Result<DynamicImage, RenderError> {
        let response = self
            .client
            .get(&self.config.url)
            .query(request)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        if !status.is_success() {
            let mut body = response.text().await.unwrap_or_default();
            if body.len() > MAX_ERROR_BODY {
                let mut cut = MAX_ERROR_BODY;
                while !body.is_char_boundary(cut) {
                    cut -= 1;
                }
                body.truncate(cut);
            }
            return Err(RenderError::Status { status, body });
        }

        let bytes = response.bytes().await.map_err(|e| self.classify(e))?;
        image::load_from_memory(&bytes).map_err(RenderError::Decode)
    }

    fn classify(&self, err: reqwest::Error) -> RenderError {
        if err.is_timeout() {
            RenderError::Timeout(self.config.timeout_ms)
        } else {
            RenderError::Transport(err)
        }
    }
}

impl BoardRenderer for HttpRenderer {
    async fn render(&self, request: &RenderRequest) -> Result<DynamicImage, RenderError> {
        let attempts = self.config.max_retries + 1;
        let mut attempt = 1;
        loop {
            match self.render_once(request).await {
                Ok(image) => {
                    debug!(attempt, width = image.width(), height = image.height(), "rendered board");
                    return Ok(image);
                }
                Err(e) if e.is_transient() && attempt < attempts => {
                    let delay = self.config.backoff(attempt - 1);
                    warn!(attempt, attempts, error = %e, "render attempt failed, retrying in {:?}", delay);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
