//! JSON/HTTP image service client.
//!
//! The remote service computes and serves imagery; this module only asks it
//! for metadata, per-tile download URLs and server-side exports. The server
//! side of masking and compositing is never reimplemented here.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, info};

use super::http::{ProviderError, RetryingClient};
use super::types::{DownloadRequest, ExportRequest, ImageInfo, TaskStatus};

/// An opaque server-side image: metadata, tile URLs, exports. Fetch workers
/// share one instance read-only.
pub trait RemoteImage: Send + Sync {
    /// Image metadata. Implementations cache it, so repeated calls after the
    /// first are local.
    fn info(&self) -> Result<ImageInfo, ProviderError>;

    /// A URL serving the requested window as a compressed single-file
    /// container.
    fn download_url(&self, request: &DownloadRequest) -> Result<String, ProviderError>;

    /// Starts a server-side export to the service's own storage.
    fn start_export(&self, request: &ExportRequest) -> Result<Box<dyn ExportTask>, ProviderError>;
}

/// Handle to a running server-side export.
pub trait ExportTask: Send {
    fn id(&self) -> &str;

    fn status(&self) -> Result<TaskStatus, ProviderError>;

    /// Blocks until the task reaches a terminal state, failing unless that
    /// state is `Completed`.
    fn wait(&self) -> Result<(), ProviderError>;
}

/// Entry point for a REST image service rooted at `base_url`.
pub struct RestImageService {
    client: Arc<RetryingClient>,
    base_url: String,
}

impl RestImageService {
    pub fn new(client: RetryingClient, base_url: impl Into<String>) -> Self {
        Self {
            client: Arc::new(client),
            base_url: trim_base(base_url.into()),
        }
    }

    /// A handle to one image by its service identifier.
    pub fn image(&self, id: impl Into<String>) -> RestImage {
        RestImage {
            client: Arc::clone(&self.client),
            base_url: self.base_url.clone(),
            id: id.into(),
            cached_info: Mutex::new(None),
        }
    }
}

fn trim_base(mut base: String) -> String {
    while base.ends_with('/') {
        base.pop();
    }
    base
}

fn parse_json<T: DeserializeOwned>(url: &str, body: &[u8]) -> Result<T, ProviderError> {
    serde_json::from_slice(body).map_err(|e| ProviderError::InvalidResponse {
        url: url.to_string(),
        message: e.to_string(),
    })
}

/// One image on a [`RestImageService`].
pub struct RestImage {
    client: Arc<RetryingClient>,
    base_url: String,
    id: String,
    cached_info: Mutex<Option<ImageInfo>>,
}

impl RestImage {
    pub fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Deserialize)]
struct DownloadUrlResponse {
    url: String,
}

#[derive(Deserialize)]
struct StartExportResponse {
    task_id: String,
}

#[derive(Deserialize)]
struct TaskStatusResponse {
    status: TaskStatus,
}

impl RemoteImage for RestImage {
    fn info(&self) -> Result<ImageInfo, ProviderError> {
        if let Some(info) = self.cached_info.lock().as_ref() {
            return Ok(info.clone());
        }
        let url = format!("{}/images/{}", self.base_url, self.id);
        debug!(image = %self.id, "fetching image info");
        let body = self.client.get(&url)?;
        let info: ImageInfo = parse_json(&url, &body)?;
        *self.cached_info.lock() = Some(info.clone());
        Ok(info)
    }

    fn download_url(&self, request: &DownloadRequest) -> Result<String, ProviderError> {
        let url = format!("{}/images/{}/download", self.base_url, self.id);
        let body = serde_json::to_value(request).map_err(|e| ProviderError::InvalidResponse {
            url: url.clone(),
            message: e.to_string(),
        })?;
        let response = self.client.post_json(&url, &body)?;
        let parsed: DownloadUrlResponse = parse_json(&url, &response)?;
        Ok(parsed.url)
    }

    fn start_export(&self, request: &ExportRequest) -> Result<Box<dyn ExportTask>, ProviderError> {
        let url = format!("{}/images/{}/export", self.base_url, self.id);
        let body = serde_json::to_value(request).map_err(|e| ProviderError::InvalidResponse {
            url: url.clone(),
            message: e.to_string(),
        })?;
        let response = self.client.post_json(&url, &body)?;
        let parsed: StartExportResponse = parse_json(&url, &response)?;
        info!(image = %self.id, task = %parsed.task_id, "export task started");
        Ok(Box::new(RestExportTask {
            client: Arc::clone(&self.client),
            base_url: self.base_url.clone(),
            task_id: parsed.task_id,
            poll_interval: Duration::from_secs(5),
        }))
    }
}

/// Poll-based handle to a server-side export task.
pub struct RestExportTask {
    client: Arc<RetryingClient>,
    base_url: String,
    task_id: String,
    poll_interval: Duration,
}

impl RestExportTask {
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

impl ExportTask for RestExportTask {
    fn id(&self) -> &str {
        &self.task_id
    }

    fn status(&self) -> Result<TaskStatus, ProviderError> {
        let url = format!("{}/tasks/{}", self.base_url, self.task_id);
        let body = self.client.get(&url)?;
        let parsed: TaskStatusResponse = parse_json(&url, &body)?;
        Ok(parsed.status)
    }

    fn wait(&self) -> Result<(), ProviderError> {
        loop {
            let status = self.status()?;
            debug!(task = %self.task_id, ?status, "polled export task");
            match status {
                TaskStatus::Completed => return Ok(()),
                status if status.is_terminal() => {
                    return Err(ProviderError::TaskFailed {
                        id: self.task_id.clone(),
                        status: format!("{:?}", status),
                    })
                }
                _ => thread::sleep(self.poll_interval),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::http::{HttpClient, HttpResponse, RetryConfig};
    use parking_lot::Mutex;
    use std::collections::HashMap;

    /// Mock transport routing by URL suffix, with optional per-URL response
    /// sequences for poll loops.
    struct RouteClient {
        routes: Mutex<HashMap<String, Vec<Vec<u8>>>>,
    }

    impl RouteClient {
        fn new(routes: Vec<(&str, Vec<&str>)>) -> Self {
            let map = routes
                .into_iter()
                .map(|(suffix, bodies)| {
                    (
                        suffix.to_string(),
                        bodies.into_iter().map(|b| b.as_bytes().to_vec()).collect(),
                    )
                })
                .collect();
            Self {
                routes: Mutex::new(map),
            }
        }

        fn respond(&self, url: &str) -> Result<HttpResponse, ProviderError> {
            let mut routes = self.routes.lock();
            for (suffix, bodies) in routes.iter_mut() {
                if url.ends_with(suffix.as_str()) {
                    let body = if bodies.len() > 1 {
                        bodies.remove(0)
                    } else {
                        bodies[0].clone()
                    };
                    return Ok(HttpResponse { status: 200, body });
                }
            }
            Ok(HttpResponse {
                status: 404,
                body: Vec::new(),
            })
        }
    }

    impl HttpClient for RouteClient {
        fn get(&self, url: &str) -> Result<HttpResponse, ProviderError> {
            self.respond(url)
        }

        fn post_json(
            &self,
            url: &str,
            _body: &serde_json::Value,
        ) -> Result<HttpResponse, ProviderError> {
            self.respond(url)
        }
    }

    fn service(routes: Vec<(&str, Vec<&str>)>) -> RestImageService {
        let client = RetryingClient::new(
            Box::new(RouteClient::new(routes)),
            RetryConfig::default().with_retries(0).with_backoff_factor(0.0),
        );
        RestImageService::new(client, "http://svc/v1/")
    }

    #[test]
    fn test_info_round_trip() {
        let service = service(vec![(
            "/images/img-1",
            vec![r#"{"id": "img-1", "bands": [
                {"name": "B1", "data_type": {"precision": "int", "min": 0.0, "max": 255.0}}
            ]}"#],
        )]);
        let info = service.image("img-1").info().unwrap();
        assert_eq!(info.id, "img-1");
        assert_eq!(info.bands.len(), 1);
    }

    #[test]
    fn test_download_url_posts_and_parses() {
        let service = service(vec![(
            "/images/img-1/download",
            vec![r#"{"url": "http://svc/blobs/abc"}"#],
        )]);
        let request = DownloadRequest::geotiff(
            "EPSG:32634",
            crate::geom::Affine::identity(),
            crate::geom::Shape::new(10, 10),
            "uint8",
        );
        let url = service.image("img-1").download_url(&request).unwrap();
        assert_eq!(url, "http://svc/blobs/abc");
    }

    #[test]
    fn test_export_wait_polls_to_completion() {
        let service = service(vec![
            ("/images/img-1/export", vec![r#"{"task_id": "t-9"}"#]),
            (
                "/tasks/t-9",
                vec![
                    r#"{"status": "PENDING"}"#,
                    r#"{"status": "RUNNING"}"#,
                    r#"{"status": "COMPLETED"}"#,
                ],
            ),
        ]);
        let request = ExportRequest {
            name: "out".to_string(),
            folder: None,
            crs: "EPSG:32634".to_string(),
            crs_transform: crate::geom::Affine::identity().coefficients(),
            dimensions: [10, 10],
            dtype: "uint8".to_string(),
        };
        let task = service.image("img-1").start_export(&request).unwrap();
        assert_eq!(task.id(), "t-9");
        // scripted statuses resolve fast, no real polling delay
        let task = RestExportTask {
            client: Arc::new(RetryingClient::new(
                Box::new(RouteClient::new(vec![(
                    "/tasks/t-9",
                    vec![r#"{"status": "RUNNING"}"#, r#"{"status": "COMPLETED"}"#],
                )])),
                RetryConfig::default().with_retries(0),
            )),
            base_url: "http://svc/v1".to_string(),
            task_id: "t-9".to_string(),
            poll_interval: Duration::from_millis(0),
        };
        task.wait().unwrap();
    }

    #[test]
    fn test_export_wait_surfaces_failure() {
        let task = RestExportTask {
            client: Arc::new(RetryingClient::new(
                Box::new(RouteClient::new(vec![(
                    "/tasks/t-9",
                    vec![r#"{"status": "FAILED"}"#],
                )])),
                RetryConfig::default().with_retries(0),
            )),
            base_url: "http://svc/v1".to_string(),
            task_id: "t-9".to_string(),
            poll_interval: Duration::from_millis(0),
        };
        match task.wait().unwrap_err() {
            ProviderError::TaskFailed { id, .. } => assert_eq!(id, "t-9"),
            other => panic!("unexpected error: {}", other),
        }
    }
}
