// Setup backend: the three finalize calls made once every install phase has completed
//
// One call per form section. The calls are independent of each other, run concurrently, and
// every outcome is collected so the caller can tell which sections still need a retry.

use crate::models::form::{AdminSection, DatabaseSection, SchoolSection, Section, WizardFormState};
use crate::models::responses::{FinalizeFailure, FinalizeReport};
use crate::utils::logging::{mask_email, mask_sensitive};
use async_trait::async_trait;
use futures::future::join_all;
use log::{info, warn};
use serde::Serialize;
use std::time::{Duration, Instant};
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FinalizeError {
    #[error("could not reach setup service: {0}")]
    Transport(String),
    #[error("setup service error (HTTP {status})")]
    Server { status: u16, body: String },
    #[error("setup service rejected the request (HTTP {status}): {body}")]
    Rejected { status: u16, body: String },
}

impl FinalizeError {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FinalizeError::Transport(_) | FinalizeError::Server { .. }
        )
    }
}

/// Downstream system that receives each completed section.
#[async_trait]
pub trait SetupBackend: Send + Sync {
    async fn save_database_config(&self, db: &DatabaseSection) -> Result<(), FinalizeError>;
    async fn save_school_config(&self, school: &SchoolSection) -> Result<(), FinalizeError>;
    async fn create_admin_account(&self, admin: &AdminSection) -> Result<(), FinalizeError>;

    fn describe(&self) -> String {
        "setup-backend".to_string()
    }
}

async fn finalize_one(
    backend: &dyn SetupBackend,
    state: &WizardFormState,
    section: Section,
) -> (Section, Result<(), FinalizeError>) {
    let started = Instant::now();
    let res = match section {
        Section::Database => backend.save_database_config(&state.database).await,
        Section::School => backend.save_school_config(&state.school).await,
        Section::Admin => backend.create_admin_account(&state.admin).await,
    };
    match &res {
        Ok(()) => info!(
            "[PHASE: install] [STEP: finalize_{}] ok (backend={}, duration_ms={})",
            section,
            backend.describe(),
            started.elapsed().as_millis()
        ),
        Err(e) => warn!(
            "[PHASE: install] [STEP: finalize_{}] failed (backend={}): {}",
            section,
            backend.describe(),
            e
        ),
    }
    (section, res)
}

/// Send the given sections concurrently and report per-section outcomes.
pub async fn finalize_sections(
    backend: &dyn SetupBackend,
    state: &WizardFormState,
    sections: &[Section],
) -> FinalizeReport {
    let results = join_all(
        sections
            .iter()
            .map(|section| finalize_one(backend, state, *section)),
    )
    .await;

    let mut report = FinalizeReport::default();
    for (section, res) in results {
        match res {
            Ok(()) => report.succeeded.push(section),
            Err(e) => report.failed.push(FinalizeFailure {
                section,
                message: e.to_string(),
            }),
        }
    }
    report
}

/// Posts each section as JSON to `<base>/setup/<section>`.
pub struct HttpSetupBackend {
    client: reqwest::Client,
    base_url: Url,
    max_retries: usize,
}

impl HttpSetupBackend {
    pub fn new(base_url: &str, request_timeout: Duration, max_retries: usize) -> anyhow::Result<Self> {
        let mut base = Url::parse(base_url.trim())
            .map_err(|e| anyhow::anyhow!("Invalid setup service URL '{}': {}", base_url, e))?;
        if !matches!(base.scheme(), "http" | "https") {
            anyhow::bail!("Setup service URL must use http or https");
        }
        // Url::join drops the last path segment unless the base ends with '/'.
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build HTTP client: {}", e))?;
        Ok(Self {
            client,
            base_url: base,
            max_retries,
        })
    }

    pub fn endpoint(&self, section: Section) -> Result<Url, FinalizeError> {
        self.base_url
            .join(&format!("setup/{}", section))
            .map_err(|e| FinalizeError::Transport(format!("bad endpoint: {}", e)))
    }

    async fn post_once<T: Serialize + Sync>(&self, url: &Url, body: &T) -> Result<(), FinalizeError> {
        let resp = self
            .client
            .post(url.clone())
            .json(body)
            .send()
            .await
            .map_err(|e| FinalizeError::Transport(e.without_url().to_string()))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let body = resp.text().await.unwrap_or_default();
        let body: String = body.chars().take(512).collect();
        if status.is_server_error() {
            Err(FinalizeError::Server {
                status: status.as_u16(),
                body,
            })
        } else {
            Err(FinalizeError::Rejected {
                status: status.as_u16(),
                body,
            })
        }
    }

    async fn post<T: Serialize + Sync>(&self, section: Section, body: &T) -> Result<(), FinalizeError> {
        let url = self.endpoint(section)?;
        let retry_strategy = ExponentialBackoff::from_millis(100)
            .factor(2)
            .max_delay(Duration::from_secs(2))
            .map(jitter)
            .take(self.max_retries);

        RetryIf::spawn(
            retry_strategy,
            || self.post_once(&url, body),
            |e: &FinalizeError| {
                let retry = e.is_transient();
                if retry {
                    warn!(
                        "[PHASE: install] [STEP: finalize_{}] transient failure, retrying: {}",
                        section, e
                    );
                }
                retry
            },
        )
        .await
    }
}

#[async_trait]
impl SetupBackend for HttpSetupBackend {
    async fn save_database_config(&self, db: &DatabaseSection) -> Result<(), FinalizeError> {
        self.post(Section::Database, db).await
    }

    async fn save_school_config(&self, school: &SchoolSection) -> Result<(), FinalizeError> {
        self.post(Section::School, school).await
    }

    async fn create_admin_account(&self, admin: &AdminSection) -> Result<(), FinalizeError> {
        self.post(Section::Admin, admin).await
    }

    fn describe(&self) -> String {
        format!("http:{}", self.base_url)
    }
}

/// Logs what would be sent and succeeds. Used when no service URL is configured.
#[derive(Debug, Default)]
pub struct DryRunBackend;

#[async_trait]
impl SetupBackend for DryRunBackend {
    async fn save_database_config(&self, db: &DatabaseSection) -> Result<(), FinalizeError> {
        info!(
            "[PHASE: install] [STEP: finalize_database] dry-run (host={}, name={}, user={}, port={:?}, type={:?})",
            db.host,
            db.name,
            mask_sensitive(&db.username),
            db.port,
            db.db_type
        );
        Ok(())
    }

    async fn save_school_config(&self, school: &SchoolSection) -> Result<(), FinalizeError> {
        info!(
            "[PHASE: install] [STEP: finalize_school] dry-run (name={}, brand_color={}, logo_bytes={})",
            school.name,
            school.brand_color,
            school.logo.as_ref().map(|l| l.bytes.len()).unwrap_or(0)
        );
        Ok(())
    }

    async fn create_admin_account(&self, admin: &AdminSection) -> Result<(), FinalizeError> {
        info!(
            "[PHASE: install] [STEP: finalize_admin] dry-run (email={})",
            mask_email(&admin.email)
        );
        Ok(())
    }

    fn describe(&self) -> String {
        "dry-run".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Backend that records calls and fails the sections it is told to.
    #[derive(Default)]
    struct ScriptedBackend {
        failing: HashSet<Section>,
        calls: Mutex<Vec<Section>>,
    }

    impl ScriptedBackend {
        fn record(&self, section: Section) -> Result<(), FinalizeError> {
            self.calls.lock().unwrap().push(section);
            if self.failing.contains(&section) {
                return Err(FinalizeError::Server {
                    status: 503,
                    body: String::new(),
                });
            }
            Ok(())
        }
    }

    #[async_trait]
    impl SetupBackend for ScriptedBackend {
        async fn save_database_config(&self, _db: &DatabaseSection) -> Result<(), FinalizeError> {
            self.record(Section::Database)
        }
        async fn save_school_config(&self, _s: &SchoolSection) -> Result<(), FinalizeError> {
            self.record(Section::School)
        }
        async fn create_admin_account(&self, _a: &AdminSection) -> Result<(), FinalizeError> {
            self.record(Section::Admin)
        }
    }

    #[tokio::test]
    async fn report_separates_saved_and_pending_sections() {
        let backend = ScriptedBackend {
            failing: [Section::School].into_iter().collect(),
            ..Default::default()
        };
        let report =
            finalize_sections(&backend, &WizardFormState::default(), &Section::ALL).await;

        assert_eq!(report.succeeded, vec![Section::Database, Section::Admin]);
        assert_eq!(report.pending_sections(), vec![Section::School]);
        assert!(report.failed[0].message.contains("503"));
    }

    #[tokio::test]
    async fn only_requested_sections_are_sent() {
        let backend = ScriptedBackend::default();
        let report =
            finalize_sections(&backend, &WizardFormState::default(), &[Section::Admin]).await;
        assert!(report.is_success());
        assert_eq!(*backend.calls.lock().unwrap(), vec![Section::Admin]);
    }

    #[test]
    fn endpoints_keep_base_path() {
        let backend =
            HttpSetupBackend::new("https://api.school.test/v1", Duration::from_secs(5), 1).unwrap();
        assert_eq!(
            backend.endpoint(Section::School).unwrap().as_str(),
            "https://api.school.test/v1/setup/school"
        );
        assert!(HttpSetupBackend::new("ftp://x", Duration::from_secs(5), 1).is_err());
        assert!(HttpSetupBackend::new("not a url", Duration::from_secs(5), 1).is_err());
    }

    #[test]
    fn only_transport_and_server_errors_are_retried() {
        assert!(FinalizeError::Transport("reset".into()).is_transient());
        assert!(FinalizeError::Server {
            status: 502,
            body: String::new()
        }
        .is_transient());
        assert!(!FinalizeError::Rejected {
            status: 422,
            body: "email taken".into()
        }
        .is_transient());
    }

    /// Read one HTTP request (headers + content-length body).
    async fn read_request(sock: &mut tokio::net::TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = sock.read(&mut chunk).await.unwrap_or(0);
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&buf).to_string();
            if let Some(header_end) = text.find("\r\n\r\n") {
                let content_length = text[..header_end]
                    .lines()
                    .find_map(|l| {
                        let (k, v) = l.split_once(':')?;
                        k.eq_ignore_ascii_case("content-length")
                            .then(|| v.trim().parse::<usize>().ok())
                            .flatten()
                    })
                    .unwrap_or(0);
                if buf.len() >= header_end + 4 + content_length {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&buf).to_string()
    }

    /// HTTP server answering one connection per scripted `(status, body)`, in order.
    async fn serve_sequence(
        script: Vec<(u16, &'static str)>,
    ) -> (String, tokio::task::JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let mut requests = Vec::new();
            for (status, body) in script {
                let Ok(Ok((mut sock, _))) =
                    tokio::time::timeout(Duration::from_secs(5), listener.accept()).await
                else {
                    break;
                };
                requests.push(read_request(&mut sock).await);
                let resp = format!(
                    "HTTP/1.1 {} X\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                let _ = sock.write_all(resp.as_bytes()).await;
                let _ = sock.shutdown().await;
            }
            requests
        });
        (format!("http://{}", addr), handle)
    }

    async fn serve_status(
        status: u16,
        body: &'static str,
    ) -> (String, tokio::task::JoinHandle<Vec<String>>) {
        serve_sequence(vec![(status, body)]).await
    }

    #[tokio::test]
    async fn http_backend_posts_section_json() {
        let (base, server) = serve_status(201, "").await;
        let backend = HttpSetupBackend::new(&base, Duration::from_secs(5), 0).unwrap();
        let school = SchoolSection {
            name: "Acme High".into(),
            brand_color: "#112233".into(),
            ..Default::default()
        };

        backend.save_school_config(&school).await.unwrap();

        let requests = server.await.unwrap();
        assert!(requests[0].starts_with("POST /setup/school "), "{}", requests[0]);
        assert!(requests[0].contains("\"brandColor\":\"#112233\""), "{}", requests[0]);
    }

    #[tokio::test]
    async fn http_backend_reports_rejection_without_retry() {
        let (base, server) = serve_status(422, "email already registered").await;
        let backend = HttpSetupBackend::new(&base, Duration::from_secs(5), 3).unwrap();

        let err = backend
            .create_admin_account(&AdminSection::default())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            FinalizeError::Rejected {
                status: 422,
                body: "email already registered".into()
            }
        );
        assert_eq!(server.await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn http_backend_retries_server_error_then_succeeds() {
        let (base, server) = serve_sequence(vec![(503, "warming up"), (201, "")]).await;
        let backend = HttpSetupBackend::new(&base, Duration::from_secs(5), 2).unwrap();

        backend
            .save_database_config(&DatabaseSection {
                host: "db.local".into(),
                ..Default::default()
            })
            .await
            .unwrap();

        let requests = server.await.unwrap();
        assert_eq!(requests.len(), 2);
        assert!(requests
            .iter()
            .all(|r| r.starts_with("POST /setup/database ")));
    }
}
