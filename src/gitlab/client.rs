use log::{debug, warn};
use reqwest::{Client, Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::time::Duration;
use url::Url;

use super::control_plane::ControlPlane;
use super::types::{Job, Pipeline, Project};
use crate::auth::Token;
use crate::error::{RefactorLensError, Result};

const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_BRANCH: &str = "main";
const JOBS_PAGE_SIZE: usize = 100;

/// REST client for the GitLab v4 API.
pub struct GitLabApiClient {
    client: Client,
    api_url: Url,
    token: Option<Token>,
    branch: String,
    max_retries: u32,
    retry_delay: Duration,
}

impl GitLabApiClient {
    pub fn new(base_url: &str, token: Option<Token>) -> Result<Self> {
        Self::with_timeout(base_url, token, DEFAULT_REQUEST_TIMEOUT)
    }

    /// # Errors
    ///
    /// Returns `Config` if the HTTP client cannot be built or `base_url` is not a valid URL.
    pub fn with_timeout(base_url: &str, token: Option<Token>, request_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("refactor-lens/", env!("CARGO_PKG_VERSION")))
            .timeout(request_timeout)
            .build()
            .map_err(|e| RefactorLensError::Config(format!("Failed to create HTTP client: {e}")))?;

        let base = if base_url.ends_with('/') {
            Url::parse(base_url)
        } else {
            Url::parse(&format!("{base_url}/"))
        }
        .map_err(|e| RefactorLensError::Config(format!("Invalid base URL: {e}")))?;

        let api_url = base
            .join("api/v4/")
            .map_err(|e| RefactorLensError::Config(format!("Invalid API URL: {e}")))?;

        Ok(Self {
            client,
            api_url,
            token,
            branch: DEFAULT_BRANCH.to_string(),
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
        })
    }

    pub fn with_retries(mut self, max_retries: u32, retry_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_delay = retry_delay;
        self
    }

    /// Branch that file commits are written to.
    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = branch.into();
        self
    }

    pub fn auth_request(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some(token) = &self.token {
            request.bearer_auth(token.as_str())
        } else {
            request
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.api_url
            .join(path)
            .map_err(|e| RefactorLensError::Config(format!("Invalid endpoint '{path}': {e}")))
    }

    /// Sends a request, retrying on network errors, rate limits and server errors.
    ///
    /// # Errors
    ///
    /// * `NotFound` for 404 responses
    /// * `ApiErrorAfterRetries` when 429/5xx persists past the retry budget
    /// * `ApiError` for any other non-success status
    async fn execute(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Response> {
        let url = self.endpoint(path)?;

        let mut retry_count = 0;
        loop {
            let mut request = self.auth_request(self.client.request(method.clone(), url.clone()));
            if let Some(body) = body {
                request = request.json(body);
            }

            let response = match request.send().await {
                Ok(resp) => resp,
                Err(e) if e.is_connect() || e.is_timeout() || e.is_request() => {
                    if retry_count >= self.max_retries {
                        return Err(e.into());
                    }
                    warn!(
                        "Network error ({}), retrying in {}s ({}/{})...",
                        e,
                        self.retry_delay.as_secs(),
                        retry_count + 1,
                        self.max_retries
                    );
                    tokio::time::sleep(self.retry_delay).await;
                    retry_count += 1;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let status = response.status();

            if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                if retry_count >= self.max_retries {
                    return Err(RefactorLensError::ApiErrorAfterRetries {
                        status: status.as_u16(),
                        retries: self.max_retries,
                    });
                }

                warn!(
                    "GitLab API error (status {status}). Waiting {} seconds before retry {}/{}...",
                    self.retry_delay.as_secs(),
                    retry_count + 1,
                    self.max_retries
                );

                tokio::time::sleep(self.retry_delay).await;
                retry_count += 1;
                continue;
            }

            if status == StatusCode::NOT_FOUND {
                return Err(RefactorLensError::NotFound(format!("{method} {path}")));
            }

            if !status.is_success() {
                let error_text = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unable to read error response".to_string());
                return Err(RefactorLensError::ApiError {
                    status: status.as_u16(),
                    message: error_text,
                });
            }

            debug!("{method} {path} -> {status}");
            return Ok(response);
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        Ok(self.execute(Method::GET, path, None).await?.json().await?)
    }

    async fn send_json<T: DeserializeOwned>(&self, method: Method, path: &str, body: &Value) -> Result<T> {
        Ok(self.execute(method, path, Some(body)).await?.json().await?)
    }
}

/// `projects/<url-encoded full path>`; GitLab accepts a namespaced path in place of the id.
fn project_by_path(path: &str) -> String {
    format!("projects/{}", urlencoding::encode(path))
}

fn next_page(response: &Response) -> Option<u32> {
    response
        .headers()
        .get("x-next-page")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse().ok())
}

fn file_endpoint(project_id: u64, file_path: &str) -> String {
    format!("projects/{project_id}/repository/files/{}", urlencoding::encode(file_path))
}

impl ControlPlane for GitLabApiClient {
    async fn create_project(&self, name: &str) -> Result<Project> {
        let body = json!({
            "name": name,
            "path": name,
            "initialize_with_readme": true,
            "default_branch": self.branch,
        });
        self.send_json(Method::POST, "projects", &body).await
    }

    async fn get_project(&self, path: &str) -> Result<Project> {
        self.get_json(&project_by_path(path)).await
    }

    async fn delete_project(&self, project_id: u64) -> Result<()> {
        self.execute(Method::DELETE, &format!("projects/{project_id}"), None)
            .await?;
        Ok(())
    }

    /// Creates the file, and updates it instead when GitLab reports it already exists.
    async fn create_or_update_file(
        &self,
        project_id: u64,
        file_path: &str,
        content: &str,
        commit_message: &str,
    ) -> Result<()> {
        let endpoint = file_endpoint(project_id, file_path);
        let body = json!({
            "branch": self.branch,
            "content": content,
            "commit_message": commit_message,
        });

        match self.execute(Method::POST, &endpoint, Some(&body)).await {
            Ok(_) => Ok(()),
            Err(RefactorLensError::ApiError { status: 400, .. }) => {
                debug!("{file_path} exists in project {project_id}, updating");
                self.execute(Method::PUT, &endpoint, Some(&body)).await?;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn trigger_pipeline(&self, project_id: u64, ref_: &str) -> Result<Pipeline> {
        let body = json!({ "ref": ref_ });
        self.send_json(Method::POST, &format!("projects/{project_id}/pipeline"), &body)
            .await
    }

    async fn get_pipeline(&self, project_id: u64, pipeline_id: u64) -> Result<Pipeline> {
        self.get_json(&format!("projects/{project_id}/pipelines/{pipeline_id}"))
            .await
    }

    /// Follows `x-next-page` until GitLab reports no further page.
    async fn get_pipeline_jobs(&self, project_id: u64, pipeline_id: u64) -> Result<Vec<Job>> {
        let mut jobs = Vec::new();
        let mut page = 1;

        loop {
            let path =
                format!("projects/{project_id}/pipelines/{pipeline_id}/jobs?per_page={JOBS_PAGE_SIZE}&page={page}");
            let response = self.execute(Method::GET, &path, None).await?;
            let next = next_page(&response);
            let batch: Vec<Job> = response.json().await?;
            debug!("Pipeline {pipeline_id}: fetched {} jobs from page {page}", batch.len());

            let fetched = batch.len();
            jobs.extend(batch);

            match next {
                Some(next) if next > page && fetched > 0 => page = next,
                _ => break,
            }
        }

        Ok(jobs)
    }

    async fn get_job(&self, project_id: u64, job_id: u64) -> Result<Job> {
        self.get_json(&format!("projects/{project_id}/jobs/{job_id}"))
            .await
    }

    async fn health_check(&self) -> Result<()> {
        self.execute(Method::GET, "version", None).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};

    fn client(server: &Server) -> GitLabApiClient {
        GitLabApiClient::new(&server.url(), Some(Token::from("secret")))
            .unwrap()
            .with_retries(2, Duration::ZERO)
    }

    #[cfg(test)]
    mod new {
        use super::*;

        #[test]
        fn api_url_keeps_base_path() {
            let client = GitLabApiClient::new("https://example.com/gitlab", None).unwrap();
            assert_eq!(client.api_url.as_str(), "https://example.com/gitlab/api/v4/");
        }

        #[test]
        fn rejects_invalid_base_url() {
            let result = GitLabApiClient::new("not a url", None);
            assert!(matches!(result, Err(RefactorLensError::Config(_))));
        }
    }

    #[cfg(test)]
    mod endpoints {
        use super::*;

        #[test]
        fn project_path_is_url_encoded() {
            assert_eq!(project_by_path("group/app-test-before"), "projects/group%2Fapp-test-before");
        }

        #[test]
        fn nested_file_path_is_url_encoded() {
            assert_eq!(
                file_endpoint(4, "ci/templates.yml"),
                "projects/4/repository/files/ci%2Ftemplates.yml"
            );
        }
    }

    #[cfg(test)]
    mod execute {
        use super::*;

        #[tokio::test]
        async fn health_check_sends_bearer_token() {
            let mut server = Server::new_async().await;
            let mock = server
                .mock("GET", "/api/v4/version")
                .match_header("authorization", "Bearer secret")
                .with_status(200)
                .with_body(r#"{"version": "16.0.0"}"#)
                .create_async()
                .await;

            client(&server).health_check().await.unwrap();
            mock.assert_async().await;
        }

        #[tokio::test]
        async fn server_errors_retry_until_budget_exhausted() {
            let mut server = Server::new_async().await;
            let mock = server
                .mock("GET", "/api/v4/version")
                .with_status(502)
                .expect(3)
                .create_async()
                .await;

            let err = client(&server).health_check().await.unwrap_err();

            mock.assert_async().await;
            assert!(
                matches!(err, RefactorLensError::ApiErrorAfterRetries { status: 502, retries: 2 }),
                "got: {err:?}"
            );
        }

        #[tokio::test]
        async fn not_found_maps_to_not_found() {
            let mut server = Server::new_async().await;
            server
                .mock("GET", "/api/v4/projects/1/pipelines/99")
                .with_status(404)
                .create_async()
                .await;

            let err = client(&server).get_pipeline(1, 99).await.unwrap_err();
            assert!(matches!(err, RefactorLensError::NotFound(_)), "got: {err:?}");
        }

        #[tokio::test]
        async fn client_errors_carry_response_body() {
            let mut server = Server::new_async().await;
            server
                .mock("POST", "/api/v4/projects")
                .with_status(422)
                .with_body("name has already been taken")
                .create_async()
                .await;

            let err = client(&server).create_project("app").await.unwrap_err();
            match err {
                RefactorLensError::ApiError { status, message } => {
                    assert_eq!(status, 422);
                    assert_eq!(message, "name has already been taken");
                }
                other => panic!("expected ApiError, got {other:?}"),
            }
        }
    }

    #[cfg(test)]
    mod control_plane {
        use super::*;

        #[tokio::test]
        async fn trigger_pipeline_posts_ref() {
            let mut server = Server::new_async().await;
            let mock = server
                .mock("POST", "/api/v4/projects/7/pipeline")
                .match_body(Matcher::Json(json!({"ref": "main"})))
                .with_status(201)
                .with_body(r#"{"id": 31, "status": "created", "ref": "main"}"#)
                .create_async()
                .await;

            let pipeline = client(&server).trigger_pipeline(7, "main").await.unwrap();

            mock.assert_async().await;
            assert_eq!(pipeline.id, 31);
            assert_eq!(pipeline.status, "created");
        }

        #[tokio::test]
        async fn get_pipeline_jobs_parses_list() {
            let mut server = Server::new_async().await;
            server
                .mock("GET", "/api/v4/projects/7/pipelines/31/jobs")
                .match_query(Matcher::Any)
                .with_status(200)
                .with_body(
                    r#"[
                        {"id": 1, "name": "build", "stage": "build", "status": "success", "duration": 42.5},
                        {"id": 2, "name": "test", "stage": "test", "status": "failed", "duration": null}
                    ]"#,
                )
                .create_async()
                .await;

            let jobs = client(&server).get_pipeline_jobs(7, 31).await.unwrap();

            assert_eq!(jobs.len(), 2);
            assert_eq!(jobs[0].duration, Some(42.5));
            assert_eq!(jobs[1].duration, None);
        }

        #[tokio::test]
        async fn get_pipeline_jobs_follows_next_page() {
            let mut server = Server::new_async().await;
            let first = server
                .mock("GET", "/api/v4/projects/7/pipelines/31/jobs")
                .match_query(Matcher::AllOf(vec![
                    Matcher::UrlEncoded("per_page".into(), "100".into()),
                    Matcher::UrlEncoded("page".into(), "1".into()),
                ]))
                .with_status(200)
                .with_header("x-next-page", "2")
                .with_body(r#"[{"id": 1, "name": "test 1/2", "stage": "test", "status": "success", "duration": 10.0}]"#)
                .create_async()
                .await;
            let second = server
                .mock("GET", "/api/v4/projects/7/pipelines/31/jobs")
                .match_query(Matcher::AllOf(vec![
                    Matcher::UrlEncoded("per_page".into(), "100".into()),
                    Matcher::UrlEncoded("page".into(), "2".into()),
                ]))
                .with_status(200)
                .with_header("x-next-page", "")
                .with_body(r#"[{"id": 2, "name": "test 2/2", "stage": "test", "status": "success", "duration": 11.0}]"#)
                .create_async()
                .await;

            let jobs = client(&server).get_pipeline_jobs(7, 31).await.unwrap();

            first.assert_async().await;
            second.assert_async().await;
            let names: Vec<&str> = jobs.iter().map(|job| job.name.as_str()).collect();
            assert_eq!(names, vec!["test 1/2", "test 2/2"], "jobs from both pages are kept in order");
        }

        #[tokio::test]
        async fn existing_file_is_updated() {
            let mut server = Server::new_async().await;
            let create = server
                .mock("POST", "/api/v4/projects/7/repository/files/.gitlab-ci.yml")
                .with_status(400)
                .with_body(r#"{"message": "A file with this name already exists"}"#)
                .create_async()
                .await;
            let update = server
                .mock("PUT", "/api/v4/projects/7/repository/files/.gitlab-ci.yml")
                .match_body(Matcher::PartialJson(json!({"branch": "main", "content": "build: {}"})))
                .with_status(200)
                .with_body(r#"{"file_path": ".gitlab-ci.yml", "branch": "main"}"#)
                .create_async()
                .await;

            client(&server)
                .create_or_update_file(7, ".gitlab-ci.yml", "build: {}", "Update CI")
                .await
                .unwrap();

            create.assert_async().await;
            update.assert_async().await;
        }

        #[tokio::test]
        async fn delete_project_accepts_202() {
            let mut server = Server::new_async().await;
            let mock = server
                .mock("DELETE", "/api/v4/projects/7")
                .with_status(202)
                .with_body(r#"{"message": "202 Accepted"}"#)
                .create_async()
                .await;

            client(&server).delete_project(7).await.unwrap();
            mock.assert_async().await;
        }
    }
}
