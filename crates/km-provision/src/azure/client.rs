//! ARM HTTP verbs and long-running operation polling

use super::ArmClient;
use super::error::{ArmError, ArmResult, classify_arm_body};
use backon::Retryable;
use reqwest::Method;
use serde_json::Value;
use tracing::{debug, info, warn};

/// A successful ARM response
#[derive(Debug)]
pub(crate) struct ArmResponse {
    pub status: u16,
    pub body: Value,
    /// `Azure-AsyncOperation` header, if present
    pub async_operation: Option<String>,
    /// `Location` header, if present
    pub location: Option<String>,
}

/// Provisioning states after which ARM makes no further progress
fn is_terminal_state(state: &str) -> bool {
    matches!(state, "Succeeded" | "Failed" | "Canceled")
}

impl ArmClient {
    /// Absolute URL for an ARM path such as a resource id
    pub(crate) fn url(&self, path: &str, api_version: &str) -> String {
        format!(
            "{}{}?api-version={}",
            self.ctx.management_url(),
            path,
            api_version
        )
    }

    /// Same as [`url`](Self::url) with extra, properly encoded query parameters
    pub(crate) fn url_with_query(
        &self,
        path: &str,
        api_version: &str,
        params: &[(&str, &str)],
    ) -> ArmResult<String> {
        let base = self.url(path, api_version);
        let mut url = reqwest::Url::parse(&base).map_err(|e| ArmError::Sdk {
            code: Some("InvalidUrl".to_string()),
            message: format!("{base}: {e}"),
        })?;
        url.query_pairs_mut().extend_pairs(params);
        Ok(url.into())
    }

    async fn send_once(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
    ) -> ArmResult<ArmResponse> {
        let token = self.ctx.bearer().await?;
        debug!(method = %method, url, "ARM request");

        let mut request = self
            .ctx
            .http()
            .request(method.clone(), url)
            .bearer_auth(&token);
        if let Some(body) = body {
            request = request.json(body);
        }

        let resp = request
            .send()
            .await
            .map_err(|source| ArmError::Transport {
                url: url.to_string(),
                source,
            })?;

        let status = resp.status().as_u16();
        let header = |name: &str| {
            resp.headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string())
        };
        let async_operation = header("Azure-AsyncOperation");
        let location = header("Location");
        let body: Value = resp.json().await.unwrap_or(Value::Null);

        if status >= 400 {
            let err = classify_arm_body(status, &body);
            debug!(method = %method, url, status, error = %err, "ARM request failed");
            return Err(err);
        }

        Ok(ArmResponse {
            status,
            body,
            async_operation,
            location,
        })
    }

    /// Send a request, retrying throttled and conflicting calls with backoff
    pub(crate) async fn send(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
    ) -> ArmResult<ArmResponse> {
        (|| async { self.send_once(method.clone(), url, body).await })
            .retry(self.throttle_backoff)
            .when(|e: &ArmError| e.is_retryable())
            .notify(|e, dur| {
                warn!(
                    url,
                    delay = ?dur,
                    error = %e,
                    "ARM request throttled or conflicting, retrying..."
                );
            })
            .await
    }

    /// GET a resource and return its JSON body
    pub(crate) async fn get(&self, path: &str, api_version: &str) -> ArmResult<Value> {
        let url = self.url(path, api_version);
        Ok(self.send(Method::GET, &url, None).await?.body)
    }

    /// GET a collection, following `nextLink` pages, and return every `value` item
    pub(crate) async fn list(&self, path: &str, api_version: &str) -> ArmResult<Vec<Value>> {
        self.list_url(self.url(path, api_version)).await
    }

    /// Same as [`list`](Self::list), with a pre-built URL carrying extra query parameters
    pub(crate) async fn list_url(&self, url: String) -> ArmResult<Vec<Value>> {
        let mut items = Vec::new();
        let mut next = Some(url);

        while let Some(url) = next.take() {
            let body = self.send(Method::GET, &url, None).await?.body;
            if let Some(values) = body["value"].as_array() {
                items.extend(values.iter().cloned());
            }
            next = body["nextLink"].as_str().map(|s| s.to_string());
        }

        Ok(items)
    }

    /// PUT a resource, waiting for the operation if ARM accepted it asynchronously
    pub(crate) async fn put(&self, path: &str, api_version: &str, body: &Value) -> ArmResult<Value> {
        let url = self.url(path, api_version);
        let resp = self.send(Method::PUT, &url, Some(body)).await?;
        self.settle(&url, resp).await
    }

    /// PATCH a resource, waiting for the operation if ARM accepted it asynchronously
    pub(crate) async fn patch(
        &self,
        path: &str,
        api_version: &str,
        body: &Value,
    ) -> ArmResult<Value> {
        let url = self.url(path, api_version);
        let resp = self.send(Method::PATCH, &url, Some(body)).await?;
        self.settle(&url, resp).await
    }

    /// DELETE a resource and wait for the deletion to complete
    ///
    /// A missing resource surfaces as [`ArmError::NotFound`]; callers that
    /// consider that success wrap the call in `ignore_not_found`.
    pub(crate) async fn delete(&self, path: &str, api_version: &str) -> ArmResult<()> {
        let url = self.url(path, api_version);
        let resp = self.send(Method::DELETE, &url, None).await?;
        self.settle(&url, resp).await.map(|_| ())
    }

    /// DELETE a resource without following the long-running operation
    pub(crate) async fn delete_no_wait(&self, path: &str, api_version: &str) -> ArmResult<u16> {
        let url = self.url(path, api_version);
        Ok(self.send(Method::DELETE, &url, None).await?.status)
    }

    /// HEAD a resource: `true` on 2xx, `false` on 404
    pub(crate) async fn exists(&self, path: &str, api_version: &str) -> ArmResult<bool> {
        let url = self.url(path, api_version);
        match self.send(Method::HEAD, &url, None).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Wait until an accepted write has converged
    ///
    /// ARM signals an asynchronous write in three ways, independent of the
    /// 2xx code: an `Azure-AsyncOperation` header, a `202` with `Location`,
    /// or a body whose `provisioningState` is not terminal yet. The last one
    /// is followed by polling the resource itself.
    async fn settle(&self, resource_url: &str, resp: ArmResponse) -> ArmResult<Value> {
        if let Some(op_url) = &resp.async_operation {
            return self.wait_for_operation(&self.absolute(op_url)).await;
        }
        if let (202, Some(location)) = (resp.status, &resp.location) {
            return self.wait_for_operation(&self.absolute(location)).await;
        }
        let pending = resp.body["properties"]["provisioningState"]
            .as_str()
            .or_else(|| resp.body["provisioningState"].as_str())
            .is_some_and(|state| !is_terminal_state(state));
        if pending && resp.status != 204 {
            debug!(url = resource_url, "Write accepted, provisioning still in progress");
            return self.wait_for_operation(resource_url).await;
        }
        Ok(resp.body)
    }

    /// Operation URLs may be relative to the management endpoint
    fn absolute(&self, url: &str) -> String {
        if url.starts_with('/') {
            format!("{}{}", self.ctx.management_url(), url)
        } else {
            url.to_string()
        }
    }

    /// Poll an ARM async operation URL until it completes or times out.
    ///
    /// Accepts both `Azure-AsyncOperation` URLs (body carries `status`) and
    /// `Location` URLs (202 while running, 200/204 when done).
    pub async fn wait_for_operation(&self, op_url: &str) -> ArmResult<Value> {
        let delays = self.operation_delays.iter().cycle();

        for (i, delay) in delays.take(self.operation_max_polls).enumerate() {
            let resp = self.send(Method::GET, op_url, None).await?;

            let state = resp.body["status"]
                .as_str()
                .or_else(|| resp.body["properties"]["provisioningState"].as_str())
                .or_else(|| resp.body["provisioningState"].as_str());
            match (resp.status, state) {
                (_, Some("Succeeded")) => return Ok(resp.body),
                (_, Some(s @ ("Failed" | "Canceled"))) => {
                    let cause = classify_arm_body(500, &resp.body);
                    return Err(ArmError::Sdk {
                        code: cause.code().map(str::to_string),
                        message: format!("ARM operation {s}: {cause}"),
                    });
                }
                (200 | 201 | 204, None) => return Ok(resp.body),
                _ => {}
            }

            let poll = i + 1;
            if poll % 10 == 0 {
                info!(poll, op_url, "Still waiting for ARM operation");
            } else {
                debug!(poll, op_url, delay = ?delay, "ARM operation pending, waiting");
            }
            tokio::time::sleep(*delay).await;
        }

        Err(ArmError::Sdk {
            code: Some("OperationTimedOut".to_string()),
            message: format!(
                "ARM operation did not finish after {} polls: {op_url}",
                self.operation_max_polls
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::azure::ArmContext;
    use backon::ExponentialBuilder;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> ArmClient {
        ArmClient::from_context(&ArmContext::with_static_token(&server.uri(), "fake-token"))
            .with_throttle_backoff(
                ExponentialBuilder::default()
                    .with_min_delay(Duration::from_millis(1))
                    .with_max_delay(Duration::from_millis(5))
                    .with_max_times(3),
            )
            .with_operation_polling(vec![Duration::from_millis(1)], 5)
    }

    #[tokio::test]
    async fn wait_for_operation_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/operations/op-ok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "Succeeded"})))
            .mount(&server)
            .await;

        let url = format!("{}/operations/op-ok", server.uri());
        let body = client(&server).wait_for_operation(&url).await.unwrap();
        assert_eq!(body["status"], "Succeeded");
    }

    #[tokio::test]
    async fn wait_for_operation_reports_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/operations/op-fail"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "Failed",
                "error": {"code": "InternalError", "message": "Something went wrong"}
            })))
            .mount(&server)
            .await;

        let url = format!("{}/operations/op-fail", server.uri());
        let err = client(&server).wait_for_operation(&url).await.unwrap_err();
        assert_eq!(err.code(), Some("InternalError"));
        assert!(err.to_string().contains("Failed"), "got: {err}");
    }

    #[tokio::test]
    async fn wait_for_operation_gives_up() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/operations/op-slow"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"status": "InProgress"})),
            )
            .expect(5)
            .mount(&server)
            .await;

        let url = format!("{}/operations/op-slow", server.uri());
        let err = client(&server).wait_for_operation(&url).await.unwrap_err();
        assert_eq!(err.code(), Some("OperationTimedOut"));
    }

    #[tokio::test]
    async fn throttled_requests_are_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/thing"))
            .respond_with(ResponseTemplate::new(429).set_body_json(json!({
                "error": {"code": "TooManyRequests", "message": "slow down"}
            })))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/thing"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .mount(&server)
            .await;

        let body = client(&server).get("/thing", "2024-01-01").await.unwrap();
        assert_eq!(body["ok"], true);
    }

    #[tokio::test]
    async fn not_found_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "error": {"code": "ResourceNotFound", "message": "nope"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let err = client(&server).get("/missing", "2024-01-01").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn list_follows_next_link() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/items"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [{"name": "a"}],
                "nextLink": format!("{}/items-page-2", server.uri()),
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/items-page-2"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"value": [{"name": "b"}]})),
            )
            .mount(&server)
            .await;

        let items = client(&server).list("/items", "2024-01-01").await.unwrap();
        let names: Vec<_> = items.iter().map(|v| v["name"].as_str().unwrap()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn accepted_put_is_followed() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/res"))
            .respond_with(
                ResponseTemplate::new(202)
                    .insert_header("Azure-AsyncOperation", format!("{}/ops/1", server.uri())),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/ops/1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "Succeeded"})))
            .expect(1)
            .mount(&server)
            .await;

        client(&server)
            .put("/res", "2024-01-01", &json!({"properties": {}}))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn created_put_with_async_operation_is_followed() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/res"))
            .respond_with(
                ResponseTemplate::new(201)
                    .insert_header("Azure-AsyncOperation", format!("{}/ops/2", server.uri()))
                    .set_body_json(json!({"provisioningState": "Updating"})),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/ops/2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "Succeeded"})))
            .expect(1)
            .mount(&server)
            .await;

        client(&server)
            .put("/res", "2024-01-01", &json!({"properties": {}}))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn relative_async_operation_url_is_resolved() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/res"))
            .respond_with(ResponseTemplate::new(200).insert_header("Azure-AsyncOperation", "/ops/3"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/ops/3"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "Succeeded"})))
            .expect(1)
            .mount(&server)
            .await;

        client(&server)
            .patch("/res", "2024-01-01", &json!({"properties": {}}))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn updating_patch_polls_the_resource() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/res"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "properties": {"provisioningState": "Updating", "publicNetworkAccess": "Enabled"}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/res"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "properties": {"provisioningState": "Updating"}
            })))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/res"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "properties": {"provisioningState": "Succeeded", "publicNetworkAccess": "Enabled"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let body = client(&server)
            .patch("/res", "2024-01-01", &json!({"properties": {}}))
            .await
            .unwrap();
        assert_eq!(body["properties"]["provisioningState"], "Succeeded");
    }

    #[tokio::test]
    async fn succeeded_put_is_not_polled() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/res"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "properties": {"provisioningState": "Succeeded"}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/res"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        client(&server)
            .put("/res", "2024-01-01", &json!({"properties": {}}))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn query_values_are_encoded() {
        let server = MockServer::start().await;
        let url = client(&server)
            .url_with_query("/scope", "2022-04-01", &[("$filter", "principalId eq 'a&b'")])
            .unwrap();
        assert!(url.contains("api-version=2022-04-01"), "{url}");
        assert!(!url.contains(' '), "{url}");
        assert!(!url.contains("'a&b'"), "{url}");

        let parsed = reqwest::Url::parse(&url).unwrap();
        let filter = parsed
            .query_pairs()
            .find(|(k, _)| k == "$filter")
            .map(|(_, v)| v.into_owned());
        assert_eq!(filter.as_deref(), Some("principalId eq 'a&b'"));
    }
}
