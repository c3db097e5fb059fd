//! Jenkins collaborator
//!
//! Trait used by the Jenkins configurator and controller, plus an HTTP
//! implementation against the Jenkins remote access API.

use anyhow::{Context, bail};
use async_trait::async_trait;
use conduit_core::domain::integration::Integration;
use conduit_core::domain::job_spec::JenkinsJobParameter;
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use serde::de::DeserializeOwned;

/// State of one build
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JenkinsBuild {
    pub building: bool,
    /// `SUCCESS`, `FAILURE`, `ABORTED`, ... once finished
    pub result: Option<String>,
    pub url: String,
}

impl JenkinsBuild {
    pub fn succeeded(&self) -> bool {
        self.result.as_deref() == Some("SUCCESS")
    }
}

#[async_trait]
pub trait JenkinsClient: Send + Sync {
    /// Parameter definitions of a job with their defaults
    async fn job_parameters(
        &self,
        server: &Integration,
        job_name: &str,
    ) -> anyhow::Result<Vec<JenkinsJobParameter>>;

    /// Queues a build and returns the queue item location
    async fn trigger(
        &self,
        server: &Integration,
        job_name: &str,
        parameters: &[JenkinsJobParameter],
    ) -> anyhow::Result<String>;

    /// Build number once the queue item has started
    async fn queued_build(&self, server: &Integration, queue_url: &str)
    -> anyhow::Result<Option<i64>>;

    async fn build(
        &self,
        server: &Integration,
        job_name: &str,
        number: i64,
    ) -> anyhow::Result<JenkinsBuild>;

    async fn stop(&self, server: &Integration, job_name: &str, number: i64) -> anyhow::Result<()>;
}

/// HTTP client for Jenkins servers
#[derive(Debug, Clone, Default)]
pub struct HttpJenkinsClient {
    client: Client,
}

#[derive(Deserialize)]
struct JobInfo {
    #[serde(default)]
    property: Vec<JobProperty>,
}

#[derive(Deserialize)]
struct JobProperty {
    #[serde(default, rename = "parameterDefinitions")]
    parameter_definitions: Vec<ParameterDefinition>,
}

#[derive(Deserialize)]
struct ParameterDefinition {
    name: String,
    #[serde(default, rename = "type")]
    param_type: String,
    #[serde(default, rename = "defaultParameterValue")]
    default_value: Option<DefaultValue>,
    #[serde(default)]
    choices: Vec<String>,
}

#[derive(Deserialize)]
struct DefaultValue {
    #[serde(default)]
    value: serde_json::Value,
}

#[derive(Deserialize)]
struct QueueItem {
    #[serde(default)]
    cancelled: bool,
    executable: Option<Executable>,
}

#[derive(Deserialize)]
struct Executable {
    number: i64,
}

#[derive(Deserialize)]
struct BuildInfo {
    #[serde(default)]
    building: bool,
    result: Option<String>,
    #[serde(default)]
    url: String,
}

impl HttpJenkinsClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    fn job_url(server: &Integration, job_name: &str) -> String {
        let base = server.address.trim_end_matches('/');
        let path = job_name
            .split('/')
            .filter(|segment| !segment.is_empty())
            .map(|segment| format!("job/{}", segment))
            .collect::<Vec<_>>()
            .join("/");
        format!("{}/{}", base, path)
    }

    fn authorized(&self, server: &Integration, request: RequestBuilder) -> RequestBuilder {
        if server.username.is_empty() {
            request
        } else {
            request.basic_auth(&server.username, Some(&server.token))
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, server: &Integration, url: &str) -> anyhow::Result<T> {
        let response = self
            .authorized(server, self.client.get(url))
            .send()
            .await
            .with_context(|| format!("Failed to reach jenkins at {}", url))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("jenkins returned {} for {}: {}", status, url, body);
        }
        response
            .json()
            .await
            .with_context(|| format!("Failed to parse jenkins response from {}", url))
    }
}

#[async_trait]
impl JenkinsClient for HttpJenkinsClient {
    async fn job_parameters(
        &self,
        server: &Integration,
        job_name: &str,
    ) -> anyhow::Result<Vec<JenkinsJobParameter>> {
        let url = format!("{}/api/json", Self::job_url(server, job_name));
        let info: JobInfo = self.get_json(server, &url).await?;

        Ok(info
            .property
            .into_iter()
            .flat_map(|p| p.parameter_definitions)
            .map(|definition| JenkinsJobParameter {
                name: definition.name,
                value: definition
                    .default_value
                    .map(|d| match d.value {
                        serde_json::Value::String(s) => s,
                        serde_json::Value::Null => String::new(),
                        other => other.to_string(),
                    })
                    .unwrap_or_default(),
                param_type: definition.param_type,
                choices: definition.choices,
            })
            .collect())
    }

    async fn trigger(
        &self,
        server: &Integration,
        job_name: &str,
        parameters: &[JenkinsJobParameter],
    ) -> anyhow::Result<String> {
        let endpoint = if parameters.is_empty() {
            "build"
        } else {
            "buildWithParameters"
        };
        let url = format!("{}/{}", Self::job_url(server, job_name), endpoint);
        let query: Vec<(&str, &str)> = parameters
            .iter()
            .map(|p| (p.name.as_str(), p.value.as_str()))
            .collect();

        let response = self
            .authorized(server, self.client.post(&url).query(&query))
            .send()
            .await
            .with_context(|| format!("Failed to trigger jenkins job {}", job_name))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("jenkins refused to build {}: {} {}", job_name, status, body);
        }

        response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| anyhow::anyhow!("jenkins returned no queue location for {}", job_name))
    }

    async fn queued_build(
        &self,
        server: &Integration,
        queue_url: &str,
    ) -> anyhow::Result<Option<i64>> {
        let url = format!("{}/api/json", queue_url.trim_end_matches('/'));
        let item: QueueItem = self.get_json(server, &url).await?;
        if item.cancelled {
            bail!("jenkins queue item {} was cancelled", queue_url);
        }
        Ok(item.executable.map(|e| e.number))
    }

    async fn build(
        &self,
        server: &Integration,
        job_name: &str,
        number: i64,
    ) -> anyhow::Result<JenkinsBuild> {
        let url = format!("{}/{}/api/json", Self::job_url(server, job_name), number);
        let info: BuildInfo = self.get_json(server, &url).await?;
        Ok(JenkinsBuild {
            building: info.building,
            result: info.result,
            url: info.url,
        })
    }

    async fn stop(&self, server: &Integration, job_name: &str, number: i64) -> anyhow::Result<()> {
        let url = format!("{}/{}/stop", Self::job_url(server, job_name), number);
        let response = self
            .authorized(server, self.client.post(&url))
            .send()
            .await
            .with_context(|| format!("Failed to stop jenkins build {}#{}", job_name, number))?;
        if !response.status().is_success() {
            bail!("jenkins refused to stop {}#{}: {}", job_name, number, response.status());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_core::domain::integration::IntegrationKind;

    #[test]
    fn test_job_url_handles_folders() {
        let server = Integration {
            id: "ci".to_string(),
            kind: IntegrationKind::Jenkins,
            address: "http://jenkins:8080/".to_string(),
            username: String::new(),
            token: String::new(),
            console_address: String::new(),
            db_type: String::new(),
        };
        assert_eq!(
            HttpJenkinsClient::job_url(&server, "team/api"),
            "http://jenkins:8080/job/team/job/api"
        );
    }

    #[test]
    fn test_build_success() {
        let build = JenkinsBuild {
            building: false,
            result: Some("SUCCESS".to_string()),
            url: String::new(),
        };
        assert!(build.succeeded());
        assert!(!JenkinsBuild::default().succeeded());
    }
}
