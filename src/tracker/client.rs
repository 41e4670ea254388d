//! REST client for a Jira-class issue tracker.
//!
//! Version-to-branch mapping follows the tracker convention: a release's
//! description names its git branch in angle brackets, e.g.
//! `Patch release <vms_5.0>`. Versions without such a marker stay unmapped
//! and fail the fix-version sanity rule.

use regex::Regex;
use serde::Deserialize;

use crate::config::JiraConfig;
use crate::forge::ApiError;
use crate::types::{FixVersion, IssueKey, IssueSnapshot, IssueStatus};

use super::{TrackerApi, TrackerComment};

/// A `reqwest`-backed tracker client.
#[derive(Debug, Clone)]
pub struct TrackerClient {
    http: reqwest::Client,
    base_url: String,
    login: String,
    password: String,
    branch_marker: Regex,
}

impl TrackerClient {
    /// Builds a client from the tracker section of the configuration.
    pub fn new(config: &JiraConfig, password: String) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout))
            .build()
            .map_err(|e| ApiError::from_reqwest("building HTTP client", e))?;
        Ok(TrackerClient {
            http,
            base_url: config.url.trim_end_matches('/').to_string(),
            login: config.login.clone(),
            password,
            branch_marker: Regex::new(r"<([^<>]+)>").expect("static regex"),
        })
    }

    fn issue_url(&self, key: &IssueKey, suffix: &str) -> String {
        format!("{}/rest/api/2/issue/{}{}", self.base_url, key, suffix)
    }

    async fn send<T: serde::de::DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        context: &str,
    ) -> Result<T, ApiError> {
        let response = request
            .basic_auth(&self.login, Some(&self.password))
            .send()
            .await
            .map_err(|e| ApiError::from_reqwest(context, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::from_status(
                status.as_u16(),
                format!("{context}: {body}"),
            ));
        }
        response
            .json::<T>()
            .await
            .map_err(|e| ApiError::from_reqwest(context, e))
    }

    fn branch_from_description(&self, description: Option<&str>) -> Option<String> {
        let description = description?;
        self.branch_marker
            .captures(description)
            .map(|c| c[1].to_string())
    }
}

impl TrackerApi for TrackerClient {
    async fn get_issue(&self, key: &IssueKey) -> Result<IssueSnapshot, ApiError> {
        let url = self.issue_url(key, "?fields=summary,status,fixVersions,assignee");
        let dto: IssueDto = self.send(self.http.get(url), "fetching issue").await?;
        Ok(IssueSnapshot {
            key: key.clone(),
            summary: dto.fields.summary,
            status: IssueStatus::from_raw(&dto.fields.status.name),
            fix_versions: dto
                .fields
                .fix_versions
                .into_iter()
                .map(|v| FixVersion {
                    branch: self.branch_from_description(v.description.as_deref()),
                    name: v.name,
                })
                .collect(),
            assignee: dto.fields.assignee.map(|a| a.name),
        })
    }

    async fn transition_issue(&self, key: &IssueKey, to_status: &str) -> Result<(), ApiError> {
        // The transitions endpoint names the reachable statuses; the id of
        // the matching transition is what the POST needs.
        let url = self.issue_url(key, "/transitions");
        let dto: TransitionsDto = self
            .send(self.http.get(&url), "listing issue transitions")
            .await?;
        let transition = dto
            .transitions
            .iter()
            .find(|t| t.to.name.eq_ignore_ascii_case(to_status))
            .ok_or_else(|| {
                ApiError::permanent(format!(
                    "issue {key} has no transition to {to_status:?} from its current status"
                ))
            })?;
        let request = self.http.post(&url).json(&serde_json::json!({
            "transition": { "id": transition.id }
        }));
        let _: serde_json::Value = self.send(request, "transitioning issue").await?;
        Ok(())
    }

    async fn post_comment(&self, key: &IssueKey, body: &str) -> Result<(), ApiError> {
        let request = self
            .http
            .post(self.issue_url(key, "/comment"))
            .json(&serde_json::json!({ "body": body }));
        let _: serde_json::Value = self.send(request, "posting issue comment").await?;
        Ok(())
    }

    async fn list_comments(&self, key: &IssueKey) -> Result<Vec<TrackerComment>, ApiError> {
        let dto: CommentsDto = self
            .send(
                self.http.get(self.issue_url(key, "/comment")),
                "listing issue comments",
            )
            .await?;
        Ok(dto
            .comments
            .into_iter()
            .map(|c| TrackerComment {
                author: c.author.name,
                body: c.body,
            })
            .collect())
    }
}

// ─── Wire DTOs ───

#[derive(Debug, Deserialize)]
struct IssueDto {
    fields: IssueFieldsDto,
}

#[derive(Debug, Deserialize)]
struct IssueFieldsDto {
    summary: String,
    status: StatusDto,
    #[serde(rename = "fixVersions", default)]
    fix_versions: Vec<VersionDto>,
    #[serde(default)]
    assignee: Option<TrackerUserDto>,
}

#[derive(Debug, Deserialize)]
struct StatusDto {
    name: String,
}

#[derive(Debug, Deserialize)]
struct VersionDto {
    name: String,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TrackerUserDto {
    name: String,
}

#[derive(Debug, Deserialize)]
struct TransitionsDto {
    transitions: Vec<TransitionDto>,
}

#[derive(Debug, Deserialize)]
struct TransitionDto {
    id: String,
    to: StatusDto,
}

#[derive(Debug, Deserialize)]
struct CommentsDto {
    #[serde(default)]
    comments: Vec<CommentDto>,
}

#[derive(Debug, Deserialize)]
struct CommentDto {
    author: TrackerUserDto,
    body: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn client() -> TrackerClient {
        let config = JiraConfig {
            url: "https://jira.example.com".into(),
            login: "robocat".into(),
            password_file: PathBuf::from("/dev/null"),
            timeout: 10,
            retries: 3,
            project_keys: vec!["PROJ".into()],
        };
        TrackerClient::new(&config, "secret".into()).unwrap()
    }

    #[test]
    fn branch_extracted_from_release_description() {
        let client = client();
        assert_eq!(
            client.branch_from_description(Some("Patch release <vms_5.0>")),
            Some("vms_5.0".to_string())
        );
        assert_eq!(client.branch_from_description(Some("no marker")), None);
        assert_eq!(client.branch_from_description(None), None);
    }

    #[test]
    fn issue_dto_maps_to_snapshot_fields() {
        let json = serde_json::json!({
            "fields": {
                "summary": "Crash on start",
                "status": { "name": "In Review" },
                "fixVersions": [
                    { "name": "5.0", "description": "Release <vms_5.0>" },
                    { "name": "Future" },
                ],
                "assignee": { "name": "alice" },
            }
        });
        let dto: IssueDto = serde_json::from_value(json).unwrap();
        assert_eq!(dto.fields.summary, "Crash on start");
        assert_eq!(dto.fields.fix_versions.len(), 2);
        assert_eq!(dto.fields.assignee.unwrap().name, "alice");
    }
}
