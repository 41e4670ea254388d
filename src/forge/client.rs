//! REST client for a GitLab-class forge.
//!
//! A thin translation layer: every method maps to one or two v4 API calls
//! and converts the wire DTOs into the engine's domain types. Retry policy
//! lives above this layer (in the executor), not here.

use std::collections::BTreeSet;

use serde::Deserialize;

use crate::config::ForgeConfig;
use crate::types::{
    Commit, DiscussionId, FileChange, Mergeability, MrId, NoteId, PipelineId, PipelineJob,
    PipelineState, PipelineStatus, Sha, UserRef,
};

use super::error::ApiError;
use super::{Discussion, ForgeApi, MergeOutcome, MrAttributes, NewMr, Note};

/// Award emoji name used to stamp follow-up MRs.
const FOLLOW_UP_AWARD: &str = "robot";

/// A `reqwest`-backed forge client scoped to one project.
#[derive(Debug, Clone)]
pub struct ForgeClient {
    http: reqwest::Client,
    base_url: String,
    /// URL-encoded project path (slashes escaped).
    project: String,
    token: String,
}

impl ForgeClient {
    /// Builds a client from the forge section of the configuration.
    pub fn new(config: &ForgeConfig, token: String) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout))
            .build()
            .map_err(|e| ApiError::from_reqwest("building HTTP client", e))?;
        Ok(ForgeClient {
            http,
            base_url: config.url.trim_end_matches('/').to_string(),
            project: config.project.replace('/', "%2F"),
            token,
        })
    }

    fn mr_url(&self, mr: MrId, suffix: &str) -> String {
        format!(
            "{}/api/v4/projects/{}/merge_requests/{}{}",
            self.base_url, self.project, mr.0, suffix
        )
    }

    fn project_url(&self, suffix: &str) -> String {
        format!(
            "{}/api/v4/projects/{}{}",
            self.base_url, self.project, suffix
        )
    }

    async fn send<T: serde::de::DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        context: &str,
    ) -> Result<T, ApiError> {
        let response = request
            .header("PRIVATE-TOKEN", &self.token)
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

    async fn get<T: serde::de::DeserializeOwned>(
        &self,
        url: String,
        context: &str,
    ) -> Result<T, ApiError> {
        self.send(self.http.get(url), context).await
    }

    async fn lookup_user_id(&self, username: &str) -> Result<u64, ApiError> {
        let url = format!("{}/api/v4/users?username={}", self.base_url, username);
        let users: Vec<UserDto> = self.get(url, "looking up user").await?;
        users
            .first()
            .map(|u| u.id)
            .ok_or_else(|| ApiError::permanent(format!("unknown forge user {username:?}")))
    }

    async fn latest_pipeline(&self, mr: MrId) -> Result<Option<PipelineDto>, ApiError> {
        let pipelines: Vec<PipelineDto> = self
            .get(self.mr_url(mr, "/pipelines"), "listing MR pipelines")
            .await?;
        Ok(pipelines.into_iter().next())
    }
}

impl ForgeApi for ForgeClient {
    async fn get_mr(&self, mr: MrId) -> Result<MrAttributes, ApiError> {
        let dto: MrDto = self.get(self.mr_url(mr, ""), "fetching MR").await?;
        let awards: Vec<AwardDto> = self
            .get(self.mr_url(mr, "/award_emoji"), "listing MR awards")
            .await?;
        let has_follow_up_award = awards.iter().any(|a| a.name == FOLLOW_UP_AWARD);
        dto.into_attributes(has_follow_up_award)
    }

    async fn list_open_mrs(&self) -> Result<Vec<MrId>, ApiError> {
        let url = self.project_url("/merge_requests?state=opened&per_page=100");
        let dtos: Vec<MrRefDto> = self.get(url, "listing open MRs").await?;
        Ok(dtos.into_iter().map(|m| MrId(m.iid)).collect())
    }

    async fn list_commits(&self, mr: MrId) -> Result<Vec<Commit>, ApiError> {
        let dtos: Vec<CommitDto> = self
            .get(self.mr_url(mr, "/commits"), "listing MR commits")
            .await?;
        dtos.into_iter().map(CommitDto::into_commit).collect()
    }

    async fn list_changes(&self, mr: MrId) -> Result<Vec<FileChange>, ApiError> {
        let dto: ChangesDto = self
            .get(self.mr_url(mr, "/changes"), "listing MR changes")
            .await?;
        Ok(dto
            .changes
            .into_iter()
            .map(|c| FileChange {
                path: c.new_path,
                diff: c.diff,
                new_file: c.new_file,
                deleted_file: c.deleted_file,
            })
            .collect())
    }

    async fn list_notes(&self, mr: MrId) -> Result<Vec<Note>, ApiError> {
        let dtos: Vec<NoteDto> = self
            .get(self.mr_url(mr, "/notes"), "listing MR notes")
            .await?;
        Ok(dtos
            .into_iter()
            .map(|n| Note {
                id: NoteId(n.id),
                author: n.author.username,
                body: n.body,
                created_at: n.created_at,
            })
            .collect())
    }

    async fn post_note(&self, mr: MrId, body: &str) -> Result<NoteId, ApiError> {
        let request = self
            .http
            .post(self.mr_url(mr, "/notes"))
            .json(&serde_json::json!({ "body": body }));
        let dto: NoteDto = self.send(request, "posting MR note").await?;
        Ok(NoteId(dto.id))
    }

    async fn list_discussions(&self, mr: MrId) -> Result<Vec<Discussion>, ApiError> {
        let dtos: Vec<DiscussionDto> = self
            .get(self.mr_url(mr, "/discussions"), "listing MR discussions")
            .await?;
        Ok(dtos
            .into_iter()
            .filter_map(|d| {
                let first = d.notes.into_iter().next()?;
                Some(Discussion {
                    id: DiscussionId(d.id),
                    author: first.author.username,
                    body: first.body,
                    resolved: first.resolved.unwrap_or(false),
                })
            })
            .collect())
    }

    async fn create_discussion(&self, mr: MrId, body: &str) -> Result<DiscussionId, ApiError> {
        let request = self
            .http
            .post(self.mr_url(mr, "/discussions"))
            .json(&serde_json::json!({ "body": body }));
        let dto: DiscussionDto = self.send(request, "creating MR discussion").await?;
        Ok(DiscussionId(dto.id))
    }

    async fn resolve_discussion(
        &self,
        mr: MrId,
        discussion: &DiscussionId,
    ) -> Result<(), ApiError> {
        let url = self.mr_url(mr, &format!("/discussions/{}", discussion.0));
        let request = self
            .http
            .put(url)
            .json(&serde_json::json!({ "resolved": true }));
        let _: serde_json::Value = self.send(request, "resolving MR discussion").await?;
        Ok(())
    }

    async fn list_approvals(&self, mr: MrId) -> Result<BTreeSet<String>, ApiError> {
        let dto: ApprovalsDto = self
            .get(self.mr_url(mr, "/approvals"), "listing MR approvals")
            .await?;
        Ok(dto
            .approved_by
            .into_iter()
            .map(|a| a.user.username)
            .collect())
    }

    async fn add_assignee(&self, mr: MrId, username: &str) -> Result<(), ApiError> {
        let user_id = self.lookup_user_id(username).await?;
        let current: MrDto = self.get(self.mr_url(mr, ""), "fetching MR assignees").await?;
        let mut ids: Vec<u64> = current.assignees.iter().map(|a| a.id).collect();
        if ids.contains(&user_id) {
            return Ok(());
        }
        ids.push(user_id);
        let request = self
            .http
            .put(self.mr_url(mr, ""))
            .json(&serde_json::json!({ "assignee_ids": ids }));
        let _: serde_json::Value = self.send(request, "adding MR assignee").await?;
        Ok(())
    }

    async fn get_pipeline(&self, mr: MrId) -> Result<Option<PipelineState>, ApiError> {
        let Some(pipeline) = self.latest_pipeline(mr).await? else {
            return Ok(None);
        };
        let jobs: Vec<JobDto> = self
            .get(
                self.project_url(&format!("/pipelines/{}/jobs", pipeline.id)),
                "listing pipeline jobs",
            )
            .await?;
        Ok(Some(PipelineState {
            id: PipelineId(pipeline.id),
            status: parse_pipeline_status(&pipeline.status),
            sha: Sha::parse(&pipeline.sha)
                .map_err(|e| ApiError::permanent(format!("pipeline SHA: {e}")))?,
            jobs: jobs
                .into_iter()
                .map(|j| PipelineJob {
                    manual: j.status == "manual",
                    name: j.name,
                    stage: j.stage,
                })
                .collect(),
        }))
    }

    async fn play_jobs(&self, mr: MrId, job_names: &[String]) -> Result<(), ApiError> {
        let Some(pipeline) = self.latest_pipeline(mr).await? else {
            return Err(ApiError::permanent("no pipeline to start jobs in"));
        };
        let jobs: Vec<JobDto> = self
            .get(
                self.project_url(&format!("/pipelines/{}/jobs", pipeline.id)),
                "listing pipeline jobs",
            )
            .await?;
        for job in jobs {
            if job.status == "manual" && job_names.contains(&job.name) {
                let request = self
                    .http
                    .post(self.project_url(&format!("/jobs/{}/play", job.id)));
                let _: serde_json::Value = self.send(request, "starting manual job").await?;
            }
        }
        Ok(())
    }

    async fn branch_head(&self, branch: &str) -> Result<Option<Sha>, ApiError> {
        let encoded = branch.replace('/', "%2F");
        let url = self.project_url(&format!("/repository/branches/{encoded}"));
        match self.get::<BranchDto>(url, "fetching branch head").await {
            Ok(dto) => {
                let sha = Sha::parse(&dto.commit.id)
                    .map_err(|e| ApiError::permanent(format!("branch head SHA: {e}")))?;
                Ok(Some(sha))
            }
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn merge_mr(
        &self,
        mr: MrId,
        message: &str,
        squash: bool,
    ) -> Result<MergeOutcome, ApiError> {
        let body = if squash {
            serde_json::json!({ "squash": true, "squash_commit_message": message })
        } else {
            serde_json::json!({ "merge_commit_message": message })
        };
        let request = self.http.put(self.mr_url(mr, "/merge")).json(&body);
        match self.send::<MrDto>(request, "merging MR").await {
            Ok(dto) => {
                let sha = resolve_landed_sha(
                    squash,
                    dto.squash_commit_sha.as_deref(),
                    dto.merge_commit_sha.as_deref(),
                    &dto.sha,
                )?;
                Ok(MergeOutcome::Merged { sha })
            }
            // The forge answers 405/406 when the MR cannot currently be
            // merged; the plan is abandoned without error.
            Err(e) if matches!(e.status, Some(405) | Some(406)) => Ok(MergeOutcome::NotMergeable),
            Err(e) => Err(e),
        }
    }

    async fn create_mr(&self, new_mr: NewMr) -> Result<MrId, ApiError> {
        let mut assignee_ids = Vec::new();
        for username in &new_mr.assignees {
            match self.lookup_user_id(username).await {
                Ok(id) => assignee_ids.push(id),
                // A missing assignee must not block follow-up creation.
                Err(e) if !e.is_transient() => {
                    tracing::warn!(username, error = %e, "Skipping unknown assignee");
                }
                Err(e) => return Err(e),
            }
        }
        let title = if new_mr.draft {
            format!("Draft: {}", new_mr.title)
        } else {
            new_mr.title
        };
        let request = self
            .http
            .post(self.project_url("/merge_requests"))
            .json(&serde_json::json!({
                "source_branch": new_mr.source_branch,
                "target_branch": new_mr.target_branch,
                "title": title,
                "description": new_mr.description,
                "assignee_ids": assignee_ids,
                "squash": true,
            }));
        let dto: MrDto = self.send(request, "creating MR").await?;
        Ok(MrId(dto.iid))
    }

    async fn add_follow_up_award(&self, mr: MrId) -> Result<(), ApiError> {
        let request = self
            .http
            .post(self.mr_url(mr, "/award_emoji"))
            .json(&serde_json::json!({ "name": FOLLOW_UP_AWARD }));
        let _: serde_json::Value = self.send(request, "adding follow-up award").await?;
        Ok(())
    }
}

/// Picks the SHA that actually landed on the target branch.
///
/// A squashed MR merged with the "merge commit" method has *both* fields
/// populated; the squash commit is the single-parent commit follow-ups can
/// cherry-pick, while the merge commit cannot be picked without a mainline.
/// Non-squash merges prefer the merge commit.
fn landed_sha<'a>(
    squash: bool,
    squash_commit_sha: Option<&'a str>,
    merge_commit_sha: Option<&'a str>,
) -> Option<&'a str> {
    if squash {
        squash_commit_sha.or(merge_commit_sha)
    } else {
        merge_commit_sha.or(squash_commit_sha)
    }
}

/// `landed_sha` with the head SHA as a last resort (fast-forward merges
/// report neither field), parsed and validated.
fn resolve_landed_sha(
    squash: bool,
    squash_commit_sha: Option<&str>,
    merge_commit_sha: Option<&str>,
    head_sha: &str,
) -> Result<Sha, ApiError> {
    let raw = landed_sha(squash, squash_commit_sha, merge_commit_sha).unwrap_or(head_sha);
    Sha::parse(raw).map_err(|e| ApiError::permanent(format!("merge SHA: {e}")))
}

fn parse_pipeline_status(raw: &str) -> PipelineStatus {
    match raw {
        "success" => PipelineStatus::Success,
        "failed" => PipelineStatus::Failed,
        "canceled" => PipelineStatus::Canceled,
        "manual" => PipelineStatus::ManualPending,
        _ => PipelineStatus::Running,
    }
}

// ─── Wire DTOs ───

#[derive(Debug, Deserialize)]
struct UserDto {
    id: u64,
    username: String,
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct MrDto {
    iid: u64,
    title: String,
    #[serde(default)]
    description: String,
    web_url: String,
    author: UserDto,
    source_branch: String,
    target_branch: String,
    sha: String,
    #[serde(default)]
    squash: bool,
    #[serde(default)]
    draft: bool,
    state: String,
    #[serde(default)]
    merge_status: String,
    #[serde(default)]
    assignees: Vec<UserDto>,
    #[serde(default)]
    merge_commit_sha: Option<String>,
    #[serde(default)]
    squash_commit_sha: Option<String>,
}

impl MrDto {
    fn into_attributes(self, has_follow_up_award: bool) -> Result<MrAttributes, ApiError> {
        let head_sha = Sha::parse(&self.sha)
            .map_err(|e| ApiError::permanent(format!("MR head SHA: {e}")))?;
        let mergeability = match self.merge_status.as_str() {
            "can_be_merged" => Mergeability::Mergeable,
            "cannot_be_merged" => Mergeability::Conflicts,
            _ => Mergeability::Unknown,
        };
        let merged_commit_sha = landed_sha(
            self.squash,
            self.squash_commit_sha.as_deref(),
            self.merge_commit_sha.as_deref(),
        )
        .map(Sha::parse)
        .transpose()
        .map_err(|e| ApiError::permanent(format!("merged commit SHA: {e}")))?;
        Ok(MrAttributes {
            id: MrId(self.iid),
            title: self.title,
            description: self.description,
            web_url: self.web_url,
            author: UserRef {
                username: self.author.username,
                name: self.author.name,
            },
            source_branch: self.source_branch,
            target_branch: self.target_branch,
            head_sha,
            squash: self.squash,
            draft: self.draft,
            merged: self.state == "merged",
            mergeability,
            assignees: self.assignees.into_iter().map(|a| a.username).collect(),
            merged_commit_sha,
            has_follow_up_award,
        })
    }
}

#[derive(Debug, Deserialize)]
struct MrRefDto {
    iid: u64,
}

#[derive(Debug, Deserialize)]
struct CommitDto {
    id: String,
    message: String,
    #[serde(default)]
    parent_ids: Vec<String>,
}

impl CommitDto {
    fn into_commit(self) -> Result<Commit, ApiError> {
        let sha = Sha::parse(&self.id)
            .map_err(|e| ApiError::permanent(format!("commit SHA: {e}")))?;
        let parent_shas = self
            .parent_ids
            .iter()
            .map(|p| {
                Sha::parse(p).map_err(|e| ApiError::permanent(format!("parent SHA: {e}")))
            })
            .collect::<Result<_, _>>()?;
        Ok(Commit {
            sha,
            message: self.message,
            parent_shas,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ChangesDto {
    changes: Vec<ChangeDto>,
}

#[derive(Debug, Deserialize)]
struct ChangeDto {
    new_path: String,
    #[serde(default)]
    diff: String,
    #[serde(default)]
    new_file: bool,
    #[serde(default)]
    deleted_file: bool,
}

#[derive(Debug, Deserialize)]
struct NoteDto {
    id: u64,
    author: UserDto,
    body: String,
    created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Deserialize)]
struct DiscussionDto {
    id: String,
    notes: Vec<DiscussionNoteDto>,
}

#[derive(Debug, Deserialize)]
struct DiscussionNoteDto {
    author: UserDto,
    body: String,
    #[serde(default)]
    resolved: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct ApprovalsDto {
    #[serde(default)]
    approved_by: Vec<ApprovedByDto>,
}

#[derive(Debug, Deserialize)]
struct ApprovedByDto {
    user: UserDto,
}

#[derive(Debug, Deserialize)]
struct PipelineDto {
    id: u64,
    status: String,
    sha: String,
}

#[derive(Debug, Deserialize)]
struct JobDto {
    id: u64,
    name: String,
    stage: String,
    status: String,
}

#[derive(Debug, Deserialize)]
struct BranchDto {
    commit: BranchCommitDto,
}

#[derive(Debug, Deserialize)]
struct BranchCommitDto {
    id: String,
}

#[derive(Debug, Deserialize)]
struct AwardDto {
    name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mr_dto_maps_to_attributes() {
        let json = serde_json::json!({
            "iid": 42,
            "title": "PROJ-1: fix X",
            "description": "Body",
            "web_url": "https://git.example.com/dev/vms/-/merge_requests/42",
            "author": { "id": 7, "username": "alice", "name": "Alice" },
            "source_branch": "fix-x",
            "target_branch": "master",
            "sha": "a".repeat(40),
            "squash": true,
            "draft": false,
            "state": "opened",
            "merge_status": "can_be_merged",
            "assignees": [{ "id": 8, "username": "bob", "name": "Bob" }],
        });
        let dto: MrDto = serde_json::from_value(json).unwrap();
        let attrs = dto.into_attributes(false).unwrap();
        assert_eq!(attrs.id, MrId(42));
        assert_eq!(attrs.mergeability, Mergeability::Mergeable);
        assert!(!attrs.merged);
        assert!(attrs.assignees.contains("bob"));
    }

    #[test]
    fn unknown_merge_status_maps_to_unknown() {
        let json = serde_json::json!({
            "iid": 1,
            "title": "t",
            "web_url": "u",
            "author": { "id": 1, "username": "a" },
            "source_branch": "s",
            "target_branch": "t",
            "sha": "b".repeat(40),
            "state": "opened",
            "merge_status": "unchecked",
        });
        let dto: MrDto = serde_json::from_value(json).unwrap();
        let attrs = dto.into_attributes(false).unwrap();
        assert_eq!(attrs.mergeability, Mergeability::Unknown);
    }

    #[test]
    fn pipeline_status_parsing() {
        assert_eq!(parse_pipeline_status("success"), PipelineStatus::Success);
        assert_eq!(parse_pipeline_status("failed"), PipelineStatus::Failed);
        assert_eq!(parse_pipeline_status("canceled"), PipelineStatus::Canceled);
        assert_eq!(
            parse_pipeline_status("manual"),
            PipelineStatus::ManualPending
        );
        assert_eq!(parse_pipeline_status("running"), PipelineStatus::Running);
        assert_eq!(parse_pipeline_status("pending"), PipelineStatus::Running);
    }

    #[test]
    fn landed_sha_prefers_the_squash_commit_for_squash_merges() {
        let squash = "a".repeat(40);
        let merge = "b".repeat(40);
        // Merge-commit method plus squash populates both fields; the squash
        // commit is the one follow-ups can cherry-pick.
        assert_eq!(
            landed_sha(true, Some(&squash), Some(&merge)),
            Some(squash.as_str())
        );
        assert_eq!(
            landed_sha(false, Some(&squash), Some(&merge)),
            Some(merge.as_str())
        );
        // Either field alone wins regardless of the method.
        assert_eq!(landed_sha(true, None, Some(&merge)), Some(merge.as_str()));
        assert_eq!(landed_sha(false, Some(&squash), None), Some(squash.as_str()));
    }

    #[test]
    fn resolve_landed_sha_falls_back_to_head() {
        let head = "c".repeat(40);
        let sha = resolve_landed_sha(true, None, None, &head).unwrap();
        assert_eq!(sha.as_str(), head);

        assert!(resolve_landed_sha(true, Some("not-a-sha"), None, &head).is_err());
    }

    #[test]
    fn merged_attributes_use_squash_aware_priority() {
        let json = serde_json::json!({
            "iid": 9,
            "title": "PROJ-1: fix",
            "web_url": "u",
            "author": { "id": 1, "username": "alice" },
            "source_branch": "fix-x",
            "target_branch": "master",
            "sha": "c".repeat(40),
            "squash": true,
            "state": "merged",
            "merge_status": "can_be_merged",
            "squash_commit_sha": "a".repeat(40),
            "merge_commit_sha": "b".repeat(40),
        });
        let dto: MrDto = serde_json::from_value(json).unwrap();
        let attrs = dto.into_attributes(false).unwrap();
        assert_eq!(
            attrs.merged_commit_sha.unwrap().as_str(),
            "a".repeat(40)
        );
    }

    #[test]
    fn commit_dto_validates_shas() {
        let good: CommitDto = serde_json::from_value(serde_json::json!({
            "id": "c".repeat(40),
            "message": "PROJ-1: fix",
            "parent_ids": ["d".repeat(40)],
        }))
        .unwrap();
        assert!(good.into_commit().is_ok());

        let bad: CommitDto = serde_json::from_value(serde_json::json!({
            "id": "nope",
            "message": "m",
        }))
        .unwrap();
        assert!(bad.into_commit().is_err());
    }
}
