//! Shared test fixtures: snapshot builders and in-memory service fakes.
//!
//! The fakes implement the real service contracts over `Mutex`-guarded
//! state, so whole engine cycles can run against them and assertions can
//! inspect the resulting "forge" and "tracker" state directly.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::Utc;

use crate::checkers::{
    CheckerError, ComplianceChecker, SubmoduleChecker, SubmoduleVerdict, Violation,
};
use crate::config::{
    BotConfig, Config, EngineConfig, ForgeConfig, IngressConfig, JiraConfig,
    NxSubmoduleCheckConfig, PipelineConfig, RepoConfig,
};
use crate::forge::{
    ApiError, Discussion, ForgeApi, MergeOutcome, MrAttributes, NewMr, Note,
};
use crate::ledger::DiscussionLedger;
use crate::projector::{ComplianceReport, CycleState, FollowUpMode};
use crate::tracker::{TrackerApi, TrackerComment};
use crate::types::{
    Commit, DiscussionId, Fingerprint, IssueKey, IssueSnapshot, IssueStatus, Mergeability,
    MrId, MrSnapshot, NoteId, PipelineId, PipelineState, PipelineStatus, Sha, UserRef,
};

/// Bot handle used across tests.
pub const TEST_BOT: &str = "workflow-robocat";

/// A SHA built from a repeated byte, e.g. `sha(0xaa)` = `"aaaa…"`.
pub fn sha(byte: u8) -> Sha {
    Sha::parse(format!("{byte:02x}").repeat(20)).unwrap()
}

/// A baseline open squash MR: well-formed title, one matching commit,
/// mergeable, no pipeline.
pub fn mr_snapshot(id: u64) -> MrSnapshot {
    let head = sha(0x11);
    MrSnapshot {
        id: MrId(id),
        title: "PROJ-1: fix crash".into(),
        description: "Details.".into(),
        web_url: format!("https://git.example.com/dev/vms/-/merge_requests/{id}"),
        author: UserRef {
            username: "alice".into(),
            name: "Alice".into(),
        },
        source_branch: "fix-crash".into(),
        target_branch: "master".into(),
        target_head: Some(sha(0x22)),
        head_sha: head.clone(),
        squash: true,
        draft: false,
        merged: false,
        merged_commit_sha: None,
        mergeability: Mergeability::Mergeable,
        approved_by: BTreeSet::new(),
        assignees: BTreeSet::new(),
        pipeline: None,
        commits: vec![Commit {
            sha: head,
            message: "PROJ-1: fix crash\n\nDetails.".into(),
            parent_shas: vec![sha(0x22)],
        }],
        changes: Vec::new(),
        has_follow_up_award: false,
    }
}

/// A successful pipeline aligned with the MR head.
pub fn green_pipeline(mr: &MrSnapshot) -> PipelineState {
    PipelineState {
        id: PipelineId(100),
        status: PipelineStatus::Success,
        sha: mr.head_sha.clone(),
        jobs: Vec::new(),
    }
}

/// An `In Review` issue with one mapped fix version.
pub fn issue_snapshot(key: &str) -> IssueSnapshot {
    IssueSnapshot {
        key: IssueKey::parse(key).unwrap(),
        summary: "Crash on start".into(),
        status: IssueStatus::InReview,
        fix_versions: vec![crate::types::FixVersion {
            name: "5.0".into(),
            branch: Some("master".into()),
        }],
        assignee: Some("alice".into()),
    }
}

/// A cycle state around the snapshot with everything else empty.
pub fn cycle_state(mr: MrSnapshot) -> CycleState {
    CycleState {
        mr,
        issues: BTreeMap::new(),
        missing_issues: BTreeSet::new(),
        unsupported_issues: BTreeSet::new(),
        ledger: DiscussionLedger::default(),
        notes: Vec::new(),
        issue_comments: BTreeMap::new(),
        compliance: ComplianceReport::default(),
        submodules: Vec::new(),
        follow_up_mode: FollowUpMode::Normal,
        autorun_stage: None,
    }
}

/// A bot-owned discussion carrying a fingerprint marker.
pub fn owned_discussion(id: &str, fingerprint: &Fingerprint, resolved: bool) -> Discussion {
    Discussion {
        id: DiscussionId::new(id),
        author: TEST_BOT.into(),
        body: format!("<!-- robocat:fingerprint:{fingerprint} -->\nsomething"),
        resolved,
    }
}

/// A minimal valid configuration for engine tests.
pub fn test_config() -> Config {
    Config {
        bot: BotConfig {
            handle: TEST_BOT.into(),
            escalation_mention: Some("@infra-team".into()),
        },
        jira: JiraConfig {
            url: "https://jira.example.com".into(),
            login: "robocat".into(),
            password_file: "/dev/null".into(),
            timeout: 10,
            retries: 3,
            project_keys: vec!["PROJ".into(), "VMS".into()],
        },
        forge: ForgeConfig {
            url: "https://git.example.com".into(),
            project: "dev/vms".into(),
            token_file: "/dev/null".into(),
            timeout: 10,
        },
        repo: RepoConfig {
            path: "/tmp/robocat-test-repo".into(),
            url: "git@git.example.com:dev/vms.git".into(),
            need_code_owner_approval: false,
        },
        pipeline: PipelineConfig::default(),
        job_status_check_rule: BTreeMap::new(),
        nx_submodule_check_rule: NxSubmoduleCheckConfig::default(),
        engine: EngineConfig::default(),
        ingress: IngressConfig {
            listen_addr: "127.0.0.1:0".into(),
            secret_file: "/dev/null".into(),
        },
    }
}

// ─── In-memory forge ───

/// Everything the fake forge tracks for one MR.
#[derive(Debug, Clone, Default)]
pub struct MrRecord {
    pub title: String,
    pub description: String,
    pub web_url: String,
    pub author: UserRef,
    pub source_branch: String,
    pub target_branch: String,
    pub head_sha: Option<Sha>,
    pub squash: bool,
    pub draft: bool,
    pub merged: bool,
    pub merged_commit_sha: Option<Sha>,
    /// Wire-level fields a merge response carries; with the "merge commit"
    /// method plus squash, both are populated.
    pub squash_commit_sha: Option<Sha>,
    pub merge_commit_sha: Option<Sha>,
    pub mergeability: Mergeability,
    pub assignees: BTreeSet<String>,
    pub approvals: BTreeSet<String>,
    pub pipeline: Option<PipelineState>,
    pub commits: Vec<Commit>,
    pub changes: Vec<crate::types::FileChange>,
    pub notes: Vec<Note>,
    pub discussions: Vec<Discussion>,
    pub has_follow_up_award: bool,
    pub played_jobs: Vec<String>,
}

impl Default for UserRef {
    fn default() -> Self {
        UserRef {
            username: String::new(),
            name: String::new(),
        }
    }
}

impl Default for Mergeability {
    fn default() -> Self {
        Mergeability::Unknown
    }
}

#[derive(Debug, Default)]
struct ForgeState {
    mrs: BTreeMap<MrId, MrRecord>,
    branches: HashMap<String, Sha>,
    created_mrs: Vec<(MrId, NewMr)>,
    next_mr_id: u64,
    next_note_id: u64,
    next_discussion_id: u64,
}

/// In-memory [`ForgeApi`] implementation.
#[derive(Debug, Clone, Default)]
pub struct InMemoryForge {
    state: Arc<Mutex<ForgeState>>,
}

impl InMemoryForge {
    pub fn new() -> Self {
        let forge = InMemoryForge::default();
        forge.with(|s| s.next_mr_id = 1000);
        forge
    }

    fn with<R>(&self, f: impl FnOnce(&mut ForgeState) -> R) -> R {
        let mut state = self.state.lock().expect("forge lock");
        f(&mut state)
    }

    /// Seeds an MR from a snapshot.
    pub fn add_mr(&self, snapshot: &MrSnapshot) {
        let record = MrRecord {
            title: snapshot.title.clone(),
            description: snapshot.description.clone(),
            web_url: snapshot.web_url.clone(),
            author: snapshot.author.clone(),
            source_branch: snapshot.source_branch.clone(),
            target_branch: snapshot.target_branch.clone(),
            head_sha: Some(snapshot.head_sha.clone()),
            squash: snapshot.squash,
            draft: snapshot.draft,
            merged: snapshot.merged,
            merged_commit_sha: snapshot.merged_commit_sha.clone(),
            mergeability: snapshot.mergeability,
            assignees: snapshot.assignees.clone(),
            approvals: snapshot.approved_by.clone(),
            pipeline: snapshot.pipeline.clone(),
            commits: snapshot.commits.clone(),
            changes: snapshot.changes.clone(),
            has_follow_up_award: snapshot.has_follow_up_award,
            ..MrRecord::default()
        };
        self.with(|s| {
            if let Some(head) = &record.head_sha {
                s.branches
                    .entry(record.source_branch.clone())
                    .or_insert_with(|| head.clone());
            }
            s.branches
                .entry(record.target_branch.clone())
                .or_insert_with(|| sha(0x22));
            s.mrs.insert(snapshot.id, record);
        });
    }

    pub fn set_branch(&self, branch: &str, head: Sha) {
        self.with(|s| {
            s.branches.insert(branch.to_string(), head);
        });
    }

    /// Seeds the wire-level merge-response SHAs for an MR, as a forge using
    /// the "merge commit" method would report them.
    pub fn set_merge_shas(&self, mr: MrId, squash: Option<Sha>, merge: Option<Sha>) {
        self.with(|s| {
            let record = s.mrs.get_mut(&mr).expect("MR seeded");
            record.squash_commit_sha = squash;
            record.merge_commit_sha = merge;
        });
    }

    pub fn record(&self, mr: MrId) -> MrRecord {
        self.with(|s| s.mrs.get(&mr).cloned().expect("MR seeded"))
    }

    pub fn created_mrs(&self) -> Vec<(MrId, NewMr)> {
        self.with(|s| s.created_mrs.clone())
    }

    fn mr_mut<R>(
        state: &mut ForgeState,
        mr: MrId,
        f: impl FnOnce(&mut MrRecord, &mut u64, &mut u64) -> R,
    ) -> Result<R, ApiError> {
        // Split borrows: counters live outside the map entry.
        let mut note_id = state.next_note_id;
        let mut discussion_id = state.next_discussion_id;
        let record = state
            .mrs
            .get_mut(&mr)
            .ok_or_else(|| ApiError::from_status(404, "no such MR"))?;
        let result = f(record, &mut note_id, &mut discussion_id);
        state.next_note_id = note_id;
        state.next_discussion_id = discussion_id;
        Ok(result)
    }
}

impl ForgeApi for InMemoryForge {
    async fn get_mr(&self, mr: MrId) -> Result<MrAttributes, ApiError> {
        self.with(|s| {
            let record = s
                .mrs
                .get(&mr)
                .ok_or_else(|| ApiError::from_status(404, "no such MR"))?;
            Ok(MrAttributes {
                id: mr,
                title: record.title.clone(),
                description: record.description.clone(),
                web_url: record.web_url.clone(),
                author: record.author.clone(),
                source_branch: record.source_branch.clone(),
                target_branch: record.target_branch.clone(),
                head_sha: record
                    .head_sha
                    .clone()
                    .ok_or_else(|| ApiError::permanent("record has no head"))?,
                squash: record.squash,
                draft: record.draft,
                merged: record.merged,
                mergeability: record.mergeability,
                assignees: record.assignees.clone(),
                merged_commit_sha: record.merged_commit_sha.clone(),
                has_follow_up_award: record.has_follow_up_award,
            })
        })
    }

    async fn list_open_mrs(&self) -> Result<Vec<MrId>, ApiError> {
        Ok(self.with(|s| {
            s.mrs
                .iter()
                .filter(|(_, r)| !r.merged)
                .map(|(id, _)| *id)
                .collect()
        }))
    }

    async fn list_commits(&self, mr: MrId) -> Result<Vec<Commit>, ApiError> {
        self.with(|s| {
            s.mrs
                .get(&mr)
                .map(|r| r.commits.clone())
                .ok_or_else(|| ApiError::from_status(404, "no such MR"))
        })
    }

    async fn list_changes(&self, mr: MrId) -> Result<Vec<crate::types::FileChange>, ApiError> {
        self.with(|s| {
            s.mrs
                .get(&mr)
                .map(|r| r.changes.clone())
                .ok_or_else(|| ApiError::from_status(404, "no such MR"))
        })
    }

    async fn list_notes(&self, mr: MrId) -> Result<Vec<Note>, ApiError> {
        self.with(|s| {
            s.mrs
                .get(&mr)
                .map(|r| r.notes.clone())
                .ok_or_else(|| ApiError::from_status(404, "no such MR"))
        })
    }

    async fn post_note(&self, mr: MrId, body: &str) -> Result<NoteId, ApiError> {
        self.with(|s| {
            InMemoryForge::mr_mut(s, mr, |record, note_id, _| {
                *note_id += 1;
                let id = NoteId(*note_id);
                record.notes.push(Note {
                    id,
                    author: TEST_BOT.into(),
                    body: body.to_string(),
                    created_at: Utc::now(),
                });
                id
            })
        })
    }

    async fn list_discussions(&self, mr: MrId) -> Result<Vec<Discussion>, ApiError> {
        self.with(|s| {
            s.mrs
                .get(&mr)
                .map(|r| r.discussions.clone())
                .ok_or_else(|| ApiError::from_status(404, "no such MR"))
        })
    }

    async fn create_discussion(&self, mr: MrId, body: &str) -> Result<DiscussionId, ApiError> {
        self.with(|s| {
            InMemoryForge::mr_mut(s, mr, |record, _, discussion_id| {
                *discussion_id += 1;
                let id = DiscussionId::new(format!("d{discussion_id}"));
                record.discussions.push(Discussion {
                    id: id.clone(),
                    author: TEST_BOT.into(),
                    body: body.to_string(),
                    resolved: false,
                });
                id
            })
        })
    }

    async fn resolve_discussion(
        &self,
        mr: MrId,
        discussion: &DiscussionId,
    ) -> Result<(), ApiError> {
        self.with(|s| {
            InMemoryForge::mr_mut(s, mr, |record, _, _| {
                for d in &mut record.discussions {
                    if &d.id == discussion {
                        d.resolved = true;
                    }
                }
            })
        })
    }

    async fn list_approvals(&self, mr: MrId) -> Result<BTreeSet<String>, ApiError> {
        self.with(|s| {
            s.mrs
                .get(&mr)
                .map(|r| r.approvals.clone())
                .ok_or_else(|| ApiError::from_status(404, "no such MR"))
        })
    }

    async fn add_assignee(&self, mr: MrId, username: &str) -> Result<(), ApiError> {
        self.with(|s| {
            InMemoryForge::mr_mut(s, mr, |record, _, _| {
                record.assignees.insert(username.to_string());
            })
        })
    }

    async fn get_pipeline(&self, mr: MrId) -> Result<Option<PipelineState>, ApiError> {
        self.with(|s| {
            s.mrs
                .get(&mr)
                .map(|r| r.pipeline.clone())
                .ok_or_else(|| ApiError::from_status(404, "no such MR"))
        })
    }

    async fn play_jobs(&self, mr: MrId, job_names: &[String]) -> Result<(), ApiError> {
        self.with(|s| {
            InMemoryForge::mr_mut(s, mr, |record, _, _| {
                record.played_jobs.extend(job_names.iter().cloned());
                if let Some(pipeline) = &mut record.pipeline {
                    for job in &mut pipeline.jobs {
                        if job_names.contains(&job.name) {
                            job.manual = false;
                        }
                    }
                }
            })
        })
    }

    async fn branch_head(&self, branch: &str) -> Result<Option<Sha>, ApiError> {
        Ok(self.with(|s| s.branches.get(branch).cloned()))
    }

    async fn merge_mr(
        &self,
        mr: MrId,
        _message: &str,
        squash: bool,
    ) -> Result<MergeOutcome, ApiError> {
        self.with(|s| {
            InMemoryForge::mr_mut(s, mr, |record, _, _| {
                if record.mergeability != Mergeability::Mergeable {
                    return MergeOutcome::NotMergeable;
                }
                record.merged = true;
                // Same landed-SHA resolution as the real client: a squash
                // merge hands back the squash commit even when the merge
                // commit also exists.
                let preferred = if squash {
                    record
                        .squash_commit_sha
                        .clone()
                        .or_else(|| record.merge_commit_sha.clone())
                } else {
                    record
                        .merge_commit_sha
                        .clone()
                        .or_else(|| record.squash_commit_sha.clone())
                };
                let merge_sha = preferred
                    .or_else(|| record.merged_commit_sha.clone())
                    .or_else(|| record.head_sha.clone())
                    .unwrap_or_else(|| sha(0xcc));
                record.merged_commit_sha = Some(merge_sha.clone());
                MergeOutcome::Merged { sha: merge_sha }
            })
        })
    }

    async fn create_mr(&self, new_mr: NewMr) -> Result<MrId, ApiError> {
        self.with(|s| {
            s.next_mr_id += 1;
            let id = MrId(s.next_mr_id);
            let record = MrRecord {
                title: new_mr.title.clone(),
                description: new_mr.description.clone(),
                web_url: format!("https://git.example.com/dev/vms/-/merge_requests/{id}"),
                author: UserRef {
                    username: TEST_BOT.into(),
                    name: "Robocat".into(),
                },
                source_branch: new_mr.source_branch.clone(),
                target_branch: new_mr.target_branch.clone(),
                head_sha: s.branches.get(&new_mr.source_branch).cloned(),
                squash: true,
                draft: new_mr.draft,
                mergeability: Mergeability::Unknown,
                assignees: new_mr.assignees.clone(),
                ..MrRecord::default()
            };
            s.mrs.insert(id, record);
            s.created_mrs.push((id, new_mr));
            Ok(id)
        })
    }

    async fn add_follow_up_award(&self, mr: MrId) -> Result<(), ApiError> {
        self.with(|s| {
            InMemoryForge::mr_mut(s, mr, |record, _, _| {
                record.has_follow_up_award = true;
            })
        })
    }
}

// ─── In-memory tracker ───

#[derive(Debug, Default)]
struct TrackerState {
    issues: BTreeMap<IssueKey, IssueSnapshot>,
    comments: BTreeMap<IssueKey, Vec<TrackerComment>>,
    transitions: Vec<(IssueKey, String)>,
}

/// In-memory [`TrackerApi`] implementation.
///
/// `workflow_has_qa` controls whether the workflow offers the
/// `Waiting for QA` transition; when false the executor's `Closed` fallback
/// kicks in.
#[derive(Debug, Clone)]
pub struct InMemoryTracker {
    state: Arc<Mutex<TrackerState>>,
    pub workflow_has_qa: bool,
}

impl Default for InMemoryTracker {
    fn default() -> Self {
        InMemoryTracker {
            state: Arc::default(),
            workflow_has_qa: true,
        }
    }
}

impl InMemoryTracker {
    pub fn new() -> Self {
        InMemoryTracker::default()
    }

    fn with<R>(&self, f: impl FnOnce(&mut TrackerState) -> R) -> R {
        let mut state = self.state.lock().expect("tracker lock");
        f(&mut state)
    }

    pub fn add_issue(&self, issue: IssueSnapshot) {
        self.with(|s| {
            s.issues.insert(issue.key.clone(), issue);
        });
    }

    pub fn issue(&self, key: &str) -> IssueSnapshot {
        let key = IssueKey::parse(key).unwrap();
        self.with(|s| s.issues.get(&key).cloned().expect("issue seeded"))
    }

    pub fn comments(&self, key: &str) -> Vec<TrackerComment> {
        let key = IssueKey::parse(key).unwrap();
        self.with(|s| s.comments.get(&key).cloned().unwrap_or_default())
    }

    pub fn transitions(&self) -> Vec<(IssueKey, String)> {
        self.with(|s| s.transitions.clone())
    }
}

impl TrackerApi for InMemoryTracker {
    async fn get_issue(&self, key: &IssueKey) -> Result<IssueSnapshot, ApiError> {
        self.with(|s| {
            s.issues
                .get(key)
                .cloned()
                .ok_or_else(|| ApiError::from_status(404, "no such issue"))
        })
    }

    async fn transition_issue(&self, key: &IssueKey, to_status: &str) -> Result<(), ApiError> {
        if to_status == "Waiting for QA" && !self.workflow_has_qa {
            return Err(ApiError::permanent("workflow has no such transition"));
        }
        self.with(|s| {
            let issue = s
                .issues
                .get_mut(key)
                .ok_or_else(|| ApiError::from_status(404, "no such issue"))?;
            issue.status = IssueStatus::from_raw(to_status);
            s.transitions.push((key.clone(), to_status.to_string()));
            Ok(())
        })
    }

    async fn post_comment(&self, key: &IssueKey, body: &str) -> Result<(), ApiError> {
        self.with(|s| {
            if !s.issues.contains_key(key) {
                return Err(ApiError::from_status(404, "no such issue"));
            }
            s.comments.entry(key.clone()).or_default().push(TrackerComment {
                author: TEST_BOT.into(),
                body: body.to_string(),
            });
            Ok(())
        })
    }

    async fn list_comments(&self, key: &IssueKey) -> Result<Vec<TrackerComment>, ApiError> {
        Ok(self.with(|s| s.comments.get(key).cloned().unwrap_or_default()))
    }
}

// ─── Scripted checkers ───

/// Compliance checker returning a fixed violation list.
#[derive(Debug, Clone, Default)]
pub struct ScriptedCompliance {
    pub violations: Arc<Mutex<Vec<Violation>>>,
}

impl ScriptedCompliance {
    pub fn with_violations(violations: Vec<Violation>) -> Self {
        ScriptedCompliance {
            violations: Arc::new(Mutex::new(violations)),
        }
    }
}

impl ComplianceChecker for ScriptedCompliance {
    async fn check_files(
        &self,
        _repo_dir: &Path,
        _files: &[String],
    ) -> Result<Vec<Violation>, CheckerError> {
        Ok(self.violations.lock().expect("violations lock").clone())
    }
}

/// Submodule checker returning scripted verdicts (default: consistent).
#[derive(Debug, Clone, Default)]
pub struct ScriptedSubmodules {
    pub verdicts: Arc<Mutex<HashMap<String, SubmoduleVerdict>>>,
}

impl SubmoduleChecker for ScriptedSubmodules {
    async fn check_submodule(
        &self,
        _repo_dir: &Path,
        submodule_dir: &str,
    ) -> Result<SubmoduleVerdict, CheckerError> {
        Ok(self
            .verdicts
            .lock()
            .expect("verdicts lock")
            .get(submodule_dir)
            .cloned()
            .unwrap_or(SubmoduleVerdict::Consistent))
    }
}
