//! End-to-end engine scenarios against the in-memory forge and tracker.
//!
//! Each test drives full evaluation cycles through `run_cycle` and asserts
//! on the resulting forge/tracker state, covering the seed scenarios
//! (happy-path merge, open-source sign-off, compliance violations,
//! follow-up fan-out, command overrides, fix-version violations) and the
//! engine invariants (at-most-once side effects, convergence, merge
//! safety).

use std::path::Path;
use std::process::Command as SyncCommand;
use std::sync::Arc;

use tempfile::TempDir;

use crate::checkers::Violation;
use crate::config::{ApprovalRule, ApproveRuleset, ApproveRulesetEntry, Config};
use crate::context::Context;
use crate::gitops::GitWorkspace;
use crate::planner::{follow_ups_done_marker, merged_marker, PlanTrigger};
use crate::registry::{run_cycle, CycleOutcome};
use crate::test_utils::{
    green_pipeline, issue_snapshot, mr_snapshot, sha, test_config, InMemoryForge,
    InMemoryTracker, ScriptedCompliance, ScriptedSubmodules, TEST_BOT,
};
use crate::types::{
    FileChange, FixVersion, IssueStatus, MrId, MrSnapshot, PipelineId, PipelineJob,
    PipelineState, PipelineStatus, Sha, FOLLOW_UP_MARKER,
};

type TestContext =
    Context<InMemoryForge, InMemoryTracker, ScriptedCompliance, ScriptedSubmodules>;

struct Harness {
    _temp: TempDir,
    /// Keeps a git fixture's directories alive for git-backed scenarios.
    _fixture: Option<TempDir>,
    ctx: TestContext,
    forge: InMemoryForge,
    tracker: InMemoryTracker,
}

fn ruleset_entry(checker: &str, rules: Vec<(Vec<&str>, Vec<&str>)>) -> ApproveRulesetEntry {
    ApproveRulesetEntry {
        approve_ruleset: ApproveRuleset {
            relevance_checker: checker.into(),
            rules: rules
                .into_iter()
                .map(|(patterns, approvers)| ApprovalRule {
                    patterns: patterns.into_iter().map(String::from).collect(),
                    approvers: approvers.into_iter().map(String::from).collect(),
                })
                .collect(),
        },
    }
}

/// A harness whose git workspace points at an empty directory; fine for
/// scenarios that never touch git.
fn harness(config: Config) -> Harness {
    harness_with(config, ScriptedCompliance::default(), None)
}

/// Builds the harness; when a git fixture is supplied the workspace is a
/// clone of its origin (call `ensure_ready` before running cycles).
fn harness_with(
    config: Config,
    compliance: ScriptedCompliance,
    fixture: Option<GitFixture>,
) -> Harness {
    let temp = TempDir::new().unwrap();
    let forge = InMemoryForge::new();
    let tracker = InMemoryTracker::new();
    let git = match &fixture {
        Some(fixture) => GitWorkspace::new(
            temp.path().join("workspace"),
            fixture.origin.to_str().unwrap().to_string(),
        ),
        None => GitWorkspace::new(temp.path().join("workspace"), "unused".to_string()),
    };
    let ctx = Context::new(
        Arc::new(config),
        forge.clone(),
        tracker.clone(),
        compliance,
        ScriptedSubmodules::default(),
        git,
    );
    Harness {
        _temp: temp,
        _fixture: fixture.map(|f| f.temp),
        ctx,
        forge,
        tracker,
    }
}

// ─── Real-git fixture for scenarios that rebase or cherry-pick ───

fn run_git(dir: &Path, args: &[&str]) -> String {
    let output = SyncCommand::new("git")
        .args(args)
        .current_dir(dir)
        .env("GIT_AUTHOR_NAME", "Test")
        .env("GIT_AUTHOR_EMAIL", "test@test.com")
        .env("GIT_COMMITTER_NAME", "Test")
        .env("GIT_COMMITTER_EMAIL", "test@test.com")
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

fn commit_file(dir: &Path, file: &str, content: &str, message: &str) -> Sha {
    if let Some(parent) = Path::new(file).parent() {
        std::fs::create_dir_all(dir.join(parent)).unwrap();
    }
    std::fs::write(dir.join(file), content).unwrap();
    run_git(dir, &["add", "."]);
    run_git(dir, &["commit", "-m", message]);
    Sha::parse(run_git(dir, &["rev-parse", "HEAD"])).unwrap()
}

struct GitFixture {
    temp: TempDir,
    origin: std::path::PathBuf,
    seed: std::path::PathBuf,
}

fn git_fixture() -> GitFixture {
    let temp = TempDir::new().unwrap();
    let origin = temp.path().join("origin.git");
    let seed = temp.path().join("seed");
    std::fs::create_dir_all(&origin).unwrap();
    run_git(&origin, &["init", "--bare", "--initial-branch=master"]);
    std::fs::create_dir_all(&seed).unwrap();
    run_git(&seed, &["init", "--initial-branch=master"]);
    commit_file(&seed, "README.md", "# Test", "Initial commit");
    run_git(&seed, &["remote", "add", "origin", origin.to_str().unwrap()]);
    run_git(&seed, &["push", "origin", "master"]);
    GitFixture { temp, origin, seed }
}

async fn run_to_completion(harness: &Harness, mr: MrId, trigger: PlanTrigger) {
    let outcome = run_cycle(&harness.ctx, mr, trigger).await;
    assert_eq!(outcome, CycleOutcome::Completed);
}

fn ready_mr(id: u64) -> MrSnapshot {
    let mut mr = mr_snapshot(id);
    mr.title = "PROJ-1: fix X".into();
    mr.description = String::new();
    mr.commits[0].message = "PROJ-1: fix X".into();
    mr.changes = vec![FileChange {
        path: "src/main.cpp".into(),
        diff: "+fixed".into(),
        new_file: false,
        deleted_file: false,
    }];
    mr.pipeline = Some(green_pipeline(&mr));
    mr
}

// ─── S1: happy path, squash ───

#[tokio::test]
async fn s1_happy_path_squash_merges_and_syncs_the_issue() {
    let mut config = test_config();
    config.job_status_check_rule.insert(
        "review".into(),
        ruleset_entry("match_name_pattern", vec![(vec!["src/"], vec!["bob"])]),
    );
    let harness = harness(config);

    let mut mr = ready_mr(1);
    mr.approved_by.insert("bob".into());
    harness.forge.add_mr(&mr);
    harness.tracker.add_issue(issue_snapshot("PROJ-1"));

    run_to_completion(&harness, MrId(1), PlanTrigger::default()).await;

    let record = harness.forge.record(MrId(1));
    assert!(record.merged, "the MR should have merged");
    assert_eq!(
        harness.tracker.issue("PROJ-1").status,
        IssueStatus::WaitingForQa
    );
    let comments = harness.tracker.comments("PROJ-1");
    assert!(
        comments
            .iter()
            .any(|c| c.body.contains(&merged_marker(MrId(1), "master")) && c.body.contains("master")),
        "the issue should carry a merged-into-master comment"
    );
    // Follow-up generation ran and stamped its marker (no branches to fan
    // out to, since the sole fix version maps to master).
    assert!(record
        .notes
        .iter()
        .any(|n| n.body.contains(&follow_ups_done_marker())));
}

#[tokio::test]
async fn s1_convergence_second_cycle_changes_nothing() {
    let mut config = test_config();
    config.job_status_check_rule.insert(
        "review".into(),
        ruleset_entry("match_name_pattern", vec![(vec!["src/"], vec!["bob"])]),
    );
    let harness = harness(config);

    let mut mr = ready_mr(1);
    mr.approved_by.insert("bob".into());
    harness.forge.add_mr(&mr);
    harness.tracker.add_issue(issue_snapshot("PROJ-1"));

    run_to_completion(&harness, MrId(1), PlanTrigger::default()).await;
    let record_after_first = harness.forge.record(MrId(1));
    let comments_after_first = harness.tracker.comments("PROJ-1");
    let transitions_after_first = harness.tracker.transitions();

    run_to_completion(&harness, MrId(1), PlanTrigger::default()).await;
    assert_eq!(
        harness.forge.record(MrId(1)).notes.len(),
        record_after_first.notes.len()
    );
    assert_eq!(
        harness.forge.record(MrId(1)).discussions.len(),
        record_after_first.discussions.len()
    );
    assert_eq!(harness.tracker.comments("PROJ-1"), comments_after_first);
    assert_eq!(harness.tracker.transitions(), transitions_after_first);
}

#[tokio::test]
async fn s1_closed_fallback_when_workflow_lacks_qa_status() {
    let mut config = test_config();
    config.job_status_check_rule.insert(
        "review".into(),
        ruleset_entry("match_name_pattern", vec![(vec!["src/"], vec!["bob"])]),
    );
    let mut harness = harness(config);
    harness.tracker.workflow_has_qa = false;
    // The tracker handle inside the context shares state but not the flag;
    // rebuild the context with the adjusted tracker.
    let config2 = {
        let mut c = test_config();
        c.job_status_check_rule.insert(
            "review".into(),
            ruleset_entry("match_name_pattern", vec![(vec!["src/"], vec!["bob"])]),
        );
        c
    };
    let temp = TempDir::new().unwrap();
    harness.ctx = Context::new(
        Arc::new(config2),
        harness.forge.clone(),
        harness.tracker.clone(),
        ScriptedCompliance::default(),
        ScriptedSubmodules::default(),
        GitWorkspace::new(temp.path().join("ws"), "unused".to_string()),
    );

    let mut mr = ready_mr(1);
    mr.approved_by.insert("bob".into());
    harness.forge.add_mr(&mr);
    harness.tracker.add_issue(issue_snapshot("PROJ-1"));

    run_to_completion(&harness, MrId(1), PlanTrigger::default()).await;
    assert_eq!(harness.tracker.issue("PROJ-1").status, IssueStatus::Closed);
}

// ─── S2: open-source file added, clean ───

fn open_source_config() -> Config {
    let mut config = test_config();
    config.job_status_check_rule.insert(
        "open_source".into(),
        ruleset_entry(
            "is_file_open_sourced",
            vec![
                (
                    vec!["open/client/"],
                    vec!["client_approver_1", "client_approver_2"],
                ),
                (vec!["open/"], vec!["apidoc_approver_1", "apidoc_approver_2"]),
            ],
        ),
    );
    config
}

/// Builds a real-git harness with an MR whose head commit touches the given
/// open-source file.
fn open_source_harness(file: &str, new_file: bool) -> (Harness, MrSnapshot) {
    let fixture = git_fixture();
    run_git(&fixture.seed, &["checkout", "-b", "fix-x"]);
    let head = commit_file(&fixture.seed, file, "int x;", "PROJ-1: fix X");
    run_git(&fixture.seed, &["push", "origin", "fix-x"]);

    let harness = harness_with(open_source_config(), ScriptedCompliance::default(), Some(fixture));

    let mut mr = mr_snapshot(2);
    mr.id = MrId(2);
    mr.title = "PROJ-1: fix X".into();
    mr.description = String::new();
    mr.source_branch = "fix-x".into();
    mr.head_sha = head.clone();
    mr.commits = vec![crate::types::Commit {
        sha: head,
        message: "PROJ-1: fix X".into(),
        parent_shas: vec![],
    }];
    mr.changes = vec![FileChange {
        path: file.into(),
        diff: "+int x;".into(),
        new_file,
        deleted_file: false,
    }];
    mr.pipeline = Some(green_pipeline(&mr));
    (harness, mr)
}

#[tokio::test]
async fn s2_new_open_source_file_requires_sign_off() {
    let (harness, mr) = open_source_harness("open/server/foo.cpp", true);
    harness.ctx.git.ensure_ready().await.unwrap();
    harness.forge.add_mr(&mr);
    harness.tracker.add_issue(issue_snapshot("PROJ-1"));

    run_to_completion(&harness, MrId(2), PlanTrigger::default()).await;

    let record = harness.forge.record(MrId(2));
    assert!(!record.merged, "merge must wait for the sign-off discussion");
    let open_source_discussions: Vec<_> = record
        .discussions
        .iter()
        .filter(|d| d.body.contains("open-source-compliance"))
        .collect();
    assert_eq!(open_source_discussions.len(), 1);
    let body = &open_source_discussions[0].body;
    assert!(body.contains("@apidoc_approver_1"));
    assert!(body.contains("@apidoc_approver_2"));
}

#[tokio::test]
async fn s2_sign_off_discussion_is_created_at_most_once() {
    let (harness, mr) = open_source_harness("open/server/foo.cpp", true);
    harness.ctx.git.ensure_ready().await.unwrap();
    harness.forge.add_mr(&mr);
    harness.tracker.add_issue(issue_snapshot("PROJ-1"));

    run_to_completion(&harness, MrId(2), PlanTrigger::default()).await;
    run_to_completion(&harness, MrId(2), PlanTrigger::default()).await;

    let record = harness.forge.record(MrId(2));
    let open_source_discussions = record
        .discussions
        .iter()
        .filter(|d| d.body.contains("open-source-compliance"))
        .count();
    assert_eq!(open_source_discussions, 1);
}

// ─── S3: compliance violation ───

#[tokio::test]
async fn s3_violation_blocks_and_assigns_the_keepers() {
    let (mut harness, mr) = open_source_harness("open/client/bar.h", false);
    harness.ctx.git.ensure_ready().await.unwrap();
    harness.ctx.compliance = ScriptedCompliance::with_violations(vec![Violation {
        file: "open/client/bar.h".into(),
        line: Some(7),
        rule_id: "forbidden-term".into(),
        message: "the term is not allowed in open-source code".into(),
    }]);
    harness.forge.add_mr(&mr);
    harness.tracker.add_issue(issue_snapshot("PROJ-1"));

    run_to_completion(&harness, MrId(2), PlanTrigger::default()).await;

    let record = harness.forge.record(MrId(2));
    assert!(!record.merged, "a compliance violation must block the merge");
    assert!(record
        .discussions
        .iter()
        .any(|d| d.body.contains("open/client/bar.h:7")));
    assert!(record.assignees.contains("client_approver_1"));
    assert!(record.assignees.contains("client_approver_2"));
    assert!(!record.assignees.contains("apidoc_approver_1"));
}

// ─── S4: follow-ups ───

#[tokio::test]
async fn s4_merged_mr_fans_out_to_fix_version_branches() {
    let fixture = git_fixture();
    // Release branches fork before the fix lands on master.
    run_git(&fixture.seed, &["branch", "vms_5.0"]);
    run_git(&fixture.seed, &["branch", "vms_5.1"]);
    run_git(&fixture.seed, &["push", "origin", "vms_5.0", "vms_5.1"]);
    let merged_sha = commit_file(&fixture.seed, "fix.cpp", "fixed", "PROJ-1: fix X");
    run_git(&fixture.seed, &["push", "origin", "master"]);

    let harness = harness_with(test_config(), ScriptedCompliance::default(), Some(fixture));
    harness.ctx.git.ensure_ready().await.unwrap();

    let mut mr = mr_snapshot(4);
    mr.id = MrId(4);
    mr.title = "PROJ-1: fix X".into();
    mr.source_branch = "fix-x".into();
    mr.merged = true;
    mr.merged_commit_sha = Some(merged_sha.clone());
    harness.forge.add_mr(&mr);

    let mut issue = issue_snapshot("PROJ-1");
    issue.fix_versions = vec![
        FixVersion {
            name: "v5.0".into(),
            branch: Some("vms_5.0".into()),
        },
        FixVersion {
            name: "v5.1".into(),
            branch: Some("vms_5.1".into()),
        },
    ];
    harness.tracker.add_issue(issue);

    run_to_completion(&harness, MrId(4), PlanTrigger::default()).await;

    let created = harness.forge.created_mrs();
    assert_eq!(created.len(), 2, "one follow-up per fix-version branch");
    let mut targets: Vec<_> = created
        .iter()
        .map(|(_, new_mr)| new_mr.target_branch.clone())
        .collect();
    targets.sort();
    assert_eq!(targets, ["vms_5.0", "vms_5.1"]);

    for (id, new_mr) in &created {
        assert!(new_mr.source_branch.starts_with("fix-x-followup-"));
        assert!(new_mr.assignees.contains(TEST_BOT));
        assert!(new_mr.assignees.contains("alice"));
        assert!(
            new_mr
                .description
                .contains(&format!("{FOLLOW_UP_MARKER}{merged_sha})")),
            "the description must carry the cherry-pick provenance marker"
        );
        // Provenance: the created MR is classified as a follow-up.
        let record = harness.forge.record(*id);
        assert!(record.has_follow_up_award);
        assert!(record.description.contains(FOLLOW_UP_MARKER));
    }

    // The tracker learns which branches got follow-ups.
    let comments = harness.tracker.comments("PROJ-1");
    assert!(comments
        .iter()
        .any(|c| c.body.contains("vms_5.0") && c.body.contains("vms_5.1")));
}

#[tokio::test]
async fn s4_follow_ups_are_not_regenerated_on_redelivery() {
    let fixture = git_fixture();
    run_git(&fixture.seed, &["branch", "vms_5.0"]);
    run_git(&fixture.seed, &["push", "origin", "vms_5.0"]);
    let merged_sha = commit_file(&fixture.seed, "fix.cpp", "fixed", "PROJ-1: fix X");
    run_git(&fixture.seed, &["push", "origin", "master"]);

    let harness = harness_with(test_config(), ScriptedCompliance::default(), Some(fixture));
    harness.ctx.git.ensure_ready().await.unwrap();

    let mut mr = mr_snapshot(4);
    mr.id = MrId(4);
    mr.source_branch = "fix-x".into();
    mr.merged = true;
    mr.merged_commit_sha = Some(merged_sha);
    harness.forge.add_mr(&mr);

    let mut issue = issue_snapshot("PROJ-1");
    issue.fix_versions = vec![FixVersion {
        name: "v5.0".into(),
        branch: Some("vms_5.0".into()),
    }];
    harness.tracker.add_issue(issue);

    run_to_completion(&harness, MrId(4), PlanTrigger::default()).await;
    run_to_completion(&harness, MrId(4), PlanTrigger::default()).await;

    assert_eq!(harness.forge.created_mrs().len(), 1);
}

#[tokio::test]
async fn s4_in_cycle_squash_merge_picks_the_squash_commit_not_the_merge_commit() {
    let fixture = git_fixture();
    // The release branch forks before the fix lands.
    run_git(&fixture.seed, &["branch", "vms_5.0"]);
    run_git(&fixture.seed, &["push", "origin", "vms_5.0"]);

    // The MR's source branch.
    run_git(&fixture.seed, &["checkout", "-b", "fix-x"]);
    let head = commit_file(&fixture.seed, "fix.cpp", "fixed", "PROJ-1: fix X");
    run_git(&fixture.seed, &["push", "origin", "fix-x"]);

    // What the forge's "merge commit" method leaves behind for a squash
    // merge: a single-parent squash commit on master plus a two-parent merge
    // commit on top of it. Only the former can be cherry-picked.
    run_git(&fixture.seed, &["checkout", "master"]);
    let squash_sha = commit_file(&fixture.seed, "fix.cpp", "fixed", "PROJ-1: fix X");
    run_git(
        &fixture.seed,
        &["merge", "--no-ff", "-m", "Merge branch 'fix-x'", "fix-x"],
    );
    let merge_sha = Sha::parse(run_git(&fixture.seed, &["rev-parse", "HEAD"])).unwrap();
    run_git(&fixture.seed, &["push", "origin", "master"]);

    let harness = harness_with(test_config(), ScriptedCompliance::default(), Some(fixture));
    harness.ctx.git.ensure_ready().await.unwrap();

    let mut mr = ready_mr(12);
    mr.id = MrId(12);
    mr.source_branch = "fix-x".into();
    mr.head_sha = head.clone();
    mr.commits[0].sha = head;
    mr.pipeline = Some(green_pipeline(&mr));
    harness.forge.add_mr(&mr);
    harness
        .forge
        .set_merge_shas(MrId(12), Some(squash_sha.clone()), Some(merge_sha.clone()));

    let mut issue = issue_snapshot("PROJ-1");
    issue.fix_versions = vec![FixVersion {
        name: "v5.0".into(),
        branch: Some("vms_5.0".into()),
    }];
    harness.tracker.add_issue(issue);

    run_to_completion(&harness, MrId(12), PlanTrigger::default()).await;

    assert!(harness.forge.record(MrId(12)).merged);
    let created = harness.forge.created_mrs();
    assert_eq!(created.len(), 1);
    let (id, new_mr) = &created[0];
    assert_eq!(new_mr.target_branch, "vms_5.0");
    assert!(
        new_mr
            .description
            .contains(&format!("{FOLLOW_UP_MARKER}{squash_sha})")),
        "the follow-up must pick the squash commit"
    );
    assert!(
        !new_mr.description.contains(merge_sha.as_str()),
        "the two-parent merge commit must not be picked"
    );
    // A clean pick: no conflict note on the follow-up MR.
    assert!(harness.forge.record(*id).notes.is_empty());
}

// ─── S5: command override ───

#[tokio::test]
async fn s5_run_pipeline_command_rebases_and_triggers_despite_draft() {
    let fixture = git_fixture();
    run_git(&fixture.seed, &["checkout", "-b", "fix-x"]);
    let head = commit_file(&fixture.seed, "fix.cpp", "wip", "PROJ-1: fix X");
    run_git(&fixture.seed, &["push", "origin", "fix-x"]);

    let harness = harness_with(test_config(), ScriptedCompliance::default(), Some(fixture));
    harness.ctx.git.ensure_ready().await.unwrap();

    let mut mr = mr_snapshot(5);
    mr.id = MrId(5);
    mr.source_branch = "fix-x".into();
    mr.draft = true;
    mr.head_sha = head.clone();
    mr.commits[0].sha = head.clone();
    mr.pipeline = Some(PipelineState {
        id: PipelineId(200),
        status: PipelineStatus::ManualPending,
        sha: head,
        jobs: vec![
            PipelineJob {
                name: "build".into(),
                stage: "build".into(),
                manual: true,
            },
            PipelineJob {
                name: "deploy:no-bot-start".into(),
                stage: "deploy".into(),
                manual: true,
            },
        ],
    });
    harness.forge.add_mr(&mr);
    harness.tracker.add_issue(issue_snapshot("PROJ-1"));

    let trigger = PlanTrigger {
        forced_pipeline: true,
        ..Default::default()
    };
    run_to_completion(&harness, MrId(5), trigger).await;

    let record = harness.forge.record(MrId(5));
    assert_eq!(record.played_jobs, ["build"]);
    assert!(!record.merged, "a draft MR never merges");
}

// ─── S6: fixVersion violation ───

#[tokio::test]
async fn s6_empty_fix_versions_block_the_merge() {
    let harness = harness(test_config());

    let mut mr = ready_mr(6);
    mr.id = MrId(6);
    mr.title = "PROJ-2: fix Y".into();
    mr.commits[0].message = "PROJ-2: fix Y".into();
    harness.forge.add_mr(&mr);

    let mut issue = issue_snapshot("PROJ-2");
    issue.fix_versions.clear();
    harness.tracker.add_issue(issue);

    run_to_completion(&harness, MrId(6), PlanTrigger::default()).await;

    let record = harness.forge.record(MrId(6));
    assert!(!record.merged, "merge must be refused on a block finding");
    assert!(
        record
            .discussions
            .iter()
            .any(|d| d.body.contains("fixVersions") && d.body.contains("PROJ-2")),
        "the user must see a comment naming the missing field"
    );
}

#[tokio::test]
async fn s6_block_discussion_is_not_duplicated_on_redelivery() {
    let harness = harness(test_config());

    let mut mr = ready_mr(6);
    mr.id = MrId(6);
    mr.title = "PROJ-2: fix Y".into();
    mr.commits[0].message = "PROJ-2: fix Y".into();
    harness.forge.add_mr(&mr);

    let mut issue = issue_snapshot("PROJ-2");
    issue.fix_versions.clear();
    harness.tracker.add_issue(issue);

    run_to_completion(&harness, MrId(6), PlanTrigger::default()).await;
    run_to_completion(&harness, MrId(6), PlanTrigger::default()).await;

    let record = harness.forge.record(MrId(6));
    let fix_version_discussions = record
        .discussions
        .iter()
        .filter(|d| d.body.contains("fixVersions"))
        .count();
    assert_eq!(fix_version_discussions, 1);
}

// ─── Boundary behaviors ───

#[tokio::test]
async fn unsupported_project_only_blocks() {
    let harness = harness(test_config());

    let mut mr = ready_mr(7);
    mr.id = MrId(7);
    mr.title = "OTHER-5: fix Z".into();
    mr.commits[0].message = "OTHER-5: fix Z".into();
    harness.forge.add_mr(&mr);

    run_to_completion(&harness, MrId(7), PlanTrigger::default()).await;

    let record = harness.forge.record(MrId(7));
    assert!(!record.merged);
    assert!(record
        .discussions
        .iter()
        .any(|d| d.body.contains("supported")));
}

#[tokio::test]
async fn mixed_supported_and_unsupported_references_merge_fine() {
    let harness = harness(test_config());

    let mut mr = ready_mr(8);
    mr.id = MrId(8);
    mr.title = "PROJ-1, OTHER-5: fix both".into();
    mr.commits[0].message = "PROJ-1, OTHER-5: fix both".into();
    harness.forge.add_mr(&mr);
    harness.tracker.add_issue(issue_snapshot("PROJ-1"));

    run_to_completion(&harness, MrId(8), PlanTrigger::default()).await;
    assert!(harness.forge.record(MrId(8)).merged);
}

#[tokio::test]
async fn vanished_mr_completes_without_side_effects() {
    let harness = harness(test_config());
    run_to_completion(&harness, MrId(99), PlanTrigger::default()).await;
    assert!(harness.forge.created_mrs().is_empty());
}

#[tokio::test]
async fn merge_safety_holds_for_any_blocking_finding() {
    // A green, approved, mergeable MR with a failing pipeline must not merge.
    let harness = harness(test_config());
    let mut mr = ready_mr(9);
    mr.id = MrId(9);
    let mut pipeline = green_pipeline(&mr);
    pipeline.status = PipelineStatus::Failed;
    mr.pipeline = Some(pipeline);
    harness.forge.add_mr(&mr);
    harness.tracker.add_issue(issue_snapshot("PROJ-1"));

    run_to_completion(&harness, MrId(9), PlanTrigger::default()).await;
    assert!(!harness.forge.record(MrId(9)).merged);
}

// ─── Registry dispatch ───

#[tokio::test(flavor = "multi_thread")]
async fn registry_processes_dispatched_events() {
    use crate::ingress::{EventIntake, EventPayload, IncomingEvent};
    use crate::registry::ActorRegistry;
    use tokio_util::sync::CancellationToken;

    let harness = harness(test_config());
    let mut mr = ready_mr(6);
    mr.id = MrId(6);
    mr.title = "PROJ-2: fix Y".into();
    mr.commits[0].message = "PROJ-2: fix Y".into();
    harness.forge.add_mr(&mr);
    let mut issue = issue_snapshot("PROJ-2");
    issue.fix_versions.clear();
    harness.tracker.add_issue(issue);

    // The registry needs its own context instance (contexts are not `Clone`
    // because of the git lock); it shares the same fakes.
    let temp = TempDir::new().unwrap();
    let ctx = Context::new(
        Arc::clone(&harness.ctx.config),
        harness.forge.clone(),
        harness.tracker.clone(),
        ScriptedCompliance::default(),
        ScriptedSubmodules::default(),
        GitWorkspace::new(temp.path().join("ws"), "unused".to_string()),
    );
    let shutdown = CancellationToken::new();
    let registry = ActorRegistry::new(Arc::new(ctx), shutdown.clone());
    let intake = EventIntake::new(TEST_BOT, std::time::Duration::from_secs(30));

    // The same delivery twice: dedupe drops the second.
    for _ in 0..2 {
        if let Some(event) = intake.accept(IncomingEvent {
            mr_id: MrId(6),
            payload: EventPayload::MrUpdated,
        }) {
            registry.dispatch(event).await;
        }
    }

    // Wait for the actor to process.
    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(10);
    loop {
        let discussions = harness.forge.record(MrId(6)).discussions.len();
        if discussions > 0 {
            break;
        }
        assert!(
            std::time::Instant::now() < deadline,
            "actor never processed the event"
        );
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }

    assert_eq!(registry.actor_count(), 1);
    let record = harness.forge.record(MrId(6));
    let fix_version_discussions = record
        .discussions
        .iter()
        .filter(|d| d.body.contains("fixVersions"))
        .count();
    assert_eq!(fix_version_discussions, 1);
    shutdown.cancel();
}

// ─── Issue comment bookkeeping ───

#[tokio::test]
async fn in_progress_issue_gets_an_informational_mr_note() {
    let harness = harness(test_config());

    let mut mr = ready_mr(10);
    mr.id = MrId(10);
    mr.merged = true;
    mr.merged_commit_sha = Some(sha(0xcc));
    harness.forge.add_mr(&mr);

    let mut issue = issue_snapshot("PROJ-1");
    issue.status = IssueStatus::InProgress;
    harness.tracker.add_issue(issue);

    run_to_completion(&harness, MrId(10), PlanTrigger::default()).await;

    assert_eq!(harness.tracker.transitions(), vec![]);
    let record = harness.forge.record(MrId(10));
    assert!(record
        .notes
        .iter()
        .any(|n| n.body.contains("In Progress") || n.body.contains("PROJ-1")));
}

#[tokio::test]
async fn suspicious_issue_status_warns_on_the_issue() {
    let harness = harness(test_config());

    let mut mr = ready_mr(11);
    mr.id = MrId(11);
    mr.merged = true;
    mr.merged_commit_sha = Some(sha(0xcc));
    harness.forge.add_mr(&mr);

    let mut issue = issue_snapshot("PROJ-1");
    issue.status = IssueStatus::Other("Blocked".into());
    harness.tracker.add_issue(issue);

    run_to_completion(&harness, MrId(11), PlanTrigger::default()).await;

    assert_eq!(harness.tracker.transitions(), vec![]);
    let comments = harness.tracker.comments("PROJ-1");
    assert!(comments.iter().any(|c| c.body.contains("Blocked")));
}
