mod util;

use std::fs;

use chrono::Local;

use github_autosave::autosave::{AutosaveOptions, CycleOutcome};
use github_autosave::context::Context;
use github_autosave::projects::{list_projects, process_project, run_batch, ProjectOutcome};

use util::git_repo::{ref_target, seed_bare, GitRepo};
use util::hosting::FakeHosting;
use util::{test_config, test_settings};

#[test]
fn plain_directory_without_remote_is_published() {
    let tmp = tempfile::tempdir().unwrap();
    let projects = tmp.path().join("projects");
    let hosting = FakeHosting::new(&tmp.path().join("hosted"));
    let dir = projects.join("fresh");
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("main.py"), "print('hi')\n").unwrap();

    let config = test_config(&projects);
    let mut ctx = Context::new(&config, &hosting, None);
    ctx.git = test_settings();

    let outcome = process_project(&dir, &ctx, &AutosaveOptions::new(Local::now(), false)).unwrap();

    assert_eq!(outcome, ProjectOutcome::Published(hosting.url_for("fresh")));
    let local = GitRepo::open(&dir);
    assert_eq!(ref_target(&hosting.repo_path("fresh"), "main"), Some(local.head_oid()));
}

#[test]
fn plain_directory_with_remote_is_reconciled_and_autosaved() {
    let tmp = tempfile::tempdir().unwrap();
    let projects = tmp.path().join("projects");
    let hosting = FakeHosting::new(&tmp.path().join("hosted"));
    hosting.add_repo("site");
    seed_bare(&hosting.repo_path("site"), &[("index.html", "<p>remote</p>\n")]);

    let dir = projects.join("site");
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("draft.md"), "local draft\n").unwrap();

    let config = test_config(&projects);
    let mut ctx = Context::new(&config, &hosting, None);
    ctx.git = test_settings();

    let outcome = process_project(&dir, &ctx, &AutosaveOptions::new(Local::now(), true)).unwrap();

    match outcome {
        ProjectOutcome::Autosave(CycleOutcome::Saved { committed, .. }) => assert!(committed),
        other => panic!("expected an autosave, got {other:?}"),
    }
    let local = GitRepo::open(&dir);
    assert_eq!(local.current_branch(), "main");
    assert_eq!(local.read_file("draft.md"), "local draft\n");
    assert_eq!(local.read_file("index.html"), "<p>remote</p>\n");
}

#[test]
fn linked_repository_with_bypass_is_autosaved() {
    let tmp = tempfile::tempdir().unwrap();
    let projects = tmp.path().join("projects");
    let hosting = FakeHosting::new(&tmp.path().join("hosted"));
    let url = hosting.add_repo("app");

    let local = GitRepo::init(&projects.join("app"));
    local.write_file("lib.rs", "fn a() {}\n");
    local.commit_all("first");
    local.add_origin(&url);
    local.push("main");
    local.write_file("lib.rs", "fn a() {}\nfn b() {}\n");

    let config = test_config(&projects);
    let mut ctx = Context::new(&config, &hosting, None);
    ctx.git = test_settings();

    let outcome = process_project(&local.dir, &ctx, &AutosaveOptions::new(Local::now(), true)).unwrap();

    let ProjectOutcome::Autosave(CycleOutcome::Saved { branch, committed }) = outcome else {
        panic!("expected an autosave, got {outcome:?}");
    };
    assert!(committed);
    assert!(branch.starts_with("main_"));
    assert!(ref_target(&hosting.repo_path("app"), &branch).is_some());
    assert_eq!(local.read_file("lib.rs"), "fn a() {}\nfn b() {}\n");
}

#[test]
fn batch_keeps_going_after_a_failing_project() {
    let tmp = tempfile::tempdir().unwrap();
    let projects = tmp.path().join("projects");
    let hosting = FakeHosting::new(&tmp.path().join("hosted"));

    // Origin on the hosting service, but fetching from it fails.
    let broken = GitRepo::init(&projects.join("broken"));
    broken.write_file("a.txt", "a\n");
    broken.commit_all("first");
    let broken_url = hosting.url_for("broken");
    fs::create_dir_all(hosting.repo_path("broken")).unwrap();
    broken.add_origin(&broken_url);

    let fresh = projects.join("fresh");
    fs::create_dir_all(&fresh).unwrap();
    fs::write(fresh.join("a.txt"), "a\n").unwrap();

    let config = test_config(&projects);
    let mut ctx = Context::new(&config, &hosting, None);
    ctx.git = test_settings();

    let all = list_projects(&config, &[]).unwrap();
    assert_eq!(all, vec![projects.join("broken"), projects.join("fresh")]);

    let report = run_batch(&all, &ctx, &AutosaveOptions::new(Local::now(), false));

    assert_eq!(report.processed, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.published, 1);
    assert!(ref_target(&hosting.repo_path("fresh"), "main").is_some());
}
