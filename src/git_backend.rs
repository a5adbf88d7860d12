use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use git2::build::{CheckoutBuilder, RepoBuilder};
use git2::{
    BranchType, Cred, DiffFormat, ErrorCode, FetchOptions, IndexAddOption, ObjectType, Oid,
    PushOptions, RemoteCallbacks, Repository, ResetType, Signature, StashFlags, Status,
    StatusOptions,
};
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::retry::RetryPolicy;
use crate::vcs::{BranchInfo, ChangedFile, CommitId, StashId, Vcs};

pub const ORIGIN: &str = "origin";

const DEFAULT_COMMIT_AUTHOR: &str = "github-autosave";
const DEFAULT_COMMIT_EMAIL: &str = "autosave@localhost";

// libgit2 keeps asking while credentials are rejected.
const MAX_CREDENTIAL_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteAuth {
    pub username: String,
    pub token: String,
}

/// Everything a [`GitWorkspace`] needs beyond the repository itself.
#[derive(Debug, Clone, Default)]
pub struct GitSettings {
    pub auth: Option<RemoteAuth>,
    pub retry: RetryPolicy,
    pub commit_author: Option<String>,
    pub commit_email: Option<String>,
}

impl GitSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            auth: Some(RemoteAuth {
                username: config.hosting_username.clone(),
                token: config.hosting_token.clone(),
            }),
            retry: config.retry_policy(),
            commit_author: config.commit_author.clone(),
            commit_email: config.commit_email.clone(),
        }
    }

    /// Explicit settings win, then the repository's git config, then a fixed
    /// fallback identity.
    pub fn signature(&self, repo: &Repository) -> Result<Signature<'static>> {
        if let (Some(name), Some(email)) = (&self.commit_author, &self.commit_email) {
            return Ok(Signature::now(name, email)?);
        }
        match repo.signature() {
            Ok(sig) => Ok(sig.to_owned()),
            Err(_) => Ok(Signature::now(
                self.commit_author.as_deref().unwrap_or(DEFAULT_COMMIT_AUTHOR),
                self.commit_email.as_deref().unwrap_or(DEFAULT_COMMIT_EMAIL),
            )?),
        }
    }
}

/// A working tree backed by libgit2.
pub struct GitWorkspace {
    repo: Repository,
    settings: GitSettings,
}

impl std::fmt::Debug for GitWorkspace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitWorkspace")
            .field("path", &self.repo.workdir())
            .finish()
    }
}

/// Whether `path` itself holds a git repository. Parent directories are not searched.
pub fn is_repository(path: &Path) -> bool {
    Repository::open(path).is_ok()
}

impl GitWorkspace {
    pub fn open(path: &Path, settings: GitSettings) -> Result<Self> {
        let repo = Repository::open(path)?;
        Ok(Self { repo, settings })
    }

    pub fn init(path: &Path, settings: GitSettings) -> Result<Self> {
        let repo = Repository::init(path)?;
        Ok(Self { repo, settings })
    }

    pub fn clone_remote(url: &str, into: &Path, settings: GitSettings) -> Result<Self> {
        let retry = settings.retry;
        let repo = retry.run("clone", || {
            let mut builder = RepoBuilder::new();
            builder.fetch_options(fetch_options(settings.auth.as_ref()));
            Ok(builder.clone(url, into)?)
        })?;
        Ok(Self { repo, settings })
    }

    pub fn repository(&self) -> &Repository {
        &self.repo
    }

    pub fn workdir(&self) -> PathBuf {
        self.repo
            .workdir()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.repo.path().to_path_buf())
    }

    pub fn has_commits(&self) -> bool {
        self.repo.head().ok().and_then(|h| h.target()).is_some()
    }

    /// Stages everything and commits it on the current branch.
    pub fn commit_all(&mut self, message: &str) -> Result<CommitId> {
        self.stage_all()?;
        self.commit(message)
    }

    pub fn origin_url(&self) -> Option<String> {
        self.repo
            .find_remote(ORIGIN)
            .ok()
            .and_then(|r| r.url().map(str::to_string))
    }

    /// Points `origin` at `url`, creating the remote if needed.
    pub fn set_origin(&mut self, url: &str) -> Result<()> {
        match self.repo.find_remote(ORIGIN) {
            Ok(_) => {
                debug!(url, "updating origin url");
                self.repo.remote_set_url(ORIGIN, url)?;
            }
            Err(e) if e.code() == ErrorCode::NotFound => {
                self.repo.remote(ORIGIN, url)?;
            }
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    /// Points `origin` at `url` and forgets the remote-tracking branches of
    /// whatever it pointed at before.
    pub fn relink_origin(&mut self, url: &str) -> Result<()> {
        let previous = self.origin_url();
        self.set_origin(url)?;
        if previous.is_none() || previous.as_deref() == Some(url) {
            return Ok(());
        }

        let prefix = format!("{ORIGIN}/");
        let mut stale = Vec::new();
        for branch in self.repo.branches(Some(BranchType::Remote))? {
            let (branch, _) = branch?;
            if let Some(name) = branch.name()? {
                if name.starts_with(&prefix) {
                    stale.push(name.to_string());
                }
            }
        }
        for name in stale {
            debug!(branch = %name, "dropping stale remote-tracking branch");
            self.repo.find_branch(&name, BranchType::Remote)?.delete()?;
        }
        Ok(())
    }

    pub fn fetch_origin(&self) -> Result<()> {
        let mut remote = self.repo.find_remote(ORIGIN).map_err(|_| Error::NoOrigin)?;
        self.settings.retry.run("fetch", || {
            let mut opts = fetch_options(self.settings.auth.as_ref());
            remote.fetch(&[] as &[&str], Some(&mut opts), None)?;
            Ok(())
        })
    }

    /// All commits reachable from `spec` (a branch name, ref or `HEAD`).
    pub fn commit_set(&self, spec: &str) -> Result<HashSet<Oid>> {
        let start = self.repo.revparse_single(spec)?.peel_to_commit()?.id();
        let mut walk = self.repo.revwalk()?;
        walk.push(start)?;
        let mut set = HashSet::new();
        for oid in walk {
            set.insert(oid?);
        }
        Ok(set)
    }

    fn find_commit(&self, id: &CommitId) -> Result<git2::Commit<'_>> {
        let oid = Oid::from_str(&id.0)?;
        Ok(self.repo.find_commit(oid)?)
    }

    fn stash_index(&mut self, stash: &StashId) -> Result<usize> {
        let wanted = Oid::from_str(&stash.0)?;
        let mut found = None;
        self.repo.stash_foreach(|index, _message, oid| {
            if *oid == wanted {
                found = Some(index);
                false
            } else {
                true
            }
        })?;
        found.ok_or_else(|| {
            git2::Error::from_str(&format!("stash {} no longer exists", stash.0)).into()
        })
    }

    fn status_entries(&self, include_untracked: bool) -> Result<Vec<(PathBuf, Status)>> {
        let mut opts = StatusOptions::new();
        opts.include_untracked(include_untracked)
            .recurse_untracked_dirs(include_untracked)
            .include_ignored(false)
            .include_unmodified(false);
        let statuses = self.repo.statuses(Some(&mut opts))?;
        Ok(statuses
            .iter()
            .filter_map(|entry| entry.path().map(|p| (PathBuf::from(p), entry.status())))
            .collect())
    }
}

fn credentials_callbacks(auth: Option<&RemoteAuth>) -> RemoteCallbacks<'_> {
    let attempts = Cell::new(0u32);
    let mut callbacks = RemoteCallbacks::new();
    callbacks.credentials(move |_url, username_from_url, allowed| {
        attempts.set(attempts.get() + 1);
        if attempts.get() > MAX_CREDENTIAL_ATTEMPTS {
            return Err(git2::Error::from_str("remote rejected the configured credentials"));
        }
        if allowed.is_user_pass_plaintext() {
            if let Some(auth) = auth {
                return Cred::userpass_plaintext(&auth.username, &auth.token);
            }
        }
        if allowed.is_ssh_key() {
            if let Some(user) = username_from_url {
                return Cred::ssh_key_from_agent(user);
            }
        }
        Cred::default()
    });
    callbacks
}

fn fetch_options(auth: Option<&RemoteAuth>) -> FetchOptions<'_> {
    let mut opts = FetchOptions::new();
    opts.remote_callbacks(credentials_callbacks(auth));
    opts
}

fn local_time(time: std::time::SystemTime) -> DateTime<Local> {
    time.into()
}

impl Vcs for GitWorkspace {
    fn current_branch(&self) -> Result<String> {
        let head = self.repo.head()?;
        if !head.is_branch() {
            return Err(git2::Error::from_str("HEAD is detached").into());
        }
        head.shorthand()
            .map(str::to_string)
            .ok_or_else(|| git2::Error::from_str("branch name is not valid UTF-8").into())
    }

    fn changed_files(&self) -> Result<Vec<ChangedFile>> {
        let workdir = self.workdir();
        let unstaged =
            Status::WT_MODIFIED | Status::WT_DELETED | Status::WT_TYPECHANGE | Status::WT_RENAMED;
        let mut files = Vec::new();
        for (path, status) in self.status_entries(false)? {
            if !status.intersects(unstaged) {
                continue;
            }
            let modified = std::fs::metadata(workdir.join(&path))
                .and_then(|m| m.modified())
                .ok()
                .map(local_time);
            files.push(ChangedFile { path, modified });
        }
        Ok(files)
    }

    fn local_branches(&self) -> Result<Vec<BranchInfo>> {
        let mut out = Vec::new();
        for branch in self.repo.branches(Some(BranchType::Local))? {
            let (branch, _) = branch?;
            let Some(name) = branch.name()? else { continue };
            let upstream = branch
                .upstream()
                .ok()
                .and_then(|u| u.name().ok().flatten().map(str::to_string));
            out.push(BranchInfo {
                name: name.to_string(),
                upstream,
            });
        }
        Ok(out)
    }

    fn remote_branches(&self) -> Result<Vec<String>> {
        let prefix = format!("{ORIGIN}/");
        let mut out = Vec::new();
        for branch in self.repo.branches(Some(BranchType::Remote))? {
            let (branch, _) = branch?;
            if let Some(name) = branch.name()? {
                if name.starts_with(&prefix) && !name.ends_with("/HEAD") {
                    out.push(name.to_string());
                }
            }
        }
        Ok(out)
    }

    fn stash_messages(&mut self) -> Result<Vec<String>> {
        let mut messages = Vec::new();
        self.repo.stash_foreach(|_, message, _| {
            messages.push(message.to_string());
            true
        })?;
        Ok(messages)
    }

    fn stash_all(&mut self, message: &str) -> Result<Option<StashId>> {
        let sig = self.settings.signature(&self.repo)?;
        match self
            .repo
            .stash_save(&sig, message, Some(StashFlags::INCLUDE_UNTRACKED))
        {
            Ok(oid) => Ok(Some(StashId(oid.to_string()))),
            Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn stash_apply(&mut self, stash: &StashId) -> Result<()> {
        let index = self.stash_index(stash)?;
        self.repo.stash_apply(index, None)?;
        Ok(())
    }

    fn stash_pop(&mut self, stash: &StashId) -> Result<()> {
        let index = self.stash_index(stash)?;
        self.repo.stash_pop(index, None)?;
        Ok(())
    }

    fn checkout_branch(&mut self, name: &str) -> Result<()> {
        let refname = format!("refs/heads/{name}");
        let target = self.repo.revparse_single(&refname)?.peel(ObjectType::Commit)?;
        self.repo
            .checkout_tree(&target, Some(CheckoutBuilder::new().safe()))?;
        self.repo.set_head(&refname)?;
        Ok(())
    }

    fn checkout_detached(&mut self, commit: &CommitId) -> Result<()> {
        let oid = self.find_commit(commit)?.id();
        let target = self.repo.find_object(oid, Some(ObjectType::Commit))?;
        self.repo
            .checkout_tree(&target, Some(CheckoutBuilder::new().safe()))?;
        self.repo.set_head_detached(oid)?;
        Ok(())
    }

    fn create_branch(&mut self, name: &str, commit: &CommitId) -> Result<()> {
        {
            let target = self.find_commit(commit)?;
            self.repo.branch(name, &target, false)?;
        }
        self.checkout_branch(name)
    }

    fn merge_base(&self, one: &str, two: &str) -> Result<Option<CommitId>> {
        let one = self.repo.revparse_single(one)?.peel_to_commit()?.id();
        let two = self.repo.revparse_single(two)?.peel_to_commit()?.id();
        match self.repo.merge_base(one, two) {
            Ok(oid) => Ok(Some(oid.into())),
            Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn push_branch(&mut self, name: &str) -> Result<()> {
        let mut remote = self.repo.find_remote(ORIGIN).map_err(|_| Error::NoOrigin)?;
        let refspec = format!("refs/heads/{name}:refs/heads/{name}");
        let auth = self.settings.auth.as_ref();

        self.settings.retry.run("push", || {
            let rejection: RefCell<Option<String>> = RefCell::new(None);
            {
                let mut callbacks = credentials_callbacks(auth);
                callbacks.push_update_reference(|_refname, status| {
                    if let Some(msg) = status {
                        *rejection.borrow_mut() = Some(msg.to_string());
                    }
                    Ok(())
                });
                let mut opts = PushOptions::new();
                opts.remote_callbacks(callbacks);
                remote.push(&[refspec.as_str()], Some(&mut opts))?;
            }
            match rejection.into_inner() {
                Some(message) => Err(Error::PushRejected {
                    refname: name.to_string(),
                    message,
                }),
                None => Ok(()),
            }
        })?;

        let upstream = format!("{ORIGIN}/{name}");
        if let Err(e) = self
            .repo
            .find_branch(name, BranchType::Local)
            .and_then(|mut b| b.set_upstream(Some(&upstream)))
        {
            warn!(branch = name, "pushed but could not set upstream: {e}");
        }
        Ok(())
    }

    fn is_dirty(&self) -> Result<bool> {
        Ok(self
            .status_entries(true)?
            .iter()
            .any(|(_, status)| !status.is_empty() && !status.contains(Status::IGNORED)))
    }

    fn stage_all(&mut self) -> Result<()> {
        let mut index = self.repo.index()?;
        index.add_all(["*"], IndexAddOption::DEFAULT, None)?;
        index.update_all(["*"], None)?;
        index.write()?;
        Ok(())
    }

    fn staged_diff(&self) -> Result<String> {
        let head_tree = self.repo.head().ok().and_then(|h| h.peel_to_tree().ok());
        let index = self.repo.index()?;
        let diff = self
            .repo
            .diff_tree_to_index(head_tree.as_ref(), Some(&index), None)?;

        let mut patch = String::new();
        diff.print(DiffFormat::Patch, |_delta, _hunk, line| {
            if matches!(line.origin(), '+' | '-' | ' ') {
                patch.push(line.origin());
            }
            patch.push_str(&String::from_utf8_lossy(line.content()));
            true
        })?;
        Ok(patch)
    }

    fn commit(&mut self, message: &str) -> Result<CommitId> {
        let sig = self.settings.signature(&self.repo)?;
        let mut index = self.repo.index()?;
        let tree_id = index.write_tree()?;
        let tree = self.repo.find_tree(tree_id)?;

        let parent = match self.repo.head() {
            Ok(head) => Some(head.peel_to_commit()?),
            Err(e) if matches!(e.code(), ErrorCode::UnbornBranch | ErrorCode::NotFound) => None,
            Err(e) => return Err(e.into()),
        };
        let parents: Vec<&git2::Commit<'_>> = parent.iter().collect();

        let oid = self
            .repo
            .commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)?;
        Ok(oid.into())
    }

    fn discard_changes(&mut self) -> Result<()> {
        let head = self.repo.head()?.peel(ObjectType::Commit)?;
        self.repo.reset(&head, ResetType::Hard, None)?;
        self.repo
            .checkout_head(Some(CheckoutBuilder::new().force().remove_untracked(true)))?;
        Ok(())
    }
}
