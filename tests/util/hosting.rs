use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use github_autosave::error::{Error, Result};
use github_autosave::hosting::{CreateOutcome, HostedRepo, HostingService, RepoSlug};

use super::git_repo::init_bare;

/// Hosting service backed by bare repositories under `root/{owner}/{name}.git`.
pub struct FakeHosting {
    pub root: PathBuf,
    pub owner: String,
    /// Names `create_repo` reports as taken even though no repository exists.
    pub reserved: RefCell<HashSet<String>>,
    pub create_attempts: RefCell<Vec<String>>,
    /// Makes every `create_repo` call fail like an unavailable API.
    pub create_fails: Cell<bool>,
}

impl FakeHosting {
    pub fn new(root: &Path) -> Self {
        fs::create_dir_all(root.join("octo")).unwrap();
        Self {
            root: root.to_path_buf(),
            owner: "octo".to_string(),
            reserved: RefCell::new(HashSet::new()),
            create_attempts: RefCell::new(Vec::new()),
            create_fails: Cell::new(false),
        }
    }

    pub fn reserve(&self, name: &str) {
        self.reserved.borrow_mut().insert(name.to_string());
    }

    pub fn repo_path(&self, name: &str) -> PathBuf {
        self.root.join(&self.owner).join(format!("{name}.git"))
    }

    /// Creates an empty hosted repository and returns its URL.
    pub fn add_repo(&self, name: &str) -> String {
        init_bare(&self.repo_path(name));
        self.url_for(name)
    }

    pub fn url_for(&self, name: &str) -> String {
        self.repo_path(name).to_str().unwrap().to_string()
    }

    fn hosted(&self, name: &str) -> HostedRepo {
        HostedRepo {
            name: name.to_string(),
            clone_url: self.url_for(name),
        }
    }
}

impl HostingService for FakeHosting {
    fn repo_exists(&self, slug: &RepoSlug) -> Result<bool> {
        Ok(self
            .root
            .join(&slug.owner)
            .join(format!("{}.git", slug.name))
            .exists())
    }

    fn list_repos(&self) -> Result<Vec<HostedRepo>> {
        let mut repos = Vec::new();
        for entry in fs::read_dir(self.root.join(&self.owner)).unwrap() {
            let name = entry.unwrap().file_name().to_string_lossy().into_owned();
            if let Some(name) = name.strip_suffix(".git") {
                repos.push(self.hosted(name));
            }
        }
        repos.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(repos)
    }

    fn create_repo(&self, name: &str, _private: bool) -> Result<CreateOutcome> {
        self.create_attempts.borrow_mut().push(name.to_string());
        if self.create_fails.get() {
            return Err(Error::RemoteApi {
                status: 503,
                body: "service unavailable".to_string(),
            });
        }
        if self.reserved.borrow().contains(name) || self.repo_path(name).exists() {
            return Ok(CreateOutcome::NameTaken);
        }
        init_bare(&self.repo_path(name));
        Ok(CreateOutcome::Created(self.hosted(name)))
    }

    fn parse_remote_url(&self, url: &str) -> Option<RepoSlug> {
        let rest = Path::new(url).strip_prefix(&self.root).ok()?;
        let mut parts = rest.iter().map(|p| p.to_string_lossy().into_owned());
        let owner = parts.next()?;
        let name = parts.next()?;
        if parts.next().is_some() {
            return None;
        }
        Some(RepoSlug::new(owner, name.strip_suffix(".git")?))
    }
}
