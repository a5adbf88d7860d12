use std::fs;
use std::path::{Path, PathBuf};

use git2::{BranchType, IndexAddOption, Oid, Repository, RepositoryInitOptions, Signature};

/// A working repository on `main` used to set up test scenarios.
pub struct GitRepo {
    pub dir: PathBuf,
    pub repo: Repository,
}

impl GitRepo {
    pub fn init(dir: &Path) -> Self {
        fs::create_dir_all(dir).unwrap();
        let mut opts = RepositoryInitOptions::new();
        opts.initial_head("main");
        let repo = Repository::init_opts(dir, &opts).unwrap();
        let mut cfg = repo.config().unwrap();
        cfg.set_str("user.name", "Test").unwrap();
        cfg.set_str("user.email", "test@example.com").unwrap();
        Self {
            dir: dir.to_path_buf(),
            repo,
        }
    }

    pub fn open(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
            repo: Repository::open(dir).unwrap(),
        }
    }

    pub fn write_file(&self, path: &str, content: &str) {
        let full = self.dir.join(path);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(full, content).unwrap();
    }

    pub fn read_file(&self, path: &str) -> String {
        fs::read_to_string(self.dir.join(path)).unwrap()
    }

    pub fn commit_all(&self, message: &str) -> Oid {
        let mut index = self.repo.index().unwrap();
        index.add_all(["*"], IndexAddOption::DEFAULT, None).unwrap();
        index.write().unwrap();
        let tree = self.repo.find_tree(index.write_tree().unwrap()).unwrap();
        let sig = Signature::now("Test", "test@example.com").unwrap();
        let parent = self.repo.head().ok().map(|h| h.peel_to_commit().unwrap());
        let parents: Vec<&git2::Commit<'_>> = parent.iter().collect();
        self.repo
            .commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)
            .unwrap()
    }

    pub fn add_origin(&self, url: &str) {
        self.repo.remote("origin", url).unwrap();
    }

    pub fn set_origin(&self, url: &str) {
        self.repo.remote_set_url("origin", url).unwrap();
    }

    pub fn push(&self, branch: &str) {
        let mut remote = self.repo.find_remote("origin").unwrap();
        let spec = format!("refs/heads/{branch}:refs/heads/{branch}");
        remote.push(&[spec.as_str()], None).unwrap();
    }

    pub fn fetch(&self) {
        let mut remote = self.repo.find_remote("origin").unwrap();
        remote.fetch(&[] as &[&str], None, None).unwrap();
    }

    pub fn create_branch(&self, name: &str) {
        let head = self.repo.head().unwrap().peel_to_commit().unwrap();
        self.repo.branch(name, &head, false).unwrap();
    }

    pub fn current_branch(&self) -> String {
        self.repo.head().unwrap().shorthand().unwrap().to_string()
    }

    pub fn head_oid(&self) -> Oid {
        self.repo.head().unwrap().target().unwrap()
    }

    pub fn branch_oid(&self, name: &str) -> Option<Oid> {
        self.repo
            .find_branch(name, BranchType::Local)
            .ok()
            .and_then(|b| b.get().target())
    }

    pub fn branch_names(&self) -> Vec<String> {
        self.repo
            .branches(Some(BranchType::Local))
            .unwrap()
            .map(|b| b.unwrap().0.name().unwrap().unwrap().to_string())
            .collect()
    }

    pub fn stash_count(&mut self) -> usize {
        let mut count = 0;
        self.repo
            .stash_foreach(|_, _, _| {
                count += 1;
                true
            })
            .unwrap();
        count
    }
}

/// Bare repository whose HEAD names `main`, so clones check it out.
pub fn init_bare(path: &Path) -> Repository {
    fs::create_dir_all(path).unwrap();
    let mut opts = RepositoryInitOptions::new();
    opts.bare(true).initial_head("main");
    Repository::init_opts(path, &opts).unwrap()
}

/// Target of `refs/heads/{branch}` in a (bare) repository.
pub fn ref_target(repo_path: &Path, branch: &str) -> Option<Oid> {
    let repo = Repository::open(repo_path).unwrap();
    let target = repo
        .find_reference(&format!("refs/heads/{branch}"))
        .ok()
        .and_then(|r| r.target());
    target
}

/// Populates a bare repository with one commit on `main` holding `files`.
pub fn seed_bare(bare: &Path, files: &[(&str, &str)]) -> Oid {
    let scratch = tempfile::tempdir().unwrap();
    let work = GitRepo::init(scratch.path());
    for (path, content) in files {
        work.write_file(path, content);
    }
    let oid = work.commit_all("seed");
    work.add_origin(bare.to_str().unwrap());
    work.push("main");
    oid
}
