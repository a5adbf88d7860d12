// src/repo_status.rs
use std::path::PathBuf;

/// Which of the four project situations applies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProjectCase {
    /// A git repository whose origin shares history with a hosted repository.
    RepoWithRemote,
    /// A git repository with no usable hosted counterpart.
    RepoWithoutRemote,
    /// A plain directory whose name matches a hosted repository.
    DirWithRemote,
    /// A plain directory with no hosted counterpart.
    DirWithoutRemote,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoStatus {
    /// Where the project lives now. Differs from the input path after an
    /// unrelated-history rename.
    pub path: PathBuf,
    pub is_git_repo: bool,
    pub remote_url: Option<String>,
}

impl RepoStatus {
    pub fn case(&self) -> ProjectCase {
        match (self.is_git_repo, self.remote_url.is_some()) {
            (true, true) => ProjectCase::RepoWithRemote,
            (true, false) => ProjectCase::RepoWithoutRemote,
            (false, true) => ProjectCase::DirWithRemote,
            (false, false) => ProjectCase::DirWithoutRemote,
        }
    }
}
