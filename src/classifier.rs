use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::context::Context;
use crate::error::{Error, Result};
use crate::git_backend::GitWorkspace;
use crate::hosting::RepoSlug;
use crate::naming::suffixed_names;
use crate::reconcile::create_first_free;
use crate::repo_status::RepoStatus;
use crate::vcs::Vcs;

pub use crate::git_backend::is_repository;

/// A hosted repository the project is linked to, and where the project now lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteMatch {
    pub url: String,
    pub path: PathBuf,
}

/// Works out which of the four project cases applies to `path`. May rename
/// the project directory, see [`match_local_repo_to_remote`].
pub fn classify(path: &Path, ctx: &Context<'_>) -> Result<RepoStatus> {
    if is_repository(path) {
        let linked = match_local_repo_to_remote(path, ctx)?;
        Ok(match linked {
            Some(m) => RepoStatus {
                path: m.path,
                is_git_repo: true,
                remote_url: Some(m.url),
            },
            None => RepoStatus {
                path: path.to_path_buf(),
                is_git_repo: true,
                remote_url: None,
            },
        })
    } else {
        Ok(RepoStatus {
            path: path.to_path_buf(),
            is_git_repo: false,
            remote_url: match_local_dir_to_remote(path, ctx)?,
        })
    }
}

/// Links a local repository to the hosted repository its `origin` points at.
///
/// Returns `None` when there is no `origin`, it is not on the hosting service,
/// or the hosted repository does not exist or has no branches. When the
/// hosted repository has branches but none shares a commit with the local
/// active branch, a new hosted repository `{name}_{n}` (n from 2, skipping
/// names of sibling directories) is created, the project directory is renamed
/// to match it and the local history is pushed there.
pub fn match_local_repo_to_remote(path: &Path, ctx: &Context<'_>) -> Result<Option<RemoteMatch>> {
    let mut ws = GitWorkspace::open(path, ctx.git.clone())?;

    let Some(url) = ws.origin_url() else {
        debug!(path = %path.display(), "no origin remote");
        return Ok(None);
    };
    let Some(slug) = ctx.hosting.parse_remote_url(&url) else {
        debug!(%url, "origin is not on the hosting service");
        return Ok(None);
    };
    if !ctx.hosting.repo_exists(&slug)? {
        debug!(%slug, "hosted repository does not exist");
        return Ok(None);
    }

    ws.fetch_origin()?;
    let remote_branches = ws.remote_branches()?;
    if remote_branches.is_empty() {
        debug!(%slug, "hosted repository has no branches");
        return Ok(None);
    }

    let local = if ws.has_commits() {
        ws.commit_set("HEAD")?
    } else {
        Default::default()
    };
    for branch in &remote_branches {
        let remote = ws.commit_set(branch)?;
        if !remote.is_disjoint(&local) {
            debug!(%slug, branch = %branch, "local and hosted histories share commits");
            return Ok(Some(RemoteMatch {
                url,
                path: path.to_path_buf(),
            }));
        }
    }

    drop(ws);
    rename_and_relink(path, &slug, ctx).map(Some)
}

fn rename_and_relink(path: &Path, unrelated: &RepoSlug, ctx: &Context<'_>) -> Result<RemoteMatch> {
    let (parent, base) = split_project_path(path)?;

    // The hosted name decides the directory name, so create it first and
    // leave the project alone if that fails.
    let candidates = suffixed_names(&base, 2).filter(|name| !parent.join(name).exists());
    let hosted = create_first_free(candidates, ctx)?;
    let new_path = parent.join(&hosted.name);

    warn!(
        from = %path.display(),
        to = %new_path.display(),
        %unrelated,
        "local history is unrelated to the hosted repository; renaming the project"
    );
    fs::rename(path, &new_path).map_err(|e| Error::fs(path, e))?;

    let mut ws = GitWorkspace::open(&new_path, ctx.git.clone())?;
    if !ws.has_commits() {
        ws.commit_all("Initial commit")?;
    }
    ws.relink_origin(&hosted.clone_url)?;
    let branch = ws.current_branch()?;
    ws.push_branch(&branch)?;

    info!(url = %hosted.clone_url, path = %new_path.display(), "published renamed project");
    Ok(RemoteMatch {
        url: hosted.clone_url,
        path: new_path,
    })
}

/// For a plain directory: the hosted repository with the same name, compared
/// case-insensitively.
pub fn match_local_dir_to_remote(path: &Path, ctx: &Context<'_>) -> Result<Option<String>> {
    let (_, name) = split_project_path(path)?;
    let found = ctx
        .hosting
        .list_repos()?
        .into_iter()
        .find(|repo| repo.name.to_lowercase() == name.to_lowercase());
    match &found {
        Some(repo) => debug!(dir = %name, url = %repo.clone_url, "directory matches hosted repository"),
        None => debug!(dir = %name, "no hosted repository with this name"),
    }
    Ok(found.map(|repo| repo.clone_url))
}

pub(crate) fn split_project_path(path: &Path) -> Result<(PathBuf, String)> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string);
    match (path.parent(), name) {
        (Some(parent), Some(name)) => Ok((parent.to_path_buf(), name)),
        _ => Err(Error::fs(
            path,
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "not a project directory"),
        )),
    }
}
