//! Bringing an unlinked project and the hosting service into a linked state.

use std::fs::{self, File, OpenOptions};
use std::iter;
use std::path::Path;

use tracing::{debug, error, info};
use walkdir::WalkDir;

use crate::classifier::split_project_path;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::git_backend::GitWorkspace;
use crate::hosting::{CreateOutcome, HostedRepo};
use crate::naming::suffixed_names;
use crate::vcs::Vcs;

const INITIAL_COMMIT_MESSAGE: &str = "Initial commit";

/// `git init` + stage everything + initial commit, in place.
pub fn create_and_initialize_local_repo(path: &Path, ctx: &Context<'_>) -> Result<GitWorkspace> {
    let mut ws = GitWorkspace::init(path, ctx.git.clone())?;
    let commit = ws.commit_all(INITIAL_COMMIT_MESSAGE)?;
    info!(path = %path.display(), %commit, "initialized local repository");
    Ok(ws)
}

/// Creates `name` on the hosting service, trying `{name}_2`, `{name}_3`, ...
/// while the service reports the name as taken.
pub fn create_hosted_repo(name: &str, ctx: &Context<'_>) -> Result<HostedRepo> {
    create_first_free(iter::once(name.to_string()).chain(suffixed_names(name, 2)), ctx)
}

/// Creates the first of `candidates` the hosting service accepts. The
/// returned repository's `name` is the one that was taken.
pub(crate) fn create_first_free<I>(candidates: I, ctx: &Context<'_>) -> Result<HostedRepo>
where
    I: IntoIterator<Item = String>,
{
    for candidate in candidates {
        match ctx.hosting.create_repo(&candidate, ctx.config.private_repos)? {
            CreateOutcome::Created(repo) => {
                info!(name = %repo.name, url = %repo.clone_url, "created hosted repository");
                return Ok(repo);
            }
            CreateOutcome::NameTaken => {
                debug!(name = %candidate, "hosted repository name taken, trying the next one");
            }
        }
    }
    unreachable!("candidate names are unbounded")
}

/// Creates a hosted repository named after the project directory, links it
/// as `origin` and pushes the active branch. Returns the new remote URL.
pub fn create_and_initialize_remote_repo(path: &Path, ctx: &Context<'_>) -> Result<String> {
    let (_, name) = split_project_path(path)?;
    let mut ws = GitWorkspace::open(path, ctx.git.clone())?;

    let hosted = create_hosted_repo(&name, ctx)?;
    if !ws.has_commits() {
        ws.commit_all(INITIAL_COMMIT_MESSAGE)?;
    }
    ws.relink_origin(&hosted.clone_url)?;
    let branch = ws.current_branch()?;
    ws.push_branch(&branch)?;

    info!(path = %path.display(), url = %hosted.clone_url, %branch, "published project");
    Ok(hosted.clone_url)
}

/// Turns a plain directory into a clone of `remote_url` that still holds
/// every local file. Failures are logged and reported as `false`; the
/// project directory is left untouched in that case.
pub fn reconcile_local_dir_and_remote_repo(path: &Path, remote_url: &str, ctx: &Context<'_>) -> bool {
    match try_reconcile(path, remote_url, ctx) {
        Ok(()) => {
            info!(path = %path.display(), url = remote_url, "reconciled directory with hosted repository");
            true
        }
        Err(e) => {
            error!(path = %path.display(), url = remote_url, "failed to reconcile directory: {e}");
            false
        }
    }
}

// Clone into a staging directory next to the project, overlay the local
// files, then swap. The original is only moved once the clone is complete.
fn try_reconcile(path: &Path, remote_url: &str, ctx: &Context<'_>) -> Result<()> {
    let (parent, name) = split_project_path(path)?;
    let staging = tempfile::Builder::new()
        .prefix(&format!(".{name}.autosave-"))
        .tempdir_in(&parent)
        .map_err(|e| Error::fs(&parent, e))?;

    let clone_dir = staging.path().join("clone");
    {
        let ws = GitWorkspace::clone_remote(remote_url, &clone_dir, ctx.git.clone())?;
        if ws.repository().is_bare() || ws.repository().workdir().is_none() {
            return Err(git2::Error::from_str("clone has no working tree").into());
        }
        debug!(clone = %clone_dir.display(), "clone validated");
    }

    overlay(path, &clone_dir)?;

    let backup = staging.path().join("original");
    fs::rename(path, &backup).map_err(|e| Error::fs(path, e))?;
    if let Err(e) = fs::rename(&clone_dir, path) {
        if let Err(restore) = fs::rename(&backup, path) {
            error!(
                backup = %backup.display(),
                "could not move the original directory back: {restore}"
            );
            // The staging directory holds the only copy.
            let kept = staging.keep();
            error!(staging = %kept.display(), "left the staging directory in place");
        }
        return Err(Error::fs(path, e));
    }
    Ok(())
}

/// Copies every entry of `src` over `dst`, replacing files that exist in both.
/// A `.git` directory directly under `src` is not copied.
fn overlay(src: &Path, dst: &Path) -> Result<()> {
    let walker = WalkDir::new(src)
        .min_depth(1)
        .into_iter()
        .filter_entry(|e| !(e.depth() == 1 && e.file_name() == ".git"));

    for entry in walker {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(src).to_path_buf();
            Error::fs(path, e.into())
        })?;
        let Ok(rel) = entry.path().strip_prefix(src) else {
            continue;
        };
        let target = dst.join(rel);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&target).map_err(|e| Error::fs(&target, e))?;
        } else if file_type.is_symlink() {
            copy_symlink(entry.path(), &target)?;
        } else {
            if let Some(dir) = target.parent() {
                fs::create_dir_all(dir).map_err(|e| Error::fs(dir, e))?;
            }
            fs::copy(entry.path(), &target).map_err(|e| Error::fs(entry.path(), e))?;
            keep_mtime(entry.path(), &target)?;
        }
    }
    Ok(())
}

// Staleness is judged by mtime, so a copy must not look freshly edited.
fn keep_mtime(src: &Path, dst: &Path) -> Result<()> {
    let modified = fs::metadata(src)
        .and_then(|m| m.modified())
        .map_err(|e| Error::fs(src, e))?;
    // futimens only needs ownership, so read-only copies can be opened as they are.
    let file = if cfg!(unix) {
        File::open(dst)
    } else {
        OpenOptions::new().write(true).open(dst)
    };
    file.and_then(|f| f.set_modified(modified))
        .map_err(|e| Error::fs(dst, e))
}

#[cfg(unix)]
fn copy_symlink(src: &Path, dst: &Path) -> Result<()> {
    let link = fs::read_link(src).map_err(|e| Error::fs(src, e))?;
    if fs::symlink_metadata(dst).is_ok() {
        fs::remove_file(dst).map_err(|e| Error::fs(dst, e))?;
    }
    std::os::unix::fs::symlink(&link, dst).map_err(|e| Error::fs(dst, e))
}

#[cfg(not(unix))]
fn copy_symlink(src: &Path, dst: &Path) -> Result<()> {
    fs::copy(src, dst).map(|_| ()).map_err(|e| Error::fs(src, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, SystemTime};

    #[test]
    fn overlay_adds_local_files_and_replaces_shared_ones() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        fs::write(src.path().join("notes.txt"), "local").unwrap();
        fs::create_dir_all(src.path().join("sub/deep")).unwrap();
        fs::write(src.path().join("sub/deep/a.rs"), "fn a() {}").unwrap();
        fs::write(dst.path().join("notes.txt"), "remote").unwrap();
        fs::write(dst.path().join("README.md"), "remote readme").unwrap();

        overlay(src.path(), dst.path()).unwrap();

        assert_eq!(fs::read_to_string(dst.path().join("notes.txt")).unwrap(), "local");
        assert_eq!(
            fs::read_to_string(dst.path().join("sub/deep/a.rs")).unwrap(),
            "fn a() {}"
        );
        assert_eq!(
            fs::read_to_string(dst.path().join("README.md")).unwrap(),
            "remote readme"
        );
    }

    #[test]
    fn overlay_keeps_modification_times() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        let week_ago = SystemTime::now() - Duration::from_secs(7 * 24 * 3600);
        fs::write(src.path().join("old.txt"), "local").unwrap();
        fs::write(dst.path().join("old.txt"), "remote").unwrap();
        fs::File::options()
            .write(true)
            .open(src.path().join("old.txt"))
            .unwrap()
            .set_modified(week_ago)
            .unwrap();

        overlay(src.path(), dst.path()).unwrap();

        let copied = fs::metadata(dst.path().join("old.txt")).unwrap().modified().unwrap();
        let age = SystemTime::now().duration_since(copied).unwrap();
        assert!(age > Duration::from_secs(6 * 24 * 3600), "copy looks {age:?} old");
        assert_eq!(fs::read_to_string(dst.path().join("old.txt")).unwrap(), "local");
    }

    #[test]
    fn overlay_skips_top_level_git_dir() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        fs::create_dir_all(src.path().join(".git")).unwrap();
        fs::write(src.path().join(".git/HEAD"), "ref: refs/heads/main").unwrap();
        fs::write(src.path().join("keep.txt"), "x").unwrap();

        overlay(src.path(), dst.path()).unwrap();

        assert!(!dst.path().join(".git").exists());
        assert!(dst.path().join("keep.txt").exists());
    }
}
