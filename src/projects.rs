//! The per-project pipeline and the batch loop around it.

use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};

use tracing::{error, info, info_span};

use crate::autosave::{run_cycle, AutosaveOptions, CycleOutcome};
use crate::classifier::classify;
use crate::config::Config;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::git_backend::GitWorkspace;
use crate::reconcile::{
    create_and_initialize_local_repo, create_and_initialize_remote_repo,
    reconcile_local_dir_and_remote_repo,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProjectOutcome {
    Autosave(CycleOutcome),
    /// The project was newly published to this URL.
    Published(String),
    /// Directory/clone reconciliation failed; retried next run.
    ReconcileFailed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub processed: usize,
    pub autosaved: usize,
    pub published: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl BatchReport {
    fn record(&mut self, outcome: &ProjectOutcome) {
        self.processed += 1;
        match outcome {
            ProjectOutcome::Autosave(CycleOutcome::Saved { .. }) => self.autosaved += 1,
            ProjectOutcome::Autosave(CycleOutcome::Failed { .. }) | ProjectOutcome::ReconcileFailed => {
                self.failed += 1
            }
            ProjectOutcome::Autosave(_) => self.skipped += 1,
            ProjectOutcome::Published(_) => self.published += 1,
        }
    }

    fn record_error(&mut self) {
        self.processed += 1;
        self.failed += 1;
    }
}

/// The projects to process: the named ones, or every non-hidden subdirectory
/// of `projects_dir`. Names that are not directories are logged and dropped.
pub fn list_projects(config: &Config, names: &[String]) -> Result<Vec<PathBuf>> {
    if !names.is_empty() {
        let mut projects = Vec::new();
        for name in names {
            let path = config.projects_dir.join(name);
            if path.is_dir() {
                projects.push(path);
            } else {
                error!(path = %path.display(), "project directory does not exist");
            }
        }
        return Ok(projects);
    }

    let dir = &config.projects_dir;
    let mut projects = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| Error::fs(dir, e))? {
        let entry = entry.map_err(|e| Error::fs(dir, e))?;
        let hidden = entry.file_name().to_string_lossy().starts_with('.');
        if !hidden && entry.path().is_dir() {
            projects.push(entry.path());
        }
    }
    projects.sort();
    Ok(projects)
}

/// Classifies the project, links it with the hosting service if needed and
/// runs the autosave cycle where a linked repository exists.
pub fn process_project(path: &Path, ctx: &Context<'_>, options: &AutosaveOptions) -> Result<ProjectOutcome> {
    let status = classify(path, ctx)?;
    info!(case = ?status.case(), "classified project");

    match (status.is_git_repo, status.remote_url) {
        (true, Some(_)) => autosave_project(&status.path, ctx, options).map(ProjectOutcome::Autosave),
        (true, None) => create_and_initialize_remote_repo(&status.path, ctx).map(ProjectOutcome::Published),
        (false, Some(url)) => {
            if reconcile_local_dir_and_remote_repo(&status.path, &url, ctx) {
                autosave_project(&status.path, ctx, options).map(ProjectOutcome::Autosave)
            } else {
                Ok(ProjectOutcome::ReconcileFailed)
            }
        }
        (false, None) => {
            create_and_initialize_local_repo(&status.path, ctx)?;
            create_and_initialize_remote_repo(&status.path, ctx).map(ProjectOutcome::Published)
        }
    }
}

pub fn autosave_project(path: &Path, ctx: &Context<'_>, options: &AutosaveOptions) -> Result<CycleOutcome> {
    info!(path = %path.display(), "starting autosave");
    let mut ws = GitWorkspace::open(path, ctx.git.clone())?;
    Ok(run_cycle(&mut ws, options, ctx.messages))
}

/// Processes every project in turn. Nothing that happens to one project
/// stops the others.
pub fn run_batch(projects: &[PathBuf], ctx: &Context<'_>, options: &AutosaveOptions) -> BatchReport {
    let mut report = BatchReport::default();
    for path in projects {
        let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        let _span = info_span!("project", %name).entered();
        info!("processing project");

        match panic::catch_unwind(AssertUnwindSafe(|| process_project(path, ctx, options))) {
            Ok(Ok(outcome)) => {
                info!(?outcome, "finished project");
                report.record(&outcome);
            }
            Ok(Err(e)) => {
                error!("error processing project: {e}");
                report.record_error();
            }
            Err(_) => {
                error!("unexpected panic while processing project");
                report.record_error();
            }
        }
    }
    info!(
        processed = report.processed,
        autosaved = report.autosaved,
        published = report.published,
        skipped = report.skipped,
        failed = report.failed,
        "batch finished"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lists_visible_subdirectories_sorted() {
        let tmp = tempfile::tempdir().unwrap();
        for dir in ["zeta", "alpha", ".hidden"] {
            fs::create_dir(tmp.path().join(dir)).unwrap();
        }
        fs::write(tmp.path().join("file.txt"), "").unwrap();
        let config = Config::new(tmp.path(), "octo", "t");

        let projects = list_projects(&config, &[]).unwrap();
        assert_eq!(projects, vec![tmp.path().join("alpha"), tmp.path().join("zeta")]);
    }

    #[test]
    fn explicit_names_drop_missing_projects() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir(tmp.path().join("real")).unwrap();
        let config = Config::new(tmp.path(), "octo", "t");

        let projects = list_projects(&config, &["real".to_string(), "ghost".to_string()]).unwrap();
        assert_eq!(projects, vec![tmp.path().join("real")]);
    }

    #[test]
    fn report_tallies_outcomes() {
        let mut report = BatchReport::default();
        report.record(&ProjectOutcome::Autosave(CycleOutcome::Skipped));
        report.record(&ProjectOutcome::Autosave(CycleOutcome::Saved {
            branch: "b".to_string(),
            committed: true,
        }));
        report.record(&ProjectOutcome::Published("u".to_string()));
        report.record(&ProjectOutcome::ReconcileFailed);
        report.record_error();
        assert_eq!(
            report,
            BatchReport {
                processed: 5,
                autosaved: 1,
                published: 1,
                skipped: 1,
                failed: 2,
            }
        );
    }
}
