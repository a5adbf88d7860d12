#![allow(dead_code)]

pub mod git_repo;
pub mod hosting;

use std::path::Path;

use github_autosave::config::Config;
use github_autosave::git_backend::GitSettings;
use github_autosave::retry::RetryPolicy;

pub fn test_config(projects_dir: &Path) -> Config {
    let mut config = Config::new(projects_dir, "octo", "token");
    config.commit_author = Some("Test".to_string());
    config.commit_email = Some("test@example.com".to_string());
    config
}

pub fn test_settings() -> GitSettings {
    GitSettings {
        auth: None,
        retry: RetryPolicy::none(),
        commit_author: Some("Test".to_string()),
        commit_email: Some("test@example.com".to_string()),
    }
}
