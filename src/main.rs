use std::path::PathBuf;
use std::process;

use chrono::Local;
use clap::{arg, crate_authors, crate_description, crate_version, value_parser, ArgAction, Command};
use tracing::error;

use github_autosave::autosave::AutosaveOptions;
use github_autosave::config::Config;
use github_autosave::context::Context;
use github_autosave::hosting::GitHubClient;
use github_autosave::logger;
use github_autosave::message::{MessageGenerator, OpenAiGenerator};
use github_autosave::projects::{list_projects, run_batch};

fn cli() -> Command {
    Command::new("github-autosave")
        .about(crate_description!())
        .version(crate_version!())
        .author(crate_authors!())
        .arg(
            arg!([PROJECT] ... "Project directories under projects_dir (default: all of them)")
                .value_parser(value_parser!(String)),
        )
        .arg(
            arg!(--"bypass-check" "Autosave regardless of how old the uncommitted changes are")
                .action(ArgAction::SetTrue),
        )
        .arg(
            arg!(-c --config <FILE> "Config file to use instead of the default location")
                .required(false)
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(arg!(-v --verbose "Log debug output").action(ArgAction::SetTrue))
}

fn main() {
    let matches = cli().get_matches();

    let verbose = matches.get_flag("verbose");
    let log_dir = logger::default_log_dir();
    if let Err(e) = logger::init(log_dir.as_deref(), verbose) {
        eprintln!("Unable to set up logging: {e}");
    }

    if let Err(e) = run(&matches) {
        error!("{e:#}");
        process::exit(1);
    }
}

fn run(matches: &clap::ArgMatches) -> anyhow::Result<()> {
    let config = Config::load(matches.get_one::<PathBuf>("config").map(PathBuf::as_path))?;

    let hosting = GitHubClient::from_config(&config)?;
    let generator = OpenAiGenerator::from_config(&config)?;
    let ctx = Context::new(
        &config,
        &hosting,
        generator.as_ref().map(|g| g as &dyn MessageGenerator),
    );

    let names: Vec<String> = matches
        .get_many::<String>("PROJECT")
        .map(|v| v.cloned().collect())
        .unwrap_or_default();
    let projects = list_projects(&config, &names)?;

    let options = AutosaveOptions {
        now: Local::now(),
        stale_after: config.stale_after(),
        bypass: matches.get_flag("bypass-check"),
    };
    run_batch(&projects, &ctx, &options);
    Ok(())
}
