use crate::config::Config;
use crate::git_backend::GitSettings;
use crate::hosting::HostingService;
use crate::message::MessageGenerator;

/// The configuration and external services handed to every component entry point.
pub struct Context<'a> {
    pub config: &'a Config,
    pub hosting: &'a dyn HostingService,
    pub messages: Option<&'a dyn MessageGenerator>,
    pub git: GitSettings,
}

impl<'a> Context<'a> {
    pub fn new(
        config: &'a Config,
        hosting: &'a dyn HostingService,
        messages: Option<&'a dyn MessageGenerator>,
    ) -> Self {
        Self {
            config,
            hosting,
            messages,
            git: GitSettings::from_config(config),
        }
    }
}
