//! Commit message formatting.
//!
//! Every backend commits with the message produced here, so history looks
//! the same whichever VCS a repository uses.

use crate::config::CommitConfig;
use crate::models::{Author, SyncTrigger};

/// Marker embedded in every commit this engine creates.
pub const SYNC_MARKER: &str = "[lingosync]";

const AUTHORS_TRAILER: &str = "Translation-Authors:";

/// Renders commit messages from the configured template.
#[derive(Debug, Clone)]
pub struct CommitFormatter {
    template: String,
    author: Author,
}

/// Values substituted into the template.
#[derive(Debug, Clone)]
pub struct CommitSummary<'a> {
    pub units: usize,
    pub files: usize,
    pub trigger: &'a SyncTrigger,
    /// Translators whose edits are part of the commit, deduplicated.
    pub authors: &'a [String],
}

impl CommitFormatter {
    pub fn new(config: &CommitConfig) -> Self {
        Self {
            template: config.message_template.clone(),
            author: Author::new(config.author_name.as_str(), config.author_email.as_str()),
        }
    }

    /// Identity used as author and committer.
    pub fn author(&self) -> &Author {
        &self.author
    }

    /// Render the message. Without an `{authors}` placeholder the translators
    /// are appended as a trailer.
    pub fn format(&self, summary: &CommitSummary<'_>) -> String {
        let authors = summary.authors.join(", ");
        let mut message = self
            .template
            .replace("{units}", &summary.units.to_string())
            .replace("{files}", &summary.files.to_string())
            .replace("{trigger}", summary.trigger.name())
            .replace("{actor}", summary.trigger.actor())
            .replace("{authors}", &authors)
            .replace("{marker}", SYNC_MARKER);

        if !self.template.contains("{authors}") && !authors.is_empty() {
            if !message.ends_with('\n') {
                message.push('\n');
            }
            message.push_str(AUTHORS_TRAILER);
            message.push(' ');
            message.push_str(&authors);
        }
        if !message.contains(SYNC_MARKER) {
            message.push_str("\n\n");
            message.push_str(SYNC_MARKER);
        }
        message
    }

    /// Whether a commit was made by this engine.
    pub fn is_sync_commit(message: &str) -> bool {
        message.contains(SYNC_MARKER)
    }

    /// Translators listed in a commit's trailer.
    pub fn extract_authors(message: &str) -> Vec<String> {
        message
            .lines()
            .filter_map(|l| l.trim().strip_prefix(AUTHORS_TRAILER))
            .flat_map(|rest| rest.split(','))
            .map(|a| a.trim().to_string())
            .filter(|a| !a.is_empty())
            .collect()
    }
}
