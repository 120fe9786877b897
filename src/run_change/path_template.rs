use std::path::PathBuf;

use parking_lot::Mutex;

use crate::ConditionError;
use crate::ContentDigest;
use crate::FileHasher;
use crate::Result;

/// The single placeholder a template may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Placeholder {
    /// `%d` — the run number itself
    Run,
    /// `%s` — the two-level `run/1000` / `run` split, joined by `/`
    Split,
}

/// A file path template keyed by run number, with a cached content digest
/// of the last resolved file.
///
/// `changed` answers whether a run change actually moved the file content
/// under this template; a template resolving to identical bytes for a new
/// run reports unchanged, which is the whole point of the cache.
#[derive(Debug)]
pub struct PathTemplate {
    template: String,
    placeholder: Placeholder,
    last_digest: Mutex<Option<ContentDigest>>,
}

impl PathTemplate {
    /// Validates and builds a template; exactly one `%d` or `%s`
    /// placeholder is required.
    pub fn new(template: &str) -> Result<Self> {
        let runs = template.matches("%d").count();
        let splits = template.matches("%s").count();
        if runs + splits != 1 {
            return Err(ConditionError::InvalidTemplate {
                template: template.to_string(),
            }
            .into());
        }
        let placeholder = if runs == 1 {
            Placeholder::Run
        } else {
            Placeholder::Split
        };
        Ok(PathTemplate {
            template: template.to_string(),
            placeholder,
            last_digest: Mutex::new(None),
        })
    }

    /// The file path this template designates for `run`.
    pub fn resolve(
        &self,
        run: u32,
    ) -> PathBuf {
        let resolved = match self.placeholder {
            Placeholder::Run => self.template.replace("%d", &run.to_string()),
            Placeholder::Split => self
                .template
                .replace("%s", &format!("{}/{}", run / 1000, run)),
        };
        PathBuf::from(resolved)
    }

    /// True when the file resolved for `run` carries different content than
    /// the last evaluation of this template (or on first use).
    pub fn changed(
        &self,
        run: u32,
        hasher: &FileHasher,
    ) -> Result<bool> {
        let path = self.resolve(run);
        let digest = hasher.digest(&path)?;
        let mut last = self.last_digest.lock();
        let changed = last.map(|previous| previous != digest).unwrap_or(true);
        *last = Some(digest);
        Ok(changed)
    }

    pub fn template(&self) -> &str {
        &self.template
    }
}
