use std::sync::Arc;

use tracing::debug;
use tracing::info;

use crate::metrics;
use crate::FileHasher;
use crate::Incident;
use crate::IncidentHandler;
use crate::PathTemplate;
use crate::Result;
use crate::RunChangeConfig;
use crate::UpdateManager;

/// Reacts to run-number changes by invalidating the file-backed conditions
/// whose backing file content actually moved.
///
/// Invalidation goes through the update manager; the reload itself then
/// happens lazily on the next `new_event` pass, like any other stale item.
pub struct RunChangeHandler {
    manager: Arc<UpdateManager>,
    /// Condition path → template, in deterministic path order.
    templates: Vec<(String, PathTemplate)>,
    hasher: FileHasher,
}

impl RunChangeHandler {
    pub fn new(
        manager: Arc<UpdateManager>,
        config: &RunChangeConfig,
    ) -> Result<Self> {
        let mut templates = config
            .conditions
            .iter()
            .map(|(path, template)| Ok((path.clone(), PathTemplate::new(template)?)))
            .collect::<Result<Vec<_>>>()?;
        templates.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(RunChangeHandler {
            manager,
            templates,
            hasher: FileHasher::new(),
        })
    }

    fn on_run_change(
        &self,
        run: u32,
    ) -> Result<()> {
        for (condition, template) in &self.templates {
            if template.changed(run, &self.hasher)? {
                metrics::RUN_CHANGE_CHECKS
                    .with_label_values(&["reload"])
                    .inc();
                info!(run, condition, "file content changed, invalidating condition");
                self.manager.invalidate_path(condition);
            } else {
                metrics::RUN_CHANGE_CHECKS
                    .with_label_values(&["unchanged"])
                    .inc();
                debug!(run, condition, "file content unchanged, keeping condition");
            }
        }
        Ok(())
    }
}

impl IncidentHandler for RunChangeHandler {
    fn handle(
        &self,
        incident: &Incident,
    ) -> Result<()> {
        match incident {
            Incident::RunChange { run } => self.on_run_change(*run),
            Incident::BeginEvent { .. } | Incident::StoreCleared => Ok(()),
        }
    }
}
