use std::collections::HashMap;

use serde::Deserialize;

use crate::PathTemplate;
use crate::Result;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct RunChangeConfig {
    /// Condition path → file path template with a `%d` or `%s` run-number
    /// placeholder, e.g. `"conditions/velo/%d.xml"`
    pub conditions: HashMap<String, String>,
}

impl RunChangeConfig {
    pub fn validate(&self) -> Result<()> {
        for template in self.conditions.values() {
            // constructing the template performs the placeholder check
            PathTemplate::new(template)?;
        }
        Ok(())
    }
}
