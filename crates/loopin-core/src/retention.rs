//! Keep-policy for the artifact catalog.

use serde::{Deserialize, Serialize};

use crate::artifact::BackupClass;

/// Number of most-recent artifacts to keep, per backup class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionPolicy {
  pub manual:  usize,
  pub daily:   usize,
  pub weekly:  usize,
  pub monthly: usize,
}

impl Default for RetentionPolicy {
  fn default() -> Self { Self { manual: 10, daily: 7, weekly: 4, monthly: 12 } }
}

impl RetentionPolicy {
  pub fn keep_for(&self, class: BackupClass) -> usize {
    match class {
      BackupClass::Manual => self.manual,
      BackupClass::Daily => self.daily,
      BackupClass::Weekly => self.weekly,
      BackupClass::Monthly => self.monthly,
    }
  }
}
