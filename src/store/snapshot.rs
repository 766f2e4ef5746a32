//! JSON snapshot persistence for the store.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Store, StoreError};
use crate::domain::{AuditEntry, Form, ManualPayment, Submission, Subscription, SubscriptionPlan, User};

/// On-disk representation of the whole store.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSnapshot {
    pub users: Vec<User>,
    pub forms: Vec<Form>,
    pub submissions: Vec<Submission>,
    pub plans: Vec<SubscriptionPlan>,
    pub subscriptions: Vec<Subscription>,
    pub payments: Vec<ManualPayment>,
    pub audit: Vec<AuditEntry>,
    pub processed_events: Vec<(String, DateTime<Utc>)>,
}

impl Store {
    /// Load from file if it exists, otherwise start empty.
    pub fn load_from_file(path: &Path) -> Result<Self, StoreError> {
        let store = Self::new(Some(path.to_path_buf()));
        if path.exists() {
            let reader = BufReader::new(File::open(path)?);
            let snapshot: StoreSnapshot = serde_json::from_reader(reader)?;
            store.restore(snapshot);
            tracing::info!(
                users = store.users.len(),
                forms = store.forms.len(),
                submissions = store.submissions.len(),
                "Loaded store snapshot"
            );
        }
        Ok(store)
    }

    /// Whether `save_to_file` writes anywhere.
    pub fn is_persistent(&self) -> bool {
        self.snapshot_path.is_some()
    }

    /// Write the snapshot next to the target and rename it into place.
    ///
    /// A no-op for stores created without a snapshot path.
    pub fn save_to_file(&self) -> Result<(), StoreError> {
        let Some(path) = &self.snapshot_path else {
            return Ok(());
        };

        let snapshot = self.snapshot();
        let tmp = path.with_extension("json.tmp");
        {
            let mut writer = BufWriter::new(File::create(&tmp)?);
            serde_json::to_writer(&mut writer, &snapshot)?;
            writer.flush()?;
        }
        fs::rename(&tmp, path)?;

        tracing::debug!(path = %path.display(), users = snapshot.users.len(), "Saved store snapshot");
        Ok(())
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            users: self.users.iter().map(|r| r.value().clone()).collect(),
            forms: self.forms.iter().map(|r| r.value().clone()).collect(),
            submissions: self.submissions.iter().map(|r| r.value().clone()).collect(),
            plans: self.plans.iter().map(|r| r.value().clone()).collect(),
            subscriptions: self.subscriptions.iter().map(|r| r.value().clone()).collect(),
            payments: self.payments.iter().map(|r| r.value().clone()).collect(),
            audit: self
                .audit
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .clone(),
            processed_events: self
                .processed_events
                .iter()
                .map(|r| (r.key().clone(), *r.value()))
                .collect(),
        }
    }

    fn restore(&self, snapshot: StoreSnapshot) {
        for u in snapshot.users {
            self.users.insert(u.id, u);
        }
        for f in snapshot.forms {
            self.forms.insert(f.id, f);
        }
        for s in snapshot.submissions {
            self.submissions.insert(s.id, s);
        }
        for p in snapshot.plans {
            self.plans.insert(p.id.clone(), p);
        }
        for s in snapshot.subscriptions {
            self.subscriptions.insert(s.user_id, s);
        }
        for p in snapshot.payments {
            self.payments.insert(p.id, p);
        }
        *self.audit.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = snapshot.audit;
        for (id, at) in snapshot.processed_events {
            self.processed_events.insert(id, at);
        }
    }
}
