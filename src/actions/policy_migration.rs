use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::actions::migration::{MigrationRecordStore, NewMigrationRecord};
use crate::archive::seal_archive;
use crate::capability::{CapabilityDescriptor, EntityType};
use crate::gate::RequestContext;
use crate::secure::{FormHandler, Securable};
use crate::validation::{EqualInputValidator, Feedback, StringLengthValidator, Validator};

pub const LABEL_FIELD: &str = "label";
pub const ITEMS_FIELD: &str = "items";
pub const PASSWORD_FIELD: &str = "password";
pub const CONFIRM_FIELD: &str = "confirm";
pub const LABEL_LENGTH: StringLengthValidator = StringLengthValidator::new(0, 32);
pub const PASSWORD_LENGTH: StringLengthValidator = StringLengthValidator::new(0, 256);

/// What the operator picked for migration between two clusters.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MigrationSelection {
    #[serde(default)]
    pub label: String,
    pub source_cluster: String,
    pub target_cluster: String,
    #[serde(default)]
    pub items: Vec<String>,
}

impl MigrationSelection {
    fn summary(&self) -> String {
        match self.items.len() {
            1 => "1 item".to_string(),
            n => format!("{} items", n),
        }
    }
}

fn validate_selection(selection: &MigrationSelection, feedback: &mut Feedback) {
    LABEL_LENGTH.validate(LABEL_FIELD, &selection.label, feedback);
    if selection.items.iter().all(|item| item.trim().is_empty()) {
        feedback.error(ITEMS_FIELD, "select at least one item to migrate");
    }
    if selection.source_cluster.trim().is_empty() {
        feedback.error("source_cluster", "source cluster is required");
    }
    if selection.target_cluster.trim().is_empty() {
        feedback.error("target_cluster", "target cluster is required");
    }
}

/// Final wizard step: records the migration under the submitting principal.
pub struct MigrationConfirmForm<S> {
    store: S,
    clock: fn() -> Result<u64>,
}

impl<S: MigrationRecordStore> MigrationConfirmForm<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            clock: crate::now_s,
        }
    }

    pub fn with_clock(mut self, clock: fn() -> Result<u64>) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn capability() -> CapabilityDescriptor {
        CapabilityDescriptor::attempted_create(EntityType::MigrationRecord)
    }

    pub fn secured(store: S) -> Securable<Self> {
        Securable::new("confirmForm", Self::new(store)).with_capability(Self::capability())
    }
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct ConfirmedMigration {
    pub id: i64,
    pub label: String,
    pub summary: String,
}

impl<S: MigrationRecordStore> FormHandler for MigrationConfirmForm<S> {
    type Input = MigrationSelection;
    type Output = ConfirmedMigration;

    fn validate(&self, input: &MigrationSelection, feedback: &mut Feedback) {
        validate_selection(input, feedback);
    }

    fn on_submit(
        &mut self,
        ctx: RequestContext<'_>,
        input: MigrationSelection,
        feedback: &mut Feedback,
    ) -> Result<ConfirmedMigration> {
        let created_at =
            i64::try_from((self.clock)()?).map_err(|_| anyhow!("clock exceeds i64 range"))?;
        let label = input.label.trim().to_string();
        let summary = input.summary();
        let id = self.store.save(NewMigrationRecord {
            name: label.clone(),
            owner: ctx.principal.id().to_string(),
            source_cluster: input.source_cluster.trim().to_string(),
            target_cluster: input.target_cluster.trim().to_string(),
            created_at,
            summary: summary.clone(),
        })?;
        log::info!(
            "{} recorded migration {} ({}) from {} to {}",
            ctx.principal.id(),
            id,
            summary,
            input.source_cluster,
            input.target_cluster
        );
        feedback.info("Migration recorded.");
        Ok(ConfirmedMigration { id, label, summary })
    }
}

/// Password for an optional sealed download. Wiped on drop.
#[derive(Clone, Default, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct DownloadRequest {
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub confirm: String,
}

impl std::fmt::Debug for DownloadRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadRequest")
            .field("password", &"<redacted>")
            .field("confirm", &"<redacted>")
            .finish()
    }
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct MigrationArchive {
    pub file_name: String,
    pub sealed: bool,
    /// Hex of the archive bytes: plain JSON, or a `CGA1` sealed blob.
    pub data_hex: String,
}

#[derive(Serialize)]
struct ArchiveContents<'a> {
    label: &'a str,
    source_cluster: &'a str,
    target_cluster: &'a str,
    exported_by: &'a str,
    exported_at: u64,
    items: &'a [String],
}

/// Exports the current selection, sealed when a password is supplied.
pub struct MigrationDownloadForm {
    selection: MigrationSelection,
    clock: fn() -> Result<u64>,
}

impl MigrationDownloadForm {
    pub fn new(selection: MigrationSelection) -> Self {
        Self {
            selection,
            clock: crate::now_s,
        }
    }

    pub fn with_clock(mut self, clock: fn() -> Result<u64>) -> Self {
        self.clock = clock;
        self
    }

    pub fn capability() -> CapabilityDescriptor {
        CapabilityDescriptor::attempted_read_all(EntityType::Policy)
    }

    pub fn secured(selection: MigrationSelection) -> Securable<Self> {
        Securable::new("downloadForm", Self::new(selection)).with_capability(Self::capability())
    }
}

impl FormHandler for MigrationDownloadForm {
    type Input = DownloadRequest;
    type Output = MigrationArchive;

    fn validate(&self, input: &DownloadRequest, feedback: &mut Feedback) {
        validate_selection(&self.selection, feedback);
        PASSWORD_LENGTH.validate(PASSWORD_FIELD, &input.password, feedback);
        PASSWORD_LENGTH.validate(CONFIRM_FIELD, &input.confirm, feedback);
        EqualInputValidator.validate(PASSWORD_FIELD, &input.password, &input.confirm, feedback);
    }

    fn on_submit(
        &mut self,
        ctx: RequestContext<'_>,
        input: DownloadRequest,
        feedback: &mut Feedback,
    ) -> Result<MigrationArchive> {
        let contents = ArchiveContents {
            label: &self.selection.label,
            source_cluster: &self.selection.source_cluster,
            target_cluster: &self.selection.target_cluster,
            exported_by: ctx.principal.id(),
            exported_at: (self.clock)()?,
            items: &self.selection.items,
        };
        let mut clear = serde_json::to_vec_pretty(&contents)?;

        let sealed = !input.password.is_empty();
        let bytes = if sealed {
            let result = seal_archive(&clear, input.password.as_bytes());
            clear.zeroize();
            result?
        } else {
            clear
        };
        drop(input);

        log::info!(
            "{} downloaded migration archive of {} items (sealed: {})",
            ctx.principal.id(),
            self.selection.items.len(),
            sealed
        );
        feedback.info("Migration archive ready.");
        Ok(MigrationArchive {
            file_name: if sealed {
                "migration.cga".to_string()
            } else {
                "migration.json".to_string()
            },
            sealed,
            data_hex: hex::encode(bytes),
        })
    }
}
