//! Translation between local models and backend rows.
//!
//! Every column is named explicitly. Writes forward identity columns only on
//! create and never forward local bookkeeping (`lastSyncedAt`, retry state).

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use crate::models::{EntityData, EntityKind, Item, Project, Transaction};
use crate::util::{format_timestamp, parse_timestamp};

use super::{BackendError, BackendResult, RemoteRow};

/// Decode a backend row into the typed model for `kind`.
pub fn entity_from_row(kind: EntityKind, row: &RemoteRow) -> BackendResult<EntityData> {
    let reader = RowReader { kind, row };
    let data = match kind {
        EntityKind::Item => EntityData::Item(Item {
            item_id: reader.required("item_id")?,
            account_id: reader.required("account_id")?,
            project_id: reader.text("project_id"),
            transaction_id: reader.text("transaction_id"),
            name: reader.text("name").unwrap_or_default(),
            description: reader.text("description").unwrap_or_default(),
            source: reader.text("source"),
            sku: reader.text("sku"),
            purchase_price: reader.text("purchase_price"),
            project_price: reader.text("project_price"),
            market_value: reader.text("market_value"),
            payment_method: reader.text("payment_method"),
            disposition: reader.text("disposition"),
            notes: reader.text("notes"),
            space: reader.text("space"),
            bookmark: reader.flag("bookmark"),
            images: reader.json("images")?,
            created_by: reader.text("created_by"),
            date_created: reader.timestamp("date_created")?,
        }),
        EntityKind::Transaction => EntityData::Transaction(Transaction {
            transaction_id: reader.required("transaction_id")?,
            account_id: reader.required("account_id")?,
            project_id: reader.text("project_id"),
            transaction_date: reader.text("transaction_date"),
            source: reader.text("source"),
            transaction_type: reader.text("transaction_type"),
            payment_method: reader.text("payment_method"),
            amount: reader.text("amount"),
            budget_category: reader.text("budget_category"),
            notes: reader.text("notes"),
            receipt_emailed: reader.flag("receipt_emailed"),
            status: reader.text("status"),
            item_ids: reader.json("item_ids")?,
            created_by: reader.text("created_by"),
            created_at: reader.timestamp("created_at")?,
        }),
        EntityKind::Project => EntityData::Project(Project {
            project_id: reader.required("project_id")?,
            account_id: reader.required("account_id")?,
            name: reader.text("name").unwrap_or_default(),
            description: reader.text("description").unwrap_or_default(),
            client_name: reader.text("client_name"),
            budget: reader.text("budget"),
            design_fee: reader.text("design_fee"),
            main_image_url: reader.text("main_image_url"),
            created_by: reader.text("created_by"),
            created_at: reader.timestamp("created_at")?,
        }),
    };
    Ok(data)
}

/// Version column of a row; rows written before versioning count as 1.
pub fn row_version(row: &RemoteRow) -> i64 {
    row.get("version").and_then(Value::as_i64).unwrap_or(1)
}

/// Authoritative mutation time of a row.
pub fn row_timestamp(kind: EntityKind, row: &RemoteRow) -> BackendResult<DateTime<Utc>> {
    let reader = RowReader { kind, row };
    reader.timestamp(kind.timestamp_column())?.ok_or_else(|| {
        BackendError::Decode(format!(
            "{} row is missing '{}'",
            kind,
            kind.timestamp_column()
        ))
    })
}

/// Full row for an insert: identity, ownership, mutable, and control columns.
pub fn create_row(data: &EntityData, version: i64, last_updated: &DateTime<Utc>) -> RemoteRow {
    let mut row = RemoteRow::new();
    match data {
        EntityData::Item(item) => {
            row.insert("item_id".into(), json!(item.item_id));
            row.insert("account_id".into(), json!(item.account_id));
            row.insert("project_id".into(), json!(item.project_id));
            row.insert("transaction_id".into(), json!(item.transaction_id));
            row.insert("created_by".into(), json!(item.created_by));
            row.insert(
                "date_created".into(),
                json!(item.date_created.as_ref().map(format_timestamp)),
            );
        }
        EntityData::Transaction(transaction) => {
            row.insert("transaction_id".into(), json!(transaction.transaction_id));
            row.insert("account_id".into(), json!(transaction.account_id));
            row.insert("project_id".into(), json!(transaction.project_id));
            row.insert("item_ids".into(), json!(transaction.item_ids));
            row.insert("created_by".into(), json!(transaction.created_by));
            row.insert(
                "created_at".into(),
                json!(transaction.created_at.as_ref().map(format_timestamp)),
            );
        }
        EntityData::Project(project) => {
            row.insert("project_id".into(), json!(project.project_id));
            row.insert("account_id".into(), json!(project.account_id));
            row.insert("created_by".into(), json!(project.created_by));
            row.insert(
                "created_at".into(),
                json!(project.created_at.as_ref().map(format_timestamp)),
            );
        }
    }
    write_mutable_columns(&mut row, data);
    write_control_columns(&mut row, data.kind(), version, last_updated);
    row
}

/// Row for an update keyed by business identifier: mutable and control columns only.
pub fn update_row(data: &EntityData, version: i64, last_updated: &DateTime<Utc>) -> RemoteRow {
    let mut row = RemoteRow::new();
    write_mutable_columns(&mut row, data);
    write_control_columns(&mut row, data.kind(), version, last_updated);
    row
}

fn write_mutable_columns(row: &mut RemoteRow, data: &EntityData) {
    for field in data.mutable_fields() {
        row.insert(field.remote.to_string(), field.value);
    }
}

fn write_control_columns(
    row: &mut RemoteRow,
    kind: EntityKind,
    version: i64,
    last_updated: &DateTime<Utc>,
) {
    row.insert("version".into(), json!(version));
    row.insert(
        kind.timestamp_column().into(),
        json!(format_timestamp(last_updated)),
    );
}

struct RowReader<'a> {
    kind: EntityKind,
    row: &'a RemoteRow,
}

impl RowReader<'_> {
    fn required(&self, column: &str) -> BackendResult<String> {
        self.text(column).ok_or_else(|| {
            BackendError::Decode(format!("{} row is missing '{column}'", self.kind))
        })
    }

    fn text(&self, column: &str) -> Option<String> {
        match self.row.get(column)? {
            Value::String(value) => Some(value.clone()),
            Value::Number(value) => Some(value.to_string()),
            _ => None,
        }
    }

    fn flag(&self, column: &str) -> bool {
        match self.row.get(column) {
            Some(Value::Bool(value)) => *value,
            Some(Value::String(value)) => matches!(
                value.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            ),
            Some(Value::Number(value)) => value.as_i64().is_some_and(|n| n != 0),
            _ => false,
        }
    }

    fn json<T: DeserializeOwned + Default>(&self, column: &str) -> BackendResult<T> {
        match self.row.get(column) {
            None | Some(Value::Null) => Ok(T::default()),
            Some(value) => serde_json::from_value(value.clone()).map_err(|error| {
                BackendError::Decode(format!("{} column '{column}': {error}", self.kind))
            }),
        }
    }

    fn timestamp(&self, column: &str) -> BackendResult<Option<DateTime<Utc>>> {
        let Some(raw) = self.text(column) else {
            return Ok(None);
        };
        // Postgres renders timestamptz with a space separator.
        let normalized = if raw.contains('T') {
            raw
        } else {
            raw.replacen(' ', "T", 1)
        };
        parse_timestamp(&normalized)
            .map(Some)
            .map_err(|error| BackendError::Decode(error.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ItemImage;
    use pretty_assertions::assert_eq;

    fn sample_item() -> Item {
        let mut item = Item::new("acct", Some("proj".to_string()), "Sofa");
        item.purchase_price = Some("1200.00".to_string());
        item.notes = Some("velvet".to_string());
        item.date_created = Some(parse_timestamp("2024-02-03T04:05:06.789Z").unwrap());
        item.images = vec![ItemImage {
            url: "https://cdn.example.com/sofa.jpg".to_string(),
            caption: None,
            primary: true,
        }];
        item
    }

    #[test]
    fn create_row_uses_backend_column_names() {
        let now = Utc::now();
        let row = create_row(&EntityData::Item(sample_item()), 1, &now);

        assert_eq!(row["purchase_price"], json!("1200.00"));
        assert_eq!(row["project_id"], json!("proj"));
        assert_eq!(row["version"], json!(1));
        assert_eq!(row["last_updated"], json!(format_timestamp(&now)));
        assert!(!row.contains_key("purchasePrice"));
        assert!(!row.contains_key("lastSyncedAt"));
    }

    #[test]
    fn update_row_omits_identity_columns() {
        let now = Utc::now();
        let row = update_row(&EntityData::Item(sample_item()), 4, &now);

        assert!(!row.contains_key("item_id"));
        assert!(!row.contains_key("account_id"));
        assert!(!row.contains_key("transaction_id"));
        assert_eq!(row["notes"], json!("velvet"));
        assert_eq!(row["version"], json!(4));
    }

    #[test]
    fn row_round_trips_into_model() {
        let item = sample_item();
        let now = Utc::now();
        let row = create_row(&EntityData::Item(item.clone()), 3, &now);

        let decoded = entity_from_row(EntityKind::Item, &row).unwrap();
        assert_eq!(decoded, EntityData::Item(item));
        assert_eq!(row_version(&row), 3);
    }

    #[test]
    fn decodes_numeric_and_postgres_formats() {
        let mut row = RemoteRow::new();
        row.insert("transaction_id".into(), json!("t-1"));
        row.insert("account_id".into(), json!("acct"));
        row.insert("amount".into(), json!(42.5));
        row.insert("receipt_emailed".into(), json!("true"));
        row.insert("updated_at".into(), json!("2024-05-01 12:00:00+00:00"));

        let EntityData::Transaction(transaction) =
            entity_from_row(EntityKind::Transaction, &row).unwrap()
        else {
            panic!("expected transaction");
        };
        assert_eq!(transaction.amount.as_deref(), Some("42.5"));
        assert!(transaction.receipt_emailed);
        assert!(transaction.item_ids.is_empty());
        assert!(row_timestamp(EntityKind::Transaction, &row).is_ok());
        assert_eq!(row_version(&row), 1);
    }

    #[test]
    fn missing_business_key_is_decode_error() {
        let mut row = RemoteRow::new();
        row.insert("account_id".into(), json!("acct"));
        let error = entity_from_row(EntityKind::Project, &row).unwrap_err();
        assert!(matches!(error, BackendError::Decode(_)));
    }
}
