//! Entity models shared by the local store, outbox, and conflict pipeline

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::backend::{mapping, RemoteRow};
use crate::error::{Error, Result};

/// Generate a client-side business identifier (UUID v7, time-sortable).
///
/// Creates carry this key to the backend so a replayed create can be
/// recognised instead of producing a duplicate row.
#[must_use]
pub fn new_business_id() -> String {
    Uuid::now_v7().to_string()
}

/// Kind of synchronised entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Item,
    Transaction,
    Project,
}

impl EntityKind {
    pub const ALL: [Self; 3] = [Self::Item, Self::Transaction, Self::Project];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Item => "item",
            Self::Transaction => "transaction",
            Self::Project => "project",
        }
    }

    /// Backend table holding this kind.
    pub const fn table(self) -> &'static str {
        match self {
            Self::Item => "items",
            Self::Transaction => "transactions",
            Self::Project => "projects",
        }
    }

    /// Backend column carrying the business identifier.
    pub const fn business_key(self) -> &'static str {
        match self {
            Self::Item => "item_id",
            Self::Transaction => "transaction_id",
            Self::Project => "project_id",
        }
    }

    /// Backend column carrying the authoritative mutation time.
    pub const fn timestamp_column(self) -> &'static str {
        match self {
            Self::Item => "last_updated",
            Self::Transaction | Self::Project => "updated_at",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "item" | "items" => Ok(Self::Item),
            "transaction" | "transactions" => Ok(Self::Transaction),
            "project" | "projects" => Ok(Self::Project),
            other => Err(Error::InvalidInput(format!("unknown entity kind '{other}'"))),
        }
    }
}

/// A field eligible for conflict comparison and backend writes.
#[derive(Debug, Clone, PartialEq)]
pub struct MutableField {
    /// Local (camelCase) field name
    pub local: &'static str,
    /// Backend (snake_case) column name
    pub remote: &'static str,
    pub value: Value,
}

fn field(local: &'static str, remote: &'static str, value: Value) -> MutableField {
    MutableField {
        local,
        remote,
        value,
    }
}

/// Image attached to an item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemImage {
    pub url: String,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub primary: bool,
}

/// An inventory item tracked inside a project
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub item_id: String,
    pub account_id: String,
    #[serde(default)]
    pub project_id: Option<String>,
    /// Transaction the item was purchased under (lineage)
    #[serde(default)]
    pub transaction_id: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub sku: Option<String>,
    #[serde(default)]
    pub purchase_price: Option<String>,
    #[serde(default)]
    pub project_price: Option<String>,
    #[serde(default)]
    pub market_value: Option<String>,
    #[serde(default)]
    pub payment_method: Option<String>,
    #[serde(default)]
    pub disposition: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub space: Option<String>,
    #[serde(default)]
    pub bookmark: bool,
    #[serde(default)]
    pub images: Vec<ItemImage>,
    #[serde(default)]
    pub created_by: Option<String>,
    #[serde(default)]
    pub date_created: Option<DateTime<Utc>>,
}

impl Item {
    /// Create a new item with a fresh business identifier.
    #[must_use]
    pub fn new(
        account_id: impl Into<String>,
        project_id: Option<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            item_id: new_business_id(),
            account_id: account_id.into(),
            project_id,
            transaction_id: None,
            name: name.into(),
            description: String::new(),
            source: None,
            sku: None,
            purchase_price: None,
            project_price: None,
            market_value: None,
            payment_method: None,
            disposition: None,
            notes: None,
            space: None,
            bookmark: false,
            images: Vec::new(),
            created_by: None,
            date_created: Some(Utc::now()),
        }
    }

    fn mutable_fields(&self) -> Vec<MutableField> {
        vec![
            field("name", "name", json!(self.name)),
            field("description", "description", json!(self.description)),
            field("source", "source", json!(self.source)),
            field("sku", "sku", json!(self.sku)),
            field("purchasePrice", "purchase_price", json!(self.purchase_price)),
            field("projectPrice", "project_price", json!(self.project_price)),
            field("marketValue", "market_value", json!(self.market_value)),
            field("paymentMethod", "payment_method", json!(self.payment_method)),
            field("disposition", "disposition", json!(self.disposition)),
            field("notes", "notes", json!(self.notes)),
            field("space", "space", json!(self.space)),
            field("bookmark", "bookmark", json!(self.bookmark)),
            field("images", "images", json!(self.images)),
        ]
    }
}

/// A purchase or return recorded against a project
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub transaction_id: String,
    pub account_id: String,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub transaction_date: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub transaction_type: Option<String>,
    #[serde(default)]
    pub payment_method: Option<String>,
    #[serde(default)]
    pub amount: Option<String>,
    #[serde(default)]
    pub budget_category: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub receipt_emailed: bool,
    #[serde(default)]
    pub status: Option<String>,
    /// Items bought under this transaction (lineage)
    #[serde(default)]
    pub item_ids: Vec<String>,
    #[serde(default)]
    pub created_by: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl Transaction {
    #[must_use]
    pub fn new(account_id: impl Into<String>, project_id: Option<String>) -> Self {
        Self {
            transaction_id: new_business_id(),
            account_id: account_id.into(),
            project_id,
            transaction_date: None,
            source: None,
            transaction_type: None,
            payment_method: None,
            amount: None,
            budget_category: None,
            notes: None,
            receipt_emailed: false,
            status: None,
            item_ids: Vec::new(),
            created_by: None,
            created_at: Some(Utc::now()),
        }
    }

    fn mutable_fields(&self) -> Vec<MutableField> {
        vec![
            field(
                "transactionDate",
                "transaction_date",
                json!(self.transaction_date),
            ),
            field("source", "source", json!(self.source)),
            field(
                "transactionType",
                "transaction_type",
                json!(self.transaction_type),
            ),
            field("paymentMethod", "payment_method", json!(self.payment_method)),
            field("amount", "amount", json!(self.amount)),
            field(
                "budgetCategory",
                "budget_category",
                json!(self.budget_category),
            ),
            field("notes", "notes", json!(self.notes)),
            field(
                "receiptEmailed",
                "receipt_emailed",
                json!(self.receipt_emailed),
            ),
            field("status", "status", json!(self.status)),
        ]
    }
}

/// A design project; the scope items and transactions belong to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub project_id: String,
    pub account_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub client_name: Option<String>,
    #[serde(default)]
    pub budget: Option<String>,
    #[serde(default)]
    pub design_fee: Option<String>,
    #[serde(default)]
    pub main_image_url: Option<String>,
    #[serde(default)]
    pub created_by: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl Project {
    #[must_use]
    pub fn new(account_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            project_id: new_business_id(),
            account_id: account_id.into(),
            name: name.into(),
            description: String::new(),
            client_name: None,
            budget: None,
            design_fee: None,
            main_image_url: None,
            created_by: None,
            created_at: Some(Utc::now()),
        }
    }

    fn mutable_fields(&self) -> Vec<MutableField> {
        vec![
            field("name", "name", json!(self.name)),
            field("description", "description", json!(self.description)),
            field("clientName", "client_name", json!(self.client_name)),
            field("budget", "budget", json!(self.budget)),
            field("designFee", "design_fee", json!(self.design_fee)),
            field("mainImageUrl", "main_image_url", json!(self.main_image_url)),
        ]
    }
}

/// Entity payload tagged by kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum EntityData {
    Item(Item),
    Transaction(Transaction),
    Project(Project),
}

impl EntityData {
    pub const fn kind(&self) -> EntityKind {
        match self {
            Self::Item(_) => EntityKind::Item,
            Self::Transaction(_) => EntityKind::Transaction,
            Self::Project(_) => EntityKind::Project,
        }
    }

    pub fn business_id(&self) -> &str {
        match self {
            Self::Item(item) => &item.item_id,
            Self::Transaction(transaction) => &transaction.transaction_id,
            Self::Project(project) => &project.project_id,
        }
    }

    pub fn account_id(&self) -> &str {
        match self {
            Self::Item(item) => &item.account_id,
            Self::Transaction(transaction) => &transaction.account_id,
            Self::Project(project) => &project.account_id,
        }
    }

    /// Owning project. A project is its own scope.
    pub fn project_id(&self) -> Option<&str> {
        match self {
            Self::Item(item) => item.project_id.as_deref(),
            Self::Transaction(transaction) => transaction.project_id.as_deref(),
            Self::Project(project) => Some(&project.project_id),
        }
    }

    /// Allow-listed mutable fields, in comparison order.
    ///
    /// Identity, ownership, and lineage fields are never listed.
    pub fn mutable_fields(&self) -> Vec<MutableField> {
        match self {
            Self::Item(item) => item.mutable_fields(),
            Self::Transaction(transaction) => transaction.mutable_fields(),
            Self::Project(project) => project.mutable_fields(),
        }
    }

    /// Current value of an allow-listed field by local name.
    pub fn field_value(&self, name: &str) -> Option<Value> {
        self.mutable_fields()
            .into_iter()
            .find(|field| field.local == name)
            .map(|field| field.value)
    }

    /// Overwrite an allow-listed field by local name.
    pub fn set_field(&mut self, name: &str, value: Value) -> Result<()> {
        if self.field_value(name).is_none() {
            return Err(Error::InvalidInput(format!(
                "'{name}' is not a mutable {} field",
                self.kind()
            )));
        }

        match self {
            Self::Item(item) => *item = patched(item, name, value)?,
            Self::Transaction(transaction) => *transaction = patched(transaction, name, value)?,
            Self::Project(project) => *project = patched(project, name, value)?,
        }
        Ok(())
    }

    /// Backend insert row in native column naming.
    pub fn to_remote_create(&self, version: i64, last_updated: &DateTime<Utc>) -> RemoteRow {
        mapping::create_row(self, version, last_updated)
    }

    /// Backend update row: mutable and control columns only.
    pub fn to_remote_update(&self, version: i64, last_updated: &DateTime<Utc>) -> RemoteRow {
        mapping::update_row(self, version, last_updated)
    }

    pub fn from_remote(kind: EntityKind, row: &RemoteRow) -> Result<Self> {
        Ok(mapping::entity_from_row(kind, row)?)
    }
}

fn patched<T: Serialize + DeserializeOwned>(current: &T, name: &str, value: Value) -> Result<T> {
    let mut object = serde_json::to_value(current)?;
    if let Value::Object(map) = &mut object {
        map.insert(name.to_string(), value);
    }
    Ok(serde_json::from_value(object)?)
}

/// Entity as held by the local store, with its sync control fields
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityRecord {
    pub data: EntityData,
    /// Optimistic concurrency token, starts at 1 and never decreases
    pub version: i64,
    pub last_updated: DateTime<Utc>,
    /// When this copy was last confirmed consistent with the backend
    pub last_synced_at: Option<DateTime<Utc>>,
}

impl EntityRecord {
    pub const fn kind(&self) -> EntityKind {
        self.data.kind()
    }

    pub fn business_id(&self) -> &str {
        self.data.business_id()
    }
}

/// Upsert input for the local store.
///
/// `version` and `last_synced_at` are only written when supplied, so a
/// partial write cannot roll back resolution metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityWrite {
    pub data: EntityData,
    pub last_updated: DateTime<Utc>,
    pub version: Option<i64>,
    pub last_synced_at: Option<DateTime<Utc>>,
}

impl EntityWrite {
    pub const fn new(data: EntityData, last_updated: DateTime<Utc>) -> Self {
        Self {
            data,
            last_updated,
            version: None,
            last_synced_at: None,
        }
    }

    #[must_use]
    pub const fn with_version(mut self, version: i64) -> Self {
        self.version = Some(version);
        self
    }

    #[must_use]
    pub const fn synced_at(mut self, at: DateTime<Utc>) -> Self {
        self.last_synced_at = Some(at);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_kind_parse_accepts_plural() {
        assert_eq!("items".parse::<EntityKind>().unwrap(), EntityKind::Item);
        assert_eq!(
            "Transaction".parse::<EntityKind>().unwrap(),
            EntityKind::Transaction
        );
        assert!("vendor".parse::<EntityKind>().is_err());
    }

    #[test]
    fn mutable_fields_exclude_identity_and_lineage() {
        let mut item = Item::new("acct", Some("proj".to_string()), "Sofa");
        item.transaction_id = Some("txn".to_string());
        let data = EntityData::Item(item);

        let names: Vec<_> = data.mutable_fields().iter().map(|f| f.local).collect();
        assert!(names.contains(&"name"));
        assert!(names.contains(&"images"));
        for excluded in [
            "itemId",
            "accountId",
            "projectId",
            "transactionId",
            "createdBy",
        ] {
            assert!(!names.contains(&excluded), "{excluded} must not be mutable");
        }
    }

    #[test]
    fn set_field_updates_allow_listed_field() {
        let mut data = EntityData::Item(Item::new("acct", None, "Sofa"));
        data.set_field("notes", json!("velvet")).unwrap();
        data.set_field("purchasePrice", json!("120.00")).unwrap();

        let EntityData::Item(item) = &data else {
            panic!("expected item");
        };
        assert_eq!(item.notes.as_deref(), Some("velvet"));
        assert_eq!(item.purchase_price.as_deref(), Some("120.00"));
    }

    #[test]
    fn set_field_rejects_identity_fields() {
        let mut data = EntityData::Project(Project::new("acct", "Loft"));
        assert!(data.set_field("projectId", json!("other")).is_err());
        assert!(data.set_field("accountId", json!("other")).is_err());
    }

    #[test]
    fn project_is_its_own_scope() {
        let project = Project::new("acct", "Loft");
        let id = project.project_id.clone();
        let data = EntityData::Project(project);
        assert_eq!(data.project_id(), Some(id.as_str()));
        assert_eq!(data.kind(), EntityKind::Project);
    }

    #[test]
    fn entity_data_is_tagged_by_kind() {
        let data = EntityData::Item(Item::new("acct", None, "Lamp"));
        let encoded = serde_json::to_value(&data).unwrap();
        assert_eq!(encoded["kind"], "item");
        assert_eq!(encoded["data"]["name"], "Lamp");
    }
}
