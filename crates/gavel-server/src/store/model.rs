use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// One stored submission. `fields` holds the caller-supplied payload and is
/// never mutated after creation; only the response sub-state changes, and only
/// through [`super::Store::update_by_id`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Record<F> {
    /// Unique within the collection, generated at creation.
    pub id: String,
    /// Unix timestamp (seconds) when the record was created.
    pub created_at: i64,
    /// Caller-supplied deduplication key. Two appends with the same key
    /// resolve to the same record.
    pub idempotency_key: Option<String>,
    pub fields: F,
    pub responded: bool,
    pub response: Option<String>,
}

/// Payload types a collection can hold.
pub trait Fields: Serialize + DeserializeOwned + Send + 'static {
    /// Names of required fields that are absent or blank.
    fn missing(&self) -> Vec<&'static str>;
}

/// Contact-form submission payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContactFields {
    pub name: String,
    pub email: String,
    pub message: String,
}

impl Fields for ContactFields {
    fn missing(&self) -> Vec<&'static str> {
        let mut out = Vec::new();
        if self.name.trim().is_empty() {
            out.push("name");
        }
        if self.email.trim().is_empty() {
            out.push("email");
        }
        if self.message.trim().is_empty() {
            out.push("message");
        }
        out
    }
}

/// Item-sale offer payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OfferFields {
    pub name: String,
    pub email: String,
    pub item_title: String,
    pub item_description: String,
}

impl Fields for OfferFields {
    fn missing(&self) -> Vec<&'static str> {
        let mut out = Vec::new();
        if self.name.trim().is_empty() {
            out.push("name");
        }
        if self.email.trim().is_empty() {
            out.push("email");
        }
        if self.item_title.trim().is_empty() {
            out.push("item_title");
        }
        if self.item_description.trim().is_empty() {
            out.push("item_description");
        }
        out
    }
}
