use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use ulid::Ulid;

/// Store-assigned document identifier, kept in the `_id` field.
pub type DocId = Ulid;

/// The field every document carries once inserted.
pub const ID_FIELD: &str = "_id";

/// A schemaless record in a named collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct Document(pub Map<String, Value>);

impl Document {
    pub fn new() -> Self {
        Self(Map::new())
    }

    pub fn from_object(map: Map<String, Value>) -> Self {
        Self(map)
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn set(&mut self, field: &str, value: Value) {
        self.0.insert(field.to_string(), value);
    }

    /// The store-assigned id, if this document has been inserted.
    pub fn id(&self) -> Option<DocId> {
        self.0
            .get(ID_FIELD)
            .and_then(Value::as_str)
            .and_then(|s| Ulid::from_string(s).ok())
    }

    pub fn matches(&self, filter: &Filter) -> bool {
        filter
            .0
            .iter()
            .all(|(field, expected)| self.0.get(field) == Some(expected))
    }

    pub fn apply(&mut self, patch: &Patch) {
        for (field, value) in &patch.0 {
            self.0.insert(field.clone(), value.clone());
        }
    }
}

/// Conjunction of field equality tests. An empty filter matches every document.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Filter(Vec<(String, Value)>);

impl Filter {
    /// Matches everything — the full-collection listing filter.
    pub fn all() -> Self {
        Self(Vec::new())
    }

    pub fn field_eq(field: &str, value: Value) -> Self {
        Self(vec![(field.to_string(), value)])
    }

    pub fn and_eq(mut self, field: &str, value: Value) -> Self {
        self.0.push((field.to_string(), value));
        self
    }

    pub fn id_eq(id: DocId) -> Self {
        Self::field_eq(ID_FIELD, Value::String(id.to_string()))
    }
}

/// Set-style field assignments applied to matched documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Patch(Vec<(String, Value)>);

impl Patch {
    pub fn set(field: &str, value: Value) -> Self {
        Self(vec![(field.to_string(), value)])
    }

    pub fn and_set(mut self, field: &str, value: Value) -> Self {
        self.0.push((field.to_string(), value));
        self
    }
}

/// The WAL record format — flat, one durable write each.
///
/// Patches carry the resolved document ids rather than the filter they were
/// matched with, so replay applies exactly the writes that happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Record {
    Inserted {
        collection: String,
        doc: Document,
    },
    Patched {
        collection: String,
        ids: Vec<DocId>,
        patch: Patch,
    },
}

/// In-memory contents of one named collection, in insertion order.
#[derive(Debug, Default)]
pub struct Collection {
    docs: Vec<Document>,
}

impl Collection {
    pub fn new() -> Self {
        Self { docs: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    pub fn insert(&mut self, doc: Document) {
        self.docs.push(doc);
    }

    pub fn find(&self, filter: &Filter) -> Vec<Document> {
        self.docs.iter().filter(|d| d.matches(filter)).cloned().collect()
    }

    pub fn find_one(&self, filter: &Filter) -> Option<Document> {
        self.docs.iter().find(|d| d.matches(filter)).cloned()
    }

    /// Resolve the ids a patch would touch, in insertion order.
    pub fn matching_ids(&self, filter: &Filter, limit: Option<usize>) -> Vec<DocId> {
        let ids = self
            .docs
            .iter()
            .filter(|d| d.matches(filter))
            .filter_map(Document::id);
        match limit {
            Some(n) => ids.take(n).collect(),
            None => ids.collect(),
        }
    }

    /// Apply a patch to the documents with the given ids. Returns the count touched.
    pub fn patch_by_ids(&mut self, ids: &[DocId], patch: &Patch) -> u64 {
        let mut modified = 0;
        for doc in &mut self.docs {
            if doc.id().is_some_and(|id| ids.contains(&id)) {
                doc.apply(patch);
                modified += 1;
            }
        }
        modified
    }

    pub fn documents(&self) -> &[Document] {
        &self.docs
    }
}

// ── Typed views over the two domain collections ──────────────────

/// The `products` collection name.
pub const LESSONS: &str = "products";
/// The `order` collection name.
pub const ORDERS: &str = "order";

/// A bookable course offering with finite capacity.
///
/// `id` is the business cross-reference key orders point at — distinct from
/// the store-assigned `_id`. `version` tags the capacity field for
/// conditional writes; a stale-version write touches zero records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lesson {
    #[serde(rename = "_id")]
    pub doc_id: DocId,
    pub id: Value,
    pub topic: String,
    pub location: String,
    pub price: i64,
    #[serde(rename = "availableSpaces")]
    pub available_spaces: i64,
    #[serde(default)]
    pub version: u64,
}

/// A client's request to book space in a lesson; starts unfulfilled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    #[serde(rename = "_id")]
    pub doc_id: DocId,
    pub id: Value,
    #[serde(rename = "bookedSpaces")]
    pub booked_spaces: i64,
    pub name: String,
    #[serde(rename = "phoneNum")]
    pub phone_num: String,
    pub fulfilled: bool,
}

/// An order as submitted by a client — every field still unchecked.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewOrder {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default, rename = "bookedSpaces")]
    pub booked_spaces: Option<Value>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, rename = "phoneNum")]
    pub phone_num: Option<String>,
}
