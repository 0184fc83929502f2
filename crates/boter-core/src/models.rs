use std::{cmp::Ordering, fmt::Display, sync::Arc};

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Number, Value};

use crate::backend::BackendError;

/// The body of a document.
pub type Fields = serde_json::Map<String, Value>;

fn split_path(path: &str) -> Result<Vec<&str>, BackendError> {
    let segments: Vec<&str> = path.split('/').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(BackendError::InvalidPath(path.to_string()));
    }
    Ok(segments)
}

/// Path of a collection: `players`, or `players/<id>/notes` for a subcollection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CollectionRef {
    path: Arc<str>,
}

impl CollectionRef {
    pub fn parse(path: &str) -> Result<Self, BackendError> {
        let segments = split_path(path)?;
        if segments.len() % 2 != 1 {
            return Err(BackendError::InvalidPath(path.to_string()));
        }
        Ok(Self { path: Arc::from(path) })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Last path segment.
    pub fn id(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }

    pub fn parent(&self) -> Option<DocumentRef> {
        let (parent, _) = self.path.rsplit_once('/')?;
        Some(DocumentRef { path: Arc::from(parent) })
    }

    /// Document `id` in this collection. `id` must be a single path segment.
    pub fn doc(&self, id: &str) -> Result<DocumentRef, BackendError> {
        let path = format!("{}/{}", self.path, id);
        if id.contains('/') {
            return Err(BackendError::InvalidPath(path));
        }
        DocumentRef::parse(&path)
    }
}

impl Display for CollectionRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.path)
    }
}

/// Path of a single document: `players/<id>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentRef {
    path: Arc<str>,
}

impl DocumentRef {
    pub fn parse(path: &str) -> Result<Self, BackendError> {
        let segments = split_path(path)?;
        if segments.len() % 2 != 0 {
            return Err(BackendError::InvalidPath(path.to_string()));
        }
        Ok(Self { path: Arc::from(path) })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn id(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }

    pub fn parent(&self) -> CollectionRef {
        let parent = self.path.rsplit_once('/').map(|(p, _)| p).unwrap_or(&self.path);
        CollectionRef { path: Arc::from(parent) }
    }

    /// Subcollection scoped under this document.
    pub fn collection(&self, name: &str) -> Result<CollectionRef, BackendError> {
        let path = format!("{}/{}", self.path, name);
        if name.contains('/') {
            return Err(BackendError::InvalidPath(path));
        }
        CollectionRef::parse(&path)
    }
}

impl Display for DocumentRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.path)
    }
}

impl Serialize for DocumentRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.path)
    }
}

impl<'de> Deserialize<'de> for DocumentRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let path = String::deserialize(deserializer)?;
        DocumentRef::parse(&path).map_err(de::Error::custom)
    }
}

impl From<DocumentRef> for Value {
    fn from(reference: DocumentRef) -> Self {
        Value::String(reference.path.to_string())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DocumentSnapshot {
    pub reference: DocumentRef,
    /// `None` when the document does not exist.
    pub fields: Option<Fields>,
}

impl DocumentSnapshot {
    pub fn exists(&self) -> bool {
        self.fields.is_some()
    }

    pub fn id(&self) -> &str {
        self.reference.id()
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct QuerySnapshot {
    pub documents: Vec<DocumentSnapshot>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    ArrayContains,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub field: Arc<str>,
    pub op: FilterOp,
    pub value: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub field: Arc<str>,
    pub direction: Direction,
}

/// A filtered, ordered view over one collection.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub collection: CollectionRef,
    pub filters: Vec<Filter>,
    pub order_by: Vec<OrderBy>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn new(collection: CollectionRef) -> Self {
        Self {
            collection,
            filters: Vec::new(),
            order_by: Vec::new(),
            limit: None,
        }
    }

    pub fn filter(mut self, field: &str, op: FilterOp, value: impl Into<Value>) -> Self {
        self.filters.push(Filter {
            field: Arc::from(field),
            op,
            value: value.into(),
        });
        self
    }

    pub fn order_by(mut self, field: &str, direction: Direction) -> Self {
        self.order_by.push(OrderBy {
            field: Arc::from(field),
            direction,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, fields: &Fields) -> bool {
        self.filters.iter().all(|filter| {
            let Some(actual) = lookup(fields, &filter.field) else {
                return false;
            };
            match filter.op {
                FilterOp::ArrayContains => match actual {
                    Value::Array(items) => items.iter().any(|v| compare_values(v, &filter.value) == Ordering::Equal),
                    _ => false,
                },
                FilterOp::Equal => compare_values(actual, &filter.value) == Ordering::Equal,
                FilterOp::NotEqual => compare_values(actual, &filter.value) != Ordering::Equal,
                op => {
                    if kind_rank(actual) != kind_rank(&filter.value) {
                        return false;
                    }
                    let ord = compare_values(actual, &filter.value);
                    match op {
                        FilterOp::LessThan => ord == Ordering::Less,
                        FilterOp::LessThanOrEqual => ord != Ordering::Greater,
                        FilterOp::GreaterThan => ord == Ordering::Greater,
                        _ => ord != Ordering::Less,
                    }
                }
            }
        })
    }

    /// Filters, orders and limits candidates given in document-id order.
    pub fn evaluate(&self, candidates: Vec<DocumentSnapshot>) -> QuerySnapshot {
        let mut documents: Vec<DocumentSnapshot> = candidates
            .into_iter()
            .filter(|doc| doc.fields.as_ref().is_some_and(|f| self.matches(f)))
            .collect();

        if !self.order_by.is_empty() {
            documents.sort_by(|a, b| {
                for clause in &self.order_by {
                    let left = a.fields.as_ref().and_then(|f| lookup(f, &clause.field));
                    let right = b.fields.as_ref().and_then(|f| lookup(f, &clause.field));
                    let ord = match (left, right) {
                        (None, None) => Ordering::Equal,
                        (None, Some(_)) => Ordering::Less,
                        (Some(_), None) => Ordering::Greater,
                        (Some(l), Some(r)) => compare_values(l, r),
                    };
                    let ord = match clause.direction {
                        Direction::Ascending => ord,
                        Direction::Descending => ord.reverse(),
                    };
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                Ordering::Equal
            });
        }

        if let Some(limit) = self.limit {
            documents.truncate(limit);
        }

        QuerySnapshot { documents }
    }
}

/// Resolves a dotted field path such as `address.city`.
fn lookup<'a>(fields: &'a Fields, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let mut current = fields.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

fn kind_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Total order over JSON values: values of different kinds order by kind.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Bool(l), Value::Bool(r)) => l.cmp(r),
        (Value::Number(l), Value::Number(r)) => compare_numbers(l, r),
        (Value::String(l), Value::String(r)) => l.cmp(r),
        (Value::Array(l), Value::Array(r)) => {
            for (x, y) in l.iter().zip(r.iter()) {
                let ord = compare_values(x, y);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            l.len().cmp(&r.len())
        }
        (Value::Object(l), Value::Object(r)) => {
            let mut l: Vec<(&String, &Value)> = l.iter().collect();
            let mut r: Vec<(&String, &Value)> = r.iter().collect();
            l.sort_by(|x, y| x.0.cmp(y.0));
            r.sort_by(|x, y| x.0.cmp(y.0));
            for ((lk, lv), (rk, rv)) in l.iter().zip(r.iter()) {
                let ord = lk.cmp(rk).then_with(|| compare_values(lv, rv));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            l.len().cmp(&r.len())
        }
        _ => kind_rank(a).cmp(&kind_rank(b)),
    }
}

/// Integers compare exactly; floats only when either side is fractional.
fn compare_numbers(l: &Number, r: &Number) -> Ordering {
    match (l.as_i64(), r.as_i64(), l.as_u64(), r.as_u64()) {
        (Some(a), Some(b), _, _) => return a.cmp(&b),
        (_, _, Some(a), Some(b)) => return a.cmp(&b),
        // Negative on one side, above i64::MAX on the other.
        (Some(_), None, None, Some(_)) => return Ordering::Less,
        (None, Some(_), Some(_), None) => return Ordering::Greater,
        _ => {}
    }
    match (l.as_f64(), r.as_f64()) {
        (Some(a), Some(b)) => a.partial_cmp(&b).unwrap_or_else(|| a.total_cmp(&b)),
        _ => Ordering::Equal,
    }
}
