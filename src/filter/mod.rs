//! Metadata predicate engine.
//!
//! Filters over chunk metadata are expressed in a small algebraic language:
//! comparison leaves (`$eq`, `$ne`, `$gt`, `$gte`, `$lt`, `$lte`, `$in`,
//! `$nin`, `$contains`) combined with `$and`, `$or`, and `$not`.
//!
//! The vector store natively evaluates every operator except `$contains`.
//! [`Predicate::split`] is the only place that knows this: it partitions a
//! predicate into a store-native part and a client-side residual, and
//! expanding the store's capability changes only that function. The
//! client-side evaluator [`Predicate::matches`] is complete over all
//! operators, with a case-insensitive `$contains`.
//!
//! `year` uses the sentinel `-1` for "unknown"; because year filters are
//! built as `$gte`/`$lte` against 4-digit years, unknown-year items never
//! match a year range.

use std::collections::BTreeMap;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::types::{AppError, Result};

// ============================================================================
// Metadata Values
// ============================================================================

/// A scalar metadata value. Chunk metadata is a flat mapping, never nested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    /// Boolean scalar.
    Bool(bool),
    /// Integer scalar (`year`, `chunk_idx`, `page`).
    Int(i64),
    /// Floating-point scalar.
    Float(f64),
    /// String scalar (`title`, `authors`, pipe-delimited `tags`, ...).
    Str(String),
}

impl MetaValue {
    /// String view used by `$contains`.
    pub fn to_display_string(&self) -> String {
        match self {
            MetaValue::Bool(b) => b.to_string(),
            MetaValue::Int(i) => i.to_string(),
            MetaValue::Float(f) => f.to_string(),
            MetaValue::Str(s) => s.clone(),
        }
    }

    /// Integer view, if this value is an integer.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            MetaValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// String view, if this value is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetaValue::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Loose equality: integers and floats compare numerically.
    fn loose_eq(&self, other: &MetaValue) -> bool {
        match (self, other) {
            (MetaValue::Int(a), MetaValue::Float(b)) | (MetaValue::Float(b), MetaValue::Int(a)) => {
                (*a as f64) == *b
            }
            (a, b) => a == b,
        }
    }

    /// Ordering for range operators. Strings order lexically, numbers
    /// numerically; mixed kinds are unordered.
    fn loose_cmp(&self, other: &MetaValue) -> Option<std::cmp::Ordering> {
        match (self, other) {
            (MetaValue::Int(a), MetaValue::Int(b)) => Some(a.cmp(b)),
            (MetaValue::Float(a), MetaValue::Float(b)) => a.partial_cmp(b),
            (MetaValue::Int(a), MetaValue::Float(b)) => (*a as f64).partial_cmp(b),
            (MetaValue::Float(a), MetaValue::Int(b)) => a.partial_cmp(&(*b as f64)),
            (MetaValue::Str(a), MetaValue::Str(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

impl From<&str> for MetaValue {
    fn from(s: &str) -> Self {
        MetaValue::Str(s.to_string())
    }
}

impl From<String> for MetaValue {
    fn from(s: String) -> Self {
        MetaValue::Str(s)
    }
}

impl From<i64> for MetaValue {
    fn from(i: i64) -> Self {
        MetaValue::Int(i)
    }
}

/// Flat metadata mapping attached to each chunk.
pub type Metadata = BTreeMap<String, MetaValue>;

// ============================================================================
// Predicate Language
// ============================================================================

/// Comparison operator in a predicate leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    /// `$eq`
    Eq,
    /// `$ne`
    Ne,
    /// `$gt`
    Gt,
    /// `$gte`
    Gte,
    /// `$lt`
    Lt,
    /// `$lte`
    Lte,
    /// `$in`
    In,
    /// `$nin`
    Nin,
    /// `$contains` - substring match, not store-native.
    Contains,
}

impl CmpOp {
    /// The `$`-prefixed wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            CmpOp::Eq => "$eq",
            CmpOp::Ne => "$ne",
            CmpOp::Gt => "$gt",
            CmpOp::Gte => "$gte",
            CmpOp::Lt => "$lt",
            CmpOp::Lte => "$lte",
            CmpOp::In => "$in",
            CmpOp::Nin => "$nin",
            CmpOp::Contains => "$contains",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "$eq" => Some(CmpOp::Eq),
            "$ne" => Some(CmpOp::Ne),
            "$gt" => Some(CmpOp::Gt),
            "$gte" => Some(CmpOp::Gte),
            "$lt" => Some(CmpOp::Lt),
            "$lte" => Some(CmpOp::Lte),
            "$in" => Some(CmpOp::In),
            "$nin" => Some(CmpOp::Nin),
            "$contains" => Some(CmpOp::Contains),
            _ => None,
        }
    }
}

/// Right-hand side of a comparison: a scalar, or a list for `$in`/`$nin`.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    /// Single scalar target.
    Scalar(MetaValue),
    /// List target for membership operators.
    List(Vec<MetaValue>),
}

/// A metadata filter expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// All sub-predicates must match.
    And(Vec<Predicate>),
    /// At least one sub-predicate must match.
    Or(Vec<Predicate>),
    /// The sub-predicate must not match.
    Not(Box<Predicate>),
    /// Leaf comparison `{field: {op: value}}`.
    Cmp {
        /// Metadata field name.
        field: String,
        /// Comparison operator.
        op: CmpOp,
        /// Comparison target.
        value: FilterValue,
    },
}

impl Predicate {
    /// Leaf constructor.
    pub fn cmp(field: impl Into<String>, op: CmpOp, value: FilterValue) -> Self {
        Predicate::Cmp {
            field: field.into(),
            op,
            value,
        }
    }

    /// `$contains` leaf constructor.
    pub fn contains(field: impl Into<String>, needle: impl Into<String>) -> Self {
        Predicate::cmp(
            field,
            CmpOp::Contains,
            FilterValue::Scalar(MetaValue::Str(needle.into())),
        )
    }

    /// Whether any leaf of this predicate uses `$contains`.
    pub fn has_contains(&self) -> bool {
        match self {
            Predicate::And(ps) | Predicate::Or(ps) => ps.iter().any(Predicate::has_contains),
            Predicate::Not(p) => p.has_contains(),
            Predicate::Cmp { op, .. } => *op == CmpOp::Contains,
        }
    }

    /// Partition into `(store_part, client_part)`.
    ///
    /// The store part contains no `$contains`. A disjunction containing any
    /// `$contains` moves to the client side as a whole, because an `$or`
    /// cannot be split without changing its meaning.
    pub fn split(pred: Option<&Predicate>) -> (Option<Predicate>, Option<Predicate>) {
        let Some(pred) = pred else {
            return (None, None);
        };

        let (store, client): (Vec<Predicate>, Vec<Predicate>) = match pred {
            Predicate::And(children) => {
                children.iter().cloned().partition(|c| !c.has_contains())
            }
            other => {
                if other.has_contains() {
                    (vec![], vec![other.clone()])
                } else {
                    (vec![other.clone()], vec![])
                }
            }
        };

        (Self::conjoin(store), Self::conjoin(client))
    }

    fn conjoin(mut preds: Vec<Predicate>) -> Option<Predicate> {
        match preds.len() {
            0 => None,
            1 => Some(preds.remove(0)),
            _ => Some(Predicate::And(preds)),
        }
    }

    /// Conjunctive merge with None-pass-through.
    pub fn merge(a: Option<Predicate>, b: Option<Predicate>) -> Option<Predicate> {
        match (a, b) {
            (None, None) => None,
            (Some(p), None) | (None, Some(p)) => Some(p),
            (Some(p), Some(q)) => Some(Predicate::And(vec![p, q])),
        }
    }

    /// Full client-side evaluator over all operators.
    ///
    /// A missing field never matches a comparison. `$contains` is
    /// case-insensitive.
    pub fn matches(&self, metadata: &Metadata) -> bool {
        match self {
            Predicate::And(ps) => ps.iter().all(|p| p.matches(metadata)),
            Predicate::Or(ps) => ps.iter().any(|p| p.matches(metadata)),
            Predicate::Not(p) => !p.matches(metadata),
            Predicate::Cmp { field, op, value } => {
                let Some(actual) = metadata.get(field) else {
                    return false;
                };
                Self::compare(actual, *op, value)
            }
        }
    }

    fn compare(actual: &MetaValue, op: CmpOp, target: &FilterValue) -> bool {
        use std::cmp::Ordering;

        match (op, target) {
            (CmpOp::Eq, FilterValue::Scalar(t)) => actual.loose_eq(t),
            (CmpOp::Ne, FilterValue::Scalar(t)) => !actual.loose_eq(t),
            (CmpOp::Gt, FilterValue::Scalar(t)) => {
                actual.loose_cmp(t) == Some(Ordering::Greater)
            }
            (CmpOp::Gte, FilterValue::Scalar(t)) => {
                matches!(actual.loose_cmp(t), Some(Ordering::Greater | Ordering::Equal))
            }
            (CmpOp::Lt, FilterValue::Scalar(t)) => actual.loose_cmp(t) == Some(Ordering::Less),
            (CmpOp::Lte, FilterValue::Scalar(t)) => {
                matches!(actual.loose_cmp(t), Some(Ordering::Less | Ordering::Equal))
            }
            (CmpOp::Contains, FilterValue::Scalar(t)) => {
                let haystack = actual.to_display_string().to_lowercase();
                let needle = t.to_display_string().to_lowercase();
                haystack.contains(&needle)
            }
            (CmpOp::In, FilterValue::List(ts)) => ts.iter().any(|t| actual.loose_eq(t)),
            (CmpOp::Nin, FilterValue::List(ts)) => !ts.iter().any(|t| actual.loose_eq(t)),
            // Membership against a scalar degenerates to equality.
            (CmpOp::In, FilterValue::Scalar(t)) => actual.loose_eq(t),
            (CmpOp::Nin, FilterValue::Scalar(t)) => !actual.loose_eq(t),
            // Range/contains against a list target never matches.
            _ => false,
        }
    }

    // ------------------------------------------------------------------
    // JSON wire format
    // ------------------------------------------------------------------

    /// Render to the `{field: {"$op": value}}` / `{"$and": [...]}` shape.
    pub fn to_value(&self) -> Value {
        match self {
            Predicate::And(ps) => serde_json::json!({
                "$and": ps.iter().map(Predicate::to_value).collect::<Vec<_>>()
            }),
            Predicate::Or(ps) => serde_json::json!({
                "$or": ps.iter().map(Predicate::to_value).collect::<Vec<_>>()
            }),
            Predicate::Not(p) => serde_json::json!({ "$not": p.to_value() }),
            Predicate::Cmp { field, op, value } => {
                let target = match value {
                    FilterValue::Scalar(v) => serde_json::to_value(v).unwrap_or(Value::Null),
                    FilterValue::List(vs) => {
                        Value::Array(vs.iter().filter_map(|v| serde_json::to_value(v).ok()).collect())
                    }
                };
                serde_json::json!({ field: { op.as_str(): target } })
            }
        }
    }

    /// Parse and validate the JSON wire shape.
    pub fn from_value(value: &Value) -> Result<Predicate> {
        let obj = value
            .as_object()
            .ok_or_else(|| AppError::InvalidInput("filter must be a JSON object".to_string()))?;
        if obj.len() != 1 {
            return Err(AppError::InvalidInput(
                "filter object must have exactly one key".to_string(),
            ));
        }
        let (key, inner) = obj.iter().next().expect("checked len above");

        match key.as_str() {
            "$and" | "$or" => {
                let items = inner.as_array().ok_or_else(|| {
                    AppError::InvalidInput(format!("{key} requires a list of filters"))
                })?;
                let parsed = items
                    .iter()
                    .map(Predicate::from_value)
                    .collect::<Result<Vec<_>>>()?;
                if key == "$and" {
                    Ok(Predicate::And(parsed))
                } else {
                    Ok(Predicate::Or(parsed))
                }
            }
            "$not" => Ok(Predicate::Not(Box::new(Predicate::from_value(inner)?))),
            field => {
                let cond = inner.as_object().ok_or_else(|| {
                    AppError::InvalidInput(format!("condition for field '{field}' must be an object"))
                })?;
                if cond.len() != 1 {
                    return Err(AppError::InvalidInput(format!(
                        "condition for field '{field}' must have exactly one operator"
                    )));
                }
                let (op_str, target) = cond.iter().next().expect("checked len above");
                let op = CmpOp::parse(op_str).ok_or_else(|| {
                    AppError::InvalidInput(format!("unknown filter operator '{op_str}'"))
                })?;
                let value = match target {
                    Value::Array(items) => FilterValue::List(
                        items
                            .iter()
                            .map(|v| {
                                serde_json::from_value::<MetaValue>(v.clone()).map_err(|_| {
                                    AppError::InvalidInput(format!(
                                        "unsupported filter value in list for '{field}'"
                                    ))
                                })
                            })
                            .collect::<Result<Vec<_>>>()?,
                    ),
                    other => FilterValue::Scalar(
                        serde_json::from_value::<MetaValue>(other.clone()).map_err(|_| {
                            AppError::InvalidInput(format!(
                                "unsupported filter value for '{field}'"
                            ))
                        })?,
                    ),
                };
                Ok(Predicate::Cmp {
                    field: field.to_string(),
                    op,
                    value,
                })
            }
        }
    }
}

impl Serialize for Predicate {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Predicate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Predicate::from_value(&value).map_err(|e| D::Error::custom(e.to_string()))
    }
}

// ============================================================================
// Filter Builder
// ============================================================================

/// Structured filter arguments, as produced by the Scope panel or by the
/// LM metadata extractor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterArgs {
    /// Earliest year, inclusive.
    #[serde(default)]
    pub year_min: Option<i64>,
    /// Latest year, inclusive.
    #[serde(default)]
    pub year_max: Option<i64>,
    /// Topic tags; any tag matches.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Collection names; any collection matches.
    #[serde(default)]
    pub collections: Vec<String>,
    /// Author substring.
    #[serde(default)]
    pub author: Option<String>,
    /// Title substring.
    #[serde(default)]
    pub title: Option<String>,
    /// Item types, UI labels or internal names.
    #[serde(default)]
    pub item_types: Vec<String>,
    /// Whether any actionable filter is present.
    #[serde(default)]
    pub has_filters: bool,
}

impl FilterArgs {
    /// The empty-filter sentinel returned on extraction failure.
    pub fn empty() -> Self {
        Self::default()
    }

    /// True when no field carries a filter.
    pub fn is_empty(&self) -> bool {
        self.year_min.is_none()
            && self.year_max.is_none()
            && self.tags.is_empty()
            && self.collections.is_empty()
            && self.author.is_none()
            && self.title.is_none()
            && self.item_types.is_empty()
    }

    /// Recompute `has_filters` from the field contents.
    pub fn with_flag(mut self) -> Self {
        self.has_filters = !self.is_empty();
        self
    }
}

/// Map a UI display label to the catalogue-internal item type name.
/// Unrecognised inputs are assumed to already be internal names.
pub fn canonical_item_type(label: &str) -> String {
    match label {
        "Journal Article" => "journalArticle",
        "Book" => "book",
        "Book Section" => "bookSection",
        "Conference Paper" => "conferencePaper",
        "Thesis" => "thesis",
        "Preprint" => "preprint",
        "Web Page" => "webpage",
        "Report" => "report",
        "Presentation" => "presentation",
        "Manuscript" => "manuscript",
        other => other,
    }
    .to_string()
}

/// Assemble a conjunction over the given filter arguments.
///
/// Tags and collections become `$contains` disjunctions, because the store
/// keeps them as pipe-delimited strings. Item types use the store-native
/// `$in`. Returns None when no filter is present.
pub fn build_predicate(args: &FilterArgs) -> Option<Predicate> {
    let mut conditions = Vec::new();

    // Year range. The -1 "unknown" sentinel can never satisfy a $gte against
    // a 4-digit year, so unknown-year items are excluded automatically.
    if let Some(year_min) = args.year_min {
        conditions.push(Predicate::cmp(
            "year",
            CmpOp::Gte,
            FilterValue::Scalar(MetaValue::Int(year_min)),
        ));
    }
    if let Some(year_max) = args.year_max {
        conditions.push(Predicate::cmp(
            "year",
            CmpOp::Lte,
            FilterValue::Scalar(MetaValue::Int(year_max)),
        ));
    }

    if !args.tags.is_empty() {
        conditions.push(any_contains("tags", &args.tags));
    }
    if !args.collections.is_empty() {
        conditions.push(any_contains("collections", &args.collections));
    }

    if let Some(title) = args.title.as_deref().filter(|t| !t.is_empty()) {
        conditions.push(Predicate::contains("title", title));
    }
    if let Some(author) = args.author.as_deref().filter(|a| !a.is_empty()) {
        conditions.push(Predicate::contains("authors", author));
    }

    if !args.item_types.is_empty() {
        let internal: Vec<MetaValue> = args
            .item_types
            .iter()
            .map(|t| MetaValue::Str(canonical_item_type(t)))
            .collect();
        let pred = if internal.len() == 1 {
            Predicate::cmp(
                "item_type",
                CmpOp::Eq,
                FilterValue::Scalar(internal.into_iter().next().expect("len == 1")),
            )
        } else {
            Predicate::cmp("item_type", CmpOp::In, FilterValue::List(internal))
        };
        conditions.push(pred);
    }

    Predicate::conjoin(conditions)
}

fn any_contains(field: &str, needles: &[String]) -> Predicate {
    let mut leaves: Vec<Predicate> = needles
        .iter()
        .map(|n| Predicate::contains(field, n.clone()))
        .collect();
    if leaves.len() == 1 {
        leaves.remove(0)
    } else {
        Predicate::Or(leaves)
    }
}

/// Human-readable one-line summary of active filters, for logging.
pub fn format_filters_for_display(args: &FilterArgs) -> String {
    let mut parts = Vec::new();

    match (args.year_min, args.year_max) {
        (Some(min), Some(max)) if min == max => parts.push(format!("Year: {min}")),
        (Some(min), Some(max)) => parts.push(format!("Year: {min}-{max}")),
        (Some(min), None) => parts.push(format!("Year: {min}+")),
        (None, Some(max)) => parts.push(format!("Year: <={max}")),
        (None, None) => {}
    }
    if !args.tags.is_empty() {
        parts.push(format!("Tags: {}", args.tags.join(", ")));
    }
    if !args.collections.is_empty() {
        parts.push(format!("Collections: {}", args.collections.join(", ")));
    }
    if let Some(author) = &args.author {
        parts.push(format!("Author: {author}"));
    }
    if let Some(title) = &args.title {
        parts.push(format!("Title: {title}"));
    }
    if !args.item_types.is_empty() {
        parts.push(format!("Types: {}", args.item_types.join(", ")));
    }

    if parts.is_empty() {
        "No filters".to_string()
    } else {
        parts.join(" | ")
    }
}

// ============================================================================
// Tests
// ============================================================================
