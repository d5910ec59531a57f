//! Filter builder
//!
//! Builds filter documents with MongoDB-style operators. The server evaluates them;
//! the client only lowers the builder to a [`Document`].

use crate::document::{Document, Value};

/// Filter condition for queries
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(String, Value),
    Ne(String, Value),
    Gt(String, Value),
    Gte(String, Value),
    Lt(String, Value),
    Lte(String, Value),
    In(String, Vec<Value>),
    NotIn(String, Vec<Value>),
    Exists(String, bool),
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
}

impl Filter {
    /// Lower the filter to a filter document.
    ///
    /// Equality becomes a plain `{field: value}` match; everything else uses an
    /// operator sub-document such as `{field: {"$gt": value}}`.
    pub fn into_document(self) -> Document {
        match self {
            Filter::Eq(field, value) => Document::new().with(field, value),
            Filter::Ne(field, value) => operator(field, "$ne", value),
            Filter::Gt(field, value) => operator(field, "$gt", value),
            Filter::Gte(field, value) => operator(field, "$gte", value),
            Filter::Lt(field, value) => operator(field, "$lt", value),
            Filter::Lte(field, value) => operator(field, "$lte", value),
            Filter::In(field, values) => operator(field, "$in", values),
            Filter::NotIn(field, values) => operator(field, "$nin", values),
            Filter::Exists(field, value) => operator(field, "$exists", value),
            Filter::And(conditions) => combine("$and", conditions),
            Filter::Or(conditions) => combine("$or", conditions),
            Filter::Not(condition) => Document::new().with("$not", condition.into_document()),
        }
    }
}

impl From<Filter> for Document {
    fn from(filter: Filter) -> Self {
        filter.into_document()
    }
}

fn operator(field: String, op: &str, value: impl Into<Value>) -> Document {
    Document::new().with(field, Document::new().with(op, value))
}

fn combine(op: &str, conditions: Vec<Filter>) -> Document {
    let parts: Vec<Value> = conditions
        .into_iter()
        .map(|c| Value::Document(c.into_document()))
        .collect();
    Document::new().with(op, parts)
}

/// Field expression builder for fluent filter construction
pub struct Field {
    name: String,
}

impl Field {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn eq(self, value: impl Into<Value>) -> Filter {
        Filter::Eq(self.name, value.into())
    }

    pub fn ne(self, value: impl Into<Value>) -> Filter {
        Filter::Ne(self.name, value.into())
    }

    pub fn gt(self, value: impl Into<Value>) -> Filter {
        Filter::Gt(self.name, value.into())
    }

    pub fn gte(self, value: impl Into<Value>) -> Filter {
        Filter::Gte(self.name, value.into())
    }

    pub fn lt(self, value: impl Into<Value>) -> Filter {
        Filter::Lt(self.name, value.into())
    }

    pub fn lte(self, value: impl Into<Value>) -> Filter {
        Filter::Lte(self.name, value.into())
    }

    pub fn is_in(self, values: Vec<Value>) -> Filter {
        Filter::In(self.name, values)
    }

    pub fn not_in(self, values: Vec<Value>) -> Filter {
        Filter::NotIn(self.name, values)
    }

    pub fn exists(self, value: bool) -> Filter {
        Filter::Exists(self.name, value)
    }
}

/// Create a field expression
pub fn field(name: impl Into<String>) -> Field {
    Field::new(name)
}

/// Combine filters with AND
pub fn and(filters: Vec<Filter>) -> Filter {
    Filter::And(filters)
}

/// Combine filters with OR
pub fn or(filters: Vec<Filter>) -> Filter {
    Filter::Or(filters)
}

/// Negate a filter
pub fn not(filter: Filter) -> Filter {
    Filter::Not(Box::new(filter))
}
