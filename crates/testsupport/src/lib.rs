//! Shared fixtures for integration tests: a handful of entity types with
//! hand-written accessor impls, plus small-geometry config helpers.

use common::{Config, FieldId};
use schema::{Entity, EntityDescriptor, Field, IdStrategy, IndexKind};
use typecode::{TypeCode, Value};

/// Small page geometry so tests cross page boundaries early.
pub fn small_config() -> Config {
    Config::builder()
        .page_size(8)
        .max_pages(64)
        .initial_pages(1)
        .build()
}

/// Geometry for the concurrency stress tests.
pub fn stress_config() -> Config {
    Config::builder()
        .page_size(1024)
        .max_pages(128)
        .initial_pages(2)
        .build()
}

#[derive(Clone, Debug, PartialEq, Default)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub first_name: Option<String>,
    pub age: i32,
    pub active: bool,
    pub score: f64,
    pub signed_up: i64,
}

impl User {
    pub fn new(email: &str, age: i32) -> Self {
        User {
            id: 0,
            email: email.into(),
            first_name: None,
            age,
            active: true,
            score: 0.0,
            signed_up: 0,
        }
    }

    pub fn named(mut self, name: &str) -> Self {
        self.first_name = Some(name.into());
        self
    }
}

impl Entity for User {
    fn descriptor() -> EntityDescriptor {
        EntityDescriptor::builder("User", "testsupport::User")
            .id_strategy(IdStrategy::Generated)
            .field(Field::new("id", TypeCode::I64).id())
            .field(Field::new("email", TypeCode::Str).indexed(IndexKind::Hash))
            .field(
                Field::new("first_name", TypeCode::Str)
                    .nullable()
                    .indexed_ignore_case(IndexKind::Prefix),
            )
            .field(Field::new("age", TypeCode::I32).indexed(IndexKind::Range))
            .field(Field::new("active", TypeCode::Bool))
            .field(Field::new("score", TypeCode::F64))
            .field(Field::new("signed_up", TypeCode::Instant))
            .build()
            .expect("user descriptor")
    }

    fn blank() -> Self {
        Self::default()
    }

    fn read_field(&self, field: FieldId) -> Value {
        match field {
            0 => Value::I64(self.id),
            1 => Value::str(&self.email),
            2 => self
                .first_name
                .as_deref()
                .map(Value::str)
                .unwrap_or(Value::Null),
            3 => Value::I32(self.age),
            4 => Value::Bool(self.active),
            5 => Value::F64(self.score),
            6 => Value::Instant(self.signed_up),
            _ => Value::Null,
        }
    }

    fn write_field(&mut self, field: FieldId, value: Value) {
        match field {
            0 => self.id = value.as_i64().unwrap_or(0),
            1 => self.email = value.as_str().unwrap_or_default().to_owned(),
            2 => self.first_name = value.as_str().map(str::to_owned),
            3 => self.age = value.as_i64().unwrap_or(0) as i32,
            4 => self.active = value.as_bool().unwrap_or(false),
            5 => {
                if let Value::F64(v) = value {
                    self.score = v;
                }
            }
            6 => self.signed_up = value.as_i64().unwrap_or(0),
            _ => {}
        }
    }
}

#[derive(Clone, Debug, PartialEq, Default)]
pub struct Product {
    pub id: i64,
    pub sku: String,
    pub name: String,
    pub price: i64,
    pub stocked: bool,
}

impl Product {
    pub fn new(sku: &str, name: &str, price: i64) -> Self {
        Product {
            id: 0,
            sku: sku.into(),
            name: name.into(),
            price,
            stocked: true,
        }
    }
}

impl Entity for Product {
    fn descriptor() -> EntityDescriptor {
        EntityDescriptor::builder("Product", "testsupport::Product")
            .id_strategy(IdStrategy::Generated)
            .field(Field::new("id", TypeCode::I64).id())
            .field(Field::new("sku", TypeCode::Str).indexed(IndexKind::Hash))
            .field(Field::new("name", TypeCode::Str).indexed(IndexKind::Suffix))
            .field(Field::new("price", TypeCode::I64).indexed(IndexKind::Range))
            .field(Field::new("stocked", TypeCode::Bool))
            .build()
            .expect("product descriptor")
    }

    fn blank() -> Self {
        Self::default()
    }

    fn read_field(&self, field: FieldId) -> Value {
        match field {
            0 => Value::I64(self.id),
            1 => Value::str(&self.sku),
            2 => Value::str(&self.name),
            3 => Value::I64(self.price),
            4 => Value::Bool(self.stocked),
            _ => Value::Null,
        }
    }

    fn write_field(&mut self, field: FieldId, value: Value) {
        match field {
            0 => self.id = value.as_i64().unwrap_or(0),
            1 => self.sku = value.as_str().unwrap_or_default().to_owned(),
            2 => self.name = value.as_str().unwrap_or_default().to_owned(),
            3 => self.price = value.as_i64().unwrap_or(0),
            4 => self.stocked = value.as_bool().unwrap_or(false),
            _ => {}
        }
    }
}

#[derive(Clone, Debug, PartialEq, Default)]
pub struct Customer {
    pub id: i64,
    pub name: String,
    pub city: String,
}

impl Customer {
    pub fn new(name: &str, city: &str) -> Self {
        Customer {
            id: 0,
            name: name.into(),
            city: city.into(),
        }
    }
}

impl Entity for Customer {
    fn descriptor() -> EntityDescriptor {
        EntityDescriptor::builder("Customer", "testsupport::Customer")
            .id_strategy(IdStrategy::Generated)
            .field(Field::new("id", TypeCode::I64).id())
            .field(Field::new("name", TypeCode::Str).indexed(IndexKind::Hash))
            .field(Field::new("city", TypeCode::Str))
            .build()
            .expect("customer descriptor")
    }

    fn blank() -> Self {
        Self::default()
    }

    fn read_field(&self, field: FieldId) -> Value {
        match field {
            0 => Value::I64(self.id),
            1 => Value::str(&self.name),
            2 => Value::str(&self.city),
            _ => Value::Null,
        }
    }

    fn write_field(&mut self, field: FieldId, value: Value) {
        match field {
            0 => self.id = value.as_i64().unwrap_or(0),
            1 => self.name = value.as_str().unwrap_or_default().to_owned(),
            2 => self.city = value.as_str().unwrap_or_default().to_owned(),
            _ => {}
        }
    }
}

#[derive(Clone, Debug, PartialEq, Default)]
pub struct Order {
    pub id: i64,
    pub customer_id: i64,
    pub total: i64,
    pub status: String,
}

impl Order {
    pub fn new(customer_id: i64, total: i64, status: &str) -> Self {
        Order {
            id: 0,
            customer_id,
            total,
            status: status.into(),
        }
    }
}

impl Entity for Order {
    fn descriptor() -> EntityDescriptor {
        EntityDescriptor::builder("Order", "testsupport::Order")
            .id_strategy(IdStrategy::Generated)
            .field(Field::new("id", TypeCode::I64).id())
            .field(Field::new("customer", TypeCode::I64).relation("Customer"))
            .field(Field::new("total", TypeCode::I64).indexed(IndexKind::Range))
            .field(Field::new("status", TypeCode::Str))
            .build()
            .expect("order descriptor")
    }

    fn blank() -> Self {
        Self::default()
    }

    fn read_field(&self, field: FieldId) -> Value {
        match field {
            0 => Value::I64(self.id),
            1 => Value::I64(self.customer_id),
            2 => Value::I64(self.total),
            3 => Value::str(&self.status),
            _ => Value::Null,
        }
    }

    fn write_field(&mut self, field: FieldId, value: Value) {
        match field {
            0 => self.id = value.as_i64().unwrap_or(0),
            1 => self.customer_id = value.as_i64().unwrap_or(0),
            2 => self.total = value.as_i64().unwrap_or(0),
            3 => self.status = value.as_str().unwrap_or_default().to_owned(),
            _ => {}
        }
    }
}

#[derive(Clone, Debug, PartialEq, Default)]
pub struct Document {
    pub id: uuid::Uuid,
    pub title: String,
    pub created: i64,
}

impl Document {
    pub fn new(title: &str, created: chrono::DateTime<chrono::Utc>) -> Self {
        Document {
            id: uuid::Uuid::nil(),
            title: title.into(),
            created: created.timestamp_millis(),
        }
    }
}

impl Entity for Document {
    fn descriptor() -> EntityDescriptor {
        EntityDescriptor::builder("Document", "testsupport::Document")
            .id_strategy(IdStrategy::Uuid)
            .field(Field::new("id", TypeCode::Uuid).id())
            .field(Field::new("title", TypeCode::Str))
            .field(Field::new("created", TypeCode::Instant).indexed(IndexKind::Range))
            .build()
            .expect("document descriptor")
    }

    fn blank() -> Self {
        Self::default()
    }

    fn read_field(&self, field: FieldId) -> Value {
        match field {
            0 => Value::Uuid(self.id),
            1 => Value::str(&self.title),
            2 => Value::Instant(self.created),
            _ => Value::Null,
        }
    }

    fn write_field(&mut self, field: FieldId, value: Value) {
        match field {
            0 => {
                if let Value::Uuid(u) = value {
                    self.id = u;
                }
            }
            1 => self.title = value.as_str().unwrap_or_default().to_owned(),
            2 => self.created = value.as_i64().unwrap_or(0),
            _ => {}
        }
    }
}
