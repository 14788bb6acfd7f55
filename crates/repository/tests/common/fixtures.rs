//! Test fixtures for repository testing.
//!
//! This module provides the aggregate types used across the integration
//! tests, along with builders for creating custom test data.

use helios_repository::model::{AggregateRoot, ReferenceProperty};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An owned value object, stored inside its person.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Address {
    /// Street line.
    pub street: String,
    /// City.
    pub city: String,
}

impl Address {
    /// Creates an address.
    pub fn new(street: impl Into<String>, city: impl Into<String>) -> Self {
        Self {
            street: street.into(),
            city: city.into(),
        }
    }
}

/// An aggregate keyed by UUID.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Company {
    /// Key, generated on add.
    pub id: Option<Uuid>,
    /// Company name.
    pub name: String,
    /// Year of founding.
    pub founded: i32,
}

impl Company {
    /// Creates a company without a key.
    pub fn new(name: impl Into<String>, founded: i32) -> Self {
        Self {
            id: None,
            name: name.into(),
            founded,
        }
    }
}

impl AggregateRoot for Company {
    type Key = Uuid;
    const AGGREGATE_TYPE: &'static str = "Company";

    fn id(&self) -> Option<&Uuid> {
        self.id.as_ref()
    }

    fn set_id(&mut self, key: Uuid) {
        self.id = Some(key);
    }
}

/// An aggregate keyed by sequence number, referencing its employer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Person {
    /// Key, generated on add.
    pub id: Option<i64>,
    /// Display name.
    pub name: String,
    /// Age in years.
    pub age: u32,
    /// Optional e-mail address.
    pub email: Option<String>,
    /// Owned postal address.
    pub address: Option<Address>,
    /// Referenced employer aggregate.
    pub employer: Option<Company>,
}

impl Person {
    /// Creates a person without a key.
    pub fn new(name: impl Into<String>, age: u32) -> Self {
        Self {
            id: None,
            name: name.into(),
            age,
            email: None,
            address: None,
            employer: None,
        }
    }

    /// Sets the key.
    pub fn with_id(mut self, id: i64) -> Self {
        self.id = Some(id);
        self
    }

    /// Sets the e-mail address.
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Sets the address.
    pub fn with_address(mut self, address: Address) -> Self {
        self.address = Some(address);
        self
    }

    /// Sets the employer.
    pub fn with_employer(mut self, employer: Company) -> Self {
        self.employer = Some(employer);
        self
    }
}

impl AggregateRoot for Person {
    type Key = i64;
    const AGGREGATE_TYPE: &'static str = "Person";
    const REFERENCES: &'static [ReferenceProperty] =
        &[ReferenceProperty::new("employer", "Company")];

    fn id(&self) -> Option<&i64> {
        self.id.as_ref()
    }

    fn set_id(&mut self, key: i64) {
        self.id = Some(key);
    }
}

/// Four people with distinct ages, in insertion order.
///
/// Ages: Ann 30, Bob 25, Carla 41, Dan 17 (sum 113).
pub fn people() -> Vec<Person> {
    vec![
        Person::new("Ann", 30)
            .with_email("ann@example.com")
            .with_address(Address::new("Main St 1", "Berlin")),
        Person::new("Bob", 25),
        Person::new("Carla", 41).with_address(Address::new("Rue 7", "Paris")),
        Person::new("Dan", 17),
    ]
}
