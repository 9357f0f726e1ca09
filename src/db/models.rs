//! Diesel row structs for the settings, readings, node metadata and
//! people-history tables.
//!
//! Rows are converted into domain types (`crate::readings::Reading`,
//! `crate::readings::NodeDisplayInfo`) at the store boundary.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema;

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = schema::settings)]
pub struct NewSetting<'a> {
    pub key: &'a str,
    pub value: &'a str,
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = schema::readings)]
pub struct ReadingRow {
    pub id: i64,
    pub time: DateTime<Utc>,
    pub node_id: i64,
    pub temp_c: Option<f64>,
    pub pressure: Option<f64>,
    pub humidity: Option<f64>,
}

#[derive(Debug, Clone, Insertable, Serialize, Deserialize)]
#[diesel(table_name = schema::readings)]
pub struct NewReading {
    pub time: DateTime<Utc>,
    pub node_id: i64,
    pub temp_c: Option<f64>,
    pub pressure: Option<f64>,
    pub humidity: Option<f64>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = schema::node_names)]
#[diesel(primary_key(node_id))]
pub struct NodeName {
    pub node_id: i64,
    pub name: String,
    pub graph_r: i16,
    pub graph_g: i16,
    pub graph_b: i16,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = schema::people_history)]
pub struct NewPeopleSnapshot<'a> {
    pub time: DateTime<Utc>,
    pub person: &'a str,
    pub is_home: bool,
}
