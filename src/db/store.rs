//! Postgres-backed implementation of the store traits.
//!
//! Each call checks a connection out of the pool and runs independently; no
//! transaction spans more than one call. Concurrent writers to the same
//! setting resolve as last-writer-wins through the upsert.

use crate::clock::{Clock, SystemClock, window_start};
use crate::db::error::StoreError;
use crate::db::models::{NewPeopleSnapshot, NewReading, NewSetting, NodeName, ReadingRow};
use crate::occupancy::{Housemate, PresenceLog};
use crate::readings::{Measurements, NodeDisplayInfo, Reading, ReadingStore, Rgb};
use crate::schema;
use crate::settings::{SettingKey, SettingsStore};
use chrono::{DateTime, Duration, Utc};
use diesel::PgConnection;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool, PooledConnection};
use std::time::Duration as StdDuration;

pub type PgPool = Pool<ConnectionManager<PgConnection>>;

/// Rows are stamped and windows are measured with the store's clock.
#[derive(Clone)]
pub struct PgStore<C: Clock = SystemClock> {
    pool: PgPool,
    clock: C,
}

impl PgStore {
    pub fn connect(database_url: &str, max_size: u32, timeout: StdDuration) -> Result<Self, StoreError> {
        let manager = ConnectionManager::<PgConnection>::new(database_url);
        let pool = Pool::builder()
            .max_size(max_size)
            .connection_timeout(timeout)
            .build(manager)?;
        Ok(PgStore::with_pool(pool, SystemClock))
    }
}

impl<C: Clock> PgStore<C> {
    pub fn with_pool(pool: PgPool, clock: C) -> Self {
        PgStore { pool, clock }
    }

    pub fn conn(&self) -> Result<PooledConnection<ConnectionManager<PgConnection>>, StoreError> {
        Ok(self.pool.get()?)
    }

    fn since(&self, within: Duration) -> DateTime<Utc> {
        window_start(self.clock.now(), within)
    }
}

impl From<ReadingRow> for Reading {
    fn from(row: ReadingRow) -> Self {
        Reading {
            id: row.id,
            time: row.time,
            node_id: row.node_id,
            temp_c: row.temp_c,
            pressure: row.pressure,
            humidity: row.humidity,
        }
    }
}

fn channel(v: i16) -> u8 {
    v.clamp(0, u8::MAX as i16) as u8
}

impl From<NodeName> for NodeDisplayInfo {
    fn from(row: NodeName) -> Self {
        NodeDisplayInfo {
            name: row.name,
            color: Rgb {
                r: channel(row.graph_r),
                g: channel(row.graph_g),
                b: channel(row.graph_b),
            },
        }
    }
}

impl<C: Clock> SettingsStore for PgStore<C> {
    fn get_value(&self, key: &str) -> Result<Option<String>, StoreError> {
        use schema::settings::dsl as S;

        let mut conn = self.conn()?;
        let value = S::settings
            .filter(S::key.eq(key))
            .select(S::value)
            .first::<String>(&mut conn)
            .optional()?;
        Ok(value)
    }

    fn put_value(&self, key: &str, value: &str) -> Result<(), StoreError> {
        use schema::settings::dsl as S;

        let mut conn = self.conn()?;
        diesel::insert_into(S::settings)
            .values(&NewSetting { key, value })
            .on_conflict(S::key)
            .do_update()
            .set((S::value.eq(value), S::updated_at.eq(self.clock.now())))
            .execute(&mut conn)?;
        Ok(())
    }
}

impl<C: Clock> ReadingStore for PgStore<C> {
    fn insert_reading(&self, node_id: i64, values: &Measurements) -> Result<Reading, StoreError> {
        use schema::readings::dsl as R;

        let mut conn = self.conn()?;
        let row = NewReading {
            time: self.clock.now(),
            node_id,
            temp_c: values.temp_c,
            pressure: values.pressure,
            humidity: values.humidity,
        };
        let stored: ReadingRow = diesel::insert_into(R::readings)
            .values(&row)
            .returning(ReadingRow::as_returning())
            .get_result(&mut conn)?;
        Ok(stored.into())
    }

    fn latest_per_node(&self, within: Duration) -> Result<Vec<Reading>, StoreError> {
        use schema::readings::dsl as R;

        let mut conn = self.conn()?;
        let since = self.since(within);
        let rows: Vec<ReadingRow> = R::readings
            .select(ReadingRow::as_select())
            .filter(R::time.gt(since))
            .distinct_on(R::node_id)
            .order_by((R::node_id, R::time.desc(), R::id.desc()))
            .load(&mut conn)?;
        Ok(rows.into_iter().map(Reading::from).collect())
    }

    fn latest(&self) -> Result<Option<Reading>, StoreError> {
        use schema::readings::dsl as R;

        let Some(primary) = self.get_int(SettingKey::PrimaryNode.as_str())? else {
            return Ok(None);
        };
        let mut conn = self.conn()?;
        let row: Option<ReadingRow> = R::readings
            .filter(R::node_id.eq(primary))
            .order_by((R::time.desc(), R::id.desc()))
            .select(ReadingRow::as_select())
            .first(&mut conn)
            .optional()?;
        Ok(row.map(Reading::from))
    }

    fn active_nodes(&self, within: Duration) -> Result<Vec<i64>, StoreError> {
        use schema::readings::dsl as R;

        let mut conn = self.conn()?;
        let since = self.since(within);
        let ids = R::readings
            .filter(R::time.gt(since))
            .select(R::node_id)
            .distinct()
            .order_by(R::node_id.asc())
            .load::<i64>(&mut conn)?;
        Ok(ids)
    }

    fn node_series(&self, node_id: i64, within: Duration) -> Result<Vec<Reading>, StoreError> {
        use schema::readings::dsl as R;

        let mut conn = self.conn()?;
        let since = self.since(within);
        let rows: Vec<ReadingRow> = R::readings
            .filter(R::node_id.eq(node_id).and(R::time.gt(since)))
            .order_by((R::time.asc(), R::id.asc()))
            .select(ReadingRow::as_select())
            .load(&mut conn)?;
        Ok(rows.into_iter().map(Reading::from).collect())
    }

    fn node_info(&self, node_id: i64) -> Result<Option<NodeDisplayInfo>, StoreError> {
        use schema::node_names::dsl as N;

        let mut conn = self.conn()?;
        let row: Option<NodeName> = N::node_names
            .find(node_id)
            .select(NodeName::as_select())
            .first(&mut conn)
            .optional()?;
        Ok(row.map(NodeDisplayInfo::from))
    }
}

impl<C: Clock> PresenceLog for PgStore<C> {
    fn record_presence(&self, at: DateTime<Utc>, people: &[Housemate]) -> Result<(), StoreError> {
        use schema::people_history::dsl as P;

        if people.is_empty() {
            return Ok(());
        }
        let rows: Vec<NewPeopleSnapshot<'_>> = people
            .iter()
            .map(|p| NewPeopleSnapshot {
                time: at,
                person: &p.id,
                is_home: p.is_home,
            })
            .collect();
        let mut conn = self.conn()?;
        diesel::insert_into(P::people_history).values(&rows).execute(&mut conn)?;
        Ok(())
    }

    fn presence_rows(&self, within: Duration) -> Result<Vec<(DateTime<Utc>, bool)>, StoreError> {
        use schema::people_history::dsl as P;

        let mut conn = self.conn()?;
        let since = self.since(within);
        let rows = P::people_history
            .filter(P::time.gt(since))
            .order_by(P::time.asc())
            .select((P::time, P::is_home))
            .load::<(DateTime<Utc>, bool)>(&mut conn)?;
        Ok(rows)
    }
}
