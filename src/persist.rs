// used for persistence
use rusqlite::{params, Connection};
use tracing::debug;

use crate::database::PersistenceMode;
use crate::error::{Result, SupertoolError};
use crate::record::{Handle, Record};

/// Durable storage for records. Every record is kept as one JSON document keyed
/// by its handle; the category and gramps id are stored alongside for inspection
/// with external tools.
pub struct Persistor {
    connection: Connection,
}

impl Persistor {
    pub fn new(mode: &PersistenceMode) -> Result<Persistor> {
        let connection = match mode {
            PersistenceMode::InMemory => Connection::open_in_memory()?,
            PersistenceMode::File(path) => Connection::open(path)?,
        };
        connection.execute_batch(
            "
            create table if not exists Record (
                Record_Handle integer not null,
                Record_Category text not null,
                Record_GrampsId text not null,
                Record_Body text not null,
                constraint referenceable_Record_Handle primary key (
                    Record_Handle
                )
            );
            create index if not exists Record_Category_Index on Record (Record_Category);
            ",
        )?;
        Ok(Persistor { connection })
    }

    pub fn persist_record(&mut self, handle: Handle, record: &Record) -> Result<()> {
        Self::upsert(&self.connection, handle, record)
    }

    /// Writes all records inside a single SQLite transaction.
    pub fn persist_records(&mut self, records: &[(Handle, Record)]) -> Result<()> {
        let tx = self.connection.transaction()?;
        for (handle, record) in records {
            Self::upsert(&tx, *handle, record)?;
        }
        tx.commit()?;
        debug!(count = records.len(), "persisted records");
        Ok(())
    }

    fn upsert(connection: &Connection, handle: Handle, record: &Record) -> Result<()> {
        let body = serde_json::to_string(record)?;
        let mut statement = connection.prepare_cached(
            "
            insert into Record (Record_Handle, Record_Category, Record_GrampsId, Record_Body)
            values (?1, ?2, ?3, ?4)
            on conflict (Record_Handle) do update set
                Record_Category = excluded.Record_Category,
                Record_GrampsId = excluded.Record_GrampsId,
                Record_Body = excluded.Record_Body
            ",
        )?;
        statement.execute(params![
            handle as i64,
            record.category().namespace(),
            record.gramps_id(),
            body
        ])?;
        Ok(())
    }

    pub fn restore_records(&self) -> Result<Vec<(Handle, Record)>> {
        let mut statement = self.connection.prepare(
            "select Record_Handle, Record_Body from Record order by Record_Handle",
        )?;
        let rows = statement.query_map([], |row| {
            let handle: i64 = row.get(0)?;
            let body: String = row.get(1)?;
            Ok((handle as Handle, body))
        })?;
        let mut restored = Vec::new();
        for row in rows {
            let (handle, body) = row?;
            let record: Record = serde_json::from_str(&body).map_err(|e| {
                SupertoolError::Persistence(format!("record {handle} could not be restored: {e}"))
            })?;
            restored.push((handle, record));
        }
        Ok(restored)
    }
}
