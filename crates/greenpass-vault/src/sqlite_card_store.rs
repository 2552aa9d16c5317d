//! SQLite-backed GreenCard store.
//!
//! Rows are normalized (`green_cards`, `origins`, `credentials`,
//! `event_groups`, `preferences`). Timestamps are stored at second
//! precision. An issuance is applied inside one transaction: the card set is
//! loaded, merged with the upsert rule and written back before commit.

use greenpass_core::{
    merge_issued_cards, remove_event_group_children, Credential, CredentialId, EventGroup,
    EventGroupId, EventType, GreenCard, GreenCardId, GreenCardStore, GreenCardType,
    GreenpassResult, IssuedGreenCard, Origin, OriginType, Timestamp,
};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use crate::error::{VaultError, VaultResult};

const SYNCED_BANNER_KEY: &str = "dismissed_synced_banner";

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS event_groups (
    id TEXT PRIMARY KEY NOT NULL,
    provider_identifier TEXT NOT NULL,
    event_type TEXT NOT NULL,
    max_issued_at INTEGER NOT NULL,
    signed_payload BLOB NOT NULL
);
CREATE TABLE IF NOT EXISTS green_cards (
    id TEXT PRIMARY KEY NOT NULL,
    position INTEGER NOT NULL,
    card_type TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS origins (
    green_card_id TEXT NOT NULL REFERENCES green_cards(id),
    position INTEGER NOT NULL,
    origin_type TEXT NOT NULL,
    event_type TEXT NOT NULL,
    event_time INTEGER NOT NULL,
    valid_from INTEGER NOT NULL,
    expiration_time INTEGER NOT NULL,
    event_group_id TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS credentials (
    id TEXT PRIMARY KEY NOT NULL,
    green_card_id TEXT NOT NULL REFERENCES green_cards(id),
    position INTEGER NOT NULL,
    data BLOB NOT NULL,
    valid_from INTEGER NOT NULL,
    expiration_time INTEGER NOT NULL,
    event_group_id TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS preferences (
    key TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL
);
";

fn sql_err(context: &'static str) -> impl Fn(rusqlite::Error) -> VaultError {
    move |e| VaultError::Storage(format!("{}: {}", context, e))
}

fn to_secs(t: Timestamp) -> i64 {
    t.seconds_since_epoch as i64
}

fn from_secs(secs: i64) -> Timestamp {
    Timestamp::from_seconds(secs.max(0) as u64)
}

fn origin_type_str(t: OriginType) -> &'static str {
    match t {
        OriginType::Vaccination => "vaccination",
        OriginType::Test => "test",
        OriginType::Recovery => "recovery",
    }
}

fn parse_origin_type(s: &str) -> VaultResult<OriginType> {
    match s {
        "vaccination" => Ok(OriginType::Vaccination),
        "test" => Ok(OriginType::Test),
        "recovery" => Ok(OriginType::Recovery),
        other => Err(VaultError::Corrupt(format!("unknown origin type '{}'", other))),
    }
}

fn event_type_str(t: EventType) -> &'static str {
    match t {
        EventType::Vaccination => "vaccination",
        EventType::NegativeTest => "negativetest",
        EventType::PositiveTest => "positivetest",
        EventType::Recovery => "recovery",
    }
}

fn parse_event_type(s: &str) -> VaultResult<EventType> {
    match s {
        "vaccination" => Ok(EventType::Vaccination),
        "negativetest" => Ok(EventType::NegativeTest),
        "positivetest" => Ok(EventType::PositiveTest),
        "recovery" => Ok(EventType::Recovery),
        other => Err(VaultError::Corrupt(format!("unknown event type '{}'", other))),
    }
}

fn card_type_str(t: GreenCardType) -> &'static str {
    match t {
        GreenCardType::Domestic => "domestic",
        GreenCardType::Eu => "eu",
    }
}

fn parse_card_type(s: &str) -> VaultResult<GreenCardType> {
    match s {
        "domestic" => Ok(GreenCardType::Domestic),
        "eu" => Ok(GreenCardType::Eu),
        other => Err(VaultError::Corrupt(format!("unknown card type '{}'", other))),
    }
}

pub struct SqliteGreenCardStore {
    conn: Mutex<Connection>,
}

impl SqliteGreenCardStore {
    pub fn open(path: impl AsRef<Path>) -> VaultResult<Self> {
        let conn = Connection::open(path).map_err(sql_err("failed to open database"))?;
        Self::with_connection(conn)
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> VaultResult<Self> {
        let conn = Connection::open_in_memory().map_err(sql_err("failed to open database"))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> VaultResult<Self> {
        conn.execute_batch(SCHEMA)
            .map_err(sql_err("failed to create tables"))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> VaultResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| VaultError::Storage(format!("lock poisoned: {}", e)))
    }

    /// Apply `f` to the full card set inside one transaction.
    fn rewrite_cards(&self, f: impl FnOnce(Vec<GreenCard>) -> Vec<GreenCard>) -> VaultResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(sql_err("begin failed"))?;
        let cards = load_cards(&tx)?;
        write_cards(&tx, &f(cards))?;
        tx.commit().map_err(sql_err("commit failed"))
    }
}

fn insert_event_group(conn: &Connection, group: &EventGroup) -> VaultResult<bool> {
    let rows = conn
        .execute(
            "INSERT OR IGNORE INTO event_groups
                 (id, provider_identifier, event_type, max_issued_at, signed_payload)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                group.id.as_str(),
                group.provider_identifier,
                event_type_str(group.event_type),
                to_secs(group.max_issued_at),
                group.signed_payload,
            ],
        )
        .map_err(sql_err("insert event group"))?;
    Ok(rows == 1)
}

fn load_cards(conn: &Connection) -> VaultResult<Vec<GreenCard>> {
    let mut stmt = conn
        .prepare("SELECT id, card_type FROM green_cards ORDER BY position")
        .map_err(sql_err("prepare cards"))?;
    let rows = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
        .map_err(sql_err("query cards"))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(sql_err("read cards"))?;

    let mut cards = Vec::with_capacity(rows.len());
    for (id, card_type) in rows {
        cards.push(GreenCard {
            card_type: parse_card_type(&card_type)?,
            origins: load_origins(conn, &id)?,
            credentials: load_credentials(conn, &id)?,
            id: GreenCardId::new(id),
        });
    }
    Ok(cards)
}

fn load_origins(conn: &Connection, card_id: &str) -> VaultResult<Vec<Origin>> {
    let mut stmt = conn
        .prepare(
            "SELECT origin_type, event_type, event_time, valid_from, expiration_time, event_group_id
             FROM origins WHERE green_card_id = ?1 ORDER BY position",
        )
        .map_err(sql_err("prepare origins"))?;
    let rows = stmt
        .query_map(params![card_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, String>(5)?,
            ))
        })
        .map_err(sql_err("query origins"))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(sql_err("read origins"))?;

    rows.into_iter()
        .map(|(origin_type, event_type, event_time, valid_from, expiration, group)| {
            Ok(Origin {
                origin_type: parse_origin_type(&origin_type)?,
                event_type: parse_event_type(&event_type)?,
                event_time: from_secs(event_time),
                valid_from: from_secs(valid_from),
                expiration_time: from_secs(expiration),
                event_group_id: EventGroupId::new(group),
            })
        })
        .collect()
}

fn load_credentials(conn: &Connection, card_id: &str) -> VaultResult<Vec<Credential>> {
    let mut stmt = conn
        .prepare(
            "SELECT id, data, valid_from, expiration_time, event_group_id
             FROM credentials WHERE green_card_id = ?1 ORDER BY position",
        )
        .map_err(sql_err("prepare credentials"))?;
    let credentials = stmt
        .query_map(params![card_id], |row| {
            Ok(Credential {
                id: CredentialId::new(row.get::<_, String>(0)?),
                data: row.get(1)?,
                valid_from: from_secs(row.get(2)?),
                expiration_time: from_secs(row.get(3)?),
                event_group_id: EventGroupId::new(row.get::<_, String>(4)?),
            })
        })
        .map_err(sql_err("query credentials"))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(sql_err("read credentials"))?;
    Ok(credentials)
}

fn write_cards(conn: &Connection, cards: &[GreenCard]) -> VaultResult<()> {
    conn.execute_batch("DELETE FROM credentials; DELETE FROM origins; DELETE FROM green_cards;")
        .map_err(sql_err("clear cards"))?;

    for (card_pos, card) in cards.iter().enumerate() {
        conn.execute(
            "INSERT INTO green_cards (id, position, card_type) VALUES (?1, ?2, ?3)",
            params![card.id.as_str(), card_pos as i64, card_type_str(card.card_type)],
        )
        .map_err(sql_err("insert card"))?;

        for (pos, origin) in card.origins.iter().enumerate() {
            conn.execute(
                "INSERT INTO origins (green_card_id, position, origin_type, event_type,
                     event_time, valid_from, expiration_time, event_group_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    card.id.as_str(),
                    pos as i64,
                    origin_type_str(origin.origin_type),
                    event_type_str(origin.event_type),
                    to_secs(origin.event_time),
                    to_secs(origin.valid_from),
                    to_secs(origin.expiration_time),
                    origin.event_group_id.as_str(),
                ],
            )
            .map_err(sql_err("insert origin"))?;
        }

        for (pos, credential) in card.credentials.iter().enumerate() {
            conn.execute(
                "INSERT INTO credentials (id, green_card_id, position, data,
                     valid_from, expiration_time, event_group_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    credential.id.as_str(),
                    card.id.as_str(),
                    pos as i64,
                    credential.data,
                    to_secs(credential.valid_from),
                    to_secs(credential.expiration_time),
                    credential.event_group_id.as_str(),
                ],
            )
            .map_err(sql_err("insert credential"))?;
        }
    }
    Ok(())
}

impl GreenCardStore for SqliteGreenCardStore {
    fn all_green_cards(&self) -> GreenpassResult<Vec<GreenCard>> {
        let conn = self.conn()?;
        Ok(load_cards(&conn)?)
    }

    fn all_event_groups(&self) -> GreenpassResult<Vec<EventGroup>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, provider_identifier, event_type, max_issued_at, signed_payload
                 FROM event_groups ORDER BY rowid",
            )
            .map_err(sql_err("prepare event groups"))?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, Vec<u8>>(4)?,
                ))
            })
            .map_err(sql_err("query event groups"))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(sql_err("read event groups"))?;

        let mut groups = Vec::with_capacity(rows.len());
        for (id, provider_identifier, event_type, max_issued_at, signed_payload) in rows {
            groups.push(EventGroup {
                id: EventGroupId::new(id),
                provider_identifier,
                event_type: parse_event_type(&event_type)?,
                max_issued_at: from_secs(max_issued_at),
                signed_payload,
            });
        }
        Ok(groups)
    }

    fn save_event_group(&self, group: &EventGroup) -> GreenpassResult<bool> {
        let conn = self.conn()?;
        Ok(insert_event_group(&conn, group)?)
    }

    fn remove_event_group(&self, id: &EventGroupId) -> GreenpassResult<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(sql_err("begin failed"))?;
        let rows = tx
            .execute("DELETE FROM event_groups WHERE id = ?1", params![id.as_str()])
            .map_err(sql_err("delete event group"))?;
        if rows == 0 {
            return Ok(false);
        }
        let cards = load_cards(&tx)?;
        write_cards(&tx, &remove_event_group_children(cards, id))?;
        tx.commit().map_err(sql_err("commit failed"))?;
        Ok(true)
    }

    fn replace_issued_cards(
        &self,
        event_group_id: &EventGroupId,
        issued: &[IssuedGreenCard],
    ) -> GreenpassResult<()> {
        Ok(self.rewrite_cards(|cards| merge_issued_cards(cards, event_group_id, issued))?)
    }

    fn save_issued_group(
        &self,
        group: &EventGroup,
        issued: &[IssuedGreenCard],
    ) -> GreenpassResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(sql_err("begin failed"))?;
        insert_event_group(&tx, group)?;
        let cards = load_cards(&tx)?;
        write_cards(&tx, &merge_issued_cards(cards, &group.id, issued))?;
        tx.commit().map_err(sql_err("commit failed"))?;
        Ok(())
    }

    fn has_dismissed_synced_banner(&self) -> GreenpassResult<bool> {
        let value: Option<String> = self
            .conn()?
            .query_row(
                "SELECT value FROM preferences WHERE key = ?1",
                params![SYNCED_BANNER_KEY],
                |row| row.get(0),
            )
            .optional()
            .map_err(sql_err("read preference"))?;
        Ok(value.as_deref() == Some("true"))
    }

    fn set_dismissed_synced_banner(&self, dismissed: bool) -> GreenpassResult<()> {
        self.conn()?
            .execute(
                "INSERT OR REPLACE INTO preferences (key, value) VALUES (?1, ?2)",
                params![SYNCED_BANNER_KEY, if dismissed { "true" } else { "false" }],
            )
            .map_err(sql_err("write preference"))?;
        Ok(())
    }
}
