//! Device persistence
//!
//! Containers and profiles share the same device schema in two table
//! families. Every statement for an owner kind comes from a static table,
//! so no SQL text is assembled at runtime.
//!
//! Functions taking a `Transaction` never commit or roll back; the caller
//! owns the transaction.

use crate::device::types::TYPE_KEY;
use crate::device::{Device, DeviceSet, DeviceType};
use crate::error::{Error, Result};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use std::collections::BTreeMap;
use std::path::Path;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS containers (
    id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
    name VARCHAR(255) NOT NULL,
    UNIQUE (name)
);
CREATE TABLE IF NOT EXISTS containers_devices (
    id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
    container_id INTEGER NOT NULL,
    name VARCHAR(255) NOT NULL,
    type INTEGER NOT NULL DEFAULT 0,
    FOREIGN KEY (container_id) REFERENCES containers (id) ON DELETE CASCADE,
    UNIQUE (container_id, name)
);
CREATE TABLE IF NOT EXISTS containers_devices_config (
    id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
    container_device_id INTEGER NOT NULL,
    key VARCHAR(255) NOT NULL,
    value TEXT,
    FOREIGN KEY (container_device_id) REFERENCES containers_devices (id) ON DELETE CASCADE,
    UNIQUE (container_device_id, key)
);
CREATE TABLE IF NOT EXISTS profiles (
    id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
    name VARCHAR(255) NOT NULL,
    UNIQUE (name)
);
CREATE TABLE IF NOT EXISTS profiles_devices (
    id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
    profile_id INTEGER NOT NULL,
    name VARCHAR(255) NOT NULL,
    type INTEGER NOT NULL DEFAULT 0,
    FOREIGN KEY (profile_id) REFERENCES profiles (id) ON DELETE CASCADE,
    UNIQUE (profile_id, name)
);
CREATE TABLE IF NOT EXISTS profiles_devices_config (
    id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
    profile_device_id INTEGER NOT NULL,
    key VARCHAR(255) NOT NULL,
    value TEXT,
    FOREIGN KEY (profile_device_id) REFERENCES profiles_devices (id) ON DELETE CASCADE,
    UNIQUE (profile_device_id, key)
);
";

/// Which table family a device set belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnerKind {
    Container,
    Profile,
}

impl OwnerKind {
    fn statements(&self) -> &'static Statements {
        match self {
            OwnerKind::Container => &CONTAINER_STATEMENTS,
            OwnerKind::Profile => &PROFILE_STATEMENTS,
        }
    }
}

impl std::fmt::Display for OwnerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OwnerKind::Container => write!(f, "container"),
            OwnerKind::Profile => write!(f, "profile"),
        }
    }
}

/// SQL for one owner kind
struct Statements {
    insert_owner: &'static str,
    select_owner: &'static str,
    insert_device: &'static str,
    insert_config: &'static str,
    select_devices: &'static str,
    select_config: &'static str,
    delete_config: &'static str,
    delete_devices: &'static str,
}

const CONTAINER_STATEMENTS: Statements = Statements {
    insert_owner: "INSERT OR IGNORE INTO containers (name) VALUES (?1)",
    select_owner: "SELECT id FROM containers WHERE name = ?1",
    insert_device: "INSERT INTO containers_devices (container_id, name, type) VALUES (?1, ?2, ?3)",
    insert_config: "INSERT INTO containers_devices_config (container_device_id, key, value) VALUES (?1, ?2, ?3)",
    select_devices: "SELECT id, name, type FROM containers_devices WHERE container_id = ?1",
    select_config: "SELECT key, value FROM containers_devices_config WHERE container_device_id = ?1",
    delete_config: "DELETE FROM containers_devices_config WHERE container_device_id IN \
                    (SELECT id FROM containers_devices WHERE container_id = ?1)",
    delete_devices: "DELETE FROM containers_devices WHERE container_id = ?1",
};

const PROFILE_STATEMENTS: Statements = Statements {
    insert_owner: "INSERT OR IGNORE INTO profiles (name) VALUES (?1)",
    select_owner: "SELECT id FROM profiles WHERE name = ?1",
    insert_device: "INSERT INTO profiles_devices (profile_id, name, type) VALUES (?1, ?2, ?3)",
    insert_config: "INSERT INTO profiles_devices_config (profile_device_id, key, value) VALUES (?1, ?2, ?3)",
    select_devices: "SELECT id, name, type FROM profiles_devices WHERE profile_id = ?1",
    select_config: "SELECT key, value FROM profiles_devices_config WHERE profile_device_id = ?1",
    delete_config: "DELETE FROM profiles_devices_config WHERE profile_device_id IN \
                    (SELECT id FROM profiles_devices WHERE profile_id = ?1)",
    delete_devices: "DELETE FROM profiles_devices WHERE profile_id = ?1",
};

const SELECT_NIC_DEVICE: &str =
    "SELECT id FROM containers_devices WHERE container_id = ?1 AND type = ?2 AND name = ?3";
const DELETE_NIC_NAME: &str =
    "DELETE FROM containers_devices_config WHERE container_device_id = ?1 AND key = 'name'";
const INSERT_NIC_NAME: &str =
    "INSERT INTO containers_devices_config (container_device_id, key, value) VALUES (?1, 'name', ?2)";

/// Open the database, enabling foreign keys
pub fn open(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let conn = Connection::open(path)?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    Ok(conn)
}

/// Create the schema if it does not exist yet
pub fn init(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;
    Ok(())
}

/// Id of the named owner, creating its row when missing
pub fn ensure_owner(conn: &Connection, kind: OwnerKind, name: &str) -> Result<i64> {
    let sql = kind.statements();
    conn.execute(sql.insert_owner, params![name])?;
    let id = conn.query_row(sql.select_owner, params![name], |row| row.get(0))?;
    Ok(id)
}

/// Id of the named owner, if it exists
pub fn find_owner(conn: &Connection, kind: OwnerKind, name: &str) -> Result<Option<i64>> {
    let id = conn
        .query_row(kind.statements().select_owner, params![name], |row| row.get(0))
        .optional()?;
    Ok(id)
}

/// Insert every device of `devices` for the given owner
///
/// A config row is written for every key the device sets. Empty values mean
/// unset on a typed device, so a key given as `""` has no row and loads back
/// as the same device. Each key is validated again before it is written; the
/// first invalid key or database error aborts the call.
pub fn persist_devices(
    tx: &Transaction<'_>,
    kind: OwnerKind,
    owner_id: i64,
    devices: &DeviceSet,
) -> Result<()> {
    let sql = kind.statements();
    let mut insert_device = tx.prepare(sql.insert_device)?;
    let mut insert_config = tx.prepare(sql.insert_config)?;

    for (name, device) in devices {
        let device_type = device.device_type();
        insert_device.execute(params![owner_id, name, device_type.db_code()])?;
        let device_id = tx.last_insert_rowid();

        for (key, value) in device.to_map() {
            if key == TYPE_KEY {
                continue;
            }
            if !device_type.allows(&key, &value) {
                return Err(Error::InvalidDeviceConfig {
                    device_type: device_type.to_string(),
                    key,
                    value,
                });
            }
            insert_config.execute(params![device_id, key, value])?;
        }

        tracing::debug!(owner = %kind, owner_id, device = %name, "persisted device");
    }

    Ok(())
}

/// Record the in-container name picked for a nic at attach time
///
/// Replaces any `name` already stored for the device.
pub fn record_nic_name(
    tx: &Transaction<'_>,
    container_id: i64,
    device_name: &str,
    interface_name: &str,
) -> Result<()> {
    let device_id: i64 = tx.query_row(
        SELECT_NIC_DEVICE,
        params![container_id, DeviceType::Nic.db_code(), device_name],
        |row| row.get(0),
    )?;

    tx.execute(DELETE_NIC_NAME, params![device_id])?;
    tx.execute(INSERT_NIC_NAME, params![device_id, interface_name])?;
    Ok(())
}

/// Load the device set of an owner
pub fn load_devices(tx: &Transaction<'_>, kind: OwnerKind, owner_id: i64) -> Result<DeviceSet> {
    let sql = kind.statements();

    let rows: Vec<(i64, String, i64)> = {
        let mut stmt = tx.prepare(sql.select_devices)?;
        let mapped = stmt.query_map(params![owner_id], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?))
        })?;
        mapped.collect::<std::result::Result<_, _>>()?
    };

    let mut select_config = tx.prepare(sql.select_config)?;
    let mut devices = DeviceSet::new();

    for (device_id, name, code) in rows {
        let device_type = DeviceType::from_db_code(code)?;

        let mut map: BTreeMap<String, String> = select_config
            .query_map(params![device_id], |row| {
                Ok((row.get(0)?, row.get::<_, Option<String>>(1)?.unwrap_or_default()))
            })?
            .collect::<std::result::Result<_, _>>()?;
        map.insert(TYPE_KEY.to_string(), device_type.to_string());

        devices.insert(name, Device::from_map(&map)?);
    }

    Ok(devices)
}

/// Remove every device row of an owner
pub fn clear_devices(tx: &Transaction<'_>, kind: OwnerKind, owner_id: i64) -> Result<()> {
    let sql = kind.statements();
    tx.execute(sql.delete_config, params![owner_id])?;
    tx.execute(sql.delete_devices, params![owner_id])?;
    Ok(())
}

/// Replace the device set of an owner
pub fn replace_devices(
    tx: &Transaction<'_>,
    kind: OwnerKind,
    owner_id: i64,
    devices: &DeviceSet,
) -> Result<()> {
    clear_devices(tx, kind, owner_id)?;
    persist_devices(tx, kind, owner_id, devices)
}
