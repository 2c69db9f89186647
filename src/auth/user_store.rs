//! User Storage
//! Mission: Store user accounts and their roles with SQLite

use crate::auth::models::{Authority, StoredIdentity};
use anyhow::{Context, Result};
use bcrypt::hash;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use serde::Serialize;
use std::collections::BTreeSet;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// Lookup side of the user store, as seen by the credential verifier.
///
/// Implementations may block; callers run them on the blocking pool.
pub trait UserStore: Send + Sync {
    fn find_by_username(&self, username: &str) -> Result<Option<StoredIdentity>>;
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("username {0} already exists")]
    Duplicate(String),
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("password hashing failed: {0}")]
    Hash(#[from] bcrypt::BcryptError),
}

/// User as exposed by the `/users` resource (no password hash).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserRecord {
    pub id: i64,
    pub name: String,
    pub lastname: String,
    pub username: String,
    pub email: String,
    pub roles: Vec<Authority>,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub lastname: String,
    pub username: String,
    pub email: String,
    pub password: String,
    pub admin: bool,
}

#[derive(Debug, Clone)]
pub struct UserUpdate {
    pub name: String,
    pub lastname: String,
    pub username: String,
    pub email: String,
    pub admin: bool,
}

fn authorities_for(admin: bool) -> BTreeSet<Authority> {
    let mut authorities = BTreeSet::from([Authority::User]);
    if admin {
        authorities.insert(Authority::Admin);
    }
    authorities
}

fn map_constraint(err: rusqlite::Error, username: &str) -> StoreError {
    match &err {
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation => {
            StoreError::Duplicate(username.to_string())
        }
        _ => StoreError::Database(err),
    }
}

/// How long a connection waits on a locked database before `SQLITE_BUSY`.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_millis(1000);

// PRAGMA user_version once the first-run admin has been seeded
const SEEDED_VERSION: i64 = 1;

/// User storage with SQLite backend
pub struct SqliteUserStore {
    db_path: String,
    bcrypt_cost: u32,
    busy_timeout: Duration,
}

impl SqliteUserStore {
    /// Open (or create) the store. A brand-new database gets the default
    /// admin account.
    pub fn new(db_path: &str, bcrypt_cost: u32) -> Result<Self> {
        let store = Self {
            db_path: db_path.to_string(),
            bcrypt_cost,
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        };
        store.init_db()?;
        Ok(store)
    }

    /// Keep this below the credential lookup timeout.
    pub fn with_busy_timeout(mut self, busy_timeout: Duration) -> Self {
        self.busy_timeout = busy_timeout;
        self
    }

    fn conn(&self) -> rusqlite::Result<Connection> {
        let conn = Connection::open(&self.db_path)?;
        conn.busy_timeout(self.busy_timeout)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(conn)
    }

    fn init_db(&self) -> Result<()> {
        let conn = self.conn()?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                lastname TEXT NOT NULL,
                username TEXT UNIQUE NOT NULL,
                email TEXT NOT NULL,
                password_hash TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS roles (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT UNIQUE NOT NULL
            );
            CREATE TABLE IF NOT EXISTS users_roles (
                user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                role_id INTEGER NOT NULL REFERENCES roles(id),
                UNIQUE (user_id, role_id)
            );",
        )
        .context("Failed to create user schema")?;

        for authority in [Authority::User, Authority::Admin] {
            conn.execute(
                "INSERT OR IGNORE INTO roles (name) VALUES (?1)",
                params![authority.as_str()],
            )?;
        }

        let version: i64 = conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .context("Failed to read schema version")?;
        if version < SEEDED_VERSION {
            self.create_default_admin(&conn)?;
            conn.execute_batch(&format!("PRAGMA user_version = {SEEDED_VERSION};"))
                .context("Failed to record seeding")?;
        }

        Ok(())
    }

    /// Create default admin user for initial setup. Runs once per database,
    /// and only while it holds no users.
    fn create_default_admin(&self, conn: &Connection) -> Result<()> {
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))
            .context("Failed to count users")?;

        if count > 0 {
            info!(users = count, "Existing users found, skipping default admin");
            return Ok(());
        }

        self.create_user(&NewUser {
            name: "Admin".to_string(),
            lastname: "Account".to_string(),
            username: "admin".to_string(),
            email: "admin@localhost".to_string(),
            password: "adminpass".to_string(),
            admin: true,
        })
        .context("Failed to insert admin user")?;

        info!("🔐 Default admin user created (username: admin, password: adminpass)");
        warn!("⚠️  CHANGE DEFAULT PASSWORD IN PRODUCTION!");

        Ok(())
    }

    fn load_authorities(conn: &Connection, user_id: i64) -> rusqlite::Result<BTreeSet<Authority>> {
        let mut stmt = conn.prepare(
            "SELECT r.name FROM roles r
             JOIN users_roles ur ON ur.role_id = r.id
             WHERE ur.user_id = ?1",
        )?;

        let names = stmt
            .query_map(params![user_id], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut authorities = BTreeSet::new();
        for name in names {
            match name.parse::<Authority>() {
                Ok(authority) => {
                    authorities.insert(authority);
                }
                Err(e) => warn!(user_id, "Skipping stored role: {}", e),
            }
        }
        Ok(authorities)
    }

    fn assign_roles(
        conn: &Connection,
        user_id: i64,
        authorities: &BTreeSet<Authority>,
    ) -> rusqlite::Result<()> {
        conn.execute("DELETE FROM users_roles WHERE user_id = ?1", params![user_id])?;
        for authority in authorities {
            conn.execute(
                "INSERT INTO users_roles (user_id, role_id)
                 SELECT ?1, id FROM roles WHERE name = ?2",
                params![user_id, authority.as_str()],
            )?;
        }
        Ok(())
    }

    fn read_users(conn: &Connection, sql: &str, args: &[i64]) -> rusqlite::Result<Vec<UserRecord>> {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(args.iter()), |row| {
                Ok(UserRecord {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    lastname: row.get(2)?,
                    username: row.get(3)?,
                    email: row.get(4)?,
                    roles: Vec::new(),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|mut user| {
                user.roles = Self::load_authorities(conn, user.id)?.into_iter().collect();
                Ok(user)
            })
            .collect()
    }

    /// All users ordered by id.
    pub fn list_users(&self) -> Result<Vec<UserRecord>, StoreError> {
        let conn = self.conn()?;
        Ok(Self::read_users(
            &conn,
            "SELECT id, name, lastname, username, email FROM users ORDER BY id",
            &[],
        )?)
    }

    /// One page of users plus the total user count.
    pub fn page_users(&self, page: u32, size: u32) -> Result<(Vec<UserRecord>, u64), StoreError> {
        let conn = self.conn()?;
        let total: i64 = conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
        let offset = i64::from(page) * i64::from(size);
        let users = Self::read_users(
            &conn,
            "SELECT id, name, lastname, username, email FROM users
             ORDER BY id LIMIT ?1 OFFSET ?2",
            &[i64::from(size), offset],
        )?;
        Ok((users, total.max(0) as u64))
    }

    pub fn get_user(&self, id: i64) -> Result<Option<UserRecord>, StoreError> {
        let conn = self.conn()?;
        Ok(Self::read_users(
            &conn,
            "SELECT id, name, lastname, username, email FROM users WHERE id = ?1",
            &[id],
        )?
        .into_iter()
        .next())
    }

    pub fn create_user(&self, new_user: &NewUser) -> Result<UserRecord, StoreError> {
        let password_hash = hash(&new_user.password, self.bcrypt_cost)?;
        let authorities = authorities_for(new_user.admin);

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO users (name, lastname, username, email, password_hash)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                new_user.name,
                new_user.lastname,
                new_user.username,
                new_user.email,
                password_hash,
            ],
        )
        .map_err(|e| map_constraint(e, &new_user.username))?;
        let id = tx.last_insert_rowid();
        Self::assign_roles(&tx, id, &authorities)?;
        tx.commit()?;

        info!(username = %new_user.username, id, "✅ Created user");

        Ok(UserRecord {
            id,
            name: new_user.name.clone(),
            lastname: new_user.lastname.clone(),
            username: new_user.username.clone(),
            email: new_user.email.clone(),
            roles: authorities.into_iter().collect(),
        })
    }

    /// Returns `None` when no user has this id.
    pub fn update_user(&self, id: i64, update: &UserUpdate) -> Result<Option<UserRecord>, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let rows = tx
            .execute(
                "UPDATE users SET name = ?1, lastname = ?2, username = ?3, email = ?4
                 WHERE id = ?5",
                params![update.name, update.lastname, update.username, update.email, id],
            )
            .map_err(|e| map_constraint(e, &update.username))?;

        if rows == 0 {
            return Ok(None);
        }

        let authorities = authorities_for(update.admin);
        Self::assign_roles(&tx, id, &authorities)?;
        tx.commit()?;

        Ok(Some(UserRecord {
            id,
            name: update.name.clone(),
            lastname: update.lastname.clone(),
            username: update.username.clone(),
            email: update.email.clone(),
            roles: authorities.into_iter().collect(),
        }))
    }

    /// Returns `false` when no user has this id.
    pub fn delete_user(&self, id: i64) -> Result<bool, StoreError> {
        let conn = self.conn()?;
        let rows = conn.execute("DELETE FROM users WHERE id = ?1", params![id])?;
        if rows > 0 {
            info!(id, "🗑️  Deleted user");
        }
        Ok(rows > 0)
    }
}

impl UserStore for SqliteUserStore {
    fn find_by_username(&self, username: &str) -> Result<Option<StoredIdentity>> {
        let conn = self.conn()?;

        let row = conn
            .query_row(
                "SELECT id, username, password_hash FROM users WHERE username = ?1",
                params![username],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()
            .context("Failed to look up user")?;

        let Some((id, username, password_hash)) = row else {
            return Ok(None);
        };

        let authorities =
            Self::load_authorities(&conn, id).context("Failed to load user roles")?;

        Ok(Some(StoredIdentity {
            username,
            password_hash,
            authorities,
        }))
    }
}
