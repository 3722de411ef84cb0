use std::fmt::Display;
use std::time::SystemTime;

use anyhow::{anyhow, Result};
use axum::async_trait;
use base64ct::{Base64UrlUnpadded, Encoding};
use clap::ValueEnum;
use password_hash::rand_core::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

#[derive(PartialEq, Eq, Deserialize, Serialize, Clone, Copy, Debug, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Analyst,
    Viewer,
}

impl Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Admin => write!(f, "admin"),
            Role::Analyst => write!(f, "analyst"),
            Role::Viewer => write!(f, "viewer"),
        }
    }
}

impl TryFrom<&str> for Role {
    type Error = anyhow::Error;

    fn try_from(value: &str) -> Result<Self> {
        match value {
            "admin" => Ok(Role::Admin),
            "analyst" => Ok(Role::Analyst),
            "viewer" => Ok(Role::Viewer),
            other => Err(anyhow!("Unknown role {}", other)),
        }
    }
}

#[derive(Serialize, Clone, Debug)]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    /// PHC formatted password hash
    #[serde(skip)]
    pub password: String,
    pub role: Role,
    #[serde(skip)]
    pub created_at: i64,
}

impl Display for User {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "ID: {}\nName: {}\nEmail: {}\nRole: {}\nCreated At: {}",
            self.id, self.name, self.email, self.role, self.created_at
        )
    }
}

/// Returned by [`UserStore::create`] when the email is already registered.
#[derive(Debug)]
pub struct UserExists(pub String);

impl Display for UserExists {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "A user with email {} already exists", self.0)
    }
}

impl std::error::Error for UserExists {}

/// Account details before they are stored. `password` is already hashed.
#[derive(Debug)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub password: String,
    pub role: Role,
}

#[derive(sqlx::FromRow)]
struct UserRecord {
    id: String,
    name: String,
    email: String,
    password: String,
    role: String,
    created_at: i64,
}

impl TryFrom<UserRecord> for User {
    type Error = anyhow::Error;

    fn try_from(record: UserRecord) -> Result<Self> {
        Ok(User {
            role: Role::try_from(record.role.as_str())?,
            id: record.id,
            name: record.name,
            email: record.email,
            password: record.password,
            created_at: record.created_at,
        })
    }
}

/// Persistent home of user accounts.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn create(&self, user: NewUser) -> Result<User>;
    async fn with_email(&self, email: &str) -> Result<Option<User>>;
    async fn with_id(&self, id: &str) -> Result<Option<User>>;
    async fn ping(&self) -> Result<()>;
}

#[derive(Clone, Debug)]
pub struct SqliteUserStore {
    pool: SqlitePool,
}

impl SqliteUserStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

fn generate_id() -> String {
    let mut id = [0u8; 12];
    OsRng.fill_bytes(&mut id);
    Base64UrlUnpadded::encode_string(&id)
}

#[async_trait]
impl UserStore for SqliteUserStore {
    #[tracing::instrument(level = "info", skip(self, user), fields(email = %user.email))]
    async fn create(&self, user: NewUser) -> Result<User> {
        let id = generate_id();
        let unix_now: i64 = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)?
            .as_millis()
            .try_into()?;
        sqlx::query(
            "INSERT INTO users (id, name, email, password, role, created_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.password)
        .bind(user.role.to_string())
        .bind(unix_now)
        .execute(&self.pool)
        .await
        .map_err(|err| {
            if let sqlx::Error::Database(db) = &err {
                if db.is_unique_violation() {
                    return anyhow!(UserExists(user.email.clone()));
                }
            }
            anyhow!(err)
        })?;

        Ok(User {
            id,
            name: user.name,
            email: user.email,
            password: user.password,
            role: user.role,
            created_at: unix_now,
        })
    }

    #[tracing::instrument(level = "info", skip(self))]
    async fn with_email(&self, email: &str) -> Result<Option<User>> {
        let record = sqlx::query_as::<_, UserRecord>(
            "SELECT id, name, email, password, role, created_at FROM users WHERE email = ?",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        record.map(User::try_from).transpose()
    }

    #[tracing::instrument(level = "info", skip(self))]
    async fn with_id(&self, id: &str) -> Result<Option<User>> {
        let record = sqlx::query_as::<_, UserRecord>(
            "SELECT id, name, email, password, role, created_at FROM users WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        record.map(User::try_from).transpose()
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
