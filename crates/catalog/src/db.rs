//! Connection to the Dolt sql-server.
//!
//! Two modes: connect to a server that is already running (TCP or UNIX
//! socket), or spawn `dolt sql-server` as a child process and poll until it
//! accepts connections. Either way the result is a single MySQL-protocol
//! connection; branch state is per-connection, so the connection is never
//! shared without the [`DoltHandle`] mutex.

use exn::{OptionExt, ResultExt};
use sqlx::Connection;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection, MySqlRow};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument};

use crate::error::{ErrorKind, Result};

/// How long to keep retrying the first connection to a spawned server.
const SPAWN_CONNECT_ATTEMPTS: u32 = 30;

/// Everything needed to reach (or start) the catalog engine.
#[derive(Clone, Debug)]
pub struct DoltSettings {
    pub database: String,
    pub host: String,
    pub port: u16,
    /// Connect over a UNIX socket instead of TCP when set.
    pub socket: Option<PathBuf>,
    pub user: String,
    pub password: Option<String>,
    /// Spawn `dolt sql-server` in `dolt_dir` instead of connecting to an
    /// existing server.
    pub spawn: bool,
    pub dolt_dir: PathBuf,
    pub commit_message: String,
}

impl Default for DoltSettings {
    fn default() -> Self {
        Self {
            database: "stowage".to_string(),
            host: "localhost".to_string(),
            port: 3306,
            socket: None,
            user: "root".to_string(),
            password: None,
            spawn: false,
            dolt_dir: PathBuf::from(".dolt"),
            commit_message: "update catalog".to_string(),
        }
    }
}

/// A single connection to the catalog engine, plus the optional child
/// process serving it.
pub struct Dolt {
    conn: MySqlConnection,
    database: String,
    commit_message: String,
    server: Option<tokio::process::Child>,
}

/// Shared handle; the mutex serializes all catalog access onto the one
/// connection.
pub type DoltHandle = Arc<tokio::sync::Mutex<Dolt>>;

impl Dolt {
    /// Connect per `settings`, spawning the server first when asked to.
    #[instrument(skip(settings), fields(database = %settings.database))]
    pub async fn connect(settings: &DoltSettings) -> Result<Self> {
        let (server, conn) = if settings.spawn {
            let child = Self::spawn_server(settings)?;
            let conn = Self::await_server(settings).await?;
            (Some(child), conn)
        } else {
            let conn = Self::try_connect(settings).await.or_raise(|| ErrorKind::Database)?;
            (None, conn)
        };
        Ok(Self {
            conn,
            database: settings.database.clone(),
            commit_message: settings.commit_message.clone(),
            server,
        })
    }

    pub fn into_handle(self) -> DoltHandle {
        Arc::new(tokio::sync::Mutex::new(self))
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    fn spawn_server(settings: &DoltSettings) -> Result<tokio::process::Child> {
        let dolt = which::which("dolt")
            .map_err(|err| ErrorKind::Spawn(format!("dolt binary not found: {err}")))?;
        info!(dir = %settings.dolt_dir.display(), "spawning dolt sql-server");
        tokio::process::Command::new(dolt)
            .arg("sql-server")
            .current_dir(&settings.dolt_dir)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| ErrorKind::Spawn(err.to_string()).into())
    }

    async fn await_server(settings: &DoltSettings) -> Result<MySqlConnection> {
        for attempt in 1..=SPAWN_CONNECT_ATTEMPTS {
            match Self::try_connect(settings).await {
                Ok(conn) => return Ok(conn),
                Err(err) => {
                    debug!(attempt, "waiting for catalog sql-server: {err}");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
        exn::bail!(ErrorKind::Spawn(format!(
            "sql-server did not accept connections after {SPAWN_CONNECT_ATTEMPTS} attempts"
        )))
    }

    async fn try_connect(settings: &DoltSettings) -> sqlx::Result<MySqlConnection> {
        let mut options = MySqlConnectOptions::new()
            .username(&settings.user)
            .database(&settings.database);
        options = match &settings.socket {
            Some(socket) => options.socket(socket),
            None => options.host(&settings.host).port(settings.port),
        };
        if let Some(password) = &settings.password {
            options = options.password(password);
        }
        MySqlConnection::connect_with(&options).await
    }

    /// Run a query and collect its rows.
    pub async fn query(&mut self, sql: &str, params: &[&str]) -> Result<Vec<MySqlRow>> {
        let mut query = sqlx::query(sql);
        for param in params {
            query = query.bind(*param);
        }
        query.fetch_all(&mut self.conn).await.or_raise(|| ErrorKind::Database)
    }

    /// Run one statement.
    pub async fn execute(&mut self, sql: &str, params: &[&str]) -> Result<u64> {
        let mut query = sqlx::query(sql);
        for param in params {
            query = query.bind(*param);
        }
        let result = query.execute(&mut self.conn).await.or_raise(|| ErrorKind::Database)?;
        Ok(result.rows_affected())
    }

    /// Run one statement for every row of values.
    pub async fn executemany<I, R>(&mut self, sql: &str, rows: I) -> Result<()>
    where
        I: IntoIterator<Item = R>,
        R: IntoIterator<Item = String>,
    {
        for row in rows {
            let mut query = sqlx::query(sql);
            for value in row {
                query = query.bind(value);
            }
            query.execute(&mut self.conn).await.or_raise(|| ErrorKind::Database)?;
        }
        Ok(())
    }

    /// The branch this connection is currently on.
    pub async fn active_branch(&mut self) -> Result<String> {
        use sqlx::Row;
        let row = sqlx::query("SELECT active_branch()")
            .fetch_one(&mut self.conn)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.try_get(0).or_raise(|| ErrorKind::Decode("active_branch"))
    }

    /// Switch this connection to `branch`.
    pub async fn checkout(&mut self, branch: &str) -> Result<()> {
        self.execute("CALL DOLT_CHECKOUT(?)", &[branch]).await.map(drop)
    }

    /// Create `branch` at `start_point` if it does not exist yet.
    pub async fn maybe_create_branch(&mut self, branch: &str, start_point: &str) -> Result<()> {
        match self.execute("CALL DOLT_BRANCH(?, ?)", &[branch, start_point]).await {
            Ok(_) => {
                debug!(branch, start_point, "created catalog branch");
                Ok(())
            }
            Err(err) if err.to_string().contains("already exists") => Ok(()),
            Err(err) => Err(err.raise(ErrorKind::Branch(format!("create {branch}")))),
        }
    }

    /// Merge `other` into the current branch (fast-forward or three-way).
    pub async fn merge(&mut self, other: &str) -> Result<()> {
        self.execute("CALL DOLT_MERGE(?)", &[other])
            .await
            .map(drop)
            .map_err(|err| err.raise(ErrorKind::Branch(format!("merge {other}"))))
    }

    /// Commit staged changes on the current branch, optionally amending the
    /// branch tip. A batch that wrote nothing new is not an error.
    pub async fn commit(&mut self, amend: bool) -> Result<()> {
        let message = self.commit_message.clone();
        let sql = if amend {
            "CALL DOLT_COMMIT('--amend', '-A', '-m', ?)"
        } else {
            "CALL DOLT_COMMIT('-A', '-m', ?)"
        };
        match self.execute(sql, &[&message]).await {
            Ok(_) => Ok(()),
            Err(err) if err.to_string().contains("nothing to commit") => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Fetch `branch` from `remote` and fast-forward the local branch.
    pub async fn pull_branch(&mut self, branch: &str, remote: &str) -> Result<()> {
        self.execute("CALL DOLT_FETCH(?, ?)", &[remote, branch])
            .await
            .map_err(|err| err.raise(ErrorKind::Branch(format!("fetch {remote}/{branch}"))))?;
        let tracking = format!("{remote}/{branch}");
        self.maybe_create_branch(branch, &tracking).await?;
        let previous = self.active_branch().await?;
        self.checkout(branch).await?;
        let merged = self.merge(&tracking).await;
        self.checkout(&previous).await?;
        merged
    }

    /// Commit hash of a branch, tag or ref.
    pub async fn hashof(&mut self, reference: &str) -> Result<String> {
        use sqlx::Row;
        let rows = self.query("SELECT HASHOF(?)", &[reference]).await?;
        let row = rows.first().ok_or_raise(|| ErrorKind::Decode("HASHOF"))?;
        row.try_get(0).or_raise(|| ErrorKind::Decode("HASHOF"))
    }

    /// Close the connection and stop a spawned server.
    pub async fn close(mut self) -> Result<()> {
        self.conn.close().await.or_raise(|| ErrorKind::Database)?;
        if let Some(mut server) = self.server.take() {
            server.kill().await.map_err(|err| ErrorKind::Spawn(err.to_string()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = DoltSettings::default();
        assert_eq!(settings.port, 3306);
        assert!(!settings.spawn);
        assert!(settings.socket.is_none());
    }
}
