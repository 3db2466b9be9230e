//! Transaction control with nesting support.
//!
//! A counter tracks the nesting depth. The outermost `begin` starts a real
//! driver transaction; inner levels are emulated with savepoints named after
//! the level they protect (`sp_1`, `sp_2`, ...), so an inner rollback undoes
//! only the work of its own level. Drivers without savepoint support reject
//! nested `begin` instead of silently joining the outer transaction.
//!
//! The counter only moves when the driver statement succeeded, so a failed
//! `COMMIT` leaves the level (and the connection state) as it was.

use crate::db::connection::Database;
use crate::error::{DaoError, DaoResult};
use tracing::debug;

impl Database {
    /// Begin a transaction, or a savepoint when one is already active.
    pub async fn begin(&mut self) -> DaoResult<()> {
        self.begin_op();
        if !self.is_connected() {
            return self.fail(DaoError::NotConnected);
        }

        let level = self.tx_level;
        if level == 0 {
            self.run_execute("BEGIN", &[]).await?;
        } else if self.nestable() {
            self.run_execute(&format!("SAVEPOINT sp_{}", level), &[])
                .await?;
        } else {
            return self.fail(DaoError::usage("transaction already active"));
        }

        self.tx_level = level + 1;
        debug!(level = self.tx_level, "transaction begun");
        Ok(())
    }

    /// Commit the innermost transaction level.
    ///
    /// At level 1 this commits the real transaction; deeper levels release
    /// their savepoint, leaving the outer transaction in charge.
    pub async fn commit(&mut self) -> DaoResult<()> {
        self.begin_op();
        if !self.is_connected() {
            return self.fail(DaoError::NotConnected);
        }

        let level = self.tx_level;
        if level == 0 {
            return self.fail(DaoError::usage("no active transaction"));
        }
        if level == 1 || !self.nestable() {
            self.run_execute("COMMIT", &[]).await?;
        } else {
            self.run_execute(&format!("RELEASE SAVEPOINT sp_{}", level - 1), &[])
                .await?;
        }

        self.tx_level = level - 1;
        debug!(level = self.tx_level, "transaction committed");
        Ok(())
    }

    /// Roll back the innermost transaction level.
    ///
    /// At level 1 this aborts the real transaction; deeper levels roll back
    /// to their savepoint, keeping the outer transaction's work intact.
    pub async fn rollback(&mut self) -> DaoResult<()> {
        self.begin_op();
        if !self.is_connected() {
            return self.fail(DaoError::NotConnected);
        }

        let level = self.tx_level;
        if level == 0 {
            return self.fail(DaoError::usage("no active transaction"));
        }
        if level == 1 || !self.nestable() {
            self.run_execute("ROLLBACK", &[]).await?;
        } else {
            self.run_execute(&format!("ROLLBACK TO SAVEPOINT sp_{}", level - 1), &[])
                .await?;
        }

        self.tx_level = level - 1;
        debug!(level = self.tx_level, "transaction rolled back");
        Ok(())
    }

    /// Current nesting depth; zero means no transaction is active.
    pub fn transaction_level(&self) -> u32 {
        self.tx_level
    }

    /// Force nested transactions on or off, overriding the driver default.
    pub fn set_nested_transactions(&mut self, enabled: bool) {
        self.nestable_override = Some(enabled);
    }

    fn nestable(&self) -> bool {
        match self.nestable_override {
            Some(enabled) => enabled,
            None => self
                .driver_kind()
                .map(|kind| kind.supports_savepoints())
                .unwrap_or(false),
        }
    }
}
