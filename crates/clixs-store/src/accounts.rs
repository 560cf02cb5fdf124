use tracing::instrument;

use clixs_core::{timestamp, Account, AccountLookup, ChatError, UserId};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

/// Local mirror of account activity flags.
pub struct AccountRepo {
    db: Database,
}

impl AccountRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self, account), fields(user_id = %account.id, active = account.is_active))]
    pub fn upsert(&self, account: &Account) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO accounts (id, is_active, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT (id) DO UPDATE SET
                    is_active = excluded.is_active,
                    updated_at = excluded.updated_at",
                rusqlite::params![
                    account.id.as_str(),
                    account.is_active,
                    timestamp::format(&timestamp::now()),
                ],
            )?;
            Ok(())
        })
    }

    pub fn get(&self, id: &UserId) -> Result<Option<Account>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT id, is_active FROM accounts WHERE id = ?1")?;
            let mut rows = stmt.query([id.as_str()])?;
            match rows.next()? {
                Some(row) => Ok(Some(Account {
                    id: UserId::from_raw(row_helpers::get::<String>(row, 0, "accounts", "id")?),
                    is_active: row_helpers::get(row, 1, "accounts", "is_active")?,
                })),
                None => Ok(None),
            }
        })
    }
}

impl AccountLookup for AccountRepo {
    fn account(&self, id: &UserId) -> Result<Option<Account>, ChatError> {
        Ok(self.get(id)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsert_toggles_activity() {
        let repo = AccountRepo::new(Database::in_memory().unwrap());
        let id = UserId::from_raw("usr_a");
        assert!(repo.account(&id).unwrap().is_none());

        repo.upsert(&Account { id: id.clone(), is_active: true }).unwrap();
        assert!(repo.get(&id).unwrap().unwrap().is_active);

        repo.upsert(&Account { id: id.clone(), is_active: false }).unwrap();
        assert!(!repo.get(&id).unwrap().unwrap().is_active);
    }
}
