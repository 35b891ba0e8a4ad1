//! In-memory statement repository for tests and single-process wiring.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use nyumbapay_common::{AccountId, StatementId, TenantId};

use crate::error::StatementError;
use crate::repository::StatementRepository;
use crate::statement::{Statement, StatementType};

type PeriodKey = (TenantId, AccountId, StatementType, DateTime<Utc>, DateTime<Utc>);

#[derive(Default)]
struct State {
    statements: HashMap<StatementId, Statement>,
    by_period: HashMap<PeriodKey, StatementId>,
}

/// In-memory implementation with the period-uniqueness index.
#[derive(Default)]
pub struct InMemoryStatementRepository {
    state: Mutex<State>,
}

impl InMemoryStatementRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn period_key(statement: &Statement) -> PeriodKey {
        (
            statement.tenant_id.clone(),
            statement.account_id.clone(),
            statement.statement_type,
            statement.period.start,
            statement.period.end,
        )
    }
}

#[async_trait]
impl StatementRepository for InMemoryStatementRepository {
    async fn insert(&self, statement: Statement) -> Result<(), StatementError> {
        let mut state = self.state.lock();
        let key = Self::period_key(&statement);
        if state.by_period.contains_key(&key) {
            return Err(StatementError::DuplicateStatement);
        }
        state.by_period.insert(key, statement.id.clone());
        state.statements.insert(statement.id.clone(), statement);
        Ok(())
    }

    async fn update(&self, statement: &Statement) -> Result<(), StatementError> {
        let mut state = self.state.lock();
        if !state.statements.contains_key(&statement.id) {
            return Err(StatementError::StatementNotFound(statement.id.clone()));
        }
        state
            .statements
            .insert(statement.id.clone(), statement.clone());
        Ok(())
    }

    async fn get(
        &self,
        tenant_id: &TenantId,
        id: &StatementId,
    ) -> Result<Option<Statement>, StatementError> {
        let state = self.state.lock();
        Ok(state
            .statements
            .get(id)
            .filter(|s| &s.tenant_id == tenant_id)
            .cloned())
    }

    async fn find_for_period(
        &self,
        tenant_id: &TenantId,
        account_id: &AccountId,
        statement_type: StatementType,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> Result<Option<Statement>, StatementError> {
        let state = self.state.lock();
        let key = (
            tenant_id.clone(),
            account_id.clone(),
            statement_type,
            period_start,
            period_end,
        );
        Ok(state
            .by_period
            .get(&key)
            .and_then(|id| state.statements.get(id))
            .cloned())
    }
}
