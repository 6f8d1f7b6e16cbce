use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_postgres::Row;
use tokio_postgres::types::ToSql;
use uuid::Uuid;

use crate::db::OperatorDb;
use crate::operators::types::{Operator, OperatorUpdate, SortField, SortSpec, Value};

#[derive(Debug, thiserror::Error)]
pub enum OperatorStoreError {
    #[error("db error: {0}")]
    Db(String),
    #[error("decode error: {0}")]
    Decode(String),
}

/// Store-level selection over operator records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperatorFilter {
    Everything,
    IdEquals(String),
    IdIn(BTreeSet<String>),
    OwnedBy(String),
    /// Literal, case-sensitive substring of the name.
    NameContains(String),
    Any(Vec<OperatorFilter>),
    All(Vec<OperatorFilter>),
}

impl OperatorFilter {
    #[must_use]
    pub fn matches(&self, operator: &Operator) -> bool {
        match self {
            Self::Everything => true,
            Self::IdEquals(id) => operator.id == *id,
            Self::IdIn(ids) => ids.contains(&operator.id),
            Self::OwnedBy(user_id) => operator.user_id == *user_id,
            Self::NameContains(needle) => operator.name.contains(needle.as_str()),
            Self::Any(filters) => filters.iter().any(|filter| filter.matches(operator)),
            Self::All(filters) => filters.iter().all(|filter| filter.matches(operator)),
        }
    }
}

#[async_trait]
pub trait OperatorStore: Send + Sync {
    async fn find(
        &self,
        filter: &OperatorFilter,
        sort: SortSpec,
        limit: Option<i64>,
        skip: i64,
    ) -> Result<Vec<Operator>, OperatorStoreError>;

    async fn count(&self, filter: &OperatorFilter) -> Result<i64, OperatorStoreError>;

    async fn find_one(&self, filter: &OperatorFilter)
        -> Result<Option<Operator>, OperatorStoreError>;

    /// Returns whether a record matched.
    async fn update_one(
        &self,
        filter: &OperatorFilter,
        fields: OperatorUpdate,
    ) -> Result<bool, OperatorStoreError>;

    /// Assigns a fresh id and returns the stored record.
    async fn insert_one(&self, operator: Operator) -> Result<Operator, OperatorStoreError>;

    /// Returns whether a record was removed.
    async fn delete_one(&self, filter: &OperatorFilter) -> Result<bool, OperatorStoreError>;
}

pub fn memory() -> Arc<dyn OperatorStore> {
    Arc::new(MemoryOperatorStore::default())
}

pub fn postgres(db: Arc<OperatorDb>) -> Arc<dyn OperatorStore> {
    Arc::new(PostgresOperatorStore { db })
}

// UUIDv7 keeps id order aligned with insertion order.
fn new_operator_id() -> String {
    Uuid::now_v7().to_string()
}

fn compare_operators(left: &Operator, right: &Operator, sort: SortSpec) -> Ordering {
    let primary = match sort.field {
        SortField::Id => Ordering::Equal,
        SortField::Name => left.name.cmp(&right.name),
        SortField::Image => left.image.cmp(&right.image),
        SortField::Description => left.description.cmp(&right.description),
        SortField::DeploymentType => left.deployment_type.cmp(&right.deployment_type),
        SortField::Cost => left.cost.cmp(&right.cost),
        SortField::UserId => left.user_id.cmp(&right.user_id),
        SortField::Public => left.public.cmp(&right.public),
    };
    let by_id = left.id.cmp(&right.id);
    match sort.field {
        SortField::Id if sort.descending => by_id.reverse(),
        SortField::Id => by_id,
        _ if sort.descending => primary.reverse().then(by_id),
        _ => primary.then(by_id),
    }
}

#[derive(Default)]
struct MemoryOperatorStore {
    inner: Mutex<BTreeMap<String, Operator>>,
}

#[async_trait]
impl OperatorStore for MemoryOperatorStore {
    async fn find(
        &self,
        filter: &OperatorFilter,
        sort: SortSpec,
        limit: Option<i64>,
        skip: i64,
    ) -> Result<Vec<Operator>, OperatorStoreError> {
        let inner = self.inner.lock().await;
        let mut matched: Vec<Operator> = inner
            .values()
            .filter(|operator| filter.matches(operator))
            .cloned()
            .collect();
        drop(inner);

        matched.sort_by(|left, right| compare_operators(left, right, sort));
        let skip = usize::try_from(skip.max(0)).unwrap_or(usize::MAX);
        let page = matched.into_iter().skip(skip);
        Ok(match limit {
            Some(limit) => page
                .take(usize::try_from(limit.max(0)).unwrap_or(usize::MAX))
                .collect(),
            None => page.collect(),
        })
    }

    async fn count(&self, filter: &OperatorFilter) -> Result<i64, OperatorStoreError> {
        let inner = self.inner.lock().await;
        let count = inner
            .values()
            .filter(|operator| filter.matches(operator))
            .count();
        Ok(i64::try_from(count).unwrap_or(i64::MAX))
    }

    async fn find_one(
        &self,
        filter: &OperatorFilter,
    ) -> Result<Option<Operator>, OperatorStoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .values()
            .find(|operator| filter.matches(operator))
            .cloned())
    }

    async fn update_one(
        &self,
        filter: &OperatorFilter,
        fields: OperatorUpdate,
    ) -> Result<bool, OperatorStoreError> {
        let mut inner = self.inner.lock().await;
        let Some(operator) = inner.values_mut().find(|operator| filter.matches(operator)) else {
            return Ok(false);
        };
        operator.apply(fields);
        Ok(true)
    }

    async fn insert_one(&self, mut operator: Operator) -> Result<Operator, OperatorStoreError> {
        let mut inner = self.inner.lock().await;
        operator.id = new_operator_id();
        inner.insert(operator.id.clone(), operator.clone());
        Ok(operator)
    }

    async fn delete_one(&self, filter: &OperatorFilter) -> Result<bool, OperatorStoreError> {
        let mut inner = self.inner.lock().await;
        let Some(id) = inner
            .values()
            .find(|operator| filter.matches(operator))
            .map(|operator| operator.id.clone())
        else {
            return Ok(false);
        };
        Ok(inner.remove(&id).is_some())
    }
}

const OPERATOR_COLUMNS: &str = "id, name, image, description, deployment_type, cost, user_id, pub, config_values, inputs, outputs";

#[derive(Default)]
struct SqlParams {
    values: Vec<Box<dyn ToSql + Sync + Send>>,
}

impl SqlParams {
    fn push<T>(&mut self, value: T) -> String
    where
        T: ToSql + Sync + Send + 'static,
    {
        self.values.push(Box::new(value));
        format!("${}", self.values.len())
    }

    fn as_refs(&self) -> Vec<&(dyn ToSql + Sync)> {
        self.values
            .iter()
            .map(|value| value.as_ref() as &(dyn ToSql + Sync))
            .collect()
    }
}

fn where_clause(filter: &OperatorFilter, params: &mut SqlParams) -> String {
    match filter {
        OperatorFilter::Everything => "TRUE".to_string(),
        OperatorFilter::IdEquals(id) => format!("id = {}", params.push(id.clone())),
        OperatorFilter::IdIn(ids) if ids.is_empty() => "FALSE".to_string(),
        OperatorFilter::IdIn(ids) => format!(
            "id = ANY({})",
            params.push(ids.iter().cloned().collect::<Vec<String>>())
        ),
        OperatorFilter::OwnedBy(user_id) => format!("user_id = {}", params.push(user_id.clone())),
        OperatorFilter::NameContains(needle) => {
            format!("strpos(name, {}) > 0", params.push(needle.clone()))
        }
        OperatorFilter::Any(filters) if filters.is_empty() => "FALSE".to_string(),
        OperatorFilter::Any(filters) => join_clauses(filters, " OR ", params),
        OperatorFilter::All(filters) if filters.is_empty() => "TRUE".to_string(),
        OperatorFilter::All(filters) => join_clauses(filters, " AND ", params),
    }
}

fn join_clauses(filters: &[OperatorFilter], separator: &str, params: &mut SqlParams) -> String {
    let parts: Vec<String> = filters
        .iter()
        .map(|filter| where_clause(filter, params))
        .collect();
    format!("({})", parts.join(separator))
}

fn order_clause(sort: SortSpec) -> String {
    let direction = if sort.descending {
        "DESC NULLS LAST"
    } else {
        "ASC NULLS FIRST"
    };
    let column = match sort.field {
        SortField::Id => return format!("ORDER BY id COLLATE \"C\" {direction}"),
        SortField::Name => "name COLLATE \"C\"",
        SortField::Image => "image COLLATE \"C\"",
        SortField::Description => "description COLLATE \"C\"",
        SortField::DeploymentType => "deployment_type COLLATE \"C\"",
        SortField::Cost => "cost",
        SortField::UserId => "user_id COLLATE \"C\"",
        SortField::Public => "pub",
    };
    format!("ORDER BY {column} {direction}, id COLLATE \"C\" ASC")
}

fn values_to_json(values: &[Value]) -> Result<serde_json::Value, OperatorStoreError> {
    serde_json::to_value(values).map_err(|error| OperatorStoreError::Decode(error.to_string()))
}

fn values_from_row(row: &Row, column: &str) -> Result<Vec<Value>, OperatorStoreError> {
    let raw: serde_json::Value = row
        .try_get(column)
        .map_err(|error| OperatorStoreError::Decode(error.to_string()))?;
    serde_json::from_value(raw).map_err(|error| OperatorStoreError::Decode(error.to_string()))
}

fn map_operator_row(row: &Row) -> Result<Operator, OperatorStoreError> {
    let text = |column: &str| -> Result<String, OperatorStoreError> {
        row.try_get(column)
            .map_err(|error| OperatorStoreError::Decode(error.to_string()))
    };
    Ok(Operator {
        id: text("id")?,
        name: text("name")?,
        image: text("image")?,
        description: text("description")?,
        deployment_type: text("deployment_type")?,
        cost: row
            .try_get("cost")
            .map_err(|error| OperatorStoreError::Decode(error.to_string()))?,
        user_id: text("user_id")?,
        public: row
            .try_get("pub")
            .map_err(|error| OperatorStoreError::Decode(error.to_string()))?,
        config: values_from_row(row, "config_values")?,
        inputs: values_from_row(row, "inputs")?,
        outputs: values_from_row(row, "outputs")?,
    })
}

struct PostgresOperatorStore {
    db: Arc<OperatorDb>,
}

#[async_trait]
impl OperatorStore for PostgresOperatorStore {
    async fn find(
        &self,
        filter: &OperatorFilter,
        sort: SortSpec,
        limit: Option<i64>,
        skip: i64,
    ) -> Result<Vec<Operator>, OperatorStoreError> {
        let mut params = SqlParams::default();
        let predicate = where_clause(filter, &mut params);
        let mut statement = format!(
            "SELECT {OPERATOR_COLUMNS} FROM operators WHERE {predicate} {}",
            order_clause(sort)
        );
        if let Some(limit) = limit {
            statement.push_str(&format!(" LIMIT {}", params.push(limit.max(0))));
        }
        statement.push_str(&format!(" OFFSET {}", params.push(skip.max(0))));

        let client = self.db.client();
        let rows = client
            .lock()
            .await
            .query(statement.as_str(), &params.as_refs())
            .await
            .map_err(|error| OperatorStoreError::Db(error.to_string()))?;
        rows.iter().map(map_operator_row).collect()
    }

    async fn count(&self, filter: &OperatorFilter) -> Result<i64, OperatorStoreError> {
        let mut params = SqlParams::default();
        let predicate = where_clause(filter, &mut params);
        let statement = format!("SELECT COUNT(*) AS total FROM operators WHERE {predicate}");

        let client = self.db.client();
        let row = client
            .lock()
            .await
            .query_one(statement.as_str(), &params.as_refs())
            .await
            .map_err(|error| OperatorStoreError::Db(error.to_string()))?;
        row.try_get("total")
            .map_err(|error| OperatorStoreError::Decode(error.to_string()))
    }

    async fn find_one(
        &self,
        filter: &OperatorFilter,
    ) -> Result<Option<Operator>, OperatorStoreError> {
        let mut found = self.find(filter, SortSpec::default(), Some(1), 0).await?;
        Ok(found.pop())
    }

    async fn update_one(
        &self,
        filter: &OperatorFilter,
        fields: OperatorUpdate,
    ) -> Result<bool, OperatorStoreError> {
        let mut params = SqlParams::default();
        let config = values_to_json(&fields.config)?;
        let inputs = values_to_json(&fields.inputs)?;
        let outputs = values_to_json(&fields.outputs)?;
        let assignments = [
            format!("name = {}", params.push(fields.name)),
            format!("image = {}", params.push(fields.image)),
            format!("description = {}", params.push(fields.description)),
            format!("deployment_type = {}", params.push(fields.deployment_type)),
            format!("cost = {}", params.push(fields.cost)),
            format!("pub = {}", params.push(fields.public)),
            format!("config_values = {}", params.push(config)),
            format!("inputs = {}", params.push(inputs)),
            format!("outputs = {}", params.push(outputs)),
        ]
        .join(", ");
        let predicate = where_clause(filter, &mut params);
        let statement = format!(
            "UPDATE operators SET {assignments} WHERE id = (SELECT id FROM operators WHERE {predicate} ORDER BY id LIMIT 1)"
        );

        let client = self.db.client();
        let updated = client
            .lock()
            .await
            .execute(statement.as_str(), &params.as_refs())
            .await
            .map_err(|error| OperatorStoreError::Db(error.to_string()))?;
        Ok(updated > 0)
    }

    async fn insert_one(&self, mut operator: Operator) -> Result<Operator, OperatorStoreError> {
        operator.id = new_operator_id();
        let config = values_to_json(&operator.config)?;
        let inputs = values_to_json(&operator.inputs)?;
        let outputs = values_to_json(&operator.outputs)?;

        let client = self.db.client();
        client
            .lock()
            .await
            .execute(
                r#"
                INSERT INTO operators (
                  id,
                  name,
                  image,
                  description,
                  deployment_type,
                  cost,
                  user_id,
                  pub,
                  config_values,
                  inputs,
                  outputs
                )
                VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11)
                "#,
                &[
                    &operator.id,
                    &operator.name,
                    &operator.image,
                    &operator.description,
                    &operator.deployment_type,
                    &operator.cost,
                    &operator.user_id,
                    &operator.public,
                    &config,
                    &inputs,
                    &outputs,
                ],
            )
            .await
            .map_err(|error| OperatorStoreError::Db(error.to_string()))?;
        Ok(operator)
    }

    async fn delete_one(&self, filter: &OperatorFilter) -> Result<bool, OperatorStoreError> {
        let mut params = SqlParams::default();
        let predicate = where_clause(filter, &mut params);
        let statement = format!(
            "DELETE FROM operators WHERE id = (SELECT id FROM operators WHERE {predicate} ORDER BY id LIMIT 1)"
        );

        let client = self.db.client();
        let deleted = client
            .lock()
            .await
            .execute(statement.as_str(), &params.as_refs())
            .await
            .map_err(|error| OperatorStoreError::Db(error.to_string()))?;
        Ok(deleted > 0)
    }
}
