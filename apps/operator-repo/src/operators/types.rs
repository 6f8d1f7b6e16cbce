use serde::{Deserialize, Serialize};

/// Named, typed port or config slot of an operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Value {
    pub name: String,
    #[serde(rename = "type")]
    pub value_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operator {
    /// Assigned by the store on insert; ignored in create payloads.
    #[serde(rename = "_id", default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "deploymentType", default)]
    pub deployment_type: String,
    #[serde(default)]
    pub cost: Option<i64>,
    /// Set once from the creating caller; never taken from update payloads.
    #[serde(rename = "userId", default)]
    pub user_id: String,
    #[serde(rename = "pub", default)]
    pub public: bool,
    #[serde(rename = "config_values", default)]
    pub config: Vec<Value>,
    #[serde(default)]
    pub inputs: Vec<Value>,
    #[serde(default)]
    pub outputs: Vec<Value>,
}

/// The fields an update overwrites wholesale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorUpdate {
    pub name: String,
    pub image: String,
    pub description: String,
    pub deployment_type: String,
    pub cost: Option<i64>,
    pub public: bool,
    pub config: Vec<Value>,
    pub inputs: Vec<Value>,
    pub outputs: Vec<Value>,
}

impl From<Operator> for OperatorUpdate {
    fn from(operator: Operator) -> Self {
        Self {
            name: operator.name,
            image: operator.image,
            description: operator.description,
            deployment_type: operator.deployment_type,
            cost: operator.cost,
            public: operator.public,
            config: operator.config,
            inputs: operator.inputs,
            outputs: operator.outputs,
        }
    }
}

impl Operator {
    pub fn apply(&mut self, update: OperatorUpdate) {
        self.name = update.name;
        self.image = update.image;
        self.description = update.description;
        self.deployment_type = update.deployment_type;
        self.cost = update.cost;
        self.public = update.public;
        self.config = update.config;
        self.inputs = update.inputs;
        self.outputs = update.outputs;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorResponse {
    pub operators: Vec<Operator>,
    #[serde(rename = "totalCount")]
    pub total: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SortField {
    Id,
    Name,
    Image,
    Description,
    DeploymentType,
    Cost,
    UserId,
    Public,
}

impl SortField {
    /// Accepts the JSON field names plus a few snake_case aliases.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "_id" | "id" => Some(Self::Id),
            "name" => Some(Self::Name),
            "image" => Some(Self::Image),
            "description" => Some(Self::Description),
            "deploymentType" | "deployment_type" => Some(Self::DeploymentType),
            "cost" => Some(Self::Cost),
            "userId" | "user_id" => Some(Self::UserId),
            "pub" => Some(Self::Public),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SortSpec {
    pub field: SortField,
    pub descending: bool,
}

impl Default for SortSpec {
    fn default() -> Self {
        Self {
            field: SortField::Id,
            descending: false,
        }
    }
}

/// Resolved identity of a request: who is asking and with which token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub user_id: String,
    pub auth_token: String,
}

impl Caller {
    #[must_use]
    pub fn new(user_id: impl Into<String>, auth_token: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            auth_token: auth_token.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchDeleteFailure {
    pub id: String,
    pub reason: String,
}

/// Outcome of a best-effort batch delete, one bucket per kind of outcome.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchDeleteReport {
    pub deleted: Vec<String>,
    pub invalid: Vec<String>,
    pub unauthorized: Vec<String>,
    pub not_found: Vec<String>,
    pub failed: Vec<BatchDeleteFailure>,
}

impl BatchDeleteReport {
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.invalid.is_empty()
            && self.unauthorized.is_empty()
            && self.not_found.is_empty()
            && self.failed.is_empty()
    }
}
