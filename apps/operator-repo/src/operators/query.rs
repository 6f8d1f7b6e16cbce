use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use permissions_client::{ListOptions, Permission, PermissionsClient};

use crate::operators::access::TOPIC;
use crate::operators::bounded_as_caller;
use crate::operators::service::OperatorError;
use crate::operators::store::OperatorFilter;
use crate::operators::types::{SortField, SortSpec};

/// Listing directives parsed once from the raw query string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryArgs {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub sort: Option<SortSpec>,
    pub search: Option<String>,
}

impl QueryArgs {
    /// Unknown keys and malformed values are dropped; the first value of a
    /// repeated key wins.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut args = Self::default();
        let mut seen = BTreeSet::new();
        for (key, value) in pairs {
            let key = key.as_ref();
            if !seen.insert(key.to_string()) {
                continue;
            }
            let raw = value.as_ref();
            let value = raw.trim();
            match key {
                "limit" => args.limit = value.parse::<i64>().ok().filter(|limit| *limit > 0),
                "offset" => args.offset = value.parse::<i64>().ok().filter(|offset| *offset >= 0),
                "order" => args.sort = parse_order(value),
                // Search text is matched verbatim; only an all-blank value is dropped.
                "search" => args.search = (!value.is_empty()).then(|| raw.to_string()),
                _ => {}
            }
        }
        args
    }
}

fn parse_order(raw: &str) -> Option<SortSpec> {
    let (field, direction) = raw.split_once(':')?;
    let descending = match direction.trim().to_ascii_lowercase().as_str() {
        "asc" => false,
        "desc" => true,
        _ => return None,
    };
    Some(SortSpec {
        field: SortField::parse(field)?,
        descending,
    })
}

/// Store-level execution plan for one listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorQuery {
    pub filter: OperatorFilter,
    pub sort: SortSpec,
    pub limit: Option<i64>,
    pub skip: i64,
}

#[derive(Clone)]
pub struct QueryBuilder {
    permissions: Arc<dyn PermissionsClient>,
    timeout: Duration,
}

impl QueryBuilder {
    pub fn new(permissions: Arc<dyn PermissionsClient>, timeout: Duration) -> Self {
        Self {
            permissions,
            timeout,
        }
    }

    pub async fn build(
        &self,
        caller_id: &str,
        is_admin: bool,
        args: &QueryArgs,
        auth_token: &str,
    ) -> Result<OperatorQuery, OperatorError> {
        let scope = if is_admin {
            OperatorFilter::Everything
        } else {
            let readable = bounded_as_caller(
                self.timeout,
                self.permissions.list_accessible_resource_ids(
                    auth_token,
                    TOPIC,
                    ListOptions::default(),
                    Permission::Read,
                ),
            )
            .await?;
            // Owners always see their own records, even before a grant exists.
            OperatorFilter::Any(vec![
                OperatorFilter::IdIn(readable.into_iter().collect()),
                OperatorFilter::OwnedBy(caller_id.to_string()),
            ])
        };

        let filter = match &args.search {
            Some(search) => OperatorFilter::All(vec![
                scope,
                OperatorFilter::NameContains(search.clone()),
            ]),
            None => scope,
        };

        Ok(OperatorQuery {
            filter,
            sort: args.sort.unwrap_or_default(),
            limit: args.limit,
            skip: args.offset.unwrap_or(0),
        })
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use permissions_client::{MemoryPermissionsClient, Principal};

    use super::*;
    use crate::operators::types::Operator;

    #[test]
    fn parses_recognised_arguments() {
        let args = QueryArgs::from_pairs([
            ("limit", "10"),
            ("offset", "20"),
            ("order", "deploymentType:desc"),
            ("search", "adder"),
            ("unknown", "value"),
        ]);

        assert_eq!(args.limit, Some(10));
        assert_eq!(args.offset, Some(20));
        assert_eq!(
            args.sort,
            Some(SortSpec {
                field: SortField::DeploymentType,
                descending: true,
            })
        );
        assert_eq!(args.search.as_deref(), Some("adder"));
    }

    #[test]
    fn malformed_arguments_are_ignored() {
        let args = QueryArgs::from_pairs([
            ("limit", "0"),
            ("offset", "-3"),
            ("order", "name"),
            ("search", "  "),
        ]);
        assert_eq!(args, QueryArgs::default());

        let args = QueryArgs::from_pairs([
            ("limit", "ten"),
            ("offset", "x"),
            ("order", "colour:asc"),
        ]);
        assert_eq!(args, QueryArgs::default());

        let args = QueryArgs::from_pairs([("order", "cost:sideways")]);
        assert_eq!(args.sort, None);
    }

    #[test]
    fn search_text_keeps_surrounding_whitespace() {
        let args = QueryArgs::from_pairs([("search", "avg "), ("limit", " 5 ")]);
        assert_eq!(args.search.as_deref(), Some("avg "));
        assert_eq!(args.limit, Some(5));

        let filter = OperatorFilter::NameContains("avg ".to_string());
        let named = |name: &str| Operator {
            id: String::new(),
            name: name.to_string(),
            image: String::new(),
            description: String::new(),
            deployment_type: String::new(),
            cost: None,
            user_id: "u1".to_string(),
            public: false,
            config: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
        };
        assert!(filter.matches(&named("avg sum")));
        assert!(!filter.matches(&named("avgx")));
    }

    #[test]
    fn first_value_of_repeated_key_wins() {
        let args = QueryArgs::from_pairs([("limit", "5"), ("limit", "50")]);
        assert_eq!(args.limit, Some(5));
    }

    #[tokio::test]
    async fn admin_scope_skips_permission_lookup() -> Result<()> {
        let permissions = Arc::new(MemoryPermissionsClient::new("admin-token"));
        let builder = QueryBuilder::new(permissions, Duration::from_secs(1));

        let query = builder
            .build("u1", true, &QueryArgs::default(), "")
            .await?;
        assert_eq!(query.filter, OperatorFilter::Everything);
        assert_eq!(query.sort, SortSpec::default());
        assert_eq!(query.limit, None);
        assert_eq!(query.skip, 0);

        let searched = builder
            .build(
                "u1",
                true,
                &QueryArgs::from_pairs([("search", "sum")]),
                "",
            )
            .await?;
        assert_eq!(
            searched.filter,
            OperatorFilter::All(vec![
                OperatorFilter::Everything,
                OperatorFilter::NameContains("sum".to_string()),
            ])
        );
        Ok(())
    }

    #[tokio::test]
    async fn caller_scope_is_readable_ids_or_owned_and_search() -> Result<()> {
        let permissions = Arc::new(MemoryPermissionsClient::new("admin-token"));
        permissions
            .register_token("u2-token", Principal::user("u2"))
            .await;
        let builder = QueryBuilder::new(permissions, Duration::from_secs(1));

        let args = QueryArgs::from_pairs([("search", "avg"), ("limit", "3")]);
        let first = builder.build("u2", false, &args, "u2-token").await?;
        let second = builder.build("u2", false, &args, "u2-token").await?;

        assert_eq!(first, second);
        assert_eq!(
            first.filter,
            OperatorFilter::All(vec![
                OperatorFilter::Any(vec![
                    OperatorFilter::IdIn(BTreeSet::new()),
                    OperatorFilter::OwnedBy("u2".to_string()),
                ]),
                OperatorFilter::NameContains("avg".to_string()),
            ])
        );
        assert_eq!(first.limit, Some(3));
        Ok(())
    }
}
