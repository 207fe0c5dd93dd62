//! Restricted function bootstrap.
//!
//! Grants the restricted function to the users who qualify for it in each
//! unit, scoped to those units, and revokes it from holders who no longer
//! qualify. Grants and revocations are committed in a single graph
//! transaction.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, instrument, warn};

use entitle_registry::{GraphResult, GraphStore, QueryResult, Statement};

/// Graph naming of the restricted function and of who qualifies for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionConfig {
    /// External id of the function node.
    #[serde(default = "default_function_code")]
    pub function_code: String,
    /// Display name of the function node.
    #[serde(default = "default_function_code")]
    pub function_name: String,
    /// Profile the function is composed under.
    #[serde(default = "default_profile")]
    pub profile: String,
    /// Pattern matched against user function entries.
    #[serde(default = "default_qualifying_pattern")]
    pub qualifying_pattern: String,
    /// Delegated administrative function whose holders also qualify.
    #[serde(default = "default_admin_function")]
    pub admin_function: String,
}

fn default_function_code() -> String {
    "SCOLARITE".to_string()
}

fn default_profile() -> String {
    "Personnel".to_string()
}

fn default_qualifying_pattern() -> String {
    r".*\$(EDU|DIR)\$.*".to_string()
}

fn default_admin_function() -> String {
    "ADMIN_LOCAL".to_string()
}

impl Default for FunctionConfig {
    fn default() -> Self {
        Self {
            function_code: default_function_code(),
            function_name: default_function_code(),
            profile: default_profile(),
            qualifying_pattern: default_qualifying_pattern(),
            admin_function: default_admin_function(),
        }
    }
}

impl FunctionConfig {
    /// Suffix of every per-unit function group external id.
    #[must_use]
    pub fn group_suffix(&self) -> String {
        format!("-{}", self.function_code)
    }

    /// External id of the function group of a unit.
    #[must_use]
    pub fn group_external_id(&self, unit_id: &str) -> String {
        format!("{unit_id}{}", self.group_suffix())
    }
}

/// Result of a bootstrap pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapOutcome {
    /// Whether the function node had to be created.
    pub function_created: bool,
    /// Units the function was granted in.
    pub units_granted: u32,
    /// Distinct users holding the function after the pass.
    pub users_granted: u32,
}

/// Check that the function node exists under its profile.
pub fn check_statement(config: &FunctionConfig) -> Statement {
    Statement::new(
        "MATCH (p:Profile {name: $profile})<-[:COMPOSE]-(f:Function {externalId: $functionCode}) \
         RETURN count(*) > 0 AS exists",
    )
    .param("profile", config.profile.as_str())
    .param("functionCode", config.function_code.as_str())
}

/// Create the function node under its profile.
pub fn create_statement(config: &FunctionConfig) -> Statement {
    Statement::new(
        "MATCH (p:Profile {name: $profile}) \
         CREATE (p)<-[:COMPOSE]-(:Function {externalId: $functionCode, name: $functionName})",
    )
    .param("profile", config.profile.as_str())
    .param("functionCode", config.function_code.as_str())
    .param("functionName", config.function_name.as_str())
}

/// Qualifying users per unit: pattern matches, plus holders of the
/// administrative function directly or through a contained function.
pub fn qualifying_statement(config: &FunctionConfig) -> Statement {
    Statement::new(
        "MATCH (u:User)-[:IN]->(:ProfileGroup)-[:DEPENDS]->(s:Structure) \
         WHERE any(fn IN coalesce(u.functions, []) WHERE fn =~ $pattern) \
         RETURN s.id AS structureId, collect(u.id) AS users \
         UNION \
         MATCH (:Function {externalId: $adminFunction})<-[:CONTAINS_FUNCTION*0..1]-()\
         <-[:HAS_FUNCTION]-(u:User)-[:IN]->(:ProfileGroup)-[:DEPENDS]->(s:Structure) \
         RETURN s.id AS structureId, collect(u.id) AS users",
    )
    .param("pattern", config.qualifying_pattern.as_str())
    .param("adminFunction", config.admin_function.as_str())
}

/// Grant the function in one unit: holder relation with merged scope,
/// function group of the unit and membership of the holders.
pub fn grant_statements(config: &FunctionConfig, unit_id: &str, users: &[String]) -> [Statement; 3] {
    let group_id = config.group_external_id(unit_id);
    [
        Statement::new(
            "MATCH (u:User), (f:Function {externalId: $functionCode}) \
             WHERE u.id IN $users \
             MERGE (u)-[rf:HAS_FUNCTION]->(f) \
             SET rf.scope = CASE WHEN $scope IN coalesce(rf.scope, []) \
             THEN rf.scope ELSE coalesce(rf.scope, []) + $scope END",
        )
        .param("functionCode", config.function_code.as_str())
        .param("users", users.to_vec())
        .param("scope", unit_id),
        Statement::new(
            "MATCH (n:Structure {id: $scopeId}), (f:Function {externalId: $functionCode}) \
             MERGE (fg:Group:FunctionGroup {externalId: $externalId}) \
             ON CREATE SET fg.id = randomUUID(), fg.name = n.name + '-' + f.name \
             MERGE (n)<-[:DEPENDS]-(fg)",
        )
        .param("scopeId", unit_id)
        .param("functionCode", config.function_code.as_str())
        .param("externalId", group_id.as_str()),
        Statement::new(
            "MATCH (u:User), (fg:FunctionGroup {externalId: $externalId}) \
             WHERE u.id IN $users \
             MERGE (fg)<-[:IN]-(u)",
        )
        .param("users", users.to_vec())
        .param("externalId", group_id),
    ]
}

/// Revoke the function and group membership from holders who match neither
/// qualifying rule.
pub fn revoke_statement(config: &FunctionConfig) -> Statement {
    Statement::new(
        "MATCH (:Function {externalId: $functionCode})<-[r:HAS_FUNCTION]-(u:User)\
         -[r2:IN]->(fg:FunctionGroup) \
         WHERE fg.externalId ENDS WITH $groupSuffix \
         AND NOT any(fn IN coalesce(u.functions, []) WHERE fn =~ $pattern) \
         AND NOT (u)-[:HAS_FUNCTION]->(:Function {externalId: $adminFunction}) \
         DELETE r, r2",
    )
    .param("functionCode", config.function_code.as_str())
    .param("groupSuffix", config.group_suffix())
    .param("pattern", config.qualifying_pattern.as_str())
    .param("adminFunction", config.admin_function.as_str())
}

/// Merge the rows of the qualifying query into unit → users.
///
/// Rows of both halves of the union may name the same unit.
pub fn qualifying_pairs(result: &QueryResult) -> BTreeMap<String, BTreeSet<String>> {
    let mut pairs: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();

    for record in result.records() {
        let Some(unit_id) = record.get("structureId").and_then(Value::as_str) else {
            warn!("Qualifying row without structure id");
            continue;
        };
        let users = record
            .get("users")
            .and_then(Value::as_array)
            .map(|users| {
                users
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        if users.is_empty() {
            continue;
        }
        pairs.entry(unit_id.to_string()).or_default().extend(users);
    }

    pairs
}

fn function_exists(result: &QueryResult) -> bool {
    result
        .rows
        .first()
        .and_then(|row| row.first())
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

/// Ensure the function node, then grant and revoke in one transaction.
#[instrument(skip_all, fields(function = %config.function_code))]
pub async fn bootstrap_function(
    graph: &dyn GraphStore,
    config: &FunctionConfig,
) -> GraphResult<BootstrapOutcome> {
    let mut outcome = BootstrapOutcome::default();

    let existing = graph.execute(check_statement(config)).await?;
    if !function_exists(&existing) {
        graph.execute(create_statement(config)).await?;
        outcome.function_created = true;
        info!(profile = %config.profile, "Function node created");
    }

    let qualifying = graph.execute(qualifying_statement(config)).await?;
    let pairs = qualifying_pairs(&qualifying);

    let mut statements = Vec::with_capacity(pairs.len() * 3 + 1);
    let mut users = BTreeSet::new();
    for (unit_id, holders) in &pairs {
        let holders: Vec<String> = holders.iter().cloned().collect();
        statements.extend(grant_statements(config, unit_id, &holders));
        users.extend(holders);
    }
    statements.push(revoke_statement(config));

    debug!(statements = statements.len(), "Submitting function transaction");
    graph.execute_transaction(&statements).await?;

    outcome.units_granted = u32::try_from(pairs.len()).unwrap_or(u32::MAX);
    outcome.users_granted = u32::try_from(users.len()).unwrap_or(u32::MAX);

    info!(
        units = outcome.units_granted,
        users = outcome.users_granted,
        "Function bootstrap committed"
    );
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use entitle_registry::GraphError;
    use serde_json::json;
    use std::sync::Mutex;

    fn qualifying(rows: Vec<Vec<Value>>) -> QueryResult {
        QueryResult {
            columns: vec!["structureId".into(), "users".into()],
            rows,
        }
    }

    #[derive(Default)]
    struct RecordingGraph {
        exists: bool,
        rows: Vec<Vec<Value>>,
        fail_transaction: bool,
        executed: Mutex<Vec<String>>,
        transactions: Mutex<Vec<Vec<Statement>>>,
    }

    #[async_trait]
    impl GraphStore for RecordingGraph {
        async fn execute_transaction(&self, statements: &[Statement]) -> GraphResult<Vec<QueryResult>> {
            if statements.len() == 1 {
                let text = statements[0].statement.clone();
                self.executed.lock().unwrap().push(text.clone());
                if text.contains("count(*) > 0") {
                    return Ok(vec![QueryResult {
                        columns: vec!["exists".into()],
                        rows: vec![vec![json!(self.exists)]],
                    }]);
                }
                if text.contains("UNION") {
                    return Ok(vec![qualifying(self.rows.clone())]);
                }
                if text.starts_with("MATCH (p:Profile {name: $profile}) CREATE") {
                    return Ok(vec![QueryResult::default()]);
                }
            }
            if self.fail_transaction {
                return Err(GraphError::Statement {
                    code: "Neo.ClientError.Statement.SyntaxError".into(),
                    message: "bad".into(),
                });
            }
            self.transactions.lock().unwrap().push(statements.to_vec());
            Ok(statements.iter().map(|_| QueryResult::default()).collect())
        }
    }

    #[test]
    fn test_group_external_id() {
        let config = FunctionConfig::default();
        assert_eq!(config.group_external_id("s1"), "s1-SCOLARITE");
        assert_eq!(config.group_suffix(), "-SCOLARITE");
    }

    #[test]
    fn test_grant_statements_carry_scope() {
        let config = FunctionConfig::default();
        let users = vec!["u1".to_string(), "u2".to_string()];
        let [grant, group, members] = grant_statements(&config, "s1", &users);

        assert_eq!(grant.parameters["scope"], "s1");
        assert_eq!(grant.parameters["users"], json!(["u1", "u2"]));
        assert!(grant.statement.contains("MERGE (u)-[rf:HAS_FUNCTION]->(f)"));
        assert_eq!(group.parameters["externalId"], "s1-SCOLARITE");
        assert_eq!(members.parameters["externalId"], "s1-SCOLARITE");
    }

    #[test]
    fn test_revoke_statement_parameters() {
        let s = revoke_statement(&FunctionConfig::default());
        assert_eq!(s.parameters["groupSuffix"], "-SCOLARITE");
        assert_eq!(s.parameters["adminFunction"], "ADMIN_LOCAL");
        assert_eq!(s.parameters["pattern"], r".*\$(EDU|DIR)\$.*");
        assert!(s.statement.contains("DELETE r, r2"));
    }

    #[test]
    fn test_qualifying_pairs_merge_union_rows() {
        let result = qualifying(vec![
            vec![json!("s1"), json!(["u1", "u2"])],
            vec![json!("s2"), json!(["u3"])],
            vec![json!("s1"), json!(["u2", "u4"])],
            vec![json!("s3"), json!([])],
            vec![json!(null), json!(["u5"])],
        ]);
        let pairs = qualifying_pairs(&result);

        assert_eq!(pairs.len(), 2);
        assert_eq!(
            pairs["s1"].iter().map(String::as_str).collect::<Vec<_>>(),
            vec!["u1", "u2", "u4"]
        );
        assert!(pairs["s2"].contains("u3"));
    }

    #[tokio::test]
    async fn test_bootstrap_creates_missing_function_and_commits_once() {
        let graph = RecordingGraph {
            exists: false,
            rows: vec![
                vec![json!("s1"), json!(["u1"])],
                vec![json!("s2"), json!(["u1", "u2"])],
            ],
            ..Default::default()
        };

        let outcome = bootstrap_function(&graph, &FunctionConfig::default())
            .await
            .unwrap();

        assert!(outcome.function_created);
        assert_eq!(outcome.units_granted, 2);
        assert_eq!(outcome.users_granted, 2);

        let transactions = graph.transactions.lock().unwrap();
        assert_eq!(transactions.len(), 1);
        let statements = &transactions[0];
        assert_eq!(statements.len(), 7);
        assert_eq!(statements[0].parameters["scope"], "s1");
        assert_eq!(statements[3].parameters["scope"], "s2");
        // Revocation is part of the same transaction.
        assert!(statements[6].statement.contains("DELETE r, r2"));
    }

    #[tokio::test]
    async fn test_bootstrap_skips_creation_when_present() {
        let graph = RecordingGraph {
            exists: true,
            ..Default::default()
        };

        let outcome = bootstrap_function(&graph, &FunctionConfig::default())
            .await
            .unwrap();

        assert!(!outcome.function_created);
        assert_eq!(outcome.units_granted, 0);
        let executed = graph.executed.lock().unwrap();
        assert!(!executed.iter().any(|s| s.contains("CREATE (p)")));

        // Only the revocation runs.
        let transactions = graph.transactions.lock().unwrap();
        assert_eq!(transactions.len(), 1);
        assert_eq!(transactions[0].len(), 1);
    }

    #[tokio::test]
    async fn test_bootstrap_transaction_failure() {
        let graph = RecordingGraph {
            exists: true,
            rows: vec![vec![json!("s1"), json!(["u1"])]],
            fail_transaction: true,
            ..Default::default()
        };

        let err = bootstrap_function(&graph, &FunctionConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, GraphError::Statement { .. }));
    }
}
