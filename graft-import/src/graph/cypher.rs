//! Cypher statement builders
//!
//! Labels, property keys and relationship types come from configuration and
//! cannot be parameterized, so they are validated and backtick-quoted here.
//! All row data travels as parameters.
//!
//! Creation counts come from a transient `__graft_new` marker: it is set in
//! `ON CREATE`, read back with `coalesce`, and removed in the same statement.

use graft_common::config::GraphSchema;

use super::GraphError;

/// Transient property marking entities created by the current statement
const NEW_MARKER: &str = "__graft_new";

/// Quote an identifier for direct interpolation
pub fn quote(identifier: &str) -> Result<String, GraphError> {
    let trimmed = identifier.trim();
    if trimmed.is_empty() {
        return Err(GraphError::Schema("Empty graph identifier".to_string()));
    }
    if trimmed.chars().any(|c| c.is_control()) {
        return Err(GraphError::Schema(format!(
            "Graph identifier contains control characters: {:?}",
            identifier
        )));
    }
    Ok(format!("`{}`", trimmed.replace('`', "``")))
}

/// Schema object name derived from its parts: `[A-Za-z0-9_]` only
fn object_name(parts: &[&str]) -> String {
    let joined = parts.join("_");
    let cleaned: String = joined
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("graft_{}", cleaned.to_ascii_lowercase())
}

/// Quoted identifiers of a schema, validated once per statement
struct Names {
    summary_label: String,
    summary_key: String,
    detail_label: String,
    detail_key: String,
    relationship: String,
}

impl Names {
    fn of(schema: &GraphSchema) -> Result<Self, GraphError> {
        Ok(Self {
            summary_label: quote(&schema.summary_label)?,
            summary_key: quote(&schema.summary_key)?,
            detail_label: quote(&schema.detail_label)?,
            detail_key: quote(&schema.detail_key)?,
            relationship: quote(&schema.relationship)?,
        })
    }
}

/// Create-if-absent constraint and index statements
pub fn schema_statements(schema: &GraphSchema) -> Result<Vec<String>, GraphError> {
    let n = Names::of(schema)?;
    let mut statements = vec![format!(
        "CREATE CONSTRAINT {} IF NOT EXISTS FOR (n:{}) REQUIRE n.{} IS UNIQUE",
        object_name(&[&schema.summary_label, &schema.summary_key, "unique"]),
        n.summary_label,
        n.summary_key
    )];

    let mut indexed: Vec<&str> = vec![&schema.detail_key, &schema.summary_key];
    for field in &schema.detail_indexes {
        if !indexed.contains(&field.as_str()) {
            indexed.push(field);
        }
    }
    for field in indexed {
        statements.push(format!(
            "CREATE INDEX {} IF NOT EXISTS FOR (n:{}) ON (n.{})",
            object_name(&[&schema.detail_label, field, "idx"]),
            n.detail_label,
            quote(field)?
        ));
    }
    Ok(statements)
}

/// Upsert summary nodes from `$keys`
pub fn merge_summary_nodes(schema: &GraphSchema) -> Result<String, GraphError> {
    let n = Names::of(schema)?;
    Ok(format!(
        "UNWIND $keys AS key \
         MERGE (s:{label} {{{key}: key}}) \
         ON CREATE SET s.{m} = true \
         WITH s, coalesce(s.{m}, false) AS created \
         REMOVE s.{m} \
         RETURN sum(CASE WHEN created THEN 1 ELSE 0 END) AS nodes_created",
        label = n.summary_label,
        key = n.summary_key,
        m = NEW_MARKER,
    ))
}

/// Merge detail nodes and edges from `$rows`
///
/// Each row is `{id, summary_key, props}`. The `MATCH` drops rows without a
/// summary node; the caller derives skipped rows from the returned `matched`.
pub fn merge_detail_batch(schema: &GraphSchema) -> Result<String, GraphError> {
    let n = Names::of(schema)?;
    Ok(format!(
        "UNWIND $rows AS row \
         MATCH (s:{slabel} {{{skey}: row.summary_key}}) \
         MERGE (d:{dlabel} {{{dkey}: row.id}}) \
         ON CREATE SET d += row.props, d.{m} = true \
         MERGE (d)-[r:{rel}]->(s) \
         ON CREATE SET r.{m} = true \
         WITH d, r, coalesce(d.{m}, false) AS node_created, coalesce(r.{m}, false) AS rel_created \
         REMOVE d.{m}, r.{m} \
         RETURN count(*) AS matched, \
                sum(CASE WHEN node_created THEN 1 ELSE 0 END) AS nodes_created, \
                sum(CASE WHEN rel_created THEN 1 ELSE 0 END) AS relationships_created",
        slabel = n.summary_label,
        skey = n.summary_key,
        dlabel = n.detail_label,
        dkey = n.detail_key,
        rel = n.relationship,
        m = NEW_MARKER,
    ))
}

/// Recompute `detail_count` and `total_<measure>` on every summary node
pub fn aggregate_pass(schema: &GraphSchema, measures: &[String]) -> Result<String, GraphError> {
    let n = Names::of(schema)?;
    let mut sums = String::new();
    let mut sets = String::from("s.detail_count = detail_count");
    for (i, measure) in measures.iter().enumerate() {
        sums.push_str(&format!(", sum(coalesce(d.{}, 0.0)) AS total_{}", quote(measure)?, i));
        sets.push_str(&format!(
            ", s.{} = total_{}",
            quote(&format!("total_{}", measure))?,
            i
        ));
    }
    Ok(format!(
        "MATCH (s:{slabel}) \
         OPTIONAL MATCH (d:{dlabel})-[:{rel}]->(s) \
         WITH s, count(d) AS detail_count{sums} \
         SET {sets} \
         RETURN count(s) AS summaries",
        slabel = n.summary_label,
        dlabel = n.detail_label,
        rel = n.relationship,
        sums = sums,
        sets = sets,
    ))
}

/// Link summary nodes whose detail nodes share a value of `via_field`
///
/// Pairs are ordered by summary key so each unordered pair gets one edge.
pub fn link_summaries_pass(
    schema: &GraphSchema,
    via_field: &str,
    relationship: &str,
) -> Result<String, GraphError> {
    let n = Names::of(schema)?;
    let via = quote(via_field)?;
    Ok(format!(
        "MATCH (d:{dlabel})-[:{rel}]->(s:{slabel}) \
         WHERE d.{via} IS NOT NULL AND toString(d.{via}) <> '' \
         WITH d.{via} AS shared, collect(DISTINCT s) AS summaries \
         WHERE size(summaries) > 1 \
         UNWIND summaries AS a \
         UNWIND summaries AS b \
         WITH DISTINCT a, b \
         WHERE a.{skey} < b.{skey} \
         MERGE (a)-[l:{link}]->(b) \
         ON CREATE SET l.{m} = true \
         WITH l, coalesce(l.{m}, false) AS created \
         REMOVE l.{m} \
         RETURN sum(CASE WHEN created THEN 1 ELSE 0 END) AS relationships_created",
        dlabel = n.detail_label,
        rel = n.relationship,
        slabel = n.summary_label,
        skey = n.summary_key,
        via = via,
        link = quote(relationship)?,
        m = NEW_MARKER,
    ))
}
