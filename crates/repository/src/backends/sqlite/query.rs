//! Translation of predicates and query specs into SQLite SQL.
//!
//! Aggregates are stored as JSON documents in `aggregates.data`; property
//! paths become JSON paths and every clause is guarded on `json_type` so
//! that a clause is always true or false, never NULL. The generated SQL
//! matches [`Predicate::matches`] and the in-memory sort order.

use rusqlite::types::Value as SqlValue;
use serde_json::Value;

use crate::core::AggregateFunction;
use crate::query::{CompareOp, Predicate, QuerySpec, SortDirection};

/// A SQL fragment with its positional parameters.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SqlQuery {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

/// Converts a dotted property path into a SQLite JSON path.
///
/// `address.city` becomes `$."address"."city"`; numeric segments after the
/// first become array indexes (`tags.0` becomes `$."tags"[0]`).
pub(crate) fn json_path(path: &str) -> String {
    let mut out = String::from("$");
    for (position, segment) in path.split('.').enumerate() {
        match segment.parse::<usize>() {
            Ok(index) if position > 0 => {
                out.push('[');
                out.push_str(&index.to_string());
                out.push(']');
            }
            _ => {
                out.push_str(".\"");
                out.push_str(&segment.replace('"', "\\\""));
                out.push('"');
            }
        }
    }
    out
}

struct Builder {
    params: Vec<SqlValue>,
}

impl Builder {
    fn path(&mut self, path: &str) -> &'static str {
        self.params.push(SqlValue::Text(json_path(path)));
        "?"
    }

    fn bind(&mut self, value: SqlValue) -> &'static str {
        self.params.push(value);
        "?"
    }

    /// `json_type` of the value at `path`, with absent reading as `'null'`.
    fn type_of(&mut self, path: &str) -> String {
        format!("COALESCE(json_type(data, {}), 'null')", self.path(path))
    }

    fn extract(&mut self, path: &str) -> String {
        format!("json_extract(data, {})", self.path(path))
    }

    fn equals(&mut self, path: &str, value: &Value) -> String {
        match value {
            Value::Null => format!("({} = 'null')", self.type_of(path)),
            Value::Bool(true) => format!("({} = 'true')", self.type_of(path)),
            Value::Bool(false) => format!("({} = 'false')", self.type_of(path)),
            Value::Number(n) => {
                let ty = self.type_of(path);
                let extracted = self.extract(path);
                let bound = self.bind(number(n));
                format!("({} IN ('integer', 'real') AND {} = {})", ty, extracted, bound)
            }
            Value::String(s) => {
                let ty = self.type_of(path);
                let extracted = self.extract(path);
                let bound = self.bind(SqlValue::Text(s.clone()));
                format!("({} = 'text' AND {} = {})", ty, extracted, bound)
            }
            Value::Array(_) | Value::Object(_) => {
                let kind = if value.is_array() { "array" } else { "object" };
                let ty = self.type_of(path);
                let extracted = self.extract(path);
                let bound = self.bind(SqlValue::Text(value.to_string()));
                format!(
                    "({} = '{}' AND {} = json({}))",
                    ty, kind, extracted, bound
                )
            }
        }
    }

    fn ordered(&mut self, path: &str, cmp: CompareOp, value: &Value) -> String {
        let (types, bound) = match value {
            Value::Number(n) => ("IN ('integer', 'real')", number(n)),
            Value::String(s) => ("= 'text'", SqlValue::Text(s.clone())),
            _ => return "0".to_string(),
        };
        let ty = self.type_of(path);
        let extracted = self.extract(path);
        let placeholder = self.bind(bound);
        format!(
            "({} {} AND {} {} {})",
            ty,
            types,
            extracted,
            cmp.as_sql(),
            placeholder
        )
    }

    fn predicate(&mut self, predicate: &Predicate) -> String {
        match predicate {
            Predicate::True => "1".to_string(),
            Predicate::False => "0".to_string(),
            Predicate::Compare { path, cmp, value } => match cmp {
                CompareOp::Eq => self.equals(path, value),
                CompareOp::Ne => format!("(NOT {})", self.equals(path, value)),
                _ => self.ordered(path, *cmp, value),
            },
            Predicate::In { path, values } => {
                if values.is_empty() {
                    return "0".to_string();
                }
                let parts: Vec<String> = values.iter().map(|v| self.equals(path, v)).collect();
                format!("({})", parts.join(" OR "))
            }
            Predicate::IsNull { path } => format!("({} = 'null')", self.type_of(path)),
            Predicate::Contains { path, needle } => {
                let ty = self.type_of(path);
                let extracted = self.extract(path);
                let bound = self.bind(SqlValue::Text(needle.clone()));
                format!("({} = 'text' AND instr({}, {}) > 0)", ty, extracted, bound)
            }
            Predicate::And(children) => self.join(children, " AND ", "1"),
            Predicate::Or(children) => self.join(children, " OR ", "0"),
            Predicate::Not(inner) => format!("(NOT {})", self.predicate(inner)),
        }
    }

    fn join(&mut self, children: &[Predicate], separator: &str, empty: &str) -> String {
        if children.is_empty() {
            return empty.to_string();
        }
        let parts: Vec<String> = children.iter().map(|c| self.predicate(c)).collect();
        format!("({})", parts.join(separator))
    }
}

fn number(number: &serde_json::Number) -> SqlValue {
    match (number.as_i64(), number.as_f64()) {
        (Some(i), _) => SqlValue::Integer(i),
        (None, Some(f)) => SqlValue::Real(f),
        (None, None) => SqlValue::Null,
    }
}

fn limit(value: usize) -> SqlValue {
    SqlValue::Integer(i64::try_from(value).unwrap_or(i64::MAX))
}

/// Builds a `WHERE` clause for `predicate` within `collection`.
pub(crate) fn where_clause(collection: &str, predicate: &Predicate) -> SqlQuery {
    let mut builder = Builder {
        params: vec![SqlValue::Text(collection.to_string())],
    };
    let filter = builder.predicate(predicate);
    SqlQuery {
        sql: format!("WHERE collection = ? AND {}", filter),
        params: builder.params,
    }
}

/// `SELECT data` for a full query: filter, sort, skip, take.
pub(crate) fn select(collection: &str, query: &QuerySpec) -> SqlQuery {
    let filter = where_clause(collection, &query.predicate);
    let mut builder = Builder {
        params: filter.params,
    };
    let mut sql = format!("SELECT data FROM aggregates {} ORDER BY ", filter.sql);

    for directive in &query.sort {
        let extracted = builder.extract(&directive.path);
        let direction = match directive.direction {
            SortDirection::Ascending => "ASC",
            SortDirection::Descending => "DESC",
        };
        sql.push_str(&format!("{} {}, ", extracted, direction));
    }
    // Insertion order breaks ties.
    sql.push_str("rowid ASC");

    match (query.skip, query.take) {
        (skip, Some(take)) => {
            sql.push_str(" LIMIT ? OFFSET ?");
            builder.bind(limit(take));
            builder.bind(limit(skip.unwrap_or(0)));
        }
        (Some(skip), None) if skip > 0 => {
            sql.push_str(" LIMIT -1 OFFSET ?");
            builder.bind(limit(skip));
        }
        _ => {}
    }

    SqlQuery {
        sql,
        params: builder.params,
    }
}

/// `SELECT COUNT(*)` of the records matching `predicate`.
pub(crate) fn count(collection: &str, predicate: &Predicate) -> SqlQuery {
    let filter = where_clause(collection, predicate);
    SqlQuery {
        sql: format!("SELECT COUNT(*) FROM aggregates {}", filter.sql),
        params: filter.params,
    }
}

/// `SUM` or `AVG` over the numeric values at `path`; non-numbers are skipped.
pub(crate) fn aggregate(
    collection: &str,
    predicate: &Predicate,
    path: &str,
    function: AggregateFunction,
) -> SqlQuery {
    let filter = where_clause(collection, predicate);
    let mut builder = Builder {
        params: Vec::new(),
    };
    let extracted = builder.extract(path);
    let mut params = builder.params;
    params.extend(filter.params);

    let mut guard = Builder { params: Vec::new() };
    let ty = guard.type_of(path);
    params.extend(guard.params);

    let function = match function {
        AggregateFunction::Sum => "SUM",
        AggregateFunction::Average => "AVG",
    };
    SqlQuery {
        sql: format!(
            "SELECT {}({}) FROM aggregates {} AND {} IN ('integer', 'real')",
            function, extracted, filter.sql, ty
        ),
        params,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FieldValues;
    use crate::query::SortDirective;
    use rusqlite::{Connection, params_from_iter};
    use serde_json::json;

    fn fields(value: Value) -> FieldValues {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    fn documents() -> Vec<FieldValues> {
        vec![
            fields(json!({"id": 1, "name": "Ann", "age": 30, "address": {"city": "Berlin"}, "tags": ["a", "b"]})),
            fields(json!({"id": 2, "name": "Bob", "age": 25.5, "active": true})),
            fields(json!({"id": 3, "name": null, "age": "unknown", "active": false})),
            fields(json!({"id": 4, "name": "Annette", "address": {"city": "Paris"}, "tags": []})),
        ]
    }

    fn connection(docs: &[FieldValues]) -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        crate::backends::sqlite::schema::initialize_schema(&conn).unwrap();
        for doc in docs {
            conn.execute(
                "INSERT INTO aggregates (collection, id, data, updated_at) VALUES ('Person', ?1, ?2, 'now')",
                rusqlite::params![doc["id"].to_string(), serde_json::to_string(doc).unwrap()],
            )
            .unwrap();
        }
        conn
    }

    fn ids(conn: &Connection, query: &SqlQuery) -> Vec<i64> {
        let mut stmt = conn.prepare(&query.sql).unwrap();
        stmt.query_map(params_from_iter(query.params.iter()), |row| {
            row.get::<_, String>(0)
        })
        .unwrap()
        .map(|data| {
            let value: Value = serde_json::from_str(&data.unwrap()).unwrap();
            value["id"].as_i64().unwrap()
        })
        .collect()
    }

    #[test]
    fn test_json_path() {
        assert_eq!(json_path("name"), "$.\"name\"");
        assert_eq!(json_path("address.city"), "$.\"address\".\"city\"");
        assert_eq!(json_path("tags.0"), "$.\"tags\"[0]");
    }

    #[test]
    fn test_sql_agrees_with_in_memory_evaluation() {
        let docs = documents();
        let conn = connection(&docs);
        let predicates = vec![
            Predicate::True,
            Predicate::False,
            Predicate::eq("name", "Ann"),
            Predicate::ne("name", "Ann"),
            Predicate::eq("name", Value::Null),
            Predicate::eq("age", 30.0),
            Predicate::gt("age", 26),
            Predicate::le("age", 30),
            Predicate::lt("name", "B"),
            Predicate::eq("active", true),
            Predicate::eq("active", false),
            Predicate::ne("active", true),
            Predicate::eq("address.city", "Paris"),
            Predicate::eq("tags.1", "b"),
            Predicate::eq("tags", json!(["a", "b"])),
            Predicate::eq("address", json!({"city": "Berlin"})),
            Predicate::is_in("id", [1, 3, 9]),
            Predicate::is_in("id", Vec::<i64>::new()),
            Predicate::is_null("active"),
            Predicate::contains("name", "nn"),
            Predicate::contains("age", "3"),
            Predicate::gt("age", true),
            Predicate::And(vec![]),
            Predicate::Or(vec![]),
            Predicate::contains("name", "Ann").and(Predicate::ne("age", 30)),
            Predicate::eq("id", 2).or(Predicate::is_null("address")).negate(),
        ];

        for predicate in predicates {
            let expected: Vec<i64> = docs
                .iter()
                .filter(|d| predicate.matches(d))
                .map(|d| d["id"].as_i64().unwrap())
                .collect();
            let query = select("Person", &QuerySpec::filter(predicate.clone()));
            assert_eq!(ids(&conn, &query), expected, "predicate {:?}", predicate);
        }
    }

    #[test]
    fn test_sort_and_paging_agree_with_in_memory_order() {
        let docs = documents();
        let conn = connection(&docs);
        let specs = vec![
            QuerySpec {
                sort: vec![SortDirective::ascending("name")],
                ..QuerySpec::default()
            },
            QuerySpec {
                sort: vec![SortDirective::descending("age")],
                ..QuerySpec::default()
            },
            QuerySpec {
                sort: vec![SortDirective::ascending("address.city")],
                skip: Some(1),
                take: Some(2),
                ..QuerySpec::default()
            },
            QuerySpec {
                skip: Some(3),
                ..QuerySpec::default()
            },
        ];

        for spec in specs {
            let expected: Vec<i64> = spec
                .apply(docs.clone())
                .iter()
                .map(|d| d["id"].as_i64().unwrap())
                .collect();
            assert_eq!(ids(&conn, &select("Person", &spec)), expected, "{:?}", spec);
        }
    }

    #[test]
    fn test_count_and_aggregates() {
        let conn = connection(&documents());
        let query = count("Person", &Predicate::contains("name", "Ann"));
        let n: i64 = conn
            .query_row(&query.sql, params_from_iter(query.params.iter()), |row| row.get(0))
            .unwrap();
        assert_eq!(n, 2);

        let query = aggregate("Person", &Predicate::True, "age", AggregateFunction::Sum);
        let total: f64 = conn
            .query_row(&query.sql, params_from_iter(query.params.iter()), |row| row.get(0))
            .unwrap();
        assert_eq!(total, 55.5);

        let query = aggregate("Person", &Predicate::False, "age", AggregateFunction::Average);
        let mean: Option<f64> = conn
            .query_row(&query.sql, params_from_iter(query.params.iter()), |row| row.get(0))
            .unwrap();
        assert_eq!(mean, None);
    }
}
