//! Nested parameter scopes accumulated during one compilation.
//!
//! Scopes form an arena owned by the compiling builder: combinators allocate
//! child scopes and atoms append conditions, all addressed by [`ScopeId`].
//! Rendering walks the arena once, producing SQL text and the bind values in
//! placeholder order. The arena lives for a single compile call.

/// Index of one scope inside a [`Parameters`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScopeId(usize);

/// How a scope joins its parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connective {
    And,
    Or,
}

impl Connective {
    fn joiner(&self) -> &'static str {
        match self {
            Connective::And => " AND ",
            Connective::Or => " OR ",
        }
    }

    /// What an empty scope renders to: a conjunction of nothing holds, a
    /// disjunction of nothing does not.
    fn vacuous_sql(&self) -> &'static str {
        match self {
            Connective::And => "1=1",
            Connective::Or => "1=0",
        }
    }
}

#[derive(Debug)]
enum Part {
    Condition {
        sql: String,
        binds: Vec<serde_json::Value>,
    },
    Scope(ScopeId),
    NegatedScope(ScopeId),
}

#[derive(Debug)]
struct Scope {
    connective: Connective,
    parts: Vec<Part>,
}

/// Arena of nested parameter scopes.
#[derive(Debug)]
pub struct Parameters {
    scopes: Vec<Scope>,
}

impl Parameters {
    /// Create an arena holding a single empty root scope.
    pub fn new(root: Connective) -> (Self, ScopeId) {
        let params = Self {
            scopes: vec![Scope {
                connective: root,
                parts: Vec::new(),
            }],
        };
        (params, ScopeId(0))
    }

    /// Append a condition with its bind values to a scope.
    pub fn add_condition(
        &mut self,
        scope: ScopeId,
        sql: impl Into<String>,
        binds: Vec<serde_json::Value>,
    ) {
        self.scopes[scope.0].parts.push(Part::Condition {
            sql: sql.into(),
            binds,
        });
    }

    /// Allocate a child scope nested inside `parent`.
    pub fn add_scope(&mut self, parent: ScopeId, connective: Connective) -> ScopeId {
        let id = self.push_scope(connective);
        self.scopes[parent.0].parts.push(Part::Scope(id));
        id
    }

    /// Allocate a child scope rendered under `NOT (...)`.
    pub fn add_negated_scope(&mut self, parent: ScopeId, connective: Connective) -> ScopeId {
        let id = self.push_scope(connective);
        self.scopes[parent.0].parts.push(Part::NegatedScope(id));
        id
    }

    fn push_scope(&mut self, connective: Connective) -> ScopeId {
        let id = ScopeId(self.scopes.len());
        self.scopes.push(Scope {
            connective,
            parts: Vec::new(),
        });
        id
    }

    /// Render a scope to SQL, collecting bind values in placeholder order.
    pub fn render(&self, scope: ScopeId) -> (String, Vec<serde_json::Value>) {
        let mut binds = Vec::new();
        let sql = self.render_scope(scope, &mut binds);
        (sql, binds)
    }

    fn render_scope(&self, scope: ScopeId, binds: &mut Vec<serde_json::Value>) -> String {
        let scope = &self.scopes[scope.0];
        if scope.parts.is_empty() {
            return scope.connective.vacuous_sql().to_string();
        }

        let rendered: Vec<String> = scope
            .parts
            .iter()
            .map(|part| match part {
                Part::Condition { sql, binds: b } => {
                    binds.extend(b.iter().cloned());
                    sql.clone()
                }
                Part::Scope(id) => format!("({})", self.render_scope(*id, binds)),
                Part::NegatedScope(id) => format!("NOT ({})", self.render_scope(*id, binds)),
            })
            .collect();
        rendered.join(scope.connective.joiner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conditions_join_with_connective() {
        let (mut params, root) = Parameters::new(Connective::And);
        params.add_condition(root, "a = ?", vec![serde_json::json!(1)]);
        params.add_condition(root, "b = ?", vec![serde_json::json!(2)]);

        let (sql, binds) = params.render(root);
        assert_eq!(sql, "a = ? AND b = ?");
        assert_eq!(binds, vec![serde_json::json!(1), serde_json::json!(2)]);
    }

    #[test]
    fn test_nested_scopes_parenthesized() {
        let (mut params, root) = Parameters::new(Connective::And);
        params.add_condition(root, "a = ?", vec![serde_json::json!("x")]);
        let or = params.add_scope(root, Connective::Or);
        params.add_condition(or, "b = ?", vec![serde_json::json!("y")]);
        params.add_condition(or, "c = ?", vec![serde_json::json!("z")]);

        let (sql, binds) = params.render(root);
        assert_eq!(sql, "a = ? AND (b = ? OR c = ?)");
        assert_eq!(binds.len(), 3);
    }

    #[test]
    fn test_negated_scope() {
        let (mut params, root) = Parameters::new(Connective::And);
        let not = params.add_negated_scope(root, Connective::And);
        params.add_condition(not, "a = ?", vec![serde_json::json!(1)]);

        let (sql, _) = params.render(root);
        assert_eq!(sql, "NOT (a = ?)");
    }

    #[test]
    fn test_empty_scopes_render_vacuously() {
        let (params, root) = Parameters::new(Connective::And);
        assert_eq!(params.render(root).0, "1=1");

        let (mut params, root) = Parameters::new(Connective::And);
        params.add_scope(root, Connective::Or);
        assert_eq!(params.render(root).0, "(1=0)");
    }

    #[test]
    fn test_bind_order_follows_rendering_order() {
        let (mut params, root) = Parameters::new(Connective::And);
        let or = params.add_scope(root, Connective::Or);
        // Added to the outer scope after the inner scope was created: the
        // outer condition still renders (and binds) after it.
        params.add_condition(root, "tail = ?", vec![serde_json::json!("last")]);
        params.add_condition(or, "head = ?", vec![serde_json::json!("first")]);

        let (sql, binds) = params.render(root);
        assert_eq!(sql, "(head = ?) AND tail = ?");
        assert_eq!(
            binds,
            vec![serde_json::json!("first"), serde_json::json!("last")]
        );
    }
}
