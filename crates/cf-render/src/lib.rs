#![forbid(unsafe_code)]

//! Pretty-printer for filter expressions. Pure functions of their input:
//! the same expression always yields byte-identical output, so previews can
//! be snapshot-tested and diffed in audit logs.

use cf_predicate::{Clause, ClauseBody, FilterExpression, IncludeExclude};
use cf_registry::{DimensionId, DimensionRegistry, Operator};
use cf_types::{ClauseValue, Scalar};

const NO_CONDITIONS: &str = "No conditions defined";
const ALL_DISABLED: &str = "All conditions are disabled";

/// Multi-line preview: a header line followed by one indented line per
/// enabled clause, each prefixed (from the second onward) with the shared
/// logic keyword.
#[must_use]
pub fn render(expression: &FilterExpression, registry: &DimensionRegistry) -> String {
    let enabled: Vec<&Clause> = expression.enabled_clauses().collect();
    if let Some(fixed) = empty_state(expression, &enabled) {
        return fixed.to_owned();
    }

    let mut out = String::from(header(expression.include_exclude));
    for (position, clause) in enabled.iter().enumerate() {
        out.push_str("\n  ");
        if position > 0 {
            out.push_str(expression.clause_logic.keyword());
            out.push(' ');
        }
        out.push_str(&render_clause(clause, registry));
    }
    out
}

/// Single-line summary of the same expression, joined with the shared logic
/// keyword.
#[must_use]
pub fn render_compact(expression: &FilterExpression, registry: &DimensionRegistry) -> String {
    let enabled: Vec<&Clause> = expression.enabled_clauses().collect();
    if let Some(fixed) = empty_state(expression, &enabled) {
        return fixed.to_owned();
    }

    let joiner = format!(" {} ", expression.clause_logic.keyword());
    let clauses = enabled
        .iter()
        .map(|clause| render_clause(clause, registry))
        .collect::<Vec<_>>()
        .join(&joiner);
    format!("{} {}", header(expression.include_exclude), clauses)
}

fn empty_state(expression: &FilterExpression, enabled: &[&Clause]) -> Option<&'static str> {
    if expression.clauses.is_empty() {
        Some(NO_CONDITIONS)
    } else if enabled.is_empty() {
        Some(ALL_DISABLED)
    } else {
        None
    }
}

fn header(include_exclude: IncludeExclude) -> &'static str {
    match include_exclude {
        IncludeExclude::Include => "Include records where:",
        IncludeExclude::Exclude => "Exclude records where:",
    }
}

fn render_clause(clause: &Clause, registry: &DimensionRegistry) -> String {
    match &clause.body {
        ClauseBody::Direct(direct) => format!(
            "{} {} {}",
            field_label(direct.field, registry),
            direct.operator.label(),
            render_value(direct.operator, &direct.value),
        )
        .trim_end()
        .to_owned(),
        ClauseBody::Relational(relational) => format!(
            "{} {} {} {} {}",
            field_label(relational.field, registry),
            relational.operator.label(),
            field_label(relational.attribute_field, registry),
            relational.attribute_operator.label(),
            render_value(relational.attribute_operator, &relational.attribute_value),
        )
        .trim_end()
        .to_owned(),
    }
}

fn field_label(id: DimensionId, registry: &DimensionRegistry) -> &str {
    registry
        .describe(id)
        .map(|dimension| dimension.label)
        .unwrap_or_else(|_| id.as_str())
}

fn render_value(operator: Operator, value: &ClauseValue) -> String {
    match operator {
        Operator::IsNull => return "empty".to_owned(),
        Operator::IsNotNull => return "not empty".to_owned(),
        _ => {}
    }
    match value {
        ClauseValue::Absent => String::new(),
        ClauseValue::One(scalar) => scalar_text(scalar),
        ClauseValue::Range(low, high) => {
            format!("{} and {}", scalar_text(low), scalar_text(high))
        }
        ClauseValue::Many(values) => {
            let inner = values
                .iter()
                .map(scalar_text)
                .collect::<Vec<_>>()
                .join(", ");
            format!("[{inner}]")
        }
    }
}

fn scalar_text(scalar: &Scalar) -> String {
    match scalar {
        Scalar::Utf8(v) => format!("'{v}'"),
        Scalar::Date(v) => format!("'{v}'"),
        other => other.to_string(),
    }
}
