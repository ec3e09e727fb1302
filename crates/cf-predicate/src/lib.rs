#![forbid(unsafe_code)]

use std::fmt;

use cf_registry::{
    DimensionId, DimensionRegistry, Operator, OperatorFamily, RegistryError,
};
use cf_types::{ClauseValue, DataType, TypeError, ValueShape};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClauseId(pub String);

impl ClauseId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for ClauseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A direct predicate: the field's own value compared through a direct
/// operator.
#[derive(Debug, Clone, PartialEq)]
pub struct DirectClause {
    pub field: DimensionId,
    pub operator: Operator,
    pub value: ClauseValue,
}

/// An entity predicate: a relational operator testing one attribute of an
/// entity dimension. The grammar is exactly one level deep — the attribute
/// operator must itself be direct.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationalClause {
    pub field: DimensionId,
    pub operator: Operator,
    pub attribute_field: DimensionId,
    pub attribute_operator: Operator,
    pub attribute_value: ClauseValue,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClauseBody {
    Direct(DirectClause),
    Relational(RelationalClause),
}

impl ClauseBody {
    #[must_use]
    pub fn field(&self) -> DimensionId {
        match self {
            Self::Direct(c) => c.field,
            Self::Relational(c) => c.field,
        }
    }

    #[must_use]
    pub fn operator(&self) -> Operator {
        match self {
            Self::Direct(c) => c.operator,
            Self::Relational(c) => c.operator,
        }
    }
}

/// Clause envelope shared by both variants. Disabled clauses stay in the
/// expression for later re-enabling but are skipped by evaluation and by
/// the pretty-printer.
#[derive(Debug, Clone, PartialEq)]
pub struct Clause {
    pub id: ClauseId,
    pub enabled: bool,
    pub body: ClauseBody,
}

impl Clause {
    #[must_use]
    pub fn direct(
        id: impl Into<String>,
        field: DimensionId,
        operator: Operator,
        value: ClauseValue,
    ) -> Self {
        Self {
            id: ClauseId::new(id),
            enabled: true,
            body: ClauseBody::Direct(DirectClause {
                field,
                operator,
                value,
            }),
        }
    }

    #[must_use]
    pub fn relational(
        id: impl Into<String>,
        field: DimensionId,
        operator: Operator,
        attribute_field: DimensionId,
        attribute_operator: Operator,
        attribute_value: ClauseValue,
    ) -> Self {
        Self {
            id: ClauseId::new(id),
            enabled: true,
            body: ClauseBody::Relational(RelationalClause {
                field,
                operator,
                attribute_field,
                attribute_operator,
                attribute_value,
            }),
        }
    }

    /// Builder transition for a field change: the operator resets to the
    /// field's first allowed operator and the value is cleared.
    pub fn with_field(
        mut self,
        field: DimensionId,
        registry: &DimensionRegistry,
    ) -> Result<Self, RegistryError> {
        let operator = registry.default_operator(field)?;
        self.body = ClauseBody::Direct(DirectClause {
            field,
            operator,
            value: ClauseValue::Absent,
        });
        Ok(self)
    }

    /// Builder transition for an operator change. Switching onto a
    /// relational operator defaults the attribute field and resets the
    /// attribute operator/value; a direct-to-direct switch keeps the value
    /// only when its shape still fits.
    pub fn with_operator(
        mut self,
        operator: Operator,
        registry: &DimensionRegistry,
    ) -> Result<Self, RegistryError> {
        let field = self.body.field();
        self.body = match operator.family() {
            OperatorFamily::Relational => {
                let attribute_field = registry.default_entity_attribute();
                let attribute_operator = registry.default_operator(attribute_field)?;
                ClauseBody::Relational(RelationalClause {
                    field,
                    operator,
                    attribute_field,
                    attribute_operator,
                    attribute_value: ClauseValue::Absent,
                })
            }
            OperatorFamily::Direct => {
                let value = match &self.body {
                    ClauseBody::Direct(c) if c.value.shape() == operator.value_shape() => {
                        c.value.clone()
                    }
                    _ => ClauseValue::Absent,
                };
                ClauseBody::Direct(DirectClause {
                    field,
                    operator,
                    value,
                })
            }
        };
        Ok(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IncludeExclude {
    Include,
    Exclude,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClauseLogic {
    And,
    Or,
}

impl ClauseLogic {
    #[must_use]
    pub fn keyword(self) -> &'static str {
        match self {
            Self::And => "AND",
            Self::Or => "OR",
        }
    }
}

/// A flat predicate: all enabled clauses combined under one shared logic,
/// optionally negated as a whole by the include/exclude toggle.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterExpression {
    pub include_exclude: IncludeExclude,
    pub clause_logic: ClauseLogic,
    pub clauses: Vec<Clause>,
}

impl FilterExpression {
    #[must_use]
    pub fn new(include_exclude: IncludeExclude, clause_logic: ClauseLogic) -> Self {
        Self {
            include_exclude,
            clause_logic,
            clauses: Vec::new(),
        }
    }

    pub fn push(&mut self, clause: Clause) {
        self.clauses.push(clause);
    }

    pub fn enabled_clauses(&self) -> impl Iterator<Item = &Clause> {
        self.clauses.iter().filter(|clause| clause.enabled)
    }

    /// Clauses eligible for evaluation: enabled and passing the grammar
    /// rules. Invalid clauses are treated as disabled until corrected.
    #[must_use]
    pub fn evaluable_clauses(&self, registry: &DimensionRegistry) -> Vec<&Clause> {
        self.enabled_clauses()
            .filter(|clause| validate_clause(clause, registry).is_ok())
            .collect()
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("clause {clause}: operator {operator:?} is not allowed for field {field}")]
    OperatorNotAllowed {
        clause: ClauseId,
        field: DimensionId,
        operator: Operator,
    },
    #[error("clause {clause}: relational operator {operator:?} requires attribute field and attribute operator")]
    MissingAttribute {
        clause: ClauseId,
        operator: Operator,
    },
    #[error("clause {clause}: field {field} is not an entity dimension")]
    RelationalOnNonEntity {
        clause: ClauseId,
        field: DimensionId,
    },
    #[error("clause {clause}: attribute clauses require a relational operator, found {operator:?}")]
    NotRelationalOperator {
        clause: ClauseId,
        operator: Operator,
    },
    #[error("clause {clause}: attribute operator {attribute_operator:?} must be direct")]
    AttributeOperatorNotDirect {
        clause: ClauseId,
        attribute_operator: Operator,
    },
    #[error("clause {clause}: attribute operator {attribute_operator:?} is not allowed for attribute field {attribute_field}")]
    AttributeOperatorNotAllowed {
        clause: ClauseId,
        attribute_field: DimensionId,
        attribute_operator: Operator,
    },
    #[error("clause {clause}: operator {operator:?} expects a {expected:?} value, found {found:?}")]
    ValueShapeMismatch {
        clause: ClauseId,
        operator: Operator,
        expected: ValueShape,
        found: ValueShape,
    },
    #[error("clause {clause}: value of type {found:?} does not match field type {expected:?}")]
    ValueTypeMismatch {
        clause: ClauseId,
        expected: DataType,
        found: DataType,
    },
    #[error("clause {clause}: between range is out of order ({low} > {high})")]
    BetweenOutOfOrder {
        clause: ClauseId,
        low: String,
        high: String,
    },
    #[error("clause {clause}: operator {operator:?} requires a non-empty list")]
    EmptyValueList {
        clause: ClauseId,
        operator: Operator,
    },
    #[error("clause {clause}: operator {operator:?} requires a non-empty scalar")]
    EmptyScalar {
        clause: ClauseId,
        operator: Operator,
    },
    #[error("clause {clause}: pattern {pattern:?} does not compile: {message}")]
    InvalidPattern {
        clause: ClauseId,
        pattern: String,
        message: String,
    },
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl ValidationError {
    #[must_use]
    pub fn clause_id(&self) -> Option<&ClauseId> {
        match self {
            Self::OperatorNotAllowed { clause, .. }
            | Self::MissingAttribute { clause, .. }
            | Self::RelationalOnNonEntity { clause, .. }
            | Self::NotRelationalOperator { clause, .. }
            | Self::AttributeOperatorNotDirect { clause, .. }
            | Self::AttributeOperatorNotAllowed { clause, .. }
            | Self::ValueShapeMismatch { clause, .. }
            | Self::ValueTypeMismatch { clause, .. }
            | Self::BetweenOutOfOrder { clause, .. }
            | Self::EmptyValueList { clause, .. }
            | Self::EmptyScalar { clause, .. }
            | Self::InvalidPattern { clause, .. } => Some(clause),
            Self::Registry(_) => None,
        }
    }
}

/// Payload arity for a relational clause: the list-flavored relational
/// operators demand a list regardless of the attribute operator; `has` and
/// `does_not_have` defer to the attribute operator's own shape.
#[must_use]
pub fn relational_payload_shape(operator: Operator, attribute_operator: Operator) -> ValueShape {
    match operator {
        Operator::OnlyHas | Operator::HasAll | Operator::HasAny => ValueShape::List,
        _ => attribute_operator.value_shape(),
    }
}

/// Validate one clause against the grammar, returning the first violated
/// rule. Rule order: operator membership, relational structure, value shape.
pub fn validate_clause(
    clause: &Clause,
    registry: &DimensionRegistry,
) -> Result<(), ValidationError> {
    let field = clause.body.field();
    let operator = clause.body.operator();

    // Rule 1: operator must be declared for the field.
    if !registry.operators_for(field)?.contains(&operator) {
        return Err(ValidationError::OperatorNotAllowed {
            clause: clause.id.clone(),
            field,
            operator,
        });
    }

    match &clause.body {
        ClauseBody::Direct(direct) => {
            // Rule 2: a relational operator without attribute members.
            if operator.is_relational() {
                return Err(ValidationError::MissingAttribute {
                    clause: clause.id.clone(),
                    operator,
                });
            }
            let data_type = registry.describe(field)?.data_type;
            check_value(
                &clause.id,
                operator,
                operator.value_shape(),
                data_type,
                &direct.value,
            )
        }
        ClauseBody::Relational(relational) => {
            // Rule 2: entity field, direct attribute operator, attribute
            // operator declared for the attribute field.
            if !operator.is_relational() {
                return Err(ValidationError::NotRelationalOperator {
                    clause: clause.id.clone(),
                    operator,
                });
            }
            if !registry.is_entity(field)? {
                return Err(ValidationError::RelationalOnNonEntity {
                    clause: clause.id.clone(),
                    field,
                });
            }
            if relational.attribute_operator.is_relational() {
                return Err(ValidationError::AttributeOperatorNotDirect {
                    clause: clause.id.clone(),
                    attribute_operator: relational.attribute_operator,
                });
            }
            if !registry
                .operators_for(relational.attribute_field)?
                .contains(&relational.attribute_operator)
            {
                return Err(ValidationError::AttributeOperatorNotAllowed {
                    clause: clause.id.clone(),
                    attribute_field: relational.attribute_field,
                    attribute_operator: relational.attribute_operator,
                });
            }
            let data_type = registry.describe(relational.attribute_field)?.data_type;
            check_value(
                &clause.id,
                relational.attribute_operator,
                relational_payload_shape(operator, relational.attribute_operator),
                data_type,
                &relational.attribute_value,
            )
        }
    }
}

/// Rule 3: value shape, element types, and shape-specific constraints.
fn check_value(
    clause: &ClauseId,
    operator: Operator,
    expected: ValueShape,
    data_type: DataType,
    value: &ClauseValue,
) -> Result<(), ValidationError> {
    let found = value.shape();
    if found != expected {
        return Err(ValidationError::ValueShapeMismatch {
            clause: clause.clone(),
            operator,
            expected,
            found,
        });
    }

    match value {
        ClauseValue::Absent => Ok(()),
        ClauseValue::One(scalar) => {
            check_scalar_type(clause, data_type, scalar)?;
            if scalar.is_empty_text() {
                return Err(ValidationError::EmptyScalar {
                    clause: clause.clone(),
                    operator,
                });
            }
            if operator == Operator::RegexMatch {
                if let cf_types::Scalar::Utf8(pattern) = scalar {
                    if let Err(err) = regex::Regex::new(pattern) {
                        return Err(ValidationError::InvalidPattern {
                            clause: clause.clone(),
                            pattern: pattern.clone(),
                            message: err.to_string(),
                        });
                    }
                }
            }
            Ok(())
        }
        ClauseValue::Range(low, high) => {
            check_scalar_type(clause, data_type, low)?;
            check_scalar_type(clause, data_type, high)?;
            // Ordering is only checkable for ordered types; text bounds pass.
            if matches!(data_type, DataType::Number | DataType::Date)
                && low.ordered_cmp(high) == Some(std::cmp::Ordering::Greater)
            {
                return Err(ValidationError::BetweenOutOfOrder {
                    clause: clause.clone(),
                    low: low.to_string(),
                    high: high.to_string(),
                });
            }
            Ok(())
        }
        ClauseValue::Many(values) => {
            if values.is_empty() {
                return Err(ValidationError::EmptyValueList {
                    clause: clause.clone(),
                    operator,
                });
            }
            for scalar in values {
                check_scalar_type(clause, data_type, scalar)?;
            }
            Ok(())
        }
    }
}

fn check_scalar_type(
    clause: &ClauseId,
    expected: DataType,
    scalar: &cf_types::Scalar,
) -> Result<(), ValidationError> {
    let found = scalar.data_type();
    if found == expected {
        Ok(())
    } else {
        Err(ValidationError::ValueTypeMismatch {
            clause: clause.clone(),
            expected,
            found,
        })
    }
}

/// Validate every clause, collecting one error per offending clause. The
/// clauses stay in the expression; callers treat offenders as disabled.
#[must_use]
pub fn validate_expression(
    expression: &FilterExpression,
    registry: &DimensionRegistry,
) -> Vec<ValidationError> {
    expression
        .clauses
        .iter()
        .filter_map(|clause| validate_clause(clause, registry).err())
        .collect()
}

// ── Preset wire format ──────────────────────────────────────────────────
//
// The preset store exchanges a flat camelCase JSON document: one object per
// clause with optional attribute members, the value member carrying plain
// JSON whose shape is decided by the operator on the way back in.

#[derive(Debug, Error)]
pub enum WireError {
    #[error("clause {id}: relational operator {operator:?} is missing attribute members")]
    IncompleteRelationalClause { id: String, operator: Operator },
    #[error("clause {id}: {source}")]
    Value {
        id: String,
        #[source]
        source: TypeError,
    },
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClauseWire {
    id: String,
    field: DimensionId,
    operator: Operator,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    value: serde_json::Value,
    enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    attribute_field: Option<DimensionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    attribute_operator: Option<Operator>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    attribute_value: Option<serde_json::Value>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExpressionWire {
    include_exclude: IncludeExclude,
    clauses: Vec<ClauseWire>,
    clause_logic: ClauseLogic,
}

impl FilterExpression {
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        let clauses = self
            .clauses
            .iter()
            .map(|clause| match &clause.body {
                ClauseBody::Direct(direct) => ClauseWire {
                    id: clause.id.0.clone(),
                    field: direct.field,
                    operator: direct.operator,
                    value: direct.value.to_json(),
                    enabled: clause.enabled,
                    attribute_field: None,
                    attribute_operator: None,
                    attribute_value: None,
                },
                ClauseBody::Relational(relational) => ClauseWire {
                    id: clause.id.0.clone(),
                    field: relational.field,
                    operator: relational.operator,
                    value: serde_json::Value::Null,
                    enabled: clause.enabled,
                    attribute_field: Some(relational.attribute_field),
                    attribute_operator: Some(relational.attribute_operator),
                    attribute_value: Some(relational.attribute_value.to_json()),
                },
            })
            .collect();

        let wire = ExpressionWire {
            include_exclude: self.include_exclude,
            clauses,
            clause_logic: self.clause_logic,
        };
        serde_json::to_value(&wire).unwrap_or(serde_json::Value::Null)
    }

    pub fn from_json(
        value: &serde_json::Value,
        registry: &DimensionRegistry,
    ) -> Result<Self, WireError> {
        let wire: ExpressionWire = serde_json::from_value(value.clone())?;
        let mut clauses = Vec::with_capacity(wire.clauses.len());

        for clause in wire.clauses {
            let body = if clause.operator.is_relational() {
                let (Some(attribute_field), Some(attribute_operator)) =
                    (clause.attribute_field, clause.attribute_operator)
                else {
                    return Err(WireError::IncompleteRelationalClause {
                        id: clause.id,
                        operator: clause.operator,
                    });
                };
                let data_type = registry.describe(attribute_field)?.data_type;
                let shape = relational_payload_shape(clause.operator, attribute_operator);
                let payload = clause
                    .attribute_value
                    .unwrap_or(serde_json::Value::Null);
                let attribute_value = ClauseValue::from_json(&payload, shape, data_type)
                    .map_err(|source| WireError::Value {
                        id: clause.id.clone(),
                        source,
                    })?;
                ClauseBody::Relational(RelationalClause {
                    field: clause.field,
                    operator: clause.operator,
                    attribute_field,
                    attribute_operator,
                    attribute_value,
                })
            } else {
                let data_type = registry.describe(clause.field)?.data_type;
                let value = ClauseValue::from_json(
                    &clause.value,
                    clause.operator.value_shape(),
                    data_type,
                )
                .map_err(|source| WireError::Value {
                    id: clause.id.clone(),
                    source,
                })?;
                ClauseBody::Direct(DirectClause {
                    field: clause.field,
                    operator: clause.operator,
                    value,
                })
            };

            clauses.push(Clause {
                id: ClauseId(clause.id),
                enabled: clause.enabled,
                body,
            });
        }

        Ok(Self {
            include_exclude: wire.include_exclude,
            clause_logic: wire.clause_logic,
            clauses,
        })
    }
}
