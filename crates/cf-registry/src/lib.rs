#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fmt;

use cf_types::{DataType, ValueShape};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The closed set of filter dimensions. Declared once at process start and
/// never extended at runtime.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum DimensionId {
    Team,
    Pic,
    Pid,
    Mid,
    Zid,
    Pubname,
    Medianame,
    Zonename,
    Product,
    RevenueTier,
    Month,
    Year,
}

impl DimensionId {
    pub const ALL: [Self; 12] = [
        Self::Team,
        Self::Pic,
        Self::Pid,
        Self::Mid,
        Self::Zid,
        Self::Pubname,
        Self::Medianame,
        Self::Zonename,
        Self::Product,
        Self::RevenueTier,
        Self::Month,
        Self::Year,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Team => "team",
            Self::Pic => "pic",
            Self::Pid => "pid",
            Self::Mid => "mid",
            Self::Zid => "zid",
            Self::Pubname => "pubname",
            Self::Medianame => "medianame",
            Self::Zonename => "zonename",
            Self::Product => "product",
            Self::RevenueTier => "revenue_tier",
            Self::Month => "month",
            Self::Year => "year",
        }
    }

    pub fn parse(id: &str) -> Result<Self, RegistryError> {
        Self::ALL
            .into_iter()
            .find(|dim| dim.as_str() == id)
            .ok_or_else(|| RegistryError::UnknownField(id.to_owned()))
    }
}

impl fmt::Display for DimensionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatorFamily {
    Direct,
    Relational,
}

/// The closed operator grammar. Direct operators compare a field's own
/// value; relational operators test an attribute of an entity dimension and
/// are only valid when the clause field is an entity dimension.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Equals,
    NotEquals,
    In,
    NotIn,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
    Between,
    Contains,
    StartsWith,
    EndsWith,
    RegexMatch,
    IsNull,
    IsNotNull,
    Has,
    DoesNotHave,
    OnlyHas,
    HasAll,
    HasAny,
}

impl Operator {
    #[must_use]
    pub fn family(self) -> OperatorFamily {
        match self {
            Self::Has | Self::DoesNotHave | Self::OnlyHas | Self::HasAll | Self::HasAny => {
                OperatorFamily::Relational
            }
            _ => OperatorFamily::Direct,
        }
    }

    #[must_use]
    pub fn is_relational(self) -> bool {
        self.family() == OperatorFamily::Relational
    }

    /// Value arity for direct operators, and for the attribute payload of
    /// the list-flavored relational operators. `Has`/`DoesNotHave` defer to
    /// their attribute operator's shape instead.
    #[must_use]
    pub fn value_shape(self) -> ValueShape {
        match self {
            Self::IsNull | Self::IsNotNull => ValueShape::None,
            Self::Between => ValueShape::Pair,
            Self::In | Self::NotIn | Self::OnlyHas | Self::HasAll | Self::HasAny => {
                ValueShape::List
            }
            _ => ValueShape::Single,
        }
    }

    /// Human-readable connective used by the pretty-printer.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Equals => "equals",
            Self::NotEquals => "does not equal",
            Self::In => "in",
            Self::NotIn => "not in",
            Self::GreaterThan => "greater than",
            Self::GreaterThanOrEqual => "greater than or equal to",
            Self::LessThan => "less than",
            Self::LessThanOrEqual => "less than or equal to",
            Self::Between => "between",
            Self::Contains => "contains",
            Self::StartsWith => "starts with",
            Self::EndsWith => "ends with",
            Self::RegexMatch => "matches pattern",
            Self::IsNull | Self::IsNotNull => "is",
            Self::Has => "has",
            Self::DoesNotHave => "does not have",
            Self::OnlyHas => "only has",
            Self::HasAll => "has all of",
            Self::HasAny => "has any of",
        }
    }
}

const TEXT_OPERATORS: &[Operator] = &[
    Operator::Equals,
    Operator::NotEquals,
    Operator::In,
    Operator::NotIn,
    Operator::Contains,
    Operator::StartsWith,
    Operator::EndsWith,
    Operator::IsNull,
    Operator::IsNotNull,
];

const NAME_OPERATORS: &[Operator] = &[
    Operator::Equals,
    Operator::NotEquals,
    Operator::In,
    Operator::NotIn,
    Operator::Contains,
    Operator::StartsWith,
    Operator::EndsWith,
    Operator::RegexMatch,
    Operator::IsNull,
    Operator::IsNotNull,
];

const ENTITY_ID_OPERATORS: &[Operator] = &[
    Operator::Equals,
    Operator::NotEquals,
    Operator::In,
    Operator::NotIn,
    Operator::GreaterThan,
    Operator::GreaterThanOrEqual,
    Operator::LessThan,
    Operator::LessThanOrEqual,
    Operator::Between,
    Operator::IsNull,
    Operator::IsNotNull,
    Operator::Has,
    Operator::DoesNotHave,
    Operator::OnlyHas,
    Operator::HasAll,
    Operator::HasAny,
];

const ORDERED_OPERATORS: &[Operator] = &[
    Operator::Equals,
    Operator::NotEquals,
    Operator::In,
    Operator::NotIn,
    Operator::GreaterThan,
    Operator::GreaterThanOrEqual,
    Operator::LessThan,
    Operator::LessThanOrEqual,
    Operator::Between,
];

const TIER_OPERATORS: &[Operator] = &[
    Operator::Equals,
    Operator::NotEquals,
    Operator::In,
    Operator::NotIn,
];

/// A declared filter dimension: id, display label, data type, the ordered
/// operator set it supports, and whether it is an entity dimension eligible
/// for relational predicates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dimension {
    pub id: DimensionId,
    pub label: &'static str,
    pub data_type: DataType,
    pub operators: &'static [Operator],
    pub is_entity: bool,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("unknown field: {0}")]
    UnknownField(String),
}

/// Pure lookup table over the declared dimensions. Constructed once at
/// startup; no side effects, no failure modes beyond unknown-field.
#[derive(Debug, Clone)]
pub struct DimensionRegistry {
    dimensions: BTreeMap<DimensionId, Dimension>,
}

impl DimensionRegistry {
    /// The production dimension table backing the dashboards.
    #[must_use]
    pub fn standard() -> Self {
        let declarations = [
            Dimension {
                id: DimensionId::Team,
                label: "team",
                data_type: DataType::Utf8,
                operators: TEXT_OPERATORS,
                is_entity: false,
            },
            Dimension {
                id: DimensionId::Pic,
                label: "PIC",
                data_type: DataType::Utf8,
                operators: TEXT_OPERATORS,
                is_entity: false,
            },
            Dimension {
                id: DimensionId::Pid,
                label: "publisher ID",
                data_type: DataType::Number,
                operators: ENTITY_ID_OPERATORS,
                is_entity: true,
            },
            Dimension {
                id: DimensionId::Mid,
                label: "media ID",
                data_type: DataType::Number,
                operators: ENTITY_ID_OPERATORS,
                is_entity: true,
            },
            Dimension {
                id: DimensionId::Zid,
                label: "zone ID",
                data_type: DataType::Number,
                operators: ENTITY_ID_OPERATORS,
                is_entity: true,
            },
            Dimension {
                id: DimensionId::Pubname,
                label: "publisher name",
                data_type: DataType::Utf8,
                operators: NAME_OPERATORS,
                is_entity: false,
            },
            Dimension {
                id: DimensionId::Medianame,
                label: "media name",
                data_type: DataType::Utf8,
                operators: NAME_OPERATORS,
                is_entity: false,
            },
            Dimension {
                id: DimensionId::Zonename,
                label: "zone name",
                data_type: DataType::Utf8,
                operators: NAME_OPERATORS,
                is_entity: false,
            },
            Dimension {
                id: DimensionId::Product,
                label: "product",
                data_type: DataType::Utf8,
                operators: TEXT_OPERATORS,
                is_entity: false,
            },
            Dimension {
                id: DimensionId::RevenueTier,
                label: "revenue tier",
                data_type: DataType::Utf8,
                operators: TIER_OPERATORS,
                is_entity: false,
            },
            Dimension {
                id: DimensionId::Month,
                label: "month",
                data_type: DataType::Date,
                operators: ORDERED_OPERATORS,
                is_entity: false,
            },
            Dimension {
                id: DimensionId::Year,
                label: "year",
                data_type: DataType::Number,
                operators: ORDERED_OPERATORS,
                is_entity: false,
            },
        ];

        let mut dimensions = BTreeMap::new();
        for dimension in declarations {
            dimensions.insert(dimension.id, dimension);
        }
        Self { dimensions }
    }

    pub fn describe(&self, id: DimensionId) -> Result<&Dimension, RegistryError> {
        self.dimensions
            .get(&id)
            .ok_or_else(|| RegistryError::UnknownField(id.to_string()))
    }

    /// String-id variant of [`DimensionRegistry::describe`], used when field
    /// ids arrive from the wire.
    pub fn describe_str(&self, id: &str) -> Result<&Dimension, RegistryError> {
        self.describe(DimensionId::parse(id)?)
    }

    pub fn operators_for(&self, id: DimensionId) -> Result<&'static [Operator], RegistryError> {
        Ok(self.describe(id)?.operators)
    }

    pub fn is_entity(&self, id: DimensionId) -> Result<bool, RegistryError> {
        Ok(self.describe(id)?.is_entity)
    }

    /// First allowed operator for a field; the builder falls back to this
    /// whenever the clause field changes.
    pub fn default_operator(&self, id: DimensionId) -> Result<Operator, RegistryError> {
        let dimension = self.describe(id)?;
        dimension
            .operators
            .first()
            .copied()
            .ok_or_else(|| RegistryError::UnknownField(id.to_string()))
    }

    /// The attribute field a relational clause defaults to when the builder
    /// switches a clause onto a relational operator.
    #[must_use]
    pub fn default_entity_attribute(&self) -> DimensionId {
        DimensionId::Product
    }

    pub fn dimensions(&self) -> impl Iterator<Item = &Dimension> {
        self.dimensions.values()
    }
}

impl Default for DimensionRegistry {
    fn default() -> Self {
        Self::standard()
    }
}
