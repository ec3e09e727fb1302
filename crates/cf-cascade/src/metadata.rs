use std::collections::{BTreeMap, BTreeSet};

use cf_registry::{DimensionId, RegistryError};
use cf_types::OptionItem;
use thiserror::Error;

/// The per-session metadata snapshot: unrestricted option lists for every
/// dimension plus the Team→PIC mapping that resolves the one client-side
/// cascade edge without a remote lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataSnapshot {
    options: BTreeMap<DimensionId, Vec<OptionItem>>,
    team_pic: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("metadata snapshot must be a JSON object")]
    NotAnObject,
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

const TEAM_PIC_KEY: &str = "team_pic_mappings";

impl MetadataSnapshot {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_options(mut self, dimension: DimensionId, options: Vec<OptionItem>) -> Self {
        self.options.insert(dimension, options);
        self
    }

    #[must_use]
    pub fn with_team_pics(mut self, team: impl Into<String>, pics: Vec<String>) -> Self {
        self.team_pic.insert(team.into(), pics);
        self
    }

    #[must_use]
    pub fn options_for(&self, dimension: DimensionId) -> &[OptionItem] {
        self.options
            .get(&dimension)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Children reachable from a client-side edge: the union over every
    /// selected parent value. Only the Team→PIC edge carries an in-memory
    /// mapping; any other pair yields the empty set.
    #[must_use]
    pub fn client_side_children(
        &self,
        from: DimensionId,
        to: DimensionId,
        parent_values: &[String],
    ) -> BTreeSet<String> {
        match (from, to) {
            (DimensionId::Team, DimensionId::Pic) => parent_values
                .iter()
                .filter_map(|team| self.team_pic.get(team))
                .flatten()
                .cloned()
                .collect(),
            _ => BTreeSet::new(),
        }
    }

    /// Decode the flat snapshot document: every key is a dimension id mapped
    /// to its option list, except the `team_pic_mappings` sibling. A key
    /// outside the dimension registry fails the whole decode.
    pub fn from_json(value: &serde_json::Value) -> Result<Self, MetadataError> {
        let object = value.as_object().ok_or(MetadataError::NotAnObject)?;
        let mut snapshot = Self::new();
        for (key, entry) in object {
            if key == TEAM_PIC_KEY {
                snapshot.team_pic = serde_json::from_value(entry.clone())?;
            } else {
                let dimension = DimensionId::parse(key)?;
                let options: Vec<OptionItem> = serde_json::from_value(entry.clone())?;
                snapshot.options.insert(dimension, options);
            }
        }
        Ok(snapshot)
    }

    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        let mut object = serde_json::Map::new();
        for (dimension, options) in &self.options {
            object.insert(
                dimension.to_string(),
                serde_json::to_value(options).unwrap_or(serde_json::Value::Null),
            );
        }
        object.insert(
            TEAM_PIC_KEY.to_owned(),
            serde_json::to_value(&self.team_pic).unwrap_or(serde_json::Value::Null),
        );
        serde_json::Value::Object(object)
    }
}
