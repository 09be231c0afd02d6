//! Nearest-neighbour query construction
//!
//! [`QueryParams`] is a plain value holding everything a caller may ask for;
//! [`build`] turns it into a validated [`SearchQuery`] without side effects.
//! Rules, in precedence order:
//!
//! 1. `vectors_per_target` wins over everything else and suppresses the primary vector.
//! 2. Otherwise `vector_per_target` is wrapped into one-element lists and used the same way.
//! 3. Otherwise the primary `vector` is the only search vector.
//! 4. Certainty and distance are independent clauses; both are kept when both are set.
//! 5. Declared target names are expanded so each target appears once per vector it has
//!    (see [`reconcile_targets`]).
//! 6. `limit` and `include_payload` are copied as-is.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{error::InvalidVectorError, types::Vector};

/// How a store folds the distances of several targets into one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TargetCombination {
    #[default]
    Minimum,
    Sum,
    Average,
}

impl TargetCombination {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetCombination::Minimum => "minimum",
            TargetCombination::Sum => "sum",
            TargetCombination::Average => "average",
        }
    }

    /// Fold distances; `None` for an empty input
    pub fn combine(&self, distances: &[f32]) -> Option<f32> {
        if distances.is_empty() {
            return None;
        }
        let combined = match self {
            TargetCombination::Minimum => distances.iter().copied().fold(f32::INFINITY, f32::min),
            TargetCombination::Sum => distances.iter().sum(),
            TargetCombination::Average => distances.iter().sum::<f32>() / distances.len() as f32,
        };
        Some(combined)
    }
}

/// Everything a caller can ask of a nearest-neighbour search
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct QueryParams {
    #[serde(default)]
    pub vector: Option<Vector>,
    /// One vector per target
    #[serde(default)]
    pub vector_per_target: Option<BTreeMap<String, Vector>>,
    /// Several vectors per target; takes precedence over the other vector fields
    #[serde(default)]
    pub vectors_per_target: Option<BTreeMap<String, Vec<Vector>>>,
    /// Minimum certainty a hit must reach
    #[serde(default)]
    pub certainty: Option<f32>,
    /// Maximum distance a hit may have
    #[serde(default)]
    pub distance: Option<f32>,
    #[serde(default)]
    pub target_vectors: Vec<String>,
    #[serde(default)]
    pub combination: Option<TargetCombination>,
    pub limit: usize,
    #[serde(default = "default_include_payload")]
    pub include_payload: bool,
}

fn default_include_payload() -> bool {
    true
}

impl QueryParams {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            include_payload: true,
            ..Default::default()
        }
    }

    pub fn with_vector(mut self, vector: Vector) -> Self {
        self.vector = Some(vector);
        self
    }

    pub fn with_vector_per_target(mut self, vectors: BTreeMap<String, Vector>) -> Self {
        self.vector_per_target = Some(vectors);
        self
    }

    pub fn with_vectors_per_target(mut self, vectors: BTreeMap<String, Vec<Vector>>) -> Self {
        self.vectors_per_target = Some(vectors);
        self
    }

    pub fn with_certainty(mut self, certainty: f32) -> Self {
        self.certainty = Some(certainty);
        self
    }

    pub fn with_distance(mut self, distance: f32) -> Self {
        self.distance = Some(distance);
        self
    }

    pub fn with_target_vectors<I, S>(mut self, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.target_vectors = targets.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_combination(mut self, combination: TargetCombination) -> Self {
        self.combination = Some(combination);
        self
    }

    pub fn with_payload(mut self, include_payload: bool) -> Self {
        self.include_payload = include_payload;
        self
    }

    pub fn build(&self) -> Result<SearchQuery, InvalidVectorError> {
        build(self)
    }
}

/// A validated search request, independent of any store
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchQuery {
    /// Set only when no per-target vectors exist
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector: Option<Vector>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub vectors_per_target: BTreeMap<String, Vec<Vector>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certainty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance: Option<f32>,
    /// Reconciled target names, one entry per vector of that target
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub target_vectors: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub combination: Option<TargetCombination>,
    pub limit: usize,
    pub include_payload: bool,
}

impl SearchQuery {
    pub fn is_multi_target(&self) -> bool {
        !self.vectors_per_target.is_empty()
    }

    /// Total number of query vectors
    pub fn vector_count(&self) -> usize {
        if self.is_multi_target() {
            self.vectors_per_target.values().map(Vec::len).sum()
        } else {
            usize::from(self.vector.is_some())
        }
    }

    /// Distinct target names in first-seen order
    pub fn distinct_targets(&self) -> Vec<&str> {
        let mut seen = Vec::new();
        for target in &self.target_vectors {
            if !seen.contains(&target.as_str()) {
                seen.push(target.as_str());
            }
        }
        if seen.is_empty() {
            seen.extend(self.vectors_per_target.keys().map(String::as_str));
        }
        seen
    }

    /// Render the `nearVector` argument of a Weaviate GraphQL `Get`
    pub fn to_near_vector_clause(&self) -> String {
        let mut clause = Vec::new();
        if self.is_multi_target() {
            let per_target = self
                .vectors_per_target
                .iter()
                .map(|(target, vectors)| format!("{}: {}", target, render_json(vectors)))
                .collect::<Vec<_>>();
            clause.push(format!("vectorPerTarget: {{{}}}", per_target.join(",")));
        } else if let Some(vector) = &self.vector {
            clause.push(format!("vector: {}", render_json(vector)));
        }
        if let Some(certainty) = self.certainty {
            clause.push(format!("certainty: {certainty}"));
        }
        if let Some(distance) = self.distance {
            clause.push(format!("distance: {distance}"));
        }
        if !self.target_vectors.is_empty() {
            let targets = render_json(&self.target_vectors);
            match self.combination {
                Some(combination) => clause.push(format!(
                    "targets: {{targetVectors: {} combinationMethod: {}}}",
                    targets,
                    combination.as_str()
                )),
                None => clause.push(format!("targetVectors: {targets}")),
            }
        }
        format!("nearVector:{{{}}}", clause.join(" "))
    }
}

fn render_json<T: Serialize + ?Sized>(value: &T) -> String {
    // Vectors are validated finite before rendering, and string lists always serialize
    serde_json::to_string(value).unwrap_or_default()
}

/// Build a [`SearchQuery`] from caller parameters
pub fn build(params: &QueryParams) -> Result<SearchQuery, InvalidVectorError> {
    let vectors_per_target = resolve_target_vectors(params);

    let vector = if vectors_per_target.is_empty() {
        match &params.vector {
            Some(vector) => {
                check_vector("primary vector", vector)?;
                Some(vector.clone())
            }
            None => return Err(InvalidVectorError::MissingVector),
        }
    } else {
        for (target, vectors) in &vectors_per_target {
            if vectors.is_empty() {
                return Err(InvalidVectorError::EmptyTargetVectors(target.clone()));
            }
            for vector in vectors {
                check_vector(target, vector)?;
            }
        }
        None
    };

    check_threshold("certainty", params.certainty)?;
    check_threshold("distance", params.distance)?;

    let target_vectors = if params.target_vectors.is_empty() {
        Vec::new()
    } else {
        reconcile_targets(&params.target_vectors, &vectors_per_target)
    };

    Ok(SearchQuery {
        vector,
        vectors_per_target,
        certainty: params.certainty,
        distance: params.distance,
        target_vectors,
        combination: params.combination,
        limit: params.limit,
        include_payload: params.include_payload,
    })
}

fn resolve_target_vectors(params: &QueryParams) -> BTreeMap<String, Vec<Vector>> {
    if let Some(many) = params.vectors_per_target.as_ref().filter(|m| !m.is_empty()) {
        return many.clone();
    }
    if let Some(single) = params.vector_per_target.as_ref().filter(|m| !m.is_empty()) {
        return single
            .iter()
            .map(|(target, vector)| (target.clone(), vec![vector.clone()]))
            .collect();
    }
    BTreeMap::new()
}

/// Expand declared target names against the per-target vectors
///
/// Each distinct declared target is emitted once per vector it owns, or once if it
/// owns none. Stores require the name repeated for every vector; callers usually
/// pass it only once. Repeated declarations collapse to their first position so an
/// already expanded list comes back unchanged.
pub fn reconcile_targets(
    declared: &[String],
    vectors_per_target: &BTreeMap<String, Vec<Vector>>,
) -> Vec<String> {
    let mut out = Vec::new();
    let mut seen: Vec<&str> = Vec::new();
    for target in declared {
        if seen.contains(&target.as_str()) {
            continue;
        }
        seen.push(target.as_str());
        let repeat = vectors_per_target
            .get(target)
            .map(Vec::len)
            .filter(|count| *count > 0)
            .unwrap_or(1);
        out.extend(std::iter::repeat(target.clone()).take(repeat));
    }
    out
}

fn check_vector(target: &str, vector: &[f32]) -> Result<(), InvalidVectorError> {
    if vector.is_empty() {
        return Err(InvalidVectorError::EmptyVector(target.to_string()));
    }
    if let Some((position, value)) = vector.iter().enumerate().find(|(_, v)| !v.is_finite()) {
        return Err(InvalidVectorError::NonFinite {
            target: target.to_string(),
            position,
            value: *value,
        });
    }
    Ok(())
}

fn check_threshold(name: &str, value: Option<f32>) -> Result<(), InvalidVectorError> {
    match value {
        Some(value) if !value.is_finite() => Err(InvalidVectorError::InvalidThreshold {
            name: name.to_string(),
            value,
        }),
        _ => Ok(()),
    }
}
