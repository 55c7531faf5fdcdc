//! Statistical model artifacts.
//!
//! A model artifact is JSON:
//!
//! ```json
//! {
//!   "feature_names": ["ndvi_mean", "precip_mean", "et_mean", "elevation_mean", "soil_texture", "temp_mean"],
//!   "model": { "type": "forest", "trees": [ { "nodes": [ ... ] } ] }
//! }
//! ```
//!
//! Trees are flat node arrays in pre-order: split nodes reference children by
//! index, and every child index is greater than its parent's.

use std::path::Path;

use serde::{Deserialize, Serialize};

use dss_common::{DssError, DssResult};

use crate::schema::FeatureSchema;

/// Tabular predict function over a fixed column order.
pub trait TabularRegressor: Send + Sync {
    /// Column order expected by [`TabularRegressor::predict`].
    fn feature_names(&self) -> &[String];

    /// One prediction per row.
    fn predict(&self, rows: &[Vec<f64>]) -> DssResult<Vec<f64>>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TreeNode {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        value: f64,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionTree {
    pub nodes: Vec<TreeNode>,
}

impl RegressionTree {
    /// Walk from the root; `x <= threshold` goes left.
    fn evaluate(&self, row: &[f64]) -> f64 {
        let mut index = 0;
        loop {
            match &self.nodes[index] {
                TreeNode::Leaf { value } => return *value,
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    index = if row[*feature] <= *threshold {
                        *left
                    } else {
                        *right
                    };
                }
            }
        }
    }

    fn validate(&self, tree: usize, columns: usize) -> DssResult<()> {
        if self.nodes.is_empty() {
            return Err(invalid(format!("tree {} has no nodes", tree)));
        }
        for (i, node) in self.nodes.iter().enumerate() {
            match node {
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    if *feature >= columns || !threshold.is_finite() {
                        return Err(invalid(format!("tree {} node {} has a bad split", tree, i)));
                    }
                    for child in [*left, *right] {
                        if child <= i || child >= self.nodes.len() {
                            return Err(invalid(format!(
                                "tree {} node {} points to invalid child {}",
                                tree, i, child
                            )));
                        }
                    }
                }
                TreeNode::Leaf { value } if !value.is_finite() => {
                    return Err(invalid(format!("tree {} node {} has a non-finite leaf", tree, i)));
                }
                TreeNode::Leaf { .. } => {}
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ModelKind {
    /// Mean of regression trees
    Forest { trees: Vec<RegressionTree> },
    Linear {
        intercept: f64,
        coefficients: Vec<f64>,
    },
}

/// A loaded, validated statistical model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatisticalModel {
    pub feature_names: Vec<String>,
    pub model: ModelKind,
}

impl StatisticalModel {
    /// Load and validate against `schema`.
    pub async fn load(path: &Path, schema: FeatureSchema) -> DssResult<Self> {
        let contents = tokio::fs::read_to_string(path).await.map_err(|e| {
            DssError::Ensemble(format!("Failed to read model {}: {}", path.display(), e))
        })?;
        Self::from_json(&contents, schema)
    }

    pub fn from_json(contents: &str, schema: FeatureSchema) -> DssResult<Self> {
        let model: Self = serde_json::from_str(contents)
            .map_err(|e| invalid(format!("not a model artifact: {}", e)))?;
        model.validate(schema)?;
        Ok(model)
    }

    pub fn validate(&self, schema: FeatureSchema) -> DssResult<()> {
        let expected = schema.names();
        if self.feature_names != expected {
            return Err(invalid(format!(
                "feature order {:?} does not match schema {} {:?}",
                self.feature_names,
                schema.version(),
                expected
            )));
        }

        let columns = self.feature_names.len();
        match &self.model {
            ModelKind::Forest { trees } => {
                if trees.is_empty() {
                    return Err(invalid("forest has no trees".to_string()));
                }
                for (i, tree) in trees.iter().enumerate() {
                    tree.validate(i, columns)?;
                }
            }
            ModelKind::Linear {
                intercept,
                coefficients,
            } => {
                if coefficients.len() != columns {
                    return Err(invalid(format!(
                        "{} coefficients for {} features",
                        coefficients.len(),
                        columns
                    )));
                }
                if !intercept.is_finite() || coefficients.iter().any(|c| !c.is_finite()) {
                    return Err(invalid("non-finite coefficient".to_string()));
                }
            }
        }
        Ok(())
    }

    pub fn kind(&self) -> &'static str {
        match self.model {
            ModelKind::Forest { .. } => "forest",
            ModelKind::Linear { .. } => "linear",
        }
    }
}

impl TabularRegressor for StatisticalModel {
    fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    fn predict(&self, rows: &[Vec<f64>]) -> DssResult<Vec<f64>> {
        let columns = self.feature_names.len();
        rows.iter()
            .map(|row| {
                if row.len() != columns {
                    return Err(DssError::Ensemble(format!(
                        "Row has {} columns, model expects {}",
                        row.len(),
                        columns
                    )));
                }
                let value = match &self.model {
                    ModelKind::Forest { trees } => {
                        trees.iter().map(|t| t.evaluate(row)).sum::<f64>() / trees.len() as f64
                    }
                    ModelKind::Linear {
                        intercept,
                        coefficients,
                    } => intercept + coefficients.iter().zip(row).map(|(c, x)| c * x).sum::<f64>(),
                };
                Ok(value)
            })
            .collect()
    }
}

fn invalid(detail: String) -> DssError {
    DssError::Ensemble(format!("Invalid model artifact: {}", detail))
}

#[cfg(test)]
mod tests {
    use super::*;

    const FOREST_JSON: &str = r#"{
        "feature_names": ["ndvi_mean", "precip_mean", "et_mean", "elevation_mean", "soil_texture", "temp_mean"],
        "model": {
            "type": "forest",
            "trees": [
                { "nodes": [
                    { "feature": 0, "threshold": 0.5, "left": 1, "right": 2 },
                    { "value": 2.0 },
                    { "value": 4.0 }
                ] },
                { "nodes": [
                    { "feature": 1, "threshold": 4.0, "left": 1, "right": 2 },
                    { "value": 1.0 },
                    { "value": 3.0 }
                ] }
            ]
        }
    }"#;

    #[test]
    fn test_forest_mean_of_trees() {
        let model = StatisticalModel::from_json(FOREST_JSON, FeatureSchema::V1).unwrap();
        assert_eq!(model.kind(), "forest");

        let rows = vec![
            vec![0.3, 5.0, 3.8, 1850.0, 2.0, 21.5],
            vec![0.6, 5.0, 3.8, 1850.0, 2.0, 21.5],
            vec![0.5, 4.0, 3.8, 1850.0, 2.0, 21.5],
        ];
        assert_eq!(model.predict(&rows).unwrap(), vec![2.5, 3.5, 1.5]);
    }

    #[test]
    fn test_linear_model() {
        let json = r#"{
            "feature_names": ["ndvi_mean", "precip_mean", "et_mean", "elevation_mean", "soil_texture", "temp_mean"],
            "model": { "type": "linear", "intercept": 1.0, "coefficients": [2.0, 0.5, 0.0, 0.0, 0.0, -0.1] }
        }"#;
        let model = StatisticalModel::from_json(json, FeatureSchema::V1).unwrap();
        let out = model.predict(&[vec![0.5, 2.0, 9.0, 9.0, 9.0, 10.0]]).unwrap();
        assert!((out[0] - 2.0).abs() < 1e-12);

        let err = model.predict(&[vec![0.5]]).unwrap_err();
        assert!(matches!(err, DssError::Ensemble(_)));
    }

    #[test]
    fn test_feature_order_must_match_schema() {
        let json = FOREST_JSON.replace(
            r#"["ndvi_mean", "precip_mean""#,
            r#"["precip_mean", "ndvi_mean""#,
        );
        assert!(StatisticalModel::from_json(&json, FeatureSchema::V1).is_err());
    }

    #[test]
    fn test_cyclic_tree_rejected() {
        let json = FOREST_JSON.replacen(r#""left": 1"#, r#""left": 0"#, 1);
        assert!(StatisticalModel::from_json(&json, FeatureSchema::V1).is_err());
    }
}
