//! Gradient-boosted tree ensemble loaded from its JSON serialization.
//!
//! Only the pieces needed for inference are read: the objective, base score,
//! class count, optional feature names, and per-tree node arrays. A sample
//! descends left when `value < split_condition`; leaves carry their value in
//! `split_conditions`.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;
use tracing::{debug, info};

use crate::classifier::{GlobalImportance, RiskClassifier};
use crate::error::{ModelLoadError, ScoringError};
use crate::models::{ClassifierOutput, Feature, FeatureVector};

const LEAF: i32 = -1;

#[derive(Deserialize)]
struct ModelDocument {
    learner: LearnerDocument,
}

#[derive(Deserialize)]
struct LearnerDocument {
    #[serde(default)]
    feature_names: Vec<String>,
    learner_model_param: LearnerModelParam,
    objective: ObjectiveDocument,
    gradient_booster: BoosterDocument,
}

#[derive(Deserialize)]
struct LearnerModelParam {
    #[serde(default)]
    base_score: Option<String>,
    #[serde(default)]
    num_class: Option<String>,
    #[serde(default)]
    num_feature: Option<String>,
}

#[derive(Deserialize)]
struct ObjectiveDocument {
    name: String,
}

#[derive(Deserialize)]
struct BoosterDocument {
    #[serde(default)]
    name: Option<String>,
    model: EnsembleDocument,
}

#[derive(Deserialize)]
struct EnsembleDocument {
    trees: Vec<TreeDocument>,
    #[serde(default)]
    tree_info: Vec<usize>,
}

#[derive(Deserialize)]
struct TreeDocument {
    left_children: Vec<i32>,
    right_children: Vec<i32>,
    split_indices: Vec<usize>,
    split_conditions: Vec<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Objective {
    /// Single churn probability.
    BinaryLogistic,
    /// Probabilities over Low, Medium, High.
    MultiClass,
}

#[derive(Debug, Clone)]
enum Node {
    Split {
        column: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf(f64),
}

#[derive(Debug, Clone)]
struct Tree {
    group: usize,
    nodes: Vec<Node>,
}

impl Tree {
    fn predict(&self, row: &[f64; Feature::COUNT]) -> f64 {
        let mut index = 0;
        loop {
            match self.nodes[index] {
                Node::Leaf(value) => return value,
                Node::Split {
                    column,
                    threshold,
                    left,
                    right,
                } => {
                    index = if row[column] < threshold { left } else { right };
                }
            }
        }
    }
}

/// Tree ensemble classifier. Immutable after loading.
#[derive(Debug, Clone)]
pub struct GradientBoostedModel {
    objective: Objective,
    base_margin: f64,
    /// Canonical feature fed to each model column.
    columns: [Feature; Feature::COUNT],
    trees: Vec<Tree>,
    importance: GlobalImportance,
}

impl GradientBoostedModel {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ModelLoadError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ModelLoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let model = Self::from_json_str(&text)?;
        info!(
            path = %path.display(),
            objective = ?model.objective,
            trees = model.trees.len(),
            "loaded risk model"
        );
        Ok(model)
    }

    pub fn from_json_str(text: &str) -> Result<Self, ModelLoadError> {
        let document: ModelDocument = serde_json::from_str(text)?;
        Self::from_document(document.learner)
    }

    fn from_document(learner: LearnerDocument) -> Result<Self, ModelLoadError> {
        if let Some(name) = learner.gradient_booster.name.as_deref() {
            if name != "gbtree" {
                return Err(ModelLoadError::UnsupportedBooster(name.to_string()));
            }
        }

        let params = &learner.learner_model_param;
        let num_class = parse_param("num_class", params.num_class.as_deref(), 0.0)? as usize;
        let objective = match learner.objective.name.as_str() {
            "binary:logistic" if num_class <= 1 => Objective::BinaryLogistic,
            "multi:softprob" | "multi:softmax" if num_class == 3 => Objective::MultiClass,
            "binary:logistic" | "multi:softprob" | "multi:softmax" => {
                return Err(ModelLoadError::UnsupportedClassCount(num_class));
            }
            other => return Err(ModelLoadError::UnsupportedObjective(other.to_string())),
        };

        let num_feature = parse_param(
            "num_feature",
            params.num_feature.as_deref(),
            Feature::COUNT as f64,
        )? as usize;
        if num_feature != Feature::COUNT {
            return Err(ModelLoadError::FeatureCountMismatch {
                expected: Feature::COUNT,
                found: num_feature,
            });
        }

        let column_names = column_names(&learner.feature_names)?;
        let mut columns = Feature::ALL;
        for (column, name) in column_names.iter().enumerate() {
            columns[column] = crate::classifier::canonical_feature(name)
                .ok_or_else(|| ModelLoadError::UnknownFeature(name.clone()))?;
            if columns[..column].contains(&columns[column]) {
                return Err(ModelLoadError::InvalidParameter {
                    name: "feature_names",
                    value: format!("duplicate feature `{name}`"),
                });
            }
        }

        let base_score = parse_param("base_score", params.base_score.as_deref(), 0.5)?;
        let base_margin = match objective {
            Objective::BinaryLogistic => {
                if base_score <= 0.0 || base_score >= 1.0 {
                    return Err(ModelLoadError::InvalidParameter {
                        name: "base_score",
                        value: base_score.to_string(),
                    });
                }
                (base_score / (1.0 - base_score)).ln()
            }
            Objective::MultiClass => base_score,
        };

        let ensemble = learner.gradient_booster.model;
        if ensemble.trees.is_empty() {
            return Err(ModelLoadError::EmptyEnsemble);
        }
        let groups = match objective {
            Objective::BinaryLogistic => 1,
            Objective::MultiClass => 3,
        };

        let mut trees = Vec::with_capacity(ensemble.trees.len());
        let mut split_counts: BTreeMap<usize, f64> = BTreeMap::new();
        for (index, document) in ensemble.trees.into_iter().enumerate() {
            let group = match objective {
                Objective::BinaryLogistic => 0,
                Objective::MultiClass => ensemble
                    .tree_info
                    .get(index)
                    .copied()
                    .unwrap_or(index % groups),
            };
            if group >= groups {
                return Err(ModelLoadError::MalformedTree {
                    tree: index,
                    reason: format!("class group {group} out of range"),
                });
            }
            let tree = compile_tree(index, group, document)?;
            for node in &tree.nodes {
                if let Node::Split { column, .. } = node {
                    *split_counts.entry(*column).or_insert(0.0) += 1.0;
                }
            }
            trees.push(tree);
        }

        // Split-count importance, keyed by the model's own column names.
        let importance = GlobalImportance::from_named(
            split_counts
                .into_iter()
                .map(|(column, count)| (column_names[column].as_str(), count)),
        );

        Ok(Self {
            objective,
            base_margin,
            columns,
            trees,
            importance,
        })
    }

    pub fn objective(&self) -> Objective {
        self.objective
    }

    pub fn tree_count(&self) -> usize {
        self.trees.len()
    }

    fn row(&self, features: &FeatureVector) -> [f64; Feature::COUNT] {
        let mut row = [0.0; Feature::COUNT];
        for (column, feature) in self.columns.iter().enumerate() {
            row[column] = features.value(*feature);
        }
        row
    }
}

impl RiskClassifier for GradientBoostedModel {
    fn score(&self, features: &FeatureVector) -> Result<ClassifierOutput, ScoringError> {
        let row = self.row(features);
        let output = match self.objective {
            Objective::BinaryLogistic => {
                let margin = self.base_margin
                    + self.trees.iter().map(|tree| tree.predict(&row)).sum::<f64>();
                ClassifierOutput::Churn(sigmoid(margin))
            }
            Objective::MultiClass => {
                let mut margins = [self.base_margin; 3];
                for tree in &self.trees {
                    margins[tree.group] += tree.predict(&row);
                }
                ClassifierOutput::Distribution(softmax(margins))
            }
        };
        debug!(?output, "scored feature vector");
        Ok(output)
    }

    fn global_importance(&self) -> &GlobalImportance {
        &self.importance
    }
}

fn column_names(declared: &[String]) -> Result<Vec<String>, ModelLoadError> {
    if declared.is_empty() {
        return Ok((0..Feature::COUNT).map(|column| format!("f{column}")).collect());
    }
    if declared.len() != Feature::COUNT {
        return Err(ModelLoadError::FeatureCountMismatch {
            expected: Feature::COUNT,
            found: declared.len(),
        });
    }
    Ok(declared.to_vec())
}

/// Parses a numeric learner parameter. Accepts both `"5E-1"` and `"[5E-1]"`.
fn parse_param(
    name: &'static str,
    raw: Option<&str>,
    default: f64,
) -> Result<f64, ModelLoadError> {
    let Some(raw) = raw else {
        return Ok(default);
    };
    let trimmed = raw.trim().trim_start_matches('[').trim_end_matches(']').trim();
    match trimmed.parse::<f64>() {
        Ok(value) if value.is_finite() && value >= 0.0 => Ok(value),
        _ => Err(ModelLoadError::InvalidParameter {
            name,
            value: raw.to_string(),
        }),
    }
}

fn compile_tree(index: usize, group: usize, document: TreeDocument) -> Result<Tree, ModelLoadError> {
    let malformed = |reason: String| ModelLoadError::MalformedTree {
        tree: index,
        reason,
    };

    let len = document.left_children.len();
    if len == 0 {
        return Err(malformed("no nodes".to_string()));
    }
    if document.right_children.len() != len
        || document.split_indices.len() != len
        || document.split_conditions.len() != len
    {
        return Err(malformed("node arrays differ in length".to_string()));
    }

    let mut nodes = Vec::with_capacity(len);
    for node in 0..len {
        let left = document.left_children[node];
        let right = document.right_children[node];
        let condition = document.split_conditions[node];
        if !condition.is_finite() {
            return Err(malformed(format!("node {node} has non-finite value")));
        }
        if left == LEAF {
            nodes.push(Node::Leaf(condition));
            continue;
        }

        // Children always follow their parent, which also rules out cycles.
        let child = |value: i32| -> Result<usize, ModelLoadError> {
            usize::try_from(value)
                .ok()
                .filter(|child| *child > node && *child < len)
                .ok_or_else(|| malformed(format!("node {node} has invalid child {value}")))
        };
        let column = document.split_indices[node];
        if column >= Feature::COUNT {
            return Err(malformed(format!("node {node} splits on column {column}")));
        }
        nodes.push(Node::Split {
            column,
            threshold: condition,
            left: child(left)?,
            right: child(right)?,
        });
    }

    Ok(Tree { group, nodes })
}

fn sigmoid(margin: f64) -> f64 {
    1.0 / (1.0 + (-margin).exp())
}

fn softmax(margins: [f64; 3]) -> [f64; 3] {
    let max = margins.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps = margins.map(|margin| (margin - max).exp());
    let total: f64 = exps.iter().sum();
    exps.map(|value| value / total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    /// Two stumps on attendance (column 0) and streak (column 5).
    const BINARY_MODEL: &str = r#"{
        "learner": {
            "learner_model_param": {"base_score": "5E-1", "num_class": "0", "num_feature": "6"},
            "objective": {"name": "binary:logistic"},
            "gradient_booster": {
                "name": "gbtree",
                "model": {
                    "trees": [
                        {"left_children": [1, -1, -1], "right_children": [2, -1, -1],
                         "split_indices": [0, 0, 0], "split_conditions": [60.0, 1.5, -1.5],
                         "default_left": [1, 0, 0]},
                        {"left_children": [1, -1, -1], "right_children": [2, -1, -1],
                         "split_indices": [5, 0, 0], "split_conditions": [5.0, -0.5, 0.5]}
                    ],
                    "tree_info": [0, 0]
                }
            }
        },
        "version": [1, 7, 6]
    }"#;

    const MULTI_MODEL: &str = r#"{
        "learner": {
            "feature_names": ["attendance_rate", "homework_completion", "test_avg_score",
                              "communication_activity", "days_enrolled", "missed_classes_streak"],
            "learner_model_param": {"base_score": "[5E-1]", "num_class": "3", "num_feature": "6"},
            "objective": {"name": "multi:softprob"},
            "gradient_booster": {
                "name": "gbtree",
                "model": {
                    "trees": [
                        {"left_children": [1, -1, -1], "right_children": [2, -1, -1],
                         "split_indices": [0, 0, 0], "split_conditions": [60.0, -1.0, 2.0]},
                        {"left_children": [-1], "right_children": [-1],
                         "split_indices": [0], "split_conditions": [0.5]},
                        {"left_children": [1, -1, -1], "right_children": [2, -1, -1],
                         "split_indices": [0, 0, 0], "split_conditions": [60.0, 2.0, -1.0]}
                    ],
                    "tree_info": [0, 1, 2]
                }
            }
        }
    }"#;

    fn strong_student() -> FeatureVector {
        FeatureVector::new(95.0, 92.0, 90.0, 18, 120, 0).unwrap()
    }

    fn struggling_student() -> FeatureVector {
        FeatureVector::new(28.0, 25.0, 38.0, 0, 30, 8).unwrap()
    }

    #[test]
    fn binary_model_scores_churn_probability() {
        let model = GradientBoostedModel::from_json_str(BINARY_MODEL).unwrap();
        assert_eq!(model.objective(), Objective::BinaryLogistic);
        assert_eq!(model.tree_count(), 2);

        let ClassifierOutput::Churn(low) = model.score(&strong_student()).unwrap() else {
            panic!("expected churn probability");
        };
        assert!((low - sigmoid(-2.0)).abs() < 1e-12);

        let ClassifierOutput::Churn(high) = model.score(&struggling_student()).unwrap() else {
            panic!("expected churn probability");
        };
        assert!((high - sigmoid(2.0)).abs() < 1e-12);
    }

    #[test]
    fn split_counts_become_canonical_importance() {
        let model = GradientBoostedModel::from_json_str(BINARY_MODEL).unwrap();
        let importance = model.global_importance();
        assert_eq!(importance.get(Feature::AttendanceRate), Some(1.0));
        assert_eq!(importance.get(Feature::MissedClassesStreak), Some(1.0));
        assert_eq!(importance.get(Feature::TestAvgScore), None);
    }

    #[test]
    fn multi_class_model_yields_distribution() {
        let model = GradientBoostedModel::from_json_str(MULTI_MODEL).unwrap();
        let ClassifierOutput::Distribution(probs) = model.score(&struggling_student()).unwrap()
        else {
            panic!("expected distribution");
        };
        assert!((probs.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        assert!(probs[2] > probs[1] && probs[1] > probs[0]);
    }

    #[test]
    fn named_columns_follow_declared_order() {
        let reordered = MULTI_MODEL.replacen(
            r#"["attendance_rate", "homework_completion""#,
            r#"["homework_completion", "attendance_rate""#,
            1,
        );
        let model = GradientBoostedModel::from_json_str(&reordered).unwrap();
        assert_eq!(model.columns[0], Feature::HomeworkCompletion);
        assert_eq!(
            model.global_importance().get(Feature::HomeworkCompletion),
            Some(2.0)
        );
    }

    #[test]
    fn scoring_is_deterministic() {
        let model = GradientBoostedModel::from_json_str(MULTI_MODEL).unwrap();
        let first = model.score(&strong_student()).unwrap();
        let second = model.score(&strong_student()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn rejects_unsupported_objective() {
        let text = BINARY_MODEL.replace("binary:logistic", "reg:squarederror");
        let err = GradientBoostedModel::from_json_str(&text).unwrap_err();
        assert!(matches!(err, ModelLoadError::UnsupportedObjective(name) if name == "reg:squarederror"));
    }

    #[test]
    fn rejects_wrong_feature_count() {
        let text = BINARY_MODEL.replace(r#""num_feature": "6""#, r#""num_feature": "8""#);
        let err = GradientBoostedModel::from_json_str(&text).unwrap_err();
        assert!(matches!(
            err,
            ModelLoadError::FeatureCountMismatch { expected: 6, found: 8 }
        ));
    }

    #[test]
    fn rejects_backwards_child_reference() {
        let text = BINARY_MODEL.replacen(
            r#""left_children": [1, -1, -1]"#,
            r#""left_children": [0, -1, -1]"#,
            1,
        );
        let err = GradientBoostedModel::from_json_str(&text).unwrap_err();
        assert!(matches!(err, ModelLoadError::MalformedTree { tree: 0, .. }));
    }

    #[test]
    fn rejects_unknown_feature_name() {
        let text = MULTI_MODEL.replace("days_enrolled", "payment_delays");
        let err = GradientBoostedModel::from_json_str(&text).unwrap_err();
        assert!(matches!(err, ModelLoadError::UnknownFeature(name) if name == "payment_delays"));
    }

    #[test]
    fn missing_file_is_a_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = GradientBoostedModel::load(dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, ModelLoadError::Io { .. }));
    }

    #[test]
    fn loads_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(BINARY_MODEL.as_bytes()).unwrap();
        let model = GradientBoostedModel::load(file.path()).unwrap();
        assert_eq!(model.tree_count(), 2);
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        let err = GradientBoostedModel::from_json_str("{\"learner\": ").unwrap_err();
        assert!(matches!(err, ModelLoadError::Parse(_)));
    }
}
