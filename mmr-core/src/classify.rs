use ndarray::{Array1, Array2, ArrayView1};
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, ensure};

use crate::{descriptor::Descriptor, error::*};

/// How many scored classes each task reports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopScores {
    /// Only the winning class.
    #[default]
    Best,
    /// The `k` best classes, highest score first.
    Top(usize),
    /// Every class, in class-id order.
    All,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifyConfig {
    pub top_scores: TopScores,
}

/// One linear classification task over the descriptor, as stored in a model
/// manifest. `weights` is row-major, one row per class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskHead {
    pub name: String,
    pub classes: Vec<String>,
    pub weights: Vec<f32>,
    #[serde(default)]
    pub bias: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredClass {
    pub class_id: u32,
    pub class_name: String,
    pub score: f32,
}

/// Result of one classification task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifyValue {
    pub task_name: String,
    pub class_name: String,
    pub class_id: u32,
    pub score: f32,
    /// Alternatives as requested by [`TopScores`]; includes the winner.
    pub ranked: Vec<ScoredClass>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub values: Vec<ClassifyValue>,
}

impl ClassificationResult {
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, task_name: &str) -> Option<&ClassifyValue> {
        self.values.iter().find(|v| v.task_name == task_name)
    }

    /// Winning class of every task, coarse to fine.
    pub fn label(&self) -> String {
        self.values
            .iter()
            .map(|v| v.class_name.as_str())
            .collect::<Vec<_>>()
            .join(" / ")
    }

    /// Score of the most specific (last) task.
    pub fn confidence(&self) -> Option<f32> {
        self.values.last().map(|v| v.score)
    }
}

struct LinearHead {
    name: String,
    classes: Vec<String>,
    weights: Array2<f32>,
    bias: Array1<f32>,
}

/// Decodes descriptors with a fixed set of task heads.
pub struct Classifier {
    heads: Vec<LinearHead>,
    descriptor_len: usize,
    version: u32,
}

impl Classifier {
    pub fn new(heads: Vec<TaskHead>, descriptor_len: usize, version: u32) -> Result<Self, MmrError> {
        ensure!(
            !heads.is_empty(),
            EngineInitSnafu {
                stage: "heads",
                message: "model declares no classification tasks",
            }
        );

        let mut linear = Vec::with_capacity(heads.len());
        for head in heads {
            let rows = head.classes.len();
            ensure!(
                rows > 0,
                EngineInitSnafu {
                    stage: "heads",
                    message: format!("task `{}` has no classes", head.name),
                }
            );
            ensure!(
                head.weights.len() == rows * descriptor_len
                    && (head.bias.is_empty() || head.bias.len() == rows),
                EngineInitSnafu {
                    stage: "heads",
                    message: format!(
                        "task `{}` layer does not match {} classes x {} features",
                        head.name, rows, descriptor_len
                    ),
                }
            );

            let weights = Array2::from_shape_vec((rows, descriptor_len), head.weights)
                .context(ShapeSnafu {
                    stage: "head weights",
                })?;
            let bias = if head.bias.is_empty() {
                Array1::zeros(rows)
            } else {
                Array1::from(head.bias)
            };
            linear.push(LinearHead {
                name: head.name,
                classes: head.classes,
                weights,
                bias,
            });
        }

        Ok(Self {
            heads: linear,
            descriptor_len,
            version,
        })
    }

    pub fn descriptor_len(&self) -> usize {
        self.descriptor_len
    }

    pub fn classify(
        &self,
        descriptor: &Descriptor,
        config: &ClassifyConfig,
    ) -> Result<ClassificationResult, MmrError> {
        descriptor.ensure_shape(self.descriptor_len, self.version)?;
        let features = ArrayView1::from(descriptor.as_slice());

        let values = self
            .heads
            .iter()
            .map(|head| {
                let logits = head.weights.dot(&features) + &head.bias;
                let scores = softmax(logits.as_slice().unwrap_or(&[]));
                decode_task(head, &scores, config.top_scores)
            })
            .collect();

        Ok(ClassificationResult { values })
    }
}

fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exp: Vec<f32> = logits.iter().map(|&l| (l - max).exp()).collect();
    let sum: f32 = exp.iter().sum();
    exp.into_iter().map(|e| e / sum).collect()
}

fn decode_task(head: &LinearHead, scores: &[f32], top: TopScores) -> ClassifyValue {
    let scored = |class_id: usize, score: f32| ScoredClass {
        class_id: class_id as u32,
        class_name: head.classes[class_id].clone(),
        score,
    };

    let mut sorted: Vec<ScoredClass> = scores
        .iter()
        .enumerate()
        .map(|(id, &score)| scored(id, score))
        .collect();
    // Stable sort keeps lower class ids first among ties.
    sorted.sort_by(|a, b| b.score.total_cmp(&a.score));
    let best = sorted[0].clone();

    let ranked = match top {
        TopScores::Best => vec![best.clone()],
        TopScores::Top(k) => sorted.into_iter().take(k.max(1)).collect(),
        TopScores::All => scores
            .iter()
            .enumerate()
            .map(|(id, &score)| scored(id, score))
            .collect(),
    };

    ClassifyValue {
        task_name: head.name.clone(),
        class_name: best.class_name,
        class_id: best.class_id,
        score: best.score,
        ranked,
    }
}
