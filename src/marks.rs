use serde::Serialize;
use std::collections::HashMap;
use thiserror::Error;

/// Scale every running average is expressed on, whatever the evaluation's own scale.
pub const AVERAGE_SCALE: f64 = 20.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Criterion {
    pub id: String,
    pub label: String,
    pub max_points: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    pub id: String,
    pub name: String,
    pub criteria: Vec<Criterion>,
}

impl Category {
    pub fn max_points(&self) -> f64 {
        self.criteria.iter().map(|c| c.max_points).sum()
    }
}

/// Grading scheme of an evaluation: categories (exercises) of criteria.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Scale {
    pub categories: Vec<Category>,
}

impl Scale {
    pub fn total_points(&self) -> f64 {
        self.categories.iter().map(Category::max_points).sum()
    }

    pub fn criterion(&self, id: &str) -> Option<&Criterion> {
        self.categories
            .iter()
            .flat_map(|c| c.criteria.iter())
            .find(|c| c.id == id)
    }

    pub fn criteria_count(&self) -> usize {
        self.categories.iter().map(|c| c.criteria.len()).sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkSettings {
    pub mark_scale: f64,
    pub precision: f64,
}

#[derive(Debug, Clone, Default)]
pub struct CopyInput {
    pub points: HashMap<String, f64>,
    pub bonus: f64,
    pub penalty: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CriterionResult {
    pub criterion_id: String,
    pub label: String,
    pub points: f64,
    pub max_points: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryResult {
    pub category_id: String,
    pub name: String,
    pub points: f64,
    pub max_points: f64,
    pub criteria: Vec<CriterionResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CopyResult {
    pub categories: Vec<CategoryResult>,
    pub raw_points: f64,
    pub bonus: f64,
    pub penalty: f64,
    pub total_points: f64,
    pub max_points: f64,
    pub mark: f64,
    pub mark_scale: f64,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum MarkError {
    #[error("le barème ne contient aucun point")]
    EmptyScale,

    #[error("le barème contient un critère invalide : {label}")]
    InvalidCriterion { label: String },

    #[error("critère inconnu : {0}")]
    UnknownCriterion(String),

    #[error("{points} points hors barème pour « {label} » (maximum {max_points})")]
    PointsOutOfRange {
        label: String,
        points: f64,
        max_points: f64,
    },

    #[error("valeur invalide pour {field} : {value}")]
    InvalidValue { field: &'static str, value: f64 },

    #[error("échelle de notation invalide : {0}")]
    InvalidMarkScale(f64),

    #[error("précision de note invalide : {0}")]
    InvalidPrecision(f64),
}

impl MarkError {
    pub fn code(&self) -> &'static str {
        match self {
            MarkError::EmptyScale => "empty_scale",
            MarkError::InvalidCriterion { .. } => "invalid_scale",
            MarkError::UnknownCriterion(_) => "unknown_criterion",
            MarkError::PointsOutOfRange { .. } => "points_out_of_range",
            MarkError::InvalidValue { .. } => "bad_params",
            MarkError::InvalidMarkScale(_) => "invalid_mark_scale",
            MarkError::InvalidPrecision(_) => "invalid_precision",
        }
    }
}

/// Rounds half-up to the nearest multiple of `step`.
pub fn round_to_precision(x: f64, step: f64) -> f64 {
    if step.is_nan() || step <= 0.0 || !x.is_finite() {
        return x;
    }
    // The epsilon keeps 15.55 / 0.1 = 155.4999.. on the upper side.
    let n = (x / step + 0.5 + 1e-9).floor();
    ((n * step) * 1e9).round() / 1e9
}

pub fn rescale(mark: f64, from_scale: f64, to_scale: f64) -> f64 {
    if from_scale > 0.0 {
        mark / from_scale * to_scale
    } else {
        0.0
    }
}

pub fn validate_settings(settings: &MarkSettings) -> Result<(), MarkError> {
    if !settings.mark_scale.is_finite() || settings.mark_scale <= 0.0 {
        return Err(MarkError::InvalidMarkScale(settings.mark_scale));
    }
    if !settings.precision.is_finite()
        || settings.precision <= 0.0
        || settings.precision > settings.mark_scale
    {
        return Err(MarkError::InvalidPrecision(settings.precision));
    }
    Ok(())
}

pub fn validate_coefficient(coefficient: f64) -> Result<(), MarkError> {
    if !coefficient.is_finite() || coefficient <= 0.0 {
        return Err(MarkError::InvalidValue {
            field: "coefficient",
            value: coefficient,
        });
    }
    Ok(())
}

pub fn validate_scale(scale: &Scale) -> Result<(), MarkError> {
    for crit in scale.categories.iter().flat_map(|c| c.criteria.iter()) {
        if !crit.max_points.is_finite() || crit.max_points <= 0.0 {
            return Err(MarkError::InvalidCriterion {
                label: crit.label.clone(),
            });
        }
    }
    if scale.total_points() <= 0.0 {
        return Err(MarkError::EmptyScale);
    }
    Ok(())
}

fn non_negative(field: &'static str, value: f64) -> Result<f64, MarkError> {
    if !value.is_finite() || value < 0.0 {
        return Err(MarkError::InvalidValue { field, value });
    }
    Ok(value)
}

/// Grades one copy against `scale`.
///
/// Criteria without an entry score zero. The total is clamped to
/// `[0, scale total]` so a bonus can never lift a copy above the scale.
pub fn evaluate_copy(
    scale: &Scale,
    settings: &MarkSettings,
    input: &CopyInput,
) -> Result<CopyResult, MarkError> {
    validate_settings(settings)?;
    validate_scale(scale)?;
    let bonus = non_negative("bonus", input.bonus)?;
    let penalty = non_negative("penalty", input.penalty)?;

    for (id, points) in &input.points {
        let Some(crit) = scale.criterion(id) else {
            return Err(MarkError::UnknownCriterion(id.clone()));
        };
        if !points.is_finite() || *points < 0.0 || *points > crit.max_points + 1e-9 {
            return Err(MarkError::PointsOutOfRange {
                label: crit.label.clone(),
                points: *points,
                max_points: crit.max_points,
            });
        }
    }

    let mut categories = Vec::with_capacity(scale.categories.len());
    let mut raw_points = 0.0_f64;
    for cat in &scale.categories {
        let mut cat_points = 0.0_f64;
        let mut criteria = Vec::with_capacity(cat.criteria.len());
        for crit in &cat.criteria {
            let points = input.points.get(&crit.id).copied().unwrap_or(0.0);
            cat_points += points;
            criteria.push(CriterionResult {
                criterion_id: crit.id.clone(),
                label: crit.label.clone(),
                points,
                max_points: crit.max_points,
            });
        }
        raw_points += cat_points;
        categories.push(CategoryResult {
            category_id: cat.id.clone(),
            name: cat.name.clone(),
            points: cat_points,
            max_points: cat.max_points(),
            criteria,
        });
    }

    let max_points = scale.total_points();
    let total_points = (raw_points + bonus - penalty).clamp(0.0, max_points);
    let mark = round_to_precision(
        rescale(total_points, max_points, settings.mark_scale),
        settings.precision,
    )
    .min(settings.mark_scale);

    Ok(CopyResult {
        categories,
        raw_points,
        bonus,
        penalty,
        total_points,
        max_points,
        mark,
        mark_scale: settings.mark_scale,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scale() -> Scale {
        Scale {
            categories: vec![
                Category {
                    id: "ex1".into(),
                    name: "Exercice 1".into(),
                    criteria: vec![
                        Criterion {
                            id: "c1".into(),
                            label: "Calcul".into(),
                            max_points: 4.0,
                        },
                        Criterion {
                            id: "c2".into(),
                            label: "Rédaction".into(),
                            max_points: 2.0,
                        },
                    ],
                },
                Category {
                    id: "ex2".into(),
                    name: "Exercice 2".into(),
                    criteria: vec![Criterion {
                        id: "c3".into(),
                        label: "Graphique".into(),
                        max_points: 4.0,
                    }],
                },
            ],
        }
    }

    fn on_20(precision: f64) -> MarkSettings {
        MarkSettings {
            mark_scale: 20.0,
            precision,
        }
    }

    fn input(points: &[(&str, f64)], bonus: f64, penalty: f64) -> CopyInput {
        CopyInput {
            points: points.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
            bonus,
            penalty,
        }
    }

    #[test]
    fn rounding_steps_are_half_up() {
        assert_eq!(round_to_precision(13.24, 0.5), 13.0);
        assert_eq!(round_to_precision(13.25, 0.5), 13.5);
        assert_eq!(round_to_precision(15.55, 0.1), 15.6);
        assert_eq!(round_to_precision(12.125, 0.25), 12.25);
        assert_eq!(round_to_precision(7.333333, 0.01), 7.33);
    }

    #[test]
    fn total_sums_categories_then_rescales() {
        let res = evaluate_copy(
            &scale(),
            &on_20(0.01),
            &input(&[("c1", 3.0), ("c2", 1.5), ("c3", 2.0)], 0.0, 0.0),
        )
        .expect("evaluate");
        assert_eq!(res.categories[0].points, 4.5);
        assert_eq!(res.categories[1].points, 2.0);
        assert_eq!(res.total_points, 6.5);
        assert_eq!(res.max_points, 10.0);
        assert_eq!(res.mark, 13.0);
    }

    #[test]
    fn bonus_and_penalty_adjust_then_clamp() {
        let res = evaluate_copy(
            &scale(),
            &on_20(0.5),
            &input(&[("c1", 4.0), ("c2", 2.0), ("c3", 3.5)], 2.0, 0.0),
        )
        .expect("evaluate");
        assert_eq!(res.raw_points, 9.5);
        assert_eq!(res.total_points, 10.0);
        assert_eq!(res.mark, 20.0);

        let res = evaluate_copy(&scale(), &on_20(0.5), &input(&[("c1", 1.0)], 0.0, 3.0))
            .expect("evaluate");
        assert_eq!(res.total_points, 0.0);
        assert_eq!(res.mark, 0.0);
    }

    #[test]
    fn missing_criteria_count_as_zero() {
        let res = evaluate_copy(&scale(), &on_20(0.01), &input(&[("c3", 4.0)], 0.5, 0.0))
            .expect("evaluate");
        assert_eq!(res.categories[0].points, 0.0);
        assert_eq!(res.total_points, 4.5);
        assert_eq!(res.mark, 9.0);
    }

    #[test]
    fn rejects_points_above_criterion_max() {
        let e = evaluate_copy(&scale(), &on_20(0.01), &input(&[("c2", 2.5)], 0.0, 0.0))
            .expect_err("should reject");
        assert_eq!(e.code(), "points_out_of_range");
        let e = evaluate_copy(&scale(), &on_20(0.01), &input(&[("zz", 1.0)], 0.0, 0.0))
            .expect_err("should reject");
        assert_eq!(e, MarkError::UnknownCriterion("zz".into()));
    }

    #[test]
    fn rejects_negative_bonus_and_bad_settings() {
        let e = evaluate_copy(&scale(), &on_20(0.01), &input(&[], -1.0, 0.0))
            .expect_err("should reject");
        assert_eq!(e.code(), "bad_params");
        let e = evaluate_copy(
            &scale(),
            &MarkSettings {
                mark_scale: 0.0,
                precision: 0.5,
            },
            &input(&[], 0.0, 0.0),
        )
        .expect_err("should reject");
        assert_eq!(e.code(), "invalid_mark_scale");
        assert!(evaluate_copy(&Scale::default(), &on_20(0.5), &input(&[], 0.0, 0.0)).is_err());
    }
}
