//! Deduction-based scoring.
//!
//! Each category starts at 100 and loses a fixed number of points per issue
//! by severity. The overall score is a fixed-weight blend of the four
//! category scores. Scoring only sums over the input, so any permutation of
//! the same issues scores identically.

use serde::{Deserialize, Serialize};
use sitelens_scanner::issue::{Category, Issue, Severity};

pub const WEIGHT_TECHNICAL: f64 = 0.35;
pub const WEIGHT_PERFORMANCE: f64 = 0.30;
pub const WEIGHT_VISUAL: f64 = 0.15;
pub const WEIGHT_ACCESSIBILITY: f64 = 0.20;

pub fn deduction(severity: Severity) -> i64 {
    match severity {
        Severity::Error => 10,
        Severity::Warning => 3,
        Severity::Notice => 1,
        Severity::Passed => 0,
    }
}

pub fn weight(category: Category) -> f64 {
    match category {
        Category::Technical => WEIGHT_TECHNICAL,
        Category::Performance => WEIGHT_PERFORMANCE,
        Category::Visual => WEIGHT_VISUAL,
        Category::Accessibility => WEIGHT_ACCESSIBILITY,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryScores {
    pub technical: u8,
    pub performance: u8,
    pub visual: u8,
    pub accessibility: u8,
}

impl Default for CategoryScores {
    fn default() -> Self {
        Self {
            technical: 100,
            performance: 100,
            visual: 100,
            accessibility: 100,
        }
    }
}

impl CategoryScores {
    pub fn zero() -> Self {
        Self {
            technical: 0,
            performance: 0,
            visual: 0,
            accessibility: 0,
        }
    }

    pub fn get(&self, category: Category) -> u8 {
        match category {
            Category::Technical => self.technical,
            Category::Performance => self.performance,
            Category::Visual => self.visual,
            Category::Accessibility => self.accessibility,
        }
    }

    fn set(&mut self, category: Category, score: u8) {
        match category {
            Category::Technical => self.technical = score,
            Category::Performance => self.performance = score,
            Category::Visual => self.visual = score,
            Category::Accessibility => self.accessibility = score,
        }
    }

    /// Lowest-scoring category; ties go to the heavier weight.
    pub fn weakest(&self) -> Category {
        let mut weakest = Category::Technical;
        for category in Category::ALL {
            let (score, best) = (self.get(category), self.get(weakest));
            if score < best || (score == best && weight(category) > weight(weakest)) {
                weakest = category;
            }
        }
        weakest
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreCard {
    pub overall: u8,
    pub categories: CategoryScores,
}

pub fn score(issues: &[Issue]) -> ScoreCard {
    let mut deductions = [0i64; 4];
    for issue in issues {
        deductions[slot(issue.category)] += deduction(issue.severity);
    }

    let mut categories = CategoryScores::default();
    let mut weighted = 0.0;
    for category in Category::ALL {
        let value = (100 - deductions[slot(category)]).clamp(0, 100) as u8;
        categories.set(category, value);
        weighted += f64::from(value) * weight(category);
    }

    ScoreCard {
        overall: weighted.round().clamp(0.0, 100.0) as u8,
        categories,
    }
}

fn slot(category: Category) -> usize {
    match category {
        Category::Technical => 0,
        Category::Performance => 1,
        Category::Visual => 2,
        Category::Accessibility => 3,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weights_sum_to_one() {
        let total: f64 = Category::ALL.iter().map(|c| weight(*c)).sum();
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_list_is_perfect() {
        let card = score(&[]);
        assert_eq!(card.overall, 100);
        assert_eq!(card.categories, CategoryScores::default());
    }

    #[test]
    fn test_weakest_category() {
        let scores = CategoryScores {
            technical: 80,
            performance: 80,
            visual: 95,
            accessibility: 90,
        };
        assert_eq!(scores.weakest(), Category::Technical);
    }
}
