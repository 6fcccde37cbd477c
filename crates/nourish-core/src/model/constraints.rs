//! Session-scoped constraints layered over the durable profile.

use std::collections::BTreeSet;

use nourish_db::models::{DietType, Goal, UserProfile};
use serde::{Deserialize, Serialize};

use super::food;

/// What the user asked for regarding cost.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "direction", rename_all = "snake_case")]
pub enum BudgetDirective {
    /// An explicit ceiling for the whole plan.
    Target { amount: f64 },
    /// Cheaper than the plan being refined.
    Decrease,
    /// Room to spend more than the plan being refined.
    Increase,
    /// Keep spending where it is.
    Maintain,
}

impl BudgetDirective {
    const DECREASE_FACTOR: f64 = 0.75;
    const INCREASE_FACTOR: f64 = 1.2;

    /// New ceiling given the cost of the plan being refined (or the current
    /// ceiling when there is no plan yet).
    pub fn resolve(self, reference: f64) -> f64 {
        match self {
            Self::Target { amount } => amount,
            Self::Decrease => reference * Self::DECREASE_FACTOR,
            Self::Increase => reference * Self::INCREASE_FACTOR,
            Self::Maintain => reference,
        }
    }
}

/// A structured change extracted from one utterance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConstraintsDelta {
    pub budget: Option<BudgetDirective>,
    pub allergies: Vec<String>,
    /// New dislikes.
    pub avoid: Vec<String>,
    /// Dislikes the user no longer has. Never touches allergies.
    pub remove_dislikes: Vec<String>,
    pub include: Vec<String>,
    /// Items to keep to at most one occurrence per day.
    pub limit: Vec<String>,
    pub days: Option<u8>,
    pub meals_per_day: Option<u8>,
    pub goal: Option<Goal>,
    pub notes: Option<String>,
}

impl ConstraintsDelta {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Accumulated session overlay. Allergies only ever grow.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Constraints {
    pub budget_ceiling: Option<f64>,
    pub allergies: BTreeSet<String>,
    pub dislikes_added: BTreeSet<String>,
    pub dislikes_removed: BTreeSet<String>,
    pub include: BTreeSet<String>,
    pub limit: BTreeSet<String>,
    pub days: Option<u8>,
    pub meals_per_day: Option<u8>,
    pub goal: Option<Goal>,
    pub notes: Vec<String>,
}

fn clean(terms: &[String]) -> impl Iterator<Item = String> + '_ {
    terms.iter().map(|t| food::normalize(t)).filter(|t| !t.is_empty())
}

impl Constraints {
    /// Fold a delta in. `reference_cost` anchors relative budget
    /// directives: the cost of the plan being refined, or the ceiling in
    /// force when there is none.
    pub fn merge(&mut self, delta: &ConstraintsDelta, reference_cost: f64) {
        self.allergies.extend(clean(&delta.allergies));

        for term in clean(&delta.avoid) {
            self.dislikes_removed.remove(&term);
            self.include.remove(&term);
            self.dislikes_added.insert(term);
        }
        for term in clean(&delta.remove_dislikes) {
            self.dislikes_added.remove(&term);
            self.dislikes_removed.insert(term);
        }
        for term in clean(&delta.include) {
            self.dislikes_added.remove(&term);
            self.limit.remove(&term);
            self.include.insert(term);
        }
        for term in clean(&delta.limit) {
            self.include.remove(&term);
            self.limit.insert(term);
        }

        if let Some(directive) = delta.budget {
            self.budget_ceiling = Some(directive.resolve(reference_cost));
        }
        if delta.days.is_some() {
            self.days = delta.days;
        }
        if delta.meals_per_day.is_some() {
            self.meals_per_day = delta.meals_per_day;
        }
        if delta.goal.is_some() {
            self.goal = delta.goal;
        }
        if let Some(note) = delta.notes.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
            self.notes.push(note.to_owned());
        }
    }
}

/// Profile plus session overlay, as the stages see it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectiveConstraints {
    pub goal: Goal,
    pub diet_type: DietType,
    pub allergies: Vec<String>,
    /// Dislikes that are not allergies.
    pub avoid: Vec<String>,
    pub include: Vec<String>,
    pub limit: Vec<String>,
    pub budget_ceiling: f64,
    pub days: u32,
    pub meals_per_day: u32,
    pub cuisine: Option<String>,
    pub notes: Vec<String>,
}

impl EffectiveConstraints {
    pub fn resolve(profile: &UserProfile, constraints: &Constraints) -> Self {
        let allergies: BTreeSet<String> = clean(&profile.allergies)
            .chain(constraints.allergies.iter().cloned())
            .collect();
        let avoid: BTreeSet<String> = clean(&profile.dislikes)
            .chain(constraints.dislikes_added.iter().cloned())
            .filter(|d| !constraints.dislikes_removed.contains(d) && !allergies.contains(d))
            .collect();

        Self {
            goal: constraints.goal.unwrap_or(profile.goal),
            diet_type: profile.diet_type,
            allergies: allergies.into_iter().collect(),
            avoid: avoid.into_iter().collect(),
            include: constraints.include.iter().cloned().collect(),
            limit: constraints.limit.iter().cloned().collect(),
            budget_ceiling: constraints.budget_ceiling.unwrap_or(profile.budget_ceiling),
            days: constraints
                .days
                .map(u32::from)
                .unwrap_or_else(|| profile.plan_days.max(1) as u32)
                .clamp(1, 7),
            meals_per_day: constraints
                .meals_per_day
                .map(u32::from)
                .unwrap_or_else(|| profile.meals_per_day.max(1) as u32)
                .clamp(1, 6),
            cuisine: profile.cuisine.clone(),
            notes: constraints.notes.clone(),
        }
    }

    /// Everything an item must not conflict with: allergies then dislikes.
    pub fn exclusions(&self) -> impl Iterator<Item = &String> {
        self.allergies.iter().chain(self.avoid.iter())
    }
}
