//! Shared fixtures: a scripted generator that plays every stage, a profile,
//! and a store that can be made to fail.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Value, json};
use uuid::Uuid;

use nourish_core::PlannerConfig;
use nourish_core::generator::{GenerationError, GenerationRequest, Generator, Task};
use nourish_core::memory::{
    DiaryEntry, InMemoryStore, MemorySnapshot, MemoryStore, SaveOutcome, StoreError,
};
use nourish_core::model::{
    ActivityLevel, CalorieBand, Constraints, Day, DietType, EffectiveConstraints,
    FeedbackRecord, Goal, GroceryList, Meal, MealItem, MealPlan, NutritionTarget, Sex,
    SustainabilityReport, UserProfile, food,
};
use nourish_core::pipeline::PlanningInput;

// ---------------------------------------------------------------------------
// Menu
// ---------------------------------------------------------------------------

pub const MAINS: &[&str] = &[
    "Peanut chutney with idli",
    "Prawn curry with rice",
    "Egg bhurji with roti",
    "Chicken tikka with salad",
    "Paneer tikka with roti",
    "Chana masala with rice",
    "Tofu stir fry",
    "Vegetable khichdi",
];

pub const SIDES: &[&str] = &["Boiled egg", "Mixed green salad", "Steamed rice"];

pub const MAIN_COST: f64 = 3.0;
pub const SIDE_COST: f64 = 0.6;
pub const ALTERNATIVE_COST: f64 = 1.5;
pub const OTHER_COST: f64 = 0.8;

// ---------------------------------------------------------------------------
// Scripted generator
// ---------------------------------------------------------------------------

pub enum Reply {
    Json(Value),
    Fail(GenerationError),
    /// Never answers; the caller's timeout fires.
    Hang,
}

#[derive(Debug, Clone)]
pub struct Call {
    pub task: Task,
    pub attempt: u32,
    pub feedback: Vec<String>,
    pub context: Value,
}

/// Plays every stage. Scripted replies are used first, per task; after
/// that each task answers sensibly from its request context.
#[derive(Default)]
pub struct FakeKitchen {
    scripted: Mutex<HashMap<Task, VecDeque<Reply>>>,
    calls: Mutex<Vec<Call>>,
}

impl FakeKitchen {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script(&self, task: Task, reply: Reply) {
        self.scripted
            .lock()
            .unwrap()
            .entry(task)
            .or_default()
            .push_back(reply);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, task: Task) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| c.task == task).count()
    }
}

#[async_trait]
impl Generator for FakeKitchen {
    fn name(&self) -> &str {
        "fake-kitchen"
    }

    async fn invoke(&self, request: &GenerationRequest) -> Result<Value, GenerationError> {
        self.calls.lock().unwrap().push(Call {
            task: request.task,
            attempt: request.attempt,
            feedback: request.feedback.clone(),
            context: request.context.clone(),
        });
        let scripted = self
            .scripted
            .lock()
            .unwrap()
            .get_mut(&request.task)
            .and_then(VecDeque::pop_front);
        match scripted {
            Some(Reply::Json(value)) => Ok(value),
            Some(Reply::Fail(err)) => Err(err),
            Some(Reply::Hang) => std::future::pending().await,
            None => Ok(default_reply(request.task, &request.context)),
        }
    }
}

fn default_reply(task: Task, ctx: &Value) -> Value {
    match task {
        Task::ClassifyIntent => classify(ctx),
        Task::ExtractConstraints => extract(ctx),
        Task::NutritionTargets => {
            let base = &ctx["baseline"];
            json!({
                "calories": base["calories"],
                "protein_g": base["protein_g"],
                "carbs_g": base["carbs_g"],
                "fat_g": base["fat_g"],
                "rationale": "baseline accepted",
            })
        }
        Task::MealDesign => design(ctx),
        Task::Pricing => price(ctx),
        Task::Review => json!({
            "summary": "A balanced plan built around your targets.",
            "verdict": "Suitable for your goal. Consult a doctor before starting.",
            "warnings": [],
        }),
        Task::Sustainability => json!({
            "co2_kg": 6.5,
            "score": 74,
            "high_emission_items": [],
            "swaps": ["Swap one chicken meal for chana masala"],
        }),
        Task::Answer => json!({ "answer": "Lentils and chickpeas are cheap protein sources." }),
    }
}

fn words(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Number right before a word starting with `unit`, as in "3 days".
fn count_before(words: &[String], unit: &str) -> Option<u64> {
    words
        .windows(2)
        .find(|w| w[1].starts_with(unit))
        .and_then(|w| w[0].parse().ok())
}

/// Word right after `phrase`.
fn word_after(text: &str, phrase: &str) -> Option<String> {
    let lower = text.to_lowercase();
    let rest = &lower[lower.find(phrase)? + phrase.len()..];
    rest.split_whitespace()
        .next()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_owned())
}

fn singular(word: String) -> String {
    match word.strip_suffix('s') {
        Some(stem) if stem.len() > 2 => stem.to_owned(),
        _ => word,
    }
}

fn classify(ctx: &Value) -> Value {
    let utterance = ctx["utterance"].as_str().unwrap_or_default();
    let lower = utterance.to_lowercase();
    let w = words(utterance);
    let has_plan = ctx["has_plan"].as_bool().unwrap_or(false);

    let (intent, confidence) = if lower.contains("plan me") || lower.contains("new plan") {
        ("CREATE_PLAN", 0.95)
    } else if lower.trim_end().ends_with('?') {
        ("GENERAL_QUESTION", 0.9)
    } else if has_plan {
        ("REGENERATE_PLAN", 0.85)
    } else {
        ("GENERAL_QUESTION", 0.2)
    };
    json!({
        "intent": intent,
        "confidence": confidence,
        "duration": count_before(&w, "day"),
        "meals_per_day": count_before(&w, "meal"),
    })
}

fn extract(ctx: &Value) -> Value {
    let utterance = ctx["utterance"].as_str().unwrap_or_default();
    let lower = utterance.to_lowercase();
    let w = words(utterance);

    let budget = if lower.contains("too expensive") || lower.contains("cheaper") {
        json!({ "direction": "decrease" })
    } else {
        Value::Null
    };
    let allergies: Vec<String> = word_after(utterance, "allergic to ").into_iter().collect();
    let limit: Vec<String> = word_after(utterance, "too many ")
        .map(singular)
        .into_iter()
        .collect();
    let avoid: Vec<String> = word_after(utterance, "don't want ").into_iter().collect();
    let remove: Vec<String> = word_after(utterance, "can eat ").into_iter().collect();
    let goal = if lower.contains("maintain my weight") {
        json!("maintain")
    } else {
        Value::Null
    };

    json!({
        "budget": budget,
        "allergies": allergies,
        "avoid": avoid,
        "remove_dislikes": remove,
        "include": [],
        "limit": limit,
        "days": count_before(&w, "day"),
        "meals_per_day": count_before(&w, "meal"),
        "goal": goal,
        "notes": null,
    })
}

fn strings(value: &Value) -> Vec<String> {
    value
        .as_array()
        .map(|a| {
            a.iter()
                .filter_map(|v| v.as_str().map(str::to_owned))
                .collect()
        })
        .unwrap_or_default()
}

struct Rules {
    excluded: Vec<String>,
    limit: Vec<String>,
    diet: DietType,
}

impl Rules {
    fn pick(&self, menu: &[&'static str], start: usize, used: &mut HashMap<String, usize>) -> &'static str {
        for k in 0..menu.len() {
            let name = menu[(start + k) % menu.len()];
            let blocked = food::first_conflict(name, &self.excluded).is_some()
                || food::diet_violation(name, self.diet).is_some()
                || self.limit.iter().any(|t| {
                    food::conflicts_with(name, t) && used.get(t).copied().unwrap_or(0) > 0
                });
            if blocked {
                continue;
            }
            for t in &self.limit {
                if food::conflicts_with(name, t) {
                    *used.entry(t.clone()).or_default() += 1;
                }
            }
            return name;
        }
        menu[menu.len() - 1]
    }
}

fn design(ctx: &Value) -> Value {
    let calories = ctx["target"]["calories"].as_f64().unwrap();
    let protein = ctx["target"]["protein_g"].as_f64().unwrap();
    let days = ctx["days"].as_u64().unwrap() as usize;
    let meals = ctx["meals_per_day"].as_u64().unwrap() as usize;
    let rules = Rules {
        excluded: strings(&ctx["allergies"])
            .into_iter()
            .chain(strings(&ctx["avoid"]))
            .collect(),
        limit: strings(&ctx["limit"]),
        diet: serde_json::from_value(ctx["diet_type"].clone()).unwrap(),
    };
    let meal_kcal = calories / meals as f64;
    let meal_protein = protein / meals as f64;

    let item = |name: &str, share_kcal: f64, share_protein: f64| {
        let kcal = meal_kcal * share_kcal;
        json!({
            "name": name,
            "quantity": 1,
            "unit": "serving",
            "calories": kcal,
            "protein_g": meal_protein * share_protein,
            "carbs_g": kcal * 0.5 / 4.0,
            "fat_g": kcal * 0.25 / 9.0,
        })
    };

    let days: Vec<Value> = (0..days)
        .map(|d| {
            let mut used = HashMap::new();
            let meals: Vec<Value> = (0..meals)
                .map(|m| {
                    let main = rules.pick(MAINS, (d * meals + m) % MAINS.len(), &mut used);
                    let side = rules.pick(SIDES, 0, &mut used);
                    json!({
                        "name": format!("Meal {}", m + 1),
                        "items": [item(main, 0.6, 0.8), item(side, 0.4, 0.2)],
                    })
                })
                .collect();
            json!({ "meals": meals })
        })
        .collect();
    json!({ "days": days })
}

fn price(ctx: &Value) -> Value {
    let prices: Vec<Value> = ctx["items"]
        .as_array()
        .unwrap()
        .iter()
        .map(|item| {
            let name = item["name"].as_str().unwrap();
            if MAINS.contains(&name) {
                json!({
                    "item": name,
                    "cost": MAIN_COST,
                    "alternatives": [{
                        "name": format!("Home-style {}", name.to_lowercase()),
                        "quantity": 1,
                        "unit": "serving",
                        "calories": item["calories"],
                        "protein_g": item["protein_g"],
                        "cost": ALTERNATIVE_COST,
                    }],
                })
            } else if SIDES.contains(&name) {
                json!({ "item": name, "cost": SIDE_COST })
            } else {
                json!({ "item": name, "cost": OTHER_COST })
            }
        })
        .collect();
    json!({ "prices": prices })
}

/// A one-day design answer with `name` as the only main, sized to `ctx`.
pub fn design_with(main: &str, calories: f64, protein: f64, meals: usize) -> Value {
    let meal = |m: usize| {
        json!({
            "name": format!("Meal {}", m + 1),
            "items": [{
                "name": main,
                "calories": calories / meals as f64,
                "protein_g": protein / meals as f64,
            }],
        })
    };
    json!({ "days": [{ "meals": (0..meals).map(meal).collect::<Vec<_>>() }] })
}

// ---------------------------------------------------------------------------
// Profiles, inputs, plans
// ---------------------------------------------------------------------------

pub const USER: &str = "asha";

/// Female, 34, 165 cm, 72 kg, lightly active, losing weight, allergic to
/// peanuts, 50 per plan, 3 meals a day for 3 days.
pub fn profile() -> UserProfile {
    UserProfile {
        user_id: USER.to_owned(),
        display_name: Some("Asha".to_owned()),
        age: 34,
        sex: Sex::Female,
        height_cm: 165.0,
        weight_kg: 72.0,
        goal_weight_kg: Some(65.0),
        activity: ActivityLevel::Light,
        goal: Goal::WeightLoss,
        diet_type: DietType::Omnivore,
        allergies: vec!["peanut".to_owned()],
        dislikes: vec![],
        cuisine: Some("indian".to_owned()),
        budget_ceiling: 50.0,
        meals_per_day: 3,
        plan_days: 3,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

pub fn test_config() -> PlannerConfig {
    PlannerConfig {
        generator_timeout_ms: 200,
        store_backoff_ms: 1,
        ..PlannerConfig::default()
    }
}

pub fn snapshot(profile: UserProfile) -> MemorySnapshot {
    MemorySnapshot {
        profile,
        latest_plan: None,
        recent_feedback: vec![],
        recent_diary: vec![],
    }
}

pub fn planning_input(profile: UserProfile, constraints: &Constraints) -> PlanningInput {
    PlanningInput {
        session_id: Uuid::new_v4(),
        user_id: profile.user_id.clone(),
        version: 1,
        constraints: EffectiveConstraints::resolve(&profile, constraints),
        snapshot: snapshot(profile.clone()),
        profile,
    }
}

pub async fn store_with_profile() -> Arc<InMemoryStore> {
    let store = Arc::new(InMemoryStore::new());
    store.set_profile(profile()).await;
    store
}

/// A small, already-priced plan for store tests.
pub fn sample_plan(session_id: Uuid, version: u32) -> MealPlan {
    let days = vec![Day {
        day: 1,
        meals: vec![Meal {
            name: "Lunch".to_owned(),
            items: vec![MealItem {
                name: "Chana masala with rice".to_owned(),
                quantity: 1.0,
                unit: "serving".to_owned(),
                calories: 1500.0,
                protein_g: 120.0,
                carbs_g: 150.0,
                fat_g: 40.0,
                cost: Some(3.0),
            }],
        }],
    }];
    MealPlan {
        id: Uuid::new_v4(),
        session_id,
        version,
        daily: days.iter().map(Day::totals).collect(),
        grocery: GroceryList::from_days(&days),
        days,
        target: NutritionTarget {
            calories: 1500.0,
            protein_g: 120.0,
            carbs_g: 150.0,
            fat_g: 40.0,
            bmr: 1420.0,
            tdee: 1953.0,
            band: CalorieBand {
                min: 1200.0,
                max: 1853.0,
            },
            rationale: String::new(),
        },
        total_cost: 3.0,
        budget_ceiling: 50.0,
        over_budget: false,
        substitutions: vec![],
        summary: "One day".to_owned(),
        verdict: "Consult a doctor.".to_owned(),
        warnings: vec![],
        created_at: Utc::now(),
    }
}

pub fn sample_record(plan: &MealPlan, text: &str) -> FeedbackRecord {
    FeedbackRecord {
        id: Uuid::new_v4(),
        session_id: plan.session_id,
        plan_id: plan.id,
        plan_version: plan.version,
        plan_fingerprint: plan.fingerprint(),
        feedback: text.to_owned(),
        delta: Default::default(),
        created_at: Utc::now(),
    }
}

pub fn sample_report() -> SustainabilityReport {
    SustainabilityReport::heuristic(&GroceryList::default())
}

// ---------------------------------------------------------------------------
// Failing store
// ---------------------------------------------------------------------------

/// An [`InMemoryStore`] whose next `n` saves fail.
pub struct FlakyStore {
    pub inner: InMemoryStore,
    failures: AtomicU32,
    saves: AtomicU32,
}

impl FlakyStore {
    pub async fn new() -> Arc<Self> {
        let inner = InMemoryStore::new();
        inner.set_profile(profile()).await;
        Arc::new(Self {
            inner,
            failures: AtomicU32::new(0),
            saves: AtomicU32::new(0),
        })
    }

    pub fn fail_next_saves(&self, n: u32) {
        self.failures.store(n, Ordering::SeqCst);
    }

    /// Save attempts so far, failed ones included.
    pub fn save_attempts(&self) -> u32 {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MemoryStore for FlakyStore {
    async fn load_snapshot(&self, user_id: &str) -> Result<MemorySnapshot, StoreError> {
        self.inner.load_snapshot(user_id).await
    }

    async fn save_approved_plan(
        &self,
        user_id: &str,
        plan: &MealPlan,
        report: &SustainabilityReport,
        feedback: &[FeedbackRecord],
    ) -> Result<SaveOutcome, StoreError> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(StoreError::Unavailable("connection refused".to_owned()));
        }
        self.inner
            .save_approved_plan(user_id, plan, report, feedback)
            .await
    }

    async fn append_feedback(
        &self,
        user_id: &str,
        record: &FeedbackRecord,
    ) -> Result<(), StoreError> {
        self.inner.append_feedback(user_id, record).await
    }

    async fn append_diary_entry(
        &self,
        user_id: &str,
        entry: &DiaryEntry,
    ) -> Result<(), StoreError> {
        self.inner.append_diary_entry(user_id, entry).await
    }
}

/// Items of a day whose name conflicts with `term`.
pub fn count_on_day(day: &Day, term: &str) -> usize {
    day.items().filter(|i| food::conflicts_with(&i.name, term)).count()
}
