//! The session entry points, end to end over the scripted kitchen and the
//! in-memory store.

mod common;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use uuid::Uuid;

use nourish_core::answer::FALLBACK_ANSWER;
use nourish_core::feedback::FeedbackState;
use nourish_core::generator::vision::{NutritionEstimate, VisionAnalyzer, VisionError};
use nourish_core::generator::{GenerationError, Task};
use nourish_core::intent::Intent;
use nourish_core::memory::{InMemoryStore, MemoryStore};
use nourish_core::model::{UserProfile, food};
use nourish_core::pipeline::PipelineState;
use nourish_core::{PlannerConfig, PlannerError, SessionManager, SessionReply};

use common::{
    FakeKitchen, FlakyStore, Reply, USER, count_on_day, design_with, profile,
    store_with_profile, test_config,
};

const PLAN_REQUEST: &str = "plan me 3 days, 3 meals/day";

fn manager(kitchen: &Arc<FakeKitchen>, store: Arc<dyn MemoryStore>) -> SessionManager {
    SessionManager::new(kitchen.clone(), store, test_config())
}

async fn first_plan(manager: &SessionManager) -> SessionReply {
    manager
        .start_or_continue_session(USER, PLAN_REQUEST)
        .await
        .unwrap()
}

#[tokio::test]
async fn three_day_plan_for_a_peanut_allergy() {
    let kitchen = FakeKitchen::new();
    let manager = manager(&kitchen, store_with_profile().await);

    let reply = first_plan(&manager).await;

    assert_eq!(
        reply.intent,
        Some(Intent::NewPlanRequest {
            days: Some(3),
            meals_per_day: Some(3)
        })
    );
    assert_eq!(reply.pipeline, PipelineState::Complete);
    assert_eq!(reply.feedback, FeedbackState::AwaitingApproval);
    let plan = reply.plan.unwrap().plan;
    assert_eq!(plan.days.len(), 3);
    assert!(plan.days.iter().all(|d| d.meals.len() == 3));
    assert!(plan.total_cost <= 50.0);
    for day in &plan.days {
        assert_eq!(count_on_day(day, "peanut"), 0);
    }
    // Weight loss: inside the deficit band and above the floor.
    assert!(plan.target.calories < plan.target.tdee);
    assert!(plan.target.calories >= plan.target.tdee - 1000.0);
    assert!(plan.target.calories >= 1200.0);
}

#[tokio::test]
async fn approval_is_persisted_once() {
    let kitchen = FakeKitchen::new();
    let store = FlakyStore::new().await;
    let manager = manager(&kitchen, store.clone());
    let session = first_plan(&manager).await.session_id;

    let approved = manager.approve_plan(session).await.unwrap();
    assert_eq!(approved.feedback, FeedbackState::Approved);
    let again = manager.approve_plan(session).await.unwrap();
    assert_eq!(again.feedback, FeedbackState::Approved);
    assert!(again.message.contains("already approved"));

    assert_eq!(store.save_attempts(), 1);
    assert_eq!(store.inner.approved_plans(USER).await.len(), 1);
    let snapshot = manager.snapshot(USER).await.unwrap();
    assert_eq!(
        snapshot.latest_plan.unwrap().plan.id,
        approved.plan.unwrap().plan.id
    );
}

#[tokio::test]
async fn budget_complaint_reenters_at_budget_optimization() {
    let kitchen = FakeKitchen::new();
    let store = store_with_profile().await;
    let manager = manager(&kitchen, store.clone());
    let first = first_plan(&manager).await.plan.unwrap().plan;

    let reply = manager
        .start_or_continue_session(USER, "this is too expensive")
        .await
        .unwrap();

    assert_eq!(reply.intent, Some(Intent::RefinementFeedback));
    assert!(reply.message.starts_with("Updated from budget_optimization"));
    let plan = reply.plan.unwrap().plan;
    assert_eq!(plan.version, 2);
    assert!(plan.total_cost <= first.total_cost * 0.75 + 1e-9);
    assert_eq!(plan.target, first.target);
    assert_eq!(kitchen.count(Task::NutritionTargets), 1);
    assert_eq!(kitchen.count(Task::MealDesign), 1);
    assert_eq!(kitchen.count(Task::Pricing), 2);

    let recorded = store.feedback(USER).await;
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].plan_id, first.id);
    assert_eq!(recorded[0].plan_version, 1);
    assert_eq!(recorded[0].plan_fingerprint, first.fingerprint());
}

#[tokio::test]
async fn new_allergy_after_approval_redesigns_meals_only() {
    let kitchen = FakeKitchen::new();
    let store = store_with_profile().await;
    let manager = manager(&kitchen, store.clone());
    let first = first_plan(&manager).await;
    manager.approve_plan(first.session_id).await.unwrap();
    let first = first.plan.unwrap().plan;
    assert!(first.days.iter().any(|d| count_on_day(d, "egg") > 1));
    assert!(first.days.iter().any(|d| count_on_day(d, "shellfish") > 0));

    let reply = manager
        .reject_plan(
            first.session_id,
            "too many eggs, also I'm allergic to shellfish now",
        )
        .await
        .unwrap();

    assert!(reply.message.starts_with("Updated from meal_design"));
    assert_eq!(reply.feedback, FeedbackState::AwaitingApproval);
    let plan = reply.plan.unwrap().plan;
    for day in &plan.days {
        assert_eq!(count_on_day(day, "shellfish"), 0);
        assert_eq!(count_on_day(day, "peanut"), 0);
        assert!(count_on_day(day, "egg") <= 1);
    }
    assert_eq!(kitchen.count(Task::NutritionTargets), 1);
    assert_eq!(kitchen.count(Task::MealDesign), 2);

    let recorded = store.feedback(USER).await;
    let last = recorded.last().unwrap();
    assert_eq!(last.delta.allergies, vec!["shellfish".to_owned()]);
    assert_eq!(last.delta.limit, vec!["egg".to_owned()]);
}

#[tokio::test]
async fn allergies_from_the_request_survive_approval() {
    let kitchen = FakeKitchen::new();
    let manager = manager(&kitchen, store_with_profile().await);
    let first = manager
        .start_or_continue_session(
            USER,
            "plan me 3 days, 3 meals/day, I am allergic to shellfish",
        )
        .await
        .unwrap();
    for day in &first.plan.as_ref().unwrap().plan.days {
        assert_eq!(count_on_day(day, "shellfish"), 0);
    }
    manager.approve_plan(first.session_id).await.unwrap();

    let reply = manager
        .reject_plan(first.session_id, "I don't want chicken")
        .await
        .unwrap();

    assert_eq!(reply.feedback, FeedbackState::AwaitingApproval);
    let plan = reply.plan.unwrap().plan;
    assert_eq!(plan.days.len(), 3);
    for day in &plan.days {
        assert_eq!(count_on_day(day, "shellfish"), 0);
        assert_eq!(count_on_day(day, "peanut"), 0);
        assert_eq!(count_on_day(day, "chicken"), 0);
    }
}

#[tokio::test]
async fn requested_length_survives_approval() {
    let kitchen = FakeKitchen::new();
    let store = Arc::new(InMemoryStore::new());
    store
        .set_profile(UserProfile {
            plan_days: 7,
            ..profile()
        })
        .await;
    let manager = manager(&kitchen, store);
    let first = first_plan(&manager).await;
    assert_eq!(first.plan.as_ref().unwrap().plan.days.len(), 3);
    manager.approve_plan(first.session_id).await.unwrap();

    let reply = manager
        .reject_plan(first.session_id, "this is too expensive")
        .await
        .unwrap();

    assert!(reply.message.starts_with("Updated from budget_optimization"));
    let plan = reply.plan.unwrap().plan;
    assert_eq!(plan.version, 2);
    assert_eq!(plan.days.len(), 3);
    assert!(plan.days.iter().all(|d| d.meals.len() == 3));
}

#[tokio::test]
async fn refinement_halts_on_the_rejection_after_the_cap() {
    let kitchen = FakeKitchen::new();
    let manager = manager(&kitchen, store_with_profile().await);
    let session = first_plan(&manager).await.session_id;
    let cap = manager.config().convergence_cap;
    assert_eq!(cap, 5);

    for cycle in 1..=cap {
        let reply = manager
            .reject_plan(session, "make it cheaper")
            .await
            .unwrap_or_else(|e| panic!("cycle {cycle}: {e}"));
        assert_eq!(reply.plan.unwrap().plan.version, cycle + 1);
    }
    let extractions = kitchen.count(Task::ExtractConstraints);

    let err = manager
        .reject_plan(session, "make it cheaper")
        .await
        .unwrap_err();
    assert!(matches!(err, PlannerError::ConvergenceExceeded { cycles: 5 }));
    assert_eq!(kitchen.count(Task::ExtractConstraints), extractions);

    let err = manager.approve_plan(session).await.unwrap_err();
    assert!(matches!(err, PlannerError::ConvergenceExceeded { .. }));
    assert_eq!(manager.plans(session).await.unwrap().len(), 6);
}

#[tokio::test]
async fn unreadable_feedback_changes_nothing() {
    let kitchen = FakeKitchen::new();
    let manager = manager(&kitchen, store_with_profile().await);
    let session = first_plan(&manager).await.session_id;
    for _ in 0..2 {
        kitchen.script(Task::ExtractConstraints, Reply::Json(json!({ "mood": "bad" })));
    }

    let err = manager.reject_plan(session, "meh").await.unwrap_err();
    assert!(matches!(err, PlannerError::ExtractionFailed(_)));
    assert!(err.to_string().contains("rephrase"));
    assert_eq!(manager.plans(session).await.unwrap().len(), 1);

    let approved = manager.approve_plan(session).await.unwrap();
    assert_eq!(approved.plan.unwrap().plan.version, 1);
}

#[tokio::test]
async fn failed_refinement_stalls_until_more_feedback() {
    let kitchen = FakeKitchen::new();
    let manager = manager(&kitchen, store_with_profile().await);
    let first = first_plan(&manager).await;
    let target = first.plan.unwrap().plan.target;
    for _ in 0..3 {
        kitchen.script(
            Task::MealDesign,
            Reply::Json(design_with("Peanut satay bowl", target.calories, target.protein_g, 3)),
        );
    }

    let err = manager
        .reject_plan(first.session_id, "I don't want chicken")
        .await
        .unwrap_err();
    assert_eq!(err.stage(), Some(nourish_core::stages::StageKind::MealDesign));
    assert!(matches!(
        manager.approve_plan(first.session_id).await,
        Err(PlannerError::InvalidState(_))
    ));

    let reply = manager
        .reject_plan(first.session_id, "I don't want chicken")
        .await
        .unwrap();
    assert_eq!(reply.feedback, FeedbackState::AwaitingApproval);
    let plan = reply.plan.unwrap().plan;
    assert_eq!(plan.version, 2);
    assert!(
        plan.days
            .iter()
            .flat_map(|d| d.items())
            .all(|i| !food::conflicts_with(&i.name, "chicken"))
    );
}

#[tokio::test]
async fn over_budget_plan_needs_explicit_acceptance() {
    let kitchen = FakeKitchen::new();
    let store = store_with_profile().await;
    store
        .set_profile(nourish_core::model::UserProfile {
            budget_ceiling: 5.0,
            ..profile()
        })
        .await;
    let manager = manager(&kitchen, store.clone());
    let reply = first_plan(&manager).await;
    let plan = reply.plan.unwrap().plan;
    assert!(plan.over_budget);

    let err = manager.approve_plan(reply.session_id).await.unwrap_err();
    match err {
        PlannerError::OverBudget { plan_id, overage } => {
            assert_eq!(plan_id, plan.id);
            assert!((overage - plan.overage()).abs() < 1e-9);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(store.approved_plans(USER).await.is_empty());

    let approved = manager.approve_over_budget(reply.session_id).await.unwrap();
    assert_eq!(approved.feedback, FeedbackState::Approved);
    assert_eq!(store.approved_plans(USER).await.len(), 1);
}

#[tokio::test]
async fn approval_waits_for_a_durable_save() {
    let kitchen = FakeKitchen::new();
    let store = FlakyStore::new().await;
    let manager = manager(&kitchen, store.clone());
    let session = first_plan(&manager).await.session_id;

    store.fail_next_saves(3);
    let err = manager.approve_plan(session).await.unwrap_err();
    assert!(matches!(err, PlannerError::StoreUnavailable(_)));
    assert_eq!(store.save_attempts(), 3);
    assert!(store.inner.approved_plans(USER).await.is_empty());

    store.fail_next_saves(2);
    let approved = manager.approve_plan(session).await.unwrap();
    assert_eq!(approved.feedback, FeedbackState::Approved);
    assert_eq!(store.save_attempts(), 6);
    assert_eq!(store.inner.approved_plans(USER).await.len(), 1);
}

#[tokio::test]
async fn questions_are_answered_and_never_fail() {
    let kitchen = FakeKitchen::new();
    let manager = manager(&kitchen, store_with_profile().await);

    let reply = manager
        .start_or_continue_session(USER, "what is a cheap protein?")
        .await
        .unwrap();
    assert_eq!(reply.intent, Some(Intent::GeneralQuestion));
    assert!(reply.message.contains("Lentils"));
    assert!(reply.plan.is_none());

    kitchen.script(
        Task::Answer,
        Reply::Fail(GenerationError::ProviderError("down".into())),
    );
    let reply = manager
        .start_or_continue_session(USER, "is rice fattening?")
        .await
        .unwrap();
    assert_eq!(reply.message, FALLBACK_ANSWER);
}

#[tokio::test]
async fn unclear_input_is_unrecognized() {
    let kitchen = FakeKitchen::new();
    let manager = manager(&kitchen, store_with_profile().await);

    let reply = manager.start_or_continue_session(USER, "hmm").await.unwrap();
    assert_eq!(reply.intent, Some(Intent::Unrecognized));

    kitchen.script(Task::ClassifyIntent, Reply::Hang);
    let reply = manager
        .start_or_continue_session(USER, PLAN_REQUEST)
        .await
        .unwrap();
    assert_eq!(reply.intent, Some(Intent::Unrecognized));
    assert_eq!(reply.pipeline, PipelineState::Idle);
}

#[tokio::test]
async fn unknown_users_and_sessions_are_errors() {
    let kitchen = FakeKitchen::new();
    let manager = manager(&kitchen, store_with_profile().await);

    let err = manager
        .start_or_continue_session("nobody", PLAN_REQUEST)
        .await
        .unwrap_err();
    assert!(matches!(err, PlannerError::UnknownUser(ref u) if u == "nobody"));

    let missing = Uuid::new_v4();
    let err = manager.approve_plan(missing).await.unwrap_err();
    assert!(matches!(err, PlannerError::UnknownSession(id) if id == missing));
}

#[tokio::test]
async fn sessions_of_different_users_run_concurrently() {
    let kitchen = FakeKitchen::new();
    let store = store_with_profile().await;
    store
        .set_profile(nourish_core::model::UserProfile {
            user_id: "ben".to_owned(),
            allergies: vec!["shellfish".to_owned()],
            ..profile()
        })
        .await;
    let manager = manager(&kitchen, store);

    let (a, b) = tokio::join!(
        manager.start_or_continue_session(USER, PLAN_REQUEST),
        manager.start_or_continue_session("ben", PLAN_REQUEST),
    );
    let (a, b) = (a.unwrap(), b.unwrap());
    assert_ne!(a.session_id, b.session_id);
    for day in &b.plan.unwrap().plan.days {
        assert_eq!(count_on_day(day, "shellfish"), 0);
    }
    assert!(a.plan.is_some());
    assert!(manager.end_session(a.session_id).await);
    assert!(!manager.end_session(a.session_id).await);
}

struct FakeEye;

#[async_trait]
impl VisionAnalyzer for FakeEye {
    async fn analyze(&self, _image: &Path) -> Result<NutritionEstimate, VisionError> {
        Ok(NutritionEstimate {
            food: "Chicken biryani".to_owned(),
            calories: 650.0,
            protein_g: 30.0,
            carbs_g: 80.0,
            fat_g: 20.0,
            notes: None,
        })
    }
}

#[tokio::test]
async fn diary_entries_bypass_the_session() {
    let kitchen = FakeKitchen::new();
    let store = store_with_profile().await;

    let without = manager(&kitchen, store.clone());
    let err = without
        .append_diary(USER, Path::new("lunch.jpg"))
        .await
        .unwrap_err();
    assert!(matches!(err, PlannerError::Vision(VisionError::NotConfigured)));

    let manager = SessionManager::new(kitchen.clone(), store, PlannerConfig::default())
        .with_vision(Arc::new(FakeEye));
    let entry = manager
        .append_diary(USER, Path::new("lunch.jpg"))
        .await
        .unwrap();
    assert_eq!(entry.co2_kg, Some(0.8));

    let snapshot = manager.snapshot(USER).await.unwrap();
    assert_eq!(snapshot.recent_diary.len(), 1);
    assert_eq!(snapshot.recent_diary[0].estimate.food, "Chicken biryani");
    assert_eq!(kitchen.calls().len(), 0);
}

/// A vision model that never answers.
struct HungEye;

#[async_trait]
impl VisionAnalyzer for HungEye {
    async fn analyze(&self, _image: &Path) -> Result<NutritionEstimate, VisionError> {
        std::future::pending().await
    }
}

#[tokio::test]
async fn stuck_vision_times_out() {
    let kitchen = FakeKitchen::new();
    let store = store_with_profile().await;
    let manager = manager(&kitchen, store.clone()).with_vision(Arc::new(HungEye));

    let result = tokio::time::timeout(
        std::time::Duration::from_secs(5),
        manager.append_diary(USER, Path::new("lunch.jpg")),
    )
    .await
    .expect("append_diary must not hang");

    let err = result.unwrap_err();
    assert!(matches!(err, PlannerError::Vision(VisionError::Timeout(_))));
    let snapshot = manager.snapshot(USER).await.unwrap();
    assert!(snapshot.recent_diary.is_empty());
}
