//! Plain-text rendering of plans and profiles for the terminal.

use std::fmt::Write;

use nourish_core::model::{PlanBundle, SustainabilityReport, UserProfile};

/// Multi-line plan listing: days and meals, totals, grocery list, verdict
/// and footprint.
pub fn plan(bundle: &PlanBundle) -> String {
    let plan = &bundle.plan;
    let mut out = String::new();

    let _ = writeln!(out, "Plan v{} ({})", plan.version, plan.id);
    let _ = writeln!(out, "{}", plan.summary);
    let _ = writeln!(
        out,
        "Target: {:.0} kcal, {:.0} g protein per day",
        plan.target.calories, plan.target.protein_g
    );

    for (day, totals) in plan.days.iter().zip(&plan.daily) {
        let _ = writeln!(
            out,
            "\nDay {}  ({:.0} kcal, {:.0} g protein)",
            day.day, totals.calories, totals.protein_g
        );
        for meal in &day.meals {
            let items: Vec<&str> = meal.items.iter().map(|i| i.name.as_str()).collect();
            let _ = writeln!(out, "  {:<10} {}", meal.name, items.join(", "));
        }
    }

    let _ = writeln!(out, "\nGrocery list:");
    for line in &plan.grocery.lines {
        let _ = writeln!(
            out,
            "  {:<32} {:>5} {:<8} {:>8.2}",
            line.name,
            format_quantity(line.quantity),
            line.unit,
            line.total_cost
        );
    }

    let _ = writeln!(
        out,
        "\nTotal cost {:.2} (avg {:.2}/day) against a {:.2} budget",
        plan.total_cost,
        plan.average_daily_cost(),
        plan.budget_ceiling
    );
    if plan.over_budget {
        let _ = writeln!(out, "OVER BUDGET by {:.2}", plan.overage());
    }
    for sub in &plan.substitutions {
        let _ = writeln!(
            out,
            "  swapped {} -> {} (x{}, saves {:.2})",
            sub.replaced, sub.with, sub.occurrences, sub.saving
        );
    }
    for warning in &plan.warnings {
        let _ = writeln!(out, "warning: {warning}");
    }
    let _ = writeln!(out, "\n{}", plan.verdict);
    let _ = write!(out, "{}", footprint(&bundle.report));
    out
}

/// One-line sustainability summary plus suggested swaps.
pub fn footprint(report: &SustainabilityReport) -> String {
    let mut out = String::new();
    let co2 = report
        .co2_kg
        .map_or_else(|| "unknown".to_owned(), |kg| format!("{kg:.1} kg CO2e"));
    match (report.score, report.impact()) {
        (Some(score), Some(impact)) => {
            let _ = writeln!(out, "Footprint: {co2}, score {score}/100 ({impact})");
        }
        _ => {
            let _ = writeln!(out, "Footprint: {co2}, score unavailable");
        }
    }
    for swap in &report.swaps {
        let _ = writeln!(out, "  try: {swap}");
    }
    out
}

pub fn profile(p: &UserProfile) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{}{}",
        p.user_id,
        p.display_name
            .as_deref()
            .map(|n| format!(" ({n})"))
            .unwrap_or_default()
    );
    let _ = writeln!(out, "  age:        {}", p.age);
    let _ = writeln!(out, "  sex:        {}", p.sex);
    let _ = writeln!(out, "  height:     {:.0} cm", p.height_cm);
    let _ = writeln!(
        out,
        "  weight:     {:.1} kg{}",
        p.weight_kg,
        p.goal_weight_kg
            .map(|g| format!(" (goal {g:.1} kg)"))
            .unwrap_or_default()
    );
    let _ = writeln!(out, "  activity:   {}", p.activity);
    let _ = writeln!(out, "  goal:       {}", p.goal);
    let _ = writeln!(out, "  diet:       {}", p.diet_type);
    let _ = writeln!(out, "  allergies:  {}", list_or_none(&p.allergies));
    let _ = writeln!(out, "  dislikes:   {}", list_or_none(&p.dislikes));
    if let Some(cuisine) = &p.cuisine {
        let _ = writeln!(out, "  cuisine:    {cuisine}");
    }
    let _ = writeln!(out, "  budget:     {:.2} per plan", p.budget_ceiling);
    let _ = write!(
        out,
        "  plan shape: {} days, {} meals/day",
        p.plan_days, p.meals_per_day
    );
    out
}

fn list_or_none(items: &[String]) -> String {
    if items.is_empty() {
        "none".to_owned()
    } else {
        items.join(", ")
    }
}

fn format_quantity(q: f64) -> String {
    if q.fract() == 0.0 {
        format!("{q:.0}")
    } else {
        format!("{q:.1}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nourish_core::model::{GroceryList, ReportSource};

    #[test]
    fn quantities_drop_trailing_zero() {
        assert_eq!(format_quantity(3.0), "3");
        assert_eq!(format_quantity(1.5), "1.5");
    }

    #[test]
    fn footprint_without_score_says_unavailable() {
        let report = SustainabilityReport::heuristic(&GroceryList::default());
        assert!(footprint(&report).contains("score unavailable"));
    }

    #[test]
    fn footprint_names_the_band() {
        let report = SustainabilityReport {
            co2_kg: Some(6.54),
            score: Some(85),
            high_emission_items: vec![],
            swaps: vec!["Swap mutton for rajma".to_owned()],
            source: ReportSource::Generator,
        };
        let text = footprint(&report);
        assert!(text.contains("6.5 kg CO2e"));
        assert!(text.contains("85/100 (eco-friendly)"));
        assert!(text.contains("try: Swap mutton for rajma"));
    }

    #[test]
    fn empty_lists_read_none() {
        assert_eq!(list_or_none(&[]), "none");
        assert_eq!(list_or_none(&["egg".to_owned(), "soy".to_owned()]), "egg, soy");
    }
}
