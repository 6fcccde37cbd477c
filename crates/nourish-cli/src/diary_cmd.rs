//! `nourish diary` command: analyze a food photo into the user's diary.

use std::path::Path;

use anyhow::Result;

use nourish_core::SessionManager;

/// Run the diary command.
pub async fn run_diary(manager: &SessionManager, user_id: &str, image: &Path) -> Result<()> {
    let entry = manager.append_diary(user_id, image).await?;
    let e = &entry.estimate;

    println!("Recorded for {user_id}: {}", e.food);
    println!(
        "  {:.0} kcal, {:.0} g protein, {:.0} g carbs, {:.0} g fat",
        e.calories, e.protein_g, e.carbs_g, e.fat_g
    );
    if let Some(kg) = entry.co2_kg {
        println!("  ~{kg:.2} kg CO2e");
    }
    if let Some(notes) = &e.notes {
        println!("  {notes}");
    }
    Ok(())
}
