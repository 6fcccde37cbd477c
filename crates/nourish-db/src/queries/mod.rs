pub mod diary;
pub mod feedback;
pub mod plans;
pub mod profiles;
pub mod snapshot;
