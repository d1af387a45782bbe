pub mod duplicates;
pub mod health;
pub mod jobs;
pub mod maintenance;
pub mod thumbs;
