pub mod health;
pub mod recording;
