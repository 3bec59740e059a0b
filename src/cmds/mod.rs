pub mod csv;
pub mod dump;
pub mod events;
pub mod jobs;
pub mod sort;
