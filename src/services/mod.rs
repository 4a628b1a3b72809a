pub mod booking;
pub mod catalog;
pub mod dates;
pub mod scheduling;
pub mod step_controller;
pub mod text;
pub mod turn;
