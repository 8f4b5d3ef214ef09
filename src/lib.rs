pub mod config;
pub mod controllers;
pub mod database;
pub mod models;
pub mod repository;
pub mod services;

use crate::repository::FlightRepository;
use crate::services::allocator::SeatGenerator;
use crate::services::assignment::AssignmentService;

// Shared state для всего приложения
pub struct AppState {
    pub db: database::Database,
    pub config: config::Config,
    pub flights: AssignmentService<FlightRepository, SeatGenerator>,
}
