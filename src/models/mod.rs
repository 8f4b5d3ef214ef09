pub mod flight;

pub use flight::{
    extract_seats, AircraftLayout, AircraftType, FlightAssignment, FlightSeatAssignment,
};
