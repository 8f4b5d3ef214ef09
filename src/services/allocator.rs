//! allocator.rs
//!
//! Подбор случайных мест по статичной схеме салона.
//!
//! Генератор тянет случайные пары (ряд, буква) пока не наберет нужное
//! количество уникальных мест. Потолок в 1000 попыток гарантирует
//! завершение даже когда запрошенное количество приближается к емкости
//! салона: либо полный результат, либо ошибка, частичных списков нет.

use rand::Rng;
use std::collections::{HashMap, HashSet};
use thiserror::Error;

use crate::models::{AircraftLayout, AircraftType};

const MAX_TRIES: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AllocationError {
    #[error("unknown aircraft")]
    UnknownAircraft,
    #[error("not enough available seats")]
    NotEnoughSeats,
}

#[derive(Debug, Error)]
pub enum LayoutError {
    #[error("failed to read seat layout file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid JSON in seat layout file: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid layout for {0}: empty seat letters or startRow > endRow")]
    Invalid(AircraftType),
}

/// Стратегия подбора мест. `excluded` - места, которые нельзя выдавать
/// (их держит вызывающий при частичной замене).
pub trait SeatAllocator: Send + Sync {
    fn generate_seats(
        &self,
        aircraft: AircraftType,
        count: usize,
        excluded: &[String],
    ) -> Result<Vec<String>, AllocationError>;
}

/// Равномерно-случайный генератор поверх неизменяемой карты схем салонов.
pub struct SeatGenerator {
    layouts: HashMap<AircraftType, AircraftLayout>,
}

impl SeatGenerator {
    pub fn new(layouts: HashMap<AircraftType, AircraftLayout>) -> Self {
        Self { layouts }
    }

    /// Читает схемы из JSON-файла. Вызывается один раз на старте процесса,
    /// любая ошибка здесь фатальна.
    pub fn from_file(path: &str) -> Result<Self, LayoutError> {
        let raw = std::fs::read_to_string(path)?;
        let layouts: HashMap<AircraftType, AircraftLayout> = serde_json::from_str(&raw)?;
        for (aircraft, layout) in &layouts {
            if layout.seats.is_empty() || layout.start_row > layout.end_row {
                return Err(LayoutError::Invalid(*aircraft));
            }
        }
        Ok(Self { layouts })
    }
}

impl SeatAllocator for SeatGenerator {
    fn generate_seats(
        &self,
        aircraft: AircraftType,
        count: usize,
        excluded: &[String],
    ) -> Result<Vec<String>, AllocationError> {
        let layout = self
            .layouts
            .get(&aircraft)
            .ok_or(AllocationError::UnknownAircraft)?;

        let mut rng = rand::thread_rng();
        let mut result = Vec::with_capacity(count);
        // Исключения и внутренние дубли проверяются через одно и то же множество
        let mut seen: HashSet<String> = excluded.iter().cloned().collect();
        let mut tries = 0;

        while result.len() < count && tries < MAX_TRIES {
            let row = rng.gen_range(layout.start_row..=layout.end_row);
            let letter = &layout.seats[rng.gen_range(0..layout.seats.len())];
            let seat = format!("{}{}", row, letter);
            if seen.insert(seat.clone()) {
                result.push(seat);
            }
            tries += 1;
        }

        if result.len() < count {
            return Err(AllocationError::NotEnoughSeats);
        }
        Ok(result)
    }
}
